//! Bridge settings
//!
//! Settings are layered with the `config` crate: built-in defaults, then an
//! optional file (format picked from its extension), then environment
//! variables prefixed with `FUNCBRIDGE_`, using `__` to reach nested keys:
//!
//! ```text
//! FUNCBRIDGE_PAYLOAD__PATH=/opt/func/funcfiftlib.wasm
//! FUNCBRIDGE_MOUNT_POINT=/working
//! FUNCBRIDGE_EXPORTS__COMPILE=func_compile
//! ```

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{BridgeError, BridgeResult};

/// Environment variable prefix
pub const ENV_PREFIX: &str = "FUNCBRIDGE";

/// Environment variable naming a settings file for [`BridgeSettings::from_env`]
pub const CONFIG_PATH_VAR: &str = "FUNCBRIDGE_CONFIG";

/// How the payload file is encoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadEncoding {
    /// Raw `.wasm` if it starts with the wasm magic, base64 text otherwise
    #[default]
    Auto,
    Base64,
    Binary,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PayloadSettings {
    /// Location of the compiler module
    pub path: Option<PathBuf>,
    pub encoding: PayloadEncoding,
}

/// Export names of the compiler module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportNames {
    pub memory: String,
    pub malloc: String,
    pub free: String,
    pub compile: String,
    pub version: String,
    /// Optional reactor initializer, called once per instance when exported
    pub initialize: String,
}

impl Default for ExportNames {
    fn default() -> Self {
        Self {
            memory: "memory".to_string(),
            malloc: "malloc".to_string(),
            free: "free".to_string(),
            compile: "func_compile".to_string(),
            version: "version".to_string(),
            initialize: "_initialize".to_string(),
        }
    }
}

/// Complete bridge configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeSettings {
    pub payload: PayloadSettings,
    /// Guest directory where the host working directory is mounted in
    /// passthrough mode
    pub mount_point: String,
    /// Optimization level used when a request does not set one
    pub default_opt_level: u32,
    /// Upper bound for a single instance's linear memory
    pub max_memory_bytes: Option<u64>,
    pub exports: ExportNames,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            payload: PayloadSettings::default(),
            mount_point: "/working".to_string(),
            default_opt_level: 2,
            max_memory_bytes: None,
            exports: ExportNames::default(),
        }
    }
}

/// Detect configuration format from file extension
pub fn detect_format(path: &Path) -> BridgeResult<FileFormat> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .ok_or_else(|| {
            BridgeError::Settings(format!("no file extension on {}", path.display()))
        })?;

    match ext.to_lowercase().as_str() {
        "yaml" | "yml" => Ok(FileFormat::Yaml),
        "toml" => Ok(FileFormat::Toml),
        "json" => Ok(FileFormat::Json),
        "ini" => Ok(FileFormat::Ini),
        "ron" => Ok(FileFormat::Ron),
        "json5" => Ok(FileFormat::Json5),
        _ => Err(BridgeError::Settings(format!("unsupported format: {}", ext))),
    }
}

fn default_env() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

impl BridgeSettings {
    /// Load defaults, then `path` if given, then `FUNCBRIDGE_*` variables
    pub fn load(path: Option<&Path>) -> BridgeResult<Self> {
        let file = match path {
            Some(path) => {
                let format = detect_format(path)?;
                let content = std::fs::read_to_string(path)?;
                Some((content, format))
            }
            None => None,
        };
        Self::build(file.as_ref().map(|(c, f)| (c.as_str(), *f)), default_env())
    }

    /// Same as [`load`](Self::load), with the file named by `FUNCBRIDGE_CONFIG`
    pub fn from_env() -> BridgeResult<Self> {
        let path = std::env::var_os(CONFIG_PATH_VAR).map(PathBuf::from);
        Self::load(path.as_deref())
    }

    /// Parse settings from a string with explicit format, environment ignored
    pub fn from_str_with_format(content: &str, format: FileFormat) -> BridgeResult<Self> {
        Self::build(
            Some((content, format)),
            Environment::with_prefix(ENV_PREFIX).source(Some(Default::default())),
        )
    }

    fn build(file: Option<(&str, FileFormat)>, env: Environment) -> BridgeResult<Self> {
        let defaults = Config::try_from(&BridgeSettings::default())
            .map_err(|e| BridgeError::Settings(e.to_string()))?;

        let mut builder = Config::builder().add_source(defaults);
        if let Some((content, format)) = file {
            builder = builder.add_source(File::from_str(content, format));
        }

        let settings: BridgeSettings = builder
            .add_source(env)
            .build()
            .map_err(|e| BridgeError::Settings(e.to_string()))?
            .try_deserialize()
            .map_err(|e| BridgeError::Settings(e.to_string()))?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> BridgeResult<()> {
        let relative_segment = self
            .mount_point
            .split('/')
            .any(|segment| segment == "." || segment == "..");
        if !self.mount_point.starts_with('/')
            || self.mount_point.trim_matches('/').is_empty()
            || relative_segment
        {
            return Err(BridgeError::Settings(format!(
                "mount_point must be an absolute, non-root path: {:?}",
                self.mount_point
            )));
        }
        Ok(())
    }

    pub fn with_payload_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.payload.path = Some(path.into());
        self
    }

    pub fn with_mount_point(mut self, mount_point: &str) -> Self {
        self.mount_point = mount_point.to_string();
        self
    }

    pub fn with_max_memory_bytes(mut self, bytes: u64) -> Self {
        self.max_memory_bytes = Some(bytes);
        self
    }
}
