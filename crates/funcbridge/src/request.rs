//! Compile requests
//!
//! A [`CompileRequest`] is validated into a [`CompilePlan`] before any module
//! exists. Validation is the only step that can reject a request
//! synchronously.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, warn};

use crate::error::ConfigError;
use crate::provision::{PassthroughMount, SourceStrategy, VirtualSources};

/// Source file name → source text
pub type SourcesMap = BTreeMap<String, String>;

/// Where the compiler reads sources from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilesystemMode {
    /// Sources are written into the instance's in-memory filesystem
    #[serde(alias = "memfs")]
    Virtual,
    /// The host working directory is mounted into the instance
    #[serde(alias = "node")]
    Passthrough,
}

/// A request to compile a set of entry points
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileRequest {
    /// Translation roots, in compiler order
    pub entry_points: Vec<String>,
    /// In-memory sources; selects [`FilesystemMode::Virtual`] unless `fs`
    /// says otherwise
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<SourcesMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fs: Option<FilesystemMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opt_level: Option<u32>,
    /// Root of the passthrough mount; the process working directory when
    /// unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
}

impl CompileRequest {
    pub fn new<I, S>(entry_points: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            entry_points: entry_points.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn with_source(mut self, name: &str, text: &str) -> Self {
        self.sources
            .get_or_insert_with(SourcesMap::new)
            .insert(name.to_string(), text.to_string());
        self
    }

    pub fn with_sources(mut self, sources: SourcesMap) -> Self {
        self.sources = Some(sources);
        self
    }

    pub fn with_fs(mut self, mode: FilesystemMode) -> Self {
        self.fs = Some(mode);
        self
    }

    pub fn with_opt_level(mut self, level: u32) -> Self {
        self.opt_level = Some(level);
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Mode used when none is forced: virtual iff sources are supplied
    pub fn effective_mode(&self) -> FilesystemMode {
        self.fs.unwrap_or(if self.sources.is_some() {
            FilesystemMode::Virtual
        } else {
            FilesystemMode::Passthrough
        })
    }

    /// Check the entry points against the sources
    ///
    /// With a source map present, or virtual mode forced, every entry point
    /// must be a key; the first one missing is reported.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.entry_points.is_empty() {
            return Err(ConfigError::NoEntryPoints);
        }

        if self.sources.is_some() || self.effective_mode() == FilesystemMode::Virtual {
            let sources = self.sources.as_ref();
            if let Some(missing) = self
                .entry_points
                .iter()
                .find(|entry| !sources.is_some_and(|s| s.contains_key(entry.as_str())))
            {
                return Err(ConfigError::MissingEntryPoint(missing.clone()));
            }
        }
        Ok(())
    }

    /// Validate the request and fix every per-invocation decision
    pub fn into_plan(self, options: &PlanOptions) -> Result<CompilePlan, ConfigError> {
        self.validate()?;

        let mode = self.effective_mode();
        let strategy = match mode {
            FilesystemMode::Virtual => {
                SourceStrategy::Virtual(VirtualSources::new(self.sources.unwrap_or_default()))
            }
            FilesystemMode::Passthrough => {
                if self.sources.is_some() {
                    warn!("Ignoring in-memory sources: passthrough filesystem was requested");
                }
                SourceStrategy::Passthrough(PassthroughMount::new(
                    &options.mount_point,
                    self.working_dir,
                ))
            }
        };

        let opt_level = self.opt_level.unwrap_or(options.default_opt_level);
        debug!(
            "Planned compile of {:?} ({:?} filesystem, optLevel {})",
            self.entry_points, mode, opt_level
        );

        Ok(CompilePlan {
            entry_points: self.entry_points,
            strategy,
            opt_level,
        })
    }
}

/// Bridge-wide defaults applied while planning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanOptions {
    pub mount_point: String,
    pub default_opt_level: u32,
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self {
            mount_point: "/working".to_string(),
            default_opt_level: 2,
        }
    }
}

/// A validated request, ready to run against a fresh instance
#[derive(Debug, Clone)]
pub struct CompilePlan {
    pub entry_points: Vec<String>,
    pub strategy: SourceStrategy,
    pub opt_level: u32,
}

impl CompilePlan {
    pub fn mode(&self) -> FilesystemMode {
        self.strategy.mode()
    }
}
