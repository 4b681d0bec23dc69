//! Compiler module payload
//!
//! The compiled toolchain ships as a text (base64) encoded or raw wasm
//! image. It is decoded once, then shared read-only by every instantiation.
//!
//! # Process-wide payload
//!
//! [`install`] stores a payload for the rest of the process and [`global`]
//! returns it. Initialization happens at most once; later `install` calls
//! return the payload that won. There is no teardown: the buffer is
//! immutable and is simply released when the process exits.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info};

use crate::config::{PayloadEncoding, PayloadSettings};
use crate::error::{BridgeError, BridgeResult};

const WASM_MAGIC: &[u8; 4] = b"\0asm";

/// Immutable bytes of the compiler module
#[derive(Clone)]
pub struct BinaryPayload {
    bytes: Arc<[u8]>,
    digest: String,
}

impl fmt::Debug for BinaryPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BinaryPayload")
            .field("len", &self.bytes.len())
            .field("digest", &self.digest)
            .finish()
    }
}

impl BinaryPayload {
    pub fn from_bytes(bytes: impl Into<Arc<[u8]>>) -> Self {
        let bytes = bytes.into();
        let digest = hex::encode(Sha256::digest(&bytes));
        Self { bytes, digest }
    }

    /// Decode a base64 text payload; whitespace and line breaks are ignored
    pub fn from_base64(text: &str) -> BridgeResult<Self> {
        let compact: String = text.chars().filter(|c| !c.is_ascii_whitespace()).collect();
        let bytes = STANDARD
            .decode(compact.as_bytes())
            .map_err(|e| BridgeError::Payload(format!("invalid base64: {}", e)))?;
        Ok(Self::from_bytes(bytes))
    }

    /// Read a payload file, decoding it according to `encoding`
    pub fn from_file(path: &Path, encoding: PayloadEncoding) -> BridgeResult<Self> {
        let raw = std::fs::read(path).map_err(|e| {
            BridgeError::Payload(format!("cannot read {}: {}", path.display(), e))
        })?;

        let payload = match encoding {
            PayloadEncoding::Binary => Self::from_bytes(raw),
            PayloadEncoding::Auto if raw.starts_with(WASM_MAGIC) => Self::from_bytes(raw),
            PayloadEncoding::Auto | PayloadEncoding::Base64 => {
                let text = std::str::from_utf8(&raw).map_err(|_| {
                    BridgeError::Payload(format!("{} is neither wasm nor base64", path.display()))
                })?;
                Self::from_base64(text)?
            }
        };

        info!(
            "Loaded compiler payload from {} ({} bytes, sha256 {})",
            path.display(),
            payload.len(),
            payload.digest()
        );
        Ok(payload)
    }

    /// Load the payload described by settings
    pub fn from_settings(settings: &PayloadSettings) -> BridgeResult<Self> {
        let path = settings.path.as_deref().ok_or_else(|| {
            BridgeError::Payload(
                "no payload configured; set payload.path or FUNCBRIDGE_PAYLOAD__PATH".to_string(),
            )
        })?;
        Self::from_file(path, settings.encoding)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Hex SHA-256 of the payload
    pub fn digest(&self) -> &str {
        &self.digest
    }
}

static GLOBAL: OnceLock<BinaryPayload> = OnceLock::new();

/// Store `payload` as the process-wide payload
///
/// Returns the installed payload, which is the earlier one if another
/// caller got there first.
pub fn install(payload: BinaryPayload) -> &'static BinaryPayload {
    let installed = GLOBAL.get_or_init(|| payload);
    debug!("Process-wide payload is {}", installed.digest());
    installed
}

/// The process-wide payload, if one was installed
pub fn global() -> Option<&'static BinaryPayload> {
    GLOBAL.get()
}

/// The process-wide payload, loading it from `settings` on first use
pub fn global_or_load(settings: &PayloadSettings) -> BridgeResult<&'static BinaryPayload> {
    if let Some(payload) = GLOBAL.get() {
        return Ok(payload);
    }
    let payload = BinaryPayload::from_settings(settings)?;
    Ok(install(payload))
}
