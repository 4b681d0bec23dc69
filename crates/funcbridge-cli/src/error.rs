use funcbridge::{BridgeError, ConfigError};
use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum CliError {
    #[error("Invalid request: {0}")]
    Request(#[from] ConfigError),

    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error("Cannot read source {path}: {source}")]
    Source {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid code BoC: {0}")]
    InvalidBoc(#[from] base64::DecodeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}
