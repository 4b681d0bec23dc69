//! Shared state for command execution

use funcbridge::{BridgeSettings, FuncCompiler};
use std::path::Path;
use tracing::debug;

use crate::error::CliError;
use crate::output::OutputFormat;

/// What every command gets to work with
pub struct CliContext {
    pub output: OutputFormat,
    pub compiler: FuncCompiler,
}

impl CliContext {
    /// Load settings, apply command-line overrides and build the compiler
    pub fn new(
        output: OutputFormat,
        config: Option<&Path>,
        payload: Option<&Path>,
    ) -> Result<Self, CliError> {
        let mut settings = BridgeSettings::load(config)?;
        if let Some(payload) = payload {
            settings = settings.with_payload_path(payload);
        }
        debug!("Using settings {:?}", settings);

        let compiler = FuncCompiler::from_settings(&settings)?;
        Ok(Self { output, compiler })
    }
}
