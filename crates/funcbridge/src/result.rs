//! Compile results and version information

use serde::{Deserialize, Serialize};

/// Outcome of a compilation the compiler actually ran
///
/// A `Failure` is a normal answer (syntax error, unknown identifier...),
/// not a bridge error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum CompileResult {
    #[serde(rename = "ok", rename_all = "camelCase")]
    Success {
        /// Base64 bag-of-cells of the compiled code
        code_boc: String,
        /// Intermediate Fift assembly
        fift_code: String,
        /// Compiler warnings, verbatim
        warnings: String,
    },
    #[serde(rename = "error")]
    Failure { message: String },
}

impl CompileResult {
    pub fn is_success(&self) -> bool {
        matches!(self, CompileResult::Success { .. })
    }

    pub fn code_boc(&self) -> Option<&str> {
        match self {
            CompileResult::Success { code_boc, .. } => Some(code_boc),
            CompileResult::Failure { .. } => None,
        }
    }

    pub fn fift_code(&self) -> Option<&str> {
        match self {
            CompileResult::Success { fift_code, .. } => Some(fift_code),
            CompileResult::Failure { .. } => None,
        }
    }

    /// Warnings of a success, or the message of a failure
    pub fn diagnostics(&self) -> &str {
        match self {
            CompileResult::Success { warnings, .. } => warnings,
            CompileResult::Failure { message } => message,
        }
    }
}

/// Version record reported by the compiler module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    pub func_version: String,
    pub func_fift_lib_commit_hash: String,
    pub func_fift_lib_commit_date: String,
}

impl std::fmt::Display for VersionInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "FunC {} (funcfiftlib {}, {})",
            self.func_version, self.func_fift_lib_commit_hash, self.func_fift_lib_commit_date
        )
    }
}
