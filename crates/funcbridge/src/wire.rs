//! Wire protocol with the compiler module
//!
//! Requests and responses cross the boundary as NUL-terminated JSON strings
//! in module memory:
//!
//! ```text
//! request   {"sources":["/working/main.fc"],"optLevel":2}
//! response  {"status":"ok","codeBoc":"...","fiftCode":"...","warnings":"..."}
//!           {"status":"error","message":"..."}
//! ```
//!
//! Every buffer the bridge allocates, and every buffer the module hands
//! back, is freed before these functions return, whatever the outcome.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{BridgeError, BridgeResult};
use crate::module::NativeModule;
use crate::result::{CompileResult, VersionInfo};
use crate::wasm_runtime::GuestPtr;

/// Compiler configuration as the module expects it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireConfig {
    /// Entry point paths as seen inside the instance
    pub sources: Vec<String>,
    pub opt_level: u32,
}

/// Release a buffer, logging instead of failing
///
/// Used on error paths, where the original error is the one to report.
async fn release<M>(module: &mut M, ptr: GuestPtr)
where
    M: NativeModule + ?Sized,
{
    if let Err(e) = module.free(ptr).await {
        warn!("Failed to free module buffer at {:#x}: {}", ptr.addr(), e);
    }
}

/// Serialize `config` into a freshly allocated module buffer
pub async fn marshal_request<M>(module: &mut M, config: &WireConfig) -> BridgeResult<GuestPtr>
where
    M: NativeModule + ?Sized,
{
    let json = serde_json::to_string(config)
        .map_err(|e| BridgeError::Marshalling(e.to_string()))?;
    let size = u32::try_from(json.len() + 1)
        .map_err(|_| BridgeError::Marshalling(format!("request too large: {} bytes", json.len())))?;

    let ptr = module.allocate(size).await?;
    if let Err(e) = module.write_utf8(&json, ptr, size) {
        release(module, ptr).await;
        return Err(e);
    }
    debug!("Marshalled {} byte request at {:#x}", size, ptr.addr());
    Ok(ptr)
}

/// Run the compiler on a marshalled request and decode its answer
///
/// Takes ownership of the request buffer: it is freed on every path.
pub async fn invoke_compile<M>(module: &mut M, config: GuestPtr) -> BridgeResult<CompileResult>
where
    M: NativeModule + ?Sized,
{
    let response = match module.invoke_compile(config).await {
        Ok(ptr) => ptr,
        Err(e) => {
            release(module, config).await;
            return Err(e);
        }
    };

    let text = module.read_utf8(response);
    let freed = free_pair(module, response, config).await;
    let text = text?;
    freed?;

    debug!("Compiler answered with {} bytes", text.len());
    map_compile_response(&text)
}

async fn free_pair<M>(module: &mut M, response: GuestPtr, config: GuestPtr) -> BridgeResult<()>
where
    M: NativeModule + ?Sized,
{
    let first = if response.is_null() || response == config {
        Ok(())
    } else {
        module.free(response).await
    };
    let second = module.free(config).await;
    first.and(second)
}

/// Map a decoded response to the public result
pub fn map_compile_response(text: &str) -> BridgeResult<CompileResult> {
    serde_json::from_str(text).map_err(|e| BridgeError::Decoding(e.to_string()))
}

/// Ask the module for its version record
pub async fn query_version<M>(module: &mut M) -> BridgeResult<VersionInfo>
where
    M: NativeModule + ?Sized,
{
    let ptr = module.invoke_version().await?;
    let text = module.read_utf8(ptr);
    if !ptr.is_null() {
        module.free(ptr).await?;
    }
    decode_version(&text?)
}

/// Parse a version record; every field must be a non-empty string
pub fn decode_version(text: &str) -> BridgeResult<VersionInfo> {
    let info: VersionInfo =
        serde_json::from_str(text).map_err(|e| BridgeError::Decoding(e.to_string()))?;

    for (name, value) in [
        ("funcVersion", &info.func_version),
        ("funcFiftLibCommitHash", &info.func_fift_lib_commit_hash),
        ("funcFiftLibCommitDate", &info.func_fift_lib_commit_date),
    ] {
        if value.is_empty() {
            return Err(BridgeError::Decoding(format!("empty {} in version record", name)));
        }
    }
    Ok(info)
}
