//! Capability interface of the native compiler module
//!
//! The bridge drives the compiler only through these traits. The wasmtime
//! adapter in [`crate::wasm_runtime`] is the production implementation;
//! tests substitute scripted modules.

use async_trait::async_trait;
use std::path::PathBuf;

use crate::error::BridgeResult;
use crate::wasm_runtime::GuestPtr;

/// What backs a mount point inside the module's filesystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountBacking {
    /// Read-only view of a host directory
    HostDir { root: PathBuf },
}

/// Filesystem view visible to one module instance
pub trait ModuleFilesystem: Send {
    fn write_file(&mut self, path: &str, contents: &str) -> BridgeResult<()>;

    fn mkdir(&mut self, path: &str) -> BridgeResult<()>;

    fn mount(&mut self, backing: MountBacking, path: &str) -> BridgeResult<()>;
}

/// One live instance of the compiler module
///
/// Owned by exactly one invocation and dropped when it completes.
#[async_trait]
pub trait NativeModule: Send {
    /// Allocate `len` bytes of module memory
    async fn allocate(&mut self, len: u32) -> BridgeResult<GuestPtr>;

    /// Release memory obtained from [`allocate`](Self::allocate) or returned
    /// by an entry point
    async fn free(&mut self, ptr: GuestPtr) -> BridgeResult<()>;

    /// Write `text` NUL-terminated at `ptr`, using at most `max_bytes` bytes
    fn write_utf8(&mut self, text: &str, ptr: GuestPtr, max_bytes: u32) -> BridgeResult<()>;

    /// Decode the NUL-terminated UTF-8 string at `ptr`
    fn read_utf8(&self, ptr: GuestPtr) -> BridgeResult<String>;

    /// Run the compiler on the wire config stored at `config`
    async fn invoke_compile(&mut self, config: GuestPtr) -> BridgeResult<GuestPtr>;

    /// Ask the compiler for its version record
    async fn invoke_version(&mut self) -> BridgeResult<GuestPtr>;

    fn filesystem(&mut self) -> &mut dyn ModuleFilesystem;
}

/// Produces fresh, isolated module instances
#[async_trait]
pub trait Instantiator: Send + Sync + 'static {
    type Module: NativeModule;

    async fn instantiate(&self) -> BridgeResult<Self::Module>;
}
