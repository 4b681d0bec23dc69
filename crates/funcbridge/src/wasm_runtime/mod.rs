//! WASM Runtime Module
//!
//! wasmtime backend for the compiler module:
//! - one compiled module per payload, one fresh `Store` per invocation
//! - bounds-checked string marshalling through linear memory
//! - a per-instance virtual filesystem with read-only host mounts
//! - the WASI `preview1` imports the compiler needs to read its sources
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 WasmtimeInstantiator                        │
//! │  ┌────────────┐  ┌────────────┐  ┌──────────────────────┐   │
//! │  │  Engine    │  │   Linker   │  │ InstancePre (shared) │   │
//! │  └────────────┘  └────────────┘  └──────────────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//!                               │ instantiate() per call
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 WasmtimeModule (one invocation)             │
//! │  ┌─────────────┐  ┌────────────┐  ┌─────────────────────┐   │
//! │  │ Linear mem  │  │ WasiState  │  │ VirtualFs + mounts  │   │
//! │  └─────────────┘  └────────────┘  └─────────────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod instance;
pub mod memory;
mod runtime;
pub mod vfs;
pub mod wasi;

pub use instance::{HostState, StoreLimits, WasmtimeModule};
pub use memory::GuestPtr;
pub use runtime::WasmtimeInstantiator;
pub use vfs::VirtualFs;
