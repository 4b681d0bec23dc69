//! FunC compiler bridge
//!
//! Runs the FunC toolchain (`funcfiftlib`, compiled to WebAssembly) in
//! process and compiles FunC sources to a base64 code BoC and Fift assembly.
//!
//! Each call gets its own module instance:
//!
//! ```text
//! payload ─► instantiate ─► provision sources ─► marshal request
//!                                                     │
//!            CompileResult ◄─ map response ◄─ invoke func_compile
//! ```
//!
//! # Example
//!
//! ```ignore
//! use funcbridge::{BinaryPayload, BridgeSettings, CompileRequest, FuncCompiler};
//!
//! let payload = BinaryPayload::from_file("funcfiftlib.wasm".as_ref(), Default::default())?;
//! let compiler = FuncCompiler::from_payload(&payload, &BridgeSettings::default())?;
//!
//! let request = CompileRequest::new(["stdlib.fc", "main.fc"])
//!     .with_source("stdlib.fc", STDLIB)
//!     .with_source("main.fc", MAIN);
//! let result = compiler.compile(request)?.await?;
//! ```

pub mod bridge;
pub mod config;
pub mod error;
pub mod module;
pub mod payload;
pub mod provision;
pub mod request;
pub mod result;
pub mod wasm_runtime;
pub mod wire;

pub use bridge::{CompileJob, FuncCompiler, compile_func, compiler_version, global_compiler};
pub use config::{BridgeSettings, ExportNames, PayloadEncoding, PayloadSettings};
pub use error::{BridgeError, BridgeResult, ConfigError, Error};
pub use module::{Instantiator, ModuleFilesystem, MountBacking, NativeModule};
pub use payload::BinaryPayload;
pub use provision::{MaterializeSources, PassthroughMount, SourceStrategy, VirtualSources};
pub use request::{CompilePlan, CompileRequest, FilesystemMode, PlanOptions, SourcesMap};
pub use result::{CompileResult, VersionInfo};
pub use wasm_runtime::{GuestPtr, VirtualFs, WasmtimeInstantiator, WasmtimeModule};
pub use wire::WireConfig;
