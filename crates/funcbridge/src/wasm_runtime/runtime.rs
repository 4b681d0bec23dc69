//! WASM Runtime Core
//!
//! Turns the payload into machine code once, then stamps out isolated
//! instances of it: every call to [`WasmtimeInstantiator::instantiate`]
//! creates a new `Store` with its own linear memory, WASI descriptor table
//! and virtual filesystem.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};
use wasmtime::{Config, Engine, InstancePre, Linker, Module, OptLevel, Store};

use super::instance::{HostState, StoreLimits, WasmtimeModule};
use super::wasi;
use crate::config::{BridgeSettings, ExportNames};
use crate::error::{BridgeError, BridgeResult};
use crate::module::Instantiator;
use crate::payload::BinaryPayload;

fn engine_config() -> Config {
    let mut config = Config::new();
    config.async_support(true);
    config.cranelift_opt_level(OptLevel::Speed);
    config.parallel_compilation(true);
    config
}

/// Instantiator for the wasmtime backend
///
/// Cloning is cheap; clones share the compiled module.
#[derive(Clone)]
pub struct WasmtimeInstantiator {
    engine: Engine,
    pre: InstancePre<HostState>,
    exports: Arc<ExportNames>,
    limits: StoreLimits,
    digest: Arc<str>,
}

impl WasmtimeInstantiator {
    /// Compile `payload` and link it against the host imports
    pub fn new(payload: &BinaryPayload, settings: &BridgeSettings) -> BridgeResult<Self> {
        let engine = Engine::new(&engine_config())
            .map_err(|e| BridgeError::Instantiation(format!("failed to create engine: {}", e)))?;

        let start = Instant::now();
        let module = Module::new(&engine, payload.bytes())
            .map_err(|e| BridgeError::Instantiation(format!("invalid compiler module: {}", e)))?;
        info!(
            "Compiled compiler module {} in {}ms ({} bytes)",
            payload.digest(),
            start.elapsed().as_millis(),
            payload.len()
        );

        let mut linker = Linker::new(&engine);
        wasi::add_to_linker(&mut linker)?;
        linker
            .define_unknown_imports_as_traps(&module)
            .map_err(|e| BridgeError::Instantiation(e.to_string()))?;
        let pre = linker
            .instantiate_pre(&module)
            .map_err(|e| BridgeError::Instantiation(e.to_string()))?;

        Ok(Self {
            engine,
            pre,
            exports: Arc::new(settings.exports.clone()),
            limits: StoreLimits {
                max_memory_bytes: settings.max_memory_bytes,
            },
            digest: Arc::from(payload.digest()),
        })
    }

    /// Get the wasmtime engine
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn payload_digest(&self) -> &str {
        &self.digest
    }
}

#[async_trait]
impl Instantiator for WasmtimeInstantiator {
    type Module = WasmtimeModule;

    async fn instantiate(&self) -> BridgeResult<WasmtimeModule> {
        let mut store = Store::new(&self.engine, HostState::new(self.limits.clone()));
        store.limiter(|state| &mut state.limits);

        let instance = self
            .pre
            .instantiate_async(&mut store)
            .await
            .map_err(|e| BridgeError::Instantiation(e.to_string()))?;

        let module = WasmtimeModule::new(store, instance, &self.exports).await?;
        debug!(
            "Instantiated compiler {} ({} bytes of linear memory)",
            self.digest,
            module.memory_size()
        );
        Ok(module)
    }
}
