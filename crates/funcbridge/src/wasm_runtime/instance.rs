//! Compiler module instance
//!
//! One [`WasmtimeModule`] wraps one `Store` + `Instance` pair. It is the only
//! place where guest addresses are turned into wasm `i32` values.

use async_trait::async_trait;
use tracing::debug;
use wasmtime::{Instance, Memory, ResourceLimiter, Result, Store, TypedFunc};

use super::memory::{GuestPtr, read_cstr, write_cstr};
use super::vfs::VirtualFs;
use super::wasi::WasiState;
use crate::config::ExportNames;
use crate::error::{BridgeError, BridgeResult};
use crate::module::{ModuleFilesystem, NativeModule};

/// Store limits for resource control
#[derive(Debug, Clone, Default)]
pub struct StoreLimits {
    /// `None` leaves memory growth to the module
    pub max_memory_bytes: Option<u64>,
}

impl ResourceLimiter for StoreLimits {
    fn memory_growing(
        &mut self,
        _current: usize,
        desired: usize,
        maximum: Option<usize>,
    ) -> Result<bool> {
        let within_module = maximum.is_none_or(|max| desired <= max);
        let within_host = self
            .max_memory_bytes
            .is_none_or(|max| desired as u64 <= max);
        if !within_host {
            debug!("Refusing memory growth to {} bytes", desired);
        }
        Ok(within_module && within_host)
    }

    fn table_growing(
        &mut self,
        _current: usize,
        desired: usize,
        maximum: Option<usize>,
    ) -> Result<bool> {
        Ok(maximum.is_none_or(|max| desired <= max))
    }
}

/// Data stored in each instance's wasmtime `Store`
pub struct HostState {
    pub(crate) fs: VirtualFs,
    pub(crate) wasi: WasiState,
    pub(crate) limits: StoreLimits,
    /// Exported linear memory, set right after instantiation
    pub(crate) memory: Option<Memory>,
}

impl HostState {
    pub fn new(limits: StoreLimits) -> Self {
        Self {
            fs: VirtualFs::new(),
            wasi: WasiState::new(),
            limits,
            memory: None,
        }
    }
}

/// Live compiler instance backed by wasmtime
pub struct WasmtimeModule {
    store: Store<HostState>,
    memory: Memory,
    malloc: TypedFunc<i32, i32>,
    free: TypedFunc<i32, ()>,
    compile: TypedFunc<i32, i32>,
    version: TypedFunc<(), i32>,
}

fn typed<P, R>(
    store: &mut Store<HostState>,
    instance: &Instance,
    name: &str,
) -> BridgeResult<TypedFunc<P, R>>
where
    P: wasmtime::WasmParams,
    R: wasmtime::WasmResults,
{
    instance
        .get_typed_func::<P, R>(&mut *store, name)
        .map_err(|e| BridgeError::ExportNotFound(format!("{}: {}", name, e)))
}

fn trapped(what: &str, e: wasmtime::Error) -> BridgeError {
    BridgeError::Invocation(format!("{}: {}", what, e))
}

impl WasmtimeModule {
    /// Resolve the compiler ABI on a fresh instance and run its initializer
    pub(crate) async fn new(
        mut store: Store<HostState>,
        instance: Instance,
        exports: &ExportNames,
    ) -> BridgeResult<Self> {
        let memory = instance
            .get_memory(&mut store, &exports.memory)
            .ok_or_else(|| BridgeError::ExportNotFound(exports.memory.clone()))?;
        store.data_mut().memory = Some(memory);

        let malloc = typed::<i32, i32>(&mut store, &instance, &exports.malloc)?;
        let free = typed::<i32, ()>(&mut store, &instance, &exports.free)?;
        let compile = typed::<i32, i32>(&mut store, &instance, &exports.compile)?;
        let version = typed::<(), i32>(&mut store, &instance, &exports.version)?;

        if instance.get_func(&mut store, &exports.initialize).is_some() {
            let init = typed::<(), ()>(&mut store, &instance, &exports.initialize)?;
            init.call_async(&mut store, ())
                .await
                .map_err(|e| BridgeError::Instantiation(format!("initializer trapped: {}", e)))?;
            debug!("Ran {}", exports.initialize);
        }

        Ok(Self {
            store,
            memory,
            malloc,
            free,
            compile,
            version,
        })
    }

    /// Current size of the instance's linear memory in bytes
    pub fn memory_size(&self) -> usize {
        self.memory.data_size(&self.store)
    }

    /// The instance's filesystem, read-only
    pub fn vfs(&self) -> &VirtualFs {
        &self.store.data().fs
    }
}

#[async_trait]
impl NativeModule for WasmtimeModule {
    async fn allocate(&mut self, len: u32) -> BridgeResult<GuestPtr> {
        let raw = self
            .malloc
            .call_async(&mut self.store, len as i32)
            .await
            .map_err(|e| trapped("malloc", e))?;
        let ptr = GuestPtr::from_wasm(raw);
        if ptr.is_null() {
            return Err(BridgeError::Allocation { size: len });
        }
        Ok(ptr)
    }

    async fn free(&mut self, ptr: GuestPtr) -> BridgeResult<()> {
        self.free
            .call_async(&mut self.store, ptr.to_wasm())
            .await
            .map_err(|e| trapped("free", e))
    }

    fn write_utf8(&mut self, text: &str, ptr: GuestPtr, max_bytes: u32) -> BridgeResult<()> {
        let mem = self.memory.data_mut(&mut self.store);
        write_cstr(mem, text, ptr, max_bytes).map(|_| ())
    }

    fn read_utf8(&self, ptr: GuestPtr) -> BridgeResult<String> {
        read_cstr(self.memory.data(&self.store), ptr)
    }

    async fn invoke_compile(&mut self, config: GuestPtr) -> BridgeResult<GuestPtr> {
        self.compile
            .call_async(&mut self.store, config.to_wasm())
            .await
            .map(GuestPtr::from_wasm)
            .map_err(|e| trapped("func_compile", e))
    }

    async fn invoke_version(&mut self) -> BridgeResult<GuestPtr> {
        self.version
            .call_async(&mut self.store, ())
            .await
            .map(GuestPtr::from_wasm)
            .map_err(|e| trapped("version", e))
    }

    fn filesystem(&mut self) -> &mut dyn ModuleFilesystem {
        &mut self.store.data_mut().fs
    }
}
