//! Compiler facade
//!
//! [`FuncCompiler`] runs one compile or version query per fresh module
//! instance. The only state it shares between calls is the instantiator,
//! which holds the compiled module and nothing mutable.

use futures::future::BoxFuture;
use std::fmt;
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::config::BridgeSettings;
use crate::error::{BridgeResult, ConfigError, Error};
use crate::module::{Instantiator, NativeModule};
use crate::payload::{self, BinaryPayload};
use crate::provision::MaterializeSources;
use crate::request::{CompilePlan, CompileRequest, FilesystemMode, PlanOptions};
use crate::result::{CompileResult, VersionInfo};
use crate::wasm_runtime::WasmtimeInstantiator;
use crate::wire::{self, WireConfig};

/// FunC compiler bridge
pub struct FuncCompiler<I: Instantiator = WasmtimeInstantiator> {
    inner: Arc<Inner<I>>,
}

struct Inner<I> {
    instantiator: I,
    options: PlanOptions,
}

impl<I: Instantiator> Clone for FuncCompiler<I> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<I: Instantiator> fmt::Debug for FuncCompiler<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FuncCompiler")
            .field("options", &self.inner.options)
            .finish_non_exhaustive()
    }
}

impl FuncCompiler<WasmtimeInstantiator> {
    /// Build a compiler on the wasmtime backend from an explicit payload
    pub fn from_payload(payload: &BinaryPayload, settings: &BridgeSettings) -> BridgeResult<Self> {
        let instantiator = WasmtimeInstantiator::new(payload, settings)?;
        Ok(Self::with_instantiator(instantiator, settings))
    }

    /// Build a compiler on the process-wide payload, loading it if needed
    pub fn from_settings(settings: &BridgeSettings) -> BridgeResult<Self> {
        settings.validate()?;
        let payload = payload::global_or_load(&settings.payload)?;
        Self::from_payload(payload, settings)
    }
}

impl<I: Instantiator> FuncCompiler<I> {
    pub fn with_instantiator(instantiator: I, settings: &BridgeSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                instantiator,
                options: PlanOptions {
                    mount_point: settings.mount_point.clone(),
                    default_opt_level: settings.default_opt_level,
                },
            }),
        }
    }

    pub fn instantiator(&self) -> &I {
        &self.inner.instantiator
    }

    /// Validate `request` and prepare its compilation
    ///
    /// Usage errors are reported here, before any module is created. The
    /// returned job does nothing until awaited.
    ///
    /// ```ignore
    /// let request = CompileRequest::new(["main.fc"]).with_source("main.fc", source);
    /// match compiler.compile(request)?.await? {
    ///     CompileResult::Success { code_boc, .. } => println!("{}", code_boc),
    ///     CompileResult::Failure { message } => eprintln!("{}", message),
    /// }
    /// ```
    pub fn compile(&self, request: CompileRequest) -> Result<CompileJob, ConfigError> {
        let plan = request.into_plan(&self.inner.options)?;
        let mode = plan.mode();
        let entry_points = plan.entry_points.clone();
        let inner = self.inner.clone();

        Ok(CompileJob {
            mode,
            entry_points,
            future: Box::pin(async move { inner.run(plan).await }),
        })
    }

    /// Query the compiler's version record
    pub async fn version(&self) -> BridgeResult<VersionInfo> {
        let mut module = self.inner.instantiator.instantiate().await?;
        let info = wire::query_version(&mut module).await?;
        debug!("Compiler version: {}", info);
        Ok(info)
    }
}

impl<I: Instantiator> Inner<I> {
    async fn run(&self, plan: CompilePlan) -> BridgeResult<CompileResult> {
        let start = Instant::now();
        info!(
            "Compiling {:?} ({:?} filesystem, optLevel {})",
            plan.entry_points,
            plan.mode(),
            plan.opt_level
        );

        let mut module = self.instantiator.instantiate().await?;
        plan.strategy.materialize(module.filesystem())?;

        let config = WireConfig {
            sources: plan.strategy.resolve_entry_points(&plan.entry_points),
            opt_level: plan.opt_level,
        };
        let ptr = wire::marshal_request(&mut module, &config).await?;
        let result = wire::invoke_compile(&mut module, ptr).await?;
        drop(module);

        match &result {
            CompileResult::Success { warnings, .. } => info!(
                "Compiled {:?} in {}ms ({} bytes of warnings)",
                plan.entry_points,
                start.elapsed().as_millis(),
                warnings.len()
            ),
            CompileResult::Failure { .. } => info!(
                "Compiler rejected {:?} after {}ms",
                plan.entry_points,
                start.elapsed().as_millis()
            ),
        }
        Ok(result)
    }
}

/// A validated compilation, run by awaiting it
#[must_use = "a compile job does nothing unless awaited"]
pub struct CompileJob {
    mode: FilesystemMode,
    entry_points: Vec<String>,
    future: BoxFuture<'static, BridgeResult<CompileResult>>,
}

impl CompileJob {
    pub fn mode(&self) -> FilesystemMode {
        self.mode
    }

    pub fn entry_points(&self) -> &[String] {
        &self.entry_points
    }
}

impl fmt::Debug for CompileJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompileJob")
            .field("mode", &self.mode)
            .field("entry_points", &self.entry_points)
            .finish_non_exhaustive()
    }
}

impl IntoFuture for CompileJob {
    type Output = BridgeResult<CompileResult>;
    type IntoFuture = BoxFuture<'static, BridgeResult<CompileResult>>;

    fn into_future(self) -> Self::IntoFuture {
        self.future
    }
}

static GLOBAL_COMPILER: OnceCell<FuncCompiler> = OnceCell::const_new();

/// The process-wide compiler, built from [`BridgeSettings::from_env`] on
/// first use
pub async fn global_compiler() -> BridgeResult<&'static FuncCompiler> {
    GLOBAL_COMPILER
        .get_or_try_init(|| async {
            let settings = BridgeSettings::from_env()?;
            FuncCompiler::from_settings(&settings)
        })
        .await
}

/// Compile with the process-wide compiler
///
/// The request is validated before the compiler is looked up.
pub async fn compile_func(request: CompileRequest) -> Result<CompileResult, Error> {
    request.validate()?;
    let compiler = global_compiler().await?;
    Ok(compiler.compile(request)?.await?)
}

/// Version of the process-wide compiler
pub async fn compiler_version() -> BridgeResult<VersionInfo> {
    global_compiler().await?.version().await
}
