//! Scripted compiler module
//!
//! [`MockCompilerModule`] speaks the same ABI as the real compiler: it reads
//! the JSON request out of its simulated memory, looks the sources up in its
//! own [`VirtualFs`], and answers with a buffer it allocated itself. Every
//! instance reports what it saw to a shared [`MockLedger`].
//!
//! In [`CompileScript::Compile`] mode, source text drives the answer:
//!
//! ```text
//! ;; fail: <message>   the compiler reports <message> as an error
//! ;; warn: <message>   the compiler succeeds and warns <message>
//! ```

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use funcbridge::wasm_runtime::vfs::Node;
use funcbridge::{
    BridgeError, BridgeResult, GuestPtr, Instantiator, ModuleFilesystem, NativeModule,
    VirtualFs, WireConfig,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::memory::SimulatedMemory;

const FAIL_MARKER: &str = ";; fail: ";
const WARN_MARKER: &str = ";; warn: ";

/// How `func_compile` answers
#[derive(Debug, Clone, PartialEq)]
pub enum CompileScript {
    /// Read every requested source and compile it (see module docs)
    Compile,
    /// Answer with this text verbatim
    Respond(String),
    /// Answer with bytes that are not UTF-8
    InvalidUtf8,
    /// Trap inside the call
    Trap,
}

/// Behaviour shared by every instance of one [`MockInstantiator`]
#[derive(Debug, Clone)]
pub struct MockScript {
    pub compile: CompileScript,
    /// Raw `version()` answer
    pub version: String,
    /// Make every `malloc` return null
    pub fail_allocation: bool,
}

impl Default for MockScript {
    fn default() -> Self {
        Self {
            compile: CompileScript::Compile,
            version: json!({
                "funcVersion": "0.4.4",
                "funcFiftLibCommitHash": "5c3f1e25c6a8e4ed13b3ea2d4a4f5b6e21fcd5e3",
                "funcFiftLibCommitDate": "2023-05-04 15:34:07 +0300",
            })
            .to_string(),
            fail_allocation: false,
        }
    }
}

impl MockScript {
    pub fn responding(text: &str) -> Self {
        Self {
            compile: CompileScript::Respond(text.to_string()),
            ..Default::default()
        }
    }

    pub fn with_compile(mut self, compile: CompileScript) -> Self {
        self.compile = compile;
        self
    }

    pub fn with_version(mut self, version: &str) -> Self {
        self.version = version.to_string();
        self
    }

    pub fn with_failing_allocation(mut self) -> Self {
        self.fail_allocation = true;
        self
    }
}

/// What one `func_compile` call saw
#[derive(Debug, Clone, PartialEq)]
pub struct CompileCall {
    pub instance: usize,
    pub config: WireConfig,
    /// In-memory files of the instance at call time
    pub files: usize,
}

/// Memory accounting of one instance, taken when it was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceReport {
    pub instance: usize,
    pub allocations: usize,
    pub leaked: usize,
    pub invalid_frees: usize,
}

/// Observations shared by all instances of one instantiator
#[derive(Debug, Default)]
pub struct MockLedger {
    instantiations: AtomicUsize,
    calls: Mutex<Vec<CompileCall>>,
    reports: Mutex<Vec<InstanceReport>>,
}

impl MockLedger {
    pub fn instantiations(&self) -> usize {
        self.instantiations.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<CompileCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn last_config(&self) -> Option<WireConfig> {
        self.calls().pop().map(|c| c.config)
    }

    pub fn reports(&self) -> Vec<InstanceReport> {
        self.reports.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Buffers left allocated across every dropped instance
    pub fn leaked(&self) -> usize {
        self.reports().iter().map(|r| r.leaked).sum()
    }

    pub fn invalid_frees(&self) -> usize {
        self.reports().iter().map(|r| r.invalid_frees).sum()
    }

    fn record_call(&self, call: CompileCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }

    fn record_report(&self, report: InstanceReport) {
        if let Ok(mut reports) = self.reports.lock() {
            reports.push(report);
        }
    }
}

/// One instance of the scripted compiler
pub struct MockCompilerModule {
    id: usize,
    memory: SimulatedMemory,
    fs: VirtualFs,
    script: Arc<MockScript>,
    ledger: Arc<MockLedger>,
}

impl MockCompilerModule {
    pub fn new(id: usize, script: Arc<MockScript>, ledger: Arc<MockLedger>) -> Self {
        Self {
            id,
            memory: SimulatedMemory::default(),
            fs: VirtualFs::new(),
            script,
            ledger,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn memory(&self) -> &SimulatedMemory {
        &self.memory
    }

    pub fn vfs(&self) -> &VirtualFs {
        &self.fs
    }

    fn compile(&self, config: &WireConfig) -> String {
        let mut warnings = Vec::new();
        for path in &config.sources {
            let text = match self.fs.lookup(path) {
                Ok(Node::File(data)) => String::from_utf8_lossy(&data).into_owned(),
                Ok(Node::Dir) => return error_response(&format!("{}: is a directory", path)),
                Err(_) => return error_response(&format!("{}: cannot open file", path)),
            };
            for line in text.lines().map(str::trim) {
                if let Some(message) = line.strip_prefix(FAIL_MARKER) {
                    return error_response(message);
                }
                if let Some(message) = line.strip_prefix(WARN_MARKER) {
                    warnings.push(format!("{}: warning: {}", path, message));
                }
            }
        }

        let procs: String = config
            .sources
            .iter()
            .map(|path| format!("  DECLPROC {}\n", path))
            .collect();
        let boc = STANDARD.encode(format!("code:{}:{}", config.opt_level, config.sources.join(",")));
        json!({
            "status": "ok",
            "codeBoc": boc,
            "fiftCode": format!("PROGRAM{{\n{}}}END>c", procs),
            "warnings": warnings.join("\n"),
        })
        .to_string()
    }
}

fn error_response(message: &str) -> String {
    json!({ "status": "error", "message": message }).to_string()
}

impl Drop for MockCompilerModule {
    fn drop(&mut self) {
        self.ledger.record_report(InstanceReport {
            instance: self.id,
            allocations: self.memory.total_allocations(),
            leaked: self.memory.live_allocations(),
            invalid_frees: self.memory.invalid_frees(),
        });
    }
}

#[async_trait]
impl NativeModule for MockCompilerModule {
    async fn allocate(&mut self, len: u32) -> BridgeResult<GuestPtr> {
        if self.script.fail_allocation {
            return Err(BridgeError::Allocation { size: len });
        }
        self.memory.alloc(len)
    }

    async fn free(&mut self, ptr: GuestPtr) -> BridgeResult<()> {
        self.memory.free(ptr);
        Ok(())
    }

    fn write_utf8(&mut self, text: &str, ptr: GuestPtr, max_bytes: u32) -> BridgeResult<()> {
        self.memory.write_cstr(text, ptr, max_bytes).map(|_| ())
    }

    fn read_utf8(&self, ptr: GuestPtr) -> BridgeResult<String> {
        self.memory.read_cstr(ptr)
    }

    async fn invoke_compile(&mut self, config: GuestPtr) -> BridgeResult<GuestPtr> {
        let request = self.memory.read_cstr(config)?;
        let config: WireConfig = serde_json::from_str(&request)
            .map_err(|e| BridgeError::Invocation(format!("bad request: {}", e)))?;
        debug!("Mock instance {} compiling {:?}", self.id, config.sources);

        self.ledger.record_call(CompileCall {
            instance: self.id,
            config: config.clone(),
            files: self.fs.file_count(),
        });

        match &self.script.compile {
            CompileScript::Compile => {
                let response = self.compile(&config);
                self.memory.alloc_cstr(&response)
            }
            CompileScript::Respond(text) => self.memory.alloc_cstr(text),
            CompileScript::InvalidUtf8 => self.memory.alloc_bytes(&[0x7b, 0xff, 0xfe, 0x7d, 0]),
            CompileScript::Trap => Err(BridgeError::Invocation("unreachable".to_string())),
        }
    }

    async fn invoke_version(&mut self) -> BridgeResult<GuestPtr> {
        let version = self.script.version.clone();
        self.memory.alloc_cstr(&version)
    }

    fn filesystem(&mut self) -> &mut dyn ModuleFilesystem {
        &mut self.fs
    }
}

/// Instantiator handing out [`MockCompilerModule`]s
#[derive(Clone)]
pub struct MockInstantiator {
    script: Arc<MockScript>,
    ledger: Arc<MockLedger>,
}

impl MockInstantiator {
    pub fn new(script: MockScript) -> Self {
        Self {
            script: Arc::new(script),
            ledger: Arc::new(MockLedger::default()),
        }
    }

    pub fn ledger(&self) -> Arc<MockLedger> {
        self.ledger.clone()
    }
}

impl Default for MockInstantiator {
    fn default() -> Self {
        Self::new(MockScript::default())
    }
}

#[async_trait]
impl Instantiator for MockInstantiator {
    type Module = MockCompilerModule;

    async fn instantiate(&self) -> BridgeResult<MockCompilerModule> {
        let id = self.ledger.instantiations.fetch_add(1, Ordering::SeqCst);
        // let concurrent callers interleave here, like a real instantiation
        tokio::task::yield_now().await;
        Ok(MockCompilerModule::new(
            id,
            self.script.clone(),
            self.ledger.clone(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_compile_reads_sources_from_fs() {
        let instantiator = MockInstantiator::default();
        let mut module = instantiator.instantiate().await.unwrap();
        module
            .filesystem()
            .write_file("main.fc", ";; warn: unused x\n() main() { }")
            .unwrap();

        let config = module.memory.alloc_cstr(r#"{"sources":["main.fc"],"optLevel":2}"#).unwrap();
        let response = module.invoke_compile(config).await.unwrap();
        let text = module.read_utf8(response).unwrap();
        assert!(text.contains(r#""status":"ok""#));
        assert!(text.contains("main.fc: warning: unused x"));
    }

    #[tokio::test]
    async fn test_report_on_drop() {
        let instantiator = MockInstantiator::default();
        let ledger = instantiator.ledger();
        {
            let mut module = instantiator.instantiate().await.unwrap();
            let ptr = module.allocate(16).await.unwrap();
            module.allocate(16).await.unwrap();
            module.free(ptr).await.unwrap();
        }
        assert_eq!(ledger.instantiations(), 1);
        assert_eq!(ledger.leaked(), 1);
        assert_eq!(ledger.invalid_frees(), 0);
    }
}
