//! funcbridge testing support
//!
//! A scripted, in-process stand-in for the compiler module, so the bridge
//! pipeline can be exercised without a compiled toolchain.

pub mod memory;
pub mod module;

pub use memory::SimulatedMemory;
pub use module::{
    CompileCall, CompileScript, InstanceReport, MockCompilerModule, MockInstantiator, MockLedger,
    MockScript,
};

use funcbridge::{BridgeSettings, FuncCompiler};
use std::sync::Arc;

/// A compiler on the scripted module, plus its ledger
pub fn mock_compiler(script: MockScript) -> (FuncCompiler<MockInstantiator>, Arc<MockLedger>) {
    let instantiator = MockInstantiator::new(script);
    let ledger = instantiator.ledger();
    (
        FuncCompiler::with_instantiator(instantiator, &BridgeSettings::default()),
        ledger,
    )
}
