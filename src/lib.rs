//! eWASM execution engine: EEI host functions, contract validator, and
//! dispatcher for Ethereum-compatible Wasm smart contracts.
//!
//! The crate is layered as: [`memory`] (bounds-checked guest memory) under
//! [`eei`] (the 33 `ethereum`-namespace host functions) under [`engine`]
//! (wiring those functions into a `wasmer` instance) under [`dispatcher`]
//! (the transcompile/validate/execute/sentinel pipeline a host actually
//! calls). [`catalogue`] and [`validator`] police the boundary between a
//! contract and the EEI; [`host_context`] is the v-table the EEI calls back
//! into for chain state; [`ffi`] exposes all of the above as a C ABI.

pub mod catalogue;
pub mod dispatcher;
pub mod eei;
pub mod engine;
pub mod error;
pub mod ffi;
pub mod gas;
pub mod host_context;
pub mod memory;
pub mod types;
pub mod validator;

use std::sync::Once;

static LOGGING_INIT: Once = Once::new();

/// Installs `env_logger` once per process. Every public entry point that
/// can run standalone (the FFI shim, the demo binary) calls this before
/// doing anything else; safe to call more than once.
pub fn init_logging() {
    LOGGING_INIT.call_once(|| {
        env_logger::try_init().ok();
    });
}

pub use dispatcher::{dispatch, DispatcherConfig, EngineMode};
pub use engine::{EngineAdapter, WasmerEngine};
pub use error::{EeiError, Termination};
pub use host_context::{HostContext, MockHostContext};
pub use types::{
    Address, CallKind, CallMessage, ExecutionResult, HostCallResult, HostCallStatus, MessageFlags,
    Revision, StatusCode, TxContext, U256Be,
};
