//! Engine adapter: the minimal interface to a Wasm engine, validate,
//! instantiate with imports, run `main`, expose a memory handle, and the
//! only implementation this crate ships, on top of `wasmer`.
//!
//! Grounded in the wasmer wiring from `los-vm`'s hosted execution path:
//! a `Store` built from a `Cranelift` compiler with a `Metering`
//! middleware, a `FunctionEnv<T>` carrying mutable host state, and
//! `Function::new_typed_with_env` closures wired through an `imports!`
//! block. Unlike that flat "1 instruction = 1 gas" cost function, every EEI
//! entry point here charges its own named cost through [`EEIState`]; the
//! metering middleware is configured with a near-zero cost function and
//! exists only as a backstop against a guest loop that never calls an EEI
//! function and so would otherwise never yield to a gas check.
//!
//! [`WasmerEngine::with_wall_clock_guard`] is an opt-in, off-by-default
//! safety net on top of that: it moves a call onto its own thread and
//! abandons (leaks) that thread if it outruns its budget, the way
//! `los-vm` leaks its own timeout threads rather than block forever.

use std::sync::Arc;

use wasmer::{
    imports, Function, FunctionEnv, FunctionEnvMut, Imports, Instance, Memory, MemoryView, Module,
    RuntimeError, Store, TypedFunction,
};
use wasmer_compiler_cranelift::Cranelift;
use wasmer_middlewares::metering::{self, Metering, MeteringPoints};

use crate::catalogue;
use crate::eei::EEIState;
use crate::error::{EeiError, Termination};
use crate::host_context::HostContext;
use crate::memory::GuestMemory;
use crate::validator;

/// The minimal capability set the dispatcher needs from a Wasm engine.
/// `WasmerEngine` is the only implementor shipped; the core otherwise has
/// no hard dependency on `wasmer`.
pub trait EngineAdapter {
    type Module;
    type Instance;

    fn parse_and_validate(&self, code: &[u8]) -> Result<Self::Module, EeiError>;
    fn instantiate(&self, module: Self::Module, state: EEIState) -> Result<Self::Instance, EeiError>;
    fn invoke_main(&self, instance: &mut Self::Instance) -> Termination;
    fn memory_handle<'a>(&self, instance: &'a mut Self::Instance) -> Box<dyn GuestMemory + 'a>;
    /// Gas remaining after `invoke_main` returns, whatever the outcome.
    fn gas_left(&self, instance: &Self::Instance) -> u64;
    /// Reclaims the host context handed to `instantiate`, so the dispatcher
    /// can drive further sentinel calls or nested work against it. Callable
    /// once per instance; a second call panics.
    fn into_host(&self, instance: &mut Self::Instance) -> Box<dyn HostContext + Send>;
}

/// A guest's linear memory, borrowed for the lifetime of one EEI call.
pub struct WasmerGuestMemory<'a> {
    view: MemoryView<'a>,
}

impl<'a> WasmerGuestMemory<'a> {
    fn new(view: MemoryView<'a>) -> Self {
        WasmerGuestMemory { view }
    }
}

impl<'a> GuestMemory for WasmerGuestMemory<'a> {
    fn size(&self) -> u64 {
        self.view.data_size()
    }

    fn read(&self, offset: u32, buf: &mut [u8]) -> Result<(), EeiError> {
        self.view.read(offset as u64, buf).map_err(|_| EeiError::InvalidMemoryAccess)
    }

    fn write(&self, offset: u32, buf: &[u8]) -> Result<(), EeiError> {
        self.view.write(offset as u64, buf).map_err(|_| EeiError::InvalidMemoryAccess)
    }
}

/// Non-error control signal carried through `wasmer::RuntimeError::user` so
/// `finish`/`revert`/`selfDestruct` can unwind the guest's `main` without a
/// real Wasm trap being mistaken for `VMTrap`.
#[derive(Debug)]
enum GuestSignal {
    Ended { is_revert: bool, output: Vec<u8> },
}

impl std::fmt::Display for GuestSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "guest execution ended")
    }
}

impl std::error::Error for GuestSignal {}

fn end_trap(is_revert: bool, output: Vec<u8>) -> RuntimeError {
    RuntimeError::user(Box::new(GuestSignal::Ended { is_revert, output }))
}

fn eei_trap(err: EeiError) -> RuntimeError {
    RuntimeError::user(Box::new(err))
}

/// Host state wasmer threads through every import call. `memory` is `None`
/// until the instance exists (`wasmer` requires the `FunctionEnv` to be
/// built before `Instance::new`, but the memory export only exists after).
/// `state` is `Some` for the entire life of the instance except after
/// [`WasmerEngine::into_host`] has reclaimed it.
pub struct WasmerHostEnv {
    state: Option<EEIState>,
    memory: Option<Memory>,
}

fn state_mut(env: &mut FunctionEnvMut<WasmerHostEnv>) -> &mut EEIState {
    env.data_mut().state.as_mut().expect("EEIState present for the life of the instance")
}

macro_rules! with_mem {
    ($env:expr, |$mem:ident, $state:ident| $body:expr) => {{
        let (host, store) = $env.data_and_store_mut();
        let memory = host
            .memory
            .clone()
            .ok_or_else(|| eei_trap(EeiError::InternalError("memory export missing".into())))?;
        let view = memory.view(&store);
        let $mem = WasmerGuestMemory::new(view);
        let $state = host.state.as_mut().expect("EEIState present for the life of the instance");
        $body
    }};
}

// -- host function trampolines, one per catalogue entry -----------------

fn f_use_gas(mut env: FunctionEnvMut<WasmerHostEnv>, g: i64) -> Result<(), RuntimeError> {
    state_mut(&mut env).use_gas(g).map_err(eei_trap)
}

fn f_get_gas_left(mut env: FunctionEnvMut<WasmerHostEnv>) -> Result<i64, RuntimeError> {
    state_mut(&mut env).get_gas_left().map_err(eei_trap)
}

fn f_get_address(mut env: FunctionEnvMut<WasmerHostEnv>, off: i32) -> Result<(), RuntimeError> {
    with_mem!(env, |mem, state| state.get_address(&mem, off as u32).map_err(eei_trap))
}

fn f_get_external_balance(mut env: FunctionEnvMut<WasmerHostEnv>, addr_off: i32, result_off: i32) -> Result<(), RuntimeError> {
    with_mem!(env, |mem, state| state
        .get_external_balance(&mem, addr_off as u32, result_off as u32)
        .map_err(eei_trap))
}

fn f_get_block_hash(mut env: FunctionEnvMut<WasmerHostEnv>, number: i64, result_off: i32) -> Result<i32, RuntimeError> {
    with_mem!(env, |mem, state| state.get_block_hash(&mem, number, result_off as u32).map_err(eei_trap))
}

fn f_get_call_data_size(mut env: FunctionEnvMut<WasmerHostEnv>) -> Result<i32, RuntimeError> {
    state_mut(&mut env).get_call_data_size().map_err(eei_trap)
}

fn f_call_data_copy(mut env: FunctionEnvMut<WasmerHostEnv>, dst: i32, src: i32, len: i32) -> Result<(), RuntimeError> {
    with_mem!(env, |mem, state| state
        .call_data_copy(&mem, dst as u32, src as u32, len as u32)
        .map_err(eei_trap))
}

fn f_get_caller(mut env: FunctionEnvMut<WasmerHostEnv>, off: i32) -> Result<(), RuntimeError> {
    with_mem!(env, |mem, state| state.get_caller(&mem, off as u32).map_err(eei_trap))
}

fn f_get_call_value(mut env: FunctionEnvMut<WasmerHostEnv>, off: i32) -> Result<(), RuntimeError> {
    with_mem!(env, |mem, state| state.get_call_value(&mem, off as u32).map_err(eei_trap))
}

fn f_code_copy(mut env: FunctionEnvMut<WasmerHostEnv>, dst: i32, src: i32, len: i32) -> Result<(), RuntimeError> {
    with_mem!(env, |mem, state| state.code_copy(&mem, dst as u32, src as u32, len as u32).map_err(eei_trap))
}

fn f_get_code_size(mut env: FunctionEnvMut<WasmerHostEnv>) -> Result<i32, RuntimeError> {
    state_mut(&mut env).get_code_size().map_err(eei_trap)
}

fn f_external_code_copy(
    mut env: FunctionEnvMut<WasmerHostEnv>,
    addr_off: i32,
    dst: i32,
    src: i32,
    len: i32,
) -> Result<(), RuntimeError> {
    with_mem!(env, |mem, state| state
        .external_code_copy(&mem, addr_off as u32, dst as u32, src as u32, len as u32)
        .map_err(eei_trap))
}

fn f_get_external_code_size(mut env: FunctionEnvMut<WasmerHostEnv>, addr_off: i32) -> Result<i32, RuntimeError> {
    with_mem!(env, |mem, state| state.get_external_code_size(&mem, addr_off as u32).map_err(eei_trap))
}

fn f_get_block_coinbase(mut env: FunctionEnvMut<WasmerHostEnv>, off: i32) -> Result<(), RuntimeError> {
    with_mem!(env, |mem, state| state.get_block_coinbase(&mem, off as u32).map_err(eei_trap))
}

fn f_get_block_difficulty(mut env: FunctionEnvMut<WasmerHostEnv>, off: i32) -> Result<(), RuntimeError> {
    with_mem!(env, |mem, state| state.get_block_difficulty(&mem, off as u32).map_err(eei_trap))
}

fn f_get_block_gas_limit(mut env: FunctionEnvMut<WasmerHostEnv>) -> Result<i64, RuntimeError> {
    state_mut(&mut env).get_block_gas_limit().map_err(eei_trap)
}

fn f_get_tx_gas_price(mut env: FunctionEnvMut<WasmerHostEnv>, off: i32) -> Result<(), RuntimeError> {
    with_mem!(env, |mem, state| state.get_tx_gas_price(&mem, off as u32).map_err(eei_trap))
}

#[allow(clippy::too_many_arguments)]
fn f_log(
    mut env: FunctionEnvMut<WasmerHostEnv>,
    data_off: i32,
    len: i32,
    n_topics: i32,
    t1: i32,
    t2: i32,
    t3: i32,
    t4: i32,
) -> Result<(), RuntimeError> {
    with_mem!(env, |mem, state| state
        .log(&mem, data_off as u32, len as u32, n_topics as u32, t1 as u32, t2 as u32, t3 as u32, t4 as u32)
        .map_err(eei_trap))
}

fn f_get_block_number(mut env: FunctionEnvMut<WasmerHostEnv>) -> Result<i64, RuntimeError> {
    state_mut(&mut env).get_block_number().map_err(eei_trap)
}

fn f_get_block_timestamp(mut env: FunctionEnvMut<WasmerHostEnv>) -> Result<i64, RuntimeError> {
    state_mut(&mut env).get_block_timestamp().map_err(eei_trap)
}

fn f_get_tx_origin(mut env: FunctionEnvMut<WasmerHostEnv>, off: i32) -> Result<(), RuntimeError> {
    with_mem!(env, |mem, state| state.get_tx_origin(&mem, off as u32).map_err(eei_trap))
}

fn f_storage_store(mut env: FunctionEnvMut<WasmerHostEnv>, key_off: i32, val_off: i32) -> Result<(), RuntimeError> {
    with_mem!(env, |mem, state| state.storage_store(&mem, key_off as u32, val_off as u32).map_err(eei_trap))
}

fn f_storage_load(mut env: FunctionEnvMut<WasmerHostEnv>, key_off: i32, result_off: i32) -> Result<(), RuntimeError> {
    with_mem!(env, |mem, state| state
        .storage_load(&mem, key_off as u32, result_off as u32)
        .map_err(eei_trap))
}

fn f_finish(mut env: FunctionEnvMut<WasmerHostEnv>, off: i32, len: i32) -> Result<(), RuntimeError> {
    let (is_revert, output) = with_mem!(env, |mem, state| state.finish(&mem, off as u32, len as u32).map_err(eei_trap))?;
    Err(end_trap(is_revert, output))
}

fn f_revert(mut env: FunctionEnvMut<WasmerHostEnv>, off: i32, len: i32) -> Result<(), RuntimeError> {
    let (is_revert, output) = with_mem!(env, |mem, state| state.revert(&mem, off as u32, len as u32).map_err(eei_trap))?;
    Err(end_trap(is_revert, output))
}

fn f_get_return_data_size(mut env: FunctionEnvMut<WasmerHostEnv>) -> Result<i32, RuntimeError> {
    state_mut(&mut env).get_return_data_size().map_err(eei_trap)
}

fn f_return_data_copy(mut env: FunctionEnvMut<WasmerHostEnv>, dst: i32, src: i32, len: i32) -> Result<(), RuntimeError> {
    with_mem!(env, |mem, state| state
        .return_data_copy(&mem, dst as u32, src as u32, len as u32)
        .map_err(eei_trap))
}

fn f_call(
    mut env: FunctionEnvMut<WasmerHostEnv>,
    gas: i64,
    addr_off: i32,
    value_off: i32,
    data_off: i32,
    data_len: i32,
) -> Result<i32, RuntimeError> {
    with_mem!(env, |mem, state| state
        .call(&mem, gas, addr_off as u32, value_off as u32, data_off as u32, data_len as u32)
        .map_err(eei_trap))
}

fn f_call_code(
    mut env: FunctionEnvMut<WasmerHostEnv>,
    gas: i64,
    addr_off: i32,
    value_off: i32,
    data_off: i32,
    data_len: i32,
) -> Result<i32, RuntimeError> {
    with_mem!(env, |mem, state| state
        .call_code(&mem, gas, addr_off as u32, value_off as u32, data_off as u32, data_len as u32)
        .map_err(eei_trap))
}

fn f_call_delegate(
    mut env: FunctionEnvMut<WasmerHostEnv>,
    gas: i64,
    addr_off: i32,
    data_off: i32,
    data_len: i32,
) -> Result<i32, RuntimeError> {
    with_mem!(env, |mem, state| state
        .call_delegate(&mem, gas, addr_off as u32, data_off as u32, data_len as u32)
        .map_err(eei_trap))
}

fn f_call_static(
    mut env: FunctionEnvMut<WasmerHostEnv>,
    gas: i64,
    addr_off: i32,
    data_off: i32,
    data_len: i32,
) -> Result<i32, RuntimeError> {
    with_mem!(env, |mem, state| state
        .call_static(&mem, gas, addr_off as u32, data_off as u32, data_len as u32)
        .map_err(eei_trap))
}

fn f_create(
    mut env: FunctionEnvMut<WasmerHostEnv>,
    value_off: i32,
    data_off: i32,
    len: i32,
    addr_dst_off: i32,
) -> Result<i32, RuntimeError> {
    with_mem!(env, |mem, state| state
        .create(&mem, value_off as u32, data_off as u32, len as u32, addr_dst_off as u32)
        .map_err(eei_trap))
}

fn f_self_destruct(mut env: FunctionEnvMut<WasmerHostEnv>, addr_off: i32) -> Result<(), RuntimeError> {
    with_mem!(env, |mem, state| state.self_destruct(&mem, addr_off as u32).map_err(eei_trap))?;
    Err(end_trap(false, Vec::new()))
}

fn create_eei_imports(store: &mut Store, env: &FunctionEnv<WasmerHostEnv>) -> Imports {
    macro_rules! f {
        ($name:ident) => {
            Function::new_typed_with_env(store, env, $name)
        };
    }
    imports! {
        "ethereum" => {
            "useGas" => f!(f_use_gas),
            "getGasLeft" => f!(f_get_gas_left),
            "getAddress" => f!(f_get_address),
            "getExternalBalance" => f!(f_get_external_balance),
            "getBlockHash" => f!(f_get_block_hash),
            "getCallDataSize" => f!(f_get_call_data_size),
            "callDataCopy" => f!(f_call_data_copy),
            "getCaller" => f!(f_get_caller),
            "getCallValue" => f!(f_get_call_value),
            "codeCopy" => f!(f_code_copy),
            "getCodeSize" => f!(f_get_code_size),
            "externalCodeCopy" => f!(f_external_code_copy),
            "getExternalCodeSize" => f!(f_get_external_code_size),
            "getBlockCoinbase" => f!(f_get_block_coinbase),
            "getBlockDifficulty" => f!(f_get_block_difficulty),
            "getBlockGasLimit" => f!(f_get_block_gas_limit),
            "getTxGasPrice" => f!(f_get_tx_gas_price),
            "log" => f!(f_log),
            "getBlockNumber" => f!(f_get_block_number),
            "getBlockTimestamp" => f!(f_get_block_timestamp),
            "getTxOrigin" => f!(f_get_tx_origin),
            "storageStore" => f!(f_storage_store),
            "storageLoad" => f!(f_storage_load),
            "finish" => f!(f_finish),
            "revert" => f!(f_revert),
            "getReturnDataSize" => f!(f_get_return_data_size),
            "returnDataCopy" => f!(f_return_data_copy),
            "call" => f!(f_call),
            "callCode" => f!(f_call_code),
            "callDelegate" => f!(f_call_delegate),
            "callStatic" => f!(f_call_static),
            "create" => f!(f_create),
            "selfDestruct" => f!(f_self_destruct),
        }
    }
}

/// Loop/call operators cost 1 metering point, everything else is free, the
/// EEI's own `useGas` charges are the real gas meter; this middleware exists
/// only so a guest loop with no EEI calls eventually traps instead of
/// spinning forever.
fn backstop_cost_fn(operator: &wasmer::wasmparser::Operator) -> u64 {
    use wasmer::wasmparser::Operator::*;
    match operator {
        Loop { .. } | Br { .. } | BrIf { .. } | BrTable { .. } | Call { .. } | CallIndirect { .. }
        | Return => 1,
        _ => 0,
    }
}

/// A compiled, structurally-validated module together with the store it was
/// compiled against (wasmer instantiates a `Module` against the `Store`
/// that produced it), plus the raw bytes it was built from, needed again
/// if [`WasmerEngine::with_wall_clock_guard`] is set, since the guarded path
/// rebuilds the module from scratch inside its own thread rather than move
/// a `Store` across one.
pub struct WasmerModule {
    store: Store,
    module: Module,
    code: Vec<u8>,
}

struct DirectInstance {
    store: Store,
    instance: Instance,
    env: FunctionEnv<WasmerHostEnv>,
    main: TypedFunction<(), ()>,
}

type GuardedOutcome = Result<(Termination, u64, Box<dyn HostContext + Send>), EeiError>;

struct GuardedInstance {
    rx: std::sync::mpsc::Receiver<GuardedOutcome>,
    handle: Option<std::thread::JoinHandle<()>>,
    max_secs: u64,
    result: Option<(u64, Box<dyn HostContext + Send>)>,
}

/// Either a directly-instantiated instance running on the calling thread,
/// or, when the wall-clock guard is enabled, a handle to one running on a
/// dedicated thread this crate owns for the life of the call.
pub enum WasmerInstance {
    Direct(DirectInstance),
    Guarded(GuardedInstance),
}

/// Total threads ever abandoned because a guarded call outran its
/// wall-clock budget. Exposed so a host embedding this engine can refuse
/// new work once too many have piled up, the way `los-vm` tracks its own
/// leaked timeout threads.
static LEAKED_GUARD_THREADS: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);

pub fn leaked_guard_thread_count() -> u64 {
    LEAKED_GUARD_THREADS.load(std::sync::atomic::Ordering::Relaxed)
}

/// The only `EngineAdapter` implementation this crate ships.
pub struct WasmerEngine {
    allow_debug_imports: bool,
    backstop_points: u64,
    wall_clock_guard_secs: Option<u64>,
}

impl WasmerEngine {
    pub fn new(allow_debug_imports: bool, backstop_points: u64) -> Self {
        WasmerEngine { allow_debug_imports, backstop_points, wall_clock_guard_secs: None }
    }

    /// Opts into a wall-clock safety net: deterministic gas metering is
    /// still what's supposed to bound execution, but a call that runs
    /// longer than `max_secs` is abandoned rather than awaited forever.
    /// Off by default, enabling it moves every call onto a dedicated
    /// thread and, on timeout, leaks that thread rather than risk tearing
    /// down a `Store` a still-running guest might be touching.
    pub fn with_wall_clock_guard(mut self, max_secs: u64) -> Self {
        self.wall_clock_guard_secs = Some(max_secs);
        self
    }

    fn build_and_run(code: &[u8], state: EEIState, backstop_points: u64, allow_debug_imports: bool) -> GuardedOutcome {
        let metering = Arc::new(Metering::new(backstop_points, backstop_cost_fn));
        let mut compiler = Cranelift::default();
        compiler.push_middleware(metering);
        let mut store = Store::new(compiler);

        let module = Module::new(&store, code)
            .map_err(|e| EeiError::ContractValidationFailure(format!("malformed wasm module: {e}")))?;
        validator::validate(&module, code, allow_debug_imports)?;

        let env = FunctionEnv::new(&mut store, WasmerHostEnv { state: Some(state), memory: None });
        let imports = create_eei_imports(&mut store, &env);
        let instance = Instance::new(&mut store, &module, &imports)
            .map_err(|e| EeiError::InternalError(format!("instantiation failed: {e}")))?;

        let memory = instance
            .exports
            .get_memory("memory")
            .map_err(|e| EeiError::InternalError(format!("no memory export: {e}")))?
            .clone();
        env.as_mut(&mut store).memory = Some(memory);

        let main: TypedFunction<(), ()> = instance
            .exports
            .get_typed_function(&store, "main")
            .map_err(|e| EeiError::InternalError(format!("no main export: {e}")))?;

        let termination = match main.call(&mut store) {
            Ok(()) => Termination::Completed,
            Err(trap) => {
                if let Some(signal) = trap.downcast_ref::<GuestSignal>() {
                    let GuestSignal::Ended { is_revert, output } = signal;
                    Termination::Ended { is_revert: *is_revert, output: output.clone() }
                } else if let Some(err) = trap.downcast_ref::<EeiError>() {
                    Termination::Failed(err.clone())
                } else {
                    match metering::get_remaining_points(&mut store, &instance) {
                        MeteringPoints::Exhausted => Termination::Failed(EeiError::OutOfGas),
                        MeteringPoints::Remaining(_) => Termination::Failed(EeiError::VMTrap(trap.to_string())),
                    }
                }
            }
        };

        let gas_left = env
            .as_ref(&store)
            .state
            .as_ref()
            .expect("EEIState present for the life of the instance")
            .gas_left();
        let host = env.as_mut(&mut store).state.take().expect("state present").into_host();
        Ok((termination, gas_left, host))
    }
}

impl EngineAdapter for WasmerEngine {
    type Module = WasmerModule;
    type Instance = WasmerInstance;

    fn parse_and_validate(&self, code: &[u8]) -> Result<Self::Module, EeiError> {
        let metering = Arc::new(Metering::new(self.backstop_points, backstop_cost_fn));
        let mut compiler = Cranelift::default();
        compiler.push_middleware(metering);
        let store = Store::new(compiler);

        let module = Module::new(&store, code)
            .map_err(|e| EeiError::ContractValidationFailure(format!("malformed wasm module: {e}")))?;
        validator::validate(&module, code, self.allow_debug_imports)?;
        Ok(WasmerModule { store, module, code: code.to_vec() })
    }

    fn instantiate(&self, module: Self::Module, state: EEIState) -> Result<Self::Instance, EeiError> {
        if let Some(max_secs) = self.wall_clock_guard_secs {
            let code = module.code;
            let backstop_points = self.backstop_points;
            let allow_debug_imports = self.allow_debug_imports;
            let (tx, rx) = std::sync::mpsc::channel();
            let handle = std::thread::spawn(move || {
                let outcome = Self::build_and_run(&code, state, backstop_points, allow_debug_imports);
                let _ = tx.send(outcome);
            });
            return Ok(WasmerInstance::Guarded(GuardedInstance { rx, handle: Some(handle), max_secs, result: None }));
        }

        let WasmerModule { mut store, module, .. } = module;

        let env = FunctionEnv::new(&mut store, WasmerHostEnv { state: Some(state), memory: None });
        let imports = create_eei_imports(&mut store, &env);

        let instance = Instance::new(&mut store, &module, &imports)
            .map_err(|e| EeiError::InternalError(format!("instantiation failed: {e}")))?;

        let memory = instance
            .exports
            .get_memory("memory")
            .map_err(|e| EeiError::InternalError(format!("no memory export: {e}")))?
            .clone();
        env.as_mut(&mut store).memory = Some(memory);

        let main: TypedFunction<(), ()> = instance
            .exports
            .get_typed_function(&store, "main")
            .map_err(|e| EeiError::InternalError(format!("no main export: {e}")))?;

        Ok(WasmerInstance::Direct(DirectInstance { store, instance, env, main }))
    }

    fn invoke_main(&self, instance: &mut Self::Instance) -> Termination {
        match instance {
            WasmerInstance::Direct(DirectInstance { store, instance: wasm_instance, main, .. }) => {
                match main.call(store) {
                    Ok(()) => Termination::Completed,
                    Err(trap) => {
                        if let Some(signal) = trap.downcast_ref::<GuestSignal>() {
                            let GuestSignal::Ended { is_revert, output } = signal;
                            return Termination::Ended { is_revert: *is_revert, output: output.clone() };
                        }
                        if let Some(err) = trap.downcast_ref::<EeiError>() {
                            return Termination::Failed(err.clone());
                        }
                        match metering::get_remaining_points(store, wasm_instance) {
                            MeteringPoints::Exhausted => Termination::Failed(EeiError::OutOfGas),
                            MeteringPoints::Remaining(_) => Termination::Failed(EeiError::VMTrap(trap.to_string())),
                        }
                    }
                }
            }
            WasmerInstance::Guarded(guarded) => {
                match guarded.rx.recv_timeout(std::time::Duration::from_secs(guarded.max_secs)) {
                    Ok(Ok((termination, gas_left, host))) => {
                        guarded.handle.take();
                        guarded.result = Some((gas_left, host));
                        termination
                    }
                    Ok(Err(e)) => Termination::Failed(e),
                    Err(_) => {
                        // The guest outran its budget. Leak the thread rather
                        // than block forever or tear down state it may still
                        // be touching; a host can poll `leaked_guard_thread_count`
                        // and refuse new work once too many have piled up.
                        if let Some(handle) = guarded.handle.take() {
                            std::mem::forget(handle);
                        }
                        LEAKED_GUARD_THREADS.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                        log::warn!("wasm execution exceeded {}s wall-clock guard, thread abandoned", guarded.max_secs);
                        Termination::Failed(EeiError::InternalError(format!(
                            "execution exceeded {}s wall-clock guard",
                            guarded.max_secs
                        )))
                    }
                }
            }
        }
    }

    fn memory_handle<'a>(&self, instance: &'a mut Self::Instance) -> Box<dyn GuestMemory + 'a> {
        match instance {
            WasmerInstance::Direct(direct) => {
                let memory = direct.env.as_ref(&direct.store).memory.clone().expect("memory set during instantiate");
                let view = memory.view(&direct.store);
                Box::new(WasmerGuestMemory::new(view))
            }
            WasmerInstance::Guarded(_) => {
                // The guarded path runs to completion (or is abandoned) on its
                // own thread before this is ever reachable from the dispatcher,
                // since `invoke_main` already consumed the guest's memory view.
                panic!("memory_handle is not available for a guarded instance after invoke_main")
            }
        }
    }

    fn gas_left(&self, instance: &Self::Instance) -> u64 {
        match instance {
            WasmerInstance::Direct(direct) => direct
                .env
                .as_ref(&direct.store)
                .state
                .as_ref()
                .expect("EEIState present for the life of the instance")
                .gas_left(),
            WasmerInstance::Guarded(guarded) => {
                guarded.result.as_ref().map(|(gas, _)| *gas).unwrap_or(0)
            }
        }
    }

    fn into_host(&self, instance: &mut Self::Instance) -> Box<dyn HostContext + Send> {
        match instance {
            WasmerInstance::Direct(direct) => {
                direct.env.as_mut(&mut direct.store).state.take().expect("into_host called once per instance").into_host()
            }
            WasmerInstance::Guarded(guarded) => {
                guarded.result.take().expect("into_host called once per instance, after invoke_main succeeded").1
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host_context::MockHostContext;
    use crate::types::{Address, CallKind, CallMessage, MessageFlags, Revision, U256Be};

    fn message(gas: i64) -> CallMessage {
        CallMessage {
            sender: Address::from_bytes([1u8; 20]),
            destination: Address::from_bytes([2u8; 20]),
            value: U256Be::ZERO,
            input: vec![],
            gas,
            kind: CallKind::Call,
            flags: MessageFlags::NONE,
            depth: 0,
            revision: Revision::Byzantium,
        }
    }

    /// `(module (memory (export "memory") 1) (func (export "main")))`,
    /// hand-assembled: type/function/memory/export/code sections wrapping
    /// an empty `main` body (`end` only).
    const EMPTY_MAIN_WASM: &[u8] = &[
        0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00, // magic, version
        0x01, 0x04, 0x01, 0x60, 0x00, 0x00, // type section: () -> ()
        0x03, 0x02, 0x01, 0x00, // function section: one func, type 0
        0x05, 0x03, 0x01, 0x00, 0x01, // memory section: one memory, min 1 page
        0x07, 0x11, 0x02, 0x06, b'm', b'e', b'm', b'o', b'r', b'y', 0x02, 0x00, 0x04, b'm', b'a',
        b'i', b'n', 0x00, 0x00, // export section: memory idx 0, main idx 0
        0x0a, 0x04, 0x01, 0x02, 0x00, 0x0b, // code section: one body, no locals, `end`
    ];

    #[test]
    fn catalogue_import_count_matches_created_imports() {
        // The import block above wires exactly one Function per catalogue
        // entry; this just keeps the two lists honest as the catalogue grows.
        assert_eq!(catalogue::EEI_CATALOGUE.len(), 33);
    }

    #[test]
    fn backstop_cost_fn_is_zero_for_arithmetic() {
        use wasmer::wasmparser::Operator;
        assert_eq!(backstop_cost_fn(&Operator::I32Add), 0);
        assert_eq!(backstop_cost_fn(&Operator::I32Const { value: 0 }), 0);
    }

    #[test]
    fn eei_state_construction_matches_expected_gas() {
        let state = EEIState::new(message(100_000), vec![], true, Box::new(MockHostContext::new()));
        assert_eq!(state.gas_left(), 100_000);
    }

    #[test]
    fn empty_main_module_runs_to_completion_and_preserves_gas() {
        let engine = WasmerEngine::new(false, 1_000_000);
        let module = engine.parse_and_validate(EMPTY_MAIN_WASM).expect("module parses and validates");
        let state = EEIState::new(message(100_000), EMPTY_MAIN_WASM.to_vec(), true, Box::new(MockHostContext::new()));
        let mut instance = engine.instantiate(module, state).expect("instantiation succeeds");
        let termination = engine.invoke_main(&mut instance);
        assert!(matches!(termination, Termination::Completed));
        assert_eq!(engine.gas_left(&instance), 100_000);
    }

    #[test]
    fn guarded_engine_runs_empty_main_to_completion() {
        let engine = WasmerEngine::new(false, 1_000_000).with_wall_clock_guard(5);
        let module = engine.parse_and_validate(EMPTY_MAIN_WASM).expect("module parses and validates");
        let state = EEIState::new(message(50_000), EMPTY_MAIN_WASM.to_vec(), true, Box::new(MockHostContext::new()));
        let mut instance = engine.instantiate(module, state).expect("instantiation succeeds");
        let termination = engine.invoke_main(&mut instance);
        assert!(matches!(termination, Termination::Completed));
        assert_eq!(engine.gas_left(&instance), 50_000);
        let _host = engine.into_host(&mut instance);
    }
}
