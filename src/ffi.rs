//! Host ABI: the C surface a host process links against instead of the
//! Rust API directly. Mirrors the narrow four-pointer VM instance shape
//! (`destroy`/`execute`/`set_option` plus a name/version) a host expects,
//! and adapts a caller-supplied table of host callbacks into a
//! [`HostContext`] so [`crate::dispatcher::dispatch`] never has to know it's
//! being driven from C.
//!
//! Every function here is `extern "C"` and receives/returns only
//! `#[repr(C)]` types or raw pointers; no Rust panic is allowed to unwind
//! across the boundary, so fallible paths are caught and turned into an
//! `EWASM_INTERNAL_ERROR` result instead.

use std::ffi::{c_void, CStr, CString};
use std::os::raw::{c_char, c_int};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr;

use crate::dispatcher::{dispatch, DispatcherConfig};
use crate::engine::WasmerEngine;
use crate::host_context::HostContext;
use crate::types::{
    Address, CallKind, CallMessage, HostCallResult, HostCallStatus, MessageFlags, Revision,
    StatusCode, TxContext, U256Be,
};

const ABI_VERSION: u32 = 1;
const NAME: &[u8] = b"ewasm-engine\0";
const VERSION: &[u8] = b"0.1.0\0";

/// One guest-visible exit status, as a plain `i32` a C caller can switch on.
fn status_to_c_int(status: StatusCode) -> c_int {
    match status {
        StatusCode::Success => 0,
        StatusCode::Revert => 1,
        StatusCode::OutOfGas => 2,
        StatusCode::ContractValidationFailure => 3,
        StatusCode::InvalidMemoryAccess => 4,
        StatusCode::StaticModeViolation => 5,
        StatusCode::Rejected => 6,
        StatusCode::Failure => 7,
        StatusCode::InternalError => 8,
    }
}

/// Maps the host ABI's `revision` parameter (an `evmc_revision` value) onto
/// [`Revision`]; anything this crate doesn't name becomes `Other`, which
/// `revision_supported` always gates out.
fn c_int_to_revision(value: c_int) -> Revision {
    match value {
        0 => Revision::Frontier,
        1 => Revision::Homestead,
        2 => Revision::TangerineWhistle,
        3 => Revision::SpuriousDragon,
        4 => Revision::Byzantium,
        5 => Revision::Constantinople,
        other => Revision::Other(other as i32),
    }
}

/// Host callback table; a C host fills this in and passes it (plus an
/// opaque `context` pointer it owns) to [`ewasm_execute`]. Every byte
/// buffer is fixed-width where the EEI's own wire format is fixed-width
/// (20-byte addresses, 32-byte words), matching `memory.rs`'s conventions.
#[repr(C)]
pub struct HostInterface {
    pub get_balance: extern "C" fn(ctx: *mut c_void, addr: *const u8, out32: *mut u8),
    pub get_block_hash: extern "C" fn(ctx: *mut c_void, number: i64, out32: *mut u8),
    pub get_tx_context: extern "C" fn(ctx: *mut c_void, out: *mut FfiTxContext),
    pub get_storage: extern "C" fn(ctx: *mut c_void, addr: *const u8, key32: *const u8, out32: *mut u8),
    pub set_storage: extern "C" fn(ctx: *mut c_void, addr: *const u8, key32: *const u8, value32: *const u8),
    pub get_code_size: extern "C" fn(ctx: *mut c_void, addr: *const u8) -> u32,
    pub copy_code: extern "C" fn(ctx: *mut c_void, addr: *const u8, offset: u32, buf: *mut u8, buf_len: usize) -> u32,
    pub call: extern "C" fn(ctx: *mut c_void, msg: *const FfiCallMessage, out: *mut FfiCallResult),
    pub emit_log: extern "C" fn(ctx: *mut c_void, addr: *const u8, data: *const u8, data_len: usize, topics: *const u8, n_topics: usize),
    pub selfdestruct: extern "C" fn(ctx: *mut c_void, addr: *const u8, beneficiary: *const u8),
    pub account_exists: extern "C" fn(ctx: *mut c_void, addr: *const u8) -> c_int,
}

#[repr(C)]
pub struct FfiTxContext {
    pub coinbase: [u8; 20],
    pub difficulty: [u8; 32],
    pub gas_limit: i64,
    pub gas_price: [u8; 32],
    pub number: i64,
    pub timestamp: i64,
    pub origin: [u8; 20],
}

#[repr(C)]
pub struct FfiCallMessage {
    pub sender: [u8; 20],
    pub destination: [u8; 20],
    pub value: [u8; 32],
    pub input: *const u8,
    pub input_len: usize,
    pub gas: i64,
    pub kind: c_int,
    pub is_static: c_int,
    pub depth: i32,
}

#[repr(C)]
pub struct FfiCallResult {
    pub status: c_int,
    pub output: *mut u8,
    pub output_len: usize,
    pub gas_left: i64,
    pub has_create_address: c_int,
    pub create_address: [u8; 20],
}

/// The result of one [`ewasm_execute`] call. `release`, if set, must be
/// called by the host with this struct once it's done reading `output`,
/// the analogue of [`crate::types::HostCallResult`]'s owned `Vec<u8>`,
/// flattened across the FFI boundary.
#[repr(C)]
pub struct EwasmResult {
    pub status_code: c_int,
    pub gas_left: i64,
    pub output_data: *mut u8,
    pub output_size: usize,
    pub release: Option<extern "C" fn(*mut EwasmResult)>,
}

extern "C" fn release_owned_output(result: *mut EwasmResult) {
    if result.is_null() {
        return;
    }
    unsafe {
        let r = &mut *result;
        if !r.output_data.is_null() && r.output_size > 0 {
            let _ = Vec::from_raw_parts(r.output_data, r.output_size, r.output_size);
        }
        r.output_data = ptr::null_mut();
        r.output_size = 0;
    }
}

fn internal_error_result() -> EwasmResult {
    EwasmResult { status_code: status_to_c_int(StatusCode::InternalError), gas_left: 0, output_data: ptr::null_mut(), output_size: 0, release: None }
}

/// Adapts a host-supplied [`HostInterface`] + opaque context into a
/// [`HostContext`] the Rust-side dispatcher can call directly.
struct FfiHostContext {
    interface: HostInterface,
    context: *mut c_void,
}

unsafe impl Send for FfiHostContext {}

impl HostContext for FfiHostContext {
    fn get_balance(&self, addr: &Address) -> U256Be {
        let mut out = [0u8; 32];
        (self.interface.get_balance)(self.context, addr.as_bytes().as_ptr(), out.as_mut_ptr());
        U256Be(out)
    }

    fn get_block_hash(&self, number: i64) -> U256Be {
        let mut out = [0u8; 32];
        (self.interface.get_block_hash)(self.context, number, out.as_mut_ptr());
        U256Be(out)
    }

    fn get_tx_context(&self) -> TxContext {
        let mut out = FfiTxContext {
            coinbase: [0u8; 20],
            difficulty: [0u8; 32],
            gas_limit: 0,
            gas_price: [0u8; 32],
            number: 0,
            timestamp: 0,
            origin: [0u8; 20],
        };
        (self.interface.get_tx_context)(self.context, &mut out);
        TxContext {
            coinbase: Address(out.coinbase),
            difficulty: U256Be(out.difficulty),
            gas_limit: out.gas_limit,
            gas_price: U256Be(out.gas_price),
            number: out.number,
            timestamp: out.timestamp,
            origin: Address(out.origin),
        }
    }

    fn get_storage(&self, dest: &Address, key: &U256Be) -> U256Be {
        let mut out = [0u8; 32];
        (self.interface.get_storage)(self.context, dest.as_bytes().as_ptr(), key.0.as_ptr(), out.as_mut_ptr());
        U256Be(out)
    }

    fn set_storage(&mut self, dest: &Address, key: &U256Be, value: &U256Be) {
        (self.interface.set_storage)(self.context, dest.as_bytes().as_ptr(), key.0.as_ptr(), value.0.as_ptr());
    }

    fn get_code_size(&self, addr: &Address) -> u32 {
        (self.interface.get_code_size)(self.context, addr.as_bytes().as_ptr())
    }

    fn copy_code(&self, addr: &Address, offset: u32, buf: &mut [u8]) -> u32 {
        (self.interface.copy_code)(self.context, addr.as_bytes().as_ptr(), offset, buf.as_mut_ptr(), buf.len())
    }

    fn call(&mut self, message: &CallMessage) -> HostCallResult {
        let ffi_msg = FfiCallMessage {
            sender: *message.sender.as_bytes(),
            destination: *message.destination.as_bytes(),
            value: message.value.0,
            input: message.input.as_ptr(),
            input_len: message.input.len(),
            gas: message.gas,
            kind: match message.kind {
                CallKind::Call => 0,
                CallKind::CallCode => 1,
                CallKind::DelegateCall => 2,
                CallKind::Create => 3,
            },
            is_static: message.is_static() as c_int,
            depth: message.depth,
        };
        let mut out = FfiCallResult {
            status: 0,
            output: ptr::null_mut(),
            output_len: 0,
            gas_left: 0,
            has_create_address: 0,
            create_address: [0u8; 20],
        };
        (self.interface.call)(self.context, &ffi_msg, &mut out);
        let output = if out.output.is_null() || out.output_len == 0 {
            Vec::new()
        } else {
            unsafe { std::slice::from_raw_parts(out.output, out.output_len).to_vec() }
        };
        HostCallResult {
            status: match out.status {
                0 => HostCallStatus::Success,
                1 => HostCallStatus::Revert,
                _ => HostCallStatus::Failure,
            },
            output,
            gas_left: out.gas_left,
            create_address: if out.has_create_address != 0 { Some(Address(out.create_address)) } else { None },
        }
    }

    fn emit_log(&mut self, dest: &Address, data: &[u8], topics: &[U256Be]) {
        let flat: Vec<u8> = topics.iter().flat_map(|t| t.0).collect();
        (self.interface.emit_log)(self.context, dest.as_bytes().as_ptr(), data.as_ptr(), data.len(), flat.as_ptr(), topics.len());
    }

    fn selfdestruct(&mut self, dest: &Address, beneficiary: &Address) {
        (self.interface.selfdestruct)(self.context, dest.as_bytes().as_ptr(), beneficiary.as_bytes().as_ptr());
    }

    fn account_exists(&self, addr: &Address) -> bool {
        (self.interface.account_exists)(self.context, addr.as_bytes().as_ptr()) != 0
    }
}

/// Opaque handle a C host holds between `ewasm_create` and
/// `ewasm_instance_destroy`.
pub struct EwasmInstance {
    engine: WasmerEngine,
    config: DispatcherConfig,
}

#[no_mangle]
pub extern "C" fn ewasm_abi_version() -> u32 {
    ABI_VERSION
}

#[no_mangle]
pub extern "C" fn ewasm_name() -> *const c_char {
    NAME.as_ptr() as *const c_char
}

#[no_mangle]
pub extern "C" fn ewasm_version() -> *const c_char {
    VERSION.as_ptr() as *const c_char
}

#[no_mangle]
pub extern "C" fn ewasm_create() -> *mut EwasmInstance {
    crate::init_logging();
    let allow_debug_imports = cfg!(feature = "debug-imports");
    let instance = EwasmInstance { engine: WasmerEngine::new(allow_debug_imports, 10_000_000), config: DispatcherConfig::default() };
    Box::into_raw(Box::new(instance))
}

#[no_mangle]
pub extern "C" fn ewasm_destroy(instance: *mut EwasmInstance) {
    if instance.is_null() {
        return;
    }
    unsafe {
        drop(Box::from_raw(instance));
    }
}

/// `name`/`value` are a C host's null-terminated option strings, matching
/// the host ABI's `set_option`. Returns `0` on success, `1` on an unknown
/// option value, `-1` if either pointer is invalid UTF-8.
#[no_mangle]
pub extern "C" fn ewasm_set_option(instance: *mut EwasmInstance, name: *const c_char, value: *const c_char) -> c_int {
    if instance.is_null() || name.is_null() || value.is_null() {
        return -1;
    }
    let (name, value) = unsafe {
        let name = match CStr::from_ptr(name).to_str() {
            Ok(s) => s,
            Err(_) => return -1,
        };
        let value = match CStr::from_ptr(value).to_str() {
            Ok(s) => s,
            Err(_) => return -1,
        };
        (name, value)
    };
    let instance = unsafe { &mut *instance };
    match instance.config.set_option(name, value) {
        Ok(()) => 0,
        Err(_) => 1,
    }
}

/// The host ABI's `execute` entry point: runs one call/CREATE through the
/// full dispatcher pipeline and returns an owned [`EwasmResult`] the host
/// must pass to `result.release(&mut result)` when done.
///
/// # Safety
/// `host_interface`, `host_context`, `message`, and `code` must all be
/// valid for the duration of this call; `code` must be `code_size` bytes.
#[no_mangle]
pub unsafe extern "C" fn ewasm_execute(
    instance: *mut EwasmInstance,
    host_interface: HostInterface,
    host_context: *mut c_void,
    revision: c_int,
    message: *const FfiCallMessage,
    code: *const u8,
    code_size: usize,
) -> EwasmResult {
    if instance.is_null() || message.is_null() {
        return internal_error_result();
    }
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        let instance = &*instance;
        let msg = &*message;
        let code_slice = if code.is_null() || code_size == 0 { &[][..] } else { std::slice::from_raw_parts(code, code_size) };
        let input = if msg.input.is_null() || msg.input_len == 0 { Vec::new() } else { std::slice::from_raw_parts(msg.input, msg.input_len).to_vec() };
        let call_message = CallMessage {
            sender: Address(msg.sender),
            destination: Address(msg.destination),
            value: U256Be(msg.value),
            input,
            gas: msg.gas,
            kind: match msg.kind {
                0 => CallKind::Call,
                1 => CallKind::CallCode,
                2 => CallKind::DelegateCall,
                _ => CallKind::Create,
            },
            flags: MessageFlags::NONE.with_static(msg.is_static != 0),
            depth: msg.depth,
            revision: c_int_to_revision(revision),
        };
        let host: Box<dyn HostContext + Send> = Box::new(FfiHostContext { interface: host_interface, context: host_context });
        let (status, result) = dispatch(&instance.engine, &instance.config, call_message, code_slice, host);

        let (output_data, output_size) = if result.return_value.is_empty() {
            (ptr::null_mut(), 0)
        } else {
            let mut buf = result.return_value.into_boxed_slice();
            let ptr = buf.as_mut_ptr();
            let len = buf.len();
            std::mem::forget(buf);
            (ptr, len)
        };

        EwasmResult {
            status_code: status_to_c_int(status),
            gas_left: result.gas_left as i64,
            output_data,
            output_size,
            release: if output_size > 0 { Some(release_owned_output) } else { None },
        }
    }));

    match outcome {
        Ok(result) => result,
        Err(_) => internal_error_result(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abi_version_and_name_are_stable() {
        assert_eq!(ewasm_abi_version(), 1);
        let name = unsafe { CStr::from_ptr(ewasm_name()) };
        assert_eq!(name.to_str().unwrap(), "ewasm-engine");
    }

    #[test]
    fn create_and_destroy_round_trip() {
        let instance = ewasm_create();
        assert!(!instance.is_null());
        ewasm_destroy(instance);
    }

    #[test]
    fn set_option_rejects_unknown_engine_value() {
        let instance = ewasm_create();
        let name = CString::new("engine").unwrap();
        let value = CString::new("not-a-real-engine").unwrap();
        let rc = ewasm_set_option(instance, name.as_ptr(), value.as_ptr());
        assert_eq!(rc, 1);
        ewasm_destroy(instance);
    }

    #[test]
    fn set_option_null_pointer_is_rejected() {
        let instance = ewasm_create();
        assert_eq!(ewasm_set_option(instance, ptr::null(), ptr::null()), -1);
        ewasm_destroy(instance);
    }
}
