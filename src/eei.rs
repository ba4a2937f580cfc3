//! EEI Core: the ~35 host functions exposed under the `ethereum` import
//! namespace, each with its own gas, argument, and state-write semantics.
//!
//! Every entry point charges gas **before** observable side effects (except
//! where noted), validates arguments, and converts failures into a typed
//! [`EeiError`]. Built around an owned `EEIState` plus a `HostContext` trait
//! object rather than a single god-object with raw pointers. `finish`,
//! `revert`, and `selfDestruct` don't return a typed error on success, they
//! signal a non-error termination via [`Termination`], which the engine
//! adapter turns into a trap that `invoke_main` recognizes and unwraps.

use crate::error::EeiError;
use crate::gas::{self, schedule};
use crate::host_context::HostContext;
use crate::memory::{self, GuestMemory};
use crate::types::{Address, CallKind, CallMessage, HostCallStatus, MessageFlags, Revision, U256Be};

/// Per-invocation EEI state: the running contract's own code, its call
/// message, the gas counter, the last sub-call's output, and the host
/// v-table it talks to. A fresh one is built for every Wasm instantiation,
/// including nested calls, none of this is shared across invocations.
pub struct EEIState {
    pub msg: CallMessage,
    pub code: Vec<u8>,
    gas_left: u64,
    meter_gas: bool,
    last_return_data: Vec<u8>,
    host: Box<dyn HostContext + Send>,
}

/// Maps a sub-call/CREATE's reported status to the `i32` the guest sees:
/// `0` on success, `2` on revert, `1` for anything else.
fn status_to_i32(status: HostCallStatus) -> i32 {
    match status {
        HostCallStatus::Success => 0,
        HostCallStatus::Revert => 2,
        HostCallStatus::Failure => 1,
    }
}

/// Embeds a 16-byte value into the low half of a 32-byte big-endian word,
/// with the high half zeroed, the shape `ensure_sender_balance` and the
/// call family both need when only a 128-bit value is available.
fn widen_u128(value: &[u8; 16]) -> U256Be {
    let mut bytes = [0u8; 32];
    bytes[16..32].copy_from_slice(value);
    U256Be(bytes)
}

/// Narrows a 256-bit value to 128 bits, failing `OutOfGas` if the high half
/// is non-zero, mirrors `safeLoadUint128` guarding both sides of a balance
/// comparison.
fn narrow_u128(value: &U256Be) -> Result<u128, EeiError> {
    if !value.high_is_zero() {
        return Err(EeiError::OutOfGas);
    }
    Ok(value.low_u128())
}

/// Copies `len` bytes starting at `src_off` out of `src_buf` (a virtual
/// buffer, not guest memory, call data, contract code, or return data) into
/// guest memory at `dst_off`. A zero-length copy never touches `src_buf`'s
/// bounds, matching the asymmetric exemption the memory bridge gives
/// zero-length guest accesses.
fn copy_from_buffer(
    mem: &dyn GuestMemory,
    src_buf: &[u8],
    src_off: u32,
    dst_off: u32,
    len: u32,
) -> Result<(), EeiError> {
    let end = src_off.checked_add(len).ok_or(EeiError::InvalidMemoryAccess)?;
    if len > 0 && (end as usize) > src_buf.len() {
        return Err(EeiError::InvalidMemoryAccess);
    }
    let slice: &[u8] = if len == 0 { &[] } else { &src_buf[src_off as usize..end as usize] };
    memory::store_bytes(mem, dst_off, slice)
}

impl EEIState {
    pub fn new(msg: CallMessage, code: Vec<u8>, meter_gas: bool, host: Box<dyn HostContext + Send>) -> Self {
        let gas_left = msg.gas.max(0) as u64;
        EEIState { msg, code, gas_left, meter_gas, last_return_data: Vec::new(), host }
    }

    pub fn gas_left(&self) -> u64 {
        self.gas_left
    }

    pub fn revision(&self) -> Revision {
        self.msg.revision
    }

    pub fn into_host(self) -> Box<dyn HostContext + Send> {
        self.host
    }

    /// Every gas charge in the EEI reduces to this. When `meter_gas` is
    /// false the whole module becomes a no-op, mirroring a metered
    /// transcompiler that has already baked charges into the bytecode.
    fn charge(&mut self, amount: u64) -> Result<(), EeiError> {
        if !self.meter_gas {
            return Ok(());
        }
        if amount > self.gas_left {
            return Err(EeiError::OutOfGas);
        }
        self.gas_left -= amount;
        Ok(())
    }

    fn reject_static(&self) -> Result<(), EeiError> {
        if self.msg.is_static() {
            return Err(EeiError::StaticModeViolation);
        }
        Ok(())
    }

    fn ensure_sender_balance(&self, value: &U256Be) -> Result<(), EeiError> {
        let balance = self.host.get_balance(&self.msg.destination);
        let balance128 = narrow_u128(&balance)?;
        let value128 = narrow_u128(value)?;
        if balance128 < value128 {
            return Err(EeiError::OutOfGas);
        }
        Ok(())
    }

    // -- gas / identity -----------------------------------------------

    /// A negative `g` is undefined by the EEI; this rejects it as
    /// `OutOfGas` before the `meter_gas` gate so an unmetered module can't
    /// use a negative argument to slip past the boundary check.
    pub fn use_gas(&mut self, g: i64) -> Result<(), EeiError> {
        if g < 0 {
            return Err(EeiError::OutOfGas);
        }
        self.charge(g as u64)
    }

    pub fn get_gas_left(&mut self) -> Result<i64, EeiError> {
        self.charge(schedule::BASE)?;
        Ok(self.gas_left as i64)
    }

    pub fn get_address(&mut self, mem: &dyn GuestMemory, off: u32) -> Result<(), EeiError> {
        self.charge(schedule::BASE)?;
        memory::store_u160(mem, self.msg.destination.as_bytes(), off)
    }

    pub fn get_caller(&mut self, mem: &dyn GuestMemory, off: u32) -> Result<(), EeiError> {
        self.charge(schedule::BASE)?;
        memory::store_u160(mem, self.msg.sender.as_bytes(), off)
    }

    pub fn get_call_value(&mut self, mem: &dyn GuestMemory, off: u32) -> Result<(), EeiError> {
        self.charge(schedule::BASE)?;
        memory::store_u128(mem, &self.msg.value.0, off)
    }

    pub fn get_external_balance(&mut self, mem: &dyn GuestMemory, addr_off: u32, result_off: u32) -> Result<(), EeiError> {
        let addr = Address::from_bytes(memory::load_u160(mem, addr_off)?);
        self.charge(schedule::BALANCE)?;
        let balance = self.host.get_balance(&addr);
        memory::store_u128(mem, &balance.0, result_off)
    }

    /// Returns `0` when the host reports a non-zero hash (found) and `1`
    /// otherwise; the memory write happens unconditionally either way.
    pub fn get_block_hash(&mut self, mem: &dyn GuestMemory, number: i64, result_off: u32) -> Result<i32, EeiError> {
        self.charge(schedule::BLOCKHASH)?;
        let hash = self.host.get_block_hash(number);
        memory::store_u256_be(mem, &hash.0, result_off)?;
        Ok(if hash.is_zero() { 1 } else { 0 })
    }

    // -- call data / code -----------------------------------------------

    pub fn get_call_data_size(&mut self) -> Result<i32, EeiError> {
        self.charge(schedule::BASE)?;
        Ok(self.msg.input.len() as i32)
    }

    pub fn call_data_copy(&mut self, mem: &dyn GuestMemory, dst_off: u32, src_off: u32, len: u32) -> Result<(), EeiError> {
        let g = gas::copy_gas(schedule::VERYLOW, schedule::COPY, len)?;
        self.charge(g)?;
        copy_from_buffer(mem, &self.msg.input, src_off, dst_off, len)
    }

    pub fn get_code_size(&mut self) -> Result<i32, EeiError> {
        self.charge(schedule::BASE)?;
        Ok(self.code.len() as i32)
    }

    pub fn code_copy(&mut self, mem: &dyn GuestMemory, dst_off: u32, src_off: u32, len: u32) -> Result<(), EeiError> {
        let g = gas::copy_gas(schedule::VERYLOW, schedule::COPY, len)?;
        self.charge(g)?;
        copy_from_buffer(mem, &self.code, src_off, dst_off, len)
    }

    pub fn get_external_code_size(&mut self, mem: &dyn GuestMemory, addr_off: u32) -> Result<i32, EeiError> {
        let addr = Address::from_bytes(memory::load_u160(mem, addr_off)?);
        self.charge(schedule::EXTCODE)?;
        Ok(self.host.get_code_size(&addr) as i32)
    }

    /// Unlike the other copy family members, the host fills the tail with
    /// zeros itself (it's handed a zero-initialized buffer and only told how
    /// many bytes it actually wrote).
    pub fn external_code_copy(
        &mut self,
        mem: &dyn GuestMemory,
        addr_off: u32,
        dst_off: u32,
        src_off: u32,
        len: u32,
    ) -> Result<(), EeiError> {
        let g = gas::copy_gas(schedule::EXTCODE, schedule::COPY, len)?;
        self.charge(g)?;
        let addr = Address::from_bytes(memory::load_u160(mem, addr_off)?);
        let mut buf = vec![0u8; len as usize];
        self.host.copy_code(&addr, src_off, &mut buf);
        memory::store_bytes(mem, dst_off, &buf)
    }

    // -- block / tx context -----------------------------------------------

    pub fn get_block_coinbase(&mut self, mem: &dyn GuestMemory, off: u32) -> Result<(), EeiError> {
        self.charge(schedule::BASE)?;
        let tx = self.host.get_tx_context();
        memory::store_u160(mem, tx.coinbase.as_bytes(), off)
    }

    pub fn get_block_difficulty(&mut self, mem: &dyn GuestMemory, off: u32) -> Result<(), EeiError> {
        self.charge(schedule::BASE)?;
        let tx = self.host.get_tx_context();
        memory::store_u256_be(mem, &tx.difficulty.0, off)
    }

    pub fn get_block_gas_limit(&mut self) -> Result<i64, EeiError> {
        self.charge(schedule::BASE)?;
        Ok(self.host.get_tx_context().gas_limit)
    }

    pub fn get_tx_gas_price(&mut self, mem: &dyn GuestMemory, off: u32) -> Result<(), EeiError> {
        self.charge(schedule::BASE)?;
        let tx = self.host.get_tx_context();
        memory::store_u128(mem, &tx.gas_price.0, off)
    }

    pub fn get_block_number(&mut self) -> Result<i64, EeiError> {
        self.charge(schedule::BASE)?;
        Ok(self.host.get_tx_context().number)
    }

    pub fn get_block_timestamp(&mut self) -> Result<i64, EeiError> {
        self.charge(schedule::BASE)?;
        Ok(self.host.get_tx_context().timestamp)
    }

    pub fn get_tx_origin(&mut self, mem: &dyn GuestMemory, off: u32) -> Result<(), EeiError> {
        self.charge(schedule::BASE)?;
        let tx = self.host.get_tx_context();
        memory::store_u160(mem, tx.origin.as_bytes(), off)
    }

    // -- logging -----------------------------------------------

    pub fn log(
        &mut self,
        mem: &dyn GuestMemory,
        data_off: u32,
        len: u32,
        n_topics: u32,
        t1: u32,
        t2: u32,
        t3: u32,
        t4: u32,
    ) -> Result<(), EeiError> {
        self.reject_static()?;
        if n_topics > 4 {
            return Err(EeiError::ContractValidationFailure("log: too many topics".into()));
        }
        let topic_offs = [t1, t2, t3, t4];
        let mut topics = Vec::with_capacity(n_topics as usize);
        for off in topic_offs.iter().take(n_topics as usize) {
            topics.push(U256Be(memory::load_u256_be(mem, *off)?));
        }
        let data = memory::load_bytes(mem, data_off, len)?;
        let g = gas::log_gas(n_topics, len)?;
        self.charge(g)?;
        self.host.emit_log(&self.msg.destination, &data, &topics);
        Ok(())
    }

    // -- storage -----------------------------------------------

    pub fn storage_store(&mut self, mem: &dyn GuestMemory, key_off: u32, val_off: u32) -> Result<(), EeiError> {
        self.reject_static()?;
        let key = memory::load_u256_be(mem, key_off)?;
        let value = memory::load_u256_be(mem, val_off)?;
        let current = self.host.get_storage(&self.msg.destination, &U256Be(key));
        let charge = if current.is_zero() && !U256Be(value).is_zero() {
            schedule::STORAGE_STORE_CREATE
        } else {
            schedule::STORAGE_STORE_CHANGE
        };
        self.charge(charge)?;
        self.host.set_storage(&self.msg.destination, &U256Be(key), &U256Be(value));
        Ok(())
    }

    pub fn storage_load(&mut self, mem: &dyn GuestMemory, key_off: u32, result_off: u32) -> Result<(), EeiError> {
        let key = memory::load_u256_be(mem, key_off)?;
        self.charge(schedule::STORAGE_LOAD)?;
        let value = self.host.get_storage(&self.msg.destination, &U256Be(key));
        memory::store_u256_be(mem, &value.0, result_off)
    }

    // -- termination -----------------------------------------------

    /// `finish`: the wire name is `finish`, the EEI name is `return`. Neither
    /// charges gas beyond whatever `useGas` the guest already ran.
    pub fn finish(&mut self, mem: &dyn GuestMemory, off: u32, len: u32) -> Result<(bool, Vec<u8>), EeiError> {
        let output = memory::load_bytes(mem, off, len)?;
        Ok((false, output))
    }

    pub fn revert(&mut self, mem: &dyn GuestMemory, off: u32, len: u32) -> Result<(bool, Vec<u8>), EeiError> {
        let output = memory::load_bytes(mem, off, len)?;
        Ok((true, output))
    }

    pub fn get_return_data_size(&mut self) -> Result<i32, EeiError> {
        self.charge(schedule::BASE)?;
        Ok(self.last_return_data.len() as i32)
    }

    /// Charges a flat `verylow`, not the per-word copy formula, matches
    /// the reference implementation's own (otherwise-inconsistent) choice
    /// for this one entry point.
    pub fn return_data_copy(&mut self, mem: &dyn GuestMemory, dst_off: u32, src_off: u32, len: u32) -> Result<(), EeiError> {
        self.charge(schedule::VERYLOW)?;
        copy_from_buffer(mem, &self.last_return_data, src_off, dst_off, len)
    }

    // -- calls -----------------------------------------------

    pub fn call(&mut self, mem: &dyn GuestMemory, gas: i64, addr_off: u32, value_off: u32, data_off: u32, data_len: u32) -> Result<i32, EeiError> {
        let destination = Address::from_bytes(memory::load_u160(mem, addr_off)?);
        let value = widen_u128(&memory::load_u128(mem, value_off)?);
        if !value.is_zero() {
            self.reject_static()?;
        }
        self.ensure_sender_balance(&value)?;
        let input = memory::load_bytes(mem, data_off, data_len)?;

        if !self.host.account_exists(&destination) {
            self.charge(schedule::CALL_NEW_ACCOUNT)?;
        }
        if !value.is_zero() {
            self.charge(schedule::VALUE_TRANSFER)?;
        }
        self.charge(schedule::CALL)?;
        let callee_gas = gas - gas / 64;
        self.charge(callee_gas.max(0) as u64)?;

        let sub_msg = CallMessage {
            sender: self.msg.destination,
            destination,
            value,
            input,
            gas: callee_gas,
            kind: CallKind::Call,
            flags: self.msg.flags,
            depth: self.msg.depth + 1,
            revision: self.msg.revision,
        };
        let result = self.host.call(&sub_msg);
        self.last_return_data = result.output.clone();
        self.gas_left = self.gas_left.saturating_add(result.gas_left.max(0) as u64);
        Ok(status_to_i32(result.status))
    }

    pub fn call_code(&mut self, mem: &dyn GuestMemory, gas: i64, addr_off: u32, value_off: u32, data_off: u32, data_len: u32) -> Result<i32, EeiError> {
        let destination = Address::from_bytes(memory::load_u160(mem, addr_off)?);
        let value = widen_u128(&memory::load_u128(mem, value_off)?);
        self.ensure_sender_balance(&value)?;
        let input = memory::load_bytes(mem, data_off, data_len)?;

        if !value.is_zero() {
            self.charge(schedule::VALUE_TRANSFER)?;
        }
        self.charge(schedule::CALL)?;
        let callee_gas = gas - gas / 64;
        self.charge(callee_gas.max(0) as u64)?;

        let sub_msg = CallMessage {
            sender: self.msg.destination,
            destination,
            value,
            input,
            gas: callee_gas,
            kind: CallKind::CallCode,
            flags: self.msg.flags,
            depth: self.msg.depth + 1,
            revision: self.msg.revision,
        };
        let result = self.host.call(&sub_msg);
        self.last_return_data = result.output.clone();
        self.gas_left = self.gas_left.saturating_add(result.gas_left.max(0) as u64);
        Ok(status_to_i32(result.status))
    }

    /// Sender and value are inherited from the current message, not read
    /// from memory, `callDelegate` has no value offset argument.
    pub fn call_delegate(&mut self, mem: &dyn GuestMemory, gas: i64, addr_off: u32, data_off: u32, data_len: u32) -> Result<i32, EeiError> {
        let destination = Address::from_bytes(memory::load_u160(mem, addr_off)?);
        let value = self.msg.value;
        let input = memory::load_bytes(mem, data_off, data_len)?;

        if !value.is_zero() {
            self.charge(schedule::VALUE_TRANSFER)?;
        }
        self.charge(schedule::CALL)?;
        let callee_gas = gas - gas / 64;
        self.charge(callee_gas.max(0) as u64)?;

        let sub_msg = CallMessage {
            sender: self.msg.sender,
            destination,
            value,
            input,
            gas: callee_gas,
            kind: CallKind::DelegateCall,
            flags: self.msg.flags,
            depth: self.msg.depth + 1,
            revision: self.msg.revision,
        };
        let result = self.host.call(&sub_msg);
        self.last_return_data = result.output.clone();
        self.gas_left = self.gas_left.saturating_add(result.gas_left.max(0) as u64);
        Ok(status_to_i32(result.status))
    }

    /// Forces the `STATIC` flag on and the value to zero regardless of what
    /// the guest asked for.
    pub fn call_static(&mut self, mem: &dyn GuestMemory, gas: i64, addr_off: u32, data_off: u32, data_len: u32) -> Result<i32, EeiError> {
        let destination = Address::from_bytes(memory::load_u160(mem, addr_off)?);
        let input = memory::load_bytes(mem, data_off, data_len)?;

        self.charge(schedule::CALL)?;
        let callee_gas = gas - gas / 64;
        self.charge(callee_gas.max(0) as u64)?;

        let sub_msg = CallMessage {
            sender: self.msg.destination,
            destination,
            value: U256Be::ZERO,
            input,
            gas: callee_gas,
            kind: CallKind::Call,
            flags: self.msg.flags.with_static(true),
            depth: self.msg.depth + 1,
            revision: self.msg.revision,
        };
        let result = self.host.call(&sub_msg);
        self.last_return_data = result.output.clone();
        self.gas_left = self.gas_left.saturating_add(result.gas_left.max(0) as u64);
        Ok(status_to_i32(result.status))
    }

    /// Unlike the call family, a successful CREATE's callee gas is **not**
    /// credited back into `gas_left`, carried over from the reference
    /// implementation's own asymmetry here (see the Open Question in
    /// `DESIGN.md` about refunding unspent callee gas).
    pub fn create(&mut self, mem: &dyn GuestMemory, value_off: u32, data_off: u32, len: u32, addr_dst_off: u32) -> Result<i32, EeiError> {
        self.reject_static()?;
        let value = widen_u128(&memory::load_u128(mem, value_off)?);
        self.ensure_sender_balance(&value)?;
        let input = if len > 0 { memory::load_bytes(mem, data_off, len)? } else { Vec::new() };

        let callee_gas = self.gas_left as i64 - (self.gas_left as i64) / 64;
        self.charge(callee_gas.max(0) as u64)?;
        self.charge(schedule::CREATE)?;

        let sub_msg = CallMessage {
            sender: self.msg.destination,
            destination: Address::ZERO,
            value,
            input,
            gas: callee_gas,
            kind: CallKind::Create,
            flags: MessageFlags::NONE,
            depth: self.msg.depth + 1,
            revision: self.msg.revision,
        };
        let result = self.host.call(&sub_msg);
        match result.status {
            HostCallStatus::Success => {
                let created = result.create_address.unwrap_or(Address::ZERO);
                memory::store_u160(mem, created.as_bytes(), addr_dst_off)?;
                self.last_return_data.clear();
            }
            _ => {
                self.last_return_data = result.output.clone();
            }
        }
        Ok(status_to_i32(result.status))
    }

    pub fn self_destruct(&mut self, mem: &dyn GuestMemory, addr_off: u32) -> Result<(), EeiError> {
        self.reject_static()?;
        let beneficiary = Address::from_bytes(memory::load_u160(mem, addr_off)?);
        if !self.host.account_exists(&beneficiary) {
            self.charge(schedule::CALL_NEW_ACCOUNT)?;
        }
        self.charge(schedule::SELFDESTRUCT)?;
        let destination = self.msg.destination;
        self.host.selfdestruct(&destination, &beneficiary);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host_context::MockHostContext;
    use crate::memory::test_support::FixedGuestMemory;
    use crate::types::{CallKind, HostCallResult, MessageFlags};

    fn message(gas: i64, flags: MessageFlags) -> CallMessage {
        CallMessage {
            sender: Address::from_bytes([1u8; 20]),
            destination: Address::from_bytes([2u8; 20]),
            value: U256Be::ZERO,
            input: vec![0xaa, 0xbb, 0xcc],
            gas,
            kind: CallKind::Call,
            flags,
            depth: 0,
            revision: Revision::Byzantium,
        }
    }

    #[test]
    fn use_gas_debits_and_rejects_overrun() {
        let mut state = EEIState::new(message(1_000, MessageFlags::NONE), vec![], true, Box::new(MockHostContext::new()));
        state.use_gas(400).unwrap();
        assert_eq!(state.gas_left(), 600);
        let err = state.use_gas(10_000).unwrap_err();
        assert!(matches!(err, EeiError::OutOfGas));
    }

    #[test]
    fn use_gas_is_noop_when_unmetered() {
        let mut state = EEIState::new(message(10, MessageFlags::NONE), vec![], false, Box::new(MockHostContext::new()));
        state.use_gas(1_000_000).unwrap();
        assert_eq!(state.gas_left(), 10);
    }

    #[test]
    fn negative_use_gas_argument_is_out_of_gas() {
        let mut state = EEIState::new(message(1_000, MessageFlags::NONE), vec![], true, Box::new(MockHostContext::new()));
        let err = state.use_gas(-1).unwrap_err();
        assert!(matches!(err, EeiError::OutOfGas));
    }

    #[test]
    fn negative_use_gas_argument_is_rejected_even_when_unmetered() {
        let mut state = EEIState::new(message(10, MessageFlags::NONE), vec![], false, Box::new(MockHostContext::new()));
        let err = state.use_gas(-1).unwrap_err();
        assert!(matches!(err, EeiError::OutOfGas));
        assert_eq!(state.gas_left(), 10);
    }

    #[test]
    fn call_data_copy_round_trips_input() {
        let mem = FixedGuestMemory::new(32);
        let mut state = EEIState::new(message(100_000, MessageFlags::NONE), vec![], true, Box::new(MockHostContext::new()));
        state.call_data_copy(&mem, 0, 0, 3).unwrap();
        let mut buf = [0u8; 3];
        mem.read(0, &mut buf).unwrap();
        assert_eq!(buf, [0xaa, 0xbb, 0xcc]);
    }

    #[test]
    fn call_data_copy_out_of_range_is_invalid_memory_access() {
        let mem = FixedGuestMemory::new(32);
        let mut state = EEIState::new(message(100_000, MessageFlags::NONE), vec![], true, Box::new(MockHostContext::new()));
        let err = state.call_data_copy(&mem, 0, 0, 100).unwrap_err();
        assert!(matches!(err, EeiError::InvalidMemoryAccess));
    }

    #[test]
    fn log_rejects_under_static() {
        let mem = FixedGuestMemory::new(32);
        let mut state = EEIState::new(message(100_000, MessageFlags::STATIC), vec![], true, Box::new(MockHostContext::new()));
        let err = state.log(&mem, 0, 0, 0, 0, 0, 0, 0).unwrap_err();
        assert!(matches!(err, EeiError::StaticModeViolation));
    }

    #[test]
    fn log_rejects_more_than_four_topics() {
        let mem = FixedGuestMemory::new(32);
        let mut state = EEIState::new(message(100_000, MessageFlags::NONE), vec![], true, Box::new(MockHostContext::new()));
        let err = state.log(&mem, 0, 0, 5, 0, 0, 0, 0).unwrap_err();
        assert!(matches!(err, EeiError::ContractValidationFailure(_)));
    }

    #[test]
    fn storage_store_and_load_round_trip() {
        let mem = FixedGuestMemory::new(96);
        let mut key = [0u8; 32];
        key[31] = 1;
        let mut value = [0u8; 32];
        value[31] = 2;
        mem.write(0, &key).unwrap();
        mem.write(32, &value).unwrap();

        let mut state = EEIState::new(message(100_000, MessageFlags::NONE), vec![], true, Box::new(MockHostContext::new()));
        state.storage_store(&mem, 0, 32).unwrap();
        state.storage_load(&mem, 0, 64).unwrap();

        let mut out = [0u8; 32];
        mem.read(64, &mut out).unwrap();
        assert_eq!(out, value);
    }

    #[test]
    fn storage_store_rejects_under_static() {
        let mem = FixedGuestMemory::new(64);
        let mut state = EEIState::new(message(100_000, MessageFlags::STATIC), vec![], true, Box::new(MockHostContext::new()));
        let err = state.storage_store(&mem, 0, 32).unwrap_err();
        assert!(matches!(err, EeiError::StaticModeViolation));
    }

    #[test]
    fn storage_store_charges_more_for_new_slot_than_for_change() {
        let mem = FixedGuestMemory::new(64);
        let mut value = [0u8; 32];
        value[31] = 7;
        mem.write(32, &value).unwrap();

        let mut state = EEIState::new(message(100_000, MessageFlags::NONE), vec![], true, Box::new(MockHostContext::new()));
        state.storage_store(&mem, 0, 32).unwrap();
        let after_create = state.gas_left();
        state.storage_store(&mem, 0, 32).unwrap();
        let after_change = state.gas_left();

        assert_eq!(100_000 - after_create, schedule::STORAGE_STORE_CREATE);
        assert_eq!(after_create - after_change, schedule::STORAGE_STORE_CHANGE);
    }

    #[test]
    fn finish_reports_output_and_not_revert() {
        let mem = FixedGuestMemory::new(8);
        mem.write(0, &[0xde, 0xad, 0xbe, 0xef]).unwrap();
        let mut state = EEIState::new(message(100_000, MessageFlags::NONE), vec![], true, Box::new(MockHostContext::new()));
        let (is_revert, output) = state.finish(&mem, 0, 4).unwrap();
        assert!(!is_revert);
        assert_eq!(output, vec![0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn revert_reports_output_and_revert_flag() {
        let mem = FixedGuestMemory::new(8);
        mem.write(0, &[0xde, 0xad, 0xbe, 0xef]).unwrap();
        let mut state = EEIState::new(message(100_000, MessageFlags::NONE), vec![], true, Box::new(MockHostContext::new()));
        let (is_revert, output) = state.revert(&mem, 0, 4).unwrap();
        assert!(is_revert);
        assert_eq!(output, vec![0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn call_credits_callee_gas_left_back() {
        let mem = FixedGuestMemory::new(64);
        let mut host = MockHostContext::new();
        host.balances.insert(Address::from_bytes([2u8; 20]), U256Be::from_u128(0));
        host.call_script.push_back(HostCallResult {
            status: HostCallStatus::Success,
            output: vec![1, 2, 3],
            gas_left: 500,
            create_address: None,
        });
        let mut state = EEIState::new(message(100_000, MessageFlags::NONE), vec![], true, Box::new(host));
        let status = state.call(&mem, 1_000, 0, 32, 0, 0).unwrap();
        assert_eq!(status, 0);
        // callee_gas = 1000 - 1000/64 = 985; charged CALL(700) + 985, credited back 500.
        assert_eq!(state.gas_left(), 100_000 - schedule::CALL - 985 + 500);
        assert_eq!(state.last_return_data, vec![1, 2, 3]);
    }

    #[test]
    fn call_with_value_under_static_is_rejected() {
        let mem = FixedGuestMemory::new(64);
        let mut value_be32 = [0u8; 32];
        value_be32[31] = 1;
        memory::store_u128(&mem, &value_be32, 32).unwrap();
        let mut host = MockHostContext::new();
        host.balances.insert(Address::from_bytes([2u8; 20]), U256Be::from_u128(1_000));
        let mut state = EEIState::new(message(100_000, MessageFlags::STATIC), vec![], true, Box::new(host));
        let err = state.call(&mem, 1_000, 0, 32, 0, 0).unwrap_err();
        assert!(matches!(err, EeiError::StaticModeViolation));
    }

    #[test]
    fn call_insufficient_balance_is_out_of_gas() {
        let mem = FixedGuestMemory::new(64);
        let mut value_be32 = [0u8; 32];
        value_be32[31] = 1;
        memory::store_u128(&mem, &value_be32, 32).unwrap();
        let state_host = MockHostContext::new();
        let mut state = EEIState::new(message(100_000, MessageFlags::NONE), vec![], true, Box::new(state_host));
        let err = state.call(&mem, 1_000, 0, 32, 0, 0).unwrap_err();
        assert!(matches!(err, EeiError::OutOfGas));
    }

    #[test]
    fn create_under_static_is_rejected() {
        let mem = FixedGuestMemory::new(64);
        let mut state = EEIState::new(message(100_000, MessageFlags::STATIC), vec![], true, Box::new(MockHostContext::new()));
        let err = state.create(&mem, 0, 0, 0, 32).unwrap_err();
        assert!(matches!(err, EeiError::StaticModeViolation));
    }

    #[test]
    fn create_success_writes_address_and_clears_return_data() {
        let mem = FixedGuestMemory::new(64);
        let created = Address::from_bytes([9u8; 20]);
        let mut host = MockHostContext::new();
        host.balances.insert(Address::from_bytes([2u8; 20]), U256Be::from_u128(0));
        host.call_script.push_back(HostCallResult {
            status: HostCallStatus::Success,
            output: vec![],
            gas_left: 0,
            create_address: Some(created),
        });
        let mut state = EEIState::new(message(3_000_000, MessageFlags::NONE), vec![], true, Box::new(host));
        state.last_return_data = vec![1, 2, 3];
        let status = state.create(&mem, 0, 0, 0, 32).unwrap();
        assert_eq!(status, 0);
        assert!(state.last_return_data.is_empty());
        assert_eq!(memory::load_u160(&mem, 32).unwrap(), *created.as_bytes());
    }

    #[test]
    fn self_destruct_charges_new_account_fee_and_terminates() {
        let mem = FixedGuestMemory::new(32);
        let beneficiary = Address::from_bytes([3u8; 20]);
        let mut buf = [0u8; 20];
        buf.copy_from_slice(beneficiary.as_bytes());
        memory::store_u160(&mem, &buf, 0).unwrap();
        let mut state = EEIState::new(message(100_000, MessageFlags::NONE), vec![], true, Box::new(MockHostContext::new()));
        state.self_destruct(&mem, 0).unwrap();
        let spent = 100_000 - state.gas_left();
        assert_eq!(spent, schedule::CALL_NEW_ACCOUNT + schedule::SELFDESTRUCT);
    }

    #[test]
    fn self_destruct_rejects_under_static() {
        let mem = FixedGuestMemory::new(32);
        let mut state = EEIState::new(message(100_000, MessageFlags::STATIC), vec![], true, Box::new(MockHostContext::new()));
        let err = state.self_destruct(&mem, 0).unwrap_err();
        assert!(matches!(err, EeiError::StaticModeViolation));
    }
}
