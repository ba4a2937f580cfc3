//! Host Context Facade: the blockchain state v-table consumed by the EEI.
//!
//! An in-process mutable model the EEI reads/writes during one call,
//! generalized into a trait so the dispatcher can be driven by any host
//! implementation (a real ledger, or the in-memory [`MockHostContext`] used
//! by this crate's tests).

use crate::types::{Address, CallMessage, HostCallResult, TxContext, U256Be};

/// The blockchain state v-table consumed by the EEI.
///
/// `call` recurses back into the engine for sub-calls/CREATE, this models
/// a re-entrant host: each nested engine invocation constructs its own
/// `EEIState`. Implementations own
/// whatever locking/world-state snapshot discipline that recursion requires;
/// the EEI itself assumes `call` is a plain, blocking synchronous function.
pub trait HostContext {
    fn get_balance(&self, addr: &Address) -> U256Be;
    fn get_block_hash(&self, number: i64) -> U256Be;
    fn get_tx_context(&self) -> TxContext;
    fn get_storage(&self, dest: &Address, key: &U256Be) -> U256Be;
    fn set_storage(&mut self, dest: &Address, key: &U256Be, value: &U256Be);
    fn get_code_size(&self, addr: &Address) -> u32;
    /// Copies up to `len` bytes of `addr`'s code starting at `offset` into
    /// `buf` (which is exactly `len` bytes); returns the number actually
    /// copied (the tail is zero-padded by the caller, not here).
    fn copy_code(&self, addr: &Address, offset: u32, buf: &mut [u8]) -> u32;
    fn call(&mut self, message: &CallMessage) -> HostCallResult;
    fn emit_log(&mut self, dest: &Address, data: &[u8], topics: &[U256Be]);
    fn selfdestruct(&mut self, dest: &Address, beneficiary: &Address);
    fn account_exists(&self, addr: &Address) -> bool;
}

/// In-memory [`HostContext`] for tests and the demo binary. Not part of the
/// consensus-critical core: plain `BTreeMap` storage, no persistence.
#[derive(Default)]
pub struct MockHostContext {
    pub balances: std::collections::BTreeMap<Address, U256Be>,
    pub storage: std::collections::BTreeMap<(Address, [u8; 32]), U256Be>,
    pub code: std::collections::BTreeMap<Address, Vec<u8>>,
    pub block_hashes: std::collections::BTreeMap<i64, U256Be>,
    pub tx_context: TxContext,
    pub logs: Vec<(Address, Vec<u8>, Vec<U256Be>)>,
    pub selfdestructs: Vec<(Address, Address)>,
    /// Canned responses for `call`, consumed in order, lets a test script
    /// a sub-call's outcome without driving a real nested engine invocation.
    pub call_script: std::collections::VecDeque<HostCallResult>,
    pub calls_seen: Vec<CallMessage>,
}

impl MockHostContext {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HostContext for MockHostContext {
    fn get_balance(&self, addr: &Address) -> U256Be {
        self.balances.get(addr).copied().unwrap_or(U256Be::ZERO)
    }

    fn get_block_hash(&self, number: i64) -> U256Be {
        self.block_hashes.get(&number).copied().unwrap_or(U256Be::ZERO)
    }

    fn get_tx_context(&self) -> TxContext {
        self.tx_context.clone()
    }

    fn get_storage(&self, dest: &Address, key: &U256Be) -> U256Be {
        self.storage.get(&(*dest, key.0)).copied().unwrap_or(U256Be::ZERO)
    }

    fn set_storage(&mut self, dest: &Address, key: &U256Be, value: &U256Be) {
        self.storage.insert((*dest, key.0), *value);
    }

    fn get_code_size(&self, addr: &Address) -> u32 {
        self.code.get(addr).map(|c| c.len() as u32).unwrap_or(0)
    }

    fn copy_code(&self, addr: &Address, offset: u32, buf: &mut [u8]) -> u32 {
        let code = match self.code.get(addr) {
            Some(c) => c,
            None => return 0,
        };
        let offset = offset as usize;
        if offset >= code.len() {
            return 0;
        }
        let n = buf.len().min(code.len() - offset);
        buf[..n].copy_from_slice(&code[offset..offset + n]);
        n as u32
    }

    fn call(&mut self, message: &CallMessage) -> HostCallResult {
        self.calls_seen.push(message.clone());
        self.call_script.pop_front().unwrap_or(HostCallResult {
            status: crate::types::HostCallStatus::Success,
            output: Vec::new(),
            gas_left: 0,
            create_address: None,
        })
    }

    fn emit_log(&mut self, dest: &Address, data: &[u8], topics: &[U256Be]) {
        self.logs.push((*dest, data.to_vec(), topics.to_vec()));
    }

    fn selfdestruct(&mut self, dest: &Address, beneficiary: &Address) {
        self.selfdestructs.push((*dest, *beneficiary));
    }

    fn account_exists(&self, addr: &Address) -> bool {
        self.balances.contains_key(addr) || self.code.contains_key(addr)
    }
}
