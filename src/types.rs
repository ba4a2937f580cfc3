//! Core data types shared across the engine: addresses, 256-bit words,
//! call messages, and the per-invocation execution result.
//!
//! Plays the role a `Contract`/`ContractCall`/`ContractResult` triple plays
//! elsewhere, but typed for the EEI's fixed-width wire formats instead of a
//! string-keyed JSON-ish model.

use std::fmt;

/// A 20-byte Ethereum-style address, stored big-endian (index 0 is the
/// most-significant byte), matching the host-facing orientation used
/// everywhere outside of guest memory.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub const ZERO: Address = Address([0u8; 20]);

    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Address(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// A 256-bit unsigned integer stored big-endian, matching `uint256be`'s
/// guest-visible encoding.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct U256Be(pub [u8; 32]);

impl U256Be {
    pub const ZERO: U256Be = U256Be([0u8; 32]);

    pub fn from_u128(value: u128) -> Self {
        let mut bytes = [0u8; 32];
        bytes[16..32].copy_from_slice(&value.to_be_bytes());
        U256Be(bytes)
    }

    pub fn from_i64(value: i64) -> Self {
        Self::from_u128(value.max(0) as u128)
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// True when the high 128 bits (the 16 most-significant bytes) are zero.
    /// `getCallValue`/`eth_useGas`-adjacent helpers rely on this before
    /// narrowing a 256-bit value down to a 128-bit guest slot.
    pub fn high_is_zero(&self) -> bool {
        self.0[0..16] == [0u8; 16]
    }

    pub fn low_u128(&self) -> u128 {
        let mut buf = [0u8; 16];
        buf.copy_from_slice(&self.0[16..32]);
        u128::from_be_bytes(buf)
    }
}

impl fmt::Debug for U256Be {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// Bits defined in `msg.flags`. Only `STATIC` exists today.
#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub struct MessageFlags(pub u32);

impl MessageFlags {
    pub const NONE: MessageFlags = MessageFlags(0);
    pub const STATIC: MessageFlags = MessageFlags(1);

    pub fn is_static(&self) -> bool {
        self.0 & Self::STATIC.0 != 0
    }

    pub fn with_static(self, is_static: bool) -> Self {
        if is_static {
            MessageFlags(self.0 | Self::STATIC.0)
        } else {
            MessageFlags(self.0 & !Self::STATIC.0)
        }
    }
}

/// `msg.kind`: which of the four call-like operations this invocation is.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CallKind {
    Call,
    CallCode,
    DelegateCall,
    Create,
}

/// The chain revision a call executes under, the host ABI's own
/// `execute(vm, host_ctx, revision, message, code, code_size)` parameter.
/// Only `Byzantium` is accepted; every other named revision, plus any raw
/// value a host passes that this crate doesn't recognize, is gated out by
/// [`crate::dispatcher::revision_supported`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Revision {
    Frontier,
    Homestead,
    TangerineWhistle,
    SpuriousDragon,
    Byzantium,
    Constantinople,
    /// A revision value outside the set this crate names, unsupported.
    Other(i32),
}

/// The call message a host hands the engine for one invocation.
#[derive(Clone, Debug)]
pub struct CallMessage {
    pub sender: Address,
    pub destination: Address,
    pub value: U256Be,
    pub input: Vec<u8>,
    /// Non-negative by invariant; `i64` to match the host ABI's signed gas
    /// budget field.
    pub gas: i64,
    pub kind: CallKind,
    pub flags: MessageFlags,
    pub depth: i32,
    pub revision: Revision,
}

impl CallMessage {
    pub fn is_static(&self) -> bool {
        self.flags.is_static()
    }
}

/// The mutable output accumulator threaded through one invocation.
#[derive(Clone, Debug, Default)]
pub struct ExecutionResult {
    pub gas_left: u64,
    pub is_revert: bool,
    pub return_value: Vec<u8>,
}

/// The block/transaction context returned by `get_tx_context`.
#[derive(Clone, Debug, Default)]
pub struct TxContext {
    pub coinbase: Address,
    pub difficulty: U256Be,
    pub gas_limit: i64,
    pub gas_price: U256Be,
    pub number: i64,
    pub timestamp: i64,
    pub origin: Address,
}

/// Status of a sub-call or CREATE as reported by the host's `call` v-table
/// entry.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum HostCallStatus {
    Success,
    Revert,
    /// Any other failure kind the host call can report; the EEI maps all
    /// of these to the same `1` result code.
    Failure,
}

/// Outcome of a host-side `call`/CREATE. Modelled as an owned, non-FFI
/// value, releasing the host-side result buffer is implicit in Rust's
/// ownership instead of an explicit callback.
#[derive(Clone, Debug)]
pub struct HostCallResult {
    pub status: HostCallStatus,
    pub output: Vec<u8>,
    pub gas_left: i64,
    pub create_address: Option<Address>,
}

/// The nine host-facing exit statuses.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum StatusCode {
    Success,
    Revert,
    OutOfGas,
    ContractValidationFailure,
    InvalidMemoryAccess,
    StaticModeViolation,
    Rejected,
    Failure,
    InternalError,
}
