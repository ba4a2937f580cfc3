//! Gas Schedule & Numeric Helpers.
//!
//! `wasmer_middlewares::Metering` gives a flat "1 instruction = 1 gas" cost
//! function elsewhere in this codebase; the EEI's gas schedule is the
//! opposite of that, every charge is named and explicit, so this module
//! owns the named constants and the two overflow-safe formulas (copy-gas and
//! log-gas) that every multi-byte EEI call reduces to.

use crate::error::EeiError;

/// Named gas costs from the eWASM/EIP-150 schedule.
pub mod schedule {
    pub const BASE: u64 = 2;
    pub const VERYLOW: u64 = 3;
    pub const COPY: u64 = 3;
    pub const BALANCE: u64 = 400;
    pub const EXTCODE: u64 = 700;
    pub const BLOCKHASH: u64 = 20;
    pub const LOG: u64 = 375;
    pub const LOG_TOPIC: u64 = 375;
    pub const LOG_DATA: u64 = 8;
    pub const STORAGE_LOAD: u64 = 200;
    pub const STORAGE_STORE_CREATE: u64 = 20_000;
    pub const STORAGE_STORE_CHANGE: u64 = 5_000;
    pub const CALL: u64 = 700;
    pub const CALL_NEW_ACCOUNT: u64 = 25_000;
    pub const VALUE_TRANSFER: u64 = 9_000;
    pub const CREATE: u64 = 32_000;
    pub const SELFDESTRUCT: u64 = 5_000;
}

fn ceil_div_32(length: u64) -> u64 {
    (length + 31) / 32
}

/// Overflow-safe `base + per_word * ceil(length / 32)`, shared by
/// `callDataCopy`, `codeCopy`, `externalCodeCopy`, `returnDataCopy`.
///
/// Checks the product in `u128` before narrowing back to `u64` rather than
/// hand-rolling an `msb` overflow predicate on `words` and `per_word`.
pub fn copy_gas(base: u64, per_word: u64, length: u32) -> Result<u64, EeiError> {
    let words = ceil_div_32(length as u64);
    let product = (per_word as u128) * (words as u128);
    if product > u64::MAX as u128 {
        return Err(EeiError::OutOfGas);
    }
    base.checked_add(product as u64).ok_or(EeiError::OutOfGas)
}

/// Overflow-safe gas for `log`: base + per-topic + per-data-byte.
pub fn log_gas(n_topics: u32, data_len: u32) -> Result<u64, EeiError> {
    let topics_cost = (schedule::LOG_TOPIC as u128) * (n_topics as u128);
    let data_cost = (schedule::LOG_DATA as u128) * (data_len as u128);
    let total = (schedule::LOG as u128) + topics_cost + data_cost;
    if total > u64::MAX as u128 {
        return Err(EeiError::OutOfGas);
    }
    Ok(total as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_gas_zero_length_is_base() {
        assert_eq!(copy_gas(schedule::VERYLOW, schedule::COPY, 0).unwrap(), schedule::VERYLOW);
    }

    #[test]
    fn copy_gas_monotonic_in_length() {
        let a = copy_gas(schedule::VERYLOW, schedule::COPY, 32).unwrap();
        let b = copy_gas(schedule::VERYLOW, schedule::COPY, 33).unwrap();
        let c = copy_gas(schedule::VERYLOW, schedule::COPY, 64).unwrap();
        assert!(a <= b);
        assert!(b <= c);
        assert_eq!(a, schedule::VERYLOW + schedule::COPY);
        assert_eq!(c, schedule::VERYLOW + schedule::COPY * 2);
    }

    #[test]
    fn copy_gas_overflow_is_out_of_gas() {
        let err = copy_gas(schedule::VERYLOW, u64::MAX, u32::MAX).unwrap_err();
        assert!(matches!(err, EeiError::OutOfGas));
    }

    #[test]
    fn log_gas_scales_with_topics_and_data() {
        let zero = log_gas(0, 0).unwrap();
        let with_topics = log_gas(4, 0).unwrap();
        let with_data = log_gas(0, 100).unwrap();
        assert_eq!(zero, schedule::LOG);
        assert_eq!(with_topics, schedule::LOG + schedule::LOG_TOPIC * 4);
        assert_eq!(with_data, schedule::LOG + schedule::LOG_DATA * 100);
    }
}
