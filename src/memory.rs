//! Memory Bridge: bounds-checked read/write of guest linear memory.
//!
//! Fixed-width integers round-trip through a **reversed** byte copy
//! (`dst[length − i − 1] = memory[src + i]`), this is the wire semantics of
//! the EEI, not an artefact, and must be preserved exactly for bytecode
//! compatibility. Byte ranges (call data, code, log data, return data) are
//! copied in natural order.
//!
//! Generalized over [`GuestMemory`] so the bridge has no hard dependency on
//! any one Wasm engine; a wasmer-backed implementation instead reads/writes
//! through a `&FunctionEnvMut<HostState>`-style handle directly, see
//! [`crate::engine::WasmerGuestMemory`].

use crate::error::EeiError;

/// A guest's linear memory, abstracted away from any specific Wasm engine.
pub trait GuestMemory {
    /// Size of the memory in bytes.
    fn size(&self) -> u64;
    fn read(&self, offset: u32, buf: &mut [u8]) -> Result<(), EeiError>;
    fn write(&self, offset: u32, buf: &[u8]) -> Result<(), EeiError>;
}

/// Validates `[offset, offset+len)`: the
/// range must not wrap a 32-bit integer, and must not exceed the memory's
/// size, except that a zero-length access is exempt from the upper-bound
/// check (but never the wrap check).
fn check_bounds(mem: &dyn GuestMemory, offset: u32, len: u32) -> Result<(), EeiError> {
    let end = offset.checked_add(len).ok_or(EeiError::InvalidMemoryAccess)?;
    if len > 0 && (end as u64) > mem.size() {
        return Err(EeiError::InvalidMemoryAccess);
    }
    Ok(())
}

/// Natural-order byte-range read (call data, code, log data, ...).
pub fn load_bytes(mem: &dyn GuestMemory, offset: u32, len: u32) -> Result<Vec<u8>, EeiError> {
    check_bounds(mem, offset, len)?;
    let mut buf = vec![0u8; len as usize];
    if len > 0 {
        mem.read(offset, &mut buf)?;
    }
    Ok(buf)
}

/// Natural-order byte-range write.
pub fn store_bytes(mem: &dyn GuestMemory, offset: u32, data: &[u8]) -> Result<(), EeiError> {
    check_bounds(mem, offset, data.len() as u32)?;
    if !data.is_empty() {
        mem.write(offset, data)?;
    }
    Ok(())
}

fn load_reversed(mem: &dyn GuestMemory, offset: u32, width: usize) -> Result<Vec<u8>, EeiError> {
    check_bounds(mem, offset, width as u32)?;
    let mut raw = vec![0u8; width];
    mem.read(offset, &mut raw)?;
    raw.reverse();
    Ok(raw)
}

fn store_reversed(mem: &dyn GuestMemory, offset: u32, value: &[u8]) -> Result<(), EeiError> {
    check_bounds(mem, offset, value.len() as u32)?;
    let mut raw = value.to_vec();
    raw.reverse();
    mem.write(offset, &raw)
}

/// Reversed 32-byte read.
pub fn load_u256_be(mem: &dyn GuestMemory, offset: u32) -> Result<[u8; 32], EeiError> {
    let raw = load_reversed(mem, offset, 32)?;
    let mut out = [0u8; 32];
    out.copy_from_slice(&raw);
    Ok(out)
}

/// Reversed 32-byte write.
pub fn store_u256_be(mem: &dyn GuestMemory, value: &[u8; 32], offset: u32) -> Result<(), EeiError> {
    store_reversed(mem, offset, value)
}

/// Reversed 20-byte read (addresses).
pub fn load_u160(mem: &dyn GuestMemory, offset: u32) -> Result<[u8; 20], EeiError> {
    let raw = load_reversed(mem, offset, 20)?;
    let mut out = [0u8; 20];
    out.copy_from_slice(&raw);
    Ok(out)
}

/// Reversed 20-byte write; used for `getAddress`/`getCaller`/... and for
/// writing back the `create` address.
pub fn store_u160(mem: &dyn GuestMemory, value: &[u8; 20], offset: u32) -> Result<(), EeiError> {
    store_reversed(mem, offset, value)
}

/// Reversed 16-byte read.
pub fn load_u128(mem: &dyn GuestMemory, offset: u32) -> Result<[u8; 16], EeiError> {
    let raw = load_reversed(mem, offset, 16)?;
    let mut out = [0u8; 16];
    out.copy_from_slice(&raw);
    Ok(out)
}

/// Writes the low 128 bits of a 256-bit big-endian value, reversed, into a
/// 16-byte guest slot. Fails `OutOfGas` if the high 128 bits of
/// `value_be32` are non-zero; `getCallValue` is the caller that relies on
/// this to reject values that don't fit in 128 bits.
pub fn store_u128(mem: &dyn GuestMemory, value_be32: &[u8; 32], offset: u32) -> Result<(), EeiError> {
    if value_be32[0..16] != [0u8; 16] {
        return Err(EeiError::OutOfGas);
    }
    store_reversed(mem, offset, &value_be32[16..32])
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::GuestMemory;
    use crate::error::EeiError;
    use std::cell::RefCell;

    /// A plain `Vec<u8>`-backed [`GuestMemory`] for unit tests.
    pub struct FixedGuestMemory(pub RefCell<Vec<u8>>);

    impl FixedGuestMemory {
        pub fn new(size: usize) -> Self {
            FixedGuestMemory(RefCell::new(vec![0u8; size]))
        }
    }

    impl GuestMemory for FixedGuestMemory {
        fn size(&self) -> u64 {
            self.0.borrow().len() as u64
        }

        fn read(&self, offset: u32, buf: &mut [u8]) -> Result<(), EeiError> {
            let mem = self.0.borrow();
            let start = offset as usize;
            buf.copy_from_slice(&mem[start..start + buf.len()]);
            Ok(())
        }

        fn write(&self, offset: u32, data: &[u8]) -> Result<(), EeiError> {
            let mut mem = self.0.borrow_mut();
            let start = offset as usize;
            mem[start..start + data.len()].copy_from_slice(data);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::FixedGuestMemory;
    use super::*;

    #[test]
    fn round_trip_u256() {
        let mem = FixedGuestMemory::new(64);
        let mut x = [0u8; 32];
        for (i, b) in x.iter_mut().enumerate() {
            *b = i as u8;
        }
        store_u256_be(&mem, &x, 0).unwrap();
        assert_eq!(load_u256_be(&mem, 0).unwrap(), x);
    }

    #[test]
    fn round_trip_u160() {
        let mem = FixedGuestMemory::new(32);
        let mut x = [0u8; 20];
        for (i, b) in x.iter_mut().enumerate() {
            *b = (i + 1) as u8;
        }
        store_u160(&mem, &x, 4).unwrap();
        assert_eq!(load_u160(&mem, 4).unwrap(), x);
    }

    #[test]
    fn round_trip_u128_via_store_u128() {
        let mem = FixedGuestMemory::new(32);
        let mut full = [0u8; 32];
        full[16..32].copy_from_slice(&[7u8; 16]);
        store_u128(&mem, &full, 0).unwrap();
        assert_eq!(load_u128(&mem, 0).unwrap(), [7u8; 16]);
    }

    #[test]
    fn store_u128_rejects_nonzero_high_half() {
        let mem = FixedGuestMemory::new(32);
        let mut full = [0u8; 32];
        full[0] = 1;
        let err = store_u128(&mem, &full, 0).unwrap_err();
        assert!(matches!(err, EeiError::OutOfGas));
    }

    #[test]
    fn reversed_byte_order_is_exact() {
        let mem = FixedGuestMemory::new(32);
        // guest natural-order bytes b0..b31, b31 is the MSB
        let mut guest_bytes = [0u8; 32];
        guest_bytes[31] = 0xAB;
        mem.write(0, &guest_bytes).unwrap();
        let be = load_u256_be(&mem, 0).unwrap();
        assert_eq!(be[0], 0xAB); // MSB lands at index 0 of the big-endian view
    }

    #[test]
    fn zero_length_access_skips_upper_bound_check() {
        let mem = FixedGuestMemory::new(4);
        assert!(load_bytes(&mem, 4, 0).is_ok());
        assert!(load_bytes(&mem, 5, 0).is_ok());
    }

    #[test]
    fn out_of_bounds_is_invalid_memory_access() {
        let mem = FixedGuestMemory::new(4);
        let err = load_bytes(&mem, 2, 4).unwrap_err();
        assert!(matches!(err, EeiError::InvalidMemoryAccess));
    }

    #[test]
    fn offset_len_overflow_is_rejected() {
        let mem = FixedGuestMemory::new(4);
        let err = load_bytes(&mem, u32::MAX, 8).unwrap_err();
        assert!(matches!(err, EeiError::InvalidMemoryAccess));
    }
}

#[cfg(test)]
mod proptests {
    use super::test_support::FixedGuestMemory;
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn u256_round_trips_for_any_bytes(bytes in proptest::array::uniform32(any::<u8>())) {
            let mem = FixedGuestMemory::new(32);
            store_u256_be(&mem, &bytes, 0).unwrap();
            prop_assert_eq!(load_u256_be(&mem, 0).unwrap(), bytes);
        }

        #[test]
        fn u160_round_trips_for_any_bytes(bytes in proptest::array::uniform20(any::<u8>())) {
            let mem = FixedGuestMemory::new(20);
            store_u160(&mem, &bytes, 0).unwrap();
            prop_assert_eq!(load_u160(&mem, 0).unwrap(), bytes);
        }

        #[test]
        fn byte_range_round_trips_in_natural_order(data in proptest::collection::vec(any::<u8>(), 0..64)) {
            let mem = FixedGuestMemory::new(64);
            store_bytes(&mem, 0, &data).unwrap();
            prop_assert_eq!(load_bytes(&mem, 0, data.len() as u32).unwrap(), data);
        }
    }
}
