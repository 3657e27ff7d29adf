//! FNV-1a hash utilities for configuration fingerprints and handle derivation.
//!
//! The 64-bit variant is used wherever the SDK needs a stable, dependency-free
//! hash of a configuration string: the LogManager factory fingerprint and the
//! C-style facade handle table both derive from it. Stability across builds
//! matters because handles may be persisted by embedders between runs.

/// 64-bit FNV-1a offset basis.
const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
/// 64-bit FNV-1a prime.
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Computes the 64-bit FNV-1a hash of a byte slice.
#[must_use]
pub fn fnv1a_hash(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Folds an additional byte slice into an existing FNV-1a hash.
///
/// Equivalent to hashing the concatenation of the inputs, which lets callers
/// fingerprint multi-part keys without allocating.
#[must_use]
pub fn combine_hashes(seed: u64, bytes: &[u8]) -> u64 {
    let mut hash = seed;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}
