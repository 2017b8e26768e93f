use num_bigint::BigUint;
use num_traits::Zero;

use crate::{MAX_TARGET, TARGET_TIMESPAN};

/// Expand a compact 32-bit target encoding into the full 256-bit value.
/// A set sign bit or a zero mantissa expands to zero, which no hash can
/// satisfy.
pub fn expand_target(compact: u32) -> BigUint {
    let exponent = compact >> 24;
    let mantissa = compact & 0x007f_ffff;
    if compact & 0x0080_0000 != 0 || mantissa == 0 {
        return BigUint::zero();
    }
    if exponent <= 3 {
        BigUint::from(mantissa >> (8 * (3 - exponent)))
    } else {
        BigUint::from(mantissa) << (8 * (exponent - 3))
    }
}

/// Pack a 256-bit target back into the compact encoding.
pub fn compact_from_target(target: &BigUint) -> u32 {
    if target.is_zero() {
        return 0;
    }
    let bytes = target.to_bytes_be();
    let mut size = bytes.len() as u32;
    let mut mantissa: u32 = 0;
    for i in 0..3 {
        mantissa <<= 8;
        if i < bytes.len() {
            mantissa |= bytes[i] as u32;
        }
    }
    if mantissa & 0x0080_0000 != 0 {
        mantissa >>= 8;
        size += 1;
    }
    (size << 24) | mantissa
}

/// Proof-of-work check: the hash, read as a little-endian 256-bit integer,
/// must not exceed the expanded target, and the target itself must be
/// nonzero and within the chain maximum.
pub fn check_proof_of_work(block_hash: &[u8; 32], compact: u32) -> bool {
    let target = expand_target(compact);
    if target.is_zero() || target > expand_target(MAX_TARGET) {
        return false;
    }
    BigUint::from_bytes_le(block_hash) <= target
}

/// Per-block work, 2^256 / (target + 1), computed as
/// floor((2^256 - 1) / (target + 1)) + 1 so 2^256 itself never needs a
/// representation.
pub fn block_work(compact: u32) -> BigUint {
    let target = expand_target(compact);
    if target.is_zero() {
        return BigUint::zero();
    }
    let max = BigUint::from_bytes_be(&[0xffu8; 32]);
    max / (target + 1u32) + 1u32
}

/// Difficulty retarget: scale the previous target by the observed timespan
/// over the expected one, clamping the timespan to a factor of four in
/// either direction and the result to the chain maximum.
pub fn retarget(last_target: u32, actual_timespan: u32) -> u32 {
    let span = actual_timespan.clamp(TARGET_TIMESPAN / 4, TARGET_TIMESPAN * 4);
    let mut target = expand_target(last_target) * span / TARGET_TIMESPAN;
    let limit = expand_target(MAX_TARGET);
    if target > limit {
        target = limit;
    }
    compact_from_target(&target)
}

#[cfg(test)]
mod tests {
    use super::*;

    const GENESIS_HASH: [u8; 32] = [
        0x6f, 0xe2, 0x8c, 0x0a, 0xb6, 0xf1, 0xb3, 0x72, 0xc1, 0xa6, 0xa2, 0x46, 0xae, 0x63, 0xf7,
        0x4f, 0x93, 0x1e, 0x83, 0x65, 0xe1, 0x5a, 0x08, 0x9c, 0x68, 0xd6, 0x19, 0x00, 0x00, 0x00,
        0x00, 0x00,
    ];

    #[test]
    fn max_target_compact_roundtrip() {
        let expanded = expand_target(MAX_TARGET);
        assert_eq!(compact_from_target(&expanded), MAX_TARGET);
    }

    #[test]
    fn genesis_hash_meets_max_target() {
        assert!(check_proof_of_work(&GENESIS_HASH, MAX_TARGET));
    }

    #[test]
    fn all_ones_hash_fails_max_target() {
        assert!(!check_proof_of_work(&[0xff; 32], MAX_TARGET));
    }

    #[test]
    fn target_above_maximum_is_rejected() {
        // Exponent 0x20 puts the mantissa above the chain maximum.
        assert!(!check_proof_of_work(&[0u8; 32], 0x2000_ffff));
        assert!(!check_proof_of_work(&[0u8; 32], 0));
    }

    #[test]
    fn work_for_max_target() {
        // 2^256 / (0xffff * 2^208 + 1) with the +1 identity: 0x0100010002.
        let w = block_work(MAX_TARGET);
        assert_eq!(w.to_bytes_be(), vec![0x01, 0x00, 0x01, 0x00, 0x02]);
    }

    #[test]
    fn harder_target_means_more_work() {
        // One more leading zero byte in the target.
        let harder = 0x1c00_ffff;
        assert!(block_work(harder) > block_work(MAX_TARGET));
    }

    #[test]
    fn retarget_clamps_timespan() {
        // A timespan of zero clamps to a quarter, quartering the target.
        let fast = retarget(MAX_TARGET, 0);
        let expected = {
            let t = expand_target(MAX_TARGET) / 4u32;
            compact_from_target(&t)
        };
        assert_eq!(fast, expected);

        // A huge timespan clamps to four times, but the result cannot rise
        // above the chain maximum.
        assert_eq!(retarget(MAX_TARGET, u32::MAX), MAX_TARGET);
    }

    #[test]
    fn retarget_exact_timespan_is_stable() {
        assert_eq!(retarget(MAX_TARGET, TARGET_TIMESPAN), MAX_TARGET);
    }
}
