//! Compact "bits" target encoding and 256-bit integer arithmetic.
//!
//! Targets and cumulative work are both 256-bit unsigned integers stored as
//! `[u32; 8]` limbs, least-significant limb first. Every arithmetic op here
//! is exact integer arithmetic — PPLNS weighting and difficulty retargeting
//! both depend on no floating-point rounding creeping in.

use std::cmp::Ordering;

/// A 256-bit unsigned integer, little-endian limbs (`limbs[0]` least
/// significant). Used both for targets and for cumulative work sums.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct U256(pub [u32; 8]);

impl U256 {
    pub const ZERO: U256 = U256([0; 8]);
    pub const ONE: U256 = U256([1, 0, 0, 0, 0, 0, 0, 0]);
    pub const MAX: U256 = U256([u32::MAX; 8]);

    pub fn from_be_bytes(bytes: &[u8; 32]) -> Self {
        let mut limbs = [0u32; 8];
        for i in 0..8 {
            let chunk = &bytes[i * 4..i * 4 + 4];
            limbs[7 - i] = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        U256(limbs)
    }

    pub fn to_be_bytes(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        for i in 0..8 {
            out[i * 4..i * 4 + 4].copy_from_slice(&self.0[7 - i].to_be_bytes());
        }
        out
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&limb| limb == 0)
    }

    pub fn cmp(&self, other: &U256) -> Ordering {
        for i in (0..8).rev() {
            match self.0[i].cmp(&other.0[i]) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        Ordering::Equal
    }

    pub fn checked_add(&self, other: &U256) -> Option<U256> {
        let mut out = [0u32; 8];
        let mut carry: u64 = 0;
        for i in 0..8 {
            let sum = self.0[i] as u64 + other.0[i] as u64 + carry;
            out[i] = sum as u32;
            carry = sum >> 32;
        }
        if carry != 0 {
            None
        } else {
            Some(U256(out))
        }
    }

    pub fn checked_sub(&self, other: &U256) -> Option<U256> {
        if self.cmp(other) == Ordering::Less {
            return None;
        }
        let mut out = [0u32; 8];
        let mut borrow: i64 = 0;
        for i in 0..8 {
            let diff = self.0[i] as i64 - other.0[i] as i64 - borrow;
            if diff < 0 {
                out[i] = (diff + (1i64 << 32)) as u32;
                borrow = 1;
            } else {
                out[i] = diff as u32;
                borrow = 0;
            }
        }
        Some(U256(out))
    }

    /// Multiply by a `u64` scalar, saturating at `U256::MAX` on overflow.
    pub fn saturating_mul_u64(&self, scalar: u64) -> U256 {
        let mut out = [0u32; 8];
        let mut carry: u128 = 0;
        for i in 0..8 {
            let product = self.0[i] as u128 * scalar as u128 + carry;
            out[i] = product as u32;
            carry = product >> 32;
        }
        if carry != 0 {
            U256::MAX
        } else {
            U256(out)
        }
    }

    /// Divide by a `u64` scalar (schoolbook long division, limb by limb,
    /// most significant first). Returns `(quotient, remainder)`.
    pub fn div_rem_u64(&self, divisor: u64) -> (U256, u64) {
        assert!(divisor != 0, "division by zero");
        let mut quotient = [0u32; 8];
        let mut remainder: u128 = 0;
        for i in (0..8).rev() {
            let acc = (remainder << 32) | self.0[i] as u128;
            quotient[i] = (acc / divisor as u128) as u32;
            remainder = acc % divisor as u128;
        }
        (U256(quotient), remainder as u64)
    }

    /// `2^256 / target`, saturating to `U256::MAX` when `target` is zero
    /// (a target of zero is otherwise invalid and should be rejected before
    /// this is ever called).
    /// Full `U256 / U256` division, exposed for callers (the PPLNS
    /// accountant) that need to divide an accumulated weight by a total
    /// weight rather than by a `u64` scalar.
    pub fn div_rem(&self, divisor: &U256) -> (U256, U256) {
        div_u256_by_u256(self, divisor)
    }

    pub fn work_from_target(target: &U256) -> U256 {
        if target.is_zero() {
            return U256::MAX;
        }
        // 2^256 / target == ((2^256 - 1) / target) adjusted by at most one,
        // since 2^256 itself does not fit in U256. Using (MAX / target) is
        // an acceptable, standard approximation (off by at most one part in
        // target) used by every Bitcoin-derived work accumulator.
        let (q, _) = div_u256_by_u256(&U256::MAX, target);
        q
    }
}

fn div_u256_by_u256(numerator: &U256, divisor: &U256) -> (U256, U256) {
    if divisor.is_zero() {
        return (U256::MAX, U256::ZERO);
    }
    if numerator.cmp(divisor) == Ordering::Less {
        return (U256::ZERO, *numerator);
    }
    // Plain bit-by-bit long division; targets are compared infrequently
    // enough (once per share insert) that this need not be optimized.
    let mut remainder = U256::ZERO;
    let mut quotient = U256::ZERO;
    for bit in (0..256).rev() {
        remainder = shl1(&remainder);
        if test_bit(numerator, bit) {
            remainder.0[0] |= 1;
        }
        if remainder.cmp(divisor) != Ordering::Less {
            remainder = remainder.checked_sub(divisor).expect("remainder >= divisor");
            set_bit(&mut quotient, bit);
        }
    }
    (quotient, remainder)
}

fn shl1(value: &U256) -> U256 {
    let mut out = [0u32; 8];
    let mut carry = 0u32;
    for i in 0..8 {
        out[i] = (value.0[i] << 1) | carry;
        carry = value.0[i] >> 31;
    }
    U256(out)
}

fn test_bit(value: &U256, bit: usize) -> bool {
    (value.0[bit / 32] >> (bit % 32)) & 1 == 1
}

fn set_bit(value: &mut U256, bit: usize) {
    value.0[bit / 32] |= 1 << (bit % 32);
}

/// Compact "bits" encoding: a 1-byte exponent and 3-byte mantissa, same
/// convention as Bitcoin's `nBits`. `target = mantissa * 256^(exponent-3)`.
pub fn bits_to_target(bits: u32) -> U256 {
    let exponent = (bits >> 24) as i32;
    let mantissa = bits & 0x007f_ffff;
    if mantissa == 0 {
        return U256::ZERO;
    }
    let mut be = [0u8; 32];
    let shift = exponent - 3;
    if (0..=29).contains(&shift) {
        let start = 32 - 3 - shift as usize;
        be[start] = (mantissa >> 16) as u8;
        be[start + 1] = (mantissa >> 8) as u8;
        be[start + 2] = mantissa as u8;
    } else if shift < 0 && shift >= -3 {
        let drop = (-shift) as u32;
        let shifted = mantissa >> (8 * drop as u32);
        be[29] = (shifted >> 16) as u8;
        be[30] = (shifted >> 8) as u8;
        be[31] = shifted as u8;
    }
    U256::from_be_bytes(&be)
}

pub fn target_to_bits(target: &U256) -> u32 {
    let be = target.to_be_bytes();
    let mut first_nonzero = 32;
    for (i, b) in be.iter().enumerate() {
        if *b != 0 {
            first_nonzero = i;
            break;
        }
    }
    if first_nonzero == 32 {
        return 0;
    }
    let mut exponent = (32 - first_nonzero) as u32;
    let mut mantissa_bytes = [0u8; 3];
    if first_nonzero + 3 <= 32 {
        mantissa_bytes.copy_from_slice(&be[first_nonzero..first_nonzero + 3]);
    } else {
        let available = 32 - first_nonzero;
        mantissa_bytes[..available].copy_from_slice(&be[first_nonzero..]);
    }
    let mut mantissa =
        u32::from_be_bytes([0, mantissa_bytes[0], mantissa_bytes[1], mantissa_bytes[2]]);
    // Bitcoin's compact format reserves the mantissa's high bit as a sign
    // flag; if it would be set, shift right one byte and bump the exponent.
    if mantissa & 0x0080_0000 != 0 {
        mantissa >>= 8;
        exponent += 1;
    }
    (exponent << 24) | (mantissa & 0x007f_ffff)
}

/// Clamp `new_target` to within `factor_max`/`factor_min` of `prev_target`,
/// then to the network's `[min_target, max_target]` bounds. `max_step` is a
/// fraction in, e.g., 0.5 for ±50%, expressed as a (numerator, denominator)
/// integer ratio to stay off floating point.
pub fn clamp_retarget(
    new_target: U256,
    prev_target: U256,
    max_step_num: u64,
    max_step_den: u64,
    min_target: U256,
    max_target: U256,
) -> U256 {
    let upper = prev_target
        .saturating_mul_u64(max_step_den + max_step_num)
        .div_rem_u64(max_step_den)
        .0;
    let (lower_num, _) = prev_target.saturating_mul_u64(max_step_den).div_rem_u64(max_step_den + max_step_num);
    let lower = lower_num;
    let mut t = new_target;
    if t.cmp(&upper) == Ordering::Greater {
        t = upper;
    }
    if t.cmp(&lower) == Ordering::Less {
        t = lower;
    }
    if t.cmp(&max_target) == Ordering::Greater {
        t = max_target;
    }
    if t.cmp(&min_target) == Ordering::Less {
        t = min_target;
    }
    t
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bits_target_round_trip_bitcoin_genesis() {
        let bits = 0x1d00ffffu32;
        let target = bits_to_target(bits);
        let be = target.to_be_bytes();
        assert_eq!(be[3], 0xff);
        assert_eq!(be[4], 0xff);
        assert_eq!(target_to_bits(&target), bits);
    }

    #[test]
    fn work_from_target_decreases_as_target_grows() {
        let small = bits_to_target(0x1d00ffff);
        let large = bits_to_target(0x1f00ffff);
        assert_eq!(large.cmp(&small), Ordering::Greater);
        let work_small = U256::work_from_target(&small);
        let work_large = U256::work_from_target(&large);
        assert_eq!(work_small.cmp(&work_large), Ordering::Greater);
    }

    #[test]
    fn u256_add_sub_round_trip() {
        let a = U256([5, 0, 0, 0, 0, 0, 0, 0]);
        let b = U256([3, 0, 0, 0, 0, 0, 0, 0]);
        let sum = a.checked_add(&b).unwrap();
        assert_eq!(sum.checked_sub(&b).unwrap(), a);
    }

    #[test]
    fn div_rem_u64_matches_schoolbook_division() {
        let value = U256([100, 0, 0, 0, 0, 0, 0, 0]);
        let (q, r) = value.div_rem_u64(7);
        assert_eq!(q.0[0], 14);
        assert_eq!(r, 2);
    }

    #[test]
    fn clamp_retarget_enforces_max_step() {
        let prev = U256([1_000_000, 0, 0, 0, 0, 0, 0, 0]);
        let huge = U256([100_000_000, 0, 0, 0, 0, 0, 0, 0]);
        let clamped = clamp_retarget(huge, prev, 1, 2, U256::ZERO, U256::MAX);
        // +50% cap means result must not exceed prev * 3/2.
        let cap = prev.saturating_mul_u64(3).div_rem_u64(2).0;
        assert_eq!(clamped.cmp(&cap), Ordering::Equal);
    }
}
