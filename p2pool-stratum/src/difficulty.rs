//! Per-connection difficulty <-> target conversions. A stratum "difficulty"
//! is a multiplier over a base (difficulty-1) target; the submission
//! pipeline (C7) needs the resulting target to compare a submitted header's
//! proof-of-work value against.

use p2pool_core::target::U256;

/// `target = base_target / difficulty`, clamped so a difficulty below 1
/// (or non-finite) never produces a target above the base itself.
pub fn difficulty_to_target(difficulty: f64, base_target: &U256) -> U256 {
    if !difficulty.is_finite() || difficulty <= 1.0 {
        return *base_target;
    }
    // U256 division only takes integer divisors; truncating the difficulty
    // to an integer scalar is an acceptable approximation at the precision
    // stratum difficulties are actually set (spec.md never specifies
    // fractional-difficulty precision requirements).
    let divisor = difficulty.floor().max(1.0) as u64;
    let (target, _) = base_target.div_rem_u64(divisor);
    target
}

#[cfg(test)]
mod tests {
    use super::*;
    use p2pool_core::target::bits_to_target;

    #[test]
    fn difficulty_one_returns_base_target() {
        let base = bits_to_target(0x1d00ffff);
        assert_eq!(difficulty_to_target(1.0, &base).cmp(&base), std::cmp::Ordering::Equal);
    }

    #[test]
    fn higher_difficulty_yields_smaller_target() {
        let base = bits_to_target(0x1d00ffff);
        let harder = difficulty_to_target(1024.0, &base);
        assert_eq!(harder.cmp(&base), std::cmp::Ordering::Less);
    }
}
