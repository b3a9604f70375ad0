//! Division by a run-time invariant through multiplication.
//!
//! For a divisor `d` fixed at cache creation, [`Reciprocal::new`] computes a
//! multiplier and two shifts such that [`Reciprocal::divide`] returns exactly
//! `a / d` for every `u32` dividend, without a hardware divide on the hot
//! path.

/// Precomputed reciprocal of a 32-bit divisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reciprocal {
    m: u32,
    sh1: u8,
    sh2: u8,
}

impl Reciprocal {
    /// Reciprocal of `d`. Returns `None` for zero.
    #[must_use]
    pub const fn new(d: u32) -> Option<Self> {
        if d == 0 {
            return None;
        }
        // l = ceil(log2(d))
        let l = if d == 1 { 0 } else { 32 - (d - 1).leading_zeros() };
        let m = ((1u64 << 32) * ((1u64 << l) - d as u64)) / d as u64 + 1;
        let sh1 = if l < 1 { l } else { 1 };
        let sh2 = if l > 0 { l - 1 } else { 0 };
        Some(Self {
            m: m as u32,
            sh1: sh1 as u8,
            sh2: sh2 as u8,
        })
    }

    /// `a / d`.
    #[inline]
    #[must_use]
    pub const fn divide(self, a: u32) -> u32 {
        let t = ((a as u64 * self.m as u64) >> 32) as u32;
        (t + ((a - t) >> self.sh1)) >> self.sh2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_has_no_reciprocal() {
        assert!(Reciprocal::new(0).is_none());
    }

    #[test]
    fn matches_division_for_small_divisors() {
        for d in 1..=2048u32 {
            let r = Reciprocal::new(d).unwrap();
            for a in (0..65_536u32).step_by(7).chain([u32::MAX, u32::MAX - 1, d, d - 1]) {
                assert_eq!(r.divide(a), a / d, "{a} / {d}");
            }
        }
    }

    #[test]
    fn matches_division_at_boundaries() {
        let divisors = [3, 7, 24, 96, 192, 640, 1000, 4096, 65_535, 1 << 20, u32::MAX];
        for d in divisors {
            let r = Reciprocal::new(d).unwrap();
            for k in [0u32, 1, 2, 3, 100, 4096] {
                let base = d.saturating_mul(k);
                for a in [base.saturating_sub(1), base, base.saturating_add(1)] {
                    assert_eq!(r.divide(a), a / d, "{a} / {d}");
                }
            }
        }
    }

    #[test]
    fn power_of_two_is_a_shift() {
        let r = Reciprocal::new(64).unwrap();
        assert_eq!(r.divide(4095), 63);
        assert_eq!(r.divide(4096), 64);
    }
}
