//! Deterministic pseudo-random source shared by both clients.
//!
//! Both sides of a duel must derive the same spawn food from the same seed,
//! so the generator is a fixed 32-bit linear congruential generator rather
//! than anything from `rand`.

/// 32-bit LCG: `seed' = seed * 1664525 + 1013904223 (mod 2^32)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lcg {
    seed: u32,
}

impl Lcg {
    pub fn new(seed: u32) -> Self {
        Self { seed }
    }

    /// Advances the generator and returns the new state.
    pub fn next_u32(&mut self) -> u32 {
        self.seed = self.seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        self.seed
    }

    /// Advances the generator and returns a value in `[0, max)`.
    ///
    /// `max` of zero yields zero without advancing.
    pub fn random_int(&mut self, max: u32) -> u32 {
        if max == 0 {
            return 0;
        }
        self.next_u32() % max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_sequence() {
        let mut rng = Lcg::new(0);
        assert_eq!(rng.next_u32(), 1_013_904_223);
        assert_eq!(rng.next_u32(), 1_196_435_762);
    }

    #[test]
    fn test_wraps_modulo_2_pow_32() {
        let mut rng = Lcg::new(u32::MAX);
        let expected = (u32::MAX as u64 * 1_664_525 + 1_013_904_223) % (1u64 << 32);
        assert_eq!(rng.next_u32() as u64, expected);
    }

    #[test]
    fn test_random_int_bounds() {
        let mut rng = Lcg::new(42);
        for _ in 0..1_000 {
            assert!(rng.random_int(20) < 20);
        }
        assert_eq!(rng.random_int(0), 0);
    }
}
