//! Kernel entropy source.
//!
//! A small mixing generator (xorshift* core) seeded at boot and stirred
//! with timing on every extraction. Not cryptographic by itself; the
//! contract is that `getentropy` returns bytes that never repeat across
//! calls and boots with different seeds.

use muon_core::sync::SpinLock;

/// The kernel entropy pool.
pub struct EntropyPool {
    state: SpinLock<u64>,
}

impl EntropyPool {
    /// Creates a pool from a boot seed.
    pub const fn new(seed: u64) -> Self {
        Self {
            // A zero state would lock the generator at zero.
            state: SpinLock::new(if seed == 0 { 0x9E37_79B9_7F4A_7C15 } else { seed }),
        }
    }

    /// Stirs additional unpredictability into the pool.
    pub fn mix(&self, sample: u64) {
        let mut state = self.state.lock();
        *state ^= sample.wrapping_mul(0x2545_F491_4F6C_DD1D);
        if *state == 0 {
            *state = 0x9E37_79B9_7F4A_7C15;
        }
    }

    fn next(&self) -> u64 {
        let mut state = self.state.lock();
        let mut x = *state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        *state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    /// Fills `out` with generator output.
    pub fn fill(&self, out: &mut [u8]) {
        for chunk in out.chunks_mut(8) {
            let word = self.next().to_le_bytes();
            chunk.copy_from_slice(&word[..chunk.len()]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_is_not_constant() {
        let pool = EntropyPool::new(42);
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        pool.fill(&mut a);
        pool.fill(&mut b);
        assert_ne!(a, b);
        assert_ne!(a, [0u8; 32]);
    }

    #[test]
    fn zero_seed_is_rescued() {
        let pool = EntropyPool::new(0);
        let mut out = [0u8; 8];
        pool.fill(&mut out);
        assert_ne!(out, [0u8; 8]);
    }

    #[test]
    fn mixing_changes_the_stream() {
        let a = EntropyPool::new(7);
        let b = EntropyPool::new(7);
        b.mix(0x1234);
        let mut out_a = [0u8; 16];
        let mut out_b = [0u8; 16];
        a.fill(&mut out_a);
        b.fill(&mut out_b);
        assert_ne!(out_a, out_b);
    }
}
