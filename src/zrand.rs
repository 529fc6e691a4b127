//! Pseudo-random number source for the `@random` opcode, per §4.6/§6.
//!
//! Two modes: predictable (seeded, for deterministic replay/testing) and
//! uniform (real gameplay). `@random` can reseed the generator at runtime
//! (negative operand reseeds with the magnitude, zero reseeds randomly),
//! so the generator is swappable in place rather than rebuilt.

use rand::{rngs::StdRng, Rng, RngCore, SeedableRng};

/// Controls random generator behavior: predictable for testing/replay, or
/// truly random for gameplay.
pub enum RandMode {
    Predictable,
    RandomUniform,
}

pub struct ZRand {
    rng: Box<dyn RngCore>,
    rand_mode: RandMode,
}

impl ZRand {
    pub fn new(rm: RandMode) -> ZRand {
        ZRand {
            rng: Box::new(rand::thread_rng()),
            rand_mode: rm,
        }
    }

    pub fn new_uniform() -> ZRand {
        ZRand::new(RandMode::RandomUniform)
    }

    pub fn new_predictable(seed: u64) -> ZRand {
        ZRand {
            rng: Box::new(StdRng::seed_from_u64(seed)),
            rand_mode: RandMode::Predictable,
        }
    }

    /// Generates an unsigned value in range [0..32768).
    pub fn gen_unsigned_rand(&mut self) -> u16 {
        // NOTE: This could probably be (u16::MAX + 1) / 2
        self.rng.gen_range(0..32768)
    }

    /// Generates a value in [1, range] inclusive, per `@random`'s positive
    /// operand contract. `range` of 0 is the caller's responsibility to
    /// route to `reseed_random` instead.
    pub fn gen_in_range(&mut self, range: u16) -> u16 {
        if range == 0 {
            return 0;
        }
        self.rng.gen_range(1..=range)
    }

    /// Reseeds deterministically (`@random` with a negative operand).
    pub fn reseed_predictable(&mut self, seed: u64) {
        self.rng = Box::new(StdRng::seed_from_u64(seed));
        self.rand_mode = RandMode::Predictable;
    }

    /// Reseeds from system entropy (`@random` with operand 0).
    pub fn reseed_random(&mut self) {
        self.rng = Box::new(rand::thread_rng());
        self.rand_mode = RandMode::RandomUniform;
    }

    pub fn is_predictable(&self) -> bool {
        matches!(self.rand_mode, RandMode::Predictable)
    }
}
