//! Manually clocked environment.
//!
//! For driving the engine without any runtime: time only moves when a test
//! calls [`ManualEnv::advance`], and `sleep` advances the clock instead of
//! waiting.

use std::{
    future::{self, Future},
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, Instant},
};

use mup_core::env::Environment;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Environment whose clock is advanced explicitly.
///
/// Clones share the clock.
#[derive(Clone)]
pub struct ManualEnv {
    clock: Arc<Mutex<Instant>>,
    rng: Arc<Mutex<ChaCha8Rng>>,
}

impl ManualEnv {
    /// Environment with seed 0.
    pub fn new() -> Self {
        Self::with_seed(0)
    }

    /// Environment with the given RNG seed.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            clock: Arc::new(Mutex::new(Instant::now())),
            rng: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed))),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        *self.clock.lock().unwrap_or_else(PoisonError::into_inner) += by;
    }

    /// Move the clock forward to `to`; earlier instants are ignored.
    pub fn advance_to(&self, to: Instant) {
        let mut clock = self.clock.lock().unwrap_or_else(PoisonError::into_inner);
        if to > *clock {
            *clock = to;
        }
    }
}

impl Default for ManualEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment for ManualEnv {
    fn now(&self) -> Instant {
        *self.clock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send {
        self.advance(duration);
        future::ready(())
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner).fill_bytes(buffer);
    }
}
