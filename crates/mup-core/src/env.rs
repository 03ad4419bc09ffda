//! Environment abstraction.
//!
//! The engine never reads a clock or an RNG directly. Production wires these
//! to the system (tokio time, OS randomness); simulation wires them to a
//! virtual clock and a seeded generator so that runs are reproducible.

use std::{
    future::Future,
    time::{Duration, Instant},
};

use time::OffsetDateTime;

/// Source of time and randomness.
///
/// Implementations must be cheap to clone; clones share the same clock.
pub trait Environment: Clone + Send + Sync + 'static {
    /// Monotonic time, used for every deadline the engine tracks.
    fn now(&self) -> Instant;

    /// Wall-clock time, used only to stamp outbound envelopes.
    fn wall_clock(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }

    /// Sleep for `duration` on this environment's clock.
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;

    /// Fill `buffer` with random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);
}
