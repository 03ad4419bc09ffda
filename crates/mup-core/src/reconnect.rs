//! Connection lifecycle and reconnect policy.
//!
//! # State Machine
//!
//! ```text
//! ┌──────────────┐ connect ┌────────────┐ opened ┌─────────────┐ response ┌───────┐
//! │ Disconnected │────────>│ Connecting │───────>│ Handshaking │─────────>│ Ready │
//! └──────────────┘         └────────────┘        └─────────────┘          └───────┘
//!        ^                       │                      │                     │
//!        │                       └──────────────────────┴─────────────────────┘
//!        │                                   close / error / timeout
//!        └──────────── backoff elapsed: back to Connecting ─────────────────┘
//! ```
//!
//! # Backoff
//!
//! Each unplanned loss increments the attempt counter and schedules a retry
//! after `base_delay * 2^(attempt - 1)`: 1 s, 2 s, 4 s, 8 s, 16 s with the
//! defaults. Once the counter has reached `max_attempts` the next loss gives
//! up instead. Reaching `Ready` resets the counter; an explicit connect starts
//! a fresh budget. Explicit disconnects never schedule a retry.

use std::time::{Duration, Instant};

use crate::error::ConnectionError;

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No channel; a retry may be scheduled
    Disconnected,
    /// Channel open requested
    Connecting,
    /// Channel open, `handshake_request` sent
    Handshaking,
    /// Handshake complete; requests and events may flow
    Ready,
}

/// Retry budget and backoff base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Retries allowed since the last successful handshake
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on every further attempt
    pub base_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { max_attempts: 5, base_delay: Duration::from_millis(1000) }
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay.saturating_mul(1u32 << exponent)
    }
}

/// Outcome of an unplanned connection loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// A retry is scheduled
    Retry {
        /// Attempt number of the scheduled retry
        attempt: u32,
        /// Time until it fires
        delay: Duration,
    },
    /// Budget exhausted; no retry will happen
    GiveUp {
        /// Attempts made
        attempts: u32,
    },
}

/// Connection state machine with reconnect scheduling.
///
/// Pure: time is passed in, and the pending retry is exposed as a deadline
/// that the owner polls with [`ReconnectController::poll_retry`].
#[derive(Debug, Clone)]
pub struct ReconnectController {
    state: ConnectionState,
    policy: ReconnectPolicy,
    attempts: u32,
    retry_at: Option<Instant>,
}

impl ReconnectController {
    /// Create a controller in `Disconnected`.
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self { state: ConnectionState::Disconnected, policy, attempts: 0, retry_at: None }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Retries made since the last successful handshake.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// When the scheduled retry fires, if one is scheduled.
    #[must_use]
    pub fn retry_at(&self) -> Option<Instant> {
        self.retry_at
    }

    /// Explicit connect: start a fresh retry budget and move to `Connecting`.
    ///
    /// # Errors
    ///
    /// `InvalidState` unless `Disconnected`.
    pub fn begin_connect(&mut self) -> Result<(), ConnectionError> {
        self.require(ConnectionState::Disconnected, "connect")?;
        self.attempts = 0;
        self.retry_at = None;
        self.state = ConnectionState::Connecting;
        Ok(())
    }

    /// Channel opened: move to `Handshaking`.
    ///
    /// # Errors
    ///
    /// `InvalidState` unless `Connecting`.
    pub fn channel_opened(&mut self) -> Result<(), ConnectionError> {
        self.require(ConnectionState::Connecting, "channel_opened")?;
        self.state = ConnectionState::Handshaking;
        Ok(())
    }

    /// Handshake accepted: move to `Ready` and reset the retry budget.
    ///
    /// # Errors
    ///
    /// `InvalidState` unless `Handshaking`.
    pub fn handshake_completed(&mut self) -> Result<(), ConnectionError> {
        self.require(ConnectionState::Handshaking, "handshake_completed")?;
        self.attempts = 0;
        self.state = ConnectionState::Ready;
        Ok(())
    }

    /// Unplanned loss of the channel.
    ///
    /// Returns `None` when already `Disconnected`: a failing channel often
    /// reports both an error and a close, and only the first one counts.
    pub fn connection_lost(&mut self, now: Instant) -> Option<ReconnectDecision> {
        if self.state == ConnectionState::Disconnected {
            return None;
        }
        self.state = ConnectionState::Disconnected;

        if self.attempts >= self.policy.max_attempts {
            self.retry_at = None;
            return Some(ReconnectDecision::GiveUp { attempts: self.attempts });
        }

        self.attempts += 1;
        let delay = self.policy.delay_for_attempt(self.attempts);
        self.retry_at = Some(now + delay);
        Some(ReconnectDecision::Retry { attempt: self.attempts, delay })
    }

    /// Explicit disconnect: cancel any scheduled retry.
    ///
    /// Returns whether a channel was live (anything but `Disconnected`).
    pub fn shutdown(&mut self) -> bool {
        let was_live = self.state != ConnectionState::Disconnected;
        self.state = ConnectionState::Disconnected;
        self.retry_at = None;
        was_live
    }

    /// Fire the scheduled retry if its deadline has passed.
    ///
    /// Returns `true` when the caller should open a new channel; the state is
    /// then `Connecting`.
    pub fn poll_retry(&mut self, now: Instant) -> bool {
        match self.retry_at {
            Some(at) if now >= at => {
                self.retry_at = None;
                self.state = ConnectionState::Connecting;
                true
            },
            _ => false,
        }
    }

    fn require(&self, state: ConnectionState, operation: &'static str) -> Result<(), ConnectionError> {
        if self.state == state {
            Ok(())
        } else {
            Err(ConnectionError::InvalidState { state: self.state, operation })
        }
    }
}
