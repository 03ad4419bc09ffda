//! Session metrics.
//!
//! Counters are cumulative for the lifetime of the engine. Uptime accumulates
//! only while the session is `Ready`.

use std::time::{Duration, Instant};

use serde::Serialize;

/// Point-in-time copy of the metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Envelopes written to the channel
    pub messages_sent: u64,
    /// Envelopes decoded from the channel
    pub messages_received: u64,
    /// Inbound frames dropped as malformed
    pub frames_dropped: u64,
    /// Request/reply round trip of the most recent correlated reply
    pub last_latency: Option<Duration>,
    /// Total time spent `Ready`
    pub uptime: Duration,
    /// Reconnects scheduled after unplanned losses
    pub reconnects: u64,
}

/// Accumulates [`MetricsSnapshot`] fields.
#[derive(Debug, Clone, Default)]
pub struct MetricsRecorder {
    snapshot: MetricsSnapshot,
    ready_since: Option<Instant>,
}

impl MetricsRecorder {
    /// Zeroed recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// An envelope was sent.
    pub fn record_sent(&mut self) {
        self.snapshot.messages_sent += 1;
    }

    /// A counted envelope could not be written after all.
    pub fn record_send_failed(&mut self) {
        self.snapshot.messages_sent = self.snapshot.messages_sent.saturating_sub(1);
    }

    /// An envelope was received.
    pub fn record_received(&mut self) {
        self.snapshot.messages_received += 1;
    }

    /// An inbound frame was dropped.
    pub fn record_dropped(&mut self) {
        self.snapshot.frames_dropped += 1;
    }

    /// A correlated reply arrived after `latency`.
    pub fn record_latency(&mut self, latency: Duration) {
        self.snapshot.last_latency = Some(latency);
    }

    /// A reconnect was scheduled.
    pub fn record_reconnect(&mut self) {
        self.snapshot.reconnects += 1;
    }

    /// The session became `Ready`.
    pub fn mark_ready(&mut self, now: Instant) {
        self.ready_since.get_or_insert(now);
    }

    /// The session left `Ready`.
    pub fn mark_down(&mut self, now: Instant) {
        if let Some(since) = self.ready_since.take() {
            self.snapshot.uptime += now.saturating_duration_since(since);
        }
    }

    /// Current values, with uptime counted up to `now`.
    pub fn snapshot(&self, now: Instant) -> MetricsSnapshot {
        let mut snapshot = self.snapshot;
        if let Some(since) = self.ready_since {
            snapshot.uptime += now.saturating_duration_since(since);
        }
        snapshot
    }
}
