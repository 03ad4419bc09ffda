//! Outstanding request tracking.
//!
//! Every request that expects a reply is registered here under its message
//! id together with an opaque continuation `C` supplied by the caller (a
//! oneshot sender in the async runtime, a plain tag in tests). The engine
//! removes an entry exactly once: on the first reply carrying its id, on
//! timeout, on connection loss, on send failure or on cancellation. Whoever
//! removes it settles the continuation, so no continuation is settled twice
//! and none is leaked.

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use mup_proto::MessageId;

/// What a pending request asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// `capability_query`
    CapabilityQuery,
    /// `batch_operation`
    BatchOperation,
    /// `event_notification` sent with a reply expected
    EventNotification,
}

/// One outstanding request.
#[derive(Debug)]
pub struct PendingRequest<C> {
    /// Correlation key
    pub message_id: MessageId,
    /// What was asked
    pub kind: RequestKind,
    /// When the request was sent
    pub issued_at: Instant,
    /// When it times out
    pub deadline: Instant,
    /// Caller's continuation, settled by whoever removes the entry
    pub continuation: C,
}

impl<C> PendingRequest<C> {
    /// Time the request was allowed to wait.
    pub fn timeout(&self) -> Duration {
        self.deadline.saturating_duration_since(self.issued_at)
    }
}

/// Outstanding requests keyed by message id.
#[derive(Debug)]
pub struct CorrelationTable<C> {
    pending: HashMap<MessageId, PendingRequest<C>>,
}

impl<C> Default for CorrelationTable<C> {
    fn default() -> Self {
        Self { pending: HashMap::new() }
    }
}

impl<C> CorrelationTable<C> {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request.
    ///
    /// # Errors
    ///
    /// Hands the continuation back if `message_id` is already outstanding.
    pub fn register(
        &mut self,
        message_id: MessageId,
        kind: RequestKind,
        now: Instant,
        timeout: Duration,
        continuation: C,
    ) -> Result<(), C> {
        if self.pending.contains_key(&message_id) {
            return Err(continuation);
        }
        let request = PendingRequest {
            message_id: message_id.clone(),
            kind,
            issued_at: now,
            deadline: now + timeout,
            continuation,
        };
        self.pending.insert(message_id, request);
        Ok(())
    }

    /// Remove the request a reply answers.
    pub fn resolve(&mut self, message_id: &MessageId) -> Option<PendingRequest<C>> {
        self.pending.remove(message_id)
    }

    /// Remove a request the caller gave up on.
    pub fn cancel(&mut self, message_id: &MessageId) -> Option<PendingRequest<C>> {
        self.pending.remove(message_id)
    }

    /// Remove every request whose deadline is at or before `now`, oldest
    /// deadline first.
    pub fn expire(&mut self, now: Instant) -> Vec<PendingRequest<C>> {
        let expired: Vec<MessageId> = self
            .pending
            .values()
            .filter(|request| request.deadline <= now)
            .map(|request| request.message_id.clone())
            .collect();
        let mut requests: Vec<PendingRequest<C>> =
            expired.iter().filter_map(|id| self.pending.remove(id)).collect();
        requests.sort_by(|a, b| {
            a.deadline.cmp(&b.deadline).then_with(|| a.message_id.cmp(&b.message_id))
        });
        requests
    }

    /// Remove every request, oldest first, so the caller can reject them
    /// all (the connection is gone).
    pub fn reject_all(&mut self) -> Vec<PendingRequest<C>> {
        let mut requests: Vec<PendingRequest<C>> = self.pending.drain().map(|(_, r)| r).collect();
        requests.sort_by(|a, b| {
            a.issued_at.cmp(&b.issued_at).then_with(|| a.message_id.cmp(&b.message_id))
        });
        requests
    }

    /// Earliest deadline among outstanding requests.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|request| request.deadline).min()
    }

    /// Whether `message_id` is outstanding.
    #[must_use]
    pub fn contains(&self, message_id: &MessageId) -> bool {
        self.pending.contains_key(message_id)
    }

    /// Number of outstanding requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is outstanding.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
