//! Capability negotiation.
//!
//! Every time the channel opens the client announces itself with a
//! `handshake_request` (client info, declared capabilities, user and session
//! context) and waits for the server's `handshake_response`, which assigns a
//! client id and advertises server capabilities. The session identity lives
//! until the channel is lost; a reconnect repeats the exchange with the same
//! context.

use std::time::{Duration, Instant};

use mup_proto::payloads::session::{
    ClientInfo, HandshakeRequest, HandshakeResponse, ServerInfo, SessionContext,
};
use serde_json::{Map, Value};

/// Server-assigned session identity.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    /// Identifier the server assigned to this client
    pub client_id: String,
    /// Capabilities advertised by the server
    pub capabilities: Map<String, Value>,
    /// Server identification
    pub server_info: ServerInfo,
    /// Server-side session details
    pub session_info: Value,
}

impl From<HandshakeResponse> for Session {
    fn from(response: HandshakeResponse) -> Self {
        Self {
            client_id: response.client_id,
            capabilities: response.capabilities,
            server_info: response.server_info,
            session_info: response.session_info,
        }
    }
}

/// Handshake driver.
#[derive(Debug, Clone)]
pub struct Negotiator {
    client_info: ClientInfo,
    context: SessionContext,
    timeout: Duration,
    deadline: Option<Instant>,
    session: Option<Session>,
}

impl Negotiator {
    /// Create a negotiator for this client and context.
    pub fn new(client_info: ClientInfo, context: SessionContext, timeout: Duration) -> Self {
        Self { client_info, context, timeout, deadline: None, session: None }
    }

    /// Build the request for a freshly opened channel and arm the handshake
    /// deadline.
    pub fn start(&mut self, now: Instant) -> HandshakeRequest {
        self.session = None;
        self.deadline = Some(now + self.timeout);
        HandshakeRequest { client_info: self.client_info.clone(), context: self.context.clone() }
    }

    /// Record the server's response.
    pub fn complete(&mut self, response: HandshakeResponse) -> &Session {
        self.deadline = None;
        self.session.insert(Session::from(response))
    }

    /// Whether an armed handshake has run past its deadline.
    #[must_use]
    pub fn expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| now >= deadline)
    }

    /// Armed handshake deadline.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Forget the session and any armed deadline.
    pub fn clear(&mut self) {
        self.deadline = None;
        self.session = None;
    }

    /// Current session, if the handshake completed on the live channel.
    #[must_use]
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn negotiator() -> Negotiator {
        Negotiator::new(
            ClientInfo::default(),
            SessionContext::new("user_1", "session_1"),
            Duration::from_secs(30),
        )
    }

    #[test]
    fn request_carries_client_and_context() {
        let t0 = Instant::now();
        let mut negotiator = negotiator();
        let request = negotiator.start(t0);

        let raw = serde_json::to_value(&request).unwrap();
        assert_eq!(raw["client_info"]["name"], "mup-client");
        assert_eq!(raw["client_info"]["capabilities"]["max_component_depth"], 10);
        assert_eq!(raw["context"]["session_id"], "session_1");
        assert_eq!(negotiator.deadline(), Some(t0 + Duration::from_secs(30)));
    }

    #[test]
    fn completion_stores_session_and_disarms() {
        let t0 = Instant::now();
        let mut negotiator = negotiator();
        negotiator.start(t0);

        let response: HandshakeResponse = serde_json::from_value(json!({
            "client_id": "client_42",
            "capabilities": { "components": { "form": "2.0.0" } },
            "server_info": { "name": "MUP Server v2", "version": "2.0.0" }
        }))
        .unwrap();
        let session = negotiator.complete(response);

        assert_eq!(session.client_id, "client_42");
        assert_eq!(session.server_info.name, "MUP Server v2");
        assert!(!negotiator.expired(t0 + Duration::from_secs(60)));
    }

    #[test]
    fn expiry_and_clear() {
        let t0 = Instant::now();
        let mut negotiator = negotiator();
        negotiator.start(t0);

        assert!(!negotiator.expired(t0 + Duration::from_secs(29)));
        assert!(negotiator.expired(t0 + Duration::from_secs(30)));

        negotiator.clear();
        assert!(!negotiator.expired(t0 + Duration::from_secs(30)));
        assert!(negotiator.session().is_none());
    }
}
