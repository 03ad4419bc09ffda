//! Duplex text channel abstraction.
//!
//! The protocol rides on a message-oriented channel carrying one JSON text
//! frame per message. Production uses a WebSocket; tests run the same
//! WebSocket framing over a simulated TCP network.

use std::io;

use async_trait::async_trait;

/// Something that happened on the channel.
///
/// The engine consumes these through [`crate::Engine::handle_channel_event`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Channel is open and may carry frames
    Opened,
    /// Inbound text frame
    Message(String),
    /// Peer or network closed the channel
    Closed {
        /// Close code (1000 for normal closure, 1006 when no close frame was seen)
        code: u16,
        /// Close reason supplied by the peer
        reason: String,
    },
    /// Channel failed; a `Closed` may or may not follow
    Error(String),
}

/// Close code for a normal, requested closure.
pub const CLOSE_NORMAL: u16 = 1000;

/// Close code reported when the channel dropped without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Factory for channel connections.
#[async_trait]
pub trait Channel: Send + Sync + 'static {
    /// An open connection.
    type Connection: ChannelConnection;

    /// Open a connection to `url`.
    ///
    /// Resolves once the channel is ready to carry frames.
    async fn open(&self, url: &str) -> io::Result<Self::Connection>;
}

/// An open duplex text channel.
///
/// `recv` must be cancel-safe: a runtime polls it inside `select!` alongside
/// timers and commands, and a dropped `recv` future must not lose a frame.
#[async_trait]
pub trait ChannelConnection: Send + 'static {
    /// Send one text frame.
    async fn send(&mut self, frame: String) -> io::Result<()>;

    /// Next event from the channel.
    ///
    /// Returns `None` once the channel is finished and every event, including
    /// the final `Closed`, has been delivered.
    async fn recv(&mut self) -> Option<ChannelEvent>;

    /// Close the channel with a code and reason.
    async fn close(&mut self, code: u16, reason: &str);
}
