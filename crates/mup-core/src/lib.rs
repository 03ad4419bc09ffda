//! Model UI Protocol client core
//!
//! Pure state machine logic for a client that keeps a live session with a
//! UI-driving server, completely decoupled from I/O.
//!
//! # Architecture
//!
//! The [`Engine`] is a deterministic state machine. It never touches a socket,
//! a timer or a task: time and randomness come from an [`env::Environment`],
//! channel activity is fed in as [`transport::ChannelEvent`]s, and every entry
//! point returns [`EngineAction`]s describing the effects to perform (open the
//! channel, send a frame, close, settle a caller's continuation). A runtime
//! executes the actions and sleeps until [`Engine::next_deadline`] to drive
//! [`Engine::tick`].
//!
//! # Components
//!
//! - [`reconnect`]: connection state machine and exponential backoff
//! - [`handshake`]: capability negotiation and session identity
//! - [`correlation`]: outstanding requests keyed by message id
//! - [`tree`]: component tree with id-indexed lookup and positional patches
//! - [`dispatch`]: UI intents out, component updates and session events in
//! - [`metrics`]: message counters, latency and uptime
//! - [`render`]: renderer collaborator interface
//! - [`mod@env`]: environment abstraction (time, RNG)
//! - [`transport`]: duplex channel abstraction
//! - [`error`]: error types

pub mod config;
pub mod correlation;
pub mod dispatch;
pub mod engine;
pub mod env;
pub mod error;
pub mod handshake;
pub mod metrics;
pub mod reconnect;
pub mod render;
pub mod transport;
pub mod tree;

pub use config::EngineConfig;
pub use engine::{Engine, EngineAction, Submission};
pub use error::{ConnectionError, EngineError, PatchError, RequestError, TreeError};
