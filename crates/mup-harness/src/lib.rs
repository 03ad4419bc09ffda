//! Deterministic simulation harness for MUP client testing.
//!
//! Turmoil-based implementations of the Environment and Channel traits for
//! deterministic, reproducible testing under various network conditions,
//! plus a manually clocked environment for driving the sans-IO engine
//! directly and a scripted server that speaks the protocol.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod manual_env;
pub mod sim_channel;
pub mod sim_env;
pub mod sim_server;

pub use manual_env::ManualEnv;
pub use sim_channel::SimChannel;
pub use sim_env::SimEnv;
pub use sim_server::{ServerScript, SimServer};
