//! Wire format for the Model UI Protocol.
//!
//! Every message travels as a single JSON text frame. The frame wraps an
//! [`Envelope`] in a top-level `mup` object; the envelope carries the protocol
//! version, a [`MessageType`] tag, a [`MessageId`] used for correlation, an
//! RFC 3339 timestamp and a payload whose shape depends on the tag.
//!
//! The envelope keeps its payload as raw JSON so that routing and correlation
//! never have to understand a payload. [`Payload`] gives the typed view when a
//! handler needs one.
//!
//! # Component model
//!
//! The server describes the UI as a tree of [`ComponentNode`]s. Full snapshots
//! replace the tree; [`PatchOperation`]s edit it positionally, addressed by a
//! [`Path`] of child indices or child ids.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod envelope;
pub mod errors;
pub mod message_type;
pub mod payloads;

pub use envelope::{Envelope, MessageId, PROTOCOL_VERSION};
pub use errors::{ProtocolError, Result};
pub use message_type::MessageType;
pub use payloads::{
    Payload,
    component::{ComponentNode, ComponentType, EventBinding},
    patch::{Path, PathSegment, PatchKind, PatchOperation},
    update::{BatchOutcome, ComponentUpdate},
};
