//! # casegraph-protocol
//!
//! Message shapes exchanged between casegraph and the remote service it
//! issues correlated requests to.
//!
//! This crate provides:
//! - Inbound reply parsing with structural validation
//! - Response format enumeration and its normalized signal names
//! - Outbound request envelope serialization

pub mod error;
pub mod message;

pub use error::ProtocolError;
pub use message::{AttachmentRef, InboundMessage, OutboundRequest, ReplyContent, ResponseFormat};

/// Queue outbound requests are published to.
pub const DEFAULT_REQUEST_QUEUE: &str = "smev3.queue";

/// Queue replies are expected on.
pub const DEFAULT_RESPONSE_QUEUE: &str = "case_core_smev3.response.queue";
