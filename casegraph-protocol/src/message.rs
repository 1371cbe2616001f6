//! JSON message shapes for correlated requests and their replies.
//!
//! An inbound reply looks like:
//!
//! ```json
//! {
//!   "id": "2f7c0c6e-6a55-4a8e-9d2c-0c1f6f0e8d11",
//!   "format": "RESPONSE",
//!   "content": { "special_data": "<payload>" },
//!   "attachments": [ { "fs_id": "blob-1", "mime_type": "application/pdf", "filename": "result.pdf" }, null ]
//! }
//! ```

use crate::error::ProtocolError;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Kind of reply received for a correlated request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseFormat {
    Exception,
    Rejection,
    Response,
}

impl ResponseFormat {
    pub const ALL: [ResponseFormat; 3] = [
        ResponseFormat::Exception,
        ResponseFormat::Rejection,
        ResponseFormat::Response,
    ];

    /// Wire name, as carried in the `format` field.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseFormat::Exception => "EXCEPTION",
            ResponseFormat::Rejection => "REJECTION",
            ResponseFormat::Response => "RESPONSE",
        }
    }

    /// Normalized (lowercase) signal name used in edge keys.
    pub fn signal(&self) -> &'static str {
        match self {
            ResponseFormat::Exception => "exception",
            ResponseFormat::Rejection => "rejection",
            ResponseFormat::Response => "response",
        }
    }
}

impl fmt::Display for ResponseFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResponseFormat {
    type Err = ProtocolError;

    /// Accepts both the wire name and the lowercase signal name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResponseFormat::ALL
            .into_iter()
            .find(|f| f.as_str() == s || f.signal() == s)
            .ok_or_else(|| ProtocolError::UnknownFormat(s.to_string()))
    }
}

/// Reply payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyContent {
    pub special_data: String,
}

/// Reference to a file produced by the remote side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRef {
    /// Storage reference of the file body.
    pub fs_id: String,

    /// Dropped when not a string.
    #[serde(
        default,
        deserialize_with = "string_or_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub mime_type: Option<String>,

    /// Dropped when not a string.
    #[serde(
        default,
        deserialize_with = "string_or_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub filename: Option<String>,
}

fn string_or_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        _ => None,
    })
}

/// A reply to a correlated request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Correlation token of the original request.
    pub id: String,

    pub format: ResponseFormat,

    pub content: ReplyContent,

    /// Attachment descriptors; `null` entries are allowed and ignored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<Option<AttachmentRef>>>,
}

impl InboundMessage {
    /// Parses and structurally validates a raw message body.
    pub fn parse(body: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(body)?;
        Self::from_value(value)
    }

    /// Structurally validates an already decoded JSON value.
    pub fn from_value(value: Value) -> Result<Self, ProtocolError> {
        if !value.is_object() {
            return Err(ProtocolError::SchemaViolation {
                reason: "message body must be a JSON object".to_string(),
            });
        }

        serde_json::from_value(value).map_err(|e| ProtocolError::SchemaViolation {
            reason: e.to_string(),
        })
    }

    /// Iterates over the non-null attachment descriptors.
    pub fn attachments(&self) -> impl Iterator<Item = &AttachmentRef> {
        self.attachments.iter().flatten().flatten()
    }
}

/// Outbound request published when a case dispatches a correlated call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundRequest {
    /// Queue the reply is expected on.
    pub queue: String,

    /// Correlation token.
    pub id: String,

    /// Request payload fields.
    pub content: Map<String, Value>,
}

impl OutboundRequest {
    pub fn new(queue: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            id: id.into(),
            content: Map::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.content.insert(key.into(), value.into());
        self
    }

    /// Serializes the request to its wire form.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}
