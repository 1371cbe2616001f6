//! Core error types.

use thiserror::Error;

/// Errors reported by case collaborator ports.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("case not found: {case_id}")]
    CaseNotFound { case_id: String },

    #[error("request not found: {request_id}")]
    RequestNotFound { request_id: String },

    #[error("blob not found: {reference}")]
    BlobNotFound { reference: String },

    #[error("store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("transport error: {reason}")]
    Transport { reason: String },
}

impl StoreError {
    /// Returns whether this error indicates the operation can be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::Unavailable { .. } | StoreError::Transport { .. }
        )
    }
}

/// Typed business reason attached to an edge, raised when its guard rejects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuardFailure {
    /// Stable identifier, e.g. `pending_packaging`.
    pub code: &'static str,
    /// Human readable explanation.
    pub reason: &'static str,
}

impl GuardFailure {
    pub const fn new(code: &'static str, reason: &'static str) -> Self {
        Self { code, reason }
    }
}

/// Errors from the transition engines.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid case handle: {reason}")]
    InvalidCase { reason: String },

    #[error("transition parameters must be a JSON object, got {kind}")]
    InvalidParams { kind: String },

    #[error("message does not match the reply schema: {reason}")]
    SchemaViolation { reason: String },

    #[error("case {case_id} has type '{actual}', expected '{expected}'")]
    InvalidCaseType {
        case_id: String,
        expected: String,
        actual: String,
    },

    #[error("case not found: {case_id}")]
    CaseNotFound { case_id: String },

    #[error("no request found for correlation token '{token}'")]
    RequestNotFound { token: String },

    #[error("unsupported transition of case {case_id} from '{from}' to '{to}'")]
    UnsupportedTransition {
        case_id: String,
        from: String,
        to: String,
    },

    #[error("no transition of case {case_id} from '{from}' on signal '{signal}'")]
    NoTransitionForSignal {
        case_id: String,
        from: String,
        signal: String,
    },

    #[error("no guard satisfied for case {case_id} in '{from}' on signal '{signal}'")]
    NoApplicableEdge {
        case_id: String,
        from: String,
        signal: String,
    },

    #[error("cannot move case {case_id} from '{from}' to '{to}' ({code}): {reason}")]
    GuardRejected {
        case_id: String,
        from: String,
        to: String,
        code: &'static str,
        reason: &'static str,
    },

    #[error("malformed edge definition: {reason}")]
    MalformedEdgeDefinition { reason: String },

    #[error("invalid guard expression: {reason}")]
    InvalidGuard { reason: String },

    #[error("duplicate edge: {key}")]
    DuplicateEdge { key: String },

    #[error("attachment error: {reason}")]
    Attachment { reason: String },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("callback failed: {reason}")]
    Callback { reason: String },
}

impl CoreError {
    /// Returns whether this error indicates the operation can be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::Store(e) if e.is_retryable())
    }

    /// Returns the typed guard failure code, if this is a guard rejection.
    pub fn guard_failure_code(&self) -> Option<&'static str> {
        match self {
            CoreError::GuardRejected { code, .. } => Some(code),
            _ => None,
        }
    }

    /// Returns a stable error code for logs and embedders.
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::InvalidCase { .. } => "INVALID_CASE",
            CoreError::InvalidParams { .. } => "INVALID_PARAMS",
            CoreError::SchemaViolation { .. } => "SCHEMA_VIOLATION",
            CoreError::InvalidCaseType { .. } => "INVALID_CASE_TYPE",
            CoreError::CaseNotFound { .. } => "CASE_NOT_FOUND",
            CoreError::RequestNotFound { .. } => "REQUEST_NOT_FOUND",
            CoreError::UnsupportedTransition { .. } => "UNSUPPORTED_TRANSITION",
            CoreError::NoTransitionForSignal { .. } => "NO_TRANSITION_FOR_SIGNAL",
            CoreError::NoApplicableEdge { .. } => "NO_APPLICABLE_EDGE",
            CoreError::GuardRejected { .. } => "GUARD_REJECTED",
            CoreError::MalformedEdgeDefinition { .. } => "MALFORMED_EDGE_DEFINITION",
            CoreError::InvalidGuard { .. } => "BAD_GUARD",
            CoreError::DuplicateEdge { .. } => "DUPLICATE_EDGE",
            CoreError::Attachment { .. } => "ATTACHMENT_ERROR",
            CoreError::Store(_) => "STORE_ERROR",
            CoreError::Callback { .. } => "CALLBACK_FAILED",
        }
    }
}

impl From<casegraph_protocol::ProtocolError> for CoreError {
    fn from(e: casegraph_protocol::ProtocolError) -> Self {
        CoreError::SchemaViolation {
            reason: e.to_string(),
        }
    }
}
