//! # casegraph-core
//!
//! Declarative transition engine for long-lived case records.
//!
//! This crate provides:
//! - Edge descriptions and immutable edge registries
//! - Guard expression evaluation over an attribute context
//! - The state-driven engine (explicit target state)
//! - The message-driven engine (correlated replies)
//! - Ports to the host's case, request and document storage
//! - Per-case serialization of fetch and commit

pub mod attachments;
pub mod case;
pub mod clock;
pub mod context;
pub mod edge;
pub mod error;
pub mod guard;
pub mod locks;
pub mod message_driven;
pub mod ports;
pub mod registry;
pub mod state_driven;

#[cfg(test)]
mod test_support;

pub use case::{Attributes, Case, Params, State};
pub use clock::{Clock, FixedClock, SystemClock};
pub use context::{AccessorScope, Accessors, AttributeContext, Predicates};
pub use edge::{blank, from_params_with_the_same_names, AfterCommit, EdgeInfo, EdgeOptions, ValueDescriptor};
pub use error::{CoreError, GuardFailure, StoreError};
pub use guard::{Guard, GuardExpr};
pub use locks::CaseLocks;
pub use message_driven::{MessageDrivenEngine, MessageOutcome, MessagePorts};
pub use ports::{
    BlobSource, CaseFilter, CaseRecord, CaseStore, DocumentStore, Headers, NewDocument, Request,
    RequestStore, Transport,
};
pub use registry::{SignalTable, TransitionTable};
pub use state_driven::{StateDrivenEngine, TransitionOutcome};
