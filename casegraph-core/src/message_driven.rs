//! Message-driven engine.
//!
//! Correlates an inbound reply with the request that produced it and moves
//! the owning case along the first edge, registered for
//! `(current state, response format)`, whose guard passes.

use crate::attachments::{AttachmentReport, AttachmentSaver};
use crate::case::{current_state, display_state, Attributes, Params, State};
use crate::clock::Clock;
use crate::context::{AccessorScope, Accessors, AttributeContext};
use crate::edge::{EdgeInfo, ValueDescriptor};
use crate::error::CoreError;
use crate::guard::Guard;
use crate::locks::CaseLocks;
use crate::ports::{BlobSource, CaseStore, DocumentStore, RequestStore};
use crate::registry::SignalTable;
use casegraph_protocol::InboundMessage;
use std::sync::Arc;

/// Replies carry no caller parameters.
static EMPTY_PARAMS: Params = Params::new();

/// Collaborators the message-driven engine reads and writes.
#[derive(Clone)]
pub struct MessagePorts {
    pub cases: Arc<dyn CaseStore>,
    pub requests: Arc<dyn RequestStore>,
    pub documents: Arc<dyn DocumentStore>,
    pub blobs: Arc<dyn BlobSource>,
}

/// Result of a processed reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageOutcome {
    pub case_id: String,
    pub request_id: String,
    pub from: Option<State>,
    pub to: State,
    pub committed: Attributes,
    pub attachments: AttachmentReport,
}

/// Driver over a [`SignalTable`].
pub struct MessageDrivenEngine {
    table: Arc<SignalTable>,
    ports: MessagePorts,
    locks: Arc<CaseLocks>,
    clock: Arc<dyn Clock>,
}

impl MessageDrivenEngine {
    pub fn new(
        table: Arc<SignalTable>,
        ports: MessagePorts,
        locks: Arc<CaseLocks>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            table,
            ports,
            locks,
            clock,
        }
    }

    pub fn table(&self) -> &SignalTable {
        &self.table
    }

    /// Validates a raw message body and applies it.
    pub fn apply_message(&self, body: &str) -> Result<MessageOutcome, CoreError> {
        let message = InboundMessage::parse(body)?;
        self.apply(&message)
    }

    /// Applies an already validated message.
    pub fn apply(&self, message: &InboundMessage) -> Result<MessageOutcome, CoreError> {
        let request = self
            .ports
            .requests
            .find_by_message_id(&message.id)?
            .ok_or_else(|| CoreError::RequestNotFound {
                token: message.id.clone(),
            })?;

        let case = self
            .ports
            .cases
            .load(&request.case_id)?
            .ok_or_else(|| CoreError::CaseNotFound {
                case_id: request.case_id.clone(),
            })?;
        case.check_type(self.table.case_type())?;

        let lock = self.locks.lock(&case.id);

        let fetched = self
            .ports
            .cases
            .fetch_attributes(&case.id, self.table.needed_attributes())?;
        let from = current_state(&fetched);
        let signal = message.format.signal();

        let edges = self
            .table
            .get(from.as_ref(), message.format)
            .ok_or_else(|| CoreError::NoTransitionForSignal {
                case_id: case.id.clone(),
                from: display_state(from.as_ref()),
                signal: signal.to_string(),
            })?;

        let context = AttributeContext::new(
            case.id.clone(),
            fetched.clone(),
            self.clock.today(),
            Arc::clone(self.table.predicates()),
        );
        let edge = select_edge(edges, &context)?
            .ok_or_else(|| CoreError::NoApplicableEdge {
                case_id: case.id.clone(),
                from: display_state(from.as_ref()),
                signal: signal.to_string(),
            })?;
        let to = edge
            .target()
            .cloned()
            .ok_or_else(|| CoreError::MalformedEdgeDefinition {
                reason: "message-driven edge has no destination state".to_string(),
            })?;

        let attachments = match &message.attachments {
            Some(list) => AttachmentSaver::new(
                self.ports.blobs.as_ref(),
                self.ports.documents.as_ref(),
                self.clock.as_ref(),
            )
            .save_all(&case.id, list),
            None => AttachmentReport::default(),
        };

        self.ports.requests.update_response(
            &request.id,
            message.format,
            &message.content.special_data,
        )?;

        let scope = AccessorScope {
            case: &case,
            attributes: &fetched,
            params: &EMPTY_PARAMS,
            now: self.clock.now(),
        };
        let committed = resolve_set(&edge, self.table.accessors(), &scope)?;
        self.ports.cases.commit(&case.id, &to, &committed)?;

        tracing::debug!(
            "Case {} moved {} -> {} on {} reply {}",
            case.id,
            display_state(from.as_ref()),
            to,
            signal,
            message.id
        );

        drop(lock);

        if let Some(hook) = edge.after() {
            hook.call(&case, &fetched)?;
        }

        Ok(MessageOutcome {
            case_id: case.id,
            request_id: request.id,
            from,
            to,
            committed,
            attachments,
        })
    }
}

/// First edge whose guard is absent or passes.
fn select_edge(
    edges: &[Arc<EdgeInfo>],
    context: &AttributeContext,
) -> Result<Option<Arc<EdgeInfo>>, CoreError> {
    for edge in edges {
        if Guard::evaluate_opt(edge.guard(), context)? {
            return Ok(Some(Arc::clone(edge)));
        }
    }
    Ok(None)
}

/// Resolves an edge's assignments: null stays null, an accessor name is
/// computed, anything else is taken literally.
fn resolve_set(
    edge: &EdgeInfo,
    accessors: &Accessors,
    scope: &AccessorScope<'_>,
) -> Result<Attributes, CoreError> {
    let mut resolved = Attributes::new();

    for (name, descriptor) in edge.set() {
        let value = match descriptor {
            ValueDescriptor::Null => None,
            ValueDescriptor::Text(source) | ValueDescriptor::Reference(source) => {
                match accessors.get(source) {
                    Some(accessor) => accessor(scope)?,
                    None => Some(source.clone()),
                }
            }
        };
        resolved.insert(name.clone(), value);
    }

    Ok(resolved)
}
