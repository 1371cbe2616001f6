//! Outbound request dispatch.

use crate::config::DispatchConfig;
use crate::error::ServiceError;
use casegraph_core::{Attributes, Headers, Request, RequestStore, Transport};
use casegraph_protocol::OutboundRequest;
use serde_json::Value;
use std::sync::Arc;

/// Creates correlated requests and publishes them.
pub struct Dispatcher {
    requests: Arc<dyn RequestStore>,
    transport: Arc<dyn Transport>,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(
        requests: Arc<dyn RequestStore>,
        transport: Arc<dyn Transport>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            requests,
            transport,
            config,
        }
    }

    /// Attributes the request payload is built from.
    pub fn payload_fields(&self) -> &[String] {
        &self.config.payload_fields
    }

    /// Records a request under a fresh correlation token and publishes it.
    pub fn dispatch(&self, case_id: &str, attributes: &Attributes) -> Result<Request, ServiceError> {
        let token = uuid::Uuid::new_v4().to_string();
        let request = self.requests.create(case_id, &token, None)?;

        let payload = self.message(&token, attributes).to_json()?;
        self.transport
            .publish(&self.config.request_queue, &payload, &Headers::new())?;

        tracing::info!(
            "Dispatched request {} for case {} to {}",
            token,
            case_id,
            self.config.request_queue
        );
        Ok(request)
    }

    /// Outbound message carrying the configured fields present in `attributes`.
    pub fn message(&self, token: &str, attributes: &Attributes) -> OutboundRequest {
        self.config
            .payload_fields
            .iter()
            .filter_map(|field| attributes.get(field).map(|value| (field, value)))
            .fold(
                OutboundRequest::new(&self.config.response_queue, token),
                |message, (field, value)| message.with_field(field.as_str(), Value::from(value.clone())),
            )
    }
}
