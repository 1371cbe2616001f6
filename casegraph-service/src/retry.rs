//! Bounded retry of requests answered with EXCEPTION.

use crate::config::RetryConfig;
use crate::dispatch::Dispatcher;
use crate::error::ServiceError;
use crate::scheduler::{JobId, Scheduler};
use casegraph_core::{Attributes, CaseFilter, CaseStore, RequestStore, StoreError};
use casegraph_protocol::ResponseFormat;
use std::sync::Arc;
use std::time::Duration;

/// Decides whether a failed request is re-issued and schedules it.
pub struct RetryPolicy {
    requests: Arc<dyn RequestStore>,
    dispatcher: Arc<Dispatcher>,
    scheduler: Scheduler,
    max_exceptions: usize,
    delay: Duration,
}

impl RetryPolicy {
    pub fn new(
        requests: Arc<dyn RequestStore>,
        dispatcher: Arc<Dispatcher>,
        scheduler: Scheduler,
        config: &RetryConfig,
    ) -> Self {
        Self {
            requests,
            dispatcher,
            scheduler,
            max_exceptions: config.max_exceptions,
            delay: config.delay(),
        }
    }

    /// Attributes a re-issued request is built from.
    pub fn payload_fields(&self) -> &[String] {
        self.dispatcher.payload_fields()
    }

    /// Requests of the case answered with EXCEPTION so far.
    pub fn exceptions_count(&self, case_id: &str) -> Result<usize, StoreError> {
        self.requests
            .count_by_format(case_id, ResponseFormat::Exception)
    }

    /// Whether the count is still within the limit.
    pub fn retry_allowed(&self, case_id: &str) -> Result<bool, StoreError> {
        Ok(self.exceptions_count(case_id)? <= self.max_exceptions)
    }

    /// Whether a case found in the error state may still be retried. The
    /// reply that moved it there is already recorded, so it is not counted
    /// against the limit.
    pub fn resume_allowed(&self, case_id: &str) -> Result<bool, StoreError> {
        Ok(self.exceptions_count(case_id)?.saturating_sub(1) <= self.max_exceptions)
    }

    /// Schedules a re-issue of the case's request built from `attributes`.
    pub fn schedule(&self, case_id: &str, attributes: &Attributes) -> Result<JobId, ServiceError> {
        let dispatcher = Arc::clone(&self.dispatcher);
        let case = case_id.to_string();
        let attributes = attributes.clone();

        let id = self.scheduler.after(
            &format!("retry {}", case_id),
            self.delay,
            move || dispatcher.dispatch(&case, &attributes).map(|_| ()),
        )?;

        tracing::info!(
            "Request of case {} will be re-issued in {:?}",
            case_id,
            self.delay
        );
        Ok(id)
    }

    /// Schedules a re-issue only if the limit allows it.
    pub fn schedule_if_allowed(
        &self,
        case_id: &str,
        attributes: &Attributes,
    ) -> Result<Option<JobId>, ServiceError> {
        if !self.retry_allowed(case_id)? {
            tracing::debug!("Case {} exhausted its retries", case_id);
            return Ok(None);
        }
        self.schedule(case_id, attributes).map(Some)
    }

    /// Schedules re-issues for every case of `case_type` left in
    /// `error_state`, e.g. after a restart.
    pub fn resume(
        &self,
        cases: &dyn CaseStore,
        case_type: &str,
        error_state: &str,
    ) -> Result<usize, ServiceError> {
        let filter = CaseFilter::of_type(case_type).in_state(error_state);
        let records = cases.query(&filter, self.dispatcher.payload_fields())?;

        let mut scheduled = 0;
        for record in records {
            if !self.resume_allowed(&record.id)? {
                tracing::debug!("Case {} exhausted its retries", record.id);
                continue;
            }
            self.schedule(&record.id, &record.attributes)?;
            scheduled += 1;
        }

        tracing::info!("Resumed {} pending retries", scheduled);
        Ok(scheduled)
    }
}
