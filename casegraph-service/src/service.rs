//! Case service: both engines wired to the workflow tables, the request
//! dispatcher, retries and the expiry sweep.

use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::error::ServiceError;
use crate::expiry::{ExpirySweep, SweepReport};
use crate::retry::RetryPolicy;
use crate::scheduler::Scheduler;
use crate::workflow::{self, states};
use casegraph_core::{
    BlobSource, Case, CaseLocks, CaseStore, Clock, DocumentStore, MessageDrivenEngine,
    MessageOutcome, MessagePorts, RequestStore, StateDrivenEngine, TransitionOutcome, Transport,
};
use serde_json::Value;
use std::sync::Arc;

/// Host collaborators the service runs against.
#[derive(Clone)]
pub struct Collaborators {
    pub cases: Arc<dyn CaseStore>,
    pub requests: Arc<dyn RequestStore>,
    pub documents: Arc<dyn DocumentStore>,
    pub blobs: Arc<dyn BlobSource>,
    pub transport: Arc<dyn Transport>,
    pub clock: Arc<dyn Clock>,
}

pub struct CaseService {
    config: Config,
    cases: Arc<dyn CaseStore>,
    scheduler: Scheduler,
    retry: Arc<RetryPolicy>,
    sweep: Arc<ExpirySweep>,
    state_driven: StateDrivenEngine,
    message_driven: MessageDrivenEngine,
}

impl CaseService {
    /// Builds the tables and engines. Nothing is scheduled until
    /// [`CaseService::startup`].
    pub fn new(
        config: Config,
        collaborators: Collaborators,
        scheduler: Scheduler,
    ) -> Result<Self, ServiceError> {
        let Collaborators {
            cases,
            requests,
            documents,
            blobs,
            transport,
            clock,
        } = collaborators;
        let case_type = config.workflow.case_type.clone();
        let locks = Arc::new(CaseLocks::new());

        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&requests),
            transport,
            config.dispatch.clone(),
        ));
        let retry = Arc::new(RetryPolicy::new(
            Arc::clone(&requests),
            Arc::clone(&dispatcher),
            scheduler.clone(),
            &config.retry,
        ));

        let transitions = workflow::transition_table(&case_type, dispatcher)?;
        let signals = workflow::signal_table(&case_type, Arc::clone(&retry))?;

        let state_driven = StateDrivenEngine::new(
            Arc::new(transitions),
            Arc::clone(&cases),
            Arc::clone(&locks),
            Arc::clone(&clock),
        );
        let message_driven = MessageDrivenEngine::new(
            Arc::new(signals),
            MessagePorts {
                cases: Arc::clone(&cases),
                requests,
                documents,
                blobs,
            },
            Arc::clone(&locks),
            Arc::clone(&clock),
        );
        let sweep = Arc::new(ExpirySweep::new(
            Arc::clone(&cases),
            locks,
            clock,
            case_type,
        ));

        Ok(Self {
            config,
            cases,
            scheduler,
            retry,
            sweep,
            state_driven,
            message_driven,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Moves a case to `to` with optional JSON parameters.
    pub fn apply_transition(
        &self,
        case: &Case,
        to: &str,
        params: &Value,
    ) -> Result<TransitionOutcome, ServiceError> {
        let outcome = self.state_driven.apply_transition(case, to, params)?;
        if !outcome.guard_passed {
            tracing::warn!("Case {} moved to {} although its guard rejected", case.id, to);
        }
        Ok(outcome)
    }

    /// Creation hook: sends the first request of a new case.
    pub fn on_case_creation(&self, case: &Case) -> Result<TransitionOutcome, ServiceError> {
        self.apply_transition(case, states::SMEV_SENDING, &Value::Null)
    }

    /// Applies a reply body, reporting any failure as an error.
    pub fn process_message(&self, body: &str) -> Result<MessageOutcome, ServiceError> {
        Ok(self.message_driven.apply_message(body)?)
    }

    /// Applies a reply body. Failures are logged, never raised.
    pub fn apply_message(&self, body: &str) -> bool {
        match self.process_message(body) {
            Ok(outcome) => {
                tracing::info!(
                    "Case {} moved to {} on reply to request {}",
                    outcome.case_id,
                    outcome.to,
                    outcome.request_id
                );
                true
            }
            Err(e) => {
                tracing::error!("Reply rejected [{}]: {}", e.error_code(), e);
                false
            }
        }
    }

    /// Runs the expiry sweep immediately.
    pub fn sweep_now(&self) -> Result<SweepReport, ServiceError> {
        self.sweep.run()
    }

    /// Starts the recurring sweep and re-schedules retries of cases left in
    /// `error`. Returns how many retries were resumed.
    pub fn startup(&self) -> Result<usize, ServiceError> {
        self.scheduler.restart();

        let expiry = &self.config.expiry;
        if expiry.enabled {
            let sweep = Arc::clone(&self.sweep);
            self.scheduler
                .every("expiry sweep", &expiry.cron, move || sweep.run().map(|_| ()))?;
        }

        let resumed = self.retry.resume(
            self.cases.as_ref(),
            &self.config.workflow.case_type,
            states::ERROR,
        )?;
        tracing::info!(
            "Case service started for {} ({} retries resumed)",
            self.config.workflow.case_type,
            resumed
        );
        Ok(resumed)
    }

    /// Cancels every scheduled job.
    pub fn shutdown(&self) {
        self.scheduler.stop();
        tracing::info!("Case service stopped");
    }
}
