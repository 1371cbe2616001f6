//! Periodic sweep of cases whose issuance deadline has passed.
//!
//! The sweep writes straight to the case store in two bulk commits instead
//! of going through the state-driven engine. It takes the case locks of
//! everything it touches, so it never interleaves with an engine call on
//! the same case.

use crate::error::ServiceError;
use crate::workflow::{case_status, fields, states, CLOSE_ON_REJECT_MARK};
use casegraph_core::{Attributes, CaseFilter, CaseLocks, CaseStore, Clock, State};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Cases moved by one sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub closed: Vec<String>,
    pub rejected: Vec<String>,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.closed.len() + self.rejected.len()
    }
}

/// Expired-case sweep.
pub struct ExpirySweep {
    cases: Arc<dyn CaseStore>,
    locks: Arc<CaseLocks>,
    clock: Arc<dyn Clock>,
    case_type: String,
}

impl ExpirySweep {
    pub fn new(
        cases: Arc<dyn CaseStore>,
        locks: Arc<CaseLocks>,
        clock: Arc<dyn Clock>,
        case_type: impl Into<String>,
    ) -> Self {
        Self {
            cases,
            locks,
            clock,
            case_type: case_type.into(),
        }
    }

    fn filter(&self) -> CaseFilter {
        CaseFilter::of_type(&self.case_type)
            .in_state(states::ISSUANCE)
            .date_at_most(fields::PLANNED_REJECTING_DATE, self.clock.yesterday())
    }

    /// Runs one sweep: closes marked cases, then rejects the rest.
    pub fn run(&self) -> Result<SweepReport, ServiceError> {
        let marker = [fields::CLOSE_ON_REJECT.to_string()];
        let candidates: Vec<String> = self
            .cases
            .query(&self.filter(), &marker)?
            .into_iter()
            .map(|record| record.id)
            .collect();

        let _guards = self.locks.lock_many(candidates.iter().map(String::as_str));

        // re-read under the locks, the cases may have moved meanwhile
        let locked: BTreeSet<&str> = candidates.iter().map(String::as_str).collect();
        let mut report = SweepReport::default();
        for record in self.cases.query(&self.filter(), &marker)? {
            if !locked.contains(record.id.as_str()) {
                continue;
            }
            let marked = record
                .attributes
                .get(fields::CLOSE_ON_REJECT)
                .and_then(|v| v.as_deref())
                == Some(CLOSE_ON_REJECT_MARK);
            if marked {
                report.closed.push(record.id);
            } else {
                report.rejected.push(record.id);
            }
        }

        let timestamp = self.clock.timestamp();

        let mut close = Attributes::new();
        close.insert(fields::CASE_STATUS.to_string(), Some(case_status::CLOSED.to_string()));
        close.insert(fields::CLOSED_DATE.to_string(), Some(timestamp.clone()));
        self.cases
            .bulk_commit(&report.closed, &State::from(states::CLOSED), &close)?;

        let mut reject = Attributes::new();
        reject.insert(
            fields::CASE_STATUS.to_string(),
            Some(case_status::REJECTING.to_string()),
        );
        reject.insert(fields::REJECTING_DATE.to_string(), Some(timestamp));
        self.cases
            .bulk_commit(&report.rejected, &State::from(states::REJECTING), &reject)?;

        tracing::info!(
            "Expiry sweep closed {} and rejected {} cases",
            report.closed.len(),
            report.rejected.len()
        );
        Ok(report)
    }
}
