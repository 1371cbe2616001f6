//! State-driven engine.
//!
//! Moves a case to an explicitly requested state along the single edge
//! registered for `(current state, requested state)`.

use crate::case::{current_state, display_state, params_from_json, Attributes, Case, Params, State};
use crate::clock::Clock;
use crate::context::{AccessorScope, Accessors, AttributeContext};
use crate::edge::{EdgeInfo, ValueDescriptor};
use crate::error::CoreError;
use crate::guard::Guard;
use crate::locks::CaseLocks;
use crate::ports::CaseStore;
use crate::registry::TransitionTable;
use serde_json::Value;
use std::sync::Arc;

/// Result of a committed transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionOutcome {
    pub from: Option<State>,
    pub to: State,
    /// Attributes written alongside `state`.
    pub committed: Attributes,
    /// False when an advisory guard rejected and the transition went ahead.
    pub guard_passed: bool,
}

/// Synchronous driver over a [`TransitionTable`].
pub struct StateDrivenEngine {
    table: Arc<TransitionTable>,
    cases: Arc<dyn CaseStore>,
    locks: Arc<CaseLocks>,
    clock: Arc<dyn Clock>,
}

impl StateDrivenEngine {
    pub fn new(
        table: Arc<TransitionTable>,
        cases: Arc<dyn CaseStore>,
        locks: Arc<CaseLocks>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            table,
            cases,
            locks,
            clock,
        }
    }

    pub fn table(&self) -> &TransitionTable {
        &self.table
    }

    /// Applies the transition to `requested` with JSON parameters.
    ///
    /// `params` must be an object or null.
    pub fn apply_transition(
        &self,
        case: &Case,
        requested: impl Into<State>,
        params: &Value,
    ) -> Result<TransitionOutcome, CoreError> {
        case.validate()?;
        case.check_type(self.table.case_type())?;
        let params = params_from_json(params)?;
        self.apply_checked(case, requested.into(), &params)
    }

    /// Applies the transition to `requested` with already flattened parameters.
    pub fn apply_with_params(
        &self,
        case: &Case,
        requested: State,
        params: &Params,
    ) -> Result<TransitionOutcome, CoreError> {
        case.validate()?;
        case.check_type(self.table.case_type())?;
        self.apply_checked(case, requested, params)
    }

    /// Fetch, guard, commit and hook for an already validated case.
    fn apply_checked(
        &self,
        case: &Case,
        requested: State,
        params: &Params,
    ) -> Result<TransitionOutcome, CoreError> {
        let lock = self.locks.lock(&case.id);

        let fetched = self
            .cases
            .fetch_attributes(&case.id, self.table.needed_attributes())?;
        let from = current_state(&fetched);

        let edge = self
            .table
            .get(from.as_ref(), &requested)
            .ok_or_else(|| CoreError::UnsupportedTransition {
                case_id: case.id.clone(),
                from: display_state(from.as_ref()),
                to: requested.to_string(),
            })?
            .clone();

        let context = AttributeContext::new(
            case.id.clone(),
            fetched.clone(),
            self.clock.today(),
            Arc::clone(self.table.predicates()),
        );
        let guard_passed = Guard::evaluate_opt(edge.guard(), &context)?;
        if !guard_passed {
            match edge.on_guard_fail() {
                Some(failure) => {
                    return Err(CoreError::GuardRejected {
                        case_id: case.id.clone(),
                        from: display_state(from.as_ref()),
                        to: requested.to_string(),
                        code: failure.code,
                        reason: failure.reason,
                    });
                }
                None => {
                    tracing::warn!(
                        "Guard rejected {} -> {} for case {} but no failure is configured, proceeding",
                        display_state(from.as_ref()),
                        requested,
                        case.id
                    );
                }
            }
        }

        let scope = AccessorScope {
            case,
            attributes: &fetched,
            params,
            now: self.clock.now(),
        };
        let committed = resolve_set(&edge, self.table.accessors(), &scope)?;

        self.cases.commit(&case.id, &requested, &committed)?;
        tracing::debug!(
            "Case {} moved {} -> {} ({} attributes)",
            case.id,
            display_state(from.as_ref()),
            requested,
            committed.len()
        );

        drop(lock);

        if let Some(hook) = edge.after() {
            hook.call(case, &fetched)?;
        }

        Ok(TransitionOutcome {
            from,
            to: requested,
            committed,
            guard_passed,
        })
    }
}

/// Resolves an edge's assignments: null stays null, then accessor, then
/// parameter, then the literal text. Unresolved references are left out.
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
                if let Some(accessor) = accessors.get(source) {
                    accessor(scope)?
                } else if let Some(param) = scope.params.get(source) {
                    param.clone()
                } else if descriptor.is_skip_tagged() {
                    continue;
                } else {
                    Some(source.clone())
                }
            }
        };
        resolved.insert(name.clone(), value);
    }

    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::edge::{blank, from_params_with_the_same_names};
    use crate::error::GuardFailure;
    use crate::test_support::{MemoryCases, SlowFetch};
    use chrono::NaiveDate;
    use parking_lot::Mutex;
    use proptest::prelude::*;
    use serde_json::json;
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    const FAILURE: GuardFailure = GuardFailure::new("pending_packaging", "rejection recorded");

    fn clock() -> Arc<FixedClock> {
        Arc::new(FixedClock::new(
            NaiveDate::from_ymd_opt(2025, 6, 1)
                .unwrap()
                .and_hms_opt(12, 0, 0)
                .unwrap(),
        ))
    }

    fn table() -> TransitionTable {
        TransitionTable::builder("sd")
            .predicate("rejected", |ctx| Ok(ctx.get("rejecting_date").is_some()))
            .attribute_accessor("deadline")
            .edge(
                Some("pending"),
                "packaging",
                EdgeInfo::builder()
                    .need(["rejecting_date", "deadline"])
                    .guard(Guard::parse("!rejected").unwrap())
                    .on_guard_fail(FAILURE)
                    .set_text("planned_finish_date", "deadline")
                    .set_all(blank(["pending_register_sending_date", "pending_register_operator_id"]))
                    .build()
                    .unwrap(),
            )
            .edge(
                Some("packaging"),
                "pending",
                EdgeInfo::builder()
                    .set_text("case_status", "waiting")
                    .set_reference("registered_at", "now")
                    .set_reference("registered_by", "person_id")
                    .set_all(from_params_with_the_same_names(["office_id", "comment"]))
                    .set_text("label", "office_name")
                    .build()
                    .unwrap(),
            )
            .edge(
                Some("issuance"),
                "closed",
                EdgeInfo::builder()
                    .need(["rejecting_date"])
                    .guard(Guard::parse("rejected").unwrap())
                    .set_text("closed_date", "now")
                    .build()
                    .unwrap(),
            )
            .build()
            .unwrap()
    }

    fn engine(cases: &Arc<MemoryCases>) -> StateDrivenEngine {
        StateDrivenEngine::new(
            Arc::new(table()),
            Arc::clone(cases) as Arc<dyn CaseStore>,
            Arc::new(CaseLocks::new()),
            clock(),
        )
    }

    fn pending_case(cases: &MemoryCases, rejecting_date: Option<&str>) -> Case {
        cases.insert(
            "c-1",
            "sd",
            &[
                ("state", Some("pending")),
                ("rejecting_date", rejecting_date),
                ("deadline", Some("2025-01-01")),
                ("pending_register_sending_date", Some("2024-12-01")),
                ("pending_register_operator_id", Some("op-9")),
            ],
        )
    }

    #[test]
    fn test_pending_to_packaging() {
        let cases = Arc::new(MemoryCases::default());
        let case = pending_case(&cases, None);

        let outcome = engine(&cases)
            .apply_transition(&case, "packaging", &json!({}))
            .unwrap();

        assert!(outcome.guard_passed);
        assert_eq!(outcome.from, Some(State::from("pending")));
        assert_eq!(cases.attribute("c-1", "state").as_deref(), Some("packaging"));
        assert_eq!(
            cases.attribute("c-1", "planned_finish_date").as_deref(),
            Some("2025-01-01")
        );
        assert_eq!(cases.attribute("c-1", "pending_register_sending_date"), None);
        assert_eq!(cases.attribute("c-1", "pending_register_operator_id"), None);
        assert!(cases.has_attribute("c-1", "pending_register_operator_id"));
        assert_eq!(cases.commit_count(), 1);
    }

    #[test]
    fn test_guard_failure_blocks_commit() {
        let cases = Arc::new(MemoryCases::default());
        let case = pending_case(&cases, Some("2025-05-01"));
        let before = cases.snapshot("c-1");

        let err = engine(&cases)
            .apply_transition(&case, "packaging", &Value::Null)
            .unwrap_err();

        assert_eq!(err.guard_failure_code(), Some("pending_packaging"));
        assert_eq!(err.error_code(), "GUARD_REJECTED");
        assert_eq!(cases.snapshot("c-1"), before);
        assert_eq!(cases.commit_count(), 0);
    }

    #[test]
    fn test_advisory_guard_proceeds() {
        let cases = Arc::new(MemoryCases::default());
        let case = cases.insert("c-1", "sd", &[("state", Some("issuance"))]);

        let outcome = engine(&cases)
            .apply_transition(&case, "closed", &json!({}))
            .unwrap();

        assert!(!outcome.guard_passed);
        assert_eq!(cases.attribute("c-1", "state").as_deref(), Some("closed"));
        assert_eq!(
            cases.attribute("c-1", "closed_date").as_deref(),
            Some("2025-06-01T12:00:00")
        );
    }

    #[test]
    fn test_value_resolution_and_skip() {
        let cases = Arc::new(MemoryCases::default());
        let case = cases.insert("c-1", "sd", &[("state", Some("packaging"))]);

        let outcome = engine(&cases)
            .apply_transition(
                &case,
                "pending",
                &json!({"office_id": "o-1", "office_name": "Central", "operator_id": "op-1"}),
            )
            .unwrap();

        let committed = outcome.committed;
        assert_eq!(committed["case_status"].as_deref(), Some("waiting"));
        assert_eq!(committed["registered_at"].as_deref(), Some("2025-06-01T12:00:00"));
        assert_eq!(committed["registered_by"].as_deref(), Some("op-1"));
        assert_eq!(committed["office_id"].as_deref(), Some("o-1"));
        assert_eq!(committed["label"].as_deref(), Some("Central"));
        // skip-tagged with no accessor and no parameter
        assert!(!committed.contains_key("comment"));
        assert!(!cases.has_attribute("c-1", "comment"));
    }

    #[test]
    fn test_null_parameter_is_used() {
        let cases = Arc::new(MemoryCases::default());
        let case = cases.insert("c-1", "sd", &[("state", Some("packaging"))]);

        let outcome = engine(&cases)
            .apply_transition(&case, "pending", &json!({"comment": null}))
            .unwrap();

        assert_eq!(outcome.committed.get("comment"), Some(&None));
        // person_id resolves to null without operator or exporter
        assert_eq!(outcome.committed.get("registered_by"), Some(&None));
    }

    #[test]
    fn test_unsupported_transition() {
        let cases = Arc::new(MemoryCases::default());
        let case = pending_case(&cases, None);

        let err = engine(&cases)
            .apply_transition(&case, "closed", &json!({}))
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::UnsupportedTransition { ref from, ref to, .. } if from == "pending" && to == "closed"
        ));
        assert_eq!(cases.commit_count(), 0);
    }

    #[test]
    fn test_input_validation() {
        let cases = Arc::new(MemoryCases::default());
        let case = pending_case(&cases, None);
        let engine = engine(&cases);

        let err = engine
            .apply_transition(&case, "packaging", &json!("oops"))
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidParams { .. }));

        let err = engine
            .apply_transition(&Case::new("", "sd"), "packaging", &json!({}))
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidCase { .. }));

        let err = engine
            .apply_transition(&Case::new("c-1", "other"), "packaging", &json!({}))
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidCaseType { .. }));

        let err = engine
            .apply_with_params(
                &Case::new("c-1", "other"),
                State::from("packaging"),
                &Params::new(),
            )
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidCaseType { .. }));
        assert_eq!(cases.commit_count(), 0);
    }

    #[test]
    fn test_after_receives_pre_commit_snapshot() {
        let seen: Arc<Mutex<Option<Attributes>>> = Arc::new(Mutex::new(None));
        let hook_seen = Arc::clone(&seen);

        let table = TransitionTable::builder("sd")
            .edge(
                None,
                "smev_sending",
                EdgeInfo::builder()
                    .need(["service_id"])
                    .set_reference("case_creation_date", "now")
                    .after(move |_: &Case, attrs: &Attributes| {
                        *hook_seen.lock() = Some(attrs.clone());
                        Ok(())
                    })
                    .build()
                    .unwrap(),
            )
            .build()
            .unwrap();

        let cases = Arc::new(MemoryCases::default());
        let case = cases.insert("c-1", "sd", &[("service_id", Some("svc"))]);
        let engine = StateDrivenEngine::new(
            Arc::new(table),
            Arc::clone(&cases) as Arc<dyn CaseStore>,
            Arc::new(CaseLocks::new()),
            clock(),
        );

        engine.apply_transition(&case, "smev_sending", &json!({})).unwrap();

        let seen = seen.lock().clone().unwrap();
        assert_eq!(seen.get("state"), None);
        assert_eq!(seen["service_id"].as_deref(), Some("svc"));
        assert_eq!(cases.attribute("c-1", "state").as_deref(), Some("smev_sending"));
    }

    #[test]
    fn test_after_error_propagates_after_commit() {
        let table = TransitionTable::builder("sd")
            .edge(
                Some("a"),
                "b",
                EdgeInfo::builder()
                    .after(|_: &Case, _: &Attributes| {
                        Err(CoreError::Callback {
                            reason: "hook failed".to_string(),
                        })
                    })
                    .build()
                    .unwrap(),
            )
            .build()
            .unwrap();

        let cases = Arc::new(MemoryCases::default());
        let case = cases.insert("c-1", "sd", &[("state", Some("a"))]);
        let engine = StateDrivenEngine::new(
            Arc::new(table),
            Arc::clone(&cases) as Arc<dyn CaseStore>,
            Arc::new(CaseLocks::new()),
            clock(),
        );

        let err = engine.apply_transition(&case, "b", &json!({})).unwrap_err();
        assert!(matches!(err, CoreError::Callback { .. }));
        assert_eq!(cases.attribute("c-1", "state").as_deref(), Some("b"));
    }

    #[test]
    fn test_concurrent_transitions_on_one_case_serialize() {
        let cases = Arc::new(MemoryCases::default());
        let case = cases.insert("c-1", "sd", &[("state", Some("pending"))]);
        let table = TransitionTable::builder("sd")
            .edge(
                Some("pending"),
                "packaging",
                EdgeInfo::builder().set_text("winner", "packaging").build().unwrap(),
            )
            .edge(
                Some("pending"),
                "processing",
                EdgeInfo::builder().set_text("winner", "processing").build().unwrap(),
            )
            .build()
            .unwrap();
        let slow = SlowFetch {
            inner: Arc::clone(&cases),
            delay: Duration::from_millis(50),
        };
        let engine = Arc::new(StateDrivenEngine::new(
            Arc::new(table),
            Arc::new(slow),
            Arc::new(CaseLocks::new()),
            clock(),
        ));
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = ["packaging", "processing"]
            .into_iter()
            .map(|to| {
                let engine = Arc::clone(&engine);
                let case = case.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    engine.apply_transition(&case, to, &Value::Null)
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let winners: Vec<&TransitionOutcome> =
            results.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert_eq!(winners.len(), 1);
        let loser = results.iter().find_map(|r| r.as_ref().err()).unwrap();
        match loser {
            CoreError::UnsupportedTransition { from, .. } => {
                assert_eq!(from, winners[0].to.as_str())
            }
            other => panic!("unexpected error: {}", other),
        }

        assert_eq!(cases.commit_count(), 1);
        let state = cases.attribute("c-1", "state");
        assert_eq!(state.as_deref(), Some(winners[0].to.as_str()));
        assert_eq!(cases.attribute("c-1", "winner"), state);
    }

    proptest! {
        #[test]
        fn unsupported_transitions_never_mutate(
            current in "[a-z]{1,8}",
            requested in "[a-z]{1,8}",
        ) {
            let registered = [("pending", "packaging"), ("packaging", "pending"), ("issuance", "closed")];
            prop_assume!(!registered.contains(&(current.as_str(), requested.as_str())));

            let cases = Arc::new(MemoryCases::default());
            let case = cases.insert("c-1", "sd", &[("state", Some(current.as_str())), ("x", Some("1"))]);
            let before = cases.snapshot("c-1");

            let result = engine(&cases).apply_transition(&case, requested.as_str(), &json!({}));

            let is_unsupported = matches!(result, Err(CoreError::UnsupportedTransition { .. }));
            prop_assert!(is_unsupported);
            prop_assert_eq!(cases.snapshot("c-1"), before);
            prop_assert_eq!(cases.commit_count(), 0);
        }
    }
}
