//! Transition tables of the fully automated social-service case.
//!
//! State-driven edges (explicit target state):
//!
//! | Edge | From         | To           | Guard                                    |
//! |------|--------------|--------------|------------------------------------------|
//! | A    | (none)       | smev_sending |                                          |
//! | C1   | packaging    | pending      |                                          |
//! | C2   | pending      | packaging    | `!rejected`                              |
//! | C3   | pending      | processing   | `!issuance_in_institution && !rejected`  |
//! | C4   | pending      | rejecting    | `rejected`                               |
//! | C5   | rejecting    | pending      |                                          |
//! | C6   | pending      | closed       | `issuance_in_institution \|\| rejected`  |
//! | C7   | processing   | issuance     |                                          |
//! | C8   | issuance     | rejecting    | `!can_be_issued && !close_on_reject`     |
//! | C9   | issuance     | closed       | `can_be_issued \|\| close_on_reject`     |
//!
//! Message-driven edges, from `smev_sending` and `error`, in priority order:
//!
//! | Edge | Signal              | To        | Guard            |
//! |------|---------------------|-----------|------------------|
//! | B1   | exception           | error     | `retry_allowed`  |
//! | B2   | exception           | packaging | `!retry_allowed` |
//! | B3   | rejection, response | closed    | `!mfc_issuance`  |
//! | B4   | rejection, response | issuance  | `mfc_issuance`   |

use crate::dispatch::Dispatcher;
use crate::retry::RetryPolicy;
use casegraph_core::edge::EdgeBuilder;
use casegraph_core::{
    blank, from_params_with_the_same_names, AttributeContext, Attributes, Case, CoreError,
    EdgeInfo, Guard, GuardFailure, SignalTable, TransitionTable,
};
use casegraph_protocol::ResponseFormat;
use std::sync::Arc;

/// Default case type tag.
pub const CASE_TYPE: &str = "sd_full_auto_case";

/// `issue_method` value for issuance at the institution.
pub const ISSUE_METHOD_INSTITUTION: &str = "institution";

/// `issue_method` value for issuance at an MFC office.
pub const ISSUE_METHOD_MFC: &str = "mfc";

/// `close_on_reject` value marking a case to be closed instead of rejected.
pub const CLOSE_ON_REJECT_MARK: &str = "true";

/// Attributes shared by the state-driven edges and the expiry sweep.
pub mod fields {
    pub const CASE_STATUS: &str = "case_status";
    pub const PLANNED_REJECTING_DATE: &str = "planned_rejecting_date";
    pub const CLOSE_ON_REJECT: &str = "close_on_reject";
    pub const REJECTING_DATE: &str = "rejecting_date";
    pub const CLOSED_DATE: &str = "closed_date";
}

pub mod states {
    pub const SMEV_SENDING: &str = "smev_sending";
    pub const ERROR: &str = "error";
    pub const PACKAGING: &str = "packaging";
    pub const PENDING: &str = "pending";
    pub const PROCESSING: &str = "processing";
    pub const ISSUANCE: &str = "issuance";
    pub const REJECTING: &str = "rejecting";
    pub const CLOSED: &str = "closed";
}

/// `case_status` labels shown to operators.
pub mod case_status {
    pub const SMEV_SENDING: &str = "Отправка заявки в СМЭВ";
    pub const ERROR: &str = "Ошибка при отправке заявки в СМЭВ";
    pub const PACKAGING: &str = "Формирование пакета документов";
    pub const PENDING: &str = "Ожидание отправки в ведомство";
    pub const PROCESSING: &str = "Обработка пакета документов в ведомстве";
    pub const ISSUANCE: &str = "Выдача результата оказания услуги";
    pub const REJECTING: &str = "Возврат невостребованного результата в ведомство";
    pub const CLOSED: &str = "Закрыта";
}

/// Typed guard failures of the state-driven edges.
pub mod failures {
    use casegraph_core::GuardFailure;

    pub const PENDING_PACKAGING: GuardFailure = GuardFailure::new(
        "pending_packaging",
        "cannot move from pending to packaging: the case has a rejecting date",
    );
    pub const PENDING_PROCESSING: GuardFailure = GuardFailure::new(
        "pending_processing",
        "cannot move from pending to processing: the result is issued at the institution or the case has a rejecting date",
    );
    pub const PENDING_REJECTING: GuardFailure = GuardFailure::new(
        "pending_rejecting",
        "cannot move from pending to rejecting: the case has no rejecting date",
    );
    pub const PENDING_CLOSED: GuardFailure = GuardFailure::new(
        "pending_closed",
        "cannot move from pending to closed: the result is not issued at the institution and the case has no rejecting date",
    );
    pub const ISSUANCE_REJECTING: GuardFailure = GuardFailure::new(
        "issuance_rejecting",
        "cannot move from issuance to rejecting: the issuance deadline has not passed, is missing or is malformed, or the case closes on reject",
    );
    pub const ISSUANCE_CLOSED: GuardFailure = GuardFailure::new(
        "issuance_closed",
        "cannot move from issuance to closed: the issuance deadline has passed",
    );
}

const OFFICE_PARTS: [&str; 12] = [
    "building",
    "city",
    "country_code",
    "country_name",
    "district",
    "house",
    "index",
    "region_code",
    "region_name",
    "room",
    "settlement",
    "street",
];

const OPERATOR_PARTS: [&str; 5] = ["id", "middle_name", "name", "position", "surname"];

/// Register fields filled when documents are sent to the institution, e.g.
/// `pending_register_institution_office_city`.
pub fn register_fields(prefix: &str) -> Vec<String> {
    let mut fields = vec![format!("{}_institution_name", prefix)];
    fields.extend(
        OFFICE_PARTS
            .iter()
            .map(|part| format!("{}_institution_office_{}", prefix, part)),
    );
    fields.push(format!("{}_number", prefix));
    fields.extend(
        OPERATOR_PARTS
            .iter()
            .map(|part| format!("{}_operator_{}", prefix, part)),
    );
    fields
}

/// MFC office and operator fields, e.g. `closed_office_mfc_street`.
pub fn office_fields(prefix: &str) -> Vec<String> {
    OFFICE_PARTS
        .iter()
        .map(|part| format!("{}_office_mfc_{}", prefix, part))
        .chain(
            OPERATOR_PARTS
                .iter()
                .map(|part| format!("{}_operator_{}", prefix, part)),
        )
        .collect()
}

fn rejected(ctx: &AttributeContext) -> Result<bool, CoreError> {
    Ok(ctx.get("rejecting_date").is_some())
}

fn issuance_in_institution(ctx: &AttributeContext) -> Result<bool, CoreError> {
    Ok(ctx
        .get("issue_method")
        .is_some_and(|m| m.eq_ignore_ascii_case(ISSUE_METHOD_INSTITUTION)))
}

/// True unless the issuance deadline is a valid date on or before today.
fn can_be_issued(ctx: &AttributeContext) -> Result<bool, CoreError> {
    Ok(ctx
        .date(fields::PLANNED_REJECTING_DATE)
        .map_or(true, |deadline| ctx.today() < deadline))
}

fn close_on_reject(ctx: &AttributeContext) -> Result<bool, CoreError> {
    Ok(ctx.get(fields::CLOSE_ON_REJECT) == Some(CLOSE_ON_REJECT_MARK))
}

fn mfc_issuance(ctx: &AttributeContext) -> Result<bool, CoreError> {
    Ok(ctx
        .get("issue_method")
        .map(str::trim)
        .is_some_and(|m| !m.is_empty() && m.eq_ignore_ascii_case(ISSUE_METHOD_MFC)))
}

fn guarded(expression: &str, failure: GuardFailure) -> Result<EdgeBuilder, CoreError> {
    Ok(EdgeInfo::builder()
        .guard(Guard::parse(expression)?)
        .on_guard_fail(failure))
}

/// Builds the state-driven table. Edge A dispatches the first request.
pub fn transition_table(
    case_type: &str,
    dispatcher: Arc<Dispatcher>,
) -> Result<TransitionTable, CoreError> {
    use states::*;

    let a = EdgeInfo::builder()
        .need(dispatcher.payload_fields().iter().cloned())
        .set_reference("case_creation_date", "now")
        .set_reference("case_id", "case_id")
        .set_text("case_status", case_status::SMEV_SENDING)
        .after(move |case: &Case, attributes: &Attributes| {
            dispatcher
                .dispatch(&case.id, attributes)
                .map(|_| ())
                .map_err(|e| e.into_core())
        })
        .build()?;

    let c1 = EdgeInfo::builder()
        .need(["planned_sending_date"])
        .set_text("case_status", case_status::PENDING)
        .set_reference("pending_register_sending_date", "now")
        .set_reference("planned_finish_date", "planned_sending_date")
        .set_all(from_params_with_the_same_names(register_fields("pending_register")))
        .build()?;

    let mut cleared = register_fields("pending_register");
    cleared.push("pending_register_sending_date".to_string());
    let c2 = guarded("!rejected", failures::PENDING_PACKAGING)?
        .need(["rejecting_date", "planned_sending_date"])
        .set_text("case_status", case_status::PACKAGING)
        .set_reference("planned_finish_date", "planned_sending_date")
        .set_all(blank(cleared))
        .build()?;

    let c3 = guarded(
        "!issuance_in_institution && !rejected",
        failures::PENDING_PROCESSING,
    )?
    .need(["issue_method", "rejecting_date", "planned_receiving_date"])
    .set_text("case_status", case_status::PROCESSING)
    .set_reference("processing_sending_date", "now")
    .set_reference("planned_finish_date", "planned_receiving_date")
    .set_all(from_params_with_the_same_names(office_fields("processing")))
    .build()?;

    let mut cleared = register_fields("pending_rejecting_register");
    cleared.push("pending_rejecting_register_sending_date".to_string());
    let c4 = guarded("rejected", failures::PENDING_REJECTING)?
        .need(["rejecting_date", "planned_rejecting_finish_date"])
        .set_text("case_status", case_status::REJECTING)
        .set_reference("planned_finish_date", "planned_rejecting_finish_date")
        .set_all(blank(cleared))
        .build()?;

    let c5 = EdgeInfo::builder()
        .need(["planned_rejecting_finish_date"])
        .set_text("case_status", case_status::PENDING)
        .set_reference("pending_rejecting_register_sending_date", "now")
        .set_reference("planned_finish_date", "planned_rejecting_finish_date")
        .set_all(from_params_with_the_same_names(register_fields(
            "pending_rejecting_register",
        )))
        .build()?;

    let c6 = guarded(
        "issuance_in_institution || rejected",
        failures::PENDING_CLOSED,
    )?
    .need(["issue_method", "rejecting_date"])
    .set_text("case_status", case_status::CLOSED)
    .set_reference("closed_date", "now")
    .set_null("planned_finish_date")
    .set_all(from_params_with_the_same_names(office_fields("closed")))
    .build()?;

    let mut issuance_fields = office_fields("issuance");
    issuance_fields.push("result_id".to_string());
    let c7 = EdgeInfo::builder()
        .need(["planned_issuance_finish_date"])
        .set_text("case_status", case_status::ISSUANCE)
        .set_reference("issuance_receiving_date", "now")
        .set_reference("planned_finish_date", "planned_issuance_finish_date")
        .set_all(from_params_with_the_same_names(issuance_fields))
        .build()?;

    let c8 = guarded(
        "!can_be_issued && !close_on_reject",
        failures::ISSUANCE_REJECTING,
    )?
    .need([
        "planned_rejecting_date",
        "planned_rejecting_finish_date",
        "close_on_reject",
    ])
    .set_text("case_status", case_status::REJECTING)
    .set_reference("rejecting_date", "now")
    .set_reference("planned_finish_date", "planned_rejecting_finish_date")
    .build()?;

    let c9 = guarded("can_be_issued || close_on_reject", failures::ISSUANCE_CLOSED)?
        .need(["planned_rejecting_date", "close_on_reject"])
        .set_text("case_status", case_status::CLOSED)
        .set_reference("closed_date", "now")
        .set_null("planned_finish_date")
        .set_all(from_params_with_the_same_names(office_fields("closed")))
        .build()?;

    TransitionTable::builder(case_type)
        .edge(None, SMEV_SENDING, a)
        .edge(Some(PACKAGING), PENDING, c1)
        .edge(Some(PENDING), PACKAGING, c2)
        .edge(Some(PENDING), PROCESSING, c3)
        .edge(Some(PENDING), REJECTING, c4)
        .edge(Some(REJECTING), PENDING, c5)
        .edge(Some(PENDING), CLOSED, c6)
        .edge(Some(PROCESSING), ISSUANCE, c7)
        .edge(Some(ISSUANCE), REJECTING, c8)
        .edge(Some(ISSUANCE), CLOSED, c9)
        .predicate("rejected", rejected)
        .predicate("issuance_in_institution", issuance_in_institution)
        .predicate("can_be_issued", can_be_issued)
        .predicate("close_on_reject", close_on_reject)
        .attribute_accessor("planned_sending_date")
        .attribute_accessor("planned_receiving_date")
        .attribute_accessor("planned_rejecting_finish_date")
        .attribute_accessor("planned_issuance_finish_date")
        .build()
}

/// Builds the message-driven table. Edge B1 schedules a retry of the request.
pub fn signal_table(case_type: &str, retry: Arc<RetryPolicy>) -> Result<SignalTable, CoreError> {
    use states::*;

    let hook = Arc::clone(&retry);
    let b1 = EdgeInfo::builder()
        .guard(Guard::parse("retry_allowed")?)
        .need(retry.payload_fields().iter().cloned())
        .set_text("case_status", case_status::ERROR)
        .after(move |case: &Case, attributes: &Attributes| {
            hook.schedule(&case.id, attributes)
                .map(|_| ())
                .map_err(|e| e.into_core())
        })
        .to(ERROR)
        .build()?;

    let b2 = EdgeInfo::builder()
        .guard(Guard::parse("!retry_allowed")?)
        .need(["planned_sending_date"])
        .set_text("case_status", case_status::PACKAGING)
        .set_reference("planned_finish_date", "planned_sending_date")
        .to(PACKAGING)
        .build()?;

    let b3 = EdgeInfo::builder()
        .guard(Guard::parse("!mfc_issuance")?)
        .need(["issue_method"])
        .set_reference("closed_date", "now")
        .set_text("case_status", case_status::CLOSED)
        .to(CLOSED)
        .build()?;

    let b4 = EdgeInfo::builder()
        .guard(Guard::parse("mfc_issuance")?)
        .need(["issue_method", "planned_issuance_finish_date"])
        .set_text("case_status", case_status::ISSUANCE)
        .set_reference("issuance_receiving_date", "now")
        .set_reference("planned_finish_date", "planned_issuance_finish_date")
        .set_text("close_on_reject", CLOSE_ON_REJECT_MARK)
        .to(ISSUANCE)
        .build()?;

    let replies = [ResponseFormat::Rejection, ResponseFormat::Response];
    let mut builder = SignalTable::builder(case_type);
    for from in [SMEV_SENDING, ERROR] {
        builder = builder
            .edge(Some(from), ResponseFormat::Exception, b1.clone())
            .edge(Some(from), ResponseFormat::Exception, b2.clone())
            .edges_for(Some(from), &replies, b3.clone())
            .edges_for(Some(from), &replies, b4.clone());
    }

    builder
        .predicate("retry_allowed", move |ctx| {
            Ok(retry.retry_allowed(ctx.case_id())?)
        })
        .predicate("mfc_issuance", mfc_issuance)
        .attribute_accessor("planned_sending_date")
        .attribute_accessor("planned_issuance_finish_date")
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use casegraph_core::{Predicates, State};
    use chrono::NaiveDate;

    fn context(pairs: &[(&str, Option<&str>)]) -> AttributeContext {
        let attributes = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.map(str::to_string)))
            .collect();
        AttributeContext::new(
            "c-1",
            attributes,
            NaiveDate::from_ymd_opt(2025, 6, 10).unwrap(),
            Arc::new(Predicates::new()),
        )
    }

    #[test]
    fn test_field_lists() {
        let register = register_fields("pending_register");
        assert_eq!(register.len(), 19);
        assert_eq!(register[0], "pending_register_institution_name");
        assert!(register.contains(&"pending_register_institution_office_region_code".to_string()));
        assert!(register.contains(&"pending_register_number".to_string()));
        assert!(register.contains(&"pending_register_operator_surname".to_string()));

        let office = office_fields("closed");
        assert_eq!(office.len(), 17);
        assert!(office.contains(&"closed_office_mfc_street".to_string()));
        assert!(office.contains(&"closed_operator_id".to_string()));
    }

    #[test]
    fn test_rejected_and_institution_predicates() {
        assert!(!rejected(&context(&[("rejecting_date", None)])).unwrap());
        assert!(rejected(&context(&[("rejecting_date", Some("2025-01-01"))])).unwrap());

        assert!(issuance_in_institution(&context(&[("issue_method", Some("Institution"))])).unwrap());
        assert!(!issuance_in_institution(&context(&[("issue_method", Some("mfc"))])).unwrap());
        assert!(!issuance_in_institution(&context(&[])).unwrap());
    }

    #[test]
    fn test_can_be_issued() {
        let check = |value: Option<&str>| {
            can_be_issued(&context(&[("planned_rejecting_date", value)])).unwrap()
        };
        assert!(check(Some("2025-06-11")));
        assert!(!check(Some("2025-06-10")));
        assert!(!check(Some("2025-06-09")));
        assert!(check(None));
        assert!(check(Some("invalid")));
        assert!(can_be_issued(&context(&[])).unwrap());
    }

    #[test]
    fn test_mfc_issuance_and_marker() {
        assert!(mfc_issuance(&context(&[("issue_method", Some("MFC"))])).unwrap());
        assert!(!mfc_issuance(&context(&[("issue_method", Some("  "))])).unwrap());
        assert!(!mfc_issuance(&context(&[("issue_method", Some("not mfc"))])).unwrap());

        assert!(close_on_reject(&context(&[("close_on_reject", Some("true"))])).unwrap());
        assert!(!close_on_reject(&context(&[("close_on_reject", Some("yes"))])).unwrap());
        assert!(!close_on_reject(&context(&[("close_on_reject", None)])).unwrap());
    }

    #[test]
    fn test_failure_codes_are_distinct() {
        let codes = [
            failures::PENDING_PACKAGING.code,
            failures::PENDING_PROCESSING.code,
            failures::PENDING_REJECTING.code,
            failures::PENDING_CLOSED.code,
            failures::ISSUANCE_REJECTING.code,
            failures::ISSUANCE_CLOSED.code,
        ];
        let unique: std::collections::BTreeSet<_> = codes.iter().collect();
        assert_eq!(unique.len(), codes.len());
    }

    #[test]
    fn test_states_are_plain_names() {
        assert_eq!(State::from(states::SMEV_SENDING).as_str(), "smev_sending");
    }
}
