//! Ports to the host system.
//!
//! The engines never own case, request or document data. They reach it
//! through these traits, which the host implements against its own storage
//! and transport. `casegraph-storage` provides in-memory implementations.

use crate::case::{Attributes, Case, State};
use crate::error::StoreError;
use casegraph_protocol::ResponseFormat;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Transport headers.
pub type Headers = BTreeMap<String, String>;

/// Selection of cases for [`CaseStore::query`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseFilter {
    pub case_type: String,
    pub state: Option<State>,
    /// `(attribute, date)` pairs: the attribute must parse as a date on or
    /// before the given date.
    pub date_at_most: Vec<(String, NaiveDate)>,
}

impl CaseFilter {
    pub fn of_type(case_type: impl Into<String>) -> Self {
        Self {
            case_type: case_type.into(),
            state: None,
            date_at_most: Vec::new(),
        }
    }

    pub fn in_state(mut self, state: impl Into<State>) -> Self {
        self.state = Some(state.into());
        self
    }

    pub fn date_at_most(mut self, attribute: impl Into<String>, date: NaiveDate) -> Self {
        self.date_at_most.push((attribute.into(), date));
        self
    }
}

/// A case returned by a query, with the requested fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseRecord {
    pub id: String,
    pub attributes: Attributes,
}

/// Case and attribute storage.
pub trait CaseStore: Send + Sync {
    /// Loads a case handle.
    fn load(&self, case_id: &str) -> Result<Option<Case>, StoreError>;

    /// Returns the named attributes that exist on the case.
    fn fetch_attributes(&self, case_id: &str, names: &[String]) -> Result<Attributes, StoreError>;

    /// Atomically sets `state` and every given attribute.
    fn commit(&self, case_id: &str, state: &State, attributes: &Attributes)
        -> Result<(), StoreError>;

    /// Atomically applies the same update to every listed case.
    fn bulk_commit(
        &self,
        case_ids: &[String],
        state: &State,
        attributes: &Attributes,
    ) -> Result<(), StoreError>;

    /// Returns matching cases with the requested fields.
    fn query(&self, filter: &CaseFilter, fields: &[String]) -> Result<Vec<CaseRecord>, StoreError>;
}

/// Correlated request record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub id: String,
    pub case_id: String,
    /// Correlation token carried by the outbound message and its reply.
    pub message_id: String,
    pub response_format: Option<ResponseFormat>,
    pub response_content: Option<String>,
    pub created_at: NaiveDateTime,
}

/// Correlated request storage.
pub trait RequestStore: Send + Sync {
    fn create(
        &self,
        case_id: &str,
        message_id: &str,
        response_format: Option<ResponseFormat>,
    ) -> Result<Request, StoreError>;

    fn find_by_message_id(&self, message_id: &str) -> Result<Option<Request>, StoreError>;

    fn update_response(
        &self,
        request_id: &str,
        format: ResponseFormat,
        content: &str,
    ) -> Result<(), StoreError>;

    /// Number of the case's requests whose recorded reply has this format.
    fn count_by_format(&self, case_id: &str, format: ResponseFormat) -> Result<usize, StoreError>;
}

/// Document record linking a stored file to a case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDocument {
    pub case_id: String,
    pub blob_id: String,
    pub mime_type: Option<String>,
    pub filename: Option<String>,
    pub direction: String,
    pub provided: bool,
    pub provided_as: String,
    pub created_at: String,
}

/// File and document storage.
pub trait DocumentStore: Send + Sync {
    /// Stores a file body, returning its identifier.
    fn create_blob(&self, body: Vec<u8>) -> Result<String, StoreError>;

    /// Stores a document record, returning its identifier.
    fn create_document(&self, document: NewDocument) -> Result<String, StoreError>;
}

/// Retrieval of files produced by the remote side.
pub trait BlobSource: Send + Sync {
    /// Raw content, e.g. `data:application/pdf;base64,JVBERi0...`.
    fn fetch(&self, reference: &str) -> Result<String, StoreError>;
}

/// Outbound message transport.
pub trait Transport: Send + Sync {
    fn publish(&self, destination: &str, payload: &str, headers: &Headers)
        -> Result<(), StoreError>;
}
