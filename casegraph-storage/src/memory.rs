//! In-memory implementation of every storage port.

use casegraph_core::case::STATE_ATTRIBUTE;
use casegraph_core::clock::parse_date;
use casegraph_core::{
    Attributes, BlobSource, Case, CaseFilter, CaseRecord, CaseStore, Clock, DocumentStore,
    NewDocument, Request, RequestStore, State, StoreError, SystemClock,
};
use casegraph_protocol::ResponseFormat;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A stored case: type tag plus attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCase {
    #[serde(rename = "type")]
    pub case_type: String,
    pub attributes: Attributes,
}

/// Case, request, document and remote-file storage held in memory.
pub struct MemoryStore {
    pub(crate) cases: RwLock<BTreeMap<String, StoredCase>>,
    pub(crate) requests: RwLock<Vec<Request>>,
    pub(crate) documents: RwLock<BTreeMap<String, NewDocument>>,
    pub(crate) blobs: RwLock<HashMap<String, Vec<u8>>>,
    pub(crate) remote: RwLock<HashMap<String, String>>,
    commits: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Uses `clock` to timestamp created requests.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            cases: RwLock::new(BTreeMap::new()),
            requests: RwLock::new(Vec::new()),
            documents: RwLock::new(BTreeMap::new()),
            blobs: RwLock::new(HashMap::new()),
            remote: RwLock::new(HashMap::new()),
            commits: AtomicU64::new(0),
            clock,
        }
    }

    // =========================================================================
    // Cases
    // =========================================================================

    /// Inserts or replaces a case.
    pub fn insert_case(&self, case: &Case, attributes: Attributes) {
        self.cases.write().insert(
            case.id.clone(),
            StoredCase {
                case_type: case.case_type.clone(),
                attributes,
            },
        );
    }

    /// Creates a case with a fresh identifier.
    pub fn create_case(&self, case_type: &str, attributes: Attributes) -> Case {
        let case = Case::new(uuid::Uuid::new_v4().to_string(), case_type);
        self.insert_case(&case, attributes);
        case
    }

    /// Full attribute set of a case.
    pub fn attributes(&self, case_id: &str) -> Option<Attributes> {
        self.cases.read().get(case_id).map(|c| c.attributes.clone())
    }

    /// One attribute value; `None` when absent or null.
    pub fn attribute(&self, case_id: &str, name: &str) -> Option<String> {
        self.cases
            .read()
            .get(case_id)
            .and_then(|c| c.attributes.get(name).cloned().flatten())
    }

    pub fn case_count(&self) -> usize {
        self.cases.read().len()
    }

    /// Number of commit and bulk commit calls served.
    pub fn commit_count(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }

    // =========================================================================
    // Requests, documents and files
    // =========================================================================

    /// Requests of a case in creation order.
    pub fn requests_for(&self, case_id: &str) -> Vec<Request> {
        self.requests
            .read()
            .iter()
            .filter(|r| r.case_id == case_id)
            .cloned()
            .collect()
    }

    /// Documents of a case, by document identifier.
    pub fn documents_for(&self, case_id: &str) -> Vec<(String, NewDocument)> {
        self.documents
            .read()
            .iter()
            .filter(|(_, d)| d.case_id == case_id)
            .map(|(id, d)| (id.clone(), d.clone()))
            .collect()
    }

    pub fn blob(&self, blob_id: &str) -> Option<Vec<u8>> {
        self.blobs.read().get(blob_id).cloned()
    }

    /// Registers a file as retrievable through [`BlobSource::fetch`].
    pub fn put_remote_file(&self, reference: impl Into<String>, content: impl Into<String>) {
        self.remote.write().insert(reference.into(), content.into());
    }
}

impl CaseStore for MemoryStore {
    fn load(&self, case_id: &str) -> Result<Option<Case>, StoreError> {
        Ok(self
            .cases
            .read()
            .get(case_id)
            .map(|c| Case::new(case_id, c.case_type.clone())))
    }

    fn fetch_attributes(&self, case_id: &str, names: &[String]) -> Result<Attributes, StoreError> {
        let cases = self.cases.read();
        let case = cases.get(case_id).ok_or_else(|| StoreError::CaseNotFound {
            case_id: case_id.to_string(),
        })?;

        Ok(names
            .iter()
            .filter_map(|name| {
                case.attributes
                    .get(name)
                    .map(|value| (name.clone(), value.clone()))
            })
            .collect())
    }

    fn commit(&self, case_id: &str, state: &State, attributes: &Attributes) -> Result<(), StoreError> {
        self.bulk_commit(&[case_id.to_string()], state, attributes)
    }

    fn bulk_commit(
        &self,
        case_ids: &[String],
        state: &State,
        attributes: &Attributes,
    ) -> Result<(), StoreError> {
        let mut cases = self.cases.write();

        // all or nothing
        if let Some(missing) = case_ids.iter().find(|id| !cases.contains_key(*id)) {
            return Err(StoreError::CaseNotFound {
                case_id: missing.clone(),
            });
        }

        for id in case_ids {
            if let Some(case) = cases.get_mut(id) {
                case.attributes
                    .insert(STATE_ATTRIBUTE.to_string(), Some(state.as_str().to_string()));
                case.attributes
                    .extend(attributes.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
        }

        self.commits.fetch_add(1, Ordering::SeqCst);
        tracing::debug!("Committed state '{}' to {} case(s)", state, case_ids.len());
        Ok(())
    }

    fn query(&self, filter: &CaseFilter, fields: &[String]) -> Result<Vec<CaseRecord>, StoreError> {
        let cases = self.cases.read();

        Ok(cases
            .iter()
            .filter(|(_, case)| matches_filter(case, filter))
            .map(|(id, case)| CaseRecord {
                id: id.clone(),
                attributes: fields
                    .iter()
                    .filter_map(|f| case.attributes.get(f).map(|v| (f.clone(), v.clone())))
                    .collect(),
            })
            .collect())
    }
}

fn matches_filter(case: &StoredCase, filter: &CaseFilter) -> bool {
    if case.case_type != filter.case_type {
        return false;
    }

    if let Some(state) = &filter.state {
        let current = case.attributes.get(STATE_ATTRIBUTE).and_then(|v| v.as_deref());
        if current != Some(state.as_str()) {
            return false;
        }
    }

    filter.date_at_most.iter().all(|(name, max)| {
        case.attributes
            .get(name)
            .and_then(|v| v.as_deref())
            .and_then(parse_date)
            .is_some_and(|date| date <= *max)
    })
}

impl RequestStore for MemoryStore {
    fn create(
        &self,
        case_id: &str,
        message_id: &str,
        response_format: Option<ResponseFormat>,
    ) -> Result<Request, StoreError> {
        let request = Request {
            id: uuid::Uuid::new_v4().to_string(),
            case_id: case_id.to_string(),
            message_id: message_id.to_string(),
            response_format,
            response_content: None,
            created_at: self.clock.now(),
        };
        self.requests.write().push(request.clone());
        Ok(request)
    }

    fn find_by_message_id(&self, message_id: &str) -> Result<Option<Request>, StoreError> {
        Ok(self
            .requests
            .read()
            .iter()
            .find(|r| r.message_id == message_id)
            .cloned())
    }

    fn update_response(
        &self,
        request_id: &str,
        format: ResponseFormat,
        content: &str,
    ) -> Result<(), StoreError> {
        let mut requests = self.requests.write();
        let request = requests
            .iter_mut()
            .find(|r| r.id == request_id)
            .ok_or_else(|| StoreError::RequestNotFound {
                request_id: request_id.to_string(),
            })?;
        request.response_format = Some(format);
        request.response_content = Some(content.to_string());
        Ok(())
    }

    fn count_by_format(&self, case_id: &str, format: ResponseFormat) -> Result<usize, StoreError> {
        Ok(self
            .requests
            .read()
            .iter()
            .filter(|r| r.case_id == case_id && r.response_format == Some(format))
            .count())
    }
}

impl DocumentStore for MemoryStore {
    fn create_blob(&self, body: Vec<u8>) -> Result<String, StoreError> {
        let id = uuid::Uuid::new_v4().to_string();
        self.blobs.write().insert(id.clone(), body);
        Ok(id)
    }

    fn create_document(&self, document: NewDocument) -> Result<String, StoreError> {
        if !self.cases.read().contains_key(&document.case_id) {
            return Err(StoreError::CaseNotFound {
                case_id: document.case_id,
            });
        }
        let id = uuid::Uuid::new_v4().to_string();
        self.documents.write().insert(id.clone(), document);
        Ok(id)
    }
}

impl BlobSource for MemoryStore {
    fn fetch(&self, reference: &str) -> Result<String, StoreError> {
        self.remote
            .read()
            .get(reference)
            .cloned()
            .ok_or_else(|| StoreError::BlobNotFound {
                reference: reference.to_string(),
            })
    }
}

/// Builds an attribute map from literal pairs.
pub fn attributes<'a, I>(pairs: I) -> Attributes
where
    I: IntoIterator<Item = (&'a str, Option<&'a str>)>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.map(str::to_string)))
        .collect()
}
