//! Small in-memory ports for unit tests.

use crate::case::{Attributes, Case, State, STATE_ATTRIBUTE};
use crate::clock::parse_date;
use crate::error::StoreError;
use crate::ports::{
    BlobSource, CaseFilter, CaseRecord, CaseStore, DocumentStore, NewDocument, Request,
    RequestStore,
};
use casegraph_protocol::ResponseFormat;
use chrono::NaiveDate;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
pub struct MemoryCases {
    cases: Mutex<HashMap<String, (Case, Attributes)>>,
    commits: AtomicUsize,
}

impl MemoryCases {
    pub fn insert(&self, id: &str, case_type: &str, attrs: &[(&str, Option<&str>)]) -> Case {
        let case = Case::new(id, case_type);
        let attributes = attrs
            .iter()
            .map(|(k, v)| (k.to_string(), v.map(str::to_string)))
            .collect();
        self.cases
            .lock()
            .insert(id.to_string(), (case.clone(), attributes));
        case
    }

    pub fn attribute(&self, id: &str, name: &str) -> Option<String> {
        self.cases
            .lock()
            .get(id)
            .and_then(|(_, attrs)| attrs.get(name).cloned().flatten())
    }

    pub fn has_attribute(&self, id: &str, name: &str) -> bool {
        self.cases
            .lock()
            .get(id)
            .is_some_and(|(_, attrs)| attrs.contains_key(name))
    }

    pub fn snapshot(&self, id: &str) -> Attributes {
        self.cases
            .lock()
            .get(id)
            .map(|(_, attrs)| attrs.clone())
            .unwrap_or_default()
    }

    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }
}

impl CaseStore for MemoryCases {
    fn load(&self, case_id: &str) -> Result<Option<Case>, StoreError> {
        Ok(self.cases.lock().get(case_id).map(|(case, _)| case.clone()))
    }

    fn fetch_attributes(&self, case_id: &str, names: &[String]) -> Result<Attributes, StoreError> {
        let cases = self.cases.lock();
        let (_, attrs) = cases.get(case_id).ok_or_else(|| StoreError::CaseNotFound {
            case_id: case_id.to_string(),
        })?;
        Ok(names
            .iter()
            .filter_map(|n| attrs.get(n).map(|v| (n.clone(), v.clone())))
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
        let mut cases = self.cases.lock();
        for id in case_ids {
            let (_, attrs) = cases.get_mut(id).ok_or_else(|| StoreError::CaseNotFound {
                case_id: id.clone(),
            })?;
            attrs.insert(STATE_ATTRIBUTE.to_string(), Some(state.0.clone()));
            attrs.extend(attributes.clone());
        }
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn query(&self, filter: &CaseFilter, fields: &[String]) -> Result<Vec<CaseRecord>, StoreError> {
        let cases = self.cases.lock();
        let mut records: Vec<CaseRecord> = cases
            .iter()
            .filter(|(_, (case, attrs))| {
                case.case_type == filter.case_type
                    && filter.state.as_ref().map_or(true, |s| {
                        attrs.get(STATE_ATTRIBUTE).cloned().flatten().as_deref() == Some(s.as_str())
                    })
                    && filter.date_at_most.iter().all(|(name, max)| {
                        attrs
                            .get(name)
                            .cloned()
                            .flatten()
                            .and_then(|v| parse_date(&v))
                            .is_some_and(|d: NaiveDate| d <= *max)
                    })
            })
            .map(|(id, (_, attrs))| CaseRecord {
                id: id.clone(),
                attributes: fields
                    .iter()
                    .filter_map(|f| attrs.get(f).map(|v| (f.clone(), v.clone())))
                    .collect(),
            })
            .collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }
}

#[derive(Default)]
pub struct MemoryRequests {
    requests: Mutex<Vec<Request>>,
    lookups: AtomicUsize,
}

impl MemoryRequests {
    pub fn insert(&self, id: &str, case_id: &str, message_id: &str) {
        self.requests.lock().push(Request {
            id: id.to_string(),
            case_id: case_id.to_string(),
            message_id: message_id.to_string(),
            response_format: None,
            response_content: None,
            created_at: NaiveDate::from_ymd_opt(2025, 1, 1)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .unwrap_or_default(),
        });
    }

    pub fn get(&self, id: &str) -> Option<Request> {
        self.requests.lock().iter().find(|r| r.id == id).cloned()
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

impl RequestStore for MemoryRequests {
    fn create(
        &self,
        case_id: &str,
        message_id: &str,
        response_format: Option<ResponseFormat>,
    ) -> Result<Request, StoreError> {
        let id = format!("r-{}", self.requests.lock().len() + 1);
        self.insert(&id, case_id, message_id);
        let mut requests = self.requests.lock();
        let request = requests
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| StoreError::RequestNotFound { request_id: id.clone() })?;
        request.response_format = response_format;
        Ok(request.clone())
    }

    fn find_by_message_id(&self, message_id: &str) -> Result<Option<Request>, StoreError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .requests
            .lock()
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
        let mut requests = self.requests.lock();
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
            .lock()
            .iter()
            .filter(|r| r.case_id == case_id && r.response_format == Some(format))
            .count())
    }
}

#[derive(Default)]
pub struct MemoryDocuments {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    documents: Mutex<Vec<NewDocument>>,
}

impl MemoryDocuments {
    pub fn documents(&self) -> Vec<NewDocument> {
        self.documents.lock().clone()
    }

    pub fn blob(&self, id: &str) -> Option<Vec<u8>> {
        self.blobs.lock().get(id).cloned()
    }
}

impl DocumentStore for MemoryDocuments {
    fn create_blob(&self, body: Vec<u8>) -> Result<String, StoreError> {
        let mut blobs = self.blobs.lock();
        let id = format!("blob-{}", blobs.len() + 1);
        blobs.insert(id.clone(), body);
        Ok(id)
    }

    fn create_document(&self, document: NewDocument) -> Result<String, StoreError> {
        let mut documents = self.documents.lock();
        documents.push(document);
        Ok(format!("doc-{}", documents.len()))
    }
}

#[derive(Default)]
pub struct MemoryBlobs {
    contents: Mutex<HashMap<String, String>>,
}

impl MemoryBlobs {
    pub fn put(&self, reference: &str, content: &str) {
        self.contents
            .lock()
            .insert(reference.to_string(), content.to_string());
    }
}

impl BlobSource for MemoryBlobs {
    fn fetch(&self, reference: &str) -> Result<String, StoreError> {
        self.contents
            .lock()
            .get(reference)
            .cloned()
            .ok_or_else(|| StoreError::BlobNotFound {
                reference: reference.to_string(),
            })
    }
}

/// Case store that pauses between fetch and return, widening the window
/// between an engine's fetch and its commit.
pub struct SlowFetch {
    pub inner: Arc<MemoryCases>,
    pub delay: Duration,
}

impl CaseStore for SlowFetch {
    fn load(&self, case_id: &str) -> Result<Option<Case>, StoreError> {
        self.inner.load(case_id)
    }

    fn fetch_attributes(&self, case_id: &str, names: &[String]) -> Result<Attributes, StoreError> {
        let attributes = self.inner.fetch_attributes(case_id, names)?;
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        Ok(attributes)
    }

    fn commit(&self, case_id: &str, state: &State, attributes: &Attributes) -> Result<(), StoreError> {
        self.inner.commit(case_id, state, attributes)
    }

    fn bulk_commit(
        &self,
        case_ids: &[String],
        state: &State,
        attributes: &Attributes,
    ) -> Result<(), StoreError> {
        self.inner.bulk_commit(case_ids, state, attributes)
    }

    fn query(&self, filter: &CaseFilter, fields: &[String]) -> Result<Vec<CaseRecord>, StoreError> {
        self.inner.query(filter, fields)
    }
}
