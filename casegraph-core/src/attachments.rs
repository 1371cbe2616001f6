//! Persistence of files attached to inbound replies.
//!
//! Each attachment is fetched from the blob source, decoded from the base64
//! body that follows its content-type marker, stored as a file and linked to
//! the case by a document record. Attachments are independent: a failure is
//! logged and the rest are still processed.

use crate::clock::Clock;
use crate::error::CoreError;
use crate::ports::{BlobSource, DocumentStore, NewDocument};
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use casegraph_protocol::AttachmentRef;

/// Marker preceding the encoded body, as in `data:text/plain;base64,SGk=`.
pub const BASE64_MARKER: &str = "base64,";

/// Document direction of files received from the remote side.
pub const OUTPUT_DIRECTION: &str = "output";

/// How received files are provided.
pub const PROVIDED_AS_ORIGINAL: &str = "original";

const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Decodes the body following [`BASE64_MARKER`].
pub fn decode_body(content: &str) -> Result<Vec<u8>, CoreError> {
    let index = content.find(BASE64_MARKER).ok_or_else(|| CoreError::Attachment {
        reason: "content has no base64 marker".to_string(),
    })?;
    let encoded: String = content[index + BASE64_MARKER.len()..]
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();

    LENIENT
        .decode(encoded.as_bytes())
        .map_err(|e| CoreError::Attachment {
            reason: format!("invalid base64 body: {}", e),
        })
}

/// Outcome of saving a reply's attachments.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AttachmentReport {
    /// Identifiers of the created documents.
    pub documents: Vec<String>,
    /// Number of attachments that could not be saved.
    pub failed: usize,
}

/// Saves reply attachments as case documents.
pub struct AttachmentSaver<'a> {
    blobs: &'a dyn BlobSource,
    documents: &'a dyn DocumentStore,
    clock: &'a dyn Clock,
}

impl<'a> AttachmentSaver<'a> {
    pub fn new(
        blobs: &'a dyn BlobSource,
        documents: &'a dyn DocumentStore,
        clock: &'a dyn Clock,
    ) -> Self {
        Self {
            blobs,
            documents,
            clock,
        }
    }

    /// Saves every non-null attachment, logging failures.
    pub fn save_all(&self, case_id: &str, attachments: &[Option<AttachmentRef>]) -> AttachmentReport {
        let mut report = AttachmentReport::default();

        for attachment in attachments.iter().flatten() {
            match self.save(case_id, attachment) {
                Ok(document_id) => {
                    tracing::debug!(
                        "Saved attachment {} of case {} as document {}",
                        attachment.fs_id,
                        case_id,
                        document_id
                    );
                    report.documents.push(document_id);
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to save attachment {} of case {}: {}",
                        attachment.fs_id,
                        case_id,
                        e
                    );
                    report.failed += 1;
                }
            }
        }

        report
    }

    /// Saves one attachment, returning the document identifier.
    pub fn save(&self, case_id: &str, attachment: &AttachmentRef) -> Result<String, CoreError> {
        let content = self.blobs.fetch(&attachment.fs_id)?;
        let body = decode_body(&content)?;
        let blob_id = self.documents.create_blob(body)?;

        let document = NewDocument {
            case_id: case_id.to_string(),
            blob_id,
            mime_type: attachment.mime_type.clone(),
            filename: attachment.filename.clone(),
            direction: OUTPUT_DIRECTION.to_string(),
            provided: true,
            provided_as: PROVIDED_AS_ORIGINAL.to_string(),
            created_at: self.clock.timestamp(),
        };
        Ok(self.documents.create_document(document)?)
    }
}
