use thiserror::Error;

use crate::types::DocId;

pub type CsResult<T> = Result<T, CsError>;

#[derive(Debug, Error)]
pub enum CsError {
    /// Login rejected: empty password, or a password that fails the stored verifier.
    #[error("weak credential: {0}")]
    WeakCredential(String),

    #[error("no keys derived: log in before uploading or searching")]
    KeyNotDerived,

    #[error("document already exists: {0} (pass replace to overwrite)")]
    DuplicateDocument(DocId),

    #[error("invalid doc_id {0:?}: must be non-empty without surrounding whitespace")]
    InvalidDocId(String),

    #[error("document {0} has no indexable keywords")]
    EmptyDocument(DocId),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// Integrity tag did not verify: tampering, wrong doc_id binding, or wrong key.
    #[error("authentication failed for document {0}")]
    Authentication(DocId),

    #[error("document {0} failed integrity verification")]
    TamperedDocument(DocId),

    #[error("server unavailable: {0}")]
    ServerUnavailable(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CsError {
    /// Errors the caller can recover from by changing input (reprompt, rename, requery).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CsError::WeakCredential(_)
                | CsError::DuplicateDocument(_)
                | CsError::InvalidDocId(_)
                | CsError::EmptyDocument(_)
                | CsError::InvalidQuery(_)
                | CsError::Authentication(_)
                | CsError::TamperedDocument(_)
        )
    }
}
