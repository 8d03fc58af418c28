use thiserror::Error;

use crate::codec::FillMismatch;
use crate::model::{DocId, JobState};

/// Problems with what the user asked for; no work is started.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UserInputError {
    #[error("no knowledge store folder selected")]
    MissingStoreRoot,
    #[error("no document selected")]
    NoDocumentSelected,
}

/// A proposed manual edit that cannot be accepted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ManualEditRejected {
    #[error("document {0:?} is not registered")]
    UnknownDocument(DocId),
    #[error("document is {0:?}, edits need a completed fill")]
    NotEditable(JobState),
    #[error("no change line with id {0}")]
    UnknownChangeLine(usize),
    #[error("edit changes more than the placeholders: {0}")]
    Mismatch(#[from] FillMismatch),
}

/// A job board mutation that did not apply.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BoardError {
    #[error("document {0:?} is not registered")]
    UnknownDocument(DocId),
    #[error("document {0:?} was registered again since this run started")]
    StaleRun(DocId),
    #[error("document {doc_id:?} is {state:?}")]
    WrongState { doc_id: DocId, state: JobState },
}

impl BoardError {
    /// The document went away (removed or re-registered) while work was in
    /// flight; the result should be dropped without further notice.
    pub fn is_detached(&self) -> bool {
        matches!(self, BoardError::UnknownDocument(_) | BoardError::StaleRun(_))
    }
}
