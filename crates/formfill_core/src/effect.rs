use std::path::PathBuf;

use crate::error::{ManualEditRejected, UserInputError};
use crate::{EditPlan, JobTicket};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    StartPipeline {
        ticket: JobTicket,
        store_root: PathBuf,
    },
    /// Stops the in-flight work of one run of a removed document.
    CancelDocument {
        ticket: JobTicket,
    },
    SyncDocument {
        doc_id: crate::DocId,
    },
    CommitEdit(EditPlan),
    Notify(Notice),
}

/// Something the user must be told right away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    InvalidInput(UserInputError),
    EditRejected(ManualEditRejected),
}
