use std::fmt;
use std::path::PathBuf;

use formfill_core::{DocId, JobState, JobTicket};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ExtractText,
    DetectPattern,
    ResolveContext,
    DetectFillEntries,
    ProcessFillEntries,
    DetectCheckboxEntries,
    ProcessCheckboxEntries,
    FillOutput,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Every filled value still matches the knowledge store.
    Unchanged,
    Rewritten { lines: usize, output_path: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    StageStarted {
        ticket: JobTicket,
        stage: Stage,
    },
    JobFinished {
        doc_id: DocId,
        state: JobState,
    },
    /// A run ended without a result because its document was removed or
    /// registered again.
    RunDropped {
        ticket: JobTicket,
    },
    Synced {
        doc_id: DocId,
        result: Result<SyncOutcome, String>,
    },
    EditCommitted {
        doc_id: DocId,
        result: Result<PathBuf, String>,
    },
    KnowledgeStoreChanged {
        root: PathBuf,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct ResolverError {
    pub kind: FailureKind,
    pub message: String,
}

impl ResolverError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self::new(FailureKind::Cancelled, "cancelled")
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == FailureKind::Cancelled
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    Cancelled,
    Timeout,
    HttpStatus(u16),
    /// The backend answered but the body could not be decoded.
    MalformedResponse,
    Transport,
    /// The backend reported a failure of its own.
    Backend,
    Io,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Cancelled => write!(f, "cancelled"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::HttpStatus(code) => write!(f, "http status {code}"),
            FailureKind::MalformedResponse => write!(f, "malformed response"),
            FailureKind::Transport => write!(f, "transport error"),
            FailureKind::Backend => write!(f, "backend error"),
            FailureKind::Io => write!(f, "io error"),
        }
    }
}
