use std::path::{Path, PathBuf};

use formfill_core::{
    CheckboxEntry, DocId, FillEntry, JobTicket, KnowledgeSnapshot, PlaceholderPattern,
};

use crate::scheduler::{CancelFlag, Priority};
use crate::ResolverError;

/// Per-call metadata handed to every resolver operation.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub doc_id: DocId,
    /// Run of the document the call belongs to; zero outside a run.
    pub run_id: u64,
    pub priority: Priority,
    pub cancel: Option<CancelFlag>,
}

impl CallContext {
    pub fn new(doc_id: impl Into<DocId>, priority: Priority) -> Self {
        Self {
            doc_id: doc_id.into(),
            run_id: 0,
            priority,
            cancel: None,
        }
    }

    pub fn for_run(ticket: &JobTicket, priority: Priority) -> Self {
        Self {
            run_id: ticket.run_id,
            ..Self::new(ticket.doc_id.clone(), priority)
        }
    }

    /// A call owned by no document run. It carries a flag of its own that
    /// no document cancellation reaches.
    pub fn shared(key: impl Into<DocId>, priority: Priority) -> Self {
        Self::new(key, priority).with_cancel(CancelFlag::new())
    }

    pub fn ticket(&self) -> JobTicket {
        JobTicket {
            doc_id: self.doc_id.clone(),
            run_id: self.run_id,
        }
    }

    pub fn with_cancel(mut self, flag: CancelFlag) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Fails with `Cancelled` once the document's flag has been tripped.
    /// Long-running resolvers call this between sub-steps.
    pub fn checkpoint(&self) -> Result<(), ResolverError> {
        match &self.cancel {
            Some(flag) if flag.is_cancelled() => Err(ResolverError::cancelled()),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormText {
    pub text: String,
    pub has_interactive_fields: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProcessedFills {
    pub entries: Vec<FillEntry>,
    pub missing_keys: Vec<String>,
}

/// The external collaborator that reads documents, proposes placeholders,
/// matches them to knowledge-store keys and renders the filled output.
#[async_trait::async_trait]
pub trait FieldResolver: Send + Sync {
    async fn extract_text(&self, cx: &CallContext, doc: &Path) -> Result<FormText, ResolverError>;

    /// Returns the placeholder pattern source; `None` when the document has
    /// no recognisable placeholders.
    async fn detect_pattern(
        &self,
        cx: &CallContext,
        text: &str,
        has_interactive_fields: bool,
    ) -> Result<Option<String>, ResolverError>;

    async fn resolve_context(
        &self,
        cx: &CallContext,
        store_root: &Path,
    ) -> Result<KnowledgeSnapshot, ResolverError>;

    /// Upserts one key and returns the store as it is afterwards.
    async fn add_context(
        &self,
        cx: &CallContext,
        store_root: &Path,
        key: &str,
        value: &str,
    ) -> Result<KnowledgeSnapshot, ResolverError>;

    async fn detect_fill_entries(
        &self,
        cx: &CallContext,
        lines: &[String],
        pattern: Option<&PlaceholderPattern>,
    ) -> Result<Vec<FillEntry>, ResolverError>;

    async fn process_fill_entries(
        &self,
        cx: &CallContext,
        entries: &[FillEntry],
        store_root: &Path,
        pattern: Option<&PlaceholderPattern>,
    ) -> Result<ProcessedFills, ResolverError>;

    async fn detect_checkbox_entries(
        &self,
        cx: &CallContext,
        lines: &[String],
    ) -> Result<Vec<CheckboxEntry>, ResolverError>;

    async fn process_checkbox_entries(
        &self,
        cx: &CallContext,
        entries: &[CheckboxEntry],
        store_root: &Path,
    ) -> Result<Vec<CheckboxEntry>, ResolverError>;

    /// Renders the filled document and returns where it was written.
    async fn fill_output(
        &self,
        cx: &CallContext,
        doc: &Path,
        entries: &[FillEntry],
        checkboxes: &[CheckboxEntry],
        output_path: &Path,
    ) -> Result<PathBuf, ResolverError>;

    /// Fire-and-forget notice that the work of one document run should stop.
    async fn cancel_document(&self, ticket: &JobTicket);
}
