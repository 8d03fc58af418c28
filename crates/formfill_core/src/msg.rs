use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Msg {
    /// User picked the knowledge store folder.
    StoreRootSelected(PathBuf),
    /// User added documents to fill.
    DocumentsAdded(Vec<PathBuf>),
    /// User removed a document; its in-flight work is cancelled.
    DocumentRemoved(crate::DocId),
    /// User focused a document; its resolver calls run in the foreground.
    DocumentSelected(crate::DocId),
    /// User rewrote one change line by hand.
    EditProposed {
        doc_id: crate::DocId,
        change_id: usize,
        filled_line: String,
    },
    /// The knowledge store was written to.
    KnowledgeStoreChanged,
    /// Restore previously completed jobs from persisted state.
    RestoreCompletedJobs(Vec<crate::CompletedJobSnapshot>),
}
