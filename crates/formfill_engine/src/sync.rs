//! Keeps completed documents consistent with the knowledge store.

use std::path::{Path, PathBuf};

use formfill_core::{
    filled_output_path, reconcile, BoardError, CheckboxEntry, DocId, EditPlan, FillEntry,
    JobState, JobTicket, ManualEditRejected, PlaceholderPattern,
};
use formfill_logging::{formfill_debug, formfill_info};
use thiserror::Error;

use crate::resolver::CallContext;
use crate::scheduler::Priority;
use crate::services::Services;
use crate::{EngineEvent, ResolverError, SyncOutcome};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("document {0:?} is not registered")]
    UnknownDocument(DocId),
    #[error("document {doc_id:?} is {state:?}, only completed fills are kept in sync")]
    NotCompleted { doc_id: DocId, state: JobState },
    #[error("document {0:?} has no placeholder pattern")]
    NoPattern(DocId),
    #[error("reading the knowledge store failed: {0}")]
    Snapshot(ResolverError),
    #[error("storing {key:?} failed: {source}")]
    Store {
        key: String,
        #[source]
        source: ResolverError,
    },
    #[error("regenerating the output failed: {0}")]
    Regenerate(ResolverError),
    #[error(transparent)]
    Rejected(#[from] ManualEditRejected),
    #[error("job changed while the update was in flight: {0}")]
    Board(#[from] BoardError),
    #[error("cancelled")]
    Cancelled,
}

/// What a sync or commit works from, copied out of the board so that no
/// lock is held while the backend is called.
struct CompletedJob {
    ticket: JobTicket,
    store_root: PathBuf,
    pattern: PlaceholderPattern,
    entries: Vec<FillEntry>,
    checkboxes: Vec<CheckboxEntry>,
}

#[derive(Clone)]
pub struct ContextSyncEngine {
    services: Services,
}

impl ContextSyncEngine {
    pub fn new(services: Services) -> Self {
        Self { services }
    }

    /// Rewrites the filled values of `doc` whose knowledge-store value
    /// changed, then regenerates its output. Nothing is written when every
    /// value is current.
    ///
    /// On failure the job and its previous output are left as they were.
    pub async fn sync(&self, doc: &Path) -> Result<SyncOutcome, SyncError> {
        let job = self.completed_job(doc)?;
        let cx = self.services.call_context(&job.ticket, Priority::Low);

        let snapshot = self
            .services
            .tracker
            .track(&job.ticket, self.services.snapshot(&cx, &job.store_root))
            .await
            .map_err(|err| cancelled_or(err, SyncError::Snapshot))?;

        let report = reconcile(&job.entries, &job.pattern, &snapshot);
        if report.is_clean() {
            formfill_debug!("Sync: {:?} is up to date", doc);
            return Ok(SyncOutcome::Unchanged);
        }

        let lines = report.rewritten.len();
        let output_path = self.regenerate(&cx, &job, report.entries).await?;
        formfill_info!("Sync: rewrote {} line(s) of {:?}", lines, doc);
        Ok(SyncOutcome::Rewritten { lines, output_path })
    }

    /// Applies an accepted manual edit: stores every edited value that has a
    /// context key, regenerates the output and announces the store change.
    pub async fn commit_edit(&self, plan: &EditPlan) -> Result<PathBuf, SyncError> {
        let doc = plan.ticket.doc_id.as_path();
        let mut job = self.completed_job(doc)?;
        if job.ticket != plan.ticket {
            return Err(BoardError::StaleRun(doc.to_path_buf()).into());
        }
        let entry = job
            .entries
            .get_mut(plan.entry_index)
            .ok_or(ManualEditRejected::UnknownChangeLine(plan.change_id))?;
        entry.filled_lines = replace_line(entry, plan.line_index, &plan.filled_line)
            .ok_or(ManualEditRejected::UnknownChangeLine(plan.change_id))?;

        let cx = self.services.call_context(&job.ticket, Priority::High);
        let mut stored_any = false;
        for (key, value) in plan.context_keys.iter().zip(&plan.fills) {
            let (Some(key), Some(value)) = (key, value) else {
                continue;
            };
            let resolver = self.services.resolver.as_ref();
            let write = resolver.add_context(&cx, &job.store_root, key, value);
            self.services
                .tracker
                .track(
                    &job.ticket,
                    self.services.writes.serialized(&job.store_root, write),
                )
                .await
                .map_err(|err| {
                    cancelled_or(err, |source| SyncError::Store {
                        key: key.clone(),
                        source,
                    })
                })?;
            stored_any = true;
        }

        let output_path = self.regenerate(&cx, &job, job.entries.clone()).await?;
        if stored_any {
            self.services.sink.emit(EngineEvent::KnowledgeStoreChanged {
                root: job.store_root.clone(),
            });
        }
        Ok(output_path)
    }

    async fn regenerate(
        &self,
        cx: &CallContext,
        job: &CompletedJob,
        entries: Vec<FillEntry>,
    ) -> Result<PathBuf, SyncError> {
        let doc = job.ticket.doc_id.as_path();
        let target = filled_output_path(doc);
        let resolver = self.services.resolver.as_ref();
        let written = self
            .services
            .tracker
            .track(
                &job.ticket,
                resolver.fill_output(cx, doc, &entries, &job.checkboxes, &target),
            )
            .await
            .map_err(|err| cancelled_or(err, SyncError::Regenerate))?;
        self.services
            .board()
            .commit_fills(&job.ticket, entries, written.clone())?;
        Ok(written)
    }

    fn completed_job(&self, doc: &Path) -> Result<CompletedJob, SyncError> {
        let board = self.services.board();
        let job = board
            .job(doc)
            .ok_or_else(|| SyncError::UnknownDocument(doc.to_path_buf()))?;
        if job.state != JobState::Completed {
            return Err(SyncError::NotCompleted {
                doc_id: doc.to_path_buf(),
                state: job.state,
            });
        }
        let pattern = job
            .fill_pattern
            .clone()
            .ok_or_else(|| SyncError::NoPattern(doc.to_path_buf()))?;
        Ok(CompletedJob {
            ticket: job.ticket(),
            store_root: job.store_root.clone(),
            pattern,
            entries: job.fill_entries.clone(),
            checkboxes: job.checkbox_entries.clone(),
        })
    }
}

fn cancelled_or(err: ResolverError, wrap: impl FnOnce(ResolverError) -> SyncError) -> SyncError {
    if err.is_cancelled() {
        SyncError::Cancelled
    } else {
        wrap(err)
    }
}

/// The entry's filled text with line `line_index` replaced. Missing filled
/// lines are taken from the template first.
fn replace_line(entry: &FillEntry, line_index: usize, line: &str) -> Option<String> {
    let template: Vec<&str> = entry.template_lines.split('\n').collect();
    if line_index >= template.len() {
        return None;
    }
    let mut filled: Vec<&str> = entry.filled_lines.split('\n').collect();
    if filled.len() < template.len() {
        filled.extend(&template[filled.len()..]);
    }
    filled[line_index] = line;
    Some(filled.join("\n"))
}
