use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::codec::{extract_fills, Fills, PlaceholderPattern};
use crate::error::{BoardError, ManualEditRejected};
use crate::model::{
    CheckboxEntry, DocId, FillEntry, JobState, JobTicket, ProcessingJob,
};
use crate::view_model::{BoardViewModel, JobRowView};

/// Result of one pipeline stage, applied to the job it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageUpdate {
    FormText {
        text: String,
        has_interactive_fields: bool,
    },
    Pattern(Option<PlaceholderPattern>),
    FillEntriesDetected(Vec<FillEntry>),
    FillEntriesProcessed {
        entries: Vec<FillEntry>,
        missing_keys: Vec<String>,
    },
    CheckboxesDetected(Vec<CheckboxEntry>),
    CheckboxesProcessed(Vec<CheckboxEntry>),
    OutputWritten(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageApplied {
    Continue,
    TooComplex,
    Completed,
}

/// An accepted manual edit, ready to be committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditPlan {
    pub ticket: JobTicket,
    pub change_id: usize,
    pub entry_index: usize,
    pub line_index: usize,
    pub filled_line: String,
    pub fills: Fills,
    pub context_keys: Vec<Option<String>>,
}

/// A completed job as saved between sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedJobSnapshot {
    pub doc_id: DocId,
    pub store_root: PathBuf,
    pub fill_pattern: Option<PlaceholderPattern>,
    pub fill_entries: Vec<FillEntry>,
    pub checkbox_entries: Vec<CheckboxEntry>,
    pub output_path: PathBuf,
}

/// Every registered document and its job, keyed by document path.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct JobBoard {
    jobs: BTreeMap<DocId, ProcessingJob>,
    store_root: Option<PathBuf>,
    selected: Option<DocId>,
    next_run_id: u64,
    dirty: bool,
}

impl JobBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn view(&self) -> BoardViewModel {
        BoardViewModel {
            store_root: self.store_root.clone(),
            selected: self.selected.clone(),
            job_count: self.jobs.len(),
            jobs: self.jobs.values().map(JobRowView::from_job).collect(),
            dirty: self.dirty,
        }
    }

    /// Returns whether anything changed since the last call and clears the flag.
    pub fn consume_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn store_root(&self) -> Option<&Path> {
        self.store_root.as_deref()
    }

    pub(crate) fn set_store_root(&mut self, root: PathBuf) {
        if self.store_root.as_ref() != Some(&root) {
            self.store_root = Some(root);
            self.mark_dirty();
        }
    }

    pub fn job(&self, doc_id: &Path) -> Option<&ProcessingJob> {
        self.jobs.get(doc_id)
    }

    pub fn jobs(&self) -> impl Iterator<Item = &ProcessingJob> {
        self.jobs.values()
    }

    pub fn contains(&self, doc_id: &Path) -> bool {
        self.jobs.contains_key(doc_id)
    }

    pub fn selected(&self) -> Option<&Path> {
        self.selected.as_deref()
    }

    pub fn is_selected(&self, doc_id: &Path) -> bool {
        self.selected.as_deref() == Some(doc_id)
    }

    pub(crate) fn select(&mut self, doc_id: &Path) -> bool {
        if !self.jobs.contains_key(doc_id) || self.is_selected(doc_id) {
            return false;
        }
        self.selected = Some(doc_id.to_path_buf());
        self.mark_dirty();
        true
    }

    /// Registers a document and returns the ticket of its new run.
    ///
    /// A document already on the board is skipped unless its last run failed,
    /// in which case the failed job is replaced by a fresh one.
    pub fn register(&mut self, doc_id: DocId, store_root: PathBuf) -> Option<JobTicket> {
        if let Some(existing) = self.jobs.get(&doc_id) {
            if existing.state != JobState::Failed {
                return None;
            }
        }
        self.next_run_id += 1;
        let job = ProcessingJob::new(doc_id.clone(), store_root, self.next_run_id);
        let ticket = job.ticket();
        self.jobs.insert(doc_id, job);
        self.mark_dirty();
        Some(ticket)
    }

    pub fn remove(&mut self, doc_id: &Path) -> Option<ProcessingJob> {
        let removed = self.jobs.remove(doc_id)?;
        if self.is_selected(doc_id) {
            self.selected = None;
        }
        self.mark_dirty();
        Some(removed)
    }

    /// Whether `ticket` still names the document's current run.
    pub fn holds(&self, ticket: &JobTicket) -> bool {
        self.jobs
            .get(&ticket.doc_id)
            .is_some_and(|job| job.run_id == ticket.run_id)
    }

    /// Moves a pending job into `Processing`.
    pub fn begin(&mut self, ticket: &JobTicket) -> Result<(), BoardError> {
        let job = self.job_for_run(ticket)?;
        if job.state != JobState::Pending {
            return Err(BoardError::WrongState {
                doc_id: ticket.doc_id.clone(),
                state: job.state,
            });
        }
        job.state = JobState::Processing;
        self.mark_dirty();
        Ok(())
    }

    pub fn apply_stage(
        &mut self,
        ticket: &JobTicket,
        update: StageUpdate,
    ) -> Result<StageApplied, BoardError> {
        let job = self.job_for_run(ticket)?;
        if job.state != JobState::Processing {
            return Err(BoardError::WrongState {
                doc_id: ticket.doc_id.clone(),
                state: job.state,
            });
        }

        let applied = match update {
            StageUpdate::FormText {
                text,
                has_interactive_fields,
            } => {
                job.form_text = text;
                job.has_interactive_fields = has_interactive_fields;
                StageApplied::Continue
            }
            StageUpdate::Pattern(pattern) => {
                job.fill_pattern = pattern;
                StageApplied::Continue
            }
            StageUpdate::FillEntriesDetected(entries) if entries.is_empty() => {
                job.fill_entries.clear();
                job.changed_lines.clear();
                job.output_path = Some(job.doc_id.clone());
                job.state = JobState::TooComplex;
                StageApplied::TooComplex
            }
            StageUpdate::FillEntriesDetected(entries) => {
                job.fill_entries = entries;
                StageApplied::Continue
            }
            StageUpdate::FillEntriesProcessed {
                entries,
                missing_keys,
            } => {
                job.fill_entries = entries;
                job.missing_keys = missing_keys.into_iter().collect();
                StageApplied::Continue
            }
            StageUpdate::CheckboxesDetected(entries) | StageUpdate::CheckboxesProcessed(entries) => {
                job.checkbox_entries = entries;
                StageApplied::Continue
            }
            StageUpdate::OutputWritten(path) => {
                job.output_path = Some(path);
                job.state = JobState::Completed;
                job.error = None;
                job.refresh_changed_lines();
                StageApplied::Completed
            }
        };
        self.mark_dirty();
        Ok(applied)
    }

    /// Records a stage failure. Only a job that is still processing can fail.
    pub fn fail(&mut self, ticket: &JobTicket, error: impl Into<String>) -> Result<(), BoardError> {
        let job = self.job_for_run(ticket)?;
        if job.state != JobState::Processing {
            return Err(BoardError::WrongState {
                doc_id: ticket.doc_id.clone(),
                state: job.state,
            });
        }
        job.state = JobState::Failed;
        job.error = Some(error.into());
        self.mark_dirty();
        Ok(())
    }

    /// Replaces the fills of a completed job after its output was rewritten.
    pub fn commit_fills(
        &mut self,
        ticket: &JobTicket,
        entries: Vec<FillEntry>,
        output_path: PathBuf,
    ) -> Result<(), BoardError> {
        let job = self.job_for_run(ticket)?;
        if job.state != JobState::Completed {
            return Err(BoardError::WrongState {
                doc_id: ticket.doc_id.clone(),
                state: job.state,
            });
        }
        job.fill_entries = entries;
        job.output_path = Some(output_path);
        job.refresh_changed_lines();
        self.mark_dirty();
        Ok(())
    }

    /// Checks whether `filled_line` is an acceptable edit of change line
    /// `change_id`: only placeholder spans may differ from the template.
    pub fn check_edit(
        &self,
        doc_id: &Path,
        change_id: usize,
        filled_line: &str,
    ) -> Result<EditPlan, ManualEditRejected> {
        let job = self
            .jobs
            .get(doc_id)
            .ok_or_else(|| ManualEditRejected::UnknownDocument(doc_id.to_path_buf()))?;
        let pattern = match (&job.fill_pattern, job.state) {
            (Some(pattern), JobState::Completed) => pattern,
            (_, state) => return Err(ManualEditRejected::NotEditable(state)),
        };
        let line = job
            .changed_lines
            .iter()
            .find(|line| line.id == change_id)
            .ok_or(ManualEditRejected::UnknownChangeLine(change_id))?;
        let fills = extract_fills(&line.template_line, filled_line, pattern)?;
        Ok(EditPlan {
            ticket: job.ticket(),
            change_id,
            entry_index: line.entry_index,
            line_index: line.line_index,
            filled_line: filled_line.to_string(),
            fills,
            context_keys: line.placeholder_context_keys.clone(),
        })
    }

    pub fn completed_jobs_snapshot(&self) -> Vec<CompletedJobSnapshot> {
        self.jobs
            .values()
            .filter(|job| job.state == JobState::Completed)
            .filter_map(|job| {
                Some(CompletedJobSnapshot {
                    doc_id: job.doc_id.clone(),
                    store_root: job.store_root.clone(),
                    fill_pattern: job.fill_pattern.clone(),
                    fill_entries: job.fill_entries.clone(),
                    checkbox_entries: job.checkbox_entries.clone(),
                    output_path: job.output_path.clone()?,
                })
            })
            .collect()
    }

    pub(crate) fn restore_completed(&mut self, snapshot: CompletedJobSnapshot) -> bool {
        if self.jobs.contains_key(&snapshot.doc_id) {
            return false;
        }
        self.next_run_id += 1;
        let mut job = ProcessingJob::new(
            snapshot.doc_id.clone(),
            snapshot.store_root,
            self.next_run_id,
        );
        job.state = JobState::Completed;
        job.fill_pattern = snapshot.fill_pattern;
        job.fill_entries = snapshot.fill_entries;
        job.checkbox_entries = snapshot.checkbox_entries;
        job.output_path = Some(snapshot.output_path);
        job.refresh_changed_lines();
        self.jobs.insert(snapshot.doc_id, job);
        self.mark_dirty();
        true
    }

    fn job_for_run(&mut self, ticket: &JobTicket) -> Result<&mut ProcessingJob, BoardError> {
        let job = self
            .jobs
            .get_mut(&ticket.doc_id)
            .ok_or_else(|| BoardError::UnknownDocument(ticket.doc_id.clone()))?;
        if job.run_id != ticket.run_id {
            return Err(BoardError::StaleRun(ticket.doc_id.clone()));
        }
        Ok(job)
    }
}
