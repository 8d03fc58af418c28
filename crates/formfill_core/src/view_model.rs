use std::path::PathBuf;

use crate::model::{DocId, JobState, ProcessingJob};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BoardViewModel {
    pub store_root: Option<PathBuf>,
    pub selected: Option<DocId>,
    pub job_count: usize,
    pub jobs: Vec<JobRowView>,
    pub dirty: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRowView {
    pub doc_id: DocId,
    pub state: JobState,
    pub is_completed: bool,
    pub output_path: Option<PathBuf>,
    pub entry_count: usize,
    pub changed_line_count: usize,
    pub missing_keys: Vec<String>,
    pub error: Option<String>,
}

impl JobRowView {
    pub(crate) fn from_job(job: &ProcessingJob) -> Self {
        Self {
            doc_id: job.doc_id.clone(),
            state: job.state,
            is_completed: job.is_completed(),
            output_path: job.output_path.clone(),
            entry_count: job.fill_entries.len(),
            changed_line_count: job.changed_lines.len(),
            missing_keys: job.missing_keys.iter().cloned().collect(),
            error: job.error.clone(),
        }
    }
}
