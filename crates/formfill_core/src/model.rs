use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::change_lines::derive_change_lines;
use crate::codec::PlaceholderPattern;

/// Document identity: the path of the form being filled.
pub type DocId = PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JobState {
    #[default]
    Pending,
    Processing,
    Completed,
    TooComplex,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::TooComplex | JobState::Failed
        )
    }

    /// Completed in the user's sense: filled, or routed to the assisted path.
    pub fn is_completed(self) -> bool {
        matches!(self, JobState::Completed | JobState::TooComplex)
    }
}

/// A contiguous template block and its resolved values.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FillEntry {
    pub template_lines: String,
    pub filled_lines: String,
    pub context_keys: Vec<Option<String>>,
    pub fill_spot_count: usize,
}

impl FillEntry {
    /// New unresolved entry; the filled text starts as the template text.
    pub fn new(template_lines: impl Into<String>, pattern: &PlaceholderPattern) -> Self {
        let template_lines = template_lines.into();
        let fill_spot_count = pattern.count_matches(&template_lines);
        Self {
            filled_lines: template_lines.clone(),
            context_keys: vec![None; fill_spot_count],
            fill_spot_count,
            template_lines,
        }
    }

    pub fn with_context_keys(mut self, keys: Vec<Option<String>>) -> Self {
        self.context_keys = keys;
        self
    }

    pub fn with_filled_lines(mut self, filled: impl Into<String>) -> Self {
        self.filled_lines = filled.into();
        self
    }

    pub fn template_line_count(&self) -> usize {
        self.template_lines.split('\n').count()
    }
}

/// A contiguous group of checkbox options.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CheckboxEntry {
    pub lines: String,
    /// `(line, char)` of each checkbox inside `lines`.
    pub positions: Vec<(usize, usize)>,
    pub labels: Vec<String>,
    pub context_key: Option<String>,
    pub checked_indices: Vec<usize>,
}

/// One template/filled line pair offered for review.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeLine {
    pub id: usize,
    pub entry_index: usize,
    pub line_index: usize,
    pub template_line: String,
    pub filled_line: String,
    pub placeholder_context_keys: Vec<Option<String>>,
}

/// Identifies one registration of a document. Results produced for an
/// earlier registration of the same path carry a stale `run_id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobTicket {
    pub doc_id: DocId,
    pub run_id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessingJob {
    pub doc_id: DocId,
    pub run_id: u64,
    pub store_root: PathBuf,
    pub state: JobState,
    pub form_text: String,
    pub has_interactive_fields: bool,
    pub fill_pattern: Option<PlaceholderPattern>,
    pub fill_entries: Vec<FillEntry>,
    pub checkbox_entries: Vec<CheckboxEntry>,
    pub missing_keys: BTreeSet<String>,
    pub changed_lines: Vec<ChangeLine>,
    pub output_path: Option<PathBuf>,
    pub error: Option<String>,
}

impl ProcessingJob {
    pub fn new(doc_id: DocId, store_root: PathBuf, run_id: u64) -> Self {
        Self {
            doc_id,
            run_id,
            store_root,
            state: JobState::Pending,
            form_text: String::new(),
            has_interactive_fields: false,
            fill_pattern: None,
            fill_entries: Vec::new(),
            checkbox_entries: Vec::new(),
            missing_keys: BTreeSet::new(),
            changed_lines: Vec::new(),
            output_path: None,
            error: None,
        }
    }

    pub fn ticket(&self) -> JobTicket {
        JobTicket {
            doc_id: self.doc_id.clone(),
            run_id: self.run_id,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.state.is_completed()
    }

    pub(crate) fn refresh_changed_lines(&mut self) {
        self.changed_lines = derive_change_lines(&self.fill_entries, self.fill_pattern.as_ref());
    }
}
