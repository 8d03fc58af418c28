use std::path::{Path, PathBuf};

use formfill_core::{CheckboxEntry, CompletedJobSnapshot, FillEntry, PlaceholderPattern};
use formfill_engine::{ensure_state_dir, AtomicFileWriter};
use formfill_logging::{formfill_error, formfill_info, formfill_warn};
use serde::{Deserialize, Serialize};

const STATE_FILENAME: &str = ".formfill_state.ron";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedEntry {
    template_lines: String,
    filled_lines: String,
    context_keys: Vec<Option<String>>,
    fill_spots: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedCheckbox {
    lines: String,
    positions: Vec<(usize, usize)>,
    labels: Vec<String>,
    context_key: Option<String>,
    checked: Vec<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedJob {
    document: PathBuf,
    store_root: PathBuf,
    pattern: Option<String>,
    entries: Vec<PersistedEntry>,
    #[serde(default)]
    checkboxes: Vec<PersistedCheckbox>,
    output: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PersistedState {
    completed: Vec<PersistedJob>,
}

impl From<&FillEntry> for PersistedEntry {
    fn from(entry: &FillEntry) -> Self {
        Self {
            template_lines: entry.template_lines.clone(),
            filled_lines: entry.filled_lines.clone(),
            context_keys: entry.context_keys.clone(),
            fill_spots: entry.fill_spot_count,
        }
    }
}

impl From<PersistedEntry> for FillEntry {
    fn from(entry: PersistedEntry) -> Self {
        FillEntry {
            template_lines: entry.template_lines,
            filled_lines: entry.filled_lines,
            context_keys: entry.context_keys,
            fill_spot_count: entry.fill_spots,
        }
    }
}

impl From<&CheckboxEntry> for PersistedCheckbox {
    fn from(entry: &CheckboxEntry) -> Self {
        Self {
            lines: entry.lines.clone(),
            positions: entry.positions.clone(),
            labels: entry.labels.clone(),
            context_key: entry.context_key.clone(),
            checked: entry.checked_indices.clone(),
        }
    }
}

impl From<PersistedCheckbox> for CheckboxEntry {
    fn from(entry: PersistedCheckbox) -> Self {
        CheckboxEntry {
            lines: entry.lines,
            positions: entry.positions,
            labels: entry.labels,
            context_key: entry.context_key,
            checked_indices: entry.checked,
        }
    }
}

impl From<&CompletedJobSnapshot> for PersistedJob {
    fn from(job: &CompletedJobSnapshot) -> Self {
        Self {
            document: job.doc_id.clone(),
            store_root: job.store_root.clone(),
            pattern: job
                .fill_pattern
                .as_ref()
                .map(|pattern| pattern.as_str().to_string()),
            entries: job.fill_entries.iter().map(PersistedEntry::from).collect(),
            checkboxes: job.checkbox_entries.iter().map(PersistedCheckbox::from).collect(),
            output: job.output_path.clone(),
        }
    }
}

fn restore_job(job: PersistedJob) -> Option<CompletedJobSnapshot> {
    let fill_pattern = match PlaceholderPattern::optional(job.pattern.as_deref()) {
        Ok(pattern) => pattern,
        Err(err) => {
            formfill_warn!("Skipping persisted job {:?}: {}", job.document, err);
            return None;
        }
    };
    Some(CompletedJobSnapshot {
        doc_id: job.document,
        store_root: job.store_root,
        fill_pattern,
        fill_entries: job.entries.into_iter().map(FillEntry::from).collect(),
        checkbox_entries: job.checkboxes.into_iter().map(CheckboxEntry::from).collect(),
        output_path: job.output,
    })
}

pub(crate) fn load_completed_jobs(store_root: &Path) -> Vec<CompletedJobSnapshot> {
    let writer = AtomicFileWriter::new(store_root.to_path_buf());
    let content = match writer.read(STATE_FILENAME) {
        Ok(Some(text)) => text,
        Ok(None) => return Vec::new(),
        Err(err) => {
            formfill_warn!(
                "Failed to read persisted state from {:?}: {}",
                store_root,
                err
            );
            return Vec::new();
        }
    };

    let state: PersistedState = match ron::from_str(&content) {
        Ok(state) => state,
        Err(err) => {
            formfill_warn!("Failed to parse persisted state in {:?}: {}", store_root, err);
            return Vec::new();
        }
    };

    let completed: Vec<_> = state.completed.into_iter().filter_map(restore_job).collect();
    formfill_info!(
        "Loaded {} persisted completed job(s) from {:?}",
        completed.len(),
        store_root
    );
    completed
}

pub(crate) fn save_completed_jobs(store_root: &Path, completed: &[CompletedJobSnapshot]) {
    if let Err(err) = ensure_state_dir(store_root) {
        formfill_error!("Cannot persist state into {:?}: {}", store_root, err);
        return;
    }

    let state = PersistedState {
        completed: completed.iter().map(PersistedJob::from).collect(),
    };

    let pretty = ron::ser::PrettyConfig::new();
    let content = match ron::ser::to_string_pretty(&state, pretty) {
        Ok(text) => text,
        Err(err) => {
            formfill_error!("Failed to serialize persisted state: {}", err);
            return;
        }
    };

    let writer = AtomicFileWriter::new(store_root.to_path_buf());
    if let Err(err) = writer.write(STATE_FILENAME, &content) {
        formfill_error!(
            "Failed to write persisted state to {:?}: {}",
            store_root,
            err
        );
    }
}
