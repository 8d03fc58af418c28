#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use formfill_core::{
    inject_fills, update, CheckboxEntry, FillEntry, JobBoard, JobTicket, KnowledgeSnapshot, Msg,
    PlaceholderPattern,
};
use formfill_engine::{
    lock_board, shared_board, CallContext, EngineEvent, EventSink, FailureKind, FieldResolver,
    FormText, Priority, ProcessedFills, ResolverError, ScheduledResolver, SchedulerSettings, Services,
    SharedBoard, TaskScheduler,
};
use tokio::sync::Semaphore;

pub const STORE: &str = "/store";

pub fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(formfill_logging::initialize_for_tests);
}

/// What the scripted backend answers for every document.
#[derive(Clone, Default)]
pub struct Script {
    pub text: String,
    pub pattern: Option<String>,
    pub entries: Vec<FillEntry>,
    pub checkboxes: Vec<CheckboxEntry>,
    pub store: KnowledgeSnapshot,
}

/// In-memory resolver. Counts calls per operation, can fail an operation for
/// one document and can hold an operation open until released. Held calls
/// observe their cancel flag once released.
pub struct ScriptedResolver {
    script: Mutex<Script>,
    calls: Mutex<HashMap<&'static str, usize>>,
    priorities: Mutex<HashMap<&'static str, Priority>>,
    failures: Mutex<HashMap<PathBuf, (&'static str, ResolverError)>>,
    held: Mutex<HashSet<&'static str>>,
    gate: Semaphore,
    outputs: Mutex<Vec<(PathBuf, Vec<FillEntry>)>>,
    cancelled: Mutex<Vec<PathBuf>>,
}

impl ScriptedResolver {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script),
            calls: Mutex::new(HashMap::new()),
            priorities: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
            held: Mutex::new(HashSet::new()),
            gate: Semaphore::new(0),
            outputs: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self, op: &str) -> usize {
        self.calls.lock().unwrap().get(op).copied().unwrap_or(0)
    }

    /// Priority of the latest `op` call.
    pub fn priority(&self, op: &str) -> Option<Priority> {
        self.priorities.lock().unwrap().get(op).copied()
    }

    pub fn fail(&self, doc: &str, op: &'static str) {
        let err = ResolverError::new(FailureKind::Backend, format!("{op} exploded"));
        self.failures
            .lock()
            .unwrap()
            .insert(PathBuf::from(doc), (op, err));
    }

    /// The backend answers `op` for `doc` as cancelled.
    pub fn cancel_on_backend(&self, doc: &str, op: &'static str) {
        self.failures
            .lock()
            .unwrap()
            .insert(PathBuf::from(doc), (op, ResolverError::cancelled()));
    }

    pub fn clear_failures(&self) {
        self.failures.lock().unwrap().clear();
    }

    pub fn hold(&self, op: &'static str) {
        self.held.lock().unwrap().insert(op);
    }

    pub fn release(&self, calls: usize) {
        self.gate.add_permits(calls);
    }

    pub fn set_value(&self, key: &str, value: &str) {
        self.script
            .lock()
            .unwrap()
            .store
            .insert(key.to_string(), value.to_string());
    }

    pub fn value(&self, key: &str) -> Option<String> {
        self.script.lock().unwrap().store.get(key).cloned()
    }

    pub fn outputs(&self) -> Vec<(PathBuf, Vec<FillEntry>)> {
        self.outputs.lock().unwrap().clone()
    }

    pub fn cancelled(&self) -> Vec<PathBuf> {
        self.cancelled.lock().unwrap().clone()
    }

    pub async fn wait_for_calls(&self, op: &str, count: usize) {
        for _ in 0..200 {
            if self.calls(op) >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("{op} was not called {count} time(s)");
    }

    async fn enter(&self, op: &'static str, cx: &CallContext) -> Result<(), ResolverError> {
        *self.calls.lock().unwrap().entry(op).or_default() += 1;
        self.priorities.lock().unwrap().insert(op, cx.priority);
        let held = self.held.lock().unwrap().contains(op);
        if held {
            self.gate
                .acquire()
                .await
                .map_err(|_| ResolverError::new(FailureKind::Transport, "gate closed"))?
                .forget();
        }
        cx.checkpoint()?;
        match self.failures.lock().unwrap().get(&cx.doc_id) {
            Some((failing, err)) if *failing == op => Err(err.clone()),
            _ => Ok(()),
        }
    }

    fn script(&self) -> Script {
        self.script.lock().unwrap().clone()
    }
}

/// Fills every placeholder whose key has a stored value.
fn fill_from_store(
    entries: &[FillEntry],
    pattern: &PlaceholderPattern,
    store: &KnowledgeSnapshot,
) -> ProcessedFills {
    let mut missing = Vec::new();
    let entries = entries
        .iter()
        .map(|entry| {
            let mut cursor = 0;
            let lines: Vec<String> = entry
                .template_lines
                .split('\n')
                .map(|line| {
                    let spots = pattern.count_matches(line);
                    let values: Vec<Option<String>> = (cursor..cursor + spots)
                        .map(|i| {
                            let key = entry.context_keys.get(i).cloned().flatten()?;
                            let value = store.get(&key).cloned();
                            if value.is_none() {
                                missing.push(key);
                            }
                            value
                        })
                        .collect();
                    cursor += spots;
                    inject_fills(line, &values, pattern)
                })
                .collect();
            FillEntry {
                filled_lines: lines.join("\n"),
                ..entry.clone()
            }
        })
        .collect();
    ProcessedFills {
        entries,
        missing_keys: missing,
    }
}

#[async_trait::async_trait]
impl FieldResolver for ScriptedResolver {
    async fn extract_text(&self, cx: &CallContext, doc: &Path) -> Result<FormText, ResolverError> {
        self.enter("extract_text", cx).await?;
        assert_eq!(cx.doc_id, doc);
        Ok(FormText {
            text: self.script().text,
            has_interactive_fields: false,
        })
    }

    async fn detect_pattern(
        &self,
        cx: &CallContext,
        _text: &str,
        _has_interactive_fields: bool,
    ) -> Result<Option<String>, ResolverError> {
        self.enter("detect_pattern", cx).await?;
        Ok(self.script().pattern)
    }

    async fn resolve_context(
        &self,
        cx: &CallContext,
        _store_root: &Path,
    ) -> Result<KnowledgeSnapshot, ResolverError> {
        self.enter("resolve_context", cx).await?;
        Ok(self.script().store)
    }

    async fn add_context(
        &self,
        cx: &CallContext,
        _store_root: &Path,
        key: &str,
        value: &str,
    ) -> Result<KnowledgeSnapshot, ResolverError> {
        self.enter("add_context", cx).await?;
        self.set_value(key, value);
        Ok(self.script().store)
    }

    async fn detect_fill_entries(
        &self,
        cx: &CallContext,
        _lines: &[String],
        _pattern: Option<&PlaceholderPattern>,
    ) -> Result<Vec<FillEntry>, ResolverError> {
        self.enter("detect_fill_entries", cx).await?;
        Ok(self.script().entries)
    }

    async fn process_fill_entries(
        &self,
        cx: &CallContext,
        entries: &[FillEntry],
        _store_root: &Path,
        pattern: Option<&PlaceholderPattern>,
    ) -> Result<ProcessedFills, ResolverError> {
        self.enter("process_fill_entries", cx).await?;
        Ok(match pattern {
            Some(pattern) => fill_from_store(entries, pattern, &self.script().store),
            None => ProcessedFills {
                entries: entries.to_vec(),
                missing_keys: Vec::new(),
            },
        })
    }

    async fn detect_checkbox_entries(
        &self,
        cx: &CallContext,
        _lines: &[String],
    ) -> Result<Vec<CheckboxEntry>, ResolverError> {
        self.enter("detect_checkbox_entries", cx).await?;
        Ok(self.script().checkboxes)
    }

    async fn process_checkbox_entries(
        &self,
        cx: &CallContext,
        entries: &[CheckboxEntry],
        _store_root: &Path,
    ) -> Result<Vec<CheckboxEntry>, ResolverError> {
        self.enter("process_checkbox_entries", cx).await?;
        Ok(entries.to_vec())
    }

    async fn fill_output(
        &self,
        cx: &CallContext,
        doc: &Path,
        entries: &[FillEntry],
        _checkboxes: &[CheckboxEntry],
        output_path: &Path,
    ) -> Result<PathBuf, ResolverError> {
        self.enter("fill_output", cx).await?;
        self.outputs
            .lock()
            .unwrap()
            .push((doc.to_path_buf(), entries.to_vec()));
        Ok(output_path.to_path_buf())
    }

    async fn cancel_document(&self, ticket: &JobTicket) {
        self.cancelled.lock().unwrap().push(ticket.doc_id.clone());
    }
}

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<EngineEvent>>,
}

impl RecordingSink {
    pub fn take(&self) -> Vec<EngineEvent> {
        self.events.lock().unwrap().drain(..).collect()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: EngineEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// A board with the store root selected and `docs` registered, plus the
/// tickets of their runs.
pub fn board_with(docs: &[&str]) -> (SharedBoard, Vec<JobTicket>) {
    let (board, _) = update(JobBoard::new(), Msg::StoreRootSelected(PathBuf::from(STORE)));
    let board = shared_board(board);
    let tickets = register(&board, docs);
    (board, tickets)
}

pub fn register(board: &SharedBoard, docs: &[&str]) -> Vec<JobTicket> {
    dispatch(
        board,
        Msg::DocumentsAdded(docs.iter().map(PathBuf::from).collect()),
    )
    .into_iter()
    .filter_map(|effect| match effect {
        formfill_core::Effect::StartPipeline { ticket, .. } => Some(ticket),
        _ => None,
    })
    .collect()
}

pub fn dispatch(board: &SharedBoard, msg: Msg) -> Vec<formfill_core::Effect> {
    let mut guard = lock_board(board);
    let state = std::mem::take(&mut *guard);
    let (next, effects) = update(state, msg);
    *guard = next;
    effects
}

pub fn services(
    board: &SharedBoard,
    resolver: &Arc<ScriptedResolver>,
) -> (Services, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::default());
    let services = Services::new(board.clone(), resolver.clone(), sink.clone());
    (services, sink)
}

/// Services whose resolver calls go through a scheduler, as the engine
/// wires them.
pub fn scheduled_services(
    board: &SharedBoard,
    resolver: &Arc<ScriptedResolver>,
) -> (Services, Arc<RecordingSink>, TaskScheduler) {
    let scheduler = TaskScheduler::new(SchedulerSettings {
        concurrency: 4,
        reserved_urgent: 1,
        malformed_attempts: 3,
    });
    let scheduled = Arc::new(ScheduledResolver::new(resolver.clone(), scheduler.clone()));
    let sink = Arc::new(RecordingSink::default());
    let services = Services::new(board.clone(), scheduled, sink.clone());
    (services, sink, scheduler)
}

pub fn entry(template: &str, pattern: &str, keys: &[Option<&str>]) -> FillEntry {
    let pattern = PlaceholderPattern::new(pattern).unwrap();
    FillEntry::new(template, &pattern)
        .with_context_keys(keys.iter().map(|k| k.map(str::to_string)).collect())
}

/// A three-entry form spanning four template lines.
pub fn visa_script() -> Script {
    let pattern = "(_____)";
    Script {
        text: "Name: _____\nCity: _____\nZip: _____\nPhone: _____".into(),
        pattern: Some(pattern.into()),
        entries: vec![
            entry("Name: _____", pattern, &[Some("name")]),
            entry("City: _____\nZip: _____", pattern, &[Some("city"), Some("zip")]),
            entry("Phone: _____", pattern, &[Some("phone")]),
        ],
        checkboxes: Vec::new(),
        store: [
            ("name", "Ada Lovelace"),
            ("city", "London"),
            ("zip", "N1"),
            ("phone", "+44 20"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect(),
    }
}
