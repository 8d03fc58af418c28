//! Priority admission for resolver calls.
//!
//! A fixed number of slots is shared by all documents. Waiters are admitted
//! highest priority first and in arrival order within a priority. Part of the
//! capacity is held back for `Urgent` work so that the document in front of
//! the user never queues behind background fills.
//!
//! Cancellation is cooperative and keyed by document run:
//! [`TaskScheduler::cancel`] trips the run's flag, releasing its queued
//! waiters with `Cancelled`. Calls that already hold a slot see the flag at
//! their next checkpoint. A run's flag stays registered only while one of its
//! calls is queued or running.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use formfill_core::{CheckboxEntry, FillEntry, JobTicket, KnowledgeSnapshot, PlaceholderPattern};
use formfill_logging::{formfill_debug, formfill_warn};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::resolver::{CallContext, FieldResolver, FormText, ProcessedFills};
use crate::{FailureKind, ResolverError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    /// Re-syncing completed documents after a store change.
    Low,
    /// Filling documents.
    Normal,
    /// Committing a manual edit.
    High,
    /// Foreground work for the document the user is looking at.
    Urgent,
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Total number of concurrent calls, reserved slots included.
    pub concurrency: usize,
    /// Slots only `Urgent` calls may use.
    pub reserved_urgent: usize,
    /// Attempts per call when the backend returns undecodable output.
    pub malformed_attempts: usize,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            concurrency: 4,
            reserved_urgent: 1,
            malformed_attempts: 3,
        }
    }
}

/// Cooperative cancellation flag for one document run.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    token: CancellationToken,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    General,
    Reserved,
}

struct Waiter {
    priority: Priority,
    sequence: u64,
    grant: oneshot::Sender<TaskPermit>,
}

impl PartialEq for Waiter {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}

impl Eq for Waiter {}

impl PartialOrd for Waiter {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Waiter {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.priority.cmp(&other.priority) {
            // Earlier arrivals first within a priority.
            Ordering::Equal => other.sequence.cmp(&self.sequence),
            order => order,
        }
    }
}

struct FlagEntry {
    id: u64,
    flag: CancelFlag,
    leases: usize,
}

struct Admission {
    general_capacity: usize,
    reserved_capacity: usize,
    general_in_use: usize,
    reserved_in_use: usize,
    sequence: u64,
    waiters: BinaryHeap<Waiter>,
    flag_ids: u64,
    flags: HashMap<JobTicket, FlagEntry>,
}

impl Admission {
    fn free_slot(&self, priority: Priority) -> Option<Slot> {
        if self.general_in_use < self.general_capacity {
            Some(Slot::General)
        } else if priority == Priority::Urgent && self.reserved_in_use < self.reserved_capacity {
            Some(Slot::Reserved)
        } else {
            None
        }
    }

    fn occupy(&mut self, slot: Slot) {
        match slot {
            Slot::General => self.general_in_use += 1,
            Slot::Reserved => self.reserved_in_use += 1,
        }
    }

    fn vacate(&mut self, slot: Slot) {
        match slot {
            Slot::General => self.general_in_use = self.general_in_use.saturating_sub(1),
            Slot::Reserved => self.reserved_in_use = self.reserved_in_use.saturating_sub(1),
        }
    }
}

struct Shared {
    admission: Mutex<Admission>,
    settings: SchedulerSettings,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Admission> {
        self.admission.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Held while a call runs; dropping it frees the slot for the next waiter.
pub struct TaskPermit {
    shared: Arc<Shared>,
    slot: Slot,
    armed: bool,
}

impl Drop for TaskPermit {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut admission = self.shared.lock();
        admission.vacate(self.slot);
        dispatch(&self.shared, &mut admission);
    }
}

/// Keeps a run's flag registered while one of its calls is in the scheduler.
pub struct FlagLease {
    shared: Arc<Shared>,
    ticket: JobTicket,
    id: u64,
    flag: CancelFlag,
}

impl FlagLease {
    pub fn flag(&self) -> &CancelFlag {
        &self.flag
    }
}

impl Drop for FlagLease {
    fn drop(&mut self) {
        let mut admission = self.shared.lock();
        let drained = match admission.flags.get_mut(&self.ticket) {
            Some(entry) if entry.id == self.id => {
                entry.leases = entry.leases.saturating_sub(1);
                entry.leases == 0
            }
            _ => false,
        };
        if drained {
            admission.flags.remove(&self.ticket);
        }
    }
}

/// Hands free slots to the best waiters. Waiters whose caller went away are
/// skipped.
fn dispatch(shared: &Arc<Shared>, admission: &mut Admission) {
    while let Some(top) = admission.waiters.peek() {
        let Some(slot) = admission.free_slot(top.priority) else {
            break;
        };
        let Some(waiter) = admission.waiters.pop() else {
            break;
        };
        admission.occupy(slot);
        let permit = TaskPermit {
            shared: Arc::clone(shared),
            slot,
            armed: true,
        };
        if let Err(mut unclaimed) = waiter.grant.send(permit) {
            unclaimed.armed = false;
            admission.vacate(slot);
        }
    }
}

#[derive(Clone)]
pub struct TaskScheduler {
    shared: Arc<Shared>,
}

impl TaskScheduler {
    pub fn new(settings: SchedulerSettings) -> Self {
        let total = settings.concurrency.max(2);
        let reserved_capacity = settings.reserved_urgent.clamp(1, total - 1);
        let admission = Admission {
            general_capacity: total - reserved_capacity,
            reserved_capacity,
            general_in_use: 0,
            reserved_in_use: 0,
            sequence: 0,
            waiters: BinaryHeap::new(),
            flag_ids: 0,
            flags: HashMap::new(),
        };
        Self {
            shared: Arc::new(Shared {
                admission: Mutex::new(admission),
                settings,
            }),
        }
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.shared.settings
    }

    /// The cancellation flag of the run, registered until the last lease on
    /// it is dropped.
    pub fn lease(&self, ticket: &JobTicket) -> FlagLease {
        let mut admission = self.shared.lock();
        admission.flag_ids += 1;
        let next_id = admission.flag_ids;
        let entry = admission
            .flags
            .entry(ticket.clone())
            .or_insert_with(|| FlagEntry {
                id: next_id,
                flag: CancelFlag::new(),
                leases: 0,
            });
        entry.leases += 1;
        FlagLease {
            shared: Arc::clone(&self.shared),
            ticket: ticket.clone(),
            id: entry.id,
            flag: entry.flag.clone(),
        }
    }

    /// Trips and forgets the flag of the run. Other runs of the same
    /// document are not affected.
    pub fn cancel(&self, ticket: &JobTicket) {
        let entry = self.shared.lock().flags.remove(ticket);
        if let Some(entry) = entry {
            formfill_debug!(
                "Scheduler: cancelling queued and running calls for {:?} run {}",
                ticket.doc_id,
                ticket.run_id
            );
            entry.flag.cancel();
        }
    }

    /// Number of runs with a registered flag.
    pub fn leased_runs(&self) -> usize {
        self.shared.lock().flags.len()
    }

    /// The context's own flag, or a lease on its run's flag.
    fn flag_for(&self, cx: &CallContext) -> (CancelFlag, Option<FlagLease>) {
        match &cx.cancel {
            Some(flag) => (flag.clone(), None),
            None => {
                let lease = self.lease(&cx.ticket());
                (lease.flag().clone(), Some(lease))
            }
        }
    }

    /// Waits for a slot at `priority`. Resolves to `Cancelled` if the flag
    /// trips first.
    pub async fn acquire(
        &self,
        priority: Priority,
        flag: &CancelFlag,
    ) -> Result<TaskPermit, ResolverError> {
        if flag.is_cancelled() {
            return Err(ResolverError::cancelled());
        }
        let granted = {
            let mut admission = self.shared.lock();
            match admission.free_slot(priority) {
                Some(slot) => {
                    admission.occupy(slot);
                    return Ok(TaskPermit {
                        shared: Arc::clone(&self.shared),
                        slot,
                        armed: true,
                    });
                }
                None => {
                    let (grant, granted) = oneshot::channel();
                    admission.sequence += 1;
                    let sequence = admission.sequence;
                    admission.waiters.push(Waiter {
                        priority,
                        sequence,
                        grant,
                    });
                    granted
                }
            }
        };

        tokio::select! {
            biased;
            _ = flag.cancelled() => Err(ResolverError::cancelled()),
            permit = granted => permit.map_err(|_| ResolverError::cancelled()),
        }
    }

    /// Runs `call` under a slot, retrying malformed output.
    pub async fn run<T, F, Fut>(&self, cx: &CallContext, call: F) -> Result<T, ResolverError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ResolverError>>,
    {
        let (flag, _lease) = self.flag_for(cx);
        let _permit = self.acquire(cx.priority, &flag).await?;
        retry_malformed(self.shared.settings.malformed_attempts, &flag, call).await
    }

    pub fn queued(&self) -> usize {
        self.shared.lock().waiters.len()
    }

    pub fn running(&self) -> usize {
        let admission = self.shared.lock();
        admission.general_in_use + admission.reserved_in_use
    }
}

/// Calls `call` up to `attempts` times while it fails with
/// `MalformedResponse`, checking `flag` before each attempt.
pub async fn retry_malformed<T, F, Fut>(
    attempts: usize,
    flag: &CancelFlag,
    mut call: F,
) -> Result<T, ResolverError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ResolverError>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        if flag.is_cancelled() {
            return Err(ResolverError::cancelled());
        }
        match call().await {
            Err(err) if err.kind == FailureKind::MalformedResponse && attempt < attempts => {
                formfill_warn!(
                    "Malformed backend output (attempt {}/{}): {}",
                    attempt,
                    attempts,
                    err.message
                );
                attempt += 1;
            }
            other => return other,
        }
    }
}

/// Routes every call of the wrapped resolver through a [`TaskScheduler`].
pub struct ScheduledResolver<R: ?Sized> {
    inner: Arc<R>,
    scheduler: TaskScheduler,
}

impl<R: FieldResolver + ?Sized> ScheduledResolver<R> {
    pub fn new(inner: Arc<R>, scheduler: TaskScheduler) -> Self {
        Self { inner, scheduler }
    }

    pub fn scheduler(&self) -> &TaskScheduler {
        &self.scheduler
    }

    fn scoped(&self, cx: &CallContext) -> (CallContext, Option<FlagLease>) {
        let (flag, lease) = self.scheduler.flag_for(cx);
        (cx.clone().with_cancel(flag), lease)
    }
}

#[async_trait::async_trait]
impl<R: FieldResolver + ?Sized> FieldResolver for ScheduledResolver<R> {
    async fn extract_text(&self, cx: &CallContext, doc: &Path) -> Result<FormText, ResolverError> {
        let (cx, _lease) = self.scoped(cx);
        self.scheduler
            .run(&cx, || self.inner.extract_text(&cx, doc))
            .await
    }

    async fn detect_pattern(
        &self,
        cx: &CallContext,
        text: &str,
        has_interactive_fields: bool,
    ) -> Result<Option<String>, ResolverError> {
        let (cx, _lease) = self.scoped(cx);
        self.scheduler
            .run(&cx, || {
                self.inner.detect_pattern(&cx, text, has_interactive_fields)
            })
            .await
    }

    async fn resolve_context(
        &self,
        cx: &CallContext,
        store_root: &Path,
    ) -> Result<KnowledgeSnapshot, ResolverError> {
        let (cx, _lease) = self.scoped(cx);
        self.scheduler
            .run(&cx, || self.inner.resolve_context(&cx, store_root))
            .await
    }

    async fn add_context(
        &self,
        cx: &CallContext,
        store_root: &Path,
        key: &str,
        value: &str,
    ) -> Result<KnowledgeSnapshot, ResolverError> {
        let (cx, _lease) = self.scoped(cx);
        self.scheduler
            .run(&cx, || self.inner.add_context(&cx, store_root, key, value))
            .await
    }

    async fn detect_fill_entries(
        &self,
        cx: &CallContext,
        lines: &[String],
        pattern: Option<&PlaceholderPattern>,
    ) -> Result<Vec<FillEntry>, ResolverError> {
        let (cx, _lease) = self.scoped(cx);
        self.scheduler
            .run(&cx, || self.inner.detect_fill_entries(&cx, lines, pattern))
            .await
    }

    async fn process_fill_entries(
        &self,
        cx: &CallContext,
        entries: &[FillEntry],
        store_root: &Path,
        pattern: Option<&PlaceholderPattern>,
    ) -> Result<ProcessedFills, ResolverError> {
        let (cx, _lease) = self.scoped(cx);
        self.scheduler
            .run(&cx, || {
                self.inner
                    .process_fill_entries(&cx, entries, store_root, pattern)
            })
            .await
    }

    async fn detect_checkbox_entries(
        &self,
        cx: &CallContext,
        lines: &[String],
    ) -> Result<Vec<CheckboxEntry>, ResolverError> {
        let (cx, _lease) = self.scoped(cx);
        self.scheduler
            .run(&cx, || self.inner.detect_checkbox_entries(&cx, lines))
            .await
    }

    async fn process_checkbox_entries(
        &self,
        cx: &CallContext,
        entries: &[CheckboxEntry],
        store_root: &Path,
    ) -> Result<Vec<CheckboxEntry>, ResolverError> {
        let (cx, _lease) = self.scoped(cx);
        self.scheduler
            .run(&cx, || {
                self.inner.process_checkbox_entries(&cx, entries, store_root)
            })
            .await
    }

    async fn fill_output(
        &self,
        cx: &CallContext,
        doc: &Path,
        entries: &[FillEntry],
        checkboxes: &[CheckboxEntry],
        output_path: &Path,
    ) -> Result<PathBuf, ResolverError> {
        let (cx, _lease) = self.scoped(cx);
        self.scheduler
            .run(&cx, || {
                self.inner
                    .fill_output(&cx, doc, entries, checkboxes, output_path)
            })
            .await
    }

    async fn cancel_document(&self, ticket: &JobTicket) {
        self.scheduler.cancel(ticket);
        self.inner.cancel_document(ticket).await;
    }
}
