use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc, Mutex, MutexGuard, PoisonError};

use formfill_core::{JobBoard, JobTicket, KnowledgeSnapshot};
use futures_util::FutureExt;

use crate::resolver::{CallContext, FieldResolver};
use crate::scheduler::Priority;
use crate::single_flight::SingleFlight;
use crate::store_writes::StoreWriteQueue;
use crate::tracker::RequestLifecycleTracker;
use crate::{EngineEvent, ResolverError};

/// The job board shared between the front end and the engine. The lock is
/// never held across an await.
pub type SharedBoard = Arc<Mutex<JobBoard>>;

pub fn shared_board(board: JobBoard) -> SharedBoard {
    Arc::new(Mutex::new(board))
}

pub fn lock_board(board: &SharedBoard) -> MutexGuard<'_, JobBoard> {
    board.lock().unwrap_or_else(PoisonError::into_inner)
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: EngineEvent);
}

pub struct ChannelEventSink {
    tx: mpsc::Sender<EngineEvent>,
}

impl ChannelEventSink {
    pub fn new(tx: mpsc::Sender<EngineEvent>) -> Self {
        Self { tx }
    }
}

impl EventSink for ChannelEventSink {
    fn emit(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }
}

/// Everything the pipeline and the sync engine share: the board, the
/// resolver, the in-flight registry, the snapshot cell and the write queue.
#[derive(Clone)]
pub struct Services {
    pub board: SharedBoard,
    pub resolver: Arc<dyn FieldResolver>,
    pub tracker: RequestLifecycleTracker,
    pub snapshots: Arc<SingleFlight<PathBuf, KnowledgeSnapshot>>,
    pub writes: Arc<StoreWriteQueue>,
    pub sink: Arc<dyn EventSink>,
}

impl Services {
    pub fn new(
        board: SharedBoard,
        resolver: Arc<dyn FieldResolver>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            board,
            resolver,
            tracker: RequestLifecycleTracker::new(),
            snapshots: Arc::new(SingleFlight::new()),
            writes: Arc::new(StoreWriteQueue::new()),
            sink,
        }
    }

    pub fn board(&self) -> MutexGuard<'_, JobBoard> {
        lock_board(&self.board)
    }

    /// Calls for the run go out at `priority`; the selected document runs in
    /// the foreground.
    pub fn call_context(&self, ticket: &JobTicket, priority: Priority) -> CallContext {
        let priority = if self.board().is_selected(&ticket.doc_id) {
            Priority::Urgent
        } else {
            priority
        };
        CallContext::for_run(ticket, priority)
    }

    /// Reads the knowledge store under `root`, sharing one backend call
    /// between all concurrent readers of the same root.
    ///
    /// The shared call belongs to no single reader: it runs under a context
    /// keyed by the root, so cancelling one reader's run leaves the call
    /// running for the others.
    pub async fn snapshot(
        &self,
        cx: &CallContext,
        root: &Path,
    ) -> Result<KnowledgeSnapshot, ResolverError> {
        let resolver = Arc::clone(&self.resolver);
        let cx = CallContext::shared(root, cx.priority);
        let owned_root = root.to_path_buf();
        self.snapshots
            .run(root.to_path_buf(), move || {
                async move { resolver.resolve_context(&cx, &owned_root).await }.boxed()
            })
            .await
    }
}
