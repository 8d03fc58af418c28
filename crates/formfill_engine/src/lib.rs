//! Form filling engine: resolver client, request tracking, scheduling and the
//! per-document pipeline.
mod engine;
mod http_resolver;
mod persist;
mod pipeline;
mod resolver;
mod scheduler;
mod services;
mod single_flight;
mod store_writes;
mod sync;
mod tracker;
mod types;

pub use engine::{EngineConfig, EngineHandle};
pub use http_resolver::{HttpResolver, ResolverSettings};
pub use persist::{ensure_state_dir, AtomicFileWriter, PersistError};
pub use pipeline::{PipelineRunner, RunOutcome, StageError};
pub use resolver::{CallContext, FieldResolver, FormText, ProcessedFills};
pub use scheduler::{
    retry_malformed, CancelFlag, FlagLease, Priority, ScheduledResolver, SchedulerSettings,
    TaskPermit, TaskScheduler,
};
pub use services::{lock_board, shared_board, ChannelEventSink, EventSink, Services, SharedBoard};
pub use single_flight::SingleFlight;
pub use store_writes::StoreWriteQueue;
pub use sync::{ContextSyncEngine, SyncError};
pub use tracker::RequestLifecycleTracker;
pub use types::{EngineEvent, FailureKind, ResolverError, Stage, SyncOutcome};
