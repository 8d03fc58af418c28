use std::io;
use std::sync::{mpsc, Arc};
use std::thread;

use formfill_core::{DocId, EditPlan, JobTicket};
use formfill_logging::{formfill_debug, formfill_warn};

use crate::http_resolver::{HttpResolver, ResolverSettings};
use crate::pipeline::PipelineRunner;
use crate::resolver::FieldResolver;
use crate::scheduler::{ScheduledResolver, SchedulerSettings, TaskScheduler};
use crate::services::{ChannelEventSink, Services, SharedBoard};
use crate::sync::{ContextSyncEngine, SyncError};
use crate::{EngineEvent, ResolverError};

#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub resolver: ResolverSettings,
    pub scheduler: SchedulerSettings,
}

enum EngineCommand {
    Start { ticket: JobTicket },
    Cancel { ticket: JobTicket },
    Sync { doc_id: DocId },
    CommitEdit(EditPlan),
}

/// Runs the async side on its own thread. Commands go in through plain
/// method calls; events come back through [`EngineHandle::try_recv`].
pub struct EngineHandle {
    cmd_tx: mpsc::Sender<EngineCommand>,
    event_rx: mpsc::Receiver<EngineEvent>,
}

impl EngineHandle {
    /// Starts an engine talking to the HTTP backend described by `config`.
    pub fn new(config: EngineConfig, board: SharedBoard) -> io::Result<Self> {
        let http = HttpResolver::new(config.resolver).map_err(resolver_io_error)?;
        let scheduler = TaskScheduler::new(config.scheduler);
        Self::with_resolver(
            Arc::new(ScheduledResolver::new(Arc::new(http), scheduler)),
            board,
        )
    }

    /// Starts an engine over any resolver.
    pub fn with_resolver(resolver: Arc<dyn FieldResolver>, board: SharedBoard) -> io::Result<Self> {
        let (cmd_tx, cmd_rx) = mpsc::channel();
        let (event_tx, event_rx) = mpsc::channel();
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;
        let services = Services::new(board, resolver, Arc::new(ChannelEventSink::new(event_tx)));

        thread::Builder::new()
            .name("formfill-engine".into())
            .spawn(move || {
                let pipeline = PipelineRunner::new(services.clone());
                let sync = ContextSyncEngine::new(services.clone());
                while let Ok(command) = cmd_rx.recv() {
                    let services = services.clone();
                    let pipeline = pipeline.clone();
                    let sync = sync.clone();
                    runtime.spawn(async move {
                        handle_command(&services, &pipeline, &sync, command).await;
                    });
                }
                formfill_debug!("Engine: command channel closed, shutting down");
            })?;

        Ok(Self { cmd_tx, event_rx })
    }

    pub fn start(&self, ticket: JobTicket) {
        self.send(EngineCommand::Start { ticket });
    }

    /// Cancels the work of one run of a removed document.
    pub fn cancel(&self, ticket: JobTicket) {
        self.send(EngineCommand::Cancel { ticket });
    }

    pub fn sync(&self, doc_id: impl Into<DocId>) {
        self.send(EngineCommand::Sync {
            doc_id: doc_id.into(),
        });
    }

    pub fn commit_edit(&self, plan: EditPlan) {
        self.send(EngineCommand::CommitEdit(plan));
    }

    pub fn try_recv(&self) -> Option<EngineEvent> {
        self.event_rx.try_recv().ok()
    }

    fn send(&self, command: EngineCommand) {
        if self.cmd_tx.send(command).is_err() {
            formfill_warn!("Engine: worker thread is gone, command dropped");
        }
    }
}

async fn handle_command(
    services: &Services,
    pipeline: &PipelineRunner,
    sync: &ContextSyncEngine,
    command: EngineCommand,
) {
    match command {
        EngineCommand::Start { ticket } => {
            pipeline.run(ticket).await;
        }
        EngineCommand::Cancel { ticket } => {
            cancel_run(services, &ticket).await;
        }
        EngineCommand::Sync { doc_id } => {
            let result = sync.sync(&doc_id).await;
            match &result {
                Err(SyncError::Cancelled) => formfill_debug!("Sync: {:?} cancelled", doc_id),
                Err(err) => formfill_warn!("Sync: {:?} not synced: {}", doc_id, err),
                Ok(_) => {}
            }
            services.sink.emit(EngineEvent::Synced {
                doc_id,
                result: result.map_err(|err| err.to_string()),
            });
        }
        EngineCommand::CommitEdit(plan) => {
            let result = sync.commit_edit(&plan).await;
            match &result {
                Err(SyncError::Cancelled) => {
                    formfill_debug!("Edit: {:?} cancelled", plan.ticket.doc_id)
                }
                Err(err) => formfill_warn!("Edit: {:?} not committed: {}", plan.ticket.doc_id, err),
                Ok(_) => {}
            }
            services.sink.emit(EngineEvent::EditCommitted {
                doc_id: plan.ticket.doc_id,
                result: result.map_err(|err| err.to_string()),
            });
        }
    }
}

/// Cancels all tracked work of the run and tells the resolver to stop.
async fn cancel_run(services: &Services, ticket: &JobTicket) {
    let cancelled = services.tracker.cancel_all(ticket);
    formfill_debug!(
        "Engine: cancelled {} call(s) for {:?} run {}",
        cancelled,
        ticket.doc_id,
        ticket.run_id
    );
    services.resolver.cancel_document(ticket).await;
}

fn resolver_io_error(err: ResolverError) -> io::Error {
    io::Error::other(err.to_string())
}
