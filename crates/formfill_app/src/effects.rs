use formfill_core::{Effect, Notice};
use formfill_engine::{EngineEvent, EngineHandle};
use formfill_logging::{formfill_debug, formfill_info, formfill_warn};

/// Turns core effects into engine commands and keeps count of the commands
/// whose completion event has not arrived yet.
pub struct EffectRunner {
    engine: EngineHandle,
    pending: usize,
}

impl EffectRunner {
    pub fn new(engine: EngineHandle) -> Self {
        Self { engine, pending: 0 }
    }

    /// Issues `effects`; notices for the user are handed back.
    pub fn run(&mut self, effects: Vec<Effect>) -> Vec<Notice> {
        let mut notices = Vec::new();
        for effect in effects {
            match effect {
                Effect::StartPipeline { ticket, store_root } => {
                    formfill_info!(
                        "StartPipeline doc={:?} run={} store={:?}",
                        ticket.doc_id,
                        ticket.run_id,
                        store_root
                    );
                    self.engine.start(ticket);
                    self.pending += 1;
                }
                Effect::CancelDocument { ticket } => {
                    formfill_debug!("CancelDocument doc={:?} run={}", ticket.doc_id, ticket.run_id);
                    self.engine.cancel(ticket);
                }
                Effect::SyncDocument { doc_id } => {
                    formfill_debug!("SyncDocument doc={:?}", doc_id);
                    self.engine.sync(doc_id);
                    self.pending += 1;
                }
                Effect::CommitEdit(plan) => {
                    formfill_info!(
                        "CommitEdit doc={:?} change={}",
                        plan.ticket.doc_id,
                        plan.change_id
                    );
                    self.engine.commit_edit(plan);
                    self.pending += 1;
                }
                Effect::Notify(notice) => {
                    formfill_warn!("{}", describe(&notice));
                    notices.push(notice);
                }
            }
        }
        notices
    }

    pub fn try_recv(&mut self) -> Option<EngineEvent> {
        let event = self.engine.try_recv()?;
        if matches!(
            event,
            EngineEvent::JobFinished { .. }
                | EngineEvent::RunDropped { .. }
                | EngineEvent::Synced { .. }
                | EngineEvent::EditCommitted { .. }
        ) {
            self.pending = self.pending.saturating_sub(1);
        }
        Some(event)
    }

    pub fn is_idle(&self) -> bool {
        self.pending == 0
    }
}

pub fn describe(notice: &Notice) -> String {
    match notice {
        Notice::InvalidInput(err) => format!("cannot start: {err}"),
        Notice::EditRejected(err) => format!("edit rejected: {err}"),
    }
}
