use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::Context;
use formfill_core::{update, ChangeLine, JobBoard, JobRowView, Msg, Notice};
use formfill_engine::{ensure_state_dir, lock_board, shared_board, EngineEvent, EngineHandle, SharedBoard};
use formfill_logging::{formfill_debug, formfill_info};

use crate::config::AppConfig;
use crate::effects::EffectRunner;
use crate::persistence::{load_completed_jobs, save_completed_jobs};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// One session against a knowledge store: the shared board, the engine
/// working on it and the persisted jobs of the store.
pub struct App {
    board: SharedBoard,
    effects: EffectRunner,
    store_root: PathBuf,
}

impl App {
    pub fn open(config: &AppConfig, store_root: &Path) -> anyhow::Result<Self> {
        ensure_state_dir(store_root)
            .with_context(|| format!("knowledge store {store_root:?} is not usable"))?;
        let (board, _) = update(
            JobBoard::new(),
            Msg::StoreRootSelected(store_root.to_path_buf()),
        );
        let board = shared_board(board);
        let engine = EngineHandle::new(config.engine_config(), board.clone())
            .context("starting the engine")?;
        Ok(Self {
            board,
            effects: EffectRunner::new(engine),
            store_root: store_root.to_path_buf(),
        })
    }

    /// Puts the persisted completed jobs back on the board, except those
    /// for `except`. Returns how many were restored.
    pub fn restore(&mut self, except: &[PathBuf]) -> usize {
        let snapshots: Vec<_> = load_completed_jobs(&self.store_root)
            .into_iter()
            .filter(|snapshot| !except.contains(&snapshot.doc_id))
            .collect();
        let restored = snapshots.len();
        self.dispatch(Msg::RestoreCompletedJobs(snapshots));
        restored
    }

    pub fn dispatch(&mut self, msg: Msg) -> Vec<Notice> {
        let effects = {
            let mut guard = lock_board(&self.board);
            let state = std::mem::take(&mut *guard);
            let (state, effects) = update(state, msg);
            *guard = state;
            effects
        };
        self.effects.run(effects)
    }

    /// Pumps engine events until every issued command has reported back.
    /// Store changes fan out into syncs of the other completed documents
    /// before this returns. Returns the completion events.
    pub fn wait_idle(&mut self) -> Vec<EngineEvent> {
        let mut finished = Vec::new();
        while !self.effects.is_idle() {
            let Some(event) = self.effects.try_recv() else {
                thread::sleep(POLL_INTERVAL);
                continue;
            };
            match event {
                EngineEvent::StageStarted { ticket, stage } => {
                    formfill_debug!("{:?}: {:?}", ticket.doc_id, stage);
                }
                EngineEvent::KnowledgeStoreChanged { root } => {
                    formfill_info!("Knowledge store {:?} changed, re-syncing", root);
                    self.dispatch(Msg::KnowledgeStoreChanged);
                }
                other => finished.push(other),
            }
        }
        finished
    }

    pub fn rows(&self) -> Vec<JobRowView> {
        lock_board(&self.board).view().jobs
    }

    pub fn save(&self) {
        let completed = lock_board(&self.board).completed_jobs_snapshot();
        save_completed_jobs(&self.store_root, &completed);
    }
}

/// Board of the persisted jobs of `store_root`, without an engine.
pub fn persisted_board(store_root: &Path) -> JobBoard {
    let (board, _) = update(
        JobBoard::new(),
        Msg::RestoreCompletedJobs(load_completed_jobs(store_root)),
    );
    board
}

pub fn change_lines(board: &JobBoard, doc: &Path) -> Vec<ChangeLine> {
    board
        .job(doc)
        .map(|job| job.changed_lines.clone())
        .unwrap_or_default()
}
