//! Drives one document from registration to a terminal state.

use std::future::Future;
use std::path::PathBuf;

use formfill_core::{
    filled_output_path, BoardError, JobState, JobTicket, PatternError, PlaceholderPattern,
    StageApplied, StageUpdate,
};
use formfill_logging::{formfill_debug, formfill_error, formfill_info};
use futures_util::future::try_join;
use thiserror::Error;

use crate::scheduler::Priority;
use crate::services::Services;
use crate::{EngineEvent, ResolverError, Stage};

/// A stage failure. It fails only the document it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StageError {
    #[error("{stage:?} failed: {source}")]
    Resolver {
        stage: Stage,
        #[source]
        source: ResolverError,
    },
    #[error("backend proposed an unusable placeholder pattern: {0}")]
    Pattern(#[from] PatternError),
}

impl StageError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, StageError::Resolver { source, .. } if source.is_cancelled())
    }
}

/// How a run ended. Every outcome is announced: `Finished` with
/// [`EngineEvent::JobFinished`], the others with [`EngineEvent::RunDropped`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The job reached `Completed`, `TooComplex` or `Failed`. A call that
    /// came back `Cancelled` while the run was still current fails the job.
    Finished(JobState),
    /// The document was removed while a call was in flight and the call
    /// was cancelled.
    Cancelled,
    /// The document was removed or registered again while the run was in
    /// flight; its results were dropped.
    Detached,
}

enum Halt {
    Detached,
    Failed(StageError),
}

impl From<BoardError> for Halt {
    fn from(err: BoardError) -> Self {
        if !err.is_detached() {
            formfill_debug!("Pipeline: dropping stage result: {}", err);
        }
        Halt::Detached
    }
}

#[derive(Clone)]
pub struct PipelineRunner {
    services: Services,
}

impl PipelineRunner {
    pub fn new(services: Services) -> Self {
        Self { services }
    }

    pub async fn run(&self, ticket: JobTicket) -> RunOutcome {
        let doc_id = ticket.doc_id.clone();
        match self.drive(&ticket).await {
            Ok(state) => {
                formfill_info!("Pipeline: {:?} finished as {:?}", doc_id, state);
                self.services
                    .sink
                    .emit(EngineEvent::JobFinished { doc_id, state });
                RunOutcome::Finished(state)
            }
            Err(Halt::Detached) => self.drop_run(ticket, RunOutcome::Detached),
            Err(Halt::Failed(err)) => {
                let recorded = self.services.board().fail(&ticket, err.to_string());
                match recorded {
                    Ok(()) => {
                        formfill_error!("Pipeline: {:?} failed: {}", doc_id, err);
                        self.services.sink.emit(EngineEvent::JobFinished {
                            doc_id,
                            state: JobState::Failed,
                        });
                        RunOutcome::Finished(JobState::Failed)
                    }
                    Err(_) if err.is_cancelled() => self.drop_run(ticket, RunOutcome::Cancelled),
                    Err(_) => self.drop_run(ticket, RunOutcome::Detached),
                }
            }
        }
    }

    fn drop_run(&self, ticket: JobTicket, outcome: RunOutcome) -> RunOutcome {
        formfill_debug!(
            "Pipeline: {:?} run {} ended as {:?}, results dropped",
            ticket.doc_id,
            ticket.run_id,
            outcome
        );
        self.services.sink.emit(EngineEvent::RunDropped { ticket });
        outcome
    }

    async fn drive(&self, ticket: &JobTicket) -> Result<JobState, Halt> {
        let doc = ticket.doc_id.as_path();
        let resolver = self.services.resolver.as_ref();
        let store_root = self.begin(ticket)?;

        let cx = self.services.call_context(ticket, Priority::Normal);
        let form = self
            .call(ticket, Stage::ExtractText, resolver.extract_text(&cx, doc))
            .await?;
        self.apply(
            ticket,
            StageUpdate::FormText {
                text: form.text.clone(),
                has_interactive_fields: form.has_interactive_fields,
            },
        )?;
        let lines: Vec<String> = form.text.lines().map(str::to_string).collect();

        let cx = self.services.call_context(ticket, Priority::Normal);
        let source = self
            .call(
                ticket,
                Stage::DetectPattern,
                resolver.detect_pattern(&cx, &form.text, form.has_interactive_fields),
            )
            .await?;
        let pattern = PlaceholderPattern::optional(source.as_deref())
            .map_err(|err| Halt::Failed(err.into()))?;
        self.apply(ticket, StageUpdate::Pattern(pattern.clone()))?;

        let cx = self.services.call_context(ticket, Priority::Normal);
        self.call(
            ticket,
            Stage::ResolveContext,
            self.services.snapshot(&cx, &store_root),
        )
        .await?;

        let cx = self.services.call_context(ticket, Priority::Normal);
        let detected = self
            .call(
                ticket,
                Stage::DetectFillEntries,
                resolver.detect_fill_entries(&cx, &lines, pattern.as_ref()),
            )
            .await?;
        if self.apply(ticket, StageUpdate::FillEntriesDetected(detected.clone()))?
            == StageApplied::TooComplex
        {
            return Ok(JobState::TooComplex);
        }

        let cx = self.services.call_context(ticket, Priority::Normal);
        let (processed, checkboxes) = try_join(
            self.call(
                ticket,
                Stage::ProcessFillEntries,
                resolver.process_fill_entries(&cx, &detected, &store_root, pattern.as_ref()),
            ),
            self.call(
                ticket,
                Stage::DetectCheckboxEntries,
                resolver.detect_checkbox_entries(&cx, &lines),
            ),
        )
        .await?;
        self.apply(
            ticket,
            StageUpdate::FillEntriesProcessed {
                entries: processed.entries.clone(),
                missing_keys: processed.missing_keys,
            },
        )?;
        self.apply(ticket, StageUpdate::CheckboxesDetected(checkboxes.clone()))?;

        let cx = self.services.call_context(ticket, Priority::Normal);
        let checkboxes = self
            .call(
                ticket,
                Stage::ProcessCheckboxEntries,
                resolver.process_checkbox_entries(&cx, &checkboxes, &store_root),
            )
            .await?;
        self.apply(ticket, StageUpdate::CheckboxesProcessed(checkboxes.clone()))?;

        let cx = self.services.call_context(ticket, Priority::Normal);
        let output_path = filled_output_path(doc);
        let written = self
            .call(
                ticket,
                Stage::FillOutput,
                resolver.fill_output(&cx, doc, &processed.entries, &checkboxes, &output_path),
            )
            .await?;
        self.apply(ticket, StageUpdate::OutputWritten(written))?;
        Ok(JobState::Completed)
    }

    fn begin(&self, ticket: &JobTicket) -> Result<PathBuf, Halt> {
        let mut board = self.services.board();
        board.begin(ticket)?;
        board
            .job(&ticket.doc_id)
            .map(|job| job.store_root.clone())
            .ok_or(Halt::Detached)
    }

    async fn call<T, F>(&self, ticket: &JobTicket, stage: Stage, op: F) -> Result<T, Halt>
    where
        F: Future<Output = Result<T, ResolverError>>,
    {
        if !self.services.board().holds(ticket) {
            return Err(Halt::Detached);
        }
        self.services.sink.emit(EngineEvent::StageStarted {
            ticket: ticket.clone(),
            stage,
        });
        self.services
            .tracker
            .track(ticket, op)
            .await
            .map_err(|source| Halt::Failed(StageError::Resolver { stage, source }))
    }

    fn apply(&self, ticket: &JobTicket, update: StageUpdate) -> Result<StageApplied, Halt> {
        Ok(self.services.board().apply_stage(ticket, update)?)
    }
}
