//! Form filling core: placeholder codec, job board state machine and
//! view-model helpers. Nothing in here performs IO.
mod change_lines;
mod codec;
mod drift;
mod effect;
mod error;
mod model;
mod msg;
mod paths;
mod state;
mod update;
mod view_model;

pub use change_lines::derive_change_lines;
pub use codec::{
    extract_fills, inject_fills, tokenize, FillMismatch, Fills, PatternError, PlaceholderPattern,
    Token,
};
pub use drift::{reconcile, DriftReport, KnowledgeSnapshot, RewrittenLine};
pub use effect::{Effect, Notice};
pub use error::{BoardError, ManualEditRejected, UserInputError};
pub use model::{
    ChangeLine, CheckboxEntry, DocId, FillEntry, JobState, JobTicket, ProcessingJob,
};
pub use msg::Msg;
pub use paths::filled_output_path;
pub use state::{CompletedJobSnapshot, EditPlan, JobBoard, StageApplied, StageUpdate};
pub use update::update;
pub use view_model::{BoardViewModel, JobRowView};
