use crate::{Effect, JobBoard, JobState, ManualEditRejected, Msg, Notice, UserInputError};

/// Pure update function: applies a message to state and returns any effects.
pub fn update(mut state: JobBoard, msg: Msg) -> (JobBoard, Vec<Effect>) {
    let effects = match msg {
        Msg::StoreRootSelected(root) => {
            state.set_store_root(root);
            Vec::new()
        }
        Msg::DocumentsAdded(paths) => {
            let Some(store_root) = state.store_root().map(ToOwned::to_owned) else {
                return (state, vec![notify_input(UserInputError::MissingStoreRoot)]);
            };
            if paths.is_empty() {
                return (state, vec![notify_input(UserInputError::NoDocumentSelected)]);
            }
            paths
                .into_iter()
                .filter_map(|path| state.register(path, store_root.clone()))
                .map(|ticket| Effect::StartPipeline {
                    ticket,
                    store_root: store_root.clone(),
                })
                .collect()
        }
        Msg::DocumentRemoved(doc_id) => match state.remove(&doc_id) {
            Some(job) => vec![Effect::CancelDocument {
                ticket: job.ticket(),
            }],
            None => Vec::new(),
        },
        Msg::DocumentSelected(doc_id) => {
            state.select(&doc_id);
            Vec::new()
        }
        Msg::EditProposed {
            doc_id,
            change_id,
            filled_line,
        } => match state.check_edit(&doc_id, change_id, &filled_line) {
            Ok(plan) => vec![Effect::CommitEdit(plan)],
            Err(rejected) => vec![notify_edit(rejected)],
        },
        Msg::KnowledgeStoreChanged => state
            .jobs()
            .filter(|job| job.state == JobState::Completed && job.fill_pattern.is_some())
            .map(|job| Effect::SyncDocument {
                doc_id: job.doc_id.clone(),
            })
            .collect(),
        Msg::RestoreCompletedJobs(snapshots) => {
            for snapshot in snapshots {
                state.restore_completed(snapshot);
            }
            Vec::new()
        }
    };

    (state, effects)
}

fn notify_input(error: UserInputError) -> Effect {
    Effect::Notify(Notice::InvalidInput(error))
}

fn notify_edit(rejected: ManualEditRejected) -> Effect {
    Effect::Notify(Notice::EditRejected(rejected))
}
