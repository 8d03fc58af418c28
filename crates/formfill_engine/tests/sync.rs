mod common;

use std::path::{Path, PathBuf};

use common::{board_with, dispatch, init_logging, services, visa_script, ScriptedResolver};
use formfill_core::{Effect, JobState, Msg};
use formfill_engine::{
    lock_board, ContextSyncEngine, EngineEvent, PipelineRunner, Priority, SyncError, SyncOutcome,
};
use pretty_assertions::assert_eq;

const DOC: &str = "/forms/visa.pdf";

async fn completed() -> (
    std::sync::Arc<ScriptedResolver>,
    formfill_engine::SharedBoard,
    ContextSyncEngine,
    std::sync::Arc<common::RecordingSink>,
) {
    init_logging();
    let resolver = ScriptedResolver::new(visa_script());
    let (board, tickets) = board_with(&[DOC]);
    let (services, sink) = services(&board, &resolver);
    PipelineRunner::new(services.clone())
        .run(tickets[0].clone())
        .await;
    sink.take();
    (resolver, board, ContextSyncEngine::new(services), sink)
}

#[tokio::test]
async fn changed_value_is_written_once_then_never_again() {
    let (resolver, board, sync, _sink) = completed().await;
    assert_eq!(resolver.calls("fill_output"), 1);

    resolver.set_value("city", "Paris");

    let first = sync.sync(Path::new(DOC)).await.unwrap();
    assert_eq!(
        first,
        SyncOutcome::Rewritten {
            lines: 1,
            output_path: PathBuf::from("/forms/visa_filled.pdf"),
        }
    );
    assert_eq!(resolver.calls("fill_output"), 2);

    let second = sync.sync(Path::new(DOC)).await.unwrap();
    assert_eq!(second, SyncOutcome::Unchanged);
    assert_eq!(resolver.calls("fill_output"), 2);

    let board = lock_board(&board);
    let job = board.job(Path::new(DOC)).unwrap();
    assert_eq!(job.changed_lines[1].filled_line, "City: Paris");
    assert_eq!(job.changed_lines[2].filled_line, "Zip: N1");
    assert_eq!(job.state, JobState::Completed);
}

#[tokio::test]
async fn current_values_cause_no_write() {
    let (resolver, _board, sync, _sink) = completed().await;

    assert_eq!(sync.sync(Path::new(DOC)).await, Ok(SyncOutcome::Unchanged));
    assert_eq!(resolver.calls("fill_output"), 1);
}

#[tokio::test]
async fn failed_regeneration_keeps_the_previous_fill() {
    let (resolver, board, sync, _sink) = completed().await;
    let before = lock_board(&board).job(Path::new(DOC)).unwrap().clone();
    resolver.set_value("name", "Grace Hopper");
    resolver.fail(DOC, "fill_output");

    let result = sync.sync(Path::new(DOC)).await;

    assert!(matches!(result, Err(SyncError::Regenerate(_))));
    assert_eq!(lock_board(&board).job(Path::new(DOC)).unwrap(), &before);
}

#[tokio::test]
async fn only_completed_jobs_are_synced() {
    init_logging();
    let resolver = ScriptedResolver::new(visa_script());
    let (board, _tickets) = board_with(&[DOC]);
    let (services, _sink) = services(&board, &resolver);

    let result = ContextSyncEngine::new(services).sync(Path::new(DOC)).await;

    assert_eq!(
        result,
        Err(SyncError::NotCompleted {
            doc_id: PathBuf::from(DOC),
            state: JobState::Pending,
        })
    );
    assert_eq!(resolver.calls("resolve_context"), 0);
}

#[tokio::test]
async fn committed_edit_updates_store_output_and_change_lines() {
    let (resolver, board, sync, sink) = completed().await;

    let effects = dispatch(
        &board,
        Msg::EditProposed {
            doc_id: PathBuf::from(DOC),
            change_id: 1,
            filled_line: "City: Paris".into(),
        },
    );
    let [Effect::CommitEdit(plan)] = effects.as_slice() else {
        panic!("expected a commit, got {effects:?}");
    };

    let written = sync.commit_edit(plan).await.unwrap();

    assert_eq!(written, PathBuf::from("/forms/visa_filled.pdf"));
    assert_eq!(resolver.value("city").as_deref(), Some("Paris"));
    assert_eq!(resolver.calls("add_context"), 1);
    let board = lock_board(&board);
    let job = board.job(Path::new(DOC)).unwrap();
    assert_eq!(job.changed_lines[1].filled_line, "City: Paris");
    assert_eq!(
        sink.take(),
        vec![EngineEvent::KnowledgeStoreChanged {
            root: PathBuf::from(common::STORE)
        }]
    );
}

#[tokio::test]
async fn edit_after_commit_leaves_later_sync_clean() {
    let (resolver, board, sync, _sink) = completed().await;
    let effects = dispatch(
        &board,
        Msg::EditProposed {
            doc_id: PathBuf::from(DOC),
            change_id: 0,
            filled_line: "Name: Ada King".into(),
        },
    );
    let [Effect::CommitEdit(plan)] = effects.as_slice() else {
        panic!("expected a commit, got {effects:?}");
    };
    sync.commit_edit(plan).await.unwrap();
    let writes = resolver.calls("fill_output");

    assert_eq!(sync.sync(Path::new(DOC)).await, Ok(SyncOutcome::Unchanged));
    assert_eq!(resolver.calls("fill_output"), writes);
}

#[tokio::test]
async fn store_syncs_yield_to_fills_and_edits_go_ahead_of_them() {
    let (resolver, board, sync, _sink) = completed().await;
    assert_eq!(resolver.priority("fill_output"), Some(Priority::Normal));

    resolver.set_value("city", "Paris");
    sync.sync(Path::new(DOC)).await.unwrap();
    assert_eq!(resolver.priority("resolve_context"), Some(Priority::Low));
    assert_eq!(resolver.priority("fill_output"), Some(Priority::Low));

    let effects = dispatch(
        &board,
        Msg::EditProposed {
            doc_id: PathBuf::from(DOC),
            change_id: 0,
            filled_line: "Name: Ada King".into(),
        },
    );
    let [Effect::CommitEdit(plan)] = effects.as_slice() else {
        panic!("expected a commit, got {effects:?}");
    };
    sync.commit_edit(plan).await.unwrap();
    assert_eq!(resolver.priority("add_context"), Some(Priority::High));
    assert_eq!(resolver.priority("fill_output"), Some(Priority::High));

    dispatch(&board, Msg::DocumentSelected(PathBuf::from(DOC)));
    resolver.set_value("zip", "EC1");
    sync.sync(Path::new(DOC)).await.unwrap();
    assert_eq!(resolver.priority("resolve_context"), Some(Priority::Urgent));
}
