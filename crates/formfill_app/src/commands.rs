use std::path::{self, Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use formfill_core::{JobRowView, JobState, Msg};
use formfill_engine::{ensure_state_dir, EngineEvent, SyncOutcome};

use crate::app::{change_lines, persisted_board, App};
use crate::cli::{Command, EditArgs, FillArgs, StatusArgs, StoreArgs};
use crate::config::AppConfig;
use crate::effects::describe;

pub fn run(command: Command, config: &AppConfig) -> anyhow::Result<ExitCode> {
    match command {
        Command::Fill(args) => fill(config, args),
        Command::Sync(args) => sync(config, args),
        Command::Status(args) => status(args),
        Command::Edit(args) => edit(config, args),
    }
}

fn absolute(path: &Path) -> anyhow::Result<PathBuf> {
    path::absolute(path).with_context(|| format!("cannot resolve {path:?}"))
}

fn store_root(args: &StoreArgs) -> anyhow::Result<PathBuf> {
    absolute(&args.store)
}

fn exit_code(ok: bool) -> ExitCode {
    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn fill(config: &AppConfig, args: FillArgs) -> anyhow::Result<ExitCode> {
    let store = store_root(&args.store)?;
    let documents = args
        .documents
        .iter()
        .map(|doc| absolute(doc))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let mut app = App::open(config, &store)?;
    app.restore(&documents);
    let notices = app.dispatch(Msg::DocumentsAdded(documents.clone()));
    if !notices.is_empty() {
        for notice in &notices {
            eprintln!("{}", describe(notice));
        }
        return Ok(ExitCode::FAILURE);
    }
    app.wait_idle();
    app.save();

    let rows: Vec<_> = app
        .rows()
        .into_iter()
        .filter(|row| documents.contains(&row.doc_id))
        .collect();
    print_rows(&rows);
    Ok(exit_code(rows.iter().all(|row| row.state != JobState::Failed)))
}

fn sync(config: &AppConfig, args: StoreArgs) -> anyhow::Result<ExitCode> {
    let store = store_root(&args)?;
    let mut app = App::open(config, &store)?;
    if app.restore(&[]) == 0 {
        println!("No completed documents remembered in {}", store.display());
        return Ok(ExitCode::SUCCESS);
    }
    app.dispatch(Msg::KnowledgeStoreChanged);
    let events = app.wait_idle();
    app.save();
    Ok(exit_code(print_events(&events)))
}

fn status(args: StatusArgs) -> anyhow::Result<ExitCode> {
    let store = store_root(&args.store)?;
    ensure_state_dir(&store)
        .with_context(|| format!("knowledge store {store:?} is not usable"))?;
    let board = persisted_board(&store);
    let rows = board.view().jobs;
    if rows.is_empty() {
        println!("No completed documents remembered in {}", store.display());
    }
    print_rows(&rows);
    if args.lines {
        for row in &rows {
            println!("{}", row.doc_id.display());
            for line in change_lines(&board, &row.doc_id) {
                println!("  [{}] {}", line.id, line.template_line);
                println!("      {}", line.filled_line);
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn edit(config: &AppConfig, args: EditArgs) -> anyhow::Result<ExitCode> {
    let store = store_root(&args.store)?;
    let doc = absolute(&args.document)?;

    let mut app = App::open(config, &store)?;
    app.restore(&[]);
    app.dispatch(Msg::DocumentSelected(doc.clone()));
    let notices = app.dispatch(Msg::EditProposed {
        doc_id: doc,
        change_id: args.change_id,
        filled_line: args.line,
    });
    if let Some(notice) = notices.first() {
        eprintln!("{}", describe(notice));
        return Ok(ExitCode::FAILURE);
    }
    let events = app.wait_idle();
    app.save();
    Ok(exit_code(print_events(&events)))
}

fn print_rows(rows: &[JobRowView]) {
    for row in rows {
        let state = format!("{:?}", row.state);
        println!("{state:<11} {}", row.doc_id.display());
        if let Some(output) = &row.output_path {
            println!("            output: {}", output.display());
        }
        if !row.missing_keys.is_empty() {
            println!("            missing: {}", row.missing_keys.join(", "));
        }
        if let Some(error) = &row.error {
            println!("            error: {error}");
        }
    }
}

/// Prints sync and edit results. Returns whether all of them succeeded.
fn print_events(events: &[EngineEvent]) -> bool {
    let mut ok = true;
    for event in events {
        match event {
            EngineEvent::Synced { doc_id, result } => match result {
                Ok(SyncOutcome::Unchanged) => println!("up to date  {}", doc_id.display()),
                Ok(SyncOutcome::Rewritten { lines, output_path }) => println!(
                    "rewrote {lines} line(s) of {} into {}",
                    doc_id.display(),
                    output_path.display()
                ),
                Err(err) => {
                    ok = false;
                    println!("not synced  {}: {err}", doc_id.display());
                }
            },
            EngineEvent::EditCommitted { doc_id, result } => match result {
                Ok(output) => println!("edited      {} into {}", doc_id.display(), output.display()),
                Err(err) => {
                    ok = false;
                    println!("not edited  {}: {err}", doc_id.display());
                }
            },
            EngineEvent::JobFinished { doc_id, state } => {
                println!("{:<11} {}", format!("{state:?}"), doc_id.display());
            }
            EngineEvent::StageStarted { .. }
            | EngineEvent::RunDropped { .. }
            | EngineEvent::KnowledgeStoreChanged { .. } => {}
        }
    }
    ok
}
