use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Fill forms from a folder of personal knowledge.
#[derive(Debug, Parser)]
#[command(name = "formfill", version)]
pub struct Cli {
    /// Configuration file (RON). Defaults to ./formfill.ron when present.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Base URL of the form-filling backend.
    #[arg(long, global = true)]
    pub backend_url: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fill documents and remember the completed ones.
    Fill(FillArgs),
    /// Bring remembered documents up to date with the knowledge store.
    Sync(StoreArgs),
    /// List remembered documents.
    Status(StatusArgs),
    /// Rewrite one filled line by hand and store the new values.
    Edit(EditArgs),
}

#[derive(Debug, Args)]
pub struct StoreArgs {
    /// Knowledge store folder.
    #[arg(long)]
    pub store: PathBuf,
}

#[derive(Debug, Args)]
pub struct FillArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    /// Documents to fill.
    #[arg(required = true)]
    pub documents: Vec<PathBuf>,
}

#[derive(Debug, Args)]
pub struct StatusArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    /// Also print every change line with its id.
    #[arg(long)]
    pub lines: bool,
}

#[derive(Debug, Args)]
pub struct EditArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    pub document: PathBuf,

    /// Id of the change line, as printed by `status --lines`.
    pub change_id: usize,

    /// The complete replacement line.
    pub line: String,
}
