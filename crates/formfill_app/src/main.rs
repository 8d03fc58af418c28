mod app;
mod cli;
mod commands;
mod config;
mod effects;
mod persistence;

use std::process::ExitCode;

use clap::Parser;
use formfill_logging::{formfill_error, formfill_info};

use crate::cli::Cli;
use crate::config::AppConfig;

fn main() -> ExitCode {
    match run(Cli::parse()) {
        Ok(code) => code,
        Err(err) => {
            formfill_error!("{:#}", err);
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(url) = cli.backend_url {
        config.backend.base_url = url;
    }
    formfill_logging::initialize(
        config.logging.destination(),
        config.logging.level()?,
        &config.logging.file,
    );
    formfill_info!("formfill starting, backend {}", config.backend.base_url);
    commands::run(cli.command, &config)
}
