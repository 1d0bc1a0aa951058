use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::error::ErrorKind;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::args::{Cli, Mode};
use crate::cli::commands::{backup, restore, schedule, snapshots};
use crate::config::load::{load_config, DEFAULT_CONFIG_PATH};
use crate::context::Context;
use crate::util::command::SystemRunner;

pub mod args;
pub mod commands;

pub fn run() -> Result<()> {
    let cli = match parse_cli()? {
        Some(cli) => cli,
        None => return Ok(()),
    };
    init_tracing(cli.verbose);

    let mode = cli.mode().map_err(anyhow::Error::msg)?;
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let cfg = load_config(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    let ctx = Context::from_settings(&cfg.settings, Arc::new(SystemRunner));

    match mode {
        Mode::Backup {
            server_id,
            shutdown,
        } => backup::run_backup_command(&cfg, &ctx, server_id, shutdown),
        Mode::Restore {
            server_id,
            snapshot,
        } => restore::run_restore_command(&ctx, &server_id, &snapshot),
        Mode::ListSnapshots { server_id } => snapshots::run_list_command(&ctx, &server_id),
        Mode::Schedule => schedule::run_scheduler(&cfg, ctx),
    }
}

/// `None` when clap already printed help or version output. Usage errors
/// are printed and exit with status 1.
fn parse_cli() -> Result<Option<Cli>> {
    match Cli::try_parse() {
        Ok(cli) => Ok(Some(cli)),
        Err(err) if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            err.print()?;
            Ok(None)
        }
        Err(err) => {
            err.print()?;
            std::process::exit(1);
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
