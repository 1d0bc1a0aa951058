use std::sync::Arc;

use anyhow::{Context as _, Result};
use chrono::Local;
use tracing::warn;

use crate::config::model::RuntimeConfig;
use crate::context::Context;
use crate::schedule::shutdown::ShutdownToken;
use crate::schedule::Scheduler;
use crate::signal_handler::signal_handler;

pub fn run_scheduler(cfg: &RuntimeConfig, ctx: Context) -> Result<()> {
    let token = ShutdownToken::new();
    signal_handler(&token).context("install signal handlers")?;

    let mut scheduler = Scheduler::new(&cfg.settings);
    let registered = scheduler.register_all(&cfg.servers, Local::now().naive_local());
    if registered == 0 {
        warn!("no valid server schedules; scheduler will idle until stopped");
    }

    let abandoned = scheduler.run(Arc::new(ctx), &token);
    if !abandoned.is_empty() {
        anyhow::bail!(
            "exited with backups still running for: {}",
            abandoned.join(", ")
        );
    }
    Ok(())
}
