use anyhow::{Context as _, Result};
use tracing::info;

use crate::backup::{adhoc_spec, run_backup};
use crate::config::model::RuntimeConfig;
use crate::context::Context;
use crate::types::ServerId;

pub fn run_backup_command(
    cfg: &RuntimeConfig,
    ctx: &Context,
    server_id: ServerId,
    shutdown: bool,
) -> Result<()> {
    let spec = match cfg.server(server_id.as_str()) {
        Some(spec) => {
            let mut spec = spec.clone();
            spec.shutdown_required |= shutdown;
            spec
        }
        None => {
            info!(server = %server_id, "server not in config; using defaults");
            adhoc_spec(server_id, shutdown)
        }
    };

    run_backup(ctx, &spec).with_context(|| format!("backup of {} failed", spec.id))?;
    info!(server = %spec.id, "backup completed successfully");
    println!("backup of {} completed", spec.id);
    Ok(())
}
