use anyhow::{Context as _, Result};
use tracing::info;

use crate::context::Context;
use crate::restore::run_restore;
use crate::types::ServerId;

pub fn run_restore_command(ctx: &Context, server_id: &ServerId, snapshot: &str) -> Result<()> {
    run_restore(ctx, server_id, snapshot)
        .with_context(|| format!("restore of {} from {} failed", server_id, snapshot))?;
    info!(server = %server_id, "restore completed successfully");
    println!("restored {} from {}; container left stopped", server_id, snapshot);
    Ok(())
}
