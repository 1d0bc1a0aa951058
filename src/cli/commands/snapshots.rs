use anyhow::{Context as _, Result};

use crate::context::Context;
use crate::snapshot::list_snapshots;
use crate::types::ServerId;

pub fn run_list_command(ctx: &Context, server_id: &ServerId) -> Result<()> {
    let snapshots = list_snapshots(ctx, server_id)
        .with_context(|| format!("could not list snapshots for {}", server_id))?;
    if snapshots.is_empty() {
        println!("No snapshots found");
        return Ok(());
    }
    println!();
    println!("Available snapshots:");
    for snapshot in snapshots {
        println!("{}", snapshot);
    }
    Ok(())
}
