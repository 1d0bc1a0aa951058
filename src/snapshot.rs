use tracing::info;

use crate::context::Context;
use crate::error::Result;
use crate::types::{ServerId, Snapshot};

/// Snapshots in the configured namespace that belong to `server_id`.
///
/// A failed query is an error; an empty vector means the repository
/// answered and holds nothing for this server.
pub fn list_snapshots(ctx: &Context, server_id: &ServerId) -> Result<Vec<Snapshot>> {
    info!(server = %server_id, "listing snapshots");
    let command = ctx.repository.snapshots_command();
    let outcome = ctx.runner.execute(&command);
    outcome.check(&command)?;
    Ok(parse_snapshots(&outcome.stdout, server_id))
}

fn parse_snapshots(output: &str, server_id: &ServerId) -> Vec<Snapshot> {
    output
        .lines()
        .filter(|line| line.contains(server_id.as_str()))
        .map(|line| Snapshot {
            server_id: server_id.clone(),
            identifier: snapshot_cell(line, server_id.as_str()),
        })
        .collect()
}

/// The first table cell mentioning the server, or the whole line when the
/// client printed no table.
fn snapshot_cell(line: &str, server_id: &str) -> String {
    line.split(|c| c == '│' || c == '|')
        .map(str::trim)
        .find(|cell| cell.contains(server_id))
        .unwrap_or_else(|| line.trim())
        .to_string()
}
