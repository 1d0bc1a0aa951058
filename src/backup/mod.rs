use tracing::{error, info, warn};

use crate::backup::guard::RestartGuard;
use crate::context::Context;
use crate::error::{Result, ServerkeepError};
use crate::repository::exclude_paths;
use crate::types::{ResolvedTarget, ServerId, ServerSpec};

pub mod guard;

/// Backs up one server's volume to the repository.
///
/// Holds the server lock for the whole run. When the server requires a
/// shutdown and the container was running, it is stopped first and started
/// again on every exit path after that point. A failed stop aborts the
/// backup and leaves the container stopped. The result reflects the backup
/// command alone; restart failures are only logged.
pub fn run_backup(ctx: &Context, spec: &ServerSpec) -> Result<()> {
    let id = &spec.id;
    info!(server = %id, name = %spec.display_name, "starting backup");
    let _lock = ctx.locks.acquire(id)?;

    let volume = ctx.volumes.resolve(id)?;
    let mut target = ResolvedTarget {
        server_id: id.clone(),
        container_name: None,
        volume_path: volume,
    };

    let _restart = if spec.shutdown_required {
        pause_container(ctx, &mut target)?
    } else {
        None
    };

    let excludes = exclude_paths(&target.volume_path, &spec.ignore_paths);
    let command = ctx
        .repository
        .backup_command(id, &target.volume_path, &excludes);
    let outcome = ctx.runner.execute(&command);

    match outcome.check(&command) {
        Ok(()) => {
            if !outcome.stdout.is_empty() {
                info!(server = %id, "backup output:\n{}", outcome.stdout.trim_end());
            }
            // the client reports progress on stderr
            if !outcome.stderr.is_empty() {
                info!(server = %id, "backup progress:\n{}", outcome.stderr.trim_end());
            }
            info!(server = %id, volume = %target.volume_path.display(), "backup completed successfully");
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

/// Stops the server's container if it is running and returns the guard that
/// restarts it.
fn pause_container<'a>(
    ctx: &'a Context,
    target: &mut ResolvedTarget,
) -> Result<Option<RestartGuard<'a>>> {
    let container = ctx.containers.resolve(&target.server_id)?;
    target.container_name = Some(container.clone());
    let was_running = ctx.containers.is_running(&container)?;
    if !was_running {
        info!(server = %target.server_id, container = %container, "container not running; leaving it stopped");
        return Ok(None);
    }
    info!(server = %target.server_id, container = %container, "stopping container for backup");
    if let Err(err) = ctx.containers.stop(&container) {
        error!(server = %target.server_id, "{}; backup aborted, container left stopped", err);
        return Err(err.into());
    }
    Ok(Some(RestartGuard::new(&ctx.containers, container)))
}

/// Backs up a server and logs the result, for callers that only need success.
pub fn backup_server(ctx: &Context, spec: &ServerSpec) -> bool {
    match run_backup(ctx, spec) {
        Ok(()) => true,
        Err(ServerkeepError::Busy(_)) => {
            warn!(server = %spec.id, "another operation holds the server lock; backup skipped");
            false
        }
        Err(err) => {
            error!(server = %spec.id, "backup failed: {}", err);
            false
        }
    }
}

pub fn adhoc_spec(id: ServerId, shutdown: bool) -> ServerSpec {
    let mut spec = ServerSpec::adhoc(id);
    spec.shutdown_required = shutdown;
    spec
}
