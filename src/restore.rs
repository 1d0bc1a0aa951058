use std::fs;
use std::io;
use std::path::Path;

use tracing::{error, info, warn};

use crate::context::Context;
use crate::error::{DeletionError, Result};
use crate::types::{ResolvedTarget, ServerId};

type RemoveFn = fn(&Path) -> io::Result<()>;

/// Restores a snapshot over a server's volume.
///
/// Destructive: the container is killed, every entry under the volume is
/// removed, then the snapshot is extracted into it. A removal failure stops
/// the restore before the client runs and leaves the volume partially
/// wiped. The container is never started again here.
pub fn run_restore(ctx: &Context, server_id: &ServerId, snapshot: &str) -> Result<()> {
    restore_with(ctx, server_id, snapshot, remove_entry)
}

fn restore_with(ctx: &Context, server_id: &ServerId, snapshot: &str, remove: RemoveFn) -> Result<()> {
    info!(server = %server_id, snapshot, "starting restore");
    let _lock = ctx.locks.acquire(server_id)?;

    let volume = ctx.volumes.resolve(server_id)?;
    let container = ctx.containers.resolve(server_id)?;
    let target = ResolvedTarget {
        server_id: server_id.clone(),
        container_name: Some(container.clone()),
        volume_path: volume,
    };

    if let Err(err) = ctx.containers.kill(&container) {
        error!(server = %server_id, "{}; restore aborted before touching data", err);
        return Err(err.into());
    }

    let removed = match wipe_volume(&target.volume_path, remove) {
        Ok(removed) => removed,
        Err(err) => {
            error!(server = %server_id, "{}", err);
            return Err(err.into());
        }
    };
    info!(server = %server_id, volume = %target.volume_path.display(), removed, "volume emptied");

    let command = ctx
        .repository
        .restore_command(server_id, snapshot, &target.volume_path);
    ctx.runner.execute(&command).check(&command)?;

    info!(server = %server_id, snapshot, "restore completed successfully");
    warn!(
        server = %server_id,
        container = %container,
        "container left stopped; start it after verifying the restored data"
    );
    Ok(())
}

/// Removes every entry directly under `volume`, stopping at the first failure.
fn wipe_volume(volume: &Path, remove: RemoveFn) -> std::result::Result<usize, DeletionError> {
    let deletion = |path: &Path, removed: usize, source: io::Error| DeletionError {
        path: path.to_path_buf(),
        removed,
        source,
    };
    let mut entries = Vec::new();
    for entry in fs::read_dir(volume).map_err(|e| deletion(volume, 0, e))? {
        entries.push(entry.map_err(|e| deletion(volume, 0, e))?.path());
    }
    entries.sort();

    let mut removed = 0;
    for path in entries {
        remove(&path).map_err(|e| deletion(&path, removed, e))?;
        removed += 1;
    }
    Ok(removed)
}

/// Unlinks files and symlinks, removes directories recursively.
fn remove_entry(path: &Path) -> io::Result<()> {
    let meta = fs::symlink_metadata(path)?;
    if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::symlink;
    use std::path::PathBuf;
    use std::sync::Arc;

    use super::*;
    use crate::context::testing::context;
    use crate::error::{ResolutionError, ServerkeepError};
    use crate::util::command::testing::FakeRunner;
    use crate::util::command::Outcome;

    struct Fixture {
        volumes: tempfile::TempDir,
        _locks: tempfile::TempDir,
        volume: PathBuf,
        runner: Arc<FakeRunner>,
        ctx: Context,
    }

    fn fixture(kill_code: i32, restore_code: i32) -> Fixture {
        let volumes = tempfile::tempdir().unwrap();
        let locks = tempfile::tempdir().unwrap();
        let volume = volumes.path().join("alpha-world");
        fs::create_dir_all(volume.join("world/region")).unwrap();
        fs::write(volume.join("world/region/r.0.0.mca"), b"chunks").unwrap();
        fs::write(volume.join("server.properties"), b"motd=hi").unwrap();
        fs::write(volume.join("banned-ips.json"), b"[]").unwrap();

        let runner = Arc::new(FakeRunner::new(move |argv| match (argv[0].as_str(), argv[1].as_str()) {
            ("docker", "ps") => Outcome::succeeded("alpha-1\n", ""),
            ("docker", "kill") => Outcome::exited(kill_code, "", "kill failed"),
            ("pbc", "restore") => Outcome::exited(restore_code, "", "restoring"),
            _ => Outcome::exited(127, "", "unexpected"),
        }));
        let ctx = context(runner.clone(), volumes.path(), locks.path());
        Fixture {
            volumes,
            _locks: locks,
            volume,
            runner,
            ctx,
        }
    }

    fn alpha() -> ServerId {
        "alpha".parse().unwrap()
    }

    fn refuse_properties(path: &Path) -> io::Result<()> {
        if path.file_name().map(|n| n == "server.properties").unwrap_or(false) {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "permission denied"));
        }
        remove_entry(path)
    }

    #[test]
    fn kills_wipes_then_restores() {
        let f = fixture(0, 0);
        run_restore(&f.ctx, &alpha(), "host/alpha/2024-05-01T03:00:00Z").expect("restore");
        assert_eq!(fs::read_dir(&f.volume).unwrap().count(), 0);
        let commands = f.runner.commands();
        assert_eq!(commands.len(), 3);
        assert_eq!(commands[0], "docker ps -a --format {{.Names}}");
        assert_eq!(commands[1], "docker kill alpha-1");
        assert_eq!(
            commands[2],
            format!(
                "pbc restore host/alpha/2024-05-01T03:00:00Z alpha.ppxar {} --repository pbs:store --ns games",
                f.volume.display()
            )
        );
    }

    #[test]
    fn kill_failure_leaves_data_untouched() {
        let f = fixture(1, 0);
        let err = run_restore(&f.ctx, &alpha(), "snap").unwrap_err();
        assert!(matches!(err, ServerkeepError::Container(ref e) if e.action == "kill"));
        assert_eq!(fs::read_dir(&f.volume).unwrap().count(), 3);
        assert!(!f.runner.commands().iter().any(|c| c.starts_with("pbc")));
    }

    #[test]
    fn deletion_failure_prevents_restore() {
        let f = fixture(0, 0);
        let err = restore_with(&f.ctx, &alpha(), "snap", refuse_properties).unwrap_err();
        match err {
            ServerkeepError::Deletion(e) => {
                assert_eq!(e.path, f.volume.join("server.properties"));
                assert_eq!(e.removed, 1);
                assert!(e.to_string().contains("partially wiped"));
            }
            other => panic!("expected deletion error, got {:?}", other),
        }
        assert!(!f.runner.commands().iter().any(|c| c.starts_with("pbc")));
        // partially wiped: earlier entries are gone, the rest remain
        assert!(!f.volume.join("banned-ips.json").exists());
        assert!(f.volume.join("server.properties").exists());
        assert!(f.volume.join("world").exists());
    }

    #[test]
    fn restore_command_failure_is_reported() {
        let f = fixture(0, 5);
        let err = run_restore(&f.ctx, &alpha(), "snap").unwrap_err();
        assert!(matches!(err, ServerkeepError::Command(_)));
        assert_eq!(fs::read_dir(&f.volume).unwrap().count(), 0);
    }

    #[test]
    fn container_is_never_restarted() {
        let f = fixture(0, 0);
        run_restore(&f.ctx, &alpha(), "snap").expect("restore");
        assert!(!f.runner.commands().iter().any(|c| c.contains("start")));
    }

    #[test]
    fn unresolved_volume_touches_nothing() {
        let f = fixture(0, 0);
        fs::rename(&f.volume, f.volumes.path().join("other")).unwrap();
        let err = run_restore(&f.ctx, &alpha(), "snap").unwrap_err();
        assert!(matches!(
            err,
            ServerkeepError::Resolution(ResolutionError::NoMatch { .. })
        ));
        assert!(f.runner.calls().is_empty());
    }

    #[test]
    fn symlinks_are_unlinked_not_followed() {
        let outside = tempfile::tempdir().unwrap();
        fs::write(outside.path().join("keep.txt"), b"keep").unwrap();
        let volume = tempfile::tempdir().unwrap();
        symlink(outside.path(), volume.path().join("link")).unwrap();
        fs::write(volume.path().join("file"), b"x").unwrap();

        assert_eq!(wipe_volume(volume.path(), remove_entry).unwrap(), 2);
        assert_eq!(fs::read_dir(volume.path()).unwrap().count(), 0);
        assert!(outside.path().join("keep.txt").exists());
    }
}
