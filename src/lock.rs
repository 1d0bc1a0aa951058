use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::MetadataExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use crate::error::{Result, ServerkeepError};
use crate::types::ServerId;
use crate::util::paths::{ensure_dir, server_lock_path};

/// Pid-file locks, one per server id, shared by every process using the
/// same lock directory.
#[derive(Debug, Clone)]
pub struct ServerLocks {
    dir: PathBuf,
}

/// Held for the whole of a backup or restore. The pid file is removed and
/// the lock released on drop.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    _file: File,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        // unlinked while still locked; the flock goes with the file handle
        let _ = fs::remove_file(&self.path);
    }
}

impl ServerLocks {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn acquire(&self, server_id: &ServerId) -> Result<LockGuard> {
        ensure_dir(&self.dir)?;
        let path = server_lock_path(&self.dir, server_id.as_str())?;
        match lock_file(&path) {
            Ok(Some(file)) => Ok(LockGuard { path, _file: file }),
            Ok(None) => Err(ServerkeepError::Busy(server_id.to_string())),
            Err(e) => Err(ServerkeepError::message(format!(
                "failed to lock {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

/// Takes an exclusive advisory lock on `path`. `None` when another holder
/// has it. The kernel drops the lock when its holder exits, so a pid file
/// left behind by a dead process is simply locked again.
fn lock_file(path: &Path) -> io::Result<Option<File>> {
    for _ in 0..3 {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        // SAFETY: flock(2) on a descriptor owned by `file` for the duration
        // of the call.
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc != 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                return Ok(None);
            }
            return Err(err);
        }
        // The previous holder may have unlinked the path between our open and
        // flock; then we hold a lock on an orphaned inode.
        let held = file.metadata()?;
        match fs::metadata(path) {
            Ok(meta) if meta.dev() == held.dev() && meta.ino() == held.ino() => {
                file.set_len(0)?;
                writeln!(file, "{}", std::process::id())?;
                return Ok(Some(file));
            }
            Ok(_) => continue,
            Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(None)
}
