//! Argument vectors for the repository client.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::types::ServerId;
use crate::util::command::CommandSpec;

/// Environment variable the client reads the repository credential from.
pub const PASSWORD_ENV: &str = "PBS_PASSWORD";

#[derive(Clone)]
pub struct RepositoryRef {
    pub endpoint: String,
    pub namespace: String,
    pub credential: String,
}

impl fmt::Debug for RepositoryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepositoryRef")
            .field("endpoint", &self.endpoint)
            .field("namespace", &self.namespace)
            .field("credential", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct Repository {
    repo: RepositoryRef,
    client: String,
    timeout: Duration,
}

impl Repository {
    pub fn new(repo: RepositoryRef, client: impl Into<String>, timeout: Duration) -> Self {
        Self {
            repo,
            client: client.into(),
            timeout,
        }
    }

    fn base(&self, subcommand: &str) -> CommandSpec {
        CommandSpec::new(&self.client, self.timeout)
            .arg(subcommand)
            .env(PASSWORD_ENV, &self.repo.credential)
    }

    fn location_args(&self) -> [String; 4] {
        [
            "--repository".to_string(),
            self.repo.endpoint.clone(),
            "--ns".to_string(),
            self.repo.namespace.clone(),
        ]
    }

    pub fn backup_command(&self, server_id: &ServerId, volume: &Path, excludes: &[PathBuf]) -> CommandSpec {
        let mut spec = self
            .base("backup")
            .arg(format!("{}.pxar:{}", server_id, volume.display()))
            .args(self.location_args())
            .args(["--backup-type", "host", "--change-detection-mode", "metadata"])
            .arg("--backup-id")
            .arg(server_id.as_str());
        for exclude in excludes {
            spec = spec.arg("--exclude").arg(exclude.to_string_lossy());
        }
        spec
    }

    pub fn restore_command(&self, server_id: &ServerId, snapshot: &str, volume: &Path) -> CommandSpec {
        self.base("restore")
            .arg(snapshot)
            .arg(format!("{}.ppxar", server_id))
            .arg(volume.to_string_lossy())
            .args(self.location_args())
    }

    pub fn snapshots_command(&self) -> CommandSpec {
        self.base("snapshots").args(self.location_args())
    }
}

/// One exclude target per ignore path, joined onto the volume, in input order.
pub fn exclude_paths(volume: &Path, ignore_paths: &[String]) -> Vec<PathBuf> {
    ignore_paths.iter().map(|rel| volume.join(rel)).collect()
}
