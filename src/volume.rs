use std::path::{Path, PathBuf};

use crate::error::{ResolutionError, Result, TargetKind};
use crate::types::ServerId;
use crate::util::paths::list_entries;

/// Maps a server id to its data directory under the volumes root.
#[derive(Debug, Clone)]
pub struct VolumeResolver {
    root: PathBuf,
}

impl VolumeResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The single entry under the root whose name starts with `server_id`.
    pub fn resolve(&self, server_id: &ServerId) -> Result<PathBuf> {
        let entries = list_entries(&self.root).map_err(|e| ResolutionError::RootUnavailable {
            root: self.root.display().to_string(),
            reason: e.to_string(),
        })?;
        let matches: Vec<String> = entries
            .into_iter()
            .filter(|name| name.starts_with(server_id.as_str()))
            .collect();
        match matches.len() {
            1 => Ok(self.root.join(&matches[0])),
            0 => Err(ResolutionError::NoMatch {
                kind: TargetKind::Volume,
                server_id: server_id.to_string(),
            }
            .into()),
            _ => Err(ResolutionError::AmbiguousMatch {
                kind: TargetKind::Volume,
                server_id: server_id.to_string(),
                matches,
            }
            .into()),
        }
    }
}
