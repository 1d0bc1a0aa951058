use std::fs;
use std::io;
use std::path::PathBuf;

use chrono::NaiveDateTime;

use crate::error::{Result, ServerkeepError};
use crate::types::ServerId;
use crate::util::paths::ensure_dir;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Last handled occurrence per server, kept on disk so that an occurrence
/// missed while the process was down is still seen after a restart.
#[derive(Debug, Clone)]
pub struct ScheduleState {
    dir: PathBuf,
}

impl ScheduleState {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, server_id: &ServerId) -> PathBuf {
        self.dir.join(format!("{}.last-run", server_id))
    }

    pub fn last_handled(&self, server_id: &ServerId) -> Result<Option<NaiveDateTime>> {
        let path = self.path(server_id);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(ServerkeepError::message(format!("read {}: {}", path.display(), e)))
            }
        };
        NaiveDateTime::parse_from_str(text.trim(), TIMESTAMP_FORMAT)
            .map(Some)
            .map_err(|e| ServerkeepError::message(format!("parse {}: {}", path.display(), e)))
    }

    pub fn record(&self, server_id: &ServerId, occurrence: NaiveDateTime) -> Result<()> {
        ensure_dir(&self.dir)?;
        let path = self.path(server_id);
        let tmp = path.with_extension("last-run.tmp");
        fs::write(&tmp, format!("{}\n", occurrence.format(TIMESTAMP_FORMAT)))
            .map_err(|e| ServerkeepError::message(format!("write {}: {}", tmp.display(), e)))?;
        fs::rename(&tmp, &path)
            .map_err(|e| ServerkeepError::message(format!("rename {}: {}", path.display(), e)))
    }
}
