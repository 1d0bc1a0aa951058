use std::path::PathBuf;

use clap::{ArgGroup, Parser};

use crate::types::ServerId;

#[derive(Parser, Debug)]
#[command(
    name = "serverkeep",
    about = "Game server backup and restore to Proxmox Backup Server",
    version,
    group(ArgGroup::new("mode").args(["backup", "restore", "list_snapshots"]))
)]
pub struct Cli {
    /// Perform a manual backup
    #[arg(long)]
    pub backup: bool,
    /// Restore a snapshot (wipes the server volume first)
    #[arg(long)]
    pub restore: bool,
    /// List available snapshots for a server
    #[arg(long)]
    pub list_snapshots: bool,

    /// Server id for backup/restore/list operations
    #[arg(long)]
    pub server_id: Option<ServerId>,
    /// Snapshot name for restore
    #[arg(long)]
    pub snapshot: Option<String>,
    /// Stop the container during backup (overrides config)
    #[arg(long)]
    pub shutdown: bool,

    /// Config file path
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Debug logging
    #[arg(long, short = 'v')]
    pub verbose: bool,
}

/// What a command line asks for once mode flags are checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Backup { server_id: ServerId, shutdown: bool },
    Restore { server_id: ServerId, snapshot: String },
    ListSnapshots { server_id: ServerId },
    Schedule,
}

impl Cli {
    pub fn mode(&self) -> Result<Mode, String> {
        let server_id = || {
            self.server_id
                .clone()
                .ok_or_else(|| "--server-id is required for this operation".to_string())
        };
        if self.list_snapshots {
            return Ok(Mode::ListSnapshots {
                server_id: server_id()?,
            });
        }
        if self.backup {
            return Ok(Mode::Backup {
                server_id: server_id()?,
                shutdown: self.shutdown,
            });
        }
        if self.restore {
            let snapshot = self
                .snapshot
                .clone()
                .ok_or_else(|| "both --server-id and --snapshot are required for restore".to_string())?;
            return Ok(Mode::Restore {
                server_id: server_id()?,
                snapshot,
            });
        }
        Ok(Mode::Schedule)
    }
}
