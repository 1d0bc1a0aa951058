use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerkeepError {
    #[error("{0}")]
    Message(String),
    #[error("{0}")]
    Config(ConfigError),
    #[error("{0}")]
    Resolution(ResolutionError),
    #[error("{0}")]
    Container(ContainerError),
    #[error("{0}")]
    Command(CommandError),
    #[error("{0}")]
    Deletion(DeletionError),
    #[error("server {0} is busy: another backup or restore is in progress")]
    Busy(String),
    #[error("{0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config {0}: {1}")]
    Read(String, io::Error),
    #[error("parse config: {0}")]
    Parse(String),
    #[error("{0}")]
    Invalid(String),
}

/// What a server id was being resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Container,
    Volume,
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetKind::Container => f.write_str("container"),
            TargetKind::Volume => f.write_str("volume directory"),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("no {kind} found for server {server_id}")]
    NoMatch { kind: TargetKind, server_id: String },
    #[error("multiple {kind}s found for server {server_id}: {}", matches.join(", "))]
    AmbiguousMatch {
        kind: TargetKind,
        server_id: String,
        matches: Vec<String>,
    },
    #[error("cannot read volumes root {root}: {reason}")]
    RootUnavailable { root: String, reason: String },
}

#[derive(Debug, Error)]
#[error("{action} container {container} failed: {source}")]
pub struct ContainerError {
    pub action: &'static str,
    pub container: String,
    pub source: CommandError,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("{command} timed out after {seconds}s")]
    TimedOut { command: String, seconds: u64 },
    #[error("{command} failed with exit code {code}")]
    NonZeroExit { command: String, code: i32 },
    #[error("{command}: {reason}")]
    Spawn { command: String, reason: String },
}

/// The pre-restore wipe stopped part way; the volume is left partially
/// emptied and the restore command was not run.
#[derive(Debug, Error)]
#[error(
    "delete {}: {source} ({removed} entries already removed; volume partially wiped, not restored)",
    path.display()
)]
pub struct DeletionError {
    pub path: PathBuf,
    pub removed: usize,
    pub source: io::Error,
}

pub type Result<T> = std::result::Result<T, ServerkeepError>;

impl ServerkeepError {
    pub fn message(msg: impl Into<String>) -> Self {
        ServerkeepError::Message(msg.into())
    }
}

impl From<ConfigError> for ServerkeepError {
    fn from(err: ConfigError) -> Self {
        ServerkeepError::Config(err)
    }
}

impl From<ResolutionError> for ServerkeepError {
    fn from(err: ResolutionError) -> Self {
        ServerkeepError::Resolution(err)
    }
}

impl From<ContainerError> for ServerkeepError {
    fn from(err: ContainerError) -> Self {
        ServerkeepError::Container(err)
    }
}

impl From<CommandError> for ServerkeepError {
    fn from(err: CommandError) -> Self {
        ServerkeepError::Command(err)
    }
}

impl From<DeletionError> for ServerkeepError {
    fn from(err: DeletionError) -> Self {
        ServerkeepError::Deletion(err)
    }
}
