use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::util::paths::is_safe_name;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServerId(String);

impl ServerId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for ServerId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || s == "." || s == ".." {
            return Err("server-id is empty".to_string());
        }
        if !is_safe_name(s) {
            return Err("server-id must use only letters, digits, '.', '-', '_'".to_string());
        }
        Ok(ServerId(s.to_string()))
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One managed server as described by configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSpec {
    pub id: ServerId,
    pub display_name: String,
    pub schedule: String,
    pub shutdown_required: bool,
    pub ignore_paths: Vec<String>,
}

impl ServerSpec {
    /// Spec for a one-shot backup of a server that is not in configuration.
    pub fn adhoc(id: ServerId) -> Self {
        Self {
            display_name: id.to_string(),
            id,
            schedule: String::new(),
            shutdown_required: false,
            ignore_paths: Vec::new(),
        }
    }
}

/// Container and volume a server id resolved to for a single operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub server_id: ServerId,
    pub container_name: Option<String>,
    pub volume_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub server_id: ServerId,
    pub identifier: String,
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.identifier)
    }
}
