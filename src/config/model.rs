use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::repository::RepositoryRef;
use crate::types::ServerSpec;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub settings: SettingsConfig,
    pub servers: Option<BTreeMap<String, ServerConfig>>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SettingsConfig {
    pub volumes_path: String,
    pub pbs_repository: String,
    pub pbs_namespace: String,
    pub pbs_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub misfire_grace: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shutdown_grace: Option<u64>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub name: Option<String>,
    pub schedule: Option<String>,
    #[serde(default)]
    pub shutdown: bool,
    #[serde(default)]
    pub ignore_paths: Vec<String>,
}

/// Validated process-wide settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub volumes_path: PathBuf,
    pub repository: RepositoryRef,
    pub client: String,
    pub docker: String,
    pub lock_dir: PathBuf,
    pub state_dir: PathBuf,
    pub command_timeout: Duration,
    pub misfire_grace: Duration,
    pub workers: usize,
    pub shutdown_grace: Duration,
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub settings: Settings,
    pub servers: Vec<ServerSpec>,
}

impl RuntimeConfig {
    pub fn server(&self, id: &str) -> Option<&ServerSpec> {
        self.servers.iter().find(|s| s.id.as_str() == id)
    }
}
