use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::model::{Config, RuntimeConfig, ServerConfig, Settings, SettingsConfig};
use crate::error::{ConfigError, Result};
use crate::repository::RepositoryRef;
use crate::types::{ServerId, ServerSpec};
use crate::util::paths::has_parent_dir;

pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";
const DEFAULT_CLIENT: &str = "proxmox-backup-client";
const DEFAULT_DOCKER: &str = "docker";
const DEFAULT_LOCK_DIR: &str = "/run/serverkeep";
const DEFAULT_STATE_DIR: &str = "/var/lib/serverkeep";
const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 4 * 60 * 60;
const DEFAULT_MISFIRE_GRACE_SECS: u64 = 60 * 60;
const DEFAULT_WORKERS: usize = 4;
const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 60 * 60;

pub fn load_config(path: &Path) -> Result<RuntimeConfig> {
    let contents = fs::read_to_string(path)
        .map_err(|e| ConfigError::Read(path.display().to_string(), e))?;
    parse_config(&contents)
}

pub fn parse_config(contents: &str) -> Result<RuntimeConfig> {
    let cfg: Config =
        serde_yaml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))?;
    parse_runtime(cfg)
}

fn parse_runtime(cfg: Config) -> Result<RuntimeConfig> {
    let settings = parse_settings(cfg.settings)?;
    let raw_servers = cfg
        .servers
        .ok_or_else(|| ConfigError::Invalid("config must contain a 'servers' mapping".to_string()))?;

    let mut servers = Vec::with_capacity(raw_servers.len());
    for (id, server) in raw_servers {
        servers.push(parse_server(&id, server)?);
    }

    Ok(RuntimeConfig { settings, servers })
}

fn parse_settings(raw: SettingsConfig) -> Result<Settings> {
    for (key, value) in [
        ("volumes_path", &raw.volumes_path),
        ("pbs_repository", &raw.pbs_repository),
        ("pbs_namespace", &raw.pbs_namespace),
        ("pbs_key", &raw.pbs_key),
    ] {
        if value.trim().is_empty() {
            return Err(ConfigError::Invalid(format!("settings.{} is empty", key)).into());
        }
    }
    let workers = raw.workers.unwrap_or(DEFAULT_WORKERS);
    if workers == 0 {
        return Err(ConfigError::Invalid("settings.workers must be at least 1".to_string()).into());
    }

    Ok(Settings {
        volumes_path: PathBuf::from(raw.volumes_path),
        repository: RepositoryRef {
            endpoint: raw.pbs_repository,
            namespace: raw.pbs_namespace,
            credential: raw.pbs_key,
        },
        client: raw.client.unwrap_or_else(|| DEFAULT_CLIENT.to_string()),
        docker: raw.docker.unwrap_or_else(|| DEFAULT_DOCKER.to_string()),
        lock_dir: PathBuf::from(raw.lock_dir.unwrap_or_else(|| DEFAULT_LOCK_DIR.to_string())),
        state_dir: PathBuf::from(raw.state_dir.unwrap_or_else(|| DEFAULT_STATE_DIR.to_string())),
        command_timeout: Duration::from_secs(
            raw.command_timeout.unwrap_or(DEFAULT_COMMAND_TIMEOUT_SECS),
        ),
        misfire_grace: Duration::from_secs(raw.misfire_grace.unwrap_or(DEFAULT_MISFIRE_GRACE_SECS)),
        workers,
        shutdown_grace: Duration::from_secs(
            raw.shutdown_grace.unwrap_or(DEFAULT_SHUTDOWN_GRACE_SECS),
        ),
    })
}

fn parse_server(id: &str, server: ServerConfig) -> Result<ServerSpec> {
    let server_id: ServerId = id
        .parse()
        .map_err(|e| ConfigError::Invalid(format!("server {}: {}", id, e)))?;
    let schedule = server.schedule.ok_or_else(|| {
        ConfigError::Invalid(format!("server {} missing required 'schedule' setting", id))
    })?;
    let display_name = server.name.ok_or_else(|| {
        ConfigError::Invalid(format!("server {} missing required 'name' setting", id))
    })?;
    for rel in &server.ignore_paths {
        let path = Path::new(rel);
        if rel.trim().is_empty() || path.is_absolute() || has_parent_dir(path) {
            return Err(ConfigError::Invalid(format!(
                "server {}: ignore path {:?} must be relative to the volume and must not contain ..",
                id, rel
            ))
            .into());
        }
    }

    Ok(ServerSpec {
        id: server_id,
        display_name,
        schedule,
        shutdown_required: server.shutdown,
        ignore_paths: server.ignore_paths,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServerkeepError;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SETTINGS: &str = r#"
settings:
  volumes_path: "/var/lib/pterodactyl/volumes"
  pbs_repository: "backup@pbs@10.0.0.5:games"
  pbs_namespace: "minecraft"
  pbs_key: "hunter2"
"#;

    fn invalid(result: Result<RuntimeConfig>) -> String {
        match result {
            Err(ServerkeepError::Config(ConfigError::Invalid(msg))) => msg,
            other => panic!("expected invalid config, got {:?}", other),
        }
    }

    #[test]
    fn load_config_with_servers() {
        let mut file = NamedTempFile::new().expect("tempfile");
        let yaml = format!(
            "{}{}",
            SETTINGS,
            r#"
servers:
  alpha:
    name: "Alpha survival"
    schedule: "0 3 * * *"
    shutdown: true
    ignore_paths: ["cache", "tmp/logs"]
  beta:
    name: "Beta creative"
    schedule: "30 4 * * 1"
"#
        );
        file.write_all(yaml.as_bytes()).expect("write");
        let cfg = load_config(file.path()).expect("load");
        assert_eq!(cfg.servers.len(), 2);

        let alpha = cfg.server("alpha").expect("alpha");
        assert_eq!(alpha.display_name, "Alpha survival");
        assert!(alpha.shutdown_required);
        assert_eq!(alpha.ignore_paths, vec!["cache", "tmp/logs"]);

        let beta = cfg.server("beta").expect("beta");
        assert!(!beta.shutdown_required);
        assert!(beta.ignore_paths.is_empty());

        assert_eq!(cfg.settings.client, DEFAULT_CLIENT);
        assert_eq!(cfg.settings.repository.namespace, "minecraft");
        assert_eq!(cfg.settings.command_timeout, Duration::from_secs(14400));
        assert_eq!(cfg.settings.misfire_grace, Duration::from_secs(3600));
        assert_eq!(cfg.settings.workers, 4);
    }

    #[test]
    fn missing_servers_is_invalid() {
        let msg = invalid(parse_config(SETTINGS));
        assert!(msg.contains("servers"));
    }

    #[test]
    fn missing_schedule_or_name_is_invalid() {
        let no_schedule = format!("{}servers:\n  alpha:\n    name: A\n", SETTINGS);
        assert!(invalid(parse_config(&no_schedule)).contains("schedule"));

        let no_name = format!("{}servers:\n  alpha:\n    schedule: \"0 3 * * *\"\n", SETTINGS);
        assert!(invalid(parse_config(&no_name)).contains("name"));
    }

    #[test]
    fn malformed_schedule_is_not_a_config_error() {
        let yaml = format!(
            "{}servers:\n  alpha:\n    name: A\n    schedule: \"0 3 * *\"\n",
            SETTINGS
        );
        let cfg = parse_config(&yaml).expect("load");
        assert_eq!(cfg.servers[0].schedule, "0 3 * *");
    }

    #[test]
    fn escaping_ignore_paths_are_rejected() {
        for bad in ["/etc", "../other", "cache/../../x"] {
            let yaml = format!(
                "{}servers:\n  alpha:\n    name: A\n    schedule: \"0 3 * * *\"\n    ignore_paths: [\"{}\"]\n",
                SETTINGS, bad
            );
            assert!(invalid(parse_config(&yaml)).contains("ignore path"));
        }
    }

    #[test]
    fn unsafe_server_id_is_rejected() {
        let yaml = format!(
            "{}servers:\n  \"al pha\":\n    name: A\n    schedule: \"0 3 * * *\"\n",
            SETTINGS
        );
        assert!(invalid(parse_config(&yaml)).contains("al pha"));
    }

    #[test]
    fn zero_workers_is_invalid() {
        let yaml = format!("{}  workers: 0\nservers: {{}}\n", SETTINGS);
        assert!(invalid(parse_config(&yaml)).contains("workers"));
    }

    #[test]
    fn unparsable_yaml_is_a_parse_error() {
        assert!(matches!(
            parse_config("settings: [unterminated"),
            Err(ServerkeepError::Config(ConfigError::Parse(_)))
        ));
    }
}
