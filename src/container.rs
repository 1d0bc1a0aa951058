use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::error::{CommandError, ContainerError, ResolutionError, Result, TargetKind};
use crate::types::ServerId;
use crate::util::command::{CommandRunner, CommandSpec};

const NAMES_FORMAT: &str = "{{.Names}}";

/// Docker lifecycle operations on the container that belongs to a server.
#[derive(Clone)]
pub struct ContainerController {
    runner: Arc<dyn CommandRunner>,
    docker: String,
    timeout: Duration,
}

impl ContainerController {
    pub fn new(runner: Arc<dyn CommandRunner>, docker: impl Into<String>, timeout: Duration) -> Self {
        Self {
            runner,
            docker: docker.into(),
            timeout,
        }
    }

    fn docker(&self) -> CommandSpec {
        CommandSpec::new(&self.docker, self.timeout)
    }

    fn container_names(&self, all: bool) -> std::result::Result<Vec<String>, CommandError> {
        let mut spec = self.docker().arg("ps");
        if all {
            spec = spec.arg("-a");
        }
        let spec = spec.args(["--format", NAMES_FORMAT]);
        let outcome = self.runner.execute(&spec);
        outcome.check(&spec)?;
        Ok(outcome
            .stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// The single container, running or not, whose name starts with `server_id`.
    pub fn resolve(&self, server_id: &ServerId) -> Result<String> {
        let mut matches: Vec<String> = self
            .container_names(true)?
            .into_iter()
            .filter(|name| name.starts_with(server_id.as_str()))
            .collect();
        match matches.len() {
            1 => Ok(matches.remove(0)),
            0 => Err(ResolutionError::NoMatch {
                kind: TargetKind::Container,
                server_id: server_id.to_string(),
            }
            .into()),
            _ => {
                matches.sort();
                Err(ResolutionError::AmbiguousMatch {
                    kind: TargetKind::Container,
                    server_id: server_id.to_string(),
                    matches,
                }
                .into())
            }
        }
    }

    pub fn is_running(&self, container: &str) -> Result<bool> {
        let running = self
            .container_names(false)?
            .iter()
            .any(|name| name == container);
        debug!(container, running, "queried container state");
        Ok(running)
    }

    /// Graceful stop.
    pub fn stop(&self, container: &str) -> std::result::Result<(), ContainerError> {
        self.lifecycle("stop", container)
    }

    /// Forceful stop.
    pub fn kill(&self, container: &str) -> std::result::Result<(), ContainerError> {
        self.lifecycle("kill", container)
    }

    pub fn start(&self, container: &str) -> std::result::Result<(), ContainerError> {
        self.lifecycle("start", container)
    }

    fn lifecycle(&self, action: &'static str, container: &str) -> std::result::Result<(), ContainerError> {
        let spec = self.docker().arg(action).arg(container);
        self.runner
            .execute(&spec)
            .check(&spec)
            .map_err(|source| ContainerError {
                action,
                container: container.to_string(),
                source,
            })
    }
}
