use std::sync::Arc;

use crate::config::model::Settings;
use crate::container::ContainerController;
use crate::lock::ServerLocks;
use crate::repository::Repository;
use crate::util::command::CommandRunner;
use crate::volume::VolumeResolver;

/// Shared collaborators for backup, restore and snapshot listing. Read-only
/// once built, so one instance serves every worker.
#[derive(Clone)]
pub struct Context {
    pub runner: Arc<dyn CommandRunner>,
    pub containers: ContainerController,
    pub volumes: VolumeResolver,
    pub repository: Repository,
    pub locks: ServerLocks,
}

impl Context {
    pub fn from_settings(settings: &Settings, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            containers: ContainerController::new(
                runner.clone(),
                settings.docker.clone(),
                settings.command_timeout,
            ),
            volumes: VolumeResolver::new(settings.volumes_path.clone()),
            repository: Repository::new(
                settings.repository.clone(),
                settings.client.clone(),
                settings.command_timeout,
            ),
            locks: ServerLocks::new(settings.lock_dir.clone()),
            runner,
        }
    }
}
