use tracing::{error, info};

use crate::container::ContainerController;

/// Starts a container that was running before the backup paused it. The
/// start happens on every exit path once the guard exists.
pub struct RestartGuard<'a> {
    containers: &'a ContainerController,
    container: String,
}

impl<'a> RestartGuard<'a> {
    pub fn new(containers: &'a ContainerController, container: String) -> Self {
        Self { containers, container }
    }
}

impl Drop for RestartGuard<'_> {
    fn drop(&mut self) {
        match self.containers.start(&self.container) {
            Ok(()) => info!(container = %self.container, "container restarted"),
            Err(err) => error!(container = %self.container, "failed to restart container: {}", err),
        }
    }
}
