use std::collections::BTreeSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info};

use crate::schedule::shutdown::ShutdownToken;

type Job = Box<dyn FnOnce() + Send + 'static>;

struct Task {
    label: String,
    job: Job,
}

/// Fixed set of worker threads running scheduled firings.
pub struct WorkerPool {
    sender: Option<Sender<Task>>,
    handles: Vec<JoinHandle<()>>,
    active: Arc<Mutex<BTreeSet<String>>>,
}

impl WorkerPool {
    pub fn new(workers: usize, token: ShutdownToken) -> Self {
        let (sender, receiver) = mpsc::channel::<Task>();
        let receiver = Arc::new(Mutex::new(receiver));
        let active = Arc::new(Mutex::new(BTreeSet::new()));
        let handles = (0..workers.max(1))
            .map(|n| {
                let receiver = receiver.clone();
                let active = active.clone();
                let token = token.clone();
                thread::Builder::new()
                    .name(format!("serverkeep-worker-{}", n))
                    .spawn(move || worker_loop(receiver, active, token))
            })
            .filter_map(|spawned| match spawned {
                Ok(handle) => Some(handle),
                Err(e) => {
                    error!("failed to spawn worker: {}", e);
                    None
                }
            })
            .collect();
        Self {
            sender: Some(sender),
            handles,
            active,
        }
    }

    pub fn submit(&self, label: impl Into<String>, job: impl FnOnce() + Send + 'static) {
        let task = Task {
            label: label.into(),
            job: Box::new(job),
        };
        if let Some(sender) = &self.sender {
            if let Err(e) = sender.send(task) {
                error!(job = %e.0.label, "no worker available to run job");
            }
        }
    }

    /// Labels of the jobs currently running.
    pub fn active(&self) -> Vec<String> {
        lock(&self.active).iter().cloned().collect()
    }

    /// Stops accepting work and waits up to `grace` for running jobs.
    /// Returns the labels of jobs still running when the grace expired.
    pub fn shutdown(mut self, grace: Duration) -> Vec<String> {
        drop(self.sender.take());
        let handles = std::mem::take(&mut self.handles);
        let (done_tx, done_rx) = mpsc::channel();
        thread::spawn(move || {
            for handle in handles {
                let _ = handle.join();
            }
            let _ = done_tx.send(());
        });
        match done_rx.recv_timeout(grace) {
            Ok(()) => Vec::new(),
            Err(_) => self.active(),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn worker_loop(
    receiver: Arc<Mutex<Receiver<Task>>>,
    active: Arc<Mutex<BTreeSet<String>>>,
    token: ShutdownToken,
) {
    loop {
        let task = match lock(&receiver).recv() {
            Ok(task) => task,
            Err(_) => break,
        };
        if token.is_cancelled() {
            info!(job = %task.label, "shutdown in progress; not starting job");
            continue;
        }
        debug!(job = %task.label, "job started");
        lock(&active).insert(task.label.clone());
        if panic::catch_unwind(AssertUnwindSafe(task.job)).is_err() {
            error!(job = %task.label, "job panicked");
        }
        lock(&active).remove(&task.label);
        debug!(job = %task.label, "job finished");
    }
}
