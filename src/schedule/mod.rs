//! Recurring backups: one cron job per server with a misfire grace window.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDateTime};
use tracing::{error, info, warn};

use crate::backup::backup_server;
use crate::config::model::Settings;
use crate::context::Context;
use crate::types::{ServerId, ServerSpec};

pub mod cron;
pub mod pool;
pub mod shutdown;
pub mod state;

use self::cron::{CronExpr, ScheduleError};
use self::pool::WorkerPool;
use self::shutdown::ShutdownToken;
use self::state::ScheduleState;

/// Upper bound on one sleep of the run loop, so wall-clock jumps are noticed.
const MAX_SLEEP: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Added,
    Replaced,
}

/// What to do about an occurrence that has come due.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Fire(NaiveDateTime),
    Missed(NaiveDateTime),
}

#[derive(Debug, Clone)]
pub struct ScheduledJob {
    pub spec: ServerSpec,
    pub cron: CronExpr,
    pub misfire_grace: chrono::Duration,
    next_due: Option<NaiveDateTime>,
}

impl ScheduledJob {
    /// `since` is the last handled occurrence, or the current time for a
    /// job with no history.
    pub fn new(
        spec: ServerSpec,
        cron: CronExpr,
        misfire_grace: chrono::Duration,
        since: NaiveDateTime,
    ) -> Self {
        let next_due = cron.next_after(since);
        Self {
            spec,
            cron,
            misfire_grace,
            next_due,
        }
    }

    pub fn next_due(&self) -> Option<NaiveDateTime> {
        self.next_due
    }

    /// Decides on the most recent occurrence at or before `now`, if any is
    /// due. Older missed occurrences are coalesced into it.
    pub fn poll(&mut self, now: NaiveDateTime) -> Option<Decision> {
        let mut due = self.next_due.filter(|due| *due <= now)?;
        while let Some(next) = self.cron.next_after(due).filter(|next| *next <= now) {
            due = next;
        }
        self.next_due = self.cron.next_after(now);
        if now - due <= self.misfire_grace {
            Some(Decision::Fire(due))
        } else {
            Some(Decision::Missed(due))
        }
    }
}

/// An occurrence handed to the worker pool.
#[derive(Debug, Clone)]
pub struct Firing {
    pub spec: ServerSpec,
    pub scheduled: NaiveDateTime,
}

impl Firing {
    /// Marks the occurrence handled. Called by the worker as the job starts,
    /// so a firing dropped from the queue at shutdown is still owed after a
    /// restart.
    pub fn start(&self, state: &ScheduleState) {
        if let Err(err) = state.record(&self.spec.id, self.scheduled) {
            warn!(server = %self.spec.id, "could not record schedule state: {}", err);
        }
    }
}

pub struct Scheduler {
    jobs: BTreeMap<ServerId, ScheduledJob>,
    state: ScheduleState,
    misfire_grace: chrono::Duration,
    workers: usize,
    shutdown_grace: Duration,
}

impl Scheduler {
    pub fn new(settings: &Settings) -> Self {
        Self {
            jobs: BTreeMap::new(),
            state: ScheduleState::new(settings.state_dir.clone()),
            misfire_grace: chrono::Duration::seconds(settings.misfire_grace.as_secs() as i64),
            workers: settings.workers,
            shutdown_grace: settings.shutdown_grace,
        }
    }

    pub fn jobs(&self) -> impl Iterator<Item = &ScheduledJob> {
        self.jobs.values()
    }

    pub fn job(&self, server_id: &ServerId) -> Option<&ScheduledJob> {
        self.jobs.get(server_id)
    }

    /// Registers the server's job, replacing any job already held for it.
    pub fn register(
        &mut self,
        spec: ServerSpec,
        now: NaiveDateTime,
    ) -> Result<Registration, ScheduleError> {
        let cron: CronExpr = spec.schedule.parse()?;
        let since = match self.state.last_handled(&spec.id) {
            Ok(Some(last)) => last,
            Ok(None) => {
                // occurrences after the first registration count as owed
                if let Err(err) = self.state.record(&spec.id, now) {
                    warn!(server = %spec.id, "could not record schedule state: {}", err);
                }
                now
            }
            Err(err) => {
                warn!(server = %spec.id, "ignoring schedule state: {}", err);
                now
            }
        };
        let id = spec.id.clone();
        let job = ScheduledJob::new(spec, cron, self.misfire_grace, since);
        match job.next_due() {
            Some(next) => info!(server = %id, name = %job.spec.display_name, schedule = %job.cron, next = %next, "scheduled backup"),
            None => warn!(server = %id, schedule = %job.cron, "schedule never fires"),
        }
        match self.jobs.insert(id.clone(), job) {
            Some(_) => {
                info!(server = %id, "replaced existing job");
                Ok(Registration::Replaced)
            }
            None => Ok(Registration::Added),
        }
    }

    /// Registers every server, skipping those whose schedule does not parse.
    pub fn register_all(&mut self, specs: &[ServerSpec], now: NaiveDateTime) -> usize {
        let mut registered = 0;
        for spec in specs {
            let id = spec.id.clone();
            match self.register(spec.clone(), now) {
                Ok(_) => registered += 1,
                Err(err) => error!(server = %id, "invalid schedule {:?}, skipping: {}", spec.schedule, err),
            }
        }
        registered
    }

    /// Firings that are due now. Missed occurrences beyond the grace window
    /// are logged, dropped and recorded as handled. A firing is recorded only
    /// once a worker starts it, see [`Firing::start`].
    pub fn due(&mut self, now: NaiveDateTime) -> Vec<Firing> {
        let mut fire = Vec::new();
        for (id, job) in self.jobs.iter_mut() {
            match job.poll(now) {
                Some(Decision::Fire(at)) => {
                    if now - at > chrono::Duration::minutes(1) {
                        info!(server = %id, scheduled = %at, "running late backup within misfire grace");
                    }
                    fire.push(Firing {
                        spec: job.spec.clone(),
                        scheduled: at,
                    });
                }
                Some(Decision::Missed(at)) => {
                    warn!(server = %id, scheduled = %at, "missed backup beyond misfire grace; skipping");
                    if let Err(err) = self.state.record(id, at) {
                        warn!(server = %id, "could not record schedule state: {}", err);
                    }
                }
                None => {}
            }
        }
        fire
    }

    fn sleep_for(&self, now: NaiveDateTime) -> Duration {
        self.jobs
            .values()
            .filter_map(ScheduledJob::next_due)
            .min()
            .map(|next| (next - now).to_std().unwrap_or(Duration::ZERO))
            .unwrap_or(MAX_SLEEP)
            .min(MAX_SLEEP)
    }

    /// Runs scheduled backups until the token is cancelled.
    pub fn run(self, ctx: Arc<Context>, token: &ShutdownToken) -> Vec<String> {
        self.run_with(token, move |spec| {
            backup_server(&ctx, spec);
        })
    }

    /// Run loop over an arbitrary job body. Returns the servers whose jobs
    /// were still running when the shutdown grace expired.
    pub fn run_with<F>(mut self, token: &ShutdownToken, execute: F) -> Vec<String>
    where
        F: Fn(&ServerSpec) + Send + Sync + 'static,
    {
        let execute = Arc::new(execute);
        let pool = WorkerPool::new(self.workers, token.clone());
        info!(jobs = self.jobs.len(), workers = self.workers, "starting backup scheduler");

        while !token.is_cancelled() {
            for firing in self.due(Local::now().naive_local()) {
                let execute = execute.clone();
                let state = self.state.clone();
                pool.submit(firing.spec.id.to_string(), move || {
                    firing.start(&state);
                    (*execute)(&firing.spec)
                });
            }
            if token.wait_timeout(self.sleep_for(Local::now().naive_local())) {
                break;
            }
        }

        info!("scheduler stopped; waiting for running backups");
        let abandoned = pool.shutdown(self.shutdown_grace);
        if abandoned.is_empty() {
            info!("all backups finished");
        } else {
            warn!(
                servers = %abandoned.join(", "),
                "shutdown grace expired; abandoning running backups (containers may be left stopped)"
            );
        }
        abandoned
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::thread;
    use std::time::Instant;

    use chrono::NaiveDate;

    use super::*;
    use crate::repository::RepositoryRef;

    fn at(day: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, day)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn settings(state_dir: &Path) -> Settings {
        Settings {
            volumes_path: "/data".into(),
            repository: RepositoryRef {
                endpoint: "pbs:store".to_string(),
                namespace: "games".to_string(),
                credential: "secret".to_string(),
            },
            client: "pbc".to_string(),
            docker: "docker".to_string(),
            lock_dir: state_dir.join("locks"),
            state_dir: state_dir.to_path_buf(),
            command_timeout: Duration::from_secs(60),
            misfire_grace: Duration::from_secs(3600),
            workers: 2,
            shutdown_grace: Duration::from_secs(5),
        }
    }

    fn server(id: &str, schedule: &str) -> ServerSpec {
        ServerSpec {
            id: id.parse().unwrap(),
            display_name: id.to_string(),
            schedule: schedule.to_string(),
            shutdown_required: false,
            ignore_paths: Vec::new(),
        }
    }

    fn daily_job(since: NaiveDateTime) -> ScheduledJob {
        ScheduledJob::new(
            server("alpha", "0 3 * * *"),
            "0 3 * * *".parse().unwrap(),
            chrono::Duration::hours(1),
            since,
        )
    }

    #[test]
    fn late_start_within_grace_fires_once() {
        let mut job = daily_job(at(1, 3, 0));
        assert_eq!(job.poll(at(2, 3, 30)), Some(Decision::Fire(at(2, 3, 0))));
        assert_eq!(job.poll(at(2, 3, 31)), None);
        assert_eq!(job.next_due(), Some(at(3, 3, 0)));
    }

    #[test]
    fn late_start_beyond_grace_is_dropped() {
        let mut job = daily_job(at(1, 3, 0));
        assert_eq!(job.poll(at(2, 6, 0)), Some(Decision::Missed(at(2, 3, 0))));
        assert_eq!(job.poll(at(2, 6, 1)), None);
        assert_eq!(job.next_due(), Some(at(3, 3, 0)));
    }

    #[test]
    fn several_missed_occurrences_coalesce() {
        let mut job = daily_job(at(1, 3, 0));
        assert_eq!(job.poll(at(4, 3, 10)), Some(Decision::Fire(at(4, 3, 0))));
        assert_eq!(job.next_due(), Some(at(5, 3, 0)));
    }

    #[test]
    fn nothing_due_before_the_time() {
        let mut job = daily_job(at(2, 1, 0));
        assert_eq!(job.poll(at(2, 2, 59)), None);
        assert_eq!(job.poll(at(2, 3, 0)), Some(Decision::Fire(at(2, 3, 0))));
    }

    #[test]
    fn malformed_schedule_skips_only_that_server() {
        let dir = tempfile::tempdir().unwrap();
        let mut scheduler = Scheduler::new(&settings(dir.path()));
        let specs = vec![
            server("alpha", "0 3 * *"),
            server("beta", "0 4 * * *"),
            server("gamma", "0 5 * * * *"),
        ];
        assert_eq!(scheduler.register_all(&specs, at(1, 0, 0)), 1);
        let ids: Vec<&str> = scheduler.jobs().map(|j| j.spec.id.as_str()).collect();
        assert_eq!(ids, ["beta"]);
    }

    #[test]
    fn reregistration_replaces_the_job() {
        let dir = tempfile::tempdir().unwrap();
        let mut scheduler = Scheduler::new(&settings(dir.path()));
        let now = at(1, 0, 0);
        assert_eq!(
            scheduler.register(server("alpha", "0 3 * * *"), now),
            Ok(Registration::Added)
        );
        assert_eq!(
            scheduler.register(server("alpha", "30 4 * * *"), now),
            Ok(Registration::Replaced)
        );
        assert_eq!(scheduler.jobs().count(), 1);
        let job = scheduler.job(&"alpha".parse().unwrap()).unwrap();
        assert_eq!(job.next_due(), Some(at(1, 4, 30)));
    }

    /// What a worker does with each firing before running the backup.
    fn start_all(scheduler: &Scheduler, firings: Vec<Firing>) -> Vec<String> {
        firings
            .iter()
            .map(|f| {
                f.start(&scheduler.state);
                f.spec.id.to_string()
            })
            .collect()
    }

    #[test]
    fn recorded_state_carries_misfires_across_restarts() {
        let dir = tempfile::tempdir().unwrap();
        let mut first = Scheduler::new(&settings(dir.path()));
        first.register(server("alpha", "0 3 * * *"), at(1, 2, 0)).unwrap();
        let fired = first.due(at(1, 3, 0));
        assert_eq!(start_all(&first, fired), ["alpha"]);

        // process down across the next 03:00, back at 03:30
        let mut restarted = Scheduler::new(&settings(dir.path()));
        restarted.register(server("alpha", "0 3 * * *"), at(2, 3, 30)).unwrap();
        let fired = restarted.due(at(2, 3, 30));
        assert_eq!(fired[0].scheduled, at(2, 3, 0));
        assert_eq!(start_all(&restarted, fired), ["alpha"]);

        // down again, back at 06:00: dropped
        let mut late = Scheduler::new(&settings(dir.path()));
        late.register(server("alpha", "0 3 * * *"), at(3, 6, 0)).unwrap();
        assert!(late.due(at(3, 6, 0)).is_empty());
        assert_eq!(
            late.job(&"alpha".parse().unwrap()).unwrap().next_due(),
            Some(at(4, 3, 0))
        );
        // the dropped occurrence is recorded, so it is not judged again
        let mut again = Scheduler::new(&settings(dir.path()));
        again.register(server("alpha", "0 3 * * *"), at(3, 6, 5)).unwrap();
        assert!(again.due(at(3, 6, 5)).is_empty());
    }

    #[test]
    fn firing_that_never_started_is_owed_after_restart() {
        let dir = tempfile::tempdir().unwrap();
        let mut first = Scheduler::new(&settings(dir.path()));
        first.register(server("alpha", "0 3 * * *"), at(1, 2, 0)).unwrap();
        // handed to the pool, then shutdown drops it before a worker starts it
        assert_eq!(first.due(at(1, 3, 0)).len(), 1);

        let mut restarted = Scheduler::new(&settings(dir.path()));
        restarted.register(server("alpha", "0 3 * * *"), at(1, 3, 10)).unwrap();
        let fired = restarted.due(at(1, 3, 10));
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].scheduled, at(1, 3, 0));
    }

    #[test]
    fn started_firing_is_not_repeated_after_restart() {
        let dir = tempfile::tempdir().unwrap();
        let mut first = Scheduler::new(&settings(dir.path()));
        first.register(server("alpha", "0 3 * * *"), at(1, 2, 0)).unwrap();
        let fired = first.due(at(1, 3, 0));
        start_all(&first, fired);

        let mut restarted = Scheduler::new(&settings(dir.path()));
        restarted.register(server("alpha", "0 3 * * *"), at(1, 3, 10)).unwrap();
        assert!(restarted.due(at(1, 3, 10)).is_empty());
    }

    #[test]
    fn without_state_only_future_occurrences_count() {
        let dir = tempfile::tempdir().unwrap();
        let mut scheduler = Scheduler::new(&settings(dir.path()));
        scheduler.register(server("alpha", "0 3 * * *"), at(2, 3, 30)).unwrap();
        assert!(scheduler.due(at(2, 3, 30)).is_empty());
    }

    #[test]
    fn sleep_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let mut scheduler = Scheduler::new(&settings(dir.path()));
        assert_eq!(scheduler.sleep_for(at(1, 0, 0)), MAX_SLEEP);
        scheduler.register(server("alpha", "0 3 * * *"), at(1, 2, 59)).unwrap();
        assert_eq!(scheduler.sleep_for(at(1, 2, 59)), Duration::from_secs(60).min(MAX_SLEEP));
        assert_eq!(scheduler.sleep_for(at(1, 3, 1)), Duration::ZERO);
    }

    #[test]
    fn run_loop_stops_on_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let mut scheduler = Scheduler::new(&settings(dir.path()));
        scheduler.register(server("alpha", "0 3 1 1 *"), Local::now().naive_local()).unwrap();
        let token = ShutdownToken::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let canceller = token.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            canceller.cancel();
        });
        let started = Instant::now();
        let abandoned = scheduler.run_with(&token, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        handle.join().unwrap();
        assert!(abandoned.is_empty());
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn run_loop_dispatches_due_jobs_past_a_panicking_one() {
        let dir = tempfile::tempdir().unwrap();
        let now = Local::now().naive_local();
        let state = ScheduleState::new(dir.path());
        for id in ["alpha", "beta"] {
            state
                .record(&id.parse().unwrap(), now - chrono::Duration::minutes(5))
                .unwrap();
        }
        let mut scheduler = Scheduler::new(&settings(dir.path()));
        let specs = [server("alpha", "* * * * *"), server("beta", "* * * * *")];
        assert_eq!(scheduler.register_all(&specs, now), 2);

        let token = ShutdownToken::new();
        let ran = Arc::new(Mutex::new(BTreeSet::new()));
        let seen = ran.clone();
        let canceller = token.clone();
        let handle = thread::spawn(move || {
            let started = Instant::now();
            while seen.lock().unwrap().len() < 2 && started.elapsed() < Duration::from_secs(10) {
                thread::sleep(Duration::from_millis(20));
            }
            canceller.cancel();
        });
        let record = ran.clone();
        let abandoned = scheduler.run_with(&token, move |spec| {
            record.lock().unwrap().insert(spec.id.to_string());
            if spec.id.as_str() == "alpha" {
                panic!("backup body failed");
            }
        });
        handle.join().unwrap();

        assert!(abandoned.is_empty());
        let ran: Vec<String> = ran.lock().unwrap().iter().cloned().collect();
        assert_eq!(ran, ["alpha", "beta"]);
        // workers recorded the occurrences they started
        for id in ["alpha", "beta"] {
            let last = state.last_handled(&id.parse().unwrap()).unwrap().unwrap();
            assert!(last > now - chrono::Duration::minutes(5));
        }
    }
}
