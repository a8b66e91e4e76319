//! Threaded interface for submitting and controlling build jobs.
//!
//! An [`Engine`] holds non-`Send` state (command closures, the step caches), so
//! jobs never share one: every job builds its own engine from the factory on
//! the worker thread. Cancellation is cooperative through an
//! `Arc<AtomicBool>` and is observed before the job starts resolving.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{info, warn};

use crate::engine::{Engine, Plan, ResolveOptions};
use crate::error::{PartakeError, Result};
use crate::lock::LockSettings;
use crate::time::Instant;

pub type EngineFactory = Arc<dyn Fn() -> Result<Engine> + Send + Sync>;

/// Cancellation token shared with the worker thread.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);
impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(u64);
impl JobId {
    pub fn value(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Default)]
pub struct JobOptions {
    pub resolve: ResolveOptions,
    /// Only plan: no commands run and no lock is taken.
    pub dry_run: bool,
}

/// Handle to a running or completed job.
pub struct JobHandle {
    pub id: JobId,
    cancel: CancelToken,
    started: std::time::Instant,
    join: Option<JoinHandle<Result<Plan>>>,
}
impl JobHandle {
    /// Request cancellation. Has no effect once the job is resolving.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
    pub fn is_finished(&self) -> bool {
        self.join.as_ref().is_none_or(|j| j.is_finished())
    }
    /// Wait for the job and hand back its plan.
    pub fn join(mut self) -> Result<Plan> {
        match self.join.take() {
            Some(join) => join
                .join()
                .map_err(|_| PartakeError::Execution(format!("job {} panicked", self.id.0)))?,
            None => Err(PartakeError::Execution(format!("job {} already joined", self.id.0))),
        }
    }
}

/// Registry managing job lifecycles.
pub struct BuildInterface {
    factory: EngineFactory,
    lock: LockSettings,
    next_id: AtomicU64,
    active: Arc<Mutex<HashMap<JobId, CancelToken>>>,
}

impl BuildInterface {
    pub fn new(factory: EngineFactory, lock: LockSettings) -> Self {
        Self {
            factory,
            lock,
            next_id: AtomicU64::new(0),
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }
    fn allocate_id(&self) -> JobId {
        JobId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }
    /// Builds a fresh engine from the factory.
    pub fn engine(&self) -> Result<Engine> {
        (self.factory)()
    }
    /// Jobs started and not yet finished.
    pub fn active_jobs(&self) -> usize {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Resolves (or, unless `dry_run`, executes under the rule's lock) on a
    /// background thread.
    pub fn start_job(
        &self,
        rule: &str,
        start: Instant,
        stop: Instant,
        options: JobOptions,
    ) -> JobHandle {
        let id = self.allocate_id();
        let cancel = CancelToken::new();
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, cancel.clone());

        let factory = Arc::clone(&self.factory);
        let lock = self.lock.clone();
        let active = Arc::clone(&self.active);
        let cancel_for_thread = cancel.clone();
        let rule = rule.to_string();
        let join = std::thread::spawn(move || {
            let cancelled = || PartakeError::Execution(format!("job {} cancelled", id.0));
            let outcome = if cancel_for_thread.is_cancelled() {
                Err(cancelled())
            } else {
                info!(job = id.0, rule = %rule, dry_run = options.dry_run, "job started");
                // building an engine may take a while, so look again afterwards
                factory().and_then(|engine| match cancel_for_thread.is_cancelled() {
                    true => Err(cancelled()),
                    false => run(&engine, &rule, start, stop, &options, &lock),
                })
            };
            if let Err(e) = &outcome {
                warn!(job = id.0, rule = %rule, error = %e, "job failed");
            }
            active
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&id);
            outcome
        });

        JobHandle {
            id,
            cancel,
            started: std::time::Instant::now(),
            join: Some(join),
        }
    }

    /// Runs a job on the current thread.
    pub fn run_sync(
        &self,
        rule: &str,
        start: Instant,
        stop: Instant,
        options: &JobOptions,
    ) -> Result<Plan> {
        let engine = self.engine()?;
        run(&engine, rule, start, stop, options, &self.lock)
    }

    /// Cancel a job by id.
    pub fn cancel(&self, id: JobId) -> bool {
        match self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
        {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

fn run(
    engine: &Engine,
    rule: &str,
    start: Instant,
    stop: Instant,
    options: &JobOptions,
    lock: &LockSettings,
) -> Result<Plan> {
    if options.dry_run {
        engine.resolve(rule, start, stop, &options.resolve)
    } else {
        engine.execute_exclusive(rule, start, stop, &options.resolve, lock)
    }
}
