//! Transaction queue
//!
//! A [`TransactionQueue`] holds jobs that each run as one transaction.
//! [`TransactionQueue::run`] drains it with a set of worker threads, each
//! attached to its own segment. A job may schedule more jobs through its
//! [`JobContext`]; they enter the queue only if the job commits, so a job
//! that is re-executed after a conflict never schedules twice.

use crate::runtime::Runtime;
use crate::transaction::Transaction;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use strand_core::{Result, StrandError};
use tracing::{debug, warn};

/// A queued transactional job. It may run more than once.
pub type Job = Box<dyn FnMut(&mut JobContext<'_, '_>) -> Result<()> + Send>;

/// The running transaction plus the jobs scheduled by it.
pub struct JobContext<'t, 'h> {
    tx: &'t mut Transaction<'h>,
    scheduled: Vec<Job>,
}

impl<'t, 'h> JobContext<'t, 'h> {
    fn new(tx: &'t mut Transaction<'h>) -> Self {
        JobContext {
            tx,
            scheduled: Vec::new(),
        }
    }

    /// Queue `job` once this job commits.
    pub fn schedule(&mut self, job: impl FnMut(&mut JobContext<'_, '_>) -> Result<()> + Send + 'static) {
        self.scheduled.push(Box::new(job));
    }

    /// The underlying transaction.
    pub fn transaction(&mut self) -> &mut Transaction<'h> {
        &mut *self.tx
    }
}

impl<'h> Deref for JobContext<'_, 'h> {
    type Target = Transaction<'h>;

    fn deref(&self) -> &Self::Target {
        &*self.tx
    }
}

impl<'h> DerefMut for JobContext<'_, 'h> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.tx
    }
}

#[derive(Default)]
struct QueueState {
    jobs: VecDeque<Job>,
    /// Jobs taken by a worker and not finished yet.
    running: usize,
    executed: usize,
    error: Option<StrandError>,
}

/// Queue of transactional jobs.
#[derive(Default)]
pub struct TransactionQueue {
    state: Mutex<QueueState>,
    changed: Condvar,
}

impl TransactionQueue {
    /// Empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a job.
    pub fn add(&self, job: impl FnMut(&mut JobContext<'_, '_>) -> Result<()> + Send + 'static) {
        self.state.lock().jobs.push_back(Box::new(job));
        self.changed.notify_one();
    }

    /// Jobs waiting to run.
    pub fn len(&self) -> usize {
        self.state.lock().jobs.len()
    }

    /// Is nothing waiting?
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run jobs on `threads` workers until the queue is empty and no job is
    /// executing. Returns the number of jobs committed.
    ///
    /// Workers attach like any other thread, so more workers than segments
    /// wait for one to free up.
    ///
    /// # Errors
    /// The first job error that is not retryable; jobs still queued at that
    /// point stay in the queue.
    pub fn run(&self, runtime: &Arc<Runtime>, threads: usize) -> Result<usize> {
        if threads == 0 {
            return Err(StrandError::InvalidConfig(
                "a transaction queue needs at least one worker".to_string(),
            ));
        }
        {
            let mut state = self.state.lock();
            state.executed = 0;
            state.error = None;
        }
        debug!(threads, jobs = self.len(), "transaction queue started");
        std::thread::scope(|scope| {
            for _ in 0..threads {
                scope.spawn(|| self.worker(runtime));
            }
        });

        let mut state = self.state.lock();
        match state.error.take() {
            Some(err) => Err(err),
            None => {
                debug!(executed = state.executed, "transaction queue drained");
                Ok(state.executed)
            }
        }
    }

    fn next_job(&self) -> Option<Job> {
        let mut state = self.state.lock();
        loop {
            if state.error.is_some() {
                return None;
            }
            if let Some(job) = state.jobs.pop_front() {
                state.running += 1;
                return Some(job);
            }
            if state.running == 0 {
                return None;
            }
            self.changed.wait(&mut state);
        }
    }

    fn worker(&self, runtime: &Arc<Runtime>) {
        let mut handle = runtime.attach();
        while let Some(mut job) = self.next_job() {
            let outcome = handle.atomically(|tx| {
                let mut ctx = JobContext::new(tx);
                job(&mut ctx)?;
                Ok(ctx.scheduled)
            });

            let mut state = self.state.lock();
            state.running -= 1;
            match outcome {
                Ok(scheduled) => {
                    state.executed += 1;
                    state.jobs.extend(scheduled);
                }
                Err(err) => {
                    warn!(segment = %handle.segment(), error = %err, "queued job failed");
                    state.error.get_or_insert(err);
                }
            }
            drop(state);
            self.changed.notify_all();
        }
    }
}

impl std::fmt::Debug for TransactionQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("TransactionQueue")
            .field("jobs", &state.jobs.len())
            .field("running", &state.running)
            .finish()
    }
}
