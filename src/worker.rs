//! Worker loop.
//!
//! A worker pulls jobs from waiting via the exclusive dequeue, invokes the
//! handler, and feeds the outcome back into the state machine. It also owns
//! the background scans: delayed promotion on every tick and stalled
//! reclamation on its own interval. Handlers are never preempted — once a
//! lease is lost, the loop merely stops renewing and discards the handler's
//! result when the stale token is rejected.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use opentelemetry::KeyValue;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{Instrument, error, info, warn};

use crate::error::{Error, Result};
use crate::flow::FlowProducer;
use crate::lease::LeaseToken;
use crate::model::{Job, NewJob, ParentRef};
use crate::queue::Queue;
use crate::telemetry::{job as job_spans, metrics};

// ---------------------------------------------------------------------------
// Handler contract
// ---------------------------------------------------------------------------

/// What a handler decided about its job. A closed set, interpreted by the
/// state machine with exhaustive matching; handler errors drive the
/// failed/retry path separately.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// Finished successfully, with an optional return value stored on the
    /// job.
    Complete(Option<serde_json::Value>),
    /// Stop processing and re-schedule after the delay. Not a failure and
    /// not counted as an attempt.
    Delay(Duration),
    /// Stop processing until all pending children settle. Completes
    /// directly when nothing is pending.
    WaitForChildren,
}

/// A job handler. Registered per queue; invoked with the job and its
/// control surface.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn process(&self, job: Job, ctx: JobContext) -> Result<Outcome>;
}

/// In-handler control surface. Carries the lease token, so every operation
/// here is rejected once the lease is lost.
#[derive(Clone)]
pub struct JobContext {
    queue: Queue,
    flow: FlowProducer,
    job_id: String,
    token: LeaseToken,
    lock_duration: Duration,
}

impl JobContext {
    /// Overwrite the job's progress data. Survives retries and stalled
    /// reclamation.
    pub fn update_progress(&self, value: serde_json::Value) -> Result<()> {
        self.queue.update_progress(&self.job_id, value)
    }

    /// Extend the lease by the worker's lock duration. `LeaseMismatch`
    /// means the job was reclaimed — the handler should abandon its work.
    pub fn renew(&self) -> Result<()> {
        self.queue
            .renew(&self.job_id, &self.token, self.lock_duration)
    }

    /// Attach one more child to this job (on any queue), incrementing its
    /// unresolved-child count.
    pub fn add_child(&self, queue: &str, job: NewJob) -> Result<Job> {
        self.flow.add_child(
            &ParentRef::new(self.queue.name(), &self.job_id),
            queue,
            job,
        )
    }

    pub fn token(&self) -> &LeaseToken {
        &self.token
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// Tuning for one worker.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Maximum simultaneously leased jobs. Enforced at dequeue time.
    pub concurrency: usize,
    /// Lease time-to-live granted at dequeue and on each renewal.
    pub lock_duration: Duration,
    /// How often the worker renews leases of in-flight jobs.
    pub lock_renew_interval: Duration,
    /// Reclaims before a stalled job is failed instead of re-queued.
    pub max_stalled_count: u32,
    /// How often the stalled scan runs.
    pub stalled_check_interval: Duration,
    /// Fallback wake-up when no enqueue notification arrives.
    pub poll_interval: Duration,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            lock_duration: Duration::from_secs(30),
            lock_renew_interval: Duration::from_secs(15),
            max_stalled_count: 1,
            stalled_check_interval: Duration::from_secs(30),
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// The worker loop: dequeue, execute, retire.
pub struct Worker {
    queue: Queue,
    flow: FlowProducer,
    handler: Arc<dyn Handler>,
    options: WorkerOptions,
    shutdown: Arc<Notify>,
    active: Arc<AtomicUsize>,
}

impl Clone for Worker {
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
            flow: self.flow.clone(),
            handler: Arc::clone(&self.handler),
            options: self.options.clone(),
            shutdown: Arc::clone(&self.shutdown),
            active: Arc::clone(&self.active),
        }
    }
}

impl Worker {
    pub fn new(queue: Queue, handler: impl Handler + 'static, options: WorkerOptions) -> Self {
        let flow = FlowProducer::with_clock(Arc::clone(queue.store()), queue.clock.clone());
        Self {
            queue,
            flow,
            handler: Arc::new(handler),
            options,
            shutdown: Arc::new(Notify::new()),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Signal the worker to stop. In-flight handlers are drained, never
    /// preempted.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Run until shutdown. Parks on the queue notifier between polls.
    pub async fn run(&self) -> Result<()> {
        let notifier = self.queue.store().notifier(self.queue.name());
        info!(queue = self.queue.name(), "worker started");

        let mut last_stalled_check: Option<Instant> = None;
        loop {
            self.queue.promote_delayed()?;

            if last_stalled_check
                .is_none_or(|at| at.elapsed() >= self.options.stalled_check_interval)
            {
                self.queue.reclaim_stalled(self.options.max_stalled_count)?;
                last_stalled_check = Some(Instant::now());
            }

            while self.active.load(Ordering::Relaxed) < self.options.concurrency {
                match self.queue.dequeue(self.options.lock_duration)? {
                    Some((job, token)) => {
                        self.active.fetch_add(1, Ordering::Relaxed);
                        let worker = self.clone();
                        tokio::spawn(async move { worker.process_one(job, token).await });
                    }
                    None => break,
                }
            }

            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!(queue = self.queue.name(), "worker shutting down");
                    self.drain().await;
                    return Ok(());
                }
                _ = notifier.notified() => {}
                _ = tokio::time::sleep(self.options.poll_interval) => {}
            }
        }
    }

    async fn drain(&self) {
        while self.active.load(Ordering::Relaxed) > 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    async fn process_one(&self, job: Job, token: LeaseToken) {
        let id = job.id.clone();
        let name = job.name.clone();
        let span = job_spans::start_job_span(self.queue.name(), &id, &name);
        let started = Instant::now();

        let ctx = JobContext {
            queue: self.queue.clone(),
            flow: self.flow.clone(),
            job_id: id.clone(),
            token: token.clone(),
            lock_duration: self.options.lock_duration,
        };

        async {
            let result = self.run_with_renewal(job, &token, ctx).await;

            metrics::job_duration_ms().record(
                started.elapsed().as_millis() as f64,
                &[
                    KeyValue::new("queue", self.queue.name().to_string()),
                    KeyValue::new("job", name.clone()),
                ],
            );

            let (label, applied) = match result {
                Ok(Outcome::Complete(value)) => {
                    ("completed", self.queue.complete(&id, &token, value))
                }
                Ok(Outcome::Delay(delay)) => ("delayed", self.queue.delay(&id, &token, delay)),
                Ok(Outcome::WaitForChildren) => (
                    "waiting-children",
                    self.queue.wait_for_children(&id, &token).map(|_| ()),
                ),
                Err(err) => (
                    "failed",
                    self.queue.fail(&id, &token, &err.to_string()).map(|_| ()),
                ),
            };

            match applied {
                Ok(()) => job_spans::record_settlement(label),
                // The job was reclaimed or reassigned while the handler was
                // running; the result must be discarded.
                Err(Error::LeaseMismatch { job }) => {
                    warn!(%job, "lease lost, discarding handler result");
                }
                Err(err) => error!(id = %id, "failed to apply handler outcome: {err}"),
            }
        }
        .instrument(span)
        .await;

        self.active.fetch_sub(1, Ordering::Relaxed);
    }

    /// Run the handler while renewing the lease on the renew interval.
    /// Once a renewal is rejected the loop stops renewing and lets the
    /// handler finish; the stale-token check discards its outcome.
    async fn run_with_renewal(
        &self,
        job: Job,
        token: &LeaseToken,
        ctx: JobContext,
    ) -> Result<Outcome> {
        let id = job.id.clone();
        let fut = self.handler.process(job, ctx);
        tokio::pin!(fut);

        let mut lease_lost = false;
        loop {
            tokio::select! {
                result = &mut fut => return result,
                _ = tokio::time::sleep(self.options.lock_renew_interval), if !lease_lost => {
                    match self.queue.renew(&id, token, self.options.lock_duration) {
                        Ok(()) => {}
                        Err(Error::LeaseMismatch { job }) => {
                            warn!(%job, "lease renewal rejected, job was reclaimed");
                            lease_lost = true;
                        }
                        Err(err) => warn!(id = %id, "lease renewal error: {err}"),
                    }
                }
            }
        }
    }
}
