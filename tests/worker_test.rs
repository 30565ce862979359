//! End-to-end worker tests: dequeue, handler execution, outcome
//! interpretation, and stalled recovery under a running loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use flowq::{
    Backoff, Handler, Job, JobContext, JobState, NewJob, Outcome, Queue, Result, Store, Worker,
    WorkerOptions, async_trait,
};
use serde_json::json;
use tokio::sync::Semaphore;

fn fast_options() -> WorkerOptions {
    WorkerOptions {
        concurrency: 4,
        lock_duration: Duration::from_secs(5),
        lock_renew_interval: Duration::from_secs(2),
        max_stalled_count: 1,
        stalled_check_interval: Duration::from_millis(50),
        poll_interval: Duration::from_millis(20),
    }
}

fn test_queue() -> Queue {
    Queue::new(Arc::new(Store::new()), "jobs")
}

async fn wait_for_state(queue: &Queue, id: &str, state: JobState) -> Job {
    for _ in 0..500 {
        if let Ok(job) = queue.get(id) {
            if job.state == state {
                return job;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {id} never reached {state}");
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

struct Echo;

#[async_trait]
impl Handler for Echo {
    async fn process(&self, job: Job, _ctx: JobContext) -> Result<Outcome> {
        Ok(Outcome::Complete(Some(job.data)))
    }
}

#[tokio::test]
async fn worker_processes_job_to_completion() {
    let queue = test_queue();
    let worker = Worker::new(queue.clone(), Echo, fast_options());
    let w = worker.clone();
    let run = tokio::spawn(async move { w.run().await });

    let job = queue
        .add(NewJob::new("echo").data(json!({"n": 7})))
        .unwrap();

    let done = wait_for_state(&queue, &job.id, JobState::Completed).await;
    assert_eq!(done.return_value, Some(json!({"n": 7})));

    worker.shutdown();
    run.await.unwrap().unwrap();
}

struct AlwaysFail {
    calls: Arc<AtomicU32>,
}

#[async_trait]
impl Handler for AlwaysFail {
    async fn process(&self, _job: Job, _ctx: JobContext) -> Result<Outcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(flowq::Error::Handler("wires crossed".into()))
    }
}

#[tokio::test]
async fn failing_handler_is_retried_then_failed() {
    let queue = test_queue();
    let calls = Arc::new(AtomicU32::new(0));
    let worker = Worker::new(
        queue.clone(),
        AlwaysFail {
            calls: Arc::clone(&calls),
        },
        fast_options(),
    );
    let w = worker.clone();
    let run = tokio::spawn(async move { w.run().await });

    let job = queue
        .add(NewJob::new("doomed").attempts(2).backoff(Backoff::fixed(10)))
        .unwrap();

    let failed = wait_for_state(&queue, &job.id, JobState::Failed).await;
    assert_eq!(failed.attempts, 2);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(failed.failed_reason.unwrap().contains("wires crossed"));

    worker.shutdown();
    run.await.unwrap().unwrap();
}

struct DelayOnce {
    calls: Arc<AtomicU32>,
}

#[async_trait]
impl Handler for DelayOnce {
    async fn process(&self, _job: Job, _ctx: JobContext) -> Result<Outcome> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            Ok(Outcome::Delay(Duration::from_millis(50)))
        } else {
            Ok(Outcome::Complete(None))
        }
    }
}

#[tokio::test]
async fn requested_delay_reschedules_without_counting_an_attempt() {
    let queue = test_queue();
    let calls = Arc::new(AtomicU32::new(0));
    let worker = Worker::new(
        queue.clone(),
        DelayOnce {
            calls: Arc::clone(&calls),
        },
        fast_options(),
    );
    let w = worker.clone();
    let run = tokio::spawn(async move { w.run().await });

    let job = queue.add(NewJob::new("later")).unwrap();

    let done = wait_for_state(&queue, &job.id, JobState::Completed).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(done.attempts, 0);

    worker.shutdown();
    run.await.unwrap().unwrap();
}

// ---------------------------------------------------------------------------
// Flows from inside a handler
// ---------------------------------------------------------------------------

struct Orchestrator {
    parent_runs: Arc<AtomicU32>,
}

#[async_trait]
impl Handler for Orchestrator {
    async fn process(&self, job: Job, ctx: JobContext) -> Result<Outcome> {
        match job.name.as_str() {
            "parent" => {
                if self.parent_runs.fetch_add(1, Ordering::SeqCst) == 0 {
                    // First pass: spawn a child, save progress, park.
                    ctx.add_child("jobs", NewJob::new("child"))?;
                    ctx.update_progress(json!({"phase": "spawned"}))?;
                    Ok(Outcome::WaitForChildren)
                } else {
                    // Second pass: children settled, progress survived.
                    Ok(Outcome::Complete(Some(job.progress)))
                }
            }
            _ => Ok(Outcome::Complete(None)),
        }
    }
}

#[tokio::test]
async fn parent_parks_on_dynamic_child_then_resumes() {
    let queue = test_queue();
    let parent_runs = Arc::new(AtomicU32::new(0));
    let worker = Worker::new(
        queue.clone(),
        Orchestrator {
            parent_runs: Arc::clone(&parent_runs),
        },
        fast_options(),
    );
    let w = worker.clone();
    let run = tokio::spawn(async move { w.run().await });

    let parent = queue.add(NewJob::new("parent")).unwrap();

    let done = wait_for_state(&queue, &parent.id, JobState::Completed).await;
    assert_eq!(parent_runs.load(Ordering::SeqCst), 2);
    // The second pass saw the progress written before parking.
    assert_eq!(done.return_value, Some(json!({"phase": "spawned"})));

    worker.shutdown();
    run.await.unwrap().unwrap();
}

// ---------------------------------------------------------------------------
// Concurrency
// ---------------------------------------------------------------------------

struct Gauge {
    current: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

#[async_trait]
impl Handler for Gauge {
    async fn process(&self, _job: Job, _ctx: JobContext) -> Result<Outcome> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(60)).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(Outcome::Complete(None))
    }
}

#[tokio::test]
async fn concurrency_limit_bounds_in_flight_handlers() {
    let queue = test_queue();
    let peak = Arc::new(AtomicUsize::new(0));
    let worker = Worker::new(
        queue.clone(),
        Gauge {
            current: Arc::new(AtomicUsize::new(0)),
            peak: Arc::clone(&peak),
        },
        WorkerOptions {
            concurrency: 2,
            ..fast_options()
        },
    );
    let w = worker.clone();
    let run = tokio::spawn(async move { w.run().await });

    for _ in 0..5 {
        queue.add(NewJob::new("busy")).unwrap();
    }

    for id in ["1", "2", "3", "4", "5"] {
        wait_for_state(&queue, id, JobState::Completed).await;
    }
    assert!(peak.load(Ordering::SeqCst) <= 2, "concurrency gate breached");

    worker.shutdown();
    run.await.unwrap().unwrap();
}

// ---------------------------------------------------------------------------
// Stalled recovery under a running loop
// ---------------------------------------------------------------------------

struct Stuck {
    gate: Arc<Semaphore>,
    calls: Arc<AtomicU32>,
}

#[async_trait]
impl Handler for Stuck {
    async fn process(&self, _job: Job, _ctx: JobContext) -> Result<Outcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let _permit = self.gate.acquire().await.expect("gate closed");
        Ok(Outcome::Complete(None))
    }
}

#[tokio::test]
async fn stalled_job_is_reclaimed_and_stale_results_discarded() {
    let queue = test_queue();
    let gate = Arc::new(Semaphore::new(0));
    let calls = Arc::new(AtomicU32::new(0));

    // Leases expire quickly and are never renewed; the handler blocks on
    // the gate well past expiry.
    let worker = Worker::new(
        queue.clone(),
        Stuck {
            gate: Arc::clone(&gate),
            calls: Arc::clone(&calls),
        },
        WorkerOptions {
            lock_duration: Duration::from_millis(50),
            lock_renew_interval: Duration::from_secs(60),
            max_stalled_count: 1,
            stalled_check_interval: Duration::from_millis(30),
            poll_interval: Duration::from_millis(20),
            concurrency: 4,
        },
    );
    let w = worker.clone();
    let run = tokio::spawn(async move { w.run().await });

    let job = queue.add(NewJob::new("wedged")).unwrap();

    // Stall #1 re-queues, stall #2 exceeds the limit and fails the job.
    let failed = wait_for_state(&queue, &job.id, JobState::Failed).await;
    assert_eq!(failed.stalled_count, 2);
    assert!(failed.failed_reason.unwrap().contains("stalled"));
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    // Unblock the wedged handlers; their completions present superseded
    // tokens and must be discarded.
    gate.add_permits(16);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(queue.get(&job.id).unwrap().state, JobState::Failed);

    worker.shutdown();
    run.await.unwrap().unwrap();
}

// ---------------------------------------------------------------------------
// Shutdown
// ---------------------------------------------------------------------------

struct Slow;

#[async_trait]
impl Handler for Slow {
    async fn process(&self, _job: Job, _ctx: JobContext) -> Result<Outcome> {
        tokio::time::sleep(Duration::from_millis(80)).await;
        Ok(Outcome::Complete(None))
    }
}

#[tokio::test]
async fn shutdown_drains_in_flight_jobs() {
    let queue = test_queue();
    let worker = Worker::new(queue.clone(), Slow, fast_options());
    let w = worker.clone();
    let run = tokio::spawn(async move { w.run().await });

    let job = queue.add(NewJob::new("slow")).unwrap();
    wait_for_state(&queue, &job.id, JobState::Active).await;

    worker.shutdown();
    run.await.unwrap().unwrap();

    // The in-flight handler was allowed to finish.
    assert_eq!(queue.get(&job.id).unwrap().state, JobState::Completed);
}
