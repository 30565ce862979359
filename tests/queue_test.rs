//! Integration tests for the queue state machine.

use std::sync::Arc;
use std::time::Duration;

use flowq::{Backoff, Clock, Error, JobState, NewJob, Queue, Store};
use serde_json::json;

const LOCK: Duration = Duration::from_millis(1_000);

fn test_queue() -> (Queue, Clock) {
    let store = Arc::new(Store::new());
    let clock = Clock::manual(1_000_000);
    (Queue::with_clock(store, "test", clock.clone()), clock)
}

// ---------------------------------------------------------------------------
// Enqueue
// ---------------------------------------------------------------------------

#[test]
fn add_creates_waiting_job() {
    let (queue, _) = test_queue();

    let job = queue
        .add(NewJob::new("send-mail").data(json!({"to": "kelly"})).priority(2))
        .unwrap();

    assert_eq!(job.id, "1");
    assert_eq!(job.state, JobState::Waiting);
    assert_eq!(job.name, "send-mail");
    assert_eq!(job.data, json!({"to": "kelly"}));
    assert_eq!(job.priority, 2);
    assert_eq!(job.attempts, 0);
    assert!(job.processed_at.is_none());
}

#[test]
fn ids_are_monotonic_per_queue() {
    let store = Arc::new(Store::new());
    let a = Queue::new(Arc::clone(&store), "a");
    let b = Queue::new(Arc::clone(&store), "b");

    assert_eq!(a.add(NewJob::new("j")).unwrap().id, "1");
    assert_eq!(a.add(NewJob::new("j")).unwrap().id, "2");
    // Counters are queue-scoped.
    assert_eq!(b.add(NewJob::new("j")).unwrap().id, "1");
}

#[test]
fn add_with_delay_lands_in_delayed() {
    let (queue, clock) = test_queue();

    let job = queue
        .add(NewJob::new("later").delay(Duration::from_millis(5_000)))
        .unwrap();
    assert_eq!(job.state, JobState::Delayed);
    assert!(job.delay_until.is_some());

    // Not due yet.
    assert_eq!(queue.promote_delayed().unwrap(), 0);
    assert_eq!(queue.get("1").unwrap().state, JobState::Delayed);

    clock.advance(5_001);
    assert_eq!(queue.promote_delayed().unwrap(), 1);
    let promoted = queue.get("1").unwrap();
    assert_eq!(promoted.state, JobState::Waiting);
    assert!(promoted.delay_until.is_none());
}

#[test]
fn invalid_options_rejected_before_any_mutation() {
    let (queue, _) = test_queue();

    let err = queue.add(NewJob::new("j").attempts(0)).unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    let err = queue.add(NewJob::new("j").priority(-3)).unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    assert_eq!(queue.counts().total(), 0);
}

#[test]
fn get_missing_job_is_not_found() {
    let (queue, _) = test_queue();
    assert!(matches!(queue.get("42"), Err(Error::NotFound(_))));
}

// ---------------------------------------------------------------------------
// Dequeue
// ---------------------------------------------------------------------------

#[test]
fn dequeue_moves_to_active_with_lease() {
    let (queue, _) = test_queue();
    queue.add(NewJob::new("j")).unwrap();

    let (job, _token) = queue.dequeue(LOCK).unwrap().expect("should dequeue");
    assert_eq!(job.state, JobState::Active);
    assert!(job.processed_at.is_some());

    let counts = queue.counts();
    assert_eq!(counts.waiting, 0);
    assert_eq!(counts.active, 1);
}

#[test]
fn dequeue_empty_returns_none() {
    let (queue, _) = test_queue();
    assert!(queue.dequeue(LOCK).unwrap().is_none());
}

#[test]
fn dequeue_order_is_priority_then_fifo() {
    let (queue, _) = test_queue();
    queue.add(NewJob::new("low").priority(5)).unwrap(); // id 1
    queue.add(NewJob::new("a").priority(0)).unwrap(); // id 2
    queue.add(NewJob::new("b").priority(0)).unwrap(); // id 3
    queue.add(NewJob::new("mid").priority(1)).unwrap(); // id 4

    let order: Vec<String> = (0..4)
        .map(|_| queue.dequeue(LOCK).unwrap().unwrap().0.id)
        .collect();
    assert_eq!(order, vec!["2", "3", "4", "1"]);
}

#[test]
fn concurrent_dequeue_has_exactly_one_winner() {
    let (queue, _) = test_queue();
    queue.add(NewJob::new("contested")).unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let queue = queue.clone();
            std::thread::spawn(move || queue.dequeue(LOCK).unwrap().is_some())
        })
        .collect();

    let winners = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|won| *won)
        .count();
    assert_eq!(winners, 1);
    assert_eq!(queue.counts().active, 1);
}

// ---------------------------------------------------------------------------
// Completion and failure
// ---------------------------------------------------------------------------

#[test]
fn complete_stores_return_value() {
    let (queue, _) = test_queue();
    queue.add(NewJob::new("j")).unwrap();
    let (job, token) = queue.dequeue(LOCK).unwrap().unwrap();

    queue
        .complete(&job.id, &token, Some(json!({"sent": 3})))
        .unwrap();

    let done = queue.get(&job.id).unwrap();
    assert_eq!(done.state, JobState::Completed);
    assert_eq!(done.return_value, Some(json!({"sent": 3})));
    assert!(done.finished_at.is_some());
}

#[test]
fn failing_handler_retries_with_fixed_backoff_then_fails() {
    let (queue, clock) = test_queue();
    queue
        .add(NewJob::new("doomed").attempts(3).backoff(Backoff::fixed(100)))
        .unwrap();

    let mut delay_points = Vec::new();

    // Attempts 1 and 2: parked in delayed, 100ms out.
    for attempt in 1..=2u32 {
        let (job, token) = queue.dequeue(LOCK).unwrap().expect("job should be waiting");
        assert_eq!(queue.fail(&job.id, &token, "boom").unwrap(), JobState::Delayed);

        let parked = queue.get(&job.id).unwrap();
        assert_eq!(parked.attempts, attempt);
        let until = parked.delay_until.expect("delay-until set").timestamp_millis();
        assert_eq!(until, clock.now_ms() + 100);
        delay_points.push(until);

        clock.advance(100);
        assert_eq!(queue.promote_delayed().unwrap(), 1);
    }

    // Attempt 3: terminal.
    let (job, token) = queue.dequeue(LOCK).unwrap().unwrap();
    assert_eq!(queue.fail(&job.id, &token, "boom").unwrap(), JobState::Failed);

    let failed = queue.get(&job.id).unwrap();
    assert_eq!(failed.state, JobState::Failed);
    assert_eq!(failed.attempts, 3);
    assert_eq!(failed.failed_reason.as_deref(), Some("boom"));

    // Each retry delay was at least 100ms after the previous one.
    assert!(delay_points.windows(2).all(|w| w[1] - w[0] >= 100));
}

#[test]
fn exponential_backoff_doubles_retry_delay() {
    let (queue, clock) = test_queue();
    queue
        .add(NewJob::new("j").attempts(3).backoff(Backoff::exponential(100)))
        .unwrap();

    let (job, token) = queue.dequeue(LOCK).unwrap().unwrap();
    queue.fail(&job.id, &token, "e1").unwrap();
    let first = queue.get(&job.id).unwrap().delay_until.unwrap().timestamp_millis();
    assert_eq!(first, clock.now_ms() + 100);

    clock.advance(100);
    queue.promote_delayed().unwrap();
    let (job, token) = queue.dequeue(LOCK).unwrap().unwrap();
    queue.fail(&job.id, &token, "e2").unwrap();
    let second = queue.get(&job.id).unwrap().delay_until.unwrap().timestamp_millis();
    assert_eq!(second, clock.now_ms() + 200);
}

#[test]
fn explicit_delay_does_not_count_an_attempt() {
    let (queue, clock) = test_queue();
    queue.add(NewJob::new("j")).unwrap();

    let (job, token) = queue.dequeue(LOCK).unwrap().unwrap();
    queue
        .delay(&job.id, &token, Duration::from_millis(500))
        .unwrap();

    let parked = queue.get(&job.id).unwrap();
    assert_eq!(parked.state, JobState::Delayed);
    assert_eq!(parked.attempts, 0);

    clock.advance(501);
    queue.promote_delayed().unwrap();
    assert!(queue.dequeue(LOCK).unwrap().is_some());
}

#[test]
fn stale_token_is_rejected_without_side_effects() {
    let (queue, clock) = test_queue();
    queue.add(NewJob::new("j")).unwrap();

    // First holder loses the lease to the stalled scan.
    let (job, stale) = queue.dequeue(LOCK).unwrap().unwrap();
    clock.advance(1_001);
    queue.reclaim_stalled(5).unwrap();

    // Second holder takes over.
    let (_, current) = queue.dequeue(LOCK).unwrap().unwrap();

    let err = queue.complete(&job.id, &stale, None).unwrap_err();
    assert!(matches!(err, Error::LeaseMismatch { .. }));
    assert_eq!(queue.get(&job.id).unwrap().state, JobState::Active);

    // The current holder is unaffected.
    queue.complete(&job.id, &current, None).unwrap();
    assert_eq!(queue.get(&job.id).unwrap().state, JobState::Completed);
}

// ---------------------------------------------------------------------------
// Retry and progress
// ---------------------------------------------------------------------------

#[test]
fn retry_resets_failed_job_to_waiting() {
    let (queue, _) = test_queue();
    queue.add(NewJob::new("j")).unwrap();
    let (job, token) = queue.dequeue(LOCK).unwrap().unwrap();
    queue.fail(&job.id, &token, "fatal").unwrap();
    assert_eq!(queue.get(&job.id).unwrap().state, JobState::Failed);

    queue.retry(&job.id).unwrap();

    let retried = queue.get(&job.id).unwrap();
    assert_eq!(retried.state, JobState::Waiting);
    assert_eq!(retried.attempts, 0);
    assert!(retried.failed_reason.is_none());
}

#[test]
fn retry_of_non_failed_job_is_invalid() {
    let (queue, _) = test_queue();
    queue.add(NewJob::new("j")).unwrap();

    let err = queue.retry("1").unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { .. }));
}

#[test]
fn update_progress_round_trips_and_spares_lifecycle() {
    let (queue, _) = test_queue();
    queue.add(NewJob::new("j")).unwrap();
    let (job, _token) = queue.dequeue(LOCK).unwrap().unwrap();

    queue.update_progress(&job.id, json!({"step": 2})).unwrap();

    let read = queue.get(&job.id).unwrap();
    assert_eq!(read.progress, json!({"step": 2}));
    assert_eq!(read.state, JobState::Active);

    assert!(matches!(
        queue.update_progress("99", json!(1)),
        Err(Error::NotFound(_))
    ));
}

// ---------------------------------------------------------------------------
// Invariants and retention
// ---------------------------------------------------------------------------

#[test]
fn job_is_in_exactly_one_state_throughout_lifecycle() {
    let (queue, clock) = test_queue();
    queue
        .add(NewJob::new("j").attempts(2).backoff(Backoff::fixed(50)))
        .unwrap();
    assert_eq!(queue.counts().total(), 1);

    let (job, token) = queue.dequeue(LOCK).unwrap().unwrap();
    assert_eq!(queue.counts().total(), 1);
    assert_eq!(queue.counts().active, 1);

    queue.fail(&job.id, &token, "first").unwrap();
    assert_eq!(queue.counts().total(), 1);
    assert_eq!(queue.counts().delayed, 1);

    clock.advance(51);
    queue.promote_delayed().unwrap();
    assert_eq!(queue.counts().total(), 1);
    assert_eq!(queue.counts().waiting, 1);

    let (job, token) = queue.dequeue(LOCK).unwrap().unwrap();
    queue.complete(&job.id, &token, None).unwrap();
    assert_eq!(queue.counts().total(), 1);
    assert_eq!(queue.counts().completed, 1);
}

#[test]
fn clean_removes_old_terminal_jobs_only() {
    let (queue, clock) = test_queue();
    queue.add(NewJob::new("old")).unwrap();
    let (job, token) = queue.dequeue(LOCK).unwrap().unwrap();
    queue.complete(&job.id, &token, None).unwrap();

    // Non-terminal states cannot be cleaned.
    assert!(matches!(
        queue.clean(JobState::Waiting, Duration::ZERO),
        Err(Error::Validation(_))
    ));

    // Too young.
    assert_eq!(queue.clean(JobState::Completed, Duration::from_millis(1_000)).unwrap(), 0);

    clock.advance(2_000);
    assert_eq!(queue.clean(JobState::Completed, Duration::from_millis(1_000)).unwrap(), 1);
    assert!(matches!(queue.get(&job.id), Err(Error::NotFound(_))));
    assert_eq!(queue.counts().total(), 0);
}
