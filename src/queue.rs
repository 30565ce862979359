//! Queue state machine.
//!
//! A queue owns one structure per lifecycle state — waiting and delayed
//! ordered sets, the active set keyed by lease expiry, waiting-children,
//! and the completed/failed retention sets — plus one hash per job. Every
//! transition between structures runs inside a single [`Store::atomic`]
//! call, so a job is observable in exactly one state at any instant.
//!
//! A job's state is derived from which structure holds it; it is never
//! stored as a field that could drift.

use std::sync::Arc;
use std::time::Duration;

use opentelemetry::KeyValue;
use tracing::debug;

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::flow;
use crate::lease::{self, LeaseToken};
use crate::model::{Backoff, Job, JobState, NewJob, ParentRef};
use crate::store::{Store, StoreTx};
use crate::telemetry::metrics;

/// Job hash field names.
pub(crate) mod fields {
    pub const NAME: &str = "name";
    pub const DATA: &str = "data";
    pub const PROGRESS: &str = "progress";
    pub const PRIORITY: &str = "priority";
    pub const ATTEMPTS: &str = "attempts";
    pub const MAX_ATTEMPTS: &str = "max_attempts";
    pub const BACKOFF: &str = "backoff";
    pub const STALLED_COUNT: &str = "stalled_count";
    pub const PARENT_QUEUE: &str = "parent_queue";
    pub const PARENT_ID: &str = "parent_id";
    pub const REMOVE_DEP_ON_FAILURE: &str = "remove_dep_on_failure";
    pub const FAILED_REASON: &str = "failed_reason";
    pub const RETURN_VALUE: &str = "return_value";
    pub const DELAY_UNTIL: &str = "delay_until";
    pub const CREATED_AT: &str = "created_at";
    pub const PROCESSED_AT: &str = "processed_at";
    pub const FINISHED_AT: &str = "finished_at";
}

// ---------------------------------------------------------------------------
// Key layout
// ---------------------------------------------------------------------------

/// Store key layout for one queue.
#[derive(Debug, Clone)]
pub(crate) struct Keys {
    queue: String,
}

impl Keys {
    pub(crate) fn new(queue: &str) -> Self {
        Self {
            queue: queue.to_string(),
        }
    }

    pub(crate) fn queue(&self) -> &str {
        &self.queue
    }

    pub(crate) fn id_counter(&self) -> String {
        format!("{}:id", self.queue)
    }

    pub(crate) fn job(&self, id: &str) -> String {
        format!("{}:job:{id}", self.queue)
    }

    pub(crate) fn lock(&self, id: &str) -> String {
        format!("{}:lock:{id}", self.queue)
    }

    pub(crate) fn waiting(&self) -> String {
        format!("{}:waiting", self.queue)
    }

    pub(crate) fn delayed(&self) -> String {
        format!("{}:delayed", self.queue)
    }

    pub(crate) fn active(&self) -> String {
        format!("{}:active", self.queue)
    }

    pub(crate) fn waiting_children(&self) -> String {
        format!("{}:waiting-children", self.queue)
    }

    pub(crate) fn completed(&self) -> String {
        format!("{}:completed", self.queue)
    }

    pub(crate) fn failed(&self) -> String {
        format!("{}:failed", self.queue)
    }

    pub(crate) fn children(&self, id: &str) -> String {
        format!("{}:children:{id}", self.queue)
    }

    pub(crate) fn failed_children(&self, id: &str) -> String {
        format!("{}:failed-children:{id}", self.queue)
    }

    fn state_set(&self, state: JobState) -> String {
        match state {
            JobState::Waiting => self.waiting(),
            JobState::Delayed => self.delayed(),
            JobState::Active => self.active(),
            JobState::WaitingChildren => self.waiting_children(),
            JobState::Completed => self.completed(),
            JobState::Failed => self.failed(),
        }
    }
}

/// Member recorded in a parent's pending-children set.
pub(crate) fn child_member(queue: &str, id: &str) -> String {
    format!("{queue}:{id}")
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

/// Per-state job counts, as one snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobCounts {
    pub waiting: u64,
    pub delayed: u64,
    pub active: u64,
    pub waiting_children: u64,
    pub completed: u64,
    pub failed: u64,
}

impl JobCounts {
    pub fn total(&self) -> u64 {
        self.waiting
            + self.delayed
            + self.active
            + self.waiting_children
            + self.completed
            + self.failed
    }
}

/// A named job queue over a shared store.
#[derive(Clone)]
pub struct Queue {
    pub(crate) keys: Keys,
    pub(crate) store: Arc<Store>,
    pub(crate) clock: Clock,
}

impl Queue {
    pub fn new(store: Arc<Store>, name: impl Into<String>) -> Self {
        Self::with_clock(store, name, Clock::system())
    }

    /// A queue reading time through the given clock. Tests use this to
    /// drive lease expiry and delayed promotion deterministically.
    pub fn with_clock(store: Arc<Store>, name: impl Into<String>, clock: Clock) -> Self {
        Self {
            keys: Keys::new(&name.into()),
            store,
            clock,
        }
    }

    pub fn name(&self) -> &str {
        self.keys.queue()
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Enqueue a job. It lands in waiting, or delayed if a delay option is
    /// set. Fails with `Validation` before any store mutation if the
    /// options are inconsistent.
    pub fn add(&self, new: NewJob) -> Result<Job> {
        new.validate()?;

        let job = self.store.atomic(|tx| {
            let id = create_job_in_tx(tx, &self.clock, self.name(), &new, Placement::Auto)?;
            read_job(tx, &self.keys, &id)
        })?;

        metrics::jobs_added().add(
            1,
            &[
                KeyValue::new("queue", self.name().to_string()),
                KeyValue::new("state", job.state.to_string()),
            ],
        );
        debug!(queue = self.name(), id = %job.id, name = %job.name, state = %job.state, "job added");

        if job.state == JobState::Waiting {
            self.store.signal(self.name());
        }
        Ok(job)
    }

    /// Point lookup. Fails with `NotFound` if the job record is absent.
    pub fn get(&self, id: &str) -> Result<Job> {
        self.store.atomic(|tx| read_job(tx, &self.keys, id))
    }

    /// Overwrite the job's progress data. Does not touch lifecycle state
    /// and is safe to call repeatedly while the job is leased.
    pub fn update_progress(&self, id: &str, value: serde_json::Value) -> Result<()> {
        self.store.atomic(|tx| {
            let jkey = self.keys.job(id);
            if tx.hlen(&jkey) == 0 {
                return Err(Error::NotFound(format!("{}:{id}", self.name())));
            }
            tx.hset(&jkey, fields::PROGRESS, value.to_string());
            Ok(())
        })
    }

    /// Exclusive dequeue: remove the best waiting job and lease it in one
    /// indivisible operation. Two racing workers can never both succeed on
    /// the same job.
    pub fn dequeue(&self, lock_duration: Duration) -> Result<Option<(Job, LeaseToken)>> {
        let popped = self.store.atomic(|tx| {
            let Some((id, _priority)) = tx.zpop_min(&self.keys.waiting()) else {
                return Ok(None);
            };
            let now = self.clock.now_ms();
            let token = lease::acquire_in_tx(tx, &self.keys, &id, now, lock_duration);
            tx.hset(&self.keys.job(&id), fields::PROCESSED_AT, now.to_string());
            let job = read_job(tx, &self.keys, &id)?;
            Ok(Some((job, token)))
        })?;

        if let Some((job, _)) = &popped {
            record_transition(self.name(), JobState::Waiting, JobState::Active);
            debug!(queue = self.name(), id = %job.id, "job dequeued");
        }
        Ok(popped)
    }

    /// Handler succeeded: active → completed. Requires the current lease
    /// token; stores the return value and settles the parent edge, if any.
    pub fn complete(
        &self,
        id: &str,
        token: &LeaseToken,
        return_value: Option<serde_json::Value>,
    ) -> Result<()> {
        let signals = self.store.atomic(|tx| {
            lease::assert_holder(tx, &self.keys, id, token)?;
            complete_in_tx(tx, &self.clock, &self.keys, id, return_value)
        })?;

        record_transition(self.name(), JobState::Active, JobState::Completed);
        self.signal_all(&signals);
        Ok(())
    }

    /// Handler errored: counts an attempt, then either parks the job in
    /// delayed per the backoff policy or fails it terminally. Returns the
    /// resulting state.
    pub fn fail(&self, id: &str, token: &LeaseToken, reason: &str) -> Result<JobState> {
        let (state, signals) = self.store.atomic(|tx| {
            lease::assert_holder(tx, &self.keys, id, token)?;
            let jkey = self.keys.job(id);
            let now = self.clock.now_ms();

            let attempts = tx.hincr(&jkey, fields::ATTEMPTS, 1) as u32;
            let max_attempts = hash_u32(tx, &jkey, fields::MAX_ATTEMPTS).unwrap_or(1);

            lease::release_in_tx(tx, &self.keys, id);
            tx.hset(&jkey, fields::FAILED_REASON, reason);

            if attempts < max_attempts {
                let backoff = hash_backoff(tx, &jkey);
                let until = now + backoff.delay_for(attempts);
                tx.hset(&jkey, fields::DELAY_UNTIL, until.to_string());
                tx.zadd(&self.keys.delayed(), id, until);
                Ok((JobState::Delayed, Vec::new()))
            } else {
                let signals = fail_terminally_in_tx(tx, &self.keys, id, now)?;
                Ok((JobState::Failed, signals))
            }
        })?;

        record_transition(self.name(), JobState::Active, state);
        debug!(queue = self.name(), id, reason, to = %state, "job failed");
        self.signal_all(&signals);
        Ok(state)
    }

    /// Handler explicitly requested a delay: active → delayed without
    /// counting an attempt.
    pub fn delay(&self, id: &str, token: &LeaseToken, delay: Duration) -> Result<()> {
        self.store.atomic(|tx| {
            lease::assert_holder(tx, &self.keys, id, token)?;
            lease::release_in_tx(tx, &self.keys, id);
            let until = self.clock.now_ms() + delay.as_millis() as i64;
            tx.hset(&self.keys.job(id), fields::DELAY_UNTIL, until.to_string());
            tx.zadd(&self.keys.delayed(), id, until);
            Ok(())
        })?;

        record_transition(self.name(), JobState::Active, JobState::Delayed);
        Ok(())
    }

    /// Handler requested to wait for children. Parks the job in
    /// waiting-children while children are pending; completes it directly
    /// when there is nothing left to wait for. Returns the resulting state.
    pub fn wait_for_children(&self, id: &str, token: &LeaseToken) -> Result<JobState> {
        let (state, signals) = self.store.atomic(|tx| {
            lease::assert_holder(tx, &self.keys, id, token)?;
            if tx.scard(&self.keys.children(id)) == 0 {
                let signals = complete_in_tx(tx, &self.clock, &self.keys, id, None)?;
                Ok((JobState::Completed, signals))
            } else {
                lease::release_in_tx(tx, &self.keys, id);
                tx.zadd(&self.keys.waiting_children(), id, self.clock.now_ms());
                Ok((JobState::WaitingChildren, Vec::new()))
            }
        })?;

        record_transition(self.name(), JobState::Active, state);
        self.signal_all(&signals);
        Ok(state)
    }

    /// Explicitly re-enqueue a failed job, resetting attempt and stalled
    /// bookkeeping.
    pub fn retry(&self, id: &str) -> Result<()> {
        self.store.atomic(|tx| {
            let jkey = self.keys.job(id);
            if tx.hlen(&jkey) == 0 {
                return Err(Error::NotFound(format!("{}:{id}", self.name())));
            }
            let state = state_of(tx, &self.keys, id)
                .ok_or_else(|| Error::Other(format!("job {id} is in no lifecycle structure")))?;
            if state != JobState::Failed {
                return Err(Error::InvalidTransition {
                    from: state,
                    to: JobState::Waiting,
                });
            }

            tx.zrem(&self.keys.failed(), id);
            tx.hset(&jkey, fields::ATTEMPTS, "0");
            tx.hset(&jkey, fields::STALLED_COUNT, "0");
            tx.hdel(&jkey, fields::FAILED_REASON);
            tx.hdel(&jkey, fields::FINISHED_AT);
            let priority = hash_i64(tx, &jkey, fields::PRIORITY).unwrap_or(0);
            tx.zadd(&self.keys.waiting(), id, priority);
            Ok(())
        })?;

        record_transition(self.name(), JobState::Failed, JobState::Waiting);
        self.store.signal(self.name());
        Ok(())
    }

    /// Move every delayed job whose delay-until has elapsed into waiting,
    /// oldest delay first. Returns how many were promoted.
    pub fn promote_delayed(&self) -> Result<usize> {
        let promoted = self.store.atomic(|tx| {
            let due = tx.zrange_upto(&self.keys.delayed(), self.clock.now_ms());
            for (id, _) in &due {
                let jkey = self.keys.job(id);
                tx.zrem(&self.keys.delayed(), id);
                tx.hdel(&jkey, fields::DELAY_UNTIL);
                let priority = hash_i64(tx, &jkey, fields::PRIORITY).unwrap_or(0);
                tx.zadd(&self.keys.waiting(), id, priority);
            }
            Ok(due.len())
        })?;

        if promoted > 0 {
            metrics::queue_scans().add(
                promoted as u64,
                &[
                    KeyValue::new("queue", self.name().to_string()),
                    KeyValue::new("operation", "promote"),
                ],
            );
            metrics::state_transitions().add(
                promoted as u64,
                &[
                    KeyValue::new("queue", self.name().to_string()),
                    KeyValue::new("from", JobState::Delayed.to_string()),
                    KeyValue::new("to", JobState::Waiting.to_string()),
                ],
            );
            self.store.signal(self.name());
        }
        Ok(promoted)
    }

    /// Per-state job counts.
    pub fn counts(&self) -> JobCounts {
        self.store
            .atomic(|tx| {
                Ok(JobCounts {
                    waiting: tx.zcard(&self.keys.waiting()),
                    delayed: tx.zcard(&self.keys.delayed()),
                    active: tx.zcard(&self.keys.active()),
                    waiting_children: tx.zcard(&self.keys.waiting_children()),
                    completed: tx.zcard(&self.keys.completed()),
                    failed: tx.zcard(&self.keys.failed()),
                })
            })
            .unwrap_or_default()
    }

    /// Jobs currently in one state, in queue order.
    pub fn jobs_in(&self, state: JobState, limit: usize) -> Result<Vec<Job>> {
        self.store.atomic(|tx| {
            tx.zmembers(&self.keys.state_set(state), limit)
                .iter()
                .map(|id| read_job(tx, &self.keys, id))
                .collect()
        })
    }

    /// Explicit retention sweep: remove completed or failed jobs that
    /// finished more than `older_than` ago, including their record and
    /// child-tracking sets. The only path that destroys a job.
    pub fn clean(&self, state: JobState, older_than: Duration) -> Result<usize> {
        if !state.is_terminal() {
            return Err(Error::Validation(format!(
                "can only clean completed or failed jobs, not {state}"
            )));
        }

        let removed = self.store.atomic(|tx| {
            let cutoff = self.clock.now_ms() - older_than.as_millis() as i64;
            let set = self.keys.state_set(state);
            let due = tx.zrange_upto(&set, cutoff);
            for (id, _) in &due {
                tx.zrem(&set, id);
                tx.hclear(&self.keys.job(id));
                tx.sclear(&self.keys.children(id));
                tx.sclear(&self.keys.failed_children(id));
            }
            Ok(due.len())
        })?;

        if removed > 0 {
            metrics::queue_scans().add(
                removed as u64,
                &[
                    KeyValue::new("queue", self.name().to_string()),
                    KeyValue::new("operation", "clean"),
                ],
            );
        }
        Ok(removed)
    }

    /// Record and announce parents released from waiting-children by a
    /// child settlement on this queue.
    pub(crate) fn signal_all(&self, released_parent_queues: &[String]) {
        for queue in released_parent_queues {
            record_transition(queue, JobState::WaitingChildren, JobState::Waiting);
            self.store.signal(queue);
        }
    }
}

// ---------------------------------------------------------------------------
// Transition internals, shared across queue, lease, and flow call sites.
// All of these run inside a Store::atomic closure.
// ---------------------------------------------------------------------------

pub(crate) enum Placement {
    /// Waiting, or delayed when a delay option is set.
    Auto,
    /// Park in waiting-children (flow parents created with children).
    WaitingChildren,
}

/// Create a job record and place it in its initial structure. Returns the
/// assigned id.
pub(crate) fn create_job_in_tx(
    tx: &mut StoreTx<'_>,
    clock: &Clock,
    queue: &str,
    new: &NewJob,
    placement: Placement,
) -> Result<String> {
    let keys = Keys::new(queue);

    // The parent must exist before any linkage is written.
    if let Some(parent) = &new.parent {
        let pkeys = Keys::new(&parent.queue);
        if tx.hlen(&pkeys.job(&parent.id)) == 0 {
            return Err(Error::ParentNotFound(parent.to_string()));
        }
    }

    let id = tx.incr(&keys.id_counter()).to_string();
    let now = clock.now_ms();
    let jkey = keys.job(&id);

    tx.hset(&jkey, fields::NAME, &new.name);
    tx.hset(&jkey, fields::DATA, new.data.to_string());
    tx.hset(&jkey, fields::PRIORITY, new.priority.to_string());
    tx.hset(&jkey, fields::MAX_ATTEMPTS, new.max_attempts.to_string());
    tx.hset(
        &jkey,
        fields::BACKOFF,
        serde_json::to_string(&new.backoff)
            .map_err(|e| Error::Other(format!("serialize backoff: {e}")))?,
    );
    tx.hset(&jkey, fields::CREATED_AT, now.to_string());
    if new.remove_dependency_on_failure {
        tx.hset(&jkey, fields::REMOVE_DEP_ON_FAILURE, "1");
    }

    if let Some(parent) = &new.parent {
        tx.hset(&jkey, fields::PARENT_QUEUE, &parent.queue);
        tx.hset(&jkey, fields::PARENT_ID, &parent.id);
        let pkeys = Keys::new(&parent.queue);
        tx.sadd(&pkeys.children(&parent.id), child_member(queue, &id));
    }

    match placement {
        Placement::WaitingChildren => {
            tx.zadd(&keys.waiting_children(), &id, now);
        }
        Placement::Auto => match new.delay_ms {
            Some(delay) if delay > 0 => {
                let until = now + delay;
                tx.hset(&jkey, fields::DELAY_UNTIL, until.to_string());
                tx.zadd(&keys.delayed(), &id, until);
            }
            _ => {
                tx.zadd(&keys.waiting(), &id, new.priority);
            }
        },
    }

    Ok(id)
}

/// Active → completed: drop the lease, move to the retention set, record
/// the return value, settle the parent edge. Returns the queues whose
/// notifier should be raised (a parent released from waiting-children).
pub(crate) fn complete_in_tx(
    tx: &mut StoreTx<'_>,
    clock: &Clock,
    keys: &Keys,
    id: &str,
    return_value: Option<serde_json::Value>,
) -> Result<Vec<String>> {
    let now = clock.now_ms();
    let jkey = keys.job(id);

    lease::release_in_tx(tx, keys, id);
    tx.zadd(&keys.completed(), id, now);
    tx.hset(&jkey, fields::FINISHED_AT, now.to_string());
    if let Some(value) = return_value {
        tx.hset(&jkey, fields::RETURN_VALUE, value.to_string());
    }

    let mut signals = Vec::new();
    if let Some(parent) = parent_of(tx, keys, id) {
        if let Some(queue) = flow::settle_child(tx, &parent, keys.queue(), id, false, false)? {
            signals.push(queue);
        }
    }
    Ok(signals)
}

/// Move a job into the failed retention set and settle its parent edge.
/// The caller has already released the lease and recorded the reason.
pub(crate) fn fail_terminally_in_tx(
    tx: &mut StoreTx<'_>,
    keys: &Keys,
    id: &str,
    now: i64,
) -> Result<Vec<String>> {
    let jkey = keys.job(id);
    tx.zadd(&keys.failed(), id, now);
    tx.hset(&jkey, fields::FINISHED_AT, now.to_string());

    let mut signals = Vec::new();
    if let Some(parent) = parent_of(tx, keys, id) {
        let remove_dep = tx
            .hget(&jkey, fields::REMOVE_DEP_ON_FAILURE)
            .is_some_and(|v| v == "1");
        if let Some(queue) = flow::settle_child(tx, &parent, keys.queue(), id, true, remove_dep)? {
            signals.push(queue);
        }
    }
    Ok(signals)
}

/// Which lifecycle structure holds the job, if any.
pub(crate) fn state_of(tx: &StoreTx<'_>, keys: &Keys, id: &str) -> Option<JobState> {
    for state in [
        JobState::Waiting,
        JobState::Delayed,
        JobState::Active,
        JobState::WaitingChildren,
        JobState::Completed,
        JobState::Failed,
    ] {
        if tx.zscore(&keys.state_set(state), id).is_some() {
            return Some(state);
        }
    }
    None
}

/// Read a full job record. `NotFound` if the record is absent.
pub(crate) fn read_job(tx: &StoreTx<'_>, keys: &Keys, id: &str) -> Result<Job> {
    let jkey = keys.job(id);
    if tx.hlen(&jkey) == 0 {
        return Err(Error::NotFound(format!("{}:{id}", keys.queue())));
    }
    let state = state_of(tx, keys, id)
        .ok_or_else(|| Error::Other(format!("job {id} is in no lifecycle structure")))?;

    let parent = parent_of(tx, keys, id);

    Ok(Job {
        id: id.to_string(),
        queue: keys.queue().to_string(),
        name: tx.hget(&jkey, fields::NAME).unwrap_or_default(),
        data: hash_json(tx, &jkey, fields::DATA).unwrap_or(serde_json::Value::Null),
        progress: hash_json(tx, &jkey, fields::PROGRESS).unwrap_or(serde_json::Value::Null),
        priority: hash_i64(tx, &jkey, fields::PRIORITY).unwrap_or(0),
        state,
        attempts: hash_u32(tx, &jkey, fields::ATTEMPTS).unwrap_or(0),
        max_attempts: hash_u32(tx, &jkey, fields::MAX_ATTEMPTS).unwrap_or(1),
        backoff: hash_backoff(tx, &jkey),
        stalled_count: hash_u32(tx, &jkey, fields::STALLED_COUNT).unwrap_or(0),
        pending_children: tx.scard(&keys.children(id)),
        failed_children: tx.scard(&keys.failed_children(id)),
        remove_dependency_on_failure: tx
            .hget(&jkey, fields::REMOVE_DEP_ON_FAILURE)
            .is_some_and(|v| v == "1"),
        parent,
        failed_reason: tx.hget(&jkey, fields::FAILED_REASON),
        return_value: hash_json(tx, &jkey, fields::RETURN_VALUE),
        delay_until: hash_time(tx, &jkey, fields::DELAY_UNTIL),
        created_at: hash_time(tx, &jkey, fields::CREATED_AT).unwrap_or_default(),
        processed_at: hash_time(tx, &jkey, fields::PROCESSED_AT),
        finished_at: hash_time(tx, &jkey, fields::FINISHED_AT),
    })
}

pub(crate) fn parent_of(tx: &StoreTx<'_>, keys: &Keys, id: &str) -> Option<ParentRef> {
    let jkey = keys.job(id);
    Some(ParentRef {
        queue: tx.hget(&jkey, fields::PARENT_QUEUE)?,
        id: tx.hget(&jkey, fields::PARENT_ID)?,
    })
}

pub(crate) fn hash_i64(tx: &StoreTx<'_>, key: &str, field: &str) -> Option<i64> {
    tx.hget(key, field)?.parse().ok()
}

pub(crate) fn hash_u32(tx: &StoreTx<'_>, key: &str, field: &str) -> Option<u32> {
    tx.hget(key, field)?.parse().ok()
}

fn hash_json(tx: &StoreTx<'_>, key: &str, field: &str) -> Option<serde_json::Value> {
    serde_json::from_str(&tx.hget(key, field)?).ok()
}

fn hash_time(tx: &StoreTx<'_>, key: &str, field: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::from_timestamp_millis(hash_i64(tx, key, field)?)
}

pub(crate) fn hash_backoff(tx: &StoreTx<'_>, jkey: &str) -> Backoff {
    tx.hget(jkey, fields::BACKOFF)
        .and_then(|raw| serde_json::from_str(&raw).ok())
        .unwrap_or_default()
}

pub(crate) fn record_transition(queue: &str, from: JobState, to: JobState) {
    metrics::state_transitions().add(
        1,
        &[
            KeyValue::new("queue", queue.to_string()),
            KeyValue::new("from", from.to_string()),
            KeyValue::new("to", to.to_string()),
        ],
    );
}
