//! Core data model.
//!
//! A job is one unit of work: an opaque payload plus the metadata the engine
//! needs to schedule it — priority, attempt bookkeeping, backoff policy, and
//! an optional parent reference linking it into a flow.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// A unit of work tracked by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Queue-scoped id. A per-queue monotonic counter rendered as a string;
    /// breaks priority ties in FIFO order.
    pub id: String,

    /// The queue this job belongs to.
    pub queue: String,

    /// What kind of job this is. Determines which handler processes it.
    pub name: String,

    /// Opaque payload. The engine doesn't interpret this.
    pub data: serde_json::Value,

    /// Mutable progress/step data. Overwritten by the handler while the job
    /// is leased; preserved across retries and stalled reclamation.
    pub progress: serde_json::Value,

    /// Priority. Lower = dequeued sooner; 0 is the FIFO default.
    pub priority: i64,

    /// Current lifecycle state, derived from which queue structure holds
    /// the job.
    pub state: JobState,

    /// Number of failed execution attempts so far.
    pub attempts: u32,

    /// Attempts allowed before the job fails terminally.
    pub max_attempts: u32,

    /// Retry delay policy.
    pub backoff: Backoff,

    /// Times this job was reclaimed from an expired lease.
    pub stalled_count: u32,

    /// Parent job, if this job is a flow child.
    pub parent: Option<ParentRef>,

    /// Number of children that have not yet settled.
    pub pending_children: u64,

    /// Children that failed terminally while their edge was not marked
    /// removable.
    pub failed_children: u64,

    /// Whether a failure of this child drops its edge from the parent
    /// without leaving a failed-dependency record.
    pub remove_dependency_on_failure: bool,

    /// Why the job last failed, if it did.
    pub failed_reason: Option<String>,

    /// Value returned by the handler on completion.
    pub return_value: Option<serde_json::Value>,

    /// When the delayed state ends, if the job is delayed.
    pub delay_until: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Reference to a job on a (possibly different) queue.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParentRef {
    pub queue: String,
    pub id: String,
}

impl ParentRef {
    pub fn new(queue: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            id: id.into(),
        }
    }
}

impl std::fmt::Display for ParentRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.queue, self.id)
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobState {
    /// Eligible for dequeue, ordered by priority then id.
    Waiting,
    /// Parked until delay-until elapses.
    Delayed,
    /// Leased by a worker, keyed by lease expiry.
    Active,
    /// Parked until all pending children settle.
    WaitingChildren,
    /// Done successfully. Terminal.
    Completed,
    /// Attempts exhausted or stalled out. Terminal, but an explicit retry
    /// may re-enqueue it.
    Failed,
}

impl JobState {
    /// Can transition from self to `to`?
    pub fn can_transition_to(self, to: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, to),
            (Delayed, Waiting)          // promotion
                | (Waiting, Active)     // dequeue + lease
                | (Active, Completed)
                | (Active, Failed)
                | (Active, Delayed)     // retry backoff or explicit delay
                | (Active, WaitingChildren)
                | (WaitingChildren, Waiting) // children settled
                | (Failed, Waiting) // explicit retry
        )
    }

    /// Is this a terminal state?
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobState::Waiting => "waiting",
            JobState::Delayed => "delayed",
            JobState::Active => "active",
            JobState::WaitingChildren => "waiting-children",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for JobState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "waiting" => Ok(JobState::Waiting),
            "delayed" => Ok(JobState::Delayed),
            "active" => Ok(JobState::Active),
            "waiting-children" => Ok(JobState::WaitingChildren),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            _ => Err(Error::Other(format!("unknown job state: {s}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Backoff
// ---------------------------------------------------------------------------

/// Retry delay policy: maps the attempt number to a delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Backoff {
    /// Same delay for every retry.
    Fixed { delay_ms: i64 },
    /// Base delay doubled per attempt: delay * 2^(attempt - 1).
    Exponential { delay_ms: i64 },
}

impl Backoff {
    pub fn fixed(delay_ms: i64) -> Self {
        Backoff::Fixed { delay_ms }
    }

    pub fn exponential(delay_ms: i64) -> Self {
        Backoff::Exponential { delay_ms }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> i64 {
        match *self {
            Backoff::Fixed { delay_ms } => delay_ms,
            Backoff::Exponential { delay_ms } => {
                let shift = attempt.saturating_sub(1).min(32);
                delay_ms.saturating_mul(1i64 << shift)
            }
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Fixed { delay_ms: 0 }
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for enqueuing jobs. The producer's public API surface.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub(crate) name: String,
    pub(crate) data: serde_json::Value,
    pub(crate) priority: i64,
    pub(crate) delay_ms: Option<i64>,
    pub(crate) max_attempts: u32,
    pub(crate) backoff: Backoff,
    pub(crate) parent: Option<ParentRef>,
    pub(crate) remove_dependency_on_failure: bool,
}

impl NewJob {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: serde_json::Value::Null,
            priority: 0,
            delay_ms: None,
            max_attempts: 1,
            backoff: Backoff::default(),
            parent: None,
            remove_dependency_on_failure: false,
        }
    }

    pub fn data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    pub fn priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn delay(mut self, delay: std::time::Duration) -> Self {
        self.delay_ms = Some(delay.as_millis() as i64);
        self
    }

    pub fn attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn parent(mut self, parent: ParentRef) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn remove_dependency_on_failure(mut self) -> Self {
        self.remove_dependency_on_failure = true;
        self
    }

    /// Reject inconsistent options before any store mutation.
    pub(crate) fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::Validation("job name must not be empty".into()));
        }
        if self.max_attempts == 0 {
            return Err(Error::Validation("max attempts must be at least 1".into()));
        }
        if self.priority < 0 {
            return Err(Error::Validation(format!(
                "priority must be non-negative, got {}",
                self.priority
            )));
        }
        let (Backoff::Fixed { delay_ms } | Backoff::Exponential { delay_ms }) = self.backoff;
        if delay_ms < 0 {
            return Err(Error::Validation(format!(
                "backoff delay must be non-negative, got {delay_ms}ms"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_matrix_matches_lifecycle() {
        use JobState::*;

        assert!(Delayed.can_transition_to(Waiting));
        assert!(Waiting.can_transition_to(Active));
        assert!(Active.can_transition_to(Completed));
        assert!(Active.can_transition_to(Failed));
        assert!(Active.can_transition_to(Delayed));
        assert!(Active.can_transition_to(WaitingChildren));
        assert!(WaitingChildren.can_transition_to(Waiting));
        assert!(Failed.can_transition_to(Waiting));

        // No skipping the lease.
        assert!(!Waiting.can_transition_to(Completed));
        assert!(!Delayed.can_transition_to(Active));
        assert!(!WaitingChildren.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Waiting));
    }

    #[test]
    fn state_display_round_trips() {
        for state in [
            JobState::Waiting,
            JobState::Delayed,
            JobState::Active,
            JobState::WaitingChildren,
            JobState::Completed,
            JobState::Failed,
        ] {
            let parsed: JobState = state.to_string().parse().unwrap();
            assert_eq!(parsed, state);
        }
    }

    #[test]
    fn fixed_backoff_is_constant() {
        let b = Backoff::fixed(100);
        assert_eq!(b.delay_for(1), 100);
        assert_eq!(b.delay_for(5), 100);
    }

    #[test]
    fn exponential_backoff_doubles() {
        let b = Backoff::exponential(100);
        assert_eq!(b.delay_for(1), 100);
        assert_eq!(b.delay_for(2), 200);
        assert_eq!(b.delay_for(4), 800);
    }

    #[test]
    fn exponential_backoff_saturates() {
        let b = Backoff::exponential(i64::MAX / 2);
        assert_eq!(b.delay_for(40), i64::MAX);
    }

    #[test]
    fn zero_max_attempts_rejected() {
        let err = NewJob::new("j").attempts(0).validate().unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn negative_priority_rejected() {
        let err = NewJob::new("j").priority(-1).validate().unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
