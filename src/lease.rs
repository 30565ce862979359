//! Lease manager.
//!
//! A lease binds an active job to an opaque token with an expiry (the job's
//! score in the active set). Every state-mutating operation on an active
//! job presents the token; a stale token fails with `LeaseMismatch` and has
//! no side effects. The stalled scan is the safety net that gives the
//! engine at-least-once delivery: expired leases are invalidated and their
//! jobs handed back to waiting, or failed once they have stalled too often.

use std::time::Duration;

use opentelemetry::KeyValue;
use tracing::warn;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::JobState;
use crate::queue::{self, Keys, Queue, fields};
use crate::store::StoreTx;
use crate::telemetry::metrics;

/// Opaque proof of current ownership of an active job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseToken(String);

impl LeaseToken {
    pub(crate) fn mint() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LeaseToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Write a fresh lease for a job entering active. Only called from the
/// waiting→active dequeue script.
pub(crate) fn acquire_in_tx(
    tx: &mut StoreTx<'_>,
    keys: &Keys,
    id: &str,
    now: i64,
    lock_duration: Duration,
) -> LeaseToken {
    let token = LeaseToken::mint();
    tx.set(&keys.lock(id), token.as_str());
    tx.zadd(&keys.active(), id, now + lock_duration.as_millis() as i64);
    token
}

/// Fail with `LeaseMismatch` unless `token` is the current holder.
pub(crate) fn assert_holder(
    tx: &StoreTx<'_>,
    keys: &Keys,
    id: &str,
    token: &LeaseToken,
) -> Result<()> {
    match tx.get(&keys.lock(id)) {
        Some(current) if current == token.as_str() => Ok(()),
        _ => Err(Error::LeaseMismatch {
            job: format!("{}:{id}", keys.queue()),
        }),
    }
}

/// Destroy the lease as part of an active-state exit.
pub(crate) fn release_in_tx(tx: &mut StoreTx<'_>, keys: &Keys, id: &str) {
    tx.del(&keys.lock(id));
    tx.zrem(&keys.active(), id);
}

impl Queue {
    /// Extend the lease expiry by `extension` from now. Fails with
    /// `LeaseMismatch` if the token no longer holds the job — the caller's
    /// job was reclaimed and it must abandon its work.
    pub fn renew(&self, id: &str, token: &LeaseToken, extension: Duration) -> Result<()> {
        self.store.atomic(|tx| {
            assert_holder(tx, &self.keys, id, token)?;
            if tx.zscore(&self.keys.active(), id).is_none() {
                return Err(Error::LeaseMismatch {
                    job: format!("{}:{id}", self.name()),
                });
            }
            let expiry = self.clock.now_ms() + extension.as_millis() as i64;
            tx.zadd(&self.keys.active(), id, expiry);
            Ok(())
        })
    }

    /// Relinquish the lock without transitioning the job. A no-op if the
    /// lease already expired or was taken over — someone else owns the job
    /// now and that is fine. Ordinary exits (complete, fail, delay,
    /// wait-for-children) release internally; this is for a holder that
    /// abandons work without reporting an outcome.
    pub fn release(&self, id: &str, token: &LeaseToken) -> Result<()> {
        self.store.atomic(|tx| {
            if assert_holder(tx, &self.keys, id, token).is_ok() {
                tx.del(&self.keys.lock(id));
            }
            Ok(())
        })
    }

    /// Reclaim every active job whose lease has expired: invalidate the
    /// stale token and hand the job back to waiting, or fail it once its
    /// stalled count exceeds `max_stalled_count` (or its attempts are
    /// already exhausted). Returns the reclaimed ids and where they went.
    ///
    /// Runs periodically from the worker loop; progress data written by the
    /// previous holder survives.
    pub fn reclaim_stalled(&self, max_stalled_count: u32) -> Result<Vec<(String, JobState)>> {
        let (reclaimed, signals) = self.store.atomic(|tx| {
            let now = self.clock.now_ms();
            let expired = tx.zrange_upto(&self.keys.active(), now);

            let mut reclaimed = Vec::with_capacity(expired.len());
            let mut signals = Vec::new();
            for (id, _) in expired {
                let jkey = self.keys.job(&id);
                release_in_tx(tx, &self.keys, &id);

                let stalled = tx.hincr(&jkey, fields::STALLED_COUNT, 1) as u32;
                let attempts = queue::hash_u32(tx, &jkey, fields::ATTEMPTS).unwrap_or(0);
                let max_attempts = queue::hash_u32(tx, &jkey, fields::MAX_ATTEMPTS).unwrap_or(1);

                if stalled > max_stalled_count || attempts >= max_attempts {
                    let reason = if stalled > max_stalled_count {
                        "job stalled more than allowable limit"
                    } else {
                        "job stalled with attempts exhausted"
                    };
                    tx.hset(&jkey, fields::FAILED_REASON, reason);
                    signals.extend(queue::fail_terminally_in_tx(tx, &self.keys, &id, now)?);
                    reclaimed.push((id, JobState::Failed));
                } else {
                    let priority = queue::hash_i64(tx, &jkey, fields::PRIORITY).unwrap_or(0);
                    tx.zadd(&self.keys.waiting(), &id, priority);
                    reclaimed.push((id, JobState::Waiting));
                }
            }
            Ok((reclaimed, signals))
        })?;

        let mut any_waiting = false;
        for (id, state) in &reclaimed {
            warn!(queue = self.name(), id = %id, to = %state, "reclaimed stalled job");
            metrics::leases_reclaimed().add(
                1,
                &[
                    KeyValue::new("queue", self.name().to_string()),
                    KeyValue::new("outcome", state.to_string()),
                ],
            );
            queue::record_transition(self.name(), JobState::Active, *state);
            any_waiting |= *state == JobState::Waiting;
        }
        if any_waiting {
            self.store.signal(self.name());
        }
        self.signal_all(&signals);

        Ok(reclaimed)
    }
}
