//! Dependency graph (flow) manager.
//!
//! A flow is a job tree: a parent waits in waiting-children until every
//! child has settled, children may live on different queues, and more
//! children can be attached while the parent is already running. Edges are
//! an adjacency set keyed by parent id with a reverse parent reference on
//! each child, so the graph is a DAG by construction — children are only
//! ever created after their parent.

use std::sync::Arc;

use opentelemetry::KeyValue;
use tracing::debug;

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::model::{Job, JobState, NewJob, ParentRef};
use crate::queue::{self, Keys, Placement, child_member, fields};
use crate::store::{Store, StoreTx};
use crate::telemetry::metrics;

// ---------------------------------------------------------------------------
// Flow specification
// ---------------------------------------------------------------------------

/// One node of a flow tree: a job spec plus its children.
#[derive(Debug, Clone)]
pub struct FlowJob {
    pub(crate) queue: String,
    pub(crate) job: NewJob,
    pub(crate) children: Vec<FlowJob>,
}

impl FlowJob {
    pub fn new(queue: impl Into<String>, job: NewJob) -> Self {
        Self {
            queue: queue.into(),
            job,
            children: Vec::new(),
        }
    }

    pub fn child(mut self, child: FlowJob) -> Self {
        self.children.push(child);
        self
    }

    pub fn children(mut self, children: Vec<FlowJob>) -> Self {
        self.children.extend(children);
        self
    }
}

/// Ids created for one flow node, mirroring the input tree.
#[derive(Debug, Clone)]
pub struct FlowNode {
    pub queue: String,
    pub id: String,
    pub children: Vec<FlowNode>,
}

// ---------------------------------------------------------------------------
// Producer
// ---------------------------------------------------------------------------

/// Creates flow trees and dynamic children over a shared store.
#[derive(Clone)]
pub struct FlowProducer {
    store: Arc<Store>,
    clock: Clock,
}

impl FlowProducer {
    pub fn new(store: Arc<Store>) -> Self {
        Self::with_clock(store, Clock::system())
    }

    pub fn with_clock(store: Arc<Store>, clock: Clock) -> Self {
        Self { store, clock }
    }

    /// Create a whole parent/children tree in one atomic operation. A node
    /// with children starts in waiting-children; a leaf starts waiting (or
    /// delayed). Returns the created ids, mirroring the tree.
    pub fn add_flow(&self, root: FlowJob) -> Result<FlowNode> {
        validate_tree(&root)?;

        let (node, signals) = self.store.atomic(|tx| {
            let mut signals = Vec::new();
            let node = add_node(tx, &self.clock, &root, None, &mut signals)?;
            Ok((node, signals))
        })?;

        debug!(queue = %node.queue, id = %node.id, children = node.children.len(), "flow added");
        for queue in &signals {
            self.store.signal(queue);
        }
        Ok(node)
    }

    /// Create a parent with an initial set of children.
    pub fn add_with_children(
        &self,
        queue: impl Into<String>,
        parent: NewJob,
        children: Vec<FlowJob>,
    ) -> Result<FlowNode> {
        self.add_flow(FlowJob::new(queue, parent).children(children))
    }

    /// Attach one more child to an existing parent, incrementing its
    /// unresolved-child count. Usable from inside a running handler. Fails
    /// with `ParentNotFound` if the parent record no longer exists.
    pub fn add_child(&self, parent: &ParentRef, queue: &str, job: NewJob) -> Result<Job> {
        let spec = job.parent(parent.clone());
        spec.validate()?;

        let job = self.store.atomic(|tx| {
            let keys = Keys::new(queue);
            let id = queue::create_job_in_tx(tx, &self.clock, queue, &spec, Placement::Auto)?;
            queue::read_job(tx, &keys, &id)
        })?;

        metrics::jobs_added().add(
            1,
            &[
                KeyValue::new("queue", queue.to_string()),
                KeyValue::new("state", job.state.to_string()),
            ],
        );
        debug!(queue, id = %job.id, parent = %parent, "child added");
        if job.state == JobState::Waiting {
            self.store.signal(queue);
        }
        Ok(job)
    }
}

fn validate_tree(node: &FlowJob) -> Result<()> {
    if node.job.parent.is_some() {
        return Err(Error::Validation(
            "flow nodes take their parent from the tree structure".into(),
        ));
    }
    node.job.validate()?;
    for child in &node.children {
        validate_tree(child)?;
    }
    Ok(())
}

fn add_node(
    tx: &mut StoreTx<'_>,
    clock: &Clock,
    node: &FlowJob,
    parent: Option<&ParentRef>,
    signals: &mut Vec<String>,
) -> Result<FlowNode> {
    let mut spec = node.job.clone();
    if let Some(parent) = parent {
        spec.parent = Some(parent.clone());
    }

    let placement = if node.children.is_empty() {
        Placement::Auto
    } else {
        Placement::WaitingChildren
    };
    let id = queue::create_job_in_tx(tx, clock, &node.queue, &spec, placement)?;

    if node.children.is_empty() && spec.delay_ms.unwrap_or(0) <= 0 {
        signals.push(node.queue.clone());
    }

    let parent_ref = ParentRef::new(&node.queue, &id);
    let children = node
        .children
        .iter()
        .map(|child| add_node(tx, clock, child, Some(&parent_ref), signals))
        .collect::<Result<Vec<_>>>()?;

    Ok(FlowNode {
        queue: node.queue.clone(),
        id,
        children,
    })
}

// ---------------------------------------------------------------------------
// Settlement
// ---------------------------------------------------------------------------

/// Settle one child edge after the child reached completed or failed
/// terminally. Removes the edge from the parent's pending set and, when the
/// last edge settles while the parent is in waiting-children, releases the
/// parent to waiting. Returns the parent's queue name in that case so the
/// caller can raise its notifier.
///
/// Settlement is idempotent: an edge can only be removed once, so the
/// unresolved count can never go negative and a parent is released exactly
/// once.
pub(crate) fn settle_child(
    tx: &mut StoreTx<'_>,
    parent: &ParentRef,
    child_queue: &str,
    child_id: &str,
    child_failed: bool,
    remove_dependency: bool,
) -> Result<Option<String>> {
    let pkeys = Keys::new(&parent.queue);
    let member = child_member(child_queue, child_id);

    if !tx.srem(&pkeys.children(&parent.id), &member) {
        return Ok(None);
    }

    // A failed child stays on record as a failed dependency unless the
    // edge was marked removable, in which case the branch vanishes.
    if child_failed && !remove_dependency {
        tx.sadd(&pkeys.failed_children(&parent.id), member);
    }

    if tx.scard(&pkeys.children(&parent.id)) > 0 {
        return Ok(None);
    }

    // Last edge settled: release the parent if it is waiting on children.
    if tx.zrem(&pkeys.waiting_children(), &parent.id) {
        let priority = queue::hash_i64(tx, &pkeys.job(&parent.id), fields::PRIORITY).unwrap_or(0);
        tx.zadd(&pkeys.waiting(), &parent.id, priority);
        return Ok(Some(parent.queue.clone()));
    }
    Ok(None)
}
