//! # flowq
//!
//! Distributed job-queue engine: producers enqueue jobs, workers lease and
//! execute them, and the engine guarantees at-least-once delivery, a
//! well-defined lifecycle, and safe coordination across many concurrent
//! workers sharing one store. Parents can wait on dynamically-added
//! children ("flows"), and jobs whose worker died mid-processing are
//! reclaimed by the stalled scan.
//!
//! Every multi-key state change runs as one atomic operation against the
//! store — the engine's single point of mutual exclusion.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use flowq::{Handler, Job, JobContext, NewJob, Outcome, Queue, Result, Store, Worker,
//!             WorkerOptions, async_trait};
//!
//! struct Greeter;
//!
//! #[async_trait]
//! impl Handler for Greeter {
//!     async fn process(&self, job: Job, _ctx: JobContext) -> Result<Outcome> {
//!         println!("hello, {}", job.data);
//!         Ok(Outcome::Complete(None))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let store = Arc::new(Store::new());
//!     let queue = Queue::new(Arc::clone(&store), "greetings");
//!
//!     queue.add(NewJob::new("greet").data(serde_json::json!("world")))?;
//!
//!     let worker = Worker::new(queue, Greeter, WorkerOptions::default());
//!     worker.run().await
//! }
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod flow;
pub mod lease;
pub mod model;
pub mod queue;
pub mod store;
pub mod telemetry;
pub mod worker;

pub use clock::Clock;
pub use error::{Error, Result};
pub use flow::{FlowJob, FlowNode, FlowProducer};
pub use lease::LeaseToken;
pub use model::{Backoff, Job, JobState, NewJob, ParentRef};
pub use queue::{JobCounts, Queue};
pub use store::Store;
pub use worker::{Handler, JobContext, Outcome, Worker, WorkerOptions};

// Re-export for convenience when implementing Handler.
pub use async_trait::async_trait;
