//! Workflow execution.
//!
//! [`DagExecutor`] drives a [`WorkflowDag`](crate::workflow::WorkflowDag):
//! it derives the ready set from the persisted [`WorkflowContext`], runs node
//! attempts through a [`NodeTask`], verifies output contracts, retries
//! transient failures and checkpoints after every transition.

mod checkpoint;
mod context;
mod control;
mod dag_executor;
mod readiness;
mod state;
mod summary;
mod task;


pub use checkpoint::{CheckpointStore, FileCheckpointStore, InMemoryCheckpointStore};
pub use context::WorkflowContext;
pub use dag_executor::{DagExecutor, LateBreachOutcome};
pub use readiness::{assess, Readiness};
pub use state::{NodeState, VerificationStatus};
pub use summary::{ExecutionSummary, NodeFailure};
pub use task::{NodeOutcome, NodeRequest, NodeTask, ProducedArtifact, TaskFailure};
