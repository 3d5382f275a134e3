//! # Phasegate
//!
//! A DAG workflow scheduler whose phase transitions are gated by contracts.
//!
//! Phasegate provides:
//!
//! - **DAG execution**: dependency-ordered scheduling with bounded parallelism,
//!   per-node retry policies, timeouts and conditional skips
//! - **Checkpointing**: every state transition is persisted, so executions can
//!   be paused, cancelled, resumed and recovered after a crash
//! - **Contracts**: producer/consumer agreements whose acceptance criteria are
//!   verified against node outputs and artifacts before dependents may run
//! - **Artifacts**: a content-addressed store with integrity verification
//! - **Handoffs**: task and criterion tracking between delivery phases
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use phasegate::prelude::*;
//!
//! let dag = WorkflowBuilder::new("delivery", "Delivery")
//!     .node(WorkflowNode::new("design", "Design"))?
//!     .node(WorkflowNode::new("build", "Build").depends_on(&["design"]))?
//!     .build()?;
//!
//! let task = |request: NodeRequest| -> Result<NodeOutcome, TaskFailure> {
//!     Ok(NodeOutcome::new(serde_json::json!({ "done": request.node.id })))
//! };
//! let executor = DagExecutor::new(std::sync::Arc::new(task));
//! let ctx = executor.execute(&dag, serde_json::Map::new()).await?;
//! assert_eq!(ctx.status, WorkflowStatus::Completed);
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod artifacts;
pub mod config;
pub mod contracts;
pub mod core;
pub mod errors;
pub mod events;
pub mod executor;
pub mod handoff;
pub mod observability;
pub mod testing;
pub mod utils;
pub mod workflow;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::artifacts::{Artifact, ArtifactManifest, ArtifactRole, ArtifactSpec, ArtifactStore};
    pub use crate::config::{ExecutorConfig, PhasegateConfig};
    pub use crate::contracts::{
        AcceptanceCriterion, Breach, ContractRegistry, ContractState, UniversalContract, VerificationResult,
    };
    pub use crate::core::{NodeStatus, WorkflowEvent, WorkflowEventType, WorkflowStatus};
    pub use crate::errors::{
        ArtifactError, CheckpointError, ContractError, GraphValidationError, HandoffError, PhasegateError,
        TransitionError,
    };
    pub use crate::events::{ChannelEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::executor::{
        CheckpointStore, DagExecutor, FileCheckpointStore, InMemoryCheckpointStore, NodeOutcome, NodeRequest,
        NodeTask, ProducedArtifact, TaskFailure, WorkflowContext,
    };
    pub use crate::handoff::{HandoffCoordinator, HandoffCriterion, HandoffSpec, HandoffStatus, HandoffTask};
    pub use crate::observability::init_tracing;
    pub use crate::utils::{iso_timestamp, new_id, Timestamp};
    pub use crate::workflow::{RetryPolicy, WorkflowBuilder, WorkflowDag, WorkflowDocument, WorkflowNode};
}
