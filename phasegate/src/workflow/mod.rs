//! Workflow graph model.
//!
//! A [`WorkflowDag`] is an immutable, validated description of nodes and
//! their dependencies. Build one with [`WorkflowBuilder`] or load it from a
//! [`WorkflowDocument`]; the executor never sees an unvalidated graph.

mod builder;
mod condition;
mod dag;
mod document;
mod node;
mod retry;

pub use builder::WorkflowBuilder;
pub use condition::{Condition, ConditionPath, ConditionScope};
pub use dag::{Edge, WorkflowDag};
pub use document::{WorkflowDocument, WorkflowHeader};
pub use node::{ExecutionMode, NodeType, WorkflowNode};
pub use retry::{JitterStrategy, RetryPolicy};
