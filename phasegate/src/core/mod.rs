//! Core domain model types for phasegate.
//!
//! This module contains the fundamental types shared by the executor,
//! the checkpoint stores and the event stream:
//! - Node and workflow status enums with their transition rules
//! - Workflow lifecycle events

mod event;
mod status;

pub use event::{WorkflowEvent, WorkflowEventType};
pub use status::{NodeStatus, WorkflowStatus};
