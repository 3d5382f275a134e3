//! Testing utilities for phasegate workflows.
//!
//! This module provides:
//! - Scripted and recording node tasks
//! - Delivery-pipeline graph and contract fixtures
//! - Assertions over contexts and event streams

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{assert_event_before, assert_never_started, assert_node_status, assert_workflow_status};
pub use fixtures::{
    api_contract, delivery_pipeline, delivery_pipeline_with_api_contract, fast_retry, passing_api_output,
    registry_with, API_CONTRACT,
};
pub use mocks::{Recorded, RecordingTask, ScriptedTask};
