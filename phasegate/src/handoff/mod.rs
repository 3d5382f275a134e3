//! Phase handoffs.
//!
//! A [`HandoffSpec`] packages the tasks, input artifacts and acceptance
//! criteria one phase hands to the next. The [`HandoffCoordinator`] owns the
//! handoff lifecycle and refuses transitions whose preconditions do not hold.

mod coordinator;
mod model;

pub use coordinator::HandoffCoordinator;
pub use model::{HandoffCriterion, HandoffSpec, HandoffStatus, HandoffTask, HandoffTransition};
