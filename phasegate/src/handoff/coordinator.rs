//! The handoff coordinator: creates handoffs and enforces their lifecycle.

use super::model::{HandoffCriterion, HandoffSpec, HandoffStatus, HandoffTask, HandoffTransition};
use crate::artifacts::ArtifactManifest;
use crate::contracts::{ContractRegistry, ContractState};
use crate::errors::HandoffError;
use crate::utils::{iso_timestamp, prefixed_id};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Owns the handoffs between phases.
///
/// `Ready` requires every task dependency to resolve; `Completed` also
/// requires every task done and every criterion verified. A criterion bound
/// to a contract holds only while the registry reports that contract
/// verified; without a registry it never holds.
#[derive(Debug, Default)]
pub struct HandoffCoordinator {
    handoffs: RwLock<HashMap<String, HandoffSpec>>,
    registry: Option<Arc<ContractRegistry>>,
}

impl HandoffCoordinator {
    /// Creates a coordinator without a contract registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Consults `registry` for contract-bound criteria.
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<ContractRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Creates a draft handoff.
    ///
    /// # Errors
    ///
    /// Returns [`HandoffError::InvalidTask`] for duplicate ids or tasks that
    /// depend on themselves.
    pub fn create_handoff(
        &self,
        from_phase: impl Into<String>,
        to_phase: impl Into<String>,
        tasks: Vec<HandoffTask>,
        artifacts: ArtifactManifest,
        criteria: Vec<HandoffCriterion>,
    ) -> Result<HandoffSpec, HandoffError> {
        let now = iso_timestamp();
        let spec = HandoffSpec {
            id: prefixed_id("handoff"),
            from_phase: from_phase.into(),
            to_phase: to_phase.into(),
            tasks,
            artifacts,
            criteria,
            status: HandoffStatus::Draft,
            external_completed: BTreeSet::new(),
            rejection_count: 0,
            last_rejection: None,
            history: Vec::new(),
            created_at: now.clone(),
            updated_at: now,
        };
        spec.validate_tasks().map_err(HandoffError::InvalidTask)?;

        info!(
            handoff_id = %spec.id,
            from_phase = %spec.from_phase,
            to_phase = %spec.to_phase,
            tasks = spec.tasks.len(),
            artifacts = spec.artifacts.len(),
            "Handoff created"
        );
        self.handoffs.write().insert(spec.id.clone(), spec.clone());
        Ok(spec)
    }

    /// Returns a handoff.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<HandoffSpec> {
        self.handoffs.read().get(id).cloned()
    }

    /// Returns every handoff, oldest first.
    #[must_use]
    pub fn list(&self) -> Vec<HandoffSpec> {
        let mut all: Vec<HandoffSpec> = self.handoffs.read().values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        all
    }

    /// Moves a handoff to `next`. Moving to `Rejected` behaves like
    /// [`reject`](Self::reject) without a reason.
    ///
    /// # Errors
    ///
    /// Returns [`HandoffError::NotFound`], a transition error, or the gate
    /// that failed: [`HandoffError::UnmetDependencies`],
    /// [`HandoffError::IncompleteTasks`] or [`HandoffError::UnverifiedCriteria`].
    pub fn advance(&self, id: &str, next: HandoffStatus) -> Result<HandoffSpec, HandoffError> {
        if next == HandoffStatus::Rejected {
            return self.reject(id, "rejected without reason");
        }
        let mut handoffs = self.handoffs.write();
        let spec = handoffs
            .get_mut(id)
            .ok_or_else(|| HandoffError::NotFound(id.to_string()))?;
        spec.status.check_transition(id, next)?;

        match next {
            HandoffStatus::Ready | HandoffStatus::InProgress => {
                let unresolved = spec.unresolved_dependencies();
                if !unresolved.is_empty() {
                    warn!(handoff_id = %id, unresolved = ?unresolved, "Handoff has unresolved dependencies");
                    return Err(HandoffError::UnmetDependencies {
                        id: id.to_string(),
                        tasks: unresolved,
                    });
                }
            }
            HandoffStatus::Completed => self.check_completion(spec)?,
            HandoffStatus::Draft | HandoffStatus::Rejected => {}
        }

        record(spec, next, None);
        info!(handoff_id = %id, status = %next, "Handoff advanced");
        Ok(spec.clone())
    }

    /// Rejects a handoff and returns it to draft. Tasks, artifacts and
    /// criteria are kept; the reason and rejection count are recorded.
    ///
    /// # Errors
    ///
    /// Returns [`HandoffError::NotFound`] or a transition error (a completed
    /// handoff cannot be rejected).
    pub fn reject(&self, id: &str, reason: impl Into<String>) -> Result<HandoffSpec, HandoffError> {
        let reason = reason.into();
        let mut handoffs = self.handoffs.write();
        let spec = handoffs
            .get_mut(id)
            .ok_or_else(|| HandoffError::NotFound(id.to_string()))?;
        spec.status.check_transition(id, HandoffStatus::Rejected)?;

        record(spec, HandoffStatus::Rejected, Some(reason.clone()));
        record(spec, HandoffStatus::Draft, None);
        spec.rejection_count += 1;
        spec.last_rejection = Some(reason.clone());
        warn!(
            handoff_id = %id,
            reason = %reason,
            rejection_count = spec.rejection_count,
            "Handoff rejected"
        );
        Ok(spec.clone())
    }

    /// Marks a task complete. An id not in the task list is recorded as a
    /// completed external prerequisite.
    ///
    /// # Errors
    ///
    /// Returns [`HandoffError::NotFound`] for unknown handoffs.
    pub fn complete_task(&self, handoff_id: &str, task_id: &str) -> Result<HandoffSpec, HandoffError> {
        let mut handoffs = self.handoffs.write();
        let spec = handoffs
            .get_mut(handoff_id)
            .ok_or_else(|| HandoffError::NotFound(handoff_id.to_string()))?;
        if let Some(task) = spec.tasks.iter_mut().find(|t| t.id == task_id) {
            task.completed = true;
            debug!(handoff_id = %handoff_id, task_id = %task_id, "Task completed");
        } else {
            spec.external_completed.insert(task_id.to_string());
            debug!(handoff_id = %handoff_id, task_id = %task_id, "External prerequisite completed");
        }
        spec.updated_at = iso_timestamp();
        Ok(spec.clone())
    }

    /// Marks a criterion verified.
    ///
    /// # Errors
    ///
    /// Returns [`HandoffError::NotFound`], [`HandoffError::UnknownCriterion`],
    /// or [`HandoffError::ContractBound`] for criteria bound to a contract.
    pub fn mark_criterion_verified(&self, handoff_id: &str, criterion_id: &str) -> Result<HandoffSpec, HandoffError> {
        let mut handoffs = self.handoffs.write();
        let spec = handoffs
            .get_mut(handoff_id)
            .ok_or_else(|| HandoffError::NotFound(handoff_id.to_string()))?;
        let criterion = spec
            .criteria
            .iter_mut()
            .find(|c| c.id == criterion_id)
            .ok_or_else(|| HandoffError::UnknownCriterion {
                id: handoff_id.to_string(),
                criterion: criterion_id.to_string(),
            })?;
        if let Some(contract_id) = &criterion.contract_id {
            return Err(HandoffError::ContractBound {
                id: handoff_id.to_string(),
                criterion: criterion_id.to_string(),
                contract_id: contract_id.clone(),
            });
        }
        criterion.verified = true;
        spec.updated_at = iso_timestamp();
        debug!(handoff_id = %handoff_id, criterion_id = %criterion_id, "Criterion verified");
        Ok(spec.clone())
    }

    fn criterion_holds(&self, criterion: &HandoffCriterion) -> bool {
        let Some(contract_id) = &criterion.contract_id else {
            return criterion.verified;
        };
        self.registry
            .as_ref()
            .is_some_and(|registry| registry.state(contract_id) == Some(ContractState::Verified))
    }

    fn check_completion(&self, spec: &HandoffSpec) -> Result<(), HandoffError> {
        let unmet: Vec<String> = spec
            .tasks
            .iter()
            .filter(|t| t.dependencies.iter().any(|d| !spec.is_done(d)))
            .map(|t| t.id.clone())
            .collect();
        if !unmet.is_empty() {
            return Err(HandoffError::UnmetDependencies {
                id: spec.id.clone(),
                tasks: unmet,
            });
        }
        let incomplete = spec.incomplete_tasks();
        if !incomplete.is_empty() {
            return Err(HandoffError::IncompleteTasks {
                id: spec.id.clone(),
                tasks: incomplete,
            });
        }
        let unverified: Vec<String> = spec
            .criteria
            .iter()
            .filter(|c| !self.criterion_holds(c))
            .map(|c| c.id.clone())
            .collect();
        if !unverified.is_empty() {
            return Err(HandoffError::UnverifiedCriteria {
                id: spec.id.clone(),
                criteria: unverified,
            });
        }
        Ok(())
    }
}

fn record(spec: &mut HandoffSpec, to: HandoffStatus, reason: Option<String>) {
    let at = iso_timestamp();
    spec.history.push(HandoffTransition {
        from: spec.status,
        to,
        at: at.clone(),
        reason,
    });
    spec.status = to;
    spec.updated_at = at;
}
