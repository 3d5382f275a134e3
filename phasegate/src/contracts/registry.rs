//! Contract registry: lifecycle, dependency graph, verification and negotiation.

use super::compat::{diff_contracts, ChangeKind, CompatibilityReport};
use super::graph::ContractGraph;
use super::negotiation::{ContractAmendment, NegotiationKind, NegotiationRecord};
use super::validators::{ValidationContext, Validator, ValidatorRegistry};
use super::verification::run_verification;
use super::{
    Breach, BreachRecord, ContractState, RemediationCatalog, UniversalContract, VerificationResult, Waiver,
};
use crate::artifacts::{Artifact, ArtifactStore};
use crate::config::VerificationConfig;
use crate::errors::ContractError;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Whether a consumer may rely on an input contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "gate", rename_all = "snake_case")]
pub enum InputGate {
    /// Verified, or breached without blocking effect.
    Satisfied,
    /// Not yet verified.
    Waiting {
        /// Current contract state.
        state: ContractState,
    },
    /// The contract or one of its prerequisites has a blocking breach.
    Blocked {
        /// Contracts with blocking breaches.
        by: Vec<String>,
    },
}

/// Outcome of [`ContractRegistry::amend`].
#[derive(Debug, Clone, PartialEq)]
pub struct AmendmentOutcome {
    /// The contract after amendment.
    pub contract: UniversalContract,
    /// Differences from the previous version.
    pub report: CompatibilityReport,
    /// Classification of the change.
    pub change: ChangeKind,
    /// True if the contract moved to `Amended` and must be accepted again.
    pub reacceptance_required: bool,
}

/// Outcome of [`ContractRegistry::handle_late_breach`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LateBreachResolution {
    /// Breached contract.
    pub contract_id: String,
    /// State before the breach.
    pub previous_state: ContractState,
    /// Whether the breach blocks dependents.
    pub blocking: bool,
    /// Downstream contracts that can no longer be relied on.
    pub invalidated_contracts: Vec<String>,
}

#[derive(Debug, Default)]
struct Inner {
    contracts: HashMap<String, UniversalContract>,
    order: Vec<String>,
    graph: ContractGraph,
    history: HashMap<String, Vec<UniversalContract>>,
    negotiations: HashMap<String, NegotiationRecord>,
    negotiation_order: Vec<String>,
    breaches: HashMap<String, Vec<BreachRecord>>,
}

impl Inner {
    fn contract(&self, id: &str) -> Result<&UniversalContract, ContractError> {
        self.contracts
            .get(id)
            .ok_or_else(|| ContractError::NotFound(id.to_string()))
    }

    fn contract_mut(&mut self, id: &str) -> Result<&mut UniversalContract, ContractError> {
        self.contracts
            .get_mut(id)
            .ok_or_else(|| ContractError::NotFound(id.to_string()))
    }

    /// Contracts with a blocking breach among `id` and its ancestors.
    fn blockers(&self, id: &str) -> Vec<String> {
        std::iter::once(id)
            .chain(self.graph.ancestors(id))
            .filter(|cid| self.contracts.get(*cid).is_some_and(UniversalContract::is_blocking_breach))
            .map(str::to_string)
            .collect()
    }

    fn record_breach(&mut self, contract: &UniversalContract, breach: Breach) {
        self.breaches
            .entry(contract.id.clone())
            .or_default()
            .push(BreachRecord {
                contract_id: contract.id.clone(),
                contract_version: contract.contract_version,
                breach,
                recorded_at: crate::utils::iso_timestamp(),
            });
    }
}

fn transition(contract: &mut UniversalContract, next: ContractState) -> Result<(), ContractError> {
    contract.state.check_transition(&contract.id, next)?;
    if contract.state == ContractState::Breached {
        contract.waiver = None;
    }
    debug!(contract_id = %contract.id, from = %contract.state, to = %next, "Contract transition");
    contract.state = next;
    Ok(())
}

/// Registry of contracts shared by the executor and handoff coordinator.
///
/// All state lives behind one lock that is never held across an await:
/// verification snapshots the contract, runs validators unlocked, then
/// applies the verdict.
pub struct ContractRegistry {
    inner: RwLock<Inner>,
    validators: ValidatorRegistry,
    catalog: RemediationCatalog,
    store: Option<Arc<ArtifactStore>>,
    validator_timeout: Duration,
}

impl fmt::Debug for ContractRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContractRegistry")
            .field("contracts", &self.len())
            .field("validators", &self.validators)
            .field("validator_timeout", &self.validator_timeout)
            .finish_non_exhaustive()
    }
}

impl Default for ContractRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ContractRegistry {
    /// Creates a registry with the built-in validators and a 30 second
    /// validator timeout.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            validators: ValidatorRegistry::with_builtins(),
            catalog: RemediationCatalog::with_defaults(),
            store: None,
            validator_timeout: Duration::from_secs(30),
        }
    }

    /// Creates a registry using the verification settings.
    #[must_use]
    pub fn from_config(config: &VerificationConfig) -> Self {
        Self::new().with_validator_timeout(config.validator_timeout())
    }

    /// Replaces the validator set.
    #[must_use]
    pub fn with_validators(mut self, validators: ValidatorRegistry) -> Self {
        self.validators = validators;
        self
    }

    /// Adds a validator.
    #[must_use]
    pub fn with_validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validators.register(validator);
        self
    }

    /// Replaces the remediation catalog.
    #[must_use]
    pub fn with_catalog(mut self, catalog: RemediationCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Sets the store validators read artifact content from.
    #[must_use]
    pub fn with_artifact_store(mut self, store: Arc<ArtifactStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Sets the per-validator timeout.
    #[must_use]
    pub fn with_validator_timeout(mut self, timeout: Duration) -> Self {
        self.validator_timeout = timeout;
        self
    }

    /// Returns the artifact store, if configured.
    #[must_use]
    pub fn artifact_store(&self) -> Option<&Arc<ArtifactStore>> {
        self.store.as_ref()
    }

    /// Registers a contract.
    ///
    /// # Errors
    ///
    /// Fails for an invalid document, a duplicate id, or relations that
    /// would close a dependency cycle. A rejected contract leaves the
    /// registry unchanged.
    pub fn register(&self, contract: UniversalContract) -> Result<(), ContractError> {
        contract.validate()?;
        let mut inner = self.inner.write();
        if inner.contracts.contains_key(&contract.id) {
            return Err(ContractError::Duplicate(contract.id));
        }
        inner.graph.insert(&contract)?;
        info!(
            contract_id = %contract.id,
            state = %contract.state,
            blocking = contract.is_blocking,
            "Contract registered"
        );
        inner.order.push(contract.id.clone());
        inner.contracts.insert(contract.id.clone(), contract);
        Ok(())
    }

    /// Returns a snapshot of a contract.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<UniversalContract> {
        self.inner.read().contracts.get(id).cloned()
    }

    /// Returns true if the contract is registered.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.inner.read().contracts.contains_key(id)
    }

    /// Returns the state of a contract.
    #[must_use]
    pub fn state(&self, id: &str) -> Option<ContractState> {
        self.inner.read().contracts.get(id).map(|c| c.state)
    }

    /// Returns every contract in registration order.
    #[must_use]
    pub fn list(&self) -> Vec<UniversalContract> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter_map(|id| inner.contracts.get(id).cloned())
            .collect()
    }

    /// Returns the number of registered contracts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().contracts.len()
    }

    /// Returns true if no contracts are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().contracts.is_empty()
    }

    /// Moves a contract to a new lifecycle state and returns the old one.
    ///
    /// # Errors
    ///
    /// Returns [`ContractError::NotFound`] or a transition error.
    pub fn update_state(&self, id: &str, next: ContractState) -> Result<ContractState, ContractError> {
        let mut inner = self.inner.write();
        let contract = inner.contract_mut(id)?;
        let previous = contract.state;
        transition(contract, next)?;
        info!(contract_id = %id, from = %previous, to = %next, "Contract state updated");
        Ok(previous)
    }

    /// Returns accepted contracts whose prerequisites are all satisfied and
    /// that are not held back by a blocking breach, in registration order.
    #[must_use]
    pub fn get_executable_contracts(&self) -> Vec<String> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter(|id| inner.contracts.get(*id).is_some_and(|c| c.state == ContractState::Accepted))
            .filter(|id| {
                inner.graph.prerequisites(id).iter().all(|p| {
                    inner
                        .contracts
                        .get(*p)
                        .is_some_and(UniversalContract::is_satisfied)
                })
            })
            .filter(|id| inner.blockers(id).is_empty())
            .cloned()
            .collect()
    }

    /// Verifies a contract against submitted artifacts.
    ///
    /// # Errors
    ///
    /// See [`ContractRegistry::verify_with_output`].
    pub async fn verify_contract_fulfillment(
        &self,
        id: &str,
        artifacts: &[Artifact],
    ) -> Result<VerificationResult, ContractError> {
        self.verify_with_output(id, artifacts, None).await
    }

    /// Verifies a contract against artifacts and a node output payload.
    ///
    /// Accepted and breached contracts are moved through `InProgress` to
    /// `Fulfilled` first; verified contracts are re-verified in place. The
    /// contract ends `Verified` when every critical criterion passes and
    /// `Breached` otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`ContractError::NotFound`] for an unknown id and
    /// [`ContractError::InvalidState`] for contracts that were never accepted.
    pub async fn verify_with_output(
        &self,
        id: &str,
        artifacts: &[Artifact],
        output: Option<&Value>,
    ) -> Result<VerificationResult, ContractError> {
        let snapshot = {
            let mut inner = self.inner.write();
            let contract = inner.contract_mut(id)?;
            match contract.state {
                ContractState::Accepted | ContractState::Breached => {
                    transition(contract, ContractState::InProgress)?;
                    transition(contract, ContractState::Fulfilled)?;
                }
                ContractState::InProgress => transition(contract, ContractState::Fulfilled)?,
                ContractState::Fulfilled | ContractState::Verified => {}
                other => {
                    return Err(ContractError::InvalidState {
                        id: id.to_string(),
                        state: other.to_string(),
                        operation: "verified".to_string(),
                    })
                }
            }
            contract.clone()
        };

        let ctx = ValidationContext {
            contract: &snapshot,
            artifacts,
            store: self.store.as_deref(),
            output,
        };
        let result = run_verification(ctx, &self.validators, &self.catalog, self.validator_timeout).await;

        let mut guard = self.inner.write();
        let inner = &mut *guard;
        let Some(contract) = inner.contracts.get_mut(id) else {
            return Ok(result);
        };
        if contract.contract_version != snapshot.contract_version {
            warn!(contract_id = %id, "Contract amended during verification; verdict not applied");
            return Ok(result);
        }

        contract.verification_result = Some(result.clone());
        let verdict = if result.passed {
            ContractState::Verified
        } else {
            ContractState::Breached
        };
        if contract.state != verdict {
            if let Err(err) = transition(contract, verdict) {
                warn!(contract_id = %id, error = %err, "Contract changed state during verification");
                return Ok(result);
            }
        }

        if result.passed {
            info!(contract_id = %id, duration_ms = result.duration_ms, "Contract verified");
        } else {
            let failed: Vec<String> = result.failed_critical().into_iter().map(str::to_string).collect();
            warn!(
                contract_id = %id,
                blocking = contract.is_blocking,
                failed = ?failed,
                "Contract breached"
            );
            let snapshot = contract.clone();
            inner.record_breach(
                &snapshot,
                Breach::new("critical acceptance criteria failed", "verification").with_criteria(failed),
            );
        }
        Ok(result)
    }

    /// Returns the contracts held back while `id` is breached.
    #[must_use]
    pub fn get_blocked_contracts(&self, id: &str) -> Vec<String> {
        let inner = self.inner.read();
        inner.graph.descendants(id).into_iter().map(str::to_string).collect()
    }

    /// Returns the contracts whose breach would hold back `id`.
    #[must_use]
    pub fn get_contracts_blocked_by(&self, id: &str) -> Vec<String> {
        let inner = self.inner.read();
        inner.graph.ancestors(id).into_iter().map(str::to_string).collect()
    }

    /// Returns true if `id` or a prerequisite has a blocking, unwaived breach.
    #[must_use]
    pub fn is_blocked(&self, id: &str) -> bool {
        !self.inner.read().blockers(id).is_empty()
    }

    /// Decides whether a consumer may rely on `id` now.
    ///
    /// # Errors
    ///
    /// Returns [`ContractError::NotFound`] for an unknown id.
    pub fn input_gate(&self, id: &str) -> Result<InputGate, ContractError> {
        let inner = self.inner.read();
        let contract = inner.contract(id)?;
        let blockers = inner.blockers(id);
        if !blockers.is_empty() {
            return Ok(InputGate::Blocked { by: blockers });
        }
        if contract.is_satisfied() {
            if contract.state == ContractState::Breached {
                warn!(contract_id = %id, "Relying on breached contract (non-blocking or waived)");
            }
            Ok(InputGate::Satisfied)
        } else {
            Ok(InputGate::Waiting { state: contract.state })
        }
    }

    /// Groups registered contracts into layers that can be fulfilled together.
    #[must_use]
    pub fn get_execution_plan(&self) -> Vec<Vec<String>> {
        self.inner.read().graph.layers()
    }

    /// Opens a negotiation over an amendment.
    ///
    /// Proposed and amended contracts move to `Negotiating`; other states
    /// are kept until the negotiation is resolved.
    ///
    /// # Errors
    ///
    /// Returns [`ContractError::NotFound`] or, for rejected contracts,
    /// [`ContractError::InvalidState`].
    pub fn negotiate(
        &self,
        id: &str,
        amendment: ContractAmendment,
        proposed_by: &str,
    ) -> Result<NegotiationRecord, ContractError> {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        let contract = inner.contract_mut(id)?;
        if contract.state == ContractState::Rejected {
            return Err(ContractError::InvalidState {
                id: id.to_string(),
                state: contract.state.to_string(),
                operation: "negotiated".to_string(),
            });
        }

        let record = NegotiationRecord::open(contract, NegotiationKind::Amendment(amendment), proposed_by);
        if matches!(contract.state, ContractState::Proposed | ContractState::Amended) {
            transition(contract, ContractState::Negotiating)?;
        }
        info!(contract_id = %id, negotiation_id = %record.id, "Negotiation opened");
        inner.negotiation_order.push(record.id.clone());
        inner.negotiations.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    /// Asks for a breach to be waived. The contract stays breached, and
    /// blocking, until the waiver is accepted.
    ///
    /// # Errors
    ///
    /// Returns [`ContractError::InvalidState`] unless the contract is breached.
    pub fn request_waiver(
        &self,
        id: &str,
        reason: &str,
        requested_by: &str,
    ) -> Result<NegotiationRecord, ContractError> {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        let contract = inner.contract(id)?;
        if contract.state != ContractState::Breached {
            return Err(ContractError::InvalidState {
                id: id.to_string(),
                state: contract.state.to_string(),
                operation: "waived".to_string(),
            });
        }
        let record = NegotiationRecord::open(
            contract,
            NegotiationKind::Waiver {
                reason: reason.to_string(),
            },
            requested_by,
        );
        info!(contract_id = %id, negotiation_id = %record.id, "Waiver requested");
        inner.negotiation_order.push(record.id.clone());
        inner.negotiations.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    /// Accepts or rejects an open negotiation.
    ///
    /// An accepted amendment is applied with [`ContractRegistry::amend`]
    /// semantics and a negotiating contract becomes `Accepted`; a rejected
    /// one returns to its prior state where the lifecycle allows. An
    /// accepted waiver lifts the blocking effect of the breach.
    ///
    /// # Errors
    ///
    /// Fails for unknown or closed negotiations and for amendments that
    /// cannot be applied.
    pub fn resolve_negotiation(&self, negotiation_id: &str, accept: bool) -> Result<NegotiationRecord, ContractError> {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        let record = inner
            .negotiations
            .get(negotiation_id)
            .cloned()
            .ok_or_else(|| ContractError::NegotiationNotFound(negotiation_id.to_string()))?;
        if !record.is_open() {
            return Err(ContractError::NegotiationClosed(negotiation_id.to_string()));
        }
        let id = record.contract_id.as_str();

        match (&record.kind, accept) {
            (NegotiationKind::Amendment(amendment), true) => {
                amend_locked(inner, id, amendment)?;
                let contract = inner.contract_mut(id)?;
                if contract.state == ContractState::Negotiating {
                    transition(contract, ContractState::Accepted)?;
                }
            }
            (NegotiationKind::Amendment(_), false) => {
                let contract = inner.contract_mut(id)?;
                if contract.state == ContractState::Negotiating {
                    let back = if contract.state.can_transition_to(record.prior_state) {
                        record.prior_state
                    } else {
                        ContractState::Proposed
                    };
                    transition(contract, back)?;
                }
            }
            (NegotiationKind::Waiver { reason }, true) => {
                let contract = inner.contract_mut(id)?;
                if contract.state != ContractState::Breached {
                    return Err(ContractError::InvalidState {
                        id: id.to_string(),
                        state: contract.state.to_string(),
                        operation: "waived".to_string(),
                    });
                }
                contract.waiver = Some(Waiver {
                    negotiation_id: record.id.clone(),
                    reason: reason.clone(),
                    granted_at: crate::utils::iso_timestamp(),
                });
                warn!(contract_id = %id, reason = %reason, "Breach waived");
            }
            (NegotiationKind::Waiver { .. }, false) => {}
        }

        let stored = inner
            .negotiations
            .get_mut(negotiation_id)
            .ok_or_else(|| ContractError::NegotiationNotFound(negotiation_id.to_string()))?;
        stored.close(accept);
        info!(negotiation_id = %negotiation_id, accepted = accept, "Negotiation resolved");
        Ok(stored.clone())
    }

    /// Returns a negotiation by id.
    #[must_use]
    pub fn negotiation(&self, negotiation_id: &str) -> Option<NegotiationRecord> {
        self.inner.read().negotiations.get(negotiation_id).cloned()
    }

    /// Returns the negotiations over a contract, oldest first.
    #[must_use]
    pub fn negotiations(&self, id: &str) -> Vec<NegotiationRecord> {
        let inner = self.inner.read();
        inner
            .negotiation_order
            .iter()
            .filter_map(|nid| inner.negotiations.get(nid))
            .filter(|r| r.contract_id == id)
            .cloned()
            .collect()
    }

    /// Amends a contract, producing a new contract version.
    ///
    /// The previous version is kept in the history. Breaking changes bump
    /// the schema major version, additive ones the minor version. Breaking
    /// changes, or an amendment that asks for it, move an accepted contract
    /// to `Amended` so it must be accepted again.
    ///
    /// # Errors
    ///
    /// Fails for unknown or rejected contracts, invalid amended documents,
    /// and relation changes that would close a cycle.
    pub fn amend(&self, id: &str, amendment: ContractAmendment) -> Result<AmendmentOutcome, ContractError> {
        let mut inner = self.inner.write();
        amend_locked(&mut inner, id, &amendment)
    }

    /// Returns previous versions of a contract, oldest first.
    #[must_use]
    pub fn history(&self, id: &str) -> Vec<UniversalContract> {
        self.inner.read().history.get(id).cloned().unwrap_or_default()
    }

    /// Records a breach found after a contract was verified.
    ///
    /// Any waiver is revoked. For a blocking contract the result lists every
    /// downstream contract that can no longer be relied on.
    ///
    /// # Errors
    ///
    /// Returns [`ContractError::NotFound`] or a transition error when the
    /// contract was never in progress.
    pub fn handle_late_breach(&self, id: &str, breach: Breach) -> Result<LateBreachResolution, ContractError> {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        let contract = inner.contract_mut(id)?;
        let previous_state = contract.state;
        if previous_state != ContractState::Breached {
            transition(contract, ContractState::Breached)?;
        }
        contract.waiver = None;
        let snapshot = contract.clone();

        warn!(
            contract_id = %id,
            previous_state = %previous_state,
            reason = %breach.reason,
            detected_by = %breach.detected_by,
            "Late breach recorded"
        );
        inner.record_breach(&snapshot, breach);

        let invalidated_contracts = if snapshot.is_blocking {
            inner.graph.descendants(id).into_iter().map(str::to_string).collect()
        } else {
            Vec::new()
        };
        Ok(LateBreachResolution {
            contract_id: id.to_string(),
            previous_state,
            blocking: snapshot.is_blocking,
            invalidated_contracts,
        })
    }

    /// Returns the breaches recorded for a contract, oldest first.
    #[must_use]
    pub fn breaches(&self, id: &str) -> Vec<BreachRecord> {
        self.inner.read().breaches.get(id).cloned().unwrap_or_default()
    }
}

fn amend_locked(
    inner: &mut Inner,
    id: &str,
    amendment: &ContractAmendment,
) -> Result<AmendmentOutcome, ContractError> {
    let current = inner.contract(id)?.clone();
    if current.state == ContractState::Rejected {
        return Err(ContractError::InvalidState {
            id: id.to_string(),
            state: current.state.to_string(),
            operation: "amended".to_string(),
        });
    }

    let mut amended = amendment.apply_to(&current);
    amended.validate()?;
    let mut report = diff_contracts(&current, &amended);
    let change = report.change_kind();
    amended.schema_version = match change {
        ChangeKind::Breaking => current.schema_version.bump_major(),
        ChangeKind::Additive => current.schema_version.bump_minor(),
        ChangeKind::None => current.schema_version,
    };
    amended.contract_version = current.contract_version + 1;
    report.to_version = amended.schema_version;

    let wants_reacceptance = change == ChangeKind::Breaking || amendment.requires_reacceptance;
    let reacceptance_required = wants_reacceptance && current.state.can_transition_to(ContractState::Amended);
    if reacceptance_required {
        transition(&mut amended, ContractState::Amended)?;
        amended.verification_result = None;
    }

    if amendment.changes_relations() {
        let graph = ContractGraph::build(inner.order.iter().filter_map(|oid| {
            if oid == id {
                Some(&amended)
            } else {
                inner.contracts.get(oid)
            }
        }))?;
        inner.graph = graph;
    }

    info!(
        contract_id = %id,
        contract_version = amended.contract_version,
        schema_version = %amended.schema_version,
        change = ?change,
        reason = %amendment.reason,
        "Contract amended"
    );
    inner.history.entry(id.to_string()).or_default().push(current);
    inner.contracts.insert(id.to_string(), amended.clone());

    Ok(AmendmentOutcome {
        contract: amended,
        report,
        change,
        reacceptance_required,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::{ArtifactRole, ArtifactSpec};
    use crate::contracts::{AcceptanceCriterion, SchemaVersion};
    use crate::errors::codes;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn contract(id: &str) -> UniversalContract {
        UniversalContract::new(id, "api_endpoint", id, "backend", "frontend").with_state(ContractState::Accepted)
    }

    fn approved(id: &str) -> UniversalContract {
        contract(id).with_criterion(
            AcceptanceCriterion::new("review", "approved", "manual").with_parameters(json!({"approved": true})),
        )
    }

    fn rejected(id: &str) -> UniversalContract {
        contract(id).with_criterion(AcceptanceCriterion::new("review", "approved", "manual"))
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = ContractRegistry::new();
        registry.register(contract("SPEC")).unwrap();
        registry.register(contract("API").depends_on(&["SPEC"])).unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.state("API"), Some(ContractState::Accepted));
        assert!(matches!(
            registry.register(contract("API")),
            Err(ContractError::Duplicate(_))
        ));
        assert_eq!(
            registry.list().iter().map(|c| c.id.as_str()).collect::<Vec<_>>(),
            vec!["SPEC", "API"]
        );
    }

    #[test]
    fn test_register_rejects_cycles() {
        let registry = ContractRegistry::new();
        registry.register(contract("A").depends_on(&["B"])).unwrap();
        let err = registry.register(contract("B").depends_on(&["A"])).unwrap_err();
        match err {
            ContractError::Cycle(cycle) => assert_eq!(cycle.error_info.code, codes::CONTRACT_CYCLE),
            other => panic!("unexpected error: {other}"),
        }
        assert!(!registry.contains("B"));
    }

    #[test]
    fn test_update_state_enforces_lifecycle() {
        let registry = ContractRegistry::new();
        registry
            .register(UniversalContract::new("A", "t", "n", "p", "c"))
            .unwrap();
        assert_eq!(registry.update_state("A", ContractState::Proposed).unwrap(), ContractState::Draft);
        assert!(matches!(
            registry.update_state("A", ContractState::Verified),
            Err(ContractError::Transition(_))
        ));
        assert!(matches!(
            registry.update_state("missing", ContractState::Proposed),
            Err(ContractError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_executable_contracts_follow_dependencies() {
        let registry = ContractRegistry::new();
        registry.register(approved("SPEC")).unwrap();
        registry.register(approved("API").depends_on(&["SPEC"])).unwrap();

        assert_eq!(registry.get_executable_contracts(), vec!["SPEC"]);
        registry.verify_contract_fulfillment("SPEC", &[]).await.unwrap();
        assert_eq!(registry.get_executable_contracts(), vec!["API"]);
    }

    #[tokio::test]
    async fn test_failed_critical_criterion_breaches() {
        let registry = ContractRegistry::new();
        registry.register(rejected("API_001").blocks(&["UI_001"])).unwrap();
        registry.register(contract("UI_001")).unwrap();

        let result = registry.verify_contract_fulfillment("API_001", &[]).await.unwrap();
        assert!(!result.passed);
        assert_eq!(registry.state("API_001"), Some(ContractState::Breached));
        assert_eq!(registry.breaches("API_001").len(), 1);
        assert!(registry.get("API_001").unwrap().verification_result.is_some());

        assert!(registry.is_blocked("UI_001"));
        assert_eq!(
            registry.input_gate("UI_001").unwrap(),
            InputGate::Blocked {
                by: vec!["API_001".to_string()]
            }
        );
        assert!(registry.get_executable_contracts().is_empty());
        assert_eq!(registry.get_blocked_contracts("API_001"), vec!["UI_001"]);
        assert_eq!(registry.get_contracts_blocked_by("UI_001"), vec!["API_001"]);
    }

    #[tokio::test]
    async fn test_non_blocking_breach_only_warns() {
        let registry = ContractRegistry::new();
        registry.register(rejected("LINT").blocking(false).blocks(&["UI"])).unwrap();
        registry.register(contract("UI")).unwrap();

        registry.verify_contract_fulfillment("LINT", &[]).await.unwrap();
        assert_eq!(registry.state("LINT"), Some(ContractState::Breached));
        assert!(!registry.is_blocked("UI"));
        assert_eq!(registry.input_gate("LINT").unwrap(), InputGate::Satisfied);
    }

    #[tokio::test]
    async fn test_verify_requires_acceptance() {
        let registry = ContractRegistry::new();
        registry.register(UniversalContract::new("A", "t", "n", "p", "c")).unwrap();
        let err = registry.verify_contract_fulfillment("A", &[]).await.unwrap_err();
        assert!(matches!(err, ContractError::InvalidState { .. }));
        assert_eq!(registry.input_gate("A").unwrap(), InputGate::Waiting { state: ContractState::Draft });
    }

    #[tokio::test]
    async fn test_verification_reads_store_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ArtifactStore::open(dir.path()).unwrap());
        let registry = ContractRegistry::new().with_artifact_store(Arc::clone(&store));
        registry
            .register(contract("DOCS").with_criterion(
                AcceptanceCriterion::new("intact", "artifacts intact", "artifact_integrity"),
            ))
            .unwrap();

        let artifact = store
            .store(b"# Orders API", ArtifactSpec::new(ArtifactRole::Specification, "text/markdown"))
            .unwrap();
        let result = registry.verify_contract_fulfillment("DOCS", &[artifact]).await.unwrap();
        assert!(result.passed);
        assert_eq!(registry.state("DOCS"), Some(ContractState::Verified));
    }

    #[tokio::test]
    async fn test_waiver_unblocks_dependents() {
        let registry = ContractRegistry::new();
        registry.register(rejected("API").blocks(&["UI"])).unwrap();
        registry.register(contract("UI")).unwrap();
        registry.verify_contract_fulfillment("API", &[]).await.unwrap();

        assert!(registry.request_waiver("UI", "n/a", "qa").is_err());
        let waiver = registry.request_waiver("API", "known flake", "qa").unwrap();
        assert!(registry.is_blocked("UI"));

        registry.resolve_negotiation(&waiver.id, true).unwrap();
        assert!(!registry.is_blocked("UI"));
        assert_eq!(registry.get_executable_contracts(), vec!["UI"]);
        assert!(matches!(
            registry.resolve_negotiation(&waiver.id, true),
            Err(ContractError::NegotiationClosed(_))
        ));
    }

    #[test]
    fn test_amendment_versions_and_history() {
        let registry = ContractRegistry::new();
        registry
            .register(contract("API").with_specification(json!({"properties": {"id": {"type": "string"}}})))
            .unwrap();

        let additive = registry
            .amend(
                "API",
                ContractAmendment::new("add total").specification(json!({
                    "properties": {"id": {"type": "string"}, "total": {"type": "number"}}
                })),
            )
            .unwrap();
        assert_eq!(additive.change, ChangeKind::Additive);
        assert!(!additive.reacceptance_required);
        assert_eq!(additive.contract.schema_version, SchemaVersion::new(1, 1));
        assert_eq!(additive.contract.state, ContractState::Accepted);

        let breaking = registry
            .amend(
                "API",
                ContractAmendment::new("drop id").specification(json!({"properties": {"total": {"type": "number"}}})),
            )
            .unwrap();
        assert_eq!(breaking.change, ChangeKind::Breaking);
        assert!(breaking.reacceptance_required);
        assert_eq!(breaking.contract.schema_version, SchemaVersion::new(2, 0));
        assert_eq!(breaking.contract.contract_version, 3);
        assert_eq!(registry.state("API"), Some(ContractState::Amended));
        assert_eq!(registry.history("API").len(), 2);
    }

    #[test]
    fn test_negotiated_amendment_is_accepted() {
        let registry = ContractRegistry::new();
        registry
            .register(UniversalContract::new("API", "t", "n", "p", "c").with_state(ContractState::Proposed))
            .unwrap();

        let record = registry
            .negotiate("API", ContractAmendment::new("relax").blocking(false), "frontend")
            .unwrap();
        assert_eq!(registry.state("API"), Some(ContractState::Negotiating));

        registry.resolve_negotiation(&record.id, true).unwrap();
        let contract = registry.get("API").unwrap();
        assert_eq!(contract.state, ContractState::Accepted);
        assert!(!contract.is_blocking);
        assert_eq!(registry.negotiations("API").len(), 1);
    }

    #[test]
    fn test_rejected_negotiation_restores_state() {
        let registry = ContractRegistry::new();
        registry
            .register(UniversalContract::new("API", "t", "n", "p", "c").with_state(ContractState::Proposed))
            .unwrap();
        let record = registry.negotiate("API", ContractAmendment::new("x"), "fe").unwrap();
        registry.resolve_negotiation(&record.id, false).unwrap();
        assert_eq!(registry.state("API"), Some(ContractState::Proposed));
        assert!(registry.history("API").is_empty());
    }

    #[test]
    fn test_amendment_cycle_is_rejected() {
        let registry = ContractRegistry::new();
        registry.register(contract("A")).unwrap();
        registry.register(contract("B").depends_on(&["A"])).unwrap();
        let err = registry
            .amend("A", ContractAmendment::new("loop").depends_on(&["B"]))
            .unwrap_err();
        assert!(matches!(err, ContractError::Cycle(_)));
        assert!(registry.get("A").unwrap().depends_on.is_empty());
    }

    #[tokio::test]
    async fn test_late_breach_invalidates_descendants() {
        let registry = ContractRegistry::new();
        registry.register(approved("API").blocks(&["UI"])).unwrap();
        registry.register(approved("UI").blocks(&["E2E"])).unwrap();
        registry.register(contract("E2E")).unwrap();
        registry.verify_contract_fulfillment("API", &[]).await.unwrap();

        let resolution = registry
            .handle_late_breach("API", Breach::new("prod incident", "monitoring"))
            .unwrap();
        assert_eq!(resolution.previous_state, ContractState::Verified);
        assert_eq!(resolution.invalidated_contracts, vec!["UI", "E2E"]);
        assert!(registry.is_blocked("E2E"));
        assert_eq!(registry.breaches("API")[0].breach.detected_by, "monitoring");

        assert!(registry
            .handle_late_breach("UI", Breach::new("x", "y"))
            .is_err());
    }

    #[test]
    fn test_execution_plan_layers() {
        let registry = ContractRegistry::new();
        registry.register(contract("SPEC")).unwrap();
        registry.register(contract("API").depends_on(&["SPEC"])).unwrap();
        registry.register(contract("DB").depends_on(&["SPEC"])).unwrap();
        registry.register(contract("UI").depends_on(&["API"])).unwrap();
        assert_eq!(
            registry.get_execution_plan(),
            vec![
                vec!["SPEC".to_string()],
                vec!["API".to_string(), "DB".to_string()],
                vec!["UI".to_string()],
            ]
        );
    }
}
