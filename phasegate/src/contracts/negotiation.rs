//! Negotiation records: proposed amendments and breach waivers.

use super::{AcceptanceCriterion, ContractState, UniversalContract};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A change to a contract's terms. Unset fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContractAmendment {
    /// New specification payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specification: Option<Value>,
    /// New acceptance criteria.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acceptance_criteria: Option<Vec<AcceptanceCriterion>>,
    /// New dependency list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<Vec<String>>,
    /// New enables list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enables: Option<Vec<String>>,
    /// New blocks list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocks: Option<Vec<String>>,
    /// New blocking flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_blocking: Option<bool>,
    /// Forces re-acceptance even for compatible changes.
    #[serde(default)]
    pub requires_reacceptance: bool,
    /// Why the contract is being amended.
    pub reason: String,
}

impl ContractAmendment {
    /// Creates an empty amendment with a reason.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            ..Self::default()
        }
    }

    /// Replaces the specification.
    #[must_use]
    pub fn specification(mut self, specification: Value) -> Self {
        self.specification = Some(specification);
        self
    }

    /// Replaces the acceptance criteria.
    #[must_use]
    pub fn criteria(mut self, criteria: Vec<AcceptanceCriterion>) -> Self {
        self.acceptance_criteria = Some(criteria);
        self
    }

    /// Replaces the dependency list.
    #[must_use]
    pub fn depends_on(mut self, ids: &[&str]) -> Self {
        self.depends_on = Some(ids.iter().map(|s| (*s).to_string()).collect());
        self
    }

    /// Replaces the blocking flag.
    #[must_use]
    pub fn blocking(mut self, is_blocking: bool) -> Self {
        self.is_blocking = Some(is_blocking);
        self
    }

    /// Requires the consumer to accept the amended contract again.
    #[must_use]
    pub fn require_reacceptance(mut self) -> Self {
        self.requires_reacceptance = true;
        self
    }

    /// Returns true if the amendment touches graph relations.
    #[must_use]
    pub fn changes_relations(&self) -> bool {
        self.depends_on.is_some() || self.enables.is_some() || self.blocks.is_some()
    }

    /// Returns a copy of `contract` with the amendment applied.
    #[must_use]
    pub fn apply_to(&self, contract: &UniversalContract) -> UniversalContract {
        let mut amended = contract.clone();
        if let Some(spec) = &self.specification {
            amended.specification = spec.clone();
        }
        if let Some(criteria) = &self.acceptance_criteria {
            amended.acceptance_criteria = criteria.clone();
        }
        if let Some(deps) = &self.depends_on {
            amended.depends_on = deps.clone();
        }
        if let Some(enables) = &self.enables {
            amended.enables = enables.clone();
        }
        if let Some(blocks) = &self.blocks {
            amended.blocks = blocks.clone();
        }
        if let Some(blocking) = self.is_blocking {
            amended.is_blocking = blocking;
        }
        amended
    }
}

/// What is being negotiated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NegotiationKind {
    /// A change to the contract terms.
    Amendment(ContractAmendment),
    /// Acceptance of a breach without a fix.
    Waiver {
        /// Justification.
        reason: String,
    },
}

/// Negotiation status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegotiationStatus {
    /// Awaiting a decision.
    Open,
    /// Accepted and applied.
    Accepted,
    /// Turned down.
    Rejected,
}

/// A negotiation over one contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NegotiationRecord {
    /// Negotiation id.
    pub id: String,
    /// Contract under negotiation.
    pub contract_id: String,
    /// What is being negotiated.
    pub kind: NegotiationKind,
    /// Current status.
    pub status: NegotiationStatus,
    /// Contract state when the negotiation opened.
    pub prior_state: ContractState,
    /// Who opened the negotiation.
    pub proposed_by: String,
    /// Opening time (ISO 8601).
    pub created_at: String,
    /// Resolution time (ISO 8601).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<String>,
}

impl NegotiationRecord {
    pub(crate) fn open(
        contract: &UniversalContract,
        kind: NegotiationKind,
        proposed_by: impl Into<String>,
    ) -> Self {
        Self {
            id: crate::utils::prefixed_id("neg"),
            contract_id: contract.id.clone(),
            kind,
            status: NegotiationStatus::Open,
            prior_state: contract.state,
            proposed_by: proposed_by.into(),
            created_at: crate::utils::iso_timestamp(),
            resolved_at: None,
        }
    }

    /// Returns true while awaiting a decision.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.status == NegotiationStatus::Open
    }

    pub(crate) fn close(&mut self, accepted: bool) {
        self.status = if accepted {
            NegotiationStatus::Accepted
        } else {
            NegotiationStatus::Rejected
        };
        self.resolved_at = Some(crate::utils::iso_timestamp());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_amendment_applies_only_set_fields() {
        let contract = UniversalContract::new("A", "t", "n", "p", "c")
            .with_specification(json!({"properties": {}}))
            .depends_on(&["SPEC"]);
        let amendment = ContractAmendment::new("relax").blocking(false);
        let amended = amendment.apply_to(&contract);

        assert!(!amended.is_blocking);
        assert_eq!(amended.depends_on, vec!["SPEC".to_string()]);
        assert_eq!(amended.specification, contract.specification);
        assert!(!amendment.changes_relations());
        assert!(ContractAmendment::new("x").depends_on(&[]).changes_relations());
    }

    #[test]
    fn test_record_lifecycle() {
        let contract = UniversalContract::new("A", "t", "n", "p", "c").with_state(ContractState::Breached);
        let mut record = NegotiationRecord::open(
            &contract,
            NegotiationKind::Waiver {
                reason: "known flake".into(),
            },
            "qa",
        );
        assert!(record.id.starts_with("neg-"));
        assert!(record.is_open());
        assert_eq!(record.prior_state, ContractState::Breached);

        record.close(false);
        assert_eq!(record.status, NegotiationStatus::Rejected);
        assert!(record.resolved_at.is_some());

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["kind"]["kind"], "waiver");
    }
}
