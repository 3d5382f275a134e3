//! Contract data model: lifecycle, criteria, versions and verification results.

use crate::errors::{ContractError, TransitionError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Contract lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractState {
    /// Being written by the provider.
    #[default]
    Draft,
    /// Offered to the consumer.
    Proposed,
    /// Terms are being negotiated.
    Negotiating,
    /// Agreed; work may start once dependencies are verified.
    Accepted,
    /// Work against the contract is underway.
    InProgress,
    /// The provider claims completion; verification pending.
    Fulfilled,
    /// Every critical criterion passed.
    Verified,
    /// A critical criterion failed.
    Breached,
    /// The proposal was turned down.
    Rejected,
    /// The terms changed and need re-acceptance.
    Amended,
}

impl fmt::Display for ContractState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Draft => "draft",
            Self::Proposed => "proposed",
            Self::Negotiating => "negotiating",
            Self::Accepted => "accepted",
            Self::InProgress => "in_progress",
            Self::Fulfilled => "fulfilled",
            Self::Verified => "verified",
            Self::Breached => "breached",
            Self::Rejected => "rejected",
            Self::Amended => "amended",
        };
        f.write_str(s)
    }
}

impl ContractState {
    /// Returns true if moving from `self` to `next` is a legal transition.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        use ContractState::{
            Accepted, Amended, Breached, Draft, Fulfilled, InProgress, Negotiating, Proposed,
            Rejected, Verified,
        };
        matches!(
            (self, next),
            (Draft, Proposed | Rejected)
                | (Proposed, Negotiating | Accepted | Rejected)
                | (Negotiating, Accepted | Rejected | Proposed | Breached)
                | (Accepted, InProgress | Amended)
                | (InProgress, Fulfilled | Breached | Amended)
                | (Fulfilled, Verified | Breached)
                | (Breached, InProgress | Negotiating | Amended)
                | (Verified, Amended | Breached)
                | (Amended, Proposed | Negotiating | Accepted)
                | (Rejected, Draft)
        )
    }

    /// Validates a transition for the named contract.
    ///
    /// # Errors
    ///
    /// Returns a [`TransitionError`] if the transition is illegal.
    pub fn check_transition(&self, contract_id: &str, next: Self) -> Result<(), TransitionError> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(TransitionError::new("contract", contract_id, self, next))
        }
    }
}

/// Contract priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractPriority {
    /// Must hold for the release to ship.
    Critical,
    /// Important.
    High,
    /// Normal.
    #[default]
    Medium,
    /// Nice to have.
    Low,
}

/// Protocol-level schema version (`major.minor`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SchemaVersion {
    /// Incremented on breaking changes.
    pub major: u32,
    /// Incremented on additive changes.
    pub minor: u32,
}

impl SchemaVersion {
    /// Creates a version.
    #[must_use]
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Returns the next major version.
    #[must_use]
    pub const fn bump_major(self) -> Self {
        Self::new(self.major + 1, 0)
    }

    /// Returns the next minor version.
    #[must_use]
    pub const fn bump_minor(self) -> Self {
        Self::new(self.major, self.minor + 1)
    }

    /// Returns true if both versions share a major version.
    #[must_use]
    pub const fn is_compatible_with(&self, other: &Self) -> bool {
        self.major == other.major
    }
}

impl Default for SchemaVersion {
    fn default() -> Self {
        Self::new(1, 0)
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for SchemaVersion {
    type Err = ContractError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ContractError::InvalidDocument(format!("invalid schema version '{s}'"));
        let mut parts = s.trim().split('.');
        let major = parts.next().and_then(|p| p.parse().ok()).ok_or_else(invalid)?;
        let minor = match parts.next() {
            Some(p) => p.parse().map_err(|_| invalid())?,
            None => 0,
        };
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(Self::new(major, minor))
    }
}

impl TryFrom<String> for SchemaVersion {
    type Error = ContractError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SchemaVersion> for String {
    fn from(value: SchemaVersion) -> Self {
        value.to_string()
    }
}

/// A measurable acceptance criterion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcceptanceCriterion {
    /// Criterion id, unique within the contract.
    pub id: String,
    /// What the criterion checks.
    pub description: String,
    /// Name of the validator that evaluates it.
    pub validator: String,
    /// Validator parameters.
    #[serde(default)]
    pub parameters: Value,
    /// A failed critical criterion breaches the contract.
    #[serde(default = "default_critical")]
    pub critical: bool,
}

fn default_critical() -> bool {
    true
}

impl AcceptanceCriterion {
    /// Creates a critical criterion.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        validator: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            validator: validator.into(),
            parameters: Value::Null,
            critical: true,
        }
    }

    /// Sets the validator parameters.
    #[must_use]
    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }

    /// Marks the criterion as non-critical.
    #[must_use]
    pub fn non_critical(mut self) -> Self {
        self.critical = false;
        self
    }

    /// Returns a string parameter.
    #[must_use]
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(Value::as_str)
    }
}

/// Outcome of evaluating a single criterion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionResult {
    /// Criterion id.
    pub criterion_id: String,
    /// Validator used.
    pub validator: String,
    /// Whether the criterion passed.
    pub passed: bool,
    /// Score in `[0, 1]`.
    pub score: f64,
    /// Evidence gathered by the validator.
    #[serde(default)]
    pub evidence: Vec<String>,
    /// Human-readable explanation.
    pub message: String,
    /// Whether the criterion was critical.
    pub critical: bool,
    /// True when the validator was unavailable and the criterion was skipped.
    #[serde(default)]
    pub skipped: bool,
}

/// A suggested fix for a failed criterion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemediationSuggestion {
    /// Criterion the suggestion addresses.
    pub criterion_id: String,
    /// Short title.
    pub title: String,
    /// Ordered fix steps.
    pub steps: Vec<String>,
}

/// Immutable result of verifying a contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    /// Verified contract.
    pub contract_id: String,
    /// AND of all critical criteria.
    pub passed: bool,
    /// Per-criterion results in declaration order.
    pub results: Vec<CriterionResult>,
    /// Suggestions for failed criteria.
    #[serde(default)]
    pub remediation: Vec<RemediationSuggestion>,
    /// When verification finished (ISO 8601).
    pub verified_at: String,
    /// Wall-clock verification time.
    pub duration_ms: f64,
}

impl VerificationResult {
    /// Returns the ids of failed critical criteria.
    #[must_use]
    pub fn failed_critical(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| r.critical && !r.passed)
            .map(|r| r.criterion_id.as_str())
            .collect()
    }

    /// Returns the mean score of non-skipped criteria.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn score(&self) -> f64 {
        let scored: Vec<f64> = self
            .results
            .iter()
            .filter(|r| !r.skipped)
            .map(|r| r.score)
            .collect();
        if scored.is_empty() {
            1.0
        } else {
            scored.iter().sum::<f64>() / scored.len() as f64
        }
    }
}

/// A reported contract breach.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Breach {
    /// Why the contract is breached.
    pub reason: String,
    /// Who or what detected the breach.
    pub detected_by: String,
    /// Failed criterion ids, if known.
    #[serde(default)]
    pub criteria: Vec<String>,
}

impl Breach {
    /// Creates a breach report.
    #[must_use]
    pub fn new(reason: impl Into<String>, detected_by: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            detected_by: detected_by.into(),
            criteria: Vec::new(),
        }
    }

    /// Lists the failed criteria.
    #[must_use]
    pub fn with_criteria(mut self, criteria: Vec<String>) -> Self {
        self.criteria = criteria;
        self
    }
}

/// A breach as recorded in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreachRecord {
    /// Breached contract.
    pub contract_id: String,
    /// Contract version at the time of the breach.
    pub contract_version: u32,
    /// Breach details.
    pub breach: Breach,
    /// When it was recorded (ISO 8601).
    pub recorded_at: String,
}

/// An accepted waiver of a breach.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Waiver {
    /// Negotiation that granted the waiver.
    pub negotiation_id: String,
    /// Justification.
    pub reason: String,
    /// When it was granted (ISO 8601).
    pub granted_at: String,
}

/// A quality or interface agreement between two phases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniversalContract {
    /// Contract id.
    pub id: String,
    /// Contract type tag, e.g. `api_endpoint`.
    #[serde(rename = "type")]
    pub contract_type: String,
    /// Human-readable name.
    pub name: String,
    /// Providing phase or persona.
    pub provider_id: String,
    /// Consuming phase or persona.
    pub consumer_id: String,
    /// Specification payload; JSON-schema-like `properties`/`required` are diffed.
    #[serde(default)]
    pub specification: Value,
    /// Acceptance criteria.
    #[serde(default)]
    pub acceptance_criteria: Vec<AcceptanceCriterion>,
    /// Lifecycle state.
    #[serde(default)]
    pub state: ContractState,
    /// Contracts that must be verified first.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Contracts this one makes possible.
    #[serde(default)]
    pub enables: Vec<String>,
    /// Contracts held back while this one is breached.
    #[serde(default)]
    pub blocks: Vec<String>,
    /// A breach halts dependent work when true.
    #[serde(default = "default_blocking")]
    pub is_blocking: bool,
    /// Priority.
    #[serde(default)]
    pub priority: ContractPriority,
    /// How verification is carried out, e.g. `automated`.
    #[serde(default = "default_verification_method")]
    pub verification_method: String,
    /// Protocol-level schema version.
    #[serde(default)]
    pub schema_version: SchemaVersion,
    /// Amendment counter.
    #[serde(default = "default_contract_version")]
    pub contract_version: u32,
    /// Latest verification result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_result: Option<VerificationResult>,
    /// Active breach waiver.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waiver: Option<Waiver>,
}

fn default_blocking() -> bool {
    true
}

fn default_verification_method() -> String {
    "automated".to_string()
}

fn default_contract_version() -> u32 {
    1
}

impl UniversalContract {
    /// Creates a draft, blocking contract.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        contract_type: impl Into<String>,
        name: impl Into<String>,
        provider_id: impl Into<String>,
        consumer_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            contract_type: contract_type.into(),
            name: name.into(),
            provider_id: provider_id.into(),
            consumer_id: consumer_id.into(),
            specification: Value::Null,
            acceptance_criteria: Vec::new(),
            state: ContractState::Draft,
            depends_on: Vec::new(),
            enables: Vec::new(),
            blocks: Vec::new(),
            is_blocking: true,
            priority: ContractPriority::Medium,
            verification_method: default_verification_method(),
            schema_version: SchemaVersion::default(),
            contract_version: 1,
            verification_result: None,
            waiver: None,
        }
    }

    /// Parses a contract document from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ContractError::InvalidDocument`] if the JSON is malformed or
    /// fails [`UniversalContract::validate`].
    pub fn from_json_str(input: &str) -> Result<Self, ContractError> {
        let contract: Self = serde_json::from_str(input)
            .map_err(|err| ContractError::InvalidDocument(err.to_string()))?;
        contract.validate()?;
        Ok(contract)
    }

    /// Parses a contract document from YAML.
    ///
    /// # Errors
    ///
    /// See [`UniversalContract::from_json_str`].
    pub fn from_yaml_str(input: &str) -> Result<Self, ContractError> {
        let contract: Self = serde_yaml::from_str(input)
            .map_err(|err| ContractError::InvalidDocument(err.to_string()))?;
        contract.validate()?;
        Ok(contract)
    }

    /// Serializes the contract document as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ContractError::InvalidDocument`] if serialization fails.
    pub fn to_json(&self) -> Result<String, ContractError> {
        serde_json::to_string_pretty(self).map_err(|err| ContractError::InvalidDocument(err.to_string()))
    }

    /// Checks the document-level invariants.
    ///
    /// # Errors
    ///
    /// Returns [`ContractError::InvalidDocument`] for an empty id, duplicate
    /// or empty criterion ids, or a self-referencing relation.
    pub fn validate(&self) -> Result<(), ContractError> {
        if self.id.trim().is_empty() {
            return Err(ContractError::InvalidDocument("contract id must not be empty".into()));
        }
        let mut seen = std::collections::HashSet::new();
        for criterion in &self.acceptance_criteria {
            if criterion.id.trim().is_empty() {
                return Err(ContractError::InvalidDocument(format!(
                    "contract '{}' has a criterion with an empty id",
                    self.id
                )));
            }
            if !seen.insert(criterion.id.as_str()) {
                return Err(ContractError::InvalidDocument(format!(
                    "contract '{}' declares criterion '{}' twice",
                    self.id, criterion.id
                )));
            }
        }
        let self_ref = self
            .depends_on
            .iter()
            .chain(&self.enables)
            .chain(&self.blocks)
            .any(|other| other == &self.id);
        if self_ref {
            return Err(ContractError::InvalidDocument(format!(
                "contract '{}' references itself",
                self.id
            )));
        }
        Ok(())
    }

    /// Sets the initial state.
    #[must_use]
    pub fn with_state(mut self, state: ContractState) -> Self {
        self.state = state;
        self
    }

    /// Sets the specification payload.
    #[must_use]
    pub fn with_specification(mut self, specification: Value) -> Self {
        self.specification = specification;
        self
    }

    /// Adds an acceptance criterion.
    #[must_use]
    pub fn with_criterion(mut self, criterion: AcceptanceCriterion) -> Self {
        self.acceptance_criteria.push(criterion);
        self
    }

    /// Adds dependencies.
    #[must_use]
    pub fn depends_on(mut self, ids: &[&str]) -> Self {
        self.depends_on.extend(ids.iter().map(|s| (*s).to_string()));
        self
    }

    /// Adds enabled contracts.
    #[must_use]
    pub fn enables(mut self, ids: &[&str]) -> Self {
        self.enables.extend(ids.iter().map(|s| (*s).to_string()));
        self
    }

    /// Adds blocked contracts.
    #[must_use]
    pub fn blocks(mut self, ids: &[&str]) -> Self {
        self.blocks.extend(ids.iter().map(|s| (*s).to_string()));
        self
    }

    /// Sets the blocking flag.
    #[must_use]
    pub fn blocking(mut self, is_blocking: bool) -> Self {
        self.is_blocking = is_blocking;
        self
    }

    /// Sets the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: ContractPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the schema version.
    #[must_use]
    pub fn with_schema_version(mut self, version: SchemaVersion) -> Self {
        self.schema_version = version;
        self
    }

    /// Returns true if the contract is breached, blocking and not waived.
    #[must_use]
    pub fn is_blocking_breach(&self) -> bool {
        self.state == ContractState::Breached && self.is_blocking && self.waiver.is_none()
    }

    /// Returns true if dependents may rely on this contract.
    ///
    /// Verified contracts qualify, as do breaches that are non-blocking or
    /// have been waived.
    #[must_use]
    pub fn is_satisfied(&self) -> bool {
        match self.state {
            ContractState::Verified => true,
            ContractState::Breached => !self.is_blocking || self.waiver.is_some(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lifecycle_happy_path() {
        let path = [
            ContractState::Draft,
            ContractState::Proposed,
            ContractState::Negotiating,
            ContractState::Accepted,
            ContractState::InProgress,
            ContractState::Fulfilled,
            ContractState::Verified,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_illegal_contract_transitions() {
        assert!(!ContractState::Draft.can_transition_to(ContractState::Verified));
        assert!(!ContractState::Fulfilled.can_transition_to(ContractState::Accepted));
        let err = ContractState::Rejected
            .check_transition("API_001", ContractState::Accepted)
            .unwrap_err();
        assert_eq!(err.machine, "contract");
    }

    #[test]
    fn test_schema_version_parse_and_serde() {
        let v: SchemaVersion = "2.3".parse().unwrap();
        assert_eq!(v, SchemaVersion::new(2, 3));
        assert_eq!("4".parse::<SchemaVersion>().unwrap(), SchemaVersion::new(4, 0));
        assert!("1.2.3".parse::<SchemaVersion>().is_err());
        assert!("x".parse::<SchemaVersion>().is_err());

        assert_eq!(serde_json::to_value(v).unwrap(), json!("2.3"));
        assert_eq!(v.bump_major(), SchemaVersion::new(3, 0));
        assert_eq!(v.bump_minor(), SchemaVersion::new(2, 4));
        assert!(v.is_compatible_with(&SchemaVersion::new(2, 0)));
    }

    #[test]
    fn test_contract_document_parsing() {
        let contract = UniversalContract::from_json_str(
            r#"{
                "id": "API_001",
                "type": "api_endpoint",
                "name": "Orders API",
                "provider_id": "backend",
                "consumer_id": "frontend",
                "specification": {"properties": {"id": {"type": "string"}}},
                "acceptance_criteria": [
                    {"id": "c1", "description": "schema", "validator": "output_field",
                     "parameters": {"path": "openapi"}}
                ],
                "state": "accepted",
                "schema_version": "1.2",
                "priority": "high"
            }"#,
        )
        .unwrap();

        assert_eq!(contract.state, ContractState::Accepted);
        assert!(contract.is_blocking);
        assert!(contract.acceptance_criteria[0].critical);
        assert_eq!(contract.schema_version, SchemaVersion::new(1, 2));
        assert_eq!(contract.contract_version, 1);
        assert_eq!(contract.priority, ContractPriority::High);
    }

    #[test]
    fn test_contract_document_rejects_duplicates() {
        let err = UniversalContract::from_json_str(
            r#"{"id": "A", "type": "t", "name": "n", "provider_id": "p", "consumer_id": "c",
                "acceptance_criteria": [
                    {"id": "c1", "description": "d", "validator": "manual"},
                    {"id": "c1", "description": "d", "validator": "manual"}
                ]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ContractError::InvalidDocument(_)));

        let self_ref = UniversalContract::new("A", "t", "n", "p", "c").depends_on(&["A"]);
        assert!(self_ref.validate().is_err());
    }

    #[test]
    fn test_satisfaction_rules() {
        let base = UniversalContract::new("A", "t", "n", "p", "c");
        assert!(!base.is_satisfied());
        assert!(base.clone().with_state(ContractState::Verified).is_satisfied());

        let breached = base.clone().with_state(ContractState::Breached);
        assert!(breached.is_blocking_breach());
        assert!(!breached.is_satisfied());
        assert!(breached.clone().blocking(false).is_satisfied());

        let mut waived = breached;
        waived.waiver = Some(Waiver {
            negotiation_id: "neg-1".into(),
            reason: "accepted risk".into(),
            granted_at: crate::utils::iso_timestamp(),
        });
        assert!(waived.is_satisfied());
        assert!(!waived.is_blocking_breach());
    }

    #[test]
    fn test_verification_result_helpers() {
        let result = VerificationResult {
            contract_id: "A".into(),
            passed: false,
            results: vec![
                CriterionResult {
                    criterion_id: "c1".into(),
                    validator: "manual".into(),
                    passed: false,
                    score: 0.0,
                    evidence: vec![],
                    message: "not approved".into(),
                    critical: true,
                    skipped: false,
                },
                CriterionResult {
                    criterion_id: "c2".into(),
                    validator: "missing".into(),
                    passed: true,
                    score: 0.0,
                    evidence: vec![],
                    message: "skipped".into(),
                    critical: false,
                    skipped: true,
                },
            ],
            remediation: vec![],
            verified_at: crate::utils::iso_timestamp(),
            duration_ms: 1.0,
        };
        assert_eq!(result.failed_critical(), vec!["c1"]);
        assert!(result.score().abs() < f64::EPSILON);
    }
}
