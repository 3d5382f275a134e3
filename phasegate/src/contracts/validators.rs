//! Pluggable criterion validators.
//!
//! A [`Validator`] evaluates one [`AcceptanceCriterion`] against the evidence
//! a node produced. Validators are looked up by name in a
//! [`ValidatorRegistry`]; the registry never guesses, so a criterion naming
//! an unknown validator is handled by the verification pass.

use super::{AcceptanceCriterion, UniversalContract};
use crate::artifacts::{Artifact, ArtifactRole, ArtifactStore};
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Inputs available to a validator.
#[derive(Clone, Copy)]
pub struct ValidationContext<'a> {
    /// Contract under verification.
    pub contract: &'a UniversalContract,
    /// Artifacts submitted as evidence.
    pub artifacts: &'a [Artifact],
    /// Store holding the artifact content, if any.
    pub store: Option<&'a ArtifactStore>,
    /// Output payload of the producing node, if any.
    pub output: Option<&'a Value>,
}

impl fmt::Debug for ValidationContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidationContext")
            .field("contract", &self.contract.id)
            .field("artifacts", &self.artifacts.len())
            .field("store", &self.store.map(ArtifactStore::root))
            .field("has_output", &self.output.is_some())
            .finish()
    }
}

/// What a validator concluded about a criterion.
#[derive(Debug, Clone, PartialEq)]
pub struct CriterionOutcome {
    /// Whether the criterion holds.
    pub passed: bool,
    /// Score in `[0, 1]`.
    pub score: f64,
    /// Supporting evidence (artifact ids, matched values).
    pub evidence: Vec<String>,
    /// Explanation.
    pub message: String,
}

impl CriterionOutcome {
    /// A passing outcome with score 1.
    #[must_use]
    pub fn pass(message: impl Into<String>) -> Self {
        Self {
            passed: true,
            score: 1.0,
            evidence: Vec::new(),
            message: message.into(),
        }
    }

    /// A failing outcome with score 0.
    #[must_use]
    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            passed: false,
            score: 0.0,
            evidence: Vec::new(),
            message: message.into(),
        }
    }

    /// Attaches evidence.
    #[must_use]
    pub fn with_evidence(mut self, evidence: Vec<String>) -> Self {
        self.evidence = evidence;
        self
    }

    /// Overrides the score, clamped to `[0, 1]`.
    #[must_use]
    pub fn with_score(mut self, score: f64) -> Self {
        self.score = score.clamp(0.0, 1.0);
        self
    }
}

/// Capability interface for criterion validators.
#[async_trait]
pub trait Validator: Send + Sync {
    /// Name criteria use to select this validator.
    fn name(&self) -> &str;

    /// Evaluates a criterion.
    async fn validate(
        &self,
        criterion: &AcceptanceCriterion,
        ctx: &ValidationContext<'_>,
    ) -> CriterionOutcome;
}

/// Named validator implementations.
#[derive(Clone, Default)]
pub struct ValidatorRegistry {
    validators: HashMap<String, Arc<dyn Validator>>,
}

impl fmt::Debug for ValidatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidatorRegistry")
            .field("validators", &self.names())
            .finish()
    }
}

impl ValidatorRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with the built-in validators.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ArtifactExists));
        registry.register(Arc::new(ArtifactIntegrity));
        registry.register(Arc::new(ContentMatches));
        registry.register(Arc::new(OutputField));
        registry.register(Arc::new(ManualApproval));
        registry
    }

    /// Registers a validator, replacing any with the same name.
    pub fn register(&mut self, validator: Arc<dyn Validator>) {
        self.validators.insert(validator.name().to_string(), validator);
    }

    /// Looks up a validator by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Validator>> {
        self.validators.get(name).cloned()
    }

    /// Returns true if a validator with the name is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.validators.contains_key(name)
    }

    /// Returns the registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.validators.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Selects the submitted artifacts a criterion refers to.
///
/// Recognised parameters: `role`, `name`, `media_type`.
fn select_artifacts<'a>(criterion: &AcceptanceCriterion, artifacts: &'a [Artifact]) -> Vec<&'a Artifact> {
    let role: Option<ArtifactRole> = criterion
        .parameters
        .get("role")
        .and_then(|r| serde_json::from_value(r.clone()).ok());
    let name = criterion.param_str("name");
    let media_type = criterion.param_str("media_type");

    artifacts
        .iter()
        .filter(|a| role.map_or(true, |r| a.role == r))
        .filter(|a| name.map_or(true, |n| a.name.as_deref() == Some(n)))
        .filter(|a| media_type.map_or(true, |m| a.media_type == m))
        .collect()
}

fn ids(artifacts: &[&Artifact]) -> Vec<String> {
    artifacts.iter().map(|a| a.id.clone()).collect()
}

/// `artifact_exists`: at least `min_count` (default 1) matching artifacts were submitted.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArtifactExists;

#[async_trait]
impl Validator for ArtifactExists {
    fn name(&self) -> &str {
        "artifact_exists"
    }

    async fn validate(
        &self,
        criterion: &AcceptanceCriterion,
        ctx: &ValidationContext<'_>,
    ) -> CriterionOutcome {
        let selected = select_artifacts(criterion, ctx.artifacts);
        let min_count = criterion
            .parameters
            .get("min_count")
            .and_then(Value::as_u64)
            .unwrap_or(1);
        let found = selected.len() as u64;

        if found >= min_count {
            CriterionOutcome::pass(format!("{found} matching artifact(s)")).with_evidence(ids(&selected))
        } else {
            CriterionOutcome::fail(format!("expected at least {min_count} artifact(s), found {found}"))
                .with_evidence(ids(&selected))
        }
    }
}

/// `artifact_integrity`: every matching artifact verifies against the store.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArtifactIntegrity;

#[async_trait]
impl Validator for ArtifactIntegrity {
    fn name(&self) -> &str {
        "artifact_integrity"
    }

    #[allow(clippy::cast_precision_loss)]
    async fn validate(
        &self,
        criterion: &AcceptanceCriterion,
        ctx: &ValidationContext<'_>,
    ) -> CriterionOutcome {
        let Some(store) = ctx.store else {
            return CriterionOutcome::fail("no artifact store configured");
        };
        let selected = select_artifacts(criterion, ctx.artifacts);
        if selected.is_empty() {
            return CriterionOutcome::fail("no artifacts to verify");
        }

        let corrupted: Vec<&Artifact> = selected.iter().copied().filter(|a| !store.verify(a)).collect();
        if corrupted.is_empty() {
            CriterionOutcome::pass(format!("{} artifact(s) intact", selected.len())).with_evidence(ids(&selected))
        } else {
            let intact = selected.len() - corrupted.len();
            CriterionOutcome::fail(format!("{} artifact(s) failed integrity checks", corrupted.len()))
                .with_evidence(ids(&corrupted))
                .with_score(intact as f64 / selected.len() as f64)
        }
    }
}

/// `content_matches`: the regex in `pattern` matches the text of a matching artifact.
///
/// Content is read through [`ArtifactStore::read_verified`], so corrupted
/// artifacts never match.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentMatches;

#[async_trait]
impl Validator for ContentMatches {
    fn name(&self) -> &str {
        "content_matches"
    }

    async fn validate(
        &self,
        criterion: &AcceptanceCriterion,
        ctx: &ValidationContext<'_>,
    ) -> CriterionOutcome {
        let Some(pattern) = criterion.param_str("pattern") else {
            return CriterionOutcome::fail("missing 'pattern' parameter");
        };
        let regex = match Regex::new(pattern) {
            Ok(regex) => regex,
            Err(err) => return CriterionOutcome::fail(format!("invalid pattern: {err}")),
        };
        let Some(store) = ctx.store else {
            return CriterionOutcome::fail("no artifact store configured");
        };

        let mut problems = Vec::new();
        for artifact in select_artifacts(criterion, ctx.artifacts) {
            match store.read_verified(artifact) {
                Ok(bytes) => {
                    if regex.is_match(&String::from_utf8_lossy(&bytes)) {
                        return CriterionOutcome::pass(format!("'{pattern}' matched"))
                            .with_evidence(vec![artifact.id.clone()]);
                    }
                }
                Err(err) => problems.push(format!("{}: {err}", artifact.id)),
            }
        }

        let message = if problems.is_empty() {
            format!("no artifact matched '{pattern}'")
        } else {
            format!("no artifact matched '{pattern}' ({})", problems.join("; "))
        };
        CriterionOutcome::fail(message)
    }
}

/// `output_field`: the dotted `path` exists in the node output and, when
/// `equals` is given, has that value.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputField;

fn lookup<'a>(mut value: &'a Value, path: &str) -> Option<&'a Value> {
    for segment in path.split('.').filter(|s| !s.is_empty()) {
        value = match value {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(value)
}

#[async_trait]
impl Validator for OutputField {
    fn name(&self) -> &str {
        "output_field"
    }

    async fn validate(
        &self,
        criterion: &AcceptanceCriterion,
        ctx: &ValidationContext<'_>,
    ) -> CriterionOutcome {
        let Some(path) = criterion.param_str("path") else {
            return CriterionOutcome::fail("missing 'path' parameter");
        };
        let Some(output) = ctx.output else {
            return CriterionOutcome::fail("no node output available");
        };
        let Some(actual) = lookup(output, path).filter(|v| !v.is_null()) else {
            return CriterionOutcome::fail(format!("output has no field '{path}'"));
        };

        match criterion.parameters.get("equals") {
            Some(expected) if expected != actual => CriterionOutcome::fail(format!(
                "field '{path}' is {actual}, expected {expected}"
            )),
            _ => CriterionOutcome::pass(format!("field '{path}' present")).with_evidence(vec![actual.to_string()]),
        }
    }
}

/// `manual`: passes only when the `approved` parameter is true.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManualApproval;

#[async_trait]
impl Validator for ManualApproval {
    fn name(&self) -> &str {
        "manual"
    }

    async fn validate(
        &self,
        criterion: &AcceptanceCriterion,
        _ctx: &ValidationContext<'_>,
    ) -> CriterionOutcome {
        let approved = criterion
            .parameters
            .get("approved")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let reviewer = criterion.param_str("approved_by").unwrap_or("reviewer");
        if approved {
            CriterionOutcome::pass(format!("approved by {reviewer}"))
        } else {
            CriterionOutcome::fail("awaiting manual approval")
        }
    }
}
