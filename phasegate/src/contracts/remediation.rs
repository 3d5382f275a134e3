//! Remediation catalog mapping validators to fix steps.

use super::{CriterionResult, RemediationSuggestion};
use std::collections::HashMap;

/// Remediation guidance for failures reported by one validator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemediationEntry {
    /// Validator the entry applies to.
    pub validator: String,
    /// Short title.
    pub title: String,
    /// Ordered fix steps.
    pub steps: Vec<String>,
}

impl RemediationEntry {
    /// Creates an entry.
    #[must_use]
    pub fn new(validator: impl Into<String>, title: impl Into<String>, steps: &[&str]) -> Self {
        Self {
            validator: validator.into(),
            title: title.into(),
            steps: steps.iter().map(|s| (*s).to_string()).collect(),
        }
    }
}

/// Validator name to remediation guidance.
#[derive(Debug, Clone)]
pub struct RemediationCatalog {
    entries: HashMap<String, RemediationEntry>,
}

impl Default for RemediationCatalog {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl RemediationCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Creates a catalog preloaded with guidance for the built-in validators.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut catalog = Self::empty();
        catalog.register(RemediationEntry::new(
            "artifact_exists",
            "Required artifact missing",
            &[
                "Check that the producing node stores its deliverables in the artifact store",
                "Confirm the artifact role, name and media type match the criterion parameters",
            ],
        ));
        catalog.register(RemediationEntry::new(
            "artifact_integrity",
            "Artifact integrity check failed",
            &[
                "Regenerate the artifact from its producing node",
                "Look for processes writing into the store root outside the store API",
            ],
        ));
        catalog.register(RemediationEntry::new(
            "content_matches",
            "Artifact content does not match",
            &[
                "Inspect the artifact text against the expected pattern",
                "Update the deliverable, or amend the contract if the pattern is wrong",
            ],
        ));
        catalog.register(RemediationEntry::new(
            "output_field",
            "Node output is missing a required field",
            &[
                "Make the producing node include the field in its output payload",
                "Check the dotted path in the criterion parameters",
            ],
        ));
        catalog.register(RemediationEntry::new(
            "manual",
            "Manual approval outstanding",
            &["Ask the consumer to review the deliverable and record the approval"],
        ));
        catalog
    }

    /// Registers or replaces guidance for a validator.
    pub fn register(&mut self, entry: RemediationEntry) {
        self.entries.insert(entry.validator.clone(), entry);
    }

    /// Returns the guidance for a validator.
    #[must_use]
    pub fn get(&self, validator: &str) -> Option<&RemediationEntry> {
        self.entries.get(validator)
    }

    /// Builds a suggestion for a failed criterion.
    ///
    /// Validators without catalog guidance get a generic suggestion that
    /// repeats the validator's message.
    #[must_use]
    pub fn suggest(&self, result: &CriterionResult) -> RemediationSuggestion {
        match self.get(&result.validator) {
            Some(entry) => RemediationSuggestion {
                criterion_id: result.criterion_id.clone(),
                title: entry.title.clone(),
                steps: entry.steps.clone(),
            },
            None => RemediationSuggestion {
                criterion_id: result.criterion_id.clone(),
                title: format!("Criterion '{}' failed", result.criterion_id),
                steps: vec![
                    format!("Address the reported problem: {}", result.message),
                    format!("Re-run verification once validator '{}' can pass", result.validator),
                ],
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(validator: &str) -> CriterionResult {
        CriterionResult {
            criterion_id: "c1".into(),
            validator: validator.into(),
            passed: false,
            score: 0.0,
            evidence: vec![],
            message: "boom".into(),
            critical: true,
            skipped: false,
        }
    }

    #[test]
    fn test_known_validator_suggestion() {
        let catalog = RemediationCatalog::with_defaults();
        let suggestion = catalog.suggest(&failed("artifact_integrity"));
        assert_eq!(suggestion.title, "Artifact integrity check failed");
        assert_eq!(suggestion.criterion_id, "c1");
        assert!(!suggestion.steps.is_empty());
    }

    #[test]
    fn test_unknown_validator_falls_back() {
        let suggestion = RemediationCatalog::empty().suggest(&failed("security_scan"));
        assert!(suggestion.steps[0].contains("boom"));
        assert!(suggestion.steps[1].contains("security_scan"));
    }

    #[test]
    fn test_register_custom_entry() {
        let mut catalog = RemediationCatalog::empty();
        catalog.register(RemediationEntry::new("security_scan", "Vulnerabilities found", &["Patch"]));
        assert_eq!(catalog.suggest(&failed("security_scan")).steps, vec!["Patch"]);
    }
}
