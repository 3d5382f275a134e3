//! Compatibility checks between contract versions.

use super::{SchemaVersion, UniversalContract};
use crate::errors::ContractError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// How a contract changed between two versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// Nothing the consumer can observe changed.
    None,
    /// Only optional fields or non-critical criteria were added.
    Additive,
    /// Fields were removed, types changed or validation was tightened.
    Breaking,
}

/// Result of comparing two versions of a contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompatibilityReport {
    /// Contract id.
    pub contract_id: String,
    /// Schema version of the old contract.
    pub from_version: SchemaVersion,
    /// Schema version of the new contract.
    pub to_version: SchemaVersion,
    /// Breaking changes detected.
    pub breaking_changes: Vec<String>,
    /// Non-breaking changes.
    pub warnings: Vec<String>,
    /// True when the old contract went through a migration first.
    #[serde(default)]
    pub migrated: bool,
}

impl CompatibilityReport {
    /// True when no breaking changes were detected.
    #[must_use]
    pub fn is_compatible(&self) -> bool {
        self.breaking_changes.is_empty()
    }

    /// Classifies the change.
    #[must_use]
    pub fn change_kind(&self) -> ChangeKind {
        if !self.breaking_changes.is_empty() {
            ChangeKind::Breaking
        } else if !self.warnings.is_empty() {
            ChangeKind::Additive
        } else {
            ChangeKind::None
        }
    }

    /// Human readable summary string.
    #[must_use]
    pub fn summary(&self) -> String {
        let status = if self.is_compatible() { "compatible" } else { "breaking" };
        format!(
            "Contract diff for {} {}->{}: {} (breaking={}, warnings={}{})",
            self.contract_id,
            self.from_version,
            self.to_version,
            status,
            self.breaking_changes.len(),
            self.warnings.len(),
            if self.migrated { ", migrated" } else { "" }
        )
    }
}

/// Compares two contracts sharing a major schema version.
///
/// # Errors
///
/// Returns [`ContractError::VersionMismatch`] when the major versions differ;
/// use [`check_compatibility_with`] to supply a migration.
pub fn check_compatibility(
    old: &UniversalContract,
    new: &UniversalContract,
) -> Result<CompatibilityReport, ContractError> {
    if !old.schema_version.is_compatible_with(&new.schema_version) {
        return Err(ContractError::VersionMismatch {
            left: old.schema_version.to_string(),
            right: new.schema_version.to_string(),
        });
    }
    Ok(diff_contracts(old, new))
}

/// Compares two contracts, migrating `old` first when the majors differ.
///
/// # Errors
///
/// Returns [`ContractError::Migration`] if the migration fails and
/// [`ContractError::VersionMismatch`] if the migrated contract still has a
/// different major version.
pub fn check_compatibility_with<F>(
    old: &UniversalContract,
    new: &UniversalContract,
    migration: F,
) -> Result<CompatibilityReport, ContractError>
where
    F: FnOnce(&UniversalContract) -> Result<UniversalContract, ContractError>,
{
    if old.schema_version.is_compatible_with(&new.schema_version) {
        return Ok(diff_contracts(old, new));
    }
    let migrated = migration(old).map_err(|err| match err {
        ContractError::Migration(_) => err,
        other => ContractError::Migration(other.to_string()),
    })?;
    let mut report = check_compatibility(&migrated, new)?;
    report.from_version = old.schema_version;
    report.migrated = true;
    Ok(report)
}

/// Diffs specification fields and acceptance criteria, ignoring versions.
pub(crate) fn diff_contracts(old: &UniversalContract, new: &UniversalContract) -> CompatibilityReport {
    let mut breaking = Vec::new();
    let mut warnings = Vec::new();

    let old_fields = field_map(&old.specification);
    let new_fields = field_map(&new.specification);

    for field in old_fields.keys() {
        if !new_fields.contains_key(field) {
            breaking.push(format!("Field '{field}' removed"));
        }
    }
    for (field, meta) in &new_fields {
        let Some(old_meta) = old_fields.get(field) else {
            if meta.required {
                breaking.push(format!("Required field '{field}' added"));
            } else {
                warnings.push(format!("Optional field '{field}' added"));
            }
            continue;
        };
        if !types_compatible(&old_meta.types, &meta.types) {
            breaking.push(format!(
                "Field '{field}' changed types {:?} -> {:?}",
                old_meta.types, meta.types
            ));
        }
        if meta.required && !old_meta.required {
            breaking.push(format!("Field '{field}' became required"));
        } else if !meta.required && old_meta.required {
            warnings.push(format!("Field '{field}' became optional"));
        }
    }

    for criterion in &new.acceptance_criteria {
        match old.acceptance_criteria.iter().find(|c| c.id == criterion.id) {
            None if criterion.critical => {
                breaking.push(format!("Critical criterion '{}' added", criterion.id));
            }
            None => warnings.push(format!("Non-critical criterion '{}' added", criterion.id)),
            Some(previous) => {
                if criterion.critical && !previous.critical {
                    breaking.push(format!("Criterion '{}' became critical", criterion.id));
                }
                if criterion.validator != previous.validator || criterion.parameters != previous.parameters {
                    if criterion.critical {
                        breaking.push(format!("Criterion '{}' validation changed", criterion.id));
                    } else {
                        warnings.push(format!("Criterion '{}' validation changed", criterion.id));
                    }
                }
            }
        }
    }
    for criterion in &old.acceptance_criteria {
        if !new.acceptance_criteria.iter().any(|c| c.id == criterion.id) {
            warnings.push(format!("Criterion '{}' removed", criterion.id));
        }
    }

    if old.is_blocking != new.is_blocking {
        warnings.push(format!("Blocking flag changed to {}", new.is_blocking));
    }

    CompatibilityReport {
        contract_id: new.id.clone(),
        from_version: old.schema_version,
        to_version: new.schema_version,
        breaking_changes: breaking,
        warnings,
        migrated: false,
    }
}

#[derive(Debug, Clone)]
struct FieldInfo {
    types: BTreeSet<String>,
    required: bool,
}

fn field_map(spec: &Value) -> BTreeMap<String, FieldInfo> {
    let required: BTreeSet<&str> = spec
        .get("required")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let Some(props) = spec.get("properties").and_then(Value::as_object) else {
        return BTreeMap::new();
    };

    props
        .iter()
        .map(|(name, meta)| {
            let types = match meta.get("type") {
                Some(Value::String(s)) => BTreeSet::from([s.clone()]),
                Some(Value::Array(arr)) => arr.iter().filter_map(Value::as_str).map(String::from).collect(),
                _ if meta.get("properties").is_some() => BTreeSet::from(["object".to_string()]),
                _ => BTreeSet::new(),
            };
            let info = FieldInfo {
                types,
                required: required.contains(name.as_str()),
            };
            (name.clone(), info)
        })
        .collect()
}

/// Widening (including adding `null`) is compatible; narrowing is not.
fn types_compatible(old: &BTreeSet<String>, new: &BTreeSet<String>) -> bool {
    old.is_empty() || new.is_superset(old)
}
