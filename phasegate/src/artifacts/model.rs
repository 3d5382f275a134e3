//! Artifact records and query filters.

use serde::{Deserialize, Serialize};
use std::fmt;

/// What an artifact is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactRole {
    /// A build output handed to the next phase.
    #[default]
    Deliverable,
    /// Proof that a criterion holds.
    Evidence,
    /// A generated report.
    Report,
    /// A captured screenshot.
    Screenshot,
    /// A specification document.
    Specification,
}

impl fmt::Display for ArtifactRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deliverable => write!(f, "deliverable"),
            Self::Evidence => write!(f, "evidence"),
            Self::Report => write!(f, "report"),
            Self::Screenshot => write!(f, "screenshot"),
            Self::Specification => write!(f, "specification"),
        }
    }
}

/// An immutable, content-addressed artifact record.
///
/// The same content may be registered several times (by different nodes or
/// phases); each registration is its own record sharing one digest and one
/// stored blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Registration id.
    pub id: String,
    /// Path of the blob relative to the store root.
    pub path: String,
    /// Hex SHA-256 of the content.
    pub digest: String,
    /// Content size in bytes.
    pub size: u64,
    /// Media type, e.g. `application/json`.
    pub media_type: String,
    /// Artifact role.
    pub role: ArtifactRole,
    /// Producer of the artifact.
    pub created_by: String,
    /// Registration time (ISO 8601).
    pub created_at: String,
    /// Optional logical name, e.g. a file name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Contract this artifact was produced for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_id: Option<String>,
    /// Node that produced the artifact.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    /// Phase the artifact belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
}

/// Registration details supplied when storing content.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ArtifactSpec {
    /// Artifact role.
    pub role: ArtifactRole,
    /// Media type.
    pub media_type: String,
    /// Producer.
    pub created_by: String,
    /// Logical name.
    pub name: Option<String>,
    /// Linked contract.
    pub contract_id: Option<String>,
    /// Linked node.
    pub node_id: Option<String>,
    /// Linked phase.
    pub phase: Option<String>,
}

impl ArtifactSpec {
    /// Creates a spec with the given role and media type.
    #[must_use]
    pub fn new(role: ArtifactRole, media_type: impl Into<String>) -> Self {
        Self {
            role,
            media_type: media_type.into(),
            created_by: "phasegate".to_string(),
            ..Self::default()
        }
    }

    /// Sets the producer.
    #[must_use]
    pub fn created_by(mut self, creator: impl Into<String>) -> Self {
        self.created_by = creator.into();
        self
    }

    /// Sets the logical name.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Links a contract.
    #[must_use]
    pub fn for_contract(mut self, contract_id: impl Into<String>) -> Self {
        self.contract_id = Some(contract_id.into());
        self
    }

    /// Links a node.
    #[must_use]
    pub fn for_node(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    /// Links a phase.
    #[must_use]
    pub fn in_phase(mut self, phase: impl Into<String>) -> Self {
        self.phase = Some(phase.into());
        self
    }
}

/// Filter for listing artifacts; unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactFilter {
    /// Required role.
    pub role: Option<ArtifactRole>,
    /// Required media type.
    pub media_type: Option<String>,
    /// Required contract link.
    pub contract_id: Option<String>,
    /// Required node link.
    pub node_id: Option<String>,
    /// Required phase link.
    pub phase: Option<String>,
}

impl ArtifactFilter {
    /// A filter matching every artifact.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Restricts to a role.
    #[must_use]
    pub fn with_role(mut self, role: ArtifactRole) -> Self {
        self.role = Some(role);
        self
    }

    /// Restricts to a node.
    #[must_use]
    pub fn with_node(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    /// Restricts to a contract.
    #[must_use]
    pub fn with_contract(mut self, contract_id: impl Into<String>) -> Self {
        self.contract_id = Some(contract_id.into());
        self
    }

    /// Restricts to a phase.
    #[must_use]
    pub fn with_phase(mut self, phase: impl Into<String>) -> Self {
        self.phase = Some(phase.into());
        self
    }

    /// Returns true if the artifact passes the filter.
    #[must_use]
    pub fn matches(&self, artifact: &Artifact) -> bool {
        fn eq(want: Option<&String>, have: Option<&String>) -> bool {
            want.map_or(true, |w| have == Some(w))
        }

        self.role.map_or(true, |r| r == artifact.role)
            && self
                .media_type
                .as_ref()
                .map_or(true, |m| m == &artifact.media_type)
            && eq(self.contract_id.as_ref(), artifact.contract_id.as_ref())
            && eq(self.node_id.as_ref(), artifact.node_id.as_ref())
            && eq(self.phase.as_ref(), artifact.phase.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(role: ArtifactRole, node: Option<&str>) -> Artifact {
        Artifact {
            id: "art-1".to_string(),
            path: "ab/cd/abcd".to_string(),
            digest: "abcd".to_string(),
            size: 4,
            media_type: "text/plain".to_string(),
            role,
            created_by: "test".to_string(),
            created_at: crate::utils::iso_timestamp(),
            name: None,
            contract_id: None,
            node_id: node.map(str::to_string),
            phase: None,
        }
    }

    #[test]
    fn test_filter_matching() {
        let a = artifact(ArtifactRole::Report, Some("backend"));
        assert!(ArtifactFilter::all().matches(&a));
        assert!(ArtifactFilter::all().with_role(ArtifactRole::Report).matches(&a));
        assert!(!ArtifactFilter::all().with_role(ArtifactRole::Evidence).matches(&a));
        assert!(ArtifactFilter::all().with_node("backend").matches(&a));
        assert!(!ArtifactFilter::all().with_contract("API_001").matches(&a));
    }

    #[test]
    fn test_spec_builder() {
        let spec = ArtifactSpec::new(ArtifactRole::Evidence, "application/json")
            .created_by("backend-task")
            .for_node("backend")
            .for_contract("API_001")
            .in_phase("build");
        assert_eq!(spec.created_by, "backend-task");
        assert_eq!(spec.phase.as_deref(), Some("build"));
    }

    #[test]
    fn test_role_serialization() {
        assert_eq!(serde_json::to_string(&ArtifactRole::Screenshot).unwrap(), r#""screenshot""#);
        assert_eq!(ArtifactRole::Specification.to_string(), "specification");
    }
}
