//! Artifact manifests handed between phases.

use super::{Artifact, ArtifactStore};
use serde::{Deserialize, Serialize};

/// An ordered set of artifacts with their combined size.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactManifest {
    /// Artifacts in insertion order.
    pub artifacts: Vec<Artifact>,
    /// Sum of artifact sizes in bytes.
    pub total_size: u64,
    /// Creation time (ISO 8601).
    pub created_at: String,
}

/// Outcome of [`ArtifactManifest::verify_all`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestVerification {
    /// Number of artifacts checked.
    pub checked: usize,
    /// Ids of artifacts whose content is missing or corrupted.
    pub failed: Vec<String>,
}

impl ManifestVerification {
    /// Returns true if every artifact verified.
    #[must_use]
    pub fn is_intact(&self) -> bool {
        self.failed.is_empty()
    }
}

impl ArtifactManifest {
    /// Creates a manifest from artifacts.
    #[must_use]
    pub fn new(artifacts: Vec<Artifact>) -> Self {
        let total_size = artifacts.iter().map(|a| a.size).sum();
        Self {
            artifacts,
            total_size,
            created_at: crate::utils::iso_timestamp(),
        }
    }

    /// Appends an artifact.
    pub fn push(&mut self, artifact: Artifact) {
        self.total_size += artifact.size;
        self.artifacts.push(artifact);
    }

    /// Returns the number of artifacts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    /// Returns true if the manifest is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    /// Returns true if an artifact with the digest is listed.
    #[must_use]
    pub fn contains_digest(&self, digest: &str) -> bool {
        self.artifacts.iter().any(|a| a.digest == digest)
    }

    /// Verifies every listed artifact against the store.
    #[must_use]
    pub fn verify_all(&self, store: &ArtifactStore) -> ManifestVerification {
        let failed = self
            .artifacts
            .iter()
            .filter(|a| !store.verify(a))
            .map(|a| a.id.clone())
            .collect();
        ManifestVerification {
            checked: self.artifacts.len(),
            failed,
        }
    }
}
