//! Content-addressable artifact storage.
//!
//! Artifacts are keyed by the SHA-256 digest of their content. Storing the
//! same bytes twice registers a second record but writes nothing new; reads
//! on behalf of contract verification always go through an integrity check.

mod manifest;
mod model;
mod store;

pub use manifest::{ArtifactManifest, ManifestVerification};
pub use model::{Artifact, ArtifactFilter, ArtifactRole, ArtifactSpec};
pub use store::{content_digest, ArtifactStore, StoreStats};
