//! Content-addressable artifact store.
//!
//! Layout: `{root}/{digest[0:2]}/{digest[2:4]}/{digest}` holds the bytes and a
//! sibling `{digest}.meta` JSON record lists every registration of that
//! content. The in-memory index is a cache of the `.meta` records and can be
//! rebuilt with [`ArtifactStore::open`].

use super::{Artifact, ArtifactFilter, ArtifactSpec};
use crate::errors::ArtifactError;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error, info, warn};

const META_EXTENSION: &str = "meta";

/// The `.meta` record stored next to each blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct MetaRecord {
    digest: String,
    size: u64,
    registrations: Vec<Artifact>,
}

/// Store counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    /// Blobs physically written by this instance.
    pub physical_writes: u64,
    /// Stores that hit existing content.
    pub deduplicated: u64,
    /// Bytes physically written by this instance.
    pub stored_bytes: u64,
    /// Registrations known to the index.
    pub artifacts: usize,
    /// Distinct digests known to the index.
    pub unique_blobs: usize,
}

/// Computes the hex SHA-256 digest of `content`.
#[must_use]
pub fn content_digest(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

fn is_valid_digest(digest: &str) -> bool {
    digest.len() == 64 && digest.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Content-addressable storage with integrity verification and deduplication.
#[derive(Debug)]
pub struct ArtifactStore {
    root: PathBuf,
    index: RwLock<HashMap<String, Vec<Artifact>>>,
    write_lock: Mutex<()>,
    physical_writes: AtomicU64,
    deduplicated: AtomicU64,
    stored_bytes: AtomicU64,
}

impl ArtifactStore {
    /// Opens (or creates) a store rooted at `root`, rebuilding the index from
    /// the `.meta` records found on disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the root cannot be created or a `.meta` record is
    /// unreadable.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, ArtifactError> {
        let root = root.into();
        fs::create_dir_all(&root)?;

        let mut index: HashMap<String, Vec<Artifact>> = HashMap::new();
        for shard in read_dirs(&root)? {
            for sub in read_dirs(&shard)? {
                for entry in fs::read_dir(&sub)? {
                    let path = entry?.path();
                    if path.extension().and_then(|e| e.to_str()) != Some(META_EXTENSION) {
                        continue;
                    }
                    let record = read_meta(&path)?;
                    index.insert(record.digest.clone(), record.registrations);
                }
            }
        }

        info!(
            root = %root.display(),
            blobs = index.len(),
            "Opened artifact store"
        );

        Ok(Self {
            root,
            index: RwLock::new(index),
            write_lock: Mutex::new(()),
            physical_writes: AtomicU64::new(0),
            deduplicated: AtomicU64::new(0),
            stored_bytes: AtomicU64::new(0),
        })
    }

    /// Returns the store root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn relative_path(digest: &str) -> String {
        format!("{}/{}/{digest}", &digest[..2], &digest[2..4])
    }

    fn blob_path(&self, digest: &str) -> PathBuf {
        self.root.join(Self::relative_path(digest))
    }

    fn meta_path(&self, digest: &str) -> PathBuf {
        self.blob_path(digest).with_extension(META_EXTENSION)
    }

    /// Stores content and registers it.
    ///
    /// Content whose digest is already present is not written again; only a
    /// new registration is recorded. A present blob that no longer matches
    /// its digest is rewritten from `content`.
    ///
    /// # Errors
    ///
    /// Returns an error if the blob or its `.meta` record cannot be written.
    pub fn store(&self, content: &[u8], spec: ArtifactSpec) -> Result<Artifact, ArtifactError> {
        let digest = content_digest(content);
        let blob = self.blob_path(&digest);

        let _guard = self.write_lock.lock();

        let existing = if blob.is_file() { Some(fs::read(&blob)?) } else { None };
        if existing.as_deref().is_some_and(|bytes| content_digest(bytes) == digest) {
            self.deduplicated.fetch_add(1, Ordering::Relaxed);
            debug!(digest = %digest, "Content already stored, registering only");
        } else if existing.is_some() {
            warn!(digest = %digest, "Stored content failed its digest check, rewriting");
            write_atomic(&blob, content)?;
            self.physical_writes.fetch_add(1, Ordering::Relaxed);
        } else {
            if let Some(parent) = blob.parent() {
                fs::create_dir_all(parent)?;
            }
            write_atomic(&blob, content)?;
            self.physical_writes.fetch_add(1, Ordering::Relaxed);
            self.stored_bytes
                .fetch_add(content.len() as u64, Ordering::Relaxed);
            debug!(digest = %digest, size = content.len(), "Stored new content");
        }

        let artifact = Artifact {
            id: crate::utils::prefixed_id("art"),
            path: Self::relative_path(&digest),
            digest: digest.clone(),
            size: content.len() as u64,
            media_type: spec.media_type,
            role: spec.role,
            created_by: spec.created_by,
            created_at: crate::utils::iso_timestamp(),
            name: spec.name,
            contract_id: spec.contract_id,
            node_id: spec.node_id,
            phase: spec.phase,
        };

        let mut registrations = self.index.read().get(&digest).cloned().unwrap_or_default();
        registrations.push(artifact.clone());
        let record = MetaRecord {
            digest: digest.clone(),
            size: artifact.size,
            registrations,
        };
        let encoded = serde_json::to_vec_pretty(&record)
            .map_err(|err| ArtifactError::Metadata(err.to_string()))?;
        write_atomic(&self.meta_path(&digest), &encoded)?;
        self.index.write().insert(digest, record.registrations);

        Ok(artifact)
    }

    /// Returns the on-disk location of the content for `digest`.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactError::NotFound`] if no content is stored under it.
    pub fn retrieve(&self, digest: &str) -> Result<PathBuf, ArtifactError> {
        if !is_valid_digest(digest) {
            return Err(ArtifactError::NotFound(digest.to_string()));
        }
        let path = self.blob_path(digest);
        if path.is_file() {
            Ok(path)
        } else {
            Err(ArtifactError::NotFound(digest.to_string()))
        }
    }

    /// Recomputes the digest of the stored content.
    ///
    /// Returns false when the content is missing or its digest differs from
    /// the recorded one.
    #[must_use]
    pub fn verify(&self, artifact: &Artifact) -> bool {
        match self.read_raw(&artifact.digest) {
            Ok(bytes) => {
                let actual = content_digest(&bytes);
                if actual == artifact.digest {
                    true
                } else {
                    error!(
                        digest = %artifact.digest,
                        actual = %actual,
                        artifact_id = %artifact.id,
                        "Artifact integrity check failed"
                    );
                    false
                }
            }
            Err(_) => false,
        }
    }

    /// Reads content only after it passes an integrity check.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactError::IntegrityMismatch`] if the bytes on disk no
    /// longer match the digest, or [`ArtifactError::NotFound`] if missing.
    pub fn read_verified(&self, artifact: &Artifact) -> Result<Vec<u8>, ArtifactError> {
        let bytes = self.read_raw(&artifact.digest)?;
        let actual = content_digest(&bytes);
        if actual != artifact.digest {
            error!(
                digest = %artifact.digest,
                actual = %actual,
                "Refusing to serve corrupted artifact"
            );
            return Err(ArtifactError::IntegrityMismatch {
                digest: artifact.digest.clone(),
                actual,
            });
        }
        Ok(bytes)
    }

    fn read_raw(&self, digest: &str) -> Result<Vec<u8>, ArtifactError> {
        let path = self.retrieve(digest)?;
        Ok(fs::read(path)?)
    }

    /// Looks up a registration by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Artifact> {
        self.index
            .read()
            .values()
            .flatten()
            .find(|a| a.id == id)
            .cloned()
    }

    /// Returns every registration of a digest.
    #[must_use]
    pub fn registrations(&self, digest: &str) -> Vec<Artifact> {
        self.index.read().get(digest).cloned().unwrap_or_default()
    }

    /// Lists registrations matching the filter, oldest first.
    #[must_use]
    pub fn list_artifacts(&self, filter: &ArtifactFilter) -> Vec<Artifact> {
        let mut out: Vec<Artifact> = self
            .index
            .read()
            .values()
            .flatten()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        out
    }

    /// Returns the store counters.
    #[must_use]
    pub fn stats(&self) -> StoreStats {
        let index = self.index.read();
        StoreStats {
            physical_writes: self.physical_writes.load(Ordering::Relaxed),
            deduplicated: self.deduplicated.load(Ordering::Relaxed),
            stored_bytes: self.stored_bytes.load(Ordering::Relaxed),
            artifacts: index.values().map(Vec::len).sum(),
            unique_blobs: index.len(),
        }
    }
}

fn read_dirs(path: &Path) -> Result<Vec<PathBuf>, ArtifactError> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            dirs.push(entry.path());
        }
    }
    Ok(dirs)
}

fn read_meta(path: &Path) -> Result<MetaRecord, ArtifactError> {
    let bytes = fs::read(path)?;
    serde_json::from_slice(&bytes)
        .map_err(|err| ArtifactError::Metadata(format!("{}: {err}", path.display())))
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ArtifactError> {
    let tmp = path.with_extension(format!("tmp-{}", crate::utils::new_id()));
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::ArtifactRole;
    use pretty_assertions::assert_eq;

    fn store() -> (tempfile::TempDir, ArtifactStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();
        (dir, store)
    }

    fn spec() -> ArtifactSpec {
        ArtifactSpec::new(ArtifactRole::Deliverable, "text/plain")
    }

    #[test]
    fn test_store_ten_bytes_twice_writes_once() {
        let (_dir, store) = store();
        let content = b"0123456789";

        let first = store.store(content, spec().for_node("backend")).unwrap();
        let second = store.store(content, spec().for_node("frontend")).unwrap();

        assert_eq!(first.digest, second.digest);
        assert_eq!(first.size, 10);
        assert_eq!(first.size, second.size);
        assert_ne!(first.id, second.id);

        let stats = store.stats();
        assert_eq!(stats.physical_writes, 1);
        assert_eq!(stats.deduplicated, 1);
        assert_eq!(stats.stored_bytes, 10);
        assert_eq!(stats.artifacts, 2);
        assert_eq!(stats.unique_blobs, 1);
    }

    #[test]
    fn test_restore_repairs_corrupted_blob() {
        let (dir, store) = store();
        let first = store.store(b"original", spec()).unwrap();
        fs::write(dir.path().join(&first.path), b"tampered").unwrap();
        assert!(!store.verify(&first));

        let second = store.store(b"original", spec()).unwrap();
        assert_eq!(second.digest, first.digest);
        assert!(store.verify(&second));
        assert!(store.verify(&first));
        assert_eq!(store.read_verified(&second).unwrap(), b"original".to_vec());

        let stats = store.stats();
        assert_eq!(stats.physical_writes, 2);
        assert_eq!(stats.deduplicated, 0);
    }

    #[test]
    fn test_layout_is_sharded() {
        let (dir, store) = store();
        let artifact = store.store(b"hello", spec()).unwrap();
        let d = &artifact.digest;
        assert_eq!(artifact.path, format!("{}/{}/{d}", &d[..2], &d[2..4]));
        assert!(dir.path().join(&artifact.path).is_file());
        assert!(dir.path().join(format!("{}.meta", artifact.path)).is_file());
        assert_eq!(store.retrieve(d).unwrap(), dir.path().join(&artifact.path));
    }

    #[test]
    fn test_retrieve_unknown_or_malformed_digest() {
        let (_dir, store) = store();
        assert!(matches!(
            store.retrieve(&content_digest(b"nothing")),
            Err(ArtifactError::NotFound(_))
        ));
        assert!(matches!(store.retrieve("../../etc/passwd"), Err(ArtifactError::NotFound(_))));
    }

    #[test]
    fn test_verify_detects_corruption() {
        let (dir, store) = store();
        let artifact = store.store(b"original", spec()).unwrap();
        assert!(store.verify(&artifact));
        assert_eq!(store.read_verified(&artifact).unwrap(), b"original".to_vec());

        fs::write(dir.path().join(&artifact.path), b"tampered").unwrap();
        assert!(!store.verify(&artifact));
        assert!(matches!(
            store.read_verified(&artifact),
            Err(ArtifactError::IntegrityMismatch { .. })
        ));
    }

    #[test]
    fn test_verify_missing_content_fails_closed() {
        let (dir, store) = store();
        let artifact = store.store(b"gone soon", spec()).unwrap();
        fs::remove_file(dir.path().join(&artifact.path)).unwrap();
        assert!(!store.verify(&artifact));
    }

    #[test]
    fn test_list_and_get() {
        let (_dir, store) = store();
        let a = store.store(b"a", spec().for_node("backend")).unwrap();
        store
            .store(b"b", ArtifactSpec::new(ArtifactRole::Report, "text/html").for_node("testing"))
            .unwrap();

        assert_eq!(store.list_artifacts(&ArtifactFilter::all()).len(), 2);
        let reports = store.list_artifacts(&ArtifactFilter::all().with_role(ArtifactRole::Report));
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].node_id.as_deref(), Some("testing"));
        assert_eq!(store.get(&a.id), Some(a));
        assert!(store.get("art-missing").is_none());
    }

    #[test]
    fn test_open_rebuilds_index() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = {
            let store = ArtifactStore::open(dir.path()).unwrap();
            store.store(b"persisted", spec()).unwrap();
            store.store(b"persisted", spec().in_phase("design")).unwrap()
        };

        let reopened = ArtifactStore::open(dir.path()).unwrap();
        assert_eq!(reopened.registrations(&artifact.digest).len(), 2);
        assert_eq!(reopened.get(&artifact.id), Some(artifact.clone()));

        let again = reopened.store(b"persisted", spec()).unwrap();
        assert_eq!(again.digest, artifact.digest);
        assert_eq!(reopened.stats().physical_writes, 0);
        assert_eq!(reopened.stats().deduplicated, 1);
    }
}
