//! Persisted signature cache.
//!
//! A JSON snapshot of the signature store carrying a format version, the
//! engine id, the embedding dimension and a SHA-256 checksum over the
//! identity payload. Load validates all of it; any mismatch fails with a
//! typed [`CacheError`] (reachable through `anyhow` downcasts) and the
//! caller rebuilds from enrollment images. A cache is either fully valid
//! for the current engine or discarded, never partially trusted.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::faces::FaceEngine;
use crate::now_epoch_s;
use crate::signatures::{IdentityEntry, SignatureStore};

pub const CACHE_FORMAT_VERSION: u32 = 1;

/// Why a cache file was rejected.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CacheError {
    Malformed(String),
    VersionMismatch { found: u32, expected: u32 },
    EngineMismatch { found: String, expected: String },
    DimensionMismatch { found: usize, expected: usize },
    ChecksumMismatch,
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::Malformed(detail) => write!(f, "cache file malformed: {detail}"),
            CacheError::VersionMismatch { found, expected } => {
                write!(f, "cache format version {found} (expected {expected})")
            }
            CacheError::EngineMismatch { found, expected } => {
                write!(f, "cache built by engine {found:?} (current {expected:?})")
            }
            CacheError::DimensionMismatch { found, expected } => {
                write!(f, "cache embedding dimension {found} (expected {expected})")
            }
            CacheError::ChecksumMismatch => write!(f, "cache checksum mismatch"),
        }
    }
}

impl std::error::Error for CacheError {}

#[derive(Serialize, Deserialize)]
struct CacheFile {
    version: u32,
    engine: String,
    embedding_dim: usize,
    built_at: u64,
    identities: Vec<IdentityEntry>,
    /// Hex SHA-256 over the serialized `identities` payload. Header fields
    /// are validated directly against the current engine instead.
    checksum: String,
}

/// Handle to the cache file location.
#[derive(Clone, Debug)]
pub struct SignatureCache {
    path: PathBuf,
}

impl SignatureCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load and validate the cache.
    ///
    /// `Ok(None)` means no cache exists (first run or after invalidation);
    /// an error carrying [`CacheError`] means the file exists but cannot be
    /// trusted for the current engine. Both cases call for a rebuild.
    pub fn load(&self, engine: &dyn FaceEngine) -> Result<Option<SignatureStore>> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("read signature cache {}", self.path.display()))
            }
        };

        let file: CacheFile = serde_json::from_slice(&bytes)
            .map_err(|err| CacheError::Malformed(err.to_string()))?;

        if file.checksum != identities_checksum(&file.identities)? {
            return Err(CacheError::ChecksumMismatch.into());
        }
        if file.version != CACHE_FORMAT_VERSION {
            return Err(CacheError::VersionMismatch {
                found: file.version,
                expected: CACHE_FORMAT_VERSION,
            }
            .into());
        }
        if file.engine != engine.engine_id() {
            return Err(CacheError::EngineMismatch {
                found: file.engine,
                expected: engine.engine_id().to_string(),
            }
            .into());
        }
        if file.embedding_dim != engine.embedding_dim() {
            return Err(CacheError::DimensionMismatch {
                found: file.embedding_dim,
                expected: engine.embedding_dim(),
            }
            .into());
        }
        for entry in &file.identities {
            if let Some(bad) = entry
                .embeddings
                .iter()
                .find(|e| e.dim() != file.embedding_dim)
            {
                return Err(CacheError::DimensionMismatch {
                    found: bad.dim(),
                    expected: file.embedding_dim,
                }
                .into());
            }
        }

        Ok(Some(SignatureStore::from_entries(file.identities)))
    }

    /// Persist the store for the given engine.
    pub fn save(&self, store: &SignatureStore, engine: &dyn FaceEngine) -> Result<()> {
        for entry in store.entries() {
            if let Some(bad) = entry
                .embeddings
                .iter()
                .find(|e| e.dim() != engine.embedding_dim())
            {
                anyhow::bail!(
                    "refusing to cache {:?}: embedding dimension {} does not match engine {}",
                    entry.name,
                    bad.dim(),
                    engine.embedding_dim()
                );
            }
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("create cache directory {}", parent.display()))?;
            }
        }

        let identities = store.entries().to_vec();
        let file = CacheFile {
            version: CACHE_FORMAT_VERSION,
            engine: engine.engine_id().to_string(),
            embedding_dim: engine.embedding_dim(),
            built_at: now_epoch_s()?,
            checksum: identities_checksum(&identities)?,
            identities,
        };
        let bytes = serde_json::to_vec(&file).context("serialize signature cache")?;
        fs::write(&self.path, bytes)
            .with_context(|| format!("write signature cache {}", self.path.display()))?;
        Ok(())
    }

    /// Remove the cache so the next startup rebuilds. Idempotent; removing
    /// an absent cache is not an error.
    pub fn invalidate(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err)
                .with_context(|| format!("remove signature cache {}", self.path.display())),
        }
    }
}

fn identities_checksum(identities: &[IdentityEntry]) -> Result<String> {
    let bytes = serde_json::to_vec(identities).context("serialize cache payload for checksum")?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::faces::{Embedding, FaceRegion, StubFaceEngine};
    use crate::signatures::MatchOutcome;
    use tempfile::tempdir;

    /// Stub engine under a different identifier, for mismatch tests.
    struct RenamedEngine(&'static str, StubFaceEngine);

    impl FaceEngine for RenamedEngine {
        fn engine_id(&self) -> &str {
            self.0
        }
        fn embedding_dim(&self) -> usize {
            self.1.embedding_dim()
        }
        fn locate_faces(&self, image: &image::RgbImage) -> Vec<FaceRegion> {
            self.1.locate_faces(image)
        }
        fn embed(&self, image: &image::RgbImage, region: &FaceRegion) -> Result<Embedding> {
            self.1.embed(image, region)
        }
    }

    fn sample_store(dim: usize) -> SignatureStore {
        let mut store = SignatureStore::new();
        store.insert("alice", vec![Embedding::new(vec![0.25; dim])]);
        store.insert(
            "bob",
            vec![
                Embedding::new(vec![0.75; dim]),
                Embedding::new(vec![0.9; dim]),
            ],
        );
        store
    }

    #[test]
    fn missing_cache_loads_as_none() -> Result<()> {
        let dir = tempdir()?;
        let cache = SignatureCache::new(dir.path().join("signatures.json"));
        assert!(cache.load(&StubFaceEngine::new())?.is_none());
        Ok(())
    }

    #[test]
    fn round_trip_preserves_match_behavior() -> Result<()> {
        let dir = tempdir()?;
        let engine = StubFaceEngine::new();
        let cache = SignatureCache::new(dir.path().join("signatures.json"));
        let store = sample_store(engine.embedding_dim());
        cache.save(&store, &engine)?;

        let loaded = cache.load(&engine)?.expect("cache should load");
        assert_eq!(loaded.identity_count(), store.identity_count());
        assert_eq!(loaded.embedding_count(), store.embedding_count());

        let probes = [
            Embedding::new(vec![0.26; engine.embedding_dim()]),
            Embedding::new(vec![0.74; engine.embedding_dim()]),
            Embedding::new(vec![10.0; engine.embedding_dim()]),
        ];
        for probe in &probes {
            assert_eq!(
                store.match_embedding(probe, 0.5),
                loaded.match_embedding(probe, 0.5),
            );
        }
        Ok(())
    }

    #[test]
    fn invalidate_is_idempotent() -> Result<()> {
        let dir = tempdir()?;
        let engine = StubFaceEngine::new();
        let cache = SignatureCache::new(dir.path().join("signatures.json"));
        cache.save(&sample_store(engine.embedding_dim()), &engine)?;

        cache.invalidate()?;
        assert!(cache.load(&engine)?.is_none());
        cache.invalidate()?;
        assert!(cache.load(&engine)?.is_none());
        Ok(())
    }

    #[test]
    fn garbage_file_reports_malformed() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("signatures.json");
        fs::write(&path, b"not json at all")?;

        let err = SignatureCache::new(&path)
            .load(&StubFaceEngine::new())
            .unwrap_err();
        match err.downcast_ref::<CacheError>() {
            Some(CacheError::Malformed(_)) => Ok(()),
            other => panic!("expected Malformed, got {other:?}"),
        }
    }

    #[test]
    fn tampered_payload_fails_checksum() -> Result<()> {
        let dir = tempdir()?;
        let engine = StubFaceEngine::new();
        let path = dir.path().join("signatures.json");
        let cache = SignatureCache::new(&path);
        cache.save(&sample_store(engine.embedding_dim()), &engine)?;

        let mut value: serde_json::Value = serde_json::from_slice(&fs::read(&path)?)?;
        value["identities"][0]["name"] = serde_json::Value::String("mallory".to_string());
        fs::write(&path, serde_json::to_vec(&value)?)?;

        let err = cache.load(&engine).unwrap_err();
        assert_eq!(
            err.downcast_ref::<CacheError>(),
            Some(&CacheError::ChecksumMismatch)
        );
        Ok(())
    }

    #[test]
    fn old_format_version_is_rejected() -> Result<()> {
        let dir = tempdir()?;
        let engine = StubFaceEngine::new();
        let path = dir.path().join("signatures.json");
        let cache = SignatureCache::new(&path);
        cache.save(&sample_store(engine.embedding_dim()), &engine)?;

        let mut value: serde_json::Value = serde_json::from_slice(&fs::read(&path)?)?;
        value["version"] = serde_json::Value::from(99);
        fs::write(&path, serde_json::to_vec(&value)?)?;

        let err = cache.load(&engine).unwrap_err();
        match err.downcast_ref::<CacheError>() {
            Some(CacheError::VersionMismatch { found: 99, .. }) => Ok(()),
            other => panic!("expected VersionMismatch, got {other:?}"),
        }
    }

    #[test]
    fn different_engine_is_rejected() -> Result<()> {
        let dir = tempdir()?;
        let engine = StubFaceEngine::new();
        let cache = SignatureCache::new(dir.path().join("signatures.json"));
        cache.save(&sample_store(engine.embedding_dim()), &engine)?;

        let other = RenamedEngine("cnn-v2", StubFaceEngine::new());
        let err = cache.load(&other).unwrap_err();
        match err.downcast_ref::<CacheError>() {
            Some(CacheError::EngineMismatch { found, expected }) => {
                assert_eq!(found, "stub-stats-v1");
                assert_eq!(expected, "cnn-v2");
                Ok(())
            }
            other => panic!("expected EngineMismatch, got {other:?}"),
        }
    }

    #[test]
    fn header_dimension_mismatch_is_rejected() -> Result<()> {
        let dir = tempdir()?;
        let engine = StubFaceEngine::new();
        let path = dir.path().join("signatures.json");
        let cache = SignatureCache::new(&path);
        cache.save(&sample_store(engine.embedding_dim()), &engine)?;

        // Header tamper only; the payload checksum still verifies.
        let mut value: serde_json::Value = serde_json::from_slice(&fs::read(&path)?)?;
        value["embedding_dim"] = serde_json::Value::from(5);
        fs::write(&path, serde_json::to_vec(&value)?)?;

        let err = cache.load(&engine).unwrap_err();
        match err.downcast_ref::<CacheError>() {
            Some(CacheError::DimensionMismatch {
                found: 5,
                expected: 8,
            }) => Ok(()),
            other => panic!("expected DimensionMismatch, got {other:?}"),
        }
    }

    #[test]
    fn save_rejects_inconsistent_dimensions() {
        let dir = tempdir().unwrap();
        let engine = StubFaceEngine::new();
        let cache = SignatureCache::new(dir.path().join("signatures.json"));
        let mut store = SignatureStore::new();
        store.insert("oddball", vec![Embedding::new(vec![0.0; 3])]);
        assert!(cache.save(&store, &engine).is_err());
    }
}
