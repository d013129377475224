//! Enrollment directory scanning and signature store rebuilds.
//!
//! The enrollment collaborator owns a directory with one subdirectory per
//! identity, each holding that person's photos:
//!
//! ```text
//! enrollment/
//!   alice/   front.jpg  side.png
//!   bob/     door.jpg
//! ```
//!
//! `rebuild_store` recomputes every embedding with the current engine.
//! Directories are visited in sorted order so identity insertion order,
//! and with it match tie-breaking, is stable across runs. Unreadable or
//! faceless images are logged and skipped, never fatal; an identity whose
//! images all fail is left out entirely.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::cache::{CacheError, SignatureCache};
use crate::faces::FaceEngine;
use crate::signatures::SignatureStore;
use crate::validate_identity_name;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// Result of scanning the enrollment directory.
pub struct RebuildOutcome {
    pub store: SignatureStore,
    pub images_scanned: usize,
    pub images_skipped: usize,
}

/// Recompute all embeddings from enrollment images.
///
/// Fails only if the enrollment directory itself cannot be read; per-image
/// problems are skipped and counted.
pub fn rebuild_store(enrollment_dir: &Path, engine: &dyn FaceEngine) -> Result<RebuildOutcome> {
    let mut identity_dirs = Vec::new();
    let entries = fs::read_dir(enrollment_dir)
        .with_context(|| format!("read enrollment directory {}", enrollment_dir.display()))?;
    for entry in entries {
        let entry = entry.context("read enrollment directory entry")?;
        let path = entry.path();
        if path.is_dir() {
            identity_dirs.push(path);
        }
    }
    identity_dirs.sort();

    let mut store = SignatureStore::new();
    let mut images_scanned = 0usize;
    let mut images_skipped = 0usize;

    for dir in identity_dirs {
        let name = match dir.file_name().and_then(|n| n.to_str()) {
            Some(name) => name.to_string(),
            None => {
                log::warn!("skipping enrollment entry with non-utf8 name: {}", dir.display());
                continue;
            }
        };
        if let Err(err) = validate_identity_name(&name) {
            log::warn!("skipping enrollment directory {name:?}: {err}");
            continue;
        }

        let mut embeddings = Vec::new();
        for image_path in sorted_images(&dir)? {
            images_scanned += 1;
            match embed_photo(&image_path, engine) {
                Ok(Some(embedding)) => embeddings.push(embedding),
                Ok(None) => {
                    images_skipped += 1;
                    log::warn!("no face found in {}", image_path.display());
                }
                Err(err) => {
                    images_skipped += 1;
                    log::warn!("skipping {}: {err:#}", image_path.display());
                }
            }
        }

        if embeddings.is_empty() {
            log::warn!("identity {name:?} has no usable enrollment images");
            continue;
        }
        log::info!("enrolled {name:?} with {} embedding(s)", embeddings.len());
        store.insert(name, embeddings);
    }

    Ok(RebuildOutcome {
        store,
        images_scanned,
        images_skipped,
    })
}

/// Startup path: serve from a valid cache, otherwise rebuild and recache.
pub fn load_or_rebuild(
    cache: &SignatureCache,
    enrollment_dir: &Path,
    engine: &dyn FaceEngine,
) -> Result<SignatureStore> {
    match cache.load(engine) {
        Ok(Some(store)) => {
            log::info!(
                "signature cache loaded: {} identities, {} embeddings",
                store.identity_count(),
                store.embedding_count()
            );
            return Ok(store);
        }
        Ok(None) => log::info!("no signature cache, rebuilding from enrollment images"),
        Err(err) => match err.downcast_ref::<CacheError>() {
            Some(cache_err) => log::warn!("signature cache invalid ({cache_err}), rebuilding"),
            None => log::warn!("signature cache unreadable ({err:#}), rebuilding"),
        },
    }

    let outcome = rebuild_store(enrollment_dir, engine)?;
    cache.save(&outcome.store, engine)?;
    log::info!(
        "signature store rebuilt: {} identities, {} embeddings ({} image(s) skipped)",
        outcome.store.identity_count(),
        outcome.store.embedding_count(),
        outcome.images_skipped
    );
    Ok(outcome.store)
}

/// Copy photos into an identity's enrollment directory. Returns the number
/// of files copied. Existing files with the same name are replaced.
pub fn import_photos(enrollment_dir: &Path, identity: &str, photos: &[PathBuf]) -> Result<usize> {
    validate_identity_name(identity)?;
    let target = enrollment_dir.join(identity);
    fs::create_dir_all(&target)
        .with_context(|| format!("create enrollment directory {}", target.display()))?;

    let mut copied = 0usize;
    for photo in photos {
        if !has_image_extension(photo) {
            anyhow::bail!(
                "{} is not a supported image (expected one of {:?})",
                photo.display(),
                IMAGE_EXTENSIONS
            );
        }
        let file_name = photo
            .file_name()
            .with_context(|| format!("{} has no file name", photo.display()))?;
        fs::copy(photo, target.join(file_name))
            .with_context(|| format!("copy {}", photo.display()))?;
        copied += 1;
    }
    Ok(copied)
}

/// Delete an identity's enrollment directory. Returns whether it existed.
pub fn remove_identity(enrollment_dir: &Path, identity: &str) -> Result<bool> {
    validate_identity_name(identity)?;
    let target = enrollment_dir.join(identity);
    if !target.exists() {
        return Ok(false);
    }
    fs::remove_dir_all(&target)
        .with_context(|| format!("remove enrollment directory {}", target.display()))?;
    Ok(true)
}

fn sorted_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut images = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("read {}", dir.display()))? {
        let path = entry.context("read image entry")?.path();
        if path.is_file() && has_image_extension(&path) {
            images.push(path);
        }
    }
    images.sort();
    Ok(images)
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            IMAGE_EXTENSIONS.iter().any(|known| *known == ext)
        })
        .unwrap_or(false)
}

/// Decode a photo and embed its first located face. `Ok(None)` when the
/// engine finds no face at all.
fn embed_photo(
    path: &Path,
    engine: &dyn FaceEngine,
) -> Result<Option<crate::faces::Embedding>> {
    let image = image::open(path)
        .with_context(|| format!("decode {}", path.display()))?
        .to_rgb8();
    let regions = engine.locate_faces(&image);
    let Some(region) = regions.first() else {
        return Ok(None);
    };
    if regions.len() > 1 {
        log::debug!(
            "{} contains {} faces, using the first",
            path.display(),
            regions.len()
        );
    }
    let embedding = engine
        .embed(&image, region)
        .with_context(|| format!("embed face from {}", path.display()))?;
    Ok(Some(embedding))
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
