//! Identity store: one reference face image per enrolled name.
//!
//! Images live in a single directory as `<name>.jpg`. Embeddings are derived
//! from the images on every [`IdentityStore::load_all`], memoized by the
//! SHA-256 of the file contents so unchanged images are not re-embedded.

use crate::provider::EmbeddingProvider;
use crate::types::{Embedding, KnownFaces};
use image::{GrayImage, ImageFormat};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;

const IMAGE_EXTENSION: &str = "jpg";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("invalid identity name {0:?}")]
    InvalidName(String),
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode reference image: {0}")]
    Encode(#[from] image::ImageError),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

type ImageDigest = [u8; 32];

/// Directory-backed store of reference face images.
pub struct IdentityStore {
    dir: PathBuf,
    /// `None` records an image in which no face was found.
    cache: HashMap<ImageDigest, Option<Embedding>>,
}

impl IdentityStore {
    /// Open the store rooted at `dir`, creating the directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(io_err(&dir))?;
        tracing::debug!(dir = %dir.display(), "identity store opened");
        Ok(Self {
            dir,
            cache: HashMap::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the reference image for `name`.
    pub fn image_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.{IMAGE_EXTENSION}"))
    }

    /// Enrolled names, in file-name order.
    pub fn names(&self) -> Result<Vec<String>, StoreError> {
        Ok(self
            .reference_images()?
            .into_iter()
            .map(|(name, _)| name)
            .collect())
    }

    /// Derive the known-faces gallery from all stored reference images.
    ///
    /// Images that cannot be read or decoded, or in which the provider finds no
    /// face, contribute no entry. An empty gallery means nobody is enrolled.
    pub fn load_all<P>(&mut self, provider: &mut P) -> Result<KnownFaces, StoreError>
    where
        P: EmbeddingProvider + ?Sized,
    {
        let mut known = KnownFaces::new();
        let mut seen = HashSet::new();

        for (name, path) in self.reference_images()? {
            let bytes = match std::fs::read(&path) {
                Ok(b) => b,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable reference image");
                    continue;
                }
            };
            let digest: ImageDigest = Sha256::digest(&bytes).into();
            seen.insert(digest);

            let embedding = match self.cache.get(&digest) {
                Some(cached) => cached.clone(),
                None => {
                    let derived = derive_embedding(provider, &bytes, &path);
                    self.cache.insert(digest, derived.clone());
                    derived
                }
            };

            match embedding {
                Some(e) => known.insert(name, e),
                None => tracing::warn!(name = %name, "no face found in reference image; skipping"),
            }
        }

        // Forget images that were replaced or removed since the last scan.
        self.cache.retain(|digest, _| seen.contains(digest));

        tracing::info!(count = known.len(), "loaded known faces");
        Ok(known)
    }

    /// Persist `face` as the reference image for `name`, replacing any prior one.
    ///
    /// Returns `Ok(false)` without touching the store when `face` has zero area.
    pub fn save(&self, name: &str, face: &GrayImage) -> Result<bool, StoreError> {
        validate_name(name)?;
        if face.width() == 0 || face.height() == 0 {
            tracing::debug!(name, "refusing to save zero-area face crop");
            return Ok(false);
        }

        let target = self.image_path(name);
        let tmp = self.dir.join(format!(".{name}.{IMAGE_EXTENSION}.tmp"));
        face.save_with_format(&tmp, ImageFormat::Jpeg)?;
        std::fs::rename(&tmp, &target).map_err(io_err(&target))?;

        tracing::info!(name, path = %target.display(), "saved reference image");
        Ok(true)
    }

    /// `(name, path)` of every reference image, sorted by name.
    fn reference_images(&self) -> Result<Vec<(String, PathBuf)>, StoreError> {
        let entries = std::fs::read_dir(&self.dir).map_err(io_err(&self.dir))?;

        let mut images = Vec::new();
        for entry in entries {
            let path = entry.map_err(io_err(&self.dir))?.path();
            if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some(IMAGE_EXTENSION) {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            images.push((name.to_string(), path));
        }

        images.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(images)
    }
}

fn derive_embedding<P>(provider: &mut P, bytes: &[u8], path: &Path) -> Option<Embedding>
where
    P: EmbeddingProvider + ?Sized,
{
    let image = match image::load_from_memory(bytes) {
        Ok(img) => img.to_luma8(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "skipping undecodable reference image");
            return None;
        }
    };

    let regions = match provider.detect_face_regions(&image) {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "face detection failed on reference image");
            return None;
        }
    };
    let first = regions.into_iter().next()?;

    match provider.compute_embeddings(&image, std::slice::from_ref(&first)) {
        Ok(embeddings) => embeddings.into_iter().next(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "embedding failed on reference image");
            None
        }
    }
}

/// Reject names that are empty, hidden, or would escape the store directory.
pub fn validate_name(name: &str) -> Result<(), StoreError> {
    let bad = name.trim().is_empty()
        || name.starts_with('.')
        || name.contains(['/', '\\', '\0']);
    if bad {
        return Err(StoreError::InvalidName(name.to_string()));
    }
    Ok(())
}
