//! Gallery of labeled reference embeddings.
//!
//! Built once at (re)configuration time from operator-supplied photo
//! directories, then treated as immutable until the next rebuild.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use image::RgbImage;

use crate::encoder::EncoderModel;
use crate::error::IdentifyError;
use crate::types::Embedding;

/// One identity: a label and the canonical-space embeddings representing it.
#[derive(Debug, Clone)]
pub struct GalleryEntry {
    pub label: String,
    pub embeddings: Vec<Embedding>,
}

/// The full set of labeled reference embeddings, bound to the encoder that
/// produced them. Changing the encoder requires rebuilding the whole
/// gallery — entries are never mixed across encoder spaces.
#[derive(Debug, Clone)]
pub struct Gallery {
    entries: Vec<GalleryEntry>,
    encoder: EncoderModel,
}

impl Gallery {
    pub fn new(entries: Vec<GalleryEntry>, encoder: EncoderModel) -> Self {
        debug_assert!(entries
            .iter()
            .all(|e| e.embeddings.iter().all(Embedding::is_canonical)));
        Self { entries, encoder }
    }

    pub fn empty(encoder: EncoderModel) -> Self {
        Self {
            entries: Vec::new(),
            encoder,
        }
    }

    pub fn entries(&self) -> &[GalleryEntry] {
        &self.entries
    }

    pub fn encoder(&self) -> EncoderModel {
        self.encoder
    }

    /// Number of labels, including degraded (empty) ones.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Seam between the gallery builder and the full detect→encode→translate
/// pipeline, so the builder can be exercised without model files.
pub trait FaceEmbedder {
    fn encoder(&self) -> EncoderModel;

    /// Embed the single highest-confidence face of an image into the
    /// canonical space. `Ok(None)` means no face was found — a skippable
    /// outcome during gallery building, never an error.
    fn embed_best_face(&mut self, image: &RgbImage) -> Result<Option<Embedding>, IdentifyError>;
}

/// Build a gallery by running every readable image in each label's
/// directory through the embedder.
///
/// Images with several detected faces contribute only the single
/// highest-confidence face — multiple identities are never mixed under one
/// label. Unreadable files and per-image failures are logged and skipped;
/// a label that ends up with zero embeddings still gets an entry and is
/// reported as degraded.
pub fn build_gallery(
    labels_to_dirs: &BTreeMap<String, PathBuf>,
    embedder: &mut dyn FaceEmbedder,
) -> Result<Gallery, IdentifyError> {
    let mut entries = Vec::with_capacity(labels_to_dirs.len());

    for (label, dir) in labels_to_dirs {
        let embeddings = embed_directory(label, dir, embedder);
        if embeddings.is_empty() {
            tracing::warn!(label, dir = %dir.display(), "label degraded: no usable embeddings");
        } else {
            tracing::info!(label, count = embeddings.len(), "gallery label built");
        }
        entries.push(GalleryEntry {
            label: label.clone(),
            embeddings,
        });
    }

    Ok(Gallery::new(entries, embedder.encoder()))
}

fn embed_directory(label: &str, dir: &Path, embedder: &mut dyn FaceEmbedder) -> Vec<Embedding> {
    let read_dir = match std::fs::read_dir(dir) {
        Ok(rd) => rd,
        Err(e) => {
            tracing::warn!(label, dir = %dir.display(), error = %e, "cannot read label directory");
            return Vec::new();
        }
    };

    let mut files: Vec<PathBuf> = read_dir
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    files.sort();

    let mut embeddings = Vec::new();
    for path in files {
        let bytes = match std::fs::read(&path) {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(file = %path.display(), error = %e, "skipping unreadable file");
                continue;
            }
        };
        let image = match crate::preprocess::decode_image(&bytes) {
            Ok(img) => img,
            Err(e) => {
                tracing::warn!(file = %path.display(), error = %e, "skipping undecodable file");
                continue;
            }
        };
        match embedder.embed_best_face(&image) {
            Ok(Some(embedding)) => embeddings.push(embedding),
            Ok(None) => {
                tracing::debug!(file = %path.display(), "no face found in gallery image");
            }
            Err(e) => {
                tracing::warn!(file = %path.display(), error = %e, "embedding failed for gallery image");
            }
        }
    }

    embeddings
}
