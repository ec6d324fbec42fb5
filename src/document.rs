//! Document input: an ordered set of page images plus a stable stem name.
//!
//! The pipeline consumes pre-rendered page images. The two ways to build a
//! [`Document`]:
//!
//! * [`Document::from_dir`] — a directory of `.png`/`.jpg`/`.jpeg` files,
//!   one per page, ordered by file name (zero-padded names recommended).
//! * [`Document::from_images`] — in-memory images, used by embedding
//!   applications and tests.
//!
//! Page numbers are 1-indexed everywhere in this crate.

use std::path::{Path, PathBuf};

use image::DynamicImage;
use tracing::debug;

use crate::error::OcrError;

/// A loaded document: stem name plus its page images in order.
#[derive(Debug)]
pub struct Document {
    stem: String,
    pages: Vec<DynamicImage>,
}

impl Document {
    /// Build a document from in-memory page images.
    ///
    /// Returns [`OcrError::EmptyDocument`] when `pages` is empty.
    pub fn from_images(
        stem: impl Into<String>,
        pages: Vec<DynamicImage>,
    ) -> Result<Self, OcrError> {
        let stem = stem.into();
        if pages.is_empty() {
            return Err(OcrError::EmptyDocument {
                path: PathBuf::from(&stem),
            });
        }
        Ok(Self { stem, pages })
    }

    /// Load a document from a directory of page images.
    ///
    /// Files with extensions `.png`, `.jpg` or `.jpeg` (case-insensitive)
    /// are loaded in lexicographic file-name order; everything else is
    /// ignored. The directory name becomes the document stem.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self, OcrError> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(OcrError::DocumentNotFound {
                path: dir.to_path_buf(),
            });
        }

        let mut image_paths: Vec<PathBuf> = std::fs::read_dir(dir)
            .map_err(|e| OcrError::PageLoadFailed {
                path: dir.to_path_buf(),
                detail: e.to_string(),
            })?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| is_page_image(p))
            .collect();
        image_paths.sort();

        if image_paths.is_empty() {
            return Err(OcrError::EmptyDocument {
                path: dir.to_path_buf(),
            });
        }

        let mut pages = Vec::with_capacity(image_paths.len());
        for path in &image_paths {
            let img = image::open(path).map_err(|e| OcrError::PageLoadFailed {
                path: path.clone(),
                detail: e.to_string(),
            })?;
            pages.push(img);
        }

        let stem = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());

        debug!(stem = %stem, page_count = pages.len(), "loaded document");
        Ok(Self { stem, pages })
    }

    /// Stable stem name used in reports and output file names.
    pub fn stem(&self) -> &str {
        &self.stem
    }

    /// Number of pages.
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Page image by 1-indexed page number.
    pub fn page(&self, page_num: usize) -> Option<&DynamicImage> {
        page_num.checked_sub(1).and_then(|i| self.pages.get(i))
    }

    /// Iterate `(page_num, image)` pairs, 1-indexed, in order.
    pub fn iter_pages(&self) -> impl Iterator<Item = (usize, &DynamicImage)> {
        self.pages.iter().enumerate().map(|(i, img)| (i + 1, img))
    }
}

fn is_page_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let e = e.to_ascii_lowercase();
            e == "png" || e == "jpg" || e == "jpeg"
        })
        .unwrap_or(false)
}
