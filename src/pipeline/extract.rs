//! Figure-region extraction interface.
//!
//! Detecting figure regions is layout analysis, not OCR, and the best
//! detectors are document-format specific. The pipeline therefore takes
//! region candidates through a trait the caller implements; what this crate
//! owns is everything after detection — filtering, capping, cropping,
//! describing. The shipped default finds nothing, which turns the figure
//! pass into a no-op.

use crate::document::Document;
use crate::error::ExtractError;
use crate::output::BBox;

/// A candidate figure region on a page, before filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    /// 1-indexed page number.
    pub page_num: usize,
    /// Bounding box in page-pixel coordinates.
    pub bbox: BBox,
}

/// Supplies candidate figure regions for a document.
///
/// Implementations are synchronous and should be cheap relative to engine
/// calls; run heavyweight detection up front and hand the pipeline a
/// precomputed list if needed. Candidate order within a page matters: when
/// caps bind, the first candidates win.
///
/// An `Err` skips the figure pass for the whole document; page OCR results
/// are never affected by it.
pub trait RegionExtractor: Send + Sync {
    fn regions(&self, document: &Document) -> Result<Vec<Region>, ExtractError>;
}

/// The default extractor: no regions, no figure descriptions.
pub struct NoopExtractor;

impl RegionExtractor for NoopExtractor {
    fn regions(&self, _document: &Document) -> Result<Vec<Region>, ExtractError> {
        Ok(Vec::new())
    }
}

/// A fixed candidate list, mostly useful for tests and for callers that
/// ran detection elsewhere.
pub struct FixedRegions(pub Vec<Region>);

impl RegionExtractor for FixedRegions {
    fn regions(&self, _document: &Document) -> Result<Vec<Region>, ExtractError> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::DynamicImage;

    #[test]
    fn noop_extractor_finds_nothing() {
        let doc = Document::from_images("doc", vec![DynamicImage::new_rgb8(8, 8)]).unwrap();
        assert!(NoopExtractor.regions(&doc).unwrap().is_empty());
    }

    #[test]
    fn fixed_regions_returns_candidates_in_order() {
        let doc = Document::from_images("doc", vec![DynamicImage::new_rgb8(8, 8)]).unwrap();
        let regions = vec![
            Region {
                page_num: 1,
                bbox: BBox { x0: 0, y0: 0, x1: 100, y1: 100 },
            },
            Region {
                page_num: 1,
                bbox: BBox { x0: 10, y0: 10, x1: 90, y1: 90 },
            },
        ];
        let extractor = FixedRegions(regions.clone());
        assert_eq!(extractor.regions(&doc).unwrap(), regions);
    }
}
