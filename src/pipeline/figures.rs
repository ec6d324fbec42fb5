//! Stage 4: figure description.
//!
//! Candidate regions come from the caller's [`RegionExtractor`]; this stage
//! owns everything after detection. Filtering and capping happen *before*
//! any engine call — vision calls are the expensive part, so a document
//! with 200 candidate regions still makes at most `figures_max_total`
//! calls. Caps are applied in page order, first candidates winning, so
//! which figures get described is deterministic.
//!
//! A failed or timed-out description never drops the figure: the region was
//! real, so it is recorded with type `unknown` and an empty description.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use image::DynamicImage;
use tracing::{debug, warn};

use crate::config::PipelineConfig;
use crate::document::Document;
use crate::engine::EngineAdapter;
use crate::output::{DocumentResult, FigureResult};
use crate::pipeline::extract::Region;
use crate::progress::{PipelineStage, ProgressCallback};

/// A region that survived filtering and capping, ready for description.
struct PlannedFigure {
    page_num: usize,
    figure_num: usize,
    crop: DynamicImage,
    context: String,
    region: Region,
}

/// Run the figure pass and attach results to `result`'s pages.
pub async fn run_figure_pass(
    engine: &Arc<dyn EngineAdapter>,
    document: &Document,
    result: &mut DocumentResult,
    candidates: Vec<Region>,
    config: &PipelineConfig,
    progress: Option<&ProgressCallback>,
) {
    let planned = plan_figures(document, result, candidates, config);
    if let Some(cb) = progress {
        cb.on_stage_start(PipelineStage::Figures, planned.len());
    }
    if planned.is_empty() {
        return;
    }
    debug!(count = planned.len(), engine = %engine.kind(), "describing figures");

    let timeout = Duration::from_secs(config.figure_timeout_secs);
    let mut described: Vec<(usize, FigureResult)> = stream::iter(planned)
        .map(|figure| {
            let engine = Arc::clone(engine);
            async move { describe_figure(&engine, figure, timeout, progress).await }
        })
        .buffer_unordered(config.figure_workers.max(1))
        .collect()
        .await;

    described.sort_by_key(|(page_num, fig)| (*page_num, fig.figure_num));
    for (page_num, mut fig) in described {
        if config.save_figures {
            fig.image_path = save_crop(document, config, page_num, &fig);
        }
        if let Some(page) = result.page_mut(page_num) {
            page.figures.push(fig);
        }
    }
}

/// Filter and cap candidates, crop their images, and assign figure numbers.
fn plan_figures(
    document: &Document,
    result: &DocumentResult,
    mut candidates: Vec<Region>,
    config: &PipelineConfig,
) -> Vec<PlannedFigure> {
    // Page order first; within a page, candidate order is preserved.
    candidates.sort_by_key(|r| r.page_num);

    let mut planned = Vec::new();
    let mut current_page = 0usize;
    let mut per_page = 0usize;

    for region in candidates {
        if planned.len() >= config.figures_max_total {
            break;
        }
        if region.page_num != current_page {
            current_page = region.page_num;
            per_page = 0;
        }
        if per_page >= config.figures_max_per_page {
            continue;
        }

        let Some(page_image) = document.page(region.page_num) else {
            warn!(page_num = region.page_num, "figure region references missing page");
            continue;
        };
        let Some(crop) = crop_region(page_image, &region, config) else {
            continue;
        };

        per_page += 1;
        let context = page_context(result, region.page_num, config.figures_context_max_chars);
        planned.push(PlannedFigure {
            page_num: region.page_num,
            figure_num: per_page,
            crop,
            context,
            region,
        });
    }
    planned
}

/// Clamp, filter, crop, and downscale one region. `None` means the region
/// failed a filter and costs nothing.
fn crop_region(
    page_image: &DynamicImage,
    region: &Region,
    config: &PipelineConfig,
) -> Option<DynamicImage> {
    let mut bbox = region.bbox;
    bbox.x1 = bbox.x1.min(page_image.width());
    bbox.y1 = bbox.y1.min(page_image.height());

    if bbox.area() < config.figure_min_area {
        debug!(?bbox, "figure region below minimum area, skipped");
        return None;
    }
    if bbox.aspect_ratio() > config.figure_max_aspect {
        debug!(?bbox, "figure region too elongated, skipped");
        return None;
    }

    let crop = page_image.crop_imm(bbox.x0, bbox.y0, bbox.width(), bbox.height());
    if crop.width() > config.figure_max_dim || crop.height() > config.figure_max_dim {
        Some(crop.thumbnail(config.figure_max_dim, config.figure_max_dim))
    } else {
        Some(crop)
    }
}

/// Surrounding page text for the figure prompt, truncated on a char
/// boundary.
fn page_context(result: &DocumentResult, page_num: usize, max_chars: usize) -> String {
    result
        .page(page_num)
        .map(|p| p.text.chars().take(max_chars).collect())
        .unwrap_or_default()
}

async fn describe_figure(
    engine: &Arc<dyn EngineAdapter>,
    figure: PlannedFigure,
    timeout: Duration,
    progress: Option<&ProgressCallback>,
) -> (usize, FigureResult) {
    if let Some(cb) = progress {
        cb.on_page_start(PipelineStage::Figures, figure.page_num, 0);
    }

    let outcome =
        tokio::time::timeout(timeout, engine.describe_figure(&figure.crop, &figure.context)).await;

    let fig = match outcome {
        Ok(Ok(description)) => {
            if let Some(cb) = progress {
                cb.on_page_complete(PipelineStage::Figures, figure.page_num, 0);
            }
            FigureResult {
                figure_num: figure.figure_num,
                figure_type: description.figure_type,
                description: description.description,
                bbox: figure.region.bbox,
                engine: engine.kind().to_string(),
                image_path: None,
            }
        }
        Ok(Err(e)) => {
            warn!(page_num = figure.page_num, error = %e, "figure description failed");
            if let Some(cb) = progress {
                cb.on_page_error(PipelineStage::Figures, figure.page_num, &e.to_string());
            }
            unknown_figure(&figure)
        }
        Err(_) => {
            warn!(page_num = figure.page_num, "figure description timed out");
            if let Some(cb) = progress {
                cb.on_page_error(PipelineStage::Figures, figure.page_num, "timed out");
            }
            unknown_figure(&figure)
        }
    };
    (figure.page_num, fig)
}

fn unknown_figure(figure: &PlannedFigure) -> FigureResult {
    FigureResult {
        figure_num: figure.figure_num,
        figure_type: "unknown".to_string(),
        description: String::new(),
        bbox: figure.region.bbox,
        engine: String::new(),
        image_path: None,
    }
}

/// Save the cropped region next to the report. A save failure only warns;
/// the description itself is already in hand.
fn save_crop(
    document: &Document,
    config: &PipelineConfig,
    page_num: usize,
    fig: &FigureResult,
) -> Option<std::path::PathBuf> {
    let dir = config.figures_dir.as_ref()?;
    if let Err(e) = std::fs::create_dir_all(dir) {
        warn!(dir = %dir.display(), error = %e, "cannot create figures directory");
        return None;
    }
    let path = dir.join(format!(
        "{}_p{:03}_f{}.png",
        document.stem(),
        page_num,
        fig.figure_num
    ));
    let Some(page_image) = document.page(page_num) else {
        return None;
    };
    let bbox = fig.bbox;
    let crop = page_image.crop_imm(
        bbox.x0,
        bbox.y0,
        bbox.width().min(page_image.width().saturating_sub(bbox.x0)),
        bbox.height().min(page_image.height().saturating_sub(bbox.y0)),
    );
    match crop.save(&path) {
        Ok(()) => Some(path),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot save figure crop");
            None
        }
    }
}
