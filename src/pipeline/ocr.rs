//! Bounded concurrent page recognition with per-page deadlines.
//!
//! One engine, many pages: tasks run through `buffer_unordered` so at most
//! `workers` engine calls are in flight, results complete out of order, and
//! the batch is sorted back by page number at the end. Every failure mode —
//! backend error, timeout — is folded into the page's own result; nothing
//! here aborts sibling pages.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use image::DynamicImage;
use tracing::{debug, warn};

use crate::engine::EngineAdapter;
use crate::error::EngineError;
use crate::output::{PageResult, PageStatus};
use crate::progress::{PipelineStage, ProgressCallback};

/// Recognise a batch of pages on one engine.
///
/// `tasks` pairs 1-indexed page numbers with their images; `total_pages`
/// is the document's page count (for progress reporting). The returned
/// results are sorted by page number and contain one entry per task.
pub async fn recognize_pages(
    engine: &Arc<dyn EngineAdapter>,
    tasks: Vec<(usize, &DynamicImage)>,
    total_pages: usize,
    workers: usize,
    timeout_secs: u64,
    stage: PipelineStage,
    progress: Option<&ProgressCallback>,
) -> Vec<PageResult> {
    let mut results: Vec<PageResult> = stream::iter(tasks)
        .map(|(page_num, image)| {
            let engine = Arc::clone(engine);
            async move {
                if let Some(cb) = progress {
                    cb.on_page_start(stage, page_num, total_pages);
                }
                let result = recognize_one(&engine, page_num, image, timeout_secs).await;
                if let Some(cb) = progress {
                    match &result.error {
                        None => cb.on_page_complete(stage, page_num, total_pages),
                        Some(err) => cb.on_page_error(stage, page_num, err),
                    }
                }
                result
            }
        })
        .buffer_unordered(workers.max(1))
        .collect()
        .await;

    // Completion order is nondeterministic; page order is the contract.
    results.sort_by_key(|r| r.page_num);
    results
}

/// One engine call under a deadline, folded into a `PageResult`.
///
/// A page that fails keeps `engine: None` — no engine produced its stored
/// (empty) output, and attribution counts only real output.
pub async fn recognize_one(
    engine: &Arc<dyn EngineAdapter>,
    page_num: usize,
    image: &DynamicImage,
    timeout_secs: u64,
) -> PageResult {
    let start = Instant::now();
    let deadline = Duration::from_secs(timeout_secs);

    let outcome = tokio::time::timeout(deadline, engine.recognize_page(image, page_num)).await;
    let duration_ms = start.elapsed().as_millis() as u64;

    match outcome {
        Ok(Ok(recognition)) => {
            debug!(
                engine = %engine.kind(),
                page_num,
                chars = recognition.text.chars().count(),
                duration_ms,
                "page recognised"
            );
            PageResult {
                page_num,
                text: recognition.text,
                status: PageStatus::Success,
                engine: Some(engine.kind().to_string()),
                confidence: recognition.confidence,
                cost: engine.capabilities().cost_per_page,
                duration_ms,
                error: None,
                figures: Vec::new(),
                audit: None,
            }
        }
        Ok(Err(e)) => {
            warn!(engine = %engine.kind(), page_num, error = %e, "page recognition failed");
            failed_result(page_num, duration_ms, e.to_string())
        }
        Err(_) => {
            let e = EngineError::Timeout {
                engine: engine.kind().to_string(),
                page: page_num,
                secs: timeout_secs,
            };
            warn!(engine = %engine.kind(), page_num, "page recognition timed out");
            failed_result(page_num, duration_ms, e.to_string())
        }
    }
}

fn failed_result(page_num: usize, duration_ms: u64, error: String) -> PageResult {
    PageResult {
        page_num,
        text: String::new(),
        status: PageStatus::Failed,
        engine: None,
        confidence: None,
        cost: 0.0,
        duration_ms,
        error: Some(error),
        figures: Vec::new(),
        audit: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineCapabilities, EngineKind, Recognition};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingEngine {
        in_flight: AtomicUsize,
        max_seen: AtomicUsize,
        delay_ms: u64,
        fail_pages: Vec<usize>,
    }

    #[async_trait]
    impl EngineAdapter for CountingEngine {
        fn kind(&self) -> EngineKind {
            EngineKind::Deepseek
        }

        fn capabilities(&self) -> EngineCapabilities {
            EngineCapabilities {
                is_local: true,
                supports_figures: false,
                cost_per_page: 0.0,
            }
        }

        async fn probe_available(&self) -> bool {
            true
        }

        async fn recognize_page(
            &self,
            _image: &DynamicImage,
            page_num: usize,
        ) -> Result<Recognition, crate::error::EngineError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_seen.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.fail_pages.contains(&page_num) {
                return Err(crate::error::EngineError::Backend {
                    engine: "deepseek".into(),
                    detail: "boom".into(),
                });
            }
            Ok(Recognition {
                text: format!("text of page {page_num}"),
                confidence: Some(0.9),
            })
        }
    }

    fn img() -> DynamicImage {
        DynamicImage::new_rgb8(4, 4)
    }

    #[tokio::test]
    async fn results_come_back_in_page_order() {
        let engine: Arc<dyn EngineAdapter> = Arc::new(CountingEngine {
            in_flight: AtomicUsize::new(0),
            max_seen: AtomicUsize::new(0),
            delay_ms: 5,
            fail_pages: vec![],
        });
        let images: Vec<DynamicImage> = (0..6).map(|_| img()).collect();
        let tasks: Vec<(usize, &DynamicImage)> =
            images.iter().enumerate().map(|(i, im)| (i + 1, im)).collect();

        let results = recognize_pages(&engine, tasks, 6, 3, 30, PipelineStage::Primary, None).await;
        let nums: Vec<usize> = results.iter().map(|r| r.page_num).collect();
        assert_eq!(nums, vec![1, 2, 3, 4, 5, 6]);
        assert!(results.iter().all(|r| r.status == PageStatus::Success));
    }

    #[tokio::test]
    async fn concurrency_is_bounded_by_workers() {
        let engine = Arc::new(CountingEngine {
            in_flight: AtomicUsize::new(0),
            max_seen: AtomicUsize::new(0),
            delay_ms: 20,
            fail_pages: vec![],
        });
        let dyn_engine: Arc<dyn EngineAdapter> = engine.clone();
        let images: Vec<DynamicImage> = (0..8).map(|_| img()).collect();
        let tasks: Vec<(usize, &DynamicImage)> =
            images.iter().enumerate().map(|(i, im)| (i + 1, im)).collect();

        recognize_pages(&dyn_engine, tasks, 8, 2, 30, PipelineStage::Primary, None).await;
        assert!(engine.max_seen.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn one_failed_page_does_not_poison_the_batch() {
        let engine: Arc<dyn EngineAdapter> = Arc::new(CountingEngine {
            in_flight: AtomicUsize::new(0),
            max_seen: AtomicUsize::new(0),
            delay_ms: 1,
            fail_pages: vec![2],
        });
        let images: Vec<DynamicImage> = (0..3).map(|_| img()).collect();
        let tasks: Vec<(usize, &DynamicImage)> =
            images.iter().enumerate().map(|(i, im)| (i + 1, im)).collect();

        let results = recognize_pages(&engine, tasks, 3, 2, 30, PipelineStage::Primary, None).await;
        assert_eq!(results[0].status, PageStatus::Success);
        assert_eq!(results[1].status, PageStatus::Failed);
        assert!(results[1].engine.is_none());
        assert!(results[1].error.as_deref().unwrap_or("").contains("boom"));
        assert_eq!(results[2].status, PageStatus::Success);
    }

    #[tokio::test]
    async fn timeout_becomes_a_failed_page() {
        let engine: Arc<dyn EngineAdapter> = Arc::new(CountingEngine {
            in_flight: AtomicUsize::new(0),
            max_seen: AtomicUsize::new(0),
            delay_ms: 2_000,
            fail_pages: vec![],
        });
        let image = img();
        let result = recognize_one(&engine, 1, &image, 1).await;
        assert_eq!(result.status, PageStatus::Failed);
        assert!(result.error.as_deref().unwrap_or("").contains("timed out"));
        assert!(result.engine.is_none());
    }
}
