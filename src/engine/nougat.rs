//! Nougat CLI subprocess adapter.
//!
//! Wraps the `nougat` academic-document OCR tool. Each call writes the page
//! image to a temp directory, runs the CLI against it, and reads the `.mmd`
//! file it leaves behind. Strong on math and academic layouts; no figure
//! support.

use async_trait::async_trait;
use image::DynamicImage;
use tokio::process::Command;
use tracing::debug;

use crate::config::NougatConfig;
use crate::error::EngineError;

use super::{EngineAdapter, EngineCapabilities, EngineKind, Recognition};

const ENGINE: &str = "nougat";

pub struct NougatEngine {
    command: String,
}

impl NougatEngine {
    pub fn new(config: &NougatConfig) -> Self {
        Self {
            command: config.command.clone(),
        }
    }

    fn backend_err(&self, detail: impl Into<String>) -> EngineError {
        EngineError::Backend {
            engine: ENGINE.to_string(),
            detail: detail.into(),
        }
    }
}

#[async_trait]
impl EngineAdapter for NougatEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Nougat
    }

    fn capabilities(&self) -> EngineCapabilities {
        EngineCapabilities {
            is_local: true,
            supports_figures: false,
            cost_per_page: 0.0,
        }
    }

    async fn probe_available(&self) -> bool {
        Command::new(&self.command)
            .arg("--help")
            .output()
            .await
            .map(|out| out.status.success())
            .unwrap_or(false)
    }

    async fn recognize_page(
        &self,
        image: &DynamicImage,
        page_num: usize,
    ) -> Result<Recognition, EngineError> {
        // Write the page image to a temp dir and point the CLI at it.
        let tmpdir = tempfile::TempDir::with_prefix("nougat")
            .map_err(|e| self.backend_err(format!("cannot create temp dir: {e}")))?;
        let input_path = tmpdir.path().join("page.png");
        let out_dir = tmpdir.path().join("out");

        image
            .save(&input_path)
            .map_err(|e| self.backend_err(format!("cannot write input image: {e}")))?;
        std::fs::create_dir(&out_dir)
            .map_err(|e| self.backend_err(format!("cannot create output dir: {e}")))?;

        let output = Command::new(&self.command)
            .arg(&input_path)
            .arg("--out")
            .arg(&out_dir)
            .arg("--no-skipping")
            .output()
            .await
            .map_err(|e| self.backend_err(format!("cannot run '{}': {e}", self.command)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(self.backend_err(format!(
                "'{}' exited with {}: {}",
                self.command,
                output.status,
                stderr.trim().chars().take(300).collect::<String>()
            )));
        }

        // Nougat writes <input stem>.mmd into the output directory.
        let result_path = out_dir.join("page.mmd");
        let text = std::fs::read_to_string(&result_path).map_err(|e| {
            EngineError::MalformedResponse {
                engine: ENGINE.to_string(),
                detail: format!("missing output file '{}': {e}", result_path.display()),
            }
        })?;

        debug!(page_num, bytes = text.len(), "nougat call complete");
        Ok(Recognition {
            text: text.trim().to_string(),
            confidence: None,
        })
    }
}
