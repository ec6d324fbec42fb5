//! CLI binary for cascade-ocr.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `PipelineConfig`, renders progress, and prints results.

use anyhow::{Context, Result};
use cascade_ocr::{
    process_batch, process_dir, write_outputs, AuditConfig, DeepseekConfig, EngineKind,
    EngineRegistry, LlmAuditor, NougatConfig, PipelineConfig, PipelineProgressCallback,
    PipelineStage, ProgressCallback,
};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress: one bar that resets per stage, plus per-page log
/// lines. Pages complete out of order under concurrency; the bar only
/// counts completions so ordering does not matter.
struct CliProgressCallback {
    bar: ProgressBar,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  [{bar:40.green/238}] {pos:>3}/{len}  ⏱ {elapsed_precise}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  "),
        );
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            errors: AtomicUsize::new(0),
        })
    }
}

impl PipelineProgressCallback for CliProgressCallback {
    fn on_run_start(&self, total_pages: usize) {
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Processing {total_pages} pages…"))
        ));
    }

    fn on_stage_start(&self, stage: PipelineStage, item_count: usize) {
        self.bar.set_length(item_count as u64);
        self.bar.set_position(0);
        self.bar.set_prefix(match stage {
            PipelineStage::Primary => "OCR",
            PipelineStage::Audit => "Audit",
            PipelineStage::Fallback => "Fallback",
            PipelineStage::Figures => "Figures",
        });
    }

    fn on_page_complete(&self, stage: PipelineStage, page_num: usize, _total: usize) {
        if stage != PipelineStage::Audit {
            self.bar
                .println(format!("  {} {} page {page_num}", green("✓"), stage));
            self.bar.inc(1);
        }
    }

    fn on_page_error(&self, stage: PipelineStage, page_num: usize, error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
        let msg: String = error.chars().take(80).collect();
        self.bar.println(format!(
            "  {} {} page {page_num}  {}",
            red("✗"),
            stage,
            red(&msg)
        ));
        self.bar.inc(1);
    }

    fn on_run_complete(&self, total_pages: usize, success_count: usize, flagged_count: usize) {
        self.bar.finish_and_clear();
        if flagged_count == 0 {
            eprintln!(
                "{} {} pages processed successfully",
                green("✔"),
                bold(&success_count.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} pages ok  ({} need another look)",
                yellow("⚠"),
                bold(&success_count.to_string()),
                total_pages,
                yellow(&flagged_count.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Process a directory of page images (page-001.png, page-002.png, …)
  cascade-ocr process scans/report -o out/

  # Structured JSON to stdout
  cascade-ocr process scans/report --format json > report.json

  # Force engines per role
  cascade-ocr process scans/report --primary nougat --fallback gemini

  # No quality gate, no figure pass
  cascade-ocr process scans/report --no-audit --no-figures

  # Whole corpus, one subdirectory per document
  cascade-ocr batch scans/ -o out/

  # What can run on this machine?
  cascade-ocr engines

  # Is the LLM auditor usable?
  cascade-ocr audit-status

ENGINES:
  Engine     Where         $/page    Strengths
  ─────────  ───────────   ───────   ─────────────────────────
  deepseek   local Ollama  free      general pages, privacy
  nougat     local CLI     free      academic layouts, math
  gemini     cloud         ~$0.0002  degraded scans, figures
  mistral    cloud         ~$0.001   last resort, figures

ENVIRONMENT VARIABLES:
  GEMINI_API_KEY / GOOGLE_API_KEY   Google Gemini API key
  MISTRAL_API_KEY                   Mistral API key
  CASCADE_OCR_OLLAMA_HOST           Ollama base URL (default http://localhost:11434)

SETUP:
  1. Local engine:   ollama pull deepseek-ocr   (and/or: pip install nougat-ocr)
  2. Process:        cascade-ocr process scans/report -o out/
"#;

/// Multi-engine OCR with quality auditing and cascading fallback.
#[derive(Parser, Debug)]
#[command(
    name = "cascade-ocr",
    version,
    about = "Multi-engine OCR with quality auditing and cascading fallback",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "CASCADE_OCR_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "CASCADE_OCR_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process one document (a directory of page images).
    Process {
        /// Directory containing page images (.png/.jpg), one per page.
        input: PathBuf,

        #[command(flatten)]
        opts: PipelineOpts,

        /// Write <stem>.md and <stem>.json into this directory.
        #[arg(short, long, env = "CASCADE_OCR_OUTPUT")]
        out_dir: Option<PathBuf>,

        /// Stdout format when --out-dir is not given.
        #[arg(long, value_enum, default_value_t = OutputFormat::Markdown)]
        format: OutputFormat,

        /// Disable the progress bar.
        #[arg(long, env = "CASCADE_OCR_NO_PROGRESS")]
        no_progress: bool,
    },

    /// Process every document directory under a root directory.
    Batch {
        /// Root directory; each subdirectory is one document.
        root: PathBuf,

        #[command(flatten)]
        opts: PipelineOpts,

        /// Write per-document reports into this directory.
        #[arg(short, long, env = "CASCADE_OCR_OUTPUT")]
        out_dir: PathBuf,

        /// Process at most this many documents (in name order).
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Probe all engines and report which can run on this machine.
    Engines,

    /// Check whether the LLM quality auditor is usable.
    AuditStatus {
        /// Auditor model tag.
        #[arg(long, env = "CASCADE_OCR_AUDIT_MODEL", default_value = "llama3.2")]
        model: String,

        /// Ollama base URL.
        #[arg(
            long,
            env = "CASCADE_OCR_OLLAMA_HOST",
            default_value = "http://localhost:11434"
        )]
        ollama_host: String,
    },
}

/// Pipeline flags shared by `process` and `batch`.
#[derive(clap::Args, Debug)]
struct PipelineOpts {
    /// Force the primary engine: deepseek, nougat, gemini, mistral.
    #[arg(long, value_parser = parse_engine)]
    primary: Option<EngineKind>,

    /// Force the fallback engine.
    #[arg(long, value_parser = parse_engine)]
    fallback: Option<EngineKind>,

    /// Force the figure engine.
    #[arg(long, value_parser = parse_engine)]
    figure_engine: Option<EngineKind>,

    /// Concurrent page-level engine calls.
    #[arg(short = 'w', long, env = "CASCADE_OCR_WORKERS", default_value_t = 4)]
    workers: usize,

    /// Per-page engine deadline in seconds.
    #[arg(long, env = "CASCADE_OCR_PAGE_TIMEOUT", default_value_t = 300)]
    page_timeout: u64,

    /// Disable the quality gate (only hard failures cascade).
    #[arg(long)]
    no_audit: bool,

    /// Disable the LLM-audit stage (heuristics still run).
    #[arg(long)]
    no_llm_audit: bool,

    /// Cross-check the first pages on a second engine.
    #[arg(long)]
    cross_check: bool,

    /// Skip the figure pass entirely.
    #[arg(long)]
    no_figures: bool,

    /// Save cropped figure regions as PNGs into this directory.
    #[arg(long)]
    save_figures: Option<PathBuf>,

    /// Ollama base URL for the deepseek engine and the LLM auditor.
    #[arg(
        long,
        env = "CASCADE_OCR_OLLAMA_HOST",
        default_value = "http://localhost:11434"
    )]
    ollama_host: String,

    /// Ollama vision model for the deepseek engine.
    #[arg(long, env = "CASCADE_OCR_DEEPSEEK_MODEL", default_value = "deepseek-ocr")]
    deepseek_model: String,

    /// Ollama text model for the LLM auditor.
    #[arg(long, env = "CASCADE_OCR_AUDIT_MODEL", default_value = "llama3.2")]
    audit_model: String,
}

fn parse_engine(s: &str) -> Result<EngineKind, String> {
    s.parse::<EngineKind>().map_err(|e| e.to_string())
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum OutputFormat {
    /// Full report with summary and inline figures.
    Markdown,
    /// Structured result as pretty-printed JSON.
    Json,
    /// Page texts only, separated by page markers.
    Text,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Suppress INFO-level library logs when the progress bar is active; the
    // bar provides the feedback that matters.
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        match cli.command {
            Command::Process { .. } => "error",
            _ => "info",
        }
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Process {
            input,
            opts,
            out_dir,
            format,
            no_progress,
        } => {
            let show_progress =
                !cli.quiet && !no_progress && (out_dir.is_some() || format == OutputFormat::Markdown);
            let progress: Option<ProgressCallback> = if show_progress {
                Some(CliProgressCallback::new() as Arc<dyn PipelineProgressCallback>)
            } else {
                None
            };
            let config = build_config(&opts, progress)?;

            let result = process_dir(&input, &config)
                .await
                .context("Processing failed")?;

            if let Some(ref dir) = out_dir {
                write_outputs(&result, dir).await.context("Cannot write reports")?;
                if !cli.quiet {
                    eprintln!(
                        "{}  reports in {}",
                        green("✔"),
                        bold(&dir.display().to_string())
                    );
                }
            } else {
                let rendered = match format {
                    OutputFormat::Markdown => result.to_markdown(),
                    OutputFormat::Json => {
                        serde_json::to_string_pretty(&result).context("Cannot serialise result")?
                    }
                    OutputFormat::Text => result.to_plain_text(),
                };
                let stdout = io::stdout();
                let mut handle = stdout.lock();
                handle
                    .write_all(rendered.as_bytes())
                    .context("Cannot write to stdout")?;
                if !rendered.ends_with('\n') {
                    handle.write_all(b"\n").ok();
                }
            }

            if !cli.quiet && !result.pages_needing_reprocessing.is_empty() {
                eprintln!(
                    "{} pages needing reprocessing: {:?}",
                    yellow("⚠"),
                    result.pages_needing_reprocessing
                );
            }
            Ok(())
        }

        Command::Batch {
            root,
            opts,
            out_dir,
            limit,
        } => {
            let config = build_config(&opts, None)?;
            let outcomes = process_batch(&root, &config, limit)
                .await
                .context("Batch failed")?;

            let mut failed_docs = 0usize;
            for (dir, outcome) in &outcomes {
                match outcome {
                    Ok(result) => {
                        write_outputs(result, &out_dir)
                            .await
                            .with_context(|| format!("Cannot write reports for {:?}", dir))?;
                        if !cli.quiet {
                            eprintln!(
                                "{} {}  {}/{} pages",
                                green("✔"),
                                result.stem,
                                result.stats.pages_success,
                                result.stats.total_pages
                            );
                        }
                    }
                    Err(e) => {
                        failed_docs += 1;
                        eprintln!("{} {}  {e}", red("✗"), dir.display());
                    }
                }
            }
            if !cli.quiet {
                eprintln!(
                    "{} {}/{} documents processed",
                    if failed_docs == 0 { green("✔") } else { yellow("⚠") },
                    outcomes.len() - failed_docs,
                    outcomes.len()
                );
            }
            if failed_docs == outcomes.len() {
                anyhow::bail!("every document failed");
            }
            Ok(())
        }

        Command::Engines => {
            let config = PipelineConfig::default();
            let registry = EngineRegistry::from_config(&config);
            println!(
                "{:<10} {:<7} {:<10} {:<9} {}",
                bold("ENGINE"),
                bold("LOCAL"),
                bold("$/PAGE"),
                bold("FIGURES"),
                bold("AVAILABLE")
            );
            for kind in EngineKind::ALL {
                let Some(engine) = registry.get(kind) else {
                    continue;
                };
                let caps = engine.capabilities();
                let available = registry.is_available(kind).await;
                println!(
                    "{:<10} {:<7} {:<10} {:<9} {}",
                    kind,
                    if caps.is_local { "yes" } else { "no" },
                    if caps.cost_per_page == 0.0 {
                        "free".to_string()
                    } else {
                        format!("{:.4}", caps.cost_per_page)
                    },
                    if caps.supports_figures { "yes" } else { "no" },
                    if available {
                        green("yes")
                    } else {
                        dim("no")
                    },
                );
            }
            Ok(())
        }

        Command::AuditStatus { model, ollama_host } => {
            let audit = AuditConfig {
                model: model.clone(),
                ollama_host: ollama_host.clone(),
                ..AuditConfig::default()
            };
            let auditor = LlmAuditor::new(&audit);
            if auditor.is_available().await {
                println!("{} auditor ready: {} @ {}", green("✔"), model, ollama_host);
                Ok(())
            } else {
                println!(
                    "{} auditor unavailable: {} @ {}  (is Ollama running? is the model pulled?)",
                    red("✗"),
                    model,
                    ollama_host
                );
                anyhow::bail!("LLM auditor unavailable");
            }
        }
    }
}

/// Map CLI flags to `PipelineConfig`.
fn build_config(opts: &PipelineOpts, progress: Option<ProgressCallback>) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .page_workers(opts.workers)
        .page_timeout_secs(opts.page_timeout)
        .include_figures(!opts.no_figures)
        .deepseek(DeepseekConfig {
            enabled: true,
            host: opts.ollama_host.clone(),
            model: opts.deepseek_model.clone(),
        })
        .nougat(NougatConfig::default());

    if let Some(kind) = opts.primary {
        builder = builder.primary_override(kind);
    }
    if let Some(kind) = opts.fallback {
        builder = builder.fallback_override(kind);
    }
    if let Some(kind) = opts.figure_engine {
        builder = builder.figure_override(kind);
    }
    if let Some(ref dir) = opts.save_figures {
        builder = builder.save_figures(dir);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    let mut config = builder.build().context("Invalid configuration")?;
    config.audit.enabled = !opts.no_audit;
    config.audit.llm_audit_enabled = !opts.no_llm_audit;
    config.audit.cross_check_enabled = opts.cross_check;
    config.audit.model = opts.audit_model.clone();
    config.audit.ollama_host = opts.ollama_host.clone();
    Ok(config)
}
