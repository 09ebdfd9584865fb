//! Batch CLI for the tally-sheet scan pipeline.
//!
//! # Usage
//!
//! ```bash
//! tally-scan run \
//!     --scan-dir scans/ \
//!     --out-dir sheets/ \
//!     --vocabulary snapshot.json \
//!     [--config pipeline.toml] [--debug-dir debug/]
//! ```
//!
//! The vocabulary snapshot is a JSON export of the product and member
//! database. Requires a build with the `tesseract` feature for the OCR
//! backend.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use tally_scan::{
    AbortFlag, BatchDriver, OcrClient, PipelineConfig, ScanError, SheetTemplate, Vocabularies,
    VocabularySnapshot,
};

#[derive(Parser)]
#[command(name = "tally-scan")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Converts photographed tally sheets into structured sheet files", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process every scan in a directory
    Run {
        /// Directory of raw scan images
        #[arg(long = "scan-dir")]
        scan_dir: PathBuf,

        /// Directory receiving sheet JSON files and previews
        #[arg(long = "out-dir")]
        out_dir: PathBuf,

        /// JSON snapshot of products and member ids
        #[arg(long)]
        vocabulary: PathBuf,

        /// Optional TOML pipeline configuration
        #[arg(long)]
        config: Option<PathBuf>,

        /// Directory receiving per-step diagnostic images
        #[arg(long = "debug-dir")]
        debug_dir: Option<PathBuf>,

        /// Sheet name assigned when the name box cannot be resolved
        #[arg(long = "fallback-name", default_value = "unknown_sheet")]
        fallback_name: String,

        /// Tesseract language code
        #[arg(long, default_value = "eng")]
        language: String,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run(Cli::parse()) {
        error!(error = %e, "batch failed");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), ScanError> {
    let Commands::Run {
        scan_dir,
        out_dir,
        vocabulary,
        config,
        debug_dir,
        fallback_name,
        language,
    } = cli.command;

    let config = match config {
        Some(path) => PipelineConfig::from_toml_path(&path)?,
        None => PipelineConfig::default(),
    };

    let snapshot = VocabularySnapshot::from_json_path(&vocabulary)?;
    info!(
        products = snapshot.products.len(),
        members = snapshot.member_ids.len(),
        "vocabulary snapshot loaded"
    );
    let vocabularies = Vocabularies::build(&snapshot, &config.recognize);
    let template = SheetTemplate::standard(config.scan.target_width, config.scan.target_height);

    let mut ocr = build_ocr_client(
        &language,
        Duration::from_millis(config.recognize.ocr_timeout_ms),
    )?;

    let driver = BatchDriver::new(&config, &template, &vocabularies, fallback_name);
    let summary = driver.run(
        &scan_dir,
        &out_dir,
        debug_dir.as_deref(),
        &mut ocr,
        &AbortFlag::new(),
    )?;

    for path in &summary.partial_scans {
        warn!(scan = %path.display(), "scan produced fewer sheets than configured quadrants");
    }
    info!(
        sheets = summary.sheets_written.len(),
        empty_quadrants = summary.empty_quadrants,
        "done"
    );
    Ok(())
}

#[cfg(feature = "tesseract")]
fn build_ocr_client(language: &str, timeout: Duration) -> Result<OcrClient, ScanError> {
    let language = language.to_string();
    OcrClient::spawn(
        move || tally_scan::TesseractEngine::new(&language),
        timeout,
    )
}

#[cfg(not(feature = "tesseract"))]
fn build_ocr_client(_language: &str, _timeout: Duration) -> Result<OcrClient, ScanError> {
    Err(ScanError::config(
        "this build has no OCR backend; rebuild with --features tesseract",
    ))
}
