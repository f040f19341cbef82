//! CLI tool for slimming Excel workbooks.

use anyhow::{bail, Context, Result};
use clap::Parser;
use slimmer_core::config::{DEFAULT_MAX_EDGE, DEFAULT_QUALITY};
use slimmer_core::{
    CleanupRules, ImageSettings, PrecisionOptions, RunReport, RunRequest, SlimConfig,
    StageSelection,
};
use slimmer_pipeline::PipelineWorker;
use std::path::PathBuf;

/// Shrink .xlsx/.xlsm workbooks without touching the original file.
#[derive(Parser, Debug)]
#[command(name = "excel-slim")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input workbook(s) (.xlsx or .xlsm)
    #[arg(required = true)]
    input: Vec<PathBuf>,

    /// Remove broken and orphaned defined names
    #[arg(short, long)]
    names: bool,

    /// Downscale and re-encode embedded images
    #[arg(short, long)]
    images: bool,

    /// Structural pruning (Precision Plus)
    #[arg(short, long)]
    precision: bool,

    /// Run every stage, with XML cleanup
    #[arg(short, long)]
    all: bool,

    /// Convert opaque images to JPEG (with --precision)
    #[arg(long)]
    aggressive: bool,

    /// Remove references to pruned parts (with --precision)
    #[arg(long)]
    xml_cleanup: bool,

    /// Remove custom XML data parts (with --precision)
    #[arg(long)]
    remove_hidden_data: bool,

    /// Longest image edge in pixels
    #[arg(long, default_value_t = DEFAULT_MAX_EDGE)]
    max_edge: u32,

    /// JPEG quality (1-100)
    #[arg(
        long,
        default_value_t = DEFAULT_QUALITY,
        value_parser = clap::value_parser!(u8).range(1..=100)
    )]
    quality: u8,

    /// Output directory (default: next to the input file)
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Do not write per-stage checkpoint files
    #[arg(long)]
    no_checkpoints: bool,

    /// Extra defined-name pattern (regex) to remove; repeatable
    #[arg(long = "drop-name", value_name = "REGEX")]
    drop_names: Vec<String>,

    /// Print the run report(s) as JSON
    #[arg(long)]
    json: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn selection(&self) -> StageSelection {
        StageSelection {
            defined_names: self.names || self.all,
            images: self.images || self.all,
            precision: self.precision || self.all,
        }
    }

    fn precision_options(&self) -> PrecisionOptions {
        PrecisionOptions {
            aggressive: self.aggressive,
            xml_cleanup: self.xml_cleanup || self.all,
            remove_hidden_data: self.remove_hidden_data,
        }
    }

    fn config(&self) -> SlimConfig {
        let mut rules = CleanupRules::default();
        rules.hidden_name_patterns.extend(self.drop_names.iter().cloned());

        let image = ImageSettings::new(self.max_edge, self.quality);
        if !image.is_recommended() {
            log::warn!(
                "Image settings {}px / quality {} are outside the recommended range",
                image.max_edge,
                image.quality
            );
        }

        let config = SlimConfig::new()
            .with_image(image)
            .with_rules(rules)
            .with_checkpoints(!self.no_checkpoints);
        match &self.output_dir {
            Some(dir) => config.with_output_dir(dir),
            None => config,
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    if args.verbose {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    }

    let worker = PipelineWorker::start(args.config()).context("Failed to start worker")?;

    let mut reports: Vec<RunReport> = Vec::with_capacity(args.input.len());
    for input_path in &args.input {
        if args.verbose {
            eprintln!("Processing: {}", input_path.display());
        }

        let request = RunRequest::new(input_path, args.selection(), args.precision_options());
        let handle = worker
            .submit(request)
            .with_context(|| format!("Failed to queue {}", input_path.display()))?;

        let report = handle.wait_with(|event| {
            if !args.json {
                eprintln!("  {}", event.line());
            }
        });

        if !args.json {
            println!("{}", report.user_message());
        }
        reports.push(report);
    }
    worker.shutdown();

    if args.json {
        let json = serde_json::to_string_pretty(&reports).context("Failed to serialize report")?;
        println!("{}", json);
    }

    let failed = reports.iter().filter(|r| !r.is_success()).count();
    if failed > 0 {
        bail!("{} of {} workbook(s) failed", failed, reports.len());
    }

    Ok(())
}
