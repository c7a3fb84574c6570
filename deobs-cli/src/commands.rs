// CLI command handlers
use anyhow::{bail, Context, Result};
use deobs_core::deobfuscator::batch::{BatchOrchestrator, BatchReport};
use deobs_core::deobfuscator::formatter::SourceFormatter;
use deobs_core::deobfuscator::processor::{FileProcessor, ProcessingResult};
use deobs_core::{DeobsConfig, DeobsError, SourceUnit, TransformPipeline};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Exit status when the batch could not run at all (missing directory, bad configuration).
pub const EXIT_BATCH_FATAL: u8 = 2;
/// Exit status for any other error, and for `--fail-on-error` with failed files.
pub const EXIT_FAILURE: u8 = 1;

/// Command line values that take precedence over the configuration file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub jobs: Option<usize>,
    pub strict: bool,
    pub no_primary: bool,
    pub no_prettier: bool,
}

impl Overrides {
    pub fn apply(&self, config: &mut DeobsConfig) {
        if let Some(jobs) = self.jobs {
            config.jobs = jobs;
        }
        if self.strict {
            config.require_primary_pass = true;
        }
        if self.no_primary {
            config.deobfuscator.enabled = false;
        }
        if self.no_prettier {
            config.formatter.enabled = false;
        }
    }
}

/// Load the configuration file (or defaults) and apply command line overrides.
pub fn load_config(path: Option<&Path>, overrides: &Overrides) -> Result<DeobsConfig> {
    let mut config = match path {
        Some(path) => DeobsConfig::load_from_file(path)
            .with_context(|| format!("Failed to load configuration: {}", path.display()))?,
        None => DeobsConfig::default(),
    };
    overrides.apply(&mut config);
    let invalid = |message: String| DeobsError::Config {
        path: "command line".to_string(),
        message,
    };
    if config.require_primary_pass && !config.deobfuscator.enabled {
        let message = "--strict requires the primary pass, but it is disabled";
        return Err(invalid(message.to_string()).into());
    }
    config.validate().map_err(invalid)?;
    Ok(config)
}

/// De-obfuscate every eligible file in `dir`.
///
/// # Arguments
/// * `dir` - Directory to scan (not recursive)
/// * `config` - Effective configuration
/// * `report_path` - Where to write the JSON report, if anywhere
/// * `show_progress` - Draw a progress bar on stderr
/// * `cancel` - Once set, no further files are started
pub fn run_batch(
    dir: &Path,
    config: &DeobsConfig,
    report_path: Option<&Path>,
    show_progress: bool,
    cancel: Arc<AtomicBool>,
) -> Result<BatchReport> {
    let pb = if show_progress {
        create_progress_bar()
    } else {
        ProgressBar::hidden()
    };
    let pb_worker = pb.clone();

    let orchestrator = BatchOrchestrator::from_config(config)
        .with_cancel_flag(cancel)
        .with_progress(move |file, done, total| {
            pb_worker.set_length(total as u64);
            pb_worker.set_position(done as u64);
            if let Some(name) = file.input.file_name() {
                pb_worker.set_message(name.to_string_lossy().into_owned());
            }
        });

    let report = orchestrator
        .run(dir)
        .with_context(|| format!("Failed to process directory: {}", dir.display()))?;
    pb.finish_and_clear();

    print!("{}", report);

    if let Some(path) = report_path {
        let json = report.to_json_pretty().context("Failed to serialize batch report")?;
        fs::write(path, json)
            .with_context(|| format!("Failed to write report: {}", path.display()))?;
        println!("\nReport written to {}", path.display());
    }

    Ok(report)
}

/// Run the full lifecycle on a single file.
pub fn process_file(path: &Path, config: &DeobsConfig) -> Result<ProcessingResult> {
    if !path.is_file() {
        bail!("Not a file: {}", path.display());
    }
    let result = FileProcessor::from_config(config).process(path);
    match &result {
        ProcessingResult::Success { output } => println!("Wrote {}", output.display()),
        ProcessingResult::Failure { reason } => {
            println!("Failed to process {}: {}", path.display(), reason)
        }
    }
    Ok(result)
}

/// Run the transform pipeline on a file and return the result.
///
/// Nothing is written: no backup, no primary pass, no output file.
pub fn transform_file(path: &Path, config: &DeobsConfig) -> Result<String> {
    let bytes =
        fs::read(path).with_context(|| format!("Failed to read file: {}", path.display()))?;
    let unit = SourceUnit::new(String::from_utf8_lossy(&bytes).into_owned());
    let pipeline = TransformPipeline::new(SourceFormatter::from_settings(&config.formatter));
    let (result, trace) = pipeline.run_with_trace(&unit);
    for record in trace.degraded() {
        log::warn!("Stage {} degraded for {}", record.stage, path.display());
    }
    Ok(result.into_string())
}

/// Effective configuration as JSON, optionally saved to `save_to`.
pub fn show_config(config: &DeobsConfig, save_to: Option<&Path>) -> Result<String> {
    if let Some(path) = save_to {
        config
            .save_to_file(path)
            .with_context(|| format!("Failed to save configuration: {}", path.display()))?;
        log::info!("Configuration saved to {}", path.display());
    }
    Ok(config.to_json_pretty())
}

/// Install a Ctrl-C handler that sets `cancel`; a second Ctrl-C exits at once.
pub fn install_cancel_handler(cancel: Arc<AtomicBool>) {
    let result = ctrlc::set_handler(move || {
        if cancel.swap(true, Ordering::SeqCst) {
            eprintln!("\nCancelled.");
            std::process::exit(130);
        }
        eprintln!("\nCancelling after the files in progress (Ctrl-C again to quit now)...");
    });
    if let Err(e) = result {
        log::warn!("Could not install Ctrl-C handler: {}", e);
    }
}

/// Map a command error to the process exit status.
pub fn exit_code_for(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<DeobsError>() {
        Some(e) if e.is_fatal_to_batch() => EXIT_BATCH_FATAL,
        _ => EXIT_FAILURE,
    }
}

fn create_progress_bar() -> ProgressBar {
    let pb = ProgressBar::new(0);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ");
    pb.set_style(style);
    pb
}
