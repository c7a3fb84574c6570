//! Per-File Processing
//!
//! One file's lifecycle, each step fault-tolerant on its own:
//!
//! 1. **Backup**: copy to `<file>.<timestamp>.backup` (failure is logged, not fatal)
//! 2. **Primary pass**: run the external engine into a staged temp file
//!    (failure degrades to the original text unless the pass is required)
//! 3. **Pipeline**: resolve, strip and format the text
//! 4. **Cleanup**: remove the staged temp file
//! 5. **Persist**: write `<stem>Deobs<ext>` in one complete operation
//!
//! Every error is turned into a [`ProcessingResult::Failure`] here; nothing
//! escapes to the batch. A failed file never gets an output file.

use crate::config::DeobsConfig;
use crate::deobfuscator::batch::output_path_for;
use crate::deobfuscator::error::DeobsError;
use crate::deobfuscator::external::ExternalDeobfuscator;
use crate::deobfuscator::formatter::SourceFormatter;
use crate::deobfuscator::pipeline::{PipelineTrace, TransformPipeline};
use crate::deobfuscator::source::SourceUnit;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Suffix of staged temp artifacts; never a source extension.
pub const STAGED_SUFFIX: &str = ".deobs-tmp";

/// External semantic de-obfuscation pass: reads `input`, writes `output`.
pub trait PrimaryPass: Send + Sync {
    fn name(&self) -> &str;
    fn run(&self, input: &Path, output: &Path) -> std::result::Result<(), DeobsError>;
}

/// A backup made before a file was touched. Backups are never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupRecord {
    pub original: PathBuf,
    pub backup: PathBuf,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProcessingResult {
    Success { output: PathBuf },
    Failure { reason: String },
}

impl ProcessingResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn output(&self) -> Option<&Path> {
        match self {
            Self::Success { output } => Some(output),
            Self::Failure { .. } => None,
        }
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { reason } => Some(reason),
        }
    }
}

/// Everything that happened to one file.
#[derive(Debug, Clone)]
pub struct FileReport {
    pub input: PathBuf,
    pub result: ProcessingResult,
    pub backup: Option<BackupRecord>,
    /// Why the primary pass was skipped, when it was.
    pub primary_error: Option<DeobsError>,
    pub trace: Option<PipelineTrace>,
}

/// Filesystem-safe timestamp: RFC 3339 UTC, milliseconds, `:` and `.` replaced by `-`.
pub fn backup_timestamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-")
}

/// Copy `path` to `<path>.<timestamp>.backup`, appending `-N` on a name collision.
pub fn backup_file(path: &Path) -> std::result::Result<BackupRecord, DeobsError> {
    let timestamp = backup_timestamp(Utc::now());
    let mut backup = sibling_with_suffix(path, &format!(".{}.backup", timestamp));
    let mut counter = 1u32;
    while backup.exists() {
        backup = sibling_with_suffix(path, &format!(".{}-{}.backup", timestamp, counter));
        counter += 1;
    }
    std::fs::copy(path, &backup).map_err(|e| DeobsError::backup(path, &e))?;
    Ok(BackupRecord {
        original: path.to_path_buf(),
        backup,
        timestamp,
    })
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Runs the five-step lifecycle for single files.
pub struct FileProcessor {
    primary: Option<Box<dyn PrimaryPass>>,
    pipeline: TransformPipeline,
    output_marker: String,
    require_primary_pass: bool,
}

impl FileProcessor {
    pub fn new(primary: Option<Box<dyn PrimaryPass>>, pipeline: TransformPipeline) -> Self {
        Self {
            primary,
            pipeline,
            output_marker: "Deobs".to_string(),
            require_primary_pass: false,
        }
    }

    pub fn from_config(config: &DeobsConfig) -> Self {
        let primary: Option<Box<dyn PrimaryPass>> = if config.deobfuscator.enabled {
            Some(Box::new(ExternalDeobfuscator::from_settings(&config.deobfuscator)))
        } else {
            None
        };
        let pipeline = TransformPipeline::new(SourceFormatter::from_settings(&config.formatter));
        Self::new(primary, pipeline)
            .with_output_marker(config.output_marker.clone())
            .with_required_primary_pass(config.require_primary_pass)
    }

    pub fn with_output_marker(mut self, marker: impl Into<String>) -> Self {
        self.output_marker = marker.into();
        self
    }

    pub fn with_required_primary_pass(mut self, required: bool) -> Self {
        self.require_primary_pass = required;
        self
    }

    pub fn process(&self, path: &Path) -> ProcessingResult {
        self.process_detailed(path).result
    }

    /// Process one file and report every step's outcome.
    pub fn process_detailed(&self, path: &Path) -> FileReport {
        log::info!("Processing file: {}", path.display());
        let mut report = FileReport {
            input: path.to_path_buf(),
            result: ProcessingResult::Failure {
                reason: String::new(),
            },
            backup: None,
            primary_error: None,
            trace: None,
        };

        match backup_file(path) {
            Ok(record) => {
                log::info!("Backup created: {}", record.backup.display());
                report.backup = Some(record);
            }
            Err(e) => log::warn!("{}; continuing without a backup", e),
        }

        report.result = match self.run_steps(path, &mut report) {
            Ok(output) => {
                log::info!("Successfully processed: {}", path.display());
                ProcessingResult::Success { output }
            }
            Err(e) => {
                let reason = format!("{:#}", e);
                log::error!("Failed to process {}: {}", path.display(), reason);
                ProcessingResult::Failure { reason }
            }
        };
        report
    }

    fn run_steps(&self, path: &Path, report: &mut FileReport) -> Result<PathBuf> {
        let output = output_path_for(path, &self.output_marker);
        if output == path {
            bail!("output path {} would overwrite the input", output.display());
        }

        let staged = self.primary_pass(path, report)?;
        let read_from = staged.as_ref().map_or(path, |s| s.path());
        let bytes = std::fs::read(read_from)
            .map_err(|e| DeobsError::file_io(read_from, "read", &e))
            .with_context(|| format!("Failed to load source for {}", path.display()))?;
        let unit = SourceUnit::new(String::from_utf8_lossy(&bytes).into_owned());

        let (result, trace) = self.pipeline.run_with_trace(&unit);
        for record in trace.degraded() {
            log::warn!("{}: stage {} degraded", path.display(), record.stage);
        }
        report.trace = Some(trace);

        if let Some(staged) = staged {
            remove_staged(staged)?;
        }
        write_output(&output, path, result.as_str())?;
        log::info!("Wrote {}", output.display());
        Ok(output)
    }

    /// Run the primary pass into a staged file next to the input.
    ///
    /// # Returns
    /// The staged file on success, `None` when the original text should be used
    fn primary_pass(&self, path: &Path, report: &mut FileReport) -> Result<Option<NamedTempFile>> {
        let Some(primary) = &self.primary else {
            return Ok(None);
        };
        let dir = parent_dir(path);
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("source");
        let staged = tempfile::Builder::new()
            .prefix(&format!("{}.", stem))
            .suffix(STAGED_SUFFIX)
            .tempfile_in(dir)
            .map_err(|e| DeobsError::file_io(dir, "create a staged file in", &e))?;

        log::info!("Running {} on {}...", primary.name(), path.display());
        match primary.run(path, staged.path()) {
            Ok(()) => Ok(Some(staged)),
            Err(e) if self.require_primary_pass => {
                remove_staged(staged)?;
                Err(e).context("Primary pass is required")
            }
            Err(e) => {
                log::warn!("{}; using original content", e);
                report.primary_error = Some(e);
                remove_staged(staged)?;
                Ok(None)
            }
        }
    }
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

/// Delete a staged file, tolerating a tool that already removed it.
fn remove_staged(staged: NamedTempFile) -> Result<()> {
    let staged_path = staged.path().to_path_buf();
    match staged.close() {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(DeobsError::file_io(&staged_path, "remove", &e).into()),
    }
}

/// Write through a sibling temp file and rename, so `output` is complete or absent.
///
/// The output takes the permissions of `input`; temp files are created 0600.
fn write_output(output: &Path, input: &Path, text: &str) -> Result<()> {
    let dir = parent_dir(output);
    let permissions = std::fs::metadata(input)
        .map_err(|e| DeobsError::file_io(input, "read metadata of", &e))?
        .permissions();
    let mut tmp = tempfile::Builder::new()
        .prefix(".deobs-out.")
        .suffix(STAGED_SUFFIX)
        .tempfile_in(dir)
        .map_err(|e| DeobsError::file_io(output, "write", &e))?;
    tmp.write_all(text.as_bytes())
        .and_then(|()| tmp.flush())
        .and_then(|()| tmp.as_file().set_permissions(permissions))
        .map_err(|e| DeobsError::file_io(output, "write", &e))?;
    tmp.persist(output)
        .map_err(|e| DeobsError::file_io(output, "write", &e.error))?;
    Ok(())
}
