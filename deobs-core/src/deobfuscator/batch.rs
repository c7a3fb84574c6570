//! Batch Orchestration
//!
//! Enumerates the eligible files of one directory, runs the [`FileProcessor`]
//! on each and collects a [`BatchReport`]. A file's failure never stops the
//! batch; only a missing directory does.
//!
//! # Concurrency
//! Files share no state, and each file's output path is derived from its own
//! input path, so with `jobs > 1` files are processed on a rayon pool without
//! any locking. Cancellation stops scheduling further files; a file already
//! in progress runs to completion.

use crate::config::DeobsConfig;
use crate::deobfuscator::error::{DeobsError, Result};
use crate::deobfuscator::processor::{
    BackupRecord, FileProcessor, FileReport, ProcessingResult, STAGED_SUFFIX,
};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Insert `marker` between a file's stem and its extension, in the same directory.
///
/// `dir/app.min.js` with `Deobs` becomes `dir/app.minDeobs.js`.
pub fn output_path_for(input: &Path, marker: &str) -> PathBuf {
    let Some(stem) = input.file_stem() else {
        return input.to_path_buf();
    };
    let mut name = OsString::from(stem);
    name.push(marker);
    if let Some(ext) = input.extension() {
        name.push(".");
        name.push(ext);
    }
    input.with_file_name(name)
}

/// Which directory entries are eligible inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateFilter {
    pub extension: String,
    pub output_marker: String,
    pub tool_marker: String,
}

impl Default for CandidateFilter {
    fn default() -> Self {
        Self::from_config(&DeobsConfig::default())
    }
}

impl CandidateFilter {
    pub fn from_config(config: &DeobsConfig) -> Self {
        Self {
            extension: config.extension.clone(),
            output_marker: config.output_marker.clone(),
            tool_marker: config.tool_marker.clone(),
        }
    }

    /// Name-only checks; the regular-file check needs the filesystem.
    pub fn accepts_name(&self, name: &str) -> bool {
        let contains = |marker: &str| !marker.is_empty() && name.contains(marker);
        name.len() > self.extension.len()
            && name.ends_with(&self.extension)
            && !name.ends_with(STAGED_SUFFIX)
            && !contains(&self.output_marker)
            && !contains(&self.tool_marker)
    }
}

/// List eligible files in `dir`, sorted by name.
///
/// Symlinks are followed: a link to a regular file is eligible, a link to a
/// directory is not.
pub fn enumerate_candidates(dir: &Path, filter: &CandidateFilter) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(DeobsError::directory_not_found(dir));
    }
    let entries = std::fs::read_dir(dir).map_err(|e| DeobsError::file_io(dir, "list", &e))?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| DeobsError::file_io(dir, "list", &e))?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            log::debug!("Skipping non UTF-8 file name {:?}", name);
            continue;
        };
        if !filter.accepts_name(name) {
            continue;
        }
        let path = entry.path();
        match std::fs::metadata(&path) {
            Ok(meta) if meta.is_file() => files.push(path),
            Ok(_) => log::debug!("Skipping {}: not a regular file", path.display()),
            Err(e) => log::debug!("Skipping {}: {}", path.display(), e),
        }
    }
    files.sort();
    Ok(files)
}

/// Outcome of one batch run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub directory: PathBuf,
    /// Keyed by input file name.
    pub results: BTreeMap<String, ProcessingResult>,
    pub backups: Vec<BackupRecord>,
    /// Set when cancellation left some files unprocessed.
    pub cancelled: bool,
}

impl BatchReport {
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn successful(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|(_, r)| r.is_success())
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// `(file name, reason)` for every failed file.
    pub fn failed(&self) -> Vec<(&str, &str)> {
        self.results
            .iter()
            .filter_map(|(name, r)| r.failure_reason().map(|reason| (name.as_str(), reason)))
            .collect()
    }

    pub fn has_failures(&self) -> bool {
        self.results.values().any(|r| !r.is_success())
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let failed = self.failed();
        writeln!(f, "Deobfuscation Summary:")?;
        writeln!(f, "Successfully processed: {} files", self.successful().len())?;
        writeln!(f, "Failed to process: {} files", failed.len())?;
        if self.cancelled {
            writeln!(f, "Cancelled: remaining files were not processed")?;
        }
        if !failed.is_empty() {
            writeln!(f)?;
            writeln!(f, "Failed files:")?;
            for (name, reason) in failed {
                let first_line = reason.lines().next().unwrap_or_default();
                writeln!(f, "- {}: {}", name, first_line)?;
            }
        }
        Ok(())
    }
}

/// Called after each file with the file's report, the number done and the total.
pub type ProgressFn = dyn Fn(&FileReport, usize, usize) + Send + Sync;

/// Runs a [`FileProcessor`] over every eligible file of a directory.
pub struct BatchOrchestrator {
    processor: FileProcessor,
    filter: CandidateFilter,
    jobs: usize,
    cancel: Arc<AtomicBool>,
    progress: Option<Box<ProgressFn>>,
}

impl BatchOrchestrator {
    pub fn new(processor: FileProcessor) -> Self {
        Self {
            processor,
            filter: CandidateFilter::default(),
            jobs: 1,
            cancel: Arc::new(AtomicBool::new(false)),
            progress: None,
        }
    }

    pub fn from_config(config: &DeobsConfig) -> Self {
        Self::new(FileProcessor::from_config(config))
            .with_filter(CandidateFilter::from_config(config))
            .with_jobs(config.jobs)
    }

    pub fn with_filter(mut self, filter: CandidateFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    pub fn with_progress<F>(mut self, progress: F) -> Self
    where
        F: Fn(&FileReport, usize, usize) + Send + Sync + 'static,
    {
        self.progress = Some(Box::new(progress));
        self
    }

    /// Share a cancellation flag owned by the caller, such as the CLI's Ctrl-C handler.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = flag;
        self
    }

    /// Flag that stops scheduling further files once set.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn candidates(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        enumerate_candidates(dir, &self.filter)
    }

    /// Process every eligible file in `dir`.
    ///
    /// # Errors
    /// `DirectoryNotFound` when `dir` is missing; per-file problems are
    /// recorded in the report instead.
    pub fn run(&self, dir: &Path) -> Result<BatchReport> {
        log::info!("Starting deobfuscation process in {}", dir.display());
        let files = self.candidates(dir)?;
        log::info!("Found {} JavaScript files", files.len());

        let mut report = BatchReport {
            directory: dir.to_path_buf(),
            ..BatchReport::default()
        };
        if files.is_empty() {
            log::info!("No JavaScript files found to process.");
            return Ok(report);
        }

        let total = files.len();
        let done = AtomicUsize::new(0);
        let process_one = |path: &PathBuf| -> Option<FileReport> {
            if self.cancel.load(Ordering::SeqCst) {
                return None;
            }
            let file_report = self.processor.process_detailed(path);
            let finished = done.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(progress) = &self.progress {
                progress(&file_report, finished, total);
            }
            Some(file_report)
        };

        let reports: Vec<Option<FileReport>> = match self.worker_pool() {
            Some(pool) => pool.install(|| files.par_iter().map(&process_one).collect()),
            None => files.iter().map(&process_one).collect(),
        };

        for file_report in reports {
            let Some(file_report) = file_report else {
                report.cancelled = true;
                continue;
            };
            let name = file_report
                .input
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| file_report.input.display().to_string());
            report.backups.extend(file_report.backup);
            report.results.insert(name, file_report.result);
        }

        if report.cancelled {
            log::warn!("Batch cancelled after {} of {} files", report.len(), total);
        }
        log::info!(
            "Batch finished: {} succeeded, {} failed",
            report.successful().len(),
            report.failed().len()
        );
        Ok(report)
    }

    fn worker_pool(&self) -> Option<rayon::ThreadPool> {
        if self.jobs <= 1 {
            return None;
        }
        match rayon::ThreadPoolBuilder::new().num_threads(self.jobs).build() {
            Ok(pool) => Some(pool),
            Err(e) => {
                log::warn!(
                    "Could not start {} workers ({}); processing sequentially",
                    self.jobs,
                    e
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deobfuscator::pipeline::TransformPipeline;
    use std::fs;

    fn orchestrator() -> BatchOrchestrator {
        BatchOrchestrator::new(FileProcessor::new(None, TransformPipeline::line_only()))
    }

    #[test]
    fn test_output_path_for() {
        assert_eq!(
            output_path_for(Path::new("/w/app.js"), "Deobs"),
            PathBuf::from("/w/appDeobs.js")
        );
        assert_eq!(
            output_path_for(Path::new("lib/app.min.js"), "Deobs"),
            PathBuf::from("lib/app.minDeobs.js")
        );
        assert_eq!(output_path_for(Path::new("README"), "Deobs"), PathBuf::from("READMEDeobs"));
    }

    #[test]
    fn test_filter_names() {
        let filter = CandidateFilter::default();
        assert!(filter.accepts_name("app.js"));
        assert!(!filter.accepts_name("appDeobs.js"));
        assert!(!filter.accepts_name("complete-deobfuscator.js"));
        assert!(!filter.accepts_name("app.js.2026-10-19T08-30-12-000Z.backup"));
        assert!(!filter.accepts_name("app.x1y2.deobs-tmp"));
        assert!(!filter.accepts_name("app.ts"));
        assert!(!filter.accepts_name(".js"));
    }

    #[test]
    fn test_enumerate_candidates() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.js", "a.js", "aDeobs.js", "deobfuscator.js", "notes.txt"] {
            fs::write(dir.path().join(name), "x();").unwrap();
        }
        fs::create_dir(dir.path().join("folder.js")).unwrap();

        let files = enumerate_candidates(dir.path(), &CandidateFilter::default()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(names, vec!["a.js", "b.js"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_enumerate_follows_file_symlinks_only() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("real.js"), "x();").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("real.js"), dir.path().join("link.js")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("sub"), dir.path().join("dirlink.js")).unwrap();

        let files = enumerate_candidates(dir.path(), &CandidateFilter::default()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(names, vec!["link.js", "real.js"]);
    }

    #[test]
    fn test_missing_directory() {
        let err = orchestrator().run(Path::new("/definitely/not/a/dir")).unwrap_err();
        assert!(matches!(err, DeobsError::DirectoryNotFound { .. }));
    }

    #[test]
    fn test_empty_directory_is_empty_report() {
        let dir = tempfile::tempdir().unwrap();
        let report = orchestrator().run(dir.path()).unwrap();
        assert!(report.is_empty());
        assert!(!report.cancelled);
        assert!(report.to_string().contains("Successfully processed: 0 files"));
    }

    #[test]
    fn test_cancel_before_start() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.js"), "x();").unwrap();
        let batch = orchestrator();
        batch.cancel_flag().store(true, Ordering::SeqCst);
        let report = batch.run(dir.path()).unwrap();
        assert!(report.cancelled);
        assert!(report.is_empty());
        assert!(!dir.path().join("aDeobs.js").exists());
    }

    #[test]
    fn test_summary_lists_failures() {
        let mut report = BatchReport::default();
        report.results.insert(
            "a.js".to_string(),
            ProcessingResult::Success {
                output: PathBuf::from("aDeobs.js"),
            },
        );
        report.results.insert(
            "b.js".to_string(),
            ProcessingResult::Failure {
                reason: "Failed to read b.js: denied\nmore".to_string(),
            },
        );
        let text = report.to_string();
        assert!(text.starts_with("Deobfuscation Summary:\n"));
        assert!(text.contains("Successfully processed: 1 files\n"));
        assert!(text.contains("Failed to process: 1 files\n"));
        assert!(text.contains("Failed files:\n- b.js: Failed to read b.js: denied\n"));

        let json: serde_json::Value =
            serde_json::from_str(&report.to_json_pretty().unwrap()).unwrap();
        assert_eq!(json["results"]["b.js"]["status"], "failure");
        assert_eq!(json["results"]["a.js"]["output"], "aDeobs.js");
    }
}
