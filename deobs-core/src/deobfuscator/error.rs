//! Enhanced Error Handling
//!
//! This module provides the error taxonomy for the de-obfuscator using `thiserror`.
//! Every variant owns plain strings so errors stay `Clone` and can be stored in
//! per-file reports.
//!
//! # Error Categories
//! - **Batch errors**: the input directory cannot be enumerated (fatal to the batch)
//! - **Lifecycle errors**: backup, external tool, file I/O (scoped to one file)
//! - **Transform errors**: unsupported string tables, formatter failures (scoped to one stage)
//! - **Configuration errors**: unreadable or invalid configuration files

use std::path::Path;
use thiserror::Error;

/// De-obfuscator error types.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeobsError {
    /// The batch input directory does not exist or is not a directory.
    #[error("Directory not found: {path}\nSuggestion: {suggestion}")]
    DirectoryNotFound { path: String, suggestion: String },

    /// The timestamped backup copy could not be created.
    ///
    /// Non-fatal: the original input is never overwritten.
    #[error("Backup of {path} failed: {message}")]
    BackupFailed { path: String, message: String },

    /// The external primary de-obfuscation engine could not be run for this input.
    #[error("External tool {tool} failed: {message}\nSuggestion: {suggestion}")]
    ExternalToolFailed {
        tool: String,
        message: String,
        suggestion: String,
    },

    /// A string table was found but cannot be decoded with the literal-only evaluator.
    #[error("Unsupported string table {table}: {reason}")]
    UnsupportedStringTable { table: String, reason: String },

    /// A formatting engine failed to parse or format the source.
    #[error("Formatter {engine} failed: {message}")]
    FormatFailed { engine: String, message: String },

    /// Reading, writing or removing a file failed.
    #[error("Failed to {operation} {path}: {message}")]
    FileIo {
        path: String,
        operation: &'static str,
        message: String,
    },

    /// The configuration file could not be read or parsed.
    #[error("Configuration error in {path}: {message}")]
    Config { path: String, message: String },
}

impl DeobsError {
    /// Create a directory-not-found error.
    pub fn directory_not_found(path: &Path) -> Self {
        Self::DirectoryNotFound {
            path: path.display().to_string(),
            suggestion: "Check the path and that it points at a directory of .js files.".to_string(),
        }
    }

    /// Create a backup error from an I/O failure.
    #[cold]
    pub fn backup(path: &Path, err: &std::io::Error) -> Self {
        Self::BackupFailed {
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }

    /// Create an external tool error with a suggestion matching the failure.
    #[cold]
    pub fn external_tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        let tool = tool.into();
        let message = message.into();
        let suggestion = if message.contains("not found") {
            format!("Install {} and make sure it is on PATH, or disable the primary pass.", tool)
        } else if message.contains("timed out") {
            "Raise the tool timeout in the configuration file.".to_string()
        } else {
            "The input may not match the obfuscator output this tool expects.".to_string()
        };
        Self::ExternalToolFailed {
            tool,
            message,
            suggestion,
        }
    }

    /// Create an unsupported string table error.
    pub fn unsupported_table(table: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UnsupportedStringTable {
            table: table.into(),
            reason: reason.into(),
        }
    }

    /// Create a formatter error.
    #[cold]
    pub fn format_failed(engine: impl Into<String>, message: impl Into<String>) -> Self {
        Self::FormatFailed {
            engine: engine.into(),
            message: message.into(),
        }
    }

    /// Create a file I/O error.
    #[cold]
    pub fn file_io(path: &Path, operation: &'static str, err: &std::io::Error) -> Self {
        Self::FileIo {
            path: path.display().to_string(),
            operation,
            message: err.to_string(),
        }
    }

    /// Whether this error stops the whole batch rather than one file or stage.
    pub fn is_fatal_to_batch(&self) -> bool {
        matches!(self, Self::DirectoryNotFound { .. } | Self::Config { .. })
    }
}

/// Convenient module-wide result type.
pub type Result<T> = std::result::Result<T, DeobsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_external_tool_suggestion() {
        let err = DeobsError::external_tool("prettier", "program not found on PATH");
        match err {
            DeobsError::ExternalToolFailed { suggestion, .. } => {
                assert!(suggestion.contains("Install prettier"));
            }
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn test_batch_fatality() {
        assert!(DeobsError::directory_not_found(Path::new("/nope")).is_fatal_to_batch());
        assert!(!DeobsError::unsupported_table("_0x1", "call").is_fatal_to_batch());
    }
}
