//! Configuration
//!
//! `DeobsConfig` is loaded from a JSON file. Every field has a default, so a
//! partial file (or none at all) is valid; CLI flags override loaded values.

use crate::deobfuscator::error::{DeobsError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Primary de-obfuscation engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeobfuscatorSettings {
    pub enabled: bool,
    pub program: String,
    pub timeout_secs: u64,
}

impl Default for DeobfuscatorSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            program: "obfuscator-io-deobfuscator".to_string(),
            timeout_secs: 60,
        }
    }
}

/// Layout options passed to the primary formatter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormatStyle {
    pub parser: String,
    pub semi: bool,
    pub single_quote: bool,
    /// `none`, `es5` or `all`
    pub trailing_comma: String,
    pub bracket_spacing: bool,
    /// `avoid` or `always`
    pub arrow_parens: String,
}

impl Default for FormatStyle {
    fn default() -> Self {
        Self {
            parser: "babel".to_string(),
            semi: true,
            single_quote: true,
            trailing_comma: "es5".to_string(),
            bracket_spacing: true,
            arrow_parens: "avoid".to_string(),
        }
    }
}

/// Primary formatter settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormatterSettings {
    pub enabled: bool,
    pub program: String,
    pub timeout_secs: u64,
    pub style: FormatStyle,
}

impl Default for FormatterSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            program: "prettier".to_string(),
            timeout_secs: 30,
            style: FormatStyle::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeobsConfig {
    /// Source extension, dot included.
    pub extension: String,
    /// Token inserted before the extension of every output file.
    pub output_marker: String,
    /// Files whose name contains this are the tool's own and are skipped.
    pub tool_marker: String,
    pub deobfuscator: DeobfuscatorSettings,
    pub formatter: FormatterSettings,
    /// Treat a failed primary pass as a failed file instead of degrading.
    pub require_primary_pass: bool,
    /// Worker threads for batch runs; 1 is sequential.
    pub jobs: usize,
}

impl Default for DeobsConfig {
    fn default() -> Self {
        Self {
            extension: ".js".to_string(),
            output_marker: "Deobs".to_string(),
            tool_marker: "deobfuscator".to_string(),
            deobfuscator: DeobfuscatorSettings::default(),
            formatter: FormatterSettings::default(),
            require_primary_pass: false,
            jobs: 1,
        }
    }
}

impl DeobsConfig {
    /// Load and validate a configuration file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let config_err = |message: String| DeobsError::Config {
            path: path.display().to_string(),
            message,
        };
        let json = std::fs::read_to_string(path).map_err(|e| config_err(e.to_string()))?;
        let config: DeobsConfig =
            serde_json::from_str(&json).map_err(|e| config_err(e.to_string()))?;
        config.validate().map_err(config_err)?;
        Ok(config)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let json = self.to_json_pretty();
        std::fs::write(path, json).map_err(|e| DeobsError::file_io(path, "write", &e))
    }

    pub fn to_json_pretty(&self) -> String {
        // Plain data with string keys; serialization cannot fail.
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    /// Check values serde cannot check.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if !self.extension.starts_with('.') || self.extension.len() < 2 {
            return Err(format!("extension must look like \".js\", got {:?}", self.extension));
        }
        if self.output_marker.is_empty() {
            return Err("output_marker must not be empty".to_string());
        }
        if self.output_marker.contains(['/', '\\']) {
            return Err(format!(
                "output_marker must not contain a path separator: {:?}",
                self.output_marker
            ));
        }
        if self.jobs == 0 {
            return Err("jobs must be at least 1".to_string());
        }
        if self.deobfuscator.timeout_secs == 0 || self.formatter.timeout_secs == 0 {
            return Err("timeouts must be at least one second".to_string());
        }
        let style = &self.formatter.style;
        if !matches!(style.trailing_comma.as_str(), "none" | "es5" | "all") {
            return Err(format!("unknown trailing_comma {:?}", style.trailing_comma));
        }
        if !matches!(style.arrow_parens.as_str(), "avoid" | "always") {
            return Err(format!("unknown arrow_parens {:?}", style.arrow_parens));
        }
        Ok(())
    }
}
