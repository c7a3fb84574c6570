//! Test Utilities
//!
//! Fake primary passes, fixture directories and a representative
//! obfuscator-generated sample for the integration tests.

#![allow(dead_code)]

use deobs_core::deobfuscator::error::DeobsError;
use deobs_core::deobfuscator::pipeline::TransformPipeline;
use deobs_core::deobfuscator::processor::{FileProcessor, PrimaryPass};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Output shaped like what javascript-obfuscator emits with a string array,
/// an offset accessor and dead-code injection enabled.
pub const OBFUSCATED_SAMPLE: &str = r#"var _0x5a1c = ['log', 'Hello\x20World', 'warn', 'unused'];
var _0x2b3d = function (_0x4e8f, _0x1a9c) {
    _0x4e8f = _0x4e8f - 0x0;
    var _0x3f2a = _0x5a1c[_0x4e8f];
    return _0x3f2a;
};
function _0x1c2d() {}
if (!1) {
    console[_0x2b3d('0x2')]('never');
}
console[_0x2b3d('0x0')](_0x2b3d('0x1'));
console.clear();
"#;

/// Plain code with nothing for the pipeline to remove.
pub const CLEAN_SAMPLE: &str = "function add(a, b) {\n  return a + b;\n}\nconsole.log(add(1, 2));\n";

/// Primary pass that copies its input unchanged.
pub struct CopyPass;

impl PrimaryPass for CopyPass {
    fn name(&self) -> &str {
        "copy"
    }

    fn run(&self, input: &Path, output: &Path) -> Result<(), DeobsError> {
        fs::copy(input, output)
            .map(|_| ())
            .map_err(|e| DeobsError::external_tool("copy", e.to_string()))
    }
}

/// Primary pass that fails for files whose name contains `needle` and copies the rest.
pub struct FailingOn {
    pub needle: String,
}

impl FailingOn {
    pub fn new(needle: &str) -> Self {
        Self {
            needle: needle.to_string(),
        }
    }
}

impl PrimaryPass for FailingOn {
    fn name(&self) -> &str {
        "failing-on"
    }

    fn run(&self, input: &Path, output: &Path) -> Result<(), DeobsError> {
        let name = input.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        if name.contains(&self.needle) {
            return Err(DeobsError::external_tool("failing-on", "SyntaxError: Unexpected token"));
        }
        CopyPass.run(input, output)
    }
}

/// Create a temporary directory holding `files` as `(name, contents)` pairs.
pub fn fixture_dir(files: &[(&str, &str)]) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    for (name, contents) in files {
        fs::write(dir.path().join(name), contents).unwrap();
    }
    dir
}

/// File names in `dir`, sorted.
pub fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

/// Backup files in `dir` that were made from `original`.
pub fn backups_of(dir: &Path, original: &str) -> Vec<PathBuf> {
    file_names(dir)
        .into_iter()
        .filter(|n| n.starts_with(&format!("{}.", original)) && n.ends_with(".backup"))
        .map(|n| dir.join(n))
        .collect()
}

/// Processor with a line-only pipeline and the given primary pass.
pub fn processor_with(primary: Option<Box<dyn PrimaryPass>>) -> FileProcessor {
    FileProcessor::new(primary, TransformPipeline::line_only())
}
