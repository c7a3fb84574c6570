//! Batch de-obfuscation of obfuscator-generated JavaScript.
//!
//! The [`deobfuscator`] module holds the source transforms (string table
//! inlining, dead code removal, formatting), the per-file lifecycle and the
//! batch driver. [`config`] holds the JSON-backed settings they are built from.

pub mod config;
pub mod deobfuscator;

pub use config::DeobsConfig;
pub use deobfuscator::batch::{BatchOrchestrator, BatchReport};
pub use deobfuscator::error::{DeobsError, Result};
pub use deobfuscator::pipeline::TransformPipeline;
pub use deobfuscator::processor::{FileProcessor, ProcessingResult};
pub use deobfuscator::source::SourceUnit;
