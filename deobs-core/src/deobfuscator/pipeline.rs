//! Transform Pipeline
//!
//! Composes the three source transforms in a fixed order:
//!
//! ```text
//! resolve string table -> strip dead code -> format
//! ```
//!
//! The resolver runs first because dead-code guards may read the string
//! table; the formatter runs last because it only changes layout. A stage
//! that fails hands its own input to the next stage.

use crate::deobfuscator::dead_code::DeadCodeStripper;
use crate::deobfuscator::formatter::{CodeFormatter, SourceFormatter};
use crate::deobfuscator::source::SourceUnit;
use crate::deobfuscator::string_table::StringTableResolver;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    ResolveStrings,
    StripDeadCode,
    Format,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::ResolveStrings => "resolve-strings",
            Stage::StripDeadCode => "strip-dead-code",
            Stage::Format => "format",
        })
    }
}

/// What one stage did to its input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "reason", rename_all = "snake_case")]
pub enum StageOutcome {
    Applied,
    Unchanged,
    /// The stage failed; its input (or a fallback result) was passed on.
    Degraded(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageRecord {
    pub stage: Stage,
    pub outcome: StageOutcome,
}

/// Per-stage outcomes of one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineTrace {
    pub stages: Vec<StageRecord>,
}

impl PipelineTrace {
    fn record(&mut self, stage: Stage, outcome: StageOutcome) {
        self.stages.push(StageRecord { stage, outcome });
    }

    pub fn outcome(&self, stage: Stage) -> Option<&StageOutcome> {
        self.stages.iter().find(|r| r.stage == stage).map(|r| &r.outcome)
    }

    pub fn degraded(&self) -> impl Iterator<Item = &StageRecord> {
        self.stages
            .iter()
            .filter(|r| matches!(r.outcome, StageOutcome::Degraded(_)))
    }

    pub fn is_clean(&self) -> bool {
        self.degraded().next().is_none()
    }
}

fn changed(before: &SourceUnit, after: &SourceUnit) -> StageOutcome {
    if before == after {
        StageOutcome::Unchanged
    } else {
        StageOutcome::Applied
    }
}

/// `format(strip(resolve(unit)))` with per-stage degradation.
pub struct TransformPipeline {
    resolver: StringTableResolver,
    stripper: DeadCodeStripper,
    formatter: SourceFormatter,
}

impl TransformPipeline {
    pub fn new(formatter: SourceFormatter) -> Self {
        Self {
            resolver: StringTableResolver::new(),
            stripper: DeadCodeStripper::new(),
            formatter,
        }
    }

    /// Pipeline that formats with the line formatter only.
    pub fn line_only() -> Self {
        Self::new(SourceFormatter::line_only())
    }

    /// Pipeline whose primary formatter is `primary`.
    pub fn with_formatter(primary: Box<dyn CodeFormatter>) -> Self {
        Self::new(SourceFormatter::new(Some(primary)))
    }

    pub fn run(&self, unit: &SourceUnit) -> SourceUnit {
        self.run_with_trace(unit).0
    }

    /// Run every stage and record what each one did.
    pub fn run_with_trace(&self, unit: &SourceUnit) -> (SourceUnit, PipelineTrace) {
        let mut trace = PipelineTrace::default();

        let resolved = match self.resolver.resolve_with_stats(unit) {
            Ok((resolved, stats)) => {
                if let Some(table) = &stats.table {
                    log::debug!(
                        "Inlined {} of {} references to {}",
                        stats.inlined,
                        stats.inlined + stats.unresolved,
                        table
                    );
                }
                trace.record(Stage::ResolveStrings, changed(unit, &resolved));
                resolved
            }
            Err(e) => {
                log::warn!("Skipping string table resolution: {}", e);
                trace.record(Stage::ResolveStrings, StageOutcome::Degraded(e.to_string()));
                unit.clone()
            }
        };

        let stripped = self.stripper.strip(&resolved);
        trace.record(Stage::StripDeadCode, changed(&resolved, &stripped));

        let (formatted, format_error) = self.formatter.format_detailed(&stripped);
        let outcome = match format_error {
            Some(e) => StageOutcome::Degraded(e.to_string()),
            None => changed(&stripped, &formatted),
        };
        trace.record(Stage::Format, outcome);

        (formatted, trace)
    }
}

impl Default for TransformPipeline {
    fn default() -> Self {
        Self::line_only()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deobfuscator::error::{DeobsError, Result};

    struct Rejecting;

    impl CodeFormatter for Rejecting {
        fn name(&self) -> &str {
            "rejecting"
        }

        fn format(&self, _unit: &SourceUnit) -> Result<SourceUnit> {
            Err(DeobsError::format_failed("rejecting", "Unexpected token"))
        }
    }

    #[test]
    fn test_full_run() {
        let src = "var _0xabc1=['log','hi'];if(false){console[_0xabc1(0)]('dead');}\nconsole[_0xabc1(0)](_0xabc1(1));console.clear();\n";
        let (out, trace) = TransformPipeline::line_only().run_with_trace(&SourceUnit::new(src));
        let out = out.into_string();
        assert!(out.contains("console[\"log\"](\"hi\");"));
        assert!(!out.contains("dead"));
        assert!(!out.contains("clear"));
        assert!(trace.is_clean());
        assert_eq!(trace.outcome(Stage::StripDeadCode), Some(&StageOutcome::Applied));
    }

    #[test]
    fn test_resolver_failure_degrades() {
        let src = "var _0x1 = [foo(), 'bar'];\nif (!1) { x(); }\ny(_0x1(1));\n";
        let (out, trace) = TransformPipeline::line_only().run_with_trace(&SourceUnit::new(src));
        assert!(out.as_str().contains("y(_0x1(1));"));
        assert!(!out.as_str().contains("x();"));
        assert!(matches!(
            trace.outcome(Stage::ResolveStrings),
            Some(StageOutcome::Degraded(reason)) if reason.contains("_0x1")
        ));
    }

    #[test]
    fn test_formatter_failure_degrades() {
        let pipeline = TransformPipeline::with_formatter(Box::new(Rejecting));
        let (out, trace) = pipeline.run_with_trace(&SourceUnit::new("a();b();"));
        assert_eq!(out.as_str(), "a();\nb();\n");
        assert_eq!(trace.degraded().count(), 1);
    }

    #[test]
    fn test_clean_input_unchanged() {
        let src = "function add(a, b) {\n  return a + b;\n}\n";
        let (out, trace) = TransformPipeline::line_only().run_with_trace(&SourceUnit::new(src));
        assert_eq!(out.as_str(), src);
        assert!(trace.stages.iter().all(|r| r.outcome == StageOutcome::Unchanged));
    }
}
