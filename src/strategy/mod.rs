//! Interchangeable answers to the "what to run" question.

pub mod callgraph;
pub mod coverage;
pub mod profile;

use anyhow::Result;

use crate::pipeline::PipelineContext;

pub use callgraph::CallGraphStrategy;
pub use coverage::CoverStrategy;

/// Provider of tests for the test runner.
pub trait Strategy: Send + Sync {
    /// Whether the runner should collect per-test cover profiles.
    fn coverage_enabled(&self) -> bool;

    /// Returns `(run_all, tests, sub_tests)` for the current diff.
    fn tests_to_run(&self, ctx: &PipelineContext) -> Result<(bool, Vec<String>, Vec<String>)>;
}
