//! Task pipeline: the unit of work the watcher schedules.
//!
//! One `PipelineContext` is produced per filesystem event and handed to each
//! task in turn; a task's output string travels to the next task through a
//! fresh carrier. Cancellation is a shared flag set at most once, checked by
//! tasks and bound to every child process they spawn.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;

/// Cooperative cancellation flag shared by one task chain.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-run ambient values handed to each task.
///
/// Immutable; `with_output` derives the carrier for the next task.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    pub changed_file: String,
    pub prev_output: String,
    pub cancel: CancelToken,
}

impl PipelineContext {
    pub fn new(changed_file: impl Into<String>, cancel: CancelToken) -> Self {
        Self {
            changed_file: changed_file.into(),
            prev_output: String::new(),
            cancel,
        }
    }

    /// Carrier for the task following one that produced `output`.
    pub fn with_output(&self, output: impl Into<String>) -> Self {
        Self {
            changed_file: self.changed_file.clone(),
            prev_output: output.into(),
            cancel: self.cancel.clone(),
        }
    }
}

/// One step of the watcher's task chain.
///
/// Tasks must honour `ctx.cancel` and not block without checking it.
pub trait Task: Send + Sync {
    fn id(&self) -> &str;
    fn run(&self, ctx: &PipelineContext) -> Result<String>;
}

/// Adapter turning a closure into a [`Task`].
pub struct FnTask<F> {
    id: String,
    f: F,
}

impl<F> FnTask<F>
where
    F: Fn(&PipelineContext) -> Result<String> + Send + Sync,
{
    pub fn new(id: impl Into<String>, f: F) -> Self {
        Self { id: id.into(), f }
    }
}

impl<F> Task for FnTask<F>
where
    F: Fn(&PipelineContext) -> Result<String> + Send + Sync,
{
    fn id(&self) -> &str {
        &self.id
    }

    fn run(&self, ctx: &PipelineContext) -> Result<String> {
        (self.f)(ctx)
    }
}
