//! Notification sink: hands the pipeline's message to the user.

use std::sync::Arc;

use anyhow::Result;

use crate::exec::CommandFactory;
use crate::pipeline::{CancelToken, PipelineContext, Task};

/// Receives a message and decides how to present it.
pub trait Notifier: Send + Sync {
    fn send(&self, cancel: &CancelToken, msg: &str) -> Result<()>;
}

/// Desktop notifications through `notify-send`.
pub struct DesktopNotifier {
    transient: bool,
    expire_ms: String,
    cmd: Arc<dyn CommandFactory>,
}

impl DesktopNotifier {
    pub fn new(transient: bool, expire_ms: u32, cmd: Arc<dyn CommandFactory>) -> Self {
        Self {
            transient,
            expire_ms: expire_ms.to_string(),
            cmd,
        }
    }
}

impl Notifier for DesktopNotifier {
    fn send(&self, cancel: &CancelToken, msg: &str) -> Result<()> {
        let mut args = vec!["-t".to_string(), self.expire_ms.clone()];
        if self.transient {
            args.push("--hint".to_string());
            args.push("int:transient:1".to_string());
        }
        args.push(msg.to_string());
        let mut cmd = self.cmd.command(cancel, "notify-send", &args);
        cmd.run()
            .map_err(|e| anyhow::anyhow!("desktop notification error {e}"))
    }
}

/// As a pipeline task the notifier forwards the previous task's output
/// unchanged so later tasks (auto-commit) still see it.
impl Task for DesktopNotifier {
    fn id(&self) -> &str {
        "DesktopNotifier"
    }

    fn run(&self, ctx: &PipelineContext) -> Result<String> {
        self.send(&ctx.cancel, &ctx.prev_output)?;
        Ok(ctx.prev_output.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::MockCommandFactory;
    use crate::pipeline::CancelToken;

    #[test]
    fn test_transient_notification_args() {
        let factory = Arc::new(MockCommandFactory::succeeding());
        let notifier = DesktopNotifier::new(true, 2000, factory.clone());
        notifier.send(&CancelToken::new(), "Tests PASS: TestArea$").unwrap();
        assert_eq!(
            factory.exec_log(),
            vec!["notify-send -t 2000 --hint int:transient:1 Tests PASS: TestArea$"]
        );
    }

    #[test]
    fn test_task_passes_message_through() {
        let factory = Arc::new(MockCommandFactory::succeeding());
        let notifier = DesktopNotifier::new(false, 1000, factory);
        let ctx = PipelineContext::new("a.go", CancelToken::new())
            .with_output("Tests PASS: TestArea$");
        let out = notifier.run(&ctx).unwrap();
        assert_eq!(out, "Tests PASS: TestArea$");
    }
}
