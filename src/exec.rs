//! Child-process execution behind an injectable seam.
//!
//! Every subprocess the pipeline spawns goes through [`CommandFactory`] so
//! tests can swap in [`MockCommandFactory`] and record invocations. The real
//! executor binds process lifetime to the pipeline's [`CancelToken`]:
//! cancelling the token kills the child.

use std::collections::VecDeque;
use std::io::Read;
use std::process::{Command, Stdio};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::pipeline::CancelToken;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A single prepared invocation.
pub trait CommandExecutor: Send {
    /// Binary plus arguments, for logging.
    fn args(&self) -> Vec<String>;
    /// Run with inherited stdio; waits for exit or cancellation.
    fn run(&mut self) -> Result<()>;
    /// Run with captured stdout; waits for exit or cancellation.
    fn capture(&mut self) -> Result<String>;
    /// True when the last run exited zero and was not killed.
    fn success(&self) -> bool;
}

/// Creates executors; the seam injected into runner, git and notifier.
pub trait CommandFactory: Send + Sync {
    fn command(
        &self,
        cancel: &CancelToken,
        bin: &str,
        args: &[String],
    ) -> Box<dyn CommandExecutor>;
}

/// Real factory backed by `std::process`.
pub struct OsCommandFactory;

impl CommandFactory for OsCommandFactory {
    fn command(
        &self,
        cancel: &CancelToken,
        bin: &str,
        args: &[String],
    ) -> Box<dyn CommandExecutor> {
        Box::new(OsCommand {
            bin: bin.to_string(),
            args: args.to_vec(),
            cancel: cancel.clone(),
            exited_ok: false,
            killed: false,
        })
    }
}

struct OsCommand {
    bin: String,
    args: Vec<String>,
    cancel: CancelToken,
    exited_ok: bool,
    killed: bool,
}

impl OsCommand {
    fn wait_bound(&mut self, child: &mut std::process::Child) -> Result<()> {
        loop {
            if self.cancel.is_canceled() && !self.killed {
                // the only reliable way to stop a long-running child
                let _ = child.kill();
                self.killed = true;
            }
            match child.try_wait()? {
                Some(status) => {
                    self.exited_ok = status.success() && !self.killed;
                    return Ok(());
                }
                None => thread::sleep(POLL_INTERVAL),
            }
        }
    }
}

impl CommandExecutor for OsCommand {
    fn args(&self) -> Vec<String> {
        let mut all = vec![self.bin.clone()];
        all.extend(self.args.iter().cloned());
        all
    }

    fn run(&mut self) -> Result<()> {
        let mut child = Command::new(&self.bin)
            .args(&self.args)
            .stdin(Stdio::null())
            .spawn()
            .with_context(|| format!("spawn {}", self.bin))?;
        self.wait_bound(&mut child)
    }

    fn capture(&mut self) -> Result<String> {
        let mut child = Command::new(&self.bin)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .spawn()
            .with_context(|| format!("spawn {}", self.bin))?;
        // drain stdout off-thread so a filled pipe cannot stall the child
        let stdout = child.stdout.take();
        let reader = thread::spawn(move || {
            let mut buf = String::new();
            if let Some(mut out) = stdout {
                let _ = out.read_to_string(&mut buf);
            }
            buf
        });
        self.wait_bound(&mut child)?;
        Ok(reader.join().unwrap_or_default())
    }

    fn success(&self) -> bool {
        self.exited_ok
    }
}

/// Recording factory for tests: canned stdout, configured exit status,
/// and a log of every invocation.
#[derive(Default)]
pub struct MockCommandFactory {
    success: bool,
    fail_with: Option<String>,
    stdouts: Mutex<VecDeque<String>>,
    exec_log: Mutex<Vec<String>>,
}

impl MockCommandFactory {
    pub fn succeeding() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    pub fn failing(err: Option<&str>) -> Self {
        Self {
            success: false,
            fail_with: err.map(str::to_string),
            ..Self::default()
        }
    }

    /// Queue stdout for the next `capture` calls, in order.
    pub fn push_stdout(&self, out: &str) {
        self.stdouts.lock().unwrap().push_back(out.to_string());
    }

    pub fn exec_log(&self) -> Vec<String> {
        self.exec_log.lock().unwrap().clone()
    }
}

impl CommandFactory for MockCommandFactory {
    fn command(
        &self,
        _cancel: &CancelToken,
        bin: &str,
        args: &[String],
    ) -> Box<dyn CommandExecutor> {
        let line = format!("{} {}", bin, args.join(" "));
        self.exec_log.lock().unwrap().push(line);
        Box::new(MockCommand {
            bin: bin.to_string(),
            args: args.to_vec(),
            success: self.success,
            fail_with: self.fail_with.clone(),
            stdout: self.stdouts.lock().unwrap().pop_front().unwrap_or_default(),
        })
    }
}

struct MockCommand {
    bin: String,
    args: Vec<String>,
    success: bool,
    fail_with: Option<String>,
    stdout: String,
}

impl CommandExecutor for MockCommand {
    fn args(&self) -> Vec<String> {
        let mut all = vec![self.bin.clone()];
        all.extend(self.args.iter().cloned());
        all
    }

    fn run(&mut self) -> Result<()> {
        match &self.fail_with {
            Some(msg) => Err(anyhow::anyhow!("{msg}")),
            None => Ok(()),
        }
    }

    fn capture(&mut self) -> Result<String> {
        self.run()?;
        Ok(std::mem::take(&mut self.stdout))
    }

    fn success(&self) -> bool {
        self.success
    }
}
