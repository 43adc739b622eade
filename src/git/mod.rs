//! Version-control driver: diff acquisition and commit, all through the
//! injected command executor.

pub mod diff;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use regex::Regex;
use std::sync::OnceLock;

use crate::exec::CommandFactory;
use crate::pipeline::CancelToken;

pub use diff::{changes_from_diff, Change};

fn untracked_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^\?\?\s+(?P<fname>\S+)").unwrap())
}

/// Shell-level git commands scoped to one working tree.
pub struct GitCmd {
    work_dir: PathBuf,
    cmd: Arc<dyn CommandFactory>,
}

impl GitCmd {
    pub fn new(work_dir: &Path, cmd: Arc<dyn CommandFactory>) -> Self {
        Self {
            work_dir: work_dir.to_path_buf(),
            cmd,
        }
    }

    fn git(&self, cancel: &CancelToken, args: &[&str]) -> Result<String> {
        let mut all: Vec<String> = vec!["-C".into(), self.work_dir.display().to_string()];
        all.extend(args.iter().map(|s| s.to_string()));
        let mut cmd = self.cmd.command(cancel, "git", &all);
        let out = cmd
            .capture()
            .with_context(|| format!("git {}", args.join(" ")))?;
        if !cmd.success() {
            anyhow::bail!("git {} failed", args.join(" "));
        }
        Ok(out)
    }

    /// Untracked entries from the short status followed by the parsed
    /// `-U0` diff, in stream order.
    pub fn diff(&self, cancel: &CancelToken) -> Result<Vec<Change>> {
        let status = self.git(cancel, &["status", "--short"])?;
        let mut results: Vec<Change> = untracked_re()
            .captures_iter(&status)
            .map(|c| {
                let fname = &c["fname"];
                Change::new(fname, fname, 0, 0)
            })
            .collect();

        let out = self.git(cancel, &["diff", "-U0", "--no-ext-diff", "--relative"])?;
        results.extend(changes_from_diff(&out)?);
        Ok(results)
    }

    pub fn add(&self, cancel: &CancelToken, files: &[String]) -> Result<()> {
        let mut args = vec!["add"];
        args.extend(files.iter().map(String::as_str));
        self.git(cancel, &args).map(|_| ())
    }

    pub fn commit(&self, cancel: &CancelToken, message: &str) -> Result<()> {
        self.git(cancel, &["commit", "-m", message]).map(|_| ())
    }
}
