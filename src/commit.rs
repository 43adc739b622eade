//! Auto-commit task: on green tests, commit the changed source files with
//! a message naming the touched entities.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::warn;

use crate::exec::CommandFactory;
use crate::git::GitCmd;
use crate::indexer::{self, FileInfo};
use crate::mapper::changes_to_file_blocks;
use crate::pipeline::{PipelineContext, Task};

const PASS_PREFIX: &str = "Tests PASS:";

/// Commits the touched files once the preceding task reported a pass.
pub struct AutoCommit {
    work_dir: PathBuf,
    git: GitCmd,
}

impl AutoCommit {
    pub fn new(work_dir: &Path, cmd: Arc<dyn CommandFactory>) -> Self {
        Self {
            work_dir: work_dir.to_path_buf(),
            git: GitCmd::new(work_dir, cmd),
        }
    }

    /// Touched block names and file list, re-derived from the diff at
    /// commit time.
    fn touched(&self, ctx: &PipelineContext) -> Result<(Vec<String>, Vec<String>)> {
        let mut changes = self.git.diff(&ctx.cancel).context("git diff")?;
        changes.retain(|c| c.new_path.ends_with(".go"));

        let mut file_infos: HashMap<String, FileInfo> = HashMap::new();
        for change in &changes {
            if file_infos.contains_key(&change.new_path) {
                continue;
            }
            let info = indexer::file_info(&self.work_dir.join(&change.new_path), None)
                .context("file info")?;
            file_infos.insert(change.new_path.clone(), info);
        }
        let changed_blocks = changes_to_file_blocks(&changes, &file_infos)?;

        let mut files: BTreeSet<String> = BTreeSet::new();
        let mut names: BTreeSet<String> = BTreeSet::new();
        for (fname, info) in &changed_blocks {
            files.insert(fname.clone());
            for block in &info.blocks {
                names.insert(block.name.clone());
            }
        }
        Ok((files.into_iter().collect(), names.into_iter().collect()))
    }
}

impl Task for AutoCommit {
    fn id(&self) -> &str {
        "AutoCommit"
    }

    /// Version-control failures are folded into the returned message and
    /// never abort the watcher.
    fn run(&self, ctx: &PipelineContext) -> Result<String> {
        if !ctx.prev_output.starts_with(PASS_PREFIX) {
            bail!("nothing to commit");
        }

        let (files, names) = self.touched(ctx)?;
        if files.is_empty() {
            bail!("nothing to commit");
        }
        let message = format!("auto_commit! {}", names.join(" "));

        if let Err(e) = self.git.add(&ctx.cancel, &files) {
            warn!("auto commit add failed: {e:#}");
            return Ok(format!("commit failed: {e}"));
        }
        if let Err(e) = self.git.commit(&ctx.cancel, &message) {
            warn!("auto commit failed: {e:#}");
            return Ok(format!("commit failed: {e}"));
        }
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::MockCommandFactory;
    use crate::pipeline::CancelToken;
    use std::fs;

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_requires_pass_prefix() {
        let factory = Arc::new(MockCommandFactory::succeeding());
        let task = AutoCommit::new(Path::new("."), factory);
        let ctx = PipelineContext::new("a.go", CancelToken::new())
            .with_output("Tests FAIL: TestAdd$");
        let err = task.run(&ctx).unwrap_err();
        assert_eq!(err.to_string(), "nothing to commit");
    }

    #[test]
    fn test_commits_sorted_files_with_block_names() {
        let tmp = tempfile::tempdir().unwrap();
        write(
            tmp.path(),
            "geo.go",
            "package geo\n\nfunc Perimeter(w, h int) int {\n\treturn 2 * (w + h)\n}\n\nfunc Area(w, h int) int {\n\treturn w * h\n}\n",
        );

        let factory = Arc::new(MockCommandFactory::succeeding());
        // git status reports geo.go untracked; diff is empty
        factory.push_stdout("?? geo.go\n");
        factory.push_stdout("");
        let task = AutoCommit::new(tmp.path(), factory.clone());
        let ctx = PipelineContext::new("geo.go", CancelToken::new())
            .with_output("Tests PASS: TestArea$");
        let msg = task.run(&ctx).unwrap();
        assert_eq!(msg, "auto_commit! Area Perimeter");

        let log = factory.exec_log();
        assert!(log[2].ends_with("add geo.go"));
        assert!(log[3].ends_with("commit -m auto_commit! Area Perimeter"));
    }

    #[test]
    fn test_git_failure_reported_not_raised() {
        let tmp = tempfile::tempdir().unwrap();
        write(
            tmp.path(),
            "geo.go",
            "package geo\n\nfunc Area(w, h int) int {\n\treturn w * h\n}\n",
        );
        let factory = Arc::new(MockCommandFactory::failing(None));
        factory.push_stdout("?? geo.go\n");
        factory.push_stdout("");
        let task = AutoCommit::new(tmp.path(), factory);
        let ctx = PipelineContext::new("geo.go", CancelToken::new())
            .with_output("Tests PASS: TestArea$");
        // status/diff run through the same failing executor
        let result = task.run(&ctx);
        match result {
            Ok(msg) => assert!(msg.starts_with("commit failed:")),
            Err(e) => assert!(e.to_string().contains("git diff")),
        }
    }
}
