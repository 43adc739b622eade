//! Coverage-history selection: a test runs iff its persisted profile
//! covers a touched line range.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use colored::Colorize;
use tracing::debug;

use crate::analysis;
use crate::exec::CommandFactory;
use crate::git::GitCmd;
use crate::indexer::{self, BlockKind, FileInfo};
use crate::mapper::changes_to_file_blocks;
use crate::pipeline::PipelineContext;
use crate::strategy::profile::parse_cover_profile;
use crate::strategy::Strategy;

/// Directory under the working tree holding one profile per test.
pub const PROFILE_DIR: &str = ".gtr";

/// Selects tests from the per-test cover profiles in `.gtr/`.
///
/// The first pass (fresh directory, or no profile carrying the module
/// prefix) runs every test so the runner can write the baseline profiles;
/// later passes intersect profiles with the touched blocks.
pub struct CoverStrategy {
    work_dir: PathBuf,
    run_init: bool,
    first_run: AtomicBool,
    git: GitCmd,
}

impl CoverStrategy {
    pub fn new(work_dir: &Path, run_init: bool, cmd: Arc<dyn CommandFactory>) -> Self {
        Self {
            work_dir: work_dir.to_path_buf(),
            run_init,
            first_run: AtomicBool::new(true),
            git: GitCmd::new(work_dir, cmd),
        }
    }
}

impl Strategy for CoverStrategy {
    fn coverage_enabled(&self) -> bool {
        true
    }

    fn tests_to_run(&self, ctx: &PipelineContext) -> Result<(bool, Vec<String>, Vec<String>)> {
        let profile_dir = self.work_dir.join(PROFILE_DIR);
        let created = !profile_dir.exists();
        if created {
            std::fs::create_dir_all(&profile_dir)
                .with_context(|| format!("create {}", profile_dir.display()))?;
        }

        let module = analysis::module_name(&self.work_dir)?;
        let prefix = module.replace('/', "_");
        let has_profiles = profile_entries(&profile_dir, &prefix)?.next().is_some();

        let first = self.first_run.swap(false, Ordering::SeqCst) || created || !has_profiles;
        if first && self.run_init {
            // baseline: run everything, one profile per test gets written
            let tests = analysis::find_all_tests(&self.work_dir, &ctx.cancel)?;
            debug!("coverage baseline over {} tests", tests.len());
            return Ok((false, tests, Vec::new()));
        }

        let mut changes = self.git.diff(&ctx.cancel).context("git diff")?;
        changes.retain(|c| c.new_path.ends_with(".go"));
        if changes.is_empty() {
            return Ok((false, Vec::new(), Vec::new()));
        }

        let mut file_infos: HashMap<String, FileInfo> = HashMap::new();
        for change in &changes {
            if file_infos.contains_key(&change.new_path) {
                continue;
            }
            let info = match indexer::file_info(&self.work_dir.join(&change.new_path), None) {
                Ok(info) => info,
                Err(e) => {
                    eprintln!("\n======={}=======", " Build Failed ".red());
                    eprintln!("{e:#}");
                    eprintln!("============================");
                    return Err(e.context("file info"));
                }
            };
            file_infos.insert(change.new_path.clone(), info);
        }
        let changed_blocks =
            changes_to_file_blocks(&changes, &file_infos).context("changes to file blocks")?;

        // covered source file -> profile file name -> merged intervals
        let mut cover_index: HashMap<String, HashMap<String, Vec<[u32; 2]>>> = HashMap::new();
        for entry in profile_entries(&profile_dir, &prefix)? {
            let data = std::fs::read_to_string(profile_dir.join(&entry))
                .with_context(|| format!("read profile {entry}"))?;
            let profiles = parse_cover_profile(&data)
                .with_context(|| format!("parse profile {entry}"))?;
            for (fname, info) in profiles {
                if info.blocks.is_empty() {
                    continue;
                }
                cover_index
                    .entry(fname)
                    .or_default()
                    .insert(entry.clone(), info.blocks);
            }
        }

        let tests = select_covered_tests(&changed_blocks, &cover_index, &module);
        Ok((false, tests, Vec::new()))
    }
}

/// Profile file names under `dir` carrying the module prefix; partial
/// listings are fine, other names are skipped.
fn profile_entries(dir: &Path, prefix: &str) -> Result<impl Iterator<Item = String>> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .with_context(|| format!("read {}", dir.display()))?
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().into_string().ok())
        .filter(|n| n.starts_with(prefix))
        .collect();
    names.sort();
    Ok(names.into_iter())
}

/// Pure selection over parsed profiles.
///
/// A touched `Test*` function is selected directly (new or modified tests
/// run even without a profile); otherwise a test is selected iff one of its
/// covered intervals intersects a touched block.
pub(crate) fn select_covered_tests(
    changed_blocks: &HashMap<String, FileInfo>,
    cover_index: &HashMap<String, HashMap<String, Vec<[u32; 2]>>>,
    module: &str,
) -> Vec<String> {
    let mut tests: BTreeSet<String> = BTreeSet::new();

    for (fname, info) in changed_blocks {
        for block in &info.blocks {
            if block.kind.intersects(BlockKind::FUNC) && block.name.starts_with("Test") {
                let qualified = if info.pkg_name == "main" {
                    format!("{}.{}", module, block.name)
                } else {
                    format!("{}/{}.{}", module, info.pkg_name, block.name)
                };
                tests.insert(qualified);
            }
        }

        let covered_file = format!("{module}/{fname}");
        let Some(by_profile) = cover_index.get(&covered_file) else {
            continue;
        };
        for block in &info.blocks {
            for (profile_name, intervals) in by_profile {
                for iv in intervals {
                    let hit = (block.start >= iv[0] && block.start <= iv[1])
                        || (block.end >= iv[0] && block.end <= iv[1])
                        || (iv[0] >= block.start && iv[1] <= block.end);
                    if hit {
                        let test_name = profile_name
                            .rsplit('.')
                            .next()
                            .unwrap_or(profile_name.as_str());
                        let pkg_dir = covered_file
                            .rsplit_once('/')
                            .map(|(dir, _)| dir)
                            .unwrap_or(covered_file.as_str());
                        tests.insert(format!("{pkg_dir}.{test_name}"));
                    }
                }
            }
        }
    }

    tests.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::MockCommandFactory;
    use crate::indexer::FileBlock;
    use crate::pipeline::CancelToken;
    use std::fs;

    fn changed(fname: &str, pkg: &str, blocks: Vec<FileBlock>) -> HashMap<String, FileInfo> {
        let mut map = HashMap::new();
        map.insert(
            fname.to_string(),
            FileInfo {
                file_name: fname.to_string(),
                pkg_name: pkg.to_string(),
                end_line: 50,
                blocks,
            },
        );
        map
    }

    fn block(kind: BlockKind, name: &str, start: u32, end: u32) -> FileBlock {
        FileBlock {
            kind,
            name: name.into(),
            start,
            end,
        }
    }

    #[test]
    fn test_intersecting_profile_selects_test() {
        // profile for mod.TestMul covers mod/pkg/x.go lines [10,14]
        let mut cover_index: HashMap<String, HashMap<String, Vec<[u32; 2]>>> = HashMap::new();
        cover_index.insert(
            "mod/pkg/x.go".into(),
            HashMap::from([("mod.TestMul".to_string(), vec![[10u32, 14u32]])]),
        );

        let touched = changed(
            "pkg/x.go",
            "pkg",
            vec![block(BlockKind::FUNC, "Mul", 12, 13)],
        );
        let tests = select_covered_tests(&touched, &cover_index, "mod");
        assert_eq!(tests, vec!["mod/pkg.TestMul"]);

        let untouched = changed(
            "pkg/x.go",
            "pkg",
            vec![block(BlockKind::FUNC, "Div", 20, 25)],
        );
        let tests = select_covered_tests(&untouched, &cover_index, "mod");
        assert!(tests.is_empty());
    }

    #[test]
    fn test_modified_test_function_runs_directly() {
        let cover_index = HashMap::new();
        let touched = changed(
            "pkg/x_test.go",
            "pkg",
            vec![block(BlockKind::FUNC, "TestDiv", 8, 12)],
        );
        let tests = select_covered_tests(&touched, &cover_index, "mod");
        assert_eq!(tests, vec!["mod/pkg.TestDiv"]);
    }

    #[test]
    fn test_main_package_test_qualified_by_module() {
        let cover_index = HashMap::new();
        let touched = changed(
            "main_test.go",
            "main",
            vec![block(BlockKind::FUNC, "TestMain", 3, 6)],
        );
        let tests = select_covered_tests(&touched, &cover_index, "mod");
        assert_eq!(tests, vec!["mod.TestMain"]);
    }

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn seed_project(dir: &Path) {
        write(dir, "go.mod", "module mod\n");
        write(
            dir,
            "x.go",
            "package mod\n\nfunc X(a int) int {\n\treturn a + 1\n}\n",
        );
        write(
            dir,
            "x_test.go",
            "package mod\n\nimport \"testing\"\n\nfunc TestX(t *testing.T) {\n\tif X(1) != 2 {\n\t\tt.Fail()\n\t}\n}\n",
        );
    }

    #[test]
    fn test_first_run_discovers_every_test() {
        let tmp = tempfile::tempdir().unwrap();
        seed_project(tmp.path());
        let factory = Arc::new(MockCommandFactory::succeeding());
        let strategy = CoverStrategy::new(tmp.path(), true, factory);
        let ctx = PipelineContext::new("x.go", CancelToken::new());

        let (run_all, tests, subs) = strategy.tests_to_run(&ctx).unwrap();
        assert!(!run_all);
        assert_eq!(tests, vec!["mod.TestX"]);
        assert!(subs.is_empty());
        assert!(tmp.path().join(PROFILE_DIR).is_dir());
    }

    #[test]
    fn test_subsequent_run_selects_from_persisted_profiles() {
        let tmp = tempfile::tempdir().unwrap();
        seed_project(tmp.path());
        write(
            tmp.path(),
            ".gtr/mod.TestX",
            "mode: set\nmod/x.go:3.22,5.2 1 1\n",
        );

        let factory = Arc::new(MockCommandFactory::succeeding());
        factory.push_stdout(""); // git status
        factory.push_stdout(
            "diff --git a/x.go b/x.go\n--- a/x.go\n+++ b/x.go\n@@ -4,0 +4,1 @@\n+x\n",
        );
        let strategy = CoverStrategy::new(tmp.path(), true, factory);
        strategy.first_run.store(false, Ordering::SeqCst);
        let ctx = PipelineContext::new("x.go", CancelToken::new());

        let (run_all, tests, subs) = strategy.tests_to_run(&ctx).unwrap();
        assert!(!run_all);
        assert_eq!(tests, vec!["mod.TestX"]);
        assert!(subs.is_empty());
    }

    #[test]
    fn test_selected_once_for_multiple_hits() {
        let mut cover_index: HashMap<String, HashMap<String, Vec<[u32; 2]>>> = HashMap::new();
        cover_index.insert(
            "mod/x.go".into(),
            HashMap::from([("mod.TestAll".to_string(), vec![[1u32, 5u32], [8, 20]])]),
        );
        let touched = changed(
            "x.go",
            "mod",
            vec![
                block(BlockKind::FUNC, "A", 2, 4),
                block(BlockKind::FUNC, "B", 9, 12),
            ],
        );
        let tests = select_covered_tests(&touched, &cover_index, "mod");
        assert_eq!(tests, vec!["mod.TestAll"]);
    }
}
