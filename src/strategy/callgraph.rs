//! Call-graph reachability selection: a test runs iff it can reach a
//! changed function or method.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use colored::Colorize;
use petgraph::stable_graph::NodeIndex;
use tracing::debug;

use crate::analysis::{self, Analysis, GraphAlgo};
use crate::error::Error;
use crate::exec::CommandFactory;
use crate::git::GitCmd;
use crate::indexer::{self, BlockKind, FileInfo};
use crate::mapper::changes_to_file_blocks;
use crate::pipeline::PipelineContext;
use crate::strategy::Strategy;

/// Selects tests by walking the call graph from every test entry point
/// toward the entities the diff touched.
pub struct CallGraphStrategy {
    work_dir: PathBuf,
    algo: GraphAlgo,
    git: GitCmd,
}

impl CallGraphStrategy {
    pub fn new(work_dir: &Path, algo: GraphAlgo, cmd: Arc<dyn CommandFactory>) -> Self {
        Self {
            work_dir: work_dir.to_path_buf(),
            algo,
            git: GitCmd::new(work_dir, cmd),
        }
    }
}

impl Strategy for CallGraphStrategy {
    fn coverage_enabled(&self) -> bool {
        false
    }

    fn tests_to_run(&self, ctx: &PipelineContext) -> Result<(bool, Vec<String>, Vec<String>)> {
        let mut changes = self.git.diff(&ctx.cancel).context("git diff")?;
        changes.retain(|c| c.new_path.ends_with(".go"));
        if changes.is_empty() {
            // no changes to test
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

        let changed_blocks = changes_to_file_blocks(&changes, &file_infos)
            .context("changes to file blocks")?;
        let analysis = analysis::analyze(&self.work_dir, self.algo, &ctx.cancel)?;

        let (tests, sub_tests) = select_tests(&analysis, &changed_blocks);
        if tests.is_empty() && sub_tests.is_empty() {
            return Ok((false, tests, sub_tests));
        }
        Ok((true, tests, sub_tests))
    }
}

/// Graph-side selection over an already-built [`Analysis`].
///
/// Changed nodes are matched by name for functions and by the loose
/// `firstParamType.name` suffix for methods (bridges value and pointer
/// receivers). Closure names strip back through `$` suffixes; recorded
/// `t.Run` helpers resolve into sub-test labels; only `Test`-prefixed outer
/// names surface.
pub(crate) fn select_tests(
    analysis: &Analysis,
    changed_blocks: &HashMap<String, FileInfo>,
) -> (Vec<String>, Vec<String>) {
    for info in changed_blocks.values() {
        for block in &info.blocks {
            if !block.kind.intersects(BlockKind::FUNC | BlockKind::METHOD) {
                debug!(
                    "{}: {} {}",
                    Error::UnsupportedEntityKind(block.kind.to_string()),
                    block.kind,
                    block.name
                );
            }
        }
    }

    let mut changed_nodes: HashSet<NodeIndex> = HashSet::new();
    for (idx, node) in analysis.graph.nodes() {
        for (fname, info) in changed_blocks {
            let Some(pkg_path) = analysis.file_to_pkg.get(fname) else {
                continue;
            };
            if node.pkg_path != *pkg_path {
                continue;
            }
            for block in &info.blocks {
                let func_hit =
                    block.kind.intersects(BlockKind::FUNC) && node.name == block.name;
                let method_hit = block.kind.intersects(BlockKind::METHOD)
                    && !node.params.is_empty()
                    && format!("{}.{}", node.params[0], node.name).ends_with(&block.name);
                if func_hit || method_hit {
                    changed_nodes.insert(idx);
                    break;
                }
            }
        }
    }
    if changed_nodes.is_empty() {
        debug!("no updated nodes found");
        return (Vec::new(), Vec::new());
    }

    let all_tests: Vec<NodeIndex> = analysis
        .graph
        .nodes()
        .filter(|(_, n)| n.is_test_shaped() && n.pkg_path.starts_with(&analysis.module_name))
        .map(|(i, _)| i)
        .collect();

    let mut tests: BTreeSet<String> = BTreeSet::new();
    let mut sub_tests: BTreeSet<String> = BTreeSet::new();
    for &tnode in &all_tests {
        if !analysis.graph.reaches_any(tnode, &changed_nodes) {
            continue;
        }
        let node = analysis.graph.node(tnode);
        let mut fun_name = node.name.clone();
        let pkg_path = node.pkg_path.clone();
        loop {
            for (test_key, helpers) in &analysis.test_helpers {
                if let Some(label) = helpers.get(&fun_name) {
                    // the helper registers this sub-test; run its test
                    sub_tests.insert(label.clone());
                    tests.insert(test_key.clone());
                }
            }
            if let Some(idx) = fun_name.rfind('$') {
                fun_name.truncate(idx);
            } else if fun_name.len() > 4 && fun_name.starts_with("Test") {
                tests.insert(format!("{pkg_path}.{fun_name}"));
                break;
            } else {
                break;
            }
        }
    }

    (
        tests.into_iter().collect(),
        sub_tests.into_iter().collect(),
    )
}
