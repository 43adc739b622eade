//! Analysis backend: loads the working tree as packages, harvests sub-test
//! registrations and builds the call graph.
//!
//! Pure adapter between the selection strategies and the parsing/graph
//! machinery; one [`Analysis`] lives for a single pipeline run and is
//! discarded with it.

pub mod callgraph;
pub mod packages;

use std::collections::HashMap;
use std::path::Path;

use anyhow::Result;
use tree_sitter::Node;

use crate::pipeline::CancelToken;

pub use callgraph::{CallGraph, CallNode, GraphAlgo};
pub use packages::{load_packages, module_name, GoFile, GoPackage};

/// Everything one pipeline run learns about the program.
pub struct Analysis {
    pub module_name: String,
    /// Relative file path -> package import path.
    pub file_to_pkg: HashMap<String, String>,
    /// `pkgPath.TestName` -> `t.Run` labels in registration order.
    pub subtests: HashMap<String, Vec<String>>,
    /// `pkgPath.TestName` -> (helper function or `Test$N` closure -> label).
    pub test_helpers: HashMap<String, HashMap<String, String>>,
    pub graph: CallGraph,
    /// All package paths, `.test` variants included.
    pub package_paths: Vec<String>,
}

/// Analyzes `work_dir` with the chosen call-graph algorithm.
///
/// Fails with `Error::BuildFailed` when package loading does, and with
/// `Error::TaskCanceled` when `cancel` fires mid-load.
pub fn analyze(work_dir: &Path, algo: GraphAlgo, cancel: &CancelToken) -> Result<Analysis> {
    let module = packages::module_name(work_dir)?;
    let pkgs = packages::load_packages(work_dir, &module, cancel)?;
    Ok(analyze_packages(module, &pkgs, algo))
}

/// Analysis over already-loaded packages; fixture entry point for tests.
pub fn analyze_packages(module: String, pkgs: &[GoPackage], algo: GraphAlgo) -> Analysis {
    let mut file_to_pkg = HashMap::new();
    let mut package_paths = Vec::new();
    for pkg in pkgs {
        package_paths.push(pkg.path.clone());
        if pkg.has_tests() {
            package_paths.push(pkg.test_variant_path());
        }
        for file in pkg.all_files() {
            file_to_pkg.insert(file.rel_path.clone(), pkg.path.clone());
        }
    }

    let (subtests, test_helpers) = harvest_subtests(pkgs);
    let graph = CallGraph::build(pkgs, algo);

    Analysis {
        module_name: module,
        file_to_pkg,
        subtests,
        test_helpers,
        graph,
        package_paths,
    }
}

/// Lighter pass for the coverage strategy's first run: every `Test*`
/// function in `_test.go` files, qualified by package path.
pub fn find_all_tests(work_dir: &Path, cancel: &CancelToken) -> Result<Vec<String>> {
    let module = packages::module_name(work_dir)?;
    let pkgs = packages::load_packages(work_dir, &module, cancel)?;
    Ok(all_tests_in(&pkgs))
}

pub(crate) fn all_tests_in(pkgs: &[GoPackage]) -> Vec<String> {
    let mut tests = Vec::new();
    for pkg in pkgs {
        for file in &pkg.test_files {
            let root = file.tree.root_node();
            let mut cursor = root.walk();
            for decl in root.named_children(&mut cursor) {
                if decl.kind() != "function_declaration" {
                    continue;
                }
                let Some(name) = decl
                    .child_by_field_name("name")
                    .and_then(|n| n.utf8_text(file.source.as_bytes()).ok())
                else {
                    continue;
                };
                if name.starts_with("Test") {
                    tests.push(format!("{}.{}", pkg.path, name));
                }
            }
        }
    }
    tests
}

type SubtestMaps = (
    HashMap<String, Vec<String>>,
    HashMap<String, HashMap<String, String>>,
);

/// Harvests `t.Run` registrations from every function declaration.
///
/// String-literal labels are recorded in order under `pkg.TestName`
/// (spaces replaced with underscores). The second argument, a named helper
/// or a closure numbered the way the call graph numbers them, keys the
/// helper map used to resolve sub-tests at selection time.
fn harvest_subtests(pkgs: &[GoPackage]) -> SubtestMaps {
    let mut subtests: HashMap<String, Vec<String>> = HashMap::new();
    let mut helpers: HashMap<String, HashMap<String, String>> = HashMap::new();

    for pkg in pkgs {
        for file in pkg.all_files() {
            let root = file.tree.root_node();
            let mut cursor = root.walk();
            for decl in root.named_children(&mut cursor) {
                if decl.kind() != "function_declaration" {
                    continue;
                }
                let Some(name) = decl
                    .child_by_field_name("name")
                    .and_then(|n| n.utf8_text(file.source.as_bytes()).ok())
                else {
                    continue;
                };
                let Some(body) = decl.child_by_field_name("body") else {
                    continue;
                };
                harvest_function(
                    pkg,
                    file,
                    body,
                    name,
                    &mut subtests,
                    &mut helpers,
                );
            }
        }
    }
    (subtests, helpers)
}

fn harvest_function(
    pkg: &GoPackage,
    file: &GoFile,
    body: Node<'_>,
    fn_name: &str,
    subtests: &mut HashMap<String, Vec<String>>,
    helpers: &mut HashMap<String, HashMap<String, String>>,
) {
    let src = file.source.as_bytes();
    let mut ordered = Vec::new();
    callgraph::collect_preorder(body, &mut ordered);

    // closure ordinals, same pre-order numbering the call graph uses
    let mut closure_ordinal: HashMap<usize, u32> = HashMap::new();
    let mut counter = 0u32;
    for node in &ordered {
        if node.kind() == "func_literal" {
            counter += 1;
            closure_ordinal.insert(node.id(), counter);
        }
    }

    let qualified = format!("{}.{}", pkg.path, fn_name);
    for node in &ordered {
        if node.kind() != "call_expression" {
            continue;
        }
        let callee = node
            .child_by_field_name("function")
            .and_then(|f| f.utf8_text(src).ok());
        if callee != Some("t.Run") {
            continue;
        }
        let Some(args) = node.child_by_field_name("arguments") else {
            continue;
        };
        let mut cursor = args.walk();
        let arg_nodes: Vec<Node<'_>> = args.named_children(&mut cursor).collect();
        let Some(label) = arg_nodes.first().and_then(|a| string_literal(*a, src)) else {
            continue;
        };
        let label = label.replace(' ', "_");
        if fn_name.starts_with("Test") {
            subtests.entry(qualified.clone()).or_default().push(label.clone());
        }
        if let Some(runner) = arg_nodes.get(1) {
            let helper_name = match runner.kind() {
                "identifier" => runner.utf8_text(src).ok().map(str::to_string),
                "func_literal" => closure_ordinal
                    .get(&runner.id())
                    .map(|n| format!("{fn_name}${n}")),
                _ => None,
            };
            if let Some(helper) = helper_name {
                helpers
                    .entry(qualified.clone())
                    .or_default()
                    .insert(helper, label);
            }
        }
    }
}

fn string_literal(node: Node<'_>, src: &[u8]) -> Option<String> {
    match node.kind() {
        "interpreted_string_literal" | "raw_string_literal" => {
            let raw = node.utf8_text(src).ok()?;
            Some(raw[1..raw.len() - 1].to_string())
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> Vec<GoPackage> {
        vec![GoPackage::from_sources(
            "mod",
            &[
                (
                    "max.go",
                    "package mod\n\n\
                     func Max(a, b int) int {\n\
                     \tif a > b {\n\t\treturn a\n\t}\n\treturn b\n}\n",
                ),
                (
                    "max_test.go",
                    "package mod\n\nimport \"testing\"\n\n\
                     func helperMax(t *testing.T) {\n\
                     \tif Max(1, 2) != 2 {\n\t\tt.Fail()\n\t}\n}\n\n\
                     func TestMax(t *testing.T) {\n\
                     \tt.Run(\"max basic\", helperMax)\n\
                     \tt.Run(\"max inline\", func(t *testing.T) {\n\
                     \t\tMax(3, 4)\n\t})\n}\n",
                ),
            ],
        )
        .unwrap()]
    }

    #[test]
    fn test_subtest_labels_in_order_with_underscores() {
        let pkgs = fixture();
        let analysis = analyze_packages("mod".into(), &pkgs, GraphAlgo::Cha);
        assert_eq!(
            analysis.subtests["mod.TestMax"],
            vec!["max_basic", "max_inline"]
        );
    }

    #[test]
    fn test_helper_map_has_named_and_closure_entries() {
        let pkgs = fixture();
        let analysis = analyze_packages("mod".into(), &pkgs, GraphAlgo::Cha);
        let helpers = &analysis.test_helpers["mod.TestMax"];
        assert_eq!(helpers["helperMax"], "max_basic");
        assert_eq!(helpers["TestMax$1"], "max_inline");
    }

    #[test]
    fn test_file_index_and_test_variants() {
        let pkgs = fixture();
        let analysis = analyze_packages("mod".into(), &pkgs, GraphAlgo::Static);
        assert_eq!(analysis.file_to_pkg["max.go"], "mod");
        assert_eq!(analysis.file_to_pkg["max_test.go"], "mod");
        assert!(analysis.package_paths.contains(&"mod".to_string()));
        assert!(analysis.package_paths.contains(&"mod.test".to_string()));
    }

    #[test]
    fn test_all_tests_light_pass() {
        let pkgs = fixture();
        let tests = all_tests_in(&pkgs);
        assert_eq!(tests, vec!["mod.TestMax"]);
    }
}
