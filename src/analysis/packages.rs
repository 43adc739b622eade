//! Package loading: walks the working tree, parses every Go file and
//! groups the syntax trees per package, test variants included.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use colored::Colorize;
use tree_sitter::Tree;

use crate::error::Error;
use crate::indexer::parse_go;
use crate::pipeline::CancelToken;

/// One parsed source file.
#[derive(Debug)]
pub struct GoFile {
    /// Path relative to the working directory.
    pub rel_path: String,
    pub source: String,
    pub tree: Tree,
}

/// All syntax trees of one import path.
///
/// `_test.go` files are kept apart; a package with test files also counts
/// as its synthesized `<path>.test` variant.
#[derive(Debug)]
pub struct GoPackage {
    /// Base import path, `<module>[/<dir>]`.
    pub path: String,
    /// Package name from the source.
    pub name: String,
    pub files: Vec<GoFile>,
    pub test_files: Vec<GoFile>,
}

impl GoPackage {
    pub fn has_tests(&self) -> bool {
        !self.test_files.is_empty()
    }

    pub fn test_variant_path(&self) -> String {
        format!("{}.test", self.path)
    }

    /// All files, sources first.
    pub fn all_files(&self) -> impl Iterator<Item = &GoFile> {
        self.files.iter().chain(self.test_files.iter())
    }

    /// Builds a package straight from source strings; fixture entry point
    /// for tests of the graph and the strategies.
    pub fn from_sources(path: &str, sources: &[(&str, &str)]) -> Result<Self> {
        let mut pkg = GoPackage {
            path: path.to_string(),
            name: String::new(),
            files: Vec::new(),
            test_files: Vec::new(),
        };
        for (rel_path, src) in sources {
            let tree = parse_go(src).with_context(|| format!("parse {rel_path}"))?;
            if pkg.name.is_empty() {
                pkg.name = package_clause(&tree, src);
            }
            let file = GoFile {
                rel_path: rel_path.to_string(),
                source: src.to_string(),
                tree,
            };
            if rel_path.ends_with("_test.go") {
                pkg.test_files.push(file);
            } else {
                pkg.files.push(file);
            }
        }
        Ok(pkg)
    }
}

fn package_clause(tree: &Tree, src: &str) -> String {
    let root = tree.root_node();
    let mut cursor = root.walk();
    for child in root.named_children(&mut cursor) {
        if child.kind() == "package_clause" {
            if let Some(ident) = child.named_child(0) {
                return ident.utf8_text(src.as_bytes()).unwrap_or_default().to_string();
            }
        }
    }
    String::new()
}

/// Module name: first line of `go.mod`, falling back to the directory's
/// path relative to `$GOPATH/src`.
pub fn module_name(work_dir: &Path) -> Result<String> {
    match std::fs::read_to_string(work_dir.join("go.mod")) {
        Ok(data) => {
            let first = data.lines().next().unwrap_or_default();
            first
                .split_whitespace()
                .nth(1)
                .map(str::to_string)
                .ok_or_else(|| anyhow!("malformed go.mod module line {first:?}"))
        }
        Err(_) => {
            let gopath = std::env::var("GOPATH")
                .map_err(|_| anyhow!("GOPATH and go.mod not found"))?;
            let abs = work_dir
                .canonicalize()
                .with_context(|| format!("resolve {}", work_dir.display()))?;
            let rel = abs
                .strip_prefix(Path::new(&gopath).join("src"))
                .map_err(|_| anyhow!("{} is outside GOPATH/src", abs.display()))?;
            Ok(rel.to_string_lossy().replace('\\', "/"))
        }
    }
}

/// Loads every package under `work_dir`.
///
/// A per-file parse error fails the whole load with [`Error::BuildFailed`]
/// after printing the banner; cancellation between packages surfaces
/// [`Error::TaskCanceled`].
pub fn load_packages(
    work_dir: &Path,
    module: &str,
    cancel: &CancelToken,
) -> Result<Vec<GoPackage>> {
    let mut dirs = Vec::new();
    collect_dirs(work_dir, work_dir, &mut dirs)?;

    let mut packages = Vec::new();
    for dir in dirs {
        if cancel.is_canceled() {
            return Err(Error::TaskCanceled.into());
        }
        let Some(pkg) = load_dir(work_dir, module, &dir)? else {
            continue;
        };
        packages.push(pkg);
    }
    Ok(packages)
}

fn collect_dirs(root: &Path, dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    let base = dir.file_name().map(|n| n.to_string_lossy().into_owned());
    if dir != root {
        if let Some(name) = &base {
            if name.starts_with('.') || name == "vendor" || name == "testdata" {
                return Ok(());
            }
        }
    }
    out.push(dir.to_path_buf());
    let entries = std::fs::read_dir(dir).with_context(|| format!("read {}", dir.display()))?;
    let mut children: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    children.sort();
    for child in children {
        collect_dirs(root, &child, out)?;
    }
    Ok(())
}

fn load_dir(root: &Path, module: &str, dir: &Path) -> Result<Option<GoPackage>> {
    let mut names: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("read {}", dir.display()))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|e| e == "go"))
        .collect();
    if names.is_empty() {
        return Ok(None);
    }
    names.sort();

    let rel_dir = dir.strip_prefix(root).unwrap_or(dir);
    let path = if rel_dir.as_os_str().is_empty() {
        module.to_string()
    } else {
        format!("{}/{}", module, rel_dir.to_string_lossy().replace('\\', "/"))
    };

    let mut pkg = GoPackage {
        path,
        name: String::new(),
        files: Vec::new(),
        test_files: Vec::new(),
    };
    let mut errors = Vec::new();
    for file in names {
        let rel_path = file
            .strip_prefix(root)
            .unwrap_or(&file)
            .to_string_lossy()
            .replace('\\', "/");
        let source = std::fs::read_to_string(&file)
            .with_context(|| format!("read {}", file.display()))?;
        match parse_go(&source) {
            Ok(tree) => {
                let is_test = rel_path.ends_with("_test.go");
                let name = package_clause(&tree, &source);
                if !name.is_empty() && (!is_test || pkg.name.is_empty()) {
                    pkg.name = name;
                }
                let parsed = GoFile {
                    rel_path: rel_path.clone(),
                    source,
                    tree,
                };
                if is_test {
                    pkg.test_files.push(parsed);
                } else {
                    pkg.files.push(parsed);
                }
            }
            Err(e) => errors.push(format!("{rel_path}: {e}")),
        }
    }

    if !errors.is_empty() {
        eprintln!("\n======={}=======", " Build Failed ".red());
        for line in &errors {
            eprintln!("{line}");
        }
        eprintln!("============================");
        return Err(Error::BuildFailed.into());
    }
    Ok(Some(pkg))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_module_name_from_go_mod() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "go.mod", "module github.com/acme/calc\n\ngo 1.22\n");
        assert_eq!(module_name(tmp.path()).unwrap(), "github.com/acme/calc");
    }

    #[test]
    fn test_load_packages_with_test_variant() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "go.mod", "module calc\n");
        write(tmp.path(), "math.go", "package calc\n\nfunc Add(a, b int) int {\n\treturn a + b\n}\n");
        write(
            tmp.path(),
            "math_test.go",
            "package calc\n\nimport \"testing\"\n\nfunc TestAdd(t *testing.T) {\n\tif Add(1, 2) != 3 {\n\t\tt.Fail()\n\t}\n}\n",
        );
        write(tmp.path(), "geo/geo.go", "package geo\n\nfunc Area(w, h int) int {\n\treturn w * h\n}\n");

        let pkgs = load_packages(tmp.path(), "calc", &CancelToken::new()).unwrap();
        assert_eq!(pkgs.len(), 2);
        let root = pkgs.iter().find(|p| p.path == "calc").unwrap();
        assert!(root.has_tests());
        assert_eq!(root.test_variant_path(), "calc.test");
        assert_eq!(root.name, "calc");
        let geo = pkgs.iter().find(|p| p.path == "calc/geo").unwrap();
        assert!(!geo.has_tests());
    }

    #[test]
    fn test_hidden_and_vendor_dirs_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "main.go", "package main\n\nfunc main() {\n}\n");
        write(tmp.path(), "vendor/dep/dep.go", "package dep\n\nfunc D() {\n}\n");
        write(tmp.path(), ".hidden/h.go", "package h\n\nfunc H() {\n}\n");
        let pkgs = load_packages(tmp.path(), "m", &CancelToken::new()).unwrap();
        assert_eq!(pkgs.len(), 1);
        assert_eq!(pkgs[0].path, "m");
    }

    #[test]
    fn test_parse_error_is_build_failed() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "bad.go", "package bad\n\nfunc broken( {\n");
        let err = load_packages(tmp.path(), "m", &CancelToken::new()).unwrap_err();
        assert!(Error::is(&err, &Error::BuildFailed));
    }

    #[test]
    fn test_canceled_load_is_task_canceled() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "ok.go", "package ok\n\nfunc F() {\n}\n");
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = load_packages(tmp.path(), "m", &cancel).unwrap_err();
        assert!(Error::is(&err, &Error::TaskCanceled));
    }

    #[test]
    fn test_fixture_packages_from_sources() {
        let pkg = GoPackage::from_sources(
            "m/geo",
            &[("geo/geo.go", "package geo\n\nfunc Area() int {\n\treturn 1\n}\n")],
        )
        .unwrap();
        assert_eq!(pkg.name, "geo");
        assert_eq!(pkg.files.len(), 1);
    }
}
