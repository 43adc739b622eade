//! Go source indexer.
//!
//! Parses one file into a [`FileInfo`]: package name, end line and the
//! ordered brace-spanned blocks of its top-level declarations.

use std::fmt;
use std::ops::{BitAnd, BitOr};
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tree_sitter::{Node, Parser, Tree};

/// Kind of a top-level declaration block, encoded as a bitset so
/// selection-side tests compose (`kind & BlockKind::FUNC`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockKind(u32);

impl BlockKind {
    pub const TYPE_DECL: BlockKind = BlockKind(1);
    pub const FUNC: BlockKind = BlockKind(1 << 1);
    pub const METHOD: BlockKind = BlockKind(1 << 2);

    pub fn intersects(self, other: BlockKind) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitAnd for BlockKind {
    type Output = BlockKind;
    fn bitand(self, rhs: BlockKind) -> BlockKind {
        BlockKind(self.0 & rhs.0)
    }
}

impl BitOr for BlockKind {
    type Output = BlockKind;
    fn bitor(self, rhs: BlockKind) -> BlockKind {
        BlockKind(self.0 | rhs.0)
    }
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match *self {
            BlockKind::TYPE_DECL => "type",
            BlockKind::FUNC => "func",
            BlockKind::METHOD => "method",
            _ => "mixed",
        };
        f.write_str(name)
    }
}

/// One top-level declaration, spanning `[start, end]` lines from 1.
///
/// Methods are qualified `Receiver.Name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileBlock {
    pub kind: BlockKind,
    pub name: String,
    pub start: u32,
    pub end: u32,
}

/// Per-file metadata: package, final line, blocks sorted by start line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub file_name: String,
    pub pkg_name: String,
    pub end_line: u32,
    pub blocks: Vec<FileBlock>,
}

/// Parses Go source; a tree containing syntax errors is an error here,
/// which is what drives the Build Failed reporting upstream.
pub(crate) fn parse_go(src: &str) -> Result<Tree> {
    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_go::LANGUAGE.into())
        .context("load Go grammar")?;
    let tree = parser
        .parse(src, None)
        .ok_or_else(|| anyhow!("parser returned no tree"))?;
    if tree.root_node().has_error() {
        return Err(anyhow!("syntax error"));
    }
    Ok(tree)
}

/// Returns the [`FileInfo`] of `fname`, reading the file unless `src` is
/// given. Blocks are sorted by start line.
pub fn file_info(fname: &Path, src: Option<&str>) -> Result<FileInfo> {
    let owned;
    let src = match src {
        Some(s) => s,
        None => {
            owned = std::fs::read_to_string(fname)
                .with_context(|| format!("read {}", fname.display()))?;
            &owned
        }
    };
    let tree =
        parse_go(src).with_context(|| format!("parse {}", fname.display()))?;
    let root = tree.root_node();

    let base = fname
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut info = FileInfo {
        file_name: base,
        pkg_name: String::new(),
        end_line: 0,
        blocks: Vec::new(),
    };

    let mut cursor = root.walk();
    for decl in root.named_children(&mut cursor) {
        match decl.kind() {
            "package_clause" => {
                if let Some(ident) = decl.named_child(0) {
                    info.pkg_name = text(ident, src).to_string();
                }
            }
            "function_declaration" => {
                if let Some(block) = func_block(decl, src, None)? {
                    info.blocks.push(block);
                }
            }
            "method_declaration" => {
                let recv = receiver_type_name(decl, src)?;
                if let Some(block) = func_block(decl, src, Some(&recv))? {
                    info.blocks.push(block);
                }
            }
            "type_declaration" => {
                info.blocks.extend(type_blocks(decl, src));
            }
            // imports and value specs are recognised but not indexed
            "import_declaration" | "const_declaration" | "var_declaration" => {}
            _ => {}
        }
        info.end_line = decl.end_position().row as u32 + 1;
    }

    if info.pkg_name.is_empty() {
        return Err(anyhow!("missing package clause in {}", fname.display()));
    }
    info.blocks.sort_by_key(|b| b.start);
    Ok(info)
}

fn text<'a>(node: Node<'_>, src: &'a str) -> &'a str {
    node.utf8_text(src.as_bytes()).unwrap_or_default()
}

/// Function or method block spanning the body braces. Body-less
/// declarations (externally implemented functions) yield no block.
fn func_block(decl: Node<'_>, src: &str, recv: Option<&str>) -> Result<Option<FileBlock>> {
    let name = decl
        .child_by_field_name("name")
        .map(|n| text(n, src).to_string())
        .ok_or_else(|| anyhow!("function declaration without a name"))?;
    let Some(body) = decl.child_by_field_name("body") else {
        return Ok(None);
    };
    let (kind, name) = match recv {
        Some(recv) => (BlockKind::METHOD, format!("{recv}.{name}")),
        None => (BlockKind::FUNC, name),
    };
    Ok(Some(FileBlock {
        kind,
        name,
        start: body.start_position().row as u32 + 1,
        end: body.end_position().row as u32 + 1,
    }))
}

/// Bare receiver type name; value and pointer receivers are supported,
/// anything else is a fatal error.
fn receiver_type_name(decl: Node<'_>, src: &str) -> Result<String> {
    let receiver = decl
        .child_by_field_name("receiver")
        .ok_or_else(|| anyhow!("method declaration without receiver"))?;
    let mut cursor = receiver.walk();
    let param = receiver
        .named_children(&mut cursor)
        .find(|n| n.kind() == "parameter_declaration")
        .ok_or_else(|| anyhow!("empty receiver list"))?;
    let ty = param
        .child_by_field_name("type")
        .ok_or_else(|| anyhow!("receiver without type"))?;
    match ty.kind() {
        "type_identifier" => Ok(text(ty, src).to_string()),
        "pointer_type" => {
            let inner = ty
                .named_child(0)
                .filter(|n| n.kind() == "type_identifier")
                .ok_or_else(|| anyhow!("unexpected receiver type {}", text(ty, src)))?;
            Ok(text(inner, src).to_string())
        }
        other => Err(anyhow!("unexpected receiver type kind {other}")),
    }
}

/// TypeDecl blocks for struct types, spanning the field-list braces.
fn type_blocks(decl: Node<'_>, src: &str) -> Vec<FileBlock> {
    let mut blocks = Vec::new();
    let mut cursor = decl.walk();
    for spec in decl.named_children(&mut cursor) {
        if spec.kind() != "type_spec" {
            continue;
        }
        let Some(name) = spec.child_by_field_name("name") else {
            continue;
        };
        let Some(ty) = spec.child_by_field_name("type") else {
            continue;
        };
        if ty.kind() != "struct_type" {
            continue;
        }
        let mut ty_cursor = ty.walk();
        let Some(fields) = ty
            .named_children(&mut ty_cursor)
            .find(|n| n.kind() == "field_declaration_list")
        else {
            continue;
        };
        blocks.push(FileBlock {
            kind: BlockKind::TYPE_DECL,
            name: text(name, src).to_string(),
            start: fields.start_position().row as u32 + 1,
            end: fields.end_position().row as u32 + 1,
        });
    }
    blocks
}
