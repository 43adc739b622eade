//! Maps diff line ranges onto the declaration blocks they touch.

use std::collections::HashMap;

use anyhow::{anyhow, Result};

use crate::git::Change;
use crate::indexer::FileInfo;

/// Restricts each file's [`FileInfo`] to the blocks its changes intersect.
///
/// `(0, 0)` changes mark the whole file as touched. Blocks are expected
/// sorted by start line; iteration short-circuits once the change ends
/// before the next block, and consecutive duplicate `(kind, name)` hits from
/// multi-hunk diffs collapse into one.
pub fn changes_to_file_blocks(
    changes: &[Change],
    file_infos: &HashMap<String, FileInfo>,
) -> Result<HashMap<String, FileInfo>> {
    let mut changed_blocks: HashMap<String, FileInfo> = HashMap::new();

    for change in changes {
        let info = file_infos
            .get(&change.new_path)
            .ok_or_else(|| anyhow!("missing FileInfo of {}", change.new_path))?;
        let change_info = changed_blocks
            .entry(change.new_path.clone())
            .or_insert_with(|| FileInfo {
                file_name: info.file_name.clone(),
                pkg_name: info.pkg_name.clone(),
                end_line: info.end_line,
                blocks: Vec::new(),
            });

        for block in &info.blocks {
            if change.start == 0 && change.count == 0 {
                // new untracked file
                change_info.blocks.push(block.clone());
                continue;
            }
            // ranges come from a unified diff with zero lines of context
            let start = change.start;
            let end = if change.count > 0 {
                change.start + change.count - 1
            } else {
                change.start
            };

            if end < block.start {
                break;
            }
            if (start >= block.start && start <= block.end)
                || (end >= block.start && end <= block.end)
                || (block.start >= start && block.end <= end)
            {
                if let Some(last) = change_info.blocks.last() {
                    if last.name == block.name && last.kind == block.kind {
                        // skip repeated hits on the same file block
                        continue;
                    }
                }
                change_info.blocks.push(block.clone());
            }
        }
    }

    changed_blocks.retain(|_, info| !info.blocks.is_empty());
    Ok(changed_blocks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::{BlockKind, FileBlock};

    fn func_block(name: &str, start: u32, end: u32) -> FileBlock {
        FileBlock {
            kind: BlockKind::FUNC,
            name: name.into(),
            start,
            end,
        }
    }

    fn info_with(blocks: Vec<FileBlock>) -> FileInfo {
        FileInfo {
            file_name: "math.go".into(),
            pkg_name: "math".into(),
            end_line: blocks.last().map(|b| b.end).unwrap_or(1),
            blocks,
        }
    }

    #[test]
    fn test_untracked_file_touches_every_block() {
        let mut infos = HashMap::new();
        infos.insert(
            "geo.go".to_string(),
            info_with(vec![func_block("Perimeter", 3, 5)]),
        );
        let changes = vec![Change::new("geo.go", "geo.go", 0, 0)];
        let touched = changes_to_file_blocks(&changes, &infos).unwrap();
        assert_eq!(touched["geo.go"].blocks, infos["geo.go"].blocks);
    }

    #[test]
    fn test_hunk_selects_intersecting_block_only() {
        let mut infos = HashMap::new();
        infos.insert(
            "math.go".to_string(),
            info_with(vec![func_block("min", 5, 9), func_block("max", 15, 19)]),
        );
        // lines 12..21 miss min entirely and overlap max
        let changes = vec![Change::new("math.go", "math.go", 12, 10)];
        let touched = changes_to_file_blocks(&changes, &infos).unwrap();
        let names: Vec<&str> = touched["math.go"]
            .blocks
            .iter()
            .map(|b| b.name.as_str())
            .collect();
        assert_eq!(names, vec!["max"]);
    }

    #[test]
    fn test_zero_count_change_is_single_line() {
        let mut infos = HashMap::new();
        infos.insert(
            "math.go".to_string(),
            info_with(vec![func_block("min", 5, 9), func_block("max", 15, 19)]),
        );
        let changes = vec![Change::new("math.go", "math.go", 9, 0)];
        let touched = changes_to_file_blocks(&changes, &infos).unwrap();
        let names: Vec<&str> = touched["math.go"]
            .blocks
            .iter()
            .map(|b| b.name.as_str())
            .collect();
        assert_eq!(names, vec!["min"]);
    }

    #[test]
    fn test_change_spanning_block_selects_it() {
        let mut infos = HashMap::new();
        infos.insert(
            "math.go".to_string(),
            info_with(vec![func_block("min", 5, 9)]),
        );
        // block fully inside [2, 12]
        let changes = vec![Change::new("math.go", "math.go", 2, 11)];
        let touched = changes_to_file_blocks(&changes, &infos).unwrap();
        assert_eq!(touched["math.go"].blocks.len(), 1);
    }

    #[test]
    fn test_two_hunks_in_one_function_dedup() {
        let mut infos = HashMap::new();
        infos.insert(
            "math.go".to_string(),
            info_with(vec![func_block("min", 5, 20)]),
        );
        let changes = vec![
            Change::new("math.go", "math.go", 6, 1),
            Change::new("math.go", "math.go", 15, 2),
        ];
        let touched = changes_to_file_blocks(&changes, &infos).unwrap();
        assert_eq!(touched["math.go"].blocks.len(), 1);
    }

    #[test]
    fn test_no_intersection_yields_no_entry() {
        let mut infos = HashMap::new();
        infos.insert(
            "math.go".to_string(),
            info_with(vec![func_block("min", 5, 9)]),
        );
        let changes = vec![Change::new("math.go", "math.go", 30, 2)];
        let touched = changes_to_file_blocks(&changes, &infos).unwrap();
        assert!(touched.is_empty());
    }

    #[test]
    fn test_missing_file_info_is_error() {
        let infos = HashMap::new();
        let changes = vec![Change::new("math.go", "math.go", 1, 1)];
        assert!(changes_to_file_blocks(&changes, &infos).is_err());
    }
}
