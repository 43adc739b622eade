//! Cover-profile parsing: the toolchain's `mode: set` format.

use std::collections::HashMap;
use std::sync::OnceLock;

use anyhow::{anyhow, Result};
use regex::Regex;

/// Covered line intervals of one source file, sorted and merged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileCoverInfo {
    /// Import-path-qualified file name as recorded by the toolchain.
    pub file: String,
    /// Closed `[start, end]` line intervals with at least one hit.
    pub blocks: Vec<[u32; 2]>,
}

fn cover_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(.+):([0-9]+)\.([0-9]+),([0-9]+)\.([0-9]+) ([0-9]+) ([0-9]+)$").unwrap()
    })
}

/// Parses a cover profile into per-file merged intervals.
///
/// The leading `mode:` line is mandatory; `\r\n` endings are tolerated;
/// zero-hit ranges are dropped.
pub fn parse_cover_profile(data: &str) -> Result<HashMap<String, FileCoverInfo>> {
    let mut lines = data.lines();
    lines
        .next()
        .ok_or_else(|| anyhow!("empty cover profile"))?;

    let mut by_file: HashMap<String, FileCoverInfo> = HashMap::new();
    for line in lines {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }
        let caps = cover_line_re()
            .captures(line)
            .ok_or_else(|| anyhow!("unexpected cover line format {line:?}"))?;
        let file = caps[1].to_string();
        let info = by_file.entry(file.clone()).or_insert(FileCoverInfo {
            file,
            blocks: Vec::new(),
        });
        if &caps[7] == "0" {
            // uncovered range
            continue;
        }
        let start: u32 = caps[2].parse()?;
        let end: u32 = caps[4].parse()?;
        info.blocks.push([start, end]);
    }

    for info in by_file.values_mut() {
        info.blocks = merge_intervals(std::mem::take(&mut info.blocks));
    }
    Ok(by_file)
}

/// Sorts intervals by start and folds overlapping or adjacent-by-overlap
/// neighbours into one. Merging an already-merged list is a no-op.
pub fn merge_intervals(mut blocks: Vec<[u32; 2]>) -> Vec<[u32; 2]> {
    if blocks.is_empty() {
        return blocks;
    }
    blocks.sort_by_key(|b| b[0]);
    let mut merged = Vec::with_capacity(blocks.len());
    let mut current = blocks[0];
    for next in blocks.into_iter().skip(1) {
        if next[0] > current[1] {
            merged.push(current);
            current = next;
        } else {
            current[1] = current[1].max(next[1]);
        }
    }
    merged.push(current);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROFILE: &str = "\
mode: set
calc/math.go:5.26,7.2 1 1
calc/math.go:9.24,11.2 2 0
calc/math.go:10.1,14.5 1 1
calc/geo/geo.go:3.20,5.2 1 1
";

    #[test]
    fn test_parse_skips_uncovered_and_merges() {
        let profiles = parse_cover_profile(PROFILE).unwrap();
        let math = &profiles["calc/math.go"];
        // [5,7] and the overlapping [10,14]; the zero-hit [9,11] is dropped
        assert_eq!(math.blocks, vec![[5, 7], [10, 14]]);
        let geo = &profiles["calc/geo/geo.go"];
        assert_eq!(geo.blocks, vec![[3, 5]]);
    }

    #[test]
    fn test_crlf_line_endings_tolerated() {
        let data = "mode: set\r\ncalc/math.go:1.1,2.2 1 1\r\n";
        let profiles = parse_cover_profile(data).unwrap();
        assert_eq!(profiles["calc/math.go"].blocks, vec![[1, 2]]);
    }

    #[test]
    fn test_malformed_line_is_error() {
        let data = "mode: set\nnot a cover line\n";
        assert!(parse_cover_profile(data).is_err());
    }

    #[test]
    fn test_empty_profile_is_error() {
        assert!(parse_cover_profile("").is_err());
    }

    #[test]
    fn test_merge_is_idempotent() {
        let merged = merge_intervals(vec![[1, 4], [3, 6], [8, 9], [6, 6]]);
        assert_eq!(merged, vec![[1, 6], [8, 9]]);
        assert_eq!(merge_intervals(merged.clone()), merged);
    }

    #[test]
    fn test_merge_keeps_disjoint_sorted() {
        let merged = merge_intervals(vec![[10, 12], [1, 2], [5, 6]]);
        assert_eq!(merged, vec![[1, 2], [5, 6], [10, 12]]);
    }
}
