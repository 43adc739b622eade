//! Hand-written parser for `git diff -U0` output.
//!
//! Assumes the emitter was run with zero lines of context and no external
//! diff drivers; behaviour on nonzero-context input is undefined (a content
//! line starting with `d` would be taken for a header).

use anyhow::{Context, Result};

/// One changed line range of one file.
///
/// `(0, 0)` is the sentinel for an untracked new file: every block of the
/// file counts as touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    /// Path on the `a/` side.
    pub old_path: String,
    /// Path on the `b/` side, the current name.
    pub new_path: String,
    /// First post-image line of the hunk.
    pub start: u32,
    /// Post-image line count; 0 for a pure deletion hunk.
    pub count: u32,
}

impl Change {
    pub fn new(old_path: &str, new_path: &str, start: u32, count: u32) -> Self {
        Self {
            old_path: old_path.to_string(),
            new_path: new_path.to_string(),
            start,
            count,
        }
    }
}

/// Parses unified-diff text into ordered [`Change`]s.
///
/// Content lines (`+`/`-`) are skipped, `deleted file mode` suppresses hunks
/// until the next header, `diff --git` opens a file pair, `@@` hunk headers
/// emit a change for the live pair.
pub fn changes_from_diff(diff: &str) -> Result<Vec<Change>> {
    let mut changes = Vec::new();
    let mut old_path = String::new();
    let mut new_path = String::new();

    for line in diff.lines() {
        if line.starts_with('+') || line.starts_with('-') || line.is_empty() {
            continue;
        }
        if line.starts_with("deleted") {
            // erased file pair, suppress hunks until the next header
            old_path.clear();
            new_path.clear();
            continue;
        }
        if line.starts_with('d') {
            let (a, b) = read_file_names(line);
            old_path = a;
            new_path = b;
        } else if line.starts_with('@') && !new_path.is_empty() {
            let (start, count) = read_start_and_count(line)?;
            changes.push(Change::new(&old_path, &new_path, start, count));
        }
    }

    Ok(changes)
}

/// Reads `a/<old>` and `b/<new>` from a `diff --git` header line.
fn read_file_names(line: &str) -> (String, String) {
    let mut a = String::new();
    let mut b = String::new();
    let chars: Vec<char> = line.chars().collect();
    let mut i = 1;
    while i < chars.len() {
        let prev = chars[i - 1];
        if chars[i] == '/' && (prev == 'a' || prev == 'b') {
            let (token, next) = read_token_at(&chars, i + 1);
            if prev == 'a' {
                a = token;
            } else {
                b = token;
            }
            i = next;
        }
        i += 1;
    }
    (a, b)
}

/// Reads the post-image `+start[,count]` pair from a `@@` hunk header.
fn read_start_and_count(line: &str) -> Result<(u32, u32)> {
    let chars: Vec<char> = line.chars().collect();
    let mut start = 0u32;
    let mut count = 0u32;
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '+' {
            let (token, next) = read_token_at(&chars, i + 1);
            start = token
                .parse()
                .with_context(|| format!("bad hunk start in {line:?}"))?;
            i = next;
            if i < chars.len() && chars[i] == ',' {
                let (token, next) = read_token_at(&chars, i + 1);
                count = token
                    .parse()
                    .with_context(|| format!("bad hunk count in {line:?}"))?;
                i = next;
            }
        }
        i += 1;
    }
    Ok((start, count))
}

/// Reads characters from `start` until a space or comma; returns the token
/// and the index of the delimiter.
fn read_token_at(chars: &[char], start: usize) -> (String, usize) {
    let mut i = start;
    while i < chars.len() && chars[i] != ' ' && chars[i] != ',' {
        i += 1;
    }
    (chars[start..i].iter().collect(), i)
}
