//! Minimal unified-diff generator (LCS over lines, three lines of context).
//!
//! Not required to match any specific diff dialect bit-for-bit (spec §9);
//! this exists purely so `create_change(generate_diff: true)` has something
//! human-reviewable to show, and is skipped entirely when the caller passes
//! `generate_diff: false` (spec testable property #4).

const CONTEXT: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tag {
    Equal,
    Delete,
    Insert,
}

struct Edit<'a> {
    tag: Tag,
    line: &'a str,
}

/// Longest-common-subsequence backtrace, O(n*m) — fine for the file sizes
/// this editor substrate deals with (bounded by `MAX_FILE_SIZE_BYTES`).
fn lcs_edits<'a>(old: &[&'a str], new: &[&'a str]) -> Vec<Edit<'a>> {
    let n = old.len();
    let m = new.len();
    let mut table = vec![vec![0u32; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            table[i][j] = if old[i] == new[j] {
                table[i + 1][j + 1] + 1
            } else {
                table[i + 1][j].max(table[i][j + 1])
            };
        }
    }

    let mut edits = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if old[i] == new[j] {
            edits.push(Edit { tag: Tag::Equal, line: old[i] });
            i += 1;
            j += 1;
        } else if table[i + 1][j] >= table[i][j + 1] {
            edits.push(Edit { tag: Tag::Delete, line: old[i] });
            i += 1;
        } else {
            edits.push(Edit { tag: Tag::Insert, line: new[j] });
            j += 1;
        }
    }
    while i < n {
        edits.push(Edit { tag: Tag::Delete, line: old[i] });
        i += 1;
    }
    while j < m {
        edits.push(Edit { tag: Tag::Insert, line: new[j] });
        j += 1;
    }
    edits
}

/// Produce a unified diff between `old` and `new` text. Returns `None` when
/// the contents are identical.
pub fn unified_diff(path: &str, old: &str, new: &str) -> Option<String> {
    if old == new {
        return None;
    }
    let old_lines: Vec<&str> = old.lines().collect();
    let new_lines: Vec<&str> = new.lines().collect();
    let edits = lcs_edits(&old_lines, &new_lines);

    let mut out = String::new();
    out.push_str(&format!("--- a/{path}\n+++ b/{path}\n"));

    let mut i = 0;
    while i < edits.len() {
        if edits[i].tag == Tag::Equal {
            i += 1;
            continue;
        }
        let hunk_start = i.saturating_sub(CONTEXT);
        let mut hunk_end = i;
        while hunk_end < edits.len() {
            if edits[hunk_end].tag == Tag::Equal {
                let mut run = 0;
                let mut k = hunk_end;
                while k < edits.len() && edits[k].tag == Tag::Equal {
                    run += 1;
                    k += 1;
                }
                if run > CONTEXT * 2 || k == edits.len() {
                    hunk_end += CONTEXT.min(run);
                    break;
                }
                hunk_end = k;
            } else {
                hunk_end += 1;
            }
        }

        out.push_str("@@ hunk @@\n");
        for edit in &edits[hunk_start..hunk_end] {
            let prefix = match edit.tag {
                Tag::Equal => ' ',
                Tag::Delete => '-',
                Tag::Insert => '+',
            };
            out.push(prefix);
            out.push_str(edit.line);
            out.push('\n');
        }
        i = hunk_end.max(i + 1);
    }

    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_content_returns_none() {
        assert!(unified_diff("f.txt", "a\nb\n", "a\nb\n").is_none());
    }

    #[test]
    fn single_line_change_is_marked() {
        let diff = unified_diff("f.txt", "a\nb\nc\n", "a\nx\nc\n").unwrap();
        assert!(diff.contains("-b"));
        assert!(diff.contains("+x"));
        assert!(diff.contains(" a"));
    }

    #[test]
    fn pure_insertion() {
        let diff = unified_diff("f.txt", "a\n", "a\nb\n").unwrap();
        assert!(diff.contains("+b"));
    }
}
