use super::replay::{LineKind, Replay};
use super::types::{DiffIndex, Hunk};
use super::DiffError;

impl DiffIndex {
    /// Index a single file's unified diff.
    ///
    /// Pure function of the text: the same input always yields the same hunks
    /// and anchors. A diff without hunks (rename, mode change) has no anchors.
    /// Malformed hunks are counted and skipped rather than failing the parse.
    pub fn parse(diff_text: &str) -> DiffIndex {
        let mut index = DiffIndex::default();
        for line in Replay::new(diff_text) {
            match line.kind {
                LineKind::HunkHeader(hunk) => index.hunks.push(hunk),
                LineKind::BadHeader => index.malformed_hunks += 1,
                LineKind::Added => {
                    if let Some(n) = line.new {
                        index.anchors.insert(n);
                    }
                }
                _ => {}
            }
        }
        index
    }

    /// Whether `line` (new-file coordinate) may carry a comment.
    pub fn is_anchor(&self, line: usize) -> bool {
        self.anchors.contains(&line)
    }

    pub fn has_anchors(&self) -> bool {
        !self.anchors.is_empty()
    }
}

/// Parse an `@@ -a[,b] +c[,d] @@[ section]` header.
pub(crate) fn parse_hunk_header(line: &str) -> Result<Hunk, DiffError> {
    let malformed = || DiffError::MalformedHunk(line.to_string());
    let rest = line.strip_prefix("@@ ").ok_or_else(malformed)?;
    let (ranges, _section) = rest.split_once(" @@").ok_or_else(malformed)?;
    let mut parts = ranges.split_whitespace();
    let old_part = parts.next().ok_or_else(malformed)?;
    let new_part = parts.next().ok_or_else(malformed)?;
    if parts.next().is_some() {
        return Err(malformed());
    }

    let (old_start, old_count) = parse_range(old_part, '-').ok_or_else(malformed)?;
    let (new_start, new_count) = parse_range(new_part, '+').ok_or_else(malformed)?;

    Ok(Hunk {
        old_start,
        old_count,
        new_start,
        new_count,
    })
}

fn parse_range(part: &str, prefix: char) -> Option<(usize, usize)> {
    let range = part.strip_prefix(prefix)?;
    let (start, count) = match range.split_once(',') {
        Some((start, count)) => (start, count),
        None => (range, "1"),
    };
    let digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if !digits(start) || !digits(count) {
        return None;
    }
    Some((start.parse().ok()?, count.parse().ok()?))
}

/// Replay `diff_text` against the full old file and return the new file's lines.
///
/// Context and removed lines must match the old file at the positions the hunk
/// headers give them; anything else is an error. Lines outside all hunks are
/// carried over unchanged.
pub fn apply(old_file: &str, diff_text: &str) -> Result<Vec<String>, DiffError> {
    let old_lines: Vec<&str> = old_file.lines().collect();
    let mut out: Vec<String> = Vec::with_capacity(old_lines.len());
    // Number of old lines already consumed.
    let mut consumed = 0usize;

    let copy_through = |out: &mut Vec<String>, consumed: &mut usize, upto: usize| {
        let upto = upto.min(old_lines.len());
        while *consumed < upto {
            out.push(old_lines[*consumed].to_string());
            *consumed += 1;
        }
    };

    for line in Replay::new(diff_text) {
        match line.kind {
            LineKind::HunkHeader(hunk) => {
                // A pure insertion (`-n,0`) goes after old line n; otherwise the
                // hunk's first old line is n itself.
                let upto = if hunk.old_count == 0 {
                    hunk.old_start
                } else {
                    hunk.old_start.saturating_sub(1)
                };
                if upto < consumed {
                    return Err(DiffError::OverlappingHunk(hunk.old_start));
                }
                copy_through(&mut out, &mut consumed, upto);
            }
            LineKind::BadHeader => {
                return Err(DiffError::MalformedHunk(line.raw.to_string()));
            }
            LineKind::Context | LineKind::Removed => {
                let n = line.old.unwrap_or_default();
                copy_through(&mut out, &mut consumed, n.saturating_sub(1));
                match old_lines.get(n.wrapping_sub(1)) {
                    Some(existing) if *existing == line.text => {}
                    _ => return Err(DiffError::ContextMismatch(n)),
                }
                consumed = n;
                if line.kind == LineKind::Context {
                    out.push(line.text.to_string());
                }
            }
            LineKind::Added => out.push(line.text.to_string()),
            LineKind::Skipped | LineKind::Meta => {}
        }
    }

    copy_through(&mut out, &mut consumed, old_lines.len());
    Ok(out)
}
