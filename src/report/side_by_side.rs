use colored::Colorize;
use similar::{capture_diff_slices, Algorithm, DiffTag};
use std::collections::BTreeMap;

use crate::diff::Replay;
use crate::review::Comment;

/// Widest old-side column before text is cut.
const MAX_COLUMN: usize = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RowKind {
    Unchanged,
    Removed,
    Added,
}

/// A line of one side of the diff with its line number in that file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SideLine<'a> {
    pub number: usize,
    pub text: &'a str,
    /// `Unchanged` for context lines, which appear on both sides
    pub kind: RowKind,
}

/// Old and new file lines visible in `diff`, in order.
///
/// Removed lines go to the old side, added lines to the new side and context
/// lines to both. Headers and other non-content lines are left out.
pub fn reconstruct(diff: &str) -> (Vec<SideLine<'_>>, Vec<SideLine<'_>>) {
    let mut old = Vec::new();
    let mut new = Vec::new();
    for line in Replay::new(diff) {
        let kind = match (line.old, line.new) {
            (Some(_), Some(_)) => RowKind::Unchanged,
            (Some(_), None) => RowKind::Removed,
            (None, Some(_)) => RowKind::Added,
            (None, None) => continue,
        };
        if let Some(number) = line.old {
            old.push(SideLine {
                number,
                text: line.text,
                kind,
            });
        }
        if let Some(number) = line.new {
            new.push(SideLine {
                number,
                text: line.text,
                kind,
            });
        }
    }
    (old, new)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SideRow<'a> {
    pub kind: RowKind,
    pub old: Option<SideLine<'a>>,
    pub new: Option<SideLine<'a>>,
    /// Comments on the new line; only added rows carry any
    pub comments: Vec<&'a Comment>,
}

fn flush<'a>(
    rows: &mut Vec<SideRow<'a>>,
    removed: &mut Vec<SideRow<'a>>,
    added: &mut Vec<SideRow<'a>>,
) {
    rows.append(removed);
    rows.append(added);
}

/// Align the two sides of `diff` with an LCS diff.
///
/// Lines are compared by text and kind, so only context lines can pair up;
/// a removed line never matches an added line with the same text. Removed
/// and added rows between two unchanged rows are emitted as one block: all
/// removals first, then all additions.
pub fn layout<'a>(
    diff: &'a str,
    comments_by_line: &BTreeMap<usize, Vec<&'a Comment>>,
) -> Vec<SideRow<'a>> {
    let (old, new) = reconstruct(diff);
    let old_keys: Vec<(&str, RowKind)> = old.iter().map(|l| (l.text, l.kind)).collect();
    let new_keys: Vec<(&str, RowKind)> = new.iter().map(|l| (l.text, l.kind)).collect();

    let mut rows = Vec::with_capacity(old.len().max(new.len()));
    let mut removed: Vec<SideRow<'a>> = Vec::new();
    let mut added: Vec<SideRow<'a>> = Vec::new();

    for op in capture_diff_slices(Algorithm::Lcs, &old_keys, &new_keys) {
        let (tag, old_range, new_range) = op.as_tag_tuple();
        if tag == DiffTag::Equal {
            flush(&mut rows, &mut removed, &mut added);
            rows.extend(old_range.zip(new_range).map(|(o, n)| SideRow {
                kind: RowKind::Unchanged,
                old: Some(old[o]),
                new: Some(new[n]),
                comments: Vec::new(),
            }));
            continue;
        }
        removed.extend(old_range.map(|o| SideRow {
            kind: RowKind::Removed,
            old: Some(old[o]),
            new: None,
            comments: Vec::new(),
        }));
        added.extend(new_range.map(|n| SideRow {
            kind: RowKind::Added,
            old: None,
            new: Some(new[n]),
            comments: comments_by_line.get(&new[n].number).cloned().unwrap_or_default(),
        }));
    }
    flush(&mut rows, &mut removed, &mut added);
    rows
}

fn gutter(line: Option<SideLine<'_>>) -> String {
    line.map(|l| format!("{:>5}", l.number))
        .unwrap_or_else(|| " ".repeat(5))
}

/// Old text cut to `width` characters and padded to it.
fn old_cell(line: Option<SideLine<'_>>, width: usize) -> String {
    let text: String = line.map(|l| l.text).unwrap_or("").chars().take(width).collect();
    format!("{text:<width$}")
}

/// Four columns: old number, old text, new number, new text. Only the old
/// text is cut; new text is printed in full. Comments follow their added row
/// on the new side.
pub fn render(rows: &[SideRow<'_>]) -> String {
    let width = rows
        .iter()
        .filter_map(|r| r.old)
        .map(|l| l.text.chars().count())
        .max()
        .unwrap_or(0)
        .min(MAX_COLUMN);
    let blank = " ".repeat(5 + 1 + width);

    let mut out = String::new();
    for row in rows {
        let old_text = old_cell(row.old, width);
        let new_text = row.new.map(|l| l.text).unwrap_or("");
        let (old_text, new_text) = match row.kind {
            RowKind::Unchanged => (old_text.normal(), new_text.normal()),
            RowKind::Removed => (old_text.red(), new_text.normal()),
            RowKind::Added => (old_text.normal(), new_text.green()),
        };
        out.push_str(&format!(
            "{} {} │ {} {}\n",
            gutter(row.old).dimmed(),
            old_text,
            gutter(row.new).dimmed(),
            new_text
        ));
        for comment in &row.comments {
            out.push_str(&format!(
                "{blank} │       {} {}\n",
                format!("💬 [{}]", comment.producer).yellow().bold(),
                comment.message.yellow()
            ));
            if let Some(reasoning) = &comment.reasoning {
                out.push_str(&format!(
                    "{blank} │          {}\n",
                    format!("💡 {reasoning}").dimmed()
                ));
            }
        }
    }
    out
}
