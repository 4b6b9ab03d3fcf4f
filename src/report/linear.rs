use colored::Colorize;
use std::collections::{BTreeMap, BTreeSet};

use crate::config::RenderConfig;
use crate::diff::{LineKind, Replay};
use crate::review::Comment;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinearKind {
    Header,
    Added,
    Removed,
    Context,
    Meta,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinearRow<'a> {
    Line {
        /// New-file line number; `None` for lines not in the new file
        number: Option<usize>,
        kind: LinearKind,
        text: &'a str,
    },
    Comment(&'a Comment),
    /// Stands in for a run of hidden lines
    Ellipsis,
}

/// Lay out `diff` as numbered rows with comments under their lines.
///
/// Rows without a new-file number are always shown. With ellipsis enabled,
/// numbered rows further than `context_window` from every commented line are
/// hidden and each hidden run becomes one [`LinearRow::Ellipsis`].
pub fn layout<'a>(
    diff: &'a str,
    comments_by_line: &BTreeMap<usize, Vec<&'a Comment>>,
    options: &RenderConfig,
) -> Vec<LinearRow<'a>> {
    let records: Vec<(Option<usize>, LinearKind, &str)> = Replay::new(diff)
        .map(|line| {
            let kind = match line.kind {
                LineKind::HunkHeader(_) | LineKind::BadHeader => LinearKind::Header,
                LineKind::Added => LinearKind::Added,
                LineKind::Removed => LinearKind::Removed,
                LineKind::Context => LinearKind::Context,
                LineKind::Skipped | LineKind::Meta => LinearKind::Meta,
            };
            (line.new, kind, line.raw)
        })
        .collect();
    let commented: BTreeSet<usize> = comments_by_line.keys().copied().collect();

    let keep = |number: Option<usize>| match number {
        None => true,
        Some(_) if !options.ellipsis => true,
        Some(n) => {
            let window = options.context_window;
            commented
                .range(n.saturating_sub(window)..=n.saturating_add(window))
                .next()
                .is_some()
        }
    };

    let mut rows = Vec::with_capacity(records.len());
    let mut hiding = false;
    for (number, kind, text) in records {
        if !keep(number) {
            if !hiding {
                rows.push(LinearRow::Ellipsis);
                hiding = true;
            }
            continue;
        }
        hiding = false;
        rows.push(LinearRow::Line { number, kind, text });
        if let Some(comments) = number.and_then(|n| comments_by_line.get(&n)) {
            rows.extend(comments.iter().map(|&c| LinearRow::Comment(c)));
        }
    }
    rows
}

/// Colored terminal text for `rows`, one line per row.
pub fn render(rows: &[LinearRow<'_>]) -> String {
    let mut out = String::new();
    for row in rows {
        let line = match row {
            LinearRow::Line { number, kind, text } => {
                let gutter = number.map(|n| format!("{n:>5}")).unwrap_or_else(|| " ".repeat(5));
                let text = match kind {
                    LinearKind::Header => text.cyan().to_string(),
                    LinearKind::Added => text.green().to_string(),
                    LinearKind::Removed => text.red().to_string(),
                    LinearKind::Context => text.to_string(),
                    LinearKind::Meta => text.dimmed().to_string(),
                };
                format!("{} {}", gutter.dimmed(), text)
            }
            LinearRow::Comment(comment) => {
                let mut text = format!(
                    "      {} {}",
                    format!("💬 [{}]", comment.producer).yellow().bold(),
                    comment.message.yellow()
                );
                if let Some(reasoning) = &comment.reasoning {
                    text.push_str(&format!("\n         {}", format!("💡 {reasoning}").dimmed()));
                }
                text
            }
            LinearRow::Ellipsis => format!("{}", "    ⋮".dimmed()),
        };
        out.push_str(&line);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::review::aggregate::group_by_line;
    use crate::review::types::tests::comment;

    fn numbers(rows: &[LinearRow<'_>]) -> Vec<Option<usize>> {
        rows.iter()
            .filter_map(|r| match r {
                LinearRow::Line { number, .. } => Some(*number),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_small_hunk_numbering() {
        let diff = "@@ -1,2 +1,3 @@\n line1\n+line2\n line3";
        let options = RenderConfig {
            ellipsis: false,
            ..RenderConfig::default()
        };
        let rows = layout(diff, &BTreeMap::new(), &options);
        let kinds: Vec<(Option<usize>, LinearKind)> = rows
            .iter()
            .filter_map(|r| match r {
                LinearRow::Line { number, kind, .. } => Some((*number, *kind)),
                _ => None,
            })
            .collect();
        assert_eq!(
            kinds,
            vec![
                (None, LinearKind::Header),
                (Some(1), LinearKind::Context),
                (Some(2), LinearKind::Added),
                (Some(3), LinearKind::Context),
            ]
        );
    }

    #[test]
    fn test_context_window_collapses_runs_once() {
        let mut diff = String::from("@@ -1,20 +1,20 @@\n");
        for i in 1..=20 {
            diff.push_str(&format!(" line {i}\n"));
        }
        let comments = vec![comment("a.rs", 10, "bug")];
        let by_line = group_by_line(&comments);
        let rows = layout(&diff, &by_line, &RenderConfig::default());

        assert_eq!(
            numbers(&rows),
            vec![None, Some(8), Some(9), Some(10), Some(11), Some(12)]
        );
        let ellipses = rows.iter().filter(|r| matches!(r, LinearRow::Ellipsis)).count();
        assert_eq!(ellipses, 2);
        assert_eq!(rows[1], LinearRow::Ellipsis);
        assert_eq!(rows.last(), Some(&LinearRow::Ellipsis));
        // the comment sits right under line 10
        assert!(matches!(rows[5], LinearRow::Comment(c) if c.line == 10));
    }

    #[test]
    fn test_unnumbered_rows_always_shown() {
        let diff = "--- a/x.rs\n+++ b/x.rs\n@@ -1,6 +1,5 @@\n a\n-b\n c\n d\n e\n f";
        let comments = vec![comment("x.rs", 5, "style")];
        let by_line = group_by_line(&comments);
        let options = RenderConfig {
            context_window: 0,
            ..RenderConfig::default()
        };
        let rows = layout(diff, &by_line, &options);
        assert_eq!(
            numbers(&rows),
            vec![None, None, None, None, Some(5)]
        );
        // 1 hidden, removal shown, 2-4 hidden, 5 shown
        let shape: Vec<&str> = rows
            .iter()
            .map(|r| match r {
                LinearRow::Line { .. } => "line",
                LinearRow::Comment(_) => "comment",
                LinearRow::Ellipsis => "gap",
            })
            .collect();
        assert_eq!(shape, vec!["line", "line", "line", "gap", "line", "gap", "line", "comment"]);
    }

    #[test]
    fn test_same_line_comments_keep_order() {
        let diff = "@@ -0,0 +1,2 @@\n+a\n+b";
        let comments = vec![comment("x.rs", 2, "bug"), comment("x.rs", 2, "style")];
        let by_line = group_by_line(&comments);
        let rows = layout(diff, &by_line, &RenderConfig::default());
        let producers: Vec<&str> = rows
            .iter()
            .filter_map(|r| match r {
                LinearRow::Comment(c) => Some(c.producer.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(producers, vec!["bug", "style"]);
    }

    #[test]
    fn test_huge_context_window_keeps_every_line() {
        let diff = "@@ -1,3 +1,4 @@\n a\n+b\n c\n d";
        let comments = vec![comment("x.rs", 2, "bug")];
        let by_line = group_by_line(&comments);
        let options = RenderConfig {
            context_window: usize::MAX,
            ..RenderConfig::default()
        };
        let rows = layout(diff, &by_line, &options);
        assert_eq!(numbers(&rows), vec![None, Some(1), Some(2), Some(3), Some(4)]);
        assert!(!rows.contains(&LinearRow::Ellipsis));
    }

    #[test]
    fn test_render_adds_reasoning_under_message() {
        let diff = "@@ -0,0 +1 @@\n+let x = v[0];";
        let mut reasoned = comment("x.rs", 1, "bug");
        reasoned.reasoning = Some("panics on empty input".to_string());
        let comments = vec![reasoned, comment("x.rs", 1, "style")];
        let by_line = group_by_line(&comments);
        let text = render(&layout(diff, &by_line, &RenderConfig::default()));
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 5);
        assert!(lines[2].contains("bug note on 1"));
        assert!(lines[3].contains("💡 panics on empty input"));
        assert!(lines[4].contains("style note on 1"));
    }

    #[test]
    fn test_render_shows_numbers_and_comments() {
        let diff = "@@ -1,2 +1,3 @@\n line1\n+line2\n line3";
        let comments = vec![comment("x.rs", 2, "bug")];
        let by_line = group_by_line(&comments);
        let text = render(&layout(diff, &by_line, &RenderConfig::default()));
        assert_eq!(text.lines().count(), 5);
        assert!(text.contains("+line2"));
        assert!(text.contains("bug note on 2"));
    }
}
