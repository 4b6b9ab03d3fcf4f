pub mod linear;
pub mod side_by_side;

use colored::Colorize;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::review::aggregate::{group_by_file, group_by_line};
use crate::review::{Comment, ReviewContext};

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Failed to write report file: {0}")]
    FileWrite(#[from] std::io::Error),
}

/// Output the review to terminal (default) or to a markdown file.
#[instrument(
    skip(ctx),
    fields(files = ctx.changed_files.len(), comments = ctx.inline_comments.len())
)]
pub fn output(ctx: &ReviewContext, output_path: Option<&Path>) -> Result<(), ReportError> {
    match output_path {
        None => {
            debug!("writing report to terminal");
            print!("{}", terminal_report(ctx));
            Ok(())
        }
        Some(path) => {
            debug!(path = %path.display(), "writing report to file");
            std::fs::write(path, markdown_report(ctx))?;
            Ok(())
        }
    }
}

fn comments(ctx: &ReviewContext) -> impl Iterator<Item = &Comment> {
    ctx.inline_comments.iter().map(|c| &**c)
}

/// Every file with comments, rendered linear or side by side, then the summary.
fn terminal_report(ctx: &ReviewContext) -> String {
    let mut out = String::new();
    out.push('\n');
    out.push_str(&format!(
        "Files changed: {} | Comments: {} | Dropped: {}\n\n",
        ctx.changed_files.len(),
        ctx.inline_comments.len(),
        ctx.dropped.len()
    ));
    if let Some(ci) = &ctx.ci {
        out.push_str(&format!(
            "CI: {} | PR: {}#{} | Base: {}\n\n",
            ci.platform,
            ci.repo.as_deref().unwrap_or("?"),
            ci.pr_number.map(|n| n.to_string()).unwrap_or_else(|| "?".to_string()),
            ci.base_ref.as_deref().unwrap_or(&ctx.config.base_ref)
        ));
    }

    let render = &ctx.config.render;
    for (path, file_comments) in group_by_file(comments(ctx)) {
        let Some(file) = ctx.file(path) else {
            continue;
        };
        out.push_str(&format!("{}\n", format!("═══ {path} ═══").bold()));
        let by_line = group_by_line(file_comments);
        if render.side_by_side {
            let rows = side_by_side::layout(&file.diff, &by_line);
            out.push_str(&side_by_side::render(&rows));
        } else {
            let rows = linear::layout(&file.diff, &by_line, render);
            out.push_str(&linear::render(&rows));
        }
        out.push('\n');
    }

    if ctx.inline_comments.is_empty() {
        out.push_str("  No comments on changed lines.\n\n");
    }

    if let Some(summary) = &ctx.summary {
        out.push_str(&format!("{}\n", "═══ Summary ═══".bold()));
        out.push_str(summary);
        out.push_str("\n\n");
    }
    out
}

/// The review as markdown: comments per file with their diff lines, then
/// dropped comments and the summary.
fn markdown_report(ctx: &ReviewContext) -> String {
    let mut md = String::new();
    md.push_str("# Code Review\n\n");
    md.push_str(&format!(
        "**Files changed:** {} | **Comments:** {} | **Dropped:** {}\n\n",
        ctx.changed_files.len(),
        ctx.inline_comments.len(),
        ctx.dropped.len()
    ));

    for (path, file_comments) in group_by_file(comments(ctx)) {
        md.push_str(&format!("## `{path}`\n\n"));
        for comment in file_comments {
            md.push_str(&format!(
                "- **Line {}** *({})*: {}\n",
                comment.line, comment.producer, comment.message
            ));
        }
        md.push('\n');
    }

    if !ctx.dropped.is_empty() {
        md.push_str("## Dropped comments\n\n");
        for dropped in &ctx.dropped {
            md.push_str(&format!(
                "- `{}:{}` *({})*: {}\n",
                dropped.comment.file, dropped.comment.line, dropped.comment.producer, dropped.reason
            ));
        }
        md.push('\n');
    }

    if let Some(summary) = &ctx.summary {
        md.push_str("## Summary\n\n");
        md.push_str(summary);
        md.push('\n');
    }
    md
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::review::filter::filter_for_files;
    use crate::review::types::tests::{comment, context_with};

    fn reviewed() -> ReviewContext {
        let mut ctx = context_with(&[("src/lib.rs", "@@ -1,2 +1,3 @@\n line1\n+line2\n line3")]);
        let outcome = filter_for_files(
            vec![comment("src/lib.rs", 2, "bug"), comment("src/lib.rs", 1, "style")],
            &ctx,
        );
        ctx.inline_comments = outcome.kept;
        ctx.dropped = outcome.dropped;
        ctx.summary = Some("Adds line2.".to_string());
        ctx
    }

    #[test]
    fn test_markdown_report() {
        let md = markdown_report(&reviewed());
        assert!(md.contains("# Code Review"));
        assert!(md.contains("**Comments:** 1 | **Dropped:** 1"));
        assert!(md.contains("## `src/lib.rs`"));
        assert!(md.contains("- **Line 2** *(bug)*: bug note on 2"));
        assert!(md.contains("- `src/lib.rs:1` *(style)*: line not added in diff"));
        assert!(md.ends_with("## Summary\n\nAdds line2.\n"));
    }

    #[test]
    fn test_terminal_report_renders_each_commented_file() {
        let mut ctx = reviewed();
        let text = terminal_report(&ctx);
        assert!(text.contains("src/lib.rs"));
        assert!(text.contains("+line2"));
        assert!(text.contains("Adds line2."));

        ctx.config.render.side_by_side = true;
        let text = terminal_report(&ctx);
        let row = text
            .lines()
            .find(|l| l.contains('│') && l.contains("line2"))
            .expect("side-by-side row for line2");
        assert!(!row.contains("+line2"));
        assert!(text.lines().any(|l| l.contains('│') && l.contains("line3")));
        assert!(text.contains("bug note on 2"));
    }

    #[test]
    fn test_output_to_file() {
        let path = std::env::temp_dir().join("pr-reviewer-test-output.md");
        output(&reviewed(), Some(&path)).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("bug note on 2"));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_output_to_terminal() {
        // Should not panic
        output(&reviewed(), None).unwrap();
    }
}
