use tracing::debug;

use super::types::{AnchoredComment, Comment, ReviewContext};
use crate::diff::DiffIndex;

/// Why a comment did not survive anchor filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The comment names a file that is not part of the review
    UnknownFile,
    /// The file has no diff text to anchor against
    MissingDiff,
    /// The diff adds no lines (removal, rename or mode change only)
    EmptyAnchorSet,
    /// The line is not an added line of the diff
    NotAnchored,
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            DropReason::UnknownFile => "file not under review",
            DropReason::MissingDiff => "no diff for file",
            DropReason::EmptyAnchorSet => "diff adds no lines",
            DropReason::NotAnchored => "line not added in diff",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedComment {
    pub comment: Comment,
    pub reason: DropReason,
}

/// Kept and dropped comments, both in input order.
#[derive(Debug, Default)]
pub struct FilterOutcome {
    pub kept: Vec<AnchoredComment>,
    pub dropped: Vec<DroppedComment>,
}

impl FilterOutcome {
    fn drop(&mut self, comment: Comment, reason: DropReason) {
        debug!(
            file = %comment.file,
            line = comment.line,
            producer = %comment.producer,
            %reason,
            "dropping comment"
        );
        self.dropped.push(DroppedComment { comment, reason });
    }
}

/// Keep the comments whose line is in `index.anchors`.
///
/// Fail-closed: without an index, or with an empty anchor set, every comment
/// is dropped. All comments are assumed to belong to the indexed file.
pub fn filter(comments: Vec<Comment>, index: Option<&DiffIndex>) -> FilterOutcome {
    let mut outcome = FilterOutcome::default();
    for comment in comments {
        match index {
            None => outcome.drop(comment, DropReason::MissingDiff),
            Some(index) if !index.has_anchors() => {
                outcome.drop(comment, DropReason::EmptyAnchorSet)
            }
            Some(index) if index.is_anchor(comment.line) => {
                outcome.kept.push(AnchoredComment::confirmed(comment))
            }
            Some(_) => outcome.drop(comment, DropReason::NotAnchored),
        }
    }
    outcome
}

/// Filter comments spanning several files, each against its own file's index.
///
/// Output order matches input order.
pub fn filter_for_files(comments: Vec<Comment>, ctx: &ReviewContext) -> FilterOutcome {
    let mut outcome = FilterOutcome::default();
    for comment in comments {
        match ctx.file(&comment.file) {
            None => outcome.drop(comment, DropReason::UnknownFile),
            Some(file) => {
                let index = file.has_diff().then_some(&file.index);
                let single = filter(vec![comment], index);
                outcome.kept.extend(single.kept);
                outcome.dropped.extend(single.dropped);
            }
        }
    }
    outcome
}
