use std::collections::BTreeSet;

/// A contiguous region of changes within a file, as declared by its
/// `@@ -old_start,old_count +new_start,new_count @@` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hunk {
    /// Starting line number in the old file
    pub old_start: usize,
    /// Number of lines in the old file
    pub old_count: usize,
    /// Starting line number in the new file
    pub new_start: usize,
    /// Number of lines in the new file
    pub new_count: usize,
}

/// Hunks of one file's diff plus the new-file lines that may carry a comment.
///
/// Built once per file by [`DiffIndex::parse`](super::index) and cached on the
/// file context. Only added lines are anchors; context lines never are.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffIndex {
    /// Hunks in diff order
    pub hunks: Vec<Hunk>,
    /// New-file line numbers of `+` lines
    pub anchors: BTreeSet<usize>,
    /// `@@` headers that could not be parsed; their bodies were skipped
    pub malformed_hunks: usize,
}

/// A single file section cut out of a multi-file unified diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDiff {
    /// File path (e.g., "src/auth/config.rs")
    pub path: String,
    /// Whether this is a new file
    pub is_new: bool,
    /// Whether this file was deleted
    pub is_deleted: bool,
    /// Lines added in this file
    pub additions: usize,
    /// Lines deleted in this file
    pub deletions: usize,
    /// Raw diff text of this file, starting at its `diff --git` line
    pub text: String,
}
