use std::collections::{BTreeMap, HashMap};
use std::ops::Deref;

use super::filter::DroppedComment;
use super::ContextError;
use crate::config::{Platform, RunConfig};
use crate::diff::DiffIndex;
use crate::source::DiffRange;

/// A review comment on one new-file line, as emitted by a producer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comment {
    /// File path the comment belongs to
    pub file: String,
    /// New-file line number, 1-based
    pub line: usize,
    pub message: String,
    /// Name of the producer that emitted it
    pub producer: String,
    pub reasoning: Option<String>,
}

/// A comment whose line has been confirmed in its file's anchor set.
///
/// Only the anchor filter constructs these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnchoredComment(Comment);

impl AnchoredComment {
    pub(super) fn confirmed(comment: Comment) -> Self {
        Self(comment)
    }
}

impl Deref for AnchoredComment {
    type Target = Comment;

    fn deref(&self) -> &Comment {
        &self.0
    }
}

/// Output of one producer stage. Stored under `producer` in the context.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProducerResult {
    pub producer: String,
    pub comments: Vec<Comment>,
    /// Free text the producer wants in the summary
    pub reasoning: Option<String>,
}

/// Everything known about one changed file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContext {
    pub path: String,
    /// Content at the base ref; `None` when the file did not exist there
    pub before: Option<String>,
    /// Content in the reviewed tree; `None` when the file was deleted
    pub after: Option<String>,
    /// Unified diff of this file; empty when unavailable
    pub diff: String,
    /// Index of `diff`, built once here
    pub index: DiffIndex,
}

impl FileContext {
    pub fn new(
        path: impl Into<String>,
        before: Option<String>,
        after: Option<String>,
        diff: impl Into<String>,
    ) -> Self {
        let diff = diff.into();
        let index = DiffIndex::parse(&diff);
        Self {
            path: path.into(),
            before,
            after,
            diff,
            index,
        }
    }

    pub fn has_diff(&self) -> bool {
        !self.diff.trim().is_empty()
    }
}

/// Where the review is posted, as found in the CI environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CiContext {
    pub platform: Platform,
    pub repo: Option<String>,
    pub pr_number: Option<u64>,
    pub base_ref: Option<String>,
}

/// One record handed to the comment sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkComment {
    pub file: String,
    pub line: usize,
    pub body: String,
}

/// State of one review run, moved from stage to stage.
#[derive(Debug, Clone)]
pub struct ReviewContext {
    pub config: RunConfig,
    pub ci: Option<CiContext>,
    pub changed_files: Vec<String>,
    /// Range the changed files were listed against
    pub range: Option<DiffRange>,
    files: BTreeMap<String, FileContext>,
    pub producer_results: HashMap<String, ProducerResult>,
    /// Merged and anchor-filtered comments, producer order preserved
    pub inline_comments: Vec<AnchoredComment>,
    /// Comments the anchor filter rejected, with reasons
    pub dropped: Vec<DroppedComment>,
    /// Records prepared for the comment sink
    pub outbound: Vec<SinkComment>,
    pub summary: Option<String>,
}

impl ReviewContext {
    pub fn new(config: RunConfig) -> Self {
        Self {
            config,
            ci: None,
            changed_files: Vec::new(),
            range: None,
            files: BTreeMap::new(),
            producer_results: HashMap::new(),
            inline_comments: Vec::new(),
            dropped: Vec::new(),
            outbound: Vec::new(),
            summary: None,
        }
    }

    /// Add a file context. The path must be one of the changed files.
    pub fn insert_file(&mut self, file: FileContext) -> Result<(), ContextError> {
        if !self.changed_files.contains(&file.path) {
            return Err(ContextError::UnknownFile(file.path));
        }
        self.files.insert(file.path.clone(), file);
        Ok(())
    }

    pub fn file(&self, path: &str) -> Option<&FileContext> {
        self.files.get(path)
    }

    /// File contexts in path order.
    pub fn files(&self) -> impl Iterator<Item = &FileContext> {
        self.files.values()
    }

    /// Store a producer's result, replacing any earlier result under its name.
    pub fn record(&mut self, result: ProducerResult) {
        self.producer_results.insert(result.producer.clone(), result);
    }

    /// Check the invariants every stage must leave intact.
    pub fn validate(&self) -> Result<(), ContextError> {
        for (path, file) in &self.files {
            if path != &file.path || !self.changed_files.contains(path) {
                return Err(ContextError::UnknownFile(path.clone()));
            }
        }

        for (key, result) in &self.producer_results {
            if key != &result.producer {
                return Err(ContextError::ProducerKeyMismatch {
                    key: key.clone(),
                    producer: result.producer.clone(),
                });
            }
        }

        for comment in &self.inline_comments {
            let anchored = self
                .file(&comment.file)
                .is_some_and(|f| f.index.is_anchor(comment.line));
            if !anchored {
                return Err(ContextError::UnanchoredComment {
                    file: comment.file.clone(),
                    line: comment.line,
                });
            }
        }
        Ok(())
    }
}
