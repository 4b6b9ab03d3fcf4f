pub mod fixture;

pub use fixture::FixtureSource;

use async_trait::async_trait;
use git2::{Delta, Diff, DiffFormat, DiffOptions, ErrorCode, Oid, Repository, Tree};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::config::ChangeScope;

/// Git's empty tree; the base of last resort when no commit can be found.
const EMPTY_TREE: &str = "4b825dc642cb6eb9a060e54bf8d69288fbee4904";

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    #[error("Failed to read working tree file: {0}")]
    Io(#[from] std::io::Error),

    #[error("git task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("file content is not valid UTF-8")]
    Utf8,
}

/// What the changed files were diffed between. Chosen once when the changed
/// files are listed, then used for every per-file call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffRange {
    /// Index against HEAD
    Staged,
    /// Working tree against the index
    Unstaged,
    /// Working tree against HEAD
    All,
    /// HEAD against a resolved base commit
    Commits { base: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSet {
    pub files: Vec<String>,
    pub range: DiffRange,
}

/// Where diff text and file content come from.
///
/// Per-file calls never fail just because the file is absent on one side;
/// absence is `Ok(None)`.
#[async_trait]
pub trait DiffSource: Send + Sync {
    /// List changed paths for `scope`, resolving `base_ref` when needed.
    async fn changed_files(
        &self,
        scope: ChangeScope,
        base_ref: &str,
    ) -> Result<ChangeSet, SourceError>;

    /// Unified diff of one file; empty when there is nothing to show.
    async fn file_diff(&self, range: &DiffRange, path: &str) -> Result<String, SourceError>;

    /// Content on the old side of `range`.
    async fn before(&self, range: &DiffRange, path: &str) -> Result<Option<String>, SourceError>;

    /// Content on the new side of `range`.
    async fn after(&self, range: &DiffRange, path: &str) -> Result<Option<String>, SourceError>;
}

/// Reads changes from a git checkout through libgit2.
///
/// `git2::Repository` is not `Sync`, so every call opens the repository on
/// the blocking pool and drops it when done.
pub struct GitSource {
    repo_dir: PathBuf,
}

impl GitSource {
    pub fn new(repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
        }
    }

    async fn with_repo<T, F>(&self, f: F) -> Result<T, SourceError>
    where
        T: Send + 'static,
        F: FnOnce(&Repository) -> Result<T, SourceError> + Send + 'static,
    {
        let dir = self.repo_dir.clone();
        tokio::task::spawn_blocking(move || {
            let repo = Repository::discover(&dir)?;
            f(&repo)
        })
        .await?
    }
}

/// Tree of HEAD, or `None` before the first commit.
fn head_tree(repo: &Repository) -> Result<Option<Tree<'_>>, git2::Error> {
    match repo.head() {
        Ok(head) => Ok(Some(head.peel_to_tree()?)),
        Err(e) if matches!(e.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Tree of `spec`; `None` for the empty tree.
fn tree_at<'r>(repo: &'r Repository, spec: &str) -> Result<Option<Tree<'r>>, git2::Error> {
    if spec == EMPTY_TREE {
        return Ok(None);
    }
    Ok(Some(repo.revparse_single(spec)?.peel_to_tree()?))
}

/// Merge base of `base_ref` and HEAD; HEAD's parent when the base ref is
/// missing; the empty tree for a repository with a single commit.
fn resolve_base(repo: &Repository, base_ref: &str) -> String {
    let head = match repo.head().and_then(|h| h.peel_to_commit()) {
        Ok(head) => head,
        Err(e) => {
            warn!(error = %e, "no HEAD commit, reviewing against the empty tree");
            return EMPTY_TREE.to_string();
        }
    };
    let merge_base = repo
        .revparse_single(base_ref)
        .and_then(|base| base.peel_to_commit())
        .and_then(|base| repo.merge_base(base.id(), head.id()));
    match merge_base {
        Ok(oid) => return oid.to_string(),
        Err(e) => warn!(base_ref, error = %e, "could not resolve merge base"),
    }
    match head.parent(0) {
        Ok(parent) => {
            warn!(base = %parent.id(), "falling back to HEAD~1 as review base");
            parent.id().to_string()
        }
        Err(_) => {
            warn!("falling back to the empty tree as review base");
            EMPTY_TREE.to_string()
        }
    }
}

/// Diff for `range`, limited to `path` when given.
fn diff_for<'r>(
    repo: &'r Repository,
    range: &DiffRange,
    path: Option<&str>,
) -> Result<Diff<'r>, git2::Error> {
    let mut opts = DiffOptions::new();
    if let Some(path) = path {
        opts.pathspec(path).disable_pathspec_match(true);
    }
    match range {
        DiffRange::Staged => {
            let head = head_tree(repo)?;
            repo.diff_tree_to_index(head.as_ref(), None, Some(&mut opts))
        }
        DiffRange::Unstaged => repo.diff_index_to_workdir(None, Some(&mut opts)),
        DiffRange::All => {
            let head = head_tree(repo)?;
            repo.diff_tree_to_workdir_with_index(head.as_ref(), Some(&mut opts))
        }
        DiffRange::Commits { base } => {
            let old = tree_at(repo, base)?;
            let new = head_tree(repo)?;
            repo.diff_tree_to_tree(old.as_ref(), new.as_ref(), Some(&mut opts))
        }
    }
}

fn changed_paths(diff: &Diff<'_>, skip_deleted: bool) -> Vec<String> {
    diff.deltas()
        .filter(|delta| !(skip_deleted && delta.status() == Delta::Deleted))
        .filter_map(|delta| delta.new_file().path().map(|p| p.to_string_lossy().into_owned()))
        .collect()
}

/// Unified diff text with file headers, as `git diff` prints it.
fn patch_text(diff: &Diff<'_>) -> Result<String, git2::Error> {
    let mut text = String::new();
    diff.print(DiffFormat::Patch, |_delta, _hunk, line| {
        if matches!(line.origin(), '+' | '-' | ' ') {
            text.push(line.origin());
        }
        text.push_str(&String::from_utf8_lossy(line.content()));
        true
    })?;
    Ok(text)
}

fn blob_text(repo: &Repository, id: Oid) -> Result<String, SourceError> {
    let blob = repo.find_blob(id)?;
    String::from_utf8(blob.content().to_vec()).map_err(|_| SourceError::Utf8)
}

fn tree_file(
    repo: &Repository,
    tree: Option<Tree<'_>>,
    path: &str,
) -> Result<Option<String>, SourceError> {
    let Some(tree) = tree else {
        return Ok(None);
    };
    match tree.get_path(Path::new(path)) {
        Ok(entry) => blob_text(repo, entry.id()).map(Some),
        Err(e) if e.code() == ErrorCode::NotFound => {
            debug!(path, "not present in tree");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

fn index_file(repo: &Repository, path: &str) -> Result<Option<String>, SourceError> {
    let index = repo.index()?;
    match index.get_path(Path::new(path), 0) {
        Some(entry) => blob_text(repo, entry.id).map(Some),
        None => {
            debug!(path, "not present in index");
            Ok(None)
        }
    }
}

fn worktree_file(repo: &Repository, path: &str) -> Result<Option<String>, SourceError> {
    let Some(root) = repo.workdir() else {
        return Ok(None);
    };
    match std::fs::read(root.join(path)) {
        Ok(bytes) => String::from_utf8(bytes).map(Some).map_err(|_| SourceError::Utf8),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl DiffSource for GitSource {
    #[instrument(skip(self))]
    async fn changed_files(
        &self,
        scope: ChangeScope,
        base_ref: &str,
    ) -> Result<ChangeSet, SourceError> {
        let base_ref = base_ref.to_string();
        let change_set = self
            .with_repo(move |repo| {
                let listed = |range: DiffRange, skip_deleted: bool| {
                    let diff = diff_for(repo, &range, None)?;
                    Ok::<_, SourceError>(ChangeSet {
                        files: changed_paths(&diff, skip_deleted),
                        range,
                    })
                };
                match scope {
                    ChangeScope::Unstaged => listed(DiffRange::Unstaged, false),
                    ChangeScope::All => listed(DiffRange::All, false),
                    ChangeScope::Staged => {
                        let staged = listed(DiffRange::Staged, true)?;
                        if !staged.files.is_empty() {
                            return Ok(staged);
                        }
                        debug!("nothing staged, reviewing committed changes");
                        let base = resolve_base(repo, &base_ref);
                        listed(DiffRange::Commits { base }, true)
                    }
                }
            })
            .await?;
        debug!(files = change_set.files.len(), range = ?change_set.range, "listed changed files");
        Ok(change_set)
    }

    async fn file_diff(&self, range: &DiffRange, path: &str) -> Result<String, SourceError> {
        let (range, path) = (range.clone(), path.to_string());
        self.with_repo(move |repo| {
            let diff = diff_for(repo, &range, Some(&path))?;
            Ok(patch_text(&diff)?)
        })
        .await
    }

    async fn before(&self, range: &DiffRange, path: &str) -> Result<Option<String>, SourceError> {
        let (range, path) = (range.clone(), path.to_string());
        self.with_repo(move |repo| match &range {
            DiffRange::Staged | DiffRange::All => tree_file(repo, head_tree(repo)?, &path),
            DiffRange::Unstaged => index_file(repo, &path),
            DiffRange::Commits { base } => tree_file(repo, tree_at(repo, base)?, &path),
        })
        .await
    }

    async fn after(&self, range: &DiffRange, path: &str) -> Result<Option<String>, SourceError> {
        let (range, path) = (range.clone(), path.to_string());
        self.with_repo(move |repo| match &range {
            DiffRange::Staged => index_file(repo, &path),
            DiffRange::Unstaged | DiffRange::All => worktree_file(repo, &path),
            DiffRange::Commits { .. } => tree_file(repo, head_tree(repo)?, &path),
        })
        .await
    }
}
