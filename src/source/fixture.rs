use async_trait::async_trait;
use std::collections::BTreeMap;
use tracing::debug;

use super::{ChangeSet, DiffRange, DiffSource, SourceError};
use crate::config::ChangeScope;
use crate::diff::{self, DiffError, DiffIndex, FileDiff, Replay};

/// Serves a fixed multi-file patch, for demo runs and tests.
///
/// File content is rebuilt from the hunks, so only the lines the patch shows
/// are known.
pub struct FixtureSource {
    files: BTreeMap<String, FileDiff>,
}

impl FixtureSource {
    pub fn from_patch(patch: &str) -> Result<Self, DiffError> {
        let files = diff::split_files(patch)?
            .into_iter()
            .map(|f| {
                debug!(
                    file = %f.path,
                    additions = f.additions,
                    deletions = f.deletions,
                    "loaded fixture file"
                );
                (f.path.clone(), f)
            })
            .collect();
        Ok(Self { files })
    }

    /// Added line numbers per file.
    pub fn anchors(&self) -> BTreeMap<String, Vec<usize>> {
        self.files
            .iter()
            .map(|(path, f)| {
                let anchors = DiffIndex::parse(&f.text).anchors.into_iter().collect();
                (path.clone(), anchors)
            })
            .collect()
    }

    fn side(&self, path: &str, old: bool) -> Option<String> {
        let file = self.files.get(path)?;
        if (old && file.is_new) || (!old && file.is_deleted) {
            return None;
        }
        let mut content = String::new();
        for line in Replay::new(&file.text) {
            if (old && line.in_old()) || (!old && line.in_new()) {
                content.push_str(line.text);
                content.push('\n');
            }
        }
        Some(content)
    }
}

#[async_trait]
impl DiffSource for FixtureSource {
    async fn changed_files(
        &self,
        _scope: ChangeScope,
        base_ref: &str,
    ) -> Result<ChangeSet, SourceError> {
        Ok(ChangeSet {
            files: self.files.keys().cloned().collect(),
            range: DiffRange::Commits {
                base: base_ref.to_string(),
            },
        })
    }

    async fn file_diff(&self, _range: &DiffRange, path: &str) -> Result<String, SourceError> {
        Ok(self.files.get(path).map(|f| f.text.clone()).unwrap_or_default())
    }

    async fn before(&self, _range: &DiffRange, path: &str) -> Result<Option<String>, SourceError> {
        Ok(self.side(path, true))
    }

    async fn after(&self, _range: &DiffRange, path: &str) -> Result<Option<String>, SourceError> {
        Ok(self.side(path, false))
    }
}
