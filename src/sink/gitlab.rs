use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use super::{CommentSink, PostReport, PostTarget, SinkError};
use crate::config::GitLabConfig;
use crate::review::SinkComment;

/// Commits a merge request diff is positioned against.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
struct DiffRefs {
    base_sha: String,
    start_sha: String,
    head_sha: String,
}

/// Posts to the GitLab REST API: inline comments as diff discussions on the
/// "Changes" tab, the summary as a merge request note.
pub struct GitLabSink {
    client: reqwest::Client,
    api_url: String,
}

impl GitLabSink {
    pub fn new(gitlab: &GitLabConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: gitlab.api_url.trim_end_matches('/').to_string(),
        }
    }

    /// `{api}/projects/{project}/merge_requests/{iid}/{tail..}` with the
    /// project path encoded as one segment.
    fn mr_url(&self, target: &PostTarget, tail: &[&str]) -> Result<Url, SinkError> {
        let invalid = || SinkError::InvalidUrl(self.api_url.clone());
        let mut url = Url::parse(&self.api_url).map_err(|_| invalid())?;
        let iid = target.number.to_string();
        url.path_segments_mut()
            .map_err(|_| invalid())?
            .pop_if_empty()
            .extend(["projects", target.repo.as_str(), "merge_requests", iid.as_str()])
            .extend(tail);
        Ok(url)
    }

    async fn diff_refs(&self, target: &PostTarget) -> Result<DiffRefs, SinkError> {
        #[derive(Deserialize)]
        struct MergeRequest {
            diff_refs: DiffRefs,
        }

        let mr = self
            .client
            .get(self.mr_url(target, &[])?)
            .header("PRIVATE-TOKEN", &target.token)
            .send()
            .await?
            .error_for_status()?
            .json::<MergeRequest>()
            .await?;
        Ok(mr.diff_refs)
    }
}

fn discussion(comment: &SinkComment, refs: &DiffRefs) -> serde_json::Value {
    serde_json::json!({
        "body": comment.body,
        "position": {
            "position_type": "text",
            "base_sha": refs.base_sha,
            "start_sha": refs.start_sha,
            "head_sha": refs.head_sha,
            "new_path": comment.file,
            "new_line": comment.line,
        },
    })
}

#[async_trait]
impl CommentSink for GitLabSink {
    #[instrument(
        skip(self, target, comments),
        fields(project = %target.repo, mr = target.number, comments = comments.len())
    )]
    async fn post_inline(
        &self,
        target: &PostTarget,
        comments: &[SinkComment],
    ) -> Result<PostReport, SinkError> {
        let refs = self.diff_refs(target).await?;
        debug!(head_sha = %refs.head_sha, "resolved MR diff refs");

        let url = self.mr_url(target, &["discussions"])?;
        let mut report = PostReport::default();
        for comment in comments {
            let response = self
                .client
                .post(url.clone())
                .header("PRIVATE-TOKEN", &target.token)
                .json(&discussion(comment, &refs))
                .send()
                .await;
            match response {
                Ok(response) if response.status().is_success() => {
                    debug!(file = %comment.file, line = comment.line, "posted inline comment");
                    report.posted += 1;
                }
                Ok(response) => {
                    let status = response.status();
                    let text = response.text().await.unwrap_or_default();
                    warn!(
                        file = %comment.file,
                        line = comment.line,
                        %status,
                        response = %text,
                        "inline comment rejected"
                    );
                    report.failed += 1;
                }
                Err(e) => {
                    warn!(
                        file = %comment.file,
                        line = comment.line,
                        error = %e,
                        "inline comment request failed"
                    );
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    #[instrument(skip(self, target, summary), fields(project = %target.repo, mr = target.number))]
    async fn post_summary(&self, target: &PostTarget, summary: &str) -> Result<(), SinkError> {
        self.client
            .post(self.mr_url(target, &["notes"])?)
            .header("PRIVATE-TOKEN", &target.token)
            .json(&serde_json::json!({ "body": summary }))
            .send()
            .await?
            .error_for_status()?;
        debug!(summary_bytes = summary.len(), "posted summary note");
        Ok(())
    }
}
