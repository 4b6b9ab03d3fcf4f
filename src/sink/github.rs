use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use super::{CommentSink, PostReport, PostTarget, SinkError};
use crate::config::GitHubConfig;
use crate::review::SinkComment;

/// Posts to the GitHub REST API: inline comments on the "Files changed" tab,
/// the summary as an issue comment on the conversation tab.
pub struct GitHubSink {
    client: reqwest::Client,
    api_url: String,
}

impl GitHubSink {
    pub fn new(github: &GitHubConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: github.api_url.trim_end_matches('/').to_string(),
        }
    }

    fn post(&self, url: &str, token: &str) -> reqwest::RequestBuilder {
        self.client
            .post(url)
            .header("User-Agent", "pr-reviewer")
            .header("Accept", "application/vnd.github+json")
            .bearer_auth(token)
    }

    /// Head commit of the pull request; review comments are made against it.
    async fn head_sha(&self, target: &PostTarget) -> Result<String, SinkError> {
        #[derive(Deserialize)]
        struct Head {
            sha: String,
        }
        #[derive(Deserialize)]
        struct PullResponse {
            head: Head,
        }

        let url = format!("{}/repos/{}/pulls/{}", self.api_url, target.repo, target.number);
        let pull = self
            .client
            .get(&url)
            .header("User-Agent", "pr-reviewer")
            .bearer_auth(&target.token)
            .send()
            .await?
            .error_for_status()?
            .json::<PullResponse>()
            .await?;
        Ok(pull.head.sha)
    }
}

fn review_comment(comment: &SinkComment, commit_id: &str) -> serde_json::Value {
    serde_json::json!({
        "body": comment.body,
        "commit_id": commit_id,
        "path": comment.file,
        "line": comment.line,
        "side": "RIGHT",
    })
}

#[async_trait]
impl CommentSink for GitHubSink {
    #[instrument(
        skip(self, target, comments),
        fields(repo = %target.repo, pr = target.number, comments = comments.len())
    )]
    async fn post_inline(
        &self,
        target: &PostTarget,
        comments: &[SinkComment],
    ) -> Result<PostReport, SinkError> {
        let commit_id = self.head_sha(target).await?;
        debug!(%commit_id, "resolved PR head");

        let url = format!(
            "{}/repos/{}/pulls/{}/comments",
            self.api_url, target.repo, target.number
        );
        let mut report = PostReport::default();
        for comment in comments {
            let payload = review_comment(comment, &commit_id);
            match self.post(&url, &target.token).json(&payload).send().await {
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

    #[instrument(skip(self, target, summary), fields(repo = %target.repo, pr = target.number))]
    async fn post_summary(&self, target: &PostTarget, summary: &str) -> Result<(), SinkError> {
        let url = format!(
            "{}/repos/{}/issues/{}/comments",
            self.api_url, target.repo, target.number
        );
        self.post(&url, &target.token)
            .json(&serde_json::json!({ "body": summary }))
            .send()
            .await?
            .error_for_status()?;
        debug!(summary_bytes = summary.len(), "posted summary comment");
        Ok(())
    }
}
