pub mod github;
pub mod gitlab;

use github::GitHubSink;
use gitlab::GitLabSink;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::{Platform, RunConfig};
use crate::review::SinkComment;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("API request failed: {0}")]
    ApiRequest(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

/// Owner, repository and number of a pull request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrUrl {
    pub owner: String,
    pub repo: String,
    pub pr_number: u64,
}

impl PrUrl {
    /// "owner/repo"
    pub fn slug(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }
}

/// Parse a GitHub PR URL of the form
/// `https://github.com/{owner}/{repo}/pull/{number}`.
pub fn parse_pr_url(url: &str) -> Result<PrUrl, SinkError> {
    let invalid = || SinkError::InvalidUrl(url.to_string());
    let parsed = reqwest::Url::parse(url).map_err(|_| invalid())?;

    if parsed.host_str() != Some("github.com") {
        return Err(invalid());
    }

    let segments: Vec<_> = parsed
        .path_segments()
        .ok_or_else(invalid)?
        .filter(|segment| !segment.is_empty())
        .collect();

    if segments.len() != 4 || segments[2] != "pull" {
        return Err(invalid());
    }

    let pr_number = segments[3].parse::<u64>().map_err(|_| invalid())?;

    Ok(PrUrl {
        owner: segments[0].to_string(),
        repo: segments[1].to_string(),
        pr_number,
    })
}

/// The pull or merge request a review is posted to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostTarget {
    pub platform: Platform,
    /// "owner/repo" on GitHub, the full project path on GitLab
    pub repo: String,
    /// PR number or MR iid
    pub number: u64,
    pub token: String,
}

impl PostTarget {
    /// Target for the run's platform, or the name of the first missing setting.
    pub fn from_run(config: &RunConfig) -> Result<Self, &'static str> {
        let platform = config.platform;
        match platform {
            Platform::Github => {
                let github = &config.github;
                Ok(Self {
                    platform,
                    repo: github.repo.clone().ok_or("github.repo")?,
                    number: github.pr_number.ok_or("github.pr_number")?,
                    token: github.token.clone().ok_or("github.token")?,
                })
            }
            Platform::Gitlab => {
                let gitlab = &config.gitlab;
                Ok(Self {
                    platform,
                    repo: gitlab.project.clone().ok_or("gitlab.project")?,
                    number: gitlab.mr_iid.ok_or("gitlab.mr_iid")?,
                    token: gitlab.token.clone().ok_or("gitlab.token")?,
                })
            }
        }
    }
}

/// How many inline comments were accepted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PostReport {
    pub posted: usize,
    pub failed: usize,
}

/// Destination for review output.
///
/// A rejected comment is logged and counted in the [`PostReport`]; only a
/// failure that stops all posting is an error.
#[async_trait]
pub trait CommentSink: Send + Sync {
    async fn post_inline(
        &self,
        target: &PostTarget,
        comments: &[SinkComment],
    ) -> Result<PostReport, SinkError>;

    async fn post_summary(&self, target: &PostTarget, summary: &str) -> Result<(), SinkError>;
}

/// Routes each post to the sink of the target's platform.
pub struct PlatformSink {
    github: GitHubSink,
    gitlab: GitLabSink,
}

impl PlatformSink {
    pub fn new(config: &RunConfig) -> Self {
        Self {
            github: GitHubSink::new(&config.github),
            gitlab: GitLabSink::new(&config.gitlab),
        }
    }

    fn sink(&self, platform: Platform) -> &dyn CommentSink {
        match platform {
            Platform::Github => &self.github,
            Platform::Gitlab => &self.gitlab,
        }
    }
}

#[async_trait]
impl CommentSink for PlatformSink {
    async fn post_inline(
        &self,
        target: &PostTarget,
        comments: &[SinkComment],
    ) -> Result<PostReport, SinkError> {
        self.sink(target.platform).post_inline(target, comments).await
    }

    async fn post_summary(&self, target: &PostTarget, summary: &str) -> Result<(), SinkError> {
        self.sink(target.platform).post_summary(target, summary).await
    }
}

/// Sink that records what it is given.
#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct RecordingSink {
        pub inline: Mutex<Vec<SinkComment>>,
        pub summaries: Mutex<Vec<String>>,
        pub targets: Mutex<Vec<PostTarget>>,
    }

    #[async_trait]
    impl CommentSink for RecordingSink {
        async fn post_inline(
            &self,
            target: &PostTarget,
            comments: &[SinkComment],
        ) -> Result<PostReport, SinkError> {
            self.targets.lock().unwrap().push(target.clone());
            self.inline.lock().unwrap().extend_from_slice(comments);
            Ok(PostReport {
                posted: comments.len(),
                failed: 0,
            })
        }

        async fn post_summary(&self, target: &PostTarget, summary: &str) -> Result<(), SinkError> {
            self.targets.lock().unwrap().push(target.clone());
            self.summaries.lock().unwrap().push(summary.to_string());
            Ok(())
        }
    }
}
