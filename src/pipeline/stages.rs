use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{Stage, StageError, PRODUCERS};
use crate::config::Platform;
use crate::diff::apply;
use crate::review::aggregate::{merge, ordered};
use crate::review::filter::filter_for_files;
use crate::review::{CiContext, Comment, FileContext, ReviewContext, SinkComment};
use crate::sink::{CommentSink, PostTarget};
use crate::source::{DiffSource, SourceError};

/// Snapshot of the environment variables CI detection reads. Captured once
/// by the caller so the pipeline never reads the live process environment.
#[derive(Debug, Clone, Default)]
pub struct CiEnv {
    vars: HashMap<String, String>,
}

impl CiEnv {
    pub fn capture() -> Self {
        Self {
            vars: std::env::vars().collect(),
        }
    }

    #[cfg(test)]
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }

    /// Non-empty value of `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    fn flag(&self, key: &str) -> bool {
        self.get(key).is_some_and(|v| v.eq_ignore_ascii_case("true"))
    }

    /// Whether the process runs under GitHub Actions or GitLab CI.
    pub fn is_ci(&self) -> bool {
        self.flag("GITHUB_ACTIONS") || self.flag("GITLAB_CI")
    }
}

/// PR number from a GitHub ref such as `refs/pull/42/merge`.
fn pr_from_ref(git_ref: &str) -> Option<u64> {
    git_ref.strip_prefix("refs/pull/")?.split('/').next()?.parse().ok()
}

/// Checks the run can start. Fails before any external call when text
/// generation is not configured, unless this is an offline demo run.
pub struct Init;

#[async_trait]
impl Stage for Init {
    fn name(&self) -> &str {
        "init"
    }

    async fn run(&self, ctx: ReviewContext) -> Result<ReviewContext, StageError> {
        if ctx.config.mock {
            debug!("offline run, skipping text generation settings check");
        } else {
            ctx.config.validate_llm()?;
        }
        info!(
            scope = ?ctx.config.scope,
            platform = %ctx.config.platform,
            base_ref = %ctx.config.base_ref,
            dry_run = ctx.config.dry_run,
            "review initialised"
        );
        Ok(ctx)
    }
}

/// Reads platform, repository, PR number and target branch from the CI
/// environment. Values already configured win, except the base ref, which
/// follows the PR's target branch.
pub struct DetectCiContext {
    env: CiEnv,
}

impl DetectCiContext {
    pub fn new(env: CiEnv) -> Self {
        Self { env }
    }
}

#[async_trait]
impl Stage for DetectCiContext {
    fn name(&self) -> &str {
        "detect_ci_context"
    }

    async fn run(&self, mut ctx: ReviewContext) -> Result<ReviewContext, StageError> {
        let env = &self.env;
        let platform = if env.flag("GITLAB_CI") {
            Platform::Gitlab
        } else if env.flag("GITHUB_ACTIONS") {
            Platform::Github
        } else {
            ctx.config.platform
        };
        let (repo, pr_number) = match platform {
            Platform::Github => (
                env.get("GITHUB_REPOSITORY").map(str::to_string),
                env.get("GITHUB_PR_NUMBER")
                    .and_then(|n| n.parse().ok())
                    .or_else(|| env.get("GITHUB_REF").and_then(pr_from_ref)),
            ),
            Platform::Gitlab => (
                env.get("CI_PROJECT_PATH").map(str::to_string),
                env.get("CI_MERGE_REQUEST_IID").and_then(|n| n.parse().ok()),
            ),
        };
        let base_ref = env
            .get("GITHUB_BASE_REF")
            .or_else(|| env.get("CI_MERGE_REQUEST_TARGET_BRANCH_NAME"))
            .map(|branch| format!("origin/{branch}"));

        ctx.config.platform = platform;
        let (configured_repo, configured_number) = match platform {
            Platform::Github => (&mut ctx.config.github.repo, &mut ctx.config.github.pr_number),
            Platform::Gitlab => (&mut ctx.config.gitlab.project, &mut ctx.config.gitlab.mr_iid),
        };
        if configured_repo.is_none() {
            *configured_repo = repo.clone();
        }
        if configured_number.is_none() {
            *configured_number = pr_number;
        }
        if let Some(base) = &base_ref {
            ctx.config.base_ref = base.clone();
        }

        info!(
            %platform,
            repo = ?repo,
            pr = ?pr_number,
            base_ref = ?base_ref,
            "detected CI context"
        );
        ctx.ci = Some(CiContext {
            platform,
            repo,
            pr_number,
            base_ref,
        });
        Ok(ctx)
    }
}

/// Lists the changed files. A failing source leaves the list empty.
pub struct DetectChanges {
    source: Arc<dyn DiffSource>,
}

impl DetectChanges {
    pub fn new(source: Arc<dyn DiffSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl Stage for DetectChanges {
    fn name(&self) -> &str {
        "detect_changes"
    }

    async fn run(&self, mut ctx: ReviewContext) -> Result<ReviewContext, StageError> {
        match self
            .source
            .changed_files(ctx.config.scope, &ctx.config.base_ref)
            .await
        {
            Ok(changes) => {
                info!(files = changes.files.len(), range = ?changes.range, "found changed files");
                ctx.changed_files = changes.files;
                ctx.range = Some(changes.range);
            }
            Err(e) => {
                warn!(error = %e, "could not list changed files, reviewing nothing");
                ctx.changed_files.clear();
                ctx.range = None;
            }
        }
        Ok(ctx)
    }
}

/// Loads diff and content for every changed file and indexes the diff.
/// Source failures degrade to an empty diff or absent content for that file.
pub struct PrepareContext {
    source: Arc<dyn DiffSource>,
}

impl PrepareContext {
    pub fn new(source: Arc<dyn DiffSource>) -> Self {
        Self { source }
    }
}

fn degrade<T: Default>(result: Result<T, SourceError>, path: &str, what: &str) -> T {
    result.unwrap_or_else(|e| {
        warn!(file = %path, error = %e, "could not read {what}, continuing without it");
        T::default()
    })
}

#[async_trait]
impl Stage for PrepareContext {
    fn name(&self) -> &str {
        "prepare_context"
    }

    async fn run(&self, mut ctx: ReviewContext) -> Result<ReviewContext, StageError> {
        let Some(range) = ctx.range.clone() else {
            debug!("no diff range, nothing to prepare");
            return Ok(ctx);
        };

        for path in ctx.changed_files.clone() {
            let diff = degrade(self.source.file_diff(&range, &path).await, &path, "diff");
            let before = degrade(self.source.before(&range, &path).await, &path, "base content");
            let after = degrade(self.source.after(&range, &path).await, &path, "new content");

            let file = FileContext::new(path.as_str(), before, after, diff);
            if file.index.malformed_hunks > 0 {
                warn!(
                    file = %path,
                    skipped = file.index.malformed_hunks,
                    "skipped malformed hunks"
                );
            }
            if let (Some(before), Some(after)) = (&file.before, &file.after) {
                let replays =
                    apply(before, &file.diff).is_ok_and(|lines| lines.iter().eq(after.lines()));
                if !replays {
                    debug!(file = %path, "diff does not replay onto the base content");
                }
            }
            debug!(
                file = %path,
                hunks = file.index.hunks.len(),
                anchors = file.index.anchors.len(),
                "indexed diff"
            );
            ctx.insert_file(file)?;
        }
        Ok(ctx)
    }
}

fn declared_order() -> Vec<String> {
    PRODUCERS.iter().map(|p| p.to_string()).collect()
}

/// Merges producer comments in declared order and keeps only the ones on
/// added lines.
pub struct MergeResults;

#[async_trait]
impl Stage for MergeResults {
    fn name(&self) -> &str {
        "merge_results"
    }

    async fn run(&self, mut ctx: ReviewContext) -> Result<ReviewContext, StageError> {
        let merged = merge(&ctx.producer_results, &declared_order());
        let total = merged.len();
        let outcome = filter_for_files(merged, &ctx);
        info!(total, kept = outcome.kept.len(), dropped = outcome.dropped.len(), "merged comments");
        ctx.inline_comments = outcome.kept;
        ctx.dropped = outcome.dropped;
        Ok(ctx)
    }
}

/// Body of one posted inline comment.
pub fn comment_body(comment: &Comment) -> String {
    let mut body = format!(
        "*{}* comment on line {}:\n{}",
        comment.producer, comment.line, comment.message
    );
    if let Some(reasoning) = &comment.reasoning {
        body.push_str("\n\n");
        body.push_str(reasoning);
    }
    body
}

/// Prepares sink records, and a summary from producer reasoning when no
/// summary was written.
pub struct FormatOutput;

#[async_trait]
impl Stage for FormatOutput {
    fn name(&self) -> &str {
        "format_output"
    }

    async fn run(&self, mut ctx: ReviewContext) -> Result<ReviewContext, StageError> {
        ctx.outbound = ctx
            .inline_comments
            .iter()
            .map(|c| SinkComment {
                file: c.file.clone(),
                line: c.line,
                body: comment_body(c),
            })
            .collect();

        if ctx.summary.is_none() {
            let lines: Vec<String> = ordered(&ctx.producer_results, &declared_order())
                .into_iter()
                .filter_map(|r| r.reasoning.as_ref())
                .map(|reasoning| format!("🔍 {reasoning}"))
                .collect();
            ctx.summary = Some(format!("### Summary of AI Code Review\n\n{}", lines.join("\n\n")));
        }
        debug!(records = ctx.outbound.len(), "formatted output");
        Ok(ctx)
    }
}

/// Where to post, or `None` (logged) when posting is off or impossible.
fn post_target(ctx: &ReviewContext, what: &str) -> Option<PostTarget> {
    if ctx.config.dry_run {
        info!("dry run, not posting {what}");
        return None;
    }
    match PostTarget::from_run(&ctx.config) {
        Ok(target) => Some(target),
        Err(missing) => {
            warn!(
                platform = %ctx.config.platform,
                missing,
                "cannot post {what} without this setting"
            );
            None
        }
    }
}

/// Posts the inline comments when inline posting is enabled.
pub struct PostInline {
    sink: Arc<dyn CommentSink>,
}

impl PostInline {
    pub fn new(sink: Arc<dyn CommentSink>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl Stage for PostInline {
    fn name(&self) -> &str {
        "post_inline"
    }

    async fn run(&self, ctx: ReviewContext) -> Result<ReviewContext, StageError> {
        if !ctx.config.post_inline {
            debug!("inline posting not enabled");
            return Ok(ctx);
        }
        if ctx.outbound.is_empty() {
            info!("no inline comments to post");
            return Ok(ctx);
        }
        let Some(target) = post_target(&ctx, "inline comments") else {
            return Ok(ctx);
        };
        match self.sink.post_inline(&target, &ctx.outbound).await {
            Ok(report) => {
                info!(posted = report.posted, failed = report.failed, "posted inline comments")
            }
            Err(e) => warn!(error = %e, "posting inline comments failed"),
        }
        Ok(ctx)
    }
}

/// Posts the summary comment.
pub struct PostSummary {
    sink: Arc<dyn CommentSink>,
}

impl PostSummary {
    pub fn new(sink: Arc<dyn CommentSink>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl Stage for PostSummary {
    fn name(&self) -> &str {
        "post_summary"
    }

    async fn run(&self, ctx: ReviewContext) -> Result<ReviewContext, StageError> {
        let Some(summary) = ctx.summary.as_deref().filter(|s| !s.trim().is_empty()) else {
            info!("no summary to post");
            return Ok(ctx);
        };
        let Some(target) = post_target(&ctx, "summary") else {
            return Ok(ctx);
        };
        match self.sink.post_summary(&target, summary).await {
            Ok(()) => info!("posted summary"),
            Err(e) => warn!(error = %e, "posting summary failed"),
        }
        Ok(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChangeScope, RunConfig};
    use crate::review::types::tests::{comment, context_with};
    use crate::review::filter::DropReason;
    use crate::review::ProducerResult;
    use crate::sink::testing::RecordingSink;
    use crate::source::{ChangeSet, DiffRange};

    struct BrokenSource;

    #[async_trait]
    impl DiffSource for BrokenSource {
        async fn changed_files(
            &self,
            _scope: ChangeScope,
            _base_ref: &str,
        ) -> Result<ChangeSet, SourceError> {
            Err(SourceError::Utf8)
        }

        async fn file_diff(&self, _range: &DiffRange, _path: &str) -> Result<String, SourceError> {
            Err(SourceError::Utf8)
        }

        async fn before(
            &self,
            _range: &DiffRange,
            _path: &str,
        ) -> Result<Option<String>, SourceError> {
            Err(SourceError::Utf8)
        }

        async fn after(
            &self,
            _range: &DiffRange,
            _path: &str,
        ) -> Result<Option<String>, SourceError> {
            Err(SourceError::Utf8)
        }
    }

    fn postable(ctx: &mut ReviewContext) {
        ctx.config.post_inline = true;
        ctx.config.github.repo = Some("org/repo".to_string());
        ctx.config.github.pr_number = Some(3);
        ctx.config.github.token = Some("token".to_string());
        ctx.outbound = vec![SinkComment {
            file: "a.rs".to_string(),
            line: 2,
            body: "body".to_string(),
        }];
        ctx.summary = Some("summary".to_string());
    }

    #[test]
    fn test_pr_from_ref() {
        assert_eq!(pr_from_ref("refs/pull/42/merge"), Some(42));
        assert_eq!(pr_from_ref("refs/heads/main"), None);
        assert_eq!(pr_from_ref("refs/pull/x/merge"), None);
    }

    #[test]
    fn test_ci_env_flags() {
        assert!(CiEnv::from_pairs([("GITHUB_ACTIONS", "true")]).is_ci());
        assert!(CiEnv::from_pairs([("GITLAB_CI", "TRUE")]).is_ci());
        assert!(!CiEnv::from_pairs([("GITHUB_ACTIONS", "false")]).is_ci());
        assert!(!CiEnv::default().is_ci());
    }

    #[tokio::test]
    async fn test_init_requires_llm_settings_unless_mock() {
        let err = Init.run(ReviewContext::new(RunConfig::default())).await.unwrap_err();
        assert!(matches!(err, StageError::Config(_)));

        let mut config = RunConfig::default();
        config.mock = true;
        assert!(Init.run(ReviewContext::new(config)).await.is_ok());
    }

    #[tokio::test]
    async fn test_detect_ci_context_from_github_env() {
        let env = CiEnv::from_pairs([
            ("GITHUB_ACTIONS", "true"),
            ("GITHUB_REPOSITORY", "org/repo"),
            ("GITHUB_REF", "refs/pull/12/merge"),
            ("GITHUB_BASE_REF", "develop"),
        ]);
        let ctx = DetectCiContext::new(env)
            .run(ReviewContext::new(RunConfig::default()))
            .await
            .unwrap();
        let ci = ctx.ci.as_ref().unwrap();
        assert_eq!(ci.platform, Platform::Github);
        assert_eq!(ci.pr_number, Some(12));
        assert_eq!(ctx.config.github.repo.as_deref(), Some("org/repo"));
        assert_eq!(ctx.config.github.pr_number, Some(12));
        assert_eq!(ctx.config.base_ref, "origin/develop");
    }

    #[tokio::test]
    async fn test_detect_ci_context_keeps_configured_values() {
        let env = CiEnv::from_pairs([
            ("GITLAB_CI", "true"),
            ("CI_PROJECT_PATH", "group/project"),
            ("CI_MERGE_REQUEST_IID", "5"),
        ]);
        let mut config = RunConfig::default();
        config.gitlab.project = Some("group/configured".to_string());
        let ctx = DetectCiContext::new(env).run(ReviewContext::new(config)).await.unwrap();
        assert_eq!(ctx.config.platform, Platform::Gitlab);
        assert_eq!(ctx.config.gitlab.project.as_deref(), Some("group/configured"));
        assert_eq!(ctx.config.gitlab.mr_iid, Some(5));
        assert!(ctx.config.github.repo.is_none() && ctx.config.github.pr_number.is_none());
        assert_eq!(ctx.config.base_ref, "origin/main");
    }

    #[tokio::test]
    async fn test_broken_source_degrades() {
        let source: Arc<dyn DiffSource> = Arc::new(BrokenSource);
        let ctx = DetectChanges::new(source.clone())
            .run(ReviewContext::new(RunConfig::default()))
            .await
            .unwrap();
        assert!(ctx.changed_files.is_empty());
        assert!(ctx.range.is_none());

        let mut ctx = ReviewContext::new(RunConfig::default());
        ctx.changed_files = vec!["a.rs".to_string()];
        ctx.range = Some(DiffRange::Staged);
        let ctx = PrepareContext::new(source).run(ctx).await.unwrap();
        let file = ctx.file("a.rs").unwrap();
        assert!(!file.has_diff());
        assert!(file.before.is_none() && file.after.is_none());
        assert!(!file.index.has_anchors());
    }

    #[tokio::test]
    async fn test_merge_results_filters_by_anchor() {
        let mut ctx = context_with(&[
            ("a.rs", "@@ -1,2 +1,3 @@\n line1\n+line2\n line3"),
            ("gone.rs", "@@ -1,2 +0,0 @@\n-a\n-b"),
        ]);
        ctx.record(ProducerResult {
            producer: "style".to_string(),
            comments: vec![comment("a.rs", 2, "style"), comment("gone.rs", 1, "style")],
            reasoning: None,
        });
        ctx.record(ProducerResult {
            producer: "bug".to_string(),
            comments: vec![
                comment("a.rs", 1, "bug"),
                comment("a.rs", 2, "bug"),
                comment("nope.rs", 1, "bug"),
            ],
            reasoning: None,
        });

        let ctx = MergeResults.run(ctx).await.unwrap();
        let kept: Vec<&str> = ctx.inline_comments.iter().map(|c| c.producer.as_str()).collect();
        assert_eq!(kept, vec!["bug", "style"]);
        let reasons: Vec<DropReason> = ctx.dropped.iter().map(|d| d.reason).collect();
        assert_eq!(
            reasons,
            vec![DropReason::NotAnchored, DropReason::UnknownFile, DropReason::EmptyAnchorSet]
        );
    }

    #[tokio::test]
    async fn test_format_output_bodies_and_fallback_summary() {
        let mut ctx = context_with(&[("a.rs", "@@ -1,2 +1,3 @@\n line1\n+line2\n line3")]);
        let mut with_reason = comment("a.rs", 2, "bug");
        with_reason.message = "unchecked index".to_string();
        with_reason.reasoning = Some("panics on empty input".to_string());
        ctx.record(ProducerResult {
            producer: "bug".to_string(),
            comments: vec![with_reason],
            reasoning: Some("one risky spot".to_string()),
        });
        ctx.record(ProducerResult {
            producer: "context".to_string(),
            comments: vec![],
            reasoning: Some("fits the module".to_string()),
        });

        let ctx = MergeResults.run(ctx).await.unwrap();
        let ctx = FormatOutput.run(ctx).await.unwrap();
        assert_eq!(
            ctx.outbound[0].body,
            "*bug* comment on line 2:\nunchecked index\n\npanics on empty input"
        );
        assert_eq!(
            ctx.summary.as_deref(),
            Some("### Summary of AI Code Review\n\n🔍 fits the module\n\n🔍 one risky spot")
        );
    }

    #[tokio::test]
    async fn test_post_stages_deliver_to_sink() {
        let sink = Arc::new(RecordingSink::default());
        let mut ctx = context_with(&[]);
        postable(&mut ctx);

        let ctx = PostInline::new(sink.clone()).run(ctx).await.unwrap();
        let _ = PostSummary::new(sink.clone()).run(ctx).await.unwrap();
        assert_eq!(sink.inline.lock().unwrap().len(), 1);
        assert_eq!(*sink.summaries.lock().unwrap(), vec!["summary".to_string()]);
    }

    #[tokio::test]
    async fn test_post_stages_target_gitlab_merge_request() {
        let sink = Arc::new(RecordingSink::default());
        let mut ctx = context_with(&[]);
        postable(&mut ctx);
        ctx.config.platform = Platform::Gitlab;
        ctx.config.gitlab.project = Some("group/app".to_string());
        ctx.config.gitlab.mr_iid = Some(9);
        ctx.config.gitlab.token = Some("gl-token".to_string());

        let ctx = PostInline::new(sink.clone()).run(ctx).await.unwrap();
        PostSummary::new(sink.clone()).run(ctx).await.unwrap();
        assert_eq!(sink.inline.lock().unwrap().len(), 1);
        let targets = sink.targets.lock().unwrap();
        assert_eq!(targets.len(), 2);
        assert!(targets.iter().all(|t| t.platform == Platform::Gitlab
            && t.repo == "group/app"
            && t.number == 9
            && t.token == "gl-token"));
    }

    #[tokio::test]
    async fn test_post_stages_skip_when_not_postable() {
        let sink = Arc::new(RecordingSink::default());

        let mut dry = context_with(&[]);
        postable(&mut dry);
        dry.config.dry_run = true;

        let mut no_token = context_with(&[]);
        postable(&mut no_token);
        no_token.config.github.token = None;

        let mut gitlab_unset = context_with(&[]);
        postable(&mut gitlab_unset);
        gitlab_unset.config.platform = Platform::Gitlab;

        let mut inline_off = context_with(&[]);
        postable(&mut inline_off);
        inline_off.config.post_inline = false;
        let inline_off = PostInline::new(sink.clone()).run(inline_off).await.unwrap();
        assert!(sink.inline.lock().unwrap().is_empty());
        assert!(PostSummary::new(sink.clone()).run(inline_off).await.is_ok());
        assert_eq!(sink.summaries.lock().unwrap().len(), 1);

        for ctx in [dry, no_token, gitlab_unset] {
            let ctx = PostInline::new(sink.clone()).run(ctx).await.unwrap();
            PostSummary::new(sink.clone()).run(ctx).await.unwrap();
        }
        assert!(sink.inline.lock().unwrap().is_empty());
        assert_eq!(sink.summaries.lock().unwrap().len(), 1);
    }
}
