mod config;
mod diff;
mod llm;
mod pipeline;
mod report;
mod review;
mod sink;
mod source;

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, info_span, Instrument};
use tracing_subscriber::EnvFilter;

use config::{ChangeScope, Config, Platform, RunConfig};
use llm::demo::DemoGenerator;
use llm::{HttpGenerator, TextGenerator};
use pipeline::{CiEnv, Services};
use review::ReviewContext;
use sink::PlatformSink;
use source::{DiffSource, FixtureSource, GitSource};

/// Patch reviewed by `--mock` runs.
const SAMPLE_PATCH: &str = include_str!("../tests/fixtures/sample_diff.patch");

/// PR Reviewer: runs review producers over your changes and anchors their
/// comments to the lines the diff adds.
#[derive(Parser, Debug)]
#[command(name = "pr-reviewer", version, about)]
struct Cli {
    /// Review unstaged working tree changes instead of staged ones
    #[arg(long, conflicts_with = "all")]
    unstaged: bool,

    /// Review staged and unstaged changes against HEAD
    #[arg(long)]
    all: bool,

    /// Detect the pull request from the CI environment
    ///
    /// Also enabled when GITHUB_ACTIONS or GITLAB_CI is "true".
    #[arg(long)]
    ci: bool,

    /// Never post anything to the hosting platform
    #[arg(long)]
    dry_run: bool,

    /// Post comments inline on the pull request
    #[arg(long)]
    inline: bool,

    /// Show old and new lines side by side
    #[arg(long)]
    side_by_side: bool,

    /// Show every diff line instead of collapsing uncommented runs
    #[arg(long)]
    no_ellipsis: bool,

    /// Lines shown around each commented line
    #[arg(long, value_name = "LINES")]
    context: Option<usize>,

    /// Ref the changes are compared against
    #[arg(long, value_name = "REF")]
    base: Option<String>,

    /// Run the review producers concurrently
    #[arg(long)]
    parallel: bool,

    /// Config file (default: .pr-reviewer.toml when present)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Pull request to post to (e.g., https://github.com/org/repo/pull/42)
    #[arg(long)]
    pr_url: Option<String>,

    /// Optional output file path for markdown report
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Review a built-in sample patch with canned comments (no git, no API keys)
    #[arg(long)]
    r#mock: bool,
}

impl Cli {
    fn run_config(
        &self,
        config: Config,
        ci_env: &CiEnv,
    ) -> Result<RunConfig, Box<dyn std::error::Error>> {
        let mut run = RunConfig::from_config(config);
        run.scope = if self.unstaged {
            ChangeScope::Unstaged
        } else if self.all {
            ChangeScope::All
        } else {
            ChangeScope::Staged
        };
        run.ci_mode = self.ci || ci_env.is_ci();
        run.dry_run = self.dry_run || self.r#mock;
        run.post_inline = self.inline;
        run.parallel_producers = self.parallel;
        run.mock = self.r#mock;
        if self.side_by_side {
            run.render.side_by_side = true;
        }
        if self.no_ellipsis {
            run.render.ellipsis = false;
        }
        if let Some(lines) = self.context {
            run.render.context_window = lines;
        }
        if let Some(base) = &self.base {
            run.base_ref = base.clone();
        }
        if let Some(url) = &self.pr_url {
            let pr = sink::parse_pr_url(url)?;
            debug!(owner = %pr.owner, repo = %pr.repo, pr = pr.pr_number, "parsed PR URL");
            run.platform = Platform::Github;
            run.github.repo = Some(pr.slug());
            run.github.pr_number = Some(pr.pr_number);
        }
        Ok(run)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let ci_env = CiEnv::capture();

    info!("loading configuration");
    let config = Config::load(cli.config.as_deref())?;
    let run = cli.run_config(config, &ci_env)?;

    let services = if run.mock {
        info!("using the built-in sample patch for demo");
        let fixture = FixtureSource::from_patch(SAMPLE_PATCH)?;
        let generator = DemoGenerator::new(fixture.anchors().into_iter().collect());
        build_services(Arc::new(fixture), Arc::new(generator), &run, ci_env)
    } else {
        let generator = HttpGenerator::from_config(&run.llm)?;
        build_services(Arc::new(GitSource::new(".")), Arc::new(generator), &run, ci_env)
    };

    let pipeline = pipeline::review_pipeline(&run, services)?;
    let span = info_span!("pr_review", scope = ?run.scope, ci = run.ci_mode, dry_run = run.dry_run);
    let ctx = pipeline.execute(ReviewContext::new(run)).instrument(span).await?;
    info!(
        comments = ctx.inline_comments.len(),
        dropped = ctx.dropped.len(),
        "review complete"
    );

    info!("generating report");
    report::output(&ctx, cli.output.as_deref())?;
    info!("done");

    Ok(())
}

fn build_services(
    source: Arc<dyn DiffSource>,
    generator: Arc<dyn TextGenerator>,
    run: &RunConfig,
    ci_env: CiEnv,
) -> Services {
    Services {
        source,
        generator,
        sink: Arc::new(PlatformSink::new(run)),
        ci_env,
    }
}
