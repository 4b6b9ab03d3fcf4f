pub mod producers;
pub mod stages;

pub use stages::CiEnv;

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, info_span, Instrument};

use crate::config::{ConfigError, RunConfig};
use crate::llm::{GenerationError, TextGenerator};
use crate::review::{ContextError, ReviewContext};
use crate::sink::CommentSink;
use crate::source::{DiffSource, SourceError};
use producers::{FanOut, ProducerStage, PromptedProducer, SummaryProducer};

/// Prompted producers, in the order their comments are merged.
pub const PRODUCERS: [&str; 4] = ["context", "bug", "design", "style"];

#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error(transparent)]
    Source(#[from] SourceError),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Stage {0} is registered twice")]
    DuplicateStage(String),

    #[error("Stage {stage} runs after unknown stage {dependency}")]
    UnknownDependency { stage: String, dependency: String },

    #[error("Stages form a cycle: {}", .0.join(", "))]
    Cycle(Vec<String>),

    #[error("Stage {stage} failed: {source}")]
    Stage {
        stage: String,
        #[source]
        source: StageError,
    },

    #[error("Stage {stage} left an invalid context: {source}")]
    InvalidContext {
        stage: String,
        #[source]
        source: ContextError,
    },
}

/// One step of a review run. Takes the context by value and hands back the
/// context the next stage sees.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, ctx: ReviewContext) -> Result<ReviewContext, StageError>;
}

struct Node {
    stage: Box<dyn Stage>,
    after: Vec<String>,
}

/// Collects stages and their predecessor edges.
#[derive(Default)]
pub struct PipelineBuilder {
    nodes: Vec<Node>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `stage` to run after every stage named in `after`.
    pub fn stage(mut self, stage: impl Stage + 'static, after: &[&str]) -> Self {
        self.nodes.push(Node {
            stage: Box::new(stage),
            after: after.iter().map(|s| s.to_string()).collect(),
        });
        self
    }

    /// Fix the execution order: a topological sort of the registered edges,
    /// ties broken by registration order.
    pub fn build(self) -> Result<Pipeline, PipelineError> {
        let mut position: HashMap<&str, usize> = HashMap::new();
        for (i, node) in self.nodes.iter().enumerate() {
            if position.insert(node.stage.name(), i).is_some() {
                return Err(PipelineError::DuplicateStage(node.stage.name().to_string()));
            }
        }

        let mut pending = vec![0usize; self.nodes.len()];
        let mut successors: Vec<Vec<usize>> = vec![Vec::new(); self.nodes.len()];
        for (i, node) in self.nodes.iter().enumerate() {
            for dependency in &node.after {
                let &d = position.get(dependency.as_str()).ok_or_else(|| {
                    PipelineError::UnknownDependency {
                        stage: node.stage.name().to_string(),
                        dependency: dependency.clone(),
                    }
                })?;
                successors[d].push(i);
                pending[i] += 1;
            }
        }

        let mut ready: BTreeSet<usize> =
            (0..self.nodes.len()).filter(|&i| pending[i] == 0).collect();
        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(i) = ready.pop_first() {
            order.push(i);
            for &next in &successors[i] {
                pending[next] -= 1;
                if pending[next] == 0 {
                    ready.insert(next);
                }
            }
        }

        if order.len() < self.nodes.len() {
            let stuck = (0..self.nodes.len())
                .filter(|i| !order.contains(i))
                .map(|i| self.nodes[i].stage.name().to_string())
                .collect();
            return Err(PipelineError::Cycle(stuck));
        }

        let mut slots: Vec<Option<Box<dyn Stage>>> =
            self.nodes.into_iter().map(|n| Some(n.stage)).collect();
        let stages = order.into_iter().filter_map(|i| slots[i].take()).collect();
        Ok(Pipeline { stages })
    }
}

/// Stages in their fixed execution order.
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline").field("order", &self.order()).finish()
    }
}

impl Pipeline {
    pub fn order(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run every stage in order, validating the context after each one.
    /// The first failure ends the run.
    pub async fn execute(&self, mut ctx: ReviewContext) -> Result<ReviewContext, PipelineError> {
        for stage in &self.stages {
            let name = stage.name();
            let span = info_span!("stage", stage = %name);
            ctx = stage
                .run(ctx)
                .instrument(span)
                .await
                .map_err(|source| PipelineError::Stage {
                    stage: name.to_string(),
                    source,
                })?;
            ctx.validate().map_err(|source| PipelineError::InvalidContext {
                stage: name.to_string(),
                source,
            })?;
            debug!(stage = %name, "stage complete");
        }
        Ok(ctx)
    }
}

/// Collaborators the review stages call out to.
#[derive(Clone)]
pub struct Services {
    pub source: Arc<dyn DiffSource>,
    pub generator: Arc<dyn TextGenerator>,
    pub sink: Arc<dyn CommentSink>,
    pub ci_env: CiEnv,
}

/// The review pipeline for `config`.
///
/// CI detection is included only in CI mode; producers run as a chain, or as
/// one fan-out stage when `parallel_producers` is set.
pub fn review_pipeline(config: &RunConfig, services: Services) -> Result<Pipeline, PipelineError> {
    let mut builder = PipelineBuilder::new().stage(stages::Init, &[]);

    let mut last = "init";
    if config.ci_mode {
        builder = builder.stage(stages::DetectCiContext::new(services.ci_env.clone()), &[last]);
        last = "detect_ci_context";
    }

    builder = builder
        .stage(stages::DetectChanges::new(services.source.clone()), &[last])
        .stage(stages::PrepareContext::new(services.source.clone()), &["detect_changes"]);
    last = "prepare_context";

    let producers = PromptedProducer::declared(&services.generator);
    if config.parallel_producers {
        builder = builder.stage(FanOut::new(producers), &[last]);
        last = "producers";
    } else {
        for (producer, name) in producers.into_iter().zip(PRODUCERS) {
            builder = builder.stage(ProducerStage::new(producer), &[last]);
            last = name;
        }
    }

    let pipeline = builder
        .stage(
            ProducerStage::new(Arc::new(SummaryProducer::new(services.generator.clone()))),
            &[last],
        )
        .stage(stages::MergeResults, &["summary"])
        .stage(stages::FormatOutput, &["merge_results"])
        .stage(stages::PostInline::new(services.sink.clone()), &["format_output"])
        .stage(stages::PostSummary::new(services.sink), &["post_inline"])
        .build()?;

    info!(stages = ?pipeline.order(), "review pipeline built");
    Ok(pipeline)
}
