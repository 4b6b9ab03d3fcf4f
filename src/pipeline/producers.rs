use async_trait::async_trait;
use futures::future::try_join_all;
use std::sync::Arc;
use tracing::{debug, info, info_span, Instrument};

use super::{Stage, StageError, PRODUCERS};
use crate::diff::Replay;
use crate::llm::{GenerationError, Prompt, TextGenerator};
use crate::review::grammar::parse_comments;
use crate::review::{FileContext, ProducerResult, ReviewContext};

/// Characters of file content sent to the summary when a file has no diff.
const SUMMARY_CONTENT_LIMIT: usize = 2000;

const REPLY_FORMAT: &str = "Reply with one line per finding in the form `<line>: <message>`, \
where <line> is one of the added line numbers listed. Keep each message to one sentence. \
Reply with nothing when there is nothing worth saying.";

/// Something that reads the context and emits one [`ProducerResult`].
///
/// Producers only borrow the context, so several can run at once.
#[async_trait]
pub trait Producer: Send + Sync {
    fn name(&self) -> &str;

    async fn produce(&self, ctx: &ReviewContext) -> Result<ProducerResult, GenerationError>;

    /// Put `result` into the context.
    fn store(&self, ctx: &mut ReviewContext, result: ProducerResult) {
        ctx.record(result);
    }
}

/// Reviews each changed file with one focus and parses the reply into comments.
pub struct PromptedProducer {
    name: &'static str,
    focus: &'static str,
    generator: Arc<dyn TextGenerator>,
}

impl PromptedProducer {
    pub fn new(name: &'static str, generator: Arc<dyn TextGenerator>) -> Self {
        let focus = match name {
            "context" => {
                "You are a senior software architect reviewing a change for how it fits the code \
                 around it: cohesion, coupling, and behaviour that callers may depend on."
            }
            "bug" => {
                "You are a senior software engineer reviewing code for potential bugs, edge cases \
                 and risky assumptions. Focus on things that might break in production."
            }
            "design" => {
                "You are reviewing code for design concerns: functions doing too much, leaky \
                 abstractions, and patterns that will be hard to maintain."
            }
            "style" => {
                "You are an expert code reviewer focused on naming, layout, readability and \
                 duplication."
            }
            _ => "You are a careful code reviewer.",
        };
        Self {
            name,
            focus,
            generator,
        }
    }

    /// One producer per entry of [`PRODUCERS`], in that order.
    pub fn declared(generator: &Arc<dyn TextGenerator>) -> Vec<Arc<dyn Producer>> {
        PRODUCERS
            .iter()
            .map(|&name| Arc::new(Self::new(name, generator.clone())) as Arc<dyn Producer>)
            .collect()
    }

    fn prompt(&self, file: &FileContext) -> Prompt {
        let anchors: Vec<String> = file.index.anchors.iter().map(|n| n.to_string()).collect();
        let user = format!(
            "File: {}\nAdded lines: {}\n\nDiff with new-file line numbers:\n```diff\n{}```\n",
            file.path,
            if anchors.is_empty() { "none".to_string() } else { anchors.join(", ") },
            numbered_diff(&file.diff),
        );
        Prompt {
            system: format!("{}\n\n{REPLY_FORMAT}", self.focus),
            user,
            producer: self.name.to_string(),
            file: Some(file.path.clone()),
        }
    }
}

#[async_trait]
impl Producer for PromptedProducer {
    fn name(&self) -> &str {
        self.name
    }

    async fn produce(&self, ctx: &ReviewContext) -> Result<ProducerResult, GenerationError> {
        let mut comments = Vec::new();
        for file in ctx.files() {
            if file.after.as_deref().map_or(true, str::is_empty) {
                debug!(file = %file.path, "no content to review");
                continue;
            }
            let reply = self.generator.generate(&self.prompt(file)).await?;
            let parsed = parse_comments(&reply, &file.path, self.name);
            debug!(file = %file.path, comments = parsed.len(), "parsed reply");
            comments.extend(parsed);
        }
        Ok(ProducerResult {
            producer: self.name.to_string(),
            comments,
            reasoning: None,
        })
    }
}

/// Each diff line prefixed with its new-file line number, blank for lines
/// that are not in the new file.
pub fn numbered_diff(diff: &str) -> String {
    let mut out = String::new();
    for line in Replay::new(diff) {
        match line.new {
            Some(n) => out.push_str(&format!("{n:>5} | {}\n", line.raw)),
            None => out.push_str(&format!("      | {}\n", line.raw)),
        }
    }
    out
}

/// Writes a prose overview of the whole change.
pub struct SummaryProducer {
    generator: Arc<dyn TextGenerator>,
}

impl SummaryProducer {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    fn prompt(ctx: &ReviewContext) -> Prompt {
        let mut input = String::new();
        for file in ctx.files() {
            input.push_str(&format!("\n--- {} ---\n", file.path));
            if file.has_diff() {
                input.push_str(&file.diff);
            } else if let Some(after) = &file.after {
                input.extend(after.chars().take(SUMMARY_CONTENT_LIMIT));
            }
        }
        Prompt {
            system: "You are a senior reviewer summarizing a code change across multiple files. \
                     Give a clear, concise overview of what changed, why it matters, and anything \
                     worth highlighting in the pull request."
                .to_string(),
            user: format!(
                "Here are the diffs for this change:\n\n```\n{}\n```\n\nSummarize the key changes in plain language.",
                input.trim()
            ),
            producer: "summary".to_string(),
            file: None,
        }
    }
}

#[async_trait]
impl Producer for SummaryProducer {
    fn name(&self) -> &str {
        "summary"
    }

    async fn produce(&self, ctx: &ReviewContext) -> Result<ProducerResult, GenerationError> {
        let mut result = ProducerResult {
            producer: "summary".to_string(),
            ..Default::default()
        };
        if ctx.files().next().is_none() {
            debug!("no files to summarize");
            return Ok(result);
        }
        let reply = self.generator.generate(&Self::prompt(ctx)).await?;
        let reply = reply.trim();
        if !reply.is_empty() {
            result.reasoning = Some(reply.to_string());
        }
        Ok(result)
    }

    fn store(&self, ctx: &mut ReviewContext, result: ProducerResult) {
        ctx.summary = result.reasoning.clone();
        ctx.record(result);
    }
}

/// Runs one producer as its own stage.
pub struct ProducerStage {
    producer: Arc<dyn Producer>,
}

impl ProducerStage {
    pub fn new(producer: Arc<dyn Producer>) -> Self {
        Self { producer }
    }
}

#[async_trait]
impl Stage for ProducerStage {
    fn name(&self) -> &str {
        self.producer.name()
    }

    async fn run(&self, mut ctx: ReviewContext) -> Result<ReviewContext, StageError> {
        let result = self.producer.produce(&ctx).await?;
        info!(comments = result.comments.len(), "producer finished");
        self.producer.store(&mut ctx, result);
        Ok(ctx)
    }
}

/// Runs several producers concurrently as one stage. Results are stored
/// after all of them finish; the first error fails the stage.
pub struct FanOut {
    producers: Vec<Arc<dyn Producer>>,
}

impl FanOut {
    pub fn new(producers: Vec<Arc<dyn Producer>>) -> Self {
        Self { producers }
    }
}

#[async_trait]
impl Stage for FanOut {
    fn name(&self) -> &str {
        "producers"
    }

    async fn run(&self, mut ctx: ReviewContext) -> Result<ReviewContext, StageError> {
        let results = try_join_all(self.producers.iter().map(|producer| {
            producer
                .produce(&ctx)
                .instrument(info_span!("producer", producer = %producer.name()))
        }))
        .await?;

        for (producer, result) in self.producers.iter().zip(results) {
            debug!(
                producer = %producer.name(),
                comments = result.comments.len(),
                "producer finished"
            );
            producer.store(&mut ctx, result);
        }
        info!(producers = self.producers.len(), "fan-out finished");
        Ok(ctx)
    }
}
