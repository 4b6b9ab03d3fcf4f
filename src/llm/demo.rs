use async_trait::async_trait;
use std::collections::HashMap;

use super::{GenerationError, Prompt, TextGenerator};

/// Offline generator for `--mock` runs.
///
/// Answers each file prompt with one comment on an added line (picked per
/// producer so producers land on different lines), a line of prose the grammar
/// skips, and for `bug` one comment outside the diff that the anchor filter
/// must drop.
pub struct DemoGenerator {
    anchors: HashMap<String, Vec<usize>>,
}

impl DemoGenerator {
    /// `anchors` maps each file to its added line numbers.
    pub fn new(anchors: HashMap<String, Vec<usize>>) -> Self {
        Self { anchors }
    }

    fn note(producer: &str) -> (usize, &'static str) {
        match producer {
            "context" => (0, "this changes behaviour callers may rely on"),
            "bug" => (1, "error from this call is silently ignored"),
            "design" => (2, "consider moving this into its own function"),
            "style" => (3, "name does not say what the value holds"),
            _ => (0, "worth a second look"),
        }
    }
}

#[async_trait]
impl TextGenerator for DemoGenerator {
    async fn generate(&self, prompt: &Prompt) -> Result<String, GenerationError> {
        let Some(file) = &prompt.file else {
            return Ok(format!(
                "Demo summary: {} files changed. The change adds a login flow and \
                 tightens error handling; comments highlight spots worth a closer look.",
                self.anchors.len()
            ));
        };

        let anchors = self.anchors.get(file).map(Vec::as_slice).unwrap_or_default();
        let Some(last) = anchors.last() else {
            return Ok("No issues found.".to_string());
        };

        let (slot, message) = Self::note(&prompt.producer);
        let line = anchors[slot % anchors.len()];
        let mut response = format!("Review of {file}\n{line}: {message}\n");
        if prompt.producer == "bug" {
            response.push_str(&format!("{}: outside the changed range\n", last + 50));
        }
        Ok(response)
    }
}

/// Generator answering from a closure; used by tests.
#[cfg(test)]
pub struct ScriptedGenerator<F>(pub F);

#[cfg(test)]
#[async_trait]
impl<F> TextGenerator for ScriptedGenerator<F>
where
    F: Fn(&Prompt) -> Result<String, GenerationError> + Send + Sync,
{
    async fn generate(&self, prompt: &Prompt) -> Result<String, GenerationError> {
        (self.0)(prompt)
    }
}
