use std::sync::Arc;

use regex::{Regex, RegexBuilder};
use serde_json::Value;
use tracing::debug;

use crate::llm::{first_json_array, LlmClient, LlmConfig};

/// A substring of user input presumed to encode one atomic intent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chunk {
    pub text: String,
    /// Taxonomy label assigned by the splitter, when one matched.
    pub taxonomy: Option<String>,
}

impl Chunk {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into(), taxonomy: None }
    }

    pub fn tagged(text: impl Into<String>, taxonomy: impl Into<String>) -> Self {
        Self { text: text.into(), taxonomy: Some(taxonomy.into()) }
    }
}

/// Decomposes multi-intent input into ordered chunks.
pub trait SplitStrategy: Send + Sync {
    fn name(&self) -> &str;
    fn split(&self, input: &str, debug: bool) -> Vec<Chunk>;
}

/// Splits on conjunction words and punctuation, case-insensitively. Fewer
/// than two non-empty parts means the whole input is one chunk.
#[derive(Clone, Debug)]
pub struct RuleSplit {
    taxonomies: Vec<String>,
    separator: Regex,
}

impl Default for RuleSplit {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl RuleSplit {
    pub fn new(taxonomies: Vec<String>) -> Self {
        let separator = RegexBuilder::new(r"\s*(?:[,;]|\b(?:and|also|plus|as\s+well\s+as)\b)\s*")
            .case_insensitive(true)
            .build()
            .unwrap_or_else(|_| unreachable!("separator pattern is fixed and valid"));
        Self { taxonomies, separator }
    }

    /// First declared taxonomy appearing in the text, case-insensitively.
    pub fn tag(&self, text: &str) -> Option<String> {
        let lowered = text.to_lowercase();
        self.taxonomies
            .iter()
            .find(|taxonomy| lowered.contains(&taxonomy.to_lowercase()))
            .cloned()
    }

    fn chunk(&self, text: &str) -> Chunk {
        Chunk { text: text.to_owned(), taxonomy: self.tag(text) }
    }
}

impl SplitStrategy for RuleSplit {
    fn name(&self) -> &str {
        "rule"
    }

    fn split(&self, input: &str, _debug: bool) -> Vec<Chunk> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Vec::new();
        }
        let parts = self
            .separator
            .split(trimmed)
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>();
        if parts.len() < 2 {
            return vec![self.chunk(trimmed)];
        }
        parts.into_iter().map(|part| self.chunk(part)).collect()
    }
}

/// Prompts the model for a JSON array of independent intent strings, with
/// manual list heuristics and finally the rule splitter as fallbacks.
pub struct LlmSplit {
    client: Option<Arc<dyn LlmClient>>,
    llm: Option<LlmConfig>,
    fallback: RuleSplit,
}

impl LlmSplit {
    pub fn new(client: Arc<dyn LlmClient>, fallback: RuleSplit) -> Self {
        Self { client: Some(client), llm: None, fallback }
    }

    /// Without a client every call delegates to the rule splitter.
    pub fn without_client(fallback: RuleSplit) -> Self {
        Self { client: None, llm: None, fallback }
    }

    pub fn with_config(mut self, config: LlmConfig) -> Self {
        self.llm = Some(config);
        self
    }

    fn build_prompt(&self, input: &str) -> String {
        format!(
            "Split the user message into independent requests.\n\
             Answer with only a JSON array of strings, one per request.\n\n\
             User message: {input}"
        )
    }

    fn parse_array(&self, output: &str) -> Vec<Chunk> {
        let Some(Value::Array(items)) = first_json_array(output) else {
            return Vec::new();
        };
        items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(text) if !text.trim().is_empty() => {
                    Some(self.fallback.chunk(text.trim()))
                }
                _ => None,
            })
            .collect()
    }

    /// Manual heuristics for models that answered with prose instead of JSON:
    /// quoted strings, then numbered lists, then dash lists.
    fn parse_manual(&self, output: &str) -> Vec<Chunk> {
        let extractors = [r#""([^"]+)""#, r"(?m)^\s*\d+[.)]\s+(.+)$", r"(?m)^\s*-\s+(.+)$"];
        for pattern in extractors {
            let Ok(compiled) = Regex::new(pattern) else { continue };
            let found = compiled
                .captures_iter(output)
                .filter_map(|captures| captures.get(1))
                .map(|capture| capture.as_str().trim())
                .filter(|text| !text.is_empty())
                .map(|text| self.fallback.chunk(text))
                .collect::<Vec<_>>();
            if !found.is_empty() {
                return found;
            }
        }
        Vec::new()
    }
}

impl SplitStrategy for LlmSplit {
    fn name(&self) -> &str {
        "llm"
    }

    fn split(&self, input: &str, debug: bool) -> Vec<Chunk> {
        let Some(client) = &self.client else {
            return self.fallback.split(input, debug);
        };
        let model = self.llm.as_ref().map(|config| config.model.as_str());
        let output = match client.generate(&self.build_prompt(input), model) {
            Ok(response) => response.output,
            Err(error) => {
                debug!(
                    event_name = "split.llm_failed",
                    %error,
                    "splitter provider call failed, using rule splitter"
                );
                return self.fallback.split(input, debug);
            }
        };
        if output.trim().is_empty() {
            return self.fallback.split(input, debug);
        }

        let chunks = self.parse_array(&output);
        if !chunks.is_empty() {
            return chunks;
        }
        let chunks = self.parse_manual(&output);
        if !chunks.is_empty() {
            debug!(
                event_name = "split.manual_parse",
                count = chunks.len(),
                "recovered chunks from non-JSON splitter response"
            );
            return chunks;
        }
        self.fallback.split(input, debug)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{Chunk, LlmSplit, RuleSplit, SplitStrategy};
    use crate::llm::{LlmError, ScriptedLlm};

    fn taxonomies() -> Vec<String> {
        vec!["travel".to_owned(), "account".to_owned(), "support".to_owned()]
    }

    #[test]
    fn rule_split_tags_chunks_with_first_taxonomy() {
        let splitter = RuleSplit::new(taxonomies());
        let chunks = splitter.split("travel help, account support", false);

        assert_eq!(
            chunks,
            vec![
                Chunk::tagged("travel help", "travel"),
                Chunk::tagged("account support", "account"),
            ]
        );
    }

    #[test]
    fn rule_split_handles_conjunction_words() {
        let splitter = RuleSplit::default();
        let chunks = splitter.split("book a flight AND check my balance plus get help", false);
        let texts = chunks.iter().map(|chunk| chunk.text.as_str()).collect::<Vec<_>>();
        assert_eq!(texts, vec!["book a flight", "check my balance", "get help"]);
    }

    #[test]
    fn rule_split_single_part_is_whole_input() {
        let splitter = RuleSplit::default();
        let chunks = splitter.split("  just one thing  ", false);
        assert_eq!(chunks, vec![Chunk::new("just one thing")]);
    }

    #[test]
    fn rule_split_empty_input_yields_no_chunks() {
        let splitter = RuleSplit::default();
        assert!(splitter.split("   ", false).is_empty());
    }

    #[test]
    fn conjunction_inside_a_word_does_not_split() {
        let splitter = RuleSplit::default();
        let chunks = splitter.split("expand the brand", false);
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn llm_split_reads_json_array() {
        let client = Arc::new(ScriptedLlm::with_outputs([
            r#"["book a flight", "cancel the hotel"]"#,
        ]));
        let splitter = LlmSplit::new(client, RuleSplit::default());
        let chunks = splitter.split("book a flight and cancel the hotel", false);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, "book a flight");
    }

    #[test]
    fn llm_split_recovers_from_numbered_list() {
        let client = Arc::new(ScriptedLlm::with_outputs([
            "Sure:\n1. book a flight\n2. cancel the hotel",
        ]));
        let splitter = LlmSplit::new(client, RuleSplit::default());
        let chunks = splitter.split("whatever", false);
        let texts = chunks.iter().map(|chunk| chunk.text.as_str()).collect::<Vec<_>>();
        assert_eq!(texts, vec!["book a flight", "cancel the hotel"]);
    }

    #[test]
    fn llm_split_falls_back_to_rules_on_provider_error() {
        let client = Arc::new(ScriptedLlm::new());
        client.push_error(LlmError::Provider("down".to_owned()));
        let splitter = LlmSplit::new(client, RuleSplit::default());
        let chunks = splitter.split("alpha, beta", false);
        assert_eq!(chunks.len(), 2);
    }

    #[test]
    fn llm_split_without_client_uses_rules() {
        let splitter = LlmSplit::without_client(RuleSplit::default());
        let chunks = splitter.split("alpha; beta", false);
        assert_eq!(chunks.len(), 2);
    }
}
