use std::sync::Arc;

use regex::RegexBuilder;
use serde_json::json;
use tracing::debug;

use crate::context::ExecutionContext;
use crate::llm::{LlmClient, LlmConfig};
use crate::node::ChildView;
use crate::result::{error_kind, ParamMap};

/// Everything a classification function may consult for one routing decision.
pub struct ClassifyRequest<'a> {
    pub input: &'a str,
    pub children: &'a [ChildView<'a>],
    pub context: &'a ExecutionContext,
    /// Effective LLM settings: the node's own, or the graph default.
    pub llm: Option<&'a LlmConfig>,
}

/// Routing failure detail. The executor attaches node identity when turning
/// this into an `ExecutionError`.
#[derive(Clone, Debug, PartialEq)]
pub struct RoutingFailure {
    pub error_type: String,
    pub message: String,
    pub params: ParamMap,
}

impl RoutingFailure {
    pub fn new(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self { error_type: error_type.into(), message: message.into(), params: ParamMap::new() }
    }

    pub fn with_params(mut self, params: ParamMap) -> Self {
        self.params = params;
        self
    }
}

/// Outcome of one classification call.
#[derive(Clone, Debug, PartialEq)]
pub enum Routing {
    /// Index into the request's children.
    Child(usize),
    /// No child claimed the input.
    NoMatch,
    /// The function itself failed (provider error, unresolvable response).
    Failed(RoutingFailure),
}

/// Selects exactly one child given input, children, and context.
pub trait ClassifyStrategy: Send + Sync {
    fn name(&self) -> &str;
    fn classify(&self, request: &ClassifyRequest<'_>) -> Routing;
}

/// First child whose name appears in the input, case-insensitively.
#[derive(Clone, Debug, Default)]
pub struct KeywordClassify;

impl KeywordClassify {
    pub fn new() -> Self {
        Self
    }
}

impl ClassifyStrategy for KeywordClassify {
    fn name(&self) -> &str {
        "keyword"
    }

    fn classify(&self, request: &ClassifyRequest<'_>) -> Routing {
        let input = request.input.to_lowercase();
        for (index, child) in request.children.iter().enumerate() {
            if input.contains(&child.name.to_lowercase()) {
                return Routing::Child(index);
            }
        }
        Routing::NoMatch
    }
}

/// First child with a case-insensitive pattern match. Children without
/// declared patterns fall back to their own name as a literal pattern;
/// invalid patterns are skipped rather than fatal.
#[derive(Clone, Debug, Default)]
pub struct RegexClassify;

impl RegexClassify {
    pub fn new() -> Self {
        Self
    }
}

impl ClassifyStrategy for RegexClassify {
    fn name(&self) -> &str {
        "regex"
    }

    fn classify(&self, request: &ClassifyRequest<'_>) -> Routing {
        for (index, child) in request.children.iter().enumerate() {
            let fallback = [regex::escape(child.name)];
            let patterns: &[String] =
                if child.patterns.is_empty() { &fallback } else { child.patterns };
            for pattern in patterns {
                let compiled = match RegexBuilder::new(pattern).case_insensitive(true).build() {
                    Ok(compiled) => compiled,
                    Err(error) => {
                        debug!(
                            event_name = "route.pattern_skipped",
                            child = child.name,
                            pattern = pattern.as_str(),
                            %error,
                            "skipping invalid routing pattern"
                        );
                        continue;
                    }
                };
                if compiled.is_match(request.input) {
                    return Routing::Child(index);
                }
            }
        }
        Routing::NoMatch
    }
}

/// Prompts an injected client with the child descriptions and resolves the
/// response to a child by exact name match, then substring match.
pub struct LlmClassify {
    client: Arc<dyn LlmClient>,
}

impl LlmClassify {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self { client }
    }

    fn build_prompt(&self, request: &ClassifyRequest<'_>) -> String {
        let mut prompt = String::from(
            "Select the single best handler for the user input.\n\nHandlers:\n",
        );
        for child in request.children {
            prompt.push_str(&format!("- {}: {}\n", child.name, child.description));
        }
        let snapshot = request.context.snapshot();
        if !snapshot.is_empty() {
            prompt.push_str(&format!(
                "\nConversation context: {}\n",
                serde_json::Value::Object(snapshot.into_iter().collect())
            ));
        }
        prompt.push_str(&format!(
            "\nUser input: {}\n\nAnswer with exactly one handler name.",
            request.input
        ));
        prompt
    }
}

impl ClassifyStrategy for LlmClassify {
    fn name(&self) -> &str {
        "llm"
    }

    fn classify(&self, request: &ClassifyRequest<'_>) -> Routing {
        if request.children.is_empty() {
            return Routing::NoMatch;
        }
        let prompt = self.build_prompt(request);
        let model = request.llm.map(|config| config.model.as_str());

        let response = match self.client.generate(&prompt, model) {
            Ok(response) => response,
            Err(error) => {
                return Routing::Failed(RoutingFailure::new(
                    error_kind::LLM_CLIENT,
                    error.to_string(),
                ));
            }
        };
        let telemetry = telemetry_params(&response);

        let answer = response.output.trim().to_lowercase();
        let exact = request
            .children
            .iter()
            .position(|child| child.name.to_lowercase() == answer);
        let resolved = exact.or_else(|| {
            request
                .children
                .iter()
                .position(|child| answer.contains(&child.name.to_lowercase()))
        });

        match resolved {
            Some(index) => Routing::Child(index),
            None => Routing::Failed(
                RoutingFailure::new(
                    error_kind::CLASSIFIER_ROUTING,
                    format!("response {:?} did not resolve to a child", response.output.trim()),
                )
                .with_params(telemetry),
            ),
        }
    }
}

fn telemetry_params(response: &crate::llm::LlmResponse) -> ParamMap {
    let mut params = ParamMap::new();
    params.insert("llm.input_tokens".to_owned(), json!(response.input_tokens));
    params.insert("llm.output_tokens".to_owned(), json!(response.output_tokens));
    params.insert("llm.cost_usd".to_owned(), json!(response.cost_usd));
    params.insert("llm.provider".to_owned(), json!(response.provider));
    params.insert("llm.model".to_owned(), json!(response.model));
    params.insert("llm.duration_ms".to_owned(), json!(response.duration_ms));
    params
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{
        ClassifyRequest, ClassifyStrategy, KeywordClassify, LlmClassify, RegexClassify, Routing,
    };
    use crate::context::ExecutionContext;
    use crate::llm::{LlmError, ScriptedLlm};
    use crate::node::ChildView;
    use crate::result::{error_kind, NodeKind};

    fn child<'a>(name: &'a str, patterns: &'a [String]) -> ChildView<'a> {
        ChildView { name, description: name, keywords: &[], patterns, kind: NodeKind::Action }
    }

    fn request<'a>(
        input: &'a str,
        children: &'a [ChildView<'a>],
        context: &'a ExecutionContext,
    ) -> ClassifyRequest<'a> {
        ClassifyRequest { input, children, context, llm: None }
    }

    #[test]
    fn keyword_matches_first_child_named_in_input() {
        let context = ExecutionContext::new();
        let children = [child("greet", &[]), child("calculate", &[])];
        let strategy = KeywordClassify::new();

        assert_eq!(
            strategy.classify(&request("please CALCULATE 2+2", &children, &context)),
            Routing::Child(1)
        );
        assert_eq!(
            strategy.classify(&request("unrelated", &children, &context)),
            Routing::NoMatch
        );
    }

    #[test]
    fn regex_uses_declared_patterns_then_name_literal() {
        let context = ExecutionContext::new();
        let refund_patterns = vec![r"\bmoney\s+back\b".to_owned()];
        let children = [child("refund", &refund_patterns), child("status", &[])];
        let strategy = RegexClassify::new();

        assert_eq!(
            strategy.classify(&request("I want my Money Back", &children, &context)),
            Routing::Child(0)
        );
        assert_eq!(
            strategy.classify(&request("what is my order STATUS", &children, &context)),
            Routing::Child(1)
        );
    }

    #[test]
    fn regex_skips_invalid_patterns() {
        let context = ExecutionContext::new();
        let broken = vec!["[unclosed".to_owned(), "valid".to_owned()];
        let children = [child("node", &broken)];
        let strategy = RegexClassify::new();

        assert_eq!(
            strategy.classify(&request("a valid sentence", &children, &context)),
            Routing::Child(0)
        );
    }

    #[test]
    fn llm_resolves_exact_then_substring() {
        let context = ExecutionContext::new();
        let children = [child("greet", &[]), child("calculate", &[])];
        let client = Arc::new(ScriptedLlm::with_outputs([
            "calculate",
            "I would pick the greet handler here.",
        ]));
        let strategy = LlmClassify::new(client);

        assert_eq!(strategy.classify(&request("2+2", &children, &context)), Routing::Child(1));
        assert_eq!(strategy.classify(&request("hi", &children, &context)), Routing::Child(0));
    }

    #[test]
    fn llm_unresolved_response_fails_with_telemetry() {
        let context = ExecutionContext::new();
        let children = [child("greet", &[])];
        let client = Arc::new(ScriptedLlm::with_outputs(["no idea"]));
        let strategy = LlmClassify::new(client);

        match strategy.classify(&request("hm", &children, &context)) {
            Routing::Failed(failure) => {
                assert_eq!(failure.error_type, error_kind::CLASSIFIER_ROUTING);
                assert!(failure.params.contains_key("llm.cost_usd"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn llm_provider_error_fails_with_client_kind() {
        let context = ExecutionContext::new();
        let children = [child("greet", &[])];
        let client = Arc::new(ScriptedLlm::new());
        client.push_error(LlmError::Provider("boom".to_owned()));
        let strategy = LlmClassify::new(client);

        match strategy.classify(&request("hm", &children, &context)) {
            Routing::Failed(failure) => assert_eq!(failure.error_type, error_kind::LLM_CLIENT),
            other => panic!("expected failure, got {other:?}"),
        }
    }
}
