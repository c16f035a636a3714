use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::llm::{first_json_object, LlmClient, LlmConfig};
use crate::remedy::{ids, FailureScope, RemedyAttempt, RemedyStrategy};
use crate::result::{ExecutionResult, ParamMap};

fn merge_params(original: &ParamMap, modified: Option<&Value>) -> ParamMap {
    let mut merged = original.clone();
    if let Some(Value::Object(fields)) = modified {
        for (name, value) in fields {
            merged.insert(name.clone(), value.clone());
        }
    }
    merged
}

#[derive(Debug, Deserialize)]
struct Reflection {
    #[serde(default)]
    analysis: String,
    #[serde(default)]
    suggestions: Vec<String>,
    #[serde(default)]
    modified_params: Option<Value>,
    #[serde(default)]
    confidence: f64,
}

/// Asks an LLM to analyze the failure and suggest modified parameters, then
/// retries the handler once with the suggestion merged over the originals.
///
/// `max_reflections` is accepted as configuration but a single reflection
/// pass is performed per failure; the field bounds the loop if multi-pass
/// reflection is ever enabled.
pub struct SelfReflect {
    client: Arc<dyn LlmClient>,
    llm: Option<LlmConfig>,
    max_reflections: u32,
}

impl SelfReflect {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self { client, llm: None, max_reflections: 1 }
    }

    pub fn with_config(mut self, config: LlmConfig) -> Self {
        self.llm = Some(config);
        self
    }

    pub fn with_max_reflections(mut self, max_reflections: u32) -> Self {
        self.max_reflections = max_reflections.max(1);
        self
    }

    pub fn max_reflections(&self) -> u32 {
        self.max_reflections
    }

    fn build_prompt(&self, attempt: &RemedyAttempt<'_>, params: &ParamMap) -> String {
        format!(
            "An operation named {:?} failed.\n\
             Error: {} ({})\n\
             Original parameters: {}\n\n\
             Reply with only a JSON object:\n\
             {{\"analysis\": \"...\", \"suggestions\": [\"...\"], \
             \"modified_params\": {{...}}, \"confidence\": 0.0}}",
            attempt.node_name,
            attempt.error.message,
            attempt.error.error_type,
            Value::Object(params.clone().into_iter().collect()),
        )
    }
}

impl RemedyStrategy for SelfReflect {
    fn name(&self) -> &str {
        ids::SELF_REFLECT
    }

    fn description(&self) -> &str {
        "reflect on the failure with an LLM and retry with adjusted parameters"
    }

    fn apply(&self, attempt: &RemedyAttempt<'_>) -> Option<ExecutionResult> {
        let FailureScope::Handler { handler, params, uses_context } = &attempt.scope else {
            return None;
        };
        let context = uses_context.then_some(attempt.context);
        let model = self.llm.as_ref().map(|config| config.model.as_str());

        let prompt = self.build_prompt(attempt, params);
        let reflection = self
            .client
            .generate(&prompt, model)
            .ok()
            .and_then(|response| first_json_object(&response.output))
            .and_then(|parsed| serde_json::from_value::<Reflection>(parsed).ok());

        // Invalid or missing JSON retries with the originals unchanged.
        let (retry_params, reflection) = match reflection {
            Some(reflection) => {
                (merge_params(params, reflection.modified_params.as_ref()), Some(reflection))
            }
            None => ((*params).clone(), None),
        };

        match handler.call(&retry_params, context) {
            Ok(output) => {
                debug!(
                    event_name = "remedy.applied",
                    strategy = self.name(),
                    node = attempt.node_name,
                    reflected = reflection.is_some(),
                    "reflective retry succeeded"
                );
                let mut result =
                    attempt.replacement(self.name(), output).with_params(retry_params);
                if let Some(reflection) = reflection {
                    result = result
                        .with_param("remedy.analysis", json!(reflection.analysis))
                        .with_param("remedy.suggestions", json!(reflection.suggestions))
                        .with_param("remedy.confidence", json!(reflection.confidence));
                }
                Some(result)
            }
            Err(_) => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Vote {
    #[serde(default)]
    approach: String,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    modified_params: Option<Value>,
    #[serde(default)]
    reasoning: String,
}

/// Queries each configured client in sequence for a vote and retries the
/// handler with the highest-confidence valid vote. Ties keep the first-seen
/// vote; fails when no vote is valid JSON or none reaches the threshold.
pub struct ConsensusVote {
    clients: Vec<Arc<dyn LlmClient>>,
    llm: Option<LlmConfig>,
    vote_threshold: f64,
}

impl ConsensusVote {
    pub fn new(clients: Vec<Arc<dyn LlmClient>>) -> Self {
        Self { clients, llm: None, vote_threshold: 0.5 }
    }

    pub fn with_threshold(mut self, vote_threshold: f64) -> Self {
        self.vote_threshold = vote_threshold;
        self
    }

    pub fn with_config(mut self, config: LlmConfig) -> Self {
        self.llm = Some(config);
        self
    }

    fn build_prompt(&self, attempt: &RemedyAttempt<'_>, params: &ParamMap) -> String {
        format!(
            "An operation named {:?} failed with: {} ({}).\n\
             Parameters: {}\n\n\
             Propose a recovery. Reply with only a JSON object:\n\
             {{\"approach\": \"...\", \"confidence\": 0.0, \
             \"modified_params\": {{...}}, \"reasoning\": \"...\"}}",
            attempt.node_name,
            attempt.error.message,
            attempt.error.error_type,
            Value::Object(params.clone().into_iter().collect()),
        )
    }
}

impl RemedyStrategy for ConsensusVote {
    fn name(&self) -> &str {
        ids::CONSENSUS_VOTE
    }

    fn description(&self) -> &str {
        "poll several providers and retry with the most confident proposal"
    }

    fn apply(&self, attempt: &RemedyAttempt<'_>) -> Option<ExecutionResult> {
        let FailureScope::Handler { handler, params, uses_context } = &attempt.scope else {
            return None;
        };
        let context = uses_context.then_some(attempt.context);
        let model = self.llm.as_ref().map(|config| config.model.as_str());
        let prompt = self.build_prompt(attempt, params);

        // Strictly sequential polling; first-seen wins on equal confidence.
        let mut best: Option<Vote> = None;
        let mut valid_votes = 0usize;
        for client in &self.clients {
            let Ok(response) = client.generate(&prompt, model) else { continue };
            let Some(parsed) = first_json_object(&response.output) else { continue };
            let Ok(vote) = serde_json::from_value::<Vote>(parsed) else { continue };
            valid_votes += 1;
            let better = best.as_ref().map_or(true, |current| vote.confidence > current.confidence);
            if better {
                best = Some(vote);
            }
        }

        let winner = best?;
        if winner.confidence < self.vote_threshold {
            debug!(
                event_name = "remedy.vote_below_threshold",
                strategy = self.name(),
                node = attempt.node_name,
                confidence = winner.confidence,
                threshold = self.vote_threshold,
                "discarding consensus vote"
            );
            return None;
        }

        let retry_params = merge_params(params, winner.modified_params.as_ref());
        match handler.call(&retry_params, context) {
            Ok(output) => Some(
                attempt
                    .replacement(self.name(), output)
                    .with_params(retry_params)
                    .with_param("remedy.approach", json!(winner.approach))
                    .with_param("remedy.confidence", json!(winner.confidence))
                    .with_param("remedy.reasoning", json!(winner.reasoning))
                    .with_param("remedy.valid_votes", json!(valid_votes)),
            ),
            Err(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::{json, Value};

    use super::{ConsensusVote, SelfReflect};
    use crate::context::ExecutionContext;
    use crate::llm::ScriptedLlm;
    use crate::node::{handler_fn, Handler, HandlerError};
    use crate::remedy::{FailureScope, RemedyAttempt, RemedyStrategy};
    use crate::result::{ExecutionError, NodeKind, ParamMap};

    fn positive_amount_handler() -> Arc<dyn Handler> {
        handler_fn(|params: &ParamMap, _| match params.get("amount") {
            Some(Value::Number(number)) if number.as_f64().unwrap_or(-1.0) >= 0.0 => {
                Ok(json!("accepted"))
            }
            _ => Err(HandlerError::new("NegativeAmount", "amount must be non-negative")),
        })
    }

    fn attempt<'a>(
        handler: &'a dyn Handler,
        params: &'a ParamMap,
        context: &'a ExecutionContext,
        error: &'a ExecutionError,
    ) -> RemedyAttempt<'a> {
        RemedyAttempt {
            node_name: "refund",
            node_path: &[],
            node_kind: NodeKind::Action,
            input: "refund -40",
            context,
            error,
            scope: FailureScope::Handler { handler, params, uses_context: false },
        }
    }

    fn negative_amount_error() -> ExecutionError {
        ExecutionError::new("NegativeAmount", "amount must be non-negative", "refund", vec![])
    }

    #[test]
    fn self_reflect_merges_modified_params_over_originals() {
        let client = Arc::new(ScriptedLlm::with_outputs([
            r#"{"analysis": "amount was negative", "suggestions": ["flip sign"],
                "modified_params": {"amount": 40}, "confidence": 0.9}"#,
        ]));
        let strategy = SelfReflect::new(client.clone());
        let handler = positive_amount_handler();
        let params = ParamMap::from([("amount".to_owned(), json!(-40))]);
        let context = ExecutionContext::new();
        let error = negative_amount_error();

        let result = strategy
            .apply(&attempt(handler.as_ref(), &params, &context, &error))
            .expect("reflection fixes amount");
        assert_eq!(result.params.get("amount"), Some(&json!(40)));
        assert_eq!(result.params.get("remedy.confidence"), Some(&json!(0.9)));
        assert_eq!(client.call_count(), 1);
    }

    #[test]
    fn self_reflect_invalid_json_retries_with_originals() {
        let client = Arc::new(ScriptedLlm::with_outputs(["I am not sure what to say"]));
        let strategy = SelfReflect::new(client);
        // Handler succeeds on retry even with original params.
        let handler = handler_fn(|_, _| Ok(json!("second time lucky")));
        let params = ParamMap::from([("amount".to_owned(), json!(-40))]);
        let context = ExecutionContext::new();
        let error = negative_amount_error();

        let result = strategy
            .apply(&attempt(handler.as_ref(), &params, &context, &error))
            .expect("plain retry still runs");
        assert_eq!(result.params.get("amount"), Some(&json!(-40)));
        assert!(!result.params.contains_key("remedy.confidence"));
    }

    #[test]
    fn self_reflect_performs_a_single_pass() {
        let client = Arc::new(ScriptedLlm::with_outputs([
            r#"{"analysis": "", "modified_params": {"amount": -41}, "confidence": 0.2}"#,
            r#"{"analysis": "", "modified_params": {"amount": 40}, "confidence": 0.9}"#,
        ]));
        let strategy = SelfReflect::new(client.clone()).with_max_reflections(5);
        let handler = positive_amount_handler();
        let params = ParamMap::from([("amount".to_owned(), json!(-40))]);
        let context = ExecutionContext::new();
        let error = negative_amount_error();

        // First (and only) reflection keeps the amount negative, so the
        // retry fails and the strategy yields nothing: no second pass.
        assert!(strategy.apply(&attempt(handler.as_ref(), &params, &context, &error)).is_none());
        assert_eq!(client.call_count(), 1);
        assert_eq!(strategy.max_reflections(), 5);
    }

    #[test]
    fn consensus_picks_highest_confidence_vote() {
        let low = Arc::new(ScriptedLlm::with_outputs([
            r#"{"approach": "clamp", "confidence": 0.6, "modified_params": {"amount": 0}, "reasoning": "floor it"}"#,
        ]));
        let high = Arc::new(ScriptedLlm::with_outputs([
            r#"{"approach": "flip", "confidence": 0.9, "modified_params": {"amount": 40}, "reasoning": "sign error"}"#,
        ]));
        let strategy = ConsensusVote::new(vec![low, high]).with_threshold(0.5);
        let handler = positive_amount_handler();
        let params = ParamMap::from([("amount".to_owned(), json!(-40))]);
        let context = ExecutionContext::new();
        let error = negative_amount_error();

        let result = strategy
            .apply(&attempt(handler.as_ref(), &params, &context, &error))
            .expect("winning vote retries handler");
        assert_eq!(result.params.get("amount"), Some(&json!(40)));
        assert_eq!(result.params.get("remedy.approach"), Some(&json!("flip")));
        assert_eq!(result.params.get("remedy.valid_votes"), Some(&json!(2)));
    }

    #[test]
    fn consensus_tie_keeps_first_seen_vote() {
        let first = Arc::new(ScriptedLlm::with_outputs([
            r#"{"approach": "first", "confidence": 0.8, "modified_params": {"amount": 1}, "reasoning": ""}"#,
        ]));
        let second = Arc::new(ScriptedLlm::with_outputs([
            r#"{"approach": "second", "confidence": 0.8, "modified_params": {"amount": 2}, "reasoning": ""}"#,
        ]));
        let strategy = ConsensusVote::new(vec![first, second]).with_threshold(0.5);
        let handler = positive_amount_handler();
        let params = ParamMap::from([("amount".to_owned(), json!(-40))]);
        let context = ExecutionContext::new();
        let error = negative_amount_error();

        let result = strategy
            .apply(&attempt(handler.as_ref(), &params, &context, &error))
            .expect("tie resolved deterministically");
        assert_eq!(result.params.get("remedy.approach"), Some(&json!("first")));
        assert_eq!(result.params.get("amount"), Some(&json!(1)));
    }

    #[test]
    fn consensus_fails_below_threshold_or_without_valid_json() {
        let weak = Arc::new(ScriptedLlm::with_outputs([
            r#"{"approach": "meh", "confidence": 0.2, "reasoning": ""}"#,
        ]));
        let strategy = ConsensusVote::new(vec![weak]).with_threshold(0.5);
        let handler = positive_amount_handler();
        let params = ParamMap::from([("amount".to_owned(), json!(-40))]);
        let context = ExecutionContext::new();
        let error = negative_amount_error();
        assert!(strategy.apply(&attempt(handler.as_ref(), &params, &context, &error)).is_none());

        let prose = Arc::new(ScriptedLlm::with_outputs(["cannot help"]));
        let strategy = ConsensusVote::new(vec![prose]).with_threshold(0.5);
        assert!(strategy.apply(&attempt(handler.as_ref(), &params, &context, &error)).is_none());
    }
}
