use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::json;
use tracing::debug;

use crate::classify::{ClassifyRequest, ClassifyStrategy, Routing};
use crate::remedy::{ids, FailureScope, RemedyAttempt, RemedyStrategy};
use crate::result::ExecutionResult;

/// Name-alias table consulted by [`KeywordFallback`]. An alias hit counts as
/// a name-level match for its node.
fn builtin_aliases() -> BTreeMap<&'static str, &'static [&'static str]> {
    BTreeMap::from([
        ("greet", &["hello", "hi", "hey", "greetings", "howdy", "welcome"][..]),
        ("goodbye", &["bye", "farewell", "see you", "later"][..]),
        (
            "calculate",
            &["compute", "sum", "add", "subtract", "multiply", "divide", "math"][..],
        ),
        ("help", &["assist", "support", "faq", "stuck"][..]),
        ("status", &["track", "progress", "where is"][..]),
        ("weather", &["forecast", "temperature", "rain", "sunny"][..]),
    ])
}

#[derive(Clone, Debug, PartialEq)]
struct Scored {
    index: usize,
    score: f64,
    match_type: &'static str,
}

/// Classifier-routing fallback scoring candidate children by direct name
/// match (confidence 1.0, short-circuits) or keyword matches scored by
/// matched-keyword-length over input-length.
pub struct KeywordFallback {
    threshold: f64,
    aliases: BTreeMap<&'static str, &'static [&'static str]>,
}

impl Default for KeywordFallback {
    fn default() -> Self {
        Self::new(0.1)
    }
}

impl KeywordFallback {
    pub fn new(threshold: f64) -> Self {
        Self { threshold, aliases: builtin_aliases() }
    }

    fn score(&self, input: &str, attempt: &RemedyAttempt<'_>) -> Option<Scored> {
        let FailureScope::Routing { children, .. } = &attempt.scope else {
            return None;
        };
        let lowered = input.to_lowercase();

        // Name-level match: the child's name appears in the input, or a
        // built-in alias of that name does. Short-circuits in child order.
        for (index, child) in children.iter().enumerate() {
            let name = child.name.to_lowercase();
            let alias_hit = self
                .aliases
                .get(name.as_str())
                .is_some_and(|aliases| aliases.iter().any(|alias| lowered.contains(alias)));
            if lowered.contains(&name) || alias_hit {
                return Some(Scored { index, score: 1.0, match_type: "name" });
            }
        }

        // Keyword scoring over the children's declared keywords.
        let mut best: Option<Scored> = None;
        for (index, child) in children.iter().enumerate() {
            for keyword in child.keywords {
                let keyword_lower = keyword.to_lowercase();
                if !lowered.contains(&keyword_lower) {
                    continue;
                }
                let score = keyword_lower.len() as f64 / lowered.len().max(1) as f64;
                let better = best.as_ref().map_or(true, |current| score > current.score);
                if better {
                    best = Some(Scored { index, score, match_type: "keyword" });
                }
            }
        }
        best.filter(|scored| scored.score > self.threshold)
    }
}

impl RemedyStrategy for KeywordFallback {
    fn name(&self) -> &str {
        ids::KEYWORD_FALLBACK
    }

    fn description(&self) -> &str {
        "route by name or keyword affinity when classification fails"
    }

    fn apply(&self, attempt: &RemedyAttempt<'_>) -> Option<ExecutionResult> {
        let scored = self.score(attempt.input, attempt)?;
        let FailureScope::Routing { children, run_child } = &attempt.scope else {
            return None;
        };
        let chosen = children[scored.index].name.to_owned();
        debug!(
            event_name = "remedy.applied",
            strategy = self.name(),
            node = attempt.node_name,
            chosen_child = chosen.as_str(),
            confidence = scored.score,
            "keyword fallback selected a child"
        );

        let child_result = run_child(scored.index, attempt.input);
        let mut result = attempt.replacement(
            self.name(),
            child_result.output.clone().unwrap_or(serde_json::Value::Null),
        );
        result.success = child_result.success;
        result.error = child_result.error.clone();
        Some(
            result
                .with_param("chosen_child", json!(chosen))
                .with_param("fallback_match", json!(scored.match_type))
                .with_param("fallback_confidence", json!(scored.score))
                .with_child(child_result),
        )
    }
}

/// Delegates routing entirely to a second, different classification function
/// and executes whichever child it selects.
pub struct ClassifierFallback {
    alternate: Arc<dyn ClassifyStrategy>,
}

impl ClassifierFallback {
    pub fn new(alternate: Arc<dyn ClassifyStrategy>) -> Self {
        Self { alternate }
    }
}

impl RemedyStrategy for ClassifierFallback {
    fn name(&self) -> &str {
        ids::CLASSIFIER_FALLBACK
    }

    fn description(&self) -> &str {
        "delegate routing to an alternate classification function"
    }

    fn apply(&self, attempt: &RemedyAttempt<'_>) -> Option<ExecutionResult> {
        let FailureScope::Routing { children, run_child } = &attempt.scope else {
            return None;
        };
        let request = ClassifyRequest {
            input: attempt.input,
            children,
            context: attempt.context,
            llm: None,
        };
        let Routing::Child(index) = self.alternate.classify(&request) else {
            return None;
        };
        // An alternate strategy is caller-supplied; treat an out-of-range
        // index the same as no match.
        let chosen = children.get(index)?.name.to_owned();
        debug!(
            event_name = "remedy.applied",
            strategy = self.name(),
            node = attempt.node_name,
            alternate = self.alternate.name(),
            chosen_child = chosen.as_str(),
            "alternate classifier selected a child"
        );

        let child_result = run_child(index, attempt.input);
        let mut result = attempt.replacement(
            self.name(),
            child_result.output.clone().unwrap_or(serde_json::Value::Null),
        );
        result.success = child_result.success;
        result.error = child_result.error.clone();
        Some(
            result
                .with_param("chosen_child", json!(chosen))
                .with_param("alternate_classifier", json!(self.alternate.name()))
                .with_child(child_result),
        )
    }
}
