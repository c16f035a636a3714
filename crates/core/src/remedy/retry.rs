use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::debug;

use crate::node::Handler;
use crate::remedy::{ids, FailureScope, RemedyAttempt, RemedyStrategy};
use crate::result::{ExecutionResult, ParamMap};

/// Re-invokes the failing handler with the same validated parameters, up to
/// `max_attempts` times in total.
pub struct RetryOnFail {
    max_attempts: u32,
    base_delay: Duration,
}

impl Default for RetryOnFail {
    fn default() -> Self {
        Self { max_attempts: 3, base_delay: Duration::ZERO }
    }
}

impl RetryOnFail {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self { max_attempts: max_attempts.max(1), base_delay }
    }
}

impl RemedyStrategy for RetryOnFail {
    fn name(&self) -> &str {
        ids::RETRY_ON_FAIL
    }

    fn description(&self) -> &str {
        "re-invoke the handler with the same parameters"
    }

    fn apply(&self, attempt: &RemedyAttempt<'_>) -> Option<ExecutionResult> {
        let FailureScope::Handler { handler, params, uses_context } = &attempt.scope else {
            return None;
        };
        let context = uses_context.then_some(attempt.context);

        for round in 1..=self.max_attempts {
            match handler.call(params, context) {
                Ok(output) => {
                    debug!(
                        event_name = "remedy.applied",
                        strategy = self.name(),
                        node = attempt.node_name,
                        attempts = round,
                        "handler retry succeeded"
                    );
                    return Some(
                        attempt
                            .replacement(self.name(), output)
                            .with_params((*params).clone())
                            .with_param("remedy.attempts", json!(round)),
                    );
                }
                Err(_) if round < self.max_attempts => {
                    if !self.base_delay.is_zero() {
                        std::thread::sleep(self.base_delay);
                    }
                }
                Err(_) => {}
            }
        }
        None
    }
}

/// Invokes an alternate handler with the same parameters, or the bare input
/// when no validated parameters exist; the result is attributed to the
/// fallback name.
pub struct FallbackToAnotherNode {
    fallback_handler: Arc<dyn Handler>,
    fallback_name: String,
}

impl FallbackToAnotherNode {
    pub fn new(fallback_handler: Arc<dyn Handler>, fallback_name: impl Into<String>) -> Self {
        Self { fallback_handler, fallback_name: fallback_name.into() }
    }
}

impl RemedyStrategy for FallbackToAnotherNode {
    fn name(&self) -> &str {
        ids::FALLBACK_NODE
    }

    fn description(&self) -> &str {
        "invoke an alternate handler and attribute the result to it"
    }

    fn apply(&self, attempt: &RemedyAttempt<'_>) -> Option<ExecutionResult> {
        let owned_params;
        let (params, context): (&ParamMap, _) = match &attempt.scope {
            FailureScope::Handler { params, uses_context, .. } => {
                (*params, uses_context.then_some(attempt.context))
            }
            _ => {
                owned_params = ParamMap::from([(
                    "input".to_owned(),
                    Value::String(attempt.input.to_owned()),
                )]);
                (&owned_params, None)
            }
        };

        match self.fallback_handler.call(params, context) {
            Ok(output) => {
                let mut result = attempt.replacement(self.name(), output);
                result.node_name = self.fallback_name.clone();
                Some(
                    result
                        .with_param("fallback_for", Value::String(attempt.node_name.to_owned())),
                )
            }
            Err(_) => None,
        }
    }
}

/// Deterministic parameter transform standing in for an alternate phrasing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamTransform {
    /// Replace every numeric parameter with its absolute value.
    AbsoluteValues,
    /// Clamp every numeric parameter to be non-negative.
    ClampNonNegative,
    /// Trim surrounding whitespace from every text parameter.
    TrimText,
}

impl ParamTransform {
    pub fn label(&self) -> &'static str {
        match self {
            ParamTransform::AbsoluteValues => "absolute_values",
            ParamTransform::ClampNonNegative => "clamp_non_negative",
            ParamTransform::TrimText => "trim_text",
        }
    }

    fn apply(&self, params: &ParamMap) -> ParamMap {
        params
            .iter()
            .map(|(name, value)| (name.clone(), self.apply_value(value)))
            .collect()
    }

    fn apply_value(&self, value: &Value) -> Value {
        match (self, value) {
            (ParamTransform::AbsoluteValues, Value::Number(number)) => match number.as_f64() {
                Some(float) if float < 0.0 => {
                    if let Some(integer) = number.as_i64() {
                        json!(integer.saturating_abs())
                    } else {
                        json!(float.abs())
                    }
                }
                _ => value.clone(),
            },
            (ParamTransform::ClampNonNegative, Value::Number(number)) => match number.as_f64() {
                Some(float) if float < 0.0 => {
                    if number.as_i64().is_some() {
                        json!(0)
                    } else {
                        json!(0.0)
                    }
                }
                _ => value.clone(),
            },
            (ParamTransform::TrimText, Value::String(text)) => {
                Value::String(text.trim().to_owned())
            }
            _ => value.clone(),
        }
    }
}

/// Applies an ordered set of deterministic parameter transforms as substitutes
/// for alternate phrasing, retrying the handler after each.
pub struct RetryWithAlternatePrompt {
    transforms: Vec<ParamTransform>,
}

impl Default for RetryWithAlternatePrompt {
    fn default() -> Self {
        Self::new(vec![ParamTransform::AbsoluteValues, ParamTransform::ClampNonNegative])
    }
}

impl RetryWithAlternatePrompt {
    pub fn new(transforms: Vec<ParamTransform>) -> Self {
        Self { transforms }
    }
}

impl RemedyStrategy for RetryWithAlternatePrompt {
    fn name(&self) -> &str {
        ids::ALTERNATE_PROMPT
    }

    fn description(&self) -> &str {
        "retry the handler after deterministic parameter transforms"
    }

    fn apply(&self, attempt: &RemedyAttempt<'_>) -> Option<ExecutionResult> {
        let FailureScope::Handler { handler, params, uses_context } = &attempt.scope else {
            return None;
        };
        let context = uses_context.then_some(attempt.context);

        for transform in &self.transforms {
            let transformed = transform.apply(params);
            if let Ok(output) = handler.call(&transformed, context) {
                debug!(
                    event_name = "remedy.applied",
                    strategy = self.name(),
                    node = attempt.node_name,
                    transform = transform.label(),
                    "transformed retry succeeded"
                );
                return Some(
                    attempt
                        .replacement(self.name(), output)
                        .with_params(transformed)
                        .with_param("remedy.transform", json!(transform.label())),
                );
            }
        }
        None
    }
}
