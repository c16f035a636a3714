use std::sync::Arc;

use regex::{Regex, RegexBuilder};
use serde_json::{json, Value};

use crate::context::ContextView;
use crate::llm::{first_json_object, LlmClient, LlmConfig};
use crate::node::{ParamKind, ParamSchema};
use crate::result::{error_kind, ParamMap};

/// Extraction failure. `kind` names the underlying cause and becomes the
/// action result's `error_type`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtractFailure {
    pub kind: String,
    pub message: String,
}

impl ExtractFailure {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self { kind: kind.into(), message: message.into() }
    }

    fn missing(name: &str) -> Self {
        Self::new(
            error_kind::MISSING_ARGUMENT,
            format!("no value found for parameter {name:?}"),
        )
    }
}

/// Pulls an action node's arguments out of raw input plus its restricted
/// context view.
pub trait ArgExtractor: Send + Sync {
    fn name(&self) -> &str;
    fn extract(
        &self,
        input: &str,
        schema: &ParamSchema,
        context: &ContextView,
    ) -> Result<ParamMap, ExtractFailure>;
}

/// Rule-based extractor: labeled values, quantity phrasing, boolean cues,
/// bracketed JSON, positional numbers, and context fill-in.
#[derive(Clone, Debug, Default)]
pub struct HeuristicExtractor;

impl HeuristicExtractor {
    pub fn new() -> Self {
        Self
    }

    fn labeled_capture(input: &str, pattern: &str) -> Option<String> {
        let compiled = RegexBuilder::new(pattern).case_insensitive(true).build().ok()?;
        compiled
            .captures(input)
            .and_then(|captures| captures.get(1))
            .map(|capture| capture.as_str().to_owned())
    }

    fn extract_number(input: &str, name: &str, numbers: &mut Vec<String>) -> Option<String> {
        let escaped = regex::escape(name);
        let labeled = Self::labeled_capture(
            input,
            &format!(r"\b{escaped}\b\s*(?:[:=]|is|of)?\s*(-?\d+(?:\.\d+)?)"),
        )
        .or_else(|| {
            // Quantity phrasing: "200 seats" for a parameter named "seats".
            Self::labeled_capture(input, &format!(r"(-?\d+(?:\.\d+)?)\s*\b{escaped}\b"))
        });
        if let Some(found) = labeled {
            numbers.retain(|candidate| candidate != &found);
            return Some(found);
        }
        if numbers.is_empty() {
            None
        } else {
            Some(numbers.remove(0))
        }
    }

    fn extract_boolean(input: &str, name: &str) -> Option<bool> {
        let escaped = regex::escape(name);
        if let Some(token) = Self::labeled_capture(
            input,
            &format!(r"\b{escaped}\b\s*[:=]?\s*(true|false|yes|no|on|off)\b"),
        ) {
            return Some(matches!(token.to_lowercase().as_str(), "true" | "yes" | "on"));
        }
        let negated = RegexBuilder::new(&format!(r"\b(?:no|without|disable)\s+{escaped}\b"))
            .case_insensitive(true)
            .build()
            .ok()?;
        if negated.is_match(input) {
            return Some(false);
        }
        let affirmed = RegexBuilder::new(&format!(r"\b(?:with|enable|include)\s+{escaped}\b"))
            .case_insensitive(true)
            .build()
            .ok()?;
        if affirmed.is_match(input) {
            return Some(true);
        }
        None
    }

    fn extract_text(input: &str, name: &str, schema: &ParamSchema) -> Option<String> {
        let escaped = regex::escape(name);
        if let Some(quoted) =
            Self::labeled_capture(input, &format!(r#"\b{escaped}\b\s*[:=]\s*"([^"]*)""#))
        {
            return Some(quoted);
        }
        if let Some(bare) = Self::labeled_capture(input, &format!(r"\b{escaped}\b\s*[:=]\s*(\S+)"))
        {
            return Some(bare);
        }
        // A single text parameter absorbs the whole input.
        let text_fields =
            schema.values().filter(|kind| matches!(kind, ParamKind::Text)).count();
        if text_fields == 1 {
            return Some(input.trim().to_owned());
        }
        None
    }
}

impl ArgExtractor for HeuristicExtractor {
    fn name(&self) -> &str {
        "heuristic"
    }

    fn extract(
        &self,
        input: &str,
        schema: &ParamSchema,
        context: &ContextView,
    ) -> Result<ParamMap, ExtractFailure> {
        let number_pattern = Regex::new(r"-?\d+(?:\.\d+)?")
            .map_err(|error| ExtractFailure::new("PatternError", error.to_string()))?;
        let mut numbers = number_pattern
            .find_iter(input)
            .map(|found| found.as_str().to_owned())
            .collect::<Vec<_>>();

        let mut params = ParamMap::new();
        for (name, kind) in schema {
            if let Some(value) = context.get(name) {
                params.insert(name.clone(), value.clone());
                continue;
            }
            let value = match kind {
                ParamKind::Integer | ParamKind::Float => {
                    Self::extract_number(input, name, &mut numbers).map(Value::String)
                }
                ParamKind::Boolean => Self::extract_boolean(input, name).map(Value::Bool),
                ParamKind::Text => Self::extract_text(input, name, schema).map(Value::String),
                ParamKind::Sequence => crate::llm::first_json_array(input),
                ParamKind::Mapping => first_json_object(input),
            };
            match value {
                Some(value) => {
                    params.insert(name.clone(), value);
                }
                None => return Err(ExtractFailure::missing(name)),
            }
        }
        Ok(params)
    }
}

/// LLM-backed extractor: prompts for a JSON object keyed by the schema.
pub struct LlmExtractor {
    client: Arc<dyn LlmClient>,
    llm: Option<LlmConfig>,
}

impl LlmExtractor {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self { client, llm: None }
    }

    pub fn with_config(mut self, config: LlmConfig) -> Self {
        self.llm = Some(config);
        self
    }

    fn build_prompt(&self, input: &str, schema: &ParamSchema, context: &ContextView) -> String {
        let mut prompt =
            String::from("Extract these parameters from the user input as a JSON object.\n\n");
        for (name, kind) in schema {
            prompt.push_str(&format!("- {name} ({})\n", kind.label()));
        }
        if !context.is_empty() {
            prompt.push_str(&format!(
                "\nKnown context: {}\n",
                Value::Object(context.as_map().clone().into_iter().collect())
            ));
        }
        prompt.push_str(&format!(
            "\nUser input: {input}\n\nAnswer with only the JSON object."
        ));
        prompt
    }
}

impl ArgExtractor for LlmExtractor {
    fn name(&self) -> &str {
        "llm"
    }

    fn extract(
        &self,
        input: &str,
        schema: &ParamSchema,
        context: &ContextView,
    ) -> Result<ParamMap, ExtractFailure> {
        let prompt = self.build_prompt(input, schema, context);
        let model = self.llm.as_ref().map(|config| config.model.as_str());
        let response = self
            .client
            .generate(&prompt, model)
            .map_err(|error| ExtractFailure::new(error_kind::LLM_CLIENT, error.to_string()))?;

        let Some(Value::Object(fields)) = first_json_object(&response.output) else {
            return Err(ExtractFailure::new(
                error_kind::RESPONSE_PARSE,
                "response did not contain a JSON object",
            ));
        };

        let mut params = ParamMap::new();
        for name in schema.keys() {
            match fields.get(name) {
                Some(value) => {
                    params.insert(name.clone(), value.clone());
                }
                None => return Err(ExtractFailure::missing(name)),
            }
        }
        Ok(params)
    }
}

/// Coerces one extracted value against its declared kind. Text must already be
/// text; numeric and boolean values are parsed with a typed failure when
/// coercion is impossible.
pub fn coerce(name: &str, value: &Value, kind: ParamKind) -> Result<Value, ExtractFailure> {
    let mismatch = || {
        ExtractFailure::new(
            error_kind::TYPE_COERCION,
            format!("parameter {name:?} cannot be coerced to {}", kind.label()),
        )
    };
    match kind {
        ParamKind::Text => match value {
            Value::String(_) => Ok(value.clone()),
            _ => Err(mismatch()),
        },
        ParamKind::Integer => match value {
            Value::Number(number) if number.is_i64() || number.is_u64() => Ok(value.clone()),
            Value::Number(number) => match number.as_f64() {
                Some(float) if float.fract() == 0.0 => Ok(json!(float as i64)),
                _ => Err(mismatch()),
            },
            Value::String(text) => {
                let trimmed = text.trim();
                if let Ok(parsed) = trimmed.parse::<i64>() {
                    return Ok(json!(parsed));
                }
                match trimmed.parse::<f64>() {
                    Ok(float) if float.fract() == 0.0 => Ok(json!(float as i64)),
                    _ => Err(mismatch()),
                }
            }
            _ => Err(mismatch()),
        },
        ParamKind::Float => match value {
            Value::Number(number) => match number.as_f64() {
                Some(float) => Ok(json!(float)),
                None => Err(mismatch()),
            },
            Value::String(text) => match text.trim().parse::<f64>() {
                Ok(float) => Ok(json!(float)),
                Err(_) => Err(mismatch()),
            },
            _ => Err(mismatch()),
        },
        ParamKind::Boolean => match value {
            Value::Bool(_) => Ok(value.clone()),
            Value::String(text) => match text.trim().to_lowercase().as_str() {
                "true" | "yes" | "on" | "1" => Ok(json!(true)),
                "false" | "no" | "off" | "0" => Ok(json!(false)),
                _ => Err(mismatch()),
            },
            _ => Err(mismatch()),
        },
        ParamKind::Sequence => match value {
            Value::Array(_) => Ok(value.clone()),
            Value::String(text) => match serde_json::from_str::<Value>(text) {
                Ok(Value::Array(items)) => Ok(Value::Array(items)),
                _ => Err(mismatch()),
            },
            _ => Err(mismatch()),
        },
        ParamKind::Mapping => match value {
            Value::Object(_) => Ok(value.clone()),
            Value::String(text) => match serde_json::from_str::<Value>(text) {
                Ok(Value::Object(fields)) => Ok(Value::Object(fields)),
                _ => Err(mismatch()),
            },
            _ => Err(mismatch()),
        },
    }
}
