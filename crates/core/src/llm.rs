use std::collections::VecDeque;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One completion from a provider, with the telemetry the provider exposed.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmResponse {
    pub output: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cost_usd: f64,
    pub provider: String,
    pub model: String,
    pub duration_ms: u64,
}

impl LlmResponse {
    pub fn text(output: impl Into<String>) -> Self {
        Self { output: output.into(), ..Self::default() }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LlmError {
    #[error("provider call failed: {0}")]
    Provider(String),
    #[error("provider returned an empty response")]
    EmptyResponse,
}

/// Injected provider capability. The engine never owns retries, timeouts, or
/// connection management for it; calls block until the provider answers.
pub trait LlmClient: Send + Sync {
    fn generate(&self, prompt: &str, model: Option<&str>) -> Result<LlmResponse, LlmError>;
}

/// Default model/provider settings carried by a graph or an individual
/// classifier. Nodes without their own config inherit the graph default.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmConfig {
    pub provider: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

impl LlmConfig {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self { provider: provider.into(), model: model.into(), temperature: None }
    }
}

/// Deterministic client returning queued responses, for tests and offline
/// demos. An exhausted queue yields `LlmError::EmptyResponse`.
#[derive(Debug, Default)]
pub struct ScriptedLlm {
    responses: Mutex<VecDeque<Result<LlmResponse, LlmError>>>,
    calls: Mutex<Vec<(String, Option<String>)>>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_outputs<I, S>(outputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let scripted = Self::new();
        for output in outputs {
            scripted.push_output(output);
        }
        scripted
    }

    pub fn push_output(&self, output: impl Into<String>) {
        self.push_response(Ok(LlmResponse::text(output)));
    }

    pub fn push_response(&self, response: Result<LlmResponse, LlmError>) {
        self.responses
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push_back(response);
    }

    pub fn push_error(&self, error: LlmError) {
        self.push_response(Err(error));
    }

    /// Prompts seen so far, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|(prompt, _)| prompt.clone())
            .collect()
    }

    /// Model requested by each call so far, in call order.
    pub fn models(&self) -> Vec<Option<String>> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|(_, model)| model.clone())
            .collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }
}

impl LlmClient for ScriptedLlm {
    fn generate(&self, prompt: &str, model: Option<&str>) -> Result<LlmResponse, LlmError> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((prompt.to_owned(), model.map(str::to_owned)));
        self.responses
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front()
            .unwrap_or(Err(LlmError::EmptyResponse))
    }
}

/// Extracts the first balanced JSON object embedded in free-form model output.
pub(crate) fn first_json_object(text: &str) -> Option<serde_json::Value> {
    first_json_block(text, '{', '}')
}

/// Extracts the first balanced JSON array embedded in free-form model output.
pub(crate) fn first_json_array(text: &str) -> Option<serde_json::Value> {
    first_json_block(text, '[', ']')
}

fn first_json_block(text: &str, open: char, close: char) -> Option<serde_json::Value> {
    let start = text.find(open)?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, character) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if character == '\\' {
                escaped = true;
            } else if character == '"' {
                in_string = false;
            }
            continue;
        }
        if character == '"' {
            in_string = true;
        } else if character == open {
            depth += 1;
        } else if character == close {
            depth -= 1;
            if depth == 0 {
                let candidate = &text[start..=start + offset];
                return serde_json::from_str(candidate).ok();
            }
        }
    }
    None
}
