use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::llm::LlmConfig;

/// Engine-wide tunables. Defaults are usable as-is; a TOML file and
/// `ARBOR_`-prefixed environment variables layer on top, in that order.
#[derive(Clone, Debug, PartialEq)]
pub struct EngineConfig {
    pub routing: RoutingConfig,
    pub retry: RetryConfig,
    /// Default LLM settings injected into classifier nodes lacking their own.
    pub llm: Option<LlmConfig>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RoutingConfig {
    /// Minimum keyword-affinity score a fallback match must reach.
    pub keyword_fallback_threshold: f64,
    /// Unhandled chunk text is truncated to this many characters in errors.
    pub chunk_preview_len: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RetryConfig {
    /// Total handler invocations attempted by the retry strategy.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            routing: RoutingConfig { keyword_fallback_threshold: 0.1, chunk_preview_len: 80 },
            retry: RetryConfig { max_attempts: 3, base_delay_ms: 0 },
            llm: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    routing: Option<RoutingPatch>,
    retry: Option<RetryPatch>,
    llm: Option<LlmPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct RoutingPatch {
    keyword_fallback_threshold: Option<f64>,
    chunk_preview_len: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct RetryPatch {
    max_attempts: Option<u32>,
    base_delay_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<String>,
    model: Option<String>,
    temperature: Option<f64>,
}

impl EngineConfig {
    /// Defaults, then the TOML file, then `ARBOR_` environment overrides.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;
        let patch = toml::from_str::<ConfigPatch>(&raw)
            .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })?;

        let mut config = Self::default();
        config.apply_patch(patch);
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides only.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(routing) = patch.routing {
            if let Some(threshold) = routing.keyword_fallback_threshold {
                self.routing.keyword_fallback_threshold = threshold;
            }
            if let Some(preview_len) = routing.chunk_preview_len {
                self.routing.chunk_preview_len = preview_len;
            }
        }

        if let Some(retry) = patch.retry {
            if let Some(max_attempts) = retry.max_attempts {
                self.retry.max_attempts = max_attempts;
            }
            if let Some(base_delay_ms) = retry.base_delay_ms {
                self.retry.base_delay_ms = base_delay_ms;
            }
        }

        if let Some(llm) = patch.llm {
            if let (Some(provider), Some(model)) = (llm.provider, llm.model) {
                let mut config = LlmConfig::new(provider, model);
                config.temperature = llm.temperature;
                self.llm = Some(config);
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("ARBOR_KEYWORD_FALLBACK_THRESHOLD") {
            self.routing.keyword_fallback_threshold =
                parse_f64("ARBOR_KEYWORD_FALLBACK_THRESHOLD", &value)?;
        }
        if let Some(value) = read_env("ARBOR_CHUNK_PREVIEW_LEN") {
            self.routing.chunk_preview_len = parse_usize("ARBOR_CHUNK_PREVIEW_LEN", &value)?;
        }
        if let Some(value) = read_env("ARBOR_RETRY_MAX_ATTEMPTS") {
            self.retry.max_attempts = parse_u32("ARBOR_RETRY_MAX_ATTEMPTS", &value)?;
        }
        if let Some(value) = read_env("ARBOR_RETRY_BASE_DELAY_MS") {
            self.retry.base_delay_ms = parse_u64("ARBOR_RETRY_BASE_DELAY_MS", &value)?;
        }

        let provider = read_env("ARBOR_LLM_PROVIDER");
        let model = read_env("ARBOR_LLM_MODEL");
        match (provider, model, &mut self.llm) {
            (Some(provider), Some(model), _) => self.llm = Some(LlmConfig::new(provider, model)),
            (Some(provider), None, Some(existing)) => existing.provider = provider,
            (None, Some(model), Some(existing)) => existing.model = model,
            (Some(_), None, None) | (None, Some(_), None) => {
                return Err(ConfigError::Validation(
                    "ARBOR_LLM_PROVIDER and ARBOR_LLM_MODEL must both be set when no file \
                     default exists"
                        .to_owned(),
                ));
            }
            (None, None, _) => {}
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Validation(
                "retry.max_attempts must be at least 1".to_owned(),
            ));
        }
        if !(0.0..=1.0).contains(&self.routing.keyword_fallback_threshold) {
            return Err(ConfigError::Validation(format!(
                "routing.keyword_fallback_threshold must be within [0, 1], got {}",
                self.routing.keyword_fallback_threshold
            )));
        }
        Ok(())
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_f64(key: &str, value: &str) -> Result<f64, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnvOverride { key: key.to_owned(), value: value.to_owned() })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnvOverride { key: key.to_owned(), value: value.to_owned() })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnvOverride { key: key.to_owned(), value: value.to_owned() })
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnvOverride { key: key.to_owned(), value: value.to_owned() })
}
