//! # Generator Settings
//!
//! Configuration for the external generation path. Secrets are never part of
//! the settings: only the *name* of the environment variable that holds the
//! API key is configured.

use crate::codegen::DEFAULT_MIN_RESPONSE_LEN;
use crate::error::{AgcError, Result};
use serde::{Deserialize, Serialize};

/// Settings for an OpenAI-compatible chat-completions endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExternalSettings {
    pub endpoint: String,
    pub model: String,
    /// Environment variable holding the bearer token
    pub api_key_env: String,
    pub timeout_secs: u64,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for ExternalSettings {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_secs: 60,
            temperature: 0.2,
            max_tokens: 4096,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorSettings {
    pub external: ExternalSettings,
    /// Shorter external responses are rejected and replaced by templates
    pub min_response_len: usize,
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self {
            external: ExternalSettings::default(),
            min_response_len: DEFAULT_MIN_RESPONSE_LEN,
        }
    }
}

impl GeneratorSettings {
    /// Parse settings from JSON; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Defaults overridden by `AGC_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply `AGC_*` overrides looked up through `lookup`
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(endpoint) = lookup("AGC_ENDPOINT") {
            self.external.endpoint = endpoint;
        }
        if let Some(model) = lookup("AGC_MODEL") {
            self.external.model = model;
        }
        if let Some(api_key_env) = lookup("AGC_API_KEY_ENV") {
            self.external.api_key_env = api_key_env;
        }
        if let Some(value) = lookup("AGC_TIMEOUT_SECS") {
            self.external.timeout_secs = parse_setting("AGC_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = lookup("AGC_TEMPERATURE") {
            self.external.temperature = parse_setting("AGC_TEMPERATURE", &value)?;
        }
        if let Some(value) = lookup("AGC_MAX_TOKENS") {
            self.external.max_tokens = parse_setting("AGC_MAX_TOKENS", &value)?;
        }
        if let Some(value) = lookup("AGC_MIN_RESPONSE_LEN") {
            self.min_response_len = parse_setting("AGC_MIN_RESPONSE_LEN", &value)?;
        }
        Ok(self)
    }
}

fn parse_setting<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| AgcError::Settings(format!("{}={:?}: {}", key, value, e)))
}
