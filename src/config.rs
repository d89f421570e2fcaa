//! Configuration parsing and validation for synthgate.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    /// Combination used when a request names none, or names an unknown one.
    pub default_combination: String,
    /// Gateway token accepted by combinations that do not set their own.
    pub api_bearer_token: Option<ApiKey>,
    /// Global default for per-model status frames in streaming responses.
    #[serde(default)]
    pub stream_status_feedback: bool,
    /// Global default for payload logging.
    #[serde(default)]
    pub debug_mode: bool,
    #[serde(default)]
    pub combinations: Vec<CombinationConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on (e.g., "127.0.0.1:18888")
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Largest accepted request body in MiB; inline images make requests big
    #[serde(default = "default_max_body_mb")]
    pub max_body_mb: usize,
}

fn default_listen() -> String {
    "127.0.0.1:18888".to_string()
}

fn default_max_body_mb() -> usize {
    50
}

impl ServerConfig {
    pub fn max_body_bytes(&self) -> usize {
        self.max_body_mb.saturating_mul(1024 * 1024)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            max_body_mb: default_max_body_mb(),
        }
    }
}

/// Bearer token wrapper that redacts in Debug/Display/Serialize and zeroizes on drop.
///
/// Raw access goes through `.expose_secret()` only, so every use is grep-auditable.
#[derive(Clone)]
pub struct ApiKey(SecretString);

impl ApiKey {
    /// Access the raw token value.
    pub fn expose_secret(&self) -> &str {
        self.0.expose_secret()
    }

    /// Expand `${VAR}` references against the process environment.
    fn expand(&self, owner: &str) -> Result<ApiKey, ConfigError> {
        expand_env_vars(self.expose_secret(), owner).map(ApiKey::from)
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl std::fmt::Display for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl Serialize for ApiKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("[REDACTED]")
    }
}

impl<'de> serde::Deserialize<'de> for ApiKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(|s| ApiKey(SecretString::from(s)))
    }
}

impl From<String> for ApiKey {
    fn from(s: String) -> Self {
        ApiKey(SecretString::from(s))
    }
}

impl From<&str> for ApiKey {
    fn from(s: &str) -> Self {
        ApiKey(SecretString::from(s))
    }
}

/// A named routing bundle as written in the config file.
///
/// Optional flags fall back to the global values; [`crate::router::Registry`]
/// resolves them into a concrete [`crate::router::Combination`] at load time.
#[derive(Debug, Clone, Deserialize)]
pub struct CombinationConfig {
    pub name: String,
    pub api_bearer_token: Option<ApiKey>,
    #[serde(default)]
    pub use_parallel_analysis: bool,
    pub stream_status_feedback: Option<bool>,
    pub debug_mode: Option<bool>,
    #[serde(default)]
    pub text_models: Vec<ModelConfig>,
    #[serde(default)]
    pub vision_models: Vec<ModelConfig>,
    pub text_summary_model: SummaryModelConfig,
    /// Defaults to the text summary model when omitted.
    pub vision_summary_model: Option<SummaryModelConfig>,
}

/// A backend model queried during fan-out.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    /// Full chat-completions URL
    pub endpoint: String,
    pub bearer_token: ApiKey,
    pub model_name: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Total attempts, including the first one
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Per-attempt timeout in seconds
    #[serde(default = "default_model_timeout")]
    pub timeout: u64,
}

impl ModelConfig {
    /// Number of attempts the retry loop may make. Zero is treated as one.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.max(1)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

/// The model that synthesizes the final answer.
#[derive(Debug, Clone, Deserialize)]
pub struct SummaryModelConfig {
    pub endpoint: String,
    pub bearer_token: ApiKey,
    pub model_name: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Forward prior conversation turns to the summarizer
    #[serde(default)]
    pub keep_history: bool,
    /// Instruction appended after the reference answers
    #[serde(default)]
    pub summary_prompt: String,
    /// Timeout in seconds; summaries are long, so the default is generous
    #[serde(default = "default_summary_timeout")]
    pub timeout: u64,
}

impl SummaryModelConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_retries() -> u32 {
    3
}

fn default_model_timeout() -> u64 {
    120
}

fn default_summary_timeout() -> u64 {
    300
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level used when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// Bearer tokens have their `${VAR}` references expanded and the result
    /// is validated before it is returned.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            source: e,
        })?;

        Self::parse_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse_str(content: &str) -> Result<Self, ConfigError> {
        let mut config: Config = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.expand_secrets()?;
        config.validate()?;
        Ok(config)
    }

    /// Replace every bearer token with its env-expanded value.
    fn expand_secrets(&mut self) -> Result<(), ConfigError> {
        if let Some(token) = &self.api_bearer_token {
            self.api_bearer_token = Some(token.expand("api_bearer_token")?);
        }

        for combination in &mut self.combinations {
            if let Some(token) = &combination.api_bearer_token {
                combination.api_bearer_token = Some(token.expand(&combination.name)?);
            }
            for model in combination
                .text_models
                .iter_mut()
                .chain(combination.vision_models.iter_mut())
            {
                model.bearer_token = model.bearer_token.expand(&model.model_name)?;
            }
            for summary in std::iter::once(&mut combination.text_summary_model)
                .chain(combination.vision_summary_model.as_mut())
            {
                summary.bearer_token = summary.bearer_token.expand(&summary.model_name)?;
            }
        }

        Ok(())
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.combinations.is_empty() {
            return Err(ConfigError::Validation(
                "At least one combination must be configured".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for combination in &self.combinations {
            if !seen.insert(combination.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "Duplicate combination name '{}'",
                    combination.name
                )));
            }

            if combination.api_bearer_token.is_none() && self.api_bearer_token.is_none() {
                return Err(ConfigError::Validation(format!(
                    "Combination '{}' has no api_bearer_token and no global token is set",
                    combination.name
                )));
            }

            let endpoints = combination
                .text_models
                .iter()
                .chain(&combination.vision_models)
                .map(|m| (m.model_name.as_str(), m.endpoint.as_str()))
                .chain(
                    std::iter::once(&combination.text_summary_model)
                        .chain(combination.vision_summary_model.as_ref())
                        .map(|s| (s.model_name.as_str(), s.endpoint.as_str())),
                );
            for (model_name, endpoint) in endpoints {
                if endpoint.is_empty() {
                    return Err(ConfigError::Validation(format!(
                        "Model '{}' in combination '{}' has empty endpoint",
                        model_name, combination.name
                    )));
                }
            }

            if combination.use_parallel_analysis && combination.text_models.is_empty() {
                tracing::warn!(
                    combination = %combination.name,
                    "Parallel combination has no text models - text requests will be rejected"
                );
            }
        }

        if !seen.contains(self.default_combination.as_str()) {
            return Err(ConfigError::UnknownDefault(self.default_combination.clone()));
        }

        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Default combination '{0}' is not defined")]
    UnknownDefault(String),

    #[error("Environment variable '{var}' not set for '{owner}': {message}")]
    EnvVar {
        var: String,
        owner: String,
        message: String,
    },
}

/// Expand all `${VAR}` references in a string using a custom lookup function.
///
/// Supports multiple `${VAR}` in one string. Fails on first missing variable,
/// unclosed `${`, or empty variable name.
fn expand_env_vars_with<F>(input: &str, owner: &str, lookup: F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if !input.contains("${") {
        return Ok(input.to_string());
    }

    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        let end = after.find('}').ok_or_else(|| ConfigError::EnvVar {
            var: "<unclosed>".to_string(),
            owner: owner.to_string(),
            message: "Unclosed '${' in bearer token".to_string(),
        })?;

        let var_name = &after[..end];
        if var_name.is_empty() {
            return Err(ConfigError::EnvVar {
                var: "".to_string(),
                owner: owner.to_string(),
                message: "Empty variable name in '${}' reference".to_string(),
            });
        }

        let value = lookup(var_name).ok_or_else(|| ConfigError::EnvVar {
            var: var_name.to_string(),
            owner: owner.to_string(),
            message: format!("Environment variable '{}' is not set", var_name),
        })?;

        result.push_str(&value);
        rest = &after[end + 1..];
    }

    result.push_str(rest);
    Ok(result)
}

/// Expand all `${VAR}` references in a string using real environment variables.
fn expand_env_vars(input: &str, owner: &str) -> Result<String, ConfigError> {
    expand_env_vars_with(input, owner, |name| std::env::var(name).ok())
}
