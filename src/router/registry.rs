//! Model registry and combination selection.

use crate::config::{ApiKey, CombinationConfig, Config, ConfigError, ModelConfig, SummaryModelConfig};
use crate::error::{Error, Result};
use crate::proxy::types::Message;

use super::vision::is_vision_request;

/// Policy flags of a combination, resolved against the global defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CombinationFlags {
    pub use_parallel_analysis: bool,
    pub stream_status_feedback: bool,
    pub debug_mode: bool,
}

/// A fully resolved, immutable combination.
#[derive(Debug, Clone)]
pub struct Combination {
    pub name: String,
    pub bearer_token: ApiKey,
    pub text_models: Vec<ModelConfig>,
    pub vision_models: Vec<ModelConfig>,
    pub text_summary_model: SummaryModelConfig,
    pub vision_summary_model: SummaryModelConfig,
    pub flags: CombinationFlags,
}

/// The branch of a combination that applies to one request.
#[derive(Debug, Clone, Copy)]
pub struct Selection<'a> {
    pub combination: &'a Combination,
    pub models: &'a [ModelConfig],
    pub summary_model: &'a SummaryModelConfig,
    pub is_vision: bool,
}

impl Selection<'_> {
    pub fn flags(&self) -> CombinationFlags {
        self.combination.flags
    }
}

impl Combination {
    fn resolve(raw: &CombinationConfig, config: &Config) -> std::result::Result<Self, ConfigError> {
        let bearer_token = raw
            .api_bearer_token
            .clone()
            .or_else(|| config.api_bearer_token.clone())
            .ok_or_else(|| {
                ConfigError::Validation(format!(
                    "Combination '{}' has no bearer token",
                    raw.name
                ))
            })?;

        Ok(Self {
            name: raw.name.clone(),
            bearer_token,
            text_models: raw.text_models.clone(),
            vision_models: raw.vision_models.clone(),
            text_summary_model: raw.text_summary_model.clone(),
            vision_summary_model: raw
                .vision_summary_model
                .clone()
                .unwrap_or_else(|| raw.text_summary_model.clone()),
            flags: CombinationFlags {
                use_parallel_analysis: raw.use_parallel_analysis,
                stream_status_feedback: raw
                    .stream_status_feedback
                    .unwrap_or(config.stream_status_feedback),
                debug_mode: raw.debug_mode.unwrap_or(config.debug_mode),
            },
        })
    }

    /// Whether `token` matches this combination's gateway token.
    pub fn authorizes(&self, token: &str) -> bool {
        self.bearer_token.expose_secret() == token
    }

    /// Pick the text or vision branch for `messages`.
    ///
    /// A parallel combination with no models on the chosen branch cannot
    /// serve the request; that is a client error, not a backend failure.
    pub fn select(&self, messages: &[Message]) -> Result<Selection<'_>> {
        let is_vision = is_vision_request(messages);
        let (models, summary_model) = if is_vision {
            (&self.vision_models, &self.vision_summary_model)
        } else {
            (&self.text_models, &self.text_summary_model)
        };

        if self.flags.use_parallel_analysis && models.is_empty() {
            return Err(Error::NoModels {
                combination: self.name.clone(),
            });
        }

        tracing::debug!(
            combination = %self.name,
            vision = is_vision,
            models = models.len(),
            summary_model = %summary_model.model_name,
            "Selected combination branch"
        );

        Ok(Selection {
            combination: self,
            models,
            summary_model,
            is_vision,
        })
    }
}

/// Read-only set of combinations, built once at startup.
#[derive(Debug, Clone)]
pub struct Registry {
    combinations: Vec<Combination>,
    default_index: usize,
}

impl Registry {
    /// Build the registry, resolving per-combination flags and tokens.
    ///
    /// Fails when the default combination is not defined.
    pub fn from_config(config: &Config) -> std::result::Result<Self, ConfigError> {
        let combinations = config
            .combinations
            .iter()
            .map(|raw| Combination::resolve(raw, config))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let default_index = combinations
            .iter()
            .position(|c| c.name == config.default_combination)
            .ok_or_else(|| ConfigError::UnknownDefault(config.default_combination.clone()))?;

        Ok(Self {
            combinations,
            default_index,
        })
    }

    /// Look up a combination by name, falling back to the default.
    pub fn combination(&self, name: Option<&str>) -> &Combination {
        let Some(name) = name.filter(|n| !n.is_empty()) else {
            return self.default_combination();
        };

        match self.combinations.iter().find(|c| c.name == name) {
            Some(combination) => combination,
            None => {
                let fallback = self.default_combination();
                tracing::warn!(
                    requested = %name,
                    fallback = %fallback.name,
                    "Unknown combination requested, using default"
                );
                fallback
            }
        }
    }

    pub fn default_combination(&self) -> &Combination {
        &self.combinations[self.default_index]
    }

    /// All configured combinations in file order.
    pub fn combinations(&self) -> &[Combination] {
        &self.combinations
    }
}
