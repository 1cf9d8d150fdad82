use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::pipeline::reasoning::ollama::{DEFAULT_OLLAMA_MODEL, DEFAULT_OLLAMA_URL};
use crate::pipeline::reasoning::openai::{
    DEFAULT_OPENAI_MODEL, DEFAULT_OPENAI_TEMPERATURE, DEFAULT_OPENAI_URL,
};
use crate::pipeline::reasoning::request::DEFAULT_INPUT_TOKEN_BUDGET;

/// Application-level constants
pub const APP_NAME: &str = "guideline-check";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const DEFAULT_REASONING_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_RETRIEVAL_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Log filter used when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "info,reqwest=warn,hyper=warn"
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} is required when {reason}")]
    Missing { key: String, reason: String },

    #[error("Invalid value for {key}: '{value}' ({reason})")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
}

/// Which reasoning backend to call.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderConfig {
    Ollama {
        base_url: String,
        model: String,
    },
    OpenAi {
        base_url: String,
        api_key: String,
        model: String,
        temperature: f32,
    },
}

impl ProviderConfig {
    pub fn name(&self) -> &'static str {
        match self {
            ProviderConfig::Ollama { .. } => "ollama",
            ProviderConfig::OpenAi { .. } => "openai",
        }
    }
}

/// Process configuration, resolved once at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatorConfig {
    pub guidelines_dir: Option<PathBuf>,
    pub provider: ProviderConfig,
    pub reasoning_timeout: Duration,
    pub retrieval_timeout: Duration,
    /// Retries after the first attempt, for transient gateway failures only.
    pub max_retries: u32,
    pub input_token_budget: usize,
}

impl ValidatorConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve from any key lookup. Unset and blank values take defaults;
    /// malformed values are errors.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let provider_name = get("REASONING_PROVIDER").unwrap_or_else(|| "ollama".into());
        let provider = match provider_name.to_ascii_lowercase().as_str() {
            "ollama" => ProviderConfig::Ollama {
                base_url: get("OLLAMA_BASE_URL").unwrap_or_else(|| DEFAULT_OLLAMA_URL.into()),
                model: get("OLLAMA_MODEL").unwrap_or_else(|| DEFAULT_OLLAMA_MODEL.into()),
            },
            "openai" => ProviderConfig::OpenAi {
                base_url: get("OPENAI_BASE_URL").unwrap_or_else(|| DEFAULT_OPENAI_URL.into()),
                api_key: get("OPENAI_API_KEY").ok_or_else(|| ConfigError::Missing {
                    key: "OPENAI_API_KEY".into(),
                    reason: "REASONING_PROVIDER=openai".into(),
                })?,
                model: get("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_OPENAI_MODEL.into()),
                temperature: parse_or(&get, "OPENAI_TEMPERATURE", DEFAULT_OPENAI_TEMPERATURE)?,
            },
            _ => {
                return Err(ConfigError::Invalid {
                    key: "REASONING_PROVIDER".into(),
                    value: provider_name,
                    reason: "expected 'ollama' or 'openai'".into(),
                })
            }
        };

        if let ProviderConfig::OpenAi { temperature, .. } = &provider {
            if !(0.0..=2.0).contains(temperature) {
                return Err(ConfigError::Invalid {
                    key: "OPENAI_TEMPERATURE".into(),
                    value: temperature.to_string(),
                    reason: "must be between 0 and 2".into(),
                });
            }
        }

        let reasoning_timeout =
            parse_or(&get, "REASONING_TIMEOUT_SECS", DEFAULT_REASONING_TIMEOUT_SECS)?;
        let retrieval_timeout =
            parse_or(&get, "RETRIEVAL_TIMEOUT_SECS", DEFAULT_RETRIEVAL_TIMEOUT_SECS)?;
        for (key, secs) in [
            ("REASONING_TIMEOUT_SECS", reasoning_timeout),
            ("RETRIEVAL_TIMEOUT_SECS", retrieval_timeout),
        ] {
            if secs == 0 {
                return Err(ConfigError::Invalid {
                    key: key.into(),
                    value: "0".into(),
                    reason: "must be at least 1 second".into(),
                });
            }
        }

        let input_token_budget =
            parse_or(&get, "REASONING_INPUT_TOKEN_BUDGET", DEFAULT_INPUT_TOKEN_BUDGET)?;
        if input_token_budget == 0 {
            return Err(ConfigError::Invalid {
                key: "REASONING_INPUT_TOKEN_BUDGET".into(),
                value: "0".into(),
                reason: "must be positive".into(),
            });
        }

        Ok(Self {
            guidelines_dir: get("GUIDELINES_DIR").map(PathBuf::from),
            provider,
            reasoning_timeout: Duration::from_secs(reasoning_timeout),
            retrieval_timeout: Duration::from_secs(retrieval_timeout),
            max_retries: parse_or(&get, "REASONING_MAX_RETRIES", DEFAULT_MAX_RETRIES)?,
            input_token_budget,
        })
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
            key: key.to_string(),
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}
