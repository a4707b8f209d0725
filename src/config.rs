//! Settings loaded from the process environment and `.env`
//!
//! `ENVIRONMENT=development` switches the connection settings to the
//! `*_DEV` variables, each falling back to its unsuffixed name.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{key} must be set in environment or .env (environment={environment})")]
    Missing { key: String, environment: Environment },

    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: String, value: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Which set of database credentials to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Production,
    Development,
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Production => f.write_str("production"),
            Environment::Development => f.write_str("development"),
        }
    }
}

/// A string that is never printed by `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Secret(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Resolved credentials for one database environment.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub uri: String,
    pub user: String,
    pub password: Secret,
}

/// Graph database connection settings.
#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub environment: Environment,
    pub uri: Option<String>,
    pub user: Option<String>,
    pub password: Option<Secret>,
    /// Default database; `None` means the server default.
    pub database: Option<String>,
    pub connection_timeout: Duration,
    /// How long an idle pooled connection is kept.
    pub max_connection_lifetime: Duration,
    pub max_connection_pool_size: usize,
    /// Per-request timeout; exceeding it is an execution failure.
    pub query_timeout: Duration,
    pub verify_on_init: bool,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            environment: Environment::Production,
            uri: None,
            user: None,
            password: None,
            database: None,
            connection_timeout: Duration::from_secs(30),
            max_connection_lifetime: Duration::from_secs(3600),
            max_connection_pool_size: 50,
            query_timeout: Duration::from_secs(60),
            verify_on_init: false,
        }
    }
}

impl DatabaseSettings {
    /// URI, user and password, or the first one missing.
    pub fn credentials(&self) -> ConfigResult<Credentials> {
        let missing = |suffix: &str| ConfigError::Missing {
            key: match self.environment {
                Environment::Development => format!("NEO4J_{suffix}_DEV or NEO4J_{suffix}"),
                Environment::Production => format!("NEO4J_{suffix}"),
            },
            environment: self.environment,
        };
        Ok(Credentials {
            uri: self.uri.clone().ok_or_else(|| missing("URI"))?,
            user: self.user.clone().ok_or_else(|| missing("USER"))?,
            password: self.password.clone().ok_or_else(|| missing("PASSWORD"))?,
        })
    }
}

/// Switches controlling the validation gate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidationSettings {
    /// Executor escape hatch: skip the structural pipeline entirely.
    pub skip_validation: bool,
    /// Strict-mode bypass when the structural checker is unavailable.
    pub allow_unchecked: bool,
}

/// LLM backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LLMProvider {
    OpenAI,
    Ollama,
    Gemini,
    /// Offline provider returning canned completions.
    Mock,
}

/// Configuration for NLQ features
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NLQConfig {
    /// The LLM provider to use
    pub provider: LLMProvider,
    /// Model name (e.g., "gpt-4o", "llama3")
    pub model: String,
    /// API Key (optional for local providers)
    pub api_key: Option<String>,
    /// API Base URL (required for non-default endpoints)
    pub api_base_url: Option<String>,
    /// System prompt for the LLM
    pub system_prompt: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for NLQConfig {
    fn default() -> Self {
        Self {
            provider: LLMProvider::OpenAI,
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            api_base_url: None,
            system_prompt: None,
            temperature: 0.0,
            max_tokens: 1200,
        }
    }
}

/// Everything read from the environment.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub environment: Environment,
    pub database: DatabaseSettings,
    pub validation: ValidationSettings,
    pub nlq: NLQConfig,
}

struct Env<F> {
    lookup: F,
    environment: Environment,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    /// `{key}_DEV` first in development, then `{key}`.
    fn scoped(&self, key: &str) -> Option<String> {
        match self.environment {
            Environment::Development => self.get(&format!("{key}_DEV")).or_else(|| self.get(key)),
            Environment::Production => self.get(key),
        }
    }

    fn flag(&self, key: &str) -> bool {
        self.get(key)
            .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false)
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> ConfigResult<T> {
        match self.get(key) {
            Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
                key: key.to_string(),
                value,
            }),
            None => Ok(default),
        }
    }

    fn seconds(&self, key: &str, default: f64) -> ConfigResult<Duration> {
        let secs: f64 = self.parse(key, default)?;
        Duration::try_from_secs_f64(secs).map_err(|_| ConfigError::Invalid {
            key: key.to_string(),
            value: secs.to_string(),
        })
    }
}

impl Settings {
    /// Load `.env` (if present) and read the process environment.
    pub fn from_env() -> ConfigResult<Self> {
        // Missing .env is fine.
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let environment = match lookup("ENVIRONMENT").map(|v| v.trim().to_lowercase()) {
            Some(v) if v == "development" => Environment::Development,
            _ => Environment::Production,
        };
        let env = Env {
            lookup,
            environment,
        };

        let database = DatabaseSettings {
            environment,
            uri: env.scoped("NEO4J_URI"),
            user: env.scoped("NEO4J_USER"),
            password: env.scoped("NEO4J_PASSWORD").map(Secret::new),
            database: env.scoped("NEO4J_DATABASE"),
            connection_timeout: env.seconds("NEO4J_CONNECTION_TIMEOUT", 30.0)?,
            max_connection_lifetime: env.seconds("NEO4J_MAX_CONNECTION_LIFETIME", 3600.0)?,
            max_connection_pool_size: env.parse("NEO4J_MAX_CONNECTION_POOL_SIZE", 50)?,
            query_timeout: env.seconds("NEO4J_QUERY_TIMEOUT", 60.0)?,
            verify_on_init: env.flag("NEO4J_VERIFY_ON_INIT"),
        };

        let validation = ValidationSettings {
            skip_validation: env.flag("SKIP_CYPHER_VALIDATION"),
            allow_unchecked: env.flag("CYPHER_ALLOW_UNCHECKED"),
        };

        let provider = match env.get("LLM_PROVIDER").map(|v| v.to_lowercase()) {
            None => LLMProvider::OpenAI,
            Some(v) => match v.as_str() {
                "openai" => LLMProvider::OpenAI,
                "ollama" => LLMProvider::Ollama,
                "gemini" => LLMProvider::Gemini,
                "mock" => LLMProvider::Mock,
                _ => {
                    return Err(ConfigError::Invalid {
                        key: "LLM_PROVIDER".to_string(),
                        value: v,
                    })
                }
            },
        };
        let defaults = NLQConfig::default();
        let nlq = NLQConfig {
            provider,
            model: env
                .get("OPENAI_MODEL")
                .or_else(|| env.get("OPEN_AI_MODEL"))
                .unwrap_or(defaults.model),
            api_key: env.get("OPENAI_API_KEY").or_else(|| env.get("LLM_API_KEY")),
            api_base_url: env.get("LLM_API_BASE_URL"),
            system_prompt: env.get("LLM_SYSTEM_PROMPT"),
            temperature: env.parse("LLM_TEMPERATURE", defaults.temperature)?,
            max_tokens: env.parse("LLM_MAX_TOKENS", defaults.max_tokens)?,
        };

        Ok(Settings {
            environment,
            database,
            validation,
            nlq,
        })
    }
}
