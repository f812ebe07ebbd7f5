use secrecy::{ExposeSecret, SecretString};
use std::path::PathBuf;
use tracing::Level;

const DEFAULT_REALTIME_URL: &str = "https://api.openai.com/v1/realtime";
const DEFAULT_REALTIME_MODEL: &str = "gpt-4o-realtime-preview-2024-10-02";
const DEFAULT_COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Debug)]
pub struct Config {
    pub openai_api_key: Option<SecretString>,
    pub realtime_url: String,
    pub realtime_model: String,
    pub completions_url: String,
    pub chat_model: String,
    pub log_level: Level,
    pub prompts_path: Option<PathBuf>,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let openai_api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|key| !key.is_empty())
            .map(SecretString::from);

        let realtime_url = url_var("REALTIME_URL", DEFAULT_REALTIME_URL)?;
        let realtime_model =
            std::env::var("REALTIME_MODEL").unwrap_or_else(|_| DEFAULT_REALTIME_MODEL.to_string());
        let completions_url = url_var("COMPLETIONS_URL", DEFAULT_COMPLETIONS_URL)?;
        let chat_model =
            std::env::var("CHAT_MODEL").unwrap_or_else(|_| DEFAULT_CHAT_MODEL.to_string());

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let prompts_path = std::env::var("PROMPTS_PATH").ok().map(PathBuf::from);

        Ok(Self {
            openai_api_key,
            realtime_url,
            realtime_model,
            completions_url,
            chat_model,
            log_level,
            prompts_path,
        })
    }

    /// Replaces the environment credential, e.g. from a command line flag.
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        if let Some(key) = api_key.filter(|key| !key.is_empty()) {
            self.openai_api_key = Some(SecretString::from(key));
        }
        self
    }

    /// The credential for operations that cannot proceed without one.
    pub fn require_api_key(&self) -> Result<&SecretString, ConfigError> {
        self.openai_api_key
            .as_ref()
            .ok_or_else(|| ConfigError::MissingVar("OPENAI_API_KEY".to_string()))
    }

    /// The credential as plain text, empty when none is configured.
    ///
    /// The core rejects an empty key on its own, so this is what is handed
    /// to it rather than failing up front.
    pub fn api_key_or_empty(&self) -> &str {
        self.openai_api_key
            .as_ref()
            .map(|key| key.expose_secret())
            .unwrap_or_default()
    }
}

fn url_var(name: &str, default: &str) -> Result<String, ConfigError> {
    let value = std::env::var(name).unwrap_or_else(|_| default.to_string());
    if value.starts_with("http://") || value.starts_with("https://") {
        Ok(value.trim_end_matches('/').to_string())
    } else {
        Err(ConfigError::InvalidValue(
            name.to_string(),
            format!("'{}' is not an http(s) URL", value),
        ))
    }
}
