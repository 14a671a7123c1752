//! Configuration system for Delve.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment -> overrides.
//! Configuration is loaded from `~/.config/delve/config.toml` and/or `.delve/config.toml`
//! in the workspace directory.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Message appended to the log when a mutating call fails.
pub const DEFAULT_TRANSPORT_ERROR_MESSAGE: &str =
    "I'm not able to find the answer right now. Please try again.";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DelveConfig {
    pub backend: BackendConfig,
    pub research: ResearchConfig,
    pub logging: LoggingConfig,
}

impl DelveConfig {
    /// Collect human-readable configuration problems. Empty means valid.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = self.backend.validate();
        problems.extend(self.research.validate());
        problems
    }

    /// Like `validate`, but as an error listing every problem.
    pub fn ensure_valid(&self) -> crate::error::Result<()> {
        let problems = self.validate();
        if problems.is_empty() {
            return Ok(());
        }
        Err(ConfigError::Invalid {
            message: problems.join("; "),
        }
        .into())
    }
}

/// Where and how to reach the research backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the research API.
    pub base_url: String,
    /// Bearer token sent with every request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
    /// Environment variable consulted when `api_token` is unset.
    pub api_token_env: String,
    /// Per-request timeout. Unset means the transport default (none).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,
    /// Connection establishment timeout in seconds.
    pub connect_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            api_token: None,
            api_token_env: "DELVE_API_TOKEN".to_string(),
            request_timeout_secs: None,
            connect_timeout_secs: 10,
        }
    }
}

impl BackendConfig {
    /// Resolve the API token from config or the configured environment variable.
    pub fn resolve_token(&self) -> Option<String> {
        self.api_token
            .clone()
            .or_else(|| std::env::var(&self.api_token_env).ok())
            .filter(|t| !t.trim().is_empty())
    }

    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            problems.push(format!(
                "backend.base_url must be an http(s) URL, got '{}'",
                self.base_url
            ));
        }
        if self.request_timeout_secs == Some(0) {
            problems.push("backend.request_timeout_secs must be > 0 when set".to_string());
        }
        problems
    }
}

/// One asynchronous report producer and how its results are recognized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerConfig {
    /// Stable identifier, also used in placeholder ids.
    pub id: String,
    /// Human-readable name for logs and the CLI.
    pub display_name: String,
    /// Leading text that tags a log message as this producer's result.
    pub marker: String,
    /// Text shown while this producer's result is outstanding.
    pub placeholder_text: String,
}

/// Behavior of the research state machine and result synchronizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchConfig {
    /// Interval between poll cycles while a report is outstanding.
    pub poll_interval_ms: u64,
    /// Message appended when a mutating call fails.
    pub transport_error_message: String,
    /// Report producers, in the order their results are expected.
    pub producers: Vec<ProducerConfig>,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2000,
            transport_error_message: DEFAULT_TRANSPORT_ERROR_MESSAGE.to_string(),
            producers: vec![
                ProducerConfig {
                    id: "openai".to_string(),
                    display_name: "ChatGPT (OpenAI)".to_string(),
                    marker: "## ChatGPT (OpenAI) Research".to_string(),
                    placeholder_text: "## ChatGPT (OpenAI) Research\n\nGenerating research report..."
                        .to_string(),
                },
                ProducerConfig {
                    id: "gemini".to_string(),
                    display_name: "Gemini (Google)".to_string(),
                    marker: "## Gemini (Google) Research".to_string(),
                    placeholder_text: "## Gemini (Google) Research\n\nGenerating summary and insights...\n\n(Please keep this tab open; the Gemini section will appear shortly.)"
                        .to_string(),
                },
            ],
        }
    }
}

impl ResearchConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.poll_interval_ms == 0 {
            problems.push("research.poll_interval_ms must be > 0".to_string());
        }
        if self.producers.is_empty() {
            problems.push("research.producers must list at least one producer".to_string());
        }
        for (i, producer) in self.producers.iter().enumerate() {
            if producer.marker.trim().is_empty() {
                problems.push(format!("research.producers[{i}].marker must not be empty"));
            }
            if self.producers[..i].iter().any(|p| p.id == producer.id) {
                problems.push(format!(
                    "research.producers[{i}].id '{}' is duplicated",
                    producer.id
                ));
            }
        }
        problems
    }
}

/// Logging output settings used by the CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default stderr filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Write structured JSON logs to a daily rolling file.
    pub json_file: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            json_file: true,
        }
    }
}

/// TOML files consulted, lowest priority first: the per-user file in the
/// platform config dir, then `.delve/config.toml` in the workspace.
pub fn config_files(workspace: Option<&Path>) -> Vec<PathBuf> {
    let user = directories::ProjectDirs::from("dev", "delve", "delve")
        .map(|dirs| dirs.config_dir().join("config.toml"));
    let local = workspace.map(|ws| ws.join(".delve").join("config.toml"));
    user.into_iter().chain(local).collect()
}

/// Load configuration from layered sources.
///
/// Defaults, then each existing file from [`config_files`], then `DELVE_`
/// environment variables, then `overrides`. Nested keys in the environment
/// are separated by `__`, so `DELVE_BACKEND__BASE_URL` sets `backend.base_url`
/// and `DELVE_RESEARCH__POLL_INTERVAL_MS` the poll cadence. A token can also be
/// supplied through the variable named by `backend.api_token_env`.
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&DelveConfig>,
) -> Result<DelveConfig, Box<figment::Error>> {
    let files = config_files(workspace)
        .into_iter()
        .filter(|path| path.exists());
    let layered = files.fold(
        Figment::from(Serialized::defaults(DelveConfig::default())),
        |figment, path| figment.merge(Toml::file(path)),
    );
    let layered = layered.merge(Env::prefixed("DELVE_").split("__"));

    let layered = match overrides {
        Some(overrides) => layered.merge(Serialized::defaults(overrides)),
        None => layered,
    };
    layered.extract().map_err(Box::new)
}
