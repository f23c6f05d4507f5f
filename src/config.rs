//! Configuration management for logmedic
//!
//! Settings live in `~/.config/logmedic/config.toml`. Environment variables
//! override the file, and secrets missing from both fall back to the system
//! keychain.

use crate::error::{AgentError, Result};
use crate::keyring::{self, Secret};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub model: ModelConfig,
    pub search: SearchConfig,
    pub github: GitHubConfig,
    pub workspace: WorkspaceConfig,
    pub conversation: ConversationConfig,
}

/// Azure OpenAI chat-completions deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub endpoint: Option<String>,
    pub deployment: Option<String>,
    pub api_version: String,
    pub api_key: Option<String>,
    pub request_timeout_secs: u64,
    pub rephrase_temperature: f32,
    pub diagnosis_temperature: f32,
    pub refine_temperature: f32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            deployment: None,
            api_version: "2024-06-01".to_string(),
            api_key: None,
            request_timeout_secs: 90,
            rephrase_temperature: 0.2,
            diagnosis_temperature: 0.4,
            refine_temperature: 0.2,
        }
    }
}

/// Splunk REST endpoint and job polling behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub base_url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Only for lab instances with self-signed certificates.
    pub accept_invalid_certs: bool,
    pub login_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub max_wait_secs: u64,
    pub max_transport_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            username: None,
            password: None,
            accept_invalid_certs: false,
            login_timeout_secs: 10,
            request_timeout_secs: 30,
            poll_interval_ms: 1000,
            max_wait_secs: 300,
            max_transport_retries: 3,
            retry_backoff_ms: 500,
        }
    }
}

impl SearchConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GitHubConfig {
    pub user: Option<String>,
    pub token: Option<String>,
    /// Repository used when the operator asks to apply a fix without a URL.
    pub default_repo: Option<String>,
    pub api_base: String,
    /// Where working copies are cloned from; `{clone_base}/{owner}/{repo}.git`.
    pub clone_base: String,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            user: None,
            token: None,
            default_repo: None,
            api_base: "https://api.github.com".to_string(),
            clone_base: "https://github.com".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    pub path: PathBuf,
    pub base_branch: String,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("workspace").join("repo"),
            base_branch: "main".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    /// Oldest non-system turns are dropped past this many.
    pub max_turns: usize,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self { max_turns: 50 }
    }
}

const REDACTED: &str = "********";

impl Config {
    fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("logmedic"))
    }

    pub fn default_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("config.toml"))
    }

    pub fn config_location(path: Option<&Path>) -> String {
        path.map(Path::to_path_buf)
            .or_else(Self::default_path)
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "~/.config/logmedic/config.toml".to_string())
    }

    /// Load file + environment + keychain. A missing file means defaults; a
    /// corrupt one is set aside and defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load_file(path, true)?,
            None => match Self::default_path() {
                Some(default) => Self::load_file(&default, false)?,
                None => Self::default(),
            },
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.fill_from_keychain();
        Ok(config)
    }

    fn load_file(path: &Path, explicit: bool) -> Result<Self> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound && !explicit => {
                return Ok(Self::default())
            }
            Err(err) => {
                return Err(AgentError::Config(format!(
                    "Failed to read {}: {}",
                    path.display(),
                    err
                )))
            }
        };

        match Self::from_toml(&content) {
            Ok(config) => Ok(config),
            Err(err) if !explicit => {
                preserve_corrupt_config(path, &content);
                tracing::warn!(
                    "Config file {} was corrupted ({}). A backup was saved and defaults were loaded.",
                    path.display(),
                    err
                );
                Ok(Self::default())
            }
            Err(err) => Err(err),
        }
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| AgentError::Config(format!("Invalid config: {}", e)))
    }

    /// Apply environment overrides through `lookup` so tests need not touch
    /// the process environment. Empty values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("AZURE_OPENAI_API_KEY") {
            self.model.api_key = Some(v);
        }
        if let Some(v) = get("AZURE_OPENAI_API_BASE") {
            self.model.endpoint = Some(v);
        }
        if let Some(v) = get("AZURE_OPENAI_API_VERSION") {
            self.model.api_version = v;
        }
        if let Some(v) = get("AZURE_OPENAI_DEPLOYMENT_NAME") {
            self.model.deployment = Some(v);
        }
        if let Some(v) = get("SPLUNK_API_BASE") {
            self.search.base_url = Some(v);
        }
        if let Some(v) = get("SPLUNK_USERNAME") {
            self.search.username = Some(v);
        }
        if let Some(v) = get("SPLUNK_PASSWORD") {
            self.search.password = Some(v);
        }
        if let Some(v) = get("GITHUB_USER") {
            self.github.user = Some(v);
        }
        if let Some(v) = get("GITHUB_REPO") {
            self.github.default_repo = Some(v);
        }
        if let Some(v) = get("GITHUB_TOKEN") {
            self.github.token = Some(v);
        }
        if let Some(v) = get("LOGMEDIC_WORKSPACE") {
            self.workspace.path = PathBuf::from(v);
        }
    }

    fn fill_from_keychain(&mut self) {
        if self.model.api_key.is_none() {
            self.model.api_key = keyring::get_secret(Secret::ModelApiKey);
        }
        if self.search.password.is_none() {
            self.search.password = keyring::get_secret(Secret::SearchPassword);
        }
        if self.github.token.is_none() {
            self.github.token = keyring::get_secret(Secret::GitHubToken);
        }
    }

    /// Check that everything the pipeline needs is present.
    pub fn validate(&self) -> Result<()> {
        let required: [(&str, bool); 7] = [
            ("model.endpoint", self.model.endpoint.is_some()),
            ("model.deployment", self.model.deployment.is_some()),
            ("model.api_key", self.model.api_key.is_some()),
            ("search.base_url", self.search.base_url.is_some()),
            ("search.username", self.search.username.is_some()),
            ("search.password", self.search.password.is_some()),
            ("github.token", self.github.token.is_some()),
        ];
        match required.iter().find(|(_, present)| !present) {
            Some((name, _)) => Err(AgentError::Config(format!(
                "missing required setting `{}`",
                name
            ))),
            None => Ok(()),
        }
    }

    /// Copy safe to print: every secret replaced.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        let hide = |v: &mut Option<String>| {
            if v.is_some() {
                *v = Some(REDACTED.to_string());
            }
        };
        hide(&mut copy.model.api_key);
        hide(&mut copy.search.password);
        hide(&mut copy.github.token);
        copy
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| AgentError::Config(format!("Failed to serialize config: {}", e)))
    }
}

fn preserve_corrupt_config(path: &Path, content: &str) {
    let corrupt_path = path.with_extension("toml.corrupt");
    if fs::rename(path, &corrupt_path).is_err() {
        let _ = fs::write(&corrupt_path, content);
    }
}
