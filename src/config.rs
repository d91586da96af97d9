//! Runtime configuration.
//!
//! Values resolve in priority order:
//! 1. Explicit overrides (CLI flags)
//! 2. Environment: `SGFORGE_API_URL`, `SGFORGE_API_KEY` (falling back to
//!    `OPENAI_API_KEY`), `SGFORGE_MODEL`, `SGFORGE_HOME`
//! 3. Built-in defaults

use std::fmt;
use std::path::PathBuf;

use tracing::debug;

use crate::error::{Error, Result};

pub const DEFAULT_API_URL: &str = "https://api.openai.com/v1/";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_MAX_RETRIES: usize = 3;

const HOME_DIR_NAME: &str = ".sgforge";
const CONVERSATIONS_DIR_NAME: &str = "conversations";

/// Connection settings for an OpenAI-compatible endpoint.
#[derive(Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    /// Retries of the HTTP send only.
    pub max_retries: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
            api_key: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl LlmConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }
}

impl fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("timeout_secs", &self.timeout_secs)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

/// Values given explicitly on the command line.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub home: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub llm: LlmConfig,
    pub model: String,
    /// Base directory for local state (`~/.sgforge` by default).
    pub home: PathBuf,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::load(ConfigOverrides::default())
    }

    pub fn load(overrides: ConfigOverrides) -> Result<Self> {
        Self::resolve(overrides, |key| std::env::var(key).ok(), dirs::home_dir())
    }

    fn resolve(
        overrides: ConfigOverrides,
        env: impl Fn(&str) -> Option<String>,
        user_home: Option<PathBuf>,
    ) -> Result<Self> {
        let env = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        let base_url = overrides
            .api_url
            .or_else(|| env("SGFORGE_API_URL"))
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let api_key = overrides
            .api_key
            .or_else(|| env("SGFORGE_API_KEY"))
            .or_else(|| env("OPENAI_API_KEY"));
        let model = overrides
            .model
            .or_else(|| env("SGFORGE_MODEL"))
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let home = match overrides.home.or_else(|| env("SGFORGE_HOME").map(PathBuf::from)) {
            Some(home) => home,
            None => user_home
                .ok_or_else(|| {
                    Error::InvalidOptions("could not determine home directory".to_string())
                })?
                .join(HOME_DIR_NAME),
        };

        debug!("Resolved config: base_url={}, model={}, home={}", base_url, model, home.display());

        Ok(Self {
            llm: LlmConfig {
                base_url,
                api_key,
                ..Default::default()
            },
            model,
            home,
        })
    }

    /// Directory used by the filesystem conversation store.
    pub fn conversations_dir(&self) -> PathBuf {
        self.home.join(CONVERSATIONS_DIR_NAME)
    }
}
