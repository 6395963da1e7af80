use anyhow::{Context, Result};
use std::path::PathBuf;

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:21960";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LLMProviderKind {
    Gemini,
    OpenAI,
}

/// Configuration for the model collaborator
#[derive(Debug, Clone)]
pub struct LLMConfig {
    pub provider: LLMProviderKind,
    /// Missing keys are reported when a discovery run needs the model, not at startup
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            provider: LLMProviderKind::Gemini,
            api_key: None,
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            model: "gemini-2.0-flash".to_string(),
            timeout_secs: 30,
        }
    }
}

impl LLMConfig {
    /// Create config from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_vars<F>(var: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let provider = var("LLM_PROVIDER")
            .unwrap_or_else(|| "gemini".to_string())
            .to_lowercase();

        let provider = match provider.as_str() {
            "openai" => LLMProviderKind::OpenAI,
            _ => LLMProviderKind::Gemini,
        };

        let (key_var, url_var, model_var, default_url, default_model) = match provider {
            LLMProviderKind::Gemini => (
                "GEMINI_API_KEY",
                "GEMINI_BASE_URL",
                "GEMINI_MODEL",
                "https://generativelanguage.googleapis.com",
                "gemini-2.0-flash",
            ),
            LLMProviderKind::OpenAI => (
                "OPENAI_API_KEY",
                "OPENAI_BASE_URL",
                "OPENAI_MODEL",
                "https://api.openai.com",
                "gpt-4o-mini",
            ),
        };

        let timeout_secs = match var("LLM_TIMEOUT_SECS") {
            Some(raw) => raw
                .parse::<u64>()
                .with_context(|| format!("LLM_TIMEOUT_SECS must be a number, got {:?}", raw))?,
            None => 30,
        };

        Ok(Self {
            provider,
            api_key: var(key_var).filter(|k| !k.trim().is_empty()),
            base_url: var(url_var).unwrap_or_else(|| default_url.to_string()),
            model: var(model_var).unwrap_or_else(|| default_model.to_string()),
            timeout_secs,
        })
    }

    /// Name of the environment variable holding this provider's key
    pub fn api_key_var(&self) -> &'static str {
        match self.provider {
            LLMProviderKind::Gemini => "GEMINI_API_KEY",
            LLMProviderKind::OpenAI => "OPENAI_API_KEY",
        }
    }
}

/// Numeric policy of the cache gate and the discovery engine
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Active thoughts fetched per run
    pub candidate_limit: usize,
    /// Prefix of the candidates shown to the model
    pub prompt_limit: usize,
    pub max_connections: usize,
    pub min_thoughts: usize,
    pub snippet_fallback_chars: usize,
    pub freshness_window_minutes: i64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            candidate_limit: 50,
            prompt_limit: 20,
            max_connections: 10,
            min_thoughts: 2,
            snippet_fallback_chars: 150,
            freshness_window_minutes: 120,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub db_path: PathBuf,
    pub bind_addr: String,
    pub llm: LLMConfig,
    pub discovery: DiscoveryConfig,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_vars<F>(var: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let db_path = match var("DB_PATH") {
            Some(path) => PathBuf::from(path),
            None => {
                let home = var("HOME").context("HOME is not set and DB_PATH was not given")?;
                PathBuf::from(home).join(".thoughtmap").join("thoughtmap.db")
            }
        };

        Ok(Self {
            db_path,
            bind_addr: var("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            llm: LLMConfig::from_vars(&var)?,
            discovery: DiscoveryConfig::default(),
        })
    }
}
