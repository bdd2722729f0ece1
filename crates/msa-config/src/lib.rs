//! Typed configuration for the agent loop and its collaborators.
//!
//! Loaded from an optional TOML file and then overridden by environment
//! variables (a `.env` file is sourced first via `dotenvy`, matching the
//! rest of the workspace). Nothing here touches the filesystem beyond the
//! config file itself — the on-disk user-preferences file the wider product
//! owns is a separate, out-of-scope collaborator.

use std::env;
use std::fs;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentLoopConfig {
    pub max_steps: u32,
    pub max_idle_steps: u32,
    pub llm_timeout_secs: u64,
    pub safe_mode: bool,
}

impl Default for AgentLoopConfig {
    fn default() -> Self {
        Self {
            max_steps: 10,
            max_idle_steps: 2,
            llm_timeout_secs: 120,
            safe_mode: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LlmBackend {
    OpenAiCompat,
    Local,
}

impl Default for LlmBackend {
    fn default() -> Self {
        Self::OpenAiCompat
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub backend: LlmBackend,
    /// Base URL of an OpenAI-compatible chat endpoint.
    pub openai_base_url: String,
    pub openai_model: String,
    /// Bearer token. Never serialized back out to disk.
    #[serde(skip_serializing)]
    pub openai_api_key: Option<String>,
    /// Base URL of a local-model backend (Ollama-style `/api/chat`).
    pub local_base_url: String,
    pub local_model: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            backend: LlmBackend::OpenAiCompat,
            openai_base_url: "https://api.openai.com/v1".to_string(),
            openai_model: "gpt-4o-mini".to_string(),
            openai_api_key: None,
            local_base_url: "http://localhost:11434".to_string(),
            local_model: "llama3.1:8b".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    /// Overrides the user's login shell (`$SHELL`) when set.
    pub shell_override: Option<String>,
    pub default_command_timeout_secs: u64,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            shell_override: None,
            default_command_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub agent_loop: AgentLoopConfig,
    pub llm: LlmConfig,
    pub shell: ShellConfig,
}

impl AppConfig {
    /// Load from `path` if it exists, then apply environment overrides.
    /// A missing file is not an error — defaults apply.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = Self::default();
        if let Ok(raw) = fs::read_to_string(path) {
            config = toml::from_str(&raw)?;
        }
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parsed::<u32>("MAX_STEPS") {
            self.agent_loop.max_steps = v;
        }
        if let Some(v) = env_parsed::<u32>("MAX_IDLE_STEPS") {
            self.agent_loop.max_idle_steps = v;
        }
        if let Some(v) = env_parsed::<u64>("LLM_TIMEOUT") {
            self.agent_loop.llm_timeout_secs = v;
        }
        if let Some(v) = env_parsed::<bool>("SAFE_MODE") {
            self.agent_loop.safe_mode = v;
        }
        if let Ok(v) = env::var("SHELL_OVERRIDE") {
            if !v.is_empty() {
                self.shell.shell_override = Some(v);
            }
        }
        if let Ok(v) = env::var("OPENAI_API_KEY") {
            if !v.is_empty() {
                self.llm.openai_api_key = Some(v);
            }
        }
        if let Ok(v) = env::var("OPENAI_BASE_URL") {
            if !v.is_empty() {
                self.llm.openai_base_url = v;
            }
        }
        if let Ok(v) = env::var("OLLAMA_BASE_URL") {
            if !v.is_empty() {
                self.llm.local_base_url = v;
            }
        }
        if let Ok(v) = env::var("LLM_BACKEND") {
            match v.to_lowercase().as_str() {
                "local" | "ollama" => self.llm.backend = LlmBackend::Local,
                "openai" | "openai_compat" => self.llm.backend = LlmBackend::OpenAiCompat,
                _ => {}
            }
        }
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}
