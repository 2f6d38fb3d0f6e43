use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 18789;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_MAX_ITERATIONS: u32 = 20;
pub const DEFAULT_COMPACT_THRESHOLD: usize = 50;
pub const DEFAULT_COMPACT_KEEP: usize = 10;
pub const DEFAULT_AUTOSAVE_SECS: u64 = 30;
pub const DEFAULT_TURN_DEADLINE_SECS: u64 = 300;

/// Top-level config (loom.toml + LOOM_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub data_dir: Option<String>,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            agent: AgentConfig::default(),
            data_dir: None,
            providers: ProvidersConfig::default(),
            channels: ChannelsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: default_port(), bind: default_bind() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_compact_threshold")]
    pub compact_threshold: usize,
    #[serde(default = "default_compact_keep")]
    pub compact_keep: usize,
    #[serde(default = "default_turn_deadline")]
    pub turn_deadline_secs: u64,
    #[serde(default = "default_autosave")]
    pub autosave_secs: u64,
    /// System prompt text prepended to every turn.
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            max_iterations: default_max_iterations(),
            compact_threshold: default_compact_threshold(),
            compact_keep: default_compact_keep(),
            turn_deadline_secs: default_turn_deadline(),
            autosave_secs: default_autosave(),
            system_prompt: default_system_prompt(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProvidersConfig {
    pub anthropic: Option<AnthropicConfig>,
    pub openai: Option<OpenAiProviderConfig>,
    pub ollama: Option<OllamaConfig>,
    /// Additional OpenAI-compatible providers (deepseek, openrouter, ...).
    /// Tried in order after the primary slots.
    #[serde(default)]
    pub openai_compat: Vec<OpenAiCompatEntry>,
}

/// A single OpenAI-compatible provider entry. Well-known IDs (`deepseek`,
/// `openrouter`) resolve their base URL automatically; unknown IDs require
/// `base_url`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiCompatEntry {
    pub id: String,
    pub api_key: String,
    pub base_url: Option<String>,
    pub chat_path: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiProviderConfig {
    pub api_key: String,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    #[serde(default = "default_ollama_base_url")]
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicConfig {
    pub api_key: String,
    #[serde(default = "default_anthropic_base_url")]
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChannelsConfig {
    pub telegram: Option<TelegramConfig>,
    pub discord: Option<DiscordConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordConfig {
    pub bot_token: String,
    /// When true, guild messages are only processed when the bot is @mentioned.
    #[serde(default)]
    pub require_mention: bool,
    /// When true, direct messages are accepted. Defaults to true.
    #[serde(default = "bool_true")]
    pub dm_allowed: bool,
}

fn bool_true() -> bool {
    true
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_model() -> String {
    "claude-sonnet-4-6".to_string()
}
fn default_max_iterations() -> u32 {
    DEFAULT_MAX_ITERATIONS
}
fn default_compact_threshold() -> usize {
    DEFAULT_COMPACT_THRESHOLD
}
fn default_compact_keep() -> usize {
    DEFAULT_COMPACT_KEEP
}
fn default_turn_deadline() -> u64 {
    DEFAULT_TURN_DEADLINE_SECS
}
fn default_autosave() -> u64 {
    DEFAULT_AUTOSAVE_SECS
}
fn default_system_prompt() -> String {
    "You are a helpful assistant with access to tools. Use them when they help answer the request."
        .to_string()
}
fn default_anthropic_base_url() -> String {
    "https://api.anthropic.com".to_string()
}
fn default_openai_base_url() -> String {
    "https://api.openai.com".to_string()
}
fn default_ollama_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_data_dir() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.loom", home)
}

impl GatewayConfig {
    /// Load config from a TOML file with LOOM_* env var overrides.
    ///
    /// Checks in order: explicit path argument, `LOOM_CONFIG` env var,
    /// `~/.loom/loom.toml`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .or_else(|| std::env::var("LOOM_CONFIG").ok())
            .unwrap_or_else(default_config_path);

        let config: GatewayConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("LOOM_").split("_"))
            .extract()
            .map_err(|e| crate::error::GatewayError::Config(e.to_string()))?;

        Ok(config)
    }

    /// Directory under which sessions/ and state/ are persisted.
    pub fn data_dir(&self) -> String {
        self.data_dir.clone().unwrap_or_else(default_data_dir)
    }

    pub fn sessions_dir(&self) -> std::path::PathBuf {
        std::path::Path::new(&self.data_dir()).join("sessions")
    }

    pub fn jobs_path(&self) -> std::path::PathBuf {
        std::path::Path::new(&self.data_dir()).join("state").join("cron-jobs.json")
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.loom/loom.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_reserved_main_oriented_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.server.port, DEFAULT_PORT);
        assert_eq!(config.agent.max_iterations, DEFAULT_MAX_ITERATIONS);
        assert_eq!(config.agent.compact_threshold, DEFAULT_COMPACT_THRESHOLD);
        assert_eq!(config.agent.compact_keep, DEFAULT_COMPACT_KEEP);
    }

    #[test]
    fn sessions_dir_and_jobs_path_nest_under_data_dir() {
        let config = GatewayConfig { data_dir: Some("/tmp/loom-test".to_string()), ..GatewayConfig::default() };
        assert_eq!(config.sessions_dir(), std::path::Path::new("/tmp/loom-test/sessions"));
        assert_eq!(config.jobs_path(), std::path::Path::new("/tmp/loom-test/state/cron-jobs.json"));
    }

    #[test]
    fn data_dir_falls_back_to_home_loom_when_unset() {
        let config = GatewayConfig::default();
        assert!(config.data_dir().ends_with("/.loom"));
    }
}
