// Configuration module for the coin ledger and generation proxy

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::ledger::LedgerBackend;
use crate::proxy::{GenerationKind, Provider};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AppConfig {
    #[serde(default)]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub api_keys: Vec<String>,

    #[serde(default)]
    pub cors_origins: Vec<String>,

    #[serde(default)]
    pub debug: bool,

    #[serde(default)]
    pub ledger: LedgerConfig,

    #[serde(default)]
    pub providers: ProvidersConfig,

    #[serde(default)]
    pub generation: GenerationConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_port(),
            api_keys: Vec::new(),
            cors_origins: Vec::new(),
            debug: false,
            ledger: LedgerConfig::default(),
            providers: ProvidersConfig::default(),
            generation: GenerationConfig::default(),
        }
    }
}

fn default_port() -> u16 {
    3000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LedgerConfig {
    #[serde(default)]
    pub backend: LedgerBackend,

    #[serde(default = "default_balance")]
    pub default_balance: u64,

    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: String,

    #[serde(default)]
    pub remote: RemoteStoreConfig,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            backend: LedgerBackend::default(),
            default_balance: default_balance(),
            sqlite_path: default_sqlite_path(),
            remote: RemoteStoreConfig::default(),
        }
    }
}

fn default_balance() -> u64 {
    100
}

fn default_sqlite_path() -> String {
    "~/.coin-gen-proxy/coins.db".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RemoteStoreConfig {
    #[serde(default)]
    pub base_url: String,

    #[serde(default = "default_collection")]
    pub collection: String,

    #[serde(default)]
    pub auth_token: Option<String>,
}

impl Default for RemoteStoreConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            collection: default_collection(),
            auth_token: None,
        }
    }
}

fn default_collection() -> String {
    "users".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct ProviderEntry {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub fallback_model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct ProvidersConfig {
    #[serde(default)]
    pub openai: ProviderEntry,

    #[serde(default)]
    pub gemini: ProviderEntry,

    #[serde(default)]
    pub openrouter: ProviderEntry,

    /// Sent as `HTTP-Referer` to OpenRouter
    #[serde(default)]
    pub openrouter_site_url: Option<String>,

    /// Sent as `X-Title` to OpenRouter
    #[serde(default)]
    pub openrouter_app_name: Option<String>,
}

impl ProvidersConfig {
    pub fn entry(&self, provider: Provider) -> &ProviderEntry {
        match provider {
            Provider::OpenAI => &self.openai,
            Provider::Gemini => &self.gemini,
            Provider::OpenRouter => &self.openrouter,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GenerationConfig {
    #[serde(default)]
    pub default_provider: Provider,

    #[serde(default = "default_true")]
    pub structured_output: bool,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_prompt_chars")]
    pub max_prompt_chars: usize,

    #[serde(default)]
    pub cost_per_request: u64,

    #[serde(default)]
    pub max_tokens: MaxTokensConfig,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            default_provider: Provider::default(),
            structured_output: true,
            temperature: default_temperature(),
            timeout_secs: default_timeout_secs(),
            max_prompt_chars: default_max_prompt_chars(),
            cost_per_request: 0,
            max_tokens: MaxTokensConfig::default(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_temperature() -> f32 {
    0.7
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_max_prompt_chars() -> usize {
    8000
}

/// Output token limits per generation type
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MaxTokensConfig {
    #[serde(default = "default_animation_tokens")]
    pub animation: u32,
    #[serde(default = "default_vfx_tokens")]
    pub vfx: u32,
    #[serde(default = "default_script_tokens")]
    pub script: u32,
    #[serde(default = "default_ui_tokens")]
    pub ui: u32,
}

impl Default for MaxTokensConfig {
    fn default() -> Self {
        Self {
            animation: default_animation_tokens(),
            vfx: default_vfx_tokens(),
            script: default_script_tokens(),
            ui: default_ui_tokens(),
        }
    }
}

impl MaxTokensConfig {
    pub fn for_kind(&self, kind: GenerationKind) -> u32 {
        match kind {
            GenerationKind::Animation => self.animation,
            GenerationKind::Vfx => self.vfx,
            GenerationKind::Script => self.script,
            GenerationKind::Ui => self.ui,
        }
    }
}

fn default_animation_tokens() -> u32 {
    4000
}

fn default_vfx_tokens() -> u32 {
    2000
}

fn default_script_tokens() -> u32 {
    3000
}

fn default_ui_tokens() -> u32 {
    2500
}

/// Overlay secrets and the port from environment variables.
/// `lookup` is `std::env::var` in production. Returns a note for every
/// value that was present but ignored.
pub fn apply_env_overrides<F>(config: &mut AppConfig, lookup: F) -> Vec<String>
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
    let mut ignored = Vec::new();

    if let Some(key) = non_empty("OPENAI_API_KEY") {
        config.providers.openai.api_key = Some(key);
    }
    if let Some(key) = non_empty("GEMINI_API_KEY") {
        config.providers.gemini.api_key = Some(key);
    }
    if let Some(key) = non_empty("OPENROUTER_API_KEY") {
        config.providers.openrouter.api_key = Some(key);
    }
    if let Some(token) = non_empty("LEDGER_REMOTE_TOKEN") {
        config.ledger.remote.auth_token = Some(token);
    }
    if let Some(port) = non_empty("PORT") {
        match port.trim().parse::<u16>() {
            Ok(p) => config.port = p,
            Err(_) => ignored.push(format!("invalid PORT value {:?}", port)),
        }
    }

    ignored
}

/// Load the config file, creating it with defaults when missing
pub fn load_config(config_path: &Path) -> Result<AppConfig> {
    if config_path.exists() {
        let content = std::fs::read_to_string(config_path)?;
        return Ok(serde_yaml::from_str(&content)?);
    }

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let default_config = AppConfig::default();
    let content = serde_yaml::to_string(&default_config)?;
    std::fs::write(config_path, content)?;
    Ok(default_config)
}

pub fn default_config_path() -> PathBuf {
    expand_home("~/.coin-gen-proxy/config.yaml")
}

/// Expand a leading `~/` to the user's home directory
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }

    PathBuf::from(path)
}
