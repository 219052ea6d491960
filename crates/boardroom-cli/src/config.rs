use anyhow::{Context, Result};
use boardroom_core::providers::{self, AnthropicProvider, GoogleProvider, OpenAiProvider};
use boardroom_core::{
    AdapterMode, AdapterOptions, ConcurrencyPolicy, GatewayClient, GatewayProvider, LlmProvider,
    ProviderAdapter, ProviderId, ProviderSet,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Environment variable overriding `[client] api_base`
pub const API_BASE_VAR: &str = "BOARDROOM_API_BASE";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BoardroomConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub boardroom: BoardroomSettings,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub client: ClientConfig,
}

// ── Server Config ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    3001
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.bind, self.port)
            .parse()
            .with_context(|| format!("Invalid server address {}:{}", self.bind, self.port))
    }
}

// ── Boardroom Config ────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardroomSettings {
    /// stream | single | mock
    #[serde(default)]
    pub mode: AdapterMode,
    /// How round-1 calls are scheduled: parallel | sequential
    #[serde(default)]
    pub concurrency: ConcurrencyPolicy,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Pause between words of simulated text
    #[serde(default = "default_mock_word_delay_ms")]
    pub mock_word_delay_ms: u64,
}

fn default_timeout_secs() -> u64 {
    boardroom_core::adapter::DEFAULT_TIMEOUT_SECS
}
fn default_mock_word_delay_ms() -> u64 {
    boardroom_core::adapter::DEFAULT_MOCK_WORD_DELAY_MS
}

impl Default for BoardroomSettings {
    fn default() -> Self {
        Self {
            mode: AdapterMode::default(),
            concurrency: ConcurrencyPolicy::default(),
            timeout_secs: default_timeout_secs(),
            mock_word_delay_ms: default_mock_word_delay_ms(),
        }
    }
}

impl BoardroomSettings {
    pub fn adapter_options(&self) -> AdapterOptions {
        AdapterOptions {
            mode: self.mode,
            timeout: Duration::from_secs(self.timeout_secs),
            mock_word_delay: Duration::from_millis(self.mock_word_delay_ms),
        }
    }
}

// ── Providers Config ────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub openai: ProviderConfig,
    #[serde(default)]
    pub anthropic: ProviderConfig,
    #[serde(default)]
    pub google: ProviderConfig,
}

impl ProvidersConfig {
    pub fn get(&self, id: ProviderId) -> &ProviderConfig {
        match id {
            ProviderId::Gpt => &self.openai,
            ProviderId::Claude => &self.anthropic,
            ProviderId::Gemini => &self.google,
        }
    }

    fn get_mut(&mut self, id: ProviderId) -> &mut ProviderConfig {
        match id {
            ProviderId::Gpt => &mut self.openai,
            ProviderId::Claude => &mut self.anthropic,
            ProviderId::Gemini => &mut self.google,
        }
    }
}

/// Upstream settings for one vendor. Unset `base_url`/`model` use the client defaults.
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &mask_secret(&self.api_key))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .finish()
    }
}

fn default_max_tokens() -> u32 {
    providers::DEFAULT_MAX_TOKENS
}
fn default_temperature() -> f32 {
    providers::DEFAULT_TEMPERATURE
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: None,
            model: None,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

impl ProviderConfig {
    pub fn has_key(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    /// Build the wire client for `id`, or `None` without a credential
    pub fn build(&self, id: ProviderId) -> Option<Arc<dyn LlmProvider>> {
        if !self.has_key() {
            return None;
        }
        let key = self.api_key.clone();
        let provider: Arc<dyn LlmProvider> = match id {
            ProviderId::Gpt => Arc::new(
                OpenAiProvider::new(
                    key,
                    self.model_or(providers::openai::DEFAULT_MODEL),
                    self.base_url_or(providers::openai::DEFAULT_BASE_URL),
                    self.max_tokens,
                )
                .with_temperature(self.temperature),
            ),
            ProviderId::Claude => Arc::new(
                AnthropicProvider::new(
                    key,
                    self.model_or(providers::anthropic::DEFAULT_MODEL),
                    self.base_url_or(providers::anthropic::DEFAULT_BASE_URL),
                    self.max_tokens,
                )
                .with_temperature(self.temperature),
            ),
            ProviderId::Gemini => Arc::new(
                GoogleProvider::new(
                    key,
                    self.model_or(providers::google::DEFAULT_MODEL),
                    self.base_url_or(providers::google::DEFAULT_BASE_URL),
                    self.max_tokens,
                )
                .with_temperature(self.temperature),
            ),
        };
        Some(provider)
    }

    fn model_or(&self, default: &str) -> String {
        self.model.clone().unwrap_or_else(|| default.to_string())
    }

    fn base_url_or(&self, default: &str) -> String {
        self.base_url.clone().unwrap_or_else(|| default.to_string())
    }
}

// ── Client Config ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base of the gateway API used by `ask --remote`
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

fn default_api_base() -> String {
    boardroom_core::client::DEFAULT_API_BASE.to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
        }
    }
}

/// Mask a secret string for safe display in Debug output / logs.
/// Shows first 3 and last 4 chars for keys longer than 7 chars, otherwise "***".
pub fn mask_secret(s: &str) -> String {
    if s.is_empty() {
        return "(empty)".to_string();
    }
    let chars: Vec<char> = s.chars().collect();
    if chars.len() > 7 {
        let prefix: String = chars[..3].iter().collect();
        let suffix: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", prefix, suffix)
    } else {
        "***".to_string()
    }
}

pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".boardroom")
}

impl BoardroomConfig {
    /// Load the config file, or defaults when the default path does not exist.
    /// Credentials missing from the file are taken from the environment.
    pub fn load(custom_path: &Option<PathBuf>) -> Result<Self> {
        let path = custom_path
            .clone()
            .unwrap_or_else(|| config_dir().join("config.toml"));

        let mut config = if custom_path.is_none() && !path.exists() {
            debug!("No config at {}, using defaults", path.display());
            Self::default()
        } else {
            Self::read(&path)?
        };

        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    fn read(path: &Path) -> Result<Self> {
        // Refuse group/other readable files, they may hold keys
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Ok(metadata) = std::fs::metadata(path) {
                let mode = metadata.permissions().mode();
                if mode & 0o077 != 0 {
                    return Err(anyhow::anyhow!(
                        "Config file {:?} has overly permissive permissions ({:o}). \
                         It may contain secrets. Fix with: chmod 600 {:?}",
                        path,
                        mode & 0o777,
                        path
                    ));
                }
            }
        }

        let content = std::fs::read_to_string(path).with_context(|| {
            format!(
                "Failed to read config at {}. Run `boardroom init` first.",
                path.display()
            )
        })?;

        let config = Self::parse(&expand_env_vars(&content))
            .with_context(|| format!("Failed to parse config at {}", path.display()))?;

        for id in ProviderId::ALL {
            let key = &config.providers.get(id).api_key;
            if !key.is_empty() && !content.contains(&format!("${{{}}}", id.credential_var())) {
                warn!(
                    "{} API key is hardcoded in config file. For security, use environment variables: api_key = \"${{{}}}\"",
                    id.display_name(),
                    id.credential_var()
                );
            }
        }

        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Fill empty credentials and the client API base from `lookup`
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        for id in ProviderId::ALL {
            let provider = self.providers.get_mut(id);
            if provider.has_key() {
                continue;
            }
            if let Some(key) = lookup(id.credential_var()).filter(|k| !k.trim().is_empty()) {
                provider.api_key = key;
            }
        }
        if let Some(base) = lookup(API_BASE_VAR).filter(|b| !b.trim().is_empty()) {
            self.client.api_base = base;
        }
    }

    /// Adapters calling the vendors directly
    pub fn local_providers(&self) -> ProviderSet {
        let options = self.boardroom.adapter_options();
        ProviderSet::from_fn(|id| match self.providers.get(id).build(id) {
            Some(upstream) => ProviderAdapter::new(id, upstream, options),
            None => {
                if options.mode.is_live() {
                    warn!(
                        "{} is not set, {} will use fallback text",
                        id.credential_var(),
                        id.display_name()
                    );
                }
                ProviderAdapter::offline(id, options)
            }
        })
    }

    /// Adapters calling a running gateway's per-provider endpoints
    pub fn remote_providers(&self) -> ProviderSet {
        let mut options = self.boardroom.adapter_options();
        if !options.mode.is_live() {
            options.mode = AdapterMode::Stream;
        }
        let client = Arc::new(GatewayClient::new(
            self.client.api_base.clone(),
            options.timeout,
        ));
        ProviderSet::from_fn(|id| {
            ProviderAdapter::new(id, Arc::new(GatewayProvider::new(client.clone(), id)), options)
        })
    }

    /// Copy safe to print: credentials masked
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        for id in ProviderId::ALL {
            let provider = copy.providers.get_mut(id);
            provider.api_key = mask_secret(&provider.api_key);
        }
        copy
    }
}

/// Allowlist of environment variable names that may be expanded in config files.
const ALLOWED_ENV_VARS: &[&str] = &[
    "OPENAI_API_KEY",
    "ANTHROPIC_API_KEY",
    "GEMINI_API_KEY",
    "BOARDROOM_API_BASE",
    "HOME",
    "USER",
];

fn expand_env_vars(s: &str) -> String {
    expand_vars(s, |name| std::env::var(name).ok())
}

fn expand_vars(s: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut result = s.to_string();
    let mut pos = 0;
    while pos < result.len() {
        let Some(start) = result[pos..].find("${") else {
            break;
        };
        let abs_start = pos + start;
        let Some(end) = result[abs_start..].find('}') else {
            break;
        };
        let var_name = result[abs_start + 2..abs_start + end].to_string();

        if !ALLOWED_ENV_VARS.contains(&var_name.as_str()) {
            warn!(
                "Skipping expansion of unrecognized env var '{}' in config (not in allowlist)",
                var_name
            );
            // Leave the ${VAR} unexpanded so it's obvious
            pos = abs_start + end + 1;
            continue;
        }

        let value = lookup(&var_name).unwrap_or_default();
        result = format!(
            "{}{}{}",
            &result[..abs_start],
            value,
            &result[abs_start + end + 1..]
        );
        pos = abs_start + value.len();
    }
    result
}
