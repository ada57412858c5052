//! Configuration types and loading.
//!
//! Config is loaded from a YAML file (e.g. `~/.sms-bridge/config.yaml`) and environment.
//! `TELEGRAM_BOT_TOKEN` overrides the configured bot token.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level application config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Bind address shared by both transports (default "0.0.0.0").
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Directory holding the thread cache. Overridden by `serve --data-dir`.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    /// Request/response transport (`POST /message`).
    #[serde(default)]
    pub http: HttpConfig,

    /// Persistent transport (`GET /ws`).
    #[serde(default)]
    pub ws: WsConfig,

    /// Destination chat service credentials.
    #[serde(default)]
    pub telegram: TelegramConfig,

    /// Signature checking options shared by both transports.
    #[serde(default)]
    pub signature: SignatureConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Shared secret callers sign timestamps with.
    #[serde(default, alias = "secret_key")]
    pub secret_key: String,
    #[serde(default)]
    pub tls: TlsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default, alias = "secret_key")]
    pub secret_key: String,
    #[serde(default)]
    pub tls: TlsConfig,
    /// Seconds between server pings (default 30).
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
    /// Seconds without a pong before the server drops the connection (default 60).
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

/// PEM paths. Both empty = plain TCP.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsConfig {
    #[serde(default)]
    pub cert: String,
    #[serde(default)]
    pub key: String,
}

impl TlsConfig {
    pub fn is_enabled(&self) -> bool {
        !self.cert.trim().is_empty() && !self.key.trim().is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelegramConfig {
    /// Bot token from BotFather. Overridden by TELEGRAM_BOT_TOKEN env when set.
    #[serde(default)]
    pub bot_token: String,
    /// Forum supergroup that receives one topic per sender.
    #[serde(default)]
    pub target_group_id: i64,
    /// Bot API base URL (default https://api.telegram.org).
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// When true, replies posted by group members inside a sender's topic are pushed
    /// back to that sender's WebSocket connection (uses getUpdates long-poll).
    #[serde(default)]
    pub relay_replies: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureConfig {
    /// Reject timestamps (Unix ms) further than this from now. Unset = no freshness check.
    #[serde(default)]
    pub max_skew_secs: Option<u64>,
}

impl SignatureConfig {
    pub fn max_skew(&self) -> Option<Duration> {
        self.max_skew_secs.map(Duration::from_secs)
    }
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_enabled() -> bool {
    true
}

fn default_port() -> u16 {
    8080
}

fn default_ping_interval_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    60
}

fn default_api_base() -> String {
    "https://api.telegram.org".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            data_dir: None,
            http: HttpConfig::default(),
            ws: WsConfig::default(),
            telegram: TelegramConfig::default(),
            signature: SignatureConfig::default(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            port: default_port(),
            secret_key: String::new(),
            tls: TlsConfig::default(),
        }
    }
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            port: default_port(),
            secret_key: String::new(),
            tls: TlsConfig::default(),
            ping_interval_secs: default_ping_interval_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            target_group_id: 0,
            api_base: default_api_base(),
            relay_replies: false,
        }
    }
}

impl Config {
    /// True when both transports are enabled on one port and must share a listener.
    pub fn shares_port(&self) -> bool {
        self.http.enabled && self.ws.enabled && self.http.port == self.ws.port
    }

    /// Check startup invariants. Every failure here is fatal.
    pub fn validate(&self) -> Result<()> {
        if self.telegram.bot_token.trim().is_empty() {
            anyhow::bail!("telegram bot token not set (telegram.botToken or TELEGRAM_BOT_TOKEN)");
        }
        if self.telegram.target_group_id == 0 {
            anyhow::bail!("telegram target group id not set (telegram.targetGroupId)");
        }
        if !self.http.enabled && !self.ws.enabled {
            anyhow::bail!("neither http nor ws transport is enabled");
        }
        for (name, enabled, secret) in [
            ("http", self.http.enabled, &self.http.secret_key),
            ("ws", self.ws.enabled, &self.ws.secret_key),
        ] {
            if enabled && secret.trim().is_empty() {
                anyhow::bail!("{}.secretKey must be set when {} is enabled", name, name);
            }
        }
        for (name, tls) in [("http", &self.http.tls), ("ws", &self.ws.tls)] {
            if tls.cert.trim().is_empty() != tls.key.trim().is_empty() {
                anyhow::bail!("{}.tls: cert and key must be set together", name);
            }
        }
        if self.shares_port() && self.http.tls != self.ws.tls {
            anyhow::bail!(
                "http and ws share port {} and must use the same TLS settings",
                self.http.port
            );
        }
        Ok(())
    }

    /// Resolve the cache directory: explicit override, then config, then `~/.sms-bridge/data`.
    pub fn resolve_data_dir(&self, override_dir: Option<PathBuf>) -> PathBuf {
        override_dir
            .or_else(|| self.data_dir.clone())
            .unwrap_or_else(default_data_dir)
    }
}

/// Apply environment overrides: TELEGRAM_BOT_TOKEN replaces the configured bot token.
pub fn apply_env_overrides(config: &mut Config) {
    if let Some(token) = std::env::var("TELEGRAM_BOT_TOKEN")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
    {
        config.telegram.bot_token = token;
    }
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("SMS_BRIDGE_CONFIG").map(PathBuf::from).unwrap_or_else(|_| {
        dirs::home_dir()
            .map(|h| h.join(".sms-bridge").join("config.yaml"))
            .unwrap_or_else(|| PathBuf::from("config.yaml"))
    })
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".sms-bridge").join("data"))
        .unwrap_or_else(|| PathBuf::from("data"))
}

/// Parse YAML config text. Empty input yields the defaults.
pub fn parse_config(s: &str) -> Result<Config> {
    if s.trim().is_empty() {
        return Ok(Config::default());
    }
    serde_yaml::from_str(s).context("parsing config")
}

/// Load config from the given path (or the default path). Missing file => default config.
/// Environment overrides are applied. Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let mut config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        parse_config(&s).with_context(|| format!("parsing config from {}", path.display()))?
    };
    apply_env_overrides(&mut config);
    Ok((config, path))
}

/// Directory containing the config file ("." when the path has no parent).
pub fn config_dir(config_path: &Path) -> &Path {
    config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}
