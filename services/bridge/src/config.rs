//! Bridge configuration loading.
//!
//! TOML is the sole config source; no environment variable overrides
//! (spec.md §6). Default config path: `/etc/chatbridge/bridge.toml`.

use std::path::Path;

use serde::Deserialize;

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub schema_version: u32,
    pub database_file: String,
    pub enable_retry_queue: bool,
    pub bridge_routes: Vec<BridgeRoute>,
    pub platform_a: PlatformAConfig,
    pub platform_b: PlatformBConfig,
    pub retry: RetryConfig,
    pub enable_miniapp_parsing: bool,
    pub show_raw_json_on_parse_fail: bool,
    pub max_json_display_length: usize,
    pub status_http_bind: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteMode {
    Group,
    Topic,
}

#[derive(Debug, Clone)]
pub struct BridgeRoute {
    pub a_conversation: String,
    pub b_conversation: i64,
    pub b_topic: Option<i64>,
    pub mode: RouteMode,
    pub show_sender_a_to_b: bool,
    pub show_sender_b_to_a: bool,
}

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub host: String,
    pub port: u16,
    pub kind: String,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl ProxyConfig {
    /// A URL reqwest/tungstenite can consume directly.
    pub fn to_url(&self) -> String {
        let auth = match (&self.user, &self.password) {
            (Some(u), Some(p)) => format!("{u}:{p}@"),
            _ => String::new(),
        };
        let scheme = match self.kind.as_str() {
            "socks5" => "socks5",
            "https" => "https",
            _ => "http",
        };
        format!("{scheme}://{auth}{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone)]
pub struct PlatformAConfig {
    pub ws_url: String,
    pub access_token: Option<String>,
    pub proxy: Option<ProxyConfig>,
    pub tls_verify: bool,
}

#[derive(Debug, Clone)]
pub struct PlatformBConfig {
    pub api_base: String,
    pub bot_token: String,
    pub poll_interval_ms: u64,
    pub proxy: Option<ProxyConfig>,
    pub tls_verify: bool,
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_send_attempts: u32,
    pub max_download_attempts: u32,
    pub retry_tick_seconds: u64,
    pub max_backoff_seconds: i64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig { max_send_attempts: 5, max_download_attempts: 3, retry_tick_seconds: 10, max_backoff_seconds: 300 }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read { path: String, source: std::io::Error },
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("no bridge_routes configured; the bridge would have nothing to do")]
    NoRoutes,
}

pub fn load(path: &Path) -> Result<BridgeConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read { path: path.display().to_string(), source })?;
    parse(&text)
}

pub fn parse(text: &str) -> Result<BridgeConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(text)?;
    raw.validate()
}

// ---------------------------------------------------------------------------
// Raw TOML deserialization types (all-Option; validated into BridgeConfig)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawConfig {
    schema_version: Option<u32>,
    database_file: Option<String>,
    enable_retry_queue: Option<bool>,
    #[serde(default)]
    bridge_routes: Vec<RawRoute>,
    platform_a: Option<RawPlatformA>,
    platform_b: Option<RawPlatformB>,
    retry: Option<RawRetry>,
    enable_miniapp_parsing: Option<bool>,
    show_raw_json_on_parse_fail: Option<bool>,
    max_json_display_length: Option<usize>,
    status_http_bind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawRoute {
    a_conversation: String,
    b_conversation: i64,
    b_topic: Option<i64>,
    mode: Option<String>,
    show_sender_a_to_b: Option<bool>,
    show_sender_b_to_a: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct RawProxy {
    host: String,
    port: u16,
    #[serde(rename = "type")]
    kind: Option<String>,
    user: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawPlatformA {
    ws_url: Option<String>,
    access_token: Option<String>,
    proxy: Option<RawProxy>,
    tls_verify: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct RawPlatformB {
    api_base: Option<String>,
    bot_token: Option<String>,
    poll_interval_ms: Option<u64>,
    proxy: Option<RawProxy>,
    tls_verify: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct RawRetry {
    max_send_attempts: Option<u32>,
    max_download_attempts: Option<u32>,
    retry_tick_seconds: Option<u64>,
    max_backoff_seconds: Option<i64>,
}

impl RawConfig {
    fn validate(self) -> Result<BridgeConfig, ConfigError> {
        if self.bridge_routes.is_empty() {
            return Err(ConfigError::NoRoutes);
        }
        let platform_a = self.platform_a.ok_or(ConfigError::MissingField("platform_a"))?;
        let platform_b = self.platform_b.ok_or(ConfigError::MissingField("platform_b"))?;

        let default_retry = RetryConfig::default();
        let retry = self.retry.map(|r| RetryConfig {
            max_send_attempts: r.max_send_attempts.unwrap_or(default_retry.max_send_attempts),
            max_download_attempts: r.max_download_attempts.unwrap_or(default_retry.max_download_attempts),
            retry_tick_seconds: r.retry_tick_seconds.unwrap_or(default_retry.retry_tick_seconds),
            max_backoff_seconds: r.max_backoff_seconds.unwrap_or(default_retry.max_backoff_seconds),
        }).unwrap_or(default_retry);

        let bridge_routes = self
            .bridge_routes
            .into_iter()
            .map(|r| BridgeRoute {
                a_conversation: r.a_conversation,
                b_conversation: r.b_conversation,
                b_topic: r.b_topic,
                mode: if r.mode.as_deref() == Some("topic") { RouteMode::Topic } else { RouteMode::Group },
                show_sender_a_to_b: r.show_sender_a_to_b.unwrap_or(true),
                show_sender_b_to_a: r.show_sender_b_to_a.unwrap_or(true),
            })
            .collect();

        Ok(BridgeConfig {
            schema_version: self.schema_version.unwrap_or(1),
            database_file: self.database_file.ok_or(ConfigError::MissingField("database_file"))?,
            enable_retry_queue: self.enable_retry_queue.unwrap_or(true),
            bridge_routes,
            platform_a: PlatformAConfig {
                ws_url: platform_a.ws_url.ok_or(ConfigError::MissingField("platform_a.ws_url"))?,
                access_token: platform_a.access_token,
                proxy: platform_a.proxy.map(raw_proxy),
                tls_verify: platform_a.tls_verify.unwrap_or(true),
            },
            platform_b: PlatformBConfig {
                api_base: platform_b.api_base.unwrap_or_else(|| "https://api.telegram.org".to_string()),
                bot_token: platform_b.bot_token.ok_or(ConfigError::MissingField("platform_b.bot_token"))?,
                poll_interval_ms: platform_b.poll_interval_ms.unwrap_or(1000),
                proxy: platform_b.proxy.map(raw_proxy),
                tls_verify: platform_b.tls_verify.unwrap_or(true),
            },
            retry,
            enable_miniapp_parsing: self.enable_miniapp_parsing.unwrap_or(true),
            show_raw_json_on_parse_fail: self.show_raw_json_on_parse_fail.unwrap_or(false),
            max_json_display_length: self.max_json_display_length.unwrap_or(500),
            status_http_bind: self.status_http_bind.unwrap_or_else(|| "127.0.0.1:8090".to_string()),
        })
    }
}

fn raw_proxy(p: RawProxy) -> ProxyConfig {
    ProxyConfig { host: p.host, port: p.port, kind: p.kind.unwrap_or_else(|| "http".to_string()), user: p.user, password: p.password }
}
