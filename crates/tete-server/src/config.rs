//! Server configuration.
//!
//! Loading flow:
//! 1. Start with compiled [`ServerConfig::default()`]
//! 2. If a JSON config file exists, deep-merge its values over the defaults
//! 3. Apply `TETE_*` environment variable overrides (highest priority)
//!
//! Command-line flags are applied on top by the binary.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tete_core::LinkBuilder;
use thiserror::Error;
use tracing::debug;

/// Errors that can occur when loading the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the config file from disk.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    /// Failed to parse JSON in the config file.
    #[error("failed to parse config JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration for the relay server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind.
    pub host: String,
    /// Port to bind (`0` for auto-assign).
    pub port: u16,
    /// Scheme used in printed links.
    pub scheme: String,
    /// Public host name used in printed links.
    pub domain: String,
    /// Full link base, overriding `scheme`/`domain`/`port` when set.
    pub public_url: Option<String>,
    /// Seconds between keepalive events.
    pub keepalive_interval_secs: u64,
    /// Per-connection mailbox capacity.
    pub mailbox_capacity: usize,
    /// Id candidates tried before reporting a collision.
    pub id_attempts: u32,
    /// Largest accepted message body in bytes.
    pub max_message_size: usize,
    /// Take the origin from the first `X-Forwarded-For` entry.
    pub trust_forwarded_for: bool,
    /// `User-Agent` prefixes treated as relay clients.
    pub relay_user_agents: Vec<String>,
    /// Upper bound on graceful shutdown.
    pub shutdown_timeout_secs: u64,
    /// Default log filter.
    pub log_level: String,
    /// Emit JSON log lines.
    pub json_logs: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            scheme: "https".into(),
            domain: "localhost".into(),
            public_url: None,
            keepalive_interval_secs: 30,
            mailbox_capacity: 1,
            id_attempts: 3,
            max_message_size: 1024 * 1024, // 1 MiB
            trust_forwarded_for: false,
            relay_user_agents: vec!["curl".into()],
            shutdown_timeout_secs: 10,
            log_level: "info".into(),
            json_logs: false,
        }
    }
}

impl ServerConfig {
    /// Base for every printed link.
    pub fn links(&self) -> LinkBuilder {
        match &self.public_url {
            Some(url) => LinkBuilder::new(url.clone()),
            None => LinkBuilder::for_host(&self.scheme, &self.domain, self.port),
        }
    }

    /// Settings consumed by the conversation registry.
    pub fn relay(&self) -> RelayConfig {
        RelayConfig {
            links: self.links(),
            keepalive_interval: Duration::from_secs(self.keepalive_interval_secs.max(1)),
            mailbox_capacity: self.mailbox_capacity.max(1),
            id_attempts: self.id_attempts.max(1),
        }
    }

    /// Graceful shutdown bound.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Runtime settings of the conversation registry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelayConfig {
    /// Link base for notifications.
    pub links: LinkBuilder,
    /// Keepalive period per conversation.
    pub keepalive_interval: Duration,
    /// Per-connection mailbox capacity.
    pub mailbox_capacity: usize,
    /// Id candidates tried before reporting a collision.
    pub id_attempts: u32,
}

impl Default for RelayConfig {
    fn default() -> Self {
        ServerConfig::default().relay()
    }
}

/// Load configuration from `path` (if it exists) with env var overrides.
///
/// A missing file yields defaults; an unreadable or invalid one is an error.
pub fn load_config_from_path(path: &Path) -> Result<ServerConfig, ConfigError> {
    let defaults = serde_json::to_value(ServerConfig::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading config from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "config file not found, using defaults");
        defaults
    };

    let mut config: ServerConfig = serde_json::from_value(merged)?;
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Defaults plus env var overrides, without a file.
pub fn load_config_from_env() -> ServerConfig {
    let mut config = ServerConfig::default();
    apply_env_overrides(&mut config);
    config
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment variable overrides.
///
/// Invalid values are logged and ignored.
pub fn apply_env_overrides(config: &mut ServerConfig) {
    if let Some(v) = read_env_string("TETE_HOST") {
        config.host = v;
    }
    if let Some(v) = read_env_u64("TETE_PORT", 0, u64::from(u16::MAX)) {
        config.port = u16::try_from(v).unwrap_or(config.port);
    }
    if let Some(v) = read_env_string("TETE_SCHEME") {
        config.scheme = v;
    }
    if let Some(v) = read_env_string("TETE_DOMAIN") {
        config.domain = v;
    }
    if let Some(v) = read_env_string("TETE_PUBLIC_URL") {
        config.public_url = Some(v);
    }
    if let Some(v) = read_env_u64("TETE_KEEPALIVE_INTERVAL", 1, 3600) {
        config.keepalive_interval_secs = v;
    }
    if let Some(v) = read_env_u64("TETE_MAILBOX_CAPACITY", 1, 1024) {
        config.mailbox_capacity = usize::try_from(v).unwrap_or(config.mailbox_capacity);
    }
    if let Some(v) = read_env_u64("TETE_MAX_MESSAGE_SIZE", 1, 64 * 1024 * 1024) {
        config.max_message_size = usize::try_from(v).unwrap_or(config.max_message_size);
    }
    if let Some(v) = read_env_u64("TETE_ID_ATTEMPTS", 1, 64) {
        config.id_attempts = u32::try_from(v).unwrap_or(config.id_attempts);
    }
    if let Some(v) = read_env_string("TETE_RELAY_USER_AGENTS").map(|v| parse_list(&v)) {
        if !v.is_empty() {
            config.relay_user_agents = v;
        }
    }
    if let Some(v) = read_env_u64("TETE_SHUTDOWN_TIMEOUT", 1, 3600) {
        config.shutdown_timeout_secs = v;
    }
    if let Some(v) = read_env_bool("TETE_TRUST_FORWARDED_FOR") {
        config.trust_forwarded_for = v;
    }
    if let Some(v) = read_env_string("TETE_LOG_LEVEL") {
        config.log_level = v;
    }
    if let Some(v) = read_env_bool("TETE_JSON_LOGS") {
        config.json_logs = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Split a comma-separated list, dropping blank entries.
pub fn parse_list(val: &str) -> Vec<String> {
    val.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_owned)
        .collect()
}

// ── Env var readers ─────────────────────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_bool(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    let result = parse_bool(&val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid integer env var, ignoring");
    }
    result
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
