//! Configuration system for the rendezvous relay.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $RENDEZVOUS_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/rendezvous/config.toml
//!   3. ~/.config/rendezvous/config.toml

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RendezvousConfig {
    pub network: NetworkConfig,
    pub auth: AuthConfig,
    pub registry: RegistryConfig,
    pub overlay: OverlayConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address the signaling and status server listens on.
    pub listen: SocketAddr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub mode: AuthMode,
    /// Text clients sign to log in. In nonce mode a per-connection nonce is
    /// appended.
    pub challenge: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// One public challenge for every login. Signatures are replayable.
    #[default]
    Fixed,
    /// Each connection gets its own challenge, rotated after every login.
    Nonce,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub policy: BindingPolicy,
}

/// How many connections may be bound to one address.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindingPolicy {
    /// Any number (several devices per identity); relays skip the sender.
    #[default]
    Multi,
    /// One; a new login evicts the previous binding.
    Single,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    pub enabled: bool,
    /// Address overlay links are accepted on.
    pub listen: SocketAddr,
    /// Relay nodes to dial at startup and re-dial when the link drops.
    pub bootstrap: Vec<String>,
    pub scope: BroadcastScope,
    pub redial_secs: u64,
    /// How long a lookup join for an unbound address is kept.
    pub lookup_ttl_secs: u64,
    /// Most lookup joins held at once; the oldest is dropped past this.
    pub max_lookups: usize,
}

/// Which overlay links receive a fallback broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BroadcastScope {
    /// Every open link.
    #[default]
    All,
    /// Only links that announced the target's topic.
    Topic,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

pub const DEFAULT_CHALLENGE: &str = "Sign in to rendezvous";

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 3000)),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mode: AuthMode::Fixed,
            challenge: DEFAULT_CHALLENGE.to_string(),
        }
    }
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: SocketAddr::from(([0, 0, 0, 0], 3001)),
            bootstrap: Vec::new(),
            scope: BroadcastScope::All,
            redial_secs: 5,
            lookup_ttl_secs: 120,
            max_lookups: 1024,
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("rendezvous")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("invalid value for {0}: {1:?}")]
    InvalidOverride(&'static str, String),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl RendezvousConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::file_path(), |key| std::env::var(key).ok())
    }

    /// Load from `path` (defaults when it does not exist), then apply
    /// overrides from `lookup`. Any unreadable file, parse error or bad
    /// override is an error, never a silent fallback.
    pub fn load_from<F>(path: &Path, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
            Self::from_toml(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?
        } else {
            RendezvousConfig::default()
        };
        config.apply_overrides(lookup)?;
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("RENDEZVOUS_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&RendezvousConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply RENDEZVOUS_* overrides. `lookup` is `std::env::var` in
    /// production; tests pass a map so they never touch process env.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("RENDEZVOUS_NETWORK__LISTEN") {
            self.network.listen = parse_override("RENDEZVOUS_NETWORK__LISTEN", &v)?;
        }
        if let Some(v) = lookup("RENDEZVOUS_AUTH__MODE") {
            self.auth.mode = match v.as_str() {
                "fixed" => AuthMode::Fixed,
                "nonce" => AuthMode::Nonce,
                _ => return Err(ConfigError::InvalidOverride("RENDEZVOUS_AUTH__MODE", v)),
            };
        }
        if let Some(v) = lookup("RENDEZVOUS_AUTH__CHALLENGE") {
            self.auth.challenge = v;
        }
        if let Some(v) = lookup("RENDEZVOUS_REGISTRY__POLICY") {
            self.registry.policy = match v.as_str() {
                "multi" => BindingPolicy::Multi,
                "single" => BindingPolicy::Single,
                _ => return Err(ConfigError::InvalidOverride("RENDEZVOUS_REGISTRY__POLICY", v)),
            };
        }
        if let Some(v) = lookup("RENDEZVOUS_OVERLAY__ENABLED") {
            self.overlay.enabled = v == "true" || v == "1";
        }
        if let Some(v) = lookup("RENDEZVOUS_OVERLAY__LISTEN") {
            self.overlay.listen = parse_override("RENDEZVOUS_OVERLAY__LISTEN", &v)?;
        }
        if let Some(v) = lookup("RENDEZVOUS_OVERLAY__BOOTSTRAP") {
            self.overlay.bootstrap = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(v) = lookup("RENDEZVOUS_OVERLAY__SCOPE") {
            self.overlay.scope = match v.as_str() {
                "all" => BroadcastScope::All,
                "topic" => BroadcastScope::Topic,
                _ => return Err(ConfigError::InvalidOverride("RENDEZVOUS_OVERLAY__SCOPE", v)),
            };
        }
        Ok(())
    }
}

fn parse_override<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::InvalidOverride(key, value.to_string()))
}
