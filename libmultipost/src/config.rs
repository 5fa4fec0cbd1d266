//! Configuration management for Multipost

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::accounts::Account;
use crate::error::{ConfigError, Result};
use crate::types::WebsiteId;

/// Environment variable overriding the configuration file location
pub const CONFIG_ENV: &str = "MULTIPOST_CONFIG";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub posting: PostingConfig,
    #[serde(default)]
    pub accounts: Vec<Account>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(
        default = "default_timeout",
        serialize_with = "serialize_duration",
        deserialize_with = "deserialize_duration"
    )]
    pub timeout: Duration,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_redirect_limit")]
    pub redirect_limit: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            user_agent: default_user_agent(),
            redirect_limit: default_redirect_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostingConfig {
    /// Append the advertisement to descriptions where the website allows it
    #[serde(default = "default_true")]
    pub advertise: bool,
    /// Per-website replacements for the adapter's wait between posts, keyed
    /// by website key (`furaffinity = "90s"`)
    #[serde(default)]
    pub wait_overrides: HashMap<String, HumanDuration>,
}

impl Default for PostingConfig {
    fn default() -> Self {
        Self {
            advertise: true,
            wait_overrides: HashMap::new(),
        }
    }
}

impl PostingConfig {
    pub fn wait_override(&self, website: WebsiteId) -> Option<Duration> {
        self.wait_overrides.get(website.as_str()).map(|d| d.0)
    }
}

/// Duration written as a humantime string (`"90s"`, `"2m 30s"`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HumanDuration(pub Duration);

impl Serialize for HumanDuration {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serialize_duration(&self.0, serializer)
    }
}

impl<'de> Deserialize<'de> for HumanDuration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserialize_duration(deserializer).map(HumanDuration)
    }
}

fn serialize_duration<S: Serializer>(duration: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&humantime::format_duration(*duration).to_string())
}

fn deserialize_duration<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Duration, D::Error> {
    let raw = String::deserialize(deserializer)?;
    humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_user_agent() -> String {
    format!("multipost/{}", env!("CARGO_PKG_VERSION"))
}

fn default_redirect_limit() -> usize {
    10
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(ConfigError::ParseError)?;
        config.check_accounts()?;
        Ok(config)
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self::default()
    }

    pub fn account(&self, id: &str) -> Option<&Account> {
        self.accounts.iter().find(|a| a.id == id)
    }

    fn check_accounts(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for account in &self.accounts {
            if account.id.trim().is_empty() {
                return Err(ConfigError::MissingField("accounts.id".to_string()).into());
            }
            if !seen.insert(account.id.as_str()) {
                return Err(ConfigError::InvalidValue {
                    field: "accounts.id".to_string(),
                    message: format!("duplicate account id '{}'", account.id),
                }
                .into());
            }
        }
        Ok(())
    }
}

/// Resolve the configuration file path following the XDG Base Directory layout
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("multipost").join("config.toml"))
}
