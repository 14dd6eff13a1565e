//! LedgerClaw configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{LedgerClawError, Result};
use crate::hash::Hash160;

/// Root engine configuration. Durations are whole seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Ledger JSON-RPC endpoint.
    #[serde(default)]
    pub rpc_endpoint: String,
    /// When set, only notifications from this contract are published.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_hash: Option<Hash160>,
    #[serde(default = "default_network_magic")]
    pub network_magic: u32,
    #[serde(default = "default_polling_interval", with = "secs")]
    pub event_polling_interval: Duration,
    #[serde(default = "default_channel_size")]
    pub max_event_channel_size: usize,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_executions: usize,
    #[serde(default = "default_execution_timeout", with = "secs")]
    pub execution_timeout: Duration,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_delay", with = "secs")]
    pub retry_delay: Duration,
    /// Most triggers one owner may hold. Unlimited when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_triggers_per_owner: Option<usize>,
    /// Upper bound on blocks scanned per polling tick when catching up.
    #[serde(default = "default_max_blocks_per_poll")]
    pub max_blocks_per_poll: u32,
    #[serde(default = "bool_true")]
    pub metrics_enabled: bool,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// SQLite database holding triggers and executions.
    #[serde(default = "default_store_path")]
    pub store_path: String,
    #[serde(default)]
    pub notify: NotifyConfig,
}

/// Outbound notification targets.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifyConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telegram_bot_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telegram_chat_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discord_webhook_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
}

fn default_network_magic() -> u32 { 769 }
fn default_polling_interval() -> Duration { Duration::from_secs(15) }
fn default_channel_size() -> usize { 1000 }
fn default_max_concurrent() -> usize { 10 }
fn default_execution_timeout() -> Duration { Duration::from_secs(300) }
fn default_retry_attempts() -> u32 { 3 }
fn default_retry_delay() -> Duration { Duration::from_secs(30) }
fn default_max_blocks_per_poll() -> u32 { 50 }
fn default_log_level() -> String { "info".into() }
fn default_store_path() -> String { "~/.ledgerclaw/triggers.db".into() }
fn bool_true() -> bool { true }

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rpc_endpoint: String::new(),
            contract_hash: None,
            network_magic: default_network_magic(),
            event_polling_interval: default_polling_interval(),
            max_event_channel_size: default_channel_size(),
            max_concurrent_executions: default_max_concurrent(),
            execution_timeout: default_execution_timeout(),
            retry_attempts: default_retry_attempts(),
            retry_delay: default_retry_delay(),
            max_triggers_per_owner: None,
            max_blocks_per_poll: default_max_blocks_per_poll(),
            metrics_enabled: true,
            log_level: default_log_level(),
            store_path: default_store_path(),
            notify: NotifyConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load config from the default path (~/.ledgerclaw/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| LedgerClawError::Config(format!("Failed to read config: {e}")))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| LedgerClawError::Config(format!("Failed to parse config: {e}")))
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| LedgerClawError::Config(format!("Failed to serialize config: {e}")))
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the LedgerClaw home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".ledgerclaw")
    }

    /// Store path with `~` expanded.
    pub fn resolved_store_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.store_path).to_string())
    }

    /// Check every bound the engine relies on. Called before the service starts.
    pub fn validate(&self) -> Result<()> {
        if self.rpc_endpoint.trim().is_empty() {
            return Err(LedgerClawError::Config("rpc_endpoint is required".into()));
        }
        let url = url::Url::parse(&self.rpc_endpoint)
            .map_err(|e| LedgerClawError::Config(format!("rpc_endpoint is not a valid URL: {e}")))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(LedgerClawError::Config(format!(
                "rpc_endpoint must use http or https, got '{}'",
                url.scheme()
            )));
        }
        if self.event_polling_interval < Duration::from_secs(1) {
            return Err(LedgerClawError::Config(
                "event polling interval must be at least 1 second".into(),
            ));
        }
        if self.max_event_channel_size < 100 {
            return Err(LedgerClawError::Config(
                "max event channel size must be at least 100".into(),
            ));
        }
        if self.max_concurrent_executions < 1 {
            return Err(LedgerClawError::Config(
                "max concurrent executions must be at least 1".into(),
            ));
        }
        if self.execution_timeout < Duration::from_secs(1) {
            return Err(LedgerClawError::Config(
                "execution timeout must be at least 1 second".into(),
            ));
        }
        if self.retry_attempts > 0 && self.retry_delay < Duration::from_secs(1) {
            return Err(LedgerClawError::Config(
                "retry delay must be at least 1 second when retries are enabled".into(),
            ));
        }
        if self.max_triggers_per_owner == Some(0) {
            return Err(LedgerClawError::Config(
                "max triggers per owner must be at least 1".into(),
            ));
        }
        if self.max_blocks_per_poll < 1 {
            return Err(LedgerClawError::Config(
                "max blocks per poll must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Serde adapter: `Duration` as whole seconds.
mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> EngineConfig {
        EngineConfig {
            rpc_endpoint: "http://localhost:10332".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults_validate_with_endpoint() {
        assert!(valid().validate().is_ok());
        assert!(EngineConfig::default().validate().is_err());
    }

    #[test]
    fn test_rejects_out_of_range_values() {
        let cases: Vec<Box<dyn Fn(&mut EngineConfig)>> = vec![
            Box::new(|c| c.rpc_endpoint = "not a url".into()),
            Box::new(|c| c.rpc_endpoint = "ftp://ledger".into()),
            Box::new(|c| c.event_polling_interval = Duration::ZERO),
            Box::new(|c| c.max_event_channel_size = 99),
            Box::new(|c| c.max_concurrent_executions = 0),
            Box::new(|c| c.execution_timeout = Duration::ZERO),
            Box::new(|c| c.retry_delay = Duration::ZERO),
            Box::new(|c| c.max_triggers_per_owner = Some(0)),
        ];
        for mutate in cases {
            let mut cfg = valid();
            mutate(&mut cfg);
            assert!(matches!(cfg.validate(), Err(LedgerClawError::Config(_))));
        }
    }

    #[test]
    fn test_zero_retries_allow_zero_delay() {
        let mut cfg = valid();
        cfg.retry_attempts = 0;
        cfg.retry_delay = Duration::ZERO;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_toml_roundtrip() {
        let toml = r#"
            rpc_endpoint = "https://rpc.example.org"
            contract_hash = "0xd2a4cff31913016155e38e474a2c06d08be276cf"
            event_polling_interval = 5
            retry_attempts = 1
            retry_delay = 2
            max_triggers_per_owner = 25

            [notify]
            webhook_url = "https://hooks.example.org/x"
        "#;
        let cfg = EngineConfig::from_toml(toml).unwrap();
        assert_eq!(cfg.event_polling_interval, Duration::from_secs(5));
        assert_eq!(cfg.retry_delay, Duration::from_secs(2));
        assert_eq!(cfg.max_concurrent_executions, 10);
        assert!(cfg.contract_hash.is_some());
        assert_eq!(cfg.max_triggers_per_owner, Some(25));
        assert_eq!(valid().max_triggers_per_owner, None);
        assert_eq!(cfg.notify.webhook_url.as_deref(), Some("https://hooks.example.org/x"));

        let again = EngineConfig::from_toml(&cfg.to_toml().unwrap()).unwrap();
        assert_eq!(again.retry_attempts, 1);
    }
}
