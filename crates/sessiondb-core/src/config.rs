//! Store configuration
//!
//! `DatabaseSettings` carries the three values needed to reach the backing store
//! (endpoint, principal, credential). They are read once when the store is built;
//! if any is missing the store runs as a no-op instead of failing the host.
//!
//! `StoreConfig` tunes the facade itself: write failure policy, timeouts and the
//! chunk size used for expiry scans.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::{Error, Result};

pub const ENV_URL: &str = "SESSIONDB_URL";
pub const ENV_USERNAME: &str = "SESSIONDB_USERNAME";
pub const ENV_PASSWORD: &str = "SESSIONDB_PASSWORD";

/// Connection settings for the backing store
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default)]
    pub principal: Option<String>,

    #[serde(default)]
    pub credential: Option<String>,
}

/// Fully resolved settings, only produced when every value is present
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionTarget {
    pub endpoint: String,
    pub principal: String,
    pub credential: String,
}

impl DatabaseSettings {
    pub fn new(
        endpoint: impl Into<String>,
        principal: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            principal: Some(principal.into()),
            credential: Some(credential.into()),
        }
    }

    /// Read settings from `SESSIONDB_URL`, `SESSIONDB_USERNAME` and `SESSIONDB_PASSWORD`
    pub fn from_env() -> Self {
        Self {
            endpoint: read_env(ENV_URL),
            principal: read_env(ENV_USERNAME),
            credential: read_env(ENV_PASSWORD),
        }
    }

    /// Override values with any set in the environment
    pub fn merge_env(&mut self) {
        let env = Self::from_env();
        if env.endpoint.is_some() {
            self.endpoint = env.endpoint;
        }
        if env.principal.is_some() {
            self.principal = env.principal;
        }
        if env.credential.is_some() {
            self.credential = env.credential;
        }
    }

    /// Names of the settings that are not present
    pub fn missing(&self, requires_credentials: bool) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.endpoint.is_none() {
            missing.push("endpoint");
        }
        if requires_credentials {
            if self.principal.is_none() {
                missing.push("principal");
            }
            if self.credential.is_none() {
                missing.push("credential");
            }
        }
        missing
    }

    /// Resolve to a target, or `None` when the store should degrade to a no-op
    ///
    /// Backends that authenticate without credentials (e.g. a local SQLite file)
    /// pass `requires_credentials = false` and get empty strings instead.
    pub fn target(&self, requires_credentials: bool) -> Option<ConnectionTarget> {
        if !self.missing(requires_credentials).is_empty() {
            return None;
        }
        Some(ConnectionTarget {
            endpoint: self.endpoint.clone()?,
            principal: self.principal.clone().unwrap_or_default(),
            credential: self.credential.clone().unwrap_or_default(),
        })
    }

    /// Like [`target`](Self::target) but reports what is missing
    ///
    /// # Errors
    /// - `Error::ConfigurationMissing` listing the absent settings
    pub fn require(&self, requires_credentials: bool) -> Result<ConnectionTarget> {
        self.target(requires_credentials).ok_or_else(|| {
            Error::ConfigurationMissing(self.missing(requires_credentials).join(", "))
        })
    }
}

fn read_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl fmt::Debug for DatabaseSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseSettings")
            .field("endpoint", &self.endpoint)
            .field("principal", &self.principal)
            .field("credential", &self.credential.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl fmt::Debug for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionTarget")
            .field("endpoint", &self.endpoint)
            .field("principal", &self.principal)
            .field("credential", &"<redacted>")
            .finish()
    }
}

/// What `store()` does when no connection can be obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteFailurePolicy {
    /// Log and drop the write; the host retries on its own schedule
    #[default]
    BestEffort,
    /// Return the acquisition error to the host
    Strict,
}

/// Facade configuration
///
/// # Example
/// ```
/// use sessiondb_core::{StoreConfig, WriteFailurePolicy};
/// use std::time::Duration;
///
/// let config = StoreConfig::default()
///     .with_write_policy(WriteFailurePolicy::Strict)
///     .with_operation_timeout(Some(Duration::from_secs(5)));
/// assert_eq!(config.expiry_scan_batch_size, 500);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub write_policy: WriteFailurePolicy,

    /// Upper bound for a single query; `None` waits forever
    #[serde(default = "default_operation_timeout", with = "duration_ms")]
    pub operation_timeout: Option<Duration>,

    /// Upper bound for pool construction plus acquisition
    #[serde(default = "default_acquire_timeout", with = "duration_ms")]
    pub acquire_timeout: Option<Duration>,

    /// Maximum number of candidate ids bound into one expiry scan statement
    #[serde(default = "default_expiry_scan_batch_size")]
    pub expiry_scan_batch_size: usize,
}

fn default_operation_timeout() -> Option<Duration> {
    Some(Duration::from_secs(30))
}

fn default_acquire_timeout() -> Option<Duration> {
    Some(Duration::from_secs(10))
}

fn default_expiry_scan_batch_size() -> usize {
    500
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            write_policy: WriteFailurePolicy::default(),
            operation_timeout: default_operation_timeout(),
            acquire_timeout: default_acquire_timeout(),
            expiry_scan_batch_size: default_expiry_scan_batch_size(),
        }
    }
}

impl StoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_write_policy(mut self, policy: WriteFailurePolicy) -> Self {
        self.write_policy = policy;
        self
    }

    pub fn with_operation_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Set the expiry scan chunk size (clamped to at least 1)
    pub fn with_expiry_scan_batch_size(mut self, size: usize) -> Self {
        self.expiry_scan_batch_size = size.max(1);
        self
    }

    /// # Errors
    /// - `Error::Config` for values the store cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.expiry_scan_batch_size == 0 {
            return Err(Error::Config(
                "expiry_scan_batch_size must be greater than zero".to_string(),
            ));
        }
        if self.operation_timeout == Some(Duration::ZERO) {
            return Err(Error::Config(
                "operation_timeout must be greater than zero (omit it to disable)".to_string(),
            ));
        }
        if self.acquire_timeout == Some(Duration::ZERO) {
            return Err(Error::Config(
                "acquire_timeout must be greater than zero (omit it to disable)".to_string(),
            ));
        }
        Ok(())
    }
}

/// Optional durations as integer milliseconds in config files
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        // SAFETY: serialized by #[serial]; no other thread reads these vars
        unsafe {
            std::env::remove_var(ENV_URL);
            std::env::remove_var(ENV_USERNAME);
            std::env::remove_var(ENV_PASSWORD);
        }
    }

    #[test]
    fn test_default_config() {
        let config = StoreConfig::default();
        assert_eq!(config.write_policy, WriteFailurePolicy::BestEffort);
        assert_eq!(config.operation_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.acquire_timeout, Some(Duration::from_secs(10)));
        assert_eq!(config.expiry_scan_batch_size, 500);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_pattern() {
        let config = StoreConfig::new()
            .with_write_policy(WriteFailurePolicy::Strict)
            .with_operation_timeout(None)
            .with_expiry_scan_batch_size(0);

        assert_eq!(config.write_policy, WriteFailurePolicy::Strict);
        assert_eq!(config.operation_timeout, None);
        assert_eq!(config.expiry_scan_batch_size, 1);

        // Other values should remain at defaults
        assert_eq!(config.acquire_timeout, Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let config = StoreConfig::new().with_operation_timeout(Some(Duration::ZERO));
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_config_from_yaml() {
        let yaml = r#"
write_policy: strict
operation_timeout: 2500
expiry_scan_batch_size: 100
"#;
        let config: StoreConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.write_policy, WriteFailurePolicy::Strict);
        assert_eq!(config.operation_timeout, Some(Duration::from_millis(2500)));
        assert_eq!(config.acquire_timeout, Some(Duration::from_secs(10)));
        assert_eq!(config.expiry_scan_batch_size, 100);
    }

    #[test]
    fn test_target_requires_all_values() {
        let settings = DatabaseSettings {
            endpoint: Some("postgres://localhost/sessions".to_string()),
            principal: Some("admin".to_string()),
            credential: None,
        };
        assert!(settings.target(true).is_none());
        assert_eq!(settings.missing(true), vec!["credential"]);
        assert!(settings.target(false).is_some());

        let err = settings.require(true).unwrap_err();
        assert_eq!(err.to_string(), "No database configured: missing credential");
    }

    #[test]
    fn test_debug_redacts_credential() {
        let settings = DatabaseSettings::new("sqlite://sessions.db", "admin", "hunter2");
        let rendered = format!("{:?}", settings);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));

        let target = settings.require(true).unwrap();
        assert!(!format!("{:?}", target).contains("hunter2"));
    }

    #[test]
    #[serial]
    fn test_from_env() {
        clear_env();
        assert_eq!(DatabaseSettings::from_env(), DatabaseSettings::default());

        // SAFETY: serialized by #[serial]
        unsafe {
            std::env::set_var(ENV_URL, "postgres://db/sessions");
            std::env::set_var(ENV_USERNAME, "admin");
            std::env::set_var(ENV_PASSWORD, "   ");
        }
        let settings = DatabaseSettings::from_env();
        assert_eq!(settings.endpoint.as_deref(), Some("postgres://db/sessions"));
        assert_eq!(settings.principal.as_deref(), Some("admin"));
        // Blank values count as missing
        assert_eq!(settings.credential, None);
        clear_env();
    }

    #[test]
    #[serial]
    fn test_merge_env_overrides() {
        clear_env();
        let mut settings = DatabaseSettings::new("sqlite://a.db", "file-user", "file-pass");
        // SAFETY: serialized by #[serial]
        unsafe {
            std::env::set_var(ENV_USERNAME, "env-user");
        }
        settings.merge_env();
        assert_eq!(settings.endpoint.as_deref(), Some("sqlite://a.db"));
        assert_eq!(settings.principal.as_deref(), Some("env-user"));
        assert_eq!(settings.credential.as_deref(), Some("file-pass"));
        clear_env();
    }
}
