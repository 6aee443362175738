//! Process configuration loaded from TOML.
//!
//! ```toml
//! service_name = "bookings"
//!
//! [bus]
//! max_retries = 5
//! retry_delay_ms = 500
//!
//! [client]
//! retries = 2
//!
//! [client.circuit_breaker]
//! failure_threshold = 3
//!
//! [services]
//! reviews = "http://reviews:8080"
//! contracts = "http://contracts:8080"
//! ```
//!
//! Every section is optional; missing keys fall back to their defaults.

use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::bus::BusConfig;
use crate::client::ServiceClientConfig;

/// Environment variable overriding `service_name`.
pub const SERVICE_NAME_ENV: &str = "INTERLINK_SERVICE_NAME";

/// Error type for configuration and registry lookups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A service name was looked up that was never registered.
    UnknownService(String),
    /// The configuration source could not be read.
    Io(String),
    /// The configuration could not be parsed.
    Parse(String),
    /// A value is present but unusable.
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::UnknownService(name) => write!(f, "service {:?} is not registered", name),
            ConfigError::Io(msg) => write!(f, "cannot read configuration: {}", msg),
            ConfigError::Parse(msg) => write!(f, "invalid configuration: {}", msg),
            ConfigError::Invalid(msg) => write!(f, "invalid configuration value: {}", msg),
        }
    }
}

impl Error for ConfigError {}

/// Top-level settings for one service process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// This service's identity: consumer group name, event source, and the
    /// `x-service-name` header on outbound calls.
    pub service_name: String,
    pub bus: BusConfig,
    pub client: ServiceClientConfig,
    /// Downstream services by logical name → base URL.
    pub services: BTreeMap<String, String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            service_name: "service".to_string(),
            bus: BusConfig::default(),
            client: ServiceClientConfig::default(),
            services: BTreeMap::new(),
        }
    }
}

impl Settings {
    /// Parse settings from a TOML document, then apply environment overrides.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let mut settings: Settings =
            toml::from_str(source).map_err(|e| ConfigError::Parse(e.to_string()))?;
        settings.apply_env();
        settings.validate()?;
        Ok(settings)
    }

    /// Read and parse a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&source)
    }

    fn apply_env(&mut self) {
        if let Ok(name) = std::env::var(SERVICE_NAME_ENV) {
            if !name.trim().is_empty() {
                self.service_name = name;
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.trim().is_empty() {
            return Err(ConfigError::Invalid("service_name must not be empty".into()));
        }
        if self.client.circuit_breaker.failure_threshold == 0 {
            return Err(ConfigError::Invalid(
                "circuit_breaker.failure_threshold must be at least 1".into(),
            ));
        }
        for (name, url) in &self.services {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::Invalid(format!(
                    "service {} has non-http url {}",
                    name, url
                )));
            }
        }
        Ok(())
    }
}

/// Serde helper: `Duration` as integer milliseconds.
pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
