//! Session configuration.
//!
//! Each program starts from a preset ([`SessionConfig::publisher`] or
//! [`SessionConfig::subscriber`]). With the `std` feature the preset can be
//! replaced by a JSON file named in `MQTT_SESSION_CONFIG`, and individual
//! values overridden through `MQTT_ADDRESS` and `MQTT_CLIENT_ID`. A `.env`
//! file in the working directory is honoured.
//!
//! ```json
//! {
//!     "address": "localhost:1883",
//!     "client_id": "TemporaryClientName",
//!     "keep_alive_seconds": 20,
//!     "clean_session": true,
//!     "poll_interval_ms": 10
//! }
//! ```

use core::fmt;
use heapless::String;
use serde::Deserialize;

use crate::client::ConnectOptions;
use crate::session::{MAX_ADDRESS_LEN, MAX_CLIENT_ID_LEN, SessionError, SessionIdentity};

/// Broker used by all programs unless configured otherwise.
pub const DEFAULT_ADDRESS: &str = "localhost:1883";

/// Client id of the publishing program.
pub const PUBLISHER_CLIENT_ID: &str = "TempPublisher";

/// Client id of the subscribing programs.
pub const SUBSCRIBER_CLIENT_ID: &str = "TemporaryClientName";

/// Keep-alive interval presented at connect.
pub const DEFAULT_KEEP_ALIVE_SECONDS: u16 = 20;

/// Bound on how long the control loop sleeps between flag checks.
pub const DEFAULT_POLL_INTERVAL_MS: u32 = 10;

/// Environment variable naming a JSON configuration file.
pub const CONFIG_PATH_VAR: &str = "MQTT_SESSION_CONFIG";

/// Environment variable overriding the broker address.
pub const ADDRESS_VAR: &str = "MQTT_ADDRESS";

/// Environment variable overriding the client id.
pub const CLIENT_ID_VAR: &str = "MQTT_CLIENT_ID";

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    /// The JSON document could not be parsed.
    Json(serde_json_core::de::Error),
    /// A value is empty or longer than its capacity.
    InvalidValue(&'static str),
    /// The configuration file could not be read.
    #[cfg(feature = "std")]
    Io(std::io::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Json(e) => write!(f, "invalid configuration document: {e}"),
            ConfigError::InvalidValue(field) => write!(f, "invalid value for `{field}`"),
            #[cfg(feature = "std")]
            ConfigError::Io(e) => write!(f, "cannot read configuration file: {e}"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ConfigError {}

#[cfg(feature = "defmt")]
impl defmt::Format for ConfigError {
    fn format(&self, f: defmt::Formatter) {
        match self {
            ConfigError::Json(_) => defmt::write!(f, "Json"),
            ConfigError::InvalidValue(field) => defmt::write!(f, "InvalidValue({})", field),
            #[cfg(feature = "std")]
            ConfigError::Io(_) => defmt::write!(f, "Io"),
        }
    }
}

fn default_keep_alive() -> u16 {
    DEFAULT_KEEP_ALIVE_SECONDS
}

fn default_clean_session() -> bool {
    true
}

fn default_poll_interval() -> u32 {
    DEFAULT_POLL_INTERVAL_MS
}

/// Everything needed to run one session.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SessionConfig {
    /// Broker address, `host:port`.
    pub address: String<MAX_ADDRESS_LEN>,
    /// Client identifier.
    pub client_id: String<MAX_CLIENT_ID_LEN>,
    /// Keep-alive interval in seconds.
    #[serde(default = "default_keep_alive")]
    pub keep_alive_seconds: u16,
    /// Whether the broker discards earlier session state.
    #[serde(default = "default_clean_session")]
    pub clean_session: bool,
    /// Control-loop poll bound in milliseconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u32,
}

impl SessionConfig {
    /// Builds a configuration with default connect options.
    pub fn new(address: &str, client_id: &str) -> Result<Self, ConfigError> {
        let mut config = Self {
            address: String::new(),
            client_id: String::new(),
            keep_alive_seconds: DEFAULT_KEEP_ALIVE_SECONDS,
            clean_session: true,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        };
        config.set_address(address)?;
        config.set_client_id(client_id)?;
        Ok(config)
    }

    /// Preset of the publishing program.
    pub fn publisher() -> Self {
        Self::preset(PUBLISHER_CLIENT_ID)
    }

    /// Preset of the subscribing programs.
    pub fn subscriber() -> Self {
        Self::preset(SUBSCRIBER_CLIENT_ID)
    }

    fn preset(client_id: &str) -> Self {
        let mut config = Self {
            address: String::new(),
            client_id: String::new(),
            keep_alive_seconds: DEFAULT_KEEP_ALIVE_SECONDS,
            clean_session: true,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        };
        // Both constants fit their capacities.
        let _ = config.address.push_str(DEFAULT_ADDRESS);
        let _ = config.client_id.push_str(client_id);
        config
    }

    /// Parses a JSON document. Connect options may be omitted.
    pub fn from_json(document: &[u8]) -> Result<Self, ConfigError> {
        let (config, _) =
            serde_json_core::from_slice::<SessionConfig>(document).map_err(ConfigError::Json)?;
        config.validate()?;
        Ok(config)
    }

    /// Replaces the broker address.
    pub fn set_address(&mut self, address: &str) -> Result<(), ConfigError> {
        replace(&mut self.address, address, "address")
    }

    /// Replaces the client id.
    pub fn set_client_id(&mut self, client_id: &str) -> Result<(), ConfigError> {
        replace(&mut self.client_id, client_id, "client_id")
    }

    /// Connect handshake parameters.
    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            keep_alive_seconds: self.keep_alive_seconds,
            clean_session: self.clean_session,
        }
    }

    /// Address and client id as a session identity.
    pub fn identity(&self) -> Result<SessionIdentity, SessionError> {
        SessionIdentity::new(&self.address, &self.client_id)
    }

    /// Control-loop poll bound.
    #[cfg(feature = "std")]
    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(u64::from(self.poll_interval_ms.max(1)))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.address.is_empty() {
            return Err(ConfigError::InvalidValue("address"));
        }
        if self.client_id.is_empty() {
            return Err(ConfigError::InvalidValue("client_id"));
        }
        Ok(())
    }
}

#[cfg(feature = "std")]
impl SessionConfig {
    /// Applies `MQTT_ADDRESS` and `MQTT_CLIENT_ID` as returned by `lookup`.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<std::string::String>,
    {
        if let Some(address) = lookup(ADDRESS_VAR) {
            self.set_address(&address)?;
        }
        if let Some(client_id) = lookup(CLIENT_ID_VAR) {
            self.set_client_id(&client_id)?;
        }
        Ok(self)
    }

    /// Resolves the configuration from the process environment.
    ///
    /// Loads `.env` if present, then reads the file named by
    /// `MQTT_SESSION_CONFIG` (falling back to `preset`) and finally applies
    /// the per-value overrides.
    pub fn from_env(preset: SessionConfig) -> Result<Self, ConfigError> {
        if dotenvy::dotenv().is_ok() {
            log::debug!("Loaded .env");
        }
        let base = match std::env::var(CONFIG_PATH_VAR) {
            Ok(path) => {
                log::info!("Reading configuration from {path}");
                let document = std::fs::read(&path).map_err(ConfigError::Io)?;
                Self::from_json(&document)?
            }
            Err(_) => preset,
        };
        base.with_overrides(|key| std::env::var(key).ok())
    }
}

fn replace<const N: usize>(
    target: &mut String<N>,
    value: &str,
    field: &'static str,
) -> Result<(), ConfigError> {
    if value.is_empty() {
        return Err(ConfigError::InvalidValue(field));
    }
    let mut replacement = String::new();
    replacement
        .push_str(value)
        .map_err(|_| ConfigError::InvalidValue(field))?;
    *target = replacement;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        let publisher = SessionConfig::publisher();
        assert_eq!(publisher.address.as_str(), "localhost:1883");
        assert_eq!(publisher.client_id.as_str(), "TempPublisher");

        let subscriber = SessionConfig::subscriber();
        assert_eq!(subscriber.client_id.as_str(), "TemporaryClientName");
        assert_eq!(subscriber.connect_options(), ConnectOptions::default());
    }

    #[test]
    fn test_json_defaults_connect_options() {
        let config =
            SessionConfig::from_json(br#"{"address":"broker:1883","client_id":"probe"}"#)
                .unwrap();
        assert_eq!(config.address.as_str(), "broker:1883");
        assert_eq!(config.keep_alive_seconds, 20);
        assert!(config.clean_session);
        assert_eq!(config.poll_interval_ms, 10);
    }

    #[test]
    fn test_json_rejects_empty_client_id() {
        let result = SessionConfig::from_json(br#"{"address":"broker:1883","client_id":""}"#);
        assert!(matches!(result, Err(ConfigError::InvalidValue("client_id"))));

        let result = SessionConfig::from_json(b"{not json");
        assert!(matches!(result, Err(ConfigError::Json(_))));
    }

    #[test]
    fn test_overrides_replace_values() {
        let config = SessionConfig::subscriber()
            .with_overrides(|key| match key {
                ADDRESS_VAR => Some("10.0.0.2:1884".into()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.address.as_str(), "10.0.0.2:1884");
        assert_eq!(config.client_id.as_str(), SUBSCRIBER_CLIENT_ID);

        let too_long = "x".repeat(MAX_CLIENT_ID_LEN + 1);
        let result = SessionConfig::subscriber().with_overrides(|key| match key {
            CLIENT_ID_VAR => Some(too_long.clone()),
            _ => None,
        });
        assert!(matches!(result, Err(ConfigError::InvalidValue("client_id"))));
    }
}
