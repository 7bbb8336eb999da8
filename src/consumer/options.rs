//! Consumer configuration.
//!
//! [`ConsumerOptions`] is the typed configuration of a consumer. It can be
//! assembled with `with_*` methods or parsed from the JSON object accepted by
//! test-command adapters:
//!
//! ```json
//! {
//!   "autoConnect": true,
//!   "connectionDelaySeconds": 0.1,
//!   "subscriptionDelaySeconds": 0,
//!   "debugLogging": false,
//!   "recordHistory": true,
//!   "networkSimulation": {
//!     "enabled": true,
//!     "latencyMillis": [20, 80],
//!     "packetLossRate": 0.05
//!   }
//! }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::connection::{Latency, NetworkConditions};
use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Default cable endpoint.
pub const DEFAULT_URL: &str = "ws://localhost:3000/cable";

/// Subprotocols offered by the Action Cable JavaScript client.
pub const DEFAULT_PROTOCOLS: [&str; 2] = ["actioncable-v1-json", "actioncable-unsupported"];

// ============================================================================
// ConsumerOptions
// ============================================================================

/// Consumer configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumerOptions {
    /// Cable endpoint; must use `ws` or `wss`.
    pub url: String,

    /// Subprotocols requested from the transport.
    pub protocols: Vec<String>,

    /// Connect as soon as the consumer is built.
    pub auto_connect: bool,

    /// Delay before the simulated transport reports `open`.
    pub connection_delay: Duration,

    /// Delay between `subscribe` and the subscribe command.
    pub subscription_delay: Duration,

    /// Delay before the simulated server acknowledges a subscribe command.
    pub confirmation_delay: Duration,

    /// Acknowledge subscribe commands automatically.
    pub auto_confirm: bool,

    /// Channels the automatic acknowledgement rejects.
    pub rejected_channels: Vec<String>,

    /// Log every wire frame at `debug` instead of `trace`.
    pub debug_logging: bool,

    /// Keep an envelope history.
    pub record_history: bool,

    /// Inbound network policy.
    pub network: NetworkConditions,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            protocols: DEFAULT_PROTOCOLS.iter().map(ToString::to_string).collect(),
            auto_connect: false,
            connection_delay: Duration::ZERO,
            subscription_delay: Duration::ZERO,
            confirmation_delay: Duration::ZERO,
            auto_confirm: true,
            rejected_channels: Vec::new(),
            debug_logging: false,
            record_history: true,
            network: NetworkConditions::default(),
        }
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl ConsumerOptions {
    /// Creates options with default settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses the adapter's JSON configuration object.
    ///
    /// Missing keys keep their defaults.
    ///
    /// # Errors
    ///
    /// - [`Error::Json`] if `json` is not a valid configuration object
    /// - [`Error::Config`] if a value is out of range
    pub fn from_json(json: &str) -> Result<Self> {
        let config: AdapterConfig = serde_json::from_str(json)?;
        let options = config.into_options()?;
        options.validate()?;
        Ok(options)
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl ConsumerOptions {
    /// Sets the cable endpoint.
    #[inline]
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Replaces the requested subprotocols.
    #[must_use]
    pub fn with_protocols(mut self, protocols: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.protocols = protocols.into_iter().map(Into::into).collect();
        self
    }

    /// Connects when the consumer is built.
    #[inline]
    #[must_use]
    pub fn with_auto_connect(mut self, auto_connect: bool) -> Self {
        self.auto_connect = auto_connect;
        self
    }

    /// Sets the transport open delay.
    #[inline]
    #[must_use]
    pub fn with_connection_delay(mut self, delay: Duration) -> Self {
        self.connection_delay = delay;
        self
    }

    /// Sets the delay before subscribe commands are sent.
    #[inline]
    #[must_use]
    pub fn with_subscription_delay(mut self, delay: Duration) -> Self {
        self.subscription_delay = delay;
        self
    }

    /// Sets the automatic acknowledgement delay.
    #[inline]
    #[must_use]
    pub fn with_confirmation_delay(mut self, delay: Duration) -> Self {
        self.confirmation_delay = delay;
        self
    }

    /// Enables or disables automatic acknowledgement.
    #[inline]
    #[must_use]
    pub fn with_auto_confirm(mut self, auto_confirm: bool) -> Self {
        self.auto_confirm = auto_confirm;
        self
    }

    /// Makes the automatic acknowledgement reject `channel`.
    #[inline]
    #[must_use]
    pub fn with_rejected_channel(mut self, channel: impl Into<String>) -> Self {
        self.rejected_channels.push(channel.into());
        self
    }

    /// Raises wire-frame logging to `debug`.
    #[inline]
    #[must_use]
    pub fn with_debug_logging(mut self, enabled: bool) -> Self {
        self.debug_logging = enabled;
        self
    }

    /// Enables or disables the envelope history.
    #[inline]
    #[must_use]
    pub fn with_record_history(mut self, enabled: bool) -> Self {
        self.record_history = enabled;
        self
    }

    /// Sets the inbound network policy.
    #[inline]
    #[must_use]
    pub fn with_network(mut self, network: NetworkConditions) -> Self {
        self.network = network;
        self
    }
}

// ============================================================================
// Validation
// ============================================================================

impl ConsumerOptions {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the URL is not a `ws`/`wss` URL or the
    /// network conditions are out of range.
    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.url)
            .map_err(|e| Error::config(format!("Invalid cable URL '{}': {e}", self.url)))?;

        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(Error::config(format!(
                "Cable URL must use ws or wss, got '{}'",
                url.scheme()
            )));
        }

        self.network.validate().map_err(Error::config)
    }
}

// ============================================================================
// Adapter configuration
// ============================================================================

/// JSON shape accepted by [`ConsumerOptions::from_json`].
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct AdapterConfig {
    url: Option<String>,
    auto_connect: Option<bool>,
    connection_delay_seconds: Option<f64>,
    subscription_delay_seconds: Option<f64>,
    confirmation_delay_seconds: Option<f64>,
    auto_confirm: Option<bool>,
    rejected_channels: Option<Vec<String>>,
    debug_logging: Option<bool>,
    record_history: Option<bool>,
    network_simulation: Option<NetworkSimulationConfig>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct NetworkSimulationConfig {
    enabled: bool,
    latency_millis: Option<LatencyMillis>,
    packet_loss_rate: Option<f64>,
    seed: Option<u64>,
}

/// `latencyMillis` is either a number or a `[min, max]` pair.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LatencyMillis {
    Fixed(u64),
    Range([u64; 2]),
}

impl AdapterConfig {
    fn into_options(self) -> Result<ConsumerOptions> {
        let defaults = ConsumerOptions::default();
        let network = match self.network_simulation {
            Some(config) => config.into_conditions(),
            None => defaults.network.clone(),
        };

        Ok(ConsumerOptions {
            url: self.url.unwrap_or(defaults.url),
            protocols: defaults.protocols,
            auto_connect: self.auto_connect.unwrap_or(defaults.auto_connect),
            connection_delay: seconds(self.connection_delay_seconds, "connectionDelaySeconds")?,
            subscription_delay: seconds(
                self.subscription_delay_seconds,
                "subscriptionDelaySeconds",
            )?,
            confirmation_delay: seconds(
                self.confirmation_delay_seconds,
                "confirmationDelaySeconds",
            )?,
            auto_confirm: self.auto_confirm.unwrap_or(defaults.auto_confirm),
            rejected_channels: self.rejected_channels.unwrap_or_default(),
            debug_logging: self.debug_logging.unwrap_or(defaults.debug_logging),
            record_history: self.record_history.unwrap_or(defaults.record_history),
            network,
        })
    }
}

impl NetworkSimulationConfig {
    fn into_conditions(self) -> NetworkConditions {
        let latency = match self.latency_millis {
            None => Latency::None,
            Some(LatencyMillis::Fixed(ms)) => Latency::Fixed(Duration::from_millis(ms)),
            Some(LatencyMillis::Range([min, max])) => Latency::Range {
                min: Duration::from_millis(min),
                max: Duration::from_millis(max),
            },
        };

        NetworkConditions {
            enabled: self.enabled,
            latency,
            packet_loss_rate: self.packet_loss_rate.unwrap_or(0.0),
            seed: self.seed,
        }
    }
}

/// Converts an optional seconds value, rejecting negative or non-finite input.
fn seconds(value: Option<f64>, key: &str) -> Result<Duration> {
    match value {
        None => Ok(Duration::ZERO),
        Some(secs) => Duration::try_from_secs_f64(secs)
            .map_err(|e| Error::config(format!("{key} must be a non-negative number: {e}"))),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = ConsumerOptions::default();
        assert_eq!(options.url, DEFAULT_URL);
        assert_eq!(
            options.protocols,
            vec!["actioncable-v1-json", "actioncable-unsupported"]
        );
        assert!(options.auto_confirm);
        assert!(options.record_history);
        assert!(!options.network.enabled);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_from_json_full() {
        let options = ConsumerOptions::from_json(
            r#"{
                "autoConnect": true,
                "connectionDelaySeconds": 0.25,
                "subscriptionDelaySeconds": 1,
                "debugLogging": true,
                "recordHistory": false,
                "networkSimulation": {
                    "enabled": true,
                    "latencyMillis": [20, 80],
                    "packetLossRate": 0.1
                }
            }"#,
        )
        .expect("valid config");

        assert!(options.auto_connect);
        assert_eq!(options.connection_delay, Duration::from_millis(250));
        assert_eq!(options.subscription_delay, Duration::from_secs(1));
        assert!(options.debug_logging);
        assert!(!options.record_history);
        assert!(options.network.enabled);
        assert_eq!(
            options.network.latency,
            Latency::Range {
                min: Duration::from_millis(20),
                max: Duration::from_millis(80)
            }
        );
        assert!((options.network.packet_loss_rate - 0.1).abs() < f64::EPSILON);
    }

    #[test]
    fn test_from_json_fixed_latency() {
        let options =
            ConsumerOptions::from_json(r#"{"networkSimulation":{"enabled":true,"latencyMillis":50}}"#)
                .expect("valid config");
        assert_eq!(
            options.network.latency,
            Latency::Fixed(Duration::from_millis(50))
        );
    }

    #[test]
    fn test_from_json_empty_keeps_defaults() {
        let options = ConsumerOptions::from_json("{}").expect("valid config");
        assert_eq!(options, ConsumerOptions::default());
    }

    #[test]
    fn test_from_json_rejects_bad_values() {
        assert!(ConsumerOptions::from_json(r#"{"connectionDelaySeconds":-1}"#).is_err());
        assert!(
            ConsumerOptions::from_json(r#"{"networkSimulation":{"packetLossRate":2}}"#).is_err()
        );
        assert!(ConsumerOptions::from_json("not json").is_err());
    }

    #[test]
    fn test_validate_scheme() {
        let err = ConsumerOptions::new()
            .with_url("http://localhost/cable")
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("ws or wss"));
        assert!(ConsumerOptions::new().with_url("not a url").validate().is_err());
        assert!(
            ConsumerOptions::new()
                .with_url("wss://example.com/cable")
                .validate()
                .is_ok()
        );
    }

    #[test]
    fn test_builder_methods() {
        let options = ConsumerOptions::new()
            .with_rejected_channel("Secret")
            .with_auto_confirm(false)
            .with_protocols(["custom"]);
        assert_eq!(options.rejected_channels, vec!["Secret"]);
        assert!(!options.auto_confirm);
        assert_eq!(options.protocols, vec!["custom"]);
    }
}
