//! Builder pattern for consumer configuration.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use cable_simulator::Consumer;
//!
//! # async fn example() -> cable_simulator::Result<()> {
//! let consumer = Consumer::builder()
//!     .url("ws://localhost:3000/cable")
//!     .confirmation_delay(Duration::from_millis(50))
//!     .auto_connect(true)
//!     .build()?;
//! consumer.wait_until_connected(Duration::from_secs(1)).await?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;

use crate::connection::NetworkConditions;
use crate::error::{Error, Result};
use crate::scheduler::Scheduler;
use crate::transport::{SimulatedTransport, TransportFactory};

use super::core::Consumer;
use super::options::ConsumerOptions;

// ============================================================================
// ConsumerBuilder
// ============================================================================

/// Builder for configuring a [`Consumer`].
///
/// Use [`Consumer::builder()`] to create a new builder.
#[derive(Default, Clone)]
pub struct ConsumerBuilder {
    /// Consumer options.
    options: ConsumerOptions,
    /// Custom transport factory; the simulated one is used when unset.
    transport: Option<Arc<dyn TransportFactory>>,
    /// Runtime for timers; the current one is used when unset.
    runtime: Option<Handle>,
}

impl fmt::Debug for ConsumerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerBuilder")
            .field("options", &self.options)
            .field("custom_transport", &self.transport.is_some())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// ConsumerBuilder Implementation
// ============================================================================

impl ConsumerBuilder {
    /// Creates a builder with default options.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces every option at once.
    #[inline]
    #[must_use]
    pub fn options(mut self, options: ConsumerOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the cable endpoint.
    #[inline]
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.options.url = url.into();
        self
    }

    /// Connects as part of [`build`](Self::build).
    #[inline]
    #[must_use]
    pub fn auto_connect(mut self, enabled: bool) -> Self {
        self.options.auto_connect = enabled;
        self
    }

    /// Sets the delay before the simulated transport opens.
    #[inline]
    #[must_use]
    pub fn connection_delay(mut self, delay: Duration) -> Self {
        self.options.connection_delay = delay;
        self
    }

    /// Sets the delay before subscribe commands are sent.
    #[inline]
    #[must_use]
    pub fn subscription_delay(mut self, delay: Duration) -> Self {
        self.options.subscription_delay = delay;
        self
    }

    /// Sets the automatic acknowledgement delay.
    #[inline]
    #[must_use]
    pub fn confirmation_delay(mut self, delay: Duration) -> Self {
        self.options.confirmation_delay = delay;
        self
    }

    /// Enables or disables automatic acknowledgement.
    #[inline]
    #[must_use]
    pub fn auto_confirm(mut self, enabled: bool) -> Self {
        self.options.auto_confirm = enabled;
        self
    }

    /// Makes the automatic acknowledgement reject `channel`.
    #[inline]
    #[must_use]
    pub fn reject_channel(mut self, channel: impl Into<String>) -> Self {
        self.options.rejected_channels.push(channel.into());
        self
    }

    /// Raises wire-frame logging to `debug`.
    #[inline]
    #[must_use]
    pub fn debug_logging(mut self, enabled: bool) -> Self {
        self.options.debug_logging = enabled;
        self
    }

    /// Enables or disables the envelope history.
    #[inline]
    #[must_use]
    pub fn record_history(mut self, enabled: bool) -> Self {
        self.options.record_history = enabled;
        self
    }

    /// Sets the inbound network policy.
    #[inline]
    #[must_use]
    pub fn network(mut self, conditions: NetworkConditions) -> Self {
        self.options.network = conditions;
        self
    }

    /// Uses a custom transport instead of the simulated one.
    #[inline]
    #[must_use]
    pub fn transport(mut self, factory: Arc<dyn TransportFactory>) -> Self {
        self.transport = Some(factory);
        self
    }

    /// Runs timers on `runtime` instead of the current runtime.
    #[inline]
    #[must_use]
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Builds the consumer with validation.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the options are invalid
    /// - [`Error::Config`] if no runtime is given and none is running
    /// - the transport's error if `auto_connect` is set and opening fails
    pub fn build(self) -> Result<Consumer> {
        self.options.validate()?;

        let scheduler = match self.runtime {
            Some(runtime) => Scheduler::with_runtime(runtime),
            None => Scheduler::new().map_err(|_| {
                Error::config(
                    "A tokio runtime is required. Build the consumer inside a runtime \
                     or pass one with .runtime().",
                )
            })?,
        };

        let (factory, simulated) = match self.transport {
            Some(factory) => (factory, None),
            None => {
                let simulated = Arc::new(SimulatedTransport::new(
                    scheduler.clone(),
                    self.options.connection_delay,
                ));
                let factory: Arc<dyn TransportFactory> = simulated.clone();
                (factory, Some(simulated))
            }
        };

        let consumer = Consumer::from_parts(self.options, factory, simulated, scheduler)?;
        if consumer.options().auto_connect {
            consumer.connect()?;
        }
        Ok(consumer)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::connection::ConnectionState;

    #[test]
    fn test_build_fails_without_runtime() {
        let err = ConsumerBuilder::new().build().unwrap_err();
        assert!(err.to_string().contains("runtime"));
    }

    #[test]
    fn test_build_with_explicit_runtime() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .expect("runtime");
        let consumer = ConsumerBuilder::new()
            .runtime(runtime.handle().clone())
            .build()
            .expect("consumer");
        assert_eq!(consumer.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_build_rejects_http_url() {
        let err = ConsumerBuilder::new()
            .url("http://localhost/cable")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[tokio::test]
    async fn test_build_rejects_bad_loss_rate() {
        let result = ConsumerBuilder::new()
            .network(NetworkConditions::new().with_packet_loss(1.2))
            .build();
        assert!(result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_connect() {
        let consumer = ConsumerBuilder::new()
            .auto_connect(true)
            .build()
            .expect("consumer");
        assert_eq!(consumer.connection_state(), ConnectionState::Connecting);
        consumer
            .wait_until_connected(Duration::from_secs(1))
            .await
            .expect("connected");
    }

    #[test]
    fn test_builder_is_clone() {
        let builder = ConsumerBuilder::new().reject_channel("Secret");
        let cloned = builder.clone();
        assert_eq!(builder.options, cloned.options);
    }
}
