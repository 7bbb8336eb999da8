//! Network-condition simulation.
//!
//! A policy layer between the transport and the registry. Inbound data
//! messages are first put through [`NetworkSimulator::admit`], which either
//! drops them (packet loss) or releases them after a delay (latency).
//! Interruptions are configured per call with [`InterruptionOptions`].

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

// ============================================================================
// Latency
// ============================================================================

/// Delay applied to inbound messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Latency {
    /// Deliver immediately.
    #[default]
    None,
    /// Constant delay.
    Fixed(Duration),
    /// Uniformly distributed delay in `[min, max]`.
    Range {
        /// Lower bound.
        min: Duration,
        /// Upper bound.
        max: Duration,
    },
}

// ============================================================================
// NetworkConditions
// ============================================================================

/// Adverse-network settings.
///
/// All effects are off by default.
///
/// # Example
///
/// ```ignore
/// let conditions = NetworkConditions::new()
///     .with_latency_range(Duration::from_millis(20), Duration::from_millis(80))
///     .with_packet_loss(0.1)
///     .with_seed(42);
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NetworkConditions {
    /// Master switch; when off, messages pass straight through.
    pub enabled: bool,

    /// Inbound latency.
    pub latency: Latency,

    /// Probability in `[0, 1]` of dropping an inbound message.
    pub packet_loss_rate: f64,

    /// Seed for loss and jitter draws. Random when unset.
    pub seed: Option<u64>,
}

impl NetworkConditions {
    /// Creates disabled conditions.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables a constant latency.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.enabled = true;
        self.latency = Latency::Fixed(latency);
        self
    }

    /// Enables a latency drawn uniformly from `[min, max]`.
    #[must_use]
    pub fn with_latency_range(mut self, min: Duration, max: Duration) -> Self {
        self.enabled = true;
        self.latency = Latency::Range { min, max };
        self
    }

    /// Enables packet loss at `rate`.
    #[must_use]
    pub fn with_packet_loss(mut self, rate: f64) -> Self {
        self.enabled = true;
        self.packet_loss_rate = rate;
        self
    }

    /// Fixes the random seed.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Turns the simulation on or off without touching its settings.
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Validates the settings.
    ///
    /// # Errors
    ///
    /// Returns error message if validation fails.
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.packet_loss_rate) {
            return Err(format!(
                "Packet loss rate must be within [0, 1], got {}",
                self.packet_loss_rate
            ));
        }
        if let Latency::Range { min, max } = self.latency
            && min > max
        {
            return Err(format!(
                "Latency range is inverted: min {}ms > max {}ms",
                min.as_millis(),
                max.as_millis()
            ));
        }
        Ok(())
    }
}

// ============================================================================
// InterruptionOptions
// ============================================================================

/// Settings for one simulated outage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterruptionOptions {
    /// How long the connection stays down.
    pub duration: Duration,
    /// Whether to reconnect once `duration` elapses.
    pub reconnect: bool,
}

impl InterruptionOptions {
    /// Creates an outage of `duration` followed by a reconnect.
    #[inline]
    #[must_use]
    pub const fn new(duration: Duration) -> Self {
        Self {
            duration,
            reconnect: true,
        }
    }

    /// Sets whether to reconnect afterwards.
    #[inline]
    #[must_use]
    pub const fn reconnect(mut self, reconnect: bool) -> Self {
        self.reconnect = reconnect;
        self
    }
}

impl Default for InterruptionOptions {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

// ============================================================================
// Admission
// ============================================================================

/// Verdict for one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Route after the given delay.
    Deliver(Duration),
    /// Lost in transit.
    Drop,
}

// ============================================================================
// NetworkSimulator
// ============================================================================

/// Applies [`NetworkConditions`] to inbound messages.
#[derive(Debug)]
pub struct NetworkSimulator {
    /// Active settings.
    conditions: NetworkConditions,
    /// Random source for loss and jitter.
    rng: StdRng,
}

impl NetworkSimulator {
    /// Creates a simulator for `conditions`.
    #[must_use]
    pub fn new(conditions: NetworkConditions) -> Self {
        let rng = Self::rng_for(&conditions);
        Self { conditions, rng }
    }

    /// Replaces the settings, reseeding when a seed is given.
    pub fn set_conditions(&mut self, conditions: NetworkConditions) {
        if conditions.seed.is_some() {
            self.rng = Self::rng_for(&conditions);
        }
        self.conditions = conditions;
    }

    /// Returns the active settings.
    #[inline]
    #[must_use]
    pub fn conditions(&self) -> &NetworkConditions {
        &self.conditions
    }

    /// Decides the fate of one inbound message.
    pub fn admit(&mut self) -> Admission {
        if !self.conditions.enabled {
            return Admission::Deliver(Duration::ZERO);
        }

        let rate = self.conditions.packet_loss_rate;
        if rate > 0.0 && self.rng.r#gen::<f64>() < rate {
            return Admission::Drop;
        }

        let delay = match self.conditions.latency {
            Latency::None => Duration::ZERO,
            Latency::Fixed(delay) => delay,
            Latency::Range { min, max } if min >= max => min,
            Latency::Range { min, max } => {
                let millis = self
                    .rng
                    .gen_range(min.as_millis() as u64..=max.as_millis() as u64);
                Duration::from_millis(millis)
            }
        };
        Admission::Deliver(delay)
    }

    fn rng_for(conditions: &NetworkConditions) -> StdRng {
        match conditions.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
