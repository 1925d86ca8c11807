//! Per-model availability tracking.
//!
//! Each model moves through a small state machine:
//!
//! ```text
//! Available --(N consecutive retriable failures)--> CoolingDown
//! CoolingDown --(cooldown elapsed)--> HalfOpen
//! HalfOpen --(success)--> Available
//! HalfOpen --(failure)--> CoolingDown
//! ```
//!
//! The table is owned explicitly and shared by `Arc`, so concurrent runs
//! see the same state and tests can inject a fresh one.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Cooldown configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AvailabilityConfig {
    /// Consecutive retriable failures before a model cools down.
    pub failure_threshold: u32,
    /// How long a model is skipped once it cools down.
    pub cooldown: Duration,
}

impl Default for AvailabilityConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown: Duration::from_secs(30),
        }
    }
}

impl AvailabilityConfig {
    /// Loads configuration from environment variables.
    ///
    /// | Variable | Description | Default |
    /// |----------|-------------|---------|
    /// | `NEUROPROMPT_MODEL_FAILURE_THRESHOLD` | Failures before cooldown | 3 |
    /// | `NEUROPROMPT_MODEL_COOLDOWN_MS` | Cooldown length | 30000 |
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Applies environment variable overrides.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var("NEUROPROMPT_MODEL_FAILURE_THRESHOLD")
            && let Ok(parsed) = v.parse::<u32>()
        {
            self.failure_threshold = parsed.max(1);
        }
        if let Ok(v) = std::env::var("NEUROPROMPT_MODEL_COOLDOWN_MS")
            && let Ok(parsed) = v.parse::<u64>()
        {
            self.cooldown = Duration::from_millis(parsed);
        }
        self
    }

    /// Sets the failure threshold (minimum 1).
    #[must_use]
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    /// Sets the cooldown.
    #[must_use]
    pub const fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }
}

/// Whether a model may be called right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    /// Below the failure threshold.
    Available,
    /// Cooldown elapsed; the next call is a trial.
    HalfOpen,
    /// Skipped until the cooldown elapses.
    CoolingDown {
        /// Time left.
        remaining: Duration,
    },
}

impl Availability {
    /// Returns true if the model may be called.
    #[must_use]
    pub const fn is_callable(self) -> bool {
        !matches!(self, Self::CoolingDown { .. })
    }
}

/// Failure bookkeeping for one model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModelHealth {
    /// Consecutive retriable failures.
    pub consecutive_failures: u32,
    /// When the last retriable failure happened.
    pub last_failure: Option<Instant>,
}

/// Process-wide availability state keyed by model id.
#[derive(Debug, Default)]
pub struct AvailabilityTable {
    config: AvailabilityConfig,
    models: Mutex<HashMap<String, ModelHealth>>,
}

impl AvailabilityTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new(config: AvailabilityConfig) -> Self {
        Self {
            config,
            models: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the table configuration.
    #[must_use]
    pub const fn config(&self) -> AvailabilityConfig {
        self.config
    }

    /// Checks whether a model may be called.
    #[must_use]
    pub fn check(&self, model_id: &str) -> Availability {
        let models = self
            .models
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let Some(health) = models.get(model_id) else {
            return Availability::Available;
        };
        if health.consecutive_failures < self.config.failure_threshold {
            return Availability::Available;
        }
        let elapsed = health.last_failure.map_or(self.config.cooldown, |at| at.elapsed());
        if elapsed >= self.config.cooldown {
            Availability::HalfOpen
        } else {
            Availability::CoolingDown {
                remaining: self.config.cooldown.saturating_sub(elapsed),
            }
        }
    }

    /// Records a success, resetting the failure count.
    pub fn record_success(&self, model_id: &str) {
        let mut models = self
            .models
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(health) = models.get_mut(model_id) {
            *health = ModelHealth::default();
        }
    }

    /// Records a retriable failure.
    ///
    /// Returns true if this failure put the model into cooldown.
    pub fn record_failure(&self, model_id: &str) -> bool {
        let mut models = self
            .models
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let health = models.entry(model_id.to_string()).or_default();
        health.consecutive_failures = health.consecutive_failures.saturating_add(1);
        health.last_failure = Some(Instant::now());
        health.consecutive_failures >= self.config.failure_threshold
    }

    /// Returns the current health of one model.
    #[must_use]
    pub fn health(&self, model_id: &str) -> ModelHealth {
        self.models
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(model_id)
            .copied()
            .unwrap_or_default()
    }

    /// Returns a sorted snapshot of every tracked model.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(String, ModelHealth)> {
        let models = self
            .models
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut entries: Vec<_> = models.iter().map(|(k, v)| (k.clone(), *v)).collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}
