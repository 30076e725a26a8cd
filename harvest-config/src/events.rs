use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default number of events kept in the reservoir of an application per harvest.
pub const DEFAULT_MAX_SAMPLES_STORED: usize = 2000;

/// Default number of events the adaptive sampler aims to mark as sampled per harvest.
pub const DEFAULT_TARGET_SAMPLES_STORED: usize = 10;

/// Settings for transaction events, either global or resolved for a single application.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct TransactionEventsConfig {
    /// Whether transaction events are collected at all.
    ///
    /// Defaults to `true`.
    pub enabled: bool,

    /// Maximum number of events retained in the reservoir of an application between harvests.
    ///
    /// Once the reservoir is full, events with a higher priority evict the lowest priority event.
    /// Defaults to `2000`.
    pub max_samples_stored: usize,

    /// Number of events the adaptive sampler aims to sample per harvest cycle.
    ///
    /// Defaults to `10`.
    pub target_samples_stored: usize,
}

impl Default for TransactionEventsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_samples_stored: DEFAULT_MAX_SAMPLES_STORED,
            target_samples_stored: DEFAULT_TARGET_SAMPLES_STORED,
        }
    }
}

/// Per-application overrides of [`TransactionEventsConfig`].
///
/// Fields that are not set fall back to the global `transaction_events` section.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct AppOverride {
    /// Overrides [`TransactionEventsConfig::enabled`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// Overrides [`TransactionEventsConfig::max_samples_stored`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_samples_stored: Option<usize>,
    /// Overrides [`TransactionEventsConfig::target_samples_stored`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_samples_stored: Option<usize>,
}

impl AppOverride {
    /// Applies the override on top of the given defaults.
    pub fn apply(&self, defaults: TransactionEventsConfig) -> TransactionEventsConfig {
        TransactionEventsConfig {
            enabled: self.enabled.unwrap_or(defaults.enabled),
            max_samples_stored: self.max_samples_stored.unwrap_or(defaults.max_samples_stored),
            target_samples_stored: self
                .target_samples_stored
                .unwrap_or(defaults.target_samples_stored),
        }
    }
}

/// What to do with a harvested batch when the transmitter fails with an unclassified error.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UnexpectedErrorPolicy {
    /// Drop the batch.
    ///
    /// This never retries unknown failures, so an error that keeps recurring cannot cause data to
    /// pile up.
    #[default]
    Discard,
    /// Treat the failure like a transient one and resample the batch into the next harvest.
    Retry,
}

/// Limits for the synthetic event backlog.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct SyntheticsConfig {
    /// Capacity of the per-application synthetic reservoir.
    ///
    /// Defaults to `200`.
    pub max_events_per_app: usize,

    /// Maximum number of harvested but unsent synthetic batches held across all applications.
    ///
    /// Batches harvested while the backlog is full are dropped. Defaults to `25`, which is five
    /// applications for five minutes each.
    pub max_pending_batches: usize,

    /// Maximum number of backlog batches sent during a single harvest.
    ///
    /// Spreads the catch-up after an outage over several harvests. Defaults to `5`.
    pub max_batches_per_harvest: usize,
}

impl Default for SyntheticsConfig {
    fn default() -> Self {
        Self {
            max_events_per_app: 200,
            max_pending_batches: 25,
            max_batches_per_harvest: 5,
        }
    }
}

/// Controls the harvest cycle.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct HarvestConfig {
    /// Interval between two harvests of an application in seconds.
    ///
    /// Defaults to `60`.
    pub report_period: u64,

    /// Handling of transmit errors that are neither transient nor permanent.
    pub unexpected_errors: UnexpectedErrorPolicy,

    /// Limits for synthetic events.
    pub synthetics: SyntheticsConfig,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            report_period: 60,
            unexpected_errors: UnexpectedErrorPolicy::default(),
            synthetics: SyntheticsConfig::default(),
        }
    }
}

impl HarvestConfig {
    /// Returns the report period as a [`Duration`].
    pub fn report_period(&self) -> Duration {
        Duration::from_secs(self.report_period.max(1))
    }
}
