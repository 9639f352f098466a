//! Provider configuration: ARM endpoint, per-operation timeouts, polling.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::wait::{ExponentialBackoff, FixedInterval, PollStrategy};

pub const DEFAULT_ENDPOINT: &str = "https://management.azure.com";
pub const DEFAULT_API_VERSION: &str = "2020-10-31";

/// Shortest delay allowed between operation status polls.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Durations are (de)serialized as whole seconds.
mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

/// Upper bound for each lifecycle operation, covering all of its remote
/// calls and polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    #[serde(with = "secs")]
    pub create: Duration,
    #[serde(with = "secs")]
    pub read: Duration,
    #[serde(with = "secs")]
    pub update: Duration,
    #[serde(with = "secs")]
    pub delete: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            create: Duration::from_secs(30 * 60),
            read: Duration::from_secs(5 * 60),
            update: Duration::from_secs(30 * 60),
            delete: Duration::from_secs(30 * 60),
        }
    }
}

/// Operation polling cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    #[serde(with = "secs")]
    pub interval: Duration,
    #[serde(with = "secs")]
    pub max_interval: Duration,
    pub factor: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        let backoff = ExponentialBackoff::default();
        Self {
            interval: backoff.initial,
            max_interval: backoff.max,
            factor: backoff.factor,
        }
    }
}

impl PollConfig {
    /// Fixed interval when there is nothing to back off to. Intervals are
    /// clamped to [`MIN_POLL_INTERVAL`].
    pub fn strategy(&self) -> Arc<dyn PollStrategy> {
        let interval = self.interval.max(MIN_POLL_INTERVAL);
        if self.factor <= 1 || self.max_interval <= interval {
            Arc::new(FixedInterval(interval))
        } else {
            Arc::new(ExponentialBackoff {
                initial: interval,
                max: self.max_interval,
                factor: self.factor,
            })
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub subscription_id: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default)]
    pub timeouts: Timeouts,
    #[serde(default)]
    pub poll: PollConfig,
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_api_version() -> String {
    DEFAULT_API_VERSION.to_string()
}

impl ProviderConfig {
    pub fn new(subscription_id: impl Into<String>) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            endpoint: default_endpoint(),
            api_version: default_api_version(),
            timeouts: Timeouts::default(),
            poll: PollConfig::default(),
        }
    }
}
