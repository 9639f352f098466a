//! Shared helpers for reconciler integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use dtwins_provider::test_util::InMemoryTwins;
use dtwins_provider::{
    DesiredConfig, DigitalTwinsId, DigitalTwinsReconciler, FixedInterval, Prober, Tags, Timeouts,
    Waiter,
};

pub const SUBSCRIPTION: &str = "11111111-2222-3333-4444-555555555555";

/// Reconciler plus a handle on the fake control plane behind it.
pub struct Harness {
    pub api: Arc<InMemoryTwins>,
    pub reconciler: DigitalTwinsReconciler<InMemoryTwins>,
}

impl Harness {
    /// Operations finish after `polls` polls; one poll every 10 seconds.
    pub fn new(polls: u32) -> Self {
        Self::with_timeouts(polls, Timeouts::default())
    }

    pub fn with_timeouts(polls: u32, timeouts: Timeouts) -> Self {
        let api = Arc::new(InMemoryTwins::new(polls));
        let reconciler = DigitalTwinsReconciler::new(
            SUBSCRIPTION,
            Arc::clone(&api),
            Prober::new(Arc::clone(&api)),
            Waiter::new(
                Arc::clone(&api),
                Arc::new(FixedInterval(Duration::from_secs(10))),
            ),
            timeouts,
        );
        Self { api, reconciler }
    }
}

pub fn tags(pairs: &[(&str, &str)]) -> Tags {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn config(name: &str, group: &str, location: &str, pairs: &[(&str, &str)]) -> DesiredConfig {
    DesiredConfig {
        name: name.to_string(),
        resource_group_name: group.to_string(),
        location: location.to_string(),
        tags: tags(pairs),
    }
}

pub fn id(group: &str, name: &str) -> DigitalTwinsId {
    DigitalTwinsId::new(SUBSCRIPTION, group, name).expect("valid address")
}
