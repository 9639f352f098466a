//! dtwins-provider: lifecycle management for Azure Digital Twins instances.
//!
//! The [`DigitalTwinsReconciler`] implements create, read, update, delete and
//! import for one instance on top of three pieces:
//! - [`id`]: encodes and parses the ARM resource ID
//! - [`probe`]: distinguishes "absent" from "could not tell"
//! - [`wait`]: polls long-running operations against a deadline
//!
//! Remote access goes through the [`DigitalTwinsApi`] capability trait, with
//! an HTTPS implementation in [`arm`] and an in-memory one in [`test_util`].
//!
//! # Example
//! ```ignore
//! use std::sync::Arc;
//! use dtwins_provider::{DigitalTwinsReconciler, ProviderConfig, Reconciler};
//! use dtwins_provider::arm::ArmClient;
//!
//! let config = ProviderConfig::new(subscription_id);
//! let api = Arc::new(ArmClient::new(&config, token)?);
//! let reconciler = DigitalTwinsReconciler::from_config(&config, api);
//! let (id, state) = reconciler.create(&desired, &cancel).await?;
//! ```

pub mod api;
pub mod arm;
pub mod config;
pub mod error;
pub mod id;
pub mod location;
pub mod model;
pub mod probe;
pub mod reconciler;
pub mod test_util;
pub mod wait;

pub use api::{AsyncOperation, DigitalTwinsApi, OperationKind, OperationStatus, PatchOutcome};
pub use config::{PollConfig, ProviderConfig, Timeouts};
pub use error::{ApiError, Error, Op, Result, Scope};
pub use id::{DigitalTwinsId, validate_import_id};
pub use model::{ChangeSet, DesiredConfig, RemoteState, Tags};
pub use probe::Prober;
pub use reconciler::Reconciler;
pub use reconciler::digital_twins::DigitalTwinsReconciler;
pub use wait::{Deadline, ExponentialBackoff, FixedInterval, PollStrategy, Waiter};

// Re-export so callers build tokens from the same tokio-util version
pub use tokio_util::sync::CancellationToken;
