//! Lifecycle reconcilers.
//!
//! A reconciler implements the four idempotent entry points an orchestrator
//! invokes for one tracked resource. It keeps no state between calls: the
//! remote system and the orchestrator's store hold everything.

pub mod digital_twins;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// Trait for resource lifecycle reconcilers.
///
/// Calls for different identities may run concurrently. Calls for the same
/// identity must be serialized by the caller.
#[async_trait]
pub trait Reconciler: Send + Sync {
    /// Declared configuration.
    type Config;
    /// Projected remote state.
    type State;
    /// Fields marked changed for an in-place update.
    type Changes;
    /// Decoded resource identity.
    type Id;

    /// Create the resource. Fails if it already exists remotely.
    async fn create(
        &self,
        config: &Self::Config,
        cancel: &CancellationToken,
    ) -> Result<(Self::Id, Self::State)>;

    /// Read current state. `None` means the resource is gone and should be
    /// dropped from tracked state.
    async fn read(&self, id: &str, cancel: &CancellationToken) -> Result<Option<Self::State>>;

    /// Apply `changes` in place, then read back.
    async fn update(
        &self,
        id: &str,
        changes: &Self::Changes,
        cancel: &CancellationToken,
    ) -> Result<Option<Self::State>>;

    /// Delete the resource. Deleting an absent resource succeeds.
    async fn delete(&self, id: &str, cancel: &CancellationToken) -> Result<()>;

    /// Adopt an existing resource by identity.
    async fn import(&self, id: &str, cancel: &CancellationToken) -> Result<Self::State>;
}
