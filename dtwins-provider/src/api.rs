//! Capability interface to the Digital Twins control plane.
//!
//! The reconciler only needs a not-found vs. error distinction, a pollable
//! handle for long-running operations, and the instance description. Any
//! transport (ARM over HTTPS, the in-memory fake) implements [`DigitalTwinsApi`].

use std::time::Duration;

use async_trait::async_trait;

use crate::error::ApiError;
use crate::id::DigitalTwinsId;
use crate::model::{Description, PatchDescription};

/// Mutating call that produced an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

/// Status of a long-running operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationStatus {
    /// Still running. `retry_after` is the server's suggested poll delay.
    InProgress { retry_after: Option<Duration> },
    Succeeded,
    Failed { reason: String },
}

impl OperationStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OperationStatus::InProgress { .. })
    }
}

/// Handle to work in progress on the remote side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsyncOperation {
    kind: OperationKind,
    reference: String,
    status: OperationStatus,
    polls: u32,
}

impl AsyncOperation {
    /// An operation still running remotely, polled through `reference`.
    pub fn pending(kind: OperationKind, reference: impl Into<String>) -> Self {
        Self {
            kind,
            reference: reference.into(),
            status: OperationStatus::InProgress { retry_after: None },
            polls: 0,
        }
    }

    /// A mutating call that finished synchronously.
    pub fn completed(kind: OperationKind) -> Self {
        Self {
            kind,
            reference: String::new(),
            status: OperationStatus::Succeeded,
            polls: 0,
        }
    }

    pub fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
        if let OperationStatus::InProgress { .. } = self.status {
            self.status = OperationStatus::InProgress { retry_after };
        }
        self
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub fn status(&self) -> &OperationStatus {
        &self.status
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Number of status polls recorded on this handle.
    pub fn polls(&self) -> u32 {
        self.polls
    }

    /// Record a polled status. A terminal status is never overwritten.
    pub(crate) fn record(&mut self, status: OperationStatus) {
        self.polls += 1;
        if !self.status.is_terminal() {
            self.status = status;
        }
    }
}

/// Result of a `PATCH`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOutcome {
    /// The patch was applied synchronously.
    Applied,
    /// The remote side accepted the patch as a long-running operation.
    Accepted(AsyncOperation),
}

/// Control-plane calls consumed by the lifecycle reconciler.
#[async_trait]
pub trait DigitalTwinsApi: Send + Sync {
    /// Fetch the instance. Absence is [`ApiError::NotFound`].
    async fn get(&self, id: &DigitalTwinsId) -> Result<Description, ApiError>;

    /// Create (or replace) the instance.
    async fn create_or_update(
        &self,
        id: &DigitalTwinsId,
        description: &Description,
    ) -> Result<AsyncOperation, ApiError>;

    /// Patch mutable attributes.
    async fn update(
        &self,
        id: &DigitalTwinsId,
        patch: &PatchDescription,
    ) -> Result<PatchOutcome, ApiError>;

    /// Delete the instance. Absence is [`ApiError::NotFound`].
    async fn delete(&self, id: &DigitalTwinsId) -> Result<AsyncOperation, ApiError>;

    /// Query the current status of an operation.
    async fn poll(&self, operation: &AsyncOperation) -> Result<OperationStatus, ApiError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completed_is_terminal() {
        let op = AsyncOperation::completed(OperationKind::Delete);
        assert!(op.is_terminal());
        assert_eq!(op.status(), &OperationStatus::Succeeded);
        assert_eq!(op.reference(), "");
    }

    #[test]
    fn test_record_keeps_first_terminal_status() {
        let mut op = AsyncOperation::pending(OperationKind::Create, "op-1");
        assert!(!op.is_terminal());

        op.record(OperationStatus::InProgress { retry_after: None });
        op.record(OperationStatus::Failed {
            reason: "quota exceeded".to_string(),
        });
        op.record(OperationStatus::Succeeded);

        assert_eq!(op.polls(), 3);
        assert_eq!(
            op.status(),
            &OperationStatus::Failed {
                reason: "quota exceeded".to_string()
            }
        );
    }

    #[test]
    fn test_retry_after_only_applies_while_pending() {
        let hint = Some(Duration::from_secs(7));
        let pending = AsyncOperation::pending(OperationKind::Update, "op").with_retry_after(hint);
        assert_eq!(
            pending.status(),
            &OperationStatus::InProgress { retry_after: hint }
        );

        let done = AsyncOperation::completed(OperationKind::Update).with_retry_after(hint);
        assert_eq!(done.status(), &OperationStatus::Succeeded);
    }
}
