//! Digital Twins reconciler - drives instance lifecycle against the control plane.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::Reconciler;
use crate::api::{DigitalTwinsApi, PatchOutcome};
use crate::config::{ProviderConfig, Timeouts};
use crate::error::{ApiError, Error, Op, Result};
use crate::id::DigitalTwinsId;
use crate::model::{ChangeSet, Description, DesiredConfig, RemoteState};
use crate::probe::Prober;
use crate::wait::{Deadline, Waiter};

/// Reconciler for `Microsoft.DigitalTwins/digitalTwinsInstances`.
pub struct DigitalTwinsReconciler<A> {
    subscription_id: String,
    api: Arc<A>,
    prober: Prober<A>,
    waiter: Waiter<A>,
    timeouts: Timeouts,
}

impl<A: DigitalTwinsApi> DigitalTwinsReconciler<A> {
    pub fn new(
        subscription_id: impl Into<String>,
        api: Arc<A>,
        prober: Prober<A>,
        waiter: Waiter<A>,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            api,
            prober,
            waiter,
            timeouts,
        }
    }

    /// Wire a prober and waiter over `api` using the configured poll strategy.
    pub fn from_config(config: &ProviderConfig, api: Arc<A>) -> Self {
        let prober = Prober::new(Arc::clone(&api));
        let waiter = Waiter::new(Arc::clone(&api), config.poll.strategy());
        Self::new(
            config.subscription_id.clone(),
            api,
            prober,
            waiter,
            config.timeouts,
        )
    }

    async fn read_id(
        &self,
        id: &DigitalTwinsId,
        op: Op,
        deadline: &Deadline,
    ) -> Result<Option<RemoteState>> {
        let scope = id.scope(op);
        match self.prober.probe(&scope, id, deadline).await? {
            Some(description) => Ok(Some(RemoteState::project(id, &description))),
            None => {
                warn!(%id, "Digital Twins instance does not exist - removing from state");
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl<A: DigitalTwinsApi> Reconciler for DigitalTwinsReconciler<A> {
    type Config = DesiredConfig;
    type State = RemoteState;
    type Changes = ChangeSet;
    type Id = DigitalTwinsId;

    async fn create(
        &self,
        config: &Self::Config,
        cancel: &CancellationToken,
    ) -> Result<(Self::Id, Self::State)> {
        // Addressing is name based, so the ID is known before the instance exists
        let id = DigitalTwinsId::new(
            self.subscription_id.as_str(),
            config.resource_group_name.as_str(),
            config.name.as_str(),
        )?;
        let scope = id.scope(Op::Create);
        let deadline = Deadline::after(self.timeouts.create, cancel.clone());
        info!(%id, location = %config.location, "Creating Digital Twins instance");

        if let Some(existing) = self.prober.probe(&scope, &id, &deadline).await? {
            let existing_id = existing
                .id
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| id.encode());
            return Err(Error::AlreadyExists { id: existing_id });
        }

        let description = Description::for_create(config);
        let mut operation = match deadline
            .run(&scope, self.api.create_or_update(&id, &description))
            .await?
        {
            Ok(operation) => operation,
            // Lost a create race with another writer
            Err(ApiError::Conflict(_)) => return Err(Error::AlreadyExists { id: id.encode() }),
            Err(source) => return Err(Error::RemoteQuery { scope, source }),
        };

        self.waiter.wait(&scope, &mut operation, &deadline).await?;

        let created = self
            .prober
            .probe(&scope, &id, &deadline)
            .await?
            .ok_or_else(|| Error::Consistency {
                scope: scope.clone(),
                detail: "instance not found after creation completed".to_string(),
            })?;
        let remote_id = created
            .id
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::Consistency {
                scope: scope.clone(),
                detail: "empty or nil ID returned".to_string(),
            })?;
        let parsed = DigitalTwinsId::parse(remote_id).map_err(|e| Error::Consistency {
            scope: scope.clone(),
            detail: format!("remote returned an unusable ID: {}", e),
        })?;
        let id = DigitalTwinsId::new(
            self.subscription_id.as_str(),
            parsed.resource_group(),
            parsed.name(),
        )?;

        let state = RemoteState::project(&id, &created);
        info!(%id, polls = operation.polls(), "Created Digital Twins instance");
        Ok((id, state))
    }

    async fn read(&self, id: &str, cancel: &CancellationToken) -> Result<Option<Self::State>> {
        let id = DigitalTwinsId::parse(id)?;
        let deadline = Deadline::after(self.timeouts.read, cancel.clone());
        self.read_id(&id, Op::Read, &deadline).await
    }

    async fn update(
        &self,
        id: &str,
        changes: &Self::Changes,
        cancel: &CancellationToken,
    ) -> Result<Option<Self::State>> {
        let id = DigitalTwinsId::parse(id)?;
        let scope = id.scope(Op::Update);

        if changes.is_empty() {
            debug!(%id, "No in-place changes, skipping patch");
        } else {
            let deadline = Deadline::after(self.timeouts.update, cancel.clone());
            info!(%id, "Updating Digital Twins instance");

            let patch = changes.to_patch();
            let outcome = deadline
                .run(&scope, self.api.update(&id, &patch))
                .await?
                .map_err(|source| Error::RemoteQuery {
                    scope: scope.clone(),
                    source,
                })?;
            if let PatchOutcome::Accepted(mut operation) = outcome {
                self.waiter.wait(&scope, &mut operation, &deadline).await?;
            }
        }

        let deadline = Deadline::after(self.timeouts.read, cancel.clone());
        self.read_id(&id, Op::Update, &deadline).await
    }

    async fn delete(&self, id: &str, cancel: &CancellationToken) -> Result<()> {
        let id = DigitalTwinsId::parse(id)?;
        let scope = id.scope(Op::Delete);
        let deadline = Deadline::after(self.timeouts.delete, cancel.clone());
        info!(%id, "Deleting Digital Twins instance");

        let mut operation = match deadline.run(&scope, self.api.delete(&id)).await? {
            Ok(operation) => operation,
            Err(e) if e.is_not_found() => {
                warn!(%id, "Digital Twins instance already absent");
                return Ok(());
            }
            Err(source) => return Err(Error::RemoteQuery { scope, source }),
        };

        self.waiter.wait(&scope, &mut operation, &deadline).await?;
        info!(%id, polls = operation.polls(), "Deleted Digital Twins instance");
        Ok(())
    }

    async fn import(&self, id: &str, cancel: &CancellationToken) -> Result<Self::State> {
        let id = DigitalTwinsId::parse(id)?;
        let deadline = Deadline::after(self.timeouts.read, cancel.clone());

        self.read_id(&id, Op::Import, &deadline)
            .await?
            .ok_or_else(|| Error::Consistency {
                scope: id.scope(Op::Import),
                detail: "cannot import non-existent remote object".to_string(),
            })
    }
}
