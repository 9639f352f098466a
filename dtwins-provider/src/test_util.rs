//! In-memory Digital Twins control plane.
//!
//! Behaves like the ARM API closely enough to drive the reconciler end to
//! end: long-running operations take a configurable number of polls, and
//! faults can be injected per call kind. Every call is recorded so tests can
//! assert on what was (and was not) sent.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::api::{AsyncOperation, DigitalTwinsApi, OperationKind, OperationStatus, PatchOutcome};
use crate::error::ApiError;
use crate::id::DigitalTwinsId;
use crate::location;
use crate::model::{Description, DescriptionProperties, PatchDescription, Tags};

/// A recorded API call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Get(String),
    CreateOrUpdate { id: String, body: Description },
    Update { id: String, patch: PatchDescription },
    Delete(String),
    Poll(String),
}

/// Injected failures.
#[derive(Debug, Clone, Default)]
pub struct Faults {
    /// `get` answers with this HTTP status instead of the stored state.
    pub get_status: Option<u16>,
    /// `create_or_update` answers 409 Conflict.
    pub create_conflict: bool,
    /// Long-running operations end as failed with this reason.
    pub fail_operations: Option<String>,
    /// Long-running operations never finish.
    pub stuck_operations: bool,
    /// A finished create does not leave an instance behind.
    pub vanish_after_create: bool,
    /// `update` answers 202 with an operation instead of applying in place.
    pub async_updates: bool,
    /// `get` reports this ID on found instances instead of the stored one.
    pub reported_id: Option<String>,
}

enum Effect {
    Put(String, Description),
    Patch(String, Tags),
    Remove(String),
}

struct PendingOp {
    remaining: u32,
    effect: Option<Effect>,
    status: OperationStatus,
}

#[derive(Default)]
struct Inner {
    instances: HashMap<String, Description>,
    operations: HashMap<String, PendingOp>,
    calls: Vec<Call>,
    faults: Faults,
}

impl Inner {
    fn apply(&mut self, effect: Effect) {
        match effect {
            Effect::Put(key, description) => {
                if !self.faults.vanish_after_create {
                    self.instances.insert(key, description);
                }
            }
            Effect::Patch(key, tags) => {
                if let Some(instance) = self.instances.get_mut(&key) {
                    instance.tags = Some(tags);
                    if let Some(props) = instance.properties.as_mut() {
                        props.last_updated_time = Some(Utc::now());
                    }
                }
            }
            Effect::Remove(key) => {
                self.instances.remove(&key);
            }
        }
    }

    /// Start a long-running operation, or apply it at once when no polls are
    /// configured.
    fn start(&mut self, kind: OperationKind, polls: u32, effect: Effect) -> AsyncOperation {
        if polls == 0 && !self.faults.stuck_operations && self.faults.fail_operations.is_none() {
            self.apply(effect);
            return AsyncOperation::completed(kind);
        }
        let reference = format!("operations/{}", Uuid::new_v4());
        self.operations.insert(
            reference.clone(),
            PendingOp {
                remaining: polls,
                effect: Some(effect),
                status: OperationStatus::InProgress { retry_after: None },
            },
        );
        AsyncOperation::pending(kind, reference)
    }
}

/// ARM keys are case-insensitive.
fn key(id: &DigitalTwinsId) -> String {
    id.encode().to_lowercase()
}

pub struct InMemoryTwins {
    polls_until_done: u32,
    inner: Mutex<Inner>,
}

impl InMemoryTwins {
    /// Operations finish after `polls_until_done` status polls.
    pub fn new(polls_until_done: u32) -> Self {
        Self {
            polls_until_done,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub async fn set_faults(&self, faults: Faults) {
        self.inner.lock().await.faults = faults;
    }

    /// Place an instance out of band, as if created by another tool.
    pub async fn insert(&self, id: &DigitalTwinsId, location: &str, tags: Tags) {
        let description = describe(id, location, tags);
        self.inner.lock().await.instances.insert(key(id), description);
    }

    /// Remove an instance out of band.
    pub async fn remove(&self, id: &DigitalTwinsId) -> bool {
        self.inner.lock().await.instances.remove(&key(id)).is_some()
    }

    pub async fn contains(&self, id: &DigitalTwinsId) -> bool {
        self.inner.lock().await.instances.contains_key(&key(id))
    }

    pub async fn calls(&self) -> Vec<Call> {
        self.inner.lock().await.calls.clone()
    }

    pub async fn clear_calls(&self) {
        self.inner.lock().await.calls.clear();
    }
}

impl Default for InMemoryTwins {
    fn default() -> Self {
        Self::new(0)
    }
}

fn describe(id: &DigitalTwinsId, location: &str, tags: Tags) -> Description {
    let location = location::normalize(location);
    let now = Utc::now();
    Description {
        id: Some(id.encode()),
        name: Some(id.name().to_string()),
        resource_type: Some(Description::arm_type()),
        properties: Some(DescriptionProperties {
            provisioning_state: Some("Succeeded".to_string()),
            host_name: Some(format!(
                "{}.api.{}.digitaltwins.azure.net",
                id.name(),
                location
            )),
            created_time: Some(now),
            last_updated_time: Some(now),
        }),
        location: Some(location),
        tags: Some(tags),
    }
}

#[async_trait]
impl DigitalTwinsApi for InMemoryTwins {
    async fn get(&self, id: &DigitalTwinsId) -> Result<Description, ApiError> {
        let mut inner = self.inner.lock().await;
        inner.calls.push(Call::Get(id.encode()));

        if let Some(code) = inner.faults.get_status {
            return Err(ApiError::Status {
                code,
                message: "injected failure".to_string(),
            });
        }
        let mut description = inner
            .instances
            .get(&key(id))
            .cloned()
            .ok_or(ApiError::NotFound)?;
        if let Some(reported) = &inner.faults.reported_id {
            description.id = Some(reported.clone());
        }
        Ok(description)
    }

    async fn create_or_update(
        &self,
        id: &DigitalTwinsId,
        description: &Description,
    ) -> Result<AsyncOperation, ApiError> {
        let mut inner = self.inner.lock().await;
        inner.calls.push(Call::CreateOrUpdate {
            id: id.encode(),
            body: description.clone(),
        });

        if inner.faults.create_conflict {
            return Err(ApiError::Conflict(format!(
                "Digital Twins instance {} is being created by another request",
                id.name()
            )));
        }

        let stored = describe(
            id,
            description.location.as_deref().unwrap_or_default(),
            description.tags.clone().unwrap_or_default(),
        );
        Ok(inner.start(
            OperationKind::Create,
            self.polls_until_done,
            Effect::Put(key(id), stored),
        ))
    }

    async fn update(
        &self,
        id: &DigitalTwinsId,
        patch: &PatchDescription,
    ) -> Result<PatchOutcome, ApiError> {
        let mut inner = self.inner.lock().await;
        inner.calls.push(Call::Update {
            id: id.encode(),
            patch: patch.clone(),
        });

        let key = key(id);
        if !inner.instances.contains_key(&key) {
            return Err(ApiError::NotFound);
        }
        let Some(tags) = patch.tags.clone() else {
            return Ok(PatchOutcome::Applied);
        };

        if inner.faults.async_updates {
            let polls = self.polls_until_done.max(1);
            Ok(PatchOutcome::Accepted(inner.start(
                OperationKind::Update,
                polls,
                Effect::Patch(key, tags),
            )))
        } else {
            inner.apply(Effect::Patch(key, tags));
            Ok(PatchOutcome::Applied)
        }
    }

    async fn delete(&self, id: &DigitalTwinsId) -> Result<AsyncOperation, ApiError> {
        let mut inner = self.inner.lock().await;
        inner.calls.push(Call::Delete(id.encode()));

        let key = key(id);
        if !inner.instances.contains_key(&key) {
            return Err(ApiError::NotFound);
        }
        Ok(inner.start(
            OperationKind::Delete,
            self.polls_until_done,
            Effect::Remove(key),
        ))
    }

    async fn poll(&self, operation: &AsyncOperation) -> Result<OperationStatus, ApiError> {
        let mut inner = self.inner.lock().await;
        inner.calls.push(Call::Poll(operation.reference().to_string()));

        let stuck = inner.faults.stuck_operations;
        let failure = inner.faults.fail_operations.clone();
        let Some(op) = inner.operations.get_mut(operation.reference()) else {
            return Err(ApiError::Status {
                code: 404,
                message: format!("unknown operation {}", operation.reference()),
            });
        };

        if op.status.is_terminal() || stuck {
            return Ok(op.status.clone());
        }
        op.remaining = op.remaining.saturating_sub(1);
        if op.remaining > 0 {
            return Ok(op.status.clone());
        }

        let effect = op.effect.take();
        op.status = match failure {
            Some(reason) => OperationStatus::Failed { reason },
            None => OperationStatus::Succeeded,
        };
        let status = op.status.clone();
        if let (Some(effect), OperationStatus::Succeeded) = (effect, &status) {
            inner.apply(effect);
        }
        Ok(status)
    }
}
