//! Declared configuration, projected remote state, and the ARM wire model.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::id::{DigitalTwinsId, PROVIDER_NAMESPACE, RESOURCE_TYPE};
use crate::location;

pub type Tags = BTreeMap<String, String>;

// =============================================================================
// Declared and projected state
// =============================================================================

/// User-declared attributes of a Digital Twins instance.
///
/// `name` and `resource_group_name` address the instance and `location` is
/// fixed at creation; only `tags` can change in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredConfig {
    pub name: String,
    pub resource_group_name: String,
    pub location: String,
    #[serde(default)]
    pub tags: Tags,
}

/// Snapshot of the remote instance projected onto the declared fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteState {
    pub id: String,
    pub name: String,
    pub resource_group_name: String,
    pub location: String,
    pub host_name: Option<String>,
    pub tags: Tags,
    pub provisioning_state: Option<String>,
}

impl RemoteState {
    /// Project a remote description onto the declared fields of `id`.
    pub fn project(id: &DigitalTwinsId, description: &Description) -> Self {
        let properties = description.properties.as_ref();
        Self {
            id: id.encode(),
            name: id.name().to_string(),
            resource_group_name: id.resource_group().to_string(),
            location: location::normalize_nilable(description.location.as_deref()),
            host_name: properties.and_then(|p| p.host_name.clone()),
            tags: description.tags.clone().unwrap_or_default(),
            provisioning_state: properties.and_then(|p| p.provisioning_state.clone()),
        }
    }
}

/// Fields marked changed for an in-place update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub tags: Option<Tags>,
}

impl ChangeSet {
    pub fn tags(tags: Tags) -> Self {
        Self { tags: Some(tags) }
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_none()
    }

    /// Diff two configurations of the same instance.
    ///
    /// Fails with [`Error::ForceNew`] when an addressing field or the
    /// location differs; those changes need a destroy and recreate.
    pub fn between(prior: &DesiredConfig, desired: &DesiredConfig) -> Result<Self> {
        if prior.name != desired.name {
            return Err(Error::ForceNew { field: "name" });
        }
        if prior.resource_group_name != desired.resource_group_name {
            return Err(Error::ForceNew {
                field: "resource_group_name",
            });
        }
        if location::normalize(&prior.location) != location::normalize(&desired.location) {
            return Err(Error::ForceNew { field: "location" });
        }

        let mut changes = ChangeSet::default();
        if prior.tags != desired.tags {
            changes.tags = Some(desired.tags.clone());
        }
        Ok(changes)
    }

    /// Minimal patch body: only fields marked changed are sent.
    pub fn to_patch(&self) -> PatchDescription {
        PatchDescription {
            tags: self.tags.clone(),
        }
    }
}

// =============================================================================
// Wire model (api-version 2020-10-31)
// =============================================================================

/// Digital Twins instance description as returned by `GET` and sent on `PUT`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Description {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Tags>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<DescriptionProperties>,
}

impl Description {
    /// Request body for creating an instance.
    pub fn for_create(config: &DesiredConfig) -> Self {
        Self {
            location: Some(location::normalize(&config.location)),
            tags: Some(config.tags.clone()),
            ..Default::default()
        }
    }

    /// Full ARM resource type, `Microsoft.DigitalTwins/digitalTwinsInstances`.
    pub fn arm_type() -> String {
        format!("{}/{}", PROVIDER_NAMESPACE, RESOURCE_TYPE)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescriptionProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provisioning_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated_time: Option<DateTime<Utc>>,
}

/// `PATCH` body. Absent fields are left untouched by the remote side.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchDescription {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Tags>,
}
