//! Resource ID codec for Digital Twins instances.
//!
//! IDs have the fixed ARM shape
//! `/subscriptions/{sub}/resourceGroups/{group}/providers/Microsoft.DigitalTwins/digitalTwinsInstances/{name}`.
//! Encoding always emits that casing. Parsing accepts the fixed keys in any
//! case so IDs persisted by older writers (`resourcegroups`, ...) keep parsing.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Op, Result, Scope};

pub const PROVIDER_NAMESPACE: &str = "Microsoft.DigitalTwins";
pub const RESOURCE_TYPE: &str = "digitalTwinsInstances";

/// Fixed keys by segment position; odd positions carry the values.
const KEYS: [(usize, &str); 4] = [
    (0, "subscriptions"),
    (2, "resourceGroups"),
    (4, "providers"),
    (6, RESOURCE_TYPE),
];
const SEGMENTS: usize = 8;

/// Address of a Digital Twins instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DigitalTwinsId {
    subscription_id: String,
    resource_group: String,
    name: String,
}

impl DigitalTwinsId {
    /// Build an ID from its addressing triple.
    pub fn new(
        subscription_id: impl Into<String>,
        resource_group: impl Into<String>,
        name: impl Into<String>,
    ) -> Result<Self> {
        let id = Self {
            subscription_id: subscription_id.into(),
            resource_group: resource_group.into(),
            name: name.into(),
        };
        for (field, value) in [
            ("subscription_id", &id.subscription_id),
            ("resource_group", &id.resource_group),
            ("name", &id.name),
        ] {
            if value.is_empty() {
                return Err(Error::InvalidAddress {
                    field,
                    reason: "must not be empty",
                });
            }
            if value.contains('/') {
                return Err(Error::InvalidAddress {
                    field,
                    reason: "must not contain '/'",
                });
            }
        }
        Ok(id)
    }

    /// Parse a persisted ID string.
    pub fn parse(input: &str) -> Result<Self> {
        let malformed = |reason: String| Error::MalformedIdentity {
            input: input.to_string(),
            reason,
        };

        let path = input
            .strip_prefix('/')
            .ok_or_else(|| malformed("expected a leading '/'".to_string()))?;
        let path = path.strip_suffix('/').unwrap_or(path);

        let segments: Vec<&str> = path.split('/').collect();
        if segments.len() != SEGMENTS {
            return Err(malformed(format!(
                "expected {} segments, found {}",
                SEGMENTS,
                segments.len()
            )));
        }
        if let Some(pos) = segments.iter().position(|s| s.is_empty()) {
            return Err(malformed(format!("segment {} is empty", pos + 1)));
        }
        for (pos, key) in KEYS {
            if !segments[pos].eq_ignore_ascii_case(key) {
                return Err(malformed(format!(
                    "expected {:?} at segment {}, found {:?}",
                    key,
                    pos + 1,
                    segments[pos]
                )));
            }
        }
        if !segments[5].eq_ignore_ascii_case(PROVIDER_NAMESPACE) {
            return Err(malformed(format!(
                "unknown provider namespace {:?}",
                segments[5]
            )));
        }

        Ok(Self {
            subscription_id: segments[1].to_string(),
            resource_group: segments[3].to_string(),
            name: segments[7].to_string(),
        })
    }

    pub fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    pub fn resource_group(&self) -> &str {
        &self.resource_group
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Canonical string form.
    pub fn encode(&self) -> String {
        self.to_string()
    }

    pub fn scope(&self, op: Op) -> Scope {
        Scope {
            op,
            name: self.name.clone(),
            resource_group: self.resource_group.clone(),
        }
    }
}

impl fmt::Display for DigitalTwinsId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "/subscriptions/{}/resourceGroups/{}/providers/{}/{}/{}",
            self.subscription_id, self.resource_group, PROVIDER_NAMESPACE, RESOURCE_TYPE, self.name
        )
    }
}

impl FromStr for DigitalTwinsId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Validate an externally supplied ID before any remote call is made.
pub fn validate_import_id(input: &str) -> Result<()> {
    DigitalTwinsId::parse(input).map(|_| ())
}
