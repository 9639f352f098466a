//! Error types for Digital Twins lifecycle operations.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Lifecycle entry point an error was raised from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Create,
    Read,
    Update,
    Delete,
    Import,
}

impl Op {
    fn verb(self) -> &'static str {
        match self {
            Op::Create => "creating",
            Op::Read => "retrieving",
            Op::Update => "updating",
            Op::Delete => "deleting",
            Op::Import => "importing",
        }
    }
}

/// Operation plus the instance it targets. Prefixes every collaborator error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    pub op: Op,
    pub name: String,
    pub resource_group: String,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} Digital Twins {:?} (Resource Group {:?})",
            self.op.verb(),
            self.name,
            self.resource_group
        )
    }
}

/// Errors reported by the remote control-plane API.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    #[error("resource not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("unexpected status {code}: {message}")]
    Status { code: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid response: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound)
    }
}

/// Errors returned by the identity codec and the lifecycle reconciler.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid Digital Twins address: {field} {reason}")]
    InvalidAddress {
        field: &'static str,
        reason: &'static str,
    },

    #[error("malformed Digital Twins ID {input:?}: {reason}")]
    MalformedIdentity { input: String, reason: String },

    #[error(
        "a resource with the ID {id:?} already exists - to be managed via this provider this resource needs to be imported into state"
    )]
    AlreadyExists { id: String },

    #[error("changing {field:?} requires replacing the Digital Twins instance")]
    ForceNew { field: &'static str },

    #[error("{scope}: {source}")]
    RemoteQuery {
        scope: Scope,
        #[source]
        source: ApiError,
    },

    #[error("{scope}: remote operation failed: {reason}")]
    OperationFailed { scope: Scope, reason: String },

    #[error("{scope}: deadline exceeded after {waited:?}")]
    Timeout { scope: Scope, waited: Duration },

    #[error("{scope}: {detail}")]
    Consistency { scope: Scope, detail: String },

    #[error("{scope}: cancelled")]
    Cancelled { scope: Scope },
}

pub type Result<T> = std::result::Result<T, Error>;
