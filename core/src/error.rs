use crate::path::KeyPath;
use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

/// Every failure the store, its combinators and its dispatch pipeline can report.
///
/// Construction-time failures (mounting, subscribing, building a multiplexer)
/// are returned at the call site. Runtime failures inside a reduce or notify
/// cycle come back through the dispatch future.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error(
        "Expected a plain object on state {path} but received type \"{found}\". \
         This may happen because of a conflict between reducer and state shapes."
    )]
    Shape { path: KeyPath, found: &'static str },

    #[error("Conflict when mounting different reducers on the same node {path}.")]
    Conflict { path: KeyPath },

    #[error("Given action \"{action_type}\", reducer on {path} returned undefined.")]
    ContractViolation { action_type: String, path: KeyPath },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Reducer on {path} failed: {source}")]
    Reducer {
        path: KeyPath,
        source: anyhow::Error,
    },

    #[error("Subscriber on {path} failed: {source}")]
    Subscriber {
        path: KeyPath,
        source: anyhow::Error,
    },

    #[error("Middleware failed: {0}")]
    Middleware(anyhow::Error),

    #[error("Dispatch was superseded by a later action")]
    Superseded,

    #[error("Store is shut down")]
    Closed,

    /// A reducer, subscriber or middleware panicked. The store keeps running.
    #[error("Dispatch panicked: {0}")]
    Panicked(String),
}

impl StoreError {
    /// Wrap an arbitrary middleware failure.
    pub fn middleware(err: impl Into<anyhow::Error>) -> Self {
        StoreError::Middleware(err.into())
    }

    /// Describe a caught panic payload.
    pub fn panicked(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|message| message.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string());
        StoreError::Panicked(message)
    }

    /// The dot path the error points at, if it has one.
    pub fn path(&self) -> Option<&KeyPath> {
        match self {
            StoreError::Shape { path, .. }
            | StoreError::Conflict { path }
            | StoreError::ContractViolation { path, .. }
            | StoreError::Reducer { path, .. }
            | StoreError::Subscriber { path, .. } => Some(path),
            StoreError::Validation(err) => err.path(),
            StoreError::Middleware(_)
            | StoreError::Superseded
            | StoreError::Closed
            | StoreError::Panicked(_) => None,
        }
    }
}

/// Malformed input handed to a construction-time or dispatch entry point.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid reducer on {path}: expected at least one reducer or nested mapping.")]
    EmptyTree { path: KeyPath },

    #[error("Invalid tree on {path}: expected a nested mapping.")]
    NotABranch { path: KeyPath },

    #[error("Actions must be plain objects, received type \"{found}\".")]
    ActionNotAnObject { found: &'static str },

    #[error("Actions may not have an undefined \"type\" property.")]
    MissingActionType,

    #[error("Expected target to be a plain object or a tag string on {path}.")]
    InvalidTarget { path: KeyPath },

    #[error("Duplicate tag \"{tag}\" of target on {path}.")]
    DuplicateTag { tag: String, path: KeyPath },
}

impl ValidationError {
    pub fn path(&self) -> Option<&KeyPath> {
        match self {
            ValidationError::EmptyTree { path }
            | ValidationError::NotABranch { path }
            | ValidationError::InvalidTarget { path }
            | ValidationError::DuplicateTag { path, .. } => Some(path),
            ValidationError::ActionNotAnObject { .. } | ValidationError::MissingActionType => None,
        }
    }
}
