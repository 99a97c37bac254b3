//! Error types for batches-reconciler.

use std::path::PathBuf;

use thiserror::Error;

use batches_core::{ChangesetId, ChangesetSpecId, RepoId, StoreError};

use crate::plan::Operation;

/// Failure reported by a code host.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Transport failure; the request may not have reached the host.
    #[error("network error: {0}")]
    Network(String),

    /// The host asked us to slow down.
    #[error("rate limited by code host")]
    RateLimited,

    /// The host answered with a server-side failure.
    #[error("code host unavailable: {0}")]
    Unavailable(String),

    /// The pull request or branch does not exist on the host.
    #[error("not found on code host: {0}")]
    NotFound(String),

    /// The host refused the request (permissions, validation, conflicts).
    #[error("rejected by code host: {0}")]
    Rejected(String),
}

impl SourceError {
    /// Transient failures are retried with backoff; the rest are terminal.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            SourceError::Network(_) | SourceError::RateLimited | SourceError::Unavailable(_)
        )
    }
}

/// All errors that can arise while reconciling a changeset.
#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// An owned changeset reached the planner without a current spec.
    #[error("changeset {0} has no current spec")]
    MissingCurrentSpec(ChangesetId),

    #[error("changeset spec {0} not found")]
    SpecNotFound(ChangesetSpecId),

    #[error("repository {0} not found")]
    RepoNotFound(RepoId),

    /// The operation needs a branch-push spec and the changeset has none.
    #[error("operation {op} needs a branch-push spec on changeset {changeset_id}")]
    MissingBranchPush {
        changeset_id: ChangesetId,
        op: Operation,
    },

    /// The operation addresses the host PR but it was never published.
    #[error("operation {op} needs an external id on changeset {changeset_id}")]
    MissingExternalId {
        changeset_id: ChangesetId,
        op: Operation,
    },

    /// The lease was reset or replaced before `op` could run.
    #[error("lease on changeset {changeset_id} lost before {op}")]
    LeaseLost {
        changeset_id: ChangesetId,
        op: Operation,
    },

    #[error("{op} failed: {source}")]
    Source {
        op: Operation,
        #[source]
        source: SourceError,
    },

    #[error("worker task failed: {0}")]
    Join(String),
}

impl ReconcilerError {
    /// Whether another attempt could succeed without anyone intervening.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            ReconcilerError::Store(_) => true,
            ReconcilerError::Source { source, .. } => source.is_retryable(),
            _ => false,
        }
    }
}

/// Errors from loading the reconciler configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Malformed YAML, with the offending file.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,
}
