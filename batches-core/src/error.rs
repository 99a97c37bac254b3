//! Error types for batches-core.

use thiserror::Error;

use crate::ids::{CampaignId, ChangesetId};

/// All errors that can arise from store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A campaign row was addressed by id but does not exist.
    #[error("campaign {0} not found")]
    CampaignNotFound(CampaignId),

    /// A changeset row was addressed by id but does not exist.
    #[error("changeset {0} not found")]
    ChangesetNotFound(ChangesetId),

    /// A second campaign with the same namespace and name was inserted.
    #[error("campaign named {name:?} already exists in namespace {namespace}")]
    DuplicateCampaign { namespace: String, name: String },

    /// Backend-specific failure (connection loss, serialization conflict, ...).
    #[error("storage error: {0}")]
    Backend(String),
}
