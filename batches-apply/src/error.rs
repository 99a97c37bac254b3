//! Error types for batches-apply.

use thiserror::Error;

use batches_core::{
    CampaignId, ChangesetId, ChangesetSpecId, RandId, RepoId, StoreError, UserId,
};

/// All errors that can arise from applying or closing a campaign.
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("campaign spec {0} not found")]
    CampaignSpecNotFound(RandId),

    #[error("campaign {0} not found")]
    CampaignNotFound(CampaignId),

    /// Only the spec's creator or a site admin may apply it.
    #[error("user {user_id} is not allowed to perform this action")]
    Unauthorized { user_id: UserId },

    #[error("a campaign with this name already exists")]
    MatchingCampaignExists,

    /// The caller expected to update a specific campaign and resolved another.
    #[error("expected campaign {expected}, found {}", .found.map_or_else(|| "none".to_string(), |id| id.to_string()))]
    EnsureCampaignFailed {
        expected: CampaignId,
        found: Option<CampaignId>,
    },

    #[error("cannot apply a campaign spec to closed campaign {0}")]
    ApplyClosedCampaign(CampaignId),

    /// A spec targets a repository the actor cannot see, or that is gone.
    #[error("repository {0} not found")]
    RepoNotFound(RepoId),

    /// A mapping row references a changeset that does not exist.
    #[error("changeset {0} not found")]
    ChangesetNotFound(ChangesetId),

    #[error("changeset spec {0} not found")]
    ChangesetSpecNotFound(ChangesetSpecId),
}

impl ApplyError {
    /// Guard violations the caller can correct; everything else is fatal.
    #[must_use]
    pub const fn is_guard_violation(&self) -> bool {
        matches!(
            self,
            ApplyError::MatchingCampaignExists
                | ApplyError::EnsureCampaignFailed { .. }
                | ApplyError::ApplyClosedCampaign(_)
        )
    }
}
