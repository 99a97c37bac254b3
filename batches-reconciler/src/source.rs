//! Code-host operations consumed by the reconciler.
//!
//! Concrete clients (GitHub, GitLab, Bitbucket Server, ...) live outside this
//! crate. Every call must be idempotent from the reconciler's point of view:
//! creating a pull request that already exists for the head ref returns the
//! existing one, closing a closed pull request succeeds, and so on.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use batches_core::{BranchPush, Changeset, DiffStat, ExternalState, Repo};

use crate::error::SourceError;

/// A pull/merge request as reported by the code host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostChangeset {
    pub external_id: String,
    pub external_branch: String,
    pub state: ExternalState,
    pub title: String,
    pub diff_stat: Option<DiffStat>,
    pub updated_at: DateTime<Utc>,
}

impl HostChangeset {
    /// Copy the host's view into the changeset row.
    pub fn write_to(self, changeset: &mut Changeset) {
        changeset.external_id = Some(self.external_id);
        changeset.external_branch = Some(self.external_branch);
        changeset.external_state = Some(self.state);
        changeset.external_title = Some(self.title);
        changeset.external_updated_at = Some(self.updated_at);
        if self.diff_stat.is_some() {
            changeset.diff_stat = self.diff_stat;
        }
    }
}

#[async_trait]
pub trait ChangesetSource: Send + Sync {
    /// Push the spec's commit to its head ref, replacing what is there.
    async fn push_branch(&self, repo: &Repo, push: &BranchPush) -> Result<(), SourceError>;

    /// Open a pull request for the head ref, as a draft if asked.
    async fn create_changeset(
        &self,
        repo: &Repo,
        push: &BranchPush,
        draft: bool,
    ) -> Result<HostChangeset, SourceError>;

    /// Edit title, body and base ref.
    async fn update_changeset(
        &self,
        repo: &Repo,
        external_id: &str,
        push: &BranchPush,
    ) -> Result<HostChangeset, SourceError>;

    /// Mark a draft ready for review.
    async fn undraft_changeset(
        &self,
        repo: &Repo,
        external_id: &str,
    ) -> Result<HostChangeset, SourceError>;

    async fn close_changeset(
        &self,
        repo: &Repo,
        external_id: &str,
    ) -> Result<HostChangeset, SourceError>;

    async fn reopen_changeset(
        &self,
        repo: &Repo,
        external_id: &str,
    ) -> Result<HostChangeset, SourceError>;

    /// Re-read the pull request's current metadata.
    async fn load_changeset(
        &self,
        repo: &Repo,
        external_id: &str,
    ) -> Result<HostChangeset, SourceError>;
}
