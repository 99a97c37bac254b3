//! Transactional persistence for specs, campaigns and changesets.
//!
//! # Concurrency contract
//!
//! - [`Store::lease_next_changeset`] is the only way a worker obtains a
//!   changeset to reconcile. The claim is atomic: a row is handed out only if
//!   it is `Queued`, due, and not covered by a live [`Lease`]. It flips to
//!   `Processing` in the same step.
//! - A lease is exclusive only until `expires_at`. Once it passes,
//!   [`Store::reset_expired_leases`] may hand the row to another worker, so a
//!   worker calls [`Store::renew_lease`] between steps of a long attempt. If
//!   a single step outlives the lease, two workers can act on the same row;
//!   code-host calls must then tolerate a repeat.
//! - [`Store::finish_lease`] writes the outcome back only while the lease
//!   token still matches, and only touches reconciler-owned columns, so a
//!   concurrent apply is never clobbered.
//! - [`Store::begin`] opens a [`Transaction`]; the apply service is the only
//!   caller that mutates several rows as a group.

pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::ids::{CampaignId, CampaignSpecId, ChangesetId, ChangesetSpecId, RandId, RepoId};
use crate::types::{
    Campaign, CampaignSpec, Changeset, ChangesetSpec, Namespace, Repo, RewirerMappingRow,
};

pub type Result<T> = std::result::Result<T, StoreError>;

/// Failure message stored on rows canceled by a re-apply.
pub const CANCELED_MESSAGE: &str = "canceled";

/// Exclusive, time-bounded claim on one changeset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub changeset_id: ChangesetId,
    pub worker_id: String,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Result of a conditional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasResult {
    /// The write was applied.
    Success,
    /// The row no longer exists.
    NotFound,
    /// The lease expired or was replaced; nothing was written.
    LeaseLost,
}

impl CasResult {
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Storage abstraction used by the apply service and the reconciler.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    type Tx: Transaction;

    /// Opens a transaction. Dropping it without [`Transaction::commit`] rolls back.
    async fn begin(&self) -> Result<Self::Tx>;

    // --- Inputs produced upstream ---

    async fn create_repo(&self, repo: &Repo) -> Result<()>;
    async fn create_campaign_spec(&self, spec: &mut CampaignSpec) -> Result<()>;
    async fn create_changeset_spec(&self, spec: &mut ChangesetSpec) -> Result<()>;

    // --- Reads ---

    async fn get_campaign_spec_by_rand_id(&self, rand_id: &RandId) -> Result<Option<CampaignSpec>>;
    async fn get_campaign(&self, id: CampaignId) -> Result<Option<Campaign>>;
    async fn get_campaign_by_name(
        &self,
        namespace: Namespace,
        name: &str,
    ) -> Result<Option<Campaign>>;
    async fn get_changeset(&self, id: ChangesetId) -> Result<Option<Changeset>>;
    async fn get_changeset_spec(&self, id: ChangesetSpecId) -> Result<Option<ChangesetSpec>>;
    async fn get_repo(&self, id: RepoId) -> Result<Option<Repo>>;

    /// Changesets attached to `campaign`, or every changeset when `None`.
    /// Sorted by id.
    async fn list_changesets(&self, campaign: Option<CampaignId>) -> Result<Vec<Changeset>>;

    // --- Reconciler queue ---

    /// Marks `Queued` and retry-scheduled `Errored` rows owned by and attached
    /// to `campaign` as canceled. Returns how many rows changed.
    async fn cancel_queued_campaign_changesets(&self, campaign: CampaignId) -> Result<usize>;

    /// Atomically claims the next due `Queued` changeset.
    async fn lease_next_changeset(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
        lease_duration: Duration,
    ) -> Result<Option<(Changeset, Lease)>>;

    /// Pushes `lease.expires_at` to `now + lease_duration` while the token
    /// still matches. `LeaseLost` once the lease was reset or replaced.
    async fn renew_lease(
        &self,
        lease: &mut Lease,
        now: DateTime<Utc>,
        lease_duration: Duration,
    ) -> Result<CasResult>;

    /// Writes back the reconciler-owned columns of `outcome` and releases the lease.
    async fn finish_lease(&self, lease: &Lease, outcome: &Changeset) -> Result<CasResult>;

    /// Moves due `Errored` rows with fewer than `max_attempts` failures back to `Queued`.
    async fn requeue_due_errored(&self, now: DateTime<Utc>, max_attempts: u32) -> Result<usize>;

    /// Drops leases that expired at or before `now` and re-queues their rows.
    async fn reset_expired_leases(&self, now: DateTime<Utc>) -> Result<usize>;
}

/// A unit of work over several rows.
#[async_trait]
pub trait Transaction: Send {
    async fn get_campaign(&mut self, id: CampaignId) -> Result<Option<Campaign>>;

    /// Inserts `campaign` and assigns its id.
    async fn create_campaign(&mut self, campaign: &mut Campaign) -> Result<()>;
    async fn update_campaign(&mut self, campaign: &Campaign) -> Result<()>;

    /// Joins the changeset specs of `campaign_spec` with the changesets of
    /// `campaign`, one row per repository/changeset pair.
    async fn rewirer_mapping_rows(
        &mut self,
        campaign_spec: CampaignSpecId,
        campaign: CampaignId,
    ) -> Result<Vec<RewirerMappingRow>>;

    /// Rows for the ids that exist; missing ids are simply absent.
    async fn get_changesets(&mut self, ids: &[ChangesetId]) -> Result<Vec<Changeset>>;
    async fn get_changeset_specs(&mut self, ids: &[ChangesetSpecId]) -> Result<Vec<ChangesetSpec>>;
    async fn get_repos(&mut self, ids: &[RepoId]) -> Result<Vec<Repo>>;
    async fn list_changesets(&mut self, campaign: CampaignId) -> Result<Vec<Changeset>>;

    /// Inserts (unsaved id) or replaces the row; assigns the id on insert.
    async fn upsert_changeset(&mut self, changeset: &mut Changeset) -> Result<()>;
    async fn delete_changeset(&mut self, id: ChangesetId) -> Result<()>;

    async fn commit(self) -> Result<()>;
    async fn rollback(self) -> Result<()>;
}
