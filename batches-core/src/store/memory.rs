//! In-memory store implementation.
//!
//! [`InMemoryStore`] implements the full [`Store`] contract, lease semantics
//! included, so the apply service and the reconciler can be exercised without
//! a database.
//!
//! ## Limitations
//!
//! - **Single-process only**: state is not shared across process boundaries
//! - **No persistence**: all state is lost when the store is dropped
//! - **Serializable by construction**: a transaction holds the store lock until
//!   it commits or is dropped, so other calls wait for it

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use super::{CasResult, Lease, Result, Store, Transaction, CANCELED_MESSAGE};
use crate::error::StoreError;
use crate::ids::{CampaignId, CampaignSpecId, ChangesetId, ChangesetSpecId, RandId, RepoId};
use crate::types::{
    Campaign, CampaignSpec, Changeset, ChangesetSpec, ChangesetSpecDescription, Namespace,
    ReconcilerState, Repo, RewirerMappingRow,
};

#[derive(Debug, Clone)]
struct LeaseRecord {
    lease: Lease,
    closing_at_claim: bool,
}

#[derive(Debug, Clone, Default)]
struct State {
    repos: HashMap<RepoId, Repo>,
    campaign_specs: HashMap<CampaignSpecId, CampaignSpec>,
    changeset_specs: HashMap<ChangesetSpecId, ChangesetSpec>,
    campaigns: HashMap<CampaignId, Campaign>,
    changesets: BTreeMap<ChangesetId, Changeset>,
    leases: HashMap<ChangesetId, LeaseRecord>,
    last_id: i64,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }

    fn insert_campaign(&mut self, campaign: &mut Campaign) -> Result<()> {
        let duplicate = self.campaigns.values().any(|c| {
            c.namespace == campaign.namespace && c.name == campaign.name && c.id != campaign.id
        });
        if duplicate {
            return Err(StoreError::DuplicateCampaign {
                namespace: campaign.namespace.to_string(),
                name: campaign.name.clone(),
            });
        }
        campaign.id = CampaignId(self.next_id());
        self.campaigns.insert(campaign.id, campaign.clone());
        Ok(())
    }

    fn replace_campaign(&mut self, campaign: &Campaign) -> Result<()> {
        let row = self
            .campaigns
            .get_mut(&campaign.id)
            .ok_or(StoreError::CampaignNotFound(campaign.id))?;
        *row = campaign.clone();
        Ok(())
    }

    fn upsert_changeset(&mut self, changeset: &mut Changeset) -> Result<()> {
        if changeset.id.is_unsaved() {
            changeset.id = ChangesetId(self.next_id());
        } else if !self.changesets.contains_key(&changeset.id) {
            return Err(StoreError::ChangesetNotFound(changeset.id));
        }
        self.changesets.insert(changeset.id, changeset.clone());
        Ok(())
    }

    fn head_ref_of(&self, changeset: &Changeset) -> Option<&str> {
        let spec_id = changeset.current_spec_id?;
        let spec = self.changeset_specs.get(&spec_id)?;
        spec.branch_push().map(|push| push.head_ref.as_str())
    }

    fn mapping_rows(&self, campaign_spec: CampaignSpecId, campaign: CampaignId) -> Vec<RewirerMappingRow> {
        let mut specs: Vec<&ChangesetSpec> = self
            .changeset_specs
            .values()
            .filter(|s| s.campaign_spec_id == campaign_spec)
            .collect();
        specs.sort_by_key(|s| s.id);

        let mut matched = HashSet::new();
        let mut rows = Vec::with_capacity(specs.len());
        for spec in specs {
            let existing = self.changesets.values().find(|cs| {
                cs.repo_id == spec.repo_id
                    && !matched.contains(&cs.id)
                    && match &spec.description {
                        ChangesetSpecDescription::TrackExisting { external_id } => {
                            cs.external_id.as_deref() == Some(external_id.as_str())
                        }
                        ChangesetSpecDescription::BranchPush(push) => {
                            cs.is_owned_by(campaign)
                                && self.head_ref_of(cs) == Some(push.head_ref.as_str())
                        }
                    }
            });
            if let Some(cs) = existing {
                matched.insert(cs.id);
            }
            rows.push(RewirerMappingRow {
                repo_id: spec.repo_id,
                changeset_id: existing.map(|cs| cs.id),
                changeset_spec_id: Some(spec.id),
            });
        }

        for cs in self.changesets.values() {
            if cs.is_attached_to(campaign) && !matched.contains(&cs.id) {
                rows.push(RewirerMappingRow {
                    repo_id: cs.repo_id,
                    changeset_id: Some(cs.id),
                    changeset_spec_id: None,
                });
            }
        }
        rows
    }
}

/// In-memory [`Store`].
///
/// Cloning is cheap and yields a handle to the same state.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live leases.
    pub async fn lease_count(&self) -> usize {
        self.state.lock().await.leases.len()
    }

    /// Replaces a changeset row as-is. Test and fixture helper.
    pub async fn put_changeset(&self, changeset: &mut Changeset) -> Result<()> {
        self.state.lock().await.upsert_changeset(changeset)
    }
}

#[async_trait]
impl Store for InMemoryStore {
    type Tx = InMemoryTx;

    async fn begin(&self) -> Result<InMemoryTx> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let staged = guard.clone();
        Ok(InMemoryTx { guard, staged })
    }

    async fn create_repo(&self, repo: &Repo) -> Result<()> {
        self.state.lock().await.repos.insert(repo.id, repo.clone());
        Ok(())
    }

    async fn create_campaign_spec(&self, spec: &mut CampaignSpec) -> Result<()> {
        let mut st = self.state.lock().await;
        spec.id = CampaignSpecId(st.next_id());
        st.campaign_specs.insert(spec.id, spec.clone());
        Ok(())
    }

    async fn create_changeset_spec(&self, spec: &mut ChangesetSpec) -> Result<()> {
        let mut st = self.state.lock().await;
        spec.id = ChangesetSpecId(st.next_id());
        st.changeset_specs.insert(spec.id, spec.clone());
        Ok(())
    }

    async fn get_campaign_spec_by_rand_id(&self, rand_id: &RandId) -> Result<Option<CampaignSpec>> {
        let st = self.state.lock().await;
        Ok(st
            .campaign_specs
            .values()
            .find(|s| &s.rand_id == rand_id)
            .cloned())
    }

    async fn get_campaign(&self, id: CampaignId) -> Result<Option<Campaign>> {
        Ok(self.state.lock().await.campaigns.get(&id).cloned())
    }

    async fn get_campaign_by_name(
        &self,
        namespace: Namespace,
        name: &str,
    ) -> Result<Option<Campaign>> {
        let st = self.state.lock().await;
        Ok(st
            .campaigns
            .values()
            .find(|c| c.namespace == namespace && c.name == name)
            .cloned())
    }

    async fn get_changeset(&self, id: ChangesetId) -> Result<Option<Changeset>> {
        Ok(self.state.lock().await.changesets.get(&id).cloned())
    }

    async fn get_changeset_spec(&self, id: ChangesetSpecId) -> Result<Option<ChangesetSpec>> {
        Ok(self.state.lock().await.changeset_specs.get(&id).cloned())
    }

    async fn get_repo(&self, id: RepoId) -> Result<Option<Repo>> {
        Ok(self.state.lock().await.repos.get(&id).cloned())
    }

    async fn list_changesets(&self, campaign: Option<CampaignId>) -> Result<Vec<Changeset>> {
        let st = self.state.lock().await;
        Ok(st
            .changesets
            .values()
            .filter(|cs| campaign.map_or(true, |id| cs.is_attached_to(id)))
            .cloned()
            .collect())
    }

    async fn cancel_queued_campaign_changesets(&self, campaign: CampaignId) -> Result<usize> {
        let mut st = self.state.lock().await;
        let mut canceled = 0;
        for cs in st.changesets.values_mut() {
            let cancelable = match cs.reconciler_state {
                ReconcilerState::Queued => true,
                ReconcilerState::Errored => cs.process_after.is_some(),
                ReconcilerState::Processing | ReconcilerState::Completed => false,
            };
            // Detached rows still closing keep their place in the queue.
            if cs.is_owned_by(campaign) && cs.is_attached_to(campaign) && cancelable {
                cs.reconciler_state = ReconcilerState::Errored;
                cs.failure_message = Some(CANCELED_MESSAGE.to_string());
                cs.process_after = None;
                canceled += 1;
            }
        }
        Ok(canceled)
    }

    async fn lease_next_changeset(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
        lease_duration: Duration,
    ) -> Result<Option<(Changeset, Lease)>> {
        let mut st = self.state.lock().await;
        let candidate = st
            .changesets
            .values()
            .filter(|cs| {
                cs.reconciler_state == ReconcilerState::Queued
                    && !st.leases.contains_key(&cs.id)
                    && cs.process_after.map_or(true, |at| at <= now)
            })
            .min_by_key(|cs| (cs.updated_at, cs.id))
            .map(|cs| cs.id);

        let Some(id) = candidate else {
            return Ok(None);
        };

        let expires_at = now
            + chrono::Duration::from_std(lease_duration)
                .map_err(|e| StoreError::Backend(format!("invalid lease duration: {e}")))?;
        let lease = Lease {
            changeset_id: id,
            worker_id: worker_id.to_string(),
            token: uuid::Uuid::new_v4().to_string(),
            expires_at,
        };

        let Some(row) = st.changesets.get_mut(&id) else {
            return Ok(None);
        };
        row.reconciler_state = ReconcilerState::Processing;
        let claimed = row.clone();
        st.leases.insert(
            id,
            LeaseRecord {
                lease: lease.clone(),
                closing_at_claim: claimed.closing,
            },
        );
        debug!(changeset_id = %id, worker_id, "lease granted");
        Ok(Some((claimed, lease)))
    }

    async fn renew_lease(
        &self,
        lease: &mut Lease,
        now: DateTime<Utc>,
        lease_duration: Duration,
    ) -> Result<CasResult> {
        let mut st = self.state.lock().await;
        if !st.changesets.contains_key(&lease.changeset_id) {
            return Ok(CasResult::NotFound);
        }
        let Some(record) = st.leases.get_mut(&lease.changeset_id) else {
            return Ok(CasResult::LeaseLost);
        };
        if record.lease.token != lease.token {
            return Ok(CasResult::LeaseLost);
        }
        let expires_at = now
            + chrono::Duration::from_std(lease_duration)
                .map_err(|e| StoreError::Backend(format!("invalid lease duration: {e}")))?;
        record.lease.expires_at = expires_at;
        lease.expires_at = expires_at;
        Ok(CasResult::Success)
    }

    async fn finish_lease(&self, lease: &Lease, outcome: &Changeset) -> Result<CasResult> {
        let mut st = self.state.lock().await;
        let id = lease.changeset_id;
        match st.leases.get(&id) {
            Some(record) if record.lease.token == lease.token => {}
            _ => return Ok(CasResult::LeaseLost),
        }
        let Some(record) = st.leases.remove(&id) else {
            return Ok(CasResult::LeaseLost);
        };
        let Some(row) = st.changesets.get_mut(&id) else {
            return Ok(CasResult::NotFound);
        };

        row.external_id.clone_from(&outcome.external_id);
        row.external_branch.clone_from(&outcome.external_branch);
        row.external_state = outcome.external_state;
        row.external_title.clone_from(&outcome.external_title);
        row.external_updated_at = outcome.external_updated_at;
        if outcome.diff_stat.is_some() {
            row.diff_stat = outcome.diff_stat;
        }
        row.publication_state = outcome.publication_state;
        row.unsynced = outcome.unsynced;
        if record.closing_at_claim && !outcome.closing {
            row.closing = false;
        }

        // An apply that re-queued or canceled the row mid-flight owns its state.
        if row.reconciler_state == ReconcilerState::Processing {
            row.reconciler_state = outcome.reconciler_state;
            row.failure_message.clone_from(&outcome.failure_message);
            row.num_failures = outcome.num_failures;
            row.process_after = outcome.process_after;
        }
        row.updated_at = outcome.updated_at;
        Ok(CasResult::Success)
    }

    async fn requeue_due_errored(&self, now: DateTime<Utc>, max_attempts: u32) -> Result<usize> {
        let mut st = self.state.lock().await;
        let mut requeued = 0;
        for cs in st.changesets.values_mut() {
            let due = cs.process_after.is_some_and(|at| at <= now);
            if cs.reconciler_state == ReconcilerState::Errored && due && cs.num_failures < max_attempts
            {
                cs.reconciler_state = ReconcilerState::Queued;
                requeued += 1;
            }
        }
        Ok(requeued)
    }

    async fn reset_expired_leases(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut st = self.state.lock().await;
        let expired: Vec<ChangesetId> = st
            .leases
            .values()
            .filter(|r| r.lease.is_expired(now))
            .map(|r| r.lease.changeset_id)
            .collect();
        for id in &expired {
            if let Some(record) = st.leases.remove(id) {
                warn!(
                    changeset_id = %id,
                    worker_id = %record.lease.worker_id,
                    "lease expired; re-queueing"
                );
            }
            if let Some(cs) = st.changesets.get_mut(id) {
                if cs.reconciler_state == ReconcilerState::Processing {
                    cs.reconciler_state = ReconcilerState::Queued;
                }
            }
        }
        Ok(expired.len())
    }
}

/// Transaction over an [`InMemoryStore`].
///
/// Works on a staged copy; [`Transaction::commit`] swaps it in.
#[derive(Debug)]
pub struct InMemoryTx {
    guard: OwnedMutexGuard<State>,
    staged: State,
}

#[async_trait]
impl Transaction for InMemoryTx {
    async fn get_campaign(&mut self, id: CampaignId) -> Result<Option<Campaign>> {
        Ok(self.staged.campaigns.get(&id).cloned())
    }

    async fn create_campaign(&mut self, campaign: &mut Campaign) -> Result<()> {
        self.staged.insert_campaign(campaign)
    }

    async fn update_campaign(&mut self, campaign: &Campaign) -> Result<()> {
        self.staged.replace_campaign(campaign)
    }

    async fn rewirer_mapping_rows(
        &mut self,
        campaign_spec: CampaignSpecId,
        campaign: CampaignId,
    ) -> Result<Vec<RewirerMappingRow>> {
        Ok(self.staged.mapping_rows(campaign_spec, campaign))
    }

    async fn get_changesets(&mut self, ids: &[ChangesetId]) -> Result<Vec<Changeset>> {
        Ok(ids
            .iter()
            .filter_map(|id| self.staged.changesets.get(id).cloned())
            .collect())
    }

    async fn get_changeset_specs(&mut self, ids: &[ChangesetSpecId]) -> Result<Vec<ChangesetSpec>> {
        Ok(ids
            .iter()
            .filter_map(|id| self.staged.changeset_specs.get(id).cloned())
            .collect())
    }

    async fn get_repos(&mut self, ids: &[RepoId]) -> Result<Vec<Repo>> {
        Ok(ids
            .iter()
            .filter_map(|id| self.staged.repos.get(id).cloned())
            .collect())
    }

    async fn list_changesets(&mut self, campaign: CampaignId) -> Result<Vec<Changeset>> {
        Ok(self
            .staged
            .changesets
            .values()
            .filter(|cs| cs.is_attached_to(campaign))
            .cloned()
            .collect())
    }

    async fn upsert_changeset(&mut self, changeset: &mut Changeset) -> Result<()> {
        self.staged.upsert_changeset(changeset)
    }

    async fn delete_changeset(&mut self, id: ChangesetId) -> Result<()> {
        self.staged
            .changesets
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::ChangesetNotFound(id))
    }

    async fn commit(self) -> Result<()> {
        let InMemoryTx { mut guard, staged } = self;
        *guard = staged;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PublicationState;

    fn queued(id: i64) -> Changeset {
        Changeset {
            id: ChangesetId(id),
            owned_by_campaign_id: Some(CampaignId(100)),
            campaign_ids: [CampaignId(100)].into_iter().collect(),
            ..Changeset::default()
        }
    }

    async fn store_with(rows: Vec<Changeset>) -> InMemoryStore {
        let store = InMemoryStore::new();
        {
            let mut st = store.state.lock().await;
            for cs in rows {
                st.last_id = st.last_id.max(cs.id.0);
                st.changesets.insert(cs.id, cs);
            }
        }
        store
    }

    #[tokio::test]
    async fn lease_claims_each_row_once() {
        let store = store_with(vec![queued(1)]).await;
        let now = Utc::now();
        let first = store
            .lease_next_changeset("w1", now, Duration::from_secs(60))
            .await
            .expect("lease");
        let second = store
            .lease_next_changeset("w2", now, Duration::from_secs(60))
            .await
            .expect("lease");
        let (cs, lease) = first.expect("first worker gets the row");
        assert_eq!(cs.reconciler_state, ReconcilerState::Processing);
        assert_eq!(lease.worker_id, "w1");
        assert!(second.is_none(), "row must not be leased twice");
    }

    #[tokio::test]
    async fn lease_skips_rows_scheduled_in_the_future() {
        let now = Utc::now();
        let mut cs = queued(1);
        cs.process_after = Some(now + chrono::Duration::seconds(30));
        let store = store_with(vec![cs]).await;
        let leased = store
            .lease_next_changeset("w", now, Duration::from_secs(60))
            .await
            .expect("lease");
        assert!(leased.is_none());
    }

    #[tokio::test]
    async fn finish_with_stale_token_is_rejected() {
        let store = store_with(vec![queued(1)]).await;
        let now = Utc::now();
        let (mut cs, mut lease) = store
            .lease_next_changeset("w", now, Duration::from_secs(60))
            .await
            .expect("lease")
            .expect("row");
        lease.token = "forged".into();
        cs.reconciler_state = ReconcilerState::Completed;
        let result = store.finish_lease(&lease, &cs).await.expect("finish");
        assert_eq!(result, CasResult::LeaseLost);
    }

    #[tokio::test]
    async fn finish_keeps_requeue_made_during_processing() {
        let store = store_with(vec![queued(1)]).await;
        let now = Utc::now();
        let (mut outcome, lease) = store
            .lease_next_changeset("w", now, Duration::from_secs(60))
            .await
            .expect("lease")
            .expect("row");

        // A re-apply rotates the spec and re-queues while the worker runs.
        let mut tx = store.begin().await.expect("begin");
        let mut row = tx
            .get_changesets(&[ChangesetId(1)])
            .await
            .expect("get")
            .remove(0);
        row.current_spec_id = Some(ChangesetSpecId(9));
        row.reconciler_state = ReconcilerState::Queued;
        tx.upsert_changeset(&mut row).await.expect("upsert");
        tx.commit().await.expect("commit");

        outcome.reconciler_state = ReconcilerState::Completed;
        outcome.publication_state = PublicationState::Published;
        outcome.external_id = Some("12".into());
        let result = store.finish_lease(&lease, &outcome).await.expect("finish");
        assert!(result.is_success());

        let row = store.get_changeset(ChangesetId(1)).await.unwrap().unwrap();
        assert_eq!(row.reconciler_state, ReconcilerState::Queued);
        assert_eq!(row.current_spec_id, Some(ChangesetSpecId(9)));
        assert_eq!(row.external_id.as_deref(), Some("12"));
        assert_eq!(store.lease_count().await, 0);
    }

    #[tokio::test]
    async fn expired_lease_is_reset_to_queued() {
        let store = store_with(vec![queued(1)]).await;
        let now = Utc::now();
        store
            .lease_next_changeset("w", now, Duration::from_secs(10))
            .await
            .expect("lease")
            .expect("row");
        let reset = store
            .reset_expired_leases(now + chrono::Duration::seconds(11))
            .await
            .expect("reset");
        assert_eq!(reset, 1);
        let row = store.get_changeset(ChangesetId(1)).await.unwrap().unwrap();
        assert_eq!(row.reconciler_state, ReconcilerState::Queued);
    }

    #[tokio::test]
    async fn renewed_lease_survives_its_original_expiry() {
        let store = store_with(vec![queued(1)]).await;
        let now = Utc::now();
        let (_, mut lease) = store
            .lease_next_changeset("w", now, Duration::from_secs(10))
            .await
            .expect("lease")
            .expect("row");

        let later = now + chrono::Duration::seconds(8);
        let renewed = store
            .renew_lease(&mut lease, later, Duration::from_secs(10))
            .await
            .expect("renew");
        assert_eq!(renewed, CasResult::Success);
        assert_eq!(lease.expires_at, later + chrono::Duration::seconds(10));

        let reset = store
            .reset_expired_leases(now + chrono::Duration::seconds(11))
            .await
            .expect("reset");
        assert_eq!(reset, 0);
        let row = store.get_changeset(ChangesetId(1)).await.unwrap().unwrap();
        assert_eq!(row.reconciler_state, ReconcilerState::Processing);
    }

    #[tokio::test]
    async fn renew_after_reset_reports_lease_lost() {
        let store = store_with(vec![queued(1)]).await;
        let now = Utc::now();
        let (_, mut lease) = store
            .lease_next_changeset("w1", now, Duration::from_secs(10))
            .await
            .expect("lease")
            .expect("row");
        let later = now + chrono::Duration::seconds(11);
        store.reset_expired_leases(later).await.expect("reset");
        store
            .lease_next_changeset("w2", later, Duration::from_secs(10))
            .await
            .expect("lease")
            .expect("row is leasable again");

        let renewed = store
            .renew_lease(&mut lease, later, Duration::from_secs(10))
            .await
            .expect("renew");
        assert_eq!(renewed, CasResult::LeaseLost);
        assert_eq!(lease.expires_at, now + chrono::Duration::seconds(10));
    }

    #[tokio::test]
    async fn cancel_touches_queued_and_retryable_rows_only() {
        let now = Utc::now();
        let mut retryable = queued(2);
        retryable.reconciler_state = ReconcilerState::Errored;
        retryable.process_after = Some(now);
        let mut terminal = queued(3);
        terminal.reconciler_state = ReconcilerState::Errored;
        let mut done = queued(4);
        done.reconciler_state = ReconcilerState::Completed;
        let mut foreign = queued(5);
        foreign.owned_by_campaign_id = Some(CampaignId(200));
        foreign.campaign_ids = [CampaignId(200)].into_iter().collect();
        let mut detached = queued(6);
        detached.closing = true;
        detached.campaign_ids.clear();

        let store = store_with(vec![queued(1), retryable, terminal, done, foreign, detached]).await;
        let canceled = store
            .cancel_queued_campaign_changesets(CampaignId(100))
            .await
            .expect("cancel");
        assert_eq!(canceled, 2);
        let row = store.get_changeset(ChangesetId(1)).await.unwrap().unwrap();
        assert_eq!(row.reconciler_state, ReconcilerState::Errored);
        assert_eq!(row.failure_message.as_deref(), Some(CANCELED_MESSAGE));
        assert!(row.process_after.is_none());
        let row = store.get_changeset(ChangesetId(6)).await.unwrap().unwrap();
        assert_eq!(row.reconciler_state, ReconcilerState::Queued);
    }

    #[tokio::test]
    async fn requeue_respects_attempt_bound() {
        let now = Utc::now();
        let mut under = queued(1);
        under.reconciler_state = ReconcilerState::Errored;
        under.num_failures = 1;
        under.process_after = Some(now);
        let mut over = queued(2);
        over.reconciler_state = ReconcilerState::Errored;
        over.num_failures = 3;
        over.process_after = Some(now);

        let store = store_with(vec![under, over]).await;
        let requeued = store.requeue_due_errored(now, 3).await.expect("requeue");
        assert_eq!(requeued, 1);
        let row = store.get_changeset(ChangesetId(2)).await.unwrap().unwrap();
        assert_eq!(row.reconciler_state, ReconcilerState::Errored);
    }

    #[tokio::test]
    async fn dropped_transaction_rolls_back() {
        let store = InMemoryStore::new();
        {
            let mut tx = store.begin().await.expect("begin");
            let mut cs = queued(0);
            tx.upsert_changeset(&mut cs).await.expect("upsert");
        }
        assert!(store.list_changesets(None).await.unwrap().is_empty());
    }
}
