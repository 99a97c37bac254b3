//! Applying and closing campaigns.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use batches_core::{
    Actor, Campaign, CampaignId, CampaignSpec, Clock, RandId, RepoAccess, Store, Transaction,
    UserId,
};

use crate::error::ApplyError;
use crate::mapping::hydrate;
use crate::rewirer::Rewirer;

/// Options for [`ApplyService::apply_campaign`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyOptions {
    /// Public id of the campaign spec to apply.
    pub campaign_spec_rand_id: RandId,
    /// Fail unless the spec resolves to this existing campaign.
    pub ensure_campaign_id: Option<CampaignId>,
    /// Fail if a campaign with the spec's namespace and name already exists.
    pub fail_if_campaign_exists: bool,
}

impl ApplyOptions {
    #[must_use]
    pub fn new(campaign_spec_rand_id: impl Into<RandId>) -> Self {
        Self {
            campaign_spec_rand_id: campaign_spec_rand_id.into(),
            ensure_campaign_id: None,
            fail_if_campaign_exists: false,
        }
    }
}

pub struct ApplyService<S: Store> {
    store: Arc<S>,
    access: Arc<dyn RepoAccess>,
    clock: Arc<dyn Clock>,
}

impl<S: Store> ApplyService<S> {
    pub fn new(store: Arc<S>, access: Arc<dyn RepoAccess>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            access,
            clock,
        }
    }

    /// Create or update the campaign described by a campaign spec and rewire
    /// its changesets.
    ///
    /// Applying the spec a campaign already points at returns that campaign
    /// unchanged.
    pub async fn apply_campaign(
        &self,
        actor: &Actor,
        opts: ApplyOptions,
    ) -> Result<Campaign, ApplyError> {
        let spec = self
            .store
            .get_campaign_spec_by_rand_id(&opts.campaign_spec_rand_id)
            .await?
            .ok_or_else(|| ApplyError::CampaignSpecNotFound(opts.campaign_spec_rand_id.clone()))?;
        authorize(actor, spec.user_id)?;

        let existing = self
            .store
            .get_campaign_by_name(spec.namespace, &spec.name)
            .await?;

        if existing.is_some() && opts.fail_if_campaign_exists {
            return Err(ApplyError::MatchingCampaignExists);
        }
        if let Some(expected) = opts.ensure_campaign_id {
            let found = existing.as_ref().map(|c| c.id);
            if found != Some(expected) {
                return Err(ApplyError::EnsureCampaignFailed { expected, found });
            }
        }
        if let Some(campaign) = &existing {
            if campaign.is_closed() {
                return Err(ApplyError::ApplyClosedCampaign(campaign.id));
            }
        }
        if let Some(campaign) = existing.as_ref().filter(|c| c.campaign_spec_id == spec.id) {
            info!(campaign_id = %campaign.id, "campaign spec already applied");
            return Ok(campaign.clone());
        }

        let now = self.clock.now();
        let mut campaign = reconcile_campaign(existing, &spec, actor.user_id, now);

        if !campaign.id.is_unsaved() {
            match self.store.cancel_queued_campaign_changesets(campaign.id).await {
                Ok(canceled) => info!(campaign_id = %campaign.id, canceled, "canceled queued changesets"),
                Err(err) => warn!(campaign_id = %campaign.id, error = %err, "failed to cancel queued changesets"),
            }
        }

        let mut tx = self.store.begin().await?;
        let touched = match self.apply_in_tx(&mut tx, actor, &spec, &mut campaign, now).await {
            Ok(touched) => touched,
            Err(err) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(error = %rollback, "rollback failed");
                }
                return Err(err);
            }
        };
        tx.commit().await?;

        info!(
            campaign_id = %campaign.id,
            campaign_spec_id = %spec.id,
            changesets = touched,
            "applied campaign"
        );
        Ok(campaign)
    }

    async fn apply_in_tx(
        &self,
        tx: &mut S::Tx,
        actor: &Actor,
        spec: &CampaignSpec,
        campaign: &mut Campaign,
        now: DateTime<Utc>,
    ) -> Result<usize, ApplyError> {
        if campaign.id.is_unsaved() {
            tx.create_campaign(campaign).await?;
        }

        let rows = tx.rewirer_mapping_rows(spec.id, campaign.id).await?;
        let mappings = hydrate(tx, rows, actor, self.access.as_ref()).await?;
        let result = Rewirer::new(campaign, now).rewire(mappings)?;

        for id in &result.deleted {
            tx.delete_changeset(*id).await?;
        }
        let touched = result.changesets.len() + result.deleted.len();
        for mut changeset in result.changesets {
            tx.upsert_changeset(&mut changeset).await?;
            if changeset.is_attached_to(campaign.id) {
                campaign.changeset_ids.insert(changeset.id);
            }
        }

        tx.update_campaign(campaign).await?;
        Ok(touched)
    }

    /// Close a campaign. With `close_changesets`, every owned changeset that
    /// is open on the host is queued for closing.
    ///
    /// Closing a closed campaign returns it unchanged.
    pub async fn close_campaign(
        &self,
        actor: &Actor,
        id: CampaignId,
        close_changesets: bool,
    ) -> Result<Campaign, ApplyError> {
        let mut tx = self.store.begin().await?;
        let mut campaign = tx
            .get_campaign(id)
            .await?
            .ok_or(ApplyError::CampaignNotFound(id))?;
        authorize(actor, campaign.initial_applier_id)?;
        if campaign.is_closed() {
            return Ok(campaign);
        }

        let now = self.clock.now();
        campaign.closed_at = Some(now);
        campaign.updated_at = now;
        tx.update_campaign(&campaign).await?;

        let mut queued = 0;
        if close_changesets {
            for mut changeset in tx.list_changesets(id).await? {
                if changeset.is_owned_by(id) && changeset.is_published() && changeset.is_open() {
                    changeset.closing = true;
                    changeset.reset_queued();
                    changeset.updated_at = now;
                    tx.upsert_changeset(&mut changeset).await?;
                    queued += 1;
                }
            }
        }
        tx.commit().await?;

        info!(campaign_id = %id, closing = queued, "closed campaign");
        Ok(campaign)
    }
}

fn authorize(actor: &Actor, owner: UserId) -> Result<(), ApplyError> {
    if actor.site_admin || actor.user_id == owner {
        Ok(())
    } else {
        Err(ApplyError::Unauthorized {
            user_id: actor.user_id,
        })
    }
}

/// Merge the spec's metadata into the existing campaign, or start a new one.
fn reconcile_campaign(
    existing: Option<Campaign>,
    spec: &CampaignSpec,
    applier: UserId,
    now: DateTime<Utc>,
) -> Campaign {
    let mut campaign = existing.unwrap_or_else(|| Campaign {
        id: CampaignId::default(),
        name: spec.name.clone(),
        description: String::new(),
        namespace: spec.namespace,
        campaign_spec_id: spec.id,
        changeset_ids: Default::default(),
        initial_applier_id: applier,
        last_applier_id: applier,
        last_applied_at: now,
        closed_at: None,
        created_at: now,
        updated_at: now,
    });
    campaign.name.clone_from(&spec.name);
    campaign.description.clone_from(&spec.description);
    campaign.namespace = spec.namespace;
    campaign.campaign_spec_id = spec.id;
    campaign.last_applier_id = applier;
    campaign.last_applied_at = now;
    campaign.updated_at = now;
    campaign
}
