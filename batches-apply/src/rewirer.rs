//! Maps a new spec generation onto a campaign's changesets.
//!
//! Per mapping, first match wins:
//! 1. No spec, changeset present, repository invisible: left alone, still attached
//! 2. No spec, changeset present: detached; owned and open on the host it is
//!    also marked `closing`, owned and never published it is deleted
//! 3. Spec present, repository invisible: the whole rewire fails
//! 4. Spec present, no changeset: a new changeset is created
//! 5. Spec present, changeset present: tracked, or updated to the new spec
//!
//! The rewirer only stages rows; persisting them is the caller's job.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use tracing::debug;

use batches_core::{
    Campaign, Changeset, ChangesetId, ChangesetSpec, ChangesetSpecDescription, PublicationState,
    ReconcilerState, Repo,
};

use crate::error::ApplyError;
use crate::mapping::RewirerMapping;

/// Staged outcome of [`Rewirer::rewire`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewireResult {
    /// Rows to upsert; new ones still carry an unsaved id.
    pub changesets: Vec<Changeset>,
    /// Never-published rows to delete.
    pub deleted: Vec<ChangesetId>,
}

pub struct Rewirer<'a> {
    campaign: &'a mut Campaign,
    now: DateTime<Utc>,
}

impl<'a> Rewirer<'a> {
    /// `campaign` must already be persisted so its id can be referenced.
    pub fn new(campaign: &'a mut Campaign, now: DateTime<Utc>) -> Self {
        Self { campaign, now }
    }

    /// Stage the changeset mutations for `mappings`.
    ///
    /// Resets `campaign.changeset_ids` to the existing changesets that stay
    /// attached. Ids of newly created rows are only known after persisting
    /// and must be added by the caller.
    pub fn rewire(mut self, mappings: Vec<RewirerMapping>) -> Result<RewireResult, ApplyError> {
        let mut result = RewireResult::default();
        let mut attached = BTreeSet::new();

        for mapping in mappings {
            let RewirerMapping {
                repo_id,
                repo,
                changeset,
                changeset_spec,
            } = mapping;

            match (changeset_spec, changeset) {
                (None, None) => {}
                (None, Some(changeset)) => {
                    if repo.is_none() {
                        debug!(changeset_id = %changeset.id, "repository not visible, leaving changeset");
                        if changeset.is_attached_to(self.campaign.id) {
                            attached.insert(changeset.id);
                        }
                        continue;
                    }
                    self.detach(changeset, &mut result);
                }
                (Some(spec), changeset) => {
                    let repo = repo.ok_or(ApplyError::RepoNotFound(repo_id))?;
                    let changeset = match changeset {
                        None => self.create(&repo, &spec),
                        Some(existing) => self.update(existing, &spec),
                    };
                    if !changeset.id.is_unsaved() {
                        attached.insert(changeset.id);
                    }
                    result.changesets.push(changeset);
                }
            }
        }

        self.campaign.changeset_ids = attached;
        Ok(result)
    }

    fn detach(&self, mut changeset: Changeset, result: &mut RewireResult) {
        let campaign_id = self.campaign.id;
        changeset.campaign_ids.remove(&campaign_id);
        let owned = changeset.is_owned_by(campaign_id);

        if owned && changeset.publication_state == PublicationState::Unpublished {
            if changeset.campaign_ids.is_empty() {
                debug!(changeset_id = %changeset.id, "deleting unpublished changeset");
                result.deleted.push(changeset.id);
                return;
            }
        } else if owned && changeset.is_published() && changeset.is_open() {
            debug!(changeset_id = %changeset.id, "closing detached changeset");
            changeset.closing = true;
            changeset.reset_queued();
        }

        changeset.updated_at = self.now;
        result.changesets.push(changeset);
    }

    fn create(&self, repo: &Repo, spec: &ChangesetSpec) -> Changeset {
        let campaign_id = self.campaign.id;
        let mut changeset = Changeset {
            repo_id: repo.id,
            code_host: repo.code_host,
            campaign_ids: [campaign_id].into_iter().collect(),
            reconciler_state: ReconcilerState::Queued,
            created_at: self.now,
            updated_at: self.now,
            ..Changeset::default()
        };

        match &spec.description {
            ChangesetSpecDescription::TrackExisting { external_id } => {
                changeset.external_id = Some(external_id.clone());
                changeset.publication_state = PublicationState::Published;
                changeset.unsynced = true;
            }
            ChangesetSpecDescription::BranchPush(_) => {
                changeset.current_spec_id = Some(spec.id);
                changeset.owned_by_campaign_id = Some(campaign_id);
                changeset.publication_state = PublicationState::Unpublished;
                changeset.diff_stat = spec.diff_stat;
            }
        }
        changeset
    }

    fn update(&self, mut changeset: Changeset, spec: &ChangesetSpec) -> Changeset {
        let campaign_id = self.campaign.id;
        changeset.campaign_ids.insert(campaign_id);
        changeset.updated_at = self.now;

        match &spec.description {
            ChangesetSpecDescription::TrackExisting { .. } => {
                let foreign_owner = changeset
                    .owned_by_campaign_id
                    .is_some_and(|owner| owner != campaign_id);
                if changeset.reconciler_state == ReconcilerState::Errored && !foreign_owner {
                    changeset.reset_queued();
                }
            }
            ChangesetSpecDescription::BranchPush(_) => {
                // An unresolved diff must not be compounded by another rotation.
                if !matches!(
                    changeset.reconciler_state,
                    ReconcilerState::Errored | ReconcilerState::Queued
                ) {
                    changeset.previous_spec_id = changeset.current_spec_id;
                }
                changeset.current_spec_id = Some(spec.id);
                changeset.diff_stat = spec.diff_stat;
                changeset.closing = false;
                changeset.reset_queued();
            }
        }
        changeset
    }
}

#[cfg(test)]
mod tests {
    use batches_core::{
        BranchPush, CampaignId, CampaignSpecId, ChangesetSpecId, CodeHostKind, DiffStat,
        ExternalState, Namespace, RandId, RepoId, UserId,
    };

    use super::*;

    const CAMPAIGN: CampaignId = CampaignId(10);

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    fn campaign() -> Campaign {
        let now = now();
        Campaign {
            id: CAMPAIGN,
            name: "bump".into(),
            description: String::new(),
            namespace: Namespace::User(UserId(1)),
            campaign_spec_id: CampaignSpecId(2),
            changeset_ids: [ChangesetId(99)].into_iter().collect(),
            initial_applier_id: UserId(1),
            last_applier_id: UserId(1),
            last_applied_at: now,
            closed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn repo(id: i64) -> Repo {
        Repo {
            id: RepoId(id),
            name: format!("github.com/acme/r{id}"),
            code_host: CodeHostKind::GitHub,
        }
    }

    fn spec(id: i64, repo_id: i64, description: ChangesetSpecDescription) -> ChangesetSpec {
        ChangesetSpec {
            id: ChangesetSpecId(id),
            rand_id: RandId::generate(),
            campaign_spec_id: CampaignSpecId(2),
            repo_id: RepoId(repo_id),
            user_id: UserId(1),
            description,
            diff_stat: Some(DiffStat {
                added: 3,
                changed: 1,
                deleted: 2,
            }),
            created_at: now(),
        }
    }

    fn push_spec(id: i64, repo_id: i64) -> ChangesetSpec {
        spec(
            id,
            repo_id,
            ChangesetSpecDescription::BranchPush(BranchPush::default()),
        )
    }

    fn owned(id: i64, repo_id: i64) -> Changeset {
        Changeset {
            id: ChangesetId(id),
            repo_id: RepoId(repo_id),
            owned_by_campaign_id: Some(CAMPAIGN),
            campaign_ids: [CAMPAIGN].into_iter().collect(),
            current_spec_id: Some(ChangesetSpecId(1)),
            reconciler_state: ReconcilerState::Completed,
            ..Changeset::default()
        }
    }

    fn published_open(mut cs: Changeset) -> Changeset {
        cs.publication_state = PublicationState::Published;
        cs.external_id = Some("12".into());
        cs.external_state = Some(ExternalState::Open);
        cs
    }

    fn mapping(
        repo_id: i64,
        visible: bool,
        changeset: Option<Changeset>,
        spec: Option<ChangesetSpec>,
    ) -> RewirerMapping {
        RewirerMapping {
            repo_id: RepoId(repo_id),
            repo: visible.then(|| repo(repo_id)),
            changeset,
            changeset_spec: spec,
        }
    }

    fn rewire(campaign: &mut Campaign, mappings: Vec<RewirerMapping>) -> RewireResult {
        Rewirer::new(campaign, now()).rewire(mappings).unwrap()
    }

    #[test]
    fn new_branch_push_spec_creates_owned_unpublished_changeset() {
        let mut c = campaign();
        let result = rewire(&mut c, vec![mapping(1, true, None, Some(push_spec(5, 1)))]);

        assert_eq!(result.changesets.len(), 1);
        let cs = &result.changesets[0];
        assert!(cs.id.is_unsaved());
        assert_eq!(cs.owned_by_campaign_id, Some(CAMPAIGN));
        assert!(cs.is_attached_to(CAMPAIGN));
        assert_eq!(cs.current_spec_id, Some(ChangesetSpecId(5)));
        assert_eq!(cs.publication_state, PublicationState::Unpublished);
        assert_eq!(cs.reconciler_state, ReconcilerState::Queued);
        assert_eq!(cs.diff_stat.map(|d| d.added), Some(3));
        assert!(c.changeset_ids.is_empty(), "stale ids are dropped");
    }

    #[test]
    fn new_tracking_spec_imports_published_unsynced() {
        let mut c = campaign();
        let track = spec(
            5,
            1,
            ChangesetSpecDescription::TrackExisting {
                external_id: "77".into(),
            },
        );
        let result = rewire(&mut c, vec![mapping(1, true, None, Some(track))]);

        let cs = &result.changesets[0];
        assert_eq!(cs.external_id.as_deref(), Some("77"));
        assert_eq!(cs.publication_state, PublicationState::Published);
        assert!(cs.unsynced);
        assert_eq!(cs.owned_by_campaign_id, None);
        assert!(cs.is_attached_to(CAMPAIGN));
    }

    #[test]
    fn updated_spec_rotates_previous() {
        let mut c = campaign();
        let existing = published_open(owned(3, 1));
        let result = rewire(&mut c, vec![mapping(1, true, Some(existing), Some(push_spec(5, 1)))]);

        let cs = &result.changesets[0];
        assert_eq!(cs.previous_spec_id, Some(ChangesetSpecId(1)));
        assert_eq!(cs.current_spec_id, Some(ChangesetSpecId(5)));
        assert_eq!(cs.reconciler_state, ReconcilerState::Queued);
        assert_eq!(c.changeset_ids, [ChangesetId(3)].into_iter().collect());
    }

    #[test]
    fn errored_changeset_skips_rotation() {
        let mut c = campaign();
        let mut existing = published_open(owned(3, 1));
        existing.previous_spec_id = Some(ChangesetSpecId(0));
        existing.reconciler_state = ReconcilerState::Errored;
        existing.failure_message = Some("boom".into());
        let result = rewire(&mut c, vec![mapping(1, true, Some(existing), Some(push_spec(5, 1)))]);

        let cs = &result.changesets[0];
        assert_eq!(cs.previous_spec_id, Some(ChangesetSpecId(0)));
        assert_eq!(cs.current_spec_id, Some(ChangesetSpecId(5)));
        assert!(cs.failure_message.is_none());
    }

    #[test]
    fn dropped_open_changeset_is_closed_and_detached() {
        let mut c = campaign();
        let existing = published_open(owned(3, 1));
        let result = rewire(&mut c, vec![mapping(1, true, Some(existing), None)]);

        let cs = &result.changesets[0];
        assert!(cs.closing);
        assert!(!cs.is_attached_to(CAMPAIGN));
        assert_eq!(cs.owned_by_campaign_id, Some(CAMPAIGN));
        assert_eq!(cs.reconciler_state, ReconcilerState::Queued);
        assert!(c.changeset_ids.is_empty());
    }

    #[test]
    fn dropped_merged_changeset_is_only_detached() {
        let mut c = campaign();
        let mut existing = published_open(owned(3, 1));
        existing.external_state = Some(ExternalState::Merged);
        let result = rewire(&mut c, vec![mapping(1, true, Some(existing), None)]);

        let cs = &result.changesets[0];
        assert!(!cs.closing);
        assert!(!cs.is_attached_to(CAMPAIGN));
        assert_eq!(cs.reconciler_state, ReconcilerState::Completed);
    }

    #[test]
    fn dropped_unpublished_changeset_is_deleted() {
        let mut c = campaign();
        let result = rewire(&mut c, vec![mapping(1, true, Some(owned(3, 1)), None)]);

        assert!(result.changesets.is_empty());
        assert_eq!(result.deleted, vec![ChangesetId(3)]);
    }

    #[test]
    fn dropped_tracked_changeset_is_detached_without_closing() {
        let mut c = campaign();
        let mut tracked = published_open(owned(3, 1));
        tracked.owned_by_campaign_id = None;
        tracked.current_spec_id = None;
        tracked.campaign_ids.insert(CampaignId(11));
        let result = rewire(&mut c, vec![mapping(1, true, Some(tracked), None)]);

        let cs = &result.changesets[0];
        assert!(!cs.closing);
        assert_eq!(cs.campaign_ids, [CampaignId(11)].into_iter().collect());
    }

    #[test]
    fn invisible_dropped_changeset_is_left_attached() {
        let mut c = campaign();
        let existing = published_open(owned(3, 1));
        let result = rewire(&mut c, vec![mapping(1, false, Some(existing), None)]);

        assert!(result.changesets.is_empty());
        assert!(result.deleted.is_empty());
        assert_eq!(c.changeset_ids, [ChangesetId(3)].into_iter().collect());
    }

    #[test]
    fn invisible_repository_with_spec_fails() {
        let mut c = campaign();
        let err = Rewirer::new(&mut c, now())
            .rewire(vec![mapping(1, false, None, Some(push_spec(5, 1)))])
            .unwrap_err();
        assert!(matches!(err, ApplyError::RepoNotFound(RepoId(1))));
    }

    #[test]
    fn errored_tracked_changeset_owned_elsewhere_is_not_requeued() {
        let mut c = campaign();
        let mut foreign = published_open(owned(3, 1));
        foreign.owned_by_campaign_id = Some(CampaignId(11));
        foreign.campaign_ids = [CampaignId(11)].into_iter().collect();
        foreign.reconciler_state = ReconcilerState::Errored;
        let track = spec(
            5,
            1,
            ChangesetSpecDescription::TrackExisting {
                external_id: "12".into(),
            },
        );
        let result = rewire(&mut c, vec![mapping(1, true, Some(foreign), Some(track))]);

        let cs = &result.changesets[0];
        assert_eq!(cs.reconciler_state, ReconcilerState::Errored);
        assert!(cs.is_attached_to(CAMPAIGN));
        assert!(cs.is_attached_to(CampaignId(11)));
    }
}
