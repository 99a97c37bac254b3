//! Domain types for batch changes.
//!
//! Specs ([`CampaignSpec`], [`ChangesetSpec`]) are immutable inputs. The
//! [`Campaign`] aggregate and its [`Changeset`] rows are the mutable state the
//! apply service and the reconciler converge.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::ids::{
    CampaignId, CampaignSpecId, ChangesetId, ChangesetSpecId, OrgId, RandId, RepoId, UserId,
};

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Owner of a campaign: a user or an organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
    User(UserId),
    Org(OrgId),
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Namespace::User(id) => write!(f, "user:{id}"),
            Namespace::Org(id) => write!(f, "org:{id}"),
        }
    }
}

/// The kind of code host a repository lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CodeHostKind {
    #[default]
    #[serde(rename = "github")]
    GitHub,
    #[serde(rename = "gitlab")]
    GitLab,
    BitbucketServer,
}

impl CodeHostKind {
    /// Whether pull/merge requests on this host can be opened as drafts.
    #[must_use]
    pub const fn supports_draft(self) -> bool {
        match self {
            CodeHostKind::GitHub | CodeHostKind::GitLab => true,
            CodeHostKind::BitbucketServer => false,
        }
    }
}

impl fmt::Display for CodeHostKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodeHostKind::GitHub => write!(f, "github"),
            CodeHostKind::GitLab => write!(f, "gitlab"),
            CodeHostKind::BitbucketServer => write!(f, "bitbucket_server"),
        }
    }
}

/// Publication intent of a spec.
///
/// On the wire this is `false`, `true` or the string `"draft"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Published {
    #[default]
    Unpublished,
    Draft,
    Published,
}

impl Published {
    #[must_use]
    pub const fn is_draft(self) -> bool {
        matches!(self, Published::Draft)
    }

    #[must_use]
    pub const fn is_published(self) -> bool {
        matches!(self, Published::Published)
    }
}

impl fmt::Display for Published {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Published::Unpublished => write!(f, "false"),
            Published::Draft => write!(f, "draft"),
            Published::Published => write!(f, "true"),
        }
    }
}

impl Serialize for Published {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Published::Unpublished => serializer.serialize_bool(false),
            Published::Published => serializer.serialize_bool(true),
            Published::Draft => serializer.serialize_str("draft"),
        }
    }
}

impl<'de> Deserialize<'de> for Published {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Bool(bool),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Bool(true) => Ok(Published::Published),
            Raw::Bool(false) => Ok(Published::Unpublished),
            Raw::Text(s) if s == "draft" => Ok(Published::Draft),
            Raw::Text(other) => Err(serde::de::Error::custom(format!(
                "invalid published value {other:?}; expected true, false or \"draft\""
            ))),
        }
    }
}

/// State of the pull/merge request on the code host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExternalState {
    Draft,
    Open,
    Closed,
    Merged,
}

/// Whether the changeset exists on the code host yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PublicationState {
    #[default]
    Unpublished,
    Published,
}

/// Position of a changeset in the reconciler state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReconcilerState {
    #[default]
    Queued,
    Processing,
    Errored,
    Completed,
}

impl fmt::Display for ReconcilerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconcilerState::Queued => write!(f, "queued"),
            ReconcilerState::Processing => write!(f, "processing"),
            ReconcilerState::Errored => write!(f, "errored"),
            ReconcilerState::Completed => write!(f, "completed"),
        }
    }
}

// ---------------------------------------------------------------------------
// Specs
// ---------------------------------------------------------------------------

/// Line counts of a diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct DiffStat {
    pub added: u32,
    pub changed: u32,
    pub deleted: u32,
}

/// A single commit to push to the head ref.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct GitCommit {
    pub message: String,
    pub diff: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_email: Option<String>,
}

/// Desired state of a changeset the system creates by pushing a branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BranchPush {
    pub base_ref: String,
    #[serde(default)]
    pub base_rev: String,
    pub head_ref: String,
    pub title: String,
    #[serde(default)]
    pub body: String,
    pub commit: GitCommit,
    #[serde(default)]
    pub published: Published,
}

/// What a changeset spec asks for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChangesetSpecDescription {
    /// Adopt a pull request that already exists on the code host.
    TrackExisting { external_id: String },
    /// Push a branch and open a pull request for it.
    BranchPush(BranchPush),
}

/// Immutable per-repository spec inside a [`CampaignSpec`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangesetSpec {
    pub id: ChangesetSpecId,
    pub rand_id: RandId,
    pub campaign_spec_id: CampaignSpecId,
    pub repo_id: RepoId,
    pub user_id: UserId,
    pub description: ChangesetSpecDescription,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff_stat: Option<DiffStat>,
    pub created_at: DateTime<Utc>,
}

impl ChangesetSpec {
    /// The branch-push description, if this is not a tracking spec.
    #[must_use]
    pub fn branch_push(&self) -> Option<&BranchPush> {
        match &self.description {
            ChangesetSpecDescription::BranchPush(push) => Some(push),
            ChangesetSpecDescription::TrackExisting { .. } => None,
        }
    }
}

/// Template applied to every branch-push changeset of a campaign spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ChangesetTemplate {
    pub title: String,
    #[serde(default)]
    pub body: String,
    pub branch: String,
    pub commit_message: String,
    #[serde(default)]
    pub published: Published,
}

/// Immutable, user-submitted declaration of a batch change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignSpec {
    pub id: CampaignSpecId,
    pub rand_id: RandId,
    pub user_id: UserId,
    pub namespace: Namespace,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changeset_template: Option<ChangesetTemplate>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Mutable state
// ---------------------------------------------------------------------------

/// A repository as seen by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repo {
    pub id: RepoId,
    pub name: String,
    pub code_host: CodeHostKind,
}

/// Mutable aggregate, unique per (namespace, name).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub namespace: Namespace,
    pub campaign_spec_id: CampaignSpecId,
    #[serde(default)]
    pub changeset_ids: BTreeSet<ChangesetId>,
    pub initial_applier_id: UserId,
    pub last_applier_id: UserId,
    pub last_applied_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.closed_at.is_some()
    }
}

/// The engine's model of one pull/merge request on one repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Changeset {
    pub id: ChangesetId,
    pub repo_id: RepoId,
    pub code_host: CodeHostKind,

    // Code-host side, written by the reconciler.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_state: Option<ExternalState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff_stat: Option<DiffStat>,
    #[serde(default)]
    pub publication_state: PublicationState,
    #[serde(default)]
    pub unsynced: bool,

    // Desired side, written by the rewirer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_spec_id: Option<ChangesetSpecId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_spec_id: Option<ChangesetSpecId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owned_by_campaign_id: Option<CampaignId>,
    #[serde(default)]
    pub campaign_ids: BTreeSet<CampaignId>,
    #[serde(default)]
    pub closing: bool,

    // Reconciler bookkeeping.
    #[serde(default)]
    pub reconciler_state: ReconcilerState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,
    #[serde(default)]
    pub num_failures: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_after: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Changeset {
    #[must_use]
    pub fn is_published(&self) -> bool {
        self.publication_state == PublicationState::Published
    }

    #[must_use]
    pub fn is_merged(&self) -> bool {
        self.external_state == Some(ExternalState::Merged)
    }

    /// Open on the host, drafts included.
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(
            self.external_state,
            Some(ExternalState::Open | ExternalState::Draft)
        )
    }

    #[must_use]
    pub fn is_owned_by(&self, campaign: CampaignId) -> bool {
        self.owned_by_campaign_id == Some(campaign)
    }

    #[must_use]
    pub fn is_attached_to(&self, campaign: CampaignId) -> bool {
        self.campaign_ids.contains(&campaign)
    }

    /// Owned by a campaign that still references it.
    #[must_use]
    pub fn is_owned_and_attached(&self) -> bool {
        self.owned_by_campaign_id
            .is_some_and(|owner| self.campaign_ids.contains(&owner))
    }

    /// Put the changeset back in the queue with a clean failure record.
    pub fn reset_queued(&mut self) {
        self.reconciler_state = ReconcilerState::Queued;
        self.failure_message = None;
        self.num_failures = 0;
        self.process_after = None;
    }
}

/// One row of the rewirer-mapping query, before hydration.
///
/// Each entry joins a repository with the changeset currently matched to it
/// and the new spec for it; either side may be absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewirerMappingRow {
    pub repo_id: RepoId,
    pub changeset_id: Option<ChangesetId>,
    pub changeset_spec_id: Option<ChangesetSpecId>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn published_accepts_bool_and_draft() {
        let yes: Published = serde_yaml::from_str("true").expect("true");
        let no: Published = serde_yaml::from_str("false").expect("false");
        let draft: Published = serde_yaml::from_str("draft").expect("draft");
        assert_eq!(yes, Published::Published);
        assert_eq!(no, Published::Unpublished);
        assert_eq!(draft, Published::Draft);
    }

    #[test]
    fn published_rejects_unknown_string() {
        let err = serde_json::from_str::<Published>("\"maybe\"").unwrap_err();
        assert!(err.to_string().contains("maybe"), "got: {err}");
    }

    #[test]
    fn published_serializes_to_wire_form() {
        assert_eq!(serde_json::to_string(&Published::Draft).unwrap(), "\"draft\"");
        assert_eq!(serde_json::to_string(&Published::Published).unwrap(), "true");
    }

    #[test]
    fn bitbucket_server_has_no_drafts() {
        assert!(CodeHostKind::GitHub.supports_draft());
        assert!(CodeHostKind::GitLab.supports_draft());
        assert!(!CodeHostKind::BitbucketServer.supports_draft());
    }

    #[test]
    fn owned_and_attached_requires_both() {
        let mut cs = Changeset {
            owned_by_campaign_id: Some(CampaignId(1)),
            ..Changeset::default()
        };
        assert!(!cs.is_owned_and_attached());
        cs.campaign_ids.insert(CampaignId(1));
        assert!(cs.is_owned_and_attached());
    }

    #[test]
    fn reset_queued_clears_failure_record() {
        let mut cs = Changeset {
            reconciler_state: ReconcilerState::Errored,
            failure_message: Some("boom".into()),
            num_failures: 2,
            process_after: Some(Utc::now()),
            ..Changeset::default()
        };
        cs.reset_queued();
        assert_eq!(cs.reconciler_state, ReconcilerState::Queued);
        assert!(cs.failure_message.is_none());
        assert_eq!(cs.num_failures, 0);
        assert!(cs.process_after.is_none());
    }
}
