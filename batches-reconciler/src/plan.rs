//! Reconciler plan determination.
//!
//! Rule precedence (first match wins):
//! 1. Merged on the host: nothing, merged changesets are history
//! 2. `closing` requested: `[Close]`
//! 3. Closed on the host but still owned and attached: `[Reopen]`
//! 4. Tracked (no branch-push spec): `[Sync]` while unsynced, else nothing
//! 5. Unpublished, spec wants published: `[Push, Publish]`
//! 6. Unpublished, spec wants draft, host supports drafts: `[Push, PublishDraft]`
//! 7. Unpublished, spec wants draft, no draft support: nothing
//! 8. Unpublished, spec wants unpublished: nothing
//! 9. Published, draft became published: `[Undraft]`
//! 10. Published, only title/body/base ref changed: `[Update]`
//! 11. Published, commit changed: `[Push, Sleep, Sync]`
//! 12. Otherwise nothing
//!
//! Rules 9 to 11 compose for a published changeset: `Undraft` first, then
//! `Update`, then the push sequence.
//!
//! [`determine_plan`] is pure; it is also what previews use.

use std::fmt;

use serde::Serialize;

use batches_core::{
    BranchPush, Changeset, ChangesetSpec, ExternalState, PublicationState, Published,
};

use crate::delta::ChangesetSpecDelta;
use crate::error::ReconcilerError;

/// One step the reconciler performs against the code host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Push,
    Update,
    Undraft,
    Publish,
    PublishDraft,
    Sync,
    Close,
    Reopen,
    Sleep,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Push => "push",
            Operation::Update => "update",
            Operation::Undraft => "undraft",
            Operation::Publish => "publish",
            Operation::PublishDraft => "publish-draft",
            Operation::Sync => "sync",
            Operation::Close => "close",
            Operation::Reopen => "reopen",
            Operation::Sleep => "sleep",
        };
        f.write_str(name)
    }
}

/// Ordered operation sequence. Execution follows the stored order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(transparent)]
pub struct Operations(Vec<Operation>);

impl Operations {
    #[must_use]
    pub fn new(ops: impl Into<Vec<Operation>>) -> Self {
        Self(ops.into())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Operation> {
        self.0.iter()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[Operation] {
        &self.0
    }

    /// Same operations regardless of order.
    #[must_use]
    pub fn equivalent(&self, other: &Operations) -> bool {
        let mut a = self.0.clone();
        let mut b = other.0.clone();
        a.sort_unstable();
        b.sort_unstable();
        a == b
    }
}

impl fmt::Display for Operations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("(none)");
        }
        let names: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        f.write_str(&names.join(", "))
    }
}

impl<'a> IntoIterator for &'a Operations {
    type Item = &'a Operation;
    type IntoIter = std::slice::Iter<'a, Operation>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Result of [`determine_plan`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Plan {
    pub ops: Operations,
    pub delta: ChangesetSpecDelta,
}

impl Plan {
    fn of(ops: impl Into<Vec<Operation>>) -> Self {
        Self {
            ops: Operations::new(ops),
            delta: ChangesetSpecDelta::default(),
        }
    }

    fn with_delta(ops: impl Into<Vec<Operation>>, delta: ChangesetSpecDelta) -> Self {
        Self {
            ops: Operations::new(ops),
            delta,
        }
    }
}

/// Diff desired against actual state and return the operations to run.
///
/// `previous` is the spec that produced the changeset's last known code-host
/// state, `current` the one that should apply now.
pub fn determine_plan(
    previous: Option<&ChangesetSpec>,
    current: Option<&ChangesetSpec>,
    changeset: &Changeset,
) -> Result<Plan, ReconcilerError> {
    let current_push = current.and_then(ChangesetSpec::branch_push);
    let previous_push = previous.and_then(ChangesetSpec::branch_push);
    determine_plan_for(previous_push, current_push, changeset)
}

/// [`determine_plan`] over the branch-push descriptions directly.
pub fn determine_plan_for(
    previous: Option<&BranchPush>,
    current: Option<&BranchPush>,
    changeset: &Changeset,
) -> Result<Plan, ReconcilerError> {
    if changeset.is_merged() {
        return Ok(Plan::default());
    }

    if changeset.closing {
        return Ok(Plan::of([Operation::Close]));
    }

    if changeset.external_state == Some(ExternalState::Closed) && changeset.is_owned_and_attached()
    {
        return Ok(Plan::of([Operation::Reopen]));
    }

    let Some(current) = current else {
        if changeset.owned_by_campaign_id.is_some() {
            return Err(ReconcilerError::MissingCurrentSpec(changeset.id));
        }
        if changeset.unsynced {
            return Ok(Plan::of([Operation::Sync]));
        }
        return Ok(Plan::default());
    };

    if changeset.publication_state == PublicationState::Unpublished {
        return Ok(match current.published {
            Published::Published => Plan::of([Operation::Push, Operation::Publish]),
            Published::Draft if changeset.code_host.supports_draft() => {
                Plan::of([Operation::Push, Operation::PublishDraft])
            }
            Published::Draft | Published::Unpublished => Plan::default(),
        });
    }

    let delta = previous
        .map(|previous| ChangesetSpecDelta::compare(previous, current))
        .unwrap_or_default();

    let mut ops = Vec::new();
    if delta.undraft {
        ops.push(Operation::Undraft);
    }
    if delta.needs_code_host_update() {
        ops.push(Operation::Update);
    }
    if delta.needs_commit_update() {
        ops.extend([Operation::Push, Operation::Sleep, Operation::Sync]);
    }
    Ok(Plan::with_delta(ops, delta))
}

#[cfg(test)]
mod tests {
    use batches_core::{CampaignId, ChangesetId, CodeHostKind, GitCommit};
    use rstest::rstest;

    use super::*;

    fn push(published: Published, diff: &str) -> BranchPush {
        BranchPush {
            base_ref: "refs/heads/main".into(),
            head_ref: "refs/heads/bump".into(),
            title: "Bump".into(),
            body: "body".into(),
            commit: GitCommit {
                message: "bump".into(),
                diff: diff.into(),
                ..GitCommit::default()
            },
            published,
            ..BranchPush::default()
        }
    }

    fn owned(publication: PublicationState, external: Option<ExternalState>) -> Changeset {
        Changeset {
            id: ChangesetId(1),
            code_host: CodeHostKind::GitHub,
            publication_state: publication,
            external_state: external,
            owned_by_campaign_id: Some(CampaignId(1)),
            campaign_ids: [CampaignId(1)].into(),
            ..Changeset::default()
        }
    }

    fn ops(plan: &Plan) -> Vec<Operation> {
        plan.ops.as_slice().to_vec()
    }

    #[rstest]
    #[case::published(Published::Published, CodeHostKind::GitHub, vec![Operation::Push, Operation::Publish])]
    #[case::draft(Published::Draft, CodeHostKind::GitHub, vec![Operation::Push, Operation::PublishDraft])]
    #[case::draft_gitlab(Published::Draft, CodeHostKind::GitLab, vec![Operation::Push, Operation::PublishDraft])]
    #[case::draft_unsupported(Published::Draft, CodeHostKind::BitbucketServer, vec![])]
    #[case::unpublished(Published::Unpublished, CodeHostKind::GitHub, vec![])]
    fn unpublished_changesets(
        #[case] published: Published,
        #[case] host: CodeHostKind,
        #[case] expected: Vec<Operation>,
    ) {
        let mut cs = owned(PublicationState::Unpublished, None);
        cs.code_host = host;
        let plan = determine_plan_for(None, Some(&push(published, "d")), &cs).expect("plan");
        assert_eq!(ops(&plan), expected);
    }

    fn titled(mut spec: BranchPush, title: &str) -> BranchPush {
        spec.title = title.into();
        spec
    }

    #[rstest]
    #[case::undraft(
        ExternalState::Draft,
        false,
        Some(push(Published::Draft, "d")),
        Some(push(Published::Published, "d")),
        vec![Operation::Undraft]
    )]
    #[case::undraft_with_new_commit(
        ExternalState::Draft,
        false,
        Some(push(Published::Draft, "oldDiff")),
        Some(push(Published::Published, "newDiff")),
        vec![Operation::Undraft, Operation::Push, Operation::Sleep, Operation::Sync]
    )]
    #[case::undraft_with_new_title(
        ExternalState::Draft,
        false,
        Some(push(Published::Draft, "d")),
        Some(titled(push(Published::Published, "d"), "New title")),
        vec![Operation::Undraft, Operation::Update]
    )]
    #[case::title_only(
        ExternalState::Open,
        false,
        Some(push(Published::Published, "d")),
        Some(titled(push(Published::Published, "d"), "Bump all the things")),
        vec![Operation::Update]
    )]
    #[case::diff_changed(
        ExternalState::Open,
        false,
        Some(push(Published::Published, "testDiff")),
        Some(push(Published::Published, "newTestDiff")),
        vec![Operation::Push, Operation::Sleep, Operation::Sync]
    )]
    #[case::diff_and_title_changed(
        ExternalState::Open,
        false,
        Some(push(Published::Published, "testDiff")),
        Some(titled(push(Published::Published, "newTestDiff"), "New title")),
        vec![Operation::Update, Operation::Push, Operation::Sleep, Operation::Sync]
    )]
    #[case::unchanged(
        ExternalState::Open,
        false,
        Some(push(Published::Published, "d")),
        Some(push(Published::Published, "d")),
        vec![]
    )]
    #[case::merged(
        ExternalState::Merged,
        false,
        Some(push(Published::Published, "testDiff")),
        Some(push(Published::Published, "newTestDiff")),
        vec![]
    )]
    #[case::closed_and_owned(
        ExternalState::Closed,
        false,
        None,
        Some(push(Published::Published, "d")),
        vec![Operation::Reopen]
    )]
    #[case::closing_wins_over_diffs(
        ExternalState::Open,
        true,
        Some(push(Published::Published, "testDiff")),
        Some(push(Published::Published, "newTestDiff")),
        vec![Operation::Close]
    )]
    fn published_changesets(
        #[case] external: ExternalState,
        #[case] closing: bool,
        #[case] previous: Option<BranchPush>,
        #[case] current: Option<BranchPush>,
        #[case] expected: Vec<Operation>,
    ) {
        let mut cs = owned(PublicationState::Published, Some(external));
        cs.closing = closing;
        let plan = determine_plan_for(previous.as_ref(), current.as_ref(), &cs).expect("plan");
        assert_eq!(ops(&plan), expected);
    }

    #[test]
    fn undraft_keeps_the_commit_delta() {
        let cs = owned(PublicationState::Published, Some(ExternalState::Draft));
        let plan = determine_plan_for(
            Some(&push(Published::Draft, "oldDiff")),
            Some(&push(Published::Published, "newDiff")),
            &cs,
        )
        .expect("plan");
        assert_eq!(plan.delta.changed_fields(), vec!["diff", "undraft"]);
    }

    #[test]
    fn closed_and_detached_stays_closed() {
        let mut cs = owned(PublicationState::Published, Some(ExternalState::Closed));
        cs.campaign_ids.clear();
        let plan = determine_plan_for(None, Some(&push(Published::Published, "d")), &cs)
            .expect("plan");
        assert!(plan.ops.is_empty());
    }

    #[test]
    fn closing_an_already_closed_changeset_still_closes() {
        let mut cs = owned(PublicationState::Published, Some(ExternalState::Closed));
        cs.closing = true;
        let plan = determine_plan_for(None, None, &cs).expect("plan");
        assert_eq!(ops(&plan), vec![Operation::Close]);
    }

    #[test]
    fn tracked_unsynced_changeset_syncs() {
        let cs = Changeset {
            publication_state: PublicationState::Published,
            external_id: Some("42".into()),
            unsynced: true,
            campaign_ids: [CampaignId(1)].into(),
            ..Changeset::default()
        };
        let plan = determine_plan_for(None, None, &cs).expect("plan");
        assert_eq!(ops(&plan), vec![Operation::Sync]);
    }

    #[test]
    fn owned_changeset_without_spec_is_an_error() {
        let cs = owned(PublicationState::Unpublished, None);
        let err = determine_plan_for(None, None, &cs).unwrap_err();
        assert!(matches!(err, ReconcilerError::MissingCurrentSpec(_)), "got: {err}");
    }

    #[test]
    fn operations_compare_order_independently() {
        let a = Operations::new([Operation::Push, Operation::Publish]);
        let b = Operations::new([Operation::Publish, Operation::Push]);
        assert!(a.equivalent(&b));
        assert_ne!(a, b);
        assert_eq!(a.to_string(), "push, publish");
        assert_eq!(Operations::default().to_string(), "(none)");
    }
}
