//! Hydration of rewirer-mapping rows.
//!
//! The store answers the join with ids only. [`hydrate`] resolves them in one
//! batch per table and filters repositories through [`RepoAccess`] once, up
//! front, so the rewirer works on plain values.

use std::collections::HashMap;

use batches_core::{
    Actor, Changeset, ChangesetSpec, Repo, RepoAccess, RepoId, RewirerMappingRow, Transaction,
};

use crate::error::ApplyError;

/// One repository's slot in a rewire: the spec that wants it, the changeset
/// that exists for it, or both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewirerMapping {
    pub repo_id: RepoId,
    /// `None` when the actor cannot see the repository.
    pub repo: Option<Repo>,
    pub changeset: Option<Changeset>,
    pub changeset_spec: Option<ChangesetSpec>,
}

pub async fn hydrate<T: Transaction>(
    tx: &mut T,
    rows: Vec<RewirerMappingRow>,
    actor: &Actor,
    access: &dyn RepoAccess,
) -> Result<Vec<RewirerMapping>, ApplyError> {
    let changeset_ids: Vec<_> = rows.iter().filter_map(|r| r.changeset_id).collect();
    let spec_ids: Vec<_> = rows.iter().filter_map(|r| r.changeset_spec_id).collect();
    let mut repo_ids: Vec<_> = rows.iter().map(|r| r.repo_id).collect();
    repo_ids.sort_unstable();
    repo_ids.dedup();

    let mut changesets: HashMap<_, _> = tx
        .get_changesets(&changeset_ids)
        .await?
        .into_iter()
        .map(|cs| (cs.id, cs))
        .collect();
    let mut specs: HashMap<_, _> = tx
        .get_changeset_specs(&spec_ids)
        .await?
        .into_iter()
        .map(|spec| (spec.id, spec))
        .collect();
    let repos: HashMap<_, _> = tx
        .get_repos(&repo_ids)
        .await?
        .into_iter()
        .filter(|repo| access.can_access(actor, repo))
        .map(|repo| (repo.id, repo))
        .collect();

    rows.into_iter()
        .map(|row| {
            let changeset = row
                .changeset_id
                .map(|id| changesets.remove(&id).ok_or(ApplyError::ChangesetNotFound(id)))
                .transpose()?;
            let changeset_spec = row
                .changeset_spec_id
                .map(|id| specs.remove(&id).ok_or(ApplyError::ChangesetSpecNotFound(id)))
                .transpose()?;
            Ok(RewirerMapping {
                repo_id: row.repo_id,
                repo: repos.get(&row.repo_id).cloned(),
                changeset,
                changeset_spec,
            })
        })
        .collect()
}
