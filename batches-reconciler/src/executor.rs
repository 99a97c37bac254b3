//! Runs plan operations against a [`ChangesetSource`], folding the host's
//! answers into the changeset row.

use std::time::Duration;

use tracing::debug;

use batches_core::{BranchPush, Changeset, Clock, PublicationState, Repo};

use crate::error::{ReconcilerError, SourceError};
use crate::plan::Operation;
use crate::source::ChangesetSource;

pub struct Executor<'a> {
    source: &'a dyn ChangesetSource,
    clock: &'a dyn Clock,
    sleep_after_push: Duration,
}

impl<'a> Executor<'a> {
    pub fn new(
        source: &'a dyn ChangesetSource,
        clock: &'a dyn Clock,
        sleep_after_push: Duration,
    ) -> Self {
        Self {
            source,
            clock,
            sleep_after_push,
        }
    }

    /// Execute one operation, updating `changeset` only when it succeeds.
    pub async fn execute_op(
        &self,
        op: Operation,
        repo: &Repo,
        spec: Option<&BranchPush>,
        changeset: &mut Changeset,
    ) -> Result<(), ReconcilerError> {
        let source = self.source;
        let wrap = |err: SourceError| ReconcilerError::Source { op, source: err };
        debug!(changeset_id = %changeset.id, %op, "executing operation");

        match op {
            Operation::Push => {
                let push = require_push(op, spec, changeset)?;
                source.push_branch(repo, push).await.map_err(wrap)?;
                changeset.external_branch = Some(push.head_ref.clone());
            }
            Operation::Publish | Operation::PublishDraft => {
                let push = require_push(op, spec, changeset)?;
                let draft = op == Operation::PublishDraft;
                let host = source
                    .create_changeset(repo, push, draft)
                    .await
                    .map_err(wrap)?;
                host.write_to(changeset);
                changeset.publication_state = PublicationState::Published;
            }
            Operation::Update => {
                let push = require_push(op, spec, changeset)?;
                let external_id = require_external_id(op, changeset)?;
                let host = source
                    .update_changeset(repo, &external_id, push)
                    .await
                    .map_err(wrap)?;
                host.write_to(changeset);
            }
            Operation::Undraft => {
                let external_id = require_external_id(op, changeset)?;
                let host = source
                    .undraft_changeset(repo, &external_id)
                    .await
                    .map_err(wrap)?;
                host.write_to(changeset);
            }
            Operation::Sleep => self.clock.sleep(self.sleep_after_push).await,
            Operation::Sync => {
                let external_id = require_external_id(op, changeset)?;
                let host = source
                    .load_changeset(repo, &external_id)
                    .await
                    .map_err(wrap)?;
                host.write_to(changeset);
                changeset.unsynced = false;
            }
            Operation::Close => {
                // Never published: nothing to close on the host.
                if let Some(external_id) = changeset.external_id.clone() {
                    let host = source
                        .close_changeset(repo, &external_id)
                        .await
                        .map_err(wrap)?;
                    host.write_to(changeset);
                }
                changeset.closing = false;
            }
            Operation::Reopen => {
                let external_id = require_external_id(op, changeset)?;
                let host = source
                    .reopen_changeset(repo, &external_id)
                    .await
                    .map_err(wrap)?;
                host.write_to(changeset);
            }
        }
        Ok(())
    }
}

fn require_push<'s>(
    op: Operation,
    spec: Option<&'s BranchPush>,
    changeset: &Changeset,
) -> Result<&'s BranchPush, ReconcilerError> {
    spec.ok_or(ReconcilerError::MissingBranchPush {
        changeset_id: changeset.id,
        op,
    })
}

fn require_external_id(op: Operation, changeset: &Changeset) -> Result<String, ReconcilerError> {
    changeset
        .external_id
        .clone()
        .ok_or(ReconcilerError::MissingExternalId {
            changeset_id: changeset.id,
            op,
        })
}
