//! Field-level difference between two branch-push specs.

use serde::Serialize;

use batches_core::BranchPush;

/// Which fields changed between the spec that produced the code-host state
/// and the spec that should apply now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ChangesetSpecDelta {
    pub title_changed: bool,
    pub body_changed: bool,
    pub base_ref_changed: bool,
    pub diff_changed: bool,
    pub commit_message_changed: bool,
    pub author_name_changed: bool,
    pub author_email_changed: bool,
    /// Previous spec wanted a draft, current one wants it published.
    pub undraft: bool,
}

impl ChangesetSpecDelta {
    #[must_use]
    pub fn compare(previous: &BranchPush, current: &BranchPush) -> Self {
        Self {
            title_changed: previous.title != current.title,
            body_changed: previous.body != current.body,
            base_ref_changed: previous.base_ref != current.base_ref,
            diff_changed: previous.commit.diff != current.commit.diff,
            commit_message_changed: previous.commit.message != current.commit.message,
            author_name_changed: previous.commit.author_name != current.commit.author_name,
            author_email_changed: previous.commit.author_email != current.commit.author_email,
            undraft: previous.published.is_draft() && current.published.is_published(),
        }
    }

    /// Title, body or base ref must be edited on the host.
    #[must_use]
    pub const fn needs_code_host_update(&self) -> bool {
        self.title_changed || self.body_changed || self.base_ref_changed
    }

    /// A new commit must be pushed.
    #[must_use]
    pub const fn needs_commit_update(&self) -> bool {
        self.diff_changed
            || self.commit_message_changed
            || self.author_name_changed
            || self.author_email_changed
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        !self.needs_code_host_update() && !self.needs_commit_update() && !self.undraft
    }

    /// Names of the changed fields, in declaration order.
    #[must_use]
    pub fn changed_fields(&self) -> Vec<&'static str> {
        [
            (self.title_changed, "title"),
            (self.body_changed, "body"),
            (self.base_ref_changed, "base_ref"),
            (self.diff_changed, "diff"),
            (self.commit_message_changed, "commit_message"),
            (self.author_name_changed, "author_name"),
            (self.author_email_changed, "author_email"),
            (self.undraft, "undraft"),
        ]
        .into_iter()
        .filter_map(|(changed, name)| changed.then_some(name))
        .collect()
    }
}
