//! Who is acting, and which repositories they can see.

use crate::ids::UserId;
use crate::types::Repo;

/// The user on whose behalf an operation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub user_id: UserId,
    pub site_admin: bool,
}

impl Actor {
    #[must_use]
    pub const fn user(user_id: UserId) -> Self {
        Self {
            user_id,
            site_admin: false,
        }
    }

    #[must_use]
    pub const fn site_admin(user_id: UserId) -> Self {
        Self {
            user_id,
            site_admin: true,
        }
    }
}

/// Repository visibility filter.
///
/// Any `Fn(&Actor, &Repo) -> bool` closure is a `RepoAccess`.
pub trait RepoAccess: Send + Sync {
    fn can_access(&self, actor: &Actor, repo: &Repo) -> bool;
}

impl<F> RepoAccess for F
where
    F: Fn(&Actor, &Repo) -> bool + Send + Sync,
{
    fn can_access(&self, actor: &Actor, repo: &Repo) -> bool {
        self(actor, repo)
    }
}

/// Every repository is visible to everyone.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl RepoAccess for AllowAll {
    fn can_access(&self, _actor: &Actor, _repo: &Repo) -> bool {
        true
    }
}
