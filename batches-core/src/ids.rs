//! Strongly-typed row identifiers.
//!
//! Every id wraps the store's `i64` primary key. The zero value means "not yet
//! persisted"; stores assign a real id on insert.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! row_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            /// Returns true if this id has not been assigned by a store yet.
            #[must_use]
            pub const fn is_unsaved(self) -> bool {
                self.0 == 0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }
    };
}

row_id!(
    /// Internal id of a [`crate::types::Campaign`].
    CampaignId
);
row_id!(
    /// Internal id of a [`crate::types::CampaignSpec`].
    CampaignSpecId
);
row_id!(
    /// Internal id of a [`crate::types::ChangesetSpec`].
    ChangesetSpecId
);
row_id!(
    /// Internal id of a [`crate::types::Changeset`].
    ChangesetId
);
row_id!(
    /// Internal id of a [`crate::types::Repo`].
    RepoId
);
row_id!(UserId);
row_id!(OrgId);

/// Public, unguessable id of a spec. Users refer to specs by this value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RandId(pub String);

impl RandId {
    /// Generates a fresh random id.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }
}

impl fmt::Display for RandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for RandId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for RandId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_id_is_unsaved() {
        assert!(ChangesetId::default().is_unsaved());
        assert!(!ChangesetId(7).is_unsaved());
    }

    #[test]
    fn ids_display_as_numbers() {
        assert_eq!(CampaignId(42).to_string(), "42");
        assert_eq!(RandId::from("abc").to_string(), "abc");
    }

    #[test]
    fn generated_rand_ids_differ() {
        assert_ne!(RandId::generate(), RandId::generate());
    }
}
