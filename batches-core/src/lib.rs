//! Batches core library: ids, domain types, the store contract, time and access.
//!
//! - [`types`]: specs, campaigns, changesets
//! - [`store`]: [`Store`] / [`Transaction`] traits and the in-memory implementation
//! - [`clock`]: injectable [`Clock`]
//! - [`access`]: [`Actor`] and repository visibility

pub mod access;
pub mod clock;
pub mod error;
pub mod ids;
pub mod store;
pub mod types;

pub use access::{Actor, AllowAll, RepoAccess};
pub use clock::{Clock, FakeClock, SystemClock};
pub use error::StoreError;
pub use ids::{
    CampaignId, CampaignSpecId, ChangesetId, ChangesetSpecId, OrgId, RandId, RepoId, UserId,
};
pub use store::{memory::InMemoryStore, CasResult, Lease, Store, Transaction};
pub use types::{
    BranchPush, Campaign, CampaignSpec, Changeset, ChangesetSpec, ChangesetSpecDescription,
    ChangesetTemplate, CodeHostKind, DiffStat, ExternalState, GitCommit, Namespace,
    PublicationState, Published, ReconcilerState, Repo, RewirerMappingRow,
};
