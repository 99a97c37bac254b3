//! Batches reconciler: plans and executes code-host operations per changeset.
//!
//! - [`plan`]: [`determine_plan`], the pure diff of desired against actual state
//! - [`executor`]: runs a [`Plan`] against a [`ChangesetSource`]
//! - [`worker`]: the leasing worker pool with bounded retries
//! - [`config`]: [`ReconcilerConfig`] loaded from `~/.batches/config.yaml`

pub mod config;
pub mod delta;
pub mod error;
pub mod executor;
pub mod plan;
pub mod retry;
pub mod source;
pub mod worker;

pub use config::ReconcilerConfig;
pub use delta::ChangesetSpecDelta;
pub use error::{ConfigError, ReconcilerError, SourceError};
pub use executor::Executor;
pub use plan::{determine_plan, determine_plan_for, Operation, Operations, Plan};
pub use retry::RetryPolicy;
pub use source::{ChangesetSource, HostChangeset};
pub use worker::{Attempt, Reconciler};
