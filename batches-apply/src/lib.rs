//! Batches apply: turns a campaign spec into a campaign and its changesets.
//!
//! - [`service`]: [`ApplyService`], the entry point for apply and close
//! - [`rewirer`]: [`Rewirer`], which maps a spec generation onto changesets
//! - [`mapping`]: eager hydration of the store's mapping rows

pub mod error;
pub mod mapping;
pub mod rewirer;
pub mod service;

pub use error::ApplyError;
pub use mapping::{hydrate, RewirerMapping};
pub use rewirer::{RewireResult, Rewirer};
pub use service::{ApplyOptions, ApplyService};
