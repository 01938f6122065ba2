//! Propagates user/application grants to downstream applications and mirrors the results
//! in a local store.
//!
//! The flow for one event is: decode and validate ([`event`]), resolve every referenced
//! application through the registry, call each application with the [`client`], and commit the
//! per-user result set to the [`mirror`]. The [`orchestrator`] owns that sequencing and its
//! failure policy.

pub mod client;
pub mod config;
pub mod errors;
pub mod event;
pub mod metrics_defs;
pub mod mirror;
pub mod orchestrator;

pub use errors::{SyncError, SyncErrorKind};
pub use orchestrator::{Orchestrator, SyncReport, Trigger};
