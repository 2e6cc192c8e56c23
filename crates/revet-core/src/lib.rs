//! revet-core — domain logic for the revet submission review platform.
//!
//! This crate owns the verification state machine, the submission
//! processing pipeline, comment carry-forward across resubmissions, and
//! the diff/location remapping it depends on. The web layer, auth, and
//! the actual VCS/build executors live elsewhere and are reached through
//! the traits in [`vcs`] and [`build`].

pub mod build;
pub mod db;
pub mod diff;
pub mod location;
pub mod processors;
pub mod remap;
pub mod vcs;
pub mod verify;

#[cfg(test)]
pub(crate) mod testutil;
