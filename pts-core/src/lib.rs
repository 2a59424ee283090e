//! Shared error plumbing for the PTS workspace.
//!
//! `pts-core` has exactly one job: give every other crate in the workspace
//! a common `Error`/`Result` pair for the cross-cutting failures that don't
//! belong to any single component's own taxonomy. Attestation-specific
//! errors live in `pts-attest::Error`, not here.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;

pub use error::{Error, Result};
