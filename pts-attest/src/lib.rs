//! Platform Trust Service attestation core.
//!
//! Drives the cryptographic handshake plus TPM 1.2 Quote construction and
//! verification that prove a platform's integrity state to a remote party.
//! Runs on both sides of the exchange: the *measurer* (the platform being
//! attested) and the *verifier* (the peer challenging it).
//!
//! # Components
//!
//! - [`adapters`] — crypto/IO capability interfaces (hasher, RNG, DH, AIK,
//!   directory enumerator) and their default implementations.
//! - [`measure`] — stream-hashes files and directory trees into
//!   [`measure::FileMeasurements`] / [`measure::FileMetadata`].
//! - [`pcr`] — the PCR selection/extension model and PCR Composite builder.
//! - [`session`] — [`session::AttestationSession`], the per-exchange state
//!   machine that orchestrates the rest.
//! - [`quote`] — TPM Quote/Quote2 byte layouts and the TSS-backed
//!   production path (behind the `hardware-tpm` feature).
//! - [`wire`] — the shared big-endian writer/reader both `pcr` and `quote`
//!   build their byte structures through.
//! - [`platform`] — `platform_info` derivation from distribution-release
//!   files.
//!
//! This crate is the core trust primitive, not the outer IMC/IMV framing
//! protocol: it has no TLV parsing, no config loading, and no CLI. It only
//! performs the cryptographic/TPM work named in spec §1-§6.

#![warn(missing_docs)]

pub mod adapters;
pub mod error;
pub mod measure;
pub mod pcr;
pub mod platform;
pub mod quote;
pub mod session;
pub mod wire;

pub use error::{Error, Result};
pub use measure::{FileMeasurements, FileMetadata, FileType, Measurement, PathStatus};
pub use pcr::PcrSet;
pub use session::{AttestationSession, ProtoCaps, Role};
