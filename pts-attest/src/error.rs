//! Error taxonomy for the attestation core (spec §7).

use thiserror::Error;

/// Errors surfaced by `pts-attest`'s public operations.
///
/// Variants map one-to-one onto the taxonomy in spec §7; the taxonomy is a
/// *kind*, not a type name, so some kinds (precondition violations) share a
/// variant shape and differ only by message.
#[derive(Debug, Error)]
pub enum Error {
    /// `pcr_index >= 24` was named in a PCR operation.
    #[error("PCR index {0} out of range (0..24)")]
    PcrIndexOutOfRange(u32),

    /// `add()` was called twice for the same register with different lengths.
    #[error("PCR length mismatch: register expects {expected} bytes, got {actual}")]
    PcrLengthMismatch {
        /// Length fixed by the first `add()` call.
        expected: usize,
        /// Length passed to the offending call.
        actual: usize,
    },

    /// A nonce required by the current operation has not been set.
    #[error("missing nonce: {0}")]
    MissingNonce(&'static str),

    /// `secret` was required but `calculate_secret` has not run.
    #[error("assessment secret has not been derived")]
    MissingSecret,

    /// An AIK (certificate or raw public key) was required but not set.
    #[error("no AIK configured for this session")]
    MissingAik,

    /// `tpm_version_info` was required (Quote2 + version info) but absent.
    #[error("TPM version info requested but not available")]
    MissingVersionInfo,

    /// No strong entropy source was available.
    #[error("no strong RNG available")]
    NoRng,

    /// The DH handle failed to produce a shared secret.
    #[error("key agreement failed: {0}")]
    KeyAgreementFailed(String),

    /// The requested hash algorithm has no adapter.
    #[error("hasher unavailable for algorithm {0:?}")]
    HasherUnavailable(String),

    /// Any TSS call failed; `code` is the raw response for logging.
    #[error("TPM unavailable (TSS code {code:#x}): {message}")]
    TpmUnavailable {
        /// Raw TSS response code, or 0 when the failure has no TSS code
        /// (e.g. the `hardware-tpm` feature is not compiled in).
        code: u32,
        /// Human-readable detail.
        message: String,
    },

    /// The filesystem path named in a measurement call could not be
    /// evaluated (distinct from `NotFound` / `InvalidPath`, which are
    /// ordinary [`crate::measure::PathStatus`] values, not errors).
    #[error("path system error for {path}: {source}")]
    PathSystemError {
        /// The path that failed.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Reading file contents for measurement failed mid-stream.
    #[error("read error for {path}: {source}")]
    FileReadError {
        /// The path being hashed when the read failed.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Enumerating a directory for measurement failed.
    #[error("directory enumeration error for {path}: {source}")]
    DirectoryEnumError {
        /// Directory that failed to enumerate.
        path: String,
        /// Underlying error from the enumerator.
        #[source]
        source: std::io::Error,
    },

    /// None of the known distribution-release files were present. Non-fatal:
    /// callers that hit this keep going with an empty `platform_info`.
    #[error("platform info unavailable: no distribution release file found")]
    PlatformInfoUnavailable,

    /// Passthrough for the shared cross-cutting error type.
    #[error(transparent)]
    Core(#[from] pts_core::Error),
}

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
