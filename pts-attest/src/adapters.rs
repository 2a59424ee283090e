//! Crypto/IO capability interfaces and their default adapters (spec §4.1).
//!
//! These are thin, side-effect-free-with-respect-to-session-state traits;
//! the rest of the crate is written against them, not against `sha2` or
//! `x25519_dalek` directly, so the DH group or hash family can grow a new
//! variant without touching `session`/`quote`.

use crate::error::{Error, Result};
use rand_core::RngCore;
use sha1::{Digest, Sha1};
use sha2::{Sha256, Sha384};

/// Streaming hash capability.
///
/// Implementations wrap a single algorithm; `output_len` is fixed per
/// implementation (20 for SHA-1, 32 for SHA-256, 48 for SHA-384).
pub trait Hasher {
    /// Feed more bytes into the running digest.
    fn update(&mut self, bytes: &[u8]);

    /// Consume the hasher, producing the final digest.
    fn finalize(self: Box<Self>) -> Vec<u8>;

    /// Digest length in bytes this implementation always produces.
    fn output_len(&self) -> usize;

    /// Name of the underlying algorithm, for logging and `HasherUnavailable`.
    fn name(&self) -> &'static str;
}

macro_rules! hasher_impl {
    ($ty:ident, $inner:ty, $len:expr, $name:expr) => {
        /// Hasher adapter over
        #[doc = $name]
        #[derive(Default)]
        pub struct $ty {
            inner: $inner,
        }

        impl $ty {
            /// Create a fresh hasher instance.
            pub fn new() -> Self {
                Self::default()
            }
        }

        impl Hasher for $ty {
            fn update(&mut self, bytes: &[u8]) {
                Digest::update(&mut self.inner, bytes);
            }

            fn finalize(self: Box<Self>) -> Vec<u8> {
                Digest::finalize(self.inner).to_vec()
            }

            fn output_len(&self) -> usize {
                $len
            }

            fn name(&self) -> &'static str {
                $name
            }
        }
    };
}

hasher_impl!(Sha1Hasher, Sha1, 20, "SHA-1");
hasher_impl!(Sha256Hasher, Sha256, 32, "SHA-256");
hasher_impl!(Sha384Hasher, Sha384, 48, "SHA-384");

/// The hash family selectable for `meas_algo` / `dh_hash_algo` (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    /// SHA-1, 20-byte digests. Required for TPM 1.2 PCR values.
    Sha1,
    /// SHA-256, 32-byte digests. Default per spec §3.
    Sha256,
    /// SHA-384, 48-byte digests.
    Sha384,
}

impl HashAlgorithm {
    /// Parse a case-insensitive algorithm name, mirroring `set_meas_algorithm`'s
    /// "ignored if unknown" contract by returning `None` rather than erroring.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "sha1" | "sha-1" => Some(Self::Sha1),
            "sha256" | "sha-256" => Some(Self::Sha256),
            "sha384" | "sha-384" => Some(Self::Sha384),
            _ => None,
        }
    }

    /// Instantiate a fresh hasher for this algorithm.
    pub fn hasher(self) -> Box<dyn Hasher> {
        match self {
            Self::Sha1 => Box::new(Sha1Hasher::new()),
            Self::Sha256 => Box::new(Sha256Hasher::new()),
            Self::Sha384 => Box::new(Sha384Hasher::new()),
        }
    }

    /// Digest length this algorithm produces.
    pub fn output_len(self) -> usize {
        match self {
            Self::Sha1 => 20,
            Self::Sha256 => 32,
            Self::Sha384 => 48,
        }
    }
}

impl Default for HashAlgorithm {
    fn default() -> Self {
        Self::Sha256
    }
}

/// Strong random-number source (spec §4.1).
pub trait Rng {
    /// Fill and return `n` fresh random bytes.
    fn fill(&mut self, n: usize) -> Result<Vec<u8>>;
}

/// [`Rng`] over `rand`'s OS entropy source.
#[derive(Debug, Default)]
pub struct OsRng;

impl Rng for OsRng {
    fn fill(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; n];
        rand::rngs::OsRng
            .try_fill_bytes(&mut buf)
            .map_err(|_| Error::NoRng)?;
        Ok(buf)
    }
}

/// Key-agreement handle bound to a DH group (spec §4.1).
///
/// `shared_secret` consumes `self` because the underlying X25519 ephemeral
/// secret can only be used once; callers that need the public value again
/// must have captured it from `my_public` beforehand.
pub trait DhHandle {
    /// This side's public DH value.
    fn my_public(&self) -> Vec<u8>;

    /// Record the peer's public value.
    fn set_peer_public(&mut self, peer_public: &[u8]) -> Result<()>;

    /// Compute the shared secret. Consumes the handle.
    fn shared_secret(self: Box<Self>) -> Result<Vec<u8>>;
}

/// The one DH group the crate ships today (spec §4.1 Design Note: `group`
/// is a marker for future algorithm agility, not a live switch).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DhGroup {
    /// Curve25519 Diffie-Hellman.
    X25519,
}

/// [`DhHandle`] over `x25519_dalek`.
pub struct X25519Dh {
    secret: Option<x25519_dalek::EphemeralSecret>,
    public: x25519_dalek::PublicKey,
    peer: Option<x25519_dalek::PublicKey>,
}

impl X25519Dh {
    /// Generate a fresh ephemeral keypair for `group`.
    pub fn generate(group: DhGroup) -> Self {
        match group {
            DhGroup::X25519 => {
                let secret =
                    x25519_dalek::EphemeralSecret::random_from_rng(&mut rand::rngs::OsRng);
                let public = x25519_dalek::PublicKey::from(&secret);
                Self {
                    secret: Some(secret),
                    public,
                    peer: None,
                }
            }
        }
    }
}

impl DhHandle for X25519Dh {
    fn my_public(&self) -> Vec<u8> {
        self.public.as_bytes().to_vec()
    }

    fn set_peer_public(&mut self, peer_public: &[u8]) -> Result<()> {
        let arr: [u8; 32] = peer_public
            .try_into()
            .map_err(|_| Error::KeyAgreementFailed("peer public value must be 32 bytes".into()))?;
        self.peer = Some(x25519_dalek::PublicKey::from(arr));
        Ok(())
    }

    fn shared_secret(mut self: Box<Self>) -> Result<Vec<u8>> {
        let secret = self
            .secret
            .take()
            .ok_or_else(|| Error::KeyAgreementFailed("DH handle already consumed".into()))?;
        let peer = self
            .peer
            .ok_or_else(|| Error::KeyAgreementFailed("peer public value not set".into()))?;
        Ok(secret.diffie_hellman(&peer).as_bytes().to_vec())
    }
}

/// Certificate/public-key capability used to represent the AIK (spec §4.1).
pub trait AikSource {
    /// The DER-encoded SubjectPublicKeyInfo of the underlying public key.
    fn public_key_der(&self) -> Result<Vec<u8>>;

    /// SHA-1 fingerprint of the SubjectPublicKeyInfo.
    fn fingerprint(&self) -> Result<Vec<u8>> {
        let spki = self.public_key_der()?;
        let mut hasher = Sha1::new();
        Digest::update(&mut hasher, &spki);
        Ok(Digest::finalize(hasher).to_vec())
    }

    /// Verify `signature` over `data` under RSA-PKCS#1 v1.5 + SHA-1.
    fn verify(&self, data: &[u8], signature: &[u8]) -> Result<bool>;
}

fn rsa_public_key_from_spki(spki_der: &[u8]) -> Result<rsa::RsaPublicKey> {
    use spki::DecodePublicKey;
    rsa::RsaPublicKey::from_public_key_der(spki_der)
        .map_err(|e| Error::KeyAgreementFailed(format!("invalid RSA SubjectPublicKeyInfo: {e}")))
}

fn rsa_pkcs1_sha1_verify(key: &rsa::RsaPublicKey, data: &[u8], signature: &[u8]) -> bool {
    let mut hasher = Sha1::new();
    Digest::update(&mut hasher, data);
    let digest = Digest::finalize(hasher);
    key.verify(rsa::Pkcs1v15Sign::new::<Sha1>(), &digest, signature)
        .is_ok()
}

/// [`AikSource`] backed by an X.509 certificate (precedence winner per
/// spec §6 "AIK sources").
pub struct X509Aik {
    spki_der: Vec<u8>,
}

impl X509Aik {
    /// Parse a DER-encoded X.509 certificate and extract its public key.
    pub fn from_der(cert_der: &[u8]) -> Result<Self> {
        use der::{Decode, Encode};
        use x509_cert::Certificate;
        let cert = Certificate::from_der(cert_der)
            .map_err(|e| Error::KeyAgreementFailed(format!("invalid AIK certificate: {e}")))?;
        let spki_der = cert
            .tbs_certificate
            .subject_public_key_info
            .to_der()
            .map_err(|e| Error::KeyAgreementFailed(format!("could not re-encode SPKI: {e}")))?;
        Ok(Self { spki_der })
    }
}

impl AikSource for X509Aik {
    fn public_key_der(&self) -> Result<Vec<u8>> {
        Ok(self.spki_der.clone())
    }

    fn verify(&self, data: &[u8], signature: &[u8]) -> Result<bool> {
        let key = rsa_public_key_from_spki(&self.spki_der)?;
        Ok(rsa_pkcs1_sha1_verify(&key, data, signature))
    }
}

/// [`AikSource`] backed by a bare trusted public key with no certificate
/// envelope (spec §6 "AIK sources", fallback when no certificate is
/// supplied).
pub struct RawPublicKeyAik {
    spki_der: Vec<u8>,
}

impl RawPublicKeyAik {
    /// Wrap a DER-encoded SubjectPublicKeyInfo.
    pub fn from_spki_der(spki_der: Vec<u8>) -> Result<Self> {
        rsa_public_key_from_spki(&spki_der)?;
        Ok(Self { spki_der })
    }
}

impl AikSource for RawPublicKeyAik {
    fn public_key_der(&self) -> Result<Vec<u8>> {
        Ok(self.spki_der.clone())
    }

    fn verify(&self, data: &[u8], signature: &[u8]) -> Result<bool> {
        let key = rsa_public_key_from_spki(&self.spki_der)?;
        Ok(rsa_pkcs1_sha1_verify(&key, data, signature))
    }
}

/// One entry yielded by a directory enumerator (spec §4.1).
#[derive(Debug, Clone)]
pub struct DirEntry {
    /// Name relative to the enumerated directory (no path separators).
    pub relative_name: String,
    /// Absolute path to the entry.
    pub absolute_path: std::path::PathBuf,
    /// File metadata as returned by `stat`/`lstat`.
    pub metadata: std::fs::Metadata,
}

/// Directory enumeration capability (spec §4.1): yields
/// `(relative_name, absolute_path, stat)` and skips dotfiles.
pub trait DirEnumerator {
    /// List the immediate (one-level-deep) entries of `dir`, already
    /// filtered to exclude names beginning with `.`.
    fn enumerate(&self, dir: &std::path::Path) -> Result<Vec<DirEntry>>;
}

/// [`DirEnumerator`] over the `walkdir` crate, one level deep.
#[derive(Debug, Default)]
pub struct WalkdirEnumerator;

impl DirEnumerator for WalkdirEnumerator {
    fn enumerate(&self, dir: &std::path::Path) -> Result<Vec<DirEntry>> {
        let mut out = Vec::new();
        for entry in walkdir::WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
        {
            let entry = entry.map_err(|e| Error::DirectoryEnumError {
                path: dir.display().to_string(),
                source: std::io::Error::new(std::io::ErrorKind::Other, e),
            })?;
            let relative_name = entry.file_name().to_string_lossy().into_owned();
            if relative_name.starts_with('.') {
                continue;
            }
            let metadata = entry.metadata().map_err(|e| Error::DirectoryEnumError {
                path: entry.path().display().to_string(),
                source: std::io::Error::new(std::io::ErrorKind::Other, e),
            })?;
            out.push(DirEntry {
                relative_name,
                absolute_path: entry.path().to_path_buf(),
                metadata,
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_algorithm_from_name_is_case_insensitive() {
        assert_eq!(HashAlgorithm::from_name("SHA-256"), Some(HashAlgorithm::Sha256));
        assert_eq!(HashAlgorithm::from_name("sha1"), Some(HashAlgorithm::Sha1));
        assert_eq!(HashAlgorithm::from_name("md5"), None);
    }

    #[test]
    fn hasher_output_lengths_match_algorithm() {
        for algo in [HashAlgorithm::Sha1, HashAlgorithm::Sha256, HashAlgorithm::Sha384] {
            let mut h = algo.hasher();
            h.update(b"hello");
            let digest = h.finalize();
            assert_eq!(digest.len(), algo.output_len());
        }
    }

    #[test]
    fn x25519_dh_commutes() {
        let alice = X25519Dh::generate(DhGroup::X25519);
        let bob = X25519Dh::generate(DhGroup::X25519);
        let alice_pub = alice.my_public();
        let bob_pub = bob.my_public();

        let mut alice = alice;
        alice.set_peer_public(&bob_pub).unwrap();
        let mut bob = bob;
        bob.set_peer_public(&alice_pub).unwrap();

        let za = Box::new(alice).shared_secret().unwrap();
        let zb = Box::new(bob).shared_secret().unwrap();
        assert_eq!(za, zb);
    }

    #[test]
    fn rsa_pkcs1_sha1_sign_verify_round_trip() {
        use crate::quote::test_support::sign_pkcs1_sha1;
        use rsa::pkcs1::EncodeRsaPublicKey;
        use rsa::{RsaPrivateKey, RsaPublicKey};
        use spki::EncodePublicKey;

        let mut rng = rand::rngs::OsRng;
        let private_key = RsaPrivateKey::new(&mut rng, 1024).unwrap();
        let public_key = RsaPublicKey::from(&private_key);
        let spki_der = public_key.to_public_key_der().unwrap().as_bytes().to_vec();
        // Exercise the DER round trip even though `spki_der` above already
        // has the SPKI wrapper `RawPublicKeyAik` expects.
        let _ = public_key.to_pkcs1_der();

        let aik = RawPublicKeyAik::from_spki_der(spki_der).unwrap();
        let data = b"TPM_QUOTE_INFO bytes under test";
        let signature = sign_pkcs1_sha1(&private_key, data);

        assert!(aik.verify(data, &signature).unwrap());

        let mut tampered = data.to_vec();
        tampered[0] ^= 0x01;
        assert!(!aik.verify(&tampered, &signature).unwrap());

        let mut tampered_sig = signature.clone();
        tampered_sig[0] ^= 0x01;
        assert!(!aik.verify(data, &tampered_sig).unwrap());
    }
}
