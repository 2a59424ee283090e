//! Attestation session (spec §4.4, component D): owns per-session state and
//! orchestrates the measurement engine, PCR set, and quote plane.

use crate::adapters::{AikSource, DhGroup, DhHandle, HashAlgorithm, Hasher, Rng, X25519Dh};
use crate::error::{Error, Result};
use crate::pcr::PcrSet;
use crate::quote;
use zeroize::Zeroizing;

/// Which side of the attestation exchange this session represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The platform being attested.
    Measurer,
    /// The peer challenging it.
    Verifier,
}

/// Capability flag bit for "can carry integrity check values" (C).
pub const CAP_C: u8 = 1 << 0;
/// Capability flag bit for "can validate" (V). Default-on for every role.
pub const CAP_V: u8 = 1 << 1;
/// Capability flag bit for "can do DH key agreement" (D).
pub const CAP_D: u8 = 1 << 2;
/// Capability flag bit for "has a usable TPM" (T).
pub const CAP_T: u8 = 1 << 3;
/// Capability flag bit for an extension reserved by the wider protocol (X).
pub const CAP_X: u8 = 1 << 4;

/// Protocol capability bit set (spec §3 `proto_caps`): `{C, V, D, T, X}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtoCaps(u8);

impl ProtoCaps {
    /// Empty capability set.
    pub fn empty() -> Self {
        Self(0)
    }

    /// Raw bit value.
    pub fn bits(self) -> u8 {
        self.0
    }

    /// Construct directly from raw bits.
    pub fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// Whether `flag` is set.
    pub fn contains(self, flag: u8) -> bool {
        self.0 & flag != 0
    }

    /// Set `flag`.
    pub fn insert(&mut self, flag: u8) {
        self.0 |= flag;
    }
}

impl Default for ProtoCaps {
    /// `{V}`, per spec §3.
    fn default() -> Self {
        Self(CAP_V)
    }
}

/// One attestation exchange's session state (spec §3).
///
/// Mutated only through the operations below; see spec §4.4 for the state
/// machine these form. Sensitive buffers are `Zeroizing<Vec<u8>>` so both
/// `destroy` and ordinary `Drop` erase them without a bespoke helper.
pub struct AttestationSession {
    role: Role,
    proto_caps: ProtoCaps,
    meas_algo: HashAlgorithm,
    dh_hash_algo: HashAlgorithm,
    dh: Option<Box<dyn DhHandle>>,
    dh_public: Option<Vec<u8>>,
    initiator_nonce: Zeroizing<Vec<u8>>,
    responder_nonce: Zeroizing<Vec<u8>>,
    secret: Option<Zeroizing<Vec<u8>>>,
    platform_info: String,
    has_tpm: bool,
    tpm_version_info: Option<Vec<u8>>,
    aik: Option<Box<dyn AikSource>>,
    aik_blob: Option<Zeroizing<Vec<u8>>>,
    pcr_set: PcrSet,
}

impl std::fmt::Debug for AttestationSession {
    /// Manual impl so secret fields never leak through `{:?}` in logs
    /// (spec SPEC_FULL §3: redacted, not derived).
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttestationSession")
            .field("role", &self.role)
            .field("proto_caps", &self.proto_caps)
            .field("meas_algo", &self.meas_algo)
            .field("dh_hash_algo", &self.dh_hash_algo)
            .field("dh_complete", &self.dh.is_some())
            .field("has_initiator_nonce", &!self.initiator_nonce.is_empty())
            .field("has_responder_nonce", &!self.responder_nonce.is_empty())
            .field("has_secret", &self.secret.is_some())
            .field("platform_info", &self.platform_info)
            .field("has_tpm", &self.has_tpm)
            .field("has_aik", &self.aik.is_some())
            .field("has_aik_blob", &self.aik_blob.is_some())
            .field("pcr_count", &self.pcr_set.count())
            .finish()
    }
}

impl AttestationSession {
    /// Create an empty session for `role`. Default `proto_caps = {V}`,
    /// `meas_algo = dh_hash_algo = SHA-256`.
    pub fn new(role: Role) -> Self {
        Self {
            role,
            proto_caps: ProtoCaps::default(),
            meas_algo: HashAlgorithm::Sha256,
            dh_hash_algo: HashAlgorithm::Sha256,
            dh: None,
            dh_public: None,
            initiator_nonce: Zeroizing::new(Vec::new()),
            responder_nonce: Zeroizing::new(Vec::new()),
            secret: None,
            platform_info: String::new(),
            has_tpm: false,
            tpm_version_info: None,
            aik: None,
            aik_blob: None,
            pcr_set: PcrSet::new(),
        }
    }

    /// This session's role.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Current capability bit set.
    pub fn proto_caps(&self) -> ProtoCaps {
        self.proto_caps
    }

    /// Replace the capability bit set.
    pub fn set_proto_caps(&mut self, caps: ProtoCaps) {
        self.proto_caps = caps;
    }

    /// Mark a usable TPM as present; enables the `{T, D}` capability bits.
    pub fn set_has_tpm(&mut self, has_tpm: bool) {
        self.has_tpm = has_tpm;
        if has_tpm {
            self.proto_caps.insert(CAP_T);
            self.proto_caps.insert(CAP_D);
        }
    }

    /// Whether a usable TPM is present.
    pub fn has_tpm(&self) -> bool {
        self.has_tpm
    }

    /// The hash algorithm selected for file measurements.
    pub fn meas_algorithm(&self) -> HashAlgorithm {
        self.meas_algo
    }

    /// Select the measurement hash algorithm by name. Ignored (not an
    /// error) if the name doesn't map to a known hash family, per spec §4.4.
    pub fn set_meas_algorithm(&mut self, name: &str) {
        if let Some(algo) = HashAlgorithm::from_name(name) {
            self.meas_algo = algo;
        }
    }

    /// The hash algorithm selected for assessment-secret derivation.
    pub fn dh_hash_algorithm(&self) -> HashAlgorithm {
        self.dh_hash_algo
    }

    /// Select the DH-secret hash algorithm by name. Ignored if unknown.
    pub fn set_dh_hash_algorithm(&mut self, name: &str) {
        if let Some(algo) = HashAlgorithm::from_name(name) {
            self.dh_hash_algo = algo;
        }
    }

    /// Set the human-readable platform string directly (see
    /// [`crate::platform::detect`] for the usual source).
    pub fn set_platform_info(&mut self, info: String) {
        self.platform_info = info;
    }

    /// The session's platform string, empty if never set/derived.
    pub fn platform_info(&self) -> &str {
        &self.platform_info
    }

    /// Install the AIK as an X.509 certificate or bare public key
    /// (certificate wins if both are ever supplied — caller enforces the
    /// precedence by only calling this once with whichever it has).
    pub fn set_aik(&mut self, aik: Box<dyn AikSource>) {
        self.aik = Some(aik);
    }

    /// Install the raw TSS key-blob bytes for the AIK.
    pub fn set_aik_blob(&mut self, blob: Vec<u8>) {
        self.aik_blob = Some(Zeroizing::new(blob));
    }

    /// Install the opaque TPM 1.2 `TPM_CAP_VERSION_INFO` blob.
    pub fn set_tpm_version_info(&mut self, info: Vec<u8>) {
        self.tpm_version_info = Some(info);
    }

    /// The PCR set embedded in this session.
    pub fn pcr_set(&self) -> &PcrSet {
        &self.pcr_set
    }

    /// Mutable access to the embedded PCR set (for `select`/`add` during
    /// measurement extension bookkeeping).
    pub fn pcr_set_mut(&mut self) -> &mut PcrSet {
        &mut self.pcr_set
    }

    fn own_nonce(&self) -> &Zeroizing<Vec<u8>> {
        match self.role {
            Role::Measurer => &self.responder_nonce,
            Role::Verifier => &self.initiator_nonce,
        }
    }

    fn own_nonce_mut(&mut self) -> &mut Zeroizing<Vec<u8>> {
        match self.role {
            Role::Measurer => &mut self.responder_nonce,
            Role::Verifier => &mut self.initiator_nonce,
        }
    }

    fn peer_nonce_mut(&mut self) -> &mut Zeroizing<Vec<u8>> {
        match self.role {
            Role::Measurer => &mut self.initiator_nonce,
            Role::Verifier => &mut self.responder_nonce,
        }
    }

    /// Create a fresh DH handle for `group` and generate `n` random bytes
    /// into this role's own nonce (`responder_nonce` for the Measurer,
    /// `initiator_nonce` for the Verifier).
    pub fn create_dh_nonce(&mut self, group: DhGroup, n: usize, rng: &mut dyn Rng) -> Result<()> {
        if n == 0 {
            return Err(Error::KeyAgreementFailed(
                "nonce length must be greater than zero".into(),
            ));
        }
        let nonce = rng.fill(n)?;
        let dh = X25519Dh::generate(group);
        self.dh_public = Some(dh.my_public());
        self.dh = Some(Box::new(dh));
        *self.own_nonce_mut() = Zeroizing::new(nonce);
        Ok(())
    }

    /// This side's DH public value and own nonce, once `create_dh_nonce`
    /// has run.
    pub fn my_public_value(&self) -> Result<(Vec<u8>, Vec<u8>)> {
        let public = self
            .dh_public
            .clone()
            .ok_or_else(|| Error::KeyAgreementFailed("DH handle not created".into()))?;
        Ok((public, self.own_nonce().to_vec()))
    }

    /// Record the peer's DH public value and nonce.
    pub fn set_peer_public_value(&mut self, peer_public: &[u8], peer_nonce: &[u8]) -> Result<()> {
        let dh = self
            .dh
            .as_mut()
            .ok_or_else(|| Error::KeyAgreementFailed("DH handle not created".into()))?;
        dh.set_peer_public(peer_public)?;
        *self.peer_nonce_mut() = Zeroizing::new(peer_nonce.to_vec());
        Ok(())
    }

    /// Derive the 20-byte assessment secret:
    /// `H(dh_hash_algo; "1" || initiator_nonce || responder_nonce || Z)[0..20]`.
    ///
    /// Requires both nonces set and a completed DH handle. The shared
    /// secret `Z` is zeroized immediately after use.
    pub fn calculate_secret(&mut self) -> Result<()> {
        if self.initiator_nonce.is_empty() {
            return Err(Error::MissingNonce("initiator_nonce"));
        }
        if self.responder_nonce.is_empty() {
            return Err(Error::MissingNonce("responder_nonce"));
        }
        let dh = self
            .dh
            .take()
            .ok_or_else(|| Error::KeyAgreementFailed("DH handle not created".into()))?;
        let mut shared = Zeroizing::new(dh.shared_secret()?);

        let mut hasher = self.dh_hash_algo.hasher();
        hasher.update(b"1");
        hasher.update(&self.initiator_nonce);
        hasher.update(&self.responder_nonce);
        hasher.update(&shared);
        let digest = hasher.finalize();
        zeroize::Zeroize::zeroize(&mut *shared);

        let mut secret = digest;
        secret.truncate(20);
        self.secret = Some(Zeroizing::new(secret));
        Ok(())
    }

    /// The derived assessment secret, once [`Self::calculate_secret`] has run.
    pub fn secret(&self) -> Result<&[u8]> {
        self.secret.as_deref().map(|v| v.as_slice()).ok_or(Error::MissingSecret)
    }

    /// SHA-1 of the AIK's SubjectPublicKeyInfo.
    pub fn get_aik_keyid(&self) -> Result<Vec<u8>> {
        self.aik.as_ref().ok_or(Error::MissingAik)?.fingerprint()
    }

    /// Read the current value of PCR `index` from the TPM.
    pub fn read_pcr(&self, index: u32) -> Result<Vec<u8>> {
        if !self.has_tpm {
            return Err(Error::TpmUnavailable {
                code: 0,
                message: "no usable TPM for this session".into(),
            });
        }
        quote::read_pcr(index)
    }

    /// Extend PCR `index` by a 20-byte `input`, returning the resulting
    /// post-extension value.
    pub fn extend_pcr(&mut self, index: u32, input: &[u8]) -> Result<Vec<u8>> {
        if !self.has_tpm {
            return Err(Error::TpmUnavailable {
                code: 0,
                message: "no usable TPM for this session".into(),
            });
        }
        if input.len() != 20 {
            return Err(Error::KeyAgreementFailed(
                "extend_pcr input must be 20 bytes".into(),
            ));
        }
        let before = quote::read_pcr(index).ok();
        let after = quote::extend_pcr(index, input)?;
        if let Some(before) = before {
            self.pcr_set.add(index, &before, &after)?;
        } else {
            self.pcr_set.add(index, &after, &after)?;
        }
        Ok(after)
    }

    /// Drive a TPM `Quote`/`Quote2` over the selected PCR set, using the
    /// assessment secret as `externalData`. Clears the PCR set on every
    /// exit path (spec §4.5 step 10).
    pub fn quote_tpm(&mut self, use_quote2: bool) -> Result<(Vec<u8>, Vec<u8>)> {
        if self.pcr_set.count() == 0 {
            let err = Error::TpmUnavailable {
                code: 0,
                message: "no PCRs selected".into(),
            };
            self.pcr_set.clear();
            return Err(err);
        }
        let secret = self.secret().map(|s| s.to_vec());
        let secret = match secret {
            Ok(s) => s,
            Err(e) => {
                self.pcr_set.clear();
                return Err(e);
            }
        };
        let aik_blob = match &self.aik_blob {
            Some(b) => b.to_vec(),
            None => {
                self.pcr_set.clear();
                return Err(Error::MissingAik);
            }
        };

        let result = quote::quote_tpm(&self.pcr_set, &secret, &aik_blob, use_quote2);
        self.pcr_set.clear();
        result
    }

    /// Build the `TPM_QUOTE_INFO`/`TPM_QUOTE_INFO2` bytes the TPM would
    /// sign, without invoking the TSS — used by both sides to agree on the
    /// input before/while the measurer obtains a real Quote. Clears the PCR
    /// set on return.
    pub fn get_quote_info(
        &mut self,
        use_quote2: bool,
        use_version_info: bool,
        comp_hash_algo: Option<HashAlgorithm>,
    ) -> Result<(Vec<u8>, Vec<u8>)> {
        let result = (|| {
            if self.pcr_set.count() == 0 {
                return Err(Error::TpmUnavailable {
                    code: 0,
                    message: "no PCRs selected".into(),
                });
            }
            let secret = self.secret()?.to_vec();
            let version_info = if use_quote2 && use_version_info {
                Some(
                    self.tpm_version_info
                        .clone()
                        .ok_or(Error::MissingVersionInfo)?,
                )
            } else {
                None
            };
            let pcr_composite = self.pcr_set.compose();
            let algo = comp_hash_algo.unwrap_or(HashAlgorithm::Sha1);
            let info = if use_quote2 {
                quote::build_quote_info2(&self.pcr_set, &secret, version_info.as_deref(), algo)
            } else {
                quote::build_quote_info(&pcr_composite, &secret, algo)
            };
            Ok((pcr_composite, info))
        })();
        self.pcr_set.clear();
        result
    }

    /// Verify `signature` over `data` under the session's AIK
    /// (RSA-PKCS#1 v1.5 + SHA-1). Returns `false` on any adapter failure.
    pub fn verify_quote_signature(&self, data: &[u8], signature: &[u8]) -> Result<bool> {
        let aik = self.aik.as_ref().ok_or(Error::MissingAik)?;
        Ok(aik.verify(data, signature).unwrap_or(false))
    }

    /// Zeroise nonces, secret, DH state, and AIK blob, then drop the
    /// session. Safe from any state (Rust ownership means there is no
    /// use-after-destroy to guard structurally).
    pub fn destroy(mut self) {
        self.zeroize_secrets();
    }

    fn zeroize_secrets(&mut self) {
        use zeroize::Zeroize;
        self.initiator_nonce.zeroize();
        self.responder_nonce.zeroize();
        if let Some(secret) = &mut self.secret {
            secret.zeroize();
        }
        if let Some(blob) = &mut self.aik_blob {
            blob.zeroize();
        }
        self.dh = None;
        self.dh_public = None;
        self.pcr_set.clear();
    }
}

impl Drop for AttestationSession {
    fn drop(&mut self) {
        self.zeroize_secrets();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{DhGroup, OsRng};

    fn paired_sessions() -> (AttestationSession, AttestationSession) {
        (
            AttestationSession::new(Role::Verifier),
            AttestationSession::new(Role::Measurer),
        )
    }

    #[test]
    fn dh_commutativity_property_1() {
        let (mut verifier, mut measurer) = paired_sessions();
        let mut rng = OsRng;

        verifier.create_dh_nonce(DhGroup::X25519, 20, &mut rng).unwrap();
        measurer.create_dh_nonce(DhGroup::X25519, 20, &mut rng).unwrap();

        let (v_pub, v_nonce) = verifier.my_public_value().unwrap();
        let (m_pub, m_nonce) = measurer.my_public_value().unwrap();

        verifier.set_peer_public_value(&m_pub, &m_nonce).unwrap();
        measurer.set_peer_public_value(&v_pub, &v_nonce).unwrap();

        verifier.calculate_secret().unwrap();
        measurer.calculate_secret().unwrap();

        assert_eq!(verifier.secret().unwrap(), measurer.secret().unwrap());
        assert_eq!(verifier.secret().unwrap().len(), 20);
    }

    #[test]
    fn calculate_secret_before_dh_fails_with_missing_nonce() {
        let mut session = AttestationSession::new(Role::Measurer);
        let err = session.calculate_secret().unwrap_err();
        assert!(matches!(err, Error::MissingNonce(_)));
    }

    #[test]
    fn set_meas_algorithm_ignores_unknown_name() {
        let mut session = AttestationSession::new(Role::Measurer);
        session.set_meas_algorithm("md5");
        assert_eq!(session.meas_algorithm(), HashAlgorithm::Sha256);
        session.set_meas_algorithm("sha1");
        assert_eq!(session.meas_algorithm(), HashAlgorithm::Sha1);
    }

    #[test]
    fn destroy_zeroizes_nonce_buffers() {
        let mut session = AttestationSession::new(Role::Measurer);
        let mut rng = OsRng;
        session.create_dh_nonce(DhGroup::X25519, 20, &mut rng).unwrap();
        session.calculate_secret().unwrap_err(); // no peer value set yet; DH handle still present
        assert!(!session.own_nonce().is_empty());
        assert!(session.dh.is_some());

        // `destroy` consumes `self`, so the zeroize effect is checked through
        // the same path it calls rather than after the value is gone.
        session.zeroize_secrets();
        assert!(session.own_nonce().is_empty());
        assert!(session.dh.is_none());
        assert_eq!(session.pcr_set().count(), 0);

        session.destroy();
    }

    #[test]
    fn quote_tpm_without_secret_fails_and_clears_pcrs() {
        let mut session = AttestationSession::new(Role::Measurer);
        session.pcr_set_mut().select(0).unwrap();
        let err = session.quote_tpm(false).unwrap_err();
        assert!(matches!(err, Error::MissingSecret));
        assert_eq!(session.pcr_set().count(), 0);
    }
}
