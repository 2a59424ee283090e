//! Quote plane (spec §4.5, component E): drives TPM `Quote`/`Quote2` on the
//! measurer side and builds the byte structures both sides sign/verify.

use crate::adapters::{HashAlgorithm, Hasher};
use crate::error::{Error, Result};
use crate::pcr::PcrSet;
use crate::wire::Writer;

/// `TPM_QUOTE_INFO.version` (spec §6).
const QUOTE_INFO_VERSION: [u8; 4] = [0x01, 0x01, 0x00, 0x00];
/// `TPM_QUOTE_INFO` fixed tag (spec §6).
const QUOTE_TAG: &[u8; 4] = b"QUOT";
/// `TPM_QUOTE_INFO2.tag` (`TPM_TAG_QUOTE_INFO2`).
const QUOTE_INFO2_TAG: u16 = 0x0036;
/// `TPM_QUOTE_INFO2` fixed tag bytes.
const QUOTE2_TAG: &[u8; 4] = b"QUT2";
/// `TPM_LOC_ZERO`.
const LOCALITY_ZERO: u8 = 0;
/// The well-known SRK secret (20 zero bytes), spec §4.5 step 2.
pub const SRK_WELL_KNOWN_SECRET: [u8; 20] = [0u8; 20];

fn sha1(data: &[u8]) -> Vec<u8> {
    use sha1::{Digest, Sha1};
    let mut h = Sha1::new();
    h.update(data);
    h.finalize().to_vec()
}

/// Build the 48-byte `TPM_QUOTE_INFO` structure (spec §6).
///
/// `comp_hash_algo` selects the hash used over the PCR Composite; the TPM
/// 1.2 wire format always uses SHA-1 here, but the parameter lets callers
/// exercise `get_quote_info`'s `comp_hash_algo` override for experimentation
/// without hard-coding SHA-1 at the call site.
pub fn build_quote_info(pcr_composite: &[u8], secret: &[u8], comp_hash_algo: HashAlgorithm) -> Vec<u8> {
    let digest = match comp_hash_algo {
        HashAlgorithm::Sha1 => sha1(pcr_composite),
        other => {
            let mut h = other.hasher();
            h.update(pcr_composite);
            let mut d = h.finalize();
            d.truncate(20);
            d
        }
    };
    let mut w = Writer::with_capacity(48);
    w.put_bytes(&QUOTE_INFO_VERSION);
    w.put_bytes(QUOTE_TAG);
    w.put_bytes(&digest);
    w.put_bytes(secret);
    w.finish()
}

/// Build the variable-length `TPM_QUOTE_INFO2` structure (spec §6).
///
/// Per Design Note §9's Open Question 3, the composite hash is always
/// computed over `pcr_set.compose()` the same way regardless of whether
/// version info is attached — preserved as-is rather than resolved.
pub fn build_quote_info2(
    pcr_set: &PcrSet,
    secret: &[u8],
    version_info: Option<&[u8]>,
    comp_hash_algo: HashAlgorithm,
) -> Vec<u8> {
    let composite = pcr_set.compose();
    let digest = match comp_hash_algo {
        HashAlgorithm::Sha1 => sha1(&composite),
        other => {
            let mut h = other.hasher();
            h.update(&composite);
            let mut d = h.finalize();
            d.truncate(20);
            d
        }
    };
    let size_of_select = pcr_set.size_of_select();
    let select = pcr_set.select_bytes();

    let mut w = Writer::with_capacity(2 + 4 + 20 + 2 + size_of_select as usize + 1 + 20);
    w.put_u16(QUOTE_INFO2_TAG);
    w.put_bytes(QUOTE2_TAG);
    w.put_bytes(secret);
    w.put_u16(size_of_select);
    w.put_bytes(&select[..size_of_select as usize]);
    w.put_u8(LOCALITY_ZERO);
    w.put_bytes(&digest);
    if let Some(info) = version_info {
        w.put_bytes(info);
    }
    w.finish()
}

/// Read the current value of PCR `index` from the TPM.
#[cfg(feature = "hardware-tpm")]
pub fn read_pcr(index: u32) -> Result<Vec<u8>> {
    hardware::read_pcr(index)
}

/// Read the current value of PCR `index` from the TPM.
#[cfg(not(feature = "hardware-tpm"))]
pub fn read_pcr(_index: u32) -> Result<Vec<u8>> {
    Err(Error::TpmUnavailable {
        code: 0,
        message: "crate built without the `hardware-tpm` feature".into(),
    })
}

/// Extend PCR `index` by `input` (must be 20 bytes), returning the
/// resulting value.
#[cfg(feature = "hardware-tpm")]
pub fn extend_pcr(index: u32, input: &[u8]) -> Result<Vec<u8>> {
    hardware::extend_pcr(index, input)
}

/// Extend PCR `index` by `input` (must be 20 bytes), returning the
/// resulting value.
#[cfg(not(feature = "hardware-tpm"))]
pub fn extend_pcr(_index: u32, _input: &[u8]) -> Result<Vec<u8>> {
    Err(Error::TpmUnavailable {
        code: 0,
        message: "crate built without the `hardware-tpm` feature".into(),
    })
}

/// Drive `TPM_Quote`/`TPM_Quote2` over `pcr_set`'s selection, with `secret`
/// as `externalData`, using the AIK loaded from `aik_blob` under the SRK.
///
/// Every exit path releases the TSS context (spec §4.5 step 10); the caller
/// (`AttestationSession::quote_tpm`) is responsible for clearing the PCR set
/// regardless of the result.
#[cfg(feature = "hardware-tpm")]
pub fn quote_tpm(
    pcr_set: &PcrSet,
    secret: &[u8],
    aik_blob: &[u8],
    use_quote2: bool,
) -> Result<(Vec<u8>, Vec<u8>)> {
    hardware::quote_tpm(pcr_set, secret, aik_blob, use_quote2)
}

/// Drive `TPM_Quote`/`TPM_Quote2` over `pcr_set`'s selection.
#[cfg(not(feature = "hardware-tpm"))]
pub fn quote_tpm(
    _pcr_set: &PcrSet,
    _secret: &[u8],
    _aik_blob: &[u8],
    _use_quote2: bool,
) -> Result<(Vec<u8>, Vec<u8>)> {
    Err(Error::TpmUnavailable {
        code: 0,
        message: "crate built without the `hardware-tpm` feature".into(),
    })
}

/// Extract the PCR composite hash from a TPM `rgbData` blob, per spec §4.5
/// step 8.
///
/// Quote: bytes 8..28 (after the 4-byte version and 4-byte `"QUOT"` tag).
/// Quote2: the last 20 bytes, regardless of whether version info is
/// attached (Design Note §9 Open Question 3, preserved as-is).
pub fn extract_composite_hash(rgb_data: &[u8], use_quote2: bool) -> Result<Vec<u8>> {
    if use_quote2 {
        if rgb_data.len() < 20 {
            return Err(Error::TpmUnavailable {
                code: 0,
                message: "Quote2 rgbData shorter than 20 bytes".into(),
            });
        }
        Ok(rgb_data[rgb_data.len() - 20..].to_vec())
    } else {
        if rgb_data.len() < 28 {
            return Err(Error::TpmUnavailable {
                code: 0,
                message: "Quote rgbData shorter than 28 bytes".into(),
            });
        }
        Ok(rgb_data[8..28].to_vec())
    }
}

#[cfg(feature = "hardware-tpm")]
mod hardware {
    //! The real TSS binding (spec §4.5 steps 1-10), gated behind
    //! `hardware-tpm` so the crate never ships an insecure stub Quote path
    //! in a default build.

    use super::*;
    use crate::pcr::PCR_COUNT;
    use crate::wire::Reader;
    use tss_esapi::{
        attributes::ObjectAttributesBuilder,
        handles::KeyHandle,
        interface_types::{
            algorithm::{HashingAlgorithm, PublicAlgorithm},
            ecc::EccCurve,
            resource_handles::Hierarchy,
        },
        structures::{
            Auth, Data, Digest as TssDigest, EccScheme, PcrSelectionListBuilder, PcrSlot, Private,
            Public, PublicBuilder, PublicEccParametersBuilder, SignatureScheme,
            SymmetricDefinitionObject,
        },
        traits::Marshall,
        Context, TctiNameConf,
    };

    fn with_tpm_context<T>(f: impl FnOnce(&mut Context) -> tss_esapi::Result<T>) -> Result<T> {
        let tcti = TctiNameConf::from_environment_variable().map_err(|e| Error::TpmUnavailable {
            code: 0,
            message: format!("no TCTI configured: {e}"),
        })?;
        let mut context = Context::new(tcti).map_err(|e| Error::TpmUnavailable {
            code: 0,
            message: format!("failed to open TSS context: {e}"),
        })?;
        f(&mut context).map_err(|e| Error::TpmUnavailable {
            code: 0,
            message: e.to_string(),
        })
    }

    fn pcr_slot(index: u32) -> Result<PcrSlot> {
        let index: u8 = index.try_into().map_err(|_| Error::PcrIndexOutOfRange(index))?;
        PcrSlot::try_from(index).map_err(|_| Error::PcrIndexOutOfRange(index as u32))
    }

    pub(super) fn read_pcr(index: u32) -> Result<Vec<u8>> {
        let slot = pcr_slot(index)?;
        with_tpm_context(|ctx| {
            let selection_list = PcrSelectionListBuilder::new()
                .with_selection(tss_esapi::interface_types::algorithm::HashingAlgorithm::Sha1, &[slot])
                .build()?;
            let (_update_counter, _selection, digests) = ctx.pcr_read(selection_list)?;
            Ok(digests
                .value()
                .first()
                .map(|d| d.value().to_vec())
                .unwrap_or_default())
        })
    }

    pub(super) fn extend_pcr(index: u32, input: &[u8]) -> Result<Vec<u8>> {
        let slot = pcr_slot(index)?;
        let digest = TssDigest::try_from(input.to_vec()).map_err(|e| Error::TpmUnavailable {
            code: 0,
            message: format!("invalid extend digest: {e}"),
        })?;
        with_tpm_context(|ctx| {
            let handle = tss_esapi::structures::PcrHandle::from(slot);
            let mut values = tss_esapi::structures::DigestValues::new();
            values.set(tss_esapi::interface_types::algorithm::HashingAlgorithm::Sha1, digest);
            ctx.pcr_extend(handle, values)?;
            Ok(())
        })?;
        read_pcr(index)
    }

    /// Create the Storage Root Key (spec §4.5 step 2) as an ECC P256
    /// primary under the Owner hierarchy, keyed with the well-known SRK
    /// secret rather than a caller-supplied auth value.
    fn create_srk(ctx: &mut Context) -> tss_esapi::Result<KeyHandle> {
        let object_attributes = ObjectAttributesBuilder::new()
            .with_fixed_tpm(true)
            .with_fixed_parent(true)
            .with_sensitive_data_origin(true)
            .with_user_with_auth(true)
            .with_decrypt(true)
            .with_restricted(true)
            .build()?;

        let srk_public = PublicBuilder::new()
            .with_public_algorithm(PublicAlgorithm::Ecc)
            .with_name_hashing_algorithm(HashingAlgorithm::Sha256)
            .with_object_attributes(object_attributes)
            .with_ecc_parameters(
                PublicEccParametersBuilder::new()
                    .with_symmetric(SymmetricDefinitionObject::AES_128_CFB)
                    .with_ecc_scheme(EccScheme::Null)
                    .with_curve(EccCurve::NistP256)
                    .with_is_signing_key(false)
                    .with_is_decryption_key(true)
                    .with_restricted(true)
                    .build()?,
            )
            .with_ecc_unique_identifier(Default::default())
            .build()?;

        let srk_auth = Auth::try_from(SRK_WELL_KNOWN_SECRET.to_vec())?;
        let result = ctx.execute_with_nullauth_session(|ctx| {
            ctx.create_primary(Hierarchy::Owner, srk_public, Some(srk_auth), None, None)
        })?;
        Ok(result.key_handle)
    }

    /// Split `aik_blob` into its marshalled `Public`/`Private` areas (spec
    /// §4.5 step 3: "load the AIK verbatim from its blob"), framed as
    /// `[u32 len][public][u32 len][private]` per this crate's own
    /// length-prefixed wire convention.
    fn split_aik_blob(blob: &[u8]) -> Result<(Public, Private)> {
        let blob_err = |e: crate::wire::ReadError| Error::TpmUnavailable {
            code: 0,
            message: format!("aik_blob malformed: {e}"),
        };
        let mut reader = Reader::new(blob);
        let pub_len = reader.get_u32().map_err(blob_err)? as usize;
        let pub_bytes = reader.get_bytes(pub_len).map_err(blob_err)?;
        let priv_len = reader.get_u32().map_err(blob_err)? as usize;
        let priv_bytes = reader.get_bytes(priv_len).map_err(blob_err)?;

        let public = Public::unmarshall(pub_bytes).map_err(|e| Error::TpmUnavailable {
            code: 0,
            message: format!("aik_blob public area unmarshal failed: {e}"),
        })?;
        let private = Private::unmarshall(priv_bytes).map_err(|e| Error::TpmUnavailable {
            code: 0,
            message: format!("aik_blob private area unmarshal failed: {e}"),
        })?;
        Ok((public, private))
    }

    pub(super) fn quote_tpm(
        pcr_set: &PcrSet,
        secret: &[u8],
        aik_blob: &[u8],
        use_quote2: bool,
    ) -> Result<(Vec<u8>, Vec<u8>)> {
        if pcr_set.count() == 0 {
            return Err(Error::TpmUnavailable {
                code: 0,
                message: "no PCRs selected".into(),
            });
        }
        let (aik_public, aik_private) = split_aik_blob(aik_blob)?;

        let select = pcr_set.select_bytes();
        let mut slots = Vec::new();
        for index in 0..PCR_COUNT as u32 {
            if select[(index / 8) as usize] & (1 << (index % 8)) != 0 {
                slots.push(pcr_slot(index)?);
            }
        }

        let secret = secret.to_vec();
        with_tpm_context(|ctx| {
            let srk_handle = create_srk(ctx)?;

            let aik_handle = match ctx
                .execute_with_nullauth_session(|ctx| ctx.load(srk_handle, aik_private, aik_public))
            {
                Ok(handle) => handle,
                Err(e) => {
                    let _ = ctx.flush_context(srk_handle.into());
                    return Err(e);
                }
            };

            let mut selection_builder = PcrSelectionListBuilder::new();
            for slot in slots {
                selection_builder = selection_builder.with_selection(HashingAlgorithm::Sha1, &[slot]);
            }
            let selection_list = match selection_builder.build() {
                Ok(list) => list,
                Err(e) => {
                    let _ = ctx.flush_context(aik_handle.into());
                    let _ = ctx.flush_context(srk_handle.into());
                    return Err(e);
                }
            };

            let nonce_data = match Data::try_from(secret) {
                Ok(data) => data,
                Err(e) => {
                    let _ = ctx.flush_context(aik_handle.into());
                    let _ = ctx.flush_context(srk_handle.into());
                    return Err(e);
                }
            };

            let quote_result = ctx.execute_with_nullauth_session(|ctx| {
                ctx.quote(
                    aik_handle.into(),
                    nonce_data,
                    SignatureScheme::Null,
                    selection_list,
                )
            });

            let _ = ctx.flush_context(aik_handle.into());
            let _ = ctx.flush_context(srk_handle.into());

            let (attest, signature) = quote_result?;
            let attest_bytes = attest.marshall()?;
            let signature_bytes = signature.marshall()?;
            Ok((attest_bytes, signature_bytes))
        })
        .and_then(|(attest_bytes, signature_bytes)| {
            let composite_hash = extract_composite_hash(&attest_bytes, use_quote2)?;
            Ok((composite_hash, signature_bytes))
        })
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Software-only Quote signing, reachable only from tests (spec
    //! SPEC_FULL §4.5 "Hardware/stub split"): lets the §8 scenarios exercise
    //! byte layout and signature round-trips without hardware.

    use rsa::pkcs1v15::SigningKey;
    use rsa::signature::{RandomizedSigner, SignatureEncoding};
    use rsa::RsaPrivateKey;
    use sha1::Sha1;

    /// Sign `data` (typically `TPM_QUOTE_INFO{,2}` bytes) with an RSA key
    /// under PKCS#1 v1.5 + SHA-1, mirroring what a real AIK inside the TPM
    /// would produce for `rgbValidationData`.
    pub fn sign_pkcs1_sha1(key: &RsaPrivateKey, data: &[u8]) -> Vec<u8> {
        let signing_key = SigningKey::<Sha1>::new(key.clone());
        let mut rng = rand::rngs::OsRng;
        signing_key.sign_with_rng(&mut rng, data).to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_info_length_matches_scenario_s4_layout() {
        let secret = vec![0xAB; 20];
        let composite = vec![0u8; 10];
        let info = build_quote_info(&composite, &secret, HashAlgorithm::Sha1);
        assert_eq!(info.len(), 48);
        assert_eq!(&info[0..4], &QUOTE_INFO_VERSION);
        assert_eq!(&info[4..8], QUOTE_TAG);
        assert_eq!(&info[28..48], secret.as_slice());
    }

    #[test]
    fn quote_info2_length_without_version_info() {
        let mut pcrs = PcrSet::new();
        pcrs.add(0, &[0u8; 20], &[1u8; 20]).unwrap();
        let secret = vec![0x11; 20];
        let info = build_quote_info2(&pcrs, &secret, None, HashAlgorithm::Sha1);
        // 2+4+20+2+size_of_select+1+20, size_of_select == 3 here.
        assert_eq!(info.len(), 2 + 4 + 20 + 2 + 3 + 1 + 20);
    }

    #[test]
    fn extract_composite_hash_quote_offsets() {
        let secret = vec![0u8; 20];
        let composite = vec![0u8; 10];
        let info = build_quote_info(&composite, &secret, HashAlgorithm::Sha1);
        let expected = sha1(&composite);
        assert_eq!(extract_composite_hash(&info, false).unwrap(), expected);
    }

    #[test]
    fn extract_composite_hash_quote2_last_20_bytes() {
        let mut pcrs = PcrSet::new();
        pcrs.add(0, &[0u8; 20], &[1u8; 20]).unwrap();
        let secret = vec![0u8; 20];
        let info = build_quote_info2(&pcrs, &secret, None, HashAlgorithm::Sha1);
        let expected = sha1(&pcrs.compose());
        assert_eq!(extract_composite_hash(&info, true).unwrap(), expected);
    }
}
