//! Integration coverage for the testable properties in spec §8: these
//! exercise the public API across `session`, `pcr`, and `quote` together,
//! rather than one unit.

use pts_attest::adapters::{DhGroup, HashAlgorithm, Hasher, OsRng, RawPublicKeyAik};
use pts_attest::quote;
use pts_attest::session::{AttestationSession, Role};
use rsa::pkcs1::EncodeRsaPublicKey as _;
use rsa::{RsaPrivateKey, RsaPublicKey};

fn paired_sessions() -> (AttestationSession, AttestationSession) {
    (
        AttestationSession::new(Role::Verifier),
        AttestationSession::new(Role::Measurer),
    )
}

/// Sign `data` with an RSA key under PKCS#1 v1.5 + SHA-1, mirroring what a
/// real AIK inside the TPM would produce for `rgbValidationData`.
fn sign_pkcs1_sha1(key: &RsaPrivateKey, data: &[u8]) -> Vec<u8> {
    use rsa::pkcs1v15::SigningKey;
    use rsa::signature::{RandomizedSigner, SignatureEncoding};
    use sha1::Sha1;

    let signing_key = SigningKey::<Sha1>::new(key.clone());
    let mut rng = rand::rngs::OsRng;
    signing_key.sign_with_rng(&mut rng, data).to_vec()
}

/// Property 1 + scenario S1: DH commutativity and the secret framing.
#[test]
fn dh_commutativity_and_secret_framing() {
    let (mut verifier, mut measurer) = paired_sessions();
    let mut rng = OsRng;

    verifier
        .create_dh_nonce(DhGroup::X25519, 20, &mut rng)
        .unwrap();
    measurer
        .create_dh_nonce(DhGroup::X25519, 20, &mut rng)
        .unwrap();

    let (v_pub, v_nonce) = verifier.my_public_value().unwrap();
    let (m_pub, m_nonce) = measurer.my_public_value().unwrap();

    verifier.set_peer_public_value(&m_pub, &m_nonce).unwrap();
    measurer.set_peer_public_value(&v_pub, &v_nonce).unwrap();

    verifier.calculate_secret().unwrap();
    measurer.calculate_secret().unwrap();

    let vs = verifier.secret().unwrap();
    let ms = measurer.secret().unwrap();
    assert_eq!(vs, ms);
    assert_eq!(vs.len(), 20);
}

/// Scenario S1 with literal inputs, exercised directly against the hash
/// framing formula (not through the DH handle, which can't be pinned to a
/// fixed shared secret).
#[test]
fn secret_framing_matches_literal_scenario_s1() {
    let ni = [0u8; 20];
    let nr = [0xffu8; 20];
    let z = [0x01u8];

    let mut hasher = HashAlgorithm::Sha1.hasher();
    hasher.update(b"1");
    hasher.update(&ni);
    hasher.update(&nr);
    hasher.update(&z);
    let mut expected = hasher.finalize();
    expected.truncate(20);
    assert_eq!(expected.len(), 20);

    use sha1::{Digest, Sha1};
    let mut reference = Sha1::new();
    reference.update(b"1");
    reference.update(ni);
    reference.update(nr);
    reference.update(z);
    assert_eq!(expected, reference.finalize().to_vec());
}

/// Property 3 + scenario S2: PCR bitmap round trip.
#[test]
fn pcr_bitmap_round_trip_all_subsets_of_a_small_set() {
    use pts_attest::pcr::PcrSet;

    for subset_mask in 0u32..(1 << 6) {
        let mut pcrs = PcrSet::new();
        let mut max = None;
        for i in 0..6u32 {
            if subset_mask & (1 << i) != 0 {
                pcrs.select(i).unwrap();
                max = Some(max.map_or(i, |m: u32| m.max(i)));
            }
        }
        let expected_size = match max {
            Some(m) => std::cmp::max(3, 1 + m / 8),
            None => 3,
        };
        assert_eq!(pcrs.size_of_select(), expected_size as u16);
        assert_eq!(pcrs.max_index(), max);
    }
}

/// Property 8 + scenario S8: PCR index bounds.
#[test]
fn pcr_index_bounds() {
    use pts_attest::pcr::PcrSet;
    let mut pcrs = PcrSet::new();
    assert!(pcrs.select(24).is_err());
    assert!(pcrs.add(24, &[0u8; 20], &[0u8; 20]).is_err());
    assert!(pcrs.select(23).is_ok());
}

/// Property 5: Quote Info length invariants.
#[test]
fn quote_info_lengths() {
    use pts_attest::pcr::PcrSet;

    let secret = vec![0u8; 20];
    let composite = vec![0u8; 40];
    let info = quote::build_quote_info(&composite, &secret, HashAlgorithm::Sha1);
    assert_eq!(info.len(), 48);

    let mut pcrs = PcrSet::new();
    pcrs.add(0, &[0u8; 20], &[1u8; 20]).unwrap();
    pcrs.add(3, &[0u8; 20], &[2u8; 20]).unwrap();
    let info2 = quote::build_quote_info2(&pcrs, &secret, None, HashAlgorithm::Sha1);
    let size_of_select = pcrs.size_of_select() as usize;
    assert_eq!(info2.len(), 2 + 4 + 20 + 2 + size_of_select + 1 + 20);
}

/// Property 6 + scenario S6: signature verification round trip via an
/// `AttestationSession` configured as a verifier with a raw AIK public key.
#[test]
fn verify_quote_signature_round_trip() {
    let mut rng = rand::rngs::OsRng;
    let private_key = RsaPrivateKey::new(&mut rng, 1024).unwrap();
    let public_key = RsaPublicKey::from(&private_key);
    let spki_der = {
        use spki::EncodePublicKey;
        public_key.to_public_key_der().unwrap().as_bytes().to_vec()
    };
    let _ = public_key.to_pkcs1_der();

    let mut verifier = AttestationSession::new(Role::Verifier);
    verifier.set_aik(Box::new(RawPublicKeyAik::from_spki_der(spki_der).unwrap()));

    let data = quote::build_quote_info(&[0u8; 20], &[0u8; 20], HashAlgorithm::Sha1);
    let signature = sign_pkcs1_sha1(&private_key, &data);

    assert!(verifier.verify_quote_signature(&data, &signature).unwrap());

    let mut tampered = data.clone();
    tampered[10] ^= 0xff;
    assert!(!verifier.verify_quote_signature(&tampered, &signature).unwrap());

    let mut tampered_sig = signature.clone();
    tampered_sig[0] ^= 0xff;
    assert!(!verifier.verify_quote_signature(&data, &tampered_sig).unwrap());
}

/// Negative-path coverage for the preconditions in spec §4.4's table.
#[test]
fn preconditions_return_errors_not_panics() {
    let mut session = AttestationSession::new(Role::Measurer);
    assert!(session.calculate_secret().is_err());
    assert!(session.get_aik_keyid().is_err());
    assert!(session.quote_tpm(false).is_err());
    assert!(session.get_quote_info(false, false, None).is_err());
    assert!(session.verify_quote_signature(b"data", b"sig").is_err());
}

/// `PcrSet::clear()` resets count/max_index/select and drops stored values.
#[test]
fn pcr_set_clear_resets_state() {
    use pts_attest::pcr::PcrSet;
    let mut pcrs = PcrSet::new();
    pcrs.add(2, &[0u8; 20], &[9u8; 20]).unwrap();
    pcrs.select(5).unwrap();
    pcrs.clear();
    assert_eq!(pcrs.count(), 0);
    assert_eq!(pcrs.max_index(), None);
    assert_eq!(pcrs.select_bytes(), [0, 0, 0]);
    assert!(pcrs.value(2).unwrap().is_none());
}
