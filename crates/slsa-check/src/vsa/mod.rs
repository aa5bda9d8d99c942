//! VSA verifiers.
//!
//! A static table keyed by verifier-ID prefix; each entry bundles an
//! Ed25519 public key and its `keyid`. The table invariants (no entry ID
//! is a prefix of another, distinct keyids, distinct keys) are enforced
//! by the test suite.

pub mod v02;

use std::sync::Arc;

use crate::crypto::{DsseVerifier, SignatureEncoding, TrustedKey};
use crate::dsse::Envelope;
use crate::error::{Result, VerifyError};
use crate::identifier::TrustedVerifierID;
use crate::intoto::statement_from_envelope;
use crate::options::{Context, VerifierOpts, VsaOpts};
use crate::registry::VsaVerifier;

use self::v02::VsaPredicate;

/// One entry of the static verifier table.
struct VerifierMetadata {
    id: &'static str,
    keyid: &'static str,
    key_pem: &'static str,
}

/// The deployed VSA verifiers.
static METADATAS: &[VerifierMetadata] = &[VerifierMetadata {
    id: "https://bcid.corp.google.com/verifier/bcid_package_enforcer",
    keyid: "keystore://76574:prod:vsa_signing_public_key",
    key_pem: include_str!("../../keys/vsa/bcid-package-enforcer.pem"),
}];

/// A VSA verifier with a fixed identity prefix and key.
pub struct StaticVsaVerifier {
    id: String,
    verifier: DsseVerifier,
}

impl StaticVsaVerifier {
    /// Build a verifier from an ID prefix, keyid and PEM public key.
    ///
    /// # Errors
    ///
    /// `InvalidFormat` when the key fails to parse.
    pub fn with_key(id: &str, keyid: &str, key_pem: &str) -> Result<Self> {
        Ok(Self {
            id: id.to_string(),
            verifier: DsseVerifier::new(vec![TrustedKey::from_pem(keyid, key_pem)?]),
        })
    }
}

impl VsaVerifier for StaticVsaVerifier {
    fn is_authoritative_for(&self, verifier_id_name: &str) -> bool {
        verifier_id_name.starts_with(&self.id)
    }

    fn verify_artifact(
        &self,
        ctx: &Context,
        vsa: &[u8],
        vsa_opts: &VsaOpts,
        verifier_opts: &VerifierOpts,
    ) -> Result<(Vec<u8>, TrustedVerifierID)> {
        ctx.ensure_active()?;
        let envelope = Envelope::from_bytes(vsa)?;
        self.verifier.verify(&envelope, SignatureEncoding::Pae)?;

        let statement = statement_from_envelope(&envelope)?;
        let predicate = VsaPredicate::from_statement(&statement)?;

        let trusted_verifier = TrustedVerifierID::new(&predicate.verifier.id)?;
        trusted_verifier.matches(&verifier_opts.expected_id, false)?;

        statement.verify_subject_digest(&vsa_opts.expected_digest)?;

        if predicate.verification_result != "PASSED" {
            return Err(VerifyError::VsaResultFailure(format!(
                "verification result is {:?}",
                predicate.verification_result
            )));
        }

        predicate.verify_levels(&vsa_opts.expected_levels)?;

        if let Some(expected) = vsa_opts.expected_resource_uri.as_deref() {
            if expected != predicate.resource_uri {
                return Err(VerifyError::MismatchVsaResourceURI(format!(
                    "expected {expected:?}, got {:?}",
                    predicate.resource_uri
                )));
            }
        }

        tracing::debug!(verifier = %trusted_verifier, "verified VSA");
        let payload = envelope.decode_payload()?;
        Ok((payload, trusted_verifier))
    }
}

/// The deployed verifier set for [`crate::registry::Registry`].
///
/// # Errors
///
/// `InvalidFormat` when embedded key material fails to load.
pub fn default_vsa_verifiers() -> Result<Vec<(String, Arc<dyn VsaVerifier>)>> {
    METADATAS
        .iter()
        .map(|meta| {
            let verifier = StaticVsaVerifier::with_key(meta.id, meta.keyid, meta.key_pem)?;
            Ok((meta.id.to_string(), Arc::new(verifier) as Arc<dyn VsaVerifier>))
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::crypto::test_support::{generate_ed25519, signed_envelope_ed25519};
    use crate::error::ErrorKind;
    use crate::intoto::STATEMENT_TYPE_V01;
    use crate::levels::Level;
    use crate::vsa::v02::PREDICATE_VSA_V02;

    // -----------------------------------------------------------------------
    // Static table invariants (P6, P7)
    // -----------------------------------------------------------------------

    #[test]
    fn verifier_ids_are_prefix_free() {
        for i in 0..METADATAS.len() {
            for j in 0..i {
                assert!(
                    !METADATAS[i].id.starts_with(METADATAS[j].id)
                        && !METADATAS[j].id.starts_with(METADATAS[i].id),
                    "{} / {}",
                    METADATAS[i].id,
                    METADATAS[j].id
                );
            }
        }
    }

    #[test]
    fn keyids_are_distinct() {
        for i in 0..METADATAS.len() {
            for j in 0..i {
                assert_ne!(METADATAS[i].keyid, METADATAS[j].keyid);
            }
        }
    }

    #[test]
    fn keys_are_distinct() {
        for i in 0..METADATAS.len() {
            for j in 0..i {
                assert_ne!(METADATAS[i].key_pem, METADATAS[j].key_pem);
            }
        }
    }

    #[test]
    fn default_verifiers_load() {
        let verifiers = default_vsa_verifiers().unwrap();
        assert!(!verifiers.is_empty());
        assert!(verifiers[0]
            .1
            .is_authoritative_for("https://bcid.corp.google.com/verifier/bcid_package_enforcer"));
    }

    // -----------------------------------------------------------------------
    // End-to-end verification
    // -----------------------------------------------------------------------

    const TEST_VERIFIER_ID: &str = "https://the.trusted.verifier";
    const TEST_KEY_ID: &str = "keystore://test:vsa_signing_public_key";

    fn vsa_payload(result: &str, policy_level: &str) -> Vec<u8> {
        serde_json::json!({
            "_type": STATEMENT_TYPE_V01,
            "subject": [{ "digest": { "sha256": "123" } }],
            "predicateType": PREDICATE_VSA_V02,
            "predicate": {
                "verifier": { "id": "https://the.trusted.verifier/v0.1" },
                "verification_result": result,
                "policy_level": policy_level,
                "resource_uri": "name://the-resource"
            }
        })
        .to_string()
        .into_bytes()
    }

    struct Harness {
        verifier: StaticVsaVerifier,
        vsa: Vec<u8>,
    }

    fn harness(result: &str, policy_level: &str) -> Harness {
        let key = generate_ed25519();
        let envelope =
            signed_envelope_ed25519(&key, TEST_KEY_ID, &vsa_payload(result, policy_level));
        let verifier =
            StaticVsaVerifier::with_key(TEST_VERIFIER_ID, TEST_KEY_ID, &key.public_pem).unwrap();
        Harness {
            verifier,
            vsa: serde_json::to_vec(&envelope).unwrap(),
        }
    }

    fn opts(levels: Vec<Level>) -> (VsaOpts, VerifierOpts) {
        (
            VsaOpts {
                expected_digest: "123".to_string(),
                expected_levels: levels,
                expected_resource_uri: Some("name://the-resource".to_string()),
            },
            VerifierOpts {
                expected_id: "https://the.trusted.verifier/v0.1".to_string(),
            },
        )
    }

    #[test]
    fn vsa_verification_passes() {
        let h = harness("PASSED", "SLSA_LEVEL_2");
        let (vsa_opts, verifier_opts) = opts(vec![Level::Build(1)]);
        let (payload, verifier_id) = h
            .verifier
            .verify_artifact(&Context::new(), &h.vsa, &vsa_opts, &verifier_opts)
            .unwrap();
        assert_eq!(verifier_id.to_string(), "https://the.trusted.verifier/v0.1");
        assert!(!payload.is_empty());
    }

    #[test]
    fn vsa_rejects_higher_expected_level() {
        let h = harness("PASSED", "SLSA_LEVEL_2");
        let (vsa_opts, verifier_opts) = opts(vec![Level::Build(3)]);
        let err = h
            .verifier
            .verify_artifact(&Context::new(), &h.vsa, &vsa_opts, &verifier_opts)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MismatchVsaLevel);
    }

    #[test]
    fn vsa_rejects_failed_result() {
        let h = harness("FAILED", "SLSA_LEVEL_2");
        let (vsa_opts, verifier_opts) = opts(vec![Level::Build(1)]);
        let err = h
            .verifier
            .verify_artifact(&Context::new(), &h.vsa, &vsa_opts, &verifier_opts)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::VsaResultFailure);
    }

    #[test]
    fn vsa_rejects_digest_mismatch() {
        let h = harness("PASSED", "SLSA_LEVEL_2");
        let (mut vsa_opts, verifier_opts) = opts(vec![Level::Build(1)]);
        vsa_opts.expected_digest = "1234".to_string();
        let err = h
            .verifier
            .verify_artifact(&Context::new(), &h.vsa, &vsa_opts, &verifier_opts)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MismatchHash);
    }

    #[test]
    fn vsa_rejects_verifier_id_mismatch() {
        let h = harness("PASSED", "SLSA_LEVEL_2");
        let (vsa_opts, mut verifier_opts) = opts(vec![Level::Build(1)]);
        verifier_opts.expected_id = "https://the.trusted.verifier/v0.2".to_string();
        let err = h
            .verifier
            .verify_artifact(&Context::new(), &h.vsa, &vsa_opts, &verifier_opts)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MismatchVerifierID);
    }

    #[test]
    fn vsa_accepts_name_only_verifier_id() {
        let h = harness("PASSED", "SLSA_LEVEL_2");
        let (vsa_opts, mut verifier_opts) = opts(vec![Level::Build(1)]);
        verifier_opts.expected_id = TEST_VERIFIER_ID.to_string();
        h.verifier
            .verify_artifact(&Context::new(), &h.vsa, &vsa_opts, &verifier_opts)
            .unwrap();
    }

    #[test]
    fn vsa_rejects_resource_uri_mismatch() {
        let h = harness("PASSED", "SLSA_LEVEL_2");
        let (mut vsa_opts, verifier_opts) = opts(vec![Level::Build(1)]);
        vsa_opts.expected_resource_uri = Some("name://the-resource-different".to_string());
        let err = h
            .verifier
            .verify_artifact(&Context::new(), &h.vsa, &vsa_opts, &verifier_opts)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MismatchVsaResourceURI);
    }

    #[test]
    fn vsa_resource_uri_is_optional() {
        let h = harness("PASSED", "SLSA_LEVEL_2");
        let (mut vsa_opts, verifier_opts) = opts(vec![Level::Build(1)]);
        vsa_opts.expected_resource_uri = None;
        h.verifier
            .verify_artifact(&Context::new(), &h.vsa, &vsa_opts, &verifier_opts)
            .unwrap();
    }

    #[test]
    fn vsa_rejects_bad_signature() {
        let h = harness("PASSED", "SLSA_LEVEL_2");
        // A verifier with a different key must fail the signature check.
        let other = generate_ed25519();
        let wrong =
            StaticVsaVerifier::with_key(TEST_VERIFIER_ID, TEST_KEY_ID, &other.public_pem).unwrap();
        let (vsa_opts, verifier_opts) = opts(vec![Level::Build(1)]);
        let err = wrong
            .verify_artifact(&Context::new(), &h.vsa, &vsa_opts, &verifier_opts)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoValidSignature);
    }
}
