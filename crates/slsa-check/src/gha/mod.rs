//! GitHub Actions provenance verifier.
//!
//! Authoritative for builder IDs under `https://github.com/`. The signing
//! identity is an ephemeral Fulcio certificate; verification establishes
//! the certificate first (chain, transparency log, envelope signature),
//! then the workflow identity, and only then reads the statement.

pub mod npm;
pub mod provenance;
pub mod workflow;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::crypto::der_to_pem;
use crate::dsse::{pae, Envelope};
use crate::error::{Result, VerifyError};
use crate::identifier::TrustedBuilderID;
use crate::options::{BuilderOpts, Context, ProvenanceOpts};
use crate::registry::{ProvenanceVerifier, VerifierDeps};
use crate::rekor::{signed_attestation, LogEntry, OfflineLogClient, SignedAttestation};
use crate::trust_root::{trust_root_singleton, TrustRoot};
use crate::x509::{verify_chain, SigningCertificate};

use self::workflow::{
    default_artifact_trusted_workflows, default_container_trusted_workflows,
    verify_builder_identity, verify_certificate_source_repository,
    workflow_identity_from_certificate, HTTPS_GITHUB_COM,
};

/// Registry name of this verifier.
pub const VERIFIER_NAME: &str = "GHA";

/// The GitHub Actions verifier.
pub struct GhaVerifier {
    deps: VerifierDeps,
}

impl GhaVerifier {
    #[must_use]
    pub fn new(deps: VerifierDeps) -> Self {
        Self { deps }
    }

    fn trust_root(&self, ctx: &Context) -> Result<std::sync::Arc<TrustRoot>> {
        trust_root_singleton(ctx, self.deps.trust_root_provider.as_ref())
    }

    /// Establish the signed attestation for raw provenance bytes.
    ///
    /// A Sigstore bundle carries its certificate and log entry inline and
    /// verifies offline; a bare envelope goes through the configured log
    /// client.
    fn attested_envelope(
        &self,
        ctx: &Context,
        trust_root: &TrustRoot,
        provenance: &[u8],
        artifact_hash: &str,
    ) -> Result<SignedAttestation> {
        if is_sigstore_bundle(provenance) {
            let bundle = ProvenanceBundle::parse(provenance)?;
            let client = OfflineLogClient::new(bundle.log_entry.clone());
            signed_attestation(ctx, &client, trust_root, &bundle.envelope, artifact_hash)
        } else {
            let envelope = Envelope::from_bytes(provenance)?;
            signed_attestation(
                ctx,
                self.deps.log_client.as_ref(),
                trust_root,
                &envelope,
                artifact_hash,
            )
        }
    }
}

impl ProvenanceVerifier for GhaVerifier {
    fn is_authoritative_for(&self, builder_id_name: &str) -> bool {
        builder_id_name.starts_with(HTTPS_GITHUB_COM)
    }

    fn verify_artifact(
        &self,
        ctx: &Context,
        provenance: &[u8],
        artifact_hash: &str,
        provenance_opts: &ProvenanceOpts,
        builder_opts: &BuilderOpts,
    ) -> Result<(Vec<u8>, TrustedBuilderID)> {
        let trust_root = self.trust_root(ctx)?;
        let att = self.attested_envelope(ctx, &trust_root, provenance, artifact_hash)?;
        verify_chain(
            &att.signing_cert,
            &trust_root.fulcio_roots,
            &trust_root.fulcio_intermediates,
        )?;
        verify_envelope_with_cert(&att.envelope, &att.signing_cert)?;
        verify_env_and_cert(
            &att.envelope,
            &att.signing_cert,
            provenance_opts,
            builder_opts,
            &default_artifact_trusted_workflows(),
        )
    }

    fn verify_image(
        &self,
        ctx: &Context,
        provenance: Option<&[u8]>,
        artifact_image: &str,
        provenance_opts: &ProvenanceOpts,
        builder_opts: &BuilderOpts,
    ) -> Result<(Vec<u8>, TrustedBuilderID)> {
        let trust_root = self.trust_root(ctx)?;
        let attestations: Vec<(Envelope, SigningCertificate)> = match provenance {
            Some(bytes) => {
                let att =
                    self.attested_envelope(ctx, &trust_root, bytes, &provenance_opts.expected_digest)?;
                vec![(att.envelope, att.signing_cert)]
            }
            None => {
                let fetched = self.deps.fetcher.fetch(ctx, artifact_image)?;
                let mut out = Vec::with_capacity(fetched.len());
                for att in fetched {
                    let cert = SigningCertificate::from_der(&att.cert_der)?;
                    out.push((att.envelope, cert));
                }
                out
            }
        };

        // The image verifier is the one place that collects failures
        // across attestations and reports the first with the rest
        // appended.
        let mut errs: Vec<VerifyError> = Vec::new();
        for (envelope, cert) in &attestations {
            let result = verify_chain(
                cert,
                &trust_root.fulcio_roots,
                &trust_root.fulcio_intermediates,
            )
            .and_then(|()| verify_envelope_with_cert(envelope, cert))
            .and_then(|()| {
                verify_env_and_cert(
                    envelope,
                    cert,
                    provenance_opts,
                    builder_opts,
                    &default_container_trusted_workflows(),
                )
            });
            match result {
                Ok(verified) => return Ok(verified),
                Err(e) => errs.push(e),
            }
        }
        let mut errs = errs.into_iter();
        match errs.next() {
            Some(first) => {
                let rest: Vec<String> = errs.map(|e| e.to_string()).collect();
                if rest.is_empty() {
                    Err(first)
                } else {
                    Err(first.context(&format!("[also: {}]", rest.join("; "))))
                }
            }
            None => Err(VerifyError::NoValidSignature(format!(
                "no attestations found for image {artifact_image}"
            ))),
        }
    }

    fn verify_npm_package(
        &self,
        ctx: &Context,
        attestations: &[u8],
        tarball_hash: &str,
        provenance_opts: &ProvenanceOpts,
        builder_opts: &BuilderOpts,
    ) -> Result<(Vec<u8>, TrustedBuilderID)> {
        let trust_root = self.trust_root(ctx)?;
        npm::verify_npm_package(
            ctx,
            &trust_root,
            self.deps.log_client.as_ref(),
            attestations,
            tarball_hash,
            provenance_opts,
            builder_opts,
        )
    }
}

/// Verify the envelope signature with the certificate's subject key.
///
/// # Errors
///
/// `NoValidSignature` when no signature verifies.
pub fn verify_envelope_with_cert(envelope: &Envelope, cert: &SigningCertificate) -> Result<()> {
    let key = cert.subject_key()?;
    let message = pae(&envelope.payload_type, envelope.payload.as_bytes());
    for signature in &envelope.signatures {
        let Ok(sig) = signature.decode_sig() else {
            continue;
        };
        if key.verify(&message, &sig).is_ok() {
            return Ok(());
        }
    }
    Err(VerifyError::NoValidSignature(
        "envelope signature does not match the signing certificate".to_string(),
    ))
}

/// The common certificate + provenance verification sequence.
///
/// Steps: workflow identity from the certificate, builder identity against
/// the trusted workflows, certificate source repository, then the
/// provenance checks. For BYOB delegators the caller-supplied builder ID
/// is required and is matched against the provenance's declared builder.
pub(crate) fn verify_env_and_cert(
    envelope: &Envelope,
    cert: &SigningCertificate,
    provenance_opts: &ProvenanceOpts,
    builder_opts: &BuilderOpts,
    defaults: &std::collections::BTreeMap<String, bool>,
) -> Result<(Vec<u8>, TrustedBuilderID)> {
    let identity = workflow_identity_from_certificate(cert)?;
    let (verified_builder_id, byob) = verify_builder_identity(&identity, builder_opts, defaults)?;
    verify_certificate_source_repository(&identity, &provenance_opts.expected_source_uri)?;

    let mut opts = provenance_opts.clone();
    opts.expected_builder_id = verified_builder_id.to_string();
    if byob {
        // The certificate only identifies the delegator; the inner builder
        // is pinned by the caller and checked against the provenance.
        let expected = builder_opts
            .expected_id
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| VerifyError::InvalidBuilderID("empty ID".to_string()))?;
        opts.expected_builder_id = expected.to_string();
    }

    let provenance = provenance::verify_provenance(envelope, &opts)?;

    let final_builder_id = if byob {
        TrustedBuilderID::new(provenance.builder_id(), false)?
    } else {
        verified_builder_id
    };

    tracing::debug!(
        builder = %final_builder_id,
        commit = %identity.source_sha,
        "verified build"
    );
    let payload = envelope.decode_payload()?;
    Ok((payload, final_builder_id))
}

/// Whether raw provenance bytes look like a Sigstore bundle rather than a
/// bare DSSE envelope.
#[must_use]
pub fn is_sigstore_bundle(bytes: &[u8]) -> bool {
    serde_json::from_slice::<serde_json::Value>(bytes)
        .map(|v| v.get("dsseEnvelope").is_some())
        .unwrap_or(false)
}

/// The parts of a Sigstore bundle the engine consumes.
#[derive(Debug, Clone)]
pub struct ProvenanceBundle {
    pub envelope: Envelope,
    pub log_entry: LogEntry,
}

impl ProvenanceBundle {
    /// Parse a Sigstore bundle, folding the embedded certificate into the
    /// envelope's signature entry.
    ///
    /// Bundle integers arrive as JSON strings (protobuf JSON); both forms
    /// are accepted.
    ///
    /// # Errors
    ///
    /// `InvalidDssePayload` when the envelope, certificate or log entry is
    /// missing or malformed.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_slice(bytes)
            .map_err(|e| VerifyError::InvalidDssePayload(format!("parse bundle: {e}")))?;

        let mut envelope: Envelope = serde_json::from_value(value["dsseEnvelope"].clone())
            .map_err(|e| VerifyError::InvalidDssePayload(format!("bundle envelope: {e}")))?;
        envelope.validate()?;

        let material = &value["verificationMaterial"];
        let cert_b64 = material["certificate"]["rawBytes"]
            .as_str()
            .or_else(|| material["x509CertificateChain"]["certificates"][0]["rawBytes"].as_str())
            .ok_or_else(|| {
                VerifyError::InvalidDssePayload("bundle has no signing certificate".to_string())
            })?;
        let cert_der = BASE64
            .decode(cert_b64)
            .map_err(|e| VerifyError::InvalidDssePayload(format!("bundle certificate: {e}")))?;
        if envelope.signing_cert_pem().is_none() {
            if let Some(sig) = envelope.signatures.first_mut() {
                sig.cert = Some(der_to_pem(&cert_der, "CERTIFICATE"));
            }
        }

        let tlog = &material["tlogEntries"][0];
        if tlog.is_null() {
            return Err(VerifyError::InvalidDssePayload(
                "bundle has no transparency log entry".to_string(),
            ));
        }
        let proof = &tlog["inclusionProof"];
        let inclusion_proof = if proof.is_null() {
            None
        } else {
            let hashes = proof["hashes"]
                .as_array()
                .map(|a| {
                    a.iter()
                        .filter_map(|h| h.as_str().map(str::to_string))
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();
            Some(crate::rekor::InclusionProof {
                log_index: int_field(&proof["logIndex"]),
                root_hash: proof["rootHash"].as_str().unwrap_or_default().to_string(),
                tree_size: int_field(&proof["treeSize"]),
                hashes,
            })
        };
        let log_entry = LogEntry {
            body: tlog["canonicalizedBody"].as_str().unwrap_or_default().to_string(),
            integrated_time: int_field(&tlog["integratedTime"]),
            log_id: tlog["logId"]["keyId"].as_str().unwrap_or_default().to_string(),
            log_index: int_field(&tlog["logIndex"]),
            verification: Some(crate::rekor::LogEntryVerification {
                inclusion_proof,
                signed_entry_timestamp: tlog["inclusionPromise"]["signedEntryTimestamp"]
                    .as_str()
                    .map(str::to_string),
            }),
        };

        Ok(Self { envelope, log_entry })
    }
}

/// Protobuf JSON renders int64 as strings; accept both.
fn int_field(value: &serde_json::Value) -> i64 {
    value
        .as_i64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
        .unwrap_or_default()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn bundle_detection() {
        assert!(is_sigstore_bundle(
            br#"{"dsseEnvelope": {}, "verificationMaterial": {}}"#
        ));
        assert!(!is_sigstore_bundle(
            br#"{"payloadType": "application/vnd.in-toto+json", "payload": "e30=", "signatures": []}"#
        ));
        assert!(!is_sigstore_bundle(b"not json"));
    }

    #[test]
    fn bundle_parse_extracts_cert_and_log_entry() {
        let bundle = serde_json::json!({
            "mediaType": "application/vnd.dev.sigstore.bundle+json;version=0.2",
            "verificationMaterial": {
                "certificate": { "rawBytes": crate::x509::testcert::FULCIO_LEAF_B64 },
                "tlogEntries": [{
                    "logIndex": "12345",
                    "logId": { "keyId": "wNI9atQGlz+VWfO6LRygH4QUfY/8W4RFwiT5i5WRgB0=" },
                    "integratedTime": "1771706900",
                    "inclusionPromise": { "signedEntryTimestamp": "c2V0" },
                    "inclusionProof": {
                        "logIndex": "100",
                        "rootHash": "aabb",
                        "treeSize": "200",
                        "hashes": ["ccdd"]
                    },
                    "canonicalizedBody": "e30="
                }]
            },
            "dsseEnvelope": {
                "payloadType": "application/vnd.in-toto+json",
                "payload": "e30=",
                "signatures": [{ "sig": "c2ln" }]
            }
        });
        let parsed = ProvenanceBundle::parse(bundle.to_string().as_bytes()).unwrap();
        assert_eq!(parsed.log_entry.log_index, 12345);
        assert_eq!(parsed.log_entry.integrated_time, 1771706900);
        let proof = parsed
            .log_entry
            .verification
            .as_ref()
            .unwrap()
            .inclusion_proof
            .as_ref()
            .unwrap();
        assert_eq!(proof.tree_size, 200);
        // The certificate lands inside the envelope signature.
        assert!(parsed.envelope.signing_cert_pem().is_some());
    }

    #[test]
    fn bundle_parse_requires_cert() {
        let bundle = serde_json::json!({
            "verificationMaterial": { "tlogEntries": [] },
            "dsseEnvelope": {
                "payloadType": "application/vnd.in-toto+json",
                "payload": "e30=",
                "signatures": [{ "sig": "c2ln" }]
            }
        });
        assert!(ProvenanceBundle::parse(bundle.to_string().as_bytes()).is_err());
    }

    #[test]
    fn authority_is_github_prefix() {
        let deps = crate::registry::VerifierDeps {
            trust_root_provider: std::sync::Arc::new(
                crate::trust_root::FileTrustRootProvider::new("/nonexistent".into()),
            ),
            log_client: std::sync::Arc::new(crate::rekor::OfflineLogClient::new(
                crate::rekor::LogEntry {
                    body: String::new(),
                    integrated_time: 0,
                    log_id: String::new(),
                    log_index: 0,
                    verification: None,
                },
            )),
            fetcher: std::sync::Arc::new(NoFetcher),
        };
        let verifier = GhaVerifier::new(deps);
        assert!(verifier.is_authoritative_for("https://github.com/org/builder"));
        assert!(!verifier.is_authoritative_for("https://cloudbuild.googleapis.com/x"));
    }

    struct NoFetcher;
    impl crate::fetcher::AttestationFetcher for NoFetcher {
        fn fetch(
            &self,
            _ctx: &Context,
            _image: &str,
        ) -> Result<Vec<crate::fetcher::FetchedAttestation>> {
            Ok(vec![])
        }
    }
}
