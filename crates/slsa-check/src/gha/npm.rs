//! npm package attestation verification.
//!
//! An npm package ships an attestation set: a build provenance attestation
//! (signed keylessly through the BYOB delegator or by the npm CLI) and a
//! publish attestation signed by the npm registry's long-lived key.

use crate::crypto::{DsseVerifier, SignatureEncoding, TrustedKey};
use crate::dsse::Envelope;
use crate::error::{Result, VerifyError};
use crate::identifier::TrustedBuilderID;
use crate::intoto::{statement_from_envelope, Statement};
use crate::options::{BuilderOpts, Context, ProvenanceOpts};
use crate::rekor::{signed_attestation, LogClient, OfflineLogClient};
use crate::trust_root::TrustRoot;
use crate::x509::verify_chain;

use super::provenance::{SlsaProvenance, PREDICATE_SLSA_PROVENANCE_V02, PREDICATE_SLSA_PROVENANCE_V1};
use super::workflow::{
    default_byob_workflows, verify_builder_identity, verify_certificate_source_repository,
    workflow_identity_from_certificate, RunnerEnvironment, WorkflowIdentity,
    GENERIC_LOW_PERMS_DELEGATOR_PATH, HTTPS_GITHUB_COM, NPM_CLI_HOSTED_BUILDER_ID,
    NPM_CLI_LEGACY_BUILDER_ID, NPM_CLI_SELF_HOSTED_BUILDER_ID,
};
use super::{verify_envelope_with_cert, ProvenanceBundle};

/// Predicate type of npm publish attestations.
pub const PREDICATE_NPM_PUBLISH_V01: &str =
    "https://github.com/npm/attestation/tree/main/specs/publish/v0.1";

/// Key ID of the npm registry's attestation signing key.
const NPM_REGISTRY_KEY_ID: &str = "SHA256:jl3bwswu80PjjokCgh0o2w5c2U4LhQAE57gj9cz1kzA";
const NPM_REGISTRY_KEY_PEM: &str = include_str!("../../keys/npm/registry-attestation.pem");

/// The parsed npm attestation set.
#[derive(Debug, Clone)]
pub struct NpmAttestations {
    pub provenance_bundle: ProvenanceBundle,
    pub publish_envelope: Envelope,
}

impl NpmAttestations {
    /// Parse the registry's attestation document: either a bare array of
    /// `{predicateType, bundle}` entries or an object wrapping it under
    /// `attestations`.
    ///
    /// # Errors
    ///
    /// `InvalidDssePayload` when either attestation is missing or
    /// malformed.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_slice(bytes)
            .map_err(|e| VerifyError::InvalidDssePayload(format!("parse attestations: {e}")))?;
        let entries = value
            .as_array()
            .or_else(|| value["attestations"].as_array())
            .ok_or_else(|| {
                VerifyError::InvalidDssePayload("no attestations array".to_string())
            })?;

        let mut provenance_bundle = None;
        let mut publish_envelope = None;
        for entry in entries {
            let predicate_type = entry["predicateType"].as_str().unwrap_or_default();
            let bundle = serde_json::to_vec(&entry["bundle"]).map_err(|e| {
                VerifyError::InvalidDssePayload(format!("attestation bundle: {e}"))
            })?;
            match predicate_type {
                PREDICATE_SLSA_PROVENANCE_V02 | PREDICATE_SLSA_PROVENANCE_V1 => {
                    provenance_bundle = Some(ProvenanceBundle::parse(&bundle)?);
                }
                PREDICATE_NPM_PUBLISH_V01 => {
                    let envelope: Envelope =
                        serde_json::from_value(entry["bundle"]["dsseEnvelope"].clone()).map_err(
                            |e| VerifyError::InvalidDssePayload(format!("publish envelope: {e}")),
                        )?;
                    envelope.validate()?;
                    publish_envelope = Some(envelope);
                }
                _ => {}
            }
        }
        Ok(Self {
            provenance_bundle: provenance_bundle.ok_or_else(|| {
                VerifyError::InvalidDssePayload("no provenance attestation".to_string())
            })?,
            publish_envelope: publish_envelope.ok_or_else(|| {
                VerifyError::InvalidDssePayload("no publish attestation".to_string())
            })?,
        })
    }
}

/// The npm registry's trusted publish-attestation keys.
///
/// # Errors
///
/// `InvalidFormat` when the embedded key fails to parse.
pub fn npm_registry_keys() -> Result<Vec<TrustedKey>> {
    Ok(vec![TrustedKey::from_pem(
        NPM_REGISTRY_KEY_ID,
        NPM_REGISTRY_KEY_PEM,
    )?])
}

/// Decide the npm builder identity from the signing certificate.
///
/// The delegator path requires a BYOB signing identity on a GitHub-hosted
/// runner. When the signing workflow is untrusted, the npm CLI itself
/// signed: the caller must expect one of the npm CLI builder IDs and the
/// certificate's hosting must agree.
pub(crate) fn resolve_npm_builder(
    identity: &WorkflowIdentity,
    expected_builder_id: &str,
) -> Result<(TrustedBuilderID, bool)> {
    let delegator = format!("{HTTPS_GITHUB_COM}{GENERIC_LOW_PERMS_DELEGATOR_PATH}");
    let delegator_opts = BuilderOpts {
        expected_id: Some(delegator),
    };
    match verify_builder_identity(identity, &delegator_opts, &default_byob_workflows()) {
        Ok((trusted_builder, byob)) => {
            if !byob {
                return Err(VerifyError::Internal("byob is false".to_string()));
            }
            match identity.runner {
                RunnerEnvironment::GithubHosted => Ok((trusted_builder, true)),
                RunnerEnvironment::SelfHosted | RunnerEnvironment::Unknown => Err(
                    VerifyError::MismatchBuilderID("self hosted re-usable workflow".to_string()),
                ),
            }
        }
        Err(e) if e.kind() == crate::error::ErrorKind::UntrustedReusableWorkflow => {
            match identity.runner {
                RunnerEnvironment::Unknown => {
                    return Err(VerifyError::NotSupported(
                        "hosted status unknown".to_string(),
                    ))
                }
                RunnerEnvironment::GithubHosted => match expected_builder_id {
                    NPM_CLI_LEGACY_BUILDER_ID | NPM_CLI_HOSTED_BUILDER_ID => {}
                    NPM_CLI_SELF_HOSTED_BUILDER_ID => {
                        return Err(VerifyError::MismatchBuilderID(
                            "re-usable workflow is GitHub-hosted".to_string(),
                        ))
                    }
                    other => {
                        return Err(VerifyError::NotSupported(format!(
                            "builder {other}; expected one of {NPM_CLI_SELF_HOSTED_BUILDER_ID}, {NPM_CLI_HOSTED_BUILDER_ID}"
                        )))
                    }
                },
                RunnerEnvironment::SelfHosted => match expected_builder_id {
                    NPM_CLI_SELF_HOSTED_BUILDER_ID => {}
                    NPM_CLI_LEGACY_BUILDER_ID | NPM_CLI_HOSTED_BUILDER_ID => {
                        return Err(VerifyError::MismatchBuilderID(
                            "re-usable workflow is self-hosted".to_string(),
                        ))
                    }
                    other => {
                        return Err(VerifyError::NotSupported(format!(
                            "builder {other}; expected one of {NPM_CLI_SELF_HOSTED_BUILDER_ID}, {NPM_CLI_HOSTED_BUILDER_ID}"
                        )))
                    }
                },
            }
            Ok((TrustedBuilderID::new(expected_builder_id, false)?, false))
        }
        Err(e) => Err(e),
    }
}

/// Verify an npm package's attestation set.
///
/// # Errors
///
/// The first failing check's error.
#[allow(clippy::too_many_arguments)]
pub(crate) fn verify_npm_package(
    ctx: &Context,
    trust_root: &TrustRoot,
    log_client: &dyn LogClient,
    attestations: &[u8],
    tarball_hash: &str,
    provenance_opts: &ProvenanceOpts,
    builder_opts: &BuilderOpts,
) -> Result<(Vec<u8>, TrustedBuilderID)> {
    let npm = NpmAttestations::parse(attestations)?;

    // Provenance attestation signature: prefer the bundle's inline log
    // entry, fall back to the configured log client.
    let envelope = &npm.provenance_bundle.envelope;
    let att = if npm.provenance_bundle.log_entry.body.is_empty() {
        signed_attestation(ctx, log_client, trust_root, envelope, tarball_hash)?
    } else {
        let client = OfflineLogClient::new(npm.provenance_bundle.log_entry.clone());
        signed_attestation(ctx, &client, trust_root, envelope, tarball_hash)?
    };
    verify_chain(
        &att.signing_cert,
        &trust_root.fulcio_roots,
        &trust_root.fulcio_intermediates,
    )?;
    verify_envelope_with_cert(&att.envelope, &att.signing_cert)?;

    // Publish attestation signature against the registry key set.
    let publish_verifier = DsseVerifier::new(npm_registry_keys()?);
    publish_verifier.verify(&npm.publish_envelope, SignatureEncoding::Pae)?;

    // Builder identity. The caller must always name the builder.
    let expected_builder_id = builder_opts
        .expected_id
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| VerifyError::InvalidBuilderID("builder ID is empty".to_string()))?;
    let identity = workflow_identity_from_certificate(&att.signing_cert)?;
    let (trusted_builder, is_trusted) = resolve_npm_builder(&identity, expected_builder_id)?;

    verify_certificate_source_repository(&identity, &provenance_opts.expected_source_uri)?;

    // Statement checks.
    let statement = statement_from_envelope(&att.envelope)?;
    let provenance = SlsaProvenance::from_statement(statement)?;
    verify_subject_digest_any(provenance.statement(), tarball_hash)?;
    if is_trusted {
        // The delegator cert does not identify the inner builder; the
        // provenance's declaration must match the caller's expectation.
        provenance.verify_builder_id(expected_builder_id)?;
    }
    provenance.verify_source_uri(&provenance_opts.expected_source_uri)?;

    let publish_statement = statement_from_envelope(&npm.publish_envelope)?;
    if publish_statement.predicate_type != PREDICATE_NPM_PUBLISH_V01 {
        return Err(VerifyError::InvalidPredicate(
            publish_statement.predicate_type.clone(),
        ));
    }

    if let Some(name) = provenance_opts.expected_package_name.as_deref() {
        verify_package_name(provenance.statement(), &publish_statement, name)?;
    }
    if let Some(version) = provenance_opts.expected_package_version.as_deref() {
        verify_package_version(provenance.statement(), &publish_statement, version)?;
    }

    tracing::debug!(
        builder = %trusted_builder,
        commit = %identity.source_sha,
        "verified npm build"
    );
    let payload = att.envelope.decode_payload()?;
    Ok((payload, trusted_builder))
}

/// Match the tarball hash against any subject digest algorithm. npm
/// subjects carry sha512 digests.
fn verify_subject_digest_any(statement: &Statement, expected: &str) -> Result<()> {
    for subject in &statement.subject {
        if subject.digest.values().any(|v| v.as_str() == expected) {
            return Ok(());
        }
    }
    Err(VerifyError::MismatchHash(format!(
        "expected hash {expected:?} not found in subjects"
    )))
}

/// Parse a `pkg:npm/<name>@<version>` package URL.
fn parse_npm_purl(purl: &str) -> Result<(String, String)> {
    let rest = purl.strip_prefix("pkg:npm/").ok_or_else(|| {
        VerifyError::InvalidFormat(format!("subject is not an npm purl: {purl:?}"))
    })?;
    let (name, version) = rest.rsplit_once('@').ok_or_else(|| {
        VerifyError::InvalidFormat(format!("purl has no version: {purl:?}"))
    })?;
    let name = name.replace("%40", "@").replace("%2F", "/").replace("%2f", "/");
    Ok((name, version.to_string()))
}

fn publish_field<'a>(publish: &'a Statement, field: &str) -> Option<&'a str> {
    publish.predicate.get(field).and_then(|v| v.as_str())
}

/// The package name must match both the provenance subject's purl and the
/// publish attestation's declaration.
fn verify_package_name(
    provenance: &Statement,
    publish: &Statement,
    expected: &str,
) -> Result<()> {
    let subject_name = provenance
        .subject
        .first()
        .map(|s| s.name.as_str())
        .unwrap_or_default();
    let (name, _) = parse_npm_purl(subject_name)?;
    if name != expected {
        return Err(VerifyError::MismatchIntoto(format!(
            "expected package name {expected:?}, provenance subject is {name:?}"
        )));
    }
    if let Some(published) = publish_field(publish, "name") {
        if published != expected {
            return Err(VerifyError::MismatchIntoto(format!(
                "expected package name {expected:?}, publish attestation says {published:?}"
            )));
        }
    }
    Ok(())
}

/// The package version must match the provenance subject's purl and the
/// publish attestation's declaration.
fn verify_package_version(
    provenance: &Statement,
    publish: &Statement,
    expected: &str,
) -> Result<()> {
    let subject_name = provenance
        .subject
        .first()
        .map(|s| s.name.as_str())
        .unwrap_or_default();
    let (_, version) = parse_npm_purl(subject_name)?;
    if version != expected {
        return Err(VerifyError::MismatchIntoto(format!(
            "expected package version {expected:?}, provenance subject is {version:?}"
        )));
    }
    if let Some(published) = publish_field(publish, "version") {
        if published != expected {
            return Err(VerifyError::MismatchIntoto(format!(
                "expected package version {expected:?}, publish attestation says {published:?}"
            )));
        }
    }
    Ok(())
}
