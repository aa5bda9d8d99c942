//! Google Cloud Build provenance.
//!
//! Two shapes are accepted: the v0.1 `provenance_summary` wrapper whose
//! envelope payload is an in-toto v0.1 statement with a SLSA v0.1
//! predicate, and the v1.0 form whose payload is an in-toto v1 statement
//! with a SLSA v1.0 predicate. The wrapper may carry both generations;
//! signature verification selects the first envelope that verifies.

use serde::Deserialize;

use crate::dsse::{pae, Envelope};
use crate::error::{Result, VerifyError};
use crate::identifier::{versioned_tag_matches, TrustedBuilderID};
use crate::intoto::{Statement, STATEMENT_TYPE_V01, STATEMENT_TYPE_V1};
use crate::options::{BuilderOpts, ProvenanceOpts};

use super::keys::GcbKeyRing;

/// SLSA provenance predicate type, v0.1 (GCB's classic output).
pub const PREDICATE_SLSA_PROVENANCE_V01: &str = "https://slsa.dev/provenance/v0.1";

/// SLSA provenance predicate type, v1.0.
pub const PREDICATE_SLSA_PROVENANCE_V1: &str = "https://slsa.dev/provenance/v1";

/// Build type of v1.0 Google-hosted worker builds.
const BUILD_TYPE_GOOGLE_WORKER_V1: &str =
    "https://cloud.google.com/build/gcb-buildtypes/google-worker/v1";

const BUILD_TYPE_CLOUD_BUILD_YAML_V01: &str =
    "https://cloudbuild.googleapis.com/CloudBuildYaml@v0.1";
const BUILD_TYPE_CLOUD_BUILD_STEPS_V01: &str =
    "https://cloudbuild.googleapis.com/CloudBuildSteps@v0.1";

/// The `@type` every v0.1 recipe's arguments must declare.
const GCB_BUILD_ARGUMENTS_TYPE: &str = "type.googleapis.com/google.devtools.cloudbuild.v1.Build";

#[derive(Debug, Clone, Default, Deserialize)]
struct GcloudProvenance {
    #[serde(default)]
    image_summary: ImageSummary,
    #[serde(default)]
    provenance_summary: ProvenanceSummary,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ImageSummary {
    #[serde(default)]
    fully_qualified_digest: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ProvenanceSummary {
    #[serde(default)]
    provenance: Vec<ProvenanceEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct ProvenanceEntry {
    #[serde(default)]
    build: BuildRecord,
    envelope: Envelope,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct BuildRecord {
    /// The unverified text rendering of the v0.1 statement.
    #[serde(default, rename = "intotoStatement")]
    text_statement_v01: serde_json::Value,
    /// The unverified text rendering of the v1.0 statement.
    #[serde(default, rename = "inTotoSlsaProvenanceV1")]
    text_statement_v10: serde_json::Value,
}

/// SLSA v0.1 predicate, the fields verification reads.
#[derive(Debug, Clone, Deserialize)]
struct GcbPredicateV01 {
    builder: BuilderRef,
    #[serde(default)]
    recipe: Recipe,
    #[serde(default)]
    materials: Vec<Material>,
}

#[derive(Debug, Clone, Deserialize)]
struct BuilderRef {
    #[serde(default)]
    id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct Recipe {
    #[serde(default, rename = "type")]
    recipe_type: String,
    #[serde(default)]
    arguments: serde_json::Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct Material {
    #[serde(default)]
    uri: String,
}

/// SLSA v1.0 predicate, the fields verification reads.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GcbPredicateV10 {
    build_definition: GcbBuildDefinition,
    run_details: GcbRunDetails,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GcbBuildDefinition {
    #[serde(default)]
    build_type: String,
    #[serde(default)]
    external_parameters: serde_json::Value,
    #[serde(default)]
    resolved_dependencies: Vec<Material>,
}

#[derive(Debug, Clone, Deserialize)]
struct GcbRunDetails {
    builder: BuilderRef,
}

#[derive(Debug, Clone)]
enum GcbPredicate {
    V01(GcbPredicateV01),
    V10(GcbPredicateV10),
}

#[derive(Debug, Clone)]
struct VerifiedProvenance {
    entry_index: usize,
    statement: Statement,
    predicate: GcbPredicate,
}

/// A GCB provenance document across the verification phases.
///
/// The statement is populated by [`GcbProvenance::verify_signature`];
/// every later check reads only verified material.
#[derive(Debug, Clone)]
pub struct GcbProvenance {
    raw: GcloudProvenance,
    verified: Option<VerifiedProvenance>,
}

impl GcbProvenance {
    /// Parse the `gcloud` provenance wrapper.
    ///
    /// # Errors
    ///
    /// `InvalidDssePayload` for an empty document or an envelope without
    /// signatures.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let raw: GcloudProvenance = serde_json::from_slice(bytes)
            .map_err(|e| VerifyError::InvalidDssePayload(format!("parse provenance: {e}")))?;
        if raw.provenance_summary.provenance.is_empty() {
            return Err(VerifyError::InvalidDssePayload(
                "empty provenance".to_string(),
            ));
        }
        for entry in &raw.provenance_summary.provenance {
            entry.envelope.validate()?;
        }
        Ok(Self {
            raw,
            verified: None,
        })
    }

    /// Verify envelope signatures against the key ring.
    ///
    /// Each entry's signatures are tried in order; the first signature
    /// whose `keyid` resolves and verifies selects that entry, and its
    /// payload becomes the verified statement.
    ///
    /// # Errors
    ///
    /// `NoValidSignature` when no signature verifies.
    pub fn verify_signature(&mut self, keyring: &GcbKeyRing) -> Result<()> {
        for (index, entry) in self.raw.provenance_summary.provenance.iter().enumerate() {
            let envelope = &entry.envelope;
            for signature in &envelope.signatures {
                let Some((key, encoding)) = keyring.lookup(&signature.keyid) else {
                    continue;
                };
                let Ok(sig) = signature.decode_sig() else {
                    continue;
                };
                let message = match encoding {
                    crate::crypto::SignatureEncoding::Pae => {
                        pae(&envelope.payload_type, envelope.payload.as_bytes())
                    }
                    crate::crypto::SignatureEncoding::DirectPayload => envelope.decode_payload()?,
                };
                if key.key.verify(&message, &sig).is_err() {
                    continue;
                }
                tracing::debug!(keyid = %key.keyid, "GCB envelope signature verified");
                let payload = envelope.decode_payload()?;
                let statement = Statement::from_bytes(&payload)?;
                let predicate = decode_predicate(&statement)?;
                self.verified = Some(VerifiedProvenance {
                    entry_index: index,
                    statement,
                    predicate,
                });
                return Ok(());
            }
        }
        Err(VerifyError::NoValidSignature(
            "no envelope signature verified against the GCB keys".to_string(),
        ))
    }

    fn verified(&self) -> Result<&VerifiedProvenance> {
        self.verified.as_ref().ok_or_else(|| {
            VerifyError::Internal("statement read before signature verification".to_string())
        })
    }

    /// The verified statement, for callers that print it.
    ///
    /// # Errors
    ///
    /// `Internal` before signature verification.
    pub fn statement(&self) -> Result<&Statement> {
        Ok(&self.verified()?.statement)
    }

    /// Verify the builder and its binding to the build type.
    ///
    /// # Errors
    ///
    /// `MismatchBuilderID` against the expectation, `InvalidBuilderID` /
    /// `InvalidRecipe` / `InvalidBuildType` from the build-type matrix.
    pub fn verify_builder(&self, builder_opts: &BuilderOpts) -> Result<TrustedBuilderID> {
        let verified = self.verified()?;
        let (declared_id, need_version) = match &verified.predicate {
            GcbPredicate::V01(p) => (p.builder.id.as_str(), true),
            GcbPredicate::V10(p) => (p.run_details.builder.id.as_str(), false),
        };
        let builder_id = TrustedBuilderID::new(declared_id, need_version)
            .map_err(|e| VerifyError::MismatchBuilderID(e.to_string()))?;
        if let Some(expected) = builder_opts.expected_id.as_deref().filter(|s| !s.is_empty()) {
            builder_id.matches_loose(expected, false)?;
        }
        let build_type = match &verified.predicate {
            GcbPredicate::V01(p) => p.recipe.recipe_type.as_str(),
            GcbPredicate::V10(p) => p.build_definition.build_type.as_str(),
        };
        validate_build_type(&builder_id, build_type)?;
        if let GcbPredicate::V01(p) = &verified.predicate {
            let arguments_type = p.recipe.arguments["@type"].as_str().unwrap_or_default();
            if arguments_type != GCB_BUILD_ARGUMENTS_TYPE {
                return Err(VerifyError::MismatchBuilderID(format!(
                    "recipe arguments type {arguments_type:?}"
                )));
            }
        }
        Ok(builder_id)
    }

    /// Verify the declared source against the expectation.
    ///
    /// # Errors
    ///
    /// `MismatchSource` on mismatch, `InvalidBuilderID` for unsupported
    /// builder versions.
    pub fn verify_source_uri(&self, expected: &str, builder_id: &TrustedBuilderID) -> Result<()> {
        let verified = self.verified()?;
        let declared = match &verified.predicate {
            GcbPredicate::V01(p) => p
                .materials
                .first()
                .map(|m| m.uri.clone())
                .unwrap_or_default(),
            GcbPredicate::V10(p) => p
                .build_definition
                .resolved_dependencies
                .first()
                .map(|m| m.uri.clone())
                .unwrap_or_default(),
        };
        if declared.is_empty() {
            return Err(VerifyError::MismatchSource(
                "provenance has no source material".to_string(),
            ));
        }
        let declared = match builder_id.version() {
            "v0.1" => {
                return Err(VerifyError::InvalidBuilderID(format!(
                    "builder version {:?} is not supported",
                    builder_id.version()
                )))
            }
            // The v0.2 worker records the resolved commit under the
            // repository URI; source matching is on the repository alone.
            "v0.2" => {
                let uri = declared
                    .split_once("/commit/")
                    .map_or(declared.as_str(), |(head, _)| head);
                strip_fragment(uri).to_string()
            }
            // v0.3 and v1.0 record `git+<repo>@<ref>`.
            _ => {
                let uri = declared.trim_start_matches("git+");
                let uri = uri.rsplit_once('@').map_or(uri, |(head, _)| head);
                strip_fragment(uri).to_string()
            }
        };
        if !declared.starts_with("https://") && !declared.starts_with("gs://") {
            return Err(VerifyError::MismatchSource(format!(
                "unsupported source scheme: {declared:?}"
            )));
        }
        if expected != declared {
            return Err(VerifyError::MismatchSource(format!(
                "expected source {expected:?}, provenance says {declared:?}"
            )));
        }
        Ok(())
    }

    /// Verify the statement type and subject digest.
    ///
    /// # Errors
    ///
    /// `InvalidFormat` for a statement-type mismatch, `MismatchHash` for a
    /// digest mismatch.
    pub fn verify_metadata(&self, opts: &ProvenanceOpts) -> Result<()> {
        let verified = self.verified()?;
        let expected_type = match &verified.predicate {
            GcbPredicate::V01(_) => STATEMENT_TYPE_V01,
            GcbPredicate::V10(_) => STATEMENT_TYPE_V1,
        };
        if verified.statement.statement_type != expected_type {
            return Err(VerifyError::InvalidFormat(format!(
                "expected statement type {expected_type:?}, got {:?}",
                verified.statement.statement_type
            )));
        }
        verified.statement.verify_subject_digest(&opts.expected_digest)
    }

    /// Verify the image summary and subject digest.
    ///
    /// Fully qualified digests in the summary must match the expectation
    /// exactly.
    ///
    /// # Errors
    ///
    /// `MismatchHash` on any digest mismatch.
    pub fn verify_summary(&self, opts: &ProvenanceOpts) -> Result<()> {
        let verified = self.verified()?;
        let summary = &self.raw.image_summary.fully_qualified_digest;
        if !summary.is_empty() {
            let digest = summary.split_once("@sha256:").map(|(_, d)| d).ok_or_else(|| {
                VerifyError::MismatchHash(format!(
                    "image summary digest {summary:?} is not sha256-qualified"
                ))
            })?;
            if digest != opts.expected_digest {
                return Err(VerifyError::MismatchHash(format!(
                    "expected digest {:?}, image summary says {digest:?}",
                    opts.expected_digest
                )));
            }
        }
        verified.statement.verify_subject_digest(&opts.expected_digest)
    }

    /// Branch verification is not recorded by GCB.
    ///
    /// # Errors
    ///
    /// Always `NotSupported`.
    pub fn verify_branch(&self, _branch: &str) -> Result<()> {
        self.verified()?;
        Err(VerifyError::NotSupported(
            "GCB provenance does not record the branch".to_string(),
        ))
    }

    /// Verify the build tag, exactly.
    ///
    /// # Errors
    ///
    /// `MismatchTag` when `TAG_NAME` is absent, not a string, or differs.
    pub fn verify_tag(&self, expected: &str) -> Result<()> {
        let tag = self
            .substitutions_tag()?
            .ok_or_else(|| VerifyError::MismatchTag("no TAG_NAME substitution".to_string()))?;
        if tag != expected {
            return Err(VerifyError::MismatchTag(format!(
                "expected tag {expected:?}, provenance tag is {tag:?}"
            )));
        }
        Ok(())
    }

    /// Verify the build tag against a semantic-version query.
    ///
    /// # Errors
    ///
    /// `MismatchVersionedTag` when the tag is absent or outside the query.
    pub fn verify_versioned_tag(&self, expected: &str) -> Result<()> {
        let tag = self
            .substitutions_tag()
            .map_err(|e| VerifyError::MismatchVersionedTag(e.to_string()))?
            .ok_or_else(|| {
                VerifyError::MismatchVersionedTag("no TAG_NAME substitution".to_string())
            })?;
        versioned_tag_matches(expected, &tag)
    }

    fn substitutions_tag(&self) -> Result<Option<String>> {
        let verified = self.verified()?;
        let substitutions = match &verified.predicate {
            GcbPredicate::V01(p) => p.recipe.arguments["substitutions"].clone(),
            GcbPredicate::V10(p) => {
                let params = &p.build_definition.external_parameters;
                if params["substitutions"].is_null() {
                    params["buildConfig"]["substitutions"].clone()
                } else {
                    params["substitutions"].clone()
                }
            }
        };
        Ok(substitutions["TAG_NAME"].as_str().map(str::to_string))
    }

    /// Check the unverified text statement against the verified one.
    ///
    /// The text rendering must re-marshal to exactly the verified
    /// statement; any edit to a field value fails the check.
    ///
    /// # Errors
    ///
    /// `MismatchIntoto` when the renderings differ or the text statement
    /// is missing.
    pub fn verify_text_provenance(&self) -> Result<()> {
        let verified = self.verified()?;
        let entry = &self.raw.provenance_summary.provenance[verified.entry_index];
        let text = match &verified.predicate {
            GcbPredicate::V01(_) => &entry.build.text_statement_v01,
            GcbPredicate::V10(_) => &entry.build.text_statement_v10,
        };
        if text.is_null() {
            return Err(VerifyError::MismatchIntoto(
                "provenance has no text statement".to_string(),
            ));
        }
        let statement_value = serde_json::to_value(&verified.statement)
            .map_err(|e| VerifyError::Internal(format!("serialize statement: {e}")))?;
        if &statement_value != text {
            return Err(VerifyError::MismatchIntoto(
                "text statement differs from the verified statement".to_string(),
            ));
        }
        Ok(())
    }
}

fn strip_fragment(uri: &str) -> &str {
    uri.split_once('#').map_or(uri, |(head, _)| head)
}

fn decode_predicate(statement: &Statement) -> Result<GcbPredicate> {
    match statement.predicate_type.as_str() {
        PREDICATE_SLSA_PROVENANCE_V01 => {
            let predicate: GcbPredicateV01 = serde_json::from_value(statement.predicate.clone())
                .map_err(|e| VerifyError::InvalidDssePayload(format!("v0.1 predicate: {e}")))?;
            Ok(GcbPredicate::V01(predicate))
        }
        PREDICATE_SLSA_PROVENANCE_V1 => {
            let predicate: GcbPredicateV10 = serde_json::from_value(statement.predicate.clone())
                .map_err(|e| VerifyError::InvalidDssePayload(format!("v1.0 predicate: {e}")))?;
            Ok(GcbPredicate::V10(predicate))
        }
        other => Err(VerifyError::InvalidPredicate(other.to_string())),
    }
}

/// The builder/build-type compatibility matrix.
///
/// # Errors
///
/// `InvalidBuilderID` for unsupported builder versions, `InvalidRecipe`
/// for a v0.x build type that does not belong to the builder version,
/// `InvalidBuildType` for a wrong v1.0 build type.
pub fn validate_build_type(builder_id: &TrustedBuilderID, build_type: &str) -> Result<()> {
    let gcb_worker_v02 = format!("{}@v0.2", builder_id.name());
    match builder_id.version() {
        "v0.1" => Err(VerifyError::InvalidBuilderID(
            "builder version v0.1 is not supported".to_string(),
        )),
        "v0.2" => {
            if build_type == gcb_worker_v02 {
                Ok(())
            } else {
                Err(VerifyError::InvalidRecipe(format!(
                    "expected {gcb_worker_v02:?}, got {build_type:?}"
                )))
            }
        }
        "v0.3" => {
            if build_type == BUILD_TYPE_CLOUD_BUILD_YAML_V01
                || build_type == BUILD_TYPE_CLOUD_BUILD_STEPS_V01
            {
                Ok(())
            } else {
                Err(VerifyError::InvalidRecipe(format!(
                    "unexpected v0.3 build type {build_type:?}"
                )))
            }
        }
        "" => {
            if build_type == BUILD_TYPE_GOOGLE_WORKER_V1 {
                Ok(())
            } else {
                Err(VerifyError::InvalidBuildType(format!(
                    "unexpected v1.0 build type {build_type:?}"
                )))
            }
        }
        other => Err(VerifyError::InvalidBuilderID(format!(
            "unexpected builder version {other:?}"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Test fixtures
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod fixtures {
    //! Builders for signed GCB provenance documents.

    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;

    use super::*;
    use crate::crypto::test_support::{p256_sign, TestP256Key};
    use crate::crypto::TrustedKey;
    use crate::dsse::INTOTO_PAYLOAD_TYPE;
    use crate::gcb::keys::GLOBAL_PAE_KEY_ID;

    pub const GCB_TEST_DIGEST: &str =
        "1a033b002f89ed2b8ea733162497fb70f1a4049a7f8602d6a33682b4ad9921fd";
    pub const GCB_TEST_DIGEST_V10: &str =
        "7e9b6e7ba2842c91cf49f3e214d04a7a496f8214356f41d81a6e6dcad11f11e3";

    pub fn test_keyring(key: &TestP256Key) -> GcbKeyRing {
        GcbKeyRing::new(
            TrustedKey::from_pem(GLOBAL_PAE_KEY_ID, &key.public_pem).expect("key"),
            vec![],
        )
    }

    pub fn v01_statement(digest: &str, source_material: &str, tag: Option<&str>) -> serde_json::Value {
        let mut arguments = serde_json::json!({
            "@type": GCB_BUILD_ARGUMENTS_TYPE,
        });
        if let Some(tag) = tag {
            arguments["substitutions"] = serde_json::json!({ "TAG_NAME": tag });
        }
        serde_json::json!({
            "_type": STATEMENT_TYPE_V01,
            "subject": [{
                "name": "https://us-docker.pkg.dev/project/repo/image",
                "digest": { "sha256": digest }
            }],
            "predicateType": PREDICATE_SLSA_PROVENANCE_V01,
            "predicate": {
                "builder": { "id": "https://cloudbuild.googleapis.com/GoogleHostedWorker@v0.2" },
                "recipe": {
                    "type": "https://cloudbuild.googleapis.com/GoogleHostedWorker@v0.2",
                    "arguments": arguments
                },
                "materials": [{ "uri": source_material }]
            }
        })
    }

    pub fn v10_statement(digest: &str, source_uri: &str, tag: Option<&str>) -> serde_json::Value {
        let mut external = serde_json::json!({});
        if let Some(tag) = tag {
            external["substitutions"] = serde_json::json!({ "TAG_NAME": tag });
        }
        serde_json::json!({
            "_type": STATEMENT_TYPE_V1,
            "subject": [{
                "name": "https://us-docker.pkg.dev/project/repo/image",
                "digest": { "sha256": digest }
            }],
            "predicateType": PREDICATE_SLSA_PROVENANCE_V1,
            "predicate": {
                "buildDefinition": {
                    "buildType": BUILD_TYPE_GOOGLE_WORKER_V1,
                    "externalParameters": external,
                    "resolvedDependencies": [{ "uri": source_uri }]
                },
                "runDetails": {
                    "builder": { "id": "https://cloudbuild.googleapis.com/GoogleHostedWorker" }
                }
            }
        })
    }

    /// Wrap a statement into a signed `gcloud` provenance document.
    pub fn provenance_document(
        key: &TestP256Key,
        statement: &serde_json::Value,
        digest: &str,
    ) -> Vec<u8> {
        let payload = serde_json::to_vec(statement).expect("statement");
        let payload_b64 = BASE64.encode(&payload);
        let message = pae(INTOTO_PAYLOAD_TYPE, payload_b64.as_bytes());
        let sig = p256_sign(key, &message);
        serde_json::json!({
            "image_summary": {
                "fully_qualified_digest":
                    format!("us-docker.pkg.dev/project/repo/image@sha256:{digest}")
            },
            "provenance_summary": {
                "provenance": [{
                    "build": { "intotoStatement": statement, "inTotoSlsaProvenanceV1": statement },
                    "envelope": {
                        "payloadType": INTOTO_PAYLOAD_TYPE,
                        "payload": payload_b64,
                        "signatures": [{
                            "keyid": GLOBAL_PAE_KEY_ID,
                            "sig": BASE64.encode(sig)
                        }]
                    }
                }]
            }
        })
        .to_string()
        .into_bytes()
    }
}
