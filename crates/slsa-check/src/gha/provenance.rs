//! SLSA provenance predicates for GitHub Actions builds.
//!
//! Two predicate generations are understood: v0.2 (the classic
//! `builder`/`invocation` shape) and v1.0 (`buildDefinition`/`runDetails`).
//! The predicate is selected by the statement's `predicateType` URI.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::error::{Result, VerifyError};
use crate::identifier::{versioned_tag_matches, TrustedBuilderID};
use crate::intoto::{statement_from_envelope, Statement};
use crate::options::ProvenanceOpts;

/// SLSA provenance predicate type, v0.2.
pub const PREDICATE_SLSA_PROVENANCE_V02: &str = "https://slsa.dev/provenance/v0.2";

/// SLSA provenance predicate type, v1.0.
pub const PREDICATE_SLSA_PROVENANCE_V1: &str = "https://slsa.dev/provenance/v1";

#[derive(Debug, Clone, Deserialize)]
pub struct BuilderRef {
    #[serde(default)]
    pub id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSource {
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub digest: BTreeMap<String, String>,
    #[serde(default)]
    pub entry_point: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invocation {
    #[serde(default)]
    pub config_source: ConfigSource,
    #[serde(default)]
    pub parameters: serde_json::Value,
    #[serde(default)]
    pub environment: serde_json::Value,
}

/// SLSA v0.2 provenance predicate.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvenanceV02 {
    pub builder: BuilderRef,
    #[serde(default)]
    pub build_type: String,
    #[serde(default)]
    pub invocation: Invocation,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDescriptor {
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub digest: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildDefinition {
    #[serde(default)]
    pub build_type: String,
    #[serde(default)]
    pub external_parameters: serde_json::Value,
    #[serde(default)]
    pub internal_parameters: serde_json::Value,
    #[serde(default)]
    pub resolved_dependencies: Vec<ResourceDescriptor>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunDetails {
    pub builder: BuilderRef,
}

/// SLSA v1.0 provenance predicate.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvenanceV10 {
    pub build_definition: BuildDefinition,
    pub run_details: RunDetails,
}

/// A statement with its decoded SLSA predicate.
#[derive(Debug, Clone)]
pub enum SlsaProvenance {
    V02 {
        statement: Statement,
        predicate: Box<ProvenanceV02>,
    },
    V10 {
        statement: Statement,
        predicate: Box<ProvenanceV10>,
    },
}

impl SlsaProvenance {
    /// Decode the predicate, dispatching on the statement's predicate type.
    ///
    /// # Errors
    ///
    /// `InvalidPredicate` for an unknown predicate type,
    /// `InvalidDssePayload` for a predicate that does not deserialize.
    pub fn from_statement(statement: Statement) -> Result<Self> {
        match statement.predicate_type.as_str() {
            PREDICATE_SLSA_PROVENANCE_V02 => {
                let predicate: ProvenanceV02 =
                    serde_json::from_value(statement.predicate.clone()).map_err(|e| {
                        VerifyError::InvalidDssePayload(format!("v0.2 predicate: {e}"))
                    })?;
                Ok(Self::V02 {
                    statement,
                    predicate: Box::new(predicate),
                })
            }
            PREDICATE_SLSA_PROVENANCE_V1 => {
                let predicate: ProvenanceV10 =
                    serde_json::from_value(statement.predicate.clone()).map_err(|e| {
                        VerifyError::InvalidDssePayload(format!("v1.0 predicate: {e}"))
                    })?;
                Ok(Self::V10 {
                    statement,
                    predicate: Box::new(predicate),
                })
            }
            other => Err(VerifyError::InvalidPredicate(other.to_string())),
        }
    }

    /// The statement the predicate came from.
    #[must_use]
    pub fn statement(&self) -> &Statement {
        match self {
            Self::V02 { statement, .. } | Self::V10 { statement, .. } => statement,
        }
    }

    /// The builder ID declared by the provenance.
    #[must_use]
    pub fn builder_id(&self) -> &str {
        match self {
            Self::V02 { predicate, .. } => &predicate.builder.id,
            Self::V10 { predicate, .. } => &predicate.run_details.builder.id,
        }
    }

    /// The declared source URI, unnormalized (`git+...@ref` preserved).
    fn raw_source_uri(&self) -> Result<String> {
        match self {
            Self::V02 { predicate, .. } => {
                let uri = &predicate.invocation.config_source.uri;
                if uri.is_empty() {
                    return Err(VerifyError::MismatchSource(
                        "provenance has no config source URI".to_string(),
                    ));
                }
                Ok(uri.clone())
            }
            Self::V10 { predicate, .. } => {
                // BYOB provenance records the workflow source under
                // externalParameters; fall back to the first resolved
                // dependency.
                let workflow = &predicate.build_definition.external_parameters["workflow"];
                if let (Some(repository), Some(git_ref)) = (
                    workflow["repository"].as_str(),
                    workflow["ref"].as_str(),
                ) {
                    return Ok(format!("{repository}@{git_ref}"));
                }
                predicate
                    .build_definition
                    .resolved_dependencies
                    .first()
                    .filter(|d| !d.uri.is_empty())
                    .map(|d| d.uri.clone())
                    .ok_or_else(|| {
                        VerifyError::MismatchSource(
                            "provenance has no source dependency".to_string(),
                        )
                    })
            }
        }
    }

    /// The git ref the build ran at, when the provenance records one.
    fn source_ref(&self) -> Option<String> {
        match self {
            Self::V02 { predicate, .. } => {
                let env = &predicate.invocation.environment;
                env["github_ref"]
                    .as_str()
                    .map(str::to_string)
                    .or_else(|| {
                        self.raw_source_uri()
                            .ok()
                            .and_then(|uri| uri.split_once('@').map(|(_, r)| r.to_string()))
                    })
            }
            Self::V10 { .. } => self
                .raw_source_uri()
                .ok()
                .and_then(|uri| uri.split_once('@').map(|(_, r)| r.to_string())),
        }
    }

    /// Verify the expected subject digest appears in the statement.
    ///
    /// # Errors
    ///
    /// See [`Statement::verify_subject_digest`].
    pub fn verify_subject_digest(&self, expected: &str) -> Result<()> {
        self.statement().verify_subject_digest(expected)
    }

    /// Verify the declared builder against the expectation.
    ///
    /// # Errors
    ///
    /// `MismatchBuilderID` on mismatch, `InvalidFormat` for malformed IDs.
    pub fn verify_builder_id(&self, expected: &str) -> Result<TrustedBuilderID> {
        let builder_id = TrustedBuilderID::new(self.builder_id(), false)?;
        builder_id.matches_loose(expected, true)?;
        Ok(builder_id)
    }

    /// Verify the declared source against the expectation.
    ///
    /// # Errors
    ///
    /// `MismatchSource` on mismatch.
    pub fn verify_source_uri(&self, expected: &str) -> Result<()> {
        let declared = normalize_source_uri(&self.raw_source_uri()?);
        let expected = expected.trim().trim_start_matches("git+").trim_end_matches(".git");
        let expected = if expected.contains("://") {
            expected.to_string()
        } else {
            format!("https://{expected}")
        };
        if declared != expected {
            return Err(VerifyError::MismatchSource(format!(
                "expected source {expected:?}, provenance says {declared:?}"
            )));
        }
        Ok(())
    }

    /// Verify the build ran from the expected branch.
    ///
    /// # Errors
    ///
    /// `MismatchSource` when the ref is absent or names another branch.
    pub fn verify_branch(&self, expected: &str) -> Result<()> {
        let git_ref = self.source_ref().ok_or_else(|| {
            VerifyError::MismatchSource("provenance has no source ref".to_string())
        })?;
        if git_ref != format!("refs/heads/{expected}") {
            return Err(VerifyError::MismatchSource(format!(
                "expected branch {expected:?}, provenance ref is {git_ref:?}"
            )));
        }
        Ok(())
    }

    /// Verify the build ran from the expected tag, exactly.
    ///
    /// # Errors
    ///
    /// `MismatchTag` when the ref is absent or names another tag.
    pub fn verify_tag(&self, expected: &str) -> Result<()> {
        let tag = self.tag_ref().map_err(|e| e.context("tag"))?;
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
    /// `MismatchVersionedTag` when the ref is absent or outside the query.
    pub fn verify_versioned_tag(&self, expected: &str) -> Result<()> {
        let tag = self
            .tag_ref()
            .map_err(|e| VerifyError::MismatchVersionedTag(e.to_string()))?;
        versioned_tag_matches(expected, &tag)
    }

    fn tag_ref(&self) -> Result<String> {
        let git_ref = self
            .source_ref()
            .ok_or_else(|| VerifyError::MismatchTag("provenance has no source ref".to_string()))?;
        git_ref
            .strip_prefix("refs/tags/")
            .map(str::to_string)
            .ok_or_else(|| {
                VerifyError::MismatchTag(format!("source ref {git_ref:?} is not a tag"))
            })
    }

    /// Verify the triggering event carried at least the expected inputs.
    ///
    /// # Errors
    ///
    /// `MismatchIntoto` when an input is absent or carries another value.
    pub fn verify_workflow_inputs(&self, expected: &BTreeMap<String, String>) -> Result<()> {
        let inputs = match self {
            Self::V02 { predicate, .. } => {
                predicate.invocation.environment["github_event_payload"]["inputs"].clone()
            }
            Self::V10 { predicate, .. } => {
                predicate.build_definition.external_parameters["inputs"].clone()
            }
        };
        for (key, expected_value) in expected {
            let actual = &inputs[key.as_str()];
            let actual_str = match actual {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Null => {
                    return Err(VerifyError::MismatchIntoto(format!(
                        "workflow input {key:?} not present in provenance"
                    )))
                }
                other => other.to_string(),
            };
            if &actual_str != expected_value {
                return Err(VerifyError::MismatchIntoto(format!(
                    "workflow input {key:?}: expected {expected_value:?}, got {actual_str:?}"
                )));
            }
        }
        Ok(())
    }
}

fn normalize_source_uri(uri: &str) -> String {
    let uri = uri.trim_start_matches("git+");
    let uri = uri.split_once('@').map_or(uri, |(head, _)| head);
    uri.trim_end_matches(".git").to_string()
}

/// Run the provenance-side checks of a GitHub Actions verification.
///
/// Phase order is fixed: the caller has already verified the envelope
/// signature and the signing identity; this decodes the statement and
/// checks digest, builder, source, refs and inputs.
///
/// # Errors
///
/// The first failing check's error, kind preserved.
pub fn verify_provenance(
    envelope: &crate::dsse::Envelope,
    opts: &ProvenanceOpts,
) -> Result<SlsaProvenance> {
    let statement = statement_from_envelope(envelope)?;
    let provenance = SlsaProvenance::from_statement(statement)?;
    provenance.verify_subject_digest(&opts.expected_digest)?;
    provenance.verify_builder_id(&opts.expected_builder_id)?;
    provenance.verify_source_uri(&opts.expected_source_uri)?;
    if let Some(branch) = opts.expected_branch.as_deref() {
        provenance.verify_branch(branch)?;
    }
    if let Some(tag) = opts.expected_tag.as_deref() {
        provenance.verify_tag(tag)?;
    }
    if let Some(versioned_tag) = opts.expected_versioned_tag.as_deref() {
        provenance.verify_versioned_tag(versioned_tag)?;
    }
    if !opts.expected_workflow_inputs.is_empty() {
        provenance.verify_workflow_inputs(&opts.expected_workflow_inputs)?;
    }
    Ok(provenance)
}
