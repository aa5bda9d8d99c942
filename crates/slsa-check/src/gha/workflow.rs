//! Signing-certificate identity for GitHub Actions builds.
//!
//! Fulcio encodes the OIDC claims of the signing workflow as X.509
//! extensions. We read the v2 OIDs (1.3.6.1.4.1.57264.1.8+) with v1
//! fallbacks, since certificates from older Fulcio deployments are still
//! in circulation.
//!
//! | OID (v2) | OID (v1) | Field |
//! |----------|----------|-------|
//! | .1.8  | .1.1 | OIDC issuer |
//! | .1.18 | SAN  | Build config URI (job workflow ref) |
//! | .1.12 | .1.5 | Source repository URI |
//! | .1.13 | .1.3 | Source repository digest (commit SHA) |
//! | .1.11 | —    | Runner environment |

use std::collections::BTreeMap;

use crate::error::{Result, VerifyError};
use crate::identifier::TrustedBuilderID;
use crate::options::BuilderOpts;
use crate::x509::SigningCertificate;

const OID_ISSUER_V2: &str = "1.3.6.1.4.1.57264.1.8";
const OID_ISSUER_V1: &str = "1.3.6.1.4.1.57264.1.1";
const OID_BUILD_CONFIG_URI: &str = "1.3.6.1.4.1.57264.1.18";
const OID_SOURCE_REPOSITORY_URI: &str = "1.3.6.1.4.1.57264.1.12";
const OID_SOURCE_REPOSITORY_V1: &str = "1.3.6.1.4.1.57264.1.5";
const OID_SOURCE_REPOSITORY_DIGEST: &str = "1.3.6.1.4.1.57264.1.13";
const OID_SOURCE_SHA_V1: &str = "1.3.6.1.4.1.57264.1.3";
const OID_RUNNER_ENVIRONMENT: &str = "1.3.6.1.4.1.57264.1.11";

/// Builder ID prefix this verifier is authoritative for.
pub const HTTPS_GITHUB_COM: &str = "https://github.com/";

/// Repository hosting the trusted reusable workflows.
const TRUSTED_BUILDER_REPOSITORY: &str = "slsa-framework/slsa-github-generator";

/// BYOB delegator used by the npm builders.
pub const GENERIC_LOW_PERMS_DELEGATOR_PATH: &str =
    "slsa-framework/slsa-github-generator/.github/workflows/delegator_lowperms-generic_slsa3.yml";

/// Builder IDs accepted for provenance generated by the npm CLI itself.
pub const NPM_CLI_HOSTED_BUILDER_ID: &str = "https://github.com/actions/runner/github-hosted";
pub const NPM_CLI_SELF_HOSTED_BUILDER_ID: &str = "https://github.com/actions/runner/self-hosted";
pub const NPM_CLI_LEGACY_BUILDER_ID: &str = "https://github.com/actions/runner";

/// Where the workflow's runner was hosted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerEnvironment {
    GithubHosted,
    SelfHosted,
    Unknown,
}

/// Identity claims extracted from the signing certificate.
#[derive(Debug, Clone)]
pub struct WorkflowIdentity {
    /// Reusable workflow reference: `org/repo/.github/workflows/x.yml@ref`.
    pub job_workflow_ref: String,
    /// Source repository URI: `https://github.com/org/repo`.
    pub source_repository: String,
    /// Commit SHA the workflow ran at.
    pub source_sha: String,
    /// Runner hosting for the signing job.
    pub runner: RunnerEnvironment,
    /// OIDC issuer, when present.
    pub issuer: Option<String>,
}

/// Extract the workflow identity from a Fulcio signing certificate.
///
/// # Errors
///
/// `InvalidFormat` when the certificate lacks the workflow reference or
/// the source repository extension.
pub fn workflow_identity_from_certificate(cert: &SigningCertificate) -> Result<WorkflowIdentity> {
    let job_workflow_ref = cert
        .extension_utf8(OID_BUILD_CONFIG_URI)
        .or_else(|| cert.san_uri())
        .map(|uri| uri.strip_prefix(HTTPS_GITHUB_COM).map(str::to_string).unwrap_or(uri))
        .ok_or_else(|| {
            VerifyError::InvalidFormat(
                "certificate has no build config URI or SAN workflow reference".to_string(),
            )
        })?;

    let source_repository = cert
        .extension_utf8(OID_SOURCE_REPOSITORY_URI)
        .or_else(|| {
            cert.extension_utf8(OID_SOURCE_REPOSITORY_V1)
                .map(|short| format!("{HTTPS_GITHUB_COM}{short}"))
        })
        .ok_or_else(|| {
            VerifyError::InvalidFormat(
                "certificate has no source repository extension".to_string(),
            )
        })?;

    let source_sha = cert
        .extension_utf8(OID_SOURCE_REPOSITORY_DIGEST)
        .or_else(|| cert.extension_utf8(OID_SOURCE_SHA_V1))
        .unwrap_or_default();

    let runner = match cert.extension_utf8(OID_RUNNER_ENVIRONMENT).as_deref() {
        Some("github-hosted") => RunnerEnvironment::GithubHosted,
        Some("self-hosted") => RunnerEnvironment::SelfHosted,
        _ => RunnerEnvironment::Unknown,
    };

    let issuer = cert
        .extension_utf8(OID_ISSUER_V2)
        .or_else(|| cert.extension_utf8(OID_ISSUER_V1));

    Ok(WorkflowIdentity {
        job_workflow_ref,
        source_repository,
        source_sha,
        runner,
        issuer,
    })
}

fn trusted_workflow_id(file: &str) -> String {
    format!("{HTTPS_GITHUB_COM}{TRUSTED_BUILDER_REPOSITORY}/.github/workflows/{file}")
}

/// The trusted artifact builders plus the BYOB delegators.
///
/// Values mark BYOB delegators, whose provenance declares the inner
/// builder identity.
#[must_use]
pub fn default_artifact_trusted_workflows() -> BTreeMap<String, bool> {
    let mut map = BTreeMap::new();
    map.insert(trusted_workflow_id("builder_go_slsa3.yml"), false);
    map.insert(trusted_workflow_id("generator_generic_slsa3.yml"), false);
    byob_workflows(&mut map);
    map
}

/// The trusted container builders plus the BYOB delegators.
#[must_use]
pub fn default_container_trusted_workflows() -> BTreeMap<String, bool> {
    let mut map = BTreeMap::new();
    map.insert(trusted_workflow_id("generator_container_slsa3.yml"), false);
    map.insert(trusted_workflow_id("builder_docker-based_slsa3.yml"), false);
    byob_workflows(&mut map);
    map
}

/// Only the BYOB delegators (the npm verification path).
#[must_use]
pub fn default_byob_workflows() -> BTreeMap<String, bool> {
    let mut map = BTreeMap::new();
    byob_workflows(&mut map);
    map
}

fn byob_workflows(map: &mut BTreeMap<String, bool>) {
    map.insert(trusted_workflow_id("delegator_generic_slsa3.yml"), true);
    map.insert(trusted_workflow_id("delegator_lowperms-generic_slsa3.yml"), true);
}

/// Verify the signing identity against the trusted reusable workflows.
///
/// The certificate's workflow must be one of `defaults`; when the caller
/// supplied an expected builder ID it must additionally match the
/// certificate's workflow (loose, with `refs/tags/<v>` acceptance).
///
/// Returns the verified builder ID (name = workflow URL, version = git
/// ref) and whether the workflow is a BYOB delegator.
///
/// # Errors
///
/// `UntrustedReusableWorkflow` when the cert workflow is not a default
/// builder, `MismatchBuilderID` when it contradicts the expectation.
pub fn verify_builder_identity(
    identity: &WorkflowIdentity,
    builder_opts: &BuilderOpts,
    defaults: &BTreeMap<String, bool>,
) -> Result<(TrustedBuilderID, bool)> {
    let (path, git_ref) = identity.job_workflow_ref.split_once('@').ok_or_else(|| {
        VerifyError::InvalidFormat(format!(
            "workflow reference has no ref: {:?}",
            identity.job_workflow_ref
        ))
    })?;
    let name = format!("{HTTPS_GITHUB_COM}{path}");
    let is_byob = match defaults.get(&name) {
        Some(byob) => *byob,
        None => {
            return Err(VerifyError::UntrustedReusableWorkflow(name));
        }
    };
    let builder_id = TrustedBuilderID::new(&format!("{name}@{git_ref}"), true)?;
    if let Some(expected) = builder_opts.expected_id.as_deref().filter(|s| !s.is_empty()) {
        builder_id.matches_loose(expected, true)?;
    }
    Ok((builder_id, is_byob))
}

/// Verify the certificate's source repository against the expectation.
///
/// The comparison is scheme-exact over org + repo; commit fragments in
/// the expectation are rejected.
///
/// # Errors
///
/// `MismatchSource` on any mismatch.
pub fn verify_certificate_source_repository(
    identity: &WorkflowIdentity,
    expected_source_uri: &str,
) -> Result<()> {
    let expected = expected_source_uri
        .trim()
        .trim_start_matches("git+")
        .trim_end_matches(".git");
    if expected.contains("/commit/") || expected.contains('@') {
        return Err(VerifyError::MismatchSource(format!(
            "expected source {expected:?} must not pin a commit or ref"
        )));
    }
    let full = if expected.contains("://") {
        expected.to_string()
    } else {
        format!("https://{expected}")
    };
    if full != identity.source_repository {
        return Err(VerifyError::MismatchSource(format!(
            "expected source {:?}, certificate says {:?}",
            full, identity.source_repository
        )));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::x509::testcert::FULCIO_LEAF_B64;

    fn identity(workflow_ref: &str) -> WorkflowIdentity {
        WorkflowIdentity {
            job_workflow_ref: workflow_ref.to_string(),
            source_repository: "https://github.com/org/repo".to_string(),
            source_sha: "b1cbec020ed85fb2f53a1f78d21cdfb1582852fd".to_string(),
            runner: RunnerEnvironment::GithubHosted,
            issuer: Some("https://token.actions.githubusercontent.com".to_string()),
        }
    }

    // -----------------------------------------------------------------------
    // Identity extraction from a real certificate
    // -----------------------------------------------------------------------

    #[test]
    fn extract_identity_from_real_cert() {
        let cert = SigningCertificate::from_base64_der(FULCIO_LEAF_B64).unwrap();
        let identity = workflow_identity_from_certificate(&cert).unwrap();
        assert_eq!(
            identity.job_workflow_ref,
            "always-further/test-sk-prov/.github/workflows/sign-skills.yml@refs/heads/main"
        );
        assert_eq!(
            identity.source_repository,
            "https://github.com/always-further/test-sk-prov"
        );
        assert_eq!(
            identity.source_sha,
            "b1cbec020ed85fb2f53a1f78d21cdfb1582852fd"
        );
        assert_eq!(identity.runner, RunnerEnvironment::GithubHosted);
        assert_eq!(
            identity.issuer.as_deref(),
            Some("https://token.actions.githubusercontent.com")
        );
    }

    // -----------------------------------------------------------------------
    // verify_builder_identity
    // -----------------------------------------------------------------------

    const GO_BUILDER_REF: &str =
        "slsa-framework/slsa-github-generator/.github/workflows/builder_go_slsa3.yml@refs/tags/v1.9.0";

    #[test]
    fn trusted_workflow_without_expectation() {
        let defaults = default_artifact_trusted_workflows();
        let (id, byob) =
            verify_builder_identity(&identity(GO_BUILDER_REF), &BuilderOpts::default(), &defaults)
                .unwrap();
        assert!(!byob);
        assert_eq!(
            id.name(),
            "https://github.com/slsa-framework/slsa-github-generator/.github/workflows/builder_go_slsa3.yml"
        );
        assert_eq!(id.version(), "refs/tags/v1.9.0");
    }

    #[test]
    fn trusted_workflow_with_matching_expectation() {
        let defaults = default_artifact_trusted_workflows();
        let opts = BuilderOpts {
            expected_id: Some(
                "https://github.com/slsa-framework/slsa-github-generator/.github/workflows/builder_go_slsa3.yml@v1.9.0"
                    .to_string(),
            ),
        };
        let (_, byob) = verify_builder_identity(&identity(GO_BUILDER_REF), &opts, &defaults).unwrap();
        assert!(!byob);
    }

    #[test]
    fn trusted_workflow_with_wrong_expectation() {
        let defaults = default_artifact_trusted_workflows();
        let opts = BuilderOpts {
            expected_id: Some(
                "https://github.com/slsa-framework/slsa-github-generator/.github/workflows/builder_go_slsa3.yml@v1.8.0"
                    .to_string(),
            ),
        };
        let err = verify_builder_identity(&identity(GO_BUILDER_REF), &opts, &defaults).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MismatchBuilderID);
    }

    #[test]
    fn untrusted_workflow_is_rejected() {
        let defaults = default_artifact_trusted_workflows();
        let err = verify_builder_identity(
            &identity("some-org/evil/.github/workflows/builder_go_slsa3.yml@refs/tags/v1.9.0"),
            &BuilderOpts::default(),
            &defaults,
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UntrustedReusableWorkflow);
    }

    #[test]
    fn delegator_workflow_is_byob() {
        let defaults = default_byob_workflows();
        let delegator_ref = format!("{GENERIC_LOW_PERMS_DELEGATOR_PATH}@refs/tags/v1.9.0");
        let (_, byob) = verify_builder_identity(
            &identity(&delegator_ref),
            &BuilderOpts::default(),
            &defaults,
        )
        .unwrap();
        assert!(byob);
    }

    #[test]
    fn workflow_ref_without_ref_is_invalid() {
        let defaults = default_artifact_trusted_workflows();
        let err = verify_builder_identity(
            &identity("slsa-framework/slsa-github-generator/.github/workflows/builder_go_slsa3.yml"),
            &BuilderOpts::default(),
            &defaults,
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidFormat);
    }

    // -----------------------------------------------------------------------
    // verify_certificate_source_repository
    // -----------------------------------------------------------------------

    #[test]
    fn source_repository_match() {
        let id = identity(GO_BUILDER_REF);
        verify_certificate_source_repository(&id, "github.com/org/repo").unwrap();
        verify_certificate_source_repository(&id, "https://github.com/org/repo").unwrap();
        verify_certificate_source_repository(&id, "git+https://github.com/org/repo").unwrap();
    }

    #[test]
    fn source_repository_mismatch() {
        let id = identity(GO_BUILDER_REF);
        for expected in [
            "github.com/org/other",
            "github.com/other/repo",
            "http://github.com/org/repo",
            "gitlab.com/org/repo",
        ] {
            let err = verify_certificate_source_repository(&id, expected).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::MismatchSource, "{expected}");
        }
    }

    #[test]
    fn source_repository_rejects_commit_pins() {
        let id = identity(GO_BUILDER_REF);
        for expected in [
            "github.com/org/repo/commit/fbbb98765e85ad464302dc5977968104d36e455e",
            "github.com/org/repo@refs/heads/main",
        ] {
            let err = verify_certificate_source_repository(&id, expected).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::MismatchSource, "{expected}");
        }
    }
}
