//! Google Cloud Build provenance verifier.
//!
//! Authoritative for builder IDs under
//! `https://cloudbuild.googleapis.com/`. GCB provenance is signed with
//! long-lived Google-managed keys, so verification needs no transparency
//! log or certificate chain; the document is the `gcloud` provenance
//! wrapper fetched alongside the image.

pub mod keys;
pub mod provenance;

use crate::error::{Result, VerifyError};
use crate::identifier::TrustedBuilderID;
use crate::options::{BuilderOpts, Context, ProvenanceOpts};
use crate::registry::ProvenanceVerifier;

pub use self::keys::GcbKeyRing;
pub use self::provenance::GcbProvenance;

/// Registry name of this verifier.
pub const VERIFIER_NAME: &str = "GCB";

/// Builder ID prefix this verifier is authoritative for.
pub const CLOUD_BUILD_PREFIX: &str = "https://cloudbuild.googleapis.com/";

/// The Google Cloud Build verifier.
#[derive(Debug, Clone)]
pub struct GcbVerifier {
    keyring: GcbKeyRing,
}

impl GcbVerifier {
    /// Verifier backed by the production key ring.
    ///
    /// # Errors
    ///
    /// `InvalidFormat` when the embedded keys fail to load.
    pub fn production() -> Result<Self> {
        Ok(Self {
            keyring: GcbKeyRing::production()?,
        })
    }

    /// Verifier with an explicit key ring.
    #[must_use]
    pub fn with_key_ring(keyring: GcbKeyRing) -> Self {
        Self { keyring }
    }

    /// The shared verification sequence over a provenance document.
    fn verify_document(
        &self,
        ctx: &Context,
        provenance: &[u8],
        provenance_opts: &ProvenanceOpts,
        builder_opts: &BuilderOpts,
    ) -> Result<(Vec<u8>, TrustedBuilderID)> {
        ctx.ensure_active()?;
        let mut prov = GcbProvenance::from_bytes(provenance)?;
        prov.verify_signature(&self.keyring)?;
        prov.verify_metadata(provenance_opts)?;
        prov.verify_summary(provenance_opts)?;
        prov.verify_text_provenance()?;
        let builder_id = prov.verify_builder(builder_opts)?;
        prov.verify_source_uri(&provenance_opts.expected_source_uri, &builder_id)?;
        if let Some(branch) = provenance_opts.expected_branch.as_deref() {
            prov.verify_branch(branch)?;
        }
        if let Some(tag) = provenance_opts.expected_tag.as_deref() {
            prov.verify_tag(tag)?;
        }
        if let Some(versioned_tag) = provenance_opts.expected_versioned_tag.as_deref() {
            prov.verify_versioned_tag(versioned_tag)?;
        }
        let payload = serde_json::to_vec(prov.statement()?)
            .map_err(|e| VerifyError::Internal(format!("serialize statement: {e}")))?;
        tracing::debug!(builder = %builder_id, "verified GCB build");
        Ok((payload, builder_id))
    }
}

impl ProvenanceVerifier for GcbVerifier {
    fn is_authoritative_for(&self, builder_id_name: &str) -> bool {
        builder_id_name.starts_with(CLOUD_BUILD_PREFIX)
    }

    fn verify_artifact(
        &self,
        _ctx: &Context,
        _provenance: &[u8],
        _artifact_hash: &str,
        _provenance_opts: &ProvenanceOpts,
        _builder_opts: &BuilderOpts,
    ) -> Result<(Vec<u8>, TrustedBuilderID)> {
        Err(VerifyError::NotSupported(
            "GCB provenance is only supported for container images".to_string(),
        ))
    }

    fn verify_image(
        &self,
        ctx: &Context,
        provenance: Option<&[u8]>,
        artifact_image: &str,
        provenance_opts: &ProvenanceOpts,
        builder_opts: &BuilderOpts,
    ) -> Result<(Vec<u8>, TrustedBuilderID)> {
        let bytes = provenance.ok_or_else(|| {
            VerifyError::NotSupported(format!(
                "GCB verification for {artifact_image} requires a provenance file"
            ))
        })?;
        self.verify_document(ctx, bytes, provenance_opts, builder_opts)
    }

    fn verify_npm_package(
        &self,
        _ctx: &Context,
        _attestations: &[u8],
        _tarball_hash: &str,
        _provenance_opts: &ProvenanceOpts,
        _builder_opts: &BuilderOpts,
    ) -> Result<(Vec<u8>, TrustedBuilderID)> {
        Err(VerifyError::NotSupported(
            "GCB does not build npm packages".to_string(),
        ))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::provenance::fixtures::*;
    use super::*;
    use crate::crypto::test_support::generate_p256;
    use crate::error::ErrorKind;

    const GITHUB_MATERIAL: &str =
        "https://github.com/laurentsimon/gcb-tests/commit/fbbb98765e85ad464302dc5977968104d36e455e";

    #[test]
    fn authority_is_cloudbuild_prefix() {
        let verifier = GcbVerifier::production().unwrap();
        assert!(verifier.is_authoritative_for("https://cloudbuild.googleapis.com/GoogleHostedWorker"));
        assert!(!verifier.is_authoritative_for("https://github.com/org/builder"));
    }

    #[test]
    fn artifacts_and_npm_are_not_supported() {
        let verifier = GcbVerifier::production().unwrap();
        let err = verifier
            .verify_artifact(
                &Context::new(),
                b"{}",
                "abc",
                &ProvenanceOpts::default(),
                &BuilderOpts::default(),
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotSupported);

        let err = verifier
            .verify_npm_package(
                &Context::new(),
                b"{}",
                "abc",
                &ProvenanceOpts::default(),
                &BuilderOpts::default(),
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotSupported);
    }

    #[test]
    fn image_requires_provenance_file() {
        let verifier = GcbVerifier::production().unwrap();
        let err = verifier
            .verify_image(
                &Context::new(),
                None,
                "us-docker.pkg.dev/project/repo/image",
                &ProvenanceOpts::default(),
                &BuilderOpts::default(),
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotSupported);
    }

    // -----------------------------------------------------------------------
    // End-to-end scenarios
    // -----------------------------------------------------------------------

    #[test]
    fn v01_image_verification_passes() {
        let key = generate_p256();
        let statement = v01_statement(GCB_TEST_DIGEST, GITHUB_MATERIAL, None);
        let doc = provenance_document(&key, &statement, GCB_TEST_DIGEST);
        let verifier = GcbVerifier::with_key_ring(test_keyring(&key));

        let opts = ProvenanceOpts {
            expected_source_uri: "https://github.com/laurentsimon/gcb-tests".to_string(),
            expected_digest: GCB_TEST_DIGEST.to_string(),
            ..ProvenanceOpts::default()
        };
        let builder_opts = BuilderOpts {
            expected_id: Some(
                "https://cloudbuild.googleapis.com/GoogleHostedWorker@v0.2".to_string(),
            ),
        };
        let (payload, builder_id) = verifier
            .verify_image(
                &Context::new(),
                Some(&doc),
                "us-docker.pkg.dev/project/repo/image",
                &opts,
                &builder_opts,
            )
            .unwrap();
        assert_eq!(
            builder_id.to_string(),
            "https://cloudbuild.googleapis.com/GoogleHostedWorker@v0.2"
        );
        assert!(!payload.is_empty());
    }

    #[test]
    fn v01_image_verification_source_mismatch() {
        let key = generate_p256();
        let statement = v01_statement(GCB_TEST_DIGEST, GITHUB_MATERIAL, None);
        let doc = provenance_document(&key, &statement, GCB_TEST_DIGEST);
        let verifier = GcbVerifier::with_key_ring(test_keyring(&key));

        let opts = ProvenanceOpts {
            expected_source_uri: "https://github.com/laurentsimon/gcb-tests2".to_string(),
            expected_digest: GCB_TEST_DIGEST.to_string(),
            ..ProvenanceOpts::default()
        };
        let err = verifier
            .verify_image(
                &Context::new(),
                Some(&doc),
                "us-docker.pkg.dev/project/repo/image",
                &opts,
                &BuilderOpts::default(),
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MismatchSource);
    }

    #[test]
    fn v10_image_verification_with_tag_passes() {
        let key = generate_p256();
        let statement = v10_statement(
            GCB_TEST_DIGEST_V10,
            "git+https://github.com/khalkie/gcb-prod-prov@refs/tags/v33.0.4",
            Some("v33.0.4"),
        );
        let doc = provenance_document(&key, &statement, GCB_TEST_DIGEST_V10);
        let verifier = GcbVerifier::with_key_ring(test_keyring(&key));

        let opts = ProvenanceOpts {
            expected_source_uri: "https://github.com/khalkie/gcb-prod-prov".to_string(),
            expected_digest: GCB_TEST_DIGEST_V10.to_string(),
            expected_tag: Some("v33.0.4".to_string()),
            ..ProvenanceOpts::default()
        };
        let builder_opts = BuilderOpts {
            expected_id: Some("https://cloudbuild.googleapis.com/GoogleHostedWorker".to_string()),
        };
        let (_, builder_id) = verifier
            .verify_image(
                &Context::new(),
                Some(&doc),
                "us-docker.pkg.dev/project/repo/image",
                &opts,
                &builder_opts,
            )
            .unwrap();
        assert_eq!(
            builder_id.to_string(),
            "https://cloudbuild.googleapis.com/GoogleHostedWorker"
        );
    }
}
