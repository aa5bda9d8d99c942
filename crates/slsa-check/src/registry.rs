//! Verifier registries and top-level dispatch.
//!
//! Two name-to-verifier maps, one for provenance and one for VSAs,
//! populated explicitly by [`Registry::default_registry`]. Each verifier
//! declares authority over a namespace of builder or verifier IDs; the
//! dispatcher selects by the caller's expected ID.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{Result, VerifyError};
use crate::fetcher::AttestationFetcher;
use crate::gcb::GcbVerifier;
use crate::gha::GhaVerifier;
use crate::identifier::{parse_builder_id, parse_verifier_id, TrustedBuilderID, TrustedVerifierID};
use crate::options::{BuilderOpts, Context, ProvenanceOpts, VerifierOpts, VsaOpts};
use crate::rekor::LogClient;
use crate::trust_root::TrustRootProvider;
use crate::vsa::default_vsa_verifiers;

/// External collaborators the verifiers depend on.
#[derive(Clone)]
pub struct VerifierDeps {
    pub trust_root_provider: Arc<dyn TrustRootProvider>,
    pub log_client: Arc<dyn LogClient>,
    pub fetcher: Arc<dyn AttestationFetcher>,
}

/// Verifies provenance attestations for a family of builders.
pub trait ProvenanceVerifier: Send + Sync {
    /// Whether this verifier can verify provenance for the builder
    /// identified by `builder_id_name` (the name part, no version).
    fn is_authoritative_for(&self, builder_id_name: &str) -> bool;

    /// Verify provenance for an artifact identified by its sha256 hash.
    fn verify_artifact(
        &self,
        ctx: &Context,
        provenance: &[u8],
        artifact_hash: &str,
        provenance_opts: &ProvenanceOpts,
        builder_opts: &BuilderOpts,
    ) -> Result<(Vec<u8>, TrustedBuilderID)>;

    /// Verify provenance for a container image.
    fn verify_image(
        &self,
        ctx: &Context,
        provenance: Option<&[u8]>,
        artifact_image: &str,
        provenance_opts: &ProvenanceOpts,
        builder_opts: &BuilderOpts,
    ) -> Result<(Vec<u8>, TrustedBuilderID)>;

    /// Verify the attestation set of an npm package tarball.
    fn verify_npm_package(
        &self,
        ctx: &Context,
        attestations: &[u8],
        tarball_hash: &str,
        provenance_opts: &ProvenanceOpts,
        builder_opts: &BuilderOpts,
    ) -> Result<(Vec<u8>, TrustedBuilderID)>;
}

/// Verifies verification summary attestations for a verifier namespace.
pub trait VsaVerifier: Send + Sync {
    /// Whether this verifier can verify VSAs from the verifier identified
    /// by `verifier_id_name`.
    fn is_authoritative_for(&self, verifier_id_name: &str) -> bool;

    /// Verify a VSA for an artifact.
    fn verify_artifact(
        &self,
        ctx: &Context,
        vsa: &[u8],
        vsa_opts: &VsaOpts,
        verifier_opts: &VerifierOpts,
    ) -> Result<(Vec<u8>, TrustedVerifierID)>;
}

/// The two verifier maps.
#[derive(Clone, Default)]
pub struct Registry {
    provenance: BTreeMap<String, Arc<dyn ProvenanceVerifier>>,
    vsa: BTreeMap<String, Arc<dyn VsaVerifier>>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Construct the default registry: the GHA and GCB provenance
    /// verifiers and the static VSA verifier set.
    ///
    /// # Errors
    ///
    /// `InvalidFormat` when embedded key material fails to load.
    pub fn default_registry(deps: VerifierDeps) -> Result<Self> {
        let mut registry = Self::new();
        registry.register_provenance_verifier(
            crate::gha::VERIFIER_NAME,
            Arc::new(GhaVerifier::new(deps)),
        );
        registry.register_provenance_verifier(
            crate::gcb::VERIFIER_NAME,
            Arc::new(GcbVerifier::production()?),
        );
        for (name, verifier) in default_vsa_verifiers()? {
            registry.register_vsa_verifier(&name, verifier);
        }
        Ok(registry)
    }

    pub fn register_provenance_verifier(
        &mut self,
        name: &str,
        verifier: Arc<dyn ProvenanceVerifier>,
    ) {
        self.provenance.insert(name.to_string(), verifier);
    }

    pub fn register_vsa_verifier(&mut self, name: &str, verifier: Arc<dyn VsaVerifier>) {
        self.vsa.insert(name.to_string(), verifier);
    }

    /// Select the provenance verifier for the caller's builder expectation.
    ///
    /// Defaults to the GHA verifier when no builder ID is supplied.
    fn provenance_verifier(&self, builder_opts: &BuilderOpts) -> Result<&dyn ProvenanceVerifier> {
        if let Some(expected) = builder_opts.expected_id.as_deref().filter(|s| !s.is_empty()) {
            let (name, _) = parse_builder_id(expected, false)?;
            for verifier in self.provenance.values() {
                if verifier.is_authoritative_for(&name) {
                    return Ok(verifier.as_ref());
                }
            }
            return Err(VerifyError::BuilderVerifierNotSupported(
                expected.to_string(),
            ));
        }
        self.provenance
            .get(crate::gha::VERIFIER_NAME)
            .map(|v| v.as_ref())
            .ok_or_else(|| {
                VerifyError::Internal("default GHA verifier not registered".to_string())
            })
    }

    /// Select the VSA verifier for the caller's verifier expectation.
    /// There is no default: the expected verifier ID is required.
    fn vsa_verifier(&self, verifier_opts: &VerifierOpts) -> Result<&dyn VsaVerifier> {
        if verifier_opts.expected_id.is_empty() {
            return Err(VerifyError::VsaVerifierNotSupported(
                "no verifier ID supplied".to_string(),
            ));
        }
        let (name, _) = parse_verifier_id(&verifier_opts.expected_id, false)?;
        for verifier in self.vsa.values() {
            if verifier.is_authoritative_for(&name) {
                return Ok(verifier.as_ref());
            }
        }
        Err(VerifyError::VsaVerifierNotSupported(
            verifier_opts.expected_id.clone(),
        ))
    }

    /// Verify provenance for an artifact hash.
    ///
    /// # Errors
    ///
    /// `BuilderVerifierNotSupported` when no registered verifier covers
    /// the expected builder, plus any verifier error.
    pub fn verify_artifact_provenance(
        &self,
        ctx: &Context,
        provenance: &[u8],
        artifact_hash: &str,
        provenance_opts: &ProvenanceOpts,
        builder_opts: &BuilderOpts,
    ) -> Result<(Vec<u8>, TrustedBuilderID)> {
        self.provenance_verifier(builder_opts)?.verify_artifact(
            ctx,
            provenance,
            artifact_hash,
            provenance_opts,
            builder_opts,
        )
    }

    /// Verify provenance for a container image.
    ///
    /// # Errors
    ///
    /// As [`Registry::verify_artifact_provenance`].
    pub fn verify_image_provenance(
        &self,
        ctx: &Context,
        provenance: Option<&[u8]>,
        artifact_image: &str,
        provenance_opts: &ProvenanceOpts,
        builder_opts: &BuilderOpts,
    ) -> Result<(Vec<u8>, TrustedBuilderID)> {
        self.provenance_verifier(builder_opts)?.verify_image(
            ctx,
            provenance,
            artifact_image,
            provenance_opts,
            builder_opts,
        )
    }

    /// Verify the attestation set of an npm package tarball.
    ///
    /// # Errors
    ///
    /// As [`Registry::verify_artifact_provenance`].
    pub fn verify_npm_package_attestations(
        &self,
        ctx: &Context,
        attestations: &[u8],
        tarball_hash: &str,
        provenance_opts: &ProvenanceOpts,
        builder_opts: &BuilderOpts,
    ) -> Result<(Vec<u8>, TrustedBuilderID)> {
        self.provenance_verifier(builder_opts)?.verify_npm_package(
            ctx,
            attestations,
            tarball_hash,
            provenance_opts,
            builder_opts,
        )
    }

    /// Verify a VSA for an artifact.
    ///
    /// # Errors
    ///
    /// `VsaVerifierNotSupported` when no registered verifier covers the
    /// expected verifier ID, plus any verifier error.
    pub fn verify_artifact_vsa(
        &self,
        ctx: &Context,
        vsa: &[u8],
        vsa_opts: &VsaOpts,
        verifier_opts: &VerifierOpts,
    ) -> Result<(Vec<u8>, TrustedVerifierID)> {
        self.vsa_verifier(verifier_opts)?
            .verify_artifact(ctx, vsa, vsa_opts, verifier_opts)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    struct StubProvenance {
        prefix: &'static str,
        tag: &'static str,
    }

    impl ProvenanceVerifier for StubProvenance {
        fn is_authoritative_for(&self, builder_id_name: &str) -> bool {
            builder_id_name.starts_with(self.prefix)
        }

        fn verify_artifact(
            &self,
            _ctx: &Context,
            _provenance: &[u8],
            _artifact_hash: &str,
            _provenance_opts: &ProvenanceOpts,
            _builder_opts: &BuilderOpts,
        ) -> Result<(Vec<u8>, TrustedBuilderID)> {
            Ok((
                self.tag.as_bytes().to_vec(),
                TrustedBuilderID::new("https://example.com/builder@v1.0", true)?,
            ))
        }

        fn verify_image(
            &self,
            _ctx: &Context,
            _provenance: Option<&[u8]>,
            _artifact_image: &str,
            _provenance_opts: &ProvenanceOpts,
            _builder_opts: &BuilderOpts,
        ) -> Result<(Vec<u8>, TrustedBuilderID)> {
            Err(VerifyError::NotSupported("stub".to_string()))
        }

        fn verify_npm_package(
            &self,
            _ctx: &Context,
            _attestations: &[u8],
            _tarball_hash: &str,
            _provenance_opts: &ProvenanceOpts,
            _builder_opts: &BuilderOpts,
        ) -> Result<(Vec<u8>, TrustedBuilderID)> {
            Err(VerifyError::NotSupported("stub".to_string()))
        }
    }

    fn stub_registry() -> Registry {
        let mut registry = Registry::new();
        registry.register_provenance_verifier(
            "GHA",
            Arc::new(StubProvenance {
                prefix: "https://github.com/",
                tag: "gha",
            }),
        );
        registry.register_provenance_verifier(
            "GCB",
            Arc::new(StubProvenance {
                prefix: "https://cloudbuild.googleapis.com/",
                tag: "gcb",
            }),
        );
        registry
    }

    #[test]
    fn dispatch_defaults_to_gha() {
        let registry = stub_registry();
        let (payload, _) = registry
            .verify_artifact_provenance(
                &Context::new(),
                b"{}",
                "abc",
                &ProvenanceOpts::default(),
                &BuilderOpts::default(),
            )
            .unwrap();
        assert_eq!(payload, b"gha");
    }

    #[test]
    fn dispatch_selects_by_builder_prefix() {
        let registry = stub_registry();
        let opts = BuilderOpts {
            expected_id: Some(
                "https://cloudbuild.googleapis.com/GoogleHostedWorker@v0.2".to_string(),
            ),
        };
        let (payload, _) = registry
            .verify_artifact_provenance(
                &Context::new(),
                b"{}",
                "abc",
                &ProvenanceOpts::default(),
                &opts,
            )
            .unwrap();
        assert_eq!(payload, b"gcb");
    }

    #[test]
    fn dispatch_rejects_unknown_builder() {
        let registry = stub_registry();
        let opts = BuilderOpts {
            expected_id: Some("https://unknown.example.com/builder@v1".to_string()),
        };
        let err = registry
            .verify_artifact_provenance(
                &Context::new(),
                b"{}",
                "abc",
                &ProvenanceOpts::default(),
                &opts,
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BuilderVerifierNotSupported);
    }

    #[test]
    fn vsa_dispatch_requires_verifier_id() {
        let registry = stub_registry();
        let err = registry
            .verify_artifact_vsa(
                &Context::new(),
                b"{}",
                &VsaOpts::default(),
                &VerifierOpts::default(),
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::VsaVerifierNotSupported);
    }

    #[test]
    fn vsa_dispatch_rejects_unknown_verifier() {
        let registry = stub_registry();
        let err = registry
            .verify_artifact_vsa(
                &Context::new(),
                b"{}",
                &VsaOpts::default(),
                &VerifierOpts {
                    expected_id: "https://unknown.verifier/v1.0".to_string(),
                },
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::VsaVerifierNotSupported);
    }
}
