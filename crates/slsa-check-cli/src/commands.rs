//! Command execution: wire files and flags into the verification engine.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use slsa_check::error::VerifyError;
use slsa_check::fetcher::{AttestationFetcher, FetchedAttestation};
use slsa_check::rekor::{LogClient, LogEntry};
use slsa_check::{
    levels_from_array, BuilderOpts, Context, Envelope, FileTrustRootProvider, ProvenanceOpts,
    Registry, Result, VerifierDeps, VerifierOpts, VsaOpts, WorkflowInputs,
};

use crate::cli::{ImageProvenanceArgs, NpmArgs, ProvenanceArgs, ProvenanceFlags, VsaArgs};

/// Environment variable naming the fetched trust root bundle.
const TRUST_ROOT_ENV: &str = "SLSA_CHECK_TRUST_ROOT";

/// Rekor lookups for bare envelopes need a transport; this build verifies
/// offline and accepts Sigstore bundles that carry their log entry inline.
struct OfflineOnlyLogClient;

impl LogClient for OfflineOnlyLogClient {
    fn find_entry(
        &self,
        _ctx: &Context,
        _envelope: &Envelope,
        _artifact_hash: &str,
    ) -> Result<LogEntry> {
        Err(VerifyError::NotSupported(
            "transparency log transport is not configured; supply provenance as a Sigstore bundle"
                .to_string(),
        ))
    }
}

/// Registry access for images is a collaborator; this build requires
/// `--provenance-path`.
struct OfflineOnlyFetcher;

impl AttestationFetcher for OfflineOnlyFetcher {
    fn fetch(&self, _ctx: &Context, image: &str) -> Result<Vec<FetchedAttestation>> {
        Err(VerifyError::NotSupported(format!(
            "registry access is not configured; pass --provenance-path for {image}"
        )))
    }
}

fn trust_root_path() -> std::path::PathBuf {
    if let Ok(path) = std::env::var(TRUST_ROOT_ENV) {
        return path.into();
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Path::new(&home)
        .join(".config")
        .join("slsa-check")
        .join("trusted_root.json")
}

fn default_registry() -> Result<Registry> {
    let deps = VerifierDeps {
        trust_root_provider: Arc::new(FileTrustRootProvider::new(trust_root_path())),
        log_client: Arc::new(OfflineOnlyLogClient),
        fetcher: Arc::new(OfflineOnlyFetcher),
    };
    Registry::default_registry(deps)
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| VerifyError::Internal(format!("read {}: {e}", path.display())))
}

fn workflow_inputs(entries: &[String]) -> Result<BTreeMap<String, String>> {
    let mut inputs = WorkflowInputs::default();
    for entry in entries {
        inputs.insert(entry)?;
    }
    Ok(inputs.into_map())
}

fn provenance_opts(flags: &ProvenanceFlags, digest: String) -> Result<ProvenanceOpts> {
    Ok(ProvenanceOpts {
        expected_source_uri: flags.source_uri.clone(),
        expected_digest: digest,
        expected_branch: flags.source_branch.clone(),
        expected_tag: flags.source_tag.clone(),
        expected_versioned_tag: flags.source_versioned_tag.clone(),
        expected_workflow_inputs: workflow_inputs(&flags.build_workflow_input)?,
        ..ProvenanceOpts::default()
    })
}

fn print_payload(payload: &[u8]) {
    let mut stdout = std::io::stdout().lock();
    let _ = stdout.write_all(payload);
    let _ = stdout.write_all(b"\n");
}

/// `verify-artifact provenance`: each artifact is verified against the
/// same provenance file.
pub fn run_artifact_provenance(args: &ProvenanceArgs) -> Result<()> {
    let registry = default_registry()?;
    let ctx = Context::new();
    let provenance = read_file(&args.provenance_path)?;
    let builder_opts = BuilderOpts {
        expected_id: args.flags.builder_id.clone(),
    };

    for artifact in &args.artifacts {
        let digest = slsa_check::file_digest(artifact)?;
        let opts = provenance_opts(&args.flags, digest)?;
        let (payload, builder_id) = registry.verify_artifact_provenance(
            &ctx,
            &provenance,
            &opts.expected_digest,
            &opts,
            &builder_opts,
        )?;
        tracing::info!(artifact = %artifact.display(), builder = %builder_id, "verified");
        if args.flags.print_provenance {
            print_payload(&payload);
        }
    }
    Ok(())
}

/// `verify-artifact vsa`.
pub fn run_artifact_vsa(args: &VsaArgs) -> Result<()> {
    let registry = default_registry()?;
    let ctx = Context::new();
    let vsa = read_file(&args.vsa_path)?;
    let digest = slsa_check::file_digest(&args.artifact)?;

    let levels: Vec<&str> = args.verified_levels.split(',').collect();
    let vsa_opts = VsaOpts {
        expected_digest: digest,
        expected_levels: levels_from_array(&levels)?,
        expected_resource_uri: args.resource_uri.clone(),
    };
    let verifier_opts = VerifierOpts {
        expected_id: args.verifier_id.clone(),
    };

    let (payload, verifier_id) =
        registry.verify_artifact_vsa(&ctx, &vsa, &vsa_opts, &verifier_opts)?;
    tracing::info!(verifier = %verifier_id, "verified VSA");
    if args.print_vsa {
        print_payload(&payload);
    }
    Ok(())
}

/// `verify-image provenance`.
pub fn run_image_provenance(args: &ImageProvenanceArgs) -> Result<()> {
    let registry = default_registry()?;
    let ctx = Context::new();
    let provenance = match &args.provenance_path {
        Some(path) => Some(read_file(path)?),
        None => None,
    };

    // The image digest comes from the reference; resolving a tag needs
    // registry access, which the fetcher collaborator owns.
    let digest = args
        .image
        .split_once("@sha256:")
        .map(|(_, digest)| digest.to_string())
        .ok_or_else(|| {
            VerifyError::NotSupported(format!(
                "image reference {} must be digest-qualified (name@sha256:...)",
                args.image
            ))
        })?;
    let opts = provenance_opts(&args.flags, digest)?;
    let builder_opts = BuilderOpts {
        expected_id: args.flags.builder_id.clone(),
    };

    let (payload, builder_id) = registry.verify_image_provenance(
        &ctx,
        provenance.as_deref(),
        &args.image,
        &opts,
        &builder_opts,
    )?;
    tracing::info!(image = %args.image, builder = %builder_id, "verified");
    if args.flags.print_provenance {
        print_payload(&payload);
    }
    Ok(())
}

/// `verify-npm-package attestations`.
pub fn run_npm_attestations(args: &NpmArgs) -> Result<()> {
    for (flag, set) in [
        ("--source-branch", args.source_branch.is_some()),
        ("--source-tag", args.source_tag.is_some()),
        ("--source-versioned-tag", args.source_versioned_tag.is_some()),
        ("--print-provenance", args.print_provenance),
    ] {
        if set {
            return Err(VerifyError::NotSupported(format!(
                "{flag} not supported for npm packages"
            )));
        }
    }

    let registry = default_registry()?;
    let ctx = Context::new();
    let attestations = read_file(&args.attestations_path)?;
    let tarball_hash = slsa_check::digest::file_digest_sha512(&args.tarball)?;

    let opts = ProvenanceOpts {
        expected_source_uri: args.source_uri.clone(),
        expected_digest: tarball_hash.clone(),
        expected_workflow_inputs: workflow_inputs(&args.build_workflow_input)?,
        expected_package_name: Some(args.package_name.clone()),
        expected_package_version: Some(args.package_version.clone()),
        ..ProvenanceOpts::default()
    };
    let builder_opts = BuilderOpts {
        expected_id: Some(args.builder_id.clone()),
    };

    let (_, builder_id) = registry.verify_npm_package_attestations(
        &ctx,
        &attestations,
        &tarball_hash,
        &opts,
        &builder_opts,
    )?;
    tracing::info!(package = %args.package_name, builder = %builder_id, "verified");
    Ok(())
}
