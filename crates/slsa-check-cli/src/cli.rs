//! CLI argument definitions.
//!
//! Uses clap for argument parsing. The command tree mirrors the
//! verification entry points: `verify-artifact {provenance,vsa}`,
//! `verify-image provenance`, `verify-npm-package attestations`.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// slsa-check - verify SLSA provenance and VSA attestations
#[derive(Parser, Debug)]
#[command(name = "slsa-check")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Verify provenance or a VSA on artifact blobs
    #[command(name = "verify-artifact")]
    VerifyArtifact {
        #[command(subcommand)]
        command: ArtifactCommands,
    },

    /// Verify provenance on a container image
    #[command(name = "verify-image")]
    VerifyImage {
        #[command(subcommand)]
        command: ImageCommands,
    },

    /// Verify provenance on an npm package
    #[command(name = "verify-npm-package")]
    VerifyNpmPackage {
        #[command(subcommand)]
        command: NpmCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum ArtifactCommands {
    /// Use SLSA provenance
    #[command(after_help = "EXAMPLES:
    # Verify a release binary against its provenance
    slsa-check verify-artifact provenance binary-linux-amd64 \\
        --provenance-path binary-linux-amd64.intoto.jsonl \\
        --source-uri github.com/org/repo

    # Pin the builder and the release tag
    slsa-check verify-artifact provenance binary-linux-amd64 \\
        --provenance-path binary-linux-amd64.intoto.jsonl \\
        --source-uri github.com/org/repo \\
        --builder-id https://github.com/slsa-framework/slsa-github-generator/.github/workflows/builder_go_slsa3.yml \\
        --source-tag v1.2.3
")]
    Provenance(ProvenanceArgs),

    /// Use a SLSA Verification Summary Attestation (VSA)
    #[command(after_help = "EXAMPLES:
    # Verify a VSA for an artifact
    slsa-check verify-artifact vsa my-artifact \\
        --vsa-path my-artifact.vsa.jsonl \\
        --verifier-id https://the.trusted.verifier/v0.1 \\
        --verified-levels SLSA_BUILD_LEVEL_2
")]
    Vsa(VsaArgs),
}

#[derive(Subcommand, Debug)]
pub enum ImageCommands {
    /// Use SLSA provenance
    Provenance(ImageProvenanceArgs),
}

#[derive(Subcommand, Debug)]
pub enum NpmCommands {
    /// Use attestations from the registry
    Attestations(NpmArgs),
}

/// Source and builder requirements shared by the provenance commands.
#[derive(Args, Debug)]
pub struct ProvenanceFlags {
    /// Expected source repository that should have produced the binary,
    /// e.g. github.com/some/repo
    #[arg(long = "source-uri")]
    pub source_uri: String,

    /// [optional] Expected branch the binary was compiled from
    #[arg(long = "source-branch")]
    pub source_branch: Option<String>,

    /// [optional] Expected tag the binary was compiled from
    #[arg(long = "source-tag")]
    pub source_tag: Option<String>,

    /// [optional] Expected version the binary was compiled from.
    /// Uses semantic version to match the tag
    #[arg(long = "source-versioned-tag", conflicts_with = "source_tag")]
    pub source_versioned_tag: Option<String>,

    /// [optional] The unique builder ID who created the provenance
    #[arg(long = "builder-id")]
    pub builder_id: Option<String>,

    /// [optional] A workflow input provided by a user at trigger time in
    /// the format 'key=value' (only for 'workflow_dispatch' events)
    #[arg(long = "build-workflow-input", value_name = "KEY=VALUE")]
    pub build_workflow_input: Vec<String>,

    /// [optional] Print the verified provenance to stdout
    #[arg(long = "print-provenance")]
    pub print_provenance: bool,
}

#[derive(Args, Debug)]
pub struct ProvenanceArgs {
    /// Artifacts to verify
    #[arg(required = true)]
    pub artifacts: Vec<PathBuf>,

    /// Path to a provenance file
    #[arg(long = "provenance-path")]
    pub provenance_path: PathBuf,

    #[command(flatten)]
    pub flags: ProvenanceFlags,
}

#[derive(Args, Debug)]
pub struct VsaArgs {
    /// Artifact to verify
    pub artifact: PathBuf,

    /// The path to a VSA
    #[arg(long = "vsa-path")]
    pub vsa_path: PathBuf,

    /// The unique verifier ID who created the VSA
    #[arg(long = "verifier-id")]
    pub verifier_id: String,

    /// Verified levels of the artifact, comma-separated
    /// (SLSA_BUILD_LEVEL_1, SLSA_SOURCE_LEVEL_1, ...)
    #[arg(long = "verified-levels")]
    pub verified_levels: String,

    /// [optional] The resource URI the VSA is for
    #[arg(long = "resource-uri")]
    pub resource_uri: Option<String>,

    /// [optional] Print the verified VSA to stdout
    #[arg(long = "print-vsa")]
    pub print_vsa: bool,
}

#[derive(Args, Debug)]
pub struct ImageProvenanceArgs {
    /// Image reference to verify (name@sha256:digest)
    pub image: String,

    /// [optional] Path to a provenance file
    #[arg(long = "provenance-path")]
    pub provenance_path: Option<PathBuf>,

    #[command(flatten)]
    pub flags: ProvenanceFlags,
}

#[derive(Args, Debug)]
pub struct NpmArgs {
    /// Package tarball to verify
    pub tarball: PathBuf,

    /// Path to a file containing the attestations
    #[arg(long = "attestations-path")]
    pub attestations_path: PathBuf,

    /// The package name
    #[arg(long = "package-name")]
    pub package_name: String,

    /// The package version
    #[arg(long = "package-version")]
    pub package_version: String,

    /// Expected source repository that should have produced the package
    #[arg(long = "source-uri")]
    pub source_uri: String,

    /// The unique builder ID who created the provenance
    #[arg(long = "builder-id")]
    pub builder_id: String,

    /// [optional] A workflow input provided at trigger time ('key=value')
    #[arg(long = "build-workflow-input", value_name = "KEY=VALUE")]
    pub build_workflow_input: Vec<String>,

    /// Not supported for npm packages
    #[arg(long = "source-branch", hide = true)]
    pub source_branch: Option<String>,

    /// Not supported for npm packages
    #[arg(long = "source-tag", hide = true)]
    pub source_tag: Option<String>,

    /// Not supported for npm packages
    #[arg(long = "source-versioned-tag", hide = true)]
    pub source_versioned_tag: Option<String>,

    /// Not supported for npm packages
    #[arg(long = "print-provenance", hide = true)]
    pub print_provenance: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_verify_artifact_provenance() {
        let cli = Cli::parse_from([
            "slsa-check",
            "verify-artifact",
            "provenance",
            "binary-one",
            "binary-two",
            "--provenance-path",
            "prov.jsonl",
            "--source-uri",
            "github.com/org/repo",
            "--source-tag",
            "v1.2.3",
            "--build-workflow-input",
            "release=true",
        ]);
        let Commands::VerifyArtifact {
            command: ArtifactCommands::Provenance(args),
        } = cli.command
        else {
            panic!("wrong command");
        };
        assert_eq!(args.artifacts.len(), 2);
        assert_eq!(args.flags.source_tag.as_deref(), Some("v1.2.3"));
        assert_eq!(args.flags.build_workflow_input, vec!["release=true"]);
    }

    #[test]
    fn source_tag_flags_are_mutually_exclusive() {
        let result = Cli::try_parse_from([
            "slsa-check",
            "verify-artifact",
            "provenance",
            "binary",
            "--provenance-path",
            "prov.jsonl",
            "--source-uri",
            "github.com/org/repo",
            "--source-tag",
            "v1",
            "--source-versioned-tag",
            "v1",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn vsa_required_flags() {
        let result = Cli::try_parse_from([
            "slsa-check",
            "verify-artifact",
            "vsa",
            "artifact",
            "--vsa-path",
            "vsa.jsonl",
        ]);
        assert!(result.is_err(), "verifier-id and verified-levels required");

        let cli = Cli::parse_from([
            "slsa-check",
            "verify-artifact",
            "vsa",
            "artifact",
            "--vsa-path",
            "vsa.jsonl",
            "--verifier-id",
            "https://the.trusted.verifier/v0.1",
            "--verified-levels",
            "SLSA_BUILD_LEVEL_2,SLSA_SOURCE_LEVEL_3",
        ]);
        let Commands::VerifyArtifact {
            command: ArtifactCommands::Vsa(args),
        } = cli.command
        else {
            panic!("wrong command");
        };
        assert_eq!(args.verified_levels, "SLSA_BUILD_LEVEL_2,SLSA_SOURCE_LEVEL_3");
    }

    #[test]
    fn parse_verify_npm_package() {
        let cli = Cli::parse_from([
            "slsa-check",
            "verify-npm-package",
            "attestations",
            "pkg-1.0.0.tgz",
            "--attestations-path",
            "attestations.json",
            "--package-name",
            "pkg",
            "--package-version",
            "1.0.0",
            "--source-uri",
            "github.com/org/pkg",
            "--builder-id",
            "https://github.com/actions/runner/github-hosted",
        ]);
        let Commands::VerifyNpmPackage {
            command: NpmCommands::Attestations(args),
        } = cli.command
        else {
            panic!("wrong command");
        };
        assert_eq!(args.package_name, "pkg");
        assert!(args.source_branch.is_none());
    }
}
