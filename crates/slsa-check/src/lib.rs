//! Verification engine for SLSA provenance and verification summary
//! attestations.
//!
//! `slsa-check` answers one question about a software artifact: was it
//! produced by a trusted builder from a trusted source, and does an
//! independent verifier attest that it meets a claimed SLSA level?
//!
//! # Architecture
//!
//! ```text
//! bytes --> envelope --> statement --> predicate --> per-field checks
//!           (signature verified before the statement is ever read)
//! ```
//!
//! # Components
//!
//! - **DSSE** ([`dsse`]): envelope parsing and PAE construction
//! - **in-toto** ([`intoto`]): statement schemas and subject digests
//! - **Crypto** ([`crypto`]): trusted-key DSSE signature verification
//! - **X.509** ([`x509`]): Fulcio certificate chains and extensions
//! - **Trust root** ([`trust_root`]): cached Fulcio/Rekor key bundle
//! - **Rekor** ([`rekor`]): transparency-log entry verification
//! - **Levels** ([`levels`]): the SLSA track/level algebra
//! - **Identifiers** ([`identifier`]): builder/verifier ID matching
//! - **Registry** ([`registry`]): verifier registries and dispatch
//! - **Verifiers** ([`gha`], [`gcb`], [`vsa`]): per-family verification
//!
//! # Security
//!
//! - The statement is never read before its signature verifies
//! - Error kinds survive propagation and compare by identity
//! - The trust root is fetched once and cached for the process lifetime

pub mod crypto;
pub mod digest;
pub mod dsse;
pub mod error;
pub mod fetcher;
pub mod gcb;
pub mod gha;
pub mod identifier;
pub mod intoto;
pub mod levels;
pub mod options;
pub mod registry;
pub mod rekor;
pub mod trust_root;
pub mod vsa;
pub mod x509;

pub use digest::{bytes_digest, file_digest};
pub use dsse::{pae, Envelope, EnvelopeSignature, INTOTO_PAYLOAD_TYPE};
pub use error::{ErrorKind, Result, VerifyError};
pub use identifier::{
    parse_builder_id, parse_verifier_id, TrustedBuilderID, TrustedVerifierID,
};
pub use intoto::{statement_from_envelope, Statement, Subject};
pub use levels::{levels_from_array, Level, Track};
pub use options::{
    BuilderOpts, Context, ProvenanceOpts, VerifierOpts, VsaOpts, WorkflowInputs,
};
pub use registry::{ProvenanceVerifier, Registry, VerifierDeps, VsaVerifier};
pub use rekor::{LogClient, LogEntry, OfflineLogClient, SignedAttestation};
pub use trust_root::{
    trust_root_singleton, FileTrustRootProvider, TrustRoot, TrustRootProvider,
};
