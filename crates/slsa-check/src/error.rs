//! Error types for the verification engine.
//!
//! The taxonomy is flat: one variant per failure kind, each carrying a
//! human-readable detail string. Details are wrapped as errors propagate,
//! but the kind is never converted mid-pipeline, so callers can compare
//! [`VerifyError::kind`] against an expected [`ErrorKind`] by identity.

use thiserror::Error;

/// Errors produced by attestation verification.
#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("invalid format: {0}")]
    InvalidFormat(String),

    #[error("invalid DSSE payload: {0}")]
    InvalidDssePayload(String),

    #[error("invalid predicate: {0}")]
    InvalidPredicate(String),

    #[error("invalid builder ID: {0}")]
    InvalidBuilderID(String),

    #[error("invalid recipe: {0}")]
    InvalidRecipe(String),

    #[error("invalid build type: {0}")]
    InvalidBuildType(String),

    #[error("invalid VSA level: {0}")]
    InvalidVsaLevel(String),

    #[error("no valid signature: {0}")]
    NoValidSignature(String),

    #[error("builder ID mismatch: {0}")]
    MismatchBuilderID(String),

    #[error("source mismatch: {0}")]
    MismatchSource(String),

    #[error("hash mismatch: {0}")]
    MismatchHash(String),

    #[error("tag mismatch: {0}")]
    MismatchTag(String),

    #[error("versioned tag mismatch: {0}")]
    MismatchVersionedTag(String),

    #[error("intoto statement mismatch: {0}")]
    MismatchIntoto(String),

    #[error("verifier ID mismatch: {0}")]
    MismatchVerifierID(String),

    #[error("VSA level mismatch: {0}")]
    MismatchVsaLevel(String),

    #[error("VSA resource URI mismatch: {0}")]
    MismatchVsaResourceURI(String),

    #[error("duplicate track: {0}")]
    DuplicateTrack(String),

    #[error("no verifier supports builder: {0}")]
    BuilderVerifierNotSupported(String),

    #[error("no verifier supports VSA verifier: {0}")]
    VsaVerifierNotSupported(String),

    #[error("not supported: {0}")]
    NotSupported(String),

    #[error("untrusted reusable workflow: {0}")]
    UntrustedReusableWorkflow(String),

    #[error("VSA verification result failure: {0}")]
    VsaResultFailure(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type alias for verification operations.
pub type Result<T> = std::result::Result<T, VerifyError>;

/// Discriminant of a [`VerifyError`], comparable by identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidFormat,
    InvalidDssePayload,
    InvalidPredicate,
    InvalidBuilderID,
    InvalidRecipe,
    InvalidBuildType,
    InvalidVsaLevel,
    NoValidSignature,
    MismatchBuilderID,
    MismatchSource,
    MismatchHash,
    MismatchTag,
    MismatchVersionedTag,
    MismatchIntoto,
    MismatchVerifierID,
    MismatchVsaLevel,
    MismatchVsaResourceURI,
    DuplicateTrack,
    BuilderVerifierNotSupported,
    VsaVerifierNotSupported,
    NotSupported,
    UntrustedReusableWorkflow,
    VsaResultFailure,
    Internal,
}

impl VerifyError {
    /// The kind of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidFormat(_) => ErrorKind::InvalidFormat,
            Self::InvalidDssePayload(_) => ErrorKind::InvalidDssePayload,
            Self::InvalidPredicate(_) => ErrorKind::InvalidPredicate,
            Self::InvalidBuilderID(_) => ErrorKind::InvalidBuilderID,
            Self::InvalidRecipe(_) => ErrorKind::InvalidRecipe,
            Self::InvalidBuildType(_) => ErrorKind::InvalidBuildType,
            Self::InvalidVsaLevel(_) => ErrorKind::InvalidVsaLevel,
            Self::NoValidSignature(_) => ErrorKind::NoValidSignature,
            Self::MismatchBuilderID(_) => ErrorKind::MismatchBuilderID,
            Self::MismatchSource(_) => ErrorKind::MismatchSource,
            Self::MismatchHash(_) => ErrorKind::MismatchHash,
            Self::MismatchTag(_) => ErrorKind::MismatchTag,
            Self::MismatchVersionedTag(_) => ErrorKind::MismatchVersionedTag,
            Self::MismatchIntoto(_) => ErrorKind::MismatchIntoto,
            Self::MismatchVerifierID(_) => ErrorKind::MismatchVerifierID,
            Self::MismatchVsaLevel(_) => ErrorKind::MismatchVsaLevel,
            Self::MismatchVsaResourceURI(_) => ErrorKind::MismatchVsaResourceURI,
            Self::DuplicateTrack(_) => ErrorKind::DuplicateTrack,
            Self::BuilderVerifierNotSupported(_) => ErrorKind::BuilderVerifierNotSupported,
            Self::VsaVerifierNotSupported(_) => ErrorKind::VsaVerifierNotSupported,
            Self::NotSupported(_) => ErrorKind::NotSupported,
            Self::UntrustedReusableWorkflow(_) => ErrorKind::UntrustedReusableWorkflow,
            Self::VsaResultFailure(_) => ErrorKind::VsaResultFailure,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Wrap additional context around the detail string, preserving the kind.
    #[must_use]
    pub fn context(self, ctx: &str) -> Self {
        let wrap = |detail: String| format!("{ctx}: {detail}");
        match self {
            Self::InvalidFormat(d) => Self::InvalidFormat(wrap(d)),
            Self::InvalidDssePayload(d) => Self::InvalidDssePayload(wrap(d)),
            Self::InvalidPredicate(d) => Self::InvalidPredicate(wrap(d)),
            Self::InvalidBuilderID(d) => Self::InvalidBuilderID(wrap(d)),
            Self::InvalidRecipe(d) => Self::InvalidRecipe(wrap(d)),
            Self::InvalidBuildType(d) => Self::InvalidBuildType(wrap(d)),
            Self::InvalidVsaLevel(d) => Self::InvalidVsaLevel(wrap(d)),
            Self::NoValidSignature(d) => Self::NoValidSignature(wrap(d)),
            Self::MismatchBuilderID(d) => Self::MismatchBuilderID(wrap(d)),
            Self::MismatchSource(d) => Self::MismatchSource(wrap(d)),
            Self::MismatchHash(d) => Self::MismatchHash(wrap(d)),
            Self::MismatchTag(d) => Self::MismatchTag(wrap(d)),
            Self::MismatchVersionedTag(d) => Self::MismatchVersionedTag(wrap(d)),
            Self::MismatchIntoto(d) => Self::MismatchIntoto(wrap(d)),
            Self::MismatchVerifierID(d) => Self::MismatchVerifierID(wrap(d)),
            Self::MismatchVsaLevel(d) => Self::MismatchVsaLevel(wrap(d)),
            Self::MismatchVsaResourceURI(d) => Self::MismatchVsaResourceURI(wrap(d)),
            Self::DuplicateTrack(d) => Self::DuplicateTrack(wrap(d)),
            Self::BuilderVerifierNotSupported(d) => Self::BuilderVerifierNotSupported(wrap(d)),
            Self::VsaVerifierNotSupported(d) => Self::VsaVerifierNotSupported(wrap(d)),
            Self::NotSupported(d) => Self::NotSupported(wrap(d)),
            Self::UntrustedReusableWorkflow(d) => Self::UntrustedReusableWorkflow(wrap(d)),
            Self::VsaResultFailure(d) => Self::VsaResultFailure(wrap(d)),
            Self::Internal(d) => Self::Internal(wrap(d)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_is_comparable_by_identity() {
        let err = VerifyError::MismatchHash("expected abc".to_string());
        assert_eq!(err.kind(), ErrorKind::MismatchHash);
        assert_ne!(err.kind(), ErrorKind::MismatchSource);
    }

    #[test]
    fn context_preserves_kind() {
        let err = VerifyError::NoValidSignature("all keys failed".to_string());
        let wrapped = err.context("envelope 2");
        assert_eq!(wrapped.kind(), ErrorKind::NoValidSignature);
        assert!(wrapped.to_string().contains("envelope 2"));
        assert!(wrapped.to_string().contains("all keys failed"));
    }
}
