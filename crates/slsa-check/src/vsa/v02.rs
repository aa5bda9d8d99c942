//! VSA v0.2 predicate.

use serde::Deserialize;

use crate::error::{Result, VerifyError};
use crate::intoto::Statement;
use crate::levels::{normalize_policy_level, Level};

/// Predicate type of v0.2 verification summary attestations.
pub const PREDICATE_VSA_V02: &str = "https://slsa.dev/verification_summary/v0.2";

#[derive(Debug, Clone, Deserialize)]
pub struct VsaVerifierRef {
    #[serde(default)]
    pub id: String,
}

/// The VSA predicate fields verification reads.
#[derive(Debug, Clone, Deserialize)]
pub struct VsaPredicate {
    pub verifier: VsaVerifierRef,
    #[serde(default)]
    pub verification_result: String,
    #[serde(default)]
    pub policy_level: String,
    #[serde(default)]
    pub resource_uri: String,
}

impl VsaPredicate {
    /// Decode the predicate from a statement, normalizing the policy
    /// level to the canonical `SLSA_BUILD_LEVEL_n` form.
    ///
    /// # Errors
    ///
    /// `InvalidPredicate` for a non-VSA predicate type,
    /// `InvalidDssePayload` when the predicate does not deserialize,
    /// `InvalidVsaLevel` for an unrecognized policy level.
    pub fn from_statement(statement: &Statement) -> Result<Self> {
        if statement.predicate_type != PREDICATE_VSA_V02 {
            return Err(VerifyError::InvalidPredicate(
                statement.predicate_type.clone(),
            ));
        }
        let mut predicate: Self = serde_json::from_value(statement.predicate.clone())
            .map_err(|e| VerifyError::InvalidDssePayload(format!("VSA predicate: {e}")))?;
        predicate.policy_level = normalize_policy_level(&predicate.policy_level)?;
        Ok(predicate)
    }

    /// Verify the caller's expected levels against the policy level.
    ///
    /// Exactly one expected level is supported; its track must match the
    /// predicate's, and the predicate level must not be lower.
    ///
    /// # Errors
    ///
    /// `InvalidVsaLevel` for a malformed set, `MismatchVsaLevel` for a
    /// track mismatch or an insufficient level.
    pub fn verify_levels(&self, expected_levels: &[Level]) -> Result<()> {
        let predicate_level: Level = self.policy_level.parse()?;
        if expected_levels.len() != 1 {
            return Err(VerifyError::InvalidVsaLevel(format!(
                "a single track level is supported, {} provided",
                expected_levels.len()
            )));
        }
        let expected = &expected_levels[0];
        if expected.track() != predicate_level.track() {
            return Err(VerifyError::MismatchVsaLevel(format!(
                "expected {} track, got {} track",
                expected.track(),
                predicate_level.track()
            )));
        }
        if predicate_level.lower_than(expected) {
            return Err(VerifyError::MismatchVsaLevel(format!(
                "expected level {expected}, got {}",
                self.policy_level
            )));
        }
        Ok(())
    }
}
