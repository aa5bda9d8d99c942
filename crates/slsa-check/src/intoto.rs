//! in-toto attestation statements.
//!
//! Both statement generations are accepted: `v0.1` (as produced by older
//! SLSA builders and Google Cloud Build) and `v1`. The predicate is kept
//! as raw JSON here; each verifier decodes it into its own typed schema
//! keyed on `predicateType`.
//!
//! # References
//!
//! - [In-toto Statement](https://github.com/in-toto/attestation/blob/main/spec/v1/statement.md)

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::dsse::{Envelope, INTOTO_PAYLOAD_TYPE};
use crate::error::{Result, VerifyError};

/// Statement type URI for in-toto v0.1.
pub const STATEMENT_TYPE_V01: &str = "https://in-toto.io/Statement/v0.1";

/// Statement type URI for in-toto v1.
pub const STATEMENT_TYPE_V1: &str = "https://in-toto.io/Statement/v1";

/// An in-toto attestation statement (v0.1 or v1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Statement {
    /// Statement type URI.
    #[serde(rename = "_type")]
    pub statement_type: String,
    /// Artifacts being attested.
    pub subject: Vec<Subject>,
    /// Predicate type URI.
    #[serde(rename = "predicateType")]
    pub predicate_type: String,
    /// Predicate content, decoded by the owning verifier.
    #[serde(default)]
    pub predicate: serde_json::Value,
}

/// A single subject in an in-toto statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subject {
    /// Name of the artifact.
    #[serde(default)]
    pub name: String,
    /// Digest algorithm to lowercase hex value.
    pub digest: BTreeMap<String, String>,
}

impl Statement {
    /// Parse a statement from decoded payload bytes.
    ///
    /// # Errors
    ///
    /// Returns `VerifyError::InvalidDssePayload` on malformed JSON or a
    /// structurally invalid statement.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let stmt: Self = serde_json::from_slice(bytes)
            .map_err(|e| VerifyError::InvalidDssePayload(format!("parse statement: {e}")))?;
        stmt.validate()?;
        Ok(stmt)
    }

    fn validate(&self) -> Result<()> {
        if self.statement_type != STATEMENT_TYPE_V01 && self.statement_type != STATEMENT_TYPE_V1 {
            return Err(VerifyError::InvalidDssePayload(format!(
                "unexpected statement type: {:?}",
                self.statement_type
            )));
        }
        if self.subject.is_empty() {
            return Err(VerifyError::InvalidDssePayload("no subjects".to_string()));
        }
        for subject in &self.subject {
            for (alg, value) in &subject.digest {
                if value.is_empty() || !value.bytes().all(|b| b.is_ascii_hexdigit()) {
                    return Err(VerifyError::InvalidDssePayload(format!(
                        "subject {:?} has non-hex {alg} digest",
                        subject.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Check that some subject carries the expected sha256 digest.
    ///
    /// # Errors
    ///
    /// `InvalidDssePayload` when a subject lacks a sha256 digest entirely,
    /// `MismatchHash` when no subject digest equals `expected`.
    pub fn verify_subject_digest(&self, expected: &str) -> Result<()> {
        for subject in &self.subject {
            let hash = subject
                .digest
                .get("sha256")
                .ok_or_else(|| {
                    VerifyError::InvalidDssePayload("no sha256 subject digest".to_string())
                })?;
            if hash.as_str() == expected {
                return Ok(());
            }
        }
        Err(VerifyError::MismatchHash(format!(
            "expected hash {expected:?} not found in subjects"
        )))
    }
}

/// Extract and validate the statement from a DSSE envelope.
///
/// The envelope's signature must already have been verified; this function
/// only decodes.
///
/// # Errors
///
/// `InvalidDssePayload` when the payload type is not in-toto or the
/// statement fails to parse.
pub fn statement_from_envelope(envelope: &Envelope) -> Result<Statement> {
    if envelope.payload_type != INTOTO_PAYLOAD_TYPE {
        return Err(VerifyError::InvalidDssePayload(format!(
            "expected payload type {INTOTO_PAYLOAD_TYPE:?}, got {:?}",
            envelope.payload_type
        )));
    }
    let payload = envelope.decode_payload()?;
    Statement::from_bytes(&payload)
}
