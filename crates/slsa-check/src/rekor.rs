//! Transparency-log entries and their verification.
//!
//! The HTTP transport is an external collaborator behind [`LogClient`];
//! the engine verifies whatever entry the client returns: the RFC 6962
//! Merkle inclusion proof, the signed entry timestamp, and the bracketing
//! of the signing certificate's validity around the integrated time.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::crypto::DsseVerifier;
use crate::digest::{hex_decode, hex_encode};
use crate::dsse::Envelope;
use crate::error::{Result, VerifyError};
use crate::options::Context;
use crate::trust_root::TrustRoot;
use crate::x509::SigningCertificate;

/// A transparency-log entry as returned by a log client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    /// Base64-encoded canonical entry body.
    pub body: String,
    /// Unix time the log integrated the entry.
    pub integrated_time: i64,
    /// Identifier of the log shard that holds the entry.
    #[serde(rename = "logID")]
    pub log_id: String,
    /// Index of the entry within the log.
    pub log_index: i64,
    /// Inclusion proof and signed entry timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<LogEntryVerification>,
}

/// Verification material attached to a log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntryVerification {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inclusion_proof: Option<InclusionProof>,
    /// Base64-encoded signature over the canonical entry metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signed_entry_timestamp: Option<String>,
}

/// RFC 6962 Merkle inclusion proof.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InclusionProof {
    /// Index of the leaf in the tree the proof was computed against.
    pub log_index: i64,
    /// Hex-encoded root hash of that tree.
    pub root_hash: String,
    /// Size of that tree.
    pub tree_size: i64,
    /// Hex-encoded sibling hashes, leaf to root.
    pub hashes: Vec<String>,
}

/// Looks up the log entry for an envelope/artifact pair.
///
/// Implementations own transport concerns; the reference HTTP client
/// retries transport errors three times.
pub trait LogClient: Send + Sync {
    /// Find the inclusion record for the envelope.
    ///
    /// # Errors
    ///
    /// Implementation-defined; transport failures are retryable by the
    /// caller.
    fn find_entry(
        &self,
        ctx: &Context,
        envelope: &Envelope,
        artifact_hash: &str,
    ) -> Result<LogEntry>;
}

/// A log client that serves an entry carried inline (offline bundles).
#[derive(Debug, Clone)]
pub struct OfflineLogClient {
    entry: LogEntry,
}

impl OfflineLogClient {
    #[must_use]
    pub fn new(entry: LogEntry) -> Self {
        Self { entry }
    }
}

impl LogClient for OfflineLogClient {
    fn find_entry(
        &self,
        ctx: &Context,
        _envelope: &Envelope,
        _artifact_hash: &str,
    ) -> Result<LogEntry> {
        ctx.ensure_active()?;
        Ok(self.entry.clone())
    }
}

/// An envelope together with its verified log context and signing cert.
#[derive(Debug, Clone)]
pub struct SignedAttestation {
    pub envelope: Envelope,
    pub signing_cert: SigningCertificate,
    pub log_entry: Option<LogEntry>,
}

/// Build a [`SignedAttestation`] from an envelope via the log.
///
/// Looks up the entry, verifies the inclusion proof and the signed entry
/// timestamp against the trust root's Rekor keys, extracts the embedded
/// signing certificate, and checks that the entry's integrated time falls
/// inside the certificate's validity window.
///
/// # Errors
///
/// `NoValidSignature` for any log or certificate-window failure.
pub fn signed_attestation(
    ctx: &Context,
    client: &dyn LogClient,
    trust_root: &TrustRoot,
    envelope: &Envelope,
    artifact_hash: &str,
) -> Result<SignedAttestation> {
    ctx.ensure_active()?;
    let entry = client.find_entry(ctx, envelope, artifact_hash)?;
    verify_inclusion(&entry)?;
    verify_signed_entry_timestamp(&entry, trust_root)?;

    let cert_pem = envelope.signing_cert_pem().ok_or_else(|| {
        VerifyError::NoValidSignature("envelope carries no signing certificate".to_string())
    })?;
    let signing_cert = SigningCertificate::from_pem(cert_pem)?;
    if !signing_cert.validity_contains(entry.integrated_time) {
        return Err(VerifyError::NoValidSignature(format!(
            "integrated time {} outside certificate validity",
            entry.integrated_time
        )));
    }
    tracing::debug!(index = entry.log_index, "verified signature against tlog entry");
    Ok(SignedAttestation {
        envelope: envelope.clone(),
        signing_cert,
        log_entry: Some(entry),
    })
}

/// Verify the entry's RFC 6962 inclusion proof.
///
/// # Errors
///
/// `NoValidSignature` when the proof is absent or does not reproduce the
/// root hash.
pub fn verify_inclusion(entry: &LogEntry) -> Result<()> {
    let proof = entry
        .verification
        .as_ref()
        .and_then(|v| v.inclusion_proof.as_ref())
        .ok_or_else(|| {
            VerifyError::NoValidSignature("log entry has no inclusion proof".to_string())
        })?;
    let body = BASE64
        .decode(&entry.body)
        .map_err(|e| VerifyError::NoValidSignature(format!("decode entry body: {e}")))?;
    let leaf_hash = leaf_hash(&body);
    let root = hex_decode(&proof.root_hash)
        .map_err(|e| e.context("inclusion proof root hash"))?;
    let mut hashes = Vec::with_capacity(proof.hashes.len());
    for h in &proof.hashes {
        hashes.push(hex_decode(h).map_err(|e| e.context("inclusion proof hash"))?);
    }
    let computed = root_from_inclusion_proof(
        proof.log_index as u64,
        proof.tree_size as u64,
        &leaf_hash,
        &hashes,
    )?;
    if computed != root {
        return Err(VerifyError::NoValidSignature(format!(
            "inclusion proof root mismatch: computed {}, log says {}",
            hex_encode(&computed),
            proof.root_hash
        )));
    }
    Ok(())
}

/// Verify the signed entry timestamp against the trust root's Rekor keys.
///
/// The signature covers the canonical JSON of
/// `{body, integratedTime, logID, logIndex}` with keys in lexicographic
/// order.
///
/// # Errors
///
/// `NoValidSignature` when the timestamp is absent or no Rekor key
/// verifies it.
pub fn verify_signed_entry_timestamp(entry: &LogEntry, trust_root: &TrustRoot) -> Result<()> {
    let set_b64 = entry
        .verification
        .as_ref()
        .and_then(|v| v.signed_entry_timestamp.as_deref())
        .ok_or_else(|| {
            VerifyError::NoValidSignature("log entry has no signed entry timestamp".to_string())
        })?;
    let signature = BASE64
        .decode(set_b64)
        .map_err(|e| VerifyError::NoValidSignature(format!("decode SET: {e}")))?;
    let message = canonical_entry_json(entry);

    // Prefer the key matching the entry's log ID, fall back to any key.
    let mut keys: Vec<_> = trust_root
        .rekor_keys
        .iter()
        .filter(|k| k.keyid == entry.log_id)
        .collect();
    if keys.is_empty() {
        keys = trust_root.rekor_keys.iter().collect();
    }
    for key in keys {
        if key.key.verify(message.as_bytes(), &signature).is_ok() {
            return Ok(());
        }
    }
    Err(VerifyError::NoValidSignature(
        "signed entry timestamp did not verify against any Rekor key".to_string(),
    ))
}

/// Canonical JSON the signed entry timestamp covers.
fn canonical_entry_json(entry: &LogEntry) -> String {
    // serde_json maps are ordered; the canonical key order
    // (body, integratedTime, logID, logIndex) is lexicographic.
    serde_json::json!({
        "body": entry.body,
        "integratedTime": entry.integrated_time,
        "logID": entry.log_id,
        "logIndex": entry.log_index,
    })
    .to_string()
}

/// RFC 6962 leaf hash: `SHA-256(0x00 || data)`.
#[must_use]
pub fn leaf_hash(data: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update([0x00]);
    hasher.update(data);
    hasher.finalize().to_vec()
}

fn node_hash(left: &[u8], right: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update([0x01]);
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().to_vec()
}

/// Recompute the tree root from a leaf and its inclusion path (RFC 6962).
fn root_from_inclusion_proof(
    leaf_index: u64,
    tree_size: u64,
    leaf_hash: &[u8],
    proof: &[Vec<u8>],
) -> Result<Vec<u8>> {
    if tree_size == 0 || leaf_index >= tree_size {
        return Err(VerifyError::NoValidSignature(format!(
            "leaf index {leaf_index} outside tree of size {tree_size}"
        )));
    }
    let mut fnode = leaf_index;
    let mut snode = tree_size - 1;
    let mut hash = leaf_hash.to_vec();
    for p in proof {
        if snode == 0 {
            return Err(VerifyError::NoValidSignature(
                "inclusion proof has extra hashes".to_string(),
            ));
        }
        if fnode % 2 == 1 || fnode == snode {
            hash = node_hash(p, &hash);
            if fnode % 2 == 0 {
                while fnode % 2 == 0 && fnode != 0 {
                    fnode >>= 1;
                    snode >>= 1;
                }
            }
        } else {
            hash = node_hash(&hash, p);
        }
        fnode >>= 1;
        snode >>= 1;
    }
    if snode != 0 {
        return Err(VerifyError::NoValidSignature(
            "inclusion proof has too few hashes".to_string(),
        ));
    }
    Ok(hash)
}
