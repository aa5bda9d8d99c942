//! Trusted-key DSSE signature verification.
//!
//! Keys are SPKI-encoded public keys identified by `keyid`. An envelope
//! verifies when any one of its signatures verifies against the key that
//! matches its `keyid`; only when every signature fails is
//! `NoValidSignature` returned.

use aws_lc_rs::signature::{
    UnparsedPublicKey, ECDSA_P256_SHA256_ASN1, ECDSA_P384_SHA384_ASN1, ED25519,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use der::asn1::ObjectIdentifier;
use der::{Decode, Encode};
use x509_cert::spki::SubjectPublicKeyInfoOwned;

use crate::dsse::{pae, Envelope};
use crate::error::{Result, VerifyError};

const OID_EC_PUBLIC_KEY: &str = "1.2.840.10045.2.1";
const OID_SECP256R1: &str = "1.2.840.10045.3.1.7";
const OID_SECP384R1: &str = "1.3.132.0.34";
const OID_ED25519: &str = "1.3.101.112";

/// Supported public key algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAlgorithm {
    EcdsaP256,
    EcdsaP384,
    Ed25519,
}

/// How the signed message is derived from the envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureEncoding {
    /// `PAE(payloadType, payload)` over the base64 wire-form payload.
    Pae,
    /// Legacy signers sign the decoded payload bytes directly.
    DirectPayload,
}

/// A public key usable for signature verification.
#[derive(Debug, Clone)]
pub struct VerificationKey {
    algorithm: KeyAlgorithm,
    /// Raw key material: uncompressed EC point or 32-byte Ed25519 key.
    raw: Vec<u8>,
}

impl VerificationKey {
    /// Parse a key from SPKI DER bytes.
    ///
    /// # Errors
    ///
    /// Returns `VerifyError::InvalidFormat` for malformed SPKI or an
    /// unsupported algorithm.
    pub fn from_spki_der(spki_der: &[u8]) -> Result<Self> {
        let spki = SubjectPublicKeyInfoOwned::from_der(spki_der)
            .map_err(|e| VerifyError::InvalidFormat(format!("parse SPKI: {e}")))?;
        let raw = spki
            .subject_public_key
            .as_bytes()
            .ok_or_else(|| VerifyError::InvalidFormat("SPKI key has unused bits".to_string()))?
            .to_vec();
        let algorithm = match spki.algorithm.oid.to_string().as_str() {
            OID_EC_PUBLIC_KEY => {
                let params = spki.algorithm.parameters.as_ref().ok_or_else(|| {
                    VerifyError::InvalidFormat("EC key missing curve parameters".to_string())
                })?;
                let der = params
                    .to_der()
                    .map_err(|e| VerifyError::InvalidFormat(format!("curve parameters: {e}")))?;
                let curve = ObjectIdentifier::from_der(&der)
                    .map_err(|e| VerifyError::InvalidFormat(format!("curve OID: {e}")))?;
                match curve.to_string().as_str() {
                    OID_SECP256R1 => KeyAlgorithm::EcdsaP256,
                    OID_SECP384R1 => KeyAlgorithm::EcdsaP384,
                    other => {
                        return Err(VerifyError::InvalidFormat(format!(
                            "unsupported EC curve: {other}"
                        )))
                    }
                }
            }
            OID_ED25519 => KeyAlgorithm::Ed25519,
            other => {
                return Err(VerifyError::InvalidFormat(format!(
                    "unsupported key algorithm: {other}"
                )))
            }
        };
        Ok(Self { algorithm, raw })
    }

    /// Parse a key from a PEM-encoded `PUBLIC KEY` block.
    ///
    /// # Errors
    ///
    /// Returns `VerifyError::InvalidFormat` on invalid PEM or SPKI.
    pub fn from_pem(pem: &str) -> Result<Self> {
        let der = pem_to_der(pem)
            .ok_or_else(|| VerifyError::InvalidFormat("invalid PEM public key".to_string()))?;
        Self::from_spki_der(&der)
    }

    /// The key algorithm.
    #[must_use]
    pub fn algorithm(&self) -> KeyAlgorithm {
        self.algorithm
    }

    /// Raw key material: uncompressed EC point or 32-byte Ed25519 key.
    #[must_use]
    pub fn raw_bytes(&self) -> &[u8] {
        &self.raw
    }

    /// Verify `signature` over `message`.
    ///
    /// # Errors
    ///
    /// Returns `VerifyError::NoValidSignature` when verification fails.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<()> {
        let alg: &'static dyn aws_lc_rs::signature::VerificationAlgorithm = match self.algorithm {
            KeyAlgorithm::EcdsaP256 => &ECDSA_P256_SHA256_ASN1,
            KeyAlgorithm::EcdsaP384 => &ECDSA_P384_SHA384_ASN1,
            KeyAlgorithm::Ed25519 => &ED25519,
        };
        UnparsedPublicKey::new(alg, &self.raw)
            .verify(message, signature)
            .map_err(|_| VerifyError::NoValidSignature("signature verification failed".to_string()))
    }
}

/// A verification key bound to its `keyid`.
#[derive(Debug, Clone)]
pub struct TrustedKey {
    pub keyid: String,
    pub key: VerificationKey,
}

impl TrustedKey {
    /// Build a trusted key from a PEM public key.
    ///
    /// # Errors
    ///
    /// See [`VerificationKey::from_pem`].
    pub fn from_pem(keyid: &str, pem: &str) -> Result<Self> {
        Ok(Self {
            keyid: keyid.to_string(),
            key: VerificationKey::from_pem(pem)?,
        })
    }
}

/// Verifies DSSE envelopes against a set of trusted keys.
#[derive(Debug, Clone)]
pub struct DsseVerifier {
    keys: Vec<TrustedKey>,
}

impl DsseVerifier {
    #[must_use]
    pub fn new(keys: Vec<TrustedKey>) -> Self {
        Self { keys }
    }

    /// Verify the envelope's signatures, succeeding on the first match.
    ///
    /// A signature is only tried against keys whose `keyid` equals the
    /// signature's `keyid`; a signature without a `keyid` is tried against
    /// every key.
    ///
    /// # Errors
    ///
    /// Returns `VerifyError::NoValidSignature` when every signature fails,
    /// or a payload decoding error for `DirectPayload` envelopes.
    pub fn verify(&self, envelope: &Envelope, encoding: SignatureEncoding) -> Result<()> {
        envelope.validate()?;
        let message = match encoding {
            SignatureEncoding::Pae => pae(&envelope.payload_type, envelope.payload.as_bytes()),
            SignatureEncoding::DirectPayload => envelope.decode_payload()?,
        };
        for signature in &envelope.signatures {
            let Ok(sig_bytes) = signature.decode_sig() else {
                continue;
            };
            for trusted in self.candidates(&signature.keyid) {
                if trusted.key.verify(&message, &sig_bytes).is_ok() {
                    tracing::debug!(keyid = %trusted.keyid, "envelope signature verified");
                    return Ok(());
                }
            }
        }
        Err(VerifyError::NoValidSignature(
            "no signature verified against any trusted key".to_string(),
        ))
    }

    fn candidates<'a>(&'a self, keyid: &'a str) -> impl Iterator<Item = &'a TrustedKey> {
        self.keys
            .iter()
            .filter(move |k| keyid.is_empty() || k.keyid == keyid)
    }
}

/// Decode the first PEM block in `pem` to DER bytes.
#[must_use]
pub fn pem_to_der(pem: &str) -> Option<Vec<u8>> {
    let mut body = String::new();
    let mut in_block = false;
    for line in pem.lines() {
        let line = line.trim();
        if line.starts_with("-----BEGIN ") {
            in_block = true;
            continue;
        }
        if line.starts_with("-----END ") {
            break;
        }
        if in_block {
            body.push_str(line);
        }
    }
    if body.is_empty() {
        return None;
    }
    BASE64.decode(body).ok()
}

/// Encode DER bytes as a PEM block with the given label.
#[must_use]
pub fn der_to_pem(der: &[u8], label: &str) -> String {
    let b64 = BASE64.encode(der);
    let mut out = format!("-----BEGIN {label}-----\n");
    for chunk in b64.as_bytes().chunks(64) {
        out.push_str(std::str::from_utf8(chunk).unwrap_or_default());
        out.push('\n');
    }
    out.push_str(&format!("-----END {label}-----\n"));
    out
}

/// Wrap a raw uncompressed P-256 point in an SPKI header.
#[must_use]
pub fn encode_p256_spki(point: &[u8]) -> Vec<u8> {
    const HEADER: [u8; 26] = [
        0x30, 0x59, 0x30, 0x13, 0x06, 0x07, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x02, 0x01, 0x06, 0x08,
        0x2a, 0x86, 0x48, 0xce, 0x3d, 0x03, 0x01, 0x07, 0x03, 0x42, 0x00,
    ];
    let mut out = HEADER.to_vec();
    out.extend_from_slice(point);
    out
}

/// Wrap a raw 32-byte Ed25519 public key in an SPKI header.
#[must_use]
pub fn encode_ed25519_spki(raw: &[u8]) -> Vec<u8> {
    const HEADER: [u8; 12] = [
        0x30, 0x2a, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, 0x03, 0x21, 0x00,
    ];
    let mut out = HEADER.to_vec();
    out.extend_from_slice(raw);
    out
}
