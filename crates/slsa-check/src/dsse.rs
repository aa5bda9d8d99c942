//! DSSE (Dead Simple Signing Envelope) parsing and PAE construction.
//!
//! # References
//!
//! - [DSSE protocol](https://github.com/secure-systems-lab/dsse/blob/master/protocol.md)

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::{Result, VerifyError};

/// The payload type carried by in-toto attestation envelopes.
pub const INTOTO_PAYLOAD_TYPE: &str = "application/vnd.in-toto+json";

/// A DSSE envelope.
///
/// The payload is the base64-encoded wire form; signatures are computed
/// over `PAE(payloadType, payload)` where `payload` is the wire form
/// (see [`pae`]), or over the decoded payload for legacy signers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// MIME type of the payload (e.g. `application/vnd.in-toto+json`).
    #[serde(rename = "payloadType")]
    pub payload_type: String,
    /// Base64-encoded payload.
    pub payload: String,
    /// One or more signatures.
    pub signatures: Vec<EnvelopeSignature>,
}

/// A single signature within a DSSE envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvelopeSignature {
    /// Key identifier (not authenticated by DSSE).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub keyid: String,
    /// Base64-encoded signature bytes.
    pub sig: String,
    /// Optional PEM-encoded signing certificate (Sigstore-style envelopes).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert: Option<String>,
}

impl Envelope {
    /// Parse an envelope from raw JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns `VerifyError::InvalidDssePayload` on malformed JSON or a
    /// structurally invalid envelope.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let envelope: Self = serde_json::from_slice(bytes)
            .map_err(|e| VerifyError::InvalidDssePayload(format!("parse envelope: {e}")))?;
        envelope.validate()?;
        Ok(envelope)
    }

    /// Structural validation: non-empty payload type, payload, signatures.
    pub fn validate(&self) -> Result<()> {
        if self.payload_type.is_empty() {
            return Err(VerifyError::InvalidDssePayload(
                "empty payloadType".to_string(),
            ));
        }
        if self.payload.is_empty() {
            return Err(VerifyError::InvalidDssePayload("empty payload".to_string()));
        }
        if self.signatures.is_empty() {
            return Err(VerifyError::InvalidDssePayload(
                "no signatures".to_string(),
            ));
        }
        Ok(())
    }

    /// Decode the base64 payload.
    ///
    /// # Errors
    ///
    /// Returns `VerifyError::InvalidDssePayload` if the payload is not
    /// valid base64.
    pub fn decode_payload(&self) -> Result<Vec<u8>> {
        BASE64
            .decode(&self.payload)
            .map_err(|e| VerifyError::InvalidDssePayload(format!("decode payload: {e}")))
    }

    /// The first signature carrying an embedded certificate, if any.
    #[must_use]
    pub fn signing_cert_pem(&self) -> Option<&str> {
        self.signatures
            .iter()
            .find_map(|s| s.cert.as_deref())
            .filter(|c| !c.is_empty())
    }
}

impl EnvelopeSignature {
    /// Decode the base64 signature bytes.
    ///
    /// # Errors
    ///
    /// Returns `VerifyError::InvalidDssePayload` on invalid base64.
    pub fn decode_sig(&self) -> Result<Vec<u8>> {
        BASE64
            .decode(&self.sig)
            .map_err(|e| VerifyError::InvalidDssePayload(format!("decode signature: {e}")))
    }
}

/// Decode the payload of an envelope.
///
/// # Errors
///
/// See [`Envelope::decode_payload`].
pub fn payload_from_envelope(envelope: &Envelope) -> Result<Vec<u8>> {
    envelope.decode_payload()
}

/// Compute the DSSE Pre-Authentication Encoding.
///
/// ```text
/// PAE(type, body) = "DSSEv1" + SP + LEN(type) + SP + type + SP + LEN(body) + SP + body
/// ```
///
/// `SP` is ASCII space (0x20) and `LEN(s)` is the decimal byte length.
/// Callers pass the envelope's base64 payload string as `body`: signers in
/// this ecosystem sign the wire form, not the decoded bytes.
#[must_use]
pub fn pae(payload_type: &str, payload: &[u8]) -> Vec<u8> {
    let header = format!(
        "DSSEv1 {} {} {} ",
        payload_type.len(),
        payload_type,
        payload.len()
    );
    let mut out = Vec::with_capacity(header.len() + payload.len());
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(payload);
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sample_envelope_json() -> String {
        serde_json::json!({
            "payloadType": INTOTO_PAYLOAD_TYPE,
            "payload": BASE64.encode(b"{\"hello\":\"world\"}"),
            "signatures": [{ "keyid": "key-1", "sig": BASE64.encode(b"fake") }]
        })
        .to_string()
    }

    // -----------------------------------------------------------------------
    // PAE
    // -----------------------------------------------------------------------

    #[test]
    fn pae_spec_test_vector() {
        // From the DSSE spec.
        let result = pae("http://example.com/HelloWorld", b"hello world");
        assert_eq!(
            result,
            b"DSSEv1 29 http://example.com/HelloWorld 11 hello world".to_vec()
        );
    }

    #[test]
    fn pae_empty_payload() {
        assert_eq!(pae("type", b""), b"DSSEv1 4 type 0 ".to_vec());
    }

    // -----------------------------------------------------------------------
    // Envelope
    // -----------------------------------------------------------------------

    #[test]
    fn envelope_parse_valid() {
        let env = Envelope::from_bytes(sample_envelope_json().as_bytes()).unwrap();
        assert_eq!(env.payload_type, INTOTO_PAYLOAD_TYPE);
        assert_eq!(env.signatures.len(), 1);
        assert_eq!(env.signatures[0].keyid, "key-1");
    }

    #[test]
    fn envelope_parse_invalid_json() {
        let err = Envelope::from_bytes(b"not json").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidDssePayload);
    }

    #[test]
    fn envelope_no_signatures() {
        let json = serde_json::json!({
            "payloadType": INTOTO_PAYLOAD_TYPE,
            "payload": "dGVzdA==",
            "signatures": []
        })
        .to_string();
        let err = Envelope::from_bytes(json.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("no signatures"));
    }

    #[test]
    fn envelope_empty_payload() {
        let json = serde_json::json!({
            "payloadType": INTOTO_PAYLOAD_TYPE,
            "payload": "",
            "signatures": [{"sig": "aaaa"}]
        })
        .to_string();
        assert!(Envelope::from_bytes(json.as_bytes()).is_err());
    }

    #[test]
    fn envelope_decode_payload() {
        let env = Envelope::from_bytes(sample_envelope_json().as_bytes()).unwrap();
        assert_eq!(env.decode_payload().unwrap(), b"{\"hello\":\"world\"}");
    }

    #[test]
    fn envelope_decode_invalid_base64() {
        let json = serde_json::json!({
            "payloadType": INTOTO_PAYLOAD_TYPE,
            "payload": "!!!not-base64!!!",
            "signatures": [{"sig": "aaaa"}]
        })
        .to_string();
        let env = Envelope::from_bytes(json.as_bytes()).unwrap();
        assert!(env.decode_payload().is_err());
    }

    #[test]
    fn signing_cert_pem_skips_signatures_without_cert() {
        let json = serde_json::json!({
            "payloadType": INTOTO_PAYLOAD_TYPE,
            "payload": "dGVzdA==",
            "signatures": [
                { "sig": "aaaa" },
                { "sig": "bbbb", "cert": "-----BEGIN CERTIFICATE-----..." }
            ]
        })
        .to_string();
        let env = Envelope::from_bytes(json.as_bytes()).unwrap();
        assert!(env.signing_cert_pem().unwrap().starts_with("-----BEGIN"));
    }

    #[test]
    fn envelope_serde_round_trip() {
        let env = Envelope::from_bytes(sample_envelope_json().as_bytes()).unwrap();
        let json = serde_json::to_string(&env).unwrap();
        let reparsed = Envelope::from_bytes(json.as_bytes()).unwrap();
        assert_eq!(reparsed.payload, env.payload);
        assert_eq!(reparsed.payload_type, env.payload_type);
    }
}
