//! X.509 certificate handling for Sigstore-issued signing certificates.
//!
//! Parses DER/PEM certificates, extracts the subject public key and
//! UTF-8 extension values, and walks the chain from an ephemeral leaf to a
//! Fulcio root through the trust root's intermediates.

use aws_lc_rs::signature::{
    UnparsedPublicKey, ECDSA_P256_SHA256_ASN1, ECDSA_P256_SHA384_ASN1, ECDSA_P384_SHA384_ASN1,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use der::{Decode, Encode};
use x509_cert::ext::pkix::name::GeneralName;
use x509_cert::ext::pkix::SubjectAltName;
use x509_cert::Certificate;

use crate::crypto::{pem_to_der, KeyAlgorithm, VerificationKey};
use crate::error::{Result, VerifyError};

const OID_ECDSA_WITH_SHA256: &str = "1.2.840.10045.4.3.2";
const OID_ECDSA_WITH_SHA384: &str = "1.2.840.10045.4.3.3";
const OID_SUBJECT_ALT_NAME: &str = "2.5.29.17";

/// A parsed signing certificate together with its DER encoding.
#[derive(Debug, Clone)]
pub struct SigningCertificate {
    cert: Certificate,
    der: Vec<u8>,
}

impl SigningCertificate {
    /// Parse a certificate from DER bytes.
    ///
    /// # Errors
    ///
    /// `InvalidFormat` on malformed DER.
    pub fn from_der(der_bytes: &[u8]) -> Result<Self> {
        let cert = Certificate::from_der(der_bytes)
            .map_err(|e| VerifyError::InvalidFormat(format!("parse certificate: {e}")))?;
        Ok(Self {
            cert,
            der: der_bytes.to_vec(),
        })
    }

    /// Parse a certificate from a PEM `CERTIFICATE` block.
    ///
    /// # Errors
    ///
    /// `InvalidFormat` on invalid PEM or DER.
    pub fn from_pem(pem: &str) -> Result<Self> {
        let der = pem_to_der(pem)
            .ok_or_else(|| VerifyError::InvalidFormat("invalid certificate PEM".to_string()))?;
        Self::from_der(&der)
    }

    /// Parse a certificate from base64-encoded DER.
    ///
    /// # Errors
    ///
    /// `InvalidFormat` on invalid base64 or DER.
    pub fn from_base64_der(b64: &str) -> Result<Self> {
        let der = BASE64
            .decode(b64.trim())
            .map_err(|e| VerifyError::InvalidFormat(format!("decode certificate: {e}")))?;
        Self::from_der(&der)
    }

    /// The DER encoding this certificate was parsed from.
    #[must_use]
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// The certificate's subject public key.
    ///
    /// # Errors
    ///
    /// `InvalidFormat` for unsupported key algorithms.
    pub fn subject_key(&self) -> Result<VerificationKey> {
        let spki = self
            .cert
            .tbs_certificate
            .subject_public_key_info
            .to_der()
            .map_err(|e| VerifyError::InvalidFormat(format!("encode SPKI: {e}")))?;
        VerificationKey::from_spki_der(&spki)
    }

    /// DER-encoded subject name, for issuer/subject linkage.
    fn subject_der(&self) -> Result<Vec<u8>> {
        self.cert
            .tbs_certificate
            .subject
            .to_der()
            .map_err(|e| VerifyError::InvalidFormat(format!("encode subject: {e}")))
    }

    /// DER-encoded issuer name.
    fn issuer_der(&self) -> Result<Vec<u8>> {
        self.cert
            .tbs_certificate
            .issuer
            .to_der()
            .map_err(|e| VerifyError::InvalidFormat(format!("encode issuer: {e}")))
    }

    /// Whether `unix_ts` falls inside the certificate validity window.
    #[must_use]
    pub fn validity_contains(&self, unix_ts: i64) -> bool {
        let validity = &self.cert.tbs_certificate.validity;
        let not_before = validity.not_before.to_unix_duration().as_secs() as i64;
        let not_after = validity.not_after.to_unix_duration().as_secs() as i64;
        not_before <= unix_ts && unix_ts <= not_after
    }

    /// The value of a UTF-8 string extension, by dotted OID.
    ///
    /// Tries a DER-encoded `UTF8String` first, then raw UTF-8 bytes (the
    /// encoding of older Fulcio extension values).
    #[must_use]
    pub fn extension_utf8(&self, oid: &str) -> Option<String> {
        let extensions = self.cert.tbs_certificate.extensions.as_ref()?;
        for ext in extensions {
            if ext.extn_id.to_string() == oid {
                return decode_utf8_extension(ext.extn_value.as_bytes());
            }
        }
        None
    }

    /// The first URI in the subject alternative name extension.
    #[must_use]
    pub fn san_uri(&self) -> Option<String> {
        let extensions = self.cert.tbs_certificate.extensions.as_ref()?;
        for ext in extensions {
            if ext.extn_id.to_string() != OID_SUBJECT_ALT_NAME {
                continue;
            }
            let san = SubjectAltName::from_der(ext.extn_value.as_bytes()).ok()?;
            for name in san.0 {
                if let GeneralName::UniformResourceIdentifier(uri) = name {
                    return Some(uri.to_string());
                }
            }
        }
        None
    }

    /// Verify that `self` was signed by `issuer`'s key.
    ///
    /// # Errors
    ///
    /// `NoValidSignature` when the signature does not verify or the
    /// algorithm combination is unsupported.
    pub fn verify_signed_by(&self, issuer: &Self) -> Result<()> {
        let tbs = self
            .cert
            .tbs_certificate
            .to_der()
            .map_err(|e| VerifyError::InvalidFormat(format!("encode TBS: {e}")))?;
        let signature = self
            .cert
            .signature
            .as_bytes()
            .ok_or_else(|| VerifyError::InvalidFormat("certificate signature bits".to_string()))?;
        let issuer_key = issuer.subject_key()?;
        let sig_oid = self.cert.signature_algorithm.oid.to_string();
        let alg: &'static dyn aws_lc_rs::signature::VerificationAlgorithm =
            match (issuer_key.algorithm(), sig_oid.as_str()) {
                (KeyAlgorithm::EcdsaP256, OID_ECDSA_WITH_SHA256) => &ECDSA_P256_SHA256_ASN1,
                (KeyAlgorithm::EcdsaP256, OID_ECDSA_WITH_SHA384) => &ECDSA_P256_SHA384_ASN1,
                (KeyAlgorithm::EcdsaP384, OID_ECDSA_WITH_SHA384) => &ECDSA_P384_SHA384_ASN1,
                (alg, oid) => {
                    return Err(VerifyError::NoValidSignature(format!(
                        "unsupported signature algorithm {oid} for {alg:?} issuer key"
                    )))
                }
            };
        let raw = issuer_key.raw_bytes();
        UnparsedPublicKey::new(alg, raw)
            .verify(&tbs, signature)
            .map_err(|_| {
                VerifyError::NoValidSignature("certificate signature verification failed".to_string())
            })
    }
}

/// Walk the chain from `leaf` to one of `roots`, optionally through
/// `intermediates`.
///
/// # Errors
///
/// `NoValidSignature` when no path to a trusted root verifies.
pub fn verify_chain(
    leaf: &SigningCertificate,
    roots: &[SigningCertificate],
    intermediates: &[SigningCertificate],
) -> Result<()> {
    let leaf_issuer = leaf.issuer_der()?;
    for ca in intermediates.iter().chain(roots.iter()) {
        if ca.subject_der()? != leaf_issuer || leaf.verify_signed_by(ca).is_err() {
            continue;
        }
        // Direct issuance by a root.
        if roots.iter().any(|r| r.der == ca.der) {
            return Ok(());
        }
        // The issuer is an intermediate; it must itself chain to a root.
        let ca_issuer = ca.issuer_der()?;
        for root in roots {
            if root.subject_der()? == ca_issuer && ca.verify_signed_by(root).is_ok() {
                return Ok(());
            }
        }
    }
    Err(VerifyError::NoValidSignature(
        "certificate does not chain to a trusted root".to_string(),
    ))
}

/// Decode an X.509 extension value as a UTF-8 string.
fn decode_utf8_extension(value: &[u8]) -> Option<String> {
    if let Ok(s) = <der::asn1::Utf8StringRef<'_> as der::Decode>::from_der(value) {
        return Some(s.to_string());
    }
    std::str::from_utf8(value).ok().map(String::from)
}
