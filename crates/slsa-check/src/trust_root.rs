//! The process-wide Sigstore trust root.
//!
//! The trust root bundles Fulcio CA roots and intermediates, Rekor log
//! keys and CT-log keys. Distribution (the TUF updater) is an external
//! collaborator: the engine consumes an already-fetched bundle through
//! [`TrustRootProvider`] and caches the first successful fetch for the
//! process lifetime. A failed fetch leaves the cache empty so the next
//! caller re-attempts.

use std::sync::{Arc, Mutex, OnceLock};

use serde::Deserialize;

use crate::crypto::TrustedKey;
use crate::error::{Result, VerifyError};
use crate::options::Context;
use crate::x509::SigningCertificate;

/// Fulcio roots/intermediates plus Rekor and CT-log keys.
#[derive(Debug, Clone)]
pub struct TrustRoot {
    pub fulcio_roots: Vec<SigningCertificate>,
    pub fulcio_intermediates: Vec<SigningCertificate>,
    pub rekor_keys: Vec<TrustedKey>,
    pub ct_keys: Vec<TrustedKey>,
}

impl TrustRoot {
    /// Validate that the root is usable: at least one Fulcio root and one
    /// Rekor key.
    ///
    /// # Errors
    ///
    /// `InvalidFormat` when the bundle is empty.
    pub fn validate(&self) -> Result<()> {
        if self.fulcio_roots.is_empty() {
            return Err(VerifyError::InvalidFormat(
                "trust root has no Fulcio roots".to_string(),
            ));
        }
        if self.rekor_keys.is_empty() {
            return Err(VerifyError::InvalidFormat(
                "trust root has no Rekor keys".to_string(),
            ));
        }
        Ok(())
    }
}

/// Source of the trust root bundle.
pub trait TrustRootProvider: Send + Sync {
    /// Fetch the trust root. Blocking I/O is permitted; implementations
    /// check `ctx` before network access.
    fn fetch(&self, ctx: &Context) -> Result<TrustRoot>;
}

fn cache() -> &'static Mutex<Option<Arc<TrustRoot>>> {
    static CACHE: OnceLock<Mutex<Option<Arc<TrustRoot>>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(None))
}

/// Fetch the trust root once per process.
///
/// Concurrent callers serialize on the cache; exactly one fetch runs, and
/// its success is shared. On failure the cell stays empty and the error
/// propagates to this caller only; a later call re-attempts.
///
/// # Errors
///
/// Whatever the provider returns, or `InvalidFormat` for an empty bundle.
pub fn trust_root_singleton(
    ctx: &Context,
    provider: &dyn TrustRootProvider,
) -> Result<Arc<TrustRoot>> {
    let mut guard = cache()
        .lock()
        .map_err(|_| VerifyError::Internal("trust root cache poisoned".to_string()))?;
    if let Some(root) = guard.as_ref() {
        return Ok(Arc::clone(root));
    }
    ctx.ensure_active()?;
    let root = provider.fetch(ctx)?;
    root.validate()?;
    let root = Arc::new(root);
    *guard = Some(Arc::clone(&root));
    tracing::debug!(
        roots = root.fulcio_roots.len(),
        intermediates = root.fulcio_intermediates.len(),
        rekor_keys = root.rekor_keys.len(),
        "trust root initialized"
    );
    Ok(root)
}

/// Drop the cached trust root. Test-only: production code never clears it.
#[cfg(test)]
pub(crate) fn reset_singleton() {
    if let Ok(mut guard) = cache().lock() {
        *guard = None;
    }
}

/// JSON shape of an already-fetched trust root bundle on disk.
#[derive(Debug, Deserialize)]
struct TrustRootFile {
    #[serde(default)]
    fulcio_roots: Vec<String>,
    #[serde(default)]
    fulcio_intermediates: Vec<String>,
    #[serde(default)]
    rekor_keys: Vec<KeyEntry>,
    #[serde(default)]
    ct_keys: Vec<KeyEntry>,
}

#[derive(Debug, Deserialize)]
struct KeyEntry {
    keyid: String,
    public_key: String,
}

/// Loads a trust root from a JSON file produced by the distribution
/// tooling (PEM certificates and keys).
#[derive(Debug, Clone)]
pub struct FileTrustRootProvider {
    path: std::path::PathBuf,
}

impl FileTrustRootProvider {
    #[must_use]
    pub fn new(path: std::path::PathBuf) -> Self {
        Self { path }
    }
}

impl TrustRootProvider for FileTrustRootProvider {
    fn fetch(&self, ctx: &Context) -> Result<TrustRoot> {
        ctx.ensure_active()?;
        let data = std::fs::read_to_string(&self.path).map_err(|e| {
            VerifyError::Internal(format!("read trust root {}: {e}", self.path.display()))
        })?;
        parse_trust_root_json(&data)
    }
}

/// Parse the JSON trust root bundle format.
///
/// # Errors
///
/// `InvalidFormat` on malformed JSON, certificates, or keys.
pub fn parse_trust_root_json(json: &str) -> Result<TrustRoot> {
    let file: TrustRootFile = serde_json::from_str(json)
        .map_err(|e| VerifyError::InvalidFormat(format!("parse trust root: {e}")))?;
    let parse_certs = |pems: &[String]| -> Result<Vec<SigningCertificate>> {
        pems.iter().map(|p| SigningCertificate::from_pem(p)).collect()
    };
    let parse_keys = |entries: &[KeyEntry]| -> Result<Vec<TrustedKey>> {
        entries
            .iter()
            .map(|e| TrustedKey::from_pem(&e.keyid, &e.public_key))
            .collect()
    };
    Ok(TrustRoot {
        fulcio_roots: parse_certs(&file.fulcio_roots)?,
        fulcio_intermediates: parse_certs(&file.fulcio_intermediates)?,
        rekor_keys: parse_keys(&file.rekor_keys)?,
        ct_keys: parse_keys(&file.ct_keys)?,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::crypto::test_support::generate_p256;
    use crate::crypto::der_to_pem;
    use crate::x509::testcert::FULCIO_LEAF_B64;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sample_root() -> TrustRoot {
        let cert = SigningCertificate::from_base64_der(FULCIO_LEAF_B64).unwrap();
        let key = generate_p256();
        TrustRoot {
            fulcio_roots: vec![cert],
            fulcio_intermediates: vec![],
            rekor_keys: vec![TrustedKey::from_pem("rekor", &key.public_pem).unwrap()],
            ct_keys: vec![],
        }
    }

    struct CountingProvider {
        calls: AtomicUsize,
        fail_first: bool,
    }

    impl TrustRootProvider for CountingProvider {
        fn fetch(&self, _ctx: &Context) -> Result<TrustRoot> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_first && n == 0 {
                return Err(VerifyError::Internal("transient fetch failure".to_string()));
            }
            Ok(sample_root())
        }
    }

    #[test]
    fn validate_rejects_empty_bundles() {
        let mut root = sample_root();
        root.fulcio_roots.clear();
        assert!(root.validate().is_err());

        let mut root = sample_root();
        root.rekor_keys.clear();
        assert!(root.validate().is_err());

        assert!(sample_root().validate().is_ok());
    }

    #[test]
    fn singleton_caches_success_and_retries_failure() {
        reset_singleton();
        let ctx = Context::new();
        let provider = CountingProvider {
            calls: AtomicUsize::new(0),
            fail_first: true,
        };

        // First call fails and leaves the cell empty.
        assert!(trust_root_singleton(&ctx, &provider).is_err());
        // Second call re-attempts and succeeds.
        let root = trust_root_singleton(&ctx, &provider).unwrap();
        assert_eq!(root.fulcio_roots.len(), 1);
        // Third call is served from the cache.
        let again = trust_root_singleton(&ctx, &provider).unwrap();
        assert!(Arc::ptr_eq(&root, &again));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
        reset_singleton();
    }

    #[test]
    fn file_provider_round_trip() {
        let cert = SigningCertificate::from_base64_der(FULCIO_LEAF_B64).unwrap();
        let key = generate_p256();
        let json = serde_json::json!({
            "fulcio_roots": [der_to_pem(cert.der(), "CERTIFICATE")],
            "fulcio_intermediates": [],
            "rekor_keys": [{ "keyid": "rekor-1", "public_key": key.public_pem }],
            "ct_keys": []
        })
        .to_string();
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), &json).unwrap();

        let provider = FileTrustRootProvider::new(tmp.path().to_path_buf());
        let root = provider.fetch(&Context::new()).unwrap();
        assert_eq!(root.fulcio_roots.len(), 1);
        assert_eq!(root.rekor_keys[0].keyid, "rekor-1");
    }

    #[test]
    fn file_provider_missing_file() {
        let provider = FileTrustRootProvider::new("/nonexistent/root.json".into());
        assert!(provider.fetch(&Context::new()).is_err());
    }
}
