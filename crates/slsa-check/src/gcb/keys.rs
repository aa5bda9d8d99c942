//! Google Cloud Build signing keys.
//!
//! GCB envelopes carry one signature per key that signed the build. The
//! global key signs the DSSE PAE; the older per-region keys signed the
//! decoded payload directly. Key IDs are full KMS resource names.

use crate::crypto::{SignatureEncoding, TrustedKey};
use crate::error::Result;

/// KMS resource name of the global PAE signing key.
pub const GLOBAL_PAE_KEY_ID: &str =
    "projects/verified-builder/locations/global/keyRings/attestor/cryptoKeys/provenanceSigner/cryptoKeyVersions/1";

fn regional_key_id(region: &str) -> String {
    format!(
        "projects/verified-builder/locations/{region}/keyRings/attestor/cryptoKeys/builtByGCB/cryptoKeyVersions/1"
    )
}

const REGIONAL_KEYS: &[(&str, &str)] = &[
    ("asia-east1", include_str!("../../keys/gcb/asia-east1.pem")),
    ("asia-northeast1", include_str!("../../keys/gcb/asia-northeast1.pem")),
    ("asia-south1", include_str!("../../keys/gcb/asia-south1.pem")),
    ("asia-southeast1", include_str!("../../keys/gcb/asia-southeast1.pem")),
    (
        "australia-southeast1",
        include_str!("../../keys/gcb/australia-southeast1.pem"),
    ),
    ("europe-north1", include_str!("../../keys/gcb/europe-north1.pem")),
    ("europe-west1", include_str!("../../keys/gcb/europe-west1.pem")),
    ("europe-west2", include_str!("../../keys/gcb/europe-west2.pem")),
    ("europe-west3", include_str!("../../keys/gcb/europe-west3.pem")),
    ("europe-west4", include_str!("../../keys/gcb/europe-west4.pem")),
    ("europe-west6", include_str!("../../keys/gcb/europe-west6.pem")),
    (
        "northamerica-northeast1",
        include_str!("../../keys/gcb/northamerica-northeast1.pem"),
    ),
    (
        "southamerica-east1",
        include_str!("../../keys/gcb/southamerica-east1.pem"),
    ),
    ("us-central1", include_str!("../../keys/gcb/us-central1.pem")),
    ("us-east1", include_str!("../../keys/gcb/us-east1.pem")),
    ("us-east4", include_str!("../../keys/gcb/us-east4.pem")),
    ("us-west1", include_str!("../../keys/gcb/us-west1.pem")),
    ("us-west2", include_str!("../../keys/gcb/us-west2.pem")),
    ("us-west4", include_str!("../../keys/gcb/us-west4.pem")),
];

const GLOBAL_PAE_KEY_PEM: &str = include_str!("../../keys/gcb/global-pae.pem");

/// The key set GCB signatures are resolved against.
#[derive(Debug, Clone)]
pub struct GcbKeyRing {
    global: TrustedKey,
    regional: Vec<TrustedKey>,
}

impl GcbKeyRing {
    /// The production key ring, from embedded key material.
    ///
    /// # Errors
    ///
    /// `InvalidFormat` when an embedded key fails to parse.
    pub fn production() -> Result<Self> {
        let global = TrustedKey::from_pem(GLOBAL_PAE_KEY_ID, GLOBAL_PAE_KEY_PEM)?;
        let regional = REGIONAL_KEYS
            .iter()
            .map(|(region, pem)| TrustedKey::from_pem(&regional_key_id(region), pem))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { global, regional })
    }

    /// A key ring with explicit keys (tests and custom deployments).
    #[must_use]
    pub fn new(global: TrustedKey, regional: Vec<TrustedKey>) -> Self {
        Self { global, regional }
    }

    /// Resolve a signature's `keyid` to a key and its signing encoding.
    ///
    /// The global key signs the PAE; regional keys signed the decoded
    /// payload.
    #[must_use]
    pub fn lookup(&self, keyid: &str) -> Option<(&TrustedKey, SignatureEncoding)> {
        if keyid == self.global.keyid {
            return Some((&self.global, SignatureEncoding::Pae));
        }
        self.regional
            .iter()
            .find(|k| k.keyid == keyid)
            .map(|k| (k, SignatureEncoding::DirectPayload))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn production_ring_loads() {
        let ring = GcbKeyRing::production().unwrap();
        assert!(ring.lookup(GLOBAL_PAE_KEY_ID).is_some());
        let (_, encoding) = ring.lookup(GLOBAL_PAE_KEY_ID).unwrap();
        assert_eq!(encoding, SignatureEncoding::Pae);
    }

    #[test]
    fn regional_lookup_uses_direct_payload() {
        let ring = GcbKeyRing::production().unwrap();
        let keyid = regional_key_id("europe-west1");
        let (key, encoding) = ring.lookup(&keyid).unwrap();
        assert_eq!(key.keyid, keyid);
        assert_eq!(encoding, SignatureEncoding::DirectPayload);
    }

    #[test]
    fn unknown_keyid_resolves_to_nothing() {
        let ring = GcbKeyRing::production().unwrap();
        assert!(ring.lookup("projects/other/locations/mars/keyRings/x").is_none());
        assert!(ring.lookup("").is_none());
    }
}
