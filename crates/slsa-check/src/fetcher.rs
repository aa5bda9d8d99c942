//! Attestation retrieval for container images.
//!
//! OCI registry access and layer resolution live outside the engine. A
//! fetcher returns the image's attached attestations as `(envelope, cert)`
//! pairs; the engine verifies them.

use crate::dsse::Envelope;
use crate::error::Result;
use crate::options::Context;

/// An attestation attached to a container image.
#[derive(Debug, Clone)]
pub struct FetchedAttestation {
    pub envelope: Envelope,
    /// DER-encoded signing certificate attached to the attestation.
    pub cert_der: Vec<u8>,
}

/// Fetches the attestations attached to an image reference.
pub trait AttestationFetcher: Send + Sync {
    /// Fetch all attestations for `image`.
    ///
    /// # Errors
    ///
    /// Implementation-defined; transport failures are surfaced to the
    /// caller unchanged.
    fn fetch(&self, ctx: &Context, image: &str) -> Result<Vec<FetchedAttestation>>;
}
