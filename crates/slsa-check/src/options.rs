//! Verification options and the per-call context.
//!
//! Option structs are built by the caller (typically the CLI) and borrowed
//! immutably by verifiers for the duration of one verification call.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Result, VerifyError};
use crate::levels::Level;

/// Expectations for provenance verification.
#[derive(Debug, Default, Clone)]
pub struct ProvenanceOpts {
    /// Expected source repository URI, e.g. `github.com/org/repo`.
    pub expected_source_uri: String,
    /// Expected builder ID; filled in by the verifier once the signing
    /// identity is established.
    pub expected_builder_id: String,
    /// Expected sha256 artifact digest (lowercase hex).
    pub expected_digest: String,
    /// Expected branch the artifact was built from.
    pub expected_branch: Option<String>,
    /// Expected tag, matched exactly.
    pub expected_tag: Option<String>,
    /// Expected versioned tag, matched by semantic-version components.
    pub expected_versioned_tag: Option<String>,
    /// Workflow inputs the triggering event must have carried.
    pub expected_workflow_inputs: BTreeMap<String, String>,
    /// Expected npm package name.
    pub expected_package_name: Option<String>,
    /// Expected npm package version.
    pub expected_package_version: Option<String>,
}

/// The caller's builder expectation.
#[derive(Debug, Default, Clone)]
pub struct BuilderOpts {
    /// Expected builder ID, when the caller has one.
    pub expected_id: Option<String>,
}

/// Expectations for VSA verification.
#[derive(Debug, Default, Clone)]
pub struct VsaOpts {
    /// Expected sha256 artifact digest (lowercase hex).
    pub expected_digest: String,
    /// Expected verified levels; exactly one per track.
    pub expected_levels: Vec<Level>,
    /// Expected resource URI, byte-exact when present.
    pub expected_resource_uri: Option<String>,
}

/// The caller's VSA verifier expectation.
#[derive(Debug, Default, Clone)]
pub struct VerifierOpts {
    /// Expected verifier ID. Required: VSA dispatch has no default.
    pub expected_id: String,
}

/// Repeatable `key=value` workflow inputs.
#[derive(Debug, Default, Clone)]
pub struct WorkflowInputs(BTreeMap<String, String>);

impl WorkflowInputs {
    /// Add one `key=value` entry.
    ///
    /// # Errors
    ///
    /// `InvalidFormat` when the entry is not of the form `key=value`.
    pub fn insert(&mut self, entry: &str) -> Result<()> {
        match entry.split_once('=') {
            Some((key, value)) if !key.is_empty() => {
                self.0.insert(key.to_string(), value.to_string());
                Ok(())
            }
            _ => Err(VerifyError::InvalidFormat(format!(
                "expected 'key=value' format, got {entry:?}"
            ))),
        }
    }

    #[must_use]
    pub fn into_map(self) -> BTreeMap<String, String> {
        self.0
    }
}

/// Cancellation context threaded through verification calls.
///
/// Network-facing collaborators check the token at their I/O boundaries;
/// pure CPU phases run to completion.
#[derive(Debug, Clone, Default)]
pub struct Context {
    cancelled: Arc<AtomicBool>,
}

impl Context {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Verification aborts at the next I/O boundary.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Fail fast when the caller has cancelled.
    ///
    /// # Errors
    ///
    /// `Internal` when cancellation was requested.
    pub fn ensure_active(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(VerifyError::Internal("verification cancelled".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn workflow_inputs_parse() {
        let mut inputs = WorkflowInputs::default();
        inputs.insert("release=true").unwrap();
        inputs.insert("channel=stable").unwrap();
        let map = inputs.into_map();
        assert_eq!(map.get("release").map(String::as_str), Some("true"));
        assert_eq!(map.get("channel").map(String::as_str), Some("stable"));
    }

    #[test]
    fn workflow_inputs_value_may_contain_equals() {
        let mut inputs = WorkflowInputs::default();
        inputs.insert("flags=-X main.version=1.0").unwrap();
        assert_eq!(
            inputs.into_map().get("flags").map(String::as_str),
            Some("-X main.version=1.0")
        );
    }

    #[test]
    fn workflow_inputs_reject_malformed() {
        let mut inputs = WorkflowInputs::default();
        for entry in ["novalue", "=value", ""] {
            let err = inputs.insert(entry).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidFormat, "{entry}");
        }
    }

    #[test]
    fn context_cancellation() {
        let ctx = Context::new();
        ctx.ensure_active().unwrap();
        ctx.cancel();
        assert!(ctx.is_cancelled());
        assert!(ctx.ensure_active().is_err());
    }
}
