//! Builder and verifier identifiers.
//!
//! Builder IDs use the `name@version` form. Verifier IDs keep the legacy
//! `name/version` separator used by deployed VSA producers; the version, when
//! present, is the trailing path element and must start with `v`.

use crate::error::{Result, VerifyError};

/// A verified builder identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustedBuilderID {
    name: String,
    version: String,
}

impl TrustedBuilderID {
    /// Parse a builder ID string.
    ///
    /// # Errors
    ///
    /// `InvalidFormat` when `need_version` and the version is absent or
    /// does not start with `v`.
    pub fn new(id: &str, need_version: bool) -> Result<Self> {
        let (name, version) = parse_builder_id(id, need_version)?;
        Ok(Self { name, version })
    }

    /// Loose match against a caller-supplied builder ID.
    ///
    /// The name must match exactly. A non-empty expected version must equal
    /// this builder's version; with `allow_ref`, the expected version also
    /// matches when this builder's version is `refs/tags/<expected>`.
    ///
    /// # Errors
    ///
    /// `MismatchBuilderID` on any mismatch, `InvalidFormat` when the
    /// expected ID cannot be parsed.
    pub fn matches_loose(&self, expected: &str, allow_ref: bool) -> Result<()> {
        let (name, version) = parse_builder_id(expected, false)?;
        if name != self.name {
            return Err(VerifyError::MismatchBuilderID(format!(
                "expected name {:?}, got {:?}",
                name, self.name
            )));
        }
        if !version.is_empty() && version != self.version {
            if allow_ref && format!("refs/tags/{version}") == self.version {
                return Ok(());
            }
            return Err(VerifyError::MismatchBuilderID(format!(
                "expected version {:?}, got {:?}",
                version, self.version
            )));
        }
        Ok(())
    }

    /// Strict match: a version present on either side must match.
    ///
    /// # Errors
    ///
    /// `MismatchBuilderID` on any mismatch.
    pub fn matches_full(&self, expected: &str, allow_ref: bool) -> Result<()> {
        let (_, version) = parse_builder_id(expected, false)?;
        if version.is_empty() && !self.version.is_empty() {
            return Err(VerifyError::MismatchBuilderID(format!(
                "expected a version, builder has {:?}",
                self.version
            )));
        }
        self.matches_loose(expected, allow_ref)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }
}

impl std::fmt::Display for TrustedBuilderID {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.version.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}@{}", self.name, self.version)
        }
    }
}

/// A verified VSA verifier identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustedVerifierID {
    name: String,
    version: String,
}

impl TrustedVerifierID {
    /// Parse a verifier ID string, requiring a version.
    ///
    /// # Errors
    ///
    /// `InvalidFormat` when the version is absent or malformed.
    pub fn new(id: &str) -> Result<Self> {
        let (name, version) = parse_verifier_id(id, true)?;
        Ok(Self { name, version })
    }

    /// Match against a caller-supplied verifier ID.
    ///
    /// If the expected ID contains a version the full ID must match;
    /// otherwise only the name needs to match. `allow_ref` accepts a
    /// `refs/tags/<version>` long form on this side.
    ///
    /// # Errors
    ///
    /// `MismatchVerifierID` on any mismatch.
    pub fn matches(&self, expected: &str, allow_ref: bool) -> Result<()> {
        let (name, version) = parse_verifier_id(expected, false)?;
        if name != self.name {
            return Err(VerifyError::MismatchVerifierID(format!(
                "expected name {:?}, got {:?}",
                name, self.name
            )));
        }
        if !version.is_empty() && version != self.version {
            if allow_ref && format!("refs/tags/{version}") == self.version {
                return Ok(());
            }
            return Err(VerifyError::MismatchVerifierID(format!(
                "expected version {:?}, got {:?}",
                version, self.version
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }
}

impl std::fmt::Display for TrustedVerifierID {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.name, self.version)
    }
}

/// Parse a `name@version` builder ID into `(name, version)`.
///
/// # Errors
///
/// `InvalidFormat` when the string has more than one `@`, an empty
/// version after `@`, or lacks a `v`-prefixed version while
/// `need_version` is set.
pub fn parse_builder_id(id: &str, need_version: bool) -> Result<(String, String)> {
    let mut parts = id.splitn(2, '@');
    let name = parts.next().unwrap_or_default();
    match parts.next() {
        Some("") => Err(VerifyError::InvalidFormat(format!(
            "builderID: empty version in {id:?}"
        ))),
        Some(version) => {
            if need_version && !version.starts_with('v') && !version.starts_with("refs/") {
                return Err(VerifyError::InvalidFormat(format!(
                    "builderID: version must start with 'v': {id:?}"
                )));
            }
            Ok((name.to_string(), version.to_string()))
        }
        None if need_version => Err(VerifyError::InvalidFormat(format!(
            "builderID: missing version in {id:?}"
        ))),
        None => Ok((name.to_string(), String::new())),
    }
}

/// Parse a verifier ID of the form `name/version`.
///
/// The version is the trailing path element when it starts with `v`;
/// otherwise the whole string is the name and the version is empty.
///
/// # Errors
///
/// `InvalidFormat` when `need_version` and no `v`-prefixed trailing
/// element exists, or the trailing element is empty.
pub fn parse_verifier_id(id: &str, need_version: bool) -> Result<(String, String)> {
    let parts: Vec<&str> = id.split('/').collect();
    let last = parts.last().copied().unwrap_or_default();
    if need_version {
        if last.is_empty() {
            return Err(VerifyError::InvalidFormat(format!(
                "verifierID: empty version in {id:?}"
            )));
        }
        if !last.starts_with('v') {
            return Err(VerifyError::InvalidFormat(format!(
                "verifierID: version must start with 'v': {id:?}"
            )));
        }
    }
    if !last.starts_with('v') || parts.len() < 2 {
        return Ok((id.to_string(), String::new()));
    }
    Ok((parts[..parts.len() - 1].join("/"), last.to_string()))
}

/// Match a versioned tag query against a concrete tag.
///
/// Both sides parse as `vMAJOR[.MINOR[.PATCH]]`. Every component present in
/// the query must equal the corresponding component of the tag; components
/// the query omits are wildcards.
///
/// # Errors
///
/// `MismatchVersionedTag` when a present component differs or either side
/// fails to parse.
pub fn versioned_tag_matches(query: &str, tag: &str) -> Result<()> {
    let query_parts = parse_version_tag(query)?;
    let tag_parts = parse_version_tag(tag)?;
    for (i, expected) in query_parts.iter().enumerate() {
        let actual = tag_parts.get(i).copied().unwrap_or(0);
        if *expected != actual {
            return Err(VerifyError::MismatchVersionedTag(format!(
                "expected {query:?}, provenance tag is {tag:?}"
            )));
        }
    }
    Ok(())
}

fn parse_version_tag(tag: &str) -> Result<Vec<u64>> {
    let body = tag.strip_prefix('v').ok_or_else(|| {
        VerifyError::MismatchVersionedTag(format!("tag must start with 'v': {tag:?}"))
    })?;
    let parts: Vec<&str> = body.split('.').collect();
    if parts.is_empty() || parts.len() > 3 {
        return Err(VerifyError::MismatchVersionedTag(format!(
            "invalid version tag: {tag:?}"
        )));
    }
    parts
        .iter()
        .map(|p| {
            p.parse::<u64>().map_err(|_| {
                VerifyError::MismatchVersionedTag(format!("invalid version component in {tag:?}"))
            })
        })
        .collect()
}
