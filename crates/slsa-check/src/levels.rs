//! SLSA track and level algebra.
//!
//! Two tracks (`build`, `source`) with levels 0..=3 each. Comparison is
//! only defined within a track; cross-track comparison never reports
//! lower-than.

use crate::error::{Result, VerifyError};

const BUILD_PREFIX: &str = "SLSA_BUILD_LEVEL_";
const SOURCE_PREFIX: &str = "SLSA_SOURCE_LEVEL_";

/// A SLSA rating track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Track {
    Build,
    Source,
}

impl std::fmt::Display for Track {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Build => write!(f, "build"),
            Self::Source => write!(f, "source"),
        }
    }
}

/// A single-track SLSA level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Build(u8),
    Source(u8),
}

impl Level {
    /// The track this level belongs to.
    #[must_use]
    pub fn track(&self) -> Track {
        match self {
            Self::Build(_) => Track::Build,
            Self::Source(_) => Track::Source,
        }
    }

    /// The numeric level, 0..=3.
    #[must_use]
    pub fn to_int(&self) -> u8 {
        match self {
            Self::Build(n) | Self::Source(n) => *n,
        }
    }

    /// True when both levels share a track and `self` is strictly lower.
    /// Cross-track comparison is false; callers check the track first.
    #[must_use]
    pub fn lower_than(&self, other: &Self) -> bool {
        self.track() == other.track() && self.to_int() < other.to_int()
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Build(n) => write!(f, "{BUILD_PREFIX}{n}"),
            Self::Source(n) => write!(f, "{SOURCE_PREFIX}{n}"),
        }
    }
}

impl std::str::FromStr for Level {
    type Err = VerifyError;

    /// Parse a canonical `SLSA_BUILD_LEVEL_n` / `SLSA_SOURCE_LEVEL_n` form.
    fn from_str(s: &str) -> Result<Self> {
        if let Some(n) = parse_level_digit(s, BUILD_PREFIX)? {
            return Ok(Self::Build(n));
        }
        if let Some(n) = parse_level_digit(s, SOURCE_PREFIX)? {
            return Ok(Self::Source(n));
        }
        Err(VerifyError::InvalidVsaLevel(format!(
            "unrecognized level: {s:?}"
        )))
    }
}

/// Parse the single trailing digit after `prefix`, range-checked to 0..=3.
///
/// Returns `Ok(None)` when `s` does not carry the prefix at all (the
/// caller tries the other track), and an error when the prefix matches but
/// the digit is absent, trailing garbage exists, or the level is out of
/// range.
fn parse_level_digit(s: &str, prefix: &str) -> Result<Option<u8>> {
    let Some(rest) = s.strip_prefix(prefix) else {
        return Ok(None);
    };
    let mut chars = rest.chars();
    let (Some(digit), None) = (chars.next(), chars.next()) else {
        return Err(VerifyError::InvalidVsaLevel(format!(
            "expected a single level digit: {s:?}"
        )));
    };
    let Some(n) = digit.to_digit(10) else {
        return Err(VerifyError::InvalidVsaLevel(format!(
            "level is not a digit: {s:?}"
        )));
    };
    if n > 3 {
        return Err(VerifyError::InvalidVsaLevel(format!(
            "level out of range 0..=3: {s:?}"
        )));
    }
    Ok(Some(n as u8))
}

/// Parse a caller-supplied list of levels, rejecting duplicate tracks.
///
/// Order is preserved but carries no meaning.
///
/// # Errors
///
/// `InvalidVsaLevel` for an unparseable entry, `DuplicateTrack` when two
/// entries share a track.
pub fn levels_from_array<S: AsRef<str>>(values: &[S]) -> Result<Vec<Level>> {
    let mut levels = Vec::with_capacity(values.len());
    for value in values {
        levels.push(value.as_ref().trim().parse::<Level>()?);
    }
    let mut seen_build = false;
    let mut seen_source = false;
    for level in &levels {
        let seen = match level.track() {
            Track::Build => &mut seen_build,
            Track::Source => &mut seen_source,
        };
        if *seen {
            return Err(VerifyError::DuplicateTrack(level.track().to_string()));
        }
        *seen = true;
    }
    Ok(levels)
}

/// Normalize a VSA v0.2 `policy_level` string to canonical build-level form.
///
/// Accepted inputs: `SLSA_Ln` (legacy producer bug), `SLSA_LEVEL_n`
/// (v0.2 wording) and the canonical `SLSA_BUILD_LEVEL_n`. Everything else
/// is `InvalidVsaLevel`.
pub fn normalize_policy_level(s: &str) -> Result<String> {
    for prefix in ["SLSA_BUILD_LEVEL_", "SLSA_LEVEL_", "SLSA_L"] {
        if let Some(rest) = s.strip_prefix(prefix) {
            if rest.len() == 1 && rest.chars().all(|c| c.is_ascii_digit()) {
                return Ok(format!("{BUILD_PREFIX}{rest}"));
            }
            // The prefix matched but the remainder is not a single digit;
            // a longer prefix cannot match either.
            break;
        }
    }
    Err(VerifyError::InvalidVsaLevel(format!(
        "unrecognized policy level: {s:?}"
    )))
}
