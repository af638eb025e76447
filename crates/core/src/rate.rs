//! Rate tags select which bitrate-control parameter set a codec uses.
//!
//! A valid tag starts with `r` followed by one or more non-zero digits
//! (`r1`, `r3`, `r12`). Only the matched prefix is kept, so `r2_high`
//! becomes `r2`.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::CoreError;

/// Leading `r` followed by non-zero digits, anchored at the start.
const RATE_TAG_PATTERN: &str = r"^r[1-9]+";

static RATE_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(RATE_TAG_PATTERN).expect("valid regex"));

/// A validated rate tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RateTag(String);

impl RateTag {
    /// Validate `raw` and keep the matched `r<digits>` prefix.
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        RATE_TAG_RE
            .find(raw)
            .map(|m| Self(m.as_str().to_string()))
            .ok_or_else(|| {
                CoreError::Validation(format!(
                    "Invalid rate tag '{raw}'. Use 'r1', 'r2', etc."
                ))
            })
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RateTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RateTag {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// The mutable rate selection held by a codec for its lifetime.
///
/// Starts unset. Reading an unset slot is an error rather than a panic so
/// the step that first needs the tag can report it.
#[derive(Debug, Clone, Default)]
pub struct RateSlot {
    tag: Option<RateTag>,
}

impl RateSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current tag, or [`CoreError::RateUnset`].
    pub fn get(&self) -> Result<&RateTag, CoreError> {
        self.tag.as_ref().ok_or(CoreError::RateUnset)
    }

    /// Replace the tag with `raw` if it is valid.
    ///
    /// An invalid tag logs a warning and leaves the slot unset. Returns
    /// whether the new tag was accepted.
    pub fn set(&mut self, raw: &str) -> bool {
        match RateTag::parse(raw) {
            Ok(tag) => {
                self.tag = Some(tag);
                true
            }
            Err(e) => {
                tracing::warn!(rate = raw, error = %e, "Invalid rate control parameters");
                self.tag = None;
                false
            }
        }
    }

    pub fn is_set(&self) -> bool {
        self.tag.is_some()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
