//! Exact origins.
//!
//! An [`Origin`] is a serialized `scheme://host[:port]` tuple origin.
//! Configuration strings are normalized once with the `url` crate; inbound
//! origins are then compared byte for byte. Wildcards and opaque origins
//! cannot be constructed.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use url::Url;

use crate::error::{Error, Result};

// ============================================================================
// Origin
// ============================================================================

/// A validated, serialized tuple origin.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Origin(String);

impl Origin {
    /// Parses and normalizes an origin or URL.
    ///
    /// `https://Intel.Example.com:443/embed` becomes
    /// `https://intel.example.com`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOrigin`] for `*`, `null`, opaque origins and
    /// unparsable strings.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed == "*" {
            return Err(Error::invalid_origin(
                input,
                "wildcard origins are never accepted",
            ));
        }
        if trimmed.eq_ignore_ascii_case("null") {
            return Err(Error::invalid_origin(input, "opaque origin"));
        }

        let url = Url::parse(trimmed).map_err(|e| Error::invalid_origin(input, e.to_string()))?;
        let origin = url.origin();
        if !origin.is_tuple() {
            return Err(Error::invalid_origin(input, "opaque origin"));
        }

        Ok(Self(origin.ascii_serialization()))
    }

    /// Returns `true` if `candidate` is exactly this origin.
    #[inline]
    #[must_use]
    pub fn matches(&self, candidate: &str) -> bool {
        self.0 == candidate
    }

    /// Returns the serialized origin.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<&str> for Origin {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        Self::parse(value)
    }
}

// ============================================================================
// Tests
// ============================================================================
