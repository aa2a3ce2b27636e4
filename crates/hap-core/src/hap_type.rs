//! HAP type UUIDs.
//!
//! Apple-defined service and characteristic types share the base suffix
//! `-0000-1000-8000-0026BB765291` and are commonly written in a short form:
//! the leading hex of the first group with zeros stripped (`"3E"` instead of
//! `"0000003E-0000-1000-8000-0026BB765291"`). Both forms are accepted on
//! input; Apple-defined types serialize as the short form.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ParseError;

/// Suffix shared by all Apple-defined HAP type UUIDs.
const APPLE_BASE_SUFFIX: &str = "-0000-1000-8000-0026BB765291";

/// A service or characteristic type identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct HapType(Uuid);

impl HapType {
    pub fn new(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Parse from either the full 36-char form or the short Apple form.
    pub fn parse(s: &str) -> Result<Self, ParseError> {
        if s.len() == 36 {
            let uuid = Uuid::parse_str(s)
                .map_err(|e| ParseError::InvalidFormat(format!("bad type UUID {s:?}: {e}")))?;
            return Ok(Self(uuid));
        }

        // Short form: up to 8 hex digits of the first group.
        if s.is_empty() || s.len() > 8 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ParseError::InvalidFormat(format!(
                "bad short type UUID {s:?}"
            )));
        }
        let full = format!("{:0>8}{}", s, APPLE_BASE_SUFFIX);
        let uuid = Uuid::parse_str(&full)
            .map_err(|e| ParseError::InvalidFormat(format!("bad type UUID {s:?}: {e}")))?;
        Ok(Self(uuid))
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Whether this is an Apple-defined type (carries the shared suffix).
    pub fn is_apple_defined(&self) -> bool {
        self.0
            .hyphenated()
            .to_string()
            .to_uppercase()
            .ends_with(APPLE_BASE_SUFFIX)
    }

    /// Wire representation: short form for Apple-defined types, full
    /// uppercase form otherwise.
    pub fn to_wire(&self) -> String {
        let full = self.0.hyphenated().to_string().to_uppercase();
        match full.strip_suffix(APPLE_BASE_SUFFIX) {
            Some(prefix) => {
                let short = prefix.trim_start_matches('0');
                if short.is_empty() {
                    "0".to_string()
                } else {
                    short.to_string()
                }
            }
            None => full,
        }
    }
}

impl fmt::Display for HapType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_wire())
    }
}

impl FromStr for HapType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<HapType> for String {
    fn from(t: HapType) -> Self {
        t.to_wire()
    }
}

impl TryFrom<String> for HapType {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}
