//! Typed identifiers for fields and clip jobs.
//!
//! Field numbers come off the wire as plain integers; wrapping them keeps a
//! field from being confused with an attempt count or a port.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// A physical competition field, numbered from 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldNumber(u32);

impl FieldNumber {
    /// Create a field number, rejecting 0.
    pub fn new(n: u32) -> Result<Self> {
        if n == 0 {
            return Err(Error::invalid_input("field number must be at least 1"));
        }
        Ok(Self(n))
    }

    /// Get the raw number.
    #[must_use]
    pub fn get(self) -> u32 {
        self.0
    }
}

impl TryFrom<i64> for FieldNumber {
    type Error = Error;

    fn try_from(value: i64) -> Result<Self> {
        let n = u32::try_from(value)
            .map_err(|_| Error::invalid_input(format!("field number out of range: {value}")))?;
        Self::new(n)
    }
}

impl std::fmt::Display for FieldNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Key of a clip job: one per completed match on a field.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClipId {
    pub field: FieldNumber,
    pub match_label: String,
}

impl ClipId {
    pub fn new(field: FieldNumber, match_label: impl Into<String>) -> Self {
        Self {
            field,
            match_label: match_label.into(),
        }
    }
}

impl std::fmt::Display for ClipId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "field {}/{}", self.field, self.match_label)
    }
}
