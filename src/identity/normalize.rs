use std::fmt;

use serde::Serialize;

/// Strips everything but ASCII digits from a free-text national ID.
/// `None` and blank input give the empty string.
pub fn normalize(raw: Option<&str>) -> String {
    raw.map(|raw| raw.chars().filter(|c| c.is_ascii_digit()).collect())
        .unwrap_or_default()
}

/// A national ID (DPI) in its digits-only form. Two IDs are the same
/// identity iff their normalized forms are equal.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct IdentityValue(String);

impl IdentityValue {
    pub fn from_raw(raw: Option<&str>) -> Self {
        Self(normalize(raw))
    }

    /// An empty identity means "no ID on file" and never conflicts.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl From<&str> for IdentityValue {
    fn from(raw: &str) -> Self {
        Self::from_raw(Some(raw))
    }
}

impl fmt::Display for IdentityValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
