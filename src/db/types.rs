use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

/// Trait for types that can be stored in the database. The table name is
/// the type's own name.
pub trait Entity: Serialize + DeserializeOwned {}

// Blanket implementation for any type that meets the requirements
impl<T> Entity for T where T: Serialize + DeserializeOwned {}

#[derive(Serialize, Deserialize, Clone, Default, Debug, PartialEq)]
pub struct Region {
    pub id: String,
    pub name: String,
}

#[derive(Serialize, Deserialize, Clone, Default, Debug, PartialEq)]
pub struct Community {
    pub id: String,
    pub name: String,
    pub region_id: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Collaborator {
    pub id: String,
    pub name: String,
    /// Fixed staff of the office, as opposed to an external collaborator.
    pub is_staff: bool,
    pub active: bool,
}

impl Default for Collaborator {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            is_staff: false,
            active: true,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Default, Debug, PartialEq)]
pub struct Activity {
    pub id: String,
    pub name: String,
    pub community_id: Option<String>,
    pub region_id: Option<String>,
    pub scheduled_at: Option<DateTime<Utc>>,
}

/// A file attached to a change row as evidence (photo, signed list, ...).
#[derive(Serialize, Deserialize, Clone, Default, Debug, PartialEq)]
pub struct Evidence {
    pub id: String,
    pub filename: String,
    pub storage_url: Option<String>,
    pub mime_type: Option<String>,
    pub description: Option<String>,
}

/// One collaborator's contribution to a described change on an activity, as
/// stored in the ActivityChange table. The related objects are optional;
/// when they are missing only the keys are known.
#[derive(Clone, Default, Debug, PartialEq)]
pub struct ChangeRow {
    pub id: String,
    pub activity_id: String,
    pub description: String,
    pub changed_at: Option<DateTime<Utc>>,
    pub correlation_id: Option<String>,
    pub collaborator_id: String,
    pub community_id: Option<String>,
    pub region_id: Option<String>,
    pub evidence: Vec<Evidence>,
    pub collaborator: Option<Collaborator>,
    pub community: Option<Community>,
    pub region: Option<Region>,
}

/// What a change row is grouped by. A row id never equals a correlation id
/// here, even when the strings match.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GroupKey<'a> {
    Correlation(&'a str),
    /// Rows without usable correlation data stand alone.
    Row(&'a str),
}

impl<'a> GroupKey<'a> {
    pub fn as_str(&self) -> &'a str {
        match self {
            GroupKey::Correlation(key) | GroupKey::Row(key) => key,
        }
    }
}

impl ChangeRow {
    /// The correlation id, or the row's own id for rows that never had one.
    /// Blank correlation ids count as missing.
    pub fn group_key(&self) -> GroupKey<'_> {
        match self.correlation_id.as_deref() {
            Some(correlation_id) if !correlation_id.trim().is_empty() => GroupKey::Correlation(correlation_id),
            _ => GroupKey::Row(&self.id),
        }
    }
}

/// Evidence to attach when recording a change.
#[derive(Clone, Default, Debug)]
pub struct NewEvidence {
    pub filename: String,
    pub storage_url: Option<String>,
    pub mime_type: Option<String>,
    pub description: Option<String>,
}

/// A change made by one or more collaborators at once. Recorded as one
/// ActivityChange row per collaborator, all sharing a correlation id.
#[derive(Clone, Default, Debug)]
pub struct NewChange {
    pub activity_id: String,
    pub description: String,
    /// Defaults to now.
    pub changed_at: Option<DateTime<Utc>>,
    /// Defaults to a fresh uuidv7.
    pub correlation_id: Option<String>,
    pub collaborator_ids: Vec<String>,
    pub community_id: Option<String>,
    pub region_id: Option<String>,
    pub evidence: Vec<NewEvidence>,
}
