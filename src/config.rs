use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::Deserialize;

/// Settings for opening the store and labelling history output. Every
/// field is optional in the JSON form.
#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct RecordsConfig {
    /// SQLite file. In-memory when absent.
    pub database_path: Option<PathBuf>,
    pub staff_role_label: String,
    pub external_role_label: String,
}

impl Default for RecordsConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            staff_role_label: "Fixed staff".to_string(),
            external_role_label: "External collaborator".to_string(),
        }
    }
}

impl RecordsConfig {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            anyhow::anyhow!("Failed to read config {}: {}", path.as_ref().display(), e)
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn role_labels(&self) -> RoleLabels {
        RoleLabels {
            staff: self.staff_role_label.clone(),
            external: self.external_role_label.clone(),
        }
    }
}

/// Role shown next to a collaborator's name in change history.
#[derive(Clone, Debug, PartialEq)]
pub struct RoleLabels {
    pub staff: String,
    pub external: String,
}

impl RoleLabels {
    pub fn for_collaborator(&self, is_staff: bool) -> &str {
        if is_staff {
            &self.staff
        } else {
            &self.external
        }
    }
}

impl Default for RoleLabels {
    fn default() -> Self {
        RecordsConfig::default().role_labels()
    }
}
