use std::collections::HashMap;

use anyhow::Result;
use chrono::Utc;
use rusqlite::params;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::core::Db;
use super::timestamp::{format_timestamp, parse_timestamp};
use super::types::{ChangeRow, Collaborator, Community, Evidence, NewChange, Region};
use crate::error::ValidationError;
use crate::history::EnrichmentSource;

/// ActivityChange as it sits in the table.
#[derive(Serialize, Deserialize, Debug)]
struct ActivityChange {
    id: String,
    activity_id: String,
    description: String,
    changed_at: Option<String>,
    correlation_id: Option<String>,
    collaborator_id: String,
    community_id: Option<String>,
    region_id: Option<String>,
}

#[derive(Serialize, Deserialize, Debug)]
struct ChangeEvidence {
    id: String,
    change_id: String,
    filename: String,
    storage_url: Option<String>,
    mime_type: Option<String>,
    description: Option<String>,
}

impl Db {
    /// Records a change made by one or more collaborators. Writes one
    /// ActivityChange row per collaborator, all sharing one correlation id,
    /// and attaches the evidence to the first row. Returns the correlation
    /// id.
    pub fn record_change(&self, change: &NewChange) -> Result<String> {
        if change.collaborator_ids.is_empty() {
            return Err(ValidationError::NoCollaborators.into());
        }

        let correlation_id = match change.correlation_id.as_deref() {
            Some(id) if !id.trim().is_empty() => id.to_string(),
            _ => Uuid::now_v7().to_string(),
        };
        let changed_at = format_timestamp(&change.changed_at.unwrap_or_else(Utc::now));

        self.transaction(|txn| {
            let mut first_row_id = None;
            for collaborator_id in &change.collaborator_ids {
                let row_id = Uuid::now_v7().to_string();
                txn.execute(
                    "INSERT INTO ActivityChange (id, activity_id, description, changed_at, correlation_id, collaborator_id, community_id, region_id)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                    params![
                        &row_id,
                        &change.activity_id,
                        &change.description,
                        &changed_at,
                        &correlation_id,
                        collaborator_id,
                        &change.community_id,
                        &change.region_id,
                    ],
                )?;
                first_row_id.get_or_insert(row_id);
            }

            if let Some(row_id) = first_row_id {
                for evidence in &change.evidence {
                    txn.execute(
                        "INSERT INTO ChangeEvidence (id, change_id, filename, storage_url, mime_type, description)
                         VALUES (uuid7(), ?, ?, ?, ?, ?)",
                        params![
                            &row_id,
                            &evidence.filename,
                            &evidence.storage_url,
                            &evidence.mime_type,
                            &evidence.description,
                        ],
                    )?;
                }
            }
            Ok(())
        })?;

        log::info!(
            "Recorded change {} on activity {} for {} collaborator(s)",
            correlation_id,
            change.activity_id,
            change.collaborator_ids.len()
        );
        Ok(correlation_id)
    }

    /// All change rows of an activity, newest first, with their evidence
    /// attached. Related objects are left unresolved.
    pub fn change_rows_for_activity(&self, activity_id: &str) -> Result<Vec<ChangeRow>> {
        let changes: Vec<ActivityChange> = self.query(
            "SELECT * FROM ActivityChange WHERE activity_id = ? ORDER BY changed_at DESC, id DESC",
            [activity_id],
        )?;
        let evidence: Vec<ChangeEvidence> = self.query(
            "SELECT e.* FROM ChangeEvidence e
             JOIN ActivityChange c ON c.id = e.change_id
             WHERE c.activity_id = ?
             ORDER BY e.id",
            [activity_id],
        )?;

        let mut evidence_by_change: HashMap<String, Vec<Evidence>> = HashMap::new();
        for item in evidence {
            evidence_by_change.entry(item.change_id).or_default().push(Evidence {
                id: item.id,
                filename: item.filename,
                storage_url: item.storage_url,
                mime_type: item.mime_type,
                description: item.description,
            });
        }

        Ok(changes
            .into_iter()
            .map(|change| ChangeRow {
                evidence: evidence_by_change.remove(&change.id).unwrap_or_default(),
                changed_at: change.changed_at.as_deref().and_then(parse_timestamp),
                id: change.id,
                activity_id: change.activity_id,
                description: change.description,
                correlation_id: change.correlation_id,
                collaborator_id: change.collaborator_id,
                community_id: change.community_id,
                region_id: change.region_id,
                ..Default::default()
            })
            .collect())
    }
}

impl EnrichmentSource for Db {
    fn collaborator(&self, id: &str) -> Result<Option<Collaborator>> {
        self.get::<Collaborator>(id)
    }

    fn community(&self, id: &str) -> Result<Option<Community>> {
        self.get::<Community>(id)
    }

    fn region(&self, id: &str) -> Result<Option<Region>> {
        self.get::<Region>(id)
    }
}
