//! One-off backfill of correlation ids for change rows written before rows
//! were correlated.
//!
//! Rows are matched by activity, description and timestamp truncated to the
//! second. This is a heuristic: two unrelated changes with the same text in
//! the same second get merged, and a multi-collaborator change whose rows
//! straddle a second boundary stays split. Review the report before trusting
//! the result. Never run as part of reading history.

use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::timestamp::parse_timestamp;
use crate::db::Db;

/// A change row that does not share its correlation id with any other row.
#[derive(Clone, Debug, PartialEq)]
pub struct LegacyRow {
    pub id: String,
    pub activity_id: String,
    pub description: String,
    pub changed_at: Option<DateTime<Utc>>,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct BackfilledGroup {
    pub correlation_id: String,
    pub activity_id: String,
    pub description: String,
    /// The second every member's timestamp truncates to.
    pub second: DateTime<Utc>,
    pub row_ids: Vec<String>,
}

#[derive(Serialize, Clone, Debug, Default, PartialEq)]
pub struct BackfillReport {
    pub rows_examined: usize,
    pub groups: Vec<BackfilledGroup>,
}

impl BackfillReport {
    pub fn rows_updated(&self) -> usize {
        self.groups.iter().map(|g| g.row_ids.len()).sum()
    }
}

#[derive(Serialize, Deserialize, Debug)]
struct LegacyChange {
    id: String,
    activity_id: String,
    description: String,
    changed_at: Option<String>,
}

/// Groups legacy rows that look like one change: same activity, same
/// description, same second. Only groups of two or more are returned, in
/// the order their first row appears. Rows without a timestamp are never
/// grouped.
pub fn plan_backfill(rows: &[LegacyRow]) -> Vec<Vec<&LegacyRow>> {
    let mut groups: Vec<Vec<&LegacyRow>> = Vec::new();
    let mut index: HashMap<(&str, &str, i64), usize> = HashMap::new();

    for row in rows {
        let Some(changed_at) = row.changed_at else {
            continue;
        };
        let key = (row.activity_id.as_str(), row.description.as_str(), changed_at.timestamp());
        match index.get(&key) {
            Some(&position) => groups[position].push(row),
            None => {
                index.insert(key, groups.len());
                groups.push(vec![row]);
            }
        }
    }

    groups.retain(|group| group.len() > 1);
    groups
}

/// Assigns a shared, fresh correlation id to each group `plan_backfill`
/// finds among the uncorrelated rows. Runs in a single transaction.
pub fn backfill_correlation_ids(db: &Db) -> Result<BackfillReport> {
    log::warn!("Backfilling correlation ids by activity, description and second; results are a best guess");

    let report = db.transaction(|txn| {
        let legacy: Vec<LegacyChange> = txn.query(
            "SELECT c.id, c.activity_id, c.description, c.changed_at FROM ActivityChange c
             WHERE c.correlation_id IS NULL OR TRIM(c.correlation_id) = ''
                OR NOT EXISTS (
                    SELECT 1 FROM ActivityChange o
                    WHERE o.correlation_id = c.correlation_id AND o.id <> c.id
                )
             ORDER BY c.activity_id, c.id",
            (),
        )?;
        let rows: Vec<LegacyRow> = legacy
            .into_iter()
            .map(|change| LegacyRow {
                changed_at: change.changed_at.as_deref().and_then(parse_timestamp),
                id: change.id,
                activity_id: change.activity_id,
                description: change.description,
            })
            .collect();

        let mut report = BackfillReport {
            rows_examined: rows.len(),
            groups: Vec::new(),
        };
        for group in plan_backfill(&rows) {
            let correlation_id = Uuid::now_v7().to_string();
            let row_ids: Vec<String> = group.iter().map(|row| row.id.clone()).collect();
            for id in &row_ids {
                txn.execute(
                    "UPDATE ActivityChange SET correlation_id = ? WHERE id = ?",
                    [&correlation_id, id],
                )?;
            }
            let first = group[0];
            let seconds = first.changed_at.map(|t| t.timestamp()).unwrap_or_default();
            report.groups.push(BackfilledGroup {
                correlation_id,
                activity_id: first.activity_id.clone(),
                description: first.description.clone(),
                second: Utc.timestamp_opt(seconds, 0).single().unwrap_or_default(),
                row_ids,
            });
        }
        Ok(report)
    })?;

    for group in &report.groups {
        log::info!(
            "Backfill merged {} rows of activity {} into {}: {:?}",
            group.row_ids.len(),
            group.activity_id,
            group.correlation_id,
            group.row_ids
        );
    }
    log::info!(
        "Backfill examined {} rows, updated {} in {} groups",
        report.rows_examined,
        report.rows_updated(),
        report.groups.len()
    );
    Ok(report)
}
