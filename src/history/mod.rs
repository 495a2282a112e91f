//! Change history: folding per-collaborator change rows into the logical
//! changes people actually made.

pub mod aggregator;
pub mod backfill;

pub use aggregator::*;
pub use backfill::{backfill_correlation_ids, plan_backfill, BackfillReport, BackfilledGroup, LegacyRow};

use anyhow::Result;

use crate::config::RecordsConfig;
use crate::db::Db;

/// The change history of one activity, newest first, with collaborators,
/// communities and regions resolved from the store.
pub fn activity_history(db: &Db, activity_id: &str, config: &RecordsConfig) -> Result<Vec<ChangeEvent>> {
    let rows = db.change_rows_for_activity(activity_id)?;
    let aggregator = ChangeEventAggregator::new(db, config.role_labels());
    Ok(aggregator.aggregate(&rows))
}
