use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::RoleLabels;
use crate::db::{ChangeRow, Collaborator, Community, Evidence, GroupKey, Region};

/// Looks up the related objects a change row only knows by key.
pub trait EnrichmentSource {
    fn collaborator(&self, id: &str) -> Result<Option<Collaborator>>;
    fn community(&self, id: &str) -> Result<Option<Community>>;
    fn region(&self, id: &str) -> Result<Option<Region>>;
}

/// For callers that only have pre-resolved rows. Every lookup misses.
pub struct NoEnrichment;

impl EnrichmentSource for NoEnrichment {
    fn collaborator(&self, _id: &str) -> Result<Option<Collaborator>> {
        Ok(None)
    }

    fn community(&self, _id: &str) -> Result<Option<Community>> {
        Ok(None)
    }

    fn region(&self, _id: &str) -> Result<Option<Region>> {
        Ok(None)
    }
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct CollaboratorView {
    pub id: String,
    pub name: String,
    pub role_label: String,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct EvidenceView {
    pub id: String,
    pub filename: String,
    pub storage_url: Option<String>,
    pub mime_type: Option<String>,
    pub description: Option<String>,
    pub is_image: bool,
}

impl From<&Evidence> for EvidenceView {
    fn from(evidence: &Evidence) -> Self {
        Self {
            id: evidence.id.clone(),
            filename: evidence.filename.clone(),
            storage_url: evidence.storage_url.clone(),
            mime_type: evidence.mime_type.clone(),
            description: evidence.description.clone(),
            is_image: evidence
                .mime_type
                .as_deref()
                .is_some_and(|mime| mime.starts_with("image/")),
        }
    }
}

/// One logical change: every change row sharing a group key, folded
/// together. Built per read, never stored.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct ChangeEvent {
    pub group_key: String,
    /// Id of the first row seen for the group, used for display.
    pub primary_id: String,
    pub member_row_ids: Vec<String>,
    pub activity_id: String,
    pub description: String,
    pub changed_at: Option<DateTime<Utc>>,
    pub collaborators: Vec<CollaboratorView>,
    pub collaborator_names: String,
    pub communities: Vec<String>,
    pub community_names: String,
    pub regions: Vec<String>,
    pub evidence: Vec<EvidenceView>,
}

/// Folds flat change rows into change events.
pub struct ChangeEventAggregator<'a> {
    source: &'a dyn EnrichmentSource,
    labels: RoleLabels,
}

impl<'a> ChangeEventAggregator<'a> {
    pub fn new(source: &'a dyn EnrichmentSource, labels: RoleLabels) -> Self {
        Self { source, labels }
    }

    /// Groups `rows` by correlation id (falling back to the row id) and
    /// returns one event per group, newest first. Every row lands in exactly
    /// one event. Rows are expected newest first, as the store returns them;
    /// each group takes its description and timestamp from its first row.
    pub fn aggregate(&self, rows: &[ChangeRow]) -> Vec<ChangeEvent> {
        let mut groups: Vec<GroupBuilder> = Vec::new();
        let mut index: HashMap<GroupKey, usize> = HashMap::new();
        let mut lookups = Lookups::default();

        for row in rows {
            let position = *index.entry(row.group_key()).or_insert_with(|| {
                groups.push(GroupBuilder::new(row));
                groups.len() - 1
            });
            groups[position].absorb(row, self, &mut lookups);
        }

        log::debug!("Folded {} change rows into {} events", rows.len(), groups.len());

        // Stable, so ties keep encounter order.
        groups.sort_by(|a, b| newest_first(a.changed_at, b.changed_at));
        groups.into_iter().map(GroupBuilder::finish).collect()
    }

    fn resolve_collaborator(&self, lookups: &mut Lookups, row: &ChangeRow) -> Option<Collaborator> {
        if let Some(collaborator) = &row.collaborator {
            return Some(collaborator.clone());
        }
        cached(&mut lookups.collaborators, &row.collaborator_id, || {
            match self.source.collaborator(&row.collaborator_id) {
                Ok(Some(collaborator)) => Some(collaborator),
                Ok(None) => {
                    log::warn!(
                        "Change {}: collaborator {} not found, omitting",
                        row.id,
                        row.collaborator_id
                    );
                    None
                }
                Err(e) => {
                    log::warn!(
                        "Change {}: failed to resolve collaborator {}: {}",
                        row.id,
                        row.collaborator_id,
                        e
                    );
                    None
                }
            }
        })
    }

    fn resolve_community(&self, lookups: &mut Lookups, row: &ChangeRow) -> Option<String> {
        if let Some(community) = &row.community {
            return Some(community.name.clone());
        }
        let id = row.community_id.as_deref()?;
        cached(&mut lookups.communities, id, || match self.source.community(id) {
            Ok(Some(community)) => Some(community.name),
            Ok(None) => {
                log::warn!("Change {}: community {} not found, omitting", row.id, id);
                None
            }
            Err(e) => {
                log::warn!("Change {}: failed to resolve community {}: {}", row.id, id, e);
                None
            }
        })
    }

    fn resolve_region(&self, lookups: &mut Lookups, row: &ChangeRow) -> Option<String> {
        if let Some(region) = &row.region {
            return Some(region.name.clone());
        }
        let id = row.region_id.as_deref()?;
        cached(&mut lookups.regions, id, || match self.source.region(id) {
            Ok(Some(region)) => Some(region.name),
            Ok(None) => {
                log::warn!("Change {}: region {} not found, omitting", row.id, id);
                None
            }
            Err(e) => {
                log::warn!("Change {}: failed to resolve region {}: {}", row.id, id, e);
                None
            }
        })
    }
}

/// Results of source lookups for one `aggregate` call, hits and misses
/// alike, so each key is fetched and reported once.
#[derive(Default)]
struct Lookups {
    collaborators: HashMap<String, Option<Collaborator>>,
    communities: HashMap<String, Option<String>>,
    regions: HashMap<String, Option<String>>,
}

fn cached<T: Clone>(
    cache: &mut HashMap<String, Option<T>>,
    id: &str,
    lookup: impl FnOnce() -> Option<T>,
) -> Option<T> {
    if let Some(hit) = cache.get(id) {
        return hit.clone();
    }
    let found = lookup();
    cache.insert(id.to_string(), found.clone());
    found
}

/// Later timestamps first, missing timestamps last.
fn newest_first(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => b.cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

struct GroupBuilder {
    group_key: String,
    activity_id: String,
    description: String,
    changed_at: Option<DateTime<Utc>>,
    member_row_ids: Vec<String>,
    collaborators: Vec<CollaboratorView>,
    seen_collaborators: HashSet<String>,
    communities: Vec<String>,
    regions: Vec<String>,
    evidence: Vec<EvidenceView>,
    seen_evidence: HashSet<String>,
}

impl GroupBuilder {
    fn new(first: &ChangeRow) -> Self {
        Self {
            group_key: first.group_key().as_str().to_string(),
            activity_id: first.activity_id.clone(),
            description: first.description.clone(),
            changed_at: first.changed_at,
            member_row_ids: Vec::new(),
            collaborators: Vec::new(),
            seen_collaborators: HashSet::new(),
            communities: Vec::new(),
            regions: Vec::new(),
            evidence: Vec::new(),
            seen_evidence: HashSet::new(),
        }
    }

    fn absorb(&mut self, row: &ChangeRow, aggregator: &ChangeEventAggregator, lookups: &mut Lookups) {
        self.member_row_ids.push(row.id.clone());

        if !self.seen_collaborators.contains(&row.collaborator_id) {
            if let Some(collaborator) = aggregator.resolve_collaborator(lookups, row) {
                self.seen_collaborators.insert(row.collaborator_id.clone());
                self.collaborators.push(CollaboratorView {
                    id: collaborator.id,
                    name: collaborator.name,
                    role_label: aggregator.labels.for_collaborator(collaborator.is_staff).to_string(),
                });
            }
        }

        if let Some(name) = aggregator.resolve_community(lookups, row) {
            push_unique(&mut self.communities, name);
        }
        if let Some(name) = aggregator.resolve_region(lookups, row) {
            push_unique(&mut self.regions, name);
        }

        for item in &row.evidence {
            let key = match item.storage_url.as_deref() {
                Some(url) if !url.is_empty() => url,
                _ => item.id.as_str(),
            };
            if self.seen_evidence.insert(key.to_string()) {
                self.evidence.push(EvidenceView::from(item));
            }
        }
    }

    fn finish(self) -> ChangeEvent {
        let collaborator_names = self
            .collaborators
            .iter()
            .map(|c| c.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        ChangeEvent {
            primary_id: self.member_row_ids.first().cloned().unwrap_or_default(),
            group_key: self.group_key,
            member_row_ids: self.member_row_ids,
            activity_id: self.activity_id,
            description: self.description,
            changed_at: self.changed_at,
            collaborators: self.collaborators,
            collaborator_names,
            community_names: self.communities.join(", "),
            communities: self.communities,
            regions: self.regions,
            evidence: self.evidence,
        }
    }
}

fn push_unique(names: &mut Vec<String>, name: String) {
    if !names.contains(&name) {
        names.push(name);
    }
}
