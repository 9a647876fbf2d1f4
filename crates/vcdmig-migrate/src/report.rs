use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use vcdmig_domain::ObjectType;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Change {
    Created { object_type: ObjectType, name: String, href: String },
    Skipped { object_type: ObjectType, name: String, reason: String },
    Edited { object_type: ObjectType, name: String },
    ServicesReapplied { name: String },
    StorageProfilesProvisioned { vdc: String, profiles: Vec<String>, default: String },
}

/// Everything a run did to the target, in order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationReport {
    pub started_at:  DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub changes:     Vec<Change>,
}

impl Default for MigrationReport {
    fn default() -> Self {
        Self::new()
    }
}

impl MigrationReport {
    pub fn new() -> Self {
        Self { started_at: Utc::now(), finished_at: None, changes: Vec::new() }
    }

    /// Append a change and announce it.
    pub fn record(&mut self, change: Change) {
        match &change {
            Change::Created { object_type, name, href } => {
                info!(%object_type, %name, %href, "Created");
            }
            Change::Skipped { object_type, name, reason } => {
                warn!(%object_type, %name, %reason, "Skipped");
            }
            Change::Edited { object_type, name } => info!(%object_type, %name, "Edited"),
            Change::ServicesReapplied { name } => info!(%name, "Edge gateway services reapplied"),
            Change::StorageProfilesProvisioned { vdc, profiles, default } => {
                info!(%vdc, ?profiles, %default, "Storage profiles provisioned");
            }
        }
        self.changes.push(change);
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn created(&self) -> impl Iterator<Item = (ObjectType, &str)> {
        self.changes.iter().filter_map(|c| match c {
            Change::Created { object_type, name, .. } => Some((*object_type, name.as_str())),
            _ => None,
        })
    }

    pub fn created_count(&self) -> usize {
        self.created().count()
    }

    pub fn skipped_count(&self) -> usize {
        self.changes
            .iter()
            .filter(|c| matches!(c, Change::Skipped { .. }))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_by_kind() {
        let mut report = MigrationReport::new();
        report.record(Change::Created {
            object_type: ObjectType::Organization,
            name:        "Acme".into(),
            href:        "h".into(),
        });
        report.record(Change::Skipped {
            object_type: ObjectType::Role,
            name:        "Operator".into(),
            reason:      "already exists".into(),
        });
        report.record(Change::Edited { object_type: ObjectType::EdgeGateway, name: "Acme-EGW".into() });
        report.finish();

        assert_eq!(report.created_count(), 1);
        assert_eq!(report.skipped_count(), 1);
        assert!(report.finished_at.is_some());
        assert_eq!(report.created().next(), Some((ObjectType::Organization, "Acme")));
    }

    #[test]
    fn serialises_with_kind_tag() {
        let change = Change::ServicesReapplied { name: "Acme-EGW".into() };
        let json = serde_json::to_value(&change).unwrap();
        assert_eq!(json["kind"], "ServicesReapplied");
        assert_eq!(json["name"], "Acme-EGW");
    }
}
