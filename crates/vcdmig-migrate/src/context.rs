use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};
use vcdmig_client::{Platform, Scope};
use vcdmig_domain::{MigrationSettings, ObjectDescriptor, ObjectType};

use crate::error::MigrateError;
use crate::prompt::Prompter;
use crate::report::MigrationReport;

/// Per-run operator choices taken from the command line.
#[derive(Clone, Default)]
pub struct RunOptions {
    /// Password given to every created local user instead of prompting.
    pub default_password: Option<String>,
    /// Skip the confirmation gate before gateways and networks are created.
    pub assume_yes:       bool,
    /// Target name of the single object being migrated.
    pub rename_to:        Option<String>,
}

impl std::fmt::Debug for RunOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunOptions")
            .field("default_password", &self.default_password.as_ref().map(|_| "<redacted>"))
            .field("assume_yes", &self.assume_yes)
            .field("rename_to", &self.rename_to)
            .finish()
    }
}

/// Where a created object goes on the target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Placement {
    pub org_href: Option<String>,
    pub vdc_href: Option<String>,
}

impl Placement {
    pub fn global() -> Self {
        Self::default()
    }

    pub fn org(org_href: impl Into<String>) -> Self {
        Self { org_href: Some(org_href.into()), vdc_href: None }
    }

    pub fn vdc(org_href: impl Into<String>, vdc_href: impl Into<String>) -> Self {
        Self { org_href: Some(org_href.into()), vdc_href: Some(vdc_href.into()) }
    }

    pub fn scope(&self) -> Scope<'_> {
        Scope { org_href: self.org_href.as_deref(), vdc_href: self.vdc_href.as_deref() }
    }

    pub fn require_org(&self, what: &str) -> Result<&str, MigrateError> {
        self.org_href.as_deref().ok_or_else(|| MigrateError::MissingPlacement {
            what:      what.to_string(),
            container: "organization",
        })
    }

    pub fn require_vdc(&self, what: &str) -> Result<&str, MigrateError> {
        self.vdc_href.as_deref().ok_or_else(|| MigrateError::MissingPlacement {
            what:      what.to_string(),
            container: "vdc",
        })
    }
}

// ── Edge gateway bookkeeping ──────────────────────────────────────────────────

/// `Created → NetworksProvisioned → Edited`. The edit is only legal once
/// every network the gateway serves exists and reports ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EdgeGatewayState {
    Created,
    NetworksProvisioned,
    Edited,
}

impl std::fmt::Display for EdgeGatewayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EdgeGatewayState::Created => "created",
            EdgeGatewayState::NetworksProvisioned => "networks provisioned",
            EdgeGatewayState::Edited => "edited",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct EdgeGatewayRecord {
    pub target_name: String,
    pub target_href: String,
    pub placement:   Placement,
    /// Full source description, replayed by the edit phase.
    pub source:      ObjectDescriptor,
    /// `false` when the gateway already existed on the target.
    pub created:     bool,
    pub state:       EdgeGatewayState,
}

/// Source edge gateway name → what this run did with it.
#[derive(Debug, Clone, Default)]
pub struct EdgeGatewayMap(BTreeMap<String, EdgeGatewayRecord>);

impl EdgeGatewayMap {
    pub fn get(&self, source_name: &str) -> Option<&EdgeGatewayRecord> {
        self.0.get(source_name)
    }

    pub fn get_mut(&mut self, source_name: &str) -> Option<&mut EdgeGatewayRecord> {
        self.0.get_mut(source_name)
    }

    pub fn contains(&self, source_name: &str) -> bool {
        self.0.contains_key(source_name)
    }

    pub fn insert(&mut self, source_name: impl Into<String>, record: EdgeGatewayRecord) {
        self.0.insert(source_name.into(), record);
    }

    /// Source names of the gateways this run created, in name order.
    pub fn created_names(&self) -> Vec<String> {
        self.0
            .iter()
            .filter(|(_, r)| r.created)
            .map(|(n, _)| n.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// ── MigrationContext ──────────────────────────────────────────────────────────

/// Everything one run shares: both sessions, settings, operator choices,
/// the prompter, edge gateway bookkeeping and the report.
pub struct MigrationContext {
    source:            Option<Arc<dyn Platform>>,
    target:            Arc<dyn Platform>,
    pub settings:      MigrationSettings,
    pub options:       RunOptions,
    pub prompter:      Box<dyn Prompter>,
    pub edge_gateways: EdgeGatewayMap,
    pub report:        MigrationReport,
}

impl MigrationContext {
    /// `source` is `None` when descriptions come from exported files.
    pub fn new(
        source: Option<Arc<dyn Platform>>,
        target: Arc<dyn Platform>,
        settings: MigrationSettings,
        options: RunOptions,
        prompter: Box<dyn Prompter>,
    ) -> Self {
        Self {
            source,
            target,
            settings,
            options,
            prompter,
            edge_gateways: EdgeGatewayMap::default(),
            report: MigrationReport::new(),
        }
    }

    pub fn target(&self) -> Arc<dyn Platform> {
        Arc::clone(&self.target)
    }

    pub fn source(&self) -> Option<Arc<dyn Platform>> {
        self.source.clone()
    }

    /// The source session, or an error naming what needed it.
    pub fn require_source(&self, purpose: &str) -> Result<Arc<dyn Platform>, MigrateError> {
        self.source()
            .ok_or_else(|| MigrateError::SourceRequired(purpose.to_string()))
    }

    /// Target-side name for a source object, after configured renames.
    pub fn target_name(&self, object_type: ObjectType, source_name: &str) -> String {
        self.settings.renames.target_name(object_type, source_name)
    }

    /// Close both sessions. Failures are logged, never returned.
    pub async fn close(&mut self) {
        self.report.finish();
        let sessions = self.source.iter().chain(std::iter::once(&self.target));
        for platform in sessions {
            match platform.close().await {
                Ok(()) => debug!(label = platform.label(), "Session closed"),
                Err(e) => warn!(label = platform.label(), error = %e, "Failed to close session"),
            }
        }
    }
}
