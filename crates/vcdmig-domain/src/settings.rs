use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::ObjectType;

/// API version sent in the `Accept` header when none is configured.
pub const DEFAULT_API_VERSION: &str = "31.0";

/// Fixed-interval polling bounded by an attempt count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval:     Duration,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self { interval: Duration::from_secs(5), max_attempts: 120 }
    }
}

/// vCenter port group that backs an external network on the target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortGroupBacking {
    /// Name of the vCenter registered with the target instance.
    pub vcenter:         String,
    /// Managed object reference of the port group, e.g. `dvportgroup-42`.
    pub port_group:      String,
    /// `DV_PORTGROUP` or `NETWORK`.
    pub port_group_type: String,
}

/// Per-type source-name → target-name overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Renames(BTreeMap<ObjectType, BTreeMap<String, String>>);

impl Renames {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, object_type: ObjectType, from: impl Into<String>, to: impl Into<String>) {
        self.0
            .entry(object_type)
            .or_default()
            .insert(from.into(), to.into());
    }

    /// Name the object will carry on the target.
    pub fn target_name(&self, object_type: ObjectType, source_name: &str) -> String {
        self.0
            .get(&object_type)
            .and_then(|m| m.get(source_name))
            .cloned()
            .unwrap_or_else(|| source_name.to_string())
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(BTreeMap::is_empty)
    }
}

/// Operator settings for one run, loaded from the settings file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationSettings {
    pub api_version:       String,
    pub poll:              PollPolicy,
    /// Pause after an OrgVdc reports ready and before its storage profiles
    /// are touched; the platform keeps provisioning in the background.
    pub vdc_settle_delay:  Duration,
    pub renames:           Renames,
    /// Source provider-vdc name → target provider-vdc name.
    pub provider_vdcs:     BTreeMap<String, String>,
    /// External network name → backing port group on the target.
    pub external_networks: BTreeMap<String, PortGroupBacking>,
    /// Services-only reapply keeps a disabled load-balancer block unless set.
    pub services_only_strip_disabled_load_balancer: bool,
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            api_version:       DEFAULT_API_VERSION.to_string(),
            poll:              PollPolicy::default(),
            vdc_settle_delay:  Duration::from_secs(30),
            renames:           Renames::new(),
            provider_vdcs:     BTreeMap::new(),
            external_networks: BTreeMap::new(),
            services_only_strip_disabled_load_balancer: false,
        }
    }
}
