use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Raw YAML representation of the settings file (`migration.yml`).
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RawSettings {
    pub api_version: Option<String>,
    pub poll: Option<RawPoll>,
    pub vdc_settle_delay_secs: Option<u64>,
    /// Object type (as written on the CLI) → source name → target name.
    #[serde(default)]
    pub renames: BTreeMap<String, BTreeMap<String, String>>,
    #[serde(default)]
    pub provider_vdcs: BTreeMap<String, String>,
    #[serde(default)]
    pub external_networks: BTreeMap<String, RawPortGroup>,
    #[serde(default)]
    pub services_only_strip_disabled_load_balancer: bool,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RawPoll {
    pub interval_secs: Option<u64>,
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RawPortGroup {
    pub vcenter: String,
    pub port_group: String,
    #[serde(default = "default_port_group_type")]
    pub port_group_type: String,
}

fn default_port_group_type() -> String {
    "DV_PORTGROUP".to_string()
}
