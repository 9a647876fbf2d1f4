use std::path::Path;
use std::time::Duration;

use tracing::debug;
use vcdmig_domain::{MigrationSettings, ObjectType, PollPolicy, PortGroupBacking, Renames};

use crate::error::ConfigError;
use crate::raw::RawSettings;

/// Load the settings file at `path`.
///
/// A missing file is not an error: every setting has a default, so the
/// migrator runs with [`MigrationSettings::default`].
///
/// ```text
/// api_version: "31.0"
/// poll: { interval_secs: 5, max_attempts: 120 }
/// vdc_settle_delay_secs: 30
/// renames:
///   organization: { Acme: Acme2 }
///   edge_gateway: { Acme-EGW: Acme2-EGW }
/// provider_vdcs: { pvdc-gold: pvdc-gold-new }
/// external_networks:
///   Ext-Net: { vcenter: vc01, port_group: dvportgroup-42 }
/// ```
pub fn load_settings(path: &Path) -> Result<MigrationSettings, ConfigError> {
    if !path.exists() {
        debug!("No settings file at {}, using defaults", path.display());
        return Ok(MigrationSettings::default());
    }
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    debug!("Loading settings from {}", path.display());
    parse_settings(&content, &path.display().to_string())
}

/// Parse settings from YAML text; `origin` only labels errors.
pub fn parse_settings(content: &str, origin: &str) -> Result<MigrationSettings, ConfigError> {
    // An empty document deserialises to `null`, not to an empty mapping.
    let raw: RawSettings = if content.trim().is_empty() {
        RawSettings::default()
    } else {
        serde_yaml::from_str(content).map_err(|source| ConfigError::Parse {
            origin: origin.to_string(),
            source,
        })?
    };
    convert_settings(raw, origin)
}

fn convert_settings(raw: RawSettings, origin: &str) -> Result<MigrationSettings, ConfigError> {
    let defaults = MigrationSettings::default();

    let poll = match raw.poll {
        Some(p) => {
            let interval = p
                .interval_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.poll.interval);
            let max_attempts = p.max_attempts.unwrap_or(defaults.poll.max_attempts);
            if max_attempts == 0 {
                return Err(ConfigError::InvalidValue {
                    origin: origin.to_string(),
                    field: "poll.max_attempts",
                    message: "must be at least 1".into(),
                });
            }
            PollPolicy { interval, max_attempts }
        }
        None => defaults.poll,
    };

    let mut renames = Renames::new();
    for (type_key, entries) in raw.renames {
        let object_type: ObjectType = type_key.parse().map_err(|_| ConfigError::UnknownObjectType {
            origin: origin.to_string(),
            key: type_key.clone(),
        })?;
        for (from, to) in entries {
            renames.insert(object_type, from, to);
        }
    }

    let external_networks = raw
        .external_networks
        .into_iter()
        .map(|(name, pg)| {
            (
                name,
                PortGroupBacking {
                    vcenter: pg.vcenter,
                    port_group: pg.port_group,
                    port_group_type: pg.port_group_type,
                },
            )
        })
        .collect();

    Ok(MigrationSettings {
        api_version: raw.api_version.unwrap_or(defaults.api_version),
        poll,
        vdc_settle_delay: raw
            .vdc_settle_delay_secs
            .map(Duration::from_secs)
            .unwrap_or(defaults.vdc_settle_delay),
        renames,
        provider_vdcs: raw.provider_vdcs,
        external_networks,
        services_only_strip_disabled_load_balancer: raw
            .services_only_strip_disabled_load_balancer,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_gives_defaults() {
        let s = parse_settings("", "inline").unwrap();
        assert_eq!(s, MigrationSettings::default());
    }

    #[test]
    fn zero_attempts_rejected() {
        let err = parse_settings("poll: { max_attempts: 0 }", "inline").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field: "poll.max_attempts", .. }));
        assert_eq!(err.to_string(), "inline: poll.max_attempts must be at least 1");
    }

    #[test]
    fn unknown_rename_type_rejected() {
        let err = parse_settings("renames: { catalog: { a: b } }", "inline").unwrap_err();
        assert!(matches!(&err, ConfigError::UnknownObjectType { key, .. } if key == "catalog"));
    }

    #[test]
    fn unknown_top_level_key_rejected() {
        let err = parse_settings("passwords: { alice: secret }", "migration.yml").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        let message = err.to_string();
        assert!(message.starts_with("invalid settings in migration.yml"));
        assert!(message.contains("passwords"));
    }
}
