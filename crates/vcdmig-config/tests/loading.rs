use std::path::Path;
use std::time::Duration;

use vcdmig_config::{load_settings, ConfigError};
use vcdmig_domain::{MigrationSettings, ObjectType};

#[test]
fn load_valid_fixture() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/migration.yml");
    let s = load_settings(&path).expect("should load without error");

    assert_eq!(s.api_version, "27.0");
    assert_eq!(s.poll.interval, Duration::from_secs(2));
    assert_eq!(s.poll.max_attempts, 10);
    assert_eq!(s.vdc_settle_delay, Duration::ZERO);
    assert_eq!(s.renames.target_name(ObjectType::Organization, "Acme"), "Acme2");
    assert_eq!(s.renames.target_name(ObjectType::EdgeGateway, "Acme-EGW"), "Acme2-EGW");
    assert_eq!(s.provider_vdcs.get("pvdc-gold").map(String::as_str), Some("pvdc-gold-new"));

    let ext = &s.external_networks["Ext-Net"];
    assert_eq!(ext.vcenter, "vc01");
    assert_eq!(ext.port_group_type, "DV_PORTGROUP");
    assert_eq!(s.external_networks["Ext-Legacy"].port_group_type, "NETWORK");
    assert!(!s.services_only_strip_disabled_load_balancer);
}

#[test]
fn missing_file_returns_defaults() {
    let path = Path::new("/nonexistent/path/migration.yml");
    let s = load_settings(path).expect("missing file is not an error");
    assert_eq!(s, MigrationSettings::default());
}

#[test]
fn malformed_file_returns_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("migration.yml");
    std::fs::write(&path, "poll: [1, 2").unwrap();
    let err = load_settings(&path).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { ref origin, .. } if origin == &path.display().to_string()));
}

#[test]
fn unreadable_path_is_a_read_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = load_settings(dir.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Read { ref path, .. } if path == dir.path()));
}
