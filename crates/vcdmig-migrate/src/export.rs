//! Writing descriptions to files and reading them back.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::info;
use vcdmig_client::reader::admin_href;
use vcdmig_client::{find_by_locator, search, Platform};
use vcdmig_domain::{ObjectDescriptor, ObjectType};

use crate::error::MigrateError;
use crate::locate::{locate, Containers, Locator};

/// `<type>-<name>.xml`, with anything but alphanumerics, `-`, `_` and `.`
/// replaced by `_`.
pub fn export_file_name(object_type: ObjectType, name: &str) -> String {
    let safe: String = name
        .chars()
        .map(|c| if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
        .collect();
    format!("{}-{}.xml", object_type, safe)
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> MigrateError + '_ {
    move |source| MigrateError::Io { path: path.to_path_buf(), source }
}

pub async fn write_descriptor(descriptor: &ObjectDescriptor, path: &Path) -> Result<(), MigrateError> {
    let xml = descriptor.to_xml()?;
    fs::write(path, xml).await.map_err(io_error(path))?;
    info!(object_type = %descriptor.object_type(), name = descriptor.name(), path = %path.display(), "Exported");
    Ok(())
}

/// Read an exported description; the type comes from the root element.
pub async fn load_descriptor(path: &Path) -> Result<ObjectDescriptor, MigrateError> {
    let xml = fs::read_to_string(path).await.map_err(io_error(path))?;
    Ok(ObjectDescriptor::from_xml(&xml)?)
}

/// Export one object. When `dest` is a directory the file is named by
/// [`export_file_name`].
pub async fn export_one(
    platform: &dyn Platform,
    object_type: ObjectType,
    locator: &Locator,
    containers: &Containers,
    dest: &Path,
) -> Result<PathBuf, MigrateError> {
    let descriptor = locate(platform, object_type, locator, containers).await?;
    let is_dir = fs::metadata(dest).await.is_ok_and(|m| m.is_dir());
    let path = if is_dir {
        dest.join(export_file_name(object_type, descriptor.name()))
    } else {
        dest.to_path_buf()
    };
    write_descriptor(&descriptor, &path).await?;
    Ok(path)
}

/// Export every object of `object_type` whose name matches `pattern`
/// (`*` wildcards) into `dir`, one file each.
pub async fn export_matching(
    platform: &dyn Platform,
    object_type: ObjectType,
    pattern: &str,
    dir: &Path,
) -> Result<Vec<PathBuf>, MigrateError> {
    fs::create_dir_all(dir).await.map_err(io_error(dir))?;
    let hits = search(platform, object_type.query_type(), pattern).await?;
    info!(%object_type, pattern, count = hits.len(), "Exporting matches");

    let mut written = Vec::with_capacity(hits.len());
    for hit in hits {
        let descriptor = find_by_locator(platform, &admin_href(&hit.href), object_type).await?;
        let path = dir.join(export_file_name(object_type, descriptor.name()));
        write_descriptor(&descriptor, &path).await?;
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vcdmig_client::SimPlatform;

    #[test]
    fn file_names_are_filesystem_safe() {
        assert_eq!(export_file_name(ObjectType::EdgeGateway, "Acme-EGW"), "edge_gateway-Acme-EGW.xml");
        assert_eq!(export_file_name(ObjectType::OrgVdcNetwork, "net/1 (dmz)"), "org_vdc_network-net_1__dmz_.xml");
    }

    #[tokio::test]
    async fn exported_file_loads_back_with_its_type() {
        let sim = SimPlatform::new("source");
        sim.seed_org("Acme").await;
        let dir = tempfile::tempdir().unwrap();

        let path = export_one(
            &sim,
            ObjectType::Organization,
            &Locator::Name("Acme".into()),
            &Containers::default(),
            dir.path(),
        )
        .await
        .unwrap();
        assert_eq!(path.file_name().unwrap(), "organization-Acme.xml");

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("<?xml"));
        let loaded = load_descriptor(&path).await.unwrap();
        assert_eq!(loaded.object_type(), ObjectType::Organization);
        assert_eq!(loaded.name(), "Acme");
        assert_eq!(loaded.root().child_text("FullName"), Some("Acme"));
    }

    #[tokio::test]
    async fn export_matching_writes_one_file_per_hit() {
        let sim = SimPlatform::new("source");
        sim.seed_org("Acme").await;
        sim.seed_org("Acme-Dev").await;
        sim.seed_org("Globex").await;
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("orgs");

        let mut written = export_matching(&sim, ObjectType::Organization, "Acme*", &out)
            .await
            .unwrap();
        written.sort();
        let names: Vec<_> = written
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["organization-Acme-Dev.xml", "organization-Acme.xml"]);
    }

    #[tokio::test]
    async fn unknown_root_tag_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.xml");
        std::fs::write(&path, "<Catalog name=\"c\"/>").unwrap();
        assert!(matches!(
            load_descriptor(&path).await,
            Err(MigrateError::Domain(vcdmig_domain::DomainError::UnknownRootTag(_)))
        ));
    }
}
