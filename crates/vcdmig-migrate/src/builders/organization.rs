use async_trait::async_trait;
use vcdmig_domain::{Element, ObjectDescriptor, ObjectType};

use super::common::{created_href, keep_children, strip_self_links, strip_server_fields, submit};
use super::ObjectBuilder;
use crate::context::{MigrationContext, Placement};
use crate::error::MigrateError;

const ORG_FIELDS: &[&str] = &["Description", "FullName", "IsEnabled", "Settings"];

pub struct OrganizationBuilder;

/// `AdminOrg` creation payload: the tenant's own fields only. Users, vdcs,
/// networks and catalogs are listed in the source description but created
/// separately (or not at all).
pub fn organization_payload(source: &ObjectDescriptor, target_name: &str) -> Element {
    let mut root = source.root().clone();
    root.name = root.sibling_name("AdminOrg");
    strip_server_fields(&mut root);
    keep_children(&mut root, ORG_FIELDS);
    if let Some(settings) = root.child_mut("Settings") {
        strip_self_links(settings);
    }
    root.set_attr("name", target_name);
    if root.child("FullName").is_none() {
        root.insert_before(Element::new("FullName").with_text(target_name), &["IsEnabled", "Settings"]);
    }
    root
}

#[async_trait]
impl ObjectBuilder for OrganizationBuilder {
    fn object_type(&self) -> ObjectType {
        ObjectType::Organization
    }

    async fn create(
        &self,
        ctx: &mut MigrationContext,
        source: &ObjectDescriptor,
        target_name: &str,
        _placement: &Placement,
    ) -> Result<String, MigrateError> {
        let target = ctx.target();
        let payload = organization_payload(source, target_name);
        let href = format!("{}/api/admin/orgs", target.base_url());
        let response = submit(
            target.as_ref(),
            &href,
            ObjectType::Organization.media_type(),
            &payload,
            &ctx.settings.poll,
        )
        .await?;
        created_href(&response, &format!("organization '{}'", target_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_keeps_tenant_fields_only() {
        let xml = r#"<AdminOrg xmlns="http://www.vmware.com/vcloud/v1.5" name="Acme" href="https://s/api/admin/org/1">
            <Link rel="edit" href="https://s/api/admin/org/1"/>
            <Description>Acme Corp</Description>
            <FullName>Acme Corporation</FullName>
            <IsEnabled>true</IsEnabled>
            <Settings>
              <OrgGeneralSettings href="https://s/api/admin/org/1/settings/general">
                <Link rel="edit" href="https://s/api/admin/org/1/settings/general"/>
                <DeployedVMQuota>0</DeployedVMQuota>
              </OrgGeneralSettings>
            </Settings>
            <Users><UserReference href="https://s/api/admin/user/1" name="alice"/></Users>
            <Vdcs><Vdc href="https://s/api/vdc/1" name="Acme-VDC"/></Vdcs>
          </AdminOrg>"#;
        let desc = ObjectDescriptor::from_xml(xml).unwrap();
        let payload = organization_payload(&desc, "Acme2");

        assert_eq!(payload.attr("name"), Some("Acme2"));
        assert_eq!(payload.attr("href"), None);
        assert_eq!(payload.attr("xmlns"), Some("http://www.vmware.com/vcloud/v1.5"));
        let names: Vec<_> = payload.children.iter().map(|c| c.local_name()).collect();
        assert_eq!(names, ["Description", "FullName", "IsEnabled", "Settings"]);
        let general = payload.find(&["Settings", "OrgGeneralSettings"]).unwrap();
        assert_eq!(general.attr("href"), None);
        assert!(general.child("Link").is_none());
        assert_eq!(general.child_text("DeployedVMQuota"), Some("0"));
    }

    #[test]
    fn full_name_defaults_to_target_name() {
        let desc = ObjectDescriptor::new(
            ObjectType::Organization,
            Element::new("Org").with_attr("name", "Acme").with_child(Element::new("IsEnabled").with_text("true")),
        );
        let payload = organization_payload(&desc, "Acme");
        assert_eq!(payload.name, "AdminOrg");
        assert_eq!(payload.children[0].local_name(), "FullName");
    }
}
