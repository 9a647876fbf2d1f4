use async_trait::async_trait;
use vcdmig_client::platform::name_filter;
use vcdmig_domain::{Element, ObjectDescriptor, ObjectType, PortGroupBacking};

use super::common::{created_href, strip_server_fields, submit};
use super::ObjectBuilder;
use crate::context::{MigrationContext, Placement};
use crate::error::MigrateError;
use crate::prompt::choose_item;
use crate::resolver::Resolver;

const VMEXT_NS: &str = "http://www.vmware.com/vcloud/extension/v1.5";
const PORT_GROUP_TYPES: [&str; 2] = ["DV_PORTGROUP", "NETWORK"];

pub struct ExternalNetworkBuilder;

/// The vCenter port group backing `name` on the target: from the settings
/// file, or asked for.
pub fn port_group_backing(ctx: &MigrationContext, name: &str) -> Result<PortGroupBacking, MigrateError> {
    if let Some(backing) = ctx.settings.external_networks.get(name) {
        return Ok(backing.clone());
    }
    let vcenter = ctx
        .prompter
        .input(&format!("vCenter backing external network '{}'", name))?;
    let port_group = ctx
        .prompter
        .input(&format!("Port group MoRef for external network '{}'", name))?;
    let port_group_type = choose_item(
        ctx.prompter.as_ref(),
        &format!("Port group type for external network '{}'", name),
        &PORT_GROUP_TYPES,
        |t| t.to_string(),
    )?;
    Ok(PortGroupBacking {
        vcenter:         vcenter.trim().to_string(),
        port_group:      port_group.trim().to_string(),
        port_group_type: port_group_type.to_string(),
    })
}

/// Payload without its backing: allocations and the source vCenter binding
/// are instance-specific.
pub fn external_network_payload(source: &ObjectDescriptor, target_name: &str) -> ObjectDescriptor {
    let mut draft = source.clone();
    draft.set_name(target_name);
    let root = draft.root_mut();
    strip_server_fields(root);
    root.remove_children("VimPortGroupRef");
    root.remove_children("VimPortGroupRefs");
    root.prune("AllocatedIpAddresses");
    root.prune("SubAllocations");
    draft
}

pub fn port_group_ref(vcenter_href: &str, vcenter_name: &str, backing: &PortGroupBacking) -> Element {
    Element::new("vmext:VimPortGroupRef")
        .with_child(
            Element::new("vmext:VimServerRef")
                .with_attr("href", vcenter_href)
                .with_attr("name", vcenter_name)
                .with_attr("type", "application/vnd.vmware.admin.vmwvirtualcenter+xml"),
        )
        .with_child(Element::new("vmext:MoRef").with_text(backing.port_group.clone()))
        .with_child(Element::new("vmext:VimObjectType").with_text(backing.port_group_type.clone()))
}

#[async_trait]
impl ObjectBuilder for ExternalNetworkBuilder {
    fn object_type(&self) -> ObjectType {
        ObjectType::ExternalNetwork
    }

    async fn create(
        &self,
        ctx: &mut MigrationContext,
        source: &ObjectDescriptor,
        target_name: &str,
        placement: &Placement,
    ) -> Result<String, MigrateError> {
        let target = ctx.target();
        let backing = port_group_backing(ctx, source.name())?;

        let vcenter_href = target
            .query("virtualCenter", &name_filter(&backing.vcenter))
            .await?
            .into_iter()
            .find(|r| r.attr("name") == Some(backing.vcenter.as_str()))
            .and_then(|r| r.attr("href").map(str::to_string))
            .ok_or_else(|| MigrateError::reference_not_found("vCenter", backing.vcenter.clone()))?;

        let draft = external_network_payload(source, target_name);
        let mut payload = Resolver::new(target.as_ref(), placement, &ctx.settings.renames)
            .rewrite(&draft)
            .await?
            .into_root();
        payload.set_attr("xmlns:vmext", VMEXT_NS);
        payload.children.push(port_group_ref(&vcenter_href, &backing.vcenter, &backing));

        let response = submit(
            target.as_ref(),
            &format!("{}/api/admin/extension/externalnets", target.base_url()),
            ObjectType::ExternalNetwork.media_type(),
            &payload,
            &ctx.settings.poll,
        )
        .await?;
        created_href(&response, &format!("external network '{}'", target_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_drops_allocations_and_backing() {
        let xml = r#"<VMWExternalNetwork xmlns="http://www.vmware.com/vcloud/v1.5" xmlns:vmext="http://www.vmware.com/vcloud/extension/v1.5" name="Ext-Net" href="https://s/api/admin/extension/externalnet/1">
            <Description>uplink</Description>
            <Configuration>
              <IpScopes><IpScope>
                <Gateway>10.0.0.1</Gateway><Netmask>255.255.255.0</Netmask>
                <AllocatedIpAddresses><IpAddress>10.0.0.2</IpAddress></AllocatedIpAddresses>
                <SubAllocations><SubAllocation><EdgeGateway href="https://s/api/admin/edgeGateway/1" name="Acme-EGW"/></SubAllocation></SubAllocations>
              </IpScope></IpScopes>
              <FenceMode>isolated</FenceMode>
            </Configuration>
            <vmext:VimPortGroupRef>
              <vmext:VimServerRef href="https://s/api/admin/extension/vimServer/1" name="vc-old"/>
              <vmext:MoRef>dvportgroup-1</vmext:MoRef>
              <vmext:VimObjectType>DV_PORTGROUP</vmext:VimObjectType>
            </vmext:VimPortGroupRef>
          </VMWExternalNetwork>"#;
        let desc = ObjectDescriptor::from_xml(xml).unwrap();
        let out = external_network_payload(&desc, "Ext-Net");
        assert!(out.references().is_empty());
        assert!(out.root().child("VimPortGroupRef").is_none());
        assert!(out.root().find(&["Configuration", "IpScopes", "IpScope", "Gateway"]).is_some());
    }

    #[test]
    fn port_group_ref_shape() {
        let backing = PortGroupBacking {
            vcenter:         "vc-new".into(),
            port_group:      "dvportgroup-42".into(),
            port_group_type: "DV_PORTGROUP".into(),
        };
        let el = port_group_ref("https://t/vc/1", "vc-new", &backing);
        assert_eq!(el.name, "vmext:VimPortGroupRef");
        assert_eq!(el.child("VimServerRef").unwrap().attr("href"), Some("https://t/vc/1"));
        assert_eq!(el.child_text("MoRef"), Some("dvportgroup-42"));
        assert_eq!(el.child_text("VimObjectType"), Some("DV_PORTGROUP"));
    }
}
