//! Edge gateways are created in two phases. The gateway has to exist before
//! the routed networks that hang off it, but its internal interfaces point
//! at those very networks. So the gateway is first created with its uplinks
//! only; once every network exists the full description is applied as an
//! edit.

use std::collections::BTreeSet;

use async_trait::async_trait;
use tracing::{debug, info};
use vcdmig_client::poll::{wait_for_tasks, wait_until_ready};
use vcdmig_client::find;
use vcdmig_domain::{sanitize_description, Element, ObjectDescriptor, ObjectType};

use super::common::{created_href, strip_server_fields, submit};
use super::ObjectBuilder;
use crate::context::{EdgeGatewayState, MigrationContext, Placement};
use crate::error::MigrateError;
use crate::report::Change;
use crate::resolver::Resolver;

const SERVICE_CONFIGURATION: &str = "application/vnd.vmware.admin.edgeGatewayServiceConfiguration+xml";

/// Services the platform refuses to accept while disabled and configured.
const DISABLED_DROPPABLE: &[&str] = &[
    "GatewayDhcpService",
    "GatewayIpsecVpnService",
    "LoadBalancerService",
    "StaticRoutingService",
];

fn interfaces(root: &Element) -> Vec<&Element> {
    root.find(&["Configuration", "GatewayInterfaces"])
        .map(|g| g.children_named("GatewayInterface").collect())
        .unwrap_or_default()
}

fn is_internal(iface: &Element) -> bool {
    iface
        .child_text("InterfaceType")
        .is_some_and(|t| t.eq_ignore_ascii_case("internal"))
}

/// Names of the org networks attached as internal interfaces.
pub fn internal_network_names(source: &ObjectDescriptor) -> BTreeSet<String> {
    interfaces(source.root())
        .into_iter()
        .filter(|i| is_internal(i))
        .filter_map(|i| i.child("Network").and_then(|n| n.attr("name")).map(str::to_string))
        .collect()
}

fn references_any(el: &Element, names: &BTreeSet<String>) -> bool {
    let mut hit = false;
    el.walk(&mut |e| {
        if e.attr("href").is_some() && e.attr("name").is_some_and(|n| names.contains(n)) {
            hit = true;
        }
    });
    hit
}

fn is_disabled(service: &Element) -> bool {
    service.child_flag("IsEnabled") == Some(false)
}

/// Remove disabled services from a service configuration; a disabled load
/// balancer survives unless `strip_load_balancer`.
fn drop_disabled_services(services: &mut Element, strip_load_balancer: bool) {
    services.retain_children(|s| {
        let name = s.local_name();
        let droppable = DISABLED_DROPPABLE.contains(&name)
            && (strip_load_balancer || name != "LoadBalancerService");
        !(droppable && is_disabled(s))
    });
}

fn set_flag_if_present(el: &mut Element, name: &str, value: bool) {
    if let Some(c) = el.child_mut(name) {
        c.set_text(value.to_string());
    }
}

fn prepare_common(source: &ObjectDescriptor, target_name: &str) -> ObjectDescriptor {
    let mut draft = source.clone();
    draft.set_name(target_name);
    let root = draft.root_mut();
    strip_server_fields(root);
    if let Some(desc) = root.child_mut("Description") {
        let clean = sanitize_description(desc.text().unwrap_or_default());
        desc.set_text(clean);
    }
    draft
}

/// Create-phase payload: uplinks only, no default route anywhere, no
/// disabled services, no service rules bound to internal networks.
pub fn strip_for_create(source: &ObjectDescriptor, target_name: &str) -> ObjectDescriptor {
    let internal = internal_network_names(source);
    let mut draft = prepare_common(source, target_name);
    let root = draft.root_mut();

    if let Some(config) = root.child_mut("Configuration") {
        set_flag_if_present(config, "UseDefaultRouteForDnsRelay", false);
        if let Some(ifaces) = config.child_mut("GatewayInterfaces") {
            ifaces.retain_children(|i| !(i.local_name() == "GatewayInterface" && is_internal(i)));
            for iface in ifaces.children_named_mut("GatewayInterface") {
                set_flag_if_present(iface, "UseForDefaultRoute", false);
                for subnet in iface.children_named_mut("SubnetParticipation") {
                    set_flag_if_present(subnet, "UseForDefaultRoute", false);
                }
            }
        }
        if let Some(services) = config.child_mut("EdgeGatewayServiceConfiguration") {
            drop_disabled_services(services, true);
            for service in services.children.iter_mut() {
                service.retain_children(|rule| !references_any(rule, &internal));
            }
        }
    }
    draft
}

fn flagged(el: &Element) -> bool {
    el.child_flag("UseForDefaultRoute").unwrap_or(false)
}

/// Edit-phase payload: every interface back, exactly one default route.
///
/// The default goes to the first interface the source flagged at either
/// level, and within it to the first flagged subnet, or to its first subnet
/// when only the interface itself carried the flag.
pub fn prepare_for_edit(source: &ObjectDescriptor, target_name: &str) -> ObjectDescriptor {
    let mut draft = prepare_common(source, target_name);
    let root = draft.root_mut();

    if let Some(ifaces) = root.find_mut(&["Configuration", "GatewayInterfaces"]) {
        let chosen = ifaces
            .children_named("GatewayInterface")
            .position(|i| flagged(i) || i.children_named("SubnetParticipation").any(flagged));
        for (idx, iface) in ifaces.children_named_mut("GatewayInterface").enumerate() {
            let is_default = chosen == Some(idx);
            set_flag_if_present(iface, "UseForDefaultRoute", is_default);
            let chosen_subnet = if is_default {
                Some(iface.children_named("SubnetParticipation").position(flagged).unwrap_or(0))
            } else {
                None
            };
            for (sidx, subnet) in iface.children_named_mut("SubnetParticipation").enumerate() {
                if chosen_subnet == Some(sidx) {
                    subnet.set_child_text("UseForDefaultRoute", "true");
                } else {
                    set_flag_if_present(subnet, "UseForDefaultRoute", false);
                }
            }
        }
    }
    if let Some(services) = root.find_mut(&["Configuration", "EdgeGatewayServiceConfiguration"]) {
        drop_disabled_services(services, true);
    }
    draft
}

/// The service configuration alone, as submitted to `configureServices`.
pub fn services_subtree(source: &ObjectDescriptor, strip_disabled_load_balancer: bool) -> Option<ObjectDescriptor> {
    let mut services = source
        .root()
        .find(&["Configuration", "EdgeGatewayServiceConfiguration"])?
        .clone();
    services.name = "EdgeGatewayServiceConfiguration".into();
    services.set_attr("xmlns", "http://www.vmware.com/vcloud/v1.5");
    services.prune("Link");
    drop_disabled_services(&mut services, strip_disabled_load_balancer);
    Some(ObjectDescriptor::new(ObjectType::EdgeGateway, services))
}

pub struct EdgeGatewayBuilder;

#[async_trait]
impl ObjectBuilder for EdgeGatewayBuilder {
    fn object_type(&self) -> ObjectType {
        ObjectType::EdgeGateway
    }

    /// Create phase only; see [`edit_edge_gateway`].
    async fn create(
        &self,
        ctx: &mut MigrationContext,
        source: &ObjectDescriptor,
        target_name: &str,
        placement: &Placement,
    ) -> Result<String, MigrateError> {
        let what = format!("edge gateway '{}'", target_name);
        let vdc = placement.require_vdc(&what)?.to_string();
        let target = ctx.target();

        let draft = strip_for_create(source, target_name);
        let payload = Resolver::new(target.as_ref(), placement, &ctx.settings.renames)
            .rewrite(&draft)
            .await?;
        let response = submit(
            target.as_ref(),
            &format!("{}/edgeGateways", vdc),
            ObjectType::EdgeGateway.media_type(),
            payload.root(),
            &ctx.settings.poll,
        )
        .await?;
        let href = created_href(&response, &what)?;
        wait_until_ready(target.as_ref(), &href, &what, &ctx.settings.poll).await?;
        Ok(href)
    }
}

/// Apply the full source description to a gateway created earlier in this
/// run. Only legal once its networks are provisioned.
pub async fn edit_edge_gateway(ctx: &mut MigrationContext, source_name: &str) -> Result<(), MigrateError> {
    let record = ctx
        .edge_gateways
        .get(source_name)
        .cloned()
        .ok_or_else(|| MigrateError::Internal(format!("edge gateway '{}' was not tracked", source_name)))?;
    if record.state != EdgeGatewayState::NetworksProvisioned {
        return Err(MigrateError::GatewayNotReady {
            name:  record.target_name.clone(),
            state: record.state.to_string(),
        });
    }

    let target = ctx.target();
    let what = format!("edge gateway '{}'", record.target_name);
    let draft = prepare_for_edit(&record.source, &record.target_name);
    let payload = Resolver::new(target.as_ref(), &record.placement, &ctx.settings.renames)
        .rewrite(&draft)
        .await?;

    info!(name = %record.target_name, "Applying full edge gateway configuration");
    let response = target
        .put(&record.target_href, ObjectType::EdgeGateway.media_type(), payload.root())
        .await?;
    wait_for_tasks(target.as_ref(), &response, &ctx.settings.poll).await?;
    wait_until_ready(target.as_ref(), &record.target_href, &what, &ctx.settings.poll).await?;

    if let Some(r) = ctx.edge_gateways.get_mut(source_name) {
        r.state = EdgeGatewayState::Edited;
    }
    ctx.report.record(Change::Edited {
        object_type: ObjectType::EdgeGateway,
        name:        record.target_name,
    });
    Ok(())
}

/// Whether every network the gateway's full description references already
/// resolves on the target.
pub async fn edit_is_resolvable(
    ctx: &MigrationContext,
    source: &ObjectDescriptor,
    target_name: &str,
    placement: &Placement,
) -> Result<bool, MigrateError> {
    let target = ctx.target();
    let draft = prepare_for_edit(source, target_name);
    match Resolver::new(target.as_ref(), placement, &ctx.settings.renames)
        .rewrite(&draft)
        .await
    {
        Ok(_) => Ok(true),
        Err(MigrateError::ReferenceNotFound { object_type, name }) => {
            debug!(%object_type, %name, "Gateway edit not resolvable yet");
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

/// Re-submit only the service configuration of an existing target gateway;
/// returns the gateway's href.
pub async fn reapply_services(
    ctx: &mut MigrationContext,
    source: &ObjectDescriptor,
    target_name: &str,
    placement: &Placement,
) -> Result<String, MigrateError> {
    let target = ctx.target();
    let existing = find(target.as_ref(), ObjectType::EdgeGateway, target_name, placement.scope())
        .await?
        .ok_or_else(|| MigrateError::reference_not_found(ObjectType::EdgeGateway, target_name))?;
    let edge_href = existing
        .href()
        .ok_or_else(|| MigrateError::Internal(format!("edge gateway '{}' has no href", target_name)))?
        .to_string();

    let Some(services) = services_subtree(source, ctx.settings.services_only_strip_disabled_load_balancer) else {
        info!(name = target_name, "Source gateway has no service configuration; nothing to reapply");
        return Ok(edge_href);
    };
    let payload = Resolver::new(target.as_ref(), placement, &ctx.settings.renames)
        .rewrite(&services)
        .await?;
    submit(
        target.as_ref(),
        &format!("{}/action/configureServices", edge_href),
        SERVICE_CONFIGURATION,
        payload.root(),
        &ctx.settings.poll,
    )
    .await?;
    ctx.report.record(Change::ServicesReapplied { name: target_name.to_string() });
    Ok(edge_href)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE_EGW: &str = r#"<EdgeGateway xmlns="http://www.vmware.com/vcloud/v1.5" name="Acme-EGW" href="https://s/api/admin/edgeGateway/1" status="1">
      <Link rel="edit" href="https://s/api/admin/edgeGateway/1"/>
      <Description>Acme &amp; friends
edge</Description>
      <Configuration>
        <GatewayBackingConfig>compact</GatewayBackingConfig>
        <GatewayInterfaces>
          <GatewayInterface>
            <Name>Ext-Net</Name>
            <Network href="https://s/api/admin/network/ext" name="Ext-Net" type="application/vnd.vmware.admin.network+xml"/>
            <InterfaceType>uplink</InterfaceType>
            <SubnetParticipation><Gateway>10.0.0.1</Gateway><Netmask>255.255.255.0</Netmask><IpAddress>10.0.0.2</IpAddress><UseForDefaultRoute>true</UseForDefaultRoute></SubnetParticipation>
            <SubnetParticipation><Gateway>10.0.1.1</Gateway><Netmask>255.255.255.0</Netmask><UseForDefaultRoute>true</UseForDefaultRoute></SubnetParticipation>
            <UseForDefaultRoute>true</UseForDefaultRoute>
          </GatewayInterface>
          <GatewayInterface>
            <Name>Acme-Net1</Name>
            <Network href="https://s/api/admin/network/net1" name="Acme-Net1" type="application/vnd.vmware.admin.network+xml"/>
            <InterfaceType>internal</InterfaceType>
            <SubnetParticipation><Gateway>192.168.1.1</Gateway><Netmask>255.255.255.0</Netmask><UseForDefaultRoute>true</UseForDefaultRoute></SubnetParticipation>
            <UseForDefaultRoute>true</UseForDefaultRoute>
          </GatewayInterface>
        </GatewayInterfaces>
        <EdgeGatewayServiceConfiguration>
          <FirewallService><IsEnabled>true</IsEnabled><DefaultAction>drop</DefaultAction></FirewallService>
          <NatService>
            <IsEnabled>true</IsEnabled>
            <NatRule><RuleType>SNAT</RuleType><GatewayNatRule><Interface href="https://s/api/admin/network/ext" name="Ext-Net"/><OriginalIp>192.168.1.0/24</OriginalIp></GatewayNatRule></NatRule>
            <NatRule><RuleType>DNAT</RuleType><GatewayNatRule><Interface href="https://s/api/admin/network/net1" name="Acme-Net1"/><OriginalIp>192.168.1.10</OriginalIp></GatewayNatRule></NatRule>
          </NatService>
          <GatewayDhcpService>
            <IsEnabled>false</IsEnabled>
            <Pool><IsEnabled>true</IsEnabled><Network href="https://s/api/admin/network/net1" name="Acme-Net1"/></Pool>
          </GatewayDhcpService>
          <LoadBalancerService><IsEnabled>false</IsEnabled><Pool><Name>web</Name></Pool></LoadBalancerService>
        </EdgeGatewayServiceConfiguration>
        <HaEnabled>false</HaEnabled>
        <UseDefaultRouteForDnsRelay>true</UseDefaultRouteForDnsRelay>
      </Configuration>
    </EdgeGateway>"#;

    fn source() -> ObjectDescriptor {
        ObjectDescriptor::from_xml(SOURCE_EGW).unwrap()
    }

    fn default_route_flags(root: &Element) -> Vec<bool> {
        let mut flags = Vec::new();
        root.walk(&mut |e| {
            if e.local_name() == "UseForDefaultRoute" {
                flags.push(e.text() == Some("true"));
            }
        });
        flags
    }

    #[test]
    fn create_payload_has_no_internal_interfaces_and_no_default_route() {
        let out = strip_for_create(&source(), "Acme-EGW");
        let root = out.root();

        let ifaces = interfaces(root);
        assert_eq!(ifaces.len(), 1);
        assert!(ifaces.iter().all(|i| !is_internal(i)));
        assert!(default_route_flags(root).iter().all(|f| !f));
        assert_eq!(
            root.find(&["Configuration", "UseDefaultRouteForDnsRelay"]).and_then(|e| e.text()),
            Some("false")
        );
        assert_eq!(root.attr("href"), None);
        assert!(root.child("Link").is_none());
    }

    #[test]
    fn create_payload_drops_disabled_services_and_internal_rules() {
        let out = strip_for_create(&source(), "Acme-EGW");
        let services = out
            .root()
            .find(&["Configuration", "EdgeGatewayServiceConfiguration"])
            .unwrap();
        let names: Vec<_> = services.children.iter().map(|c| c.local_name()).collect();
        assert_eq!(names, ["FirewallService", "NatService"]);
        let nat = services.child("NatService").unwrap();
        assert_eq!(nat.children_named("NatRule").count(), 1);
        let internal: BTreeSet<String> = ["Acme-Net1".to_string()].into();
        assert!(!references_any(out.root(), &internal));
    }

    #[test]
    fn create_payload_sanitises_the_description() {
        let out = strip_for_create(&source(), "Acme-EGW");
        let desc = out.root().child_text("Description").unwrap();
        assert!(!desc.contains(['\n', '&', '<', '>']));
        assert!(desc.chars().count() <= 128);
    }

    #[test]
    fn edit_payload_keeps_exactly_one_default_route() {
        let out = prepare_for_edit(&source(), "Acme-EGW");
        let root = out.root();
        let ifaces = interfaces(root);
        assert_eq!(ifaces.len(), 2);

        let iface_flags: Vec<bool> = ifaces.iter().map(|i| flagged(i)).collect();
        assert_eq!(iface_flags, [true, false]);
        let subnet_flags: Vec<bool> = ifaces
            .iter()
            .flat_map(|i| i.children_named("SubnetParticipation").map(flagged).collect::<Vec<_>>())
            .collect();
        assert_eq!(subnet_flags, [true, false, false]);
        // internal-bound rules survive the edit
        let nat = root.find(&["Configuration", "EdgeGatewayServiceConfiguration", "NatService"]).unwrap();
        assert_eq!(nat.children_named("NatRule").count(), 2);
    }

    #[test]
    fn edit_picks_the_first_flagged_interface() {
        let mut desc = source();
        // unflag the uplink entirely so only the internal interface is flagged
        if let Some(uplink) = desc
            .root_mut()
            .find_mut(&["Configuration", "GatewayInterfaces"])
            .and_then(|g| g.child_mut("GatewayInterface"))
        {
            uplink.set_child_text("UseForDefaultRoute", "false");
            for s in uplink.children_named_mut("SubnetParticipation") {
                s.set_child_text("UseForDefaultRoute", "false");
            }
        }
        let out = prepare_for_edit(&desc, "Acme-EGW");
        let flags: Vec<bool> = interfaces(out.root()).iter().map(|i| flagged(i)).collect();
        assert_eq!(flags, [false, true]);
    }

    #[test]
    fn interface_level_flag_alone_still_yields_one_default_subnet() {
        let xml = r#"<EdgeGateway xmlns="http://www.vmware.com/vcloud/v1.5" name="Edge">
          <Configuration>
            <GatewayInterfaces>
              <GatewayInterface>
                <Name>a</Name>
                <InterfaceType>uplink</InterfaceType>
                <SubnetParticipation><Gateway>10.0.0.1</Gateway><Netmask>255.255.255.0</Netmask></SubnetParticipation>
                <SubnetParticipation><Gateway>10.0.1.1</Gateway><Netmask>255.255.255.0</Netmask><UseForDefaultRoute>false</UseForDefaultRoute></SubnetParticipation>
                <UseForDefaultRoute>true</UseForDefaultRoute>
              </GatewayInterface>
              <GatewayInterface>
                <Name>b</Name>
                <InterfaceType>uplink</InterfaceType>
                <SubnetParticipation><Gateway>10.1.0.1</Gateway><Netmask>255.255.255.0</Netmask><UseForDefaultRoute>true</UseForDefaultRoute></SubnetParticipation>
                <UseForDefaultRoute>false</UseForDefaultRoute>
              </GatewayInterface>
            </GatewayInterfaces>
          </Configuration>
        </EdgeGateway>"#;
        let out = prepare_for_edit(&ObjectDescriptor::from_xml(xml).unwrap(), "Edge");
        let ifaces = interfaces(out.root());

        let iface_flags: Vec<bool> = ifaces.iter().map(|i| flagged(i)).collect();
        assert_eq!(iface_flags, [true, false]);
        let subnet_flags: Vec<Vec<bool>> = ifaces
            .iter()
            .map(|i| i.children_named("SubnetParticipation").map(flagged).collect())
            .collect();
        assert_eq!(subnet_flags, [vec![true, false], vec![false]]);
    }

    #[test]
    fn services_only_keeps_disabled_load_balancer_by_default() {
        let kept = services_subtree(&source(), false).unwrap();
        let names: Vec<_> = kept.root().children.iter().map(|c| c.local_name()).collect();
        assert_eq!(names, ["FirewallService", "NatService", "LoadBalancerService"]);
        assert_eq!(kept.root().name, "EdgeGatewayServiceConfiguration");

        let stripped = services_subtree(&source(), true).unwrap();
        assert!(stripped.root().child("LoadBalancerService").is_none());
    }

    #[test]
    fn internal_names_come_from_internal_interfaces() {
        let names = internal_network_names(&source());
        assert_eq!(names.into_iter().collect::<Vec<_>>(), ["Acme-Net1"]);
    }
}
