use async_trait::async_trait;
use vcdmig_client::poll::wait_until_ready;
use vcdmig_domain::{ObjectDescriptor, ObjectType};

use super::common::{created_href, keep_children, strip_server_fields, submit};
use super::ObjectBuilder;
use crate::context::{MigrationContext, Placement};
use crate::error::MigrateError;
use crate::resolver::Resolver;

const NETWORK_FIELDS: &[&str] = &["Description", "Configuration", "EdgeGateway", "ServiceConfig", "IsShared"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceMode {
    /// Routed through an edge gateway of the same vdc.
    NatRouted,
    /// Attached directly to an external network.
    Bridged,
    Isolated,
}

pub fn fence_mode(network: &ObjectDescriptor) -> FenceMode {
    match network
        .root()
        .find(&["Configuration", "FenceMode"])
        .and_then(|f| f.text())
    {
        Some("natRouted") => FenceMode::NatRouted,
        Some("bridged") => FenceMode::Bridged,
        _ => FenceMode::Isolated,
    }
}

/// Name of the edge gateway a routed network hangs off.
pub fn gateway_name(network: &ObjectDescriptor) -> Option<&str> {
    match fence_mode(network) {
        FenceMode::NatRouted => network.root().child("EdgeGateway").and_then(|g| g.attr("name")),
        _ => None,
    }
}

/// Creation payload before reference resolution: routed networks keep their
/// gateway link, bridged ones their parent network, isolated ones neither.
pub fn network_payload(source: &ObjectDescriptor, target_name: &str) -> ObjectDescriptor {
    let mode = fence_mode(source);
    let mut draft = source.clone();
    draft.set_name(target_name);
    let root = draft.root_mut();
    root.name = root.sibling_name("OrgVdcNetwork");
    strip_server_fields(root);
    keep_children(root, NETWORK_FIELDS);
    root.prune("AllocatedIpAddresses");
    root.prune("SubAllocations");

    if mode != FenceMode::NatRouted {
        root.remove_children("EdgeGateway");
    }
    if mode != FenceMode::Bridged {
        if let Some(config) = root.child_mut("Configuration") {
            config.remove_children("ParentNetwork");
        }
    }
    draft
}

pub struct NetworkBuilder;

#[async_trait]
impl ObjectBuilder for NetworkBuilder {
    fn object_type(&self) -> ObjectType {
        ObjectType::OrgVdcNetwork
    }

    /// The network is only handed back once the platform reports it ready.
    async fn create(
        &self,
        ctx: &mut MigrationContext,
        source: &ObjectDescriptor,
        target_name: &str,
        placement: &Placement,
    ) -> Result<String, MigrateError> {
        let what = format!("network '{}'", target_name);
        let vdc = placement.require_vdc(&what)?.to_string();
        let target = ctx.target();

        let draft = network_payload(source, target_name);
        let payload = Resolver::new(target.as_ref(), placement, &ctx.settings.renames)
            .rewrite(&draft)
            .await?;
        let response = submit(
            target.as_ref(),
            &format!("{}/networks", vdc),
            ObjectType::OrgVdcNetwork.media_type(),
            payload.root(),
            &ctx.settings.poll,
        )
        .await?;
        let href = created_href(&response, &what)?;
        wait_until_ready(target.as_ref(), &href, &what, &ctx.settings.poll).await?;
        Ok(href)
    }
}
