//! Driving migrations: one object at a time, or a whole organization in
//! dependency order.

use std::path::PathBuf;

use tracing::{info, warn};
use vcdmig_client::platform::filter_eq;
use vcdmig_client::poll::wait_until_ready;
use vcdmig_client::reader::{admin_href, child_refs};
use vcdmig_client::{find, find_by_locator, Platform};
use vcdmig_domain::{ObjectDescriptor, ObjectType, Reference};

use crate::builders::edge_gateway::{edit_edge_gateway, edit_is_resolvable, reapply_services};
use crate::builders::network::gateway_name;
use crate::builders::{build_object, BuildOutcome};
use crate::context::{EdgeGatewayRecord, EdgeGatewayState, MigrationContext, Placement};
use crate::error::MigrateError;
use crate::export::load_descriptor;
use crate::locate::{container_hrefs, locate, missing_on_target, Containers, Locator};

/// Where the description of the object to migrate comes from.
#[derive(Debug, Clone)]
pub enum ObjectSource {
    Platform(Locator),
    File(PathBuf),
}

#[derive(Debug, Clone)]
pub struct ObjectRequest {
    /// Required for [`ObjectSource::Platform`]; checked against the file's
    /// root tag for [`ObjectSource::File`].
    pub object_type:   Option<ObjectType>,
    pub source:        ObjectSource,
    /// Source-side names of the enclosing organization and vdc. The target
    /// containers are the same names after renames.
    pub containers:    Containers,
    /// Edge gateways only: resubmit the service configuration of the
    /// existing target gateway instead of creating one.
    pub services_only: bool,
}

// ── Single object ─────────────────────────────────────────────────────────────

async fn source_descriptor(ctx: &MigrationContext, request: &ObjectRequest) -> Result<ObjectDescriptor, MigrateError> {
    match &request.source {
        ObjectSource::File(path) => {
            let descriptor = load_descriptor(path).await?;
            if let Some(expected) = request.object_type {
                if expected != descriptor.object_type() {
                    return Err(MigrateError::Internal(format!(
                        "{} holds a {}, not a {}",
                        path.display(),
                        descriptor.object_type(),
                        expected
                    )));
                }
            }
            Ok(descriptor)
        }
        ObjectSource::Platform(locator) => {
            let object_type = request
                .object_type
                .ok_or_else(|| MigrateError::Internal("an object type is required to look up the source".into()))?;
            let source = ctx.require_source(&format!("read {} from the source", object_type))?;
            locate(source.as_ref(), object_type, locator, &request.containers).await
        }
    }
}

/// Target placement for objects from the named source containers.
async fn target_placement(ctx: &MigrationContext, containers: &Containers) -> Result<Placement, MigrateError> {
    let renamed = Containers {
        org: containers
            .org
            .as_deref()
            .map(|o| ctx.target_name(ObjectType::Organization, o)),
        vdc: containers
            .vdc
            .as_deref()
            .map(|v| ctx.target_name(ObjectType::OrgVdc, v)),
    };
    let target = ctx.target();
    let (org_href, vdc_href) = container_hrefs(target.as_ref(), &renamed, missing_on_target).await?;
    Ok(Placement { org_href, vdc_href })
}

/// Migrate one object. Edge gateways get their full configuration straight
/// away when every network they reference already exists on the target;
/// otherwise they stay in their create-phase shape.
pub async fn migrate_object(ctx: &mut MigrationContext, request: &ObjectRequest) -> Result<BuildOutcome, MigrateError> {
    let source = source_descriptor(ctx, request).await?;
    let placement = target_placement(ctx, &request.containers).await?;
    let target_name = ctx
        .options
        .rename_to
        .clone()
        .unwrap_or_else(|| ctx.target_name(source.object_type(), source.name()));
    info!(
        object_type = %source.object_type(),
        source = source.name(),
        target = %target_name,
        "Migrating object"
    );

    if source.object_type() != ObjectType::EdgeGateway {
        return build_object(ctx, &source, &target_name, &placement).await;
    }

    if request.services_only {
        let href = reapply_services(ctx, &source, &target_name, &placement).await?;
        return Ok(BuildOutcome::ServicesReapplied { name: target_name, href });
    }

    let outcome = track_gateway(ctx, &source, &target_name, &placement).await?;
    if outcome.is_created() {
        if edit_is_resolvable(ctx, &source, &target_name, &placement).await? {
            mark_networks_provisioned(ctx, source.name());
            edit_edge_gateway(ctx, source.name()).await?;
        } else {
            warn!(
                name = %target_name,
                "Internal networks are not on the target yet; the gateway keeps its uplink-only configuration"
            );
        }
    }
    Ok(outcome)
}

// ── Edge gateway bookkeeping ──────────────────────────────────────────────────

/// Build the gateway unless this run already handled it, and remember the
/// outcome under its source name.
async fn track_gateway(
    ctx: &mut MigrationContext,
    source: &ObjectDescriptor,
    target_name: &str,
    placement: &Placement,
) -> Result<BuildOutcome, MigrateError> {
    if let Some(record) = ctx.edge_gateways.get(source.name()) {
        return Ok(BuildOutcome::Skipped {
            name: record.target_name.clone(),
            href: record.target_href.clone(),
        });
    }
    let outcome = build_object(ctx, source, target_name, placement).await?;
    ctx.edge_gateways.insert(
        source.name(),
        EdgeGatewayRecord {
            target_name: target_name.to_string(),
            target_href: outcome.href().to_string(),
            placement:   placement.clone(),
            source:      source.clone(),
            created:     outcome.is_created(),
            state:       EdgeGatewayState::Created,
        },
    );
    Ok(outcome)
}

/// A network found on the target may still be provisioning from an earlier
/// run; gateways are not edited against it until it reports ready.
async fn await_existing_network(ctx: &MigrationContext, outcome: &BuildOutcome) -> Result<(), MigrateError> {
    let target = ctx.target();
    let what = format!("org vdc network '{}'", outcome.name());
    wait_until_ready(target.as_ref(), outcome.href(), &what, &ctx.settings.poll).await?;
    Ok(())
}

fn mark_networks_provisioned(ctx: &mut MigrationContext, source_name: &str) {
    if let Some(record) = ctx.edge_gateways.get_mut(source_name) {
        if record.state == EdgeGatewayState::Created {
            record.state = EdgeGatewayState::NetworksProvisioned;
        }
    }
}

// ── Whole organization ────────────────────────────────────────────────────────

/// What was found in one source vdc, waiting for the confirmation gate.
struct VdcPlan {
    source_name: String,
    placement:   Placement,
    networks:    Vec<ObjectDescriptor>,
    gateways:    Vec<ObjectDescriptor>,
}

async fn fetch_all(
    platform: &dyn Platform,
    refs: Vec<Reference>,
    object_type: ObjectType,
) -> Result<Vec<ObjectDescriptor>, MigrateError> {
    let mut out = Vec::with_capacity(refs.len());
    for r in refs {
        out.push(find_by_locator(platform, &admin_href(&r.href), object_type).await?);
    }
    Ok(out)
}

async fn discover_gateways(source: &dyn Platform, vdc_href: &str) -> Result<Vec<ObjectDescriptor>, MigrateError> {
    let records = source.query(ObjectType::EdgeGateway.query_type(), &filter_eq("vdc", vdc_href)).await?;
    let refs = records.iter().filter_map(Reference::from_element).collect();
    fetch_all(source, refs, ObjectType::EdgeGateway).await
}

/// Number of `objects` not yet present in `placement` on the target.
async fn count_missing(
    ctx: &MigrationContext,
    objects: &[ObjectDescriptor],
    placement: &Placement,
) -> Result<usize, MigrateError> {
    let target = ctx.target();
    let mut missing = 0;
    for obj in objects {
        let name = ctx.target_name(obj.object_type(), obj.name());
        if find(target.as_ref(), obj.object_type(), &name, placement.scope()).await?.is_none() {
            missing += 1;
        }
    }
    Ok(missing)
}

/// Ask before the gateways and networks are created. Nothing is asked when
/// there is nothing to create or the operator passed `--yes`.
async fn confirm_network_phase(ctx: &MigrationContext, plans: &[VdcPlan]) -> Result<(), MigrateError> {
    if ctx.options.assume_yes {
        return Ok(());
    }
    let mut gateways = 0;
    let mut networks = 0;
    for plan in plans {
        gateways += count_missing(ctx, &plan.gateways, &plan.placement).await?;
        networks += count_missing(ctx, &plan.networks, &plan.placement).await?;
    }
    if gateways + networks == 0 {
        return Ok(());
    }
    let question = format!(
        "Create {} edge gateway(s) and {} network(s) on {}?",
        gateways,
        networks,
        ctx.target().label()
    );
    if ctx.prompter.confirm(&question)? {
        Ok(())
    } else {
        Err(MigrateError::Aborted)
    }
}

/// Migrate an organization with everything in it: the organization, its
/// roles and users, its vdcs with their storage profiles, then every edge
/// gateway and network. Gateways created by this run get their full
/// configuration last, once all of their networks exist.
pub async fn migrate_organization(ctx: &mut MigrationContext, org_name: &str) -> Result<(), MigrateError> {
    let source = ctx.require_source("migrate an organization")?;
    let org = locate(
        source.as_ref(),
        ObjectType::Organization,
        &Locator::Name(org_name.to_string()),
        &Containers::default(),
    )
    .await?;
    let org_target = ctx
        .options
        .rename_to
        .clone()
        .unwrap_or_else(|| ctx.target_name(ObjectType::Organization, org.name()));

    info!(org = org_name, target = %org_target, "Phase 1: organization");
    let org_outcome = build_object(ctx, &org, &org_target, &Placement::global()).await?;
    let org_placement = Placement::org(org_outcome.href());

    info!("Phase 2: roles and users");
    let roles = fetch_all(
        source.as_ref(),
        child_refs(org.root(), "RoleReferences", "RoleReference"),
        ObjectType::Role,
    )
    .await?;
    for role in &roles {
        let name = ctx.target_name(ObjectType::Role, role.name());
        build_object(ctx, role, &name, &org_placement).await?;
    }
    let users = fetch_all(source.as_ref(), child_refs(org.root(), "Users", "UserReference"), ObjectType::User).await?;
    for user in &users {
        let name = ctx.target_name(ObjectType::User, user.name());
        build_object(ctx, user, &name, &org_placement).await?;
    }

    info!("Phase 3: vdcs");
    let vdcs = fetch_all(source.as_ref(), child_refs(org.root(), "Vdcs", "Vdc"), ObjectType::OrgVdc).await?;
    let mut plans = Vec::with_capacity(vdcs.len());
    for vdc in &vdcs {
        let name = ctx.target_name(ObjectType::OrgVdc, vdc.name());
        let outcome = build_object(ctx, vdc, &name, &org_placement).await?;
        let placement = Placement {
            org_href: org_placement.org_href.clone(),
            vdc_href: Some(outcome.href().to_string()),
        };

        let vdc_href = vdc
            .href()
            .ok_or_else(|| MigrateError::Internal(format!("source vdc '{}' has no href", vdc.name())))?;
        let networks = fetch_all(
            source.as_ref(),
            child_refs(vdc.root(), "AvailableNetworks", "Network"),
            ObjectType::OrgVdcNetwork,
        )
        .await?;
        let gateways = discover_gateways(source.as_ref(), vdc_href).await?;
        info!(
            vdc = vdc.name(),
            networks = networks.len(),
            edge_gateways = gateways.len(),
            "Discovered vdc contents"
        );
        plans.push(VdcPlan { source_name: vdc.name().to_string(), placement, networks, gateways });
    }

    confirm_network_phase(ctx, &plans).await?;

    info!("Phase 4: edge gateways and networks");
    for plan in &plans {
        for network in &plan.networks {
            if let Some(gw) = gateway_name(network) {
                let gateway = plan
                    .gateways
                    .iter()
                    .find(|g| g.name() == gw)
                    .ok_or_else(|| MigrateError::SourceNotFound {
                        object_type: ObjectType::EdgeGateway,
                        name:        format!("{} (vdc '{}')", gw, plan.source_name),
                    })?;
                let name = ctx.target_name(ObjectType::EdgeGateway, gateway.name());
                track_gateway(ctx, gateway, &name, &plan.placement).await?;
            }
            let name = ctx.target_name(ObjectType::OrgVdcNetwork, network.name());
            let outcome = build_object(ctx, network, &name, &plan.placement).await?;
            if !outcome.is_created() {
                await_existing_network(ctx, &outcome).await?;
            }
        }
        for gateway in &plan.gateways {
            if !ctx.edge_gateways.contains(gateway.name()) {
                let name = ctx.target_name(ObjectType::EdgeGateway, gateway.name());
                track_gateway(ctx, gateway, &name, &plan.placement).await?;
            }
        }
    }

    info!("Phase 5: edge gateway configuration");
    for source_name in ctx.edge_gateways.created_names() {
        mark_networks_provisioned(ctx, &source_name);
        edit_edge_gateway(ctx, &source_name).await?;
    }

    info!(
        org = %org_target,
        created = ctx.report.created_count(),
        skipped = ctx.report.skipped_count(),
        "Organization migrated"
    );
    Ok(())
}
