//! OrgVdc creation.
//!
//! A vdc is never resubmitted as read: the platform only accepts a fresh
//! `CreateVdcParams` document. The vdc is created with the provider's
//! wildcard storage profile, then once it has settled the real profiles are
//! attached, one is made default, and the wildcard is detached.

use async_trait::async_trait;
use tracing::{info, warn};
use vcdmig_client::platform::filter_eq;
use vcdmig_client::poll::{wait_for_tasks, wait_until_ready};
use vcdmig_client::reader::child_refs;
use vcdmig_client::Platform;
use vcdmig_domain::{Element, ObjectDescriptor, ObjectType, PollPolicy, Reference};

use super::common::{created_href, submit};
use super::ObjectBuilder;
use crate::context::{MigrationContext, Placement};
use crate::error::MigrateError;
use crate::prompt::choose_item;
use crate::report::Change;

pub const WILDCARD_PROFILE: &str = "*";

const CREATE_VDC_PARAMS: &str = "application/vnd.vmware.admin.createVdcParams+xml";
const UPDATE_PROFILES: &str = "application/vnd.vmware.admin.updateVdcStorageProfiles+xml";
const VDC_STORAGE_PROFILE: &str = "application/vnd.vmware.admin.vdcStorageProfile+xml";
const PVDC_STORAGE_PROFILE: &str = "application/vnd.vmware.admin.pvdcStorageProfile+xml";

/// Fields copied verbatim from the source vdc that precede the storage
/// profiles in `CreateVdcParams`.
const LEADING_FIELDS: &[&str] = &[
    "Description",
    "AllocationModel",
    "ComputeCapacity",
    "NicQuota",
    "NetworkQuota",
    "VmQuota",
    "IsEnabled",
];

/// Fields copied verbatim that sit between the storage profiles and the
/// provider references.
const MIDDLE_FIELDS: &[&str] = &[
    "ResourceGuaranteedMemory",
    "ResourceGuaranteedCpu",
    "VCpuInMhz",
    "IsThinProvision",
];

const TRAILING_FIELDS: &[&str] = &[
    "UsesFastProvisioning",
    "OverCommitAllowed",
    "VmDiscoveryEnabled",
    "IsElastic",
    "IncludeMemoryOverhead",
];

/// One storage profile offered by a provider vdc.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderProfile {
    pub name:    String,
    pub href:    String,
    pub enabled: bool,
}

impl ProviderProfile {
    pub fn is_wildcard(&self) -> bool {
        self.name == WILDCARD_PROFILE
    }
}

/// Limit and default flag of a source vdc's storage profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceProfile {
    pub name:     String,
    pub limit_mb: String,
    pub default:  bool,
}

/// Target-side inputs for [`create_vdc_params`].
#[derive(Debug, Clone)]
pub struct VdcPlacement {
    pub provider_vdc:    Reference,
    pub network_pool:    Option<Reference>,
    pub initial_profile: ProviderProfile,
}

pub fn create_vdc_params(source: &ObjectDescriptor, target_name: &str, placement: &VdcPlacement) -> Element {
    let src = source.root();
    let mut params = Element::new(src.sibling_name("CreateVdcParams"))
        .with_attr("xmlns", "http://www.vmware.com/vcloud/v1.5")
        .with_attr("name", target_name);

    let copy = |params: &mut Element, names: &[&str]| {
        for name in names {
            if let Some(field) = src.child(name) {
                params.children.push(field.clone());
            }
        }
    };

    copy(&mut params, LEADING_FIELDS);
    if let Some(cap) = params.child_mut("ComputeCapacity") {
        for resource in cap.children.iter_mut() {
            resource.retain_children(|c| matches!(c.local_name(), "Units" | "Allocated" | "Limit"));
        }
    }

    params.children.push(
        Element::new("VdcStorageProfile")
            .with_child(Element::new("Enabled").with_text("true"))
            .with_child(Element::new("Units").with_text("MB"))
            .with_child(Element::new("Limit").with_text("0"))
            .with_child(Element::new("Default").with_text("true"))
            .with_child(
                Element::new("ProviderVdcStorageProfile")
                    .with_attr("href", placement.initial_profile.href.clone())
                    .with_attr("name", placement.initial_profile.name.clone())
                    .with_attr("type", PVDC_STORAGE_PROFILE),
            ),
    );

    copy(&mut params, MIDDLE_FIELDS);
    if let Some(pool) = &placement.network_pool {
        params.children.push(pool.to_element("NetworkPoolReference"));
    }
    params.children.push(placement.provider_vdc.to_element("ProviderVdcReference"));
    copy(&mut params, TRAILING_FIELDS);
    params
}

/// Storage profiles of a provider vdc.
pub async fn provider_profiles(
    platform: &dyn Platform,
    provider_vdc_href: &str,
) -> Result<Vec<ProviderProfile>, MigrateError> {
    let records = platform
        .query("providerVdcStorageProfile", &filter_eq("providerVdc", provider_vdc_href))
        .await?;
    Ok(records
        .iter()
        .filter_map(|r| {
            Some(ProviderProfile {
                name:    r.attr("name")?.to_string(),
                href:    r.attr("href")?.to_string(),
                enabled: r.attr("isEnabled").map_or(true, |v| v.eq_ignore_ascii_case("true")),
            })
        })
        .collect())
}

/// Which target provider vdc a source vdc moves to: configured mapping,
/// then same name, then the only one, then ask.
pub async fn resolve_provider_vdc(
    ctx: &MigrationContext,
    source_pvdc: &str,
) -> Result<Reference, MigrateError> {
    let target = ctx.target();
    let candidates: Vec<Reference> = target
        .query("providerVdc", "")
        .await?
        .iter()
        .filter_map(Reference::from_element)
        .collect();

    if let Some(mapped) = ctx.settings.provider_vdcs.get(source_pvdc) {
        return candidates
            .into_iter()
            .find(|c| &c.name == mapped)
            .ok_or_else(|| MigrateError::reference_not_found("provider vdc", mapped.clone()));
    }
    if let Some(same) = candidates.iter().find(|c| c.name == source_pvdc) {
        return Ok(same.clone());
    }
    match candidates.len() {
        0 => Err(MigrateError::reference_not_found("provider vdc", source_pvdc)),
        1 => Ok(candidates[0].clone()),
        _ => {
            let question = format!("Provider vdc '{}' does not exist on the target. Use which one?", source_pvdc);
            let picked = choose_item(ctx.prompter.as_ref(), &question, &candidates[..], |c| c.name.clone())?;
            Ok(picked.clone())
        }
    }
}

/// Network pool of the target provider vdc: the one named like the source's
/// pool if present, otherwise the first.
pub async fn resolve_network_pool(
    platform: &dyn Platform,
    provider_vdc_href: &str,
    source_pool: Option<&str>,
) -> Result<Option<Reference>, MigrateError> {
    let pvdc = platform.get(provider_vdc_href).await?;
    let pools = child_refs(&pvdc, "NetworkPoolReferences", "NetworkPoolReference");
    let chosen = source_pool
        .and_then(|name| pools.iter().find(|p| p.name == name))
        .or_else(|| pools.first())
        .cloned();
    Ok(chosen)
}

/// Limits and default flags of the source vdc's profiles, when a source
/// session is available to read them.
async fn source_profiles(ctx: &MigrationContext, source: &ObjectDescriptor) -> Vec<SourceProfile> {
    let Some(platform) = ctx.source() else { return Vec::new() };
    let mut out = Vec::new();
    for r in child_refs(source.root(), "VdcStorageProfiles", "VdcStorageProfile") {
        match platform.get(&r.href).await {
            Ok(p) => out.push(SourceProfile {
                name:     r.name.clone(),
                limit_mb: p.child_text("Limit").unwrap_or("0").to_string(),
                default:  p.child_flag("Default").unwrap_or(false),
            }),
            Err(e) => warn!(profile = %r.name, error = %e, "Cannot read source storage profile; using an unlimited one"),
        }
    }
    out
}

/// Which profile becomes the default: the source default when the target
/// has it, otherwise the first one attached.
pub fn choose_default<'a>(attached: &'a [String], source: &[SourceProfile]) -> Option<&'a String> {
    source
        .iter()
        .find(|s| s.default)
        .and_then(|s| attached.iter().find(|a| **a == s.name))
        .or_else(|| attached.first())
}

/// Attach every enabled non-wildcard provider profile, designate the
/// default, then detach the wildcard. Returns the attached names and the
/// default.
pub async fn provision_storage_profiles(
    platform: &dyn Platform,
    vdc_href: &str,
    offered: &[ProviderProfile],
    source: &[SourceProfile],
    poll: &PollPolicy,
) -> Result<(Vec<String>, String), MigrateError> {
    let vdc = platform.get(vdc_href).await?;
    let present: Vec<Reference> = child_refs(&vdc, "VdcStorageProfiles", "VdcStorageProfile");

    // 1. copy
    let to_add: Vec<&ProviderProfile> = offered
        .iter()
        .filter(|p| p.enabled && !p.is_wildcard())
        .filter(|p| !present.iter().any(|r| r.name == p.name))
        .collect();
    if !to_add.is_empty() {
        let mut update = Element::new("UpdateVdcStorageProfiles")
            .with_attr("xmlns", "http://www.vmware.com/vcloud/v1.5");
        for p in &to_add {
            let limit = source
                .iter()
                .find(|s| s.name == p.name)
                .map_or("0", |s| s.limit_mb.as_str());
            update.children.push(
                Element::new("AddStorageProfile")
                    .with_child(Element::new("Enabled").with_text("true"))
                    .with_child(Element::new("Units").with_text("MB"))
                    .with_child(Element::new("Limit").with_text(limit))
                    .with_child(Element::new("Default").with_text("false"))
                    .with_child(
                        Element::new("ProviderVdcStorageProfile")
                            .with_attr("href", p.href.clone())
                            .with_attr("name", p.name.clone())
                            .with_attr("type", PVDC_STORAGE_PROFILE),
                    ),
            );
        }
        submit(platform, &format!("{}/vdcStorageProfiles", vdc_href), UPDATE_PROFILES, &update, poll).await?;
    }

    let vdc = platform.get(vdc_href).await?;
    let profiles = child_refs(&vdc, "VdcStorageProfiles", "VdcStorageProfile");
    let attached: Vec<String> = profiles
        .iter()
        .filter(|r| r.name != WILDCARD_PROFILE)
        .map(|r| r.name.clone())
        .collect();

    let Some(default) = choose_default(&attached, source).cloned() else {
        warn!(vdc = vdc_href, "Provider vdc offers no enabled storage profile besides the wildcard; keeping it");
        return Ok((attached, WILDCARD_PROFILE.to_string()));
    };

    // 2. designate the default
    if let Some(r) = profiles.iter().find(|r| r.name == default) {
        let mut profile = platform.get(&r.href).await?;
        profile.set_child_text("Enabled", "true");
        profile.set_child_text("Default", "true");
        edit_profile(platform, &r.href, &profile, poll).await?;
    }

    // 3. detach the wildcard
    if let Some(wildcard) = profiles.iter().find(|r| r.name == WILDCARD_PROFILE) {
        let mut profile = platform.get(&wildcard.href).await?;
        profile.set_child_text("Enabled", "false");
        profile.set_child_text("Default", "false");
        edit_profile(platform, &wildcard.href, &profile, poll).await?;

        let remove = Element::new("UpdateVdcStorageProfiles")
            .with_attr("xmlns", "http://www.vmware.com/vcloud/v1.5")
            .with_child(wildcard.to_element("RemoveStorageProfile"));
        submit(platform, &format!("{}/vdcStorageProfiles", vdc_href), UPDATE_PROFILES, &remove, poll).await?;
    }

    Ok((attached, default))
}

async fn edit_profile(
    platform: &dyn Platform,
    href: &str,
    profile: &Element,
    poll: &PollPolicy,
) -> Result<(), MigrateError> {
    let mut body = profile.clone();
    body.prune("Link");
    body.prune("Tasks");
    let response = platform.put(href, VDC_STORAGE_PROFILE, &body).await?;
    wait_for_tasks(platform, &response, poll).await?;
    Ok(())
}

pub struct OrgVdcBuilder;

#[async_trait]
impl ObjectBuilder for OrgVdcBuilder {
    fn object_type(&self) -> ObjectType {
        ObjectType::OrgVdc
    }

    async fn create(
        &self,
        ctx: &mut MigrationContext,
        source: &ObjectDescriptor,
        target_name: &str,
        placement: &Placement,
    ) -> Result<String, MigrateError> {
        let what = format!("vdc '{}'", target_name);
        let org = placement.require_org(&what)?.to_string();
        let target = ctx.target();

        let source_pvdc = source.reference("ProviderVdcReference")?;
        let provider_vdc = resolve_provider_vdc(ctx, &source_pvdc.name).await?;
        let source_pool = source.root().child("NetworkPoolReference").and_then(|p| p.attr("name"));
        let network_pool = resolve_network_pool(target.as_ref(), &provider_vdc.href, source_pool).await?;

        let offered = provider_profiles(target.as_ref(), &provider_vdc.href).await?;
        let initial_profile = offered
            .iter()
            .find(|p| p.is_wildcard())
            .or_else(|| offered.iter().find(|p| p.enabled))
            .cloned()
            .ok_or_else(|| MigrateError::reference_not_found("provider vdc storage profile", &provider_vdc.name))?;

        let params = create_vdc_params(
            source,
            target_name,
            &VdcPlacement { provider_vdc: provider_vdc.clone(), network_pool, initial_profile },
        );
        let response = submit(
            target.as_ref(),
            &format!("{}/vdcsparams", org),
            CREATE_VDC_PARAMS,
            &params,
            &ctx.settings.poll,
        )
        .await?;
        let href = created_href(&response, &what)?;

        wait_until_ready(target.as_ref(), &href, &what, &ctx.settings.poll).await?;
        if !ctx.settings.vdc_settle_delay.is_zero() {
            info!(vdc = target_name, delay = ?ctx.settings.vdc_settle_delay, "Waiting for the vdc to settle");
            tokio::time::sleep(ctx.settings.vdc_settle_delay).await;
        }

        let source_profiles = source_profiles(ctx, source).await;
        let (profiles, default) = provision_storage_profiles(
            target.as_ref(),
            &href,
            &offered,
            &source_profiles,
            &ctx.settings.poll,
        )
        .await?;
        ctx.report.record(Change::StorageProfilesProvisioned {
            vdc: target_name.to_string(),
            profiles,
            default,
        });
        Ok(href)
    }
}
