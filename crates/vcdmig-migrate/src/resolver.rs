//! Re-pointing the references of a source description at the equivalent
//! target objects.

use std::collections::BTreeMap;

use tracing::debug;
use vcdmig_client::platform::name_filter;
use vcdmig_client::{find, Platform, Scope};
use vcdmig_domain::{ObjectDescriptor, ObjectType, Reference, Renames};

use crate::context::Placement;
use crate::error::MigrateError;

/// How an element carrying an `href` is looked up on the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefKind {
    /// A migrated object, found by its (possibly renamed) name.
    Object(ObjectType),
    /// Gateway interfaces and service rules point at either an external
    /// network (uplinks) or an org network (internal interfaces).
    AnyNetwork,
    /// A provider-side object, found through the query service.
    Query(&'static str),
}

/// Resolution rule for a reference element, by local name.
pub fn rule_for(element: &str) -> Option<RefKind> {
    let kind = match element {
        "ProviderVdcReference" => RefKind::Query("providerVdc"),
        "NetworkPoolReference" => RefKind::Query("networkPool"),
        "RightReference" => RefKind::Query("right"),
        "VimServerRef" => RefKind::Query("virtualCenter"),
        "Role" | "RoleReference" => RefKind::Object(ObjectType::Role),
        "EdgeGateway" | "EdgeGatewayReference" => RefKind::Object(ObjectType::EdgeGateway),
        "ParentNetwork" | "ExternalNetwork" => RefKind::Object(ObjectType::ExternalNetwork),
        "Network" | "Interface" | "GatewayInterface" => RefKind::AnyNetwork,
        _ => return None,
    };
    Some(kind)
}

pub struct Resolver<'a> {
    target:    &'a dyn Platform,
    placement: &'a Placement,
    renames:   &'a Renames,
    cache:     BTreeMap<(String, String), Reference>,
}

impl<'a> Resolver<'a> {
    pub fn new(target: &'a dyn Platform, placement: &'a Placement, renames: &'a Renames) -> Self {
        Self { target, placement, renames, cache: BTreeMap::new() }
    }

    /// A copy of `descriptor` whose every reference below the root points at
    /// the target. Fails on the first reference that cannot be resolved; the
    /// input is never modified.
    pub async fn rewrite(&mut self, descriptor: &ObjectDescriptor) -> Result<ObjectDescriptor, MigrateError> {
        let mut wanted: Vec<(String, String)> = Vec::new();
        for child in &descriptor.root().children {
            child.walk(&mut |e| {
                if e.local_name() == "Link" || e.attr("href").is_none() {
                    return;
                }
                let key = (e.local_name().to_string(), e.attr("name").unwrap_or_default().to_string());
                if !wanted.contains(&key) {
                    wanted.push(key);
                }
            });
        }

        let mut resolved: BTreeMap<(String, String), Reference> = BTreeMap::new();
        for (element, name) in wanted {
            let kind = rule_for(&element).filter(|_| !name.is_empty()).ok_or_else(|| {
                MigrateError::UnmappedReference { element: element.clone(), name: name.clone() }
            })?;
            let reference = self.resolve(&element, kind, &name).await?;
            resolved.insert((element, name), reference);
        }

        let mut out = descriptor.clone();
        for child in &mut out.root_mut().children {
            child.walk_mut(&mut |e| {
                if e.local_name() == "Link" || e.attr("href").is_none() {
                    return;
                }
                let key = (e.local_name().to_string(), e.attr("name").unwrap_or_default().to_string());
                if let Some(r) = resolved.get(&key) {
                    e.set_attr("href", r.href.clone());
                    e.set_attr("name", r.name.clone());
                    if let Some(t) = &r.ref_type {
                        e.set_attr("type", t.clone());
                    }
                }
            });
        }
        Ok(out)
    }

    async fn resolve(&mut self, element: &str, kind: RefKind, name: &str) -> Result<Reference, MigrateError> {
        let key = (element.to_string(), name.to_string());
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit.clone());
        }

        let reference = match kind {
            RefKind::Object(t) => {
                let target_name = self.renames.target_name(t, name);
                self.find_object(t, &target_name)
                    .await?
                    .ok_or_else(|| MigrateError::reference_not_found(t, target_name))?
            }
            RefKind::AnyNetwork => {
                let external = self.renames.target_name(ObjectType::ExternalNetwork, name);
                match self.find_object(ObjectType::ExternalNetwork, &external).await? {
                    Some(r) => r,
                    None => {
                        let org_net = self.renames.target_name(ObjectType::OrgVdcNetwork, name);
                        self.find_object(ObjectType::OrgVdcNetwork, &org_net)
                            .await?
                            .ok_or_else(|| MigrateError::reference_not_found("network", name))?
                    }
                }
            }
            RefKind::Query(query_type) => self
                .target
                .query(query_type, &name_filter(name))
                .await?
                .into_iter()
                .find(|r| r.attr("name") == Some(name))
                .and_then(|r| {
                    r.attr("href").map(|href| Reference {
                        name:     name.to_string(),
                        ref_type: None,
                        href:     href.to_string(),
                    })
                })
                .ok_or_else(|| MigrateError::reference_not_found(query_type, name))?,
        };

        debug!(element, name, href = %reference.href, "Resolved reference");
        self.cache.insert(key, reference.clone());
        Ok(reference)
    }

    async fn find_object(&self, object_type: ObjectType, name: &str) -> Result<Option<Reference>, MigrateError> {
        let scope = match object_type {
            ObjectType::Organization | ObjectType::ExternalNetwork => Scope::global(),
            ObjectType::EdgeGateway => self.placement.scope(),
            _ => Scope { org_href: self.placement.org_href.as_deref(), vdc_href: None },
        };
        let found = find(self.target, object_type, name, scope).await?;
        Ok(found.and_then(|d| {
            d.href().map(|href| Reference {
                name:     d.name().to_string(),
                ref_type: Some(object_type.media_type().to_string()),
                href:     href.to_string(),
            })
        }))
    }
}
