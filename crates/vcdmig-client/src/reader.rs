//! Locating platform objects by type and name, and fetching their full
//! descriptions.

use tracing::{debug, warn};
use vcdmig_domain::{Element, ObjectDescriptor, ObjectType, Reference};

use crate::error::ClientError;
use crate::platform::{name_filter, Platform};

/// Where to look for an object: names are only unique within an
/// organization (users, roles, vdcs, networks) or a vdc (edge gateways).
#[derive(Debug, Clone, Copy, Default)]
pub struct Scope<'a> {
    pub org_href: Option<&'a str>,
    pub vdc_href: Option<&'a str>,
}

impl<'a> Scope<'a> {
    pub fn global() -> Self {
        Self::default()
    }

    pub fn org(org_href: &'a str) -> Self {
        Self { org_href: Some(org_href), vdc_href: None }
    }

    pub fn vdc(org_href: &'a str, vdc_href: &'a str) -> Self {
        Self { org_href: Some(org_href), vdc_href: Some(vdc_href) }
    }
}

/// Admin view of a user-facing href; the admin view carries the fields a
/// migration needs (allocation settings, provider references, ...).
pub fn admin_href(href: &str) -> String {
    for (user, admin) in [
        ("/api/vdc/", "/api/admin/vdc/"),
        ("/api/org/", "/api/admin/org/"),
        ("/api/network/", "/api/admin/network/"),
    ] {
        if href.contains(user) {
            return href.replacen(user, admin, 1);
        }
    }
    href.to_string()
}

/// References listed under `<container><item .../></container>` of `el`.
pub fn child_refs(el: &Element, container: &str, item: &str) -> Vec<Reference> {
    el.child(container)
        .map(|c| c.children_named(item).filter_map(Reference::from_element).collect())
        .unwrap_or_default()
}

/// Find an object by type and name. `Ok(None)` is the ordinary "does not
/// exist" answer; errors are transport/auth failures.
///
/// OrgVdc, OrgVdcNetwork and User are looked up through the owning
/// organization's child listing instead of the query service: query results
/// for vdcs and networks are unreliable on older source instances (records
/// from other organizations, stale entries after renames), while the
/// organization listing is authoritative.
pub async fn find(
    platform: &dyn Platform,
    object_type: ObjectType,
    name: &str,
    scope: Scope<'_>,
) -> Result<Option<ObjectDescriptor>, ClientError> {
    let listing = match (object_type, scope.org_href) {
        (ObjectType::OrgVdc, Some(org)) => Some((org, "Vdcs", "Vdc")),
        (ObjectType::OrgVdcNetwork, Some(org)) => Some((org, "Networks", "Network")),
        (ObjectType::User, Some(org)) => Some((org, "Users", "UserReference")),
        _ => None,
    };

    let href = match listing {
        Some((org, container, item)) => {
            let org_el = platform.get(&admin_href(org)).await?;
            child_refs(&org_el, container, item)
                .into_iter()
                .find(|r| r.name == name)
                .map(|r| admin_href(&r.href))
        }
        None => find_record(platform, object_type, name, scope)
            .await?
            .and_then(|r| r.attr("href").map(admin_href)),
    };

    let Some(href) = href else {
        debug!(%object_type, name, label = platform.label(), "Not found");
        return Ok(None);
    };
    match find_by_locator(platform, &href, object_type).await {
        Ok(desc) => Ok(Some(desc)),
        // Listed but gone: deleted between the listing and the fetch.
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

/// Query-service lookup, narrowed to the scope by the record's `org`/`vdc`
/// attributes.
async fn find_record(
    platform: &dyn Platform,
    object_type: ObjectType,
    name: &str,
    scope: Scope<'_>,
) -> Result<Option<Element>, ClientError> {
    let records = platform
        .query(object_type.query_type(), &name_filter(name))
        .await?;
    let mut matching: Vec<Element> = records
        .into_iter()
        .filter(|r| r.attr("name") == Some(name))
        .filter(|r| in_scope(r, "org", scope.org_href))
        .filter(|r| in_scope(r, "vdc", scope.vdc_href))
        .collect();
    if matching.len() > 1 {
        warn!(
            %object_type,
            name,
            count = matching.len(),
            "Name is ambiguous; using the first match"
        );
    }
    Ok(if matching.is_empty() { None } else { Some(matching.remove(0)) })
}

fn in_scope(record: &Element, attr: &str, wanted: Option<&str>) -> bool {
    match (wanted, record.attr(attr)) {
        (Some(w), Some(have)) => admin_href(w) == admin_href(have),
        _ => true,
    }
}

/// Fetch the object at `href`, typed as `object_type`.
pub async fn find_by_locator(
    platform: &dyn Platform,
    href: &str,
    object_type: ObjectType,
) -> Result<ObjectDescriptor, ClientError> {
    let root = platform.get(href).await?;
    Ok(ObjectDescriptor::new(object_type, root))
}

/// Every record of `query_type` whose name matches `pattern` (`*` wildcards
/// allowed).
pub async fn search(
    platform: &dyn Platform,
    query_type: &str,
    pattern: &str,
) -> Result<Vec<Reference>, ClientError> {
    let records = platform.query(query_type, &name_filter(pattern)).await?;
    Ok(records.iter().filter_map(Reference::from_element).collect())
}
