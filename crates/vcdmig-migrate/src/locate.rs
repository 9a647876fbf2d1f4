use vcdmig_client::reader::admin_href;
use vcdmig_client::{find, find_by_locator, Platform, Scope};
use vcdmig_domain::{ObjectDescriptor, ObjectType};

use crate::error::MigrateError;

/// How the operator named an object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    Name(String),
    Href(String),
}

/// Names of the organization and vdc an object lives in, when it lives in one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Containers {
    pub org: Option<String>,
    pub vdc: Option<String>,
}

/// Hrefs of `containers` on `platform`. A named container that does not
/// exist is reported through `missing`.
pub async fn container_hrefs(
    platform: &dyn Platform,
    containers: &Containers,
    missing: fn(ObjectType, &str) -> MigrateError,
) -> Result<(Option<String>, Option<String>), MigrateError> {
    let Some(org_name) = &containers.org else { return Ok((None, None)) };
    let org = find(platform, ObjectType::Organization, org_name, Scope::global())
        .await?
        .and_then(|d| d.href().map(str::to_string))
        .ok_or_else(|| missing(ObjectType::Organization, org_name))?;

    let vdc = match &containers.vdc {
        Some(vdc_name) => Some(
            find(platform, ObjectType::OrgVdc, vdc_name, Scope::org(&org))
                .await?
                .and_then(|d| d.href().map(str::to_string))
                .ok_or_else(|| missing(ObjectType::OrgVdc, vdc_name))?,
        ),
        None => None,
    };
    Ok((Some(org), vdc))
}

pub fn missing_on_source(object_type: ObjectType, name: &str) -> MigrateError {
    MigrateError::SourceNotFound { object_type, name: name.to_string() }
}

pub fn missing_on_target(object_type: ObjectType, name: &str) -> MigrateError {
    MigrateError::reference_not_found(object_type, name)
}

/// Fetch the full description of the object `locator` names on `platform`.
pub async fn locate(
    platform: &dyn Platform,
    object_type: ObjectType,
    locator: &Locator,
    containers: &Containers,
) -> Result<ObjectDescriptor, MigrateError> {
    match locator {
        Locator::Href(href) => find_by_locator(platform, &admin_href(href), object_type)
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    MigrateError::SourceNotFound { object_type, name: href.clone() }
                } else {
                    e.into()
                }
            }),
        Locator::Name(name) => {
            let (org, vdc) = container_hrefs(platform, containers, missing_on_source).await?;
            let scope = Scope { org_href: org.as_deref(), vdc_href: vdc.as_deref() };
            find(platform, object_type, name, scope)
                .await?
                .ok_or_else(|| MigrateError::SourceNotFound { object_type, name: name.clone() })
        }
    }
}
