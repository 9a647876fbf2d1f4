//! One builder per object type. A builder turns a source description into
//! a creation payload for the target and submits it.

use async_trait::async_trait;
use tracing::info;
use vcdmig_client::find;
use vcdmig_domain::{ObjectDescriptor, ObjectType};

use crate::context::{MigrationContext, Placement};
use crate::error::MigrateError;
use crate::report::Change;

pub mod common;
pub mod edge_gateway;
pub mod external_network;
pub mod network;
pub mod organization;
pub mod role;
pub mod user;
pub mod vdc;

/// What [`build_object`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    Created { name: String, href: String },
    /// An object with the target name already existed; nothing was sent.
    Skipped { name: String, href: String },
    /// Only the service configuration of an existing gateway was resubmitted.
    ServicesReapplied { name: String, href: String },
}

impl BuildOutcome {
    pub fn href(&self) -> &str {
        match self {
            BuildOutcome::Created { href, .. }
            | BuildOutcome::Skipped { href, .. }
            | BuildOutcome::ServicesReapplied { href, .. } => href,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            BuildOutcome::Created { name, .. }
            | BuildOutcome::Skipped { name, .. }
            | BuildOutcome::ServicesReapplied { name, .. } => name,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, BuildOutcome::Created { .. })
    }
}

#[async_trait]
pub trait ObjectBuilder: Send + Sync {
    fn object_type(&self) -> ObjectType;

    /// Create `source` on the target as `target_name`; returns the new href.
    /// Callers have already established that no such object exists.
    async fn create(
        &self,
        ctx: &mut MigrationContext,
        source: &ObjectDescriptor,
        target_name: &str,
        placement: &Placement,
    ) -> Result<String, MigrateError>;
}

pub fn builder_for(object_type: ObjectType) -> Box<dyn ObjectBuilder> {
    match object_type {
        ObjectType::Organization => Box::new(organization::OrganizationBuilder),
        ObjectType::Role => Box::new(role::RoleBuilder),
        ObjectType::User => Box::new(user::UserBuilder),
        ObjectType::OrgVdc => Box::new(vdc::OrgVdcBuilder),
        ObjectType::ExternalNetwork => Box::new(external_network::ExternalNetworkBuilder),
        ObjectType::EdgeGateway => Box::new(edge_gateway::EdgeGatewayBuilder),
        ObjectType::OrgVdcNetwork => Box::new(network::NetworkBuilder),
    }
}

/// Create `source` on the target unless an object of the same type and
/// target name already exists in `placement`, in which case it is skipped.
pub async fn build_object(
    ctx: &mut MigrationContext,
    source: &ObjectDescriptor,
    target_name: &str,
    placement: &Placement,
) -> Result<BuildOutcome, MigrateError> {
    let object_type = source.object_type();
    let target = ctx.target();

    if let Some(existing) = find(target.as_ref(), object_type, target_name, placement.scope()).await? {
        let href = existing.href().unwrap_or_default().to_string();
        ctx.report.record(Change::Skipped {
            object_type,
            name: target_name.to_string(),
            reason: "already exists on the target".into(),
        });
        return Ok(BuildOutcome::Skipped { name: target_name.to_string(), href });
    }

    info!(%object_type, source = source.name(), target = target_name, "Creating");
    let href = builder_for(object_type)
        .create(ctx, source, target_name, placement)
        .await?;
    ctx.report.record(Change::Created {
        object_type,
        name: target_name.to_string(),
        href: href.clone(),
    });
    Ok(BuildOutcome::Created { name: target_name.to_string(), href })
}
