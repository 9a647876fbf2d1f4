use async_trait::async_trait;
use vcdmig_domain::{ObjectDescriptor, ObjectType};

use super::common::{created_href, keep_children, strip_server_fields, submit};
use super::ObjectBuilder;
use crate::context::{MigrationContext, Placement};
use crate::error::MigrateError;
use crate::resolver::Resolver;

pub struct RoleBuilder;

#[async_trait]
impl ObjectBuilder for RoleBuilder {
    fn object_type(&self) -> ObjectType {
        ObjectType::Role
    }

    /// Rights are instance-global and re-resolved by name.
    async fn create(
        &self,
        ctx: &mut MigrationContext,
        source: &ObjectDescriptor,
        target_name: &str,
        placement: &Placement,
    ) -> Result<String, MigrateError> {
        let org = placement.require_org(&format!("role '{}'", target_name))?;
        let target = ctx.target();

        let mut draft = source.clone();
        draft.set_name(target_name);
        strip_server_fields(draft.root_mut());
        keep_children(draft.root_mut(), &["Description", "RightReferences"]);

        let payload = Resolver::new(target.as_ref(), placement, &ctx.settings.renames)
            .rewrite(&draft)
            .await?;
        let response = submit(
            target.as_ref(),
            &format!("{}/roles", org),
            ObjectType::Role.media_type(),
            payload.root(),
            &ctx.settings.poll,
        )
        .await?;
        created_href(&response, &format!("role '{}'", target_name))
    }
}
