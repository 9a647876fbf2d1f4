use async_trait::async_trait;
use tracing::info;
use vcdmig_client::{find, find_by_locator};
use vcdmig_domain::{Element, ObjectDescriptor, ObjectType, Reference};

use super::common::{created_href, keep_children, strip_server_fields, submit};
use super::{build_object, ObjectBuilder};
use crate::context::{MigrationContext, Placement};
use crate::error::MigrateError;
use crate::resolver::Resolver;

/// Writable `User` fields, in schema order. `Password` follows `Role`.
const USER_FIELDS: &[&str] = &[
    "FullName",
    "EmailAddress",
    "Telephone",
    "IsEnabled",
    "IsLocked",
    "IM",
    "NameInSource",
    "IsExternal",
    "ProviderType",
    "IsGroupRole",
    "StoredVmQuota",
    "DeployedVmQuota",
    "Role",
];

pub struct UserBuilder;

/// Users authenticated by the platform itself need a password; LDAP and
/// SAML users do not.
pub fn needs_password(user: &ObjectDescriptor) -> bool {
    user.root()
        .child_text("ProviderType")
        .map_or(true, |p| p.eq_ignore_ascii_case("INTEGRATED"))
}

/// Make sure the role `role_ref` names exists on the target, creating it
/// from its source definition when missing.
pub async fn ensure_role(
    ctx: &mut MigrationContext,
    role_ref: &Reference,
    placement: &Placement,
) -> Result<(), MigrateError> {
    let target = ctx.target();
    let target_name = ctx.target_name(ObjectType::Role, &role_ref.name);
    if find(target.as_ref(), ObjectType::Role, &target_name, placement.scope())
        .await?
        .is_some()
    {
        return Ok(());
    }

    info!(role = %role_ref.name, "Role missing on target; copying it from the source");
    let source = ctx.require_source(&format!("copy role '{}'", role_ref.name))?;
    let role = find_by_locator(source.as_ref(), &role_ref.href, ObjectType::Role)
        .await
        .map_err(|e| match e {
            e if e.is_not_found() => MigrateError::SourceNotFound {
                object_type: ObjectType::Role,
                name:        role_ref.name.clone(),
            },
            e => e.into(),
        })?;
    build_object(ctx, &role, &target_name, placement).await?;
    Ok(())
}

#[async_trait]
impl ObjectBuilder for UserBuilder {
    fn object_type(&self) -> ObjectType {
        ObjectType::User
    }

    async fn create(
        &self,
        ctx: &mut MigrationContext,
        source: &ObjectDescriptor,
        target_name: &str,
        placement: &Placement,
    ) -> Result<String, MigrateError> {
        let what = format!("user '{}'", target_name);
        let org = placement.require_org(&what)?.to_string();

        let role_ref = source.reference("Role")?;
        ensure_role(ctx, &role_ref, placement).await?;

        let mut draft = source.clone();
        draft.set_name(target_name);
        strip_server_fields(draft.root_mut());
        keep_children(draft.root_mut(), USER_FIELDS);

        let target = ctx.target();
        let mut payload = Resolver::new(target.as_ref(), placement, &ctx.settings.renames)
            .rewrite(&draft)
            .await?
            .into_root();

        if needs_password(source) {
            let password = match &ctx.options.default_password {
                Some(p) => p.clone(),
                None => ctx.prompter.password(&format!("Password for {}", what))?,
            };
            let name = payload.sibling_name("Password");
            payload.children.push(Element::new(name).with_text(password));
        }

        let response = submit(
            target.as_ref(),
            &format!("{}/users", org),
            ObjectType::User.media_type(),
            &payload,
            &ctx.settings.poll,
        )
        .await;
        drop(payload);
        created_href(&response?, &what)
    }
}
