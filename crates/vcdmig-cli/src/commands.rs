use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use vcdmig_client::{Credentials, Platform, SessionOptions, VcdClient};
use vcdmig_config::load_settings;
use vcdmig_domain::{MigrationSettings, ObjectType};
use vcdmig_migrate::{
    export_matching, export_one, migrate_object, migrate_organization, Containers, Locator, MigrationContext,
    ObjectRequest, ObjectSource, Prompter, RunOptions,
};

use crate::cli::{ExportArgs, MigrateArgs, ObjectArgs, OutputFormat};
use crate::output;
use crate::prompt::StdinPrompter;

/// Settings shared by every subcommand.
pub struct Globals {
    pub settings: MigrationSettings,
    pub insecure: bool,
    pub output:   OutputFormat,
}

impl Globals {
    pub fn load(config: &Path, insecure: bool, output: OutputFormat) -> Result<Self> {
        let settings = load_settings(config)
            .with_context(|| format!("Failed to load settings from {}", config.display()))?;
        Ok(Self { settings, insecure, output })
    }

    fn session_options(&self) -> SessionOptions {
        SessionOptions {
            api_version: self.settings.api_version.clone(),
            insecure: self.insecure,
            ..SessionOptions::default()
        }
    }
}

// ── Export ────────────────────────────────────────────────────────────────────

pub async fn export(args: ExportArgs, globals: Globals) -> Result<()> {
    let object_type = args
        .object
        .object_type
        .context("--type is required for export")?;
    let source = open_session("source", &args.source, &args.source_user, &StdinPrompter, &globals).await?;

    let result = match &args.pattern {
        Some(pattern) => export_matching(source.as_ref(), object_type, pattern, &args.output_dir).await,
        None => {
            let locator = locator(&args.object)?;
            export_one(source.as_ref(), object_type, &locator, &containers(&args.object), &args.output_dir)
                .await
                .map(|path| vec![path])
        }
    };
    close_quietly(source.as_ref()).await;

    let written = result.context("Export failed")?;
    match globals.output {
        OutputFormat::Text => {
            for path in &written {
                println!("{}", path.display());
            }
            println!("{} file(s) written.", written.len());
        }
        OutputFormat::Json => {
            let paths: Vec<String> = written.iter().map(|p| p.display().to_string()).collect();
            println!("{}", serde_json::to_string_pretty(&paths)?);
        }
    }
    Ok(())
}

// ── Migrate ───────────────────────────────────────────────────────────────────

pub async fn migrate(args: MigrateArgs, globals: Globals) -> Result<()> {
    let prompter = StdinPrompter;

    let source = match (&args.source, &args.source_user) {
        (Some(endpoint), Some(user)) => Some(open_session("source", endpoint, user, &prompter, &globals).await?),
        (Some(_), None) => anyhow::bail!("--source-user is required with --source"),
        (None, _) if args.import_file.is_none() => {
            anyhow::bail!("--source (or VCDMIG_SOURCE) is required unless --import-file is given")
        }
        (None, _) => None,
    };
    let target = open_or_release(
        source.as_ref(),
        open_session("target", &args.target, &args.target_user, &prompter, &globals),
    )
    .await?;

    let options = RunOptions {
        default_password: args.default_password.clone(),
        assume_yes:       args.yes,
        rename_to:        args.rename_to.clone(),
    };
    let output_format = globals.output;
    let mut ctx = MigrationContext::new(source, target, globals.settings, options, Box::new(prompter));

    let result = run_migration(&mut ctx, &args).await;
    ctx.close().await;

    match output_format {
        OutputFormat::Text => println!("{}", output::render_report(&ctx.report)),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&ctx.report)?),
    }
    result
}

async fn run_migration(ctx: &mut MigrationContext, args: &MigrateArgs) -> Result<()> {
    let object = &args.object;

    if let Some(path) = &args.import_file {
        let request = ObjectRequest {
            object_type:   object.object_type,
            source:        ObjectSource::File(path.clone()),
            containers:    containers(object),
            services_only: args.services_only,
        };
        let outcome = migrate_object(ctx, &request)
            .await
            .with_context(|| format!("Failed to import {}", path.display()))?;
        info!(name = outcome.name(), href = outcome.href(), "Import finished");
        return Ok(());
    }

    let object_type = object.object_type.context("--type is required")?;
    if object_type == ObjectType::Organization && !args.shallow {
        let name = object
            .name
            .as_deref()
            .context("--name is required to migrate an organization with its contents")?;
        return migrate_organization(ctx, name)
            .await
            .with_context(|| format!("Failed to migrate organization '{}'", name));
    }

    let request = ObjectRequest {
        object_type:   Some(object_type),
        source:        ObjectSource::Platform(locator(object)?),
        containers:    containers(object),
        services_only: args.services_only,
    };
    let outcome = migrate_object(ctx, &request)
        .await
        .with_context(|| format!("Failed to migrate {}", object_type))?;
    info!(name = outcome.name(), href = outcome.href(), "Migration finished");
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn locator(object: &ObjectArgs) -> Result<Locator> {
    match (&object.name, &object.href) {
        (_, Some(href)) => Ok(Locator::Href(href.clone())),
        (Some(name), None) => Ok(Locator::Name(name.clone())),
        (None, None) => anyhow::bail!("one of --name or --href is required"),
    }
}

fn containers(object: &ObjectArgs) -> Containers {
    Containers { org: object.org.clone(), vdc: object.vdc.clone() }
}

/// Log in as `user@org`, asking for the password.
async fn open_session(
    label: &str,
    endpoint: &str,
    login: &str,
    prompter: &dyn Prompter,
    globals: &Globals,
) -> Result<Arc<dyn Platform>> {
    let (user, org) = login
        .split_once('@')
        .with_context(|| format!("--{label}-user must look like user@org, got '{login}'"))?;
    let password = prompter.password(&format!("Password for {} on {}", login, endpoint))?;
    let credentials = Credentials { user: user.to_string(), org: org.to_string(), password };

    let client = VcdClient::open_session(label, endpoint, &credentials, &globals.session_options())
        .await
        .with_context(|| format!("Failed to log in to the {label} instance at {endpoint}"))?;
    Ok(Arc::new(client))
}

/// Await `open`; when it fails, log out of the already open `other` session.
async fn open_or_release(
    other: Option<&Arc<dyn Platform>>,
    open: impl Future<Output = Result<Arc<dyn Platform>>>,
) -> Result<Arc<dyn Platform>> {
    match open.await {
        Ok(platform) => Ok(platform),
        Err(e) => {
            if let Some(other) = other {
                close_quietly(other.as_ref()).await;
            }
            Err(e)
        }
    }
}

async fn close_quietly(platform: &dyn Platform) {
    if let Err(e) = platform.close().await {
        warn!(label = platform.label(), error = %e, "Failed to close session");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vcdmig_client::SimPlatform;

    #[tokio::test]
    async fn failed_target_login_logs_out_of_the_source() {
        let sim = SimPlatform::new("source");
        let source: Arc<dyn Platform> = Arc::new(sim.clone());

        let err = open_or_release(Some(&source), async { Err::<Arc<dyn Platform>, _>(anyhow::anyhow!("login refused")) })
            .await
            .err().unwrap();
        assert_eq!(err.to_string(), "login refused");
        assert!(sim.is_closed().await);
    }

    #[tokio::test]
    async fn successful_target_login_keeps_the_source_open() {
        let sim = SimPlatform::new("source");
        let source: Arc<dyn Platform> = Arc::new(sim.clone());
        let target: Arc<dyn Platform> = Arc::new(SimPlatform::new("target"));

        let opened = open_or_release(Some(&source), async { Ok::<_, anyhow::Error>(target) }).await.unwrap();
        assert_eq!(opened.label(), "target");
        assert!(!sim.is_closed().await);
    }
}
