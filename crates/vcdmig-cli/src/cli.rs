use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use vcdmig_domain::ObjectType;

#[derive(Debug, Parser)]
#[command(
    name = "vcdmig",
    about = "Export vCloud Director objects and migrate tenants between instances",
    version
)]
pub struct Cli {
    /// Settings file: renames, provider vdc and port group mappings, polling.
    #[arg(long, env = "VCDMIG_CONFIG", default_value = "migration.yml", global = true)]
    pub config: PathBuf,

    /// Also append the log to this file.
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Accept self-signed certificates.
    #[arg(long, global = true)]
    pub insecure: bool,

    /// Summary format.
    #[arg(long, default_value = "text", global = true)]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Write object descriptions to XML files.
    Export(ExportArgs),

    /// Recreate objects from a source instance (or exported files) on a
    /// target instance.
    Migrate(MigrateArgs),
}

/// Which object, by name or by link, and where it lives.
#[derive(Debug, Args)]
pub struct ObjectArgs {
    /// Object type: organization, role, user, org_vdc, external_network,
    /// edge_gateway or org_vdc_network.
    #[arg(long = "type")]
    pub object_type: Option<ObjectType>,

    #[arg(long, conflicts_with = "href")]
    pub name: Option<String>,

    /// Direct link to the object on the source.
    #[arg(long)]
    pub href: Option<String>,

    /// Organization the object belongs to.
    #[arg(long)]
    pub org: Option<String>,

    /// Vdc the object belongs to (edge gateways, networks).
    #[arg(long, requires = "org")]
    pub vdc: Option<String>,
}

#[derive(Debug, Args)]
pub struct ExportArgs {
    /// Source API endpoint, e.g. https://vcd-a.example.com
    #[arg(long, env = "VCDMIG_SOURCE")]
    pub source: String,

    /// Source login as user@org.
    #[arg(long)]
    pub source_user: String,

    #[command(flatten)]
    pub object: ObjectArgs,

    /// Export every object of the type whose name matches this pattern
    /// (`*` wildcards), one file each.
    #[arg(long = "match", conflicts_with_all = ["name", "href"])]
    pub pattern: Option<String>,

    /// Directory (or file, for a single object) to write to.
    #[arg(long, default_value = ".")]
    pub output_dir: PathBuf,
}

#[derive(Debug, Args)]
pub struct MigrateArgs {
    /// Source API endpoint. Optional with --import-file.
    #[arg(long, env = "VCDMIG_SOURCE")]
    pub source: Option<String>,

    /// Source login as user@org.
    #[arg(long, requires = "source")]
    pub source_user: Option<String>,

    /// Target API endpoint.
    #[arg(long, env = "VCDMIG_TARGET")]
    pub target: String,

    /// Target login as user@org.
    #[arg(long)]
    pub target_user: String,

    #[command(flatten)]
    pub object: ObjectArgs,

    /// Read the object description from a file written by `export`.
    #[arg(long, conflicts_with_all = ["name", "href"])]
    pub import_file: Option<PathBuf>,

    /// Name for the object on the target.
    #[arg(long)]
    pub rename_to: Option<String>,

    /// Password for every created local user instead of prompting per user.
    #[arg(long)]
    pub default_password: Option<String>,

    /// Edge gateways: only resubmit the service configuration of the
    /// existing target gateway.
    #[arg(long)]
    pub services_only: bool,

    /// Organizations: create the organization alone, without its contents.
    #[arg(long)]
    pub shallow: bool,

    /// Do not ask before creating edge gateways and networks.
    #[arg(long, short = 'y')]
    pub yes: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}
