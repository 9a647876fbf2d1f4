pub mod builders;
pub mod context;
pub mod error;
pub mod export;
pub mod locate;
pub mod orchestrator;
pub mod prompt;
pub mod report;
pub mod resolver;

pub use builders::{build_object, BuildOutcome};
pub use context::{MigrationContext, Placement, RunOptions};
pub use error::MigrateError;
pub use export::{export_matching, export_one, load_descriptor};
pub use locate::{locate, Containers, Locator};
pub use orchestrator::{migrate_object, migrate_organization, ObjectRequest, ObjectSource};
pub use prompt::{Prompter, ScriptedPrompter};
pub use report::{Change, MigrationReport};
pub use resolver::Resolver;
