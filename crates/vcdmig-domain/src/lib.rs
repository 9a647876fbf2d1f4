pub mod error;
pub mod sanitize;
pub mod settings;
pub mod types;
pub mod xml;


pub use error::DomainError;
pub use sanitize::{sanitize_description, DESCRIPTION_MAX_CHARS};
pub use settings::{MigrationSettings, PollPolicy, PortGroupBacking, Renames, DEFAULT_API_VERSION};
pub use types::{ObjectDescriptor, ObjectType, Reference};
pub use xml::Element;
