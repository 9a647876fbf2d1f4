mod raw;
mod loader;
pub mod error;

pub use loader::{load_settings, parse_settings};
pub use error::ConfigError;
