use std::path::PathBuf;

use thiserror::Error;

/// Problems with the settings file. `origin` names where the YAML came from
/// (a path, or a label for inline text).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read settings file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Malformed YAML, a wrongly typed value, or a key the file format does
    /// not know (`deny_unknown_fields`).
    #[error("invalid settings in {origin}: {source}")]
    Parse {
        origin: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("{origin}: renames lists unknown object type '{key}'")]
    UnknownObjectType { origin: String, key: String },

    #[error("{origin}: {field} {message}")]
    InvalidValue {
        origin:  String,
        field:   &'static str,
        message: String,
    },
}
