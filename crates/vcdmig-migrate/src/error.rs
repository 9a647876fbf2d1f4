use std::path::PathBuf;

use thiserror::Error;
use vcdmig_client::ClientError;
use vcdmig_domain::{DomainError, ObjectType};

#[derive(Debug, Error)]
pub enum MigrateError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Domain(#[from] DomainError),

    /// A reference in a source description has no counterpart on the target.
    #[error("reference not found on target: {object_type} '{name}'")]
    ReferenceNotFound { object_type: String, name: String },

    /// A description links to something no resolution rule covers.
    #[error("no resolution rule for <{element}> '{name}'")]
    UnmappedReference { element: String, name: String },

    #[error("{object_type} '{name}' not found on the source")]
    SourceNotFound { object_type: ObjectType, name: String },

    #[error("a source session is required to {0}")]
    SourceRequired(String),

    #[error("{what} requires a target {container}")]
    MissingPlacement { what: String, container: &'static str },

    #[error("edge gateway '{name}' cannot be edited while {state}")]
    GatewayNotReady { name: String, state: String },

    #[error("migration aborted by the operator")]
    Aborted,

    #[error("prompt failed: {0}")]
    Prompt(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path:   PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

impl MigrateError {
    pub fn reference_not_found(object_type: impl ToString, name: impl Into<String>) -> Self {
        MigrateError::ReferenceNotFound { object_type: object_type.to_string(), name: name.into() }
    }
}
