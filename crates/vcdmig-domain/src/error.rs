use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("xml error: {0}")]
    Xml(String),

    #[error("unrecognised root element <{0}>; cannot infer object type")]
    UnknownRootTag(String),

    #[error("unknown object type '{0}'")]
    UnknownObjectType(String),

    #[error("{object} is missing required field '{field}'")]
    MissingField { object: String, field: String },
}
