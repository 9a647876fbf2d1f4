use thiserror::Error;
use vcdmig_domain::DomainError;

/// Structured detail from a platform `<Error>` body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformError {
    pub major:   Option<String>,
    pub minor:   Option<String>,
    pub message: String,
}

impl std::fmt::Display for PlatformError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.minor {
            Some(minor) => write!(f, "{}: {}", minor, self.message),
            None => f.write_str(&self.message),
        }
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("authentication against {endpoint} failed: {message}")]
    Auth { endpoint: String, message: String },

    #[error("{what} not found")]
    NotFound { what: String },

    #[error("platform rejected {what}: {error}")]
    Validation { what: String, error: PlatformError },

    #[error("conflict on {what}: {error}")]
    Conflict { what: String, error: PlatformError },

    #[error("platform error on {what} (HTTP {status}): {error}")]
    Platform { what: String, status: u16, error: PlatformError },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("timed out waiting for {what} after {attempts} attempt(s)")]
    Timeout { what: String, attempts: u32 },

    #[error("task failed: {0}")]
    TaskFailed(String),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl ClientError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound { .. })
    }

    /// Map a non-success HTTP status to the error taxonomy.
    ///
    /// `read` marks retrievals: the platform answers 403 for objects that do
    /// not exist (it refuses to confirm existence), so on reads 403 means
    /// not found.
    pub fn from_status(
        status: u16,
        endpoint: &str,
        what: &str,
        read: bool,
        error: PlatformError,
    ) -> ClientError {
        let what = what.to_string();
        match status {
            401 => ClientError::Auth { endpoint: endpoint.to_string(), message: error.to_string() },
            404 => ClientError::NotFound { what },
            403 if read => ClientError::NotFound { what },
            409 => ClientError::Conflict { what, error },
            400 if error.minor.as_deref() == Some("DUPLICATE_NAME") => {
                ClientError::Conflict { what, error }
            }
            400 => ClientError::Validation { what, error },
            _ => ClientError::Platform { what, status, error },
        }
    }
}
