use crate::mirror::MirrorError;
use registry::RegistryError;

/// Coarse classification used for status mapping and metric tags.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncErrorKind {
    InvalidInput,
    NotFound,
    Network,
    Protocol,
    Storage,
}

impl SyncErrorKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            SyncErrorKind::InvalidInput => "invalid_input",
            SyncErrorKind::NotFound => "not_found",
            SyncErrorKind::Network => "network",
            SyncErrorKind::Protocol => "protocol",
            SyncErrorKind::Storage => "storage",
        }
    }
}

/// Hard failures of a sync event. Any of these aborts the current user's batch before the
/// mirror commit. Downstream rejections are not errors, see [`crate::client::SyncOutcome`].
#[derive(thiserror::Error, Debug)]
pub enum SyncError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("failed to reach {endpoint}: {source}")]
    Network {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("unexpected response from {endpoint}: {reason}")]
    Protocol { endpoint: String, reason: String },
    #[error("registry error: {0}")]
    Registry(#[source] RegistryError),
    #[error("mirror store error: {0}")]
    Mirror(#[from] MirrorError),
}

impl SyncError {
    pub fn kind(&self) -> SyncErrorKind {
        match self {
            SyncError::InvalidInput(_) => SyncErrorKind::InvalidInput,
            SyncError::NotFound(_) => SyncErrorKind::NotFound,
            SyncError::Network { .. } => SyncErrorKind::Network,
            SyncError::Protocol { .. } => SyncErrorKind::Protocol,
            SyncError::Registry(_) | SyncError::Mirror(_) => SyncErrorKind::Storage,
        }
    }
}

impl From<RegistryError> for SyncError {
    fn from(err: RegistryError) -> Self {
        match err.is_not_found() {
            true => SyncError::NotFound(err.to_string()),
            false => SyncError::Registry(err),
        }
    }
}
