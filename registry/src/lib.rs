pub mod config;
pub mod mysql;
pub mod resolver;
#[cfg(any(test, feature = "testutils"))]
pub mod testutils;
pub mod types;

use async_trait::async_trait;
use types::{AppRowId, Application, User, UserId};

#[derive(thiserror::Error, Debug)]
pub enum RegistryError {
    #[error("application with ID {0} not found")]
    ApplicationNotFound(AppRowId),
    #[error("user with ID {0} not found")]
    UserNotFound(UserId),
    #[error("application with ID {0} has no internal publish address")]
    MissingAddress(AppRowId),
    #[error("registry database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl RegistryError {
    pub fn is_not_found(&self) -> bool {
        !matches!(self, RegistryError::Database(_))
    }
}

/// Read/write accessors on the system of record for applications and users.
///
/// Every call is a fresh lookup; implementations must not cache rows.
#[async_trait]
pub trait Registry: Send + Sync {
    async fn application(&self, id: AppRowId) -> Result<Application, RegistryError>;

    async fn user(&self, id: UserId) -> Result<User, RegistryError>;

    /// Persists a remote client id learned from a downstream application onto its registry row.
    async fn set_app_client_id(&self, id: AppRowId, client_id: u64) -> Result<(), RegistryError>;

    async fn check_connection(&self) -> Result<(), RegistryError>;

    fn is_ready(&self) -> bool;
}
