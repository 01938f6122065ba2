use crate::types::{AppRowId, Application, User, UserId};
use crate::{Registry, RegistryError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

/// Registry held in process memory. Reads can be made to fail with a database error
/// to exercise storage fault handling.
#[derive(Default)]
pub struct InMemoryRegistry {
    applications: RwLock<HashMap<AppRowId, Application>>,
    users: RwLock<HashMap<UserId, User>>,
    unavailable: AtomicBool,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_application(&self, app: Application) {
        self.applications.write().unwrap().insert(app.id, app);
    }

    pub fn insert_user(&self, user: User) {
        self.users.write().unwrap().insert(user.id, user);
    }

    pub fn get_application(&self, id: AppRowId) -> Option<Application> {
        self.applications.read().unwrap().get(&id).cloned()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Relaxed);
    }

    fn check_available(&self) -> Result<(), RegistryError> {
        match self.unavailable.load(Ordering::Relaxed) {
            true => Err(RegistryError::Database(sqlx::Error::PoolClosed)),
            false => Ok(()),
        }
    }
}

#[async_trait]
impl Registry for InMemoryRegistry {
    async fn application(&self, id: AppRowId) -> Result<Application, RegistryError> {
        self.check_available()?;
        self.get_application(id)
            .ok_or(RegistryError::ApplicationNotFound(id))
    }

    async fn user(&self, id: UserId) -> Result<User, RegistryError> {
        self.check_available()?;
        self.users
            .read()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(RegistryError::UserNotFound(id))
    }

    async fn set_app_client_id(&self, id: AppRowId, client_id: u64) -> Result<(), RegistryError> {
        self.check_available()?;
        match self.applications.write().unwrap().get_mut(&id) {
            Some(app) => {
                app.client_id = Some(client_id);
                Ok(())
            }
            None => Err(RegistryError::ApplicationNotFound(id)),
        }
    }

    async fn check_connection(&self) -> Result<(), RegistryError> {
        self.check_available()
    }

    fn is_ready(&self) -> bool {
        !self.unavailable.load(Ordering::Relaxed)
    }
}
