use crate::types::{AppRowId, ResolvedApplication};
use crate::{Registry, RegistryError};
use std::sync::Arc;

/// Looks up the internal callback endpoint of an application.
///
/// Grants are low-frequency administrative operations, so every resolution goes to the
/// registry and nothing is cached.
#[derive(Clone)]
pub struct AddressResolver {
    registry: Arc<dyn Registry>,
}

impl AddressResolver {
    pub fn new(registry: Arc<dyn Registry>) -> Self {
        AddressResolver { registry }
    }

    pub async fn resolve(&self, id: AppRowId) -> Result<ResolvedApplication, RegistryError> {
        let app = self.registry.application(id).await?;

        let internal_address = app
            .publish_address_inside
            .filter(|address| !address.trim().is_empty())
            .ok_or(RegistryError::MissingAddress(id))?;

        tracing::debug!(app_row_id = id, %internal_address, "Resolved application");

        Ok(ResolvedApplication {
            id: app.id,
            app_id: app.app_id,
            internal_address,
            external_address: app.publish_address_outside,
            client_id: app.client_id,
        })
    }
}
