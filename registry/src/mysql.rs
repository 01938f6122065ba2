use crate::config::Config;
use crate::types::{AppRowId, Application, User, UserId};
use crate::{Registry, RegistryError};
use async_trait::async_trait;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use std::time::Duration;

#[derive(sqlx::FromRow)]
struct ApplicationRow {
    id: u64,
    app_id: u64,
    publish_address_inside: Option<String>,
    publish_address_outside: Option<String>,
    app_client_id: Option<u64>,
}

impl From<ApplicationRow> for Application {
    fn from(row: ApplicationRow) -> Self {
        Application {
            id: row.id,
            app_id: row.app_id,
            publish_address_inside: row.publish_address_inside,
            publish_address_outside: row.publish_address_outside,
            // 0 is the column default for rows that were never synced
            client_id: row.app_client_id.filter(|id| *id != 0),
        }
    }
}

#[derive(sqlx::FromRow)]
struct UserRow {
    user_name: Option<String>,
    name: Option<String>,
    mobile: Option<String>,
    email: Option<String>,
}

/// Registry backed by the user-center MySQL schema (`jos_app`, `xjr_user`).
#[derive(Clone)]
pub struct MySqlRegistry {
    pool: MySqlPool,
}

impl MySqlRegistry {
    pub async fn connect(config: &Config) -> Result<Self, RegistryError> {
        let pool = MySqlPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .max_lifetime(Some(Duration::from_secs(config.max_lifetime_secs)))
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect(&config.url)
            .await?;

        tracing::info!("Connected to registry database");
        Ok(MySqlRegistry { pool })
    }

    pub fn from_pool(pool: MySqlPool) -> Self {
        MySqlRegistry { pool }
    }
}

#[async_trait]
impl Registry for MySqlRegistry {
    async fn application(&self, id: AppRowId) -> Result<Application, RegistryError> {
        // Unsigned casts keep decoding stable whether the columns were created signed or not.
        let row = sqlx::query_as::<_, ApplicationRow>(
            "SELECT CAST(id AS UNSIGNED) AS id, CAST(app_id AS UNSIGNED) AS app_id, \
             publish_address_inside, publish_address_outside, \
             CAST(app_client_id AS UNSIGNED) AS app_client_id \
             FROM jos_app WHERE id = ? LIMIT 1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Application::from)
            .ok_or(RegistryError::ApplicationNotFound(id))
    }

    async fn user(&self, id: UserId) -> Result<User, RegistryError> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT user_name, name, mobile, email FROM xjr_user WHERE id = ? LIMIT 1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(RegistryError::UserNotFound(id))?;

        Ok(User {
            id,
            user_name: row.user_name.unwrap_or_default(),
            name: row.name.unwrap_or_default(),
            mobile: row.mobile.unwrap_or_default(),
            email: row.email.unwrap_or_default(),
        })
    }

    async fn set_app_client_id(&self, id: AppRowId, client_id: u64) -> Result<(), RegistryError> {
        let result =
            sqlx::query("UPDATE jos_app SET app_client_id = ?, modify_date = NOW(3) WHERE id = ?")
                .bind(client_id)
                .bind(id)
                .execute(&self.pool)
                .await?;

        // MySQL counts changed rows, not matched ones, so zero may still mean an unchanged row
        if result.rows_affected() == 0 {
            sqlx::query("SELECT 1 FROM jos_app WHERE id = ? LIMIT 1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?
                .ok_or(RegistryError::ApplicationNotFound(id))?;
        }
        Ok(())
    }

    async fn check_connection(&self) -> Result<(), RegistryError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn is_ready(&self) -> bool {
        !self.pool.is_closed()
    }
}
