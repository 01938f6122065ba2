//! Local mirror of the latest sync result per (user name, application).
//!
//! Rows for a user name are only ever written as a whole: the commit deletes every row of that
//! user name and inserts the new set inside one transaction. Writers for the same user name are
//! serialized, writers for different user names are not.

use crate::config::MirrorConfig;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS proxy_user_app (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER,
    user_name TEXT NOT NULL,
    name TEXT NOT NULL DEFAULT '',
    gender INTEGER NOT NULL DEFAULT 0,
    mobile TEXT NOT NULL DEFAULT '',
    email TEXT NOT NULL DEFAULT '',
    app_id INTEGER NOT NULL,
    app_address TEXT NOT NULL,
    app_user_id INTEGER,
    create_date TEXT NOT NULL,
    modify_date TEXT NOT NULL
)";

const CREATE_USER_NAME_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_proxy_user_app_user_name ON proxy_user_app (user_name)";

const CREATE_USER_ID_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_proxy_user_app_user_id ON proxy_user_app (user_id)";

const SELECT_COLUMNS: &str = "SELECT id, user_id, user_name, name, gender, mobile, email, \
     app_id, app_address, app_user_id, create_date, modify_date FROM proxy_user_app";

#[derive(thiserror::Error, Debug)]
pub enum MirrorError {
    #[error("mirror database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("could not prepare mirror store directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("id {0} does not fit the mirror schema")]
    IdOutOfRange(String),
}

/// One synchronized (user, application) pair.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MirrorRecord {
    pub user_id: Option<u64>,
    pub user_name: String,
    pub name: String,
    pub gender: i32,
    pub mobile: String,
    pub email: String,
    /// Owning application id from the registry
    pub app_id: u64,
    /// Internal callback address the user was synced to
    pub app_address: String,
    /// User id issued by the downstream application, absent on rejection
    pub app_user_id: Option<u64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StoredRecord {
    pub id: i64,
    pub record: MirrorRecord,
    pub create_date: DateTime<Utc>,
    pub modify_date: DateTime<Utc>,
}

#[async_trait]
pub trait MirrorStore: Send + Sync {
    /// Replaces every row of `user_name` with `records` atomically.
    async fn replace_user_records(
        &self,
        user_name: &str,
        records: &[MirrorRecord],
    ) -> Result<(), MirrorError>;

    async fn records_by_user_id(&self, user_id: u64) -> Result<Vec<StoredRecord>, MirrorError>;

    async fn records_by_user_name(&self, user_name: &str)
    -> Result<Vec<StoredRecord>, MirrorError>;

    async fn user_name_exists(&self, user_name: &str) -> Result<bool, MirrorError>;

    async fn check_connection(&self) -> Result<(), MirrorError>;
}

/// Hands out one async mutex per user name. Entries nobody holds are pruned on each lock.
#[derive(Default)]
struct UserLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl UserLocks {
    async fn lock(&self, user_name: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(user_name.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

pub struct SqliteMirrorStore {
    pool: SqlitePool,
    locks: UserLocks,
}

impl SqliteMirrorStore {
    /// Opens (creating if needed) the SQLite file and its schema.
    pub async fn open(config: &MirrorConfig) -> Result<Self, MirrorError> {
        if let Some(parent) = config.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(&config.path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await?;

        for statement in [CREATE_TABLE, CREATE_USER_NAME_INDEX, CREATE_USER_ID_INDEX] {
            sqlx::query(statement).execute(&pool).await?;
        }

        tracing::info!(path = %config.path.display(), "Opened mirror store");
        Ok(SqliteMirrorStore {
            pool,
            locks: UserLocks::default(),
        })
    }

    async fn fetch(&self, sql: &str, bind: Bind<'_>) -> Result<Vec<StoredRecord>, MirrorError> {
        let query = sqlx::query(sql);
        let query = match bind {
            Bind::Int(value) => query.bind(value),
            Bind::Text(value) => query.bind(value),
        };
        query
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(stored_record_from_row)
            .collect()
    }
}

enum Bind<'a> {
    Int(i64),
    Text(&'a str),
}

#[async_trait]
impl MirrorStore for SqliteMirrorStore {
    async fn replace_user_records(
        &self,
        user_name: &str,
        records: &[MirrorRecord],
    ) -> Result<(), MirrorError> {
        debug_assert!(records.iter().all(|r| r.user_name == user_name));

        let _guard = self.locks.lock(user_name).await;
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let deleted = sqlx::query("DELETE FROM proxy_user_app WHERE user_name = ?")
            .bind(user_name)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        for record in records {
            sqlx::query(
                "INSERT INTO proxy_user_app (user_id, user_name, name, gender, mobile, email, \
                 app_id, app_address, app_user_id, create_date, modify_date) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(record.user_id.map(to_sql_id).transpose()?)
            .bind(user_name)
            .bind(&record.name)
            .bind(record.gender)
            .bind(&record.mobile)
            .bind(&record.email)
            .bind(to_sql_id(record.app_id)?)
            .bind(&record.app_address)
            .bind(record.app_user_id.map(to_sql_id).transpose()?)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        tracing::debug!(
            user_name,
            deleted,
            inserted = records.len(),
            "Replaced mirror records"
        );
        Ok(())
    }

    async fn records_by_user_id(&self, user_id: u64) -> Result<Vec<StoredRecord>, MirrorError> {
        let sql = format!("{SELECT_COLUMNS} WHERE user_id = ? ORDER BY id");
        self.fetch(&sql, Bind::Int(to_sql_id(user_id)?)).await
    }

    async fn records_by_user_name(
        &self,
        user_name: &str,
    ) -> Result<Vec<StoredRecord>, MirrorError> {
        let sql = format!("{SELECT_COLUMNS} WHERE user_name = ? ORDER BY id");
        self.fetch(&sql, Bind::Text(user_name)).await
    }

    async fn user_name_exists(&self, user_name: &str) -> Result<bool, MirrorError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM proxy_user_app WHERE user_name = ?")
                .bind(user_name)
                .fetch_one(&self.pool)
                .await?;
        Ok(count > 0)
    }

    async fn check_connection(&self) -> Result<(), MirrorError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

// SQLite integers are signed 64-bit
fn to_sql_id(id: u64) -> Result<i64, MirrorError> {
    i64::try_from(id).map_err(|_| MirrorError::IdOutOfRange(id.to_string()))
}

fn from_sql_id(id: i64) -> Result<u64, MirrorError> {
    u64::try_from(id).map_err(|_| MirrorError::IdOutOfRange(id.to_string()))
}

fn stored_record_from_row(row: &SqliteRow) -> Result<StoredRecord, MirrorError> {
    let user_id: Option<i64> = row.try_get("user_id")?;
    let app_user_id: Option<i64> = row.try_get("app_user_id")?;

    Ok(StoredRecord {
        id: row.try_get("id")?,
        record: MirrorRecord {
            user_id: user_id.map(from_sql_id).transpose()?,
            user_name: row.try_get("user_name")?,
            name: row.try_get("name")?,
            gender: row.try_get("gender")?,
            mobile: row.try_get("mobile")?,
            email: row.try_get("email")?,
            app_id: from_sql_id(row.try_get("app_id")?)?,
            app_address: row.try_get("app_address")?,
            app_user_id: app_user_id.map(from_sql_id).transpose()?,
        },
        create_date: row.try_get("create_date")?,
        modify_date: row.try_get("modify_date")?,
    })
}
