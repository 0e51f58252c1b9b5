//! SQLx implementation of [`UserStore`].

use std::time::Duration;

use async_trait::async_trait;
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Row};
use tracing::info;

use crate::{AuthError, UserRecord, UserStore, UserUpdate};

use super::queries;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseType {
    PostgreSQL,
    MySQL,
    SQLite,
}

impl DatabaseType {
    /// Detect database type from URL.
    pub fn from_url(url: &str) -> Option<Self> {
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Some(Self::PostgreSQL)
        } else if url.starts_with("mysql://") || url.starts_with("mariadb://") {
            Some(Self::MySQL)
        } else if url.starts_with("sqlite:") {
            Some(Self::SQLite)
        } else {
            None
        }
    }

    #[inline]
    fn is_pg(self) -> bool {
        self == Self::PostgreSQL
    }
}

#[derive(Debug, Clone)]
pub struct SqlStoreConfig {
    /// `postgres://…`, `mysql://…`, `sqlite:path` or `sqlite::memory:`.
    pub database_url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout: Duration,
}

impl SqlStoreConfig {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
        }
    }

    pub fn max_connections(mut self, n: u32) -> Self {
        self.max_connections = n;
        self
    }
}

pub struct SqlStore {
    pool: AnyPool,
    db_type: DatabaseType,
}

impl SqlStore {
    pub async fn connect(config: SqlStoreConfig) -> Result<Self, AuthError> {
        sqlx::any::install_default_drivers();

        let db_type = DatabaseType::from_url(&config.database_url)
            .ok_or_else(|| AuthError::backend("unsupported database URL scheme"))?;

        let pool = AnyPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections.min(config.max_connections))
            .acquire_timeout(config.connect_timeout)
            .connect(&config.database_url)
            .await?;

        info!(db = ?db_type, "user store connected");
        Ok(Self { pool, db_type })
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    pub fn db_type(&self) -> DatabaseType {
        self.db_type
    }

    /// Create the users table if it does not exist.
    pub async fn init_schema(&self) -> Result<(), AuthError> {
        let schema = match self.db_type {
            DatabaseType::PostgreSQL => queries::SCHEMA_PG,
            DatabaseType::MySQL => queries::SCHEMA_MYSQL,
            DatabaseType::SQLite => queries::SCHEMA_SQLITE,
        };
        sqlx::query(schema).execute(&self.pool).await?;
        Ok(())
    }

    fn pick(&self, pg: &'static str, other: &'static str) -> &'static str {
        if self.db_type.is_pg() { pg } else { other }
    }
}

#[allow(clippy::cast_sign_loss)]
fn parse_row(row: &AnyRow) -> Result<UserRecord, AuthError> {
    let data_cap: i64 = row.try_get("data_cap")?;
    let data_used: i64 = row.try_get("data_used")?;
    let ip_limit: i64 = row.try_get("ip_limit")?;
    Ok(UserRecord {
        id: row.try_get("id")?,
        created_at: row.try_get("created_at")?,
        expiration_date: row.try_get("expiration_date")?,
        expiration_time: row.try_get("expiration_time")?,
        note: row.try_get::<Option<String>, _>("note")?.unwrap_or_default(),
        data_cap: data_cap.max(0) as u64,
        data_used: data_used.max(0) as u64,
        ip_limit: u32::try_from(ip_limit.max(0)).unwrap_or(u32::MAX),
    })
}

#[inline]
fn to_db(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

#[async_trait]
impl UserStore for SqlStore {
    async fn get_user(&self, id: &str) -> Result<Option<UserRecord>, AuthError> {
        let query = queries::select_one(self.db_type.is_pg());
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(parse_row).transpose()
    }

    async fn insert_user(&self, record: &UserRecord) -> Result<(), AuthError> {
        let query = self.pick(queries::INSERT_PG, queries::INSERT_MYSQL);
        sqlx::query(query)
            .bind(&record.id)
            .bind(record.created_at)
            .bind(record.expiration_date.as_deref())
            .bind(record.expiration_time.as_deref())
            .bind(&record.note)
            .bind(to_db(record.data_cap))
            .bind(to_db(record.data_used))
            .bind(i64::from(record.ip_limit))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_user_fields(&self, id: &str, update: &UserUpdate) -> Result<bool, AuthError> {
        let query = self.pick(queries::UPDATE_FIELDS_PG, queries::UPDATE_FIELDS_MYSQL);
        let result = sqlx::query(query)
            .bind(update.expiration_date.as_deref())
            .bind(update.expiration_time.as_deref())
            .bind(update.note.as_deref())
            .bind(update.data_cap.map(to_db))
            .bind(update.ip_limit.map(i64::from))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn increment_usage(&self, id: &str, bytes: u64) -> Result<(), AuthError> {
        let query = self.pick(queries::INCREMENT_USAGE_PG, queries::INCREMENT_USAGE_MYSQL);
        let result = sqlx::query(query)
            .bind(to_db(bytes))
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AuthError::NotFound);
        }
        Ok(())
    }

    async fn reset_usage(&self, id: &str) -> Result<bool, AuthError> {
        let query = self.pick(queries::RESET_USAGE_PG, queries::RESET_USAGE_MYSQL);
        let result = sqlx::query(query).bind(id).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_user(&self, id: &str) -> Result<bool, AuthError> {
        let query = self.pick(queries::DELETE_PG, queries::DELETE_MYSQL);
        let result = sqlx::query(query).bind(id).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_users(&self) -> Result<Vec<UserRecord>, AuthError> {
        let rows = sqlx::query(&queries::select_all())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(parse_row).collect()
    }
}
