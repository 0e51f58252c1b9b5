//! SQL-backed [`UserStore`](crate::UserStore) (PostgreSQL, MySQL, SQLite via SQLx `Any`).
//!
//! Enable the drivers you need:
//!
//! ```toml
//! vless-auth = { version = "0.1", features = ["sql-postgres"] }
//! ```
//!
//! Schema (created by [`SqlStore::init_schema`]):
//!
//! ```sql
//! CREATE TABLE vless_users (
//!     id VARCHAR(36) PRIMARY KEY,        -- canonical UUID
//!     created_at BIGINT NOT NULL,        -- unix seconds
//!     expiration_date VARCHAR(10),       -- YYYY-MM-DD (UTC)
//!     expiration_time VARCHAR(8),        -- HH:MM:SS (UTC)
//!     note TEXT NOT NULL,
//!     data_cap BIGINT NOT NULL DEFAULT 0,  -- 0 = unlimited
//!     data_used BIGINT NOT NULL DEFAULT 0,
//!     ip_limit BIGINT NOT NULL DEFAULT 0   -- 0 = unlimited
//! );
//! ```

mod queries;
mod store;

#[cfg(test)]
mod tests;

pub use store::{DatabaseType, SqlStore, SqlStoreConfig};
