//! SQL statements, one variant per placeholder style.

pub const SCHEMA_PG: &str = r#"
CREATE TABLE IF NOT EXISTS vless_users (
    id VARCHAR(36) PRIMARY KEY,
    created_at BIGINT NOT NULL,
    expiration_date VARCHAR(10),
    expiration_time VARCHAR(8),
    note TEXT NOT NULL,
    data_cap BIGINT NOT NULL DEFAULT 0,
    data_used BIGINT NOT NULL DEFAULT 0,
    ip_limit BIGINT NOT NULL DEFAULT 0
)
"#;

pub const SCHEMA_MYSQL: &str = r#"
CREATE TABLE IF NOT EXISTS vless_users (
    id VARCHAR(36) PRIMARY KEY,
    created_at BIGINT NOT NULL,
    expiration_date VARCHAR(10),
    expiration_time VARCHAR(8),
    note TEXT NOT NULL,
    data_cap BIGINT NOT NULL DEFAULT 0,
    data_used BIGINT NOT NULL DEFAULT 0,
    ip_limit BIGINT NOT NULL DEFAULT 0
)
"#;

pub const SCHEMA_SQLITE: &str = r#"
CREATE TABLE IF NOT EXISTS vless_users (
    id TEXT PRIMARY KEY,
    created_at INTEGER NOT NULL,
    expiration_date TEXT,
    expiration_time TEXT,
    note TEXT NOT NULL DEFAULT '',
    data_cap INTEGER NOT NULL DEFAULT 0,
    data_used INTEGER NOT NULL DEFAULT 0,
    ip_limit INTEGER NOT NULL DEFAULT 0
)
"#;

const COLUMNS: &str =
    "id, created_at, expiration_date, expiration_time, note, data_cap, data_used, ip_limit";

pub fn select_one(pg: bool) -> String {
    let p = if pg { "$1" } else { "?" };
    format!("SELECT {COLUMNS} FROM vless_users WHERE id = {p}")
}

pub fn select_all() -> String {
    format!("SELECT {COLUMNS} FROM vless_users ORDER BY created_at, id")
}

pub const INSERT_PG: &str = r#"
INSERT INTO vless_users (id, created_at, expiration_date, expiration_time, note, data_cap, data_used, ip_limit)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
"#;

pub const INSERT_MYSQL: &str = r#"
INSERT INTO vless_users (id, created_at, expiration_date, expiration_time, note, data_cap, data_used, ip_limit)
VALUES (?, ?, ?, ?, ?, ?, ?, ?)
"#;

/// `NULL` parameters keep the current column value.
pub const UPDATE_FIELDS_PG: &str = r#"
UPDATE vless_users SET
    expiration_date = COALESCE($1, expiration_date),
    expiration_time = COALESCE($2, expiration_time),
    note = COALESCE($3, note),
    data_cap = COALESCE($4, data_cap),
    ip_limit = COALESCE($5, ip_limit)
WHERE id = $6
"#;

pub const UPDATE_FIELDS_MYSQL: &str = r#"
UPDATE vless_users SET
    expiration_date = COALESCE(?, expiration_date),
    expiration_time = COALESCE(?, expiration_time),
    note = COALESCE(?, note),
    data_cap = COALESCE(?, data_cap),
    ip_limit = COALESCE(?, ip_limit)
WHERE id = ?
"#;

pub const INCREMENT_USAGE_PG: &str = "UPDATE vless_users SET data_used = data_used + $1 WHERE id = $2";
pub const INCREMENT_USAGE_MYSQL: &str = "UPDATE vless_users SET data_used = data_used + ? WHERE id = ?";

pub const RESET_USAGE_PG: &str = "UPDATE vless_users SET data_used = 0 WHERE id = $1";
pub const RESET_USAGE_MYSQL: &str = "UPDATE vless_users SET data_used = 0 WHERE id = ?";

pub const DELETE_PG: &str = "DELETE FROM vless_users WHERE id = $1";
pub const DELETE_MYSQL: &str = "DELETE FROM vless_users WHERE id = ?";
