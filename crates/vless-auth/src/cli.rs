//! User management CLI over the SQL store.
//!
//! Usable standalone or as the `users` subcommand of the main binary.
//!
//! ```bash
//! vless-rs users init -d sqlite:users.db
//! vless-rs users add -d sqlite:users.db --expires 30d --data-cap 50GB --ip-limit 2
//! vless-rs users list -d sqlite:users.db
//! vless-rs users update -d sqlite:users.db -u <uuid> --expires 2030-01-01
//! vless-rs users reset-usage -d sqlite:users.db -u <uuid>
//! vless-rs users remove -d sqlite:users.db -u <uuid>
//! ```
//!
//! A running server keeps cached records for up to the configured cache TTL.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tabled::{Table, Tabled};
use time::OffsetDateTime;

use crate::admin::{NewUser, UserAdmin};
use crate::clock::{Clock, SystemClock};
use crate::kv::MemoryKv;
use crate::record::format_expiration;
use crate::sql::{SqlStore, SqlStoreConfig};
use crate::units::{format_bytes, parse_bytes};
use crate::{UserDirectory, UserRecord, UserStore, UserUpdate};

/// Expiry used for `never`; a missing expiry would lock the user out.
const NEVER: (&str, &str) = ("9999-12-31", "23:59:59");

#[derive(Parser, Debug, Clone)]
#[command(name = "vless-users", version, about = "Manage vless tunnel users")]
pub struct UsersArgs {
    /// Database connection URL.
    #[arg(short, long, env = "DATABASE_URL", global = true)]
    pub database: Option<String>,

    #[command(subcommand)]
    pub command: UsersCommands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum UsersCommands {
    /// Create the users table.
    Init,

    /// Add a user.
    Add {
        /// UUID for the user (generated when omitted).
        #[arg(short, long)]
        user_id: Option<String>,

        /// Expiry: `YYYY-MM-DD[ HH:MM:SS]`, `30d`, `6m`, `1y` or `never`.
        #[arg(short, long, default_value = "30d")]
        expires: String,

        /// Data cap (e.g. "50GB", "0" for unlimited).
        #[arg(short = 'c', long, default_value = "0")]
        data_cap: String,

        /// Max concurrent client addresses (0 = unlimited).
        #[arg(short, long, default_value_t = 0)]
        ip_limit: u32,

        #[arg(short, long, default_value = "")]
        note: String,
    },

    /// Remove a user.
    Remove {
        #[arg(short, long)]
        user_id: String,
    },

    /// List users.
    List {
        /// Output format (table, json).
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Update user settings.
    Update {
        #[arg(short, long)]
        user_id: String,

        #[arg(short, long)]
        expires: Option<String>,

        #[arg(short = 'c', long)]
        data_cap: Option<String>,

        #[arg(short, long)]
        ip_limit: Option<u32>,

        #[arg(short, long)]
        note: Option<String>,
    },

    /// Reset a user's usage counter to zero.
    ResetUsage {
        #[arg(short, long)]
        user_id: String,
    },
}

#[derive(Tabled)]
struct UserRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Expires (UTC)")]
    expires: String,
    #[tabled(rename = "Data Cap")]
    data_cap: String,
    #[tabled(rename = "Used")]
    data_used: String,
    #[tabled(rename = "IP Limit")]
    ip_limit: String,
    #[tabled(rename = "Note")]
    note: String,
}

impl From<&UserRecord> for UserRow {
    fn from(u: &UserRecord) -> Self {
        Self {
            id: u.id.clone(),
            expires: match (&u.expiration_date, &u.expiration_time) {
                (Some(d), Some(t)) => format!("{d} {t}"),
                _ => "-".to_string(),
            },
            data_cap: if u.data_cap == 0 {
                "Unlimited".to_string()
            } else {
                format_bytes(u.data_cap)
            },
            data_used: format_bytes(u.data_used),
            ip_limit: if u.ip_limit == 0 {
                "Unlimited".to_string()
            } else {
                u.ip_limit.to_string()
            },
            note: u.note.clone(),
        }
    }
}

/// Run the users CLI.
pub async fn run(args: UsersArgs) -> Result<(), Box<dyn std::error::Error>> {
    let url = args
        .database
        .ok_or("missing --database (or DATABASE_URL)")?;
    let store = Arc::new(SqlStore::connect(SqlStoreConfig::new(url).max_connections(1)).await?);

    if let UsersCommands::Init = args.command {
        store.init_schema().await?;
        println!("Database schema initialized.");
        return Ok(());
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store: Arc<dyn UserStore> = store;
    let directory = Arc::new(UserDirectory::new(
        store.clone(),
        Arc::new(MemoryKv::new()),
        Duration::from_secs(60),
    ));
    let admin = UserAdmin::new(store, directory, clock.clone());

    match args.command {
        UsersCommands::Init => {}
        UsersCommands::Add {
            user_id,
            expires,
            data_cap,
            ip_limit,
            note,
        } => {
            let (date, time) = parse_expires(&expires, clock.now())?;
            let user = admin
                .create_user(NewUser {
                    id: user_id,
                    expiration_date: Some(date),
                    expiration_time: Some(time),
                    note,
                    data_cap: parse_bytes(&data_cap)?,
                    ip_limit,
                })
                .await?;
            println!("User added.");
            println!("{}", Table::new([UserRow::from(&user)]));
        }
        UsersCommands::Remove { user_id } => {
            admin.delete_user(&user_id).await?;
            println!("User removed.");
        }
        UsersCommands::List { format } => {
            let users = admin.list_users().await?;
            match format.as_str() {
                "json" => println!("{}", serde_json::to_string_pretty(&users)?),
                _ if users.is_empty() => println!("No users found."),
                _ => println!("{}", Table::new(users.iter().map(UserRow::from))),
            }
        }
        UsersCommands::Update {
            user_id,
            expires,
            data_cap,
            ip_limit,
            note,
        } => {
            let mut update = UserUpdate {
                ip_limit,
                note,
                data_cap: data_cap.as_deref().map(parse_bytes).transpose()?,
                ..Default::default()
            };
            if let Some(expires) = expires {
                let (date, time) = parse_expires(&expires, clock.now())?;
                update.expiration_date = Some(date);
                update.expiration_time = Some(time);
            }
            if update.is_empty() {
                println!("No updates specified.");
                return Ok(());
            }
            let user = admin.update_user(&user_id, &update).await?;
            println!("User updated.");
            println!("{}", Table::new([UserRow::from(&user)]));
        }
        UsersCommands::ResetUsage { user_id } => {
            admin.reset_usage(&user_id).await?;
            println!("Usage reset.");
        }
    }
    Ok(())
}

/// Turn an expiry argument into stored `(date, time)` strings.
fn parse_expires(s: &str, now: OffsetDateTime) -> Result<(String, String), String> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("never") {
        return Ok((NEVER.0.to_string(), NEVER.1.to_string()));
    }

    let relative_days = |n: &str, per: i64| -> Result<(String, String), String> {
        let n: i64 = n.parse().map_err(|_| format!("invalid expiration: {s}"))?;
        let at = now
            .checked_add(time::Duration::days(n.saturating_mul(per)))
            .ok_or_else(|| format!("expiration out of range: {s}"))?;
        Ok(format_expiration(at))
    };
    if let Some(n) = s.strip_suffix(['d', 'D']) {
        return relative_days(n, 1);
    }
    if let Some(n) = s.strip_suffix(['m', 'M']) {
        return relative_days(n, 30);
    }
    if let Some(n) = s.strip_suffix(['y', 'Y']) {
        return relative_days(n, 365);
    }

    let (date, time) = match s.split_once([' ', 'T']) {
        Some((d, t)) => (d.to_string(), t.to_string()),
        None => (s.to_string(), "00:00:00".to_string()),
    };
    let check = UserUpdate {
        expiration_date: Some(date.clone()),
        expiration_time: Some(time.clone()),
        ..Default::default()
    };
    check.validate().map_err(|e| e.to_string())?;
    Ok((date, time))
}
