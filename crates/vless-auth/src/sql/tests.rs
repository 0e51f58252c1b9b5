//! Tests for the SQL user store against in-memory SQLite.

use crate::sql::{DatabaseType, SqlStore, SqlStoreConfig};
use crate::{AuthError, UserRecord, UserStore, UserUpdate};

const ID: &str = "d342d11e-d424-4583-b36e-524ab1f0afa4";

async fn setup() -> SqlStore {
    let store = SqlStore::connect(SqlStoreConfig::new("sqlite::memory:").max_connections(1))
        .await
        .expect("connect");
    store.init_schema().await.expect("schema");
    store
}

fn sample() -> UserRecord {
    UserRecord {
        expiration_date: Some("2030-01-01".into()),
        expiration_time: Some("00:00:00".into()),
        note: "test".into(),
        data_cap: 10 * 1024 * 1024,
        ip_limit: 2,
        ..UserRecord::new(ID, 1_700_000_000)
    }
}

#[test]
fn database_type_detection() {
    assert_eq!(
        DatabaseType::from_url("postgresql://localhost/db"),
        Some(DatabaseType::PostgreSQL)
    );
    assert_eq!(
        DatabaseType::from_url("mariadb://localhost/db"),
        Some(DatabaseType::MySQL)
    );
    assert_eq!(
        DatabaseType::from_url("sqlite::memory:"),
        Some(DatabaseType::SQLite)
    );
    assert_eq!(DatabaseType::from_url("redis://localhost"), None);
}

#[tokio::test]
async fn insert_then_get_round_trips() {
    let store = setup().await;
    store.insert_user(&sample()).await.unwrap();
    assert_eq!(store.get_user(ID).await.unwrap(), Some(sample()));
    assert_eq!(store.list_users().await.unwrap(), vec![sample()]);
}

#[tokio::test]
async fn duplicate_id_is_rejected() {
    let store = setup().await;
    store.insert_user(&sample()).await.unwrap();
    assert!(matches!(
        store.insert_user(&sample()).await,
        Err(AuthError::AlreadyExists(_))
    ));
}

#[tokio::test]
async fn usage_increments_accumulate_and_reset() {
    let store = setup().await;
    store.insert_user(&sample()).await.unwrap();

    store.increment_usage(ID, 1000).await.unwrap();
    store.increment_usage(ID, 24).await.unwrap();
    assert_eq!(store.get_user(ID).await.unwrap().unwrap().data_used, 1024);

    assert!(store.reset_usage(ID).await.unwrap());
    assert_eq!(store.get_user(ID).await.unwrap().unwrap().data_used, 0);

    assert!(matches!(
        store.increment_usage("00000000-0000-0000-0000-000000000000", 1).await,
        Err(AuthError::NotFound)
    ));
}

#[tokio::test]
async fn partial_update_keeps_other_fields() {
    let store = setup().await;
    store.insert_user(&sample()).await.unwrap();

    let update = UserUpdate {
        note: Some("renamed".into()),
        data_cap: Some(0),
        ..Default::default()
    };
    assert!(store.update_user_fields(ID, &update).await.unwrap());

    let got = store.get_user(ID).await.unwrap().unwrap();
    assert_eq!(got.note, "renamed");
    assert_eq!(got.data_cap, 0);
    assert_eq!(got.ip_limit, 2);
    assert_eq!(got.expiration_date.as_deref(), Some("2030-01-01"));
}

#[tokio::test]
async fn delete_reports_missing() {
    let store = setup().await;
    store.insert_user(&sample()).await.unwrap();
    assert!(store.delete_user(ID).await.unwrap());
    assert!(!store.delete_user(ID).await.unwrap());
    assert!(store.get_user(ID).await.unwrap().is_none());
}
