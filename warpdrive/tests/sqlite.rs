#![cfg(feature = "sqlite")]

use std::sync::Arc;

use sqlx::sqlite::SqlitePoolOptions;
use warpdrive::{
    ClientKey, LoginLimitConfig, OptionScope, SqliteOptionStore, Warpdrive, WarpdriveBuilder,
};

async fn sqlite_store() -> SqliteOptionStore {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let store = SqliteOptionStore::new(pool);
    store.run_migrations().await.unwrap();
    store
}

#[tokio::test]
async fn test_sqlite_lockout() {
    let _ = tracing_subscriber::fmt::try_init();
    let store = Arc::new(sqlite_store().await);
    let warpdrive = WarpdriveBuilder::new()
        .with_store(store.clone())
        .with_config(LoginLimitConfig {
            allowed_attempts: 2,
            ..Default::default()
        })
        .build()
        .await
        .unwrap();

    let client = ClientKey::new("203.0.113.1");
    warpdrive.login_failed(&client, Some("admin")).await;
    warpdrive.login_failed(&client, Some("admin")).await;
    assert!(warpdrive.authenticate(&client).await.is_err());

    // A second instance over the same database shares state and config.
    let other = Warpdrive::new(store).await.unwrap();
    assert_eq!(other.config().await.allowed_attempts, 2);
    assert!(other.authenticate(&client).await.is_err());
    assert_eq!(other.admin().statistics().await.unwrap().lockout_total, 1);
}

#[tokio::test]
async fn test_sqlite_network_scope_is_separate() {
    let site = sqlite_store().await;
    let network = site.clone().with_scope(OptionScope::Network);

    let site = Warpdrive::new(Arc::new(site)).await.unwrap();
    let network = Warpdrive::new(Arc::new(network)).await.unwrap();

    let client = ClientKey::new("198.51.100.200");
    for _ in 0..5 {
        site.login_failed(&client, None).await;
    }

    assert!(site.authenticate(&client).await.is_err());
    assert!(network.authenticate(&client).await.is_ok());
}
