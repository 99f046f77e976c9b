//! SQLite option store for warpdrive
//!
//! Options are kept in a single `warpdrive_options` table keyed by scope and
//! name, with the value stored as JSON text. One database can therefore hold
//! the site options and the network options side by side.
//!
//! ```rust,ignore
//! use warpdrive_storage_sqlite::SqliteOptionStore;
//!
//! let store = SqliteOptionStore::connect("sqlite://warpdrive.db?mode=rwc").await?;
//! store.run_migrations().await?;
//! ```
pub mod migrations;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use warpdrive_core::{
    Error, OptionScope, OptionStore,
    error::{
        StorageError,
        utilities::{DatabaseResultExt, SerializationResultExt},
    },
};

use crate::migrations::Migrator;

#[derive(Debug, Clone)]
pub struct SqliteOptionStore {
    pool: SqlitePool,
    scope: OptionScope,
}

impl SqliteOptionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            scope: OptionScope::Site,
        }
    }

    /// Same database, different option scope.
    pub fn with_scope(mut self, scope: OptionScope) -> Self {
        self.scope = scope;
        self
    }

    /// Open a pool for `database_url`.
    pub async fn connect(database_url: &str) -> Result<Self, Error> {
        let pool = SqlitePoolOptions::new()
            .connect(database_url)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to connect to SQLite");
                Error::Storage(StorageError::Connection(e.to_string()))
            })?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Bring the schema up to date. Returns the number of migrations applied.
    pub async fn run_migrations(&self) -> Result<usize, Error> {
        Migrator::new(self.pool.clone()).up().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to run migrations");
            Error::Storage(StorageError::Migration(
                "Failed to run migrations".to_string(),
            ))
        })
    }
}

#[async_trait]
impl OptionStore for SqliteOptionStore {
    fn scope(&self) -> OptionScope {
        self.scope
    }

    async fn get(&self, name: &str) -> Result<Option<Value>, Error> {
        let raw: Option<String> =
            sqlx::query_scalar("SELECT value FROM warpdrive_options WHERE scope = ? AND name = ?")
                .bind(self.scope.as_str())
                .bind(name)
                .fetch_optional(&self.pool)
                .await
                .map_db_err_with_context("Failed to read option")?;

        raw.map(|raw| serde_json::from_str(&raw).map_option_err(name))
            .transpose()
    }

    async fn add(&self, name: &str, value: Value) -> Result<bool, Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO warpdrive_options (scope, name, value, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (scope, name) DO NOTHING
            "#,
        )
        .bind(self.scope.as_str())
        .bind(name)
        .bind(value.to_string())
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_db_err_with_context("Failed to add option")?;

        Ok(result.rows_affected() == 1)
    }

    async fn update(&self, name: &str, value: Value) -> Result<bool, Error> {
        let result = sqlx::query(
            "UPDATE warpdrive_options SET value = ?, updated_at = ? WHERE scope = ? AND name = ?",
        )
        .bind(value.to_string())
        .bind(Utc::now().timestamp())
        .bind(self.scope.as_str())
        .bind(name)
        .execute(&self.pool)
        .await
        .map_db_err_with_context("Failed to update option")?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, name: &str) -> Result<bool, Error> {
        let result = sqlx::query("DELETE FROM warpdrive_options WHERE scope = ? AND name = ?")
            .bind(self.scope.as_str())
            .bind(name)
            .execute(&self.pool)
            .await
            .map_db_err()?;

        Ok(result.rows_affected() > 0)
    }

    async fn migrate(&self) -> Result<(), Error> {
        let applied = self.run_migrations().await?;
        tracing::debug!(applied, "SQLite option store is up to date");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;
    use serde_json::json;
    use tokio::sync::RwLock;
    use warpdrive_core::{
        ClientKey, LedgerRepository, LoginLimitConfig, LoginLimitService, ManualClock,
        OptionStoreExt, ThrottleState,
    };

    use super::*;

    async fn setup_sqlite_store() -> Result<SqliteOptionStore, Error> {
        let _ = tracing_subscriber::fmt::try_init();
        // A single connection keeps every query on the same in-memory database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_db_err()?;
        let store = SqliteOptionStore::new(pool);
        store.migrate().await?;
        Ok(store)
    }

    #[tokio::test]
    async fn test_option_lifecycle() {
        let store = setup_sqlite_store().await.unwrap();

        assert_eq!(store.get("limit_login_retries").await.unwrap(), None);
        assert!(store.add("limit_login_retries", json!({"1.2.3.4": 2})).await.unwrap());
        assert!(!store.add("limit_login_retries", json!({})).await.unwrap());
        assert_eq!(
            store.get("limit_login_retries").await.unwrap(),
            Some(json!({"1.2.3.4": 2}))
        );

        assert!(store.update("limit_login_retries", json!({})).await.unwrap());
        assert_eq!(store.get("limit_login_retries").await.unwrap(), Some(json!({})));

        assert!(store.delete("limit_login_retries").await.unwrap());
        assert!(!store.delete("limit_login_retries").await.unwrap());
        assert!(!store.update("limit_login_retries", json!({})).await.unwrap());
    }

    #[tokio::test]
    async fn test_scopes_are_isolated() {
        let site = setup_sqlite_store().await.unwrap();
        let network = site.clone().with_scope(OptionScope::Network);

        site.save("limit_login_lockouts_total", &3u64).await.unwrap();
        network.save("limit_login_lockouts_total", &7u64).await.unwrap();

        assert_eq!(site.get_or("limit_login_lockouts_total", 0u64).await.unwrap(), 3);
        assert_eq!(network.get_or("limit_login_lockouts_total", 0u64).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_corrupt_value_is_a_serialization_error() {
        let store = setup_sqlite_store().await.unwrap();
        sqlx::query("INSERT INTO warpdrive_options (scope, name, value) VALUES ('site', 'broken', '{oops')")
            .execute(store.pool())
            .await
            .unwrap();

        let result = store.get("broken").await;
        assert!(matches!(
            result,
            Err(Error::Storage(StorageError::Serialization(_)))
        ));
    }

    #[tokio::test]
    async fn test_migrate_twice() {
        let store = setup_sqlite_store().await.unwrap();
        assert_eq!(store.run_migrations().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_lockout_persists_in_sqlite() {
        let store = Arc::new(setup_sqlite_store().await.unwrap());
        let clock = Arc::new(ManualClock::at_timestamp(1_000));
        let config = LoginLimitConfig {
            allowed_attempts: 2,
            ..Default::default()
        };
        let service = LoginLimitService::new(
            LedgerRepository::new(store.clone()),
            clock.clone(),
            Arc::new(RwLock::new(config)),
        );
        let client = ClientKey::new("198.51.100.7");

        service.record_login_failure(&client, Some("admin")).await;
        let outcome = service.record_login_failure(&client, Some("admin")).await;
        assert!(outcome.just_locked_out());
        assert!(!service.is_login_permitted(&client).await);

        // A fresh service over the same database sees the lockout.
        let reopened = LoginLimitService::new(
            LedgerRepository::new(store),
            clock.clone(),
            Arc::new(RwLock::new(LoginLimitConfig::default())),
        );
        assert!(!reopened.is_login_permitted(&client).await);

        clock.advance(Duration::seconds(1_200));
        assert!(reopened.is_login_permitted(&client).await);
        assert_eq!(
            reopened.record_login_failure(&client, None).await.state(),
            Some(ThrottleState::Warned(3))
        );
    }
}
