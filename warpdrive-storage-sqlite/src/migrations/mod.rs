//! Schema of the SQLite option store.
//!
//! Each [`Migration`] is a pair of SQL scripts. [`Migrator`] applies them in
//! version order and records what ran in `_warpdrive_migrations`, one
//! transaction per migration.

use sqlx::{Executor, SqlitePool};

const TRACKING_TABLE: &str = "_warpdrive_migrations";

#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: i64,
    pub name: &'static str,
    up: &'static str,
    down: &'static str,
}

/// Every migration of this backend, in version order.
pub const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "create_options_table",
    up: r#"
        CREATE TABLE IF NOT EXISTS warpdrive_options (
            scope TEXT NOT NULL,
            name TEXT NOT NULL,
            value TEXT NOT NULL,
            updated_at INTEGER NOT NULL DEFAULT (unixepoch()),
            PRIMARY KEY (scope, name)
        );"#,
    down: "DROP TABLE IF EXISTS warpdrive_options",
}];

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AppliedMigration {
    pub version: i64,
    pub name: String,
    /// Unix timestamp
    pub applied_at: i64,
}

pub struct Migrator {
    pool: SqlitePool,
}

impl Migrator {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn ensure_tracking_table(&self) -> Result<(), sqlx::Error> {
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {TRACKING_TABLE} (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at INTEGER NOT NULL DEFAULT (unixepoch())
            )"
        ))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Highest applied version, `None` on a fresh database.
    pub async fn current_version(&self) -> Result<Option<i64>, sqlx::Error> {
        self.ensure_tracking_table().await?;
        sqlx::query_scalar(&format!("SELECT MAX(version) FROM {TRACKING_TABLE}"))
            .fetch_one(&self.pool)
            .await
    }

    pub async fn applied(&self) -> Result<Vec<AppliedMigration>, sqlx::Error> {
        self.ensure_tracking_table().await?;
        sqlx::query_as(&format!(
            "SELECT version, name, applied_at FROM {TRACKING_TABLE} ORDER BY version"
        ))
        .fetch_all(&self.pool)
        .await
    }

    /// Apply every migration newer than the current version. Returns how many ran.
    pub async fn up(&self) -> Result<usize, sqlx::Error> {
        let current = self.current_version().await?.unwrap_or(0);

        let mut applied = 0;
        for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
            tracing::info!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );

            let mut tx = self.pool.begin().await?;
            tx.execute(sqlx::raw_sql(migration.up)).await?;
            sqlx::query(&format!(
                "INSERT INTO {TRACKING_TABLE} (version, name) VALUES (?, ?)"
            ))
            .bind(migration.version)
            .bind(migration.name)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;

            applied += 1;
        }
        Ok(applied)
    }

    /// Revert every applied migration, newest first. Returns how many were undone.
    pub async fn down(&self) -> Result<usize, sqlx::Error> {
        let current = self.current_version().await?.unwrap_or(0);

        let mut reverted = 0;
        for migration in MIGRATIONS.iter().rev().filter(|m| m.version <= current) {
            tracing::info!(
                version = migration.version,
                name = migration.name,
                "Reverting migration"
            );

            let mut tx = self.pool.begin().await?;
            tx.execute(sqlx::raw_sql(migration.down)).await?;
            sqlx::query(&format!("DELETE FROM {TRACKING_TABLE} WHERE version = ?"))
                .bind(migration.version)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;

            reverted += 1;
        }
        Ok(reverted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn migrator() -> Migrator {
        // One connection, so every query sees the same in-memory database.
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        Migrator::new(pool)
    }

    #[tokio::test]
    async fn test_up_is_idempotent() {
        let migrator = migrator().await;

        assert_eq!(migrator.current_version().await.unwrap(), None);
        assert_eq!(migrator.up().await.unwrap(), MIGRATIONS.len());
        assert_eq!(migrator.up().await.unwrap(), 0);
        assert_eq!(migrator.current_version().await.unwrap(), Some(1));

        let applied = migrator.applied().await.unwrap();
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].name, "create_options_table");
    }

    #[tokio::test]
    async fn test_down_reverts() {
        let migrator = migrator().await;
        migrator.up().await.unwrap();

        assert_eq!(migrator.down().await.unwrap(), 1);
        assert!(migrator.applied().await.unwrap().is_empty());

        let tables: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'warpdrive_options'",
        )
        .fetch_one(&migrator.pool)
        .await
        .unwrap();
        assert_eq!(tables, 0);
    }
}
