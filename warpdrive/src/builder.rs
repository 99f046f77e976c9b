//! Builder pattern for constructing Warpdrive instances
//!
//! The builder uses a type-state pattern so that a store has to be chosen
//! before [`WarpdriveBuilder::build`] becomes available.
//!
//! # Example
//!
//! ```rust,no_run
//! use warpdrive::WarpdriveBuilder;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Build with SQLite and auto-migration
//!     let warpdrive = WarpdriveBuilder::new()
//!         .with_sqlite("sqlite::memory:")
//!         .await?
//!         .apply_migrations(true)
//!         .build()
//!         .await?;
//!
//!     // Or build without auto-migration and run manually
//!     let warpdrive = WarpdriveBuilder::new()
//!         .with_sqlite("sqlite::memory:")
//!         .await?
//!         .build()
//!         .await?;
//!     warpdrive.migrate().await?;
//!
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use warpdrive_core::{
    Clock, EventBus, EventHandler, LedgerRepository, LoginLimitConfig, NotificationSink,
    OptionStore, SystemClock,
};

use crate::Warpdrive;

/// Errors that can occur when building a Warpdrive instance.
#[derive(Debug, thiserror::Error)]
pub enum WarpdriveBuilderError {
    /// Failed to connect to storage backend
    #[error("Storage connection failed: {0}")]
    StorageConnection(String),

    /// Failed to run database migrations
    #[error("Migration failed: {0}")]
    Migration(String),

    /// Failed to read or write the stored configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

/// Marker type indicating no store has been configured yet.
pub struct NoStorage;

/// Marker type indicating a store has been configured.
pub struct WithStorage<S: OptionStore> {
    store: Arc<S>,
}

/// A type-safe builder for constructing [`Warpdrive`] instances.
///
/// # Defaults
///
/// - Clock: [`SystemClock`]
/// - Configuration: whatever the store holds, defaults otherwise
/// - Lockout log: written to the store
/// - Apply migrations: false
pub struct WarpdriveBuilder<Storage> {
    storage: Storage,
    clock: Arc<dyn Clock>,
    config: Option<LoginLimitConfig>,
    handlers: Vec<Arc<dyn EventHandler>>,
    sink: Option<Arc<dyn NotificationSink>>,
    apply_migrations: bool,
}

impl Default for WarpdriveBuilder<NoStorage> {
    fn default() -> Self {
        Self::new()
    }
}

impl WarpdriveBuilder<NoStorage> {
    pub fn new() -> Self {
        Self {
            storage: NoStorage,
            clock: Arc::new(SystemClock),
            config: None,
            handlers: Vec::new(),
            sink: None,
            apply_migrations: false,
        }
    }

    /// Use an option store the host already has.
    pub fn with_store<S: OptionStore>(self, store: Arc<S>) -> WarpdriveBuilder<WithStorage<S>> {
        WarpdriveBuilder {
            storage: WithStorage { store },
            clock: self.clock,
            config: self.config,
            handlers: self.handlers,
            sink: self.sink,
            apply_migrations: self.apply_migrations,
        }
    }
}

#[cfg(feature = "sqlite")]
impl WarpdriveBuilder<NoStorage> {
    /// Configure SQLite storage by connecting to the given URL.
    ///
    /// # Arguments
    ///
    /// * `url` - SQLite connection URL (e.g., "sqlite::memory:" or "sqlite://path/to/db.sqlite")
    pub async fn with_sqlite(
        self,
        url: &str,
    ) -> Result<WarpdriveBuilder<WithStorage<crate::sqlite::SqliteOptionStore>>, WarpdriveBuilderError>
    {
        let store = crate::sqlite::SqliteOptionStore::connect(url)
            .await
            .map_err(|e| WarpdriveBuilderError::StorageConnection(e.to_string()))?;

        Ok(self.with_store(Arc::new(store)))
    }

    /// Configure SQLite storage with an existing connection pool.
    pub fn with_sqlite_pool(
        self,
        pool: sqlx::SqlitePool,
    ) -> WarpdriveBuilder<WithStorage<crate::sqlite::SqliteOptionStore>> {
        self.with_store(Arc::new(crate::sqlite::SqliteOptionStore::new(pool)))
    }
}

impl<S: OptionStore> WarpdriveBuilder<WithStorage<S>> {
    /// Replace the time source, mostly useful with a `ManualClock` in tests.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Start with this configuration instead of the stored one.
    ///
    /// The configuration is sanitized and written to the store on build.
    pub fn with_config(mut self, config: LoginLimitConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Register a handler for throttling events.
    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Send lockout notifications somewhere other than the store's lockout log.
    pub fn with_notification_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Set whether to automatically apply database migrations during build.
    ///
    /// Default: false
    pub fn apply_migrations(mut self, apply: bool) -> Self {
        self.apply_migrations = apply;
        self
    }

    /// Build the Warpdrive instance.
    ///
    /// Migrations run first when requested, then the configuration is read
    /// from (or written to) the store.
    pub async fn build(self) -> Result<Warpdrive<S>, WarpdriveBuilderError> {
        let store = self.storage.store;

        if self.apply_migrations {
            store
                .migrate()
                .await
                .map_err(|e| WarpdriveBuilderError::Migration(e.to_string()))?;
        }

        let repository = LedgerRepository::new(store.clone());
        let config = match self.config {
            Some(mut config) => {
                config.sanitize();
                repository
                    .save_config(&config)
                    .await
                    .map_err(|e| WarpdriveBuilderError::InvalidConfiguration(e.to_string()))?;
                config
            }
            None => repository
                .load_config()
                .await
                .map_err(|e| WarpdriveBuilderError::InvalidConfiguration(e.to_string()))?,
        };

        let events = EventBus::new();
        for handler in self.handlers {
            events.register(handler).await;
        }

        tracing::debug!(
            scope = store.scope().as_str(),
            handlers = events.handler_count().await,
            "Built warpdrive"
        );

        Ok(Warpdrive::from_parts(
            store, self.clock, config, events, self.sink,
        ))
    }
}
