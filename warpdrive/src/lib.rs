//! # Warpdrive
//!
//! Login attempt throttling for sites on managed hosting. Warpdrive counts
//! failed logins per client, locks clients out once they fail too often and
//! escalates to a long lockout for repeat offenders. New user registrations
//! are limited per client in the same way.
//!
//! All state is kept as named options in a store you provide, so a single
//! SQLite file (or the host's own option table) is all that is needed.
//!
//! ## Storage Support
//!
//! - In-memory ([`MemoryOptionStore`]), for tests and single-process hosts
//! - SQLite (`sqlite` feature, enabled by default)
//!
//! ## Example
//!
//! ```rust,no_run
//! use warpdrive::{ClientKey, WarpdriveBuilder};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let warpdrive = WarpdriveBuilder::new()
//!         .with_sqlite("sqlite://warpdrive.db?mode=rwc")
//!         .await?
//!         .apply_migrations(true)
//!         .build()
//!         .await?;
//!
//!     let client = ClientKey::from_request(Some("203.0.113.9"), None);
//!     if warpdrive.authenticate(&client).await.is_ok() {
//!         // verify the credentials, then report the result
//!         warpdrive.login_failed(&client, Some("admin")).await;
//!     }
//!
//!     Ok(())
//! }
//! ```
pub mod builder;

use std::sync::Arc;

use tokio::sync::RwLock;
use warpdrive_core::{SharedConfig, error::Error as CoreError};

pub use builder::{NoStorage, WarpdriveBuilder, WarpdriveBuilderError, WithStorage};

/// Re-export core types from warpdrive_core
///
/// These types are commonly used when working with the Warpdrive API.
pub use warpdrive_core::{
    ClientKey, Clock, ConfigUpdate, CookieService, Event, EventBus, EventHandler,
    FailureOutcome, LedgerKind, LedgerRepository, LockoutKind, LockoutLog, LoginLimitAdmin,
    LoginLimitConfig, LoginLimitService, LoginStatus, ManualClock, MemoryOptionStore,
    NotificationSink, NotifyMethods, OptionScope, OptionStore, PasswordResetPolicy,
    RegistrationVerdict, StatisticKind, SystemClock, ThrottleState, UserLevel,
    services::AdminStatistics,
};
pub use warpdrive_core::error::{AuthError, EventError};

/// Re-export storage backends
///
/// These storage implementations are available when the corresponding feature is enabled.
#[cfg(feature = "sqlite")]
pub mod sqlite {
    pub use warpdrive_storage_sqlite::SqliteOptionStore;
}

#[cfg(feature = "sqlite")]
pub use warpdrive_storage_sqlite::SqliteOptionStore;

/// Errors that can occur when using Warpdrive.
#[derive(Debug, thiserror::Error)]
pub enum WarpdriveError {
    /// A request was refused by the throttle
    #[error("Auth error: {0}")]
    AuthError(String),
    /// Error when interacting with storage
    #[error("Storage error: {0}")]
    StorageError(String),
    /// A configuration update was rejected
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl From<CoreError> for WarpdriveError {
    fn from(error: CoreError) -> Self {
        match error {
            CoreError::Auth(e) => WarpdriveError::AuthError(e.to_string()),
            CoreError::Validation(e) => WarpdriveError::ConfigError(e.to_string()),
            CoreError::Storage(e) => WarpdriveError::StorageError(e.to_string()),
            CoreError::Event(e) => WarpdriveError::StorageError(e.to_string()),
        }
    }
}

/// The throttling coordinator for one option store.
///
/// `Warpdrive` wires the policy engine, the admin surface, cookie handling
/// and password reset restrictions to a shared store, clock and
/// configuration. Hosts call the hook methods from their request handlers.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use warpdrive::{ClientKey, MemoryOptionStore, Warpdrive};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let warpdrive = Warpdrive::new(Arc::new(MemoryOptionStore::new())).await?;
///
///     let client = ClientKey::new("198.51.100.4");
///     let outcome = warpdrive.login_failed(&client, Some("editor")).await;
///     println!("{:?}", outcome.state());
///
///     Ok(())
/// }
/// ```
pub struct Warpdrive<S: OptionStore> {
    store: Arc<S>,
    repository: LedgerRepository<S>,
    config: SharedConfig,
    limits: Arc<LoginLimitService<S>>,
    admin: LoginLimitAdmin<S>,
    cookies: CookieService<S>,
    password_reset: PasswordResetPolicy,
    events: EventBus,
}

impl<S: OptionStore> Warpdrive<S> {
    /// Create a Warpdrive instance using the configuration stored in `store`
    /// and the system clock.
    ///
    /// The store must already be migrated.
    pub async fn new(store: Arc<S>) -> Result<Self, WarpdriveError> {
        let config = LedgerRepository::new(store.clone()).load_config().await?;
        Ok(Self::from_parts(
            store,
            Arc::new(SystemClock),
            config,
            EventBus::default(),
            None,
        ))
    }

    pub(crate) fn from_parts(
        store: Arc<S>,
        clock: Arc<dyn Clock>,
        config: LoginLimitConfig,
        events: EventBus,
        sink: Option<Arc<dyn NotificationSink>>,
    ) -> Self {
        let repository = LedgerRepository::new(store.clone());
        let config: SharedConfig = Arc::new(RwLock::new(config));

        let mut limits =
            LoginLimitService::new(repository.clone(), clock.clone(), config.clone())
                .with_events(events.clone());
        if let Some(sink) = sink {
            limits = limits.with_sink(sink);
        }
        let limits = Arc::new(limits);

        Self {
            admin: LoginLimitAdmin::new(repository.clone(), clock, config.clone(), events.clone()),
            cookies: CookieService::new(limits.clone(), repository.clone()),
            password_reset: PasswordResetPolicy::new(config.clone()),
            store,
            repository,
            config,
            limits,
            events,
        }
    }

    /// Run migrations for the option store
    pub async fn migrate(&self) -> Result<(), WarpdriveError> {
        self.store.migrate().await.map_err(Into::into)
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// The policy engine behind the hook methods
    pub fn limits(&self) -> &LoginLimitService<S> {
        &self.limits
    }

    pub fn admin(&self) -> &LoginLimitAdmin<S> {
        &self.admin
    }

    pub fn cookies(&self) -> &CookieService<S> {
        &self.cookies
    }

    pub fn password_reset(&self) -> &PasswordResetPolicy {
        &self.password_reset
    }

    /// Event bus receiving every throttling event
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Snapshot of the active configuration
    pub async fn config(&self) -> LoginLimitConfig {
        self.config.read().await.clone()
    }

    /// Re-read the configuration from the store, replacing the active one.
    ///
    /// Needed when another process changed the stored configuration.
    pub async fn reload_config(&self) -> Result<LoginLimitConfig, WarpdriveError> {
        let config = self.repository.load_config().await?;
        *self.config.write().await = config.clone();
        tracing::debug!("Reloaded throttling configuration");
        Ok(config)
    }

    /// Authentication gate, call before verifying credentials
    ///
    /// # Errors
    ///
    /// [`AuthError::TooManyAttempts`] while the client is locked out.
    pub async fn authenticate(&self, client: &ClientKey) -> Result<(), AuthError> {
        self.limits.authenticate(client).await
    }

    /// Report a failed login of `account` from `client`
    pub async fn login_failed(&self, client: &ClientKey, account: Option<&str>) -> FailureOutcome {
        self.limits.record_login_failure(client, account).await
    }

    /// Report a successful login from `client`
    pub async fn login_succeeded(&self, client: &ClientKey) {
        self.limits.record_login_success(client).await
    }

    /// Login form notice for `client`, if any
    pub async fn login_message(&self, client: &ClientKey) -> Option<String> {
        self.limits.login_message(client).await
    }

    /// Filter a submitted registration form
    ///
    /// # Arguments
    ///
    /// * `client` - The client submitting the form
    /// * `account` - The requested account name
    /// * `error_codes` - Validation errors the host already found
    pub async fn register(
        &self,
        client: &ClientKey,
        account: Option<&str>,
        error_codes: Vec<String>,
    ) -> RegistrationVerdict {
        self.limits
            .check_registration(client, account, error_codes)
            .await
    }

    /// Check whether a password reset may be requested
    pub async fn authorize_password_reset(
        &self,
        login: &str,
        user_level: UserLevel,
    ) -> Result<(), AuthError> {
        self.password_reset.check(login, user_level).await
    }

    /// Purge expired ledger entries
    pub async fn cleanup(&self) -> Result<(), WarpdriveError> {
        let summary = self.limits.cleanup().await?;
        if !summary.is_noop() {
            tracing::debug!(?summary, "Purged expired throttling entries");
        }
        Ok(())
    }
}
