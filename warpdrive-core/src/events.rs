use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::{
    client::ClientKey, error::EventError, notify::LockoutKind, repositories::LedgerKind,
    state::LockoutTier,
};

/// Which administrative reset produced a [`Event::LedgerReset`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ResetScope {
    /// A whole ledger was emptied
    Ledger(LedgerKind),
    /// One client was unlocked
    Client,
}

/// Represents events that can be emitted by the event bus
///
/// Events notify interested parties about throttling decisions: failed
/// logins, lockouts, registration limits and administrative resets. Every
/// event carries the client key it concerns and when it happened.
#[derive(Debug, Clone)]
pub enum Event {
    /// Emitted for every failed login that was counted.
    LoginFailed {
        client: ClientKey,
        /// Account name that was attempted, if the host supplied one
        account: Option<String>,
        /// Running failure count after this attempt
        attempts: u32,
        timestamp: DateTime<Utc>,
    },

    /// Emitted when a client becomes locked out of logging in.
    LockedOut {
        client: ClientKey,
        account: Option<String>,
        tier: LockoutTier,
        locked_until: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    },

    /// Emitted when a lockout should be mailed to the site administrator.
    ///
    /// Only raised when e-mail notification is enabled and the client's
    /// lockout count is a multiple of the configured `email_after`.
    LockoutAlert {
        kind: LockoutKind,
        client: ClientKey,
        account: Option<String>,
        /// Lockouts in the current counting window, including this one
        lockouts: u32,
        attempts: u32,
        timestamp: DateTime<Utc>,
    },

    /// Emitted when a client reaches the registration limit.
    RegistrationLimited {
        client: ClientKey,
        registrations: u32,
        valid_until: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    },

    /// Emitted after an administrative reset.
    LedgerReset {
        scope: ResetScope,
        client: Option<ClientKey>,
        timestamp: DateTime<Utc>,
    },
}

/// A trait for handling events emitted by the event bus
///
/// Implementors of this trait can be registered with the [`EventBus`] to
/// receive and process events.
///
/// # Examples
///
/// ```
/// # use warpdrive_core::events::{Event, EventHandler};
/// # use warpdrive_core::error::EventError;
/// # use async_trait::async_trait;
/// struct MyHandler;
///
/// #[async_trait]
/// impl EventHandler for MyHandler {
///     async fn handle_event(&self, event: &Event) -> Result<(), EventError> {
///         // Handle the event...
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    async fn handle_event(&self, event: &Event) -> Result<(), EventError>;
}

/// Event bus that can emit events and register event handlers
///
/// # Examples
///
/// ```rust,ignore
/// # use std::sync::Arc;
/// # use warpdrive_core::events::{Event, EventBus, EventHandler};
/// # use warpdrive_core::error::EventError;
/// # use async_trait::async_trait;
/// struct MyHandler;
///
/// #[async_trait]
/// impl EventHandler for MyHandler {
///     async fn handle_event(&self, _event: &Event) -> Result<(), EventError> {
///         Ok(())
///     }
/// }
///
/// let event_bus = EventBus::default();
/// event_bus.register(Arc::new(MyHandler)).await;
/// ```
#[derive(Clone)]
pub struct EventBus {
    handlers: Arc<RwLock<Vec<Arc<dyn EventHandler>>>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Register an event handler with the event bus
    pub async fn register(&self, handler: Arc<dyn EventHandler>) {
        self.handlers.write().await.push(handler);
    }

    /// Emit an event to all registered handlers
    ///
    /// Stops at the first handler that fails and returns its error.
    pub async fn emit(&self, event: &Event) -> Result<(), EventError> {
        for handler in self.handlers.read().await.iter() {
            handler.handle_event(event).await?;
        }

        Ok(())
    }

    /// Emit an event, logging instead of returning handler failures.
    ///
    /// Used on the throttling hot path where a broken listener must not
    /// change the outcome of a login.
    pub async fn publish(&self, event: Event) {
        if let Err(e) = self.emit(&event).await {
            tracing::warn!(error = %e, event = ?event, "Event handler failed");
        }
    }

    pub async fn handler_count(&self) -> usize {
        self.handlers.read().await.len()
    }
}
