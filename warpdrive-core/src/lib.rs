//! Core functionality for the warpdrive login throttling
//!
//! This crate contains the throttling policy: per-client failure counting,
//! tiered lockouts, registration limiting and the bookkeeping around them.
//!
//! All state lives in a host-provided [`OptionStore`] and every expiry check
//! asks an injected [`Clock`], so the crate holds no global state.
//!
//! See [`LoginLimitService`] for the policy engine and [`LoginLimitAdmin`]
//! for the administrative operations.
//!
pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod ledger;
pub mod messages;
pub mod notify;
pub mod repositories;
pub mod services;
pub mod state;
pub mod statistics;
pub mod storage;

pub use client::ClientKey;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigUpdate, LoginLimitConfig, NotifyMethods, SharedConfig, UserLevel};
pub use error::Error;
pub use events::{Event, EventBus, EventHandler};
pub use notify::{LockoutKind, LockoutLog, NotificationSink, OptionLogSink};
pub use repositories::{LedgerKind, LedgerRepository};
pub use services::{
    CookieService, FailureOutcome, LoginLimitAdmin, LoginLimitService, LoginStatus,
    PasswordResetPolicy, RegistrationVerdict,
};
pub use state::{LockoutTier, ThrottleState};
pub use statistics::{StatisticKind, Statistics};
pub use storage::{MemoryOptionStore, OptionScope, OptionStore, OptionStoreExt};
