//! Lockout notification sinks.
//!
//! The lockout log keeps, per client address, when it was last locked out,
//! how often, and which account names it tried; and per account name, when
//! and how often it was involved in a lockout.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    Error,
    client::ClientKey,
    repositories::LedgerRepository,
    storage::OptionStore,
};

/// Which throttle produced a lockout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockoutKind {
    Login,
    Registration,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressLogEntry {
    #[serde(with = "chrono::serde::ts_seconds")]
    pub last_lockout: DateTime<Utc>,
    pub lockouts: u64,
    #[serde(default)]
    pub accounts: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountLogEntry {
    #[serde(with = "chrono::serde::ts_seconds")]
    pub last_lockout: DateTime<Utc>,
    pub lockouts: u64,
}

/// Append-only record of lockouts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockoutLog {
    pub by_address: BTreeMap<ClientKey, AddressLogEntry>,
    pub by_account: BTreeMap<String, AccountLogEntry>,
}

impl LockoutLog {
    /// Count one lockout for `client`, attributed to `account` when known.
    pub fn record(&mut self, client: &ClientKey, account: Option<&str>, at: DateTime<Utc>) {
        let entry = self.by_address.entry(client.clone()).or_default();
        entry.last_lockout = at;
        entry.lockouts = entry.lockouts.saturating_add(1);

        let Some(account) = account.filter(|a| !a.is_empty()) else {
            return;
        };

        let tried = entry.accounts.entry(account.to_string()).or_default();
        *tried = tried.saturating_add(1);

        let entry = self.by_account.entry(account.to_string()).or_default();
        entry.last_lockout = at;
        entry.lockouts = entry.lockouts.saturating_add(1);
    }

    pub fn is_empty(&self) -> bool {
        self.by_address.is_empty() && self.by_account.is_empty()
    }
}

/// Receives every lockout the policy applies.
#[async_trait]
pub trait NotificationSink: Send + Sync + 'static {
    async fn record_lockout(
        &self,
        kind: LockoutKind,
        client: &ClientKey,
        account: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<(), Error>;
}

/// Sink that appends to the lockout log options.
pub struct OptionLogSink<S: OptionStore> {
    repository: LedgerRepository<S>,
}

impl<S: OptionStore> OptionLogSink<S> {
    pub fn new(repository: LedgerRepository<S>) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl<S: OptionStore> NotificationSink for OptionLogSink<S> {
    async fn record_lockout(
        &self,
        kind: LockoutKind,
        client: &ClientKey,
        account: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<(), Error> {
        let mut log = self.repository.load_lockout_log(kind).await?;
        log.record(client, account, at);
        self.repository.save_lockout_log(kind, &log).await?;

        tracing::debug!(kind = ?kind, client = %client, "Recorded lockout in log");
        Ok(())
    }
}
