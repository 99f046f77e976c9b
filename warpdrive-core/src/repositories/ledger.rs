//! Persistence of ledgers, statistics and lockout logs.
//!
//! Each ledger is stored as one or two named options. Timestamps are written
//! as unix seconds. A stored value that no longer decodes is treated as empty
//! so a corrupt option cannot wedge the throttle.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
    Error,
    client::ClientKey,
    config::{CONFIG_OPTION, LoginLimitConfig},
    ledger::{CounterLedger, LockoutLedger},
    notify::{LockoutKind, LockoutLog},
    statistics::Statistics,
    storage::{OptionStore, OptionStoreExt},
};

pub const ATTEMPTS_OPTION: &str = "WarpdriveLLA-attempts";
pub const ATTEMPTS_VALID_OPTION: &str = "WarpdriveLLA-attemptsValid";
pub const LOCKOUTS_OPTION: &str = "WarpdriveLLA-lockouts";
pub const REGISTRATIONS_OPTION: &str = "WarpdriveLLA-registrations";
pub const REGISTRATIONS_VALID_OPTION: &str = "WarpdriveLLA-registrationsValid";
pub const STATISTICS_OPTION: &str = "WarpdriveLLA-statistics";
pub const LOCKOUT_LOG_OPTION: &str = "WarpdriveLLA-lockoutLog";
pub const LOCKOUT_LOG_ACCOUNT_OPTION: &str = "WarpdriveLLA-lockoutLog-username";
pub const REGISTRATION_LOG_OPTION: &str = "WarpdriveLLA-lockoutRegistrationLog";
pub const REGISTRATION_LOG_ACCOUNT_OPTION: &str = "WarpdriveLLA-lockoutRegistrationLog-username";
pub const PREVIOUS_COOKIE_OPTION: &str = "WarpdriveLLA-prevCookie";

/// The ledgers an administrator can wipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerKind {
    Attempts,
    Lockouts,
    Registrations,
}

impl LedgerKind {
    /// Options backing this ledger.
    pub fn option_names(&self) -> &'static [&'static str] {
        match self {
            LedgerKind::Attempts => &[ATTEMPTS_OPTION, ATTEMPTS_VALID_OPTION],
            LedgerKind::Lockouts => &[LOCKOUTS_OPTION],
            LedgerKind::Registrations => &[REGISTRATIONS_OPTION, REGISTRATIONS_VALID_OPTION],
        }
    }
}

impl LockoutKind {
    fn log_option_names(&self) -> (&'static str, &'static str) {
        match self {
            LockoutKind::Login => (LOCKOUT_LOG_OPTION, LOCKOUT_LOG_ACCOUNT_OPTION),
            LockoutKind::Registration => (REGISTRATION_LOG_OPTION, REGISTRATION_LOG_ACCOUNT_OPTION),
        }
    }
}

/// Typed access to every throttling option in an [`OptionStore`].
pub struct LedgerRepository<S: OptionStore> {
    store: Arc<S>,
}

impl<S: OptionStore> Clone for LedgerRepository<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: OptionStore> LedgerRepository<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Stored configuration merged with defaults.
    pub async fn load_config(&self) -> Result<LoginLimitConfig, Error> {
        Ok(LoginLimitConfig::from_stored(
            self.store.get(CONFIG_OPTION).await?,
        ))
    }

    pub async fn save_config(&self, config: &LoginLimitConfig) -> Result<(), Error> {
        self.store.save(CONFIG_OPTION, config).await
    }

    pub async fn load_attempts(&self) -> Result<CounterLedger, Error> {
        self.load_counter(ATTEMPTS_OPTION, ATTEMPTS_VALID_OPTION)
            .await
    }

    pub async fn save_attempts(&self, ledger: &CounterLedger) -> Result<(), Error> {
        self.save_counter(ATTEMPTS_OPTION, ATTEMPTS_VALID_OPTION, ledger)
            .await
    }

    pub async fn load_registrations(&self) -> Result<CounterLedger, Error> {
        self.load_counter(REGISTRATIONS_OPTION, REGISTRATIONS_VALID_OPTION)
            .await
    }

    pub async fn save_registrations(&self, ledger: &CounterLedger) -> Result<(), Error> {
        self.save_counter(REGISTRATIONS_OPTION, REGISTRATIONS_VALID_OPTION, ledger)
            .await
    }

    pub async fn load_lockouts(&self) -> Result<LockoutLedger, Error> {
        let stored: BTreeMap<ClientKey, i64> = self.load_lenient(LOCKOUTS_OPTION).await?;
        Ok(LockoutLedger::new(from_timestamps(stored)))
    }

    pub async fn save_lockouts(&self, ledger: &LockoutLedger) -> Result<(), Error> {
        self.store
            .save(LOCKOUTS_OPTION, &to_timestamps(&ledger.locked_until))
            .await
    }

    pub async fn load_statistics(&self) -> Result<Statistics, Error> {
        self.load_lenient(STATISTICS_OPTION).await
    }

    pub async fn save_statistics(&self, statistics: &Statistics) -> Result<(), Error> {
        self.store.save(STATISTICS_OPTION, statistics).await
    }

    pub async fn load_lockout_log(&self, kind: LockoutKind) -> Result<LockoutLog, Error> {
        let (by_address, by_account) = kind.log_option_names();
        Ok(LockoutLog {
            by_address: self.load_lenient(by_address).await?,
            by_account: self.load_lenient(by_account).await?,
        })
    }

    pub async fn save_lockout_log(&self, kind: LockoutKind, log: &LockoutLog) -> Result<(), Error> {
        let (by_address, by_account) = kind.log_option_names();
        self.store.save(by_address, &log.by_address).await?;
        self.store.save(by_account, &log.by_account).await
    }

    /// Last rejected auth cookie per account.
    pub async fn load_previous_cookies(&self) -> Result<BTreeMap<String, String>, Error> {
        self.load_lenient(PREVIOUS_COOKIE_OPTION).await
    }

    pub async fn save_previous_cookies(
        &self,
        cookies: &BTreeMap<String, String>,
    ) -> Result<(), Error> {
        self.store.save(PREVIOUS_COOKIE_OPTION, cookies).await
    }

    /// Replace a ledger with its empty state.
    pub async fn clear(&self, kind: LedgerKind) -> Result<(), Error> {
        for name in kind.option_names() {
            self.store
                .save(name, &BTreeMap::<String, i64>::new())
                .await?;
        }
        tracing::debug!(ledger = ?kind, "Cleared ledger");
        Ok(())
    }

    async fn load_counter(&self, counts: &str, valid: &str) -> Result<CounterLedger, Error> {
        let counts: BTreeMap<ClientKey, u32> = self.load_lenient(counts).await?;
        let valid: BTreeMap<ClientKey, i64> = self.load_lenient(valid).await?;
        Ok(CounterLedger::new(counts, from_timestamps(valid)))
    }

    async fn save_counter(
        &self,
        counts: &str,
        valid: &str,
        ledger: &CounterLedger,
    ) -> Result<(), Error> {
        self.store.save(counts, &ledger.counts).await?;
        self.store
            .save(valid, &to_timestamps(&ledger.valid_until))
            .await
    }

    async fn load_lenient<T>(&self, name: &str) -> Result<T, Error>
    where
        T: DeserializeOwned + Default,
    {
        let Some(value) = self.store.get(name).await? else {
            return Ok(T::default());
        };

        match serde_json::from_value(value) {
            Ok(decoded) => Ok(decoded),
            Err(e) => {
                tracing::warn!(option = name, error = %e, "Discarding undecodable option");
                Ok(T::default())
            }
        }
    }
}

fn from_timestamps(stored: BTreeMap<ClientKey, i64>) -> BTreeMap<ClientKey, DateTime<Utc>> {
    stored
        .into_iter()
        .filter_map(|(key, secs)| DateTime::from_timestamp(secs, 0).map(|at| (key, at)))
        .collect()
}

fn to_timestamps(map: &BTreeMap<ClientKey, DateTime<Utc>>) -> BTreeMap<ClientKey, i64> {
    map.iter()
        .map(|(key, at)| (key.clone(), at.timestamp()))
        .collect()
}
