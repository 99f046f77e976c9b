//! Administrative operations over the throttling state.
//!
//! Unlike the policy hooks these operations report storage failures to the
//! caller.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::{
    Error,
    client::ClientKey,
    clock::Clock,
    config::{ConfigUpdate, LoginLimitConfig, SharedConfig},
    events::{Event, EventBus, ResetScope},
    notify::{LockoutKind, LockoutLog},
    repositories::{LedgerKind, LedgerRepository},
    statistics::StatisticKind,
    storage::OptionStore,
};

/// Statistics together with the live size of the ledgers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AdminStatistics {
    pub lockout_total: u64,
    pub lockout_register_total: u64,
    /// Clients locked out right now
    pub active_lockouts: usize,
    /// Clients with failures counted in an open window
    pub tracked_clients: usize,
    /// Clients currently over the registration limit
    pub registration_limited: usize,
}

pub struct LoginLimitAdmin<S: OptionStore> {
    repository: LedgerRepository<S>,
    clock: Arc<dyn Clock>,
    config: SharedConfig,
    events: EventBus,
}

impl<S: OptionStore> LoginLimitAdmin<S> {
    pub fn new(
        repository: LedgerRepository<S>,
        clock: Arc<dyn Clock>,
        config: SharedConfig,
        events: EventBus,
    ) -> Self {
        Self {
            repository,
            clock,
            config,
            events,
        }
    }

    pub async fn config(&self) -> LoginLimitConfig {
        self.config.read().await.clone()
    }

    pub async fn statistics(&self) -> Result<AdminStatistics, Error> {
        let now = self.clock.now();
        let config = self.config().await;
        let statistics = self.repository.load_statistics().await?;
        let lockouts = self.repository.load_lockouts().await?;
        let attempts = self.repository.load_attempts().await?;
        let registrations = self.repository.load_registrations().await?;

        let tracked_clients = attempts
            .counts
            .keys()
            .filter(|client| attempts.is_valid(client, now))
            .count();
        let registration_limited = registrations
            .counts
            .keys()
            .filter_map(|client| registrations.current(client, now))
            .filter(|count| *count >= config.register_amount)
            .count();

        Ok(AdminStatistics {
            lockout_total: statistics.lockout_total,
            lockout_register_total: statistics.lockout_register_total,
            active_lockouts: lockouts.active_count(now),
            tracked_clients,
            registration_limited,
        })
    }

    pub async fn lockout_log(&self, kind: LockoutKind) -> Result<LockoutLog, Error> {
        self.repository.load_lockout_log(kind).await
    }

    pub async fn clear_lockout_log(&self, kind: LockoutKind) -> Result<(), Error> {
        self.repository
            .save_lockout_log(kind, &LockoutLog::default())
            .await?;
        tracing::info!(kind = ?kind, "Cleared lockout log");
        Ok(())
    }

    /// Lift every login lockout and zero the lockout statistic.
    ///
    /// Failure counts are kept, so a client whose count sits on a multiple of
    /// `allowed_attempts` is locked out again by its next failure.
    pub async fn reset_lockouts(&self) -> Result<(), Error> {
        self.reset_ledger(LedgerKind::Lockouts).await?;
        self.reset_statistic(StatisticKind::LockoutTotal).await
    }

    /// Forget every registration and zero the registration statistic.
    pub async fn reset_registration_lockouts(&self) -> Result<(), Error> {
        self.reset_ledger(LedgerKind::Registrations).await?;
        self.reset_statistic(StatisticKind::LockoutRegisterTotal)
            .await
    }

    /// Replace one ledger with its empty state.
    pub async fn reset_ledger(&self, kind: LedgerKind) -> Result<(), Error> {
        self.repository.clear(kind).await?;
        tracing::info!(ledger = ?kind, "Reset ledger");

        self.events
            .publish(Event::LedgerReset {
                scope: ResetScope::Ledger(kind),
                client: None,
                timestamp: self.clock.now(),
            })
            .await;
        Ok(())
    }

    pub async fn reset_statistic(&self, kind: StatisticKind) -> Result<(), Error> {
        let mut statistics = self.repository.load_statistics().await?;
        statistics.set(kind, 0);
        self.repository.save_statistics(&statistics).await?;
        tracing::info!(statistic = ?kind, "Reset statistic");
        Ok(())
    }

    /// Lift the lockout of one client. Its failure count is kept.
    ///
    /// Returns whether the client had an active lockout.
    pub async fn unlock(&self, client: &ClientKey) -> Result<bool, Error> {
        let now = self.clock.now();
        let mut lockouts = self.repository.load_lockouts().await?;
        let was_locked = lockouts.is_locked(client, now);

        if lockouts.remove(client) {
            self.repository.save_lockouts(&lockouts).await?;
            tracing::info!(client = %client, "Unlocked client");
            self.events
                .publish(Event::LedgerReset {
                    scope: ResetScope::Client,
                    client: Some(client.clone()),
                    timestamp: now,
                })
                .await;
        }

        Ok(was_locked)
    }

    /// Apply a validated change to the configuration and persist it.
    pub async fn update_config(&self, update: &ConfigUpdate) -> Result<LoginLimitConfig, Error> {
        let mut config = self.config.write().await;
        let next = update.apply_to(&config);
        self.repository.save_config(&next).await?;
        *config = next.clone();

        tracing::info!(update = ?update, "Updated limit login configuration");
        Ok(next)
    }

    /// Apply a change submitted as a JSON object.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::ValidationError::UnknownOption`] for keys that
    /// are not configuration options and
    /// [`crate::error::ValidationError::InvalidOption`] for values of the
    /// wrong type.
    pub async fn update_config_json(&self, update: Value) -> Result<LoginLimitConfig, Error> {
        let update = ConfigUpdate::from_json(update)?;
        self.update_config(&update).await
    }

    pub async fn reset_config_to_defaults(&self) -> Result<LoginLimitConfig, Error> {
        let mut config = self.config.write().await;
        let defaults = LoginLimitConfig::default();
        self.repository.save_config(&defaults).await?;
        *config = defaults.clone();

        tracing::info!("Reset limit login configuration to defaults");
        Ok(defaults)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::ManualClock, error::ValidationError, services::LoginLimitService,
        storage::MemoryOptionStore,
    };
    use chrono::DateTime;
    use serde_json::json;
    use tokio::sync::RwLock;

    struct Harness {
        admin: LoginLimitAdmin<MemoryOptionStore>,
        service: LoginLimitService<MemoryOptionStore>,
        repository: LedgerRepository<MemoryOptionStore>,
        clock: Arc<ManualClock>,
    }

    fn harness(config: LoginLimitConfig) -> Harness {
        let repository = LedgerRepository::new(Arc::new(MemoryOptionStore::new()));
        let clock = Arc::new(ManualClock::at_timestamp(0));
        let config: SharedConfig = Arc::new(RwLock::new(config));
        let events = EventBus::default();

        Harness {
            admin: LoginLimitAdmin::new(
                repository.clone(),
                clock.clone(),
                config.clone(),
                events.clone(),
            ),
            service: LoginLimitService::new(repository.clone(), clock.clone(), config)
                .with_events(events),
            repository,
            clock,
        }
    }

    fn client() -> ClientKey {
        ClientKey::new("203.0.113.5")
    }

    #[tokio::test]
    async fn test_statistics_include_active_counts() {
        let h = harness(LoginLimitConfig {
            allowed_attempts: 1,
            register_amount: 1,
            ..Default::default()
        });

        h.service.record_login_failure(&client(), None).await;
        h.service
            .record_login_failure(&ClientKey::new("198.51.100.1"), None)
            .await;
        h.service.record_registration(&client(), None).await;

        let stats = h.admin.statistics().await.unwrap();
        assert_eq!(stats.lockout_total, 2);
        assert_eq!(stats.lockout_register_total, 1);
        assert_eq!(stats.active_lockouts, 2);
        assert_eq!(stats.tracked_clients, 2);
        assert_eq!(stats.registration_limited, 1);

        h.clock.set(DateTime::from_timestamp(1200, 0).unwrap());
        assert_eq!(h.admin.statistics().await.unwrap().active_lockouts, 0);
    }

    #[tokio::test]
    async fn test_reset_lockouts_keeps_counts() {
        let h = harness(LoginLimitConfig {
            allowed_attempts: 2,
            ..Default::default()
        });

        h.service.record_login_failure(&client(), None).await;
        h.service.record_login_failure(&client(), None).await;
        assert!(!h.service.is_login_permitted(&client()).await);

        h.admin.reset_lockouts().await.unwrap();
        assert!(h.service.is_login_permitted(&client()).await);
        assert_eq!(h.admin.statistics().await.unwrap().lockout_total, 0);

        let attempts = h.repository.load_attempts().await.unwrap();
        assert_eq!(attempts.count(&client()), Some(2));
    }

    #[tokio::test]
    async fn test_unlock_then_next_failure_relocks_on_multiple() {
        let h = harness(LoginLimitConfig {
            allowed_attempts: 3,
            ..Default::default()
        });

        for _ in 0..3 {
            h.service.record_login_failure(&client(), None).await;
        }
        assert!(h.admin.unlock(&client()).await.unwrap());
        assert!(!h.admin.unlock(&client()).await.unwrap());
        assert!(h.service.is_login_permitted(&client()).await);

        // Count continues from 3; the lockout returns at the next multiple
        h.service.record_login_failure(&client(), None).await;
        h.service.record_login_failure(&client(), None).await;
        assert!(h.service.is_login_permitted(&client()).await);
        let outcome = h.service.record_login_failure(&client(), None).await;
        assert!(outcome.just_locked_out());
    }

    #[tokio::test]
    async fn test_reset_registration_lockouts() {
        let h = harness(LoginLimitConfig {
            register_amount: 1,
            ..Default::default()
        });

        h.service.record_registration(&client(), None).await;
        assert!(!h.service.is_registration_permitted(&client()).await);

        h.admin.reset_registration_lockouts().await.unwrap();
        assert!(h.service.is_registration_permitted(&client()).await);
        assert_eq!(
            h.admin.statistics().await.unwrap().lockout_register_total,
            0
        );
    }

    #[tokio::test]
    async fn test_reset_attempts_ledger() {
        let h = harness(LoginLimitConfig::default());
        h.service.record_login_failure(&client(), None).await;

        h.admin.reset_ledger(LedgerKind::Attempts).await.unwrap();
        assert!(h.repository.load_attempts().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_config_applies_to_service() {
        let h = harness(LoginLimitConfig::default());

        let updated = h
            .admin
            .update_config_json(json!({"allowed_attempts": 1, "lockout_duration": 5}))
            .await
            .unwrap();
        assert_eq!(updated.allowed_attempts, 1);
        assert_eq!(updated.lockout_duration, 60);
        assert_eq!(h.repository.load_config().await.unwrap(), updated);

        let outcome = h.service.record_login_failure(&client(), None).await;
        assert!(outcome.just_locked_out());
    }

    #[tokio::test]
    async fn test_update_config_rejects_unknown_and_invalid() {
        let h = harness(LoginLimitConfig::default());

        let err = h
            .admin
            .update_config_json(json!({"allowed_attempts": 2, "colour": "red"}))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::UnknownOption(ref name)) if name == "colour"
        ));

        let err = h
            .admin
            .update_config_json(json!({"allowed_attempts": "many"}))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::InvalidOption { .. })
        ));

        assert_eq!(h.admin.config().await, LoginLimitConfig::default());
    }

    #[tokio::test]
    async fn test_reset_config_to_defaults() {
        let h = harness(LoginLimitConfig {
            allowed_attempts: 9,
            ..Default::default()
        });

        let config = h.admin.reset_config_to_defaults().await.unwrap();
        assert_eq!(config, LoginLimitConfig::default());
        assert_eq!(h.service.config().await.allowed_attempts, 5);
    }

    #[tokio::test]
    async fn test_clear_lockout_log() {
        let h = harness(LoginLimitConfig {
            allowed_attempts: 1,
            ..Default::default()
        });
        h.service.record_login_failure(&client(), Some("admin")).await;
        assert!(!h.admin.lockout_log(LockoutKind::Login).await.unwrap().is_empty());

        h.admin.clear_lockout_log(LockoutKind::Login).await.unwrap();
        assert!(h.admin.lockout_log(LockoutKind::Login).await.unwrap().is_empty());
    }
}
