//! Login and registration throttling service.
//!
//! This module implements the policy engine: per-client failure counting with
//! a validity window, standard and extended lockouts, registration limiting,
//! and opportunistic cleanup of expired ledger entries.
//!
//! # Failure semantics
//!
//! Hook operations (`is_login_permitted`, `record_login_failure`,
//! `record_login_success`, the registration hooks) never return errors. When
//! the option store fails they log a warning and behave as if the client were
//! not locked out, favouring availability over strict throttling.
//!
//! # Example
//!
//! ```rust,ignore
//! use warpdrive_core::services::LoginLimitService;
//!
//! let service = LoginLimitService::new(repository, clock, config);
//!
//! // Before verifying credentials
//! service.authenticate(&client).await?;
//!
//! // After verifying credentials
//! if ok {
//!     service.record_login_success(&client).await;
//! } else {
//!     service.record_login_failure(&client, Some(username)).await;
//! }
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    Error,
    client::ClientKey,
    clock::Clock,
    config::{LoginLimitConfig, NotifyMethods, SharedConfig},
    error::AuthError,
    events::{Event, EventBus},
    ledger::{CounterLedger, LockoutLedger, expiry},
    messages,
    notify::{LockoutKind, NotificationSink, OptionLogSink},
    repositories::LedgerRepository,
    state::{LockoutTier, ThrottleState},
    statistics::StatisticKind,
    storage::OptionStore,
};

/// Registration error code that reveals an account name is taken.
pub const USERNAME_EXISTS_CODE: &str = "username_exists";

/// Result of reporting a failed login.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// The client was already locked out; the failure was not counted
    AlreadyLocked { locked_until: DateTime<Utc> },
    /// The failure was counted
    Recorded {
        state: ThrottleState,
        attempts: u32,
        locked_until: Option<DateTime<Utc>>,
    },
    /// The option store failed; nothing was recorded
    Unrecorded,
}

impl FailureOutcome {
    /// Whether this failure is the one that locked the client out.
    pub fn just_locked_out(&self) -> bool {
        matches!(self, FailureOutcome::Recorded { state, .. } if state.is_locked())
    }

    pub fn state(&self) -> Option<ThrottleState> {
        match self {
            FailureOutcome::Recorded { state, .. } => Some(*state),
            _ => None,
        }
    }

    pub fn locked_until(&self) -> Option<DateTime<Utc>> {
        match self {
            FailureOutcome::AlreadyLocked { locked_until } => Some(*locked_until),
            FailureOutcome::Recorded { locked_until, .. } => *locked_until,
            FailureOutcome::Unrecorded => None,
        }
    }
}

/// Which ledgers a cleanup pass wrote back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupSummary {
    pub lockouts: bool,
    pub attempts: bool,
    pub registrations: bool,
}

impl CleanupSummary {
    pub fn is_noop(&self) -> bool {
        !self.lockouts && !self.attempts && !self.registrations
    }
}

/// Throttle status of a client as shown on the login form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoginStatus {
    pub client: ClientKey,
    pub permitted: bool,
    pub locked_until: Option<DateTime<Utc>>,
    /// Failures counted in the current window
    pub attempts: Option<u32>,
    pub valid_until: Option<DateTime<Utc>>,
    /// Failures left before the next lockout
    pub remaining: Option<u32>,
}

/// Decision on a submitted registration form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationVerdict {
    /// The client has registered too often; show this message instead of any other error
    Rejected { message: String },
    /// The form had no errors and the registration was counted
    Accepted,
    /// The form had errors; these are the codes to report
    Errors(Vec<String>),
}

/// Service implementing login and registration throttling.
///
/// The service owns every mutation of the attempt, lockout and registration
/// ledgers. Time comes from the injected [`Clock`]; configuration is read from
/// a [`SharedConfig`] so admin changes apply to the next call.
pub struct LoginLimitService<S: OptionStore> {
    repository: LedgerRepository<S>,
    clock: Arc<dyn Clock>,
    config: SharedConfig,
    sink: Arc<dyn NotificationSink>,
    events: EventBus,
}

impl<S: OptionStore> LoginLimitService<S> {
    /// Create a service logging lockouts to the option store.
    ///
    /// # Arguments
    ///
    /// * `repository` - Access to the throttling options
    /// * `clock` - Time source for every expiry comparison
    /// * `config` - Configuration shared with the admin surface
    pub fn new(
        repository: LedgerRepository<S>,
        clock: Arc<dyn Clock>,
        config: SharedConfig,
    ) -> Self {
        let sink = Arc::new(OptionLogSink::new(repository.clone()));
        Self {
            repository,
            clock,
            config,
            sink,
            events: EventBus::default(),
        }
    }

    /// Replace the sink lockouts are logged to.
    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Publish throttling events on `events`.
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    /// Snapshot of the current configuration.
    pub async fn config(&self) -> LoginLimitConfig {
        self.config.read().await.clone()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Whether `client` may attempt to log in.
    ///
    /// Returns `false` only while an unexpired lockout exists. Read-only.
    pub async fn is_login_permitted(&self, client: &ClientKey) -> bool {
        let now = self.clock.now();
        match self.repository.load_lockouts().await {
            Ok(lockouts) => !lockouts.is_locked(client, now),
            Err(e) => {
                tracing::warn!(client = %client, error = %e, "Could not read lockouts, permitting login");
                true
            }
        }
    }

    /// Authentication gate, called before credentials are verified.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::TooManyAttempts`] while the client is locked out.
    pub async fn authenticate(&self, client: &ClientKey) -> Result<(), AuthError> {
        let now = self.clock.now();
        let lockouts = match self.repository.load_lockouts().await {
            Ok(lockouts) => lockouts,
            Err(e) => {
                tracing::warn!(client = %client, error = %e, "Could not read lockouts, permitting login");
                return Ok(());
            }
        };

        match lockouts.locked_until(client, now) {
            Some(until) => {
                tracing::debug!(client = %client, locked_until = %until, "Rejecting login from locked out client");
                Err(AuthError::TooManyAttempts {
                    retry_after: Some(until - now),
                })
            }
            None => Ok(()),
        }
    }

    /// Record a failed login.
    ///
    /// Failures from a locked out client are ignored. Otherwise the client's
    /// count grows (or restarts at 1 once its window has closed), the window
    /// is refreshed, and every `allowed_attempts`-th failure locks the client
    /// out. The lockout is extended, and the count cleared, once the count
    /// reaches `allowed_attempts × allowed_lockouts`.
    ///
    /// # Arguments
    ///
    /// * `client` - The client that failed to log in
    /// * `account` - The account name that was tried, if known
    pub async fn record_login_failure(
        &self,
        client: &ClientKey,
        account: Option<&str>,
    ) -> FailureOutcome {
        match self.try_record_login_failure(client, account).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(client = %client, error = %e, "Could not record failed login");
                FailureOutcome::Unrecorded
            }
        }
    }

    async fn try_record_login_failure(
        &self,
        client: &ClientKey,
        account: Option<&str>,
    ) -> Result<FailureOutcome, Error> {
        let config = self.config().await;
        let now = self.clock.now();

        let mut lockouts = self.repository.load_lockouts().await?;
        if let Some(locked_until) = lockouts.locked_until(client, now) {
            tracing::debug!(client = %client, "Ignoring failed login from locked out client");
            return Ok(FailureOutcome::AlreadyLocked { locked_until });
        }

        let mut attempts = self.repository.load_attempts().await?;
        let count = attempts.bump(client, now, config.valid_duration());
        let state =
            ThrottleState::after_failure(count, config.allowed_attempts, config.allowed_lockouts);

        self.events
            .publish(Event::LoginFailed {
                client: client.clone(),
                account: account.map(str::to_string),
                attempts: count,
                timestamp: now,
            })
            .await;

        let Some(tier) = state.tier() else {
            self.sweep(now, Some(attempts), None, None).await?;
            tracing::debug!(client = %client, attempts = count, "Recorded failed login");
            return Ok(FailureOutcome::Recorded {
                state,
                attempts: count,
                locked_until: None,
            });
        };

        let duration = match tier {
            LockoutTier::Standard => config.lockout_duration(),
            LockoutTier::Extended => config.lockout_long_duration(),
        };
        let locked_until = expiry(now, duration);
        lockouts.lock(client, locked_until);
        if state.resets_count() {
            attempts.remove(client);
        }

        self.sweep(now, Some(attempts), Some(lockouts), None).await?;

        tracing::info!(
            client = %client,
            account = account.unwrap_or_default(),
            tier = ?tier,
            attempts = count,
            locked_until = %locked_until,
            "Client locked out"
        );

        let lockout_number = count / config.allowed_attempts.max(1);
        self.notify_lockout(
            LockoutKind::Login,
            config.lockout_notify,
            client,
            account,
            now,
            (lockout_number % config.email_after.max(1) == 0).then_some((lockout_number, count)),
        )
        .await;
        self.increment_statistic(StatisticKind::LockoutTotal).await;

        self.events
            .publish(Event::LockedOut {
                client: client.clone(),
                account: account.map(str::to_string),
                tier,
                locked_until,
                timestamp: now,
            })
            .await;

        Ok(FailureOutcome::Recorded {
            state,
            attempts: count,
            locked_until: Some(locked_until),
        })
    }

    /// Forget the failures of a client that logged in successfully.
    ///
    /// Lockouts are left alone. Does nothing when
    /// `reset_attempts_on_success` is disabled.
    pub async fn record_login_success(&self, client: &ClientKey) {
        if !self.config.read().await.reset_attempts_on_success {
            return;
        }

        let now = self.clock.now();
        let result = async {
            let mut attempts = self.repository.load_attempts().await?;
            if attempts.remove(client) {
                self.sweep(now, Some(attempts), None, None).await?;
                tracing::debug!(client = %client, "Cleared failed logins after successful login");
            }
            Ok::<_, Error>(())
        }
        .await;

        if let Err(e) = result {
            tracing::warn!(client = %client, error = %e, "Could not clear failed logins");
        }
    }

    /// Purge expired entries from every ledger, writing only what changed.
    pub async fn cleanup(&self) -> Result<CleanupSummary, Error> {
        self.sweep(self.clock.now(), None, None, None).await
    }

    /// Purge expired entries and write every ledger back regardless.
    pub async fn cleanup_forced(&self) -> Result<CleanupSummary, Error> {
        let attempts = self.repository.load_attempts().await?;
        let lockouts = self.repository.load_lockouts().await?;
        let registrations = self.repository.load_registrations().await?;
        self.sweep(
            self.clock.now(),
            Some(attempts),
            Some(lockouts),
            Some(registrations),
        )
        .await
    }

    /// Sweep the ledgers. Ledgers passed in were just modified by the caller
    /// and are always written; the others are loaded and written only if the
    /// purge changed them.
    async fn sweep(
        &self,
        now: DateTime<Utc>,
        attempts: Option<CounterLedger>,
        lockouts: Option<LockoutLedger>,
        registrations: Option<CounterLedger>,
    ) -> Result<CleanupSummary, Error> {
        let mut summary = CleanupSummary::default();

        let force = lockouts.is_some();
        let mut lockouts = match lockouts {
            Some(lockouts) => lockouts,
            None => self.repository.load_lockouts().await?,
        };
        if lockouts.purge_expired(now) || force {
            self.repository.save_lockouts(&lockouts).await?;
            summary.lockouts = true;
        }

        let force = attempts.is_some();
        let mut attempts = match attempts {
            Some(attempts) => attempts,
            None => self.repository.load_attempts().await?,
        };
        if attempts.purge_expired(now) || force {
            self.repository.save_attempts(&attempts).await?;
            summary.attempts = true;
        }

        let force = registrations.is_some();
        let mut registrations = match registrations {
            Some(registrations) => registrations,
            None => self.repository.load_registrations().await?,
        };
        if registrations.purge_expired(now) || force {
            self.repository.save_registrations(&registrations).await?;
            summary.registrations = true;
        }

        Ok(summary)
    }

    /// Whether `client` may register a new account.
    pub async fn is_registration_permitted(&self, client: &ClientKey) -> bool {
        let config = self.config().await;
        if !config.limit_register {
            return true;
        }

        let now = self.clock.now();
        match self.repository.load_registrations().await {
            Ok(registrations) => registrations
                .current(client, now)
                .is_none_or(|count| count < config.register_amount),
            Err(e) => {
                tracing::warn!(client = %client, error = %e, "Could not read registrations, permitting registration");
                true
            }
        }
    }

    /// Registration gate, called before an account is created.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::RegistrationLimited`] while the client is over the
    /// registration limit.
    pub async fn authorize_registration(&self, client: &ClientKey) -> Result<(), AuthError> {
        if self.is_registration_permitted(client).await {
            return Ok(());
        }

        let now = self.clock.now();
        let retry_after = self
            .repository
            .load_registrations()
            .await
            .ok()
            .and_then(|registrations| registrations.valid_until(client))
            .map(|until| until - now);
        Err(AuthError::RegistrationLimited { retry_after })
    }

    /// Count a registration by `client`.
    ///
    /// Returns the client's registration count in the current window, or
    /// `None` when registration limiting is off or the store failed.
    pub async fn record_registration(
        &self,
        client: &ClientKey,
        account: Option<&str>,
    ) -> Option<u32> {
        let config = self.config().await;
        if !config.limit_register {
            return None;
        }

        match self.try_record_registration(&config, client, account).await {
            Ok(count) => Some(count),
            Err(e) => {
                tracing::warn!(client = %client, error = %e, "Could not record registration");
                None
            }
        }
    }

    async fn try_record_registration(
        &self,
        config: &LoginLimitConfig,
        client: &ClientKey,
        account: Option<&str>,
    ) -> Result<u32, Error> {
        let now = self.clock.now();
        let mut registrations = self.repository.load_registrations().await?;
        let count = registrations.bump(client, now, config.register_duration());
        let valid_until = registrations.valid_until(client).unwrap_or(now);

        self.sweep(now, None, None, Some(registrations)).await?;
        tracing::debug!(client = %client, registrations = count, "Recorded registration");

        if count == config.register_amount {
            tracing::info!(client = %client, registrations = count, "Client reached the registration limit");
            self.increment_statistic(StatisticKind::LockoutRegisterTotal)
                .await;
            self.notify_lockout(
                LockoutKind::Registration,
                config.register_notify,
                client,
                account,
                now,
                Some((1, count)),
            )
            .await;
            self.events
                .publish(Event::RegistrationLimited {
                    client: client.clone(),
                    registrations: count,
                    valid_until,
                    timestamp: now,
                })
                .await;
        }

        Ok(count)
    }

    /// Decide on a submitted registration form.
    ///
    /// A limited client is rejected outright. A form without errors is
    /// counted as a registration. When the form has several errors the
    /// `username_exists` code is dropped so the form cannot be used to probe
    /// account names.
    ///
    /// # Arguments
    ///
    /// * `client` - The registering client
    /// * `account` - The requested account name
    /// * `error_codes` - Validation error codes the host produced for the form
    pub async fn check_registration(
        &self,
        client: &ClientKey,
        account: Option<&str>,
        error_codes: Vec<String>,
    ) -> RegistrationVerdict {
        if !self.is_registration_permitted(client).await {
            return RegistrationVerdict::Rejected {
                message: self.registration_message(client).await,
            };
        }

        if error_codes.is_empty() {
            self.record_registration(client, account).await;
            return RegistrationVerdict::Accepted;
        }

        if error_codes.len() == 1 {
            return RegistrationVerdict::Errors(error_codes);
        }

        RegistrationVerdict::Errors(
            error_codes
                .into_iter()
                .filter(|code| code != USERNAME_EXISTS_CODE)
                .collect(),
        )
    }

    /// Current throttle status of `client`.
    pub async fn login_status(&self, client: &ClientKey) -> LoginStatus {
        let config = self.config().await;
        let now = self.clock.now();

        let lockouts = self.repository.load_lockouts().await;
        let attempts = self.repository.load_attempts().await;
        let (lockouts, attempts) = match (lockouts, attempts) {
            (Ok(lockouts), Ok(attempts)) => (lockouts, attempts),
            (Err(e), _) | (_, Err(e)) => {
                tracing::warn!(client = %client, error = %e, "Could not read login status");
                (LockoutLedger::default(), CounterLedger::default())
            }
        };

        let locked_until = lockouts.locked_until(client, now);
        let count = attempts.current(client, now);
        let remaining = count.and_then(|count| {
            ThrottleState::after_failure(count, config.allowed_attempts, config.allowed_lockouts)
                .remaining(config.allowed_attempts)
        });

        LoginStatus {
            client: client.clone(),
            permitted: locked_until.is_none(),
            locked_until,
            attempts: count,
            valid_until: count.and(attempts.valid_until(client)),
            remaining,
        }
    }

    /// Message for the login form: the lockout notice while locked out,
    /// otherwise the number of attempts left, if any were used.
    pub async fn login_message(&self, client: &ClientKey) -> Option<String> {
        let status = self.login_status(client).await;
        if !status.permitted {
            return Some(messages::login_lockout_message(
                status.locked_until,
                self.clock.now(),
            ));
        }
        status.remaining.map(messages::remaining_attempts_message)
    }

    /// Rewrite the errors shown after a failed login.
    ///
    /// While locked out only the lockout notice is shown, unless this very
    /// attempt caused the lockout. When both credentials were supplied,
    /// errors naming which one was wrong are replaced by a generic message.
    ///
    /// # Arguments
    ///
    /// * `client` - The client that tried to log in
    /// * `errors` - Error messages the host produced
    /// * `credentials_supplied` - Whether both username and password were non-empty
    /// * `just_locked_out` - Whether this attempt caused the lockout
    pub async fn filter_login_errors(
        &self,
        client: &ClientKey,
        errors: Vec<String>,
        credentials_supplied: bool,
        just_locked_out: bool,
    ) -> Vec<String> {
        let status_message = self.login_message(client).await;

        if !just_locked_out && !self.is_login_permitted(client).await {
            return status_message.into_iter().collect();
        }

        if credentials_supplied && !errors.is_empty() {
            let mut filtered = vec![messages::INCORRECT_CREDENTIALS.to_string()];
            filtered.extend(status_message);
            return filtered;
        }

        errors
    }

    /// Registration lockout notice for `client`.
    pub async fn registration_message(&self, client: &ClientKey) -> String {
        let now = self.clock.now();
        let until = match self.repository.load_registrations().await {
            Ok(registrations) => registrations.valid_until(client),
            Err(e) => {
                tracing::warn!(client = %client, error = %e, "Could not read registrations");
                None
            }
        };
        messages::registration_lockout_message(until, now)
    }

    /// Report a lockout on the configured channels.
    ///
    /// `alert` carries the lockout number and failure count when the lockout
    /// should also be raised as an e-mail alert.
    async fn notify_lockout(
        &self,
        kind: LockoutKind,
        methods: NotifyMethods,
        client: &ClientKey,
        account: Option<&str>,
        now: DateTime<Utc>,
        alert: Option<(u32, u32)>,
    ) {
        if methods.log {
            if let Err(e) = self.sink.record_lockout(kind, client, account, now).await {
                tracing::warn!(client = %client, error = %e, "Could not log lockout");
            }
        }

        if let Some((lockouts, attempts)) = alert.filter(|_| methods.email) {
            self.events
                .publish(Event::LockoutAlert {
                    kind,
                    client: client.clone(),
                    account: account.map(str::to_string),
                    lockouts,
                    attempts,
                    timestamp: now,
                })
                .await;
        }
    }

    async fn increment_statistic(&self, kind: StatisticKind) {
        let result = async {
            let mut statistics = self.repository.load_statistics().await?;
            statistics.increment(kind);
            self.repository.save_statistics(&statistics).await
        }
        .await;

        if let Err(e) = result {
            tracing::warn!(statistic = ?kind, error = %e, "Could not update statistic");
        }
    }
}
