//! Auth cookie handling while throttling is active.
//!
//! A request carrying an auth cookie is treated like a login attempt: while
//! the client is locked out the cookie must be cleared, and a cookie that
//! fails validation counts as a failed login. Browsers resend the same bad
//! cookie on every request, so an identical rejected cookie is only counted
//! once per account.

use std::sync::Arc;

use crate::{
    client::ClientKey,
    repositories::LedgerRepository,
    services::login_limit::{FailureOutcome, LoginLimitService},
    storage::OptionStore,
};

pub struct CookieService<S: OptionStore> {
    limits: Arc<LoginLimitService<S>>,
    repository: LedgerRepository<S>,
}

impl<S: OptionStore> CookieService<S> {
    pub fn new(limits: Arc<LoginLimitService<S>>, repository: LedgerRepository<S>) -> Self {
        Self { limits, repository }
    }

    /// Whether the host must drop the auth cookie of this request.
    pub async fn should_clear_auth_cookie(&self, client: &ClientKey) -> bool {
        !self.limits.is_login_permitted(client).await
    }

    /// A cookie that could not even be parsed. Always counted.
    pub async fn record_malformed_cookie(
        &self,
        client: &ClientKey,
        account: &str,
    ) -> FailureOutcome {
        self.limits.record_login_failure(client, Some(account)).await
    }

    /// A cookie whose hash did not validate.
    ///
    /// Returns `None` when the same cookie was already rejected for this
    /// account and the failure was not counted again.
    ///
    /// # Arguments
    ///
    /// * `client` - The client presenting the cookie
    /// * `account` - The account named in the cookie
    /// * `fingerprint` - Stable representation of the cookie contents
    pub async fn record_bad_cookie(
        &self,
        client: &ClientKey,
        account: &str,
        fingerprint: &str,
    ) -> Option<FailureOutcome> {
        match self.repository.load_previous_cookies().await {
            Ok(mut previous) => {
                if previous.get(account).is_some_and(|stored| stored == fingerprint) {
                    tracing::debug!(client = %client, account, "Ignoring repeated bad auth cookie");
                    return None;
                }

                previous.insert(account.to_string(), fingerprint.to_string());
                if let Err(e) = self.repository.save_previous_cookies(&previous).await {
                    tracing::warn!(account, error = %e, "Could not remember rejected auth cookie");
                }
            }
            Err(e) => {
                tracing::warn!(account, error = %e, "Could not read rejected auth cookies");
            }
        }

        Some(self.limits.record_login_failure(client, Some(account)).await)
    }

    /// A cookie that validated. Forgets the last rejected cookie of the
    /// account; failed attempts of the client are kept.
    pub async fn record_valid_cookie(&self, account: &str) {
        let result = async {
            let mut previous = self.repository.load_previous_cookies().await?;
            if previous.remove(account).is_some() {
                self.repository.save_previous_cookies(&previous).await?;
            }
            Ok::<_, crate::Error>(())
        }
        .await;

        if let Err(e) = result {
            tracing::warn!(account, error = %e, "Could not clear rejected auth cookie");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::ManualClock, config::LoginLimitConfig, state::ThrottleState,
        storage::MemoryOptionStore,
    };
    use tokio::sync::RwLock;

    fn cookie_service(
        config: LoginLimitConfig,
    ) -> (
        CookieService<MemoryOptionStore>,
        LedgerRepository<MemoryOptionStore>,
    ) {
        let repository = LedgerRepository::new(Arc::new(MemoryOptionStore::new()));
        let limits = Arc::new(LoginLimitService::new(
            repository.clone(),
            Arc::new(ManualClock::at_timestamp(0)),
            Arc::new(RwLock::new(config)),
        ));
        (CookieService::new(limits, repository.clone()), repository)
    }

    fn client() -> ClientKey {
        ClientKey::new("203.0.113.5")
    }

    #[tokio::test]
    async fn test_repeated_bad_cookie_counts_once() {
        let (cookies, repository) = cookie_service(LoginLimitConfig::default());

        let first = cookies.record_bad_cookie(&client(), "admin", "admin|1|abc").await;
        assert_eq!(first.and_then(|o| o.state()), Some(ThrottleState::Warned(1)));

        assert!(cookies
            .record_bad_cookie(&client(), "admin", "admin|1|abc")
            .await
            .is_none());

        let next = cookies.record_bad_cookie(&client(), "admin", "admin|1|def").await;
        assert_eq!(next.and_then(|o| o.state()), Some(ThrottleState::Warned(2)));

        let stored = repository.load_previous_cookies().await.unwrap();
        assert_eq!(stored["admin"], "admin|1|def");
    }

    #[tokio::test]
    async fn test_valid_cookie_forgets_previous_but_keeps_attempts() {
        let (cookies, repository) = cookie_service(LoginLimitConfig::default());

        cookies.record_bad_cookie(&client(), "admin", "admin|1|abc").await;
        cookies.record_valid_cookie("admin").await;
        assert!(repository.load_previous_cookies().await.unwrap().is_empty());

        let again = cookies.record_bad_cookie(&client(), "admin", "admin|1|abc").await;
        assert_eq!(again.and_then(|o| o.state()), Some(ThrottleState::Warned(2)));
    }

    #[tokio::test]
    async fn test_cookie_cleared_while_locked_out() {
        let config = LoginLimitConfig {
            allowed_attempts: 1,
            ..Default::default()
        };
        let (cookies, _) = cookie_service(config);

        assert!(!cookies.should_clear_auth_cookie(&client()).await);
        let outcome = cookies.record_malformed_cookie(&client(), "admin").await;
        assert!(outcome.just_locked_out());
        assert!(cookies.should_clear_auth_cookie(&client()).await);
    }
}
