use crate::{
    config::{LoginLimitConfig, SharedConfig, UserLevel},
    error::AuthError,
};

/// Service deciding whether a password reset may be requested for an account
///
/// Resets can be switched off for privileged accounts entirely, or only when
/// the reset is requested by account name rather than by e-mail address.
pub struct PasswordResetPolicy {
    config: SharedConfig,
}

impl PasswordResetPolicy {
    pub fn new(config: SharedConfig) -> Self {
        Self { config }
    }

    /// Lowest user level that may not reset its password for this request
    ///
    /// `login` is what the user typed into the reset form; anything without
    /// an `@` is treated as an account name.
    pub fn limit_for(config: &LoginLimitConfig, login: &str) -> Option<UserLevel> {
        let mut limit = config.reset_pwd_disable.then_some(config.reset_pwd_level);

        if config.reset_pwd_by_username_disable && !login.contains('@') {
            let by_username = config.reset_pwd_by_username_level;
            limit = Some(limit.map_or(by_username, |level| level.min(by_username)));
        }

        limit
    }

    /// Check a reset request for an account of level `user_level`
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::PasswordResetDenied`], worded like an unknown
    /// account, when the account is at or above the limit.
    pub async fn check(&self, login: &str, user_level: UserLevel) -> Result<(), AuthError> {
        let config = self.config.read().await;
        match Self::limit_for(&config, login) {
            Some(limit) if user_level >= limit => {
                tracing::info!(level = ?user_level, "Denied password reset for privileged account");
                Err(AuthError::PasswordResetDenied)
            }
            _ => Ok(()),
        }
    }
}
