pub mod utilities;

use chrono::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Event error: {0}")]
    Event(#[from] EventError),
}

#[derive(Debug, Error)]
pub enum AuthError {
    /// Rejection issued by the authentication gate while a client is locked out.
    ///
    /// Deliberately says nothing about which part of the credentials was wrong.
    #[error("Too many failed login attempts")]
    TooManyAttempts {
        /// Time left until the lockout expires
        retry_after: Option<Duration>,
    },

    #[error("Too many new user registrations")]
    RegistrationLimited {
        /// Time left until the registration window expires
        retry_after: Option<Duration>,
    },

    #[error("Invalid username or e-mail")]
    PasswordResetDenied,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Unknown option: {0}")]
    UnknownOption(String),

    #[error("Invalid option value for {name}: {reason}")]
    InvalidOption { name: String, reason: String },

    #[error("Invalid field: {0}")]
    InvalidField(String),
}

#[derive(Debug, Error)]
pub enum EventError {
    #[error("Event bus error: {0}")]
    BusError(String),

    #[error("Event handler error: {0}")]
    HandlerError(String),
}

impl Error {
    pub fn is_rate_limited(&self) -> bool {
        matches!(
            self,
            Error::Auth(AuthError::TooManyAttempts { .. })
                | Error::Auth(AuthError::RegistrationLimited { .. })
        )
    }

    pub fn is_validation_error(&self) -> bool {
        matches!(self, Error::Validation(_))
    }

    pub fn is_storage_error(&self) -> bool {
        matches!(self, Error::Storage(_))
    }
}

impl AuthError {
    /// Seconds until the client may retry, rounded up.
    pub fn retry_after_seconds(&self) -> Option<i64> {
        let retry_after = match self {
            AuthError::TooManyAttempts { retry_after }
            | AuthError::RegistrationLimited { retry_after } => retry_after.as_ref()?,
            AuthError::PasswordResetDenied => return None,
        };
        let millis = retry_after.num_milliseconds().max(0);
        Some((millis + 999) / 1000)
    }
}
