//! Service layer for business logic
//!
//! This module contains the throttling policy engine and the services built
//! on top of it: auth cookie handling, password reset restrictions and the
//! administrative surface.

pub mod admin;
pub mod cookie;
pub mod login_limit;
pub mod password_reset;

pub use admin::{AdminStatistics, LoginLimitAdmin};
pub use cookie::CookieService;
pub use login_limit::{
    CleanupSummary, FailureOutcome, LoginLimitService, LoginStatus, RegistrationVerdict,
};
pub use password_reset::PasswordResetPolicy;
