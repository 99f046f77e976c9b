//! User-facing texts shown on the login and registration forms.

use chrono::{DateTime, Utc};

pub const TOO_MANY_ATTEMPTS: &str = "Too many failed login attempts.";
pub const TOO_MANY_REGISTRATIONS: &str = "Too many new user registrations.";
pub const INCORRECT_CREDENTIALS: &str = "Incorrect username or password.";

/// "Please try again in ..." for a lockout ending at `until`.
///
/// Minutes are rounded up; anything over an hour is reported in whole hours,
/// also rounded up. Without an active lockout the wait is unspecified.
pub fn retry_text(until: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    let Some(until) = until.filter(|until| now < *until) else {
        return "Please try again later.".to_string();
    };

    let minutes = div_ceil((until - now).num_seconds(), 60);
    if minutes > 60 {
        let hours = div_ceil(minutes, 60);
        format!("Please try again in {hours} {}.", plural(hours, "hour"))
    } else {
        format!("Please try again in {minutes} {}.", plural(minutes, "minute"))
    }
}

pub fn login_lockout_message(until: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    format!("{TOO_MANY_ATTEMPTS} {}", retry_text(until, now))
}

pub fn registration_lockout_message(until: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    format!("{TOO_MANY_REGISTRATIONS} {}", retry_text(until, now))
}

pub fn remaining_attempts_message(remaining: u32) -> String {
    if remaining == 1 {
        "1 attempt remaining.".to_string()
    } else {
        format!("{remaining} attempts remaining.")
    }
}

fn div_ceil(value: i64, by: i64) -> i64 {
    (value + by - 1).div_euclid(by)
}

fn plural(n: i64, unit: &str) -> String {
    if n == 1 {
        unit.to_string()
    } else {
        format!("{unit}s")
    }
}
