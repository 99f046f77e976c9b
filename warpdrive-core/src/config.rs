//! Configuration for login and registration throttling.
//!
//! The configuration is a flat record persisted as a single option. Loading
//! merges whatever is stored with the defaults below, then clamps values into
//! their sane ranges with [`LoginLimitConfig::sanitize`].

use std::fmt;
use std::sync::Arc;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::ValidationError;

/// Option name under which the configuration is stored.
pub const CONFIG_OPTION: &str = "warpdrive-limit-login-attempts";

/// Configuration shared between the policy engine and the admin surface.
pub type SharedConfig = Arc<RwLock<LoginLimitConfig>>;

/// Smallest standard lockout, in seconds.
pub const MIN_LOCKOUT_DURATION: u64 = 60;
/// Smallest extended lockout, attempt window and registration window, in seconds.
pub const MIN_LONG_DURATION: u64 = 3600;

/// Channels a lockout is reported on.
///
/// Stored as a comma separated list (`"log,email"`); unknown entries are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct NotifyMethods {
    pub log: bool,
    pub email: bool,
}

impl NotifyMethods {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn log() -> Self {
        Self {
            log: true,
            email: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.log && !self.email
    }
}

impl From<&str> for NotifyMethods {
    fn from(list: &str) -> Self {
        let mut methods = NotifyMethods::none();
        for method in list.split(',').map(str::trim) {
            match method {
                "log" => methods.log = true,
                "email" => methods.email = true,
                "" => {}
                other => debug!(method = other, "Dropping unknown notify method"),
            }
        }
        methods
    }
}

impl From<String> for NotifyMethods {
    fn from(list: String) -> Self {
        NotifyMethods::from(list.as_str())
    }
}

impl From<NotifyMethods> for String {
    fn from(methods: NotifyMethods) -> Self {
        methods.to_string()
    }
}

impl fmt::Display for NotifyMethods {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::with_capacity(2);
        if self.log {
            parts.push("log");
        }
        if self.email {
            parts.push("email");
        }
        f.write_str(&parts.join(","))
    }
}

/// Capability level of a user account, ordered from least to most privileged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum UserLevel {
    Subscriber = 0,
    Contributor = 1,
    Author = 2,
    Editor = 7,
    Administrator = 10,
}

impl TryFrom<u8> for UserLevel {
    type Error = String;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            0 => Ok(UserLevel::Subscriber),
            1 => Ok(UserLevel::Contributor),
            2 => Ok(UserLevel::Author),
            7 => Ok(UserLevel::Editor),
            10 => Ok(UserLevel::Administrator),
            other => Err(format!("unknown user level {other}")),
        }
    }
}

impl From<UserLevel> for u8 {
    fn from(level: UserLevel) -> Self {
        level as u8
    }
}

/// Login and registration throttling configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginLimitConfig {
    /// Stored configuration version
    #[serde(default = "default_version")]
    pub version: u32,

    /// Lock out after this many failed attempts (default: 5)
    #[serde(default = "default_allowed_attempts")]
    pub allowed_attempts: u32,

    /// Standard lockout in seconds (default: 1200)
    #[serde(default = "default_lockout_duration")]
    pub lockout_duration: u64,

    /// Standard lockouts before the extended lockout applies (default: 3)
    #[serde(default = "default_allowed_lockouts")]
    pub allowed_lockouts: u32,

    /// Extended lockout in seconds (default: 86400)
    #[serde(default = "default_lockout_long_duration")]
    pub lockout_long_duration: u64,

    /// Failed attempts are forgotten after this many seconds (default: 43200)
    #[serde(default = "default_valid_duration")]
    pub valid_duration: u64,

    /// How login lockouts are reported (default: log)
    #[serde(default = "NotifyMethods::log")]
    pub lockout_notify: NotifyMethods,

    /// With email notification, alert every this many lockouts (default: 3)
    #[serde(default = "default_email_after")]
    pub email_after: u32,

    /// Enforce the registration limit (default: true)
    #[serde(default = "default_true")]
    pub limit_register: bool,

    /// Registrations allowed per client within the registration window (default: 3)
    #[serde(default = "default_register_amount")]
    pub register_amount: u32,

    /// Registration window in seconds (default: 86400)
    #[serde(default = "default_register_duration")]
    pub register_duration: u64,

    /// How registration lockouts are reported (default: log)
    #[serde(default = "NotifyMethods::log")]
    pub register_notify: NotifyMethods,

    /// Refuse password resets requested by login name (default: true)
    #[serde(default = "default_true")]
    pub reset_pwd_by_username_disable: bool,

    /// ... for users of this level and up (default: contributor)
    #[serde(default = "default_reset_level")]
    pub reset_pwd_by_username_level: UserLevel,

    /// Refuse all password resets (default: false)
    #[serde(default)]
    pub reset_pwd_disable: bool,

    /// ... for users of this level and up (default: contributor)
    #[serde(default = "default_reset_level")]
    pub reset_pwd_level: UserLevel,

    /// Forget pending failed attempts after a successful login (default: true)
    #[serde(default = "default_true")]
    pub reset_attempts_on_success: bool,
}

fn default_version() -> u32 {
    1
}

fn default_allowed_attempts() -> u32 {
    5
}

fn default_lockout_duration() -> u64 {
    1200 // 20 minutes
}

fn default_allowed_lockouts() -> u32 {
    3
}

fn default_lockout_long_duration() -> u64 {
    86400 // 24 hours
}

fn default_valid_duration() -> u64 {
    43200 // 12 hours
}

fn default_email_after() -> u32 {
    3
}

fn default_register_amount() -> u32 {
    3
}

fn default_register_duration() -> u64 {
    86400
}

fn default_reset_level() -> UserLevel {
    UserLevel::Contributor
}

fn default_true() -> bool {
    true
}

impl Default for LoginLimitConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            allowed_attempts: default_allowed_attempts(),
            lockout_duration: default_lockout_duration(),
            allowed_lockouts: default_allowed_lockouts(),
            lockout_long_duration: default_lockout_long_duration(),
            valid_duration: default_valid_duration(),
            lockout_notify: NotifyMethods::log(),
            email_after: default_email_after(),
            limit_register: default_true(),
            register_amount: default_register_amount(),
            register_duration: default_register_duration(),
            register_notify: NotifyMethods::log(),
            reset_pwd_by_username_disable: default_true(),
            reset_pwd_by_username_level: default_reset_level(),
            reset_pwd_disable: false,
            reset_pwd_level: default_reset_level(),
            reset_attempts_on_success: default_true(),
        }
    }
}

impl LoginLimitConfig {
    /// Build a configuration from the stored option value.
    ///
    /// Missing keys take their default, unknown keys are dropped and keys whose
    /// value does not fit the field type are reset to the default.
    pub fn from_stored(stored: Option<Value>) -> Self {
        let mut config = match stored {
            Some(Value::Object(map)) => Self::merge_with_defaults(map),
            Some(other) => {
                warn!(kind = %json_kind(&other), "Stored limit login options are not an object, using defaults");
                Self::default()
            }
            None => Self::default(),
        };
        config.sanitize();
        config
    }

    fn merge_with_defaults(stored: Map<String, Value>) -> Self {
        let defaults = Self::default();
        let Ok(Value::Object(mut merged)) = serde_json::to_value(&defaults) else {
            return defaults;
        };

        for (name, value) in stored {
            if !merged.contains_key(&name) {
                debug!(option = %name, "Dropping unknown limit login option");
                continue;
            }
            let previous = merged.insert(name.clone(), value);
            if serde_json::from_value::<Self>(Value::Object(merged.clone())).is_err() {
                warn!(option = %name, "Ignoring limit login option with invalid value");
                if let Some(previous) = previous {
                    merged.insert(name, previous);
                }
            }
        }

        serde_json::from_value(Value::Object(merged)).unwrap_or(defaults)
    }

    /// Clamp every value into its allowed range.
    pub fn sanitize(&mut self) {
        self.allowed_attempts = self.allowed_attempts.max(1);
        self.lockout_duration = self.lockout_duration.max(MIN_LOCKOUT_DURATION);
        self.allowed_lockouts = self.allowed_lockouts.max(1);
        self.lockout_long_duration = self.lockout_long_duration.max(MIN_LONG_DURATION);
        self.valid_duration = self.valid_duration.max(MIN_LONG_DURATION);
        self.email_after = self.email_after.max(1);
        self.register_amount = self.register_amount.max(1);
        self.register_duration = self.register_duration.max(MIN_LONG_DURATION);
    }

    /// Names of every configuration key, sorted.
    pub fn option_names() -> Vec<String> {
        match serde_json::to_value(Self::default()) {
            Ok(Value::Object(map)) => map.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }

    pub fn lockout_duration(&self) -> Duration {
        seconds(self.lockout_duration)
    }

    pub fn lockout_long_duration(&self) -> Duration {
        seconds(self.lockout_long_duration)
    }

    pub fn valid_duration(&self) -> Duration {
        seconds(self.valid_duration)
    }

    pub fn register_duration(&self) -> Duration {
        seconds(self.register_duration)
    }

    /// Failed attempts that lead to the extended lockout.
    pub fn attempts_before_long_lockout(&self) -> u32 {
        self.allowed_attempts.saturating_mul(self.allowed_lockouts)
    }
}

/// Whole seconds as a [`Duration`], saturating at [`Duration::MAX`].
fn seconds(value: u64) -> Duration {
    i64::try_from(value)
        .ok()
        .and_then(Duration::try_seconds)
        .unwrap_or(Duration::MAX)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A partial change to the configuration, as submitted by an administrator.
///
/// Unlike stored values, submitted keys are validated strictly: unknown keys
/// and values of the wrong type are rejected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_attempts: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lockout_duration: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_lockouts: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lockout_long_duration: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_duration: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lockout_notify: Option<NotifyMethods>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_after: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_register: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub register_amount: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub register_duration: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub register_notify: Option<NotifyMethods>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset_pwd_by_username_disable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset_pwd_by_username_level: Option<UserLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset_pwd_disable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset_pwd_level: Option<UserLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset_attempts_on_success: Option<bool>,
}

impl ConfigUpdate {
    /// Parse a submitted JSON object, naming the offending key on failure.
    pub fn from_json(value: Value) -> Result<Self, ValidationError> {
        let Value::Object(map) = value else {
            return Err(ValidationError::InvalidField(
                "configuration update must be an object".to_string(),
            ));
        };

        let known = LoginLimitConfig::option_names();
        for (name, value) in &map {
            // version is managed by the store, never by an administrator
            if name == "version" || !known.contains(name) {
                return Err(ValidationError::UnknownOption(name.clone()));
            }

            let mut single = Map::new();
            single.insert(name.clone(), value.clone());
            if let Err(e) = serde_json::from_value::<ConfigUpdate>(Value::Object(single)) {
                return Err(ValidationError::InvalidOption {
                    name: name.clone(),
                    reason: e.to_string(),
                });
            }
        }

        serde_json::from_value(Value::Object(map))
            .map_err(|e| ValidationError::InvalidField(e.to_string()))
    }

    /// Apply the change on top of `config` and sanitize the result.
    pub fn apply_to(&self, config: &LoginLimitConfig) -> LoginLimitConfig {
        let mut next = config.clone();
        macro_rules! apply {
            ($($field:ident),* $(,)?) => {
                $(if let Some(value) = self.$field { next.$field = value; })*
            };
        }
        apply!(
            allowed_attempts,
            lockout_duration,
            allowed_lockouts,
            lockout_long_duration,
            valid_duration,
            lockout_notify,
            email_after,
            limit_register,
            register_amount,
            register_duration,
            register_notify,
            reset_pwd_by_username_disable,
            reset_pwd_by_username_level,
            reset_pwd_disable,
            reset_pwd_level,
            reset_attempts_on_success,
        );
        next.sanitize();
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let config = LoginLimitConfig::default();
        assert_eq!(config.allowed_attempts, 5);
        assert_eq!(config.lockout_duration(), Duration::minutes(20));
        assert_eq!(config.allowed_lockouts, 3);
        assert_eq!(config.lockout_long_duration(), Duration::hours(24));
        assert_eq!(config.valid_duration(), Duration::hours(12));
        assert_eq!(config.lockout_notify, NotifyMethods::log());
        assert!(config.limit_register);
        assert_eq!(config.register_amount, 3);
        assert_eq!(config.attempts_before_long_lockout(), 15);
    }

    #[test]
    fn test_missing_store_uses_defaults() {
        assert_eq!(LoginLimitConfig::from_stored(None), LoginLimitConfig::default());
        assert_eq!(
            LoginLimitConfig::from_stored(Some(json!("garbage"))),
            LoginLimitConfig::default()
        );
    }

    #[test]
    fn test_merge_keeps_valid_drops_unknown_and_invalid() {
        let stored = json!({
            "allowed_attempts": 4,
            "lockout_notify": "log,email,sms",
            "valid_duration": "soon",
            "favourite_colour": "teal",
        });
        let config = LoginLimitConfig::from_stored(Some(stored));

        assert_eq!(config.allowed_attempts, 4);
        assert!(config.lockout_notify.log);
        assert!(config.lockout_notify.email);
        assert_eq!(config.valid_duration, 43200);
        assert_eq!(config.lockout_duration, 1200);
    }

    #[test]
    fn test_sanitize_clamps_minimums() {
        let stored = json!({
            "allowed_attempts": 0,
            "lockout_duration": 10,
            "allowed_lockouts": 0,
            "lockout_long_duration": 60,
            "valid_duration": 1,
            "email_after": 0,
            "register_amount": 0,
            "register_duration": 5,
        });
        let config = LoginLimitConfig::from_stored(Some(stored));

        assert_eq!(config.allowed_attempts, 1);
        assert_eq!(config.lockout_duration, MIN_LOCKOUT_DURATION);
        assert_eq!(config.allowed_lockouts, 1);
        assert_eq!(config.lockout_long_duration, MIN_LONG_DURATION);
        assert_eq!(config.valid_duration, MIN_LONG_DURATION);
        assert_eq!(config.email_after, 1);
        assert_eq!(config.register_amount, 1);
        assert_eq!(config.register_duration, MIN_LONG_DURATION);
    }

    #[test]
    fn test_notify_methods_round_trip_as_string() {
        let methods = NotifyMethods::from("email, log");
        assert_eq!(methods.to_string(), "log,email");
        assert_eq!(serde_json::to_value(methods).unwrap(), json!("log,email"));
        assert!(NotifyMethods::from("").is_empty());
    }

    #[test]
    fn test_user_level_serializes_as_number() {
        assert_eq!(serde_json::to_value(UserLevel::Editor).unwrap(), json!(7));
        assert!(serde_json::from_value::<UserLevel>(json!(3)).is_err());
        assert!(UserLevel::Administrator > UserLevel::Author);
    }

    #[test]
    fn test_config_update_rejects_unknown_option() {
        let err = ConfigUpdate::from_json(json!({"allowed_attempts": 3, "colour": "red"}))
            .unwrap_err();
        assert!(matches!(err, ValidationError::UnknownOption(name) if name == "colour"));
    }

    #[test]
    fn test_config_update_rejects_version() {
        let err = ConfigUpdate::from_json(json!({"version": 2})).unwrap_err();
        assert!(matches!(err, ValidationError::UnknownOption(name) if name == "version"));
    }

    #[test]
    fn test_config_update_rejects_invalid_value() {
        let err = ConfigUpdate::from_json(json!({"allowed_attempts": "three"})).unwrap_err();
        assert!(
            matches!(err, ValidationError::InvalidOption { name, .. } if name == "allowed_attempts")
        );
    }

    #[test]
    fn test_config_update_applies_and_sanitizes() {
        let update = ConfigUpdate::from_json(json!({
            "allowed_attempts": 3,
            "lockout_duration": 30,
            "limit_register": false,
        }))
        .unwrap();
        let config = update.apply_to(&LoginLimitConfig::default());

        assert_eq!(config.allowed_attempts, 3);
        assert_eq!(config.lockout_duration, MIN_LOCKOUT_DURATION);
        assert!(!config.limit_register);
        assert_eq!(config.register_amount, 3);
    }

    #[test]
    fn test_huge_durations_saturate() {
        let huge = 10_000_000_000_000_000u64;
        let update = ConfigUpdate::from_json(json!({
            "lockout_duration": huge,
            "lockout_long_duration": huge,
            "valid_duration": huge,
            "register_duration": u64::MAX,
        }))
        .unwrap();
        let config = update.apply_to(&LoginLimitConfig::default());

        assert_eq!(config.lockout_duration(), Duration::MAX);
        assert_eq!(config.lockout_long_duration(), Duration::MAX);
        assert_eq!(config.valid_duration(), Duration::MAX);
        assert_eq!(config.register_duration(), Duration::MAX);
    }

    #[test]
    fn test_option_names_cover_every_field() {
        let names = LoginLimitConfig::option_names();
        assert!(names.contains(&"allowed_attempts".to_string()));
        assert!(names.contains(&"reset_attempts_on_success".to_string()));
        assert_eq!(names.len(), 17);
    }
}
