//! Failure state machine for a single client.
//!
//! The lockout tier is decided from the running failure count: every
//! `allowed_attempts`-th failure locks the client out, and once the count
//! reaches `allowed_attempts × allowed_lockouts` the lockout is extended and
//! the count starts over.

use serde::{Deserialize, Serialize};

/// Lockout length class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockoutTier {
    Standard,
    Extended,
}

/// Where a client stands after a failed login attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThrottleState {
    /// No failures on record
    Clear,
    /// Failures recorded, threshold not reached; carries the running count
    Warned(u32),
    /// Locked out for the standard duration; the count is kept so that
    /// later lockouts escalate
    LockedStandard,
    /// Locked out for the extended duration; the count is cleared
    LockedExtended,
}

impl ThrottleState {
    /// State reached by the failure that brought the count to `count`.
    pub fn after_failure(count: u32, allowed_attempts: u32, allowed_lockouts: u32) -> Self {
        let allowed_attempts = allowed_attempts.max(1);
        if count == 0 {
            return ThrottleState::Clear;
        }
        if count % allowed_attempts != 0 {
            return ThrottleState::Warned(count);
        }

        let long_threshold = allowed_attempts.saturating_mul(allowed_lockouts.max(1));
        if count >= long_threshold {
            ThrottleState::LockedExtended
        } else {
            ThrottleState::LockedStandard
        }
    }

    pub fn is_locked(&self) -> bool {
        matches!(
            self,
            ThrottleState::LockedStandard | ThrottleState::LockedExtended
        )
    }

    pub fn tier(&self) -> Option<LockoutTier> {
        match self {
            ThrottleState::LockedStandard => Some(LockoutTier::Standard),
            ThrottleState::LockedExtended => Some(LockoutTier::Extended),
            _ => None,
        }
    }

    /// Whether entering this state wipes the client's failure count.
    pub fn resets_count(&self) -> bool {
        matches!(self, ThrottleState::LockedExtended)
    }

    /// Failures left before the next lockout, while warned.
    pub fn remaining(&self, allowed_attempts: u32) -> Option<u32> {
        match self {
            ThrottleState::Warned(count) => {
                let allowed_attempts = allowed_attempts.max(1);
                Some(allowed_attempts - count % allowed_attempts)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warned_below_threshold() {
        assert_eq!(ThrottleState::after_failure(1, 5, 3), ThrottleState::Warned(1));
        assert_eq!(ThrottleState::after_failure(4, 5, 3), ThrottleState::Warned(4));
        assert_eq!(ThrottleState::after_failure(0, 5, 3), ThrottleState::Clear);
    }

    #[test]
    fn test_standard_lockout_on_each_multiple() {
        assert_eq!(ThrottleState::after_failure(5, 5, 3), ThrottleState::LockedStandard);
        assert_eq!(ThrottleState::after_failure(10, 5, 3), ThrottleState::LockedStandard);
        assert_eq!(ThrottleState::after_failure(11, 5, 3), ThrottleState::Warned(11));
    }

    #[test]
    fn test_extended_lockout_at_last_multiple() {
        assert_eq!(ThrottleState::after_failure(3, 3, 2), ThrottleState::LockedStandard);
        assert_eq!(ThrottleState::after_failure(6, 3, 2), ThrottleState::LockedExtended);
        assert!(ThrottleState::LockedExtended.resets_count());
        assert!(!ThrottleState::LockedStandard.resets_count());
    }

    #[test]
    fn test_single_lockout_allowed_goes_straight_to_extended() {
        assert_eq!(ThrottleState::after_failure(2, 2, 1), ThrottleState::LockedExtended);
    }

    #[test]
    fn test_zero_thresholds_are_treated_as_one() {
        assert_eq!(ThrottleState::after_failure(1, 0, 0), ThrottleState::LockedExtended);
    }

    #[test]
    fn test_remaining() {
        assert_eq!(ThrottleState::Warned(4).remaining(5), Some(1));
        assert_eq!(ThrottleState::Warned(6).remaining(5), Some(4));
        assert_eq!(ThrottleState::LockedStandard.remaining(5), None);
    }

    #[test]
    fn test_tier() {
        assert_eq!(ThrottleState::LockedStandard.tier(), Some(LockoutTier::Standard));
        assert_eq!(ThrottleState::LockedExtended.tier(), Some(LockoutTier::Extended));
        assert_eq!(ThrottleState::Warned(1).tier(), None);
        assert!(!ThrottleState::Clear.is_locked());
    }
}
