//! In-memory views of the throttling ledgers.
//!
//! A ledger is loaded from the option store, mutated by a service and saved
//! back. The types here hold no I/O; persistence lives in
//! [`crate::repositories::LedgerRepository`].
//!
//! Expiry is exclusive: an entry whose timestamp equals `now` is expired.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};

use crate::client::ClientKey;

/// `now + window`, saturating at the latest representable instant.
pub fn expiry(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    now.checked_add_signed(window).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Per-client counters paired with the instant each counter stops being valid.
///
/// Used for failed login attempts and for registrations. A client has a count
/// only while it also has a validity entry; [`CounterLedger::purge_expired`]
/// repairs any drift between the two maps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CounterLedger {
    pub counts: BTreeMap<ClientKey, u32>,
    pub valid_until: BTreeMap<ClientKey, DateTime<Utc>>,
}

impl CounterLedger {
    pub fn new(
        counts: BTreeMap<ClientKey, u32>,
        valid_until: BTreeMap<ClientKey, DateTime<Utc>>,
    ) -> Self {
        Self {
            counts,
            valid_until,
        }
    }

    /// Raw count for a client, regardless of validity.
    pub fn count(&self, key: &ClientKey) -> Option<u32> {
        self.counts.get(key).copied()
    }

    pub fn is_valid(&self, key: &ClientKey, now: DateTime<Utc>) -> bool {
        self.valid_until.get(key).is_some_and(|until| now < *until)
    }

    /// Count for a client while its window is still open.
    pub fn current(&self, key: &ClientKey, now: DateTime<Utc>) -> Option<u32> {
        self.count(key).filter(|_| self.is_valid(key, now))
    }

    pub fn valid_until(&self, key: &ClientKey) -> Option<DateTime<Utc>> {
        self.valid_until.get(key).copied()
    }

    /// Add one to the client's count, restarting at 1 when its window has
    /// closed, and reopen the window for `window` from `now`.
    pub fn bump(&mut self, key: &ClientKey, now: DateTime<Utc>, window: Duration) -> u32 {
        let next = match self.current(key, now) {
            Some(count) => count.saturating_add(1),
            None => 1,
        };
        self.counts.insert(key.clone(), next);
        self.valid_until.insert(key.clone(), expiry(now, window));
        next
    }

    /// Forget a client entirely. Returns whether anything was removed.
    pub fn remove(&mut self, key: &ClientKey) -> bool {
        let had_count = self.counts.remove(key).is_some();
        let had_validity = self.valid_until.remove(key).is_some();
        had_count || had_validity
    }

    /// Drop expired pairs and counts without a validity entry.
    /// Returns whether anything changed.
    pub fn purge_expired(&mut self, now: DateTime<Utc>) -> bool {
        let before = (self.counts.len(), self.valid_until.len());

        let expired: Vec<ClientKey> = self
            .valid_until
            .iter()
            .filter(|(_, until)| **until <= now)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            self.valid_until.remove(key);
            self.counts.remove(key);
        }

        let valid_until = &self.valid_until;
        self.counts.retain(|key, _| valid_until.contains_key(key));

        before != (self.counts.len(), self.valid_until.len())
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty() && self.valid_until.is_empty()
    }
}

/// Per-client lockout expiry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockoutLedger {
    pub locked_until: BTreeMap<ClientKey, DateTime<Utc>>,
}

impl LockoutLedger {
    pub fn new(locked_until: BTreeMap<ClientKey, DateTime<Utc>>) -> Self {
        Self { locked_until }
    }

    pub fn is_locked(&self, key: &ClientKey, now: DateTime<Utc>) -> bool {
        self.locked_until(key, now).is_some()
    }

    /// Expiry of the client's lockout, if one is active.
    pub fn locked_until(&self, key: &ClientKey, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.locked_until.get(key).copied().filter(|until| now < *until)
    }

    pub fn lock(&mut self, key: &ClientKey, until: DateTime<Utc>) {
        self.locked_until.insert(key.clone(), until);
    }

    pub fn remove(&mut self, key: &ClientKey) -> bool {
        self.locked_until.remove(key).is_some()
    }

    /// Drop lockouts that have run out. Returns whether anything changed.
    pub fn purge_expired(&mut self, now: DateTime<Utc>) -> bool {
        let before = self.locked_until.len();
        self.locked_until.retain(|_, until| now < *until);
        before != self.locked_until.len()
    }

    pub fn active_count(&self, now: DateTime<Utc>) -> usize {
        self.locked_until.values().filter(|until| now < **until).count()
    }

    pub fn len(&self) -> usize {
        self.locked_until.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locked_until.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(seconds: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(seconds, 0).unwrap()
    }

    fn key(s: &str) -> ClientKey {
        ClientKey::new(s)
    }

    #[test]
    fn test_bump_accumulates_within_window() {
        let mut ledger = CounterLedger::default();
        let window = Duration::seconds(100);

        assert_eq!(ledger.bump(&key("a"), at(0), window), 1);
        assert_eq!(ledger.bump(&key("a"), at(50), window), 2);
        assert_eq!(ledger.valid_until(&key("a")), Some(at(150)));
    }

    #[test]
    fn test_bump_restarts_after_window() {
        let mut ledger = CounterLedger::default();
        let window = Duration::seconds(100);

        ledger.bump(&key("a"), at(0), window);
        ledger.bump(&key("a"), at(10), window);
        assert_eq!(ledger.bump(&key("a"), at(110), window), 1);
    }

    #[test]
    fn test_window_end_is_exclusive() {
        let mut ledger = CounterLedger::default();
        ledger.bump(&key("a"), at(0), Duration::seconds(100));

        assert!(ledger.is_valid(&key("a"), at(99)));
        assert!(!ledger.is_valid(&key("a"), at(100)));
        assert_eq!(ledger.current(&key("a"), at(100)), None);
    }

    #[test]
    fn test_purge_removes_pairs_and_repairs_orphans() {
        let mut ledger = CounterLedger::default();
        ledger.bump(&key("expired"), at(0), Duration::seconds(10));
        ledger.bump(&key("live"), at(0), Duration::seconds(1000));
        ledger.counts.insert(key("orphan"), 4);

        assert!(ledger.purge_expired(at(10)));
        assert_eq!(ledger.count(&key("expired")), None);
        assert_eq!(ledger.valid_until(&key("expired")), None);
        assert_eq!(ledger.count(&key("orphan")), None);
        assert_eq!(ledger.count(&key("live")), Some(1));

        assert!(!ledger.purge_expired(at(10)));
    }

    #[test]
    fn test_remove() {
        let mut ledger = CounterLedger::default();
        ledger.bump(&key("a"), at(0), Duration::seconds(10));
        assert!(ledger.remove(&key("a")));
        assert!(!ledger.remove(&key("a")));
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_lockout_expiry_is_exclusive() {
        let mut ledger = LockoutLedger::default();
        ledger.lock(&key("a"), at(1201));

        assert!(ledger.is_locked(&key("a"), at(1200)));
        assert!(!ledger.is_locked(&key("a"), at(1201)));
        assert_eq!(ledger.active_count(at(1200)), 1);
        assert_eq!(ledger.active_count(at(1201)), 0);
    }

    #[test]
    fn test_lockout_purge() {
        let mut ledger = LockoutLedger::default();
        ledger.lock(&key("old"), at(10));
        ledger.lock(&key("new"), at(100));

        assert!(ledger.purge_expired(at(50)));
        assert_eq!(ledger.len(), 1);
        assert!(!ledger.purge_expired(at(50)));
    }

    #[test]
    fn test_expiry_saturates() {
        assert_eq!(
            expiry(DateTime::<Utc>::MAX_UTC, Duration::seconds(1)),
            DateTime::<Utc>::MAX_UTC
        );
    }
}
