//! Reporting counters. Never consulted by the policy.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatisticKind {
    /// Login lockouts ever applied
    LockoutTotal,
    /// Clients that reached the registration limit
    LockoutRegisterTotal,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    #[serde(default)]
    pub lockout_total: u64,
    #[serde(default)]
    pub lockout_register_total: u64,
}

impl Statistics {
    pub fn get(&self, kind: StatisticKind) -> u64 {
        match kind {
            StatisticKind::LockoutTotal => self.lockout_total,
            StatisticKind::LockoutRegisterTotal => self.lockout_register_total,
        }
    }

    pub fn set(&mut self, kind: StatisticKind, value: u64) {
        match kind {
            StatisticKind::LockoutTotal => self.lockout_total = value,
            StatisticKind::LockoutRegisterTotal => self.lockout_register_total = value,
        }
    }

    pub fn increment(&mut self, kind: StatisticKind) {
        self.set(kind, self.get(kind).saturating_add(1));
    }
}
