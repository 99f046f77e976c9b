//! Repositories for data access
//!
//! Repositories translate between the typed ledgers and the named options the
//! host persists. Services only talk to storage through them.

pub mod ledger;

pub use ledger::{LedgerKind, LedgerRepository};
