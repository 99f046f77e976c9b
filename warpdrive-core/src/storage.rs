//! The host-provided option store.
//!
//! Every piece of throttling state (configuration, ledgers, statistics and
//! lockout logs) is persisted as a named JSON value through [`OptionStore`].
//! Writes are last-write-wins; nothing here is transactional.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::{Error, error::utilities::SerializationResultExt};

/// Where options live when the host runs several sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OptionScope {
    /// Options belong to a single site
    #[default]
    Site,
    /// Options are shared by every site of a network installation
    Network,
}

impl OptionScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            OptionScope::Site => "site",
            OptionScope::Network => "network",
        }
    }
}

/// Persistent key/value store for named options.
///
/// Implementations are bound to one [`OptionScope`] and must use it
/// consistently for every operation.
#[async_trait]
pub trait OptionStore: Send + Sync + 'static {
    /// The scope this store reads and writes
    fn scope(&self) -> OptionScope;

    /// Fetch an option, `None` when it does not exist
    async fn get(&self, name: &str) -> Result<Option<Value>, Error>;

    /// Create an option. Returns `false` if it already exists.
    async fn add(&self, name: &str, value: Value) -> Result<bool, Error>;

    /// Replace an existing option. Returns `false` if it does not exist.
    async fn update(&self, name: &str, value: Value) -> Result<bool, Error>;

    /// Remove an option. Returns `false` if it did not exist.
    async fn delete(&self, name: &str) -> Result<bool, Error>;

    /// Prepare the backing storage. Stores without a schema have nothing to do.
    async fn migrate(&self) -> Result<(), Error> {
        Ok(())
    }
}

/// Typed helpers on top of [`OptionStore`].
#[async_trait]
pub trait OptionStoreExt: OptionStore {
    /// Read an option and decode it, falling back to `default` when it is missing.
    async fn get_or<T>(&self, name: &str, default: T) -> Result<T, Error>
    where
        T: DeserializeOwned + Send,
    {
        match self.get(name).await? {
            Some(value) => serde_json::from_value(value).map_option_err(name),
            None => Ok(default),
        }
    }

    /// Encode and persist an option, creating it when it does not exist yet.
    async fn save<T>(&self, name: &str, value: &T) -> Result<(), Error>
    where
        T: Serialize + Sync,
    {
        let value = serde_json::to_value(value).map_option_err(name)?;
        if self.get(name).await?.is_none() && self.add(name, value.clone()).await? {
            return Ok(());
        }
        self.update(name, value).await?;
        Ok(())
    }
}

impl<S: OptionStore + ?Sized> OptionStoreExt for S {}

/// In-process option store, useful for tests and single-process hosts.
#[derive(Debug, Default)]
pub struct MemoryOptionStore {
    scope: OptionScope,
    options: DashMap<String, Value>,
}

impl MemoryOptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scope(scope: OptionScope) -> Self {
        Self {
            scope,
            options: DashMap::new(),
        }
    }

    /// Names of all stored options, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.options.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

#[async_trait]
impl OptionStore for MemoryOptionStore {
    fn scope(&self) -> OptionScope {
        self.scope
    }

    async fn get(&self, name: &str) -> Result<Option<Value>, Error> {
        Ok(self.options.get(name).map(|v| v.value().clone()))
    }

    async fn add(&self, name: &str, value: Value) -> Result<bool, Error> {
        match self.options.entry(name.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Ok(false),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(value);
                Ok(true)
            }
        }
    }

    async fn update(&self, name: &str, value: Value) -> Result<bool, Error> {
        match self.options.get_mut(name) {
            Some(mut existing) => {
                *existing = value;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, name: &str) -> Result<bool, Error> {
        Ok(self.options.remove(name).is_some())
    }
}
