//! Key-value persistence seam.
//!
//! All shared state (authorization records, the wallet, the asset cache) lives
//! behind [`KeyValueStore::update`], which applies a transform to the current
//! value and writes the result back as one atomic step. Nothing mutates stored
//! state any other way.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::error::{Error, Result};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("backend error: {0}")]
    Backend(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("update aborted: {0}")]
    Aborted(String),

    #[error("store mutex poisoned")]
    Poisoned,
}

/// Transform applied by [`KeyValueStore::update`]. Receives the raw stored
/// value (if any) and returns the raw value to write.
pub type Transform<'a> =
    dyn FnMut(Option<String>) -> std::result::Result<String, StoreError> + 'a;

/// Raw string-valued store with an atomic read-modify-write primitive.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> std::result::Result<Option<String>, StoreError>;

    /// Load `key`, apply `transform`, store the result. Implementations must
    /// ensure no other update of the same key interleaves between the load
    /// and the store. Returns the written value.
    fn update(
        &self,
        key: &str,
        transform: &mut Transform<'_>,
    ) -> std::result::Result<String, StoreError>;
}

/// In-process store used by tests and embedders that do not need durability.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> std::result::Result<Option<String>, StoreError> {
        let entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn update(
        &self,
        key: &str,
        transform: &mut Transform<'_>,
    ) -> std::result::Result<String, StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        let next = transform(entries.get(key).cloned())?;
        entries.insert(key.to_string(), next.clone());
        Ok(next)
    }
}

/// Typed view over one key of a [`KeyValueStore`]. Missing keys read as
/// `T::default()`.
pub struct Repository<T> {
    store: Arc<dyn KeyValueStore>,
    key: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Repository<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            key: self.key,
            _marker: PhantomData,
        }
    }
}

impl<T> Repository<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    pub fn new(store: Arc<dyn KeyValueStore>, key: &'static str) -> Self {
        Self {
            store,
            key,
            _marker: PhantomData,
        }
    }

    pub fn key(&self) -> &'static str {
        self.key
    }

    pub fn get(&self) -> Result<T> {
        decode(self.store.get(self.key)?)
    }

    /// Atomically replace the stored value with `f(current)`.
    ///
    /// If `f` fails nothing is written and its error is returned unchanged.
    pub fn update<F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(T) -> Result<T>,
    {
        let mut f = Some(f);
        let mut failure: Option<Error> = None;
        let written = self.store.update(self.key, &mut |raw| {
            let current: T = match raw {
                Some(raw) => serde_json::from_str(&raw)?,
                None => T::default(),
            };
            let f = f
                .take()
                .ok_or_else(|| StoreError::Aborted("transform invoked twice".into()))?;
            match f(current) {
                Ok(next) => Ok(serde_json::to_string(&next)?),
                Err(e) => {
                    failure = Some(e);
                    Err(StoreError::Aborted(format!("transform of {} failed", self.key)))
                }
            }
        });
        if let Some(e) = failure {
            return Err(e);
        }
        decode(Some(written?))
    }
}

fn decode<T: DeserializeOwned + Default>(raw: Option<String>) -> Result<T> {
    match raw {
        Some(raw) => Ok(serde_json::from_str(&raw).map_err(StoreError::from)?),
        None => Ok(T::default()),
    }
}
