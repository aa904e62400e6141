//! Batch Loader
//!
//! A cache-backed record loader built on the scheduler's dispatch hook.
//!
//! # How It Works
//!
//! 1. `load(keys)` returns a computation. When first stepped it queues its
//!    keys and suspends with `wait_for_dispatch`.
//!
//! 2. At the start of the next tick the loader's resolver runs. It takes
//!    every queued key that is not cached yet and fetches all of them in one
//!    call, however many computations queued them.
//!
//! 3. The computations resume in the same tick and read their records from
//!    the cache.
//!
//! Keys the fetch function does not return are cached as missing and load
//! as `null`. `dirty(key)` evicts a record so the next load fetches it
//! again.

use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use indexmap::IndexSet;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{BoxError, TaskError};
use crate::runtime::{Scheduler, Task};

type FetchFn<K, V> =
    Box<dyn Fn(Vec<K>) -> BoxFuture<'static, Result<HashMap<K, V>, BoxError>> + Send + Sync>;

struct LoaderState<K, V> {
    name: String,
    fetch: FetchFn<K, V>,

    /// `None` marks a key the fetch function had no record for.
    cache: Mutex<HashMap<K, Option<V>>>,

    /// Keys queued since the last flush, in request order.
    queued: Mutex<IndexSet<K>>,
}

/// Batches key lookups from many computations into one fetch per tick.
pub struct BatchLoader<K, V> {
    state: Arc<LoaderState<K, V>>,
}

impl<K, V> Clone for BatchLoader<K, V> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<K, V> BatchLoader<K, V>
where
    K: Eq + Hash + Clone + Display + Send + Sync + 'static,
    V: Clone + Serialize + Send + Sync + 'static,
{
    /// Create a loader. `fetch` receives every key to load in one batch.
    pub fn new<F, Fut>(name: impl Into<String>, fetch: F) -> Self
    where
        F: Fn(Vec<K>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HashMap<K, V>, BoxError>> + Send + 'static,
    {
        Self {
            state: Arc::new(LoaderState {
                name: name.into(),
                fetch: Box::new(move |keys| fetch(keys).boxed()),
                cache: Mutex::new(HashMap::new()),
                queued: Mutex::new(IndexSet::new()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.state.name
    }

    /// Register this loader's flush as a resolver on `scheduler`.
    pub fn register(&self, scheduler: &Scheduler) {
        let loader = self.clone();
        scheduler.on_dispatch(move || {
            let loader = loader.clone();
            async move { loader.flush().await }
        });
    }

    /// A computation that loads `keys` and returns an object mapping each
    /// key to its record.
    pub fn load<I>(&self, scheduler: &Scheduler, keys: I) -> Task
    where
        I: IntoIterator<Item = K>,
    {
        let keys: Vec<K> = keys.into_iter().collect();
        let state = self.state.clone();
        let scheduler = scheduler.clone();
        Task::computation(async move {
            state.queued.lock().extend(keys.iter().cloned());
            scheduler.wait_for_dispatch().await?;

            let cache = state.cache.lock();
            let mut records = Map::with_capacity(keys.len());
            for key in &keys {
                let record = match cache.get(key) {
                    Some(Some(value)) => serde_json::to_value(value).map_err(TaskError::from)?,
                    _ => Value::Null,
                };
                records.insert(key.to_string(), record);
            }
            Ok(Value::Object(records))
        })
    }

    /// Evict `key` so the next load fetches it again.
    pub fn dirty(&self, key: &K) {
        self.state.cache.lock().remove(key);
    }

    /// Fetch every queued key that is not cached yet, in one call.
    pub async fn flush(&self) -> Result<(), BoxError> {
        let keys: Vec<K> = {
            let queued = std::mem::take(&mut *self.state.queued.lock());
            let cache = self.state.cache.lock();
            queued
                .into_iter()
                .filter(|key| !cache.contains_key(key))
                .collect()
        };
        if keys.is_empty() {
            return Ok(());
        }

        debug!(loader = %self.state.name, keys = keys.len(), "fetching batch");
        let mut records = (self.state.fetch)(keys.clone()).await?;

        let mut cache = self.state.cache.lock();
        for key in keys {
            let record = records.remove(&key);
            cache.insert(key, record);
        }
        Ok(())
    }
}
