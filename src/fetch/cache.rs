//! Per-snapshot single-flight cache
//!
//! The first caller for a key creates the entry under the map lock and
//! runs the loader outside it; concurrent callers await the same cell and
//! observe the same `Ok` or `Err`. Entries live until the cache is dropped.

use super::FetchError;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Mutex, OnceCell};

type Entry<V> = Arc<OnceCell<Result<V, FetchError>>>;

pub struct SnapshotCache<V> {
    entries: Mutex<HashMap<String, Entry<V>>>,
    loads: AtomicUsize,
}

impl<V: Clone> SnapshotCache<V> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            loads: AtomicUsize::new(0),
        }
    }

    /// Return the cached result for `key`, running `load` if nobody has yet
    pub async fn get_or_load<F, Fut>(&self, key: &str, load: F) -> Result<V, FetchError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, FetchError>>,
    {
        let cell = {
            let mut entries = self.entries.lock().await;
            entries.entry(key.to_string()).or_default().clone()
        };

        cell.get_or_init(|| async {
            self.loads.fetch_add(1, Ordering::Relaxed);
            load().await
        })
        .await
        .clone()
    }

    /// Loader invocations so far
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::Relaxed)
    }
}

impl<V: Clone> Default for SnapshotCache<V> {
    fn default() -> Self {
        Self::new()
    }
}
