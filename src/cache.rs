//! Run-scoped cache of fetched archives and extracted tables.
//!
//! Each key owns a [`OnceCell`]; concurrent callers for the same key wait
//! on the first caller's load instead of starting their own. Distinct keys
//! never contend beyond the brief map lookup. A failed load leaves the cell
//! empty so a later call may try again.

use bytes::Bytes;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OnceCell;
use tracing::debug;

use crate::error::PipelineError;
use crate::table::{Table, TableKey};

struct KeyedCells<K, V> {
    cells: Mutex<HashMap<K, Arc<OnceCell<V>>>>,
    loads: AtomicUsize,
}

impl<K: Eq + Hash, V: Clone> KeyedCells<K, V> {
    fn new() -> Self {
        Self {
            cells: Mutex::new(HashMap::new()),
            loads: AtomicUsize::new(0),
        }
    }

    fn cell(&self, key: K) -> Arc<OnceCell<V>> {
        let mut cells = self.cells.lock().unwrap_or_else(PoisonError::into_inner);
        cells.entry(key).or_default().clone()
    }

    async fn get_or_try_init<F, Fut>(&self, key: K, loader: F) -> Result<V, PipelineError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, PipelineError>>,
    {
        let cell = self.cell(key);
        let value = cell
            .get_or_try_init(|| async move {
                self.loads.fetch_add(1, Ordering::Relaxed);
                loader().await
            })
            .await?;
        Ok(value.clone())
    }

    fn len(&self) -> usize {
        let cells = self.cells.lock().unwrap_or_else(PoisonError::into_inner);
        cells.values().filter(|c| c.initialized()).count()
    }
}

pub struct TableCache {
    tables: KeyedCells<TableKey, Arc<Table>>,
    archives: KeyedCells<String, Bytes>,
}

impl Default for TableCache {
    fn default() -> Self {
        Self::new()
    }
}

impl TableCache {
    pub fn new() -> Self {
        Self {
            tables: KeyedCells::new(),
            archives: KeyedCells::new(),
        }
    }

    /// Returns the cached table for `key`, running `loader` on a miss.
    pub async fn get_or_fetch<F, Fut>(&self, key: TableKey, loader: F) -> Result<Arc<Table>, PipelineError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Table, PipelineError>>,
    {
        let table = self
            .tables
            .get_or_try_init(key, || async move {
                debug!(%key, "Table cache miss");
                loader().await.map(Arc::new)
            })
            .await?;
        Ok(table)
    }

    /// Returns the cached archive bytes for `url`, running `loader` on a miss.
    pub async fn archive<F, Fut>(&self, url: &str, loader: F) -> Result<Bytes, PipelineError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Bytes, PipelineError>>,
    {
        self.archives.get_or_try_init(url.to_string(), loader).await
    }

    /// Number of times a table loader actually ran.
    pub fn table_loads(&self) -> usize {
        self.tables.loads.load(Ordering::Relaxed)
    }

    /// Number of times an archive loader actually ran.
    pub fn archive_loads(&self) -> usize {
        self.archives.loads.load(Ordering::Relaxed)
    }

    pub fn cached_tables(&self) -> usize {
        self.tables.len()
    }
}
