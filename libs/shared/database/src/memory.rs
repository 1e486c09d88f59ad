// libs/shared/database/src/memory.rs
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::store::{IndexEntry, RecordStore, ScopeKey, StoreError, Transaction};

type RecordKey = (&'static str, Uuid);
type IndexKey = (&'static str, &'static str, String);

#[derive(Debug, Clone)]
struct StoredRecord {
    value: Value,
    indexes: Vec<IndexEntry>,
}

impl StoredRecord {
    fn has_entry(&self, index: &str, key: &str) -> bool {
        self.indexes.iter().any(|e| e.name == index && e.key == key)
    }
}

#[derive(Default)]
struct Tables {
    records: HashMap<RecordKey, StoredRecord>,
    indexes: HashMap<IndexKey, BTreeSet<Uuid>>,
}

impl Tables {
    fn apply(&mut self, collection: &'static str, id: Uuid, record: StoredRecord) {
        if let Some(previous) = self.records.get(&(collection, id)) {
            for entry in &previous.indexes {
                let key = (collection, entry.name, entry.key.clone());
                if let Some(ids) = self.indexes.get_mut(&key) {
                    ids.remove(&id);
                    if ids.is_empty() {
                        self.indexes.remove(&key);
                    }
                }
            }
        }

        for entry in &record.indexes {
            self.indexes
                .entry((collection, entry.name, entry.key.clone()))
                .or_default()
                .insert(id);
        }

        self.records.insert((collection, id), record);
    }
}

#[derive(Default)]
struct Inner {
    tables: RwLock<Tables>,
    scopes: StdMutex<HashMap<ScopeKey, Arc<Mutex<()>>>>,
    injected_failures: AtomicU32,
    commits: AtomicU64,
}

impl Inner {
    /// Forgets scope locks nobody holds or waits on. Every clone of a lock is
    /// taken under the `scopes` mutex, so a count of one means the map is the
    /// last owner.
    fn release_scopes(&self, keys: &[ScopeKey]) {
        let Ok(mut scopes) = self.scopes.lock() else {
            return;
        };
        for key in keys {
            if scopes.get(key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
                scopes.remove(key);
            }
        }
    }
}

/// Process-local transactional store.
///
/// Scopes are per-key async mutexes taken in sorted order when a transaction
/// begins, so two transactions naming the same scope run one after the other.
/// Unique index entries are re-checked at commit time.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` commits fail with [`StoreError::Unavailable`].
    pub fn fail_next_commits(&self, count: u32) {
        self.inner.injected_failures.store(count, Ordering::SeqCst);
    }

    pub fn commit_count(&self) -> u64 {
        self.inner.commits.load(Ordering::SeqCst)
    }

    /// Scope locks currently tracked, held or awaited.
    pub fn live_scope_count(&self) -> usize {
        self.inner.scopes.lock().map(|scopes| scopes.len()).unwrap_or_default()
    }

    pub async fn record_count(&self, collection: &str) -> usize {
        let tables = self.inner.tables.read().await;
        tables.records.keys().filter(|(c, _)| *c == collection).count()
    }

    fn scope_lock(&self, key: &ScopeKey) -> Result<Arc<Mutex<()>>, StoreError> {
        let mut scopes = self
            .inner
            .scopes
            .lock()
            .map_err(|_| StoreError::Unavailable("scope table poisoned".to_string()))?;
        Ok(scopes.entry(key.clone()).or_default().clone())
    }
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn begin(&self, mut scopes: Vec<ScopeKey>) -> Result<Box<dyn Transaction>, StoreError> {
        scopes.sort();
        scopes.dedup();

        // Built before locking so an error or a cancelled wait still releases.
        let mut tx = MemoryTransaction {
            inner: self.inner.clone(),
            guards: Vec::with_capacity(scopes.len()),
            scopes,
            staged: HashMap::new(),
            finished: false,
        };
        for key in &tx.scopes {
            let lock = self.scope_lock(key)?;
            tx.guards.push(lock.lock_owned().await);
        }

        if !tx.scopes.is_empty() {
            debug!("Transaction acquired scopes {:?}", tx.scopes);
        }

        Ok(Box::new(tx))
    }
}

struct MemoryTransaction {
    inner: Arc<Inner>,
    guards: Vec<OwnedMutexGuard<()>>,
    scopes: Vec<ScopeKey>,
    staged: HashMap<RecordKey, StoredRecord>,
    finished: bool,
}

impl MemoryTransaction {
    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.finished {
            return Err(StoreError::Conflict("transaction already finished".to_string()));
        }
        Ok(())
    }

    fn check_unique(&self, tables: &Tables) -> Result<(), StoreError> {
        let mut claimed: HashMap<IndexKey, Uuid> = HashMap::new();

        for ((collection, id), record) in &self.staged {
            for entry in record.indexes.iter().filter(|e| e.unique) {
                let key = (*collection, entry.name, entry.key.clone());

                if let Some(other) = claimed.insert(key.clone(), *id) {
                    if other != *id {
                        return Err(StoreError::Conflict(format!(
                            "{}.{} = {} written twice in one transaction",
                            collection, entry.name, entry.key
                        )));
                    }
                }

                let Some(holders) = tables.indexes.get(&key) else {
                    continue;
                };
                for holder in holders.iter().filter(|h| *h != id) {
                    // The holder only keeps the entry if this transaction leaves it alone.
                    let released = self
                        .staged
                        .get(&(*collection, *holder))
                        .is_some_and(|r| !r.has_entry(entry.name, &entry.key));
                    if !released {
                        return Err(StoreError::Conflict(format!(
                            "{}.{} = {} already taken",
                            collection, entry.name, entry.key
                        )));
                    }
                }
            }
        }

        Ok(())
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        self.guards.clear();
        self.inner.release_scopes(&self.scopes);
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn get(&mut self, collection: &'static str, id: Uuid) -> Result<Option<Value>, StoreError> {
        self.ensure_open()?;
        if let Some(record) = self.staged.get(&(collection, id)) {
            return Ok(Some(record.value.clone()));
        }
        let tables = self.inner.tables.read().await;
        Ok(tables.records.get(&(collection, id)).map(|r| r.value.clone()))
    }

    async fn put(
        &mut self,
        collection: &'static str,
        id: Uuid,
        value: Value,
        indexes: Vec<IndexEntry>,
    ) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.staged.insert((collection, id), StoredRecord { value, indexes });
        Ok(())
    }

    async fn query_by_index(
        &mut self,
        collection: &'static str,
        index: &'static str,
        key: &str,
    ) -> Result<Vec<Value>, StoreError> {
        self.ensure_open()?;
        let tables = self.inner.tables.read().await;

        let mut ids = tables
            .indexes
            .get(&(collection, index, key.to_string()))
            .cloned()
            .unwrap_or_default();

        for ((staged_collection, id), record) in &self.staged {
            if *staged_collection != collection {
                continue;
            }
            if record.has_entry(index, key) {
                ids.insert(*id);
            } else {
                ids.remove(id);
            }
        }

        let values = ids
            .into_iter()
            .filter_map(|id| {
                self.staged
                    .get(&(collection, id))
                    .or_else(|| tables.records.get(&(collection, id)))
                    .map(|r| r.value.clone())
            })
            .collect();

        Ok(values)
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.finished = true;

        let mut tables = self.inner.tables.write().await;

        let injected = self
            .inner
            .injected_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if injected.is_ok() {
            warn!("Commit rejected by injected store failure");
            return Err(StoreError::Unavailable("injected serialization failure".to_string()));
        }

        self.check_unique(&tables)?;

        let staged = std::mem::take(&mut self.staged);
        let writes = staged.len();
        for ((collection, id), record) in staged {
            tables.apply(collection, id, record);
        }

        self.inner.commits.fetch_add(1, Ordering::SeqCst);
        debug!("Committed {} record writes", writes);
        Ok(())
    }
}
