// libs/shared/database/src/store.rs
use std::fmt;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use shared_models::LifecycleError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The atomic unit lost a race (unique index clash, serialization failure).
    #[error("Write conflict: {0}")]
    Conflict(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Conflict(_) | StoreError::Unavailable(_))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Corrupt(err.to_string())
    }
}

impl From<StoreError> for LifecycleError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(msg) | StoreError::Unavailable(msg) => LifecycleError::StoreUnavailable(msg),
            StoreError::Corrupt(msg) => LifecycleError::Storage(msg),
        }
    }
}

/// Name of a serialization unit. A transaction holds every scope it was opened
/// with until it commits or is dropped.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScopeKey(String);

impl ScopeKey {
    pub fn new(kind: &str, id: impl fmt::Display) -> Self {
        Self(format!("{}:{}", kind, id))
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub name: &'static str,
    pub key: String,
    pub unique: bool,
}

impl IndexEntry {
    pub fn lookup(name: &'static str, key: impl fmt::Display) -> Self {
        Self { name, key: key.to_string(), unique: false }
    }

    pub fn unique(name: &'static str, key: impl fmt::Display) -> Self {
        Self { name, key: key.to_string(), unique: true }
    }
}

/// An entity the store can persist: a collection name, a primary key and the
/// secondary index entries it should be reachable under.
pub trait Record: Serialize + DeserializeOwned + Send + Sync {
    const COLLECTION: &'static str;

    fn record_id(&self) -> Uuid;

    fn index_entries(&self) -> Vec<IndexEntry>;
}

/// One atomic unit of work. Writes stay private to the transaction until
/// `commit` succeeds; dropping the transaction discards them.
#[async_trait]
pub trait Transaction: Send {
    async fn get(&mut self, collection: &'static str, id: Uuid) -> Result<Option<Value>, StoreError>;

    async fn put(
        &mut self,
        collection: &'static str,
        id: Uuid,
        value: Value,
        indexes: Vec<IndexEntry>,
    ) -> Result<(), StoreError>;

    async fn query_by_index(
        &mut self,
        collection: &'static str,
        index: &'static str,
        key: &str,
    ) -> Result<Vec<Value>, StoreError>;

    async fn commit(&mut self) -> Result<(), StoreError>;
}

/// Storage capability injected into the engine.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Opens a transaction, blocking until every scope is held.
    async fn begin(&self, scopes: Vec<ScopeKey>) -> Result<Box<dyn Transaction>, StoreError>;
}

/// Typed handle over a [`Transaction`].
pub struct StoreTx {
    inner: Box<dyn Transaction>,
    scopes: Vec<ScopeKey>,
}

impl StoreTx {
    pub async fn begin(store: &dyn RecordStore, scopes: Vec<ScopeKey>) -> Result<Self, StoreError> {
        let inner = store.begin(scopes.clone()).await?;
        Ok(Self { inner, scopes })
    }

    /// A transaction with no scopes, for read-only queries.
    pub async fn read_only(store: &dyn RecordStore) -> Result<Self, StoreError> {
        Self::begin(store, Vec::new()).await
    }

    pub fn holds(&self, scope: &ScopeKey) -> bool {
        self.scopes.contains(scope)
    }

    pub async fn get<R: Record>(&mut self, id: Uuid) -> Result<Option<R>, StoreError> {
        match self.inner.get(R::COLLECTION, id).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub async fn put<R: Record>(&mut self, record: &R) -> Result<(), StoreError> {
        let value = serde_json::to_value(record)?;
        self.inner
            .put(R::COLLECTION, record.record_id(), value, record.index_entries())
            .await
    }

    pub async fn query<R: Record>(&mut self, index: &'static str, key: &str) -> Result<Vec<R>, StoreError> {
        self.inner
            .query_by_index(R::COLLECTION, index, key)
            .await?
            .into_iter()
            .map(|value| serde_json::from_value(value).map_err(StoreError::from))
            .collect()
    }

    pub async fn commit(mut self) -> Result<(), StoreError> {
        self.inner.commit().await
    }
}
