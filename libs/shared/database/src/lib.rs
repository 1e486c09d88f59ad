pub mod memory;
pub mod store;

pub use memory::InMemoryStore;
pub use store::{IndexEntry, Record, RecordStore, ScopeKey, StoreError, StoreTx, Transaction};
