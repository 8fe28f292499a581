pub mod memory;
pub mod models;
pub mod store;
pub mod wire;

pub use memory::{MemorySession, MemoryStore};
pub use store::{ChangeKind, RecordStore, StoreError, Subscription, TaskChange};
