//! EmbeddingStore: the shared, project-scoped vector store.
//!
//! The store talks to a [`StorageEngine`]: LanceDB in production, or the
//! in-memory engine in tests.

pub mod columns;
pub mod engine;
pub mod lance;
pub mod memory;
pub mod records;
pub mod schema;
pub mod store;

pub use engine::{Connector, Filter, HybridQuery, IndexSpec, StorageEngine};
pub use lance::{LanceConnector, LanceEngine};
pub use memory::{MemoryConnector, MemoryEngine};
pub use records::{CommentRecord, DocChunkRecord, FileRecord, ScopedRecord};
pub use schema::{Table, EMBEDDING_DIM, SCOPE_COLUMN};
pub use store::{choose_strategy, CompactionOutcome, EmbeddingStore, IndexOutcome, IndexStrategy, StoreStatus};
