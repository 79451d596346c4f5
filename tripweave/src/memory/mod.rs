//! # Memory: typed records, caching, conversation continuity, learning
//!
//! The memory subsystem keeps four type-partitioned in-memory stores
//! (episodic / semantic / procedural / working) with a tag index, per-agent
//! learning metrics, and user preferences, all behind one lock so indexes
//! stay consistent with storage.
//!
//! Persistence is optional and best-effort: when a [`DocumentStore`] is
//! attached, every write goes through to it, and conversation queries prefer
//! it; when it is absent or unreachable, every operation still succeeds
//! in-memory (failures are logged, never raised).
//!
//! | Type                  | Persistence | Use case              |
//! |-----------------------|-------------|-----------------------|
//! | [`MemorySystem`]      | optional    | always                |
//! | [`SqliteDocumentStore`] | SQLite file | single-node, production |

mod document_store;
mod entry;
mod sqlite_store;
mod system;

pub use document_store::{DocumentStore, MemoryOrder, MemoryQuery, StoreError};
pub use entry::{
    ConversationTurn, LearningMetrics, MemoryEntry, MemoryKind, UserPreference,
};
pub use sqlite_store::SqliteDocumentStore;
pub use system::{make_fingerprint, memory_id, MemorySystem};
