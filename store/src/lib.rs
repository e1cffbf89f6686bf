//! Persistence contracts for the ingestion pipeline.
//!
//! The pipeline only ever talks to the four traits in this crate: credential
//! lookup, atomic group resolution, additive tag indexing, and event
//! reservation/persistence. The in-memory implementations are the reference
//! backend for tests and single-node deployments; database-backed
//! implementations must uphold the same atomicity contracts documented on
//! each trait.

pub mod errors;
pub mod events;
pub mod groups;
pub mod keys;
pub mod tags;
pub mod types;

pub use errors::StoreError;
pub use events::{EventStore, MemoryEventStore};
pub use groups::{GroupStore, MemoryGroupStore};
pub use keys::{KeyStore, MemoryKeyStore};
pub use tags::{MemoryTagStore, TagStore};
