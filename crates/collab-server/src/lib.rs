//! collab-server: Real-time collaborative editing service for form documents.
//!
//! Wires the collab-core CRDT engine into a running service: durable snapshot
//! storage, session authentication, per-change permission gating, a
//! per-document owner actor, metadata debouncing, and the WebSocket
//! transport.

pub mod connection;
pub mod document;
pub mod gate;
pub mod gateway;
pub mod manager;
pub mod metadata_cache;
pub mod server;
pub mod store;

pub use document::{DocCommand, DocumentConfig};
pub use gate::MutationGate;
pub use gateway::{Credentials, PermissionResolver, SessionGateway};
pub use manager::DocumentManager;
pub use metadata_cache::MetadataCache;
pub use store::{FileStore, InMemoryStore, SnapshotStore, StoredSnapshot};
