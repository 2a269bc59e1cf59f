//! collab-core: Shared library for real-time collaborative form editing using Loro CRDTs.
//!
//! This crate provides the core functionality for:
//! - Managing Loro documents for form definitions (pages, fields, layout)
//! - Converting between the CRDT tree and the plain form schema value
//! - The binary sync protocol exchanged with editor sessions
//! - Session/permission types and aggregate metadata extraction

pub mod codec;
pub mod events;
pub mod metadata;
pub mod protocol;
pub mod replica;
pub mod schema;
pub mod session;

pub use codec::{from_schema, seed_empty, to_schema};
pub use events::{CollabEvent, EventBus, Subscription};
pub use metadata::FormMetadata;
pub use protocol::SyncMessage;
pub use replica::{ChangeSet, FormReplica};
pub use schema::{Field, FillableField, FormSchema, Layout, Page, Validation};
pub use session::{PermissionLevel, Session};
