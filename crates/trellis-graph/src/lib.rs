//! Trellis Graph: persistence for the association graph.
//!
//! Every read and write of documents, items, associations, groupings and
//! locks flows through the [`GraphStore`] contract. Writes are staged into a
//! [`ChangeSet`] and flushed atomically by [`GraphStore::commit`].

pub mod client;
pub mod memory;
pub mod mutations;
pub mod queries;
pub mod store;

pub use client::{GraphClient, GraphConfig, GraphError, Neo4jGraphStore};
pub use memory::MemoryGraphStore;
pub use store::{Change, ChangeSet, CommitReceipt, GraphStore};
