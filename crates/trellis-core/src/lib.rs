//! trellis-core: Shared types, configuration, and error handling for Trellis.
//!
//! This crate provides the foundational types used across all Trellis components:
//! - Documents, items, item types, and association groupings
//! - Associations (typed, directed edges) and their endpoints
//! - Object locks and users
//! - The external-document registry stored in document attributes
//! - Domain events for the notification collaborator
//! - Configuration management
//! - Common error types

pub mod config;
pub mod error;
pub mod events;
pub mod registry;
pub mod types;

pub use config::{BatchPolicy, TrellisConfig};
pub use error::{Result, TrellisError};
pub use events::{ChangeKey, DomainEvent, EntityRef, EventCode, EventSink};
pub use registry::{ExternalDoc, ExternalDocRegistry};
pub use types::{
    AdoptionStatus, Association, AssociationGrouping, AssociationId, AssociationType, Document,
    DocumentId, EntityKind, GroupingId, Item, ItemId, ItemType, ItemTypeId, LockTarget, NodeRef,
    ObjectLock, OrganizationId, Owner, Ownership, User, UserId,
};
