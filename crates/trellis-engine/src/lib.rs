//! trellis-engine: the association graph engine for competency frameworks.
//!
//! Reads and writes documents, items and associations through a
//! [`GraphStore`], orders siblings, rebuilds trees from `CHILD_OF` edges,
//! applies batched structural edits, copies subtrees and whole documents,
//! and guards edit sessions with advisory locks. Domain events go to an
//! [`EventSink`].

pub mod association;
pub mod copy;
pub mod identity;
pub mod lifecycle;
pub mod lock;
pub mod sequence;
pub mod session;
pub mod tree;
pub mod tree_update;

pub use association::{EndpointSpec, Parent};
pub use copy::SubtreeCopy;
pub use identity::{Identity, StaticIdentity};
pub use lock::LockManager;
pub use sequence::SequenceAllocator;
pub use session::EditSession;
pub use tree::{DocumentTree, OrderedSiblings, Sibling, SiblingKey, TreeNode};
pub use tree_update::{
    ChangeLog, DeleteChildOf, NewChildOf, ParentKind, TreeItemResult, TreeItemUpdate,
    TreeUpdateOutcome, UpdateChildOf,
};

use std::sync::Arc;

use chrono::Duration;

use trellis_core::events::NullSink;
use trellis_core::{
    Document, DocumentId, DomainEvent, EntityKind, EventSink, Item, ItemId, Result, TrellisConfig,
    TrellisError,
};
use trellis_graph::GraphStore;

/// Entry point for every engine operation.
///
/// Cheap to share behind an `Arc`; holds no per-session state.
pub struct FrameworkEngine {
    store: Arc<dyn GraphStore>,
    locks: LockManager,
    identity: Arc<dyn Identity>,
    events: Arc<dyn EventSink>,
    config: TrellisConfig,
}

impl FrameworkEngine {
    /// An engine with default configuration, no current user and no event sink.
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        let config = TrellisConfig::default();
        Self {
            locks: LockManager::new(store.clone(), lock_ttl(&config)),
            store,
            identity: Arc::new(StaticIdentity::anonymous()),
            events: Arc::new(NullSink),
            config,
        }
    }

    pub fn with_identity(mut self, identity: Arc<dyn Identity>) -> Self {
        self.identity = identity;
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Apply configuration. Rebuilds the lock manager with the configured ttl.
    pub fn with_config(mut self, config: TrellisConfig) -> Self {
        self.locks = LockManager::new(self.store.clone(), lock_ttl(&config));
        self.config = config;
        self
    }

    pub fn store(&self) -> &dyn GraphStore {
        self.store.as_ref()
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    pub fn identity(&self) -> &dyn Identity {
        self.identity.as_ref()
    }

    pub fn config(&self) -> &TrellisConfig {
        &self.config
    }

    pub(crate) fn emit(&self, event: DomainEvent) {
        self.events.emit(event);
    }

    pub(crate) async fn next_id(&self, kind: EntityKind) -> Result<i64> {
        Ok(self.store.next_id(kind).await?)
    }

    pub(crate) async fn require_document(&self, id: DocumentId) -> Result<Document> {
        self.store
            .find_document(id)
            .await?
            .ok_or_else(|| TrellisError::not_found("Document", id))
    }

    pub(crate) async fn require_item(&self, id: ItemId) -> Result<Item> {
        self.store
            .find_item(id)
            .await?
            .ok_or_else(|| TrellisError::not_found("Item", id))
    }
}

fn lock_ttl(config: &TrellisConfig) -> Duration {
    let secs = i64::try_from(config.locks.ttl_secs).unwrap_or(lock::DEFAULT_TTL_SECS);
    Duration::seconds(secs)
}
