//! In-memory graph store.
//!
//! All state lives behind one `tokio::sync::RwLock`. A commit applies its
//! changes to a copy of the state and swaps the copy in only when every change
//! succeeded, so a rejected commit leaves nothing behind. Referential
//! integrity is enforced on every change.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

use trellis_core::{
    Association, AssociationGrouping, AssociationId, Document, DocumentId, EntityKind, GroupingId,
    Item, ItemId, ItemType, ItemTypeId, LockTarget, NodeRef, ObjectLock,
};

use crate::client::GraphError;
use crate::store::{Change, ChangeSet, CommitReceipt, GraphStore};

#[derive(Debug, Clone, Default)]
struct State {
    documents: BTreeMap<DocumentId, Document>,
    items: BTreeMap<ItemId, Item>,
    item_types: BTreeMap<ItemTypeId, ItemType>,
    associations: BTreeMap<AssociationId, Association>,
    groupings: BTreeMap<GroupingId, AssociationGrouping>,
    locks: BTreeMap<LockTarget, ObjectLock>,
}

impl State {
    fn apply(&mut self, change: Change, receipt: &mut CommitReceipt) -> Result<(), GraphError> {
        match change {
            Change::PutDocument(doc) => {
                self.documents.insert(doc.id, doc);
            }
            Change::PutItem(item) => {
                self.require_document(item.document)?;
                self.items.insert(item.id, item);
            }
            Change::PutItemType(item_type) => {
                self.item_types.insert(item_type.id, item_type);
            }
            Change::PutAssociation(assoc) => {
                self.require_document(assoc.document)?;
                self.require_endpoint(&assoc.origin)?;
                self.require_endpoint(&assoc.destination)?;
                if let Some(group) = assoc.group {
                    if !self.groupings.contains_key(&group) {
                        return Err(GraphError::Integrity(format!(
                            "referenced grouping {group} does not exist"
                        )));
                    }
                }
                self.associations.insert(assoc.id, assoc);
            }
            Change::PutGrouping(grouping) => {
                self.require_document(grouping.document)?;
                self.groupings.insert(grouping.id, grouping);
            }
            Change::PutLock(lock) => {
                match lock.target {
                    LockTarget::Document(id) => self.require_document(id)?,
                    LockTarget::Item(id) => self.require_item(id)?,
                }
                self.locks.insert(lock.target, lock);
            }
            Change::RemoveDocument(id) => {
                let dangling = self.items.values().any(|i| i.document == id)
                    || self.groupings.values().any(|g| g.document == id)
                    || self.associations.values().any(|a| {
                        a.document == id || a.destination.document_id() == Some(id)
                    })
                    || self.locks.contains_key(&LockTarget::Document(id));
                if dangling {
                    return Err(GraphError::Integrity(format!(
                        "document {id} still has items, groupings, associations or locks"
                    )));
                }
                self.documents.remove(&id);
            }
            Change::RemoveItem(id) => {
                let dangling = self.associations.values().any(|a| a.touches_item(id))
                    || self.locks.contains_key(&LockTarget::Item(id));
                if dangling {
                    return Err(GraphError::Integrity(format!(
                        "item {id} is still referenced by associations or locks"
                    )));
                }
                self.items.remove(&id);
            }
            Change::RemoveAssociation(id) => {
                self.associations.remove(&id);
            }
            Change::RemoveGrouping(id) => {
                if self.associations.values().any(|a| a.group == Some(id)) {
                    return Err(GraphError::Integrity(format!(
                        "grouping {id} is still referenced by associations"
                    )));
                }
                self.groupings.remove(&id);
            }
            Change::RemoveLock(target) => {
                self.locks.remove(&target);
            }
            Change::RemoveAssociationsOfType { origin, assoc_type } => {
                let doomed: Vec<AssociationId> = self
                    .associations
                    .values()
                    .filter(|a| a.assoc_type == assoc_type && a.origin.item_id() == Some(origin))
                    .map(|a| a.id)
                    .collect();
                for id in doomed {
                    if let Some(assoc) = self.associations.remove(&id) {
                        receipt.removed_associations.push(assoc);
                    }
                }
            }
        }
        Ok(())
    }

    fn require_document(&self, id: DocumentId) -> Result<(), GraphError> {
        if self.documents.contains_key(&id) {
            Ok(())
        } else {
            Err(GraphError::Integrity(format!(
                "referenced document {id} does not exist"
            )))
        }
    }

    fn require_item(&self, id: ItemId) -> Result<(), GraphError> {
        if self.items.contains_key(&id) {
            Ok(())
        } else {
            Err(GraphError::Integrity(format!(
                "referenced item {id} does not exist"
            )))
        }
    }

    fn require_endpoint(&self, node: &NodeRef) -> Result<(), GraphError> {
        match node {
            NodeRef::Item { id, .. } => self.require_item(*id),
            NodeRef::Document { id, .. } => self.require_document(*id),
            NodeRef::External { .. } => Ok(()),
        }
    }
}

/// Graph store held entirely in process memory.
#[derive(Debug, Default)]
pub struct MemoryGraphStore {
    state: RwLock<State>,
    counters: RwLock<HashMap<EntityKind, i64>>,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored associations, across all documents.
    pub async fn association_count(&self) -> usize {
        self.state.read().await.associations.len()
    }

    /// Number of stored locks.
    pub async fn lock_count(&self) -> usize {
        self.state.read().await.locks.len()
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn next_id(&self, kind: EntityKind) -> Result<i64, GraphError> {
        let mut counters = self.counters.write().await;
        let counter = counters.entry(kind).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }

    async fn find_document(&self, id: DocumentId) -> Result<Option<Document>, GraphError> {
        Ok(self.state.read().await.documents.get(&id).cloned())
    }

    async fn list_documents(&self) -> Result<Vec<Document>, GraphError> {
        Ok(self.state.read().await.documents.values().cloned().collect())
    }

    async fn find_item(&self, id: ItemId) -> Result<Option<Item>, GraphError> {
        Ok(self.state.read().await.items.get(&id).cloned())
    }

    async fn find_items(&self, document: DocumentId) -> Result<Vec<Item>, GraphError> {
        let state = self.state.read().await;
        Ok(state
            .items
            .values()
            .filter(|i| i.document == document)
            .cloned()
            .collect())
    }

    async fn find_association(
        &self,
        id: AssociationId,
    ) -> Result<Option<Association>, GraphError> {
        Ok(self.state.read().await.associations.get(&id).cloned())
    }

    async fn find_associations_from(&self, item: ItemId) -> Result<Vec<Association>, GraphError> {
        let state = self.state.read().await;
        Ok(state
            .associations
            .values()
            .filter(|a| a.origin.item_id() == Some(item))
            .cloned()
            .collect())
    }

    async fn find_child_associations(
        &self,
        parent_key: &str,
    ) -> Result<Vec<Association>, GraphError> {
        let state = self.state.read().await;
        Ok(state
            .associations
            .values()
            .filter(|a| a.is_child_of() && a.destination.key() == parent_key)
            .cloned()
            .collect())
    }

    async fn find_associations_touching(
        &self,
        document: DocumentId,
    ) -> Result<Vec<Association>, GraphError> {
        let state = self.state.read().await;
        let in_document = |node: &NodeRef| match node {
            NodeRef::Item { id, .. } => state
                .items
                .get(id)
                .map_or(false, |item| item.document == document),
            NodeRef::Document { id, .. } => *id == document,
            NodeRef::External { .. } => false,
        };
        Ok(state
            .associations
            .values()
            .filter(|a| {
                a.document == document || in_document(&a.origin) || in_document(&a.destination)
            })
            .cloned()
            .collect())
    }

    async fn find_grouping(
        &self,
        id: GroupingId,
    ) -> Result<Option<AssociationGrouping>, GraphError> {
        Ok(self.state.read().await.groupings.get(&id).cloned())
    }

    async fn find_groupings(
        &self,
        document: DocumentId,
    ) -> Result<Vec<AssociationGrouping>, GraphError> {
        let state = self.state.read().await;
        Ok(state
            .groupings
            .values()
            .filter(|g| g.document == document)
            .cloned()
            .collect())
    }

    async fn find_item_type_by_code(&self, code: &str) -> Result<Option<ItemType>, GraphError> {
        let state = self.state.read().await;
        Ok(state
            .item_types
            .values()
            .find(|t| t.code == code)
            .cloned())
    }

    async fn find_lock(&self, target: LockTarget) -> Result<Option<ObjectLock>, GraphError> {
        Ok(self.state.read().await.locks.get(&target).cloned())
    }

    async fn commit(&self, changes: ChangeSet) -> Result<CommitReceipt, GraphError> {
        let mut state = self.state.write().await;
        let mut staged = state.clone();
        let mut receipt = CommitReceipt::default();

        for change in changes {
            let kind = change.kind();
            if let Err(e) = staged.apply(change, &mut receipt) {
                tracing::warn!(change = kind, error = %e, "Rejected commit");
                return Err(e);
            }
            receipt.applied += 1;
        }

        *state = staged;
        tracing::debug!(
            applied = receipt.applied,
            removed = receipt.removed_associations.len(),
            "Committed change set"
        );
        Ok(receipt)
    }
}
