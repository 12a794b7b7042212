//! The graph store contract.
//!
//! Stores hold no business rules. Reads are plain finders; every write is a
//! [`Change`] staged into a [`ChangeSet`] and applied by [`GraphStore::commit`],
//! in order, all or nothing.

use async_trait::async_trait;

use trellis_core::{
    Association, AssociationGrouping, AssociationId, AssociationType, Document, DocumentId,
    EntityKind, GroupingId, Item, ItemId, ItemType, LockTarget, ObjectLock,
};

use crate::client::GraphError;

/// One staged write.
#[derive(Debug, Clone)]
pub enum Change {
    PutDocument(Document),
    PutItem(Item),
    PutItemType(ItemType),
    PutAssociation(Association),
    PutGrouping(AssociationGrouping),
    PutLock(ObjectLock),
    RemoveDocument(DocumentId),
    RemoveItem(ItemId),
    RemoveAssociation(AssociationId),
    RemoveGrouping(GroupingId),
    RemoveLock(LockTarget),
    /// Remove every association of `assoc_type` whose origin is the item.
    RemoveAssociationsOfType {
        origin: ItemId,
        assoc_type: AssociationType,
    },
}

impl Change {
    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PutDocument(_) => "put_document",
            Self::PutItem(_) => "put_item",
            Self::PutItemType(_) => "put_item_type",
            Self::PutAssociation(_) => "put_association",
            Self::PutGrouping(_) => "put_grouping",
            Self::PutLock(_) => "put_lock",
            Self::RemoveDocument(_) => "remove_document",
            Self::RemoveItem(_) => "remove_item",
            Self::RemoveAssociation(_) => "remove_association",
            Self::RemoveGrouping(_) => "remove_grouping",
            Self::RemoveLock(_) => "remove_lock",
            Self::RemoveAssociationsOfType { .. } => "remove_associations_of_type",
        }
    }
}

/// An ordered batch of changes committed as one unit.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    changes: Vec<Change>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, change: Change) {
        self.changes.push(change);
    }

    pub fn with(mut self, change: Change) -> Self {
        self.changes.push(change);
        self
    }

    /// Append every change of `other`, keeping its order.
    pub fn append(&mut self, other: ChangeSet) {
        self.changes.extend(other.changes);
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Change> {
        self.changes.iter()
    }
}

impl From<Change> for ChangeSet {
    fn from(change: Change) -> Self {
        Self {
            changes: vec![change],
        }
    }
}

impl IntoIterator for ChangeSet {
    type Item = Change;
    type IntoIter = std::vec::IntoIter<Change>;

    fn into_iter(self) -> Self::IntoIter {
        self.changes.into_iter()
    }
}

/// Outcome of a successful commit.
#[derive(Debug, Clone, Default)]
pub struct CommitReceipt {
    /// Number of changes applied.
    pub applied: usize,
    /// Associations removed by `RemoveAssociationsOfType`, in removal order.
    pub removed_associations: Vec<Association>,
}

/// Persistence contract for the association graph.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Allocate the next numeric id for an entity family.
    async fn next_id(&self, kind: EntityKind) -> Result<i64, GraphError>;

    async fn find_document(&self, id: DocumentId) -> Result<Option<Document>, GraphError>;
    async fn list_documents(&self) -> Result<Vec<Document>, GraphError>;

    async fn find_item(&self, id: ItemId) -> Result<Option<Item>, GraphError>;
    async fn find_items(&self, document: DocumentId) -> Result<Vec<Item>, GraphError>;

    async fn find_association(&self, id: AssociationId)
        -> Result<Option<Association>, GraphError>;

    /// Associations whose origin is the item.
    async fn find_associations_from(&self, item: ItemId) -> Result<Vec<Association>, GraphError>;

    /// `CHILD_OF` associations whose destination key is `parent_key`: the
    /// parent's children.
    async fn find_child_associations(
        &self,
        parent_key: &str,
    ) -> Result<Vec<Association>, GraphError>;

    /// Associations owned by the document or with an endpoint in it.
    async fn find_associations_touching(
        &self,
        document: DocumentId,
    ) -> Result<Vec<Association>, GraphError>;

    async fn find_grouping(&self, id: GroupingId)
        -> Result<Option<AssociationGrouping>, GraphError>;
    async fn find_groupings(
        &self,
        document: DocumentId,
    ) -> Result<Vec<AssociationGrouping>, GraphError>;

    async fn find_item_type_by_code(&self, code: &str) -> Result<Option<ItemType>, GraphError>;

    async fn find_lock(&self, target: LockTarget) -> Result<Option<ObjectLock>, GraphError>;

    /// Apply the changes in order. Either every change applies or none does.
    async fn commit(&self, changes: ChangeSet) -> Result<CommitReceipt, GraphError>;

    /// Commit a single change.
    async fn persist(&self, change: Change) -> Result<CommitReceipt, GraphError> {
        self.commit(ChangeSet::from(change)).await
    }

    /// Remove every association of the type originating at the item and
    /// return what was removed.
    async fn remove_all_associations_of_type(
        &self,
        item: ItemId,
        assoc_type: AssociationType,
    ) -> Result<Vec<Association>, GraphError> {
        let receipt = self
            .persist(Change::RemoveAssociationsOfType {
                origin: item,
                assoc_type,
            })
            .await?;
        Ok(receipt.removed_associations)
    }
}
