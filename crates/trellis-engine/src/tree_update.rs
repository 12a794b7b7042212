//! Batched structural edits of a document tree.
//!
//! A batch maps client keys to [`TreeItemUpdate`]s and is processed in key
//! order. Under [`BatchPolicy::PerKey`] every key commits on its own and a
//! failing key is reported without affecting the others. Under
//! [`BatchPolicy::AllOrNothing`] every key is staged into one change set and
//! the first failure aborts the whole batch.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use trellis_core::events::{ChangeKey, DomainEvent, EntityRef, EventCode};
use trellis_core::{
    Association, AssociationId, AssociationType, BatchPolicy, Document, DocumentId, GroupingId,
    Item, ItemId, Result, TrellisError,
};
use trellis_graph::{Change, ChangeSet};

use crate::association::Parent;
use crate::sequence::SequenceAllocator;
use crate::FrameworkEngine;

// ── Requests ──────────────────────────────────────────────────────

/// Which `CHILD_OF` edges of the item to remove.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeleteChildOf {
    /// One edge by id. An unknown id is ignored.
    Association(AssociationId),
    /// Every `CHILD_OF` edge whose origin is the item.
    All,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpdateChildOf {
    pub assoc_id: AssociationId,
    pub sequence_number: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ParentKind {
    Item,
    Document,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewChildOf {
    pub parent_kind: ParentKind,
    pub parent_id: i64,
    /// Used as given. Without one, the session allocator picks the next.
    #[serde(default)]
    pub sequence_number: Option<i64>,
}

impl NewChildOf {
    fn parent(&self) -> Parent {
        match self.parent_kind {
            ParentKind::Item => Parent::Item(ItemId(self.parent_id)),
            ParentKind::Document => Parent::Document(DocumentId(self.parent_id)),
        }
    }
}

/// Edits for one item of the tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TreeItemUpdate {
    /// Client-side key echoed back in the result.
    #[serde(default)]
    pub original_key: Option<String>,
    /// Edit a deep copy of this item instead of the keyed item.
    #[serde(default)]
    pub copy_from_id: Option<ItemId>,
    /// Prefix the copy's statements with the configured copy marker.
    #[serde(default)]
    pub add_copy_to_title: bool,
    /// Grouping applied to copied and new edges.
    #[serde(default)]
    pub assoc_group: Option<GroupingId>,
    #[serde(default)]
    pub delete_child_of: Option<DeleteChildOf>,
    /// Ignored when `delete_child_of` is present.
    #[serde(default)]
    pub update_child_of: Option<UpdateChildOf>,
    #[serde(default)]
    pub new_child_of: Option<NewChildOf>,
}

// ── Results ───────────────────────────────────────────────────────

/// What happened to one key.
#[derive(Debug, Clone, Serialize)]
pub struct TreeItemResult {
    pub item: ItemId,
    pub identifier: Uuid,
    pub full_statement: String,
    pub original_key: Option<String>,
    /// Whether `item` is a fresh copy.
    pub copied: bool,
    /// The edge created or re-sequenced for this key.
    pub association: Option<Association>,
    pub sequence_number: Option<i64>,
    pub deleted_child_of: Option<AssociationId>,
}

/// Association changes of a batch, id to identifier.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ChangeLog {
    #[serde(rename = "assoc-a", skip_serializing_if = "BTreeMap::is_empty")]
    pub added: BTreeMap<AssociationId, Uuid>,
    #[serde(rename = "assoc-u", skip_serializing_if = "BTreeMap::is_empty")]
    pub updated: BTreeMap<AssociationId, Uuid>,
    #[serde(rename = "assoc-d", skip_serializing_if = "BTreeMap::is_empty")]
    pub deleted: BTreeMap<AssociationId, Uuid>,
}

impl ChangeLog {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    fn merge(&mut self, other: ChangeLog) {
        self.added.extend(other.added);
        self.updated.extend(other.updated);
        self.deleted.extend(other.deleted);
    }

    fn refs(bucket: &BTreeMap<AssociationId, Uuid>) -> Vec<EntityRef> {
        bucket
            .iter()
            .map(|(id, ident)| EntityRef::new(id.0, ident))
            .collect()
    }
}

/// Outcome of a whole batch.
#[derive(Debug, Default)]
pub struct TreeUpdateOutcome {
    pub results: BTreeMap<String, Result<TreeItemResult>>,
    pub changes: ChangeLog,
}

impl TreeUpdateOutcome {
    pub fn succeeded(&self) -> impl Iterator<Item = (&String, &TreeItemResult)> {
        self.results
            .iter()
            .filter_map(|(key, r)| r.as_ref().ok().map(|r| (key, r)))
    }

    pub fn failures(&self) -> impl Iterator<Item = (&String, &TrellisError)> {
        self.results
            .iter()
            .filter_map(|(key, r)| r.as_ref().err().map(|e| (key, e)))
    }
}

/// One key, staged but not committed.
struct StagedKey {
    result: TreeItemResult,
    changes: ChangeSet,
    log: ChangeLog,
}

impl FrameworkEngine {
    /// Apply a batch of tree edits to `document`.
    ///
    /// Returns `Err` only when the document is missing or, under
    /// `AllOrNothing`, when any key fails.
    pub async fn update_tree_items(
        &self,
        document: DocumentId,
        allocator: &mut SequenceAllocator,
        updates: BTreeMap<String, TreeItemUpdate>,
    ) -> Result<TreeUpdateOutcome> {
        let doc = self.require_document(document).await?;
        let policy = self.config().batch.policy;
        let mut outcome = TreeUpdateOutcome::default();

        match policy {
            BatchPolicy::PerKey => {
                for (key, update) in &updates {
                    let result = match self.stage_tree_item(&doc, allocator, key, update).await {
                        Ok(staged) => match self.store().commit(staged.changes).await {
                            Ok(_) => {
                                outcome.changes.merge(staged.log);
                                Ok(staged.result)
                            }
                            Err(e) => Err(TrellisError::from(e)),
                        },
                        Err(e) => Err(e),
                    };
                    if let Err(e) = &result {
                        tracing::warn!(document = %document, key = %key, error = %e, "Tree update failed for key");
                    }
                    outcome.results.insert(key.clone(), result);
                }
            }
            BatchPolicy::AllOrNothing => {
                let mut changes = ChangeSet::new();
                let mut log = ChangeLog::default();
                let mut results = BTreeMap::new();
                for (key, update) in &updates {
                    let staged = self
                        .stage_tree_item(&doc, allocator, key, update)
                        .await
                        .map_err(|e| {
                            tracing::warn!(document = %document, key = %key, error = %e, "Tree update batch aborted");
                            e
                        })?;
                    changes.append(staged.changes);
                    log.merge(staged.log);
                    results.insert(key.clone(), Ok(staged.result));
                }
                self.store().commit(changes).await?;
                outcome.results = results;
                outcome.changes = log;
            }
        }

        let succeeded = outcome.succeeded().count();
        tracing::info!(
            document = %document,
            keys = updates.len(),
            succeeded,
            added = outcome.changes.added.len(),
            updated = outcome.changes.updated.len(),
            deleted = outcome.changes.deleted.len(),
            "Updated tree items"
        );

        if succeeded > 0 {
            let mut event = DomainEvent::new(EventCode::I06, "Tree updated")
                .with_subject(EntityRef::new(doc.id.0, doc.identifier))
                .with_changes(ChangeKey::AssocAdded, ChangeLog::refs(&outcome.changes.added))
                .with_changes(ChangeKey::AssocUpdated, ChangeLog::refs(&outcome.changes.updated))
                .with_changes(ChangeKey::AssocDeleted, ChangeLog::refs(&outcome.changes.deleted));
            for (_, r) in outcome.succeeded().filter(|(_, r)| r.copied) {
                event = event.with_change(ChangeKey::ItemAdded, EntityRef::new(r.item.0, r.identifier));
            }
            self.emit(event);
        }
        Ok(outcome)
    }

    async fn stage_tree_item(
        &self,
        doc: &Document,
        allocator: &mut SequenceAllocator,
        key: &str,
        update: &TreeItemUpdate,
    ) -> Result<StagedKey> {
        let mut changes = ChangeSet::new();
        let mut log = ChangeLog::default();

        if let Some(group) = update.assoc_group {
            self.require_grouping_of(group, doc.id).await?;
        }

        // ── Target item ──────────────────────────────────────────
        let (mut item, copied): (Item, bool) = match update.copy_from_id {
            Some(source) => {
                let prefix = update
                    .add_copy_to_title
                    .then_some(self.config().copy.title_prefix.as_str());
                let copy = self
                    .stage_subtree_copy(source, doc.id, update.assoc_group, prefix)
                    .await?;
                for assoc in &copy.associations {
                    log.added.insert(assoc.id, assoc.identifier);
                }
                changes.append(copy.changes);
                (copy.root, true)
            }
            None => (self.require_item(key.parse::<ItemId>()?).await?, false),
        };

        let mut result = TreeItemResult {
            item: item.id,
            identifier: item.identifier,
            full_statement: item.full_statement.clone(),
            original_key: update.original_key.clone(),
            copied,
            association: None,
            sequence_number: None,
            deleted_child_of: None,
        };

        // ── Remove or re-sequence existing edges ─────────────────
        match (update.delete_child_of, update.update_child_of) {
            (Some(DeleteChildOf::Association(id)), _) => {
                if let Some(assoc) = self.store().find_association(id).await? {
                    require_own_child_of(&assoc, doc.id)?;
                    changes.push(Change::RemoveAssociation(id));
                    log.deleted.insert(assoc.id, assoc.identifier);
                    result.deleted_child_of = Some(id);
                }
            }
            (Some(DeleteChildOf::All), _) => {
                for assoc in self
                    .store()
                    .find_associations_from(item.id)
                    .await?
                    .into_iter()
                    .filter(Association::is_child_of)
                {
                    log.deleted.insert(assoc.id, assoc.identifier);
                }
                changes.push(Change::RemoveAssociationsOfType {
                    origin: item.id,
                    assoc_type: AssociationType::ChildOf,
                });
            }
            (None, Some(UpdateChildOf {
                assoc_id,
                sequence_number,
            })) => {
                if let Some(mut assoc) = self.store().find_association(assoc_id).await? {
                    require_own_child_of(&assoc, doc.id)?;
                    if assoc.sequence_number != Some(sequence_number) {
                        assoc.sequence_number = Some(sequence_number);
                        assoc.updated_at = Utc::now();
                        log.updated.insert(assoc.id, assoc.identifier);
                        changes.push(Change::PutAssociation(assoc.clone()));
                        result.association = Some(assoc);
                        result.sequence_number = Some(sequence_number);
                    }
                }
            }
            (None, None) => {}
        }

        // ── Attach under a new parent ────────────────────────────
        if let Some(new_child_of) = update.new_child_of {
            let (destination, _) = self.resolve_parent(new_child_of.parent()).await?;
            let sequence = match new_child_of.sequence_number {
                Some(seq) => seq,
                None => {
                    allocator
                        .next_sequence(self.store(), &destination.key())
                        .await?
                }
            };
            let mut assoc = self
                .new_association(doc.id, AssociationType::ChildOf, item.node_ref(), destination)
                .await?;
            assoc.sequence_number = Some(sequence);
            assoc.group = update.assoc_group;

            log.added.insert(assoc.id, assoc.identifier);
            changes.push(Change::PutAssociation(assoc.clone()));
            result.association = Some(assoc);
            result.sequence_number = Some(sequence);
        }

        if !copied {
            item.touch();
            changes.push(Change::PutItem(item));
        }

        tracing::debug!(key, item = %result.item, copied, changes = changes.len(), "Staged tree item");
        Ok(StagedKey {
            result,
            changes,
            log,
        })
    }
}

/// Only `CHILD_OF` edges owned by the edited document may be removed or
/// re-sequenced through a tree update.
fn require_own_child_of(assoc: &Association, document: DocumentId) -> Result<()> {
    if !assoc.is_child_of() {
        return Err(TrellisError::invalid(format!(
            "association {} is {}, not CHILD_OF",
            assoc.id, assoc.assoc_type
        )));
    }
    if assoc.document != document {
        return Err(TrellisError::invalid(format!(
            "association {} belongs to document {}, not {document}",
            assoc.id, assoc.document
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use trellis_core::events::ChannelSink;
    use trellis_core::{EntityKind, TrellisConfig};
    use trellis_graph::{GraphStore, MemoryGraphStore};

    struct Fixture {
        engine: FrameworkEngine,
        store: Arc<MemoryGraphStore>,
        doc: Document,
        /// Top-level items A (seq 1) and B (seq 2); C under A (seq 1).
        items: Vec<Item>,
        edges: Vec<Association>,
    }

    async fn fixture(policy: BatchPolicy) -> Fixture {
        let store = Arc::new(MemoryGraphStore::new());
        let mut config = TrellisConfig::default();
        config.batch.policy = policy;
        let engine = FrameworkEngine::new(store.clone()).with_config(config);

        let doc = Document::new(DocumentId(store.next_id(EntityKind::Document).await.unwrap()), "Math");
        let mut changes = ChangeSet::new().with(Change::PutDocument(doc.clone()));
        let mut items = Vec::new();
        for stmt in ["A", "B", "C"] {
            let item = Item::new(ItemId(store.next_id(EntityKind::Item).await.unwrap()), doc.id, stmt);
            changes.push(Change::PutItem(item.clone()));
            items.push(item);
        }
        let mut edges = Vec::new();
        for (child, parent, seq) in [
            (0, doc.node_ref(), 1),
            (1, doc.node_ref(), 2),
            (2, items[0].node_ref(), 1),
        ] {
            let mut assoc = Association::new(
                AssociationId(store.next_id(EntityKind::Association).await.unwrap()),
                doc.id,
                AssociationType::ChildOf,
                items[child].node_ref(),
                parent,
            );
            assoc.sequence_number = Some(seq);
            changes.push(Change::PutAssociation(assoc.clone()));
            edges.push(assoc);
        }
        store.commit(changes).await.unwrap();
        Fixture {
            engine,
            store,
            doc,
            items,
            edges,
        }
    }

    fn batch(entries: Vec<(String, TreeItemUpdate)>) -> BTreeMap<String, TreeItemUpdate> {
        entries.into_iter().collect()
    }

    #[tokio::test]
    async fn move_item_under_another_parent() {
        let f = fixture(BatchPolicy::PerKey).await;
        let c = &f.items[2];
        let update = TreeItemUpdate {
            delete_child_of: Some(DeleteChildOf::Association(f.edges[2].id)),
            new_child_of: Some(NewChildOf {
                parent_kind: ParentKind::Item,
                parent_id: f.items[1].id.0,
                sequence_number: Some(5),
            }),
            ..Default::default()
        };
        let mut alloc = SequenceAllocator::new();
        let outcome = f
            .engine
            .update_tree_items(f.doc.id, &mut alloc, batch(vec![(c.id.to_string(), update)]))
            .await
            .unwrap();

        let result = outcome.results[&c.id.to_string()].as_ref().unwrap();
        assert_eq!(result.deleted_child_of, Some(f.edges[2].id));
        assert_eq!(result.sequence_number, Some(5));
        assert!(outcome.changes.deleted.contains_key(&f.edges[2].id));
        assert_eq!(outcome.changes.added.len(), 1);

        assert!(f.engine.children_of(f.items[0].id).await.unwrap().is_empty());
        let under_b = f.engine.children_of(f.items[1].id).await.unwrap();
        assert_eq!(under_b.items().map(|i| i.id).collect::<Vec<_>>(), vec![c.id]);
        assert_eq!(under_b.iter().next().unwrap().association.sequence_number, Some(5));
    }

    #[tokio::test]
    async fn unchanged_sequence_is_a_no_op() {
        let f = fixture(BatchPolicy::PerKey).await;
        let a = &f.items[0];
        let mut alloc = SequenceAllocator::new();
        let same = TreeItemUpdate {
            update_child_of: Some(UpdateChildOf {
                assoc_id: f.edges[0].id,
                sequence_number: 1,
            }),
            ..Default::default()
        };
        let outcome = f
            .engine
            .update_tree_items(f.doc.id, &mut alloc, batch(vec![(a.id.to_string(), same)]))
            .await
            .unwrap();
        assert!(outcome.changes.is_empty());
        assert!(outcome.results[&a.id.to_string()].as_ref().unwrap().association.is_none());

        let moved = TreeItemUpdate {
            update_child_of: Some(UpdateChildOf {
                assoc_id: f.edges[0].id,
                sequence_number: 3,
            }),
            ..Default::default()
        };
        let outcome = f
            .engine
            .update_tree_items(f.doc.id, &mut alloc, batch(vec![(a.id.to_string(), moved)]))
            .await
            .unwrap();
        assert!(outcome.changes.updated.contains_key(&f.edges[0].id));
        let top = f.engine.build_top_level_sequence(f.doc.id).await.unwrap();
        assert_eq!(top.items().map(|i| i.id).collect::<Vec<_>>(), vec![f.items[1].id, a.id]);
    }

    #[tokio::test]
    async fn delete_all_removes_every_parent_edge() {
        let f = fixture(BatchPolicy::PerKey).await;
        let c = &f.items[2];
        // A second parent for C.
        let mut extra = Association::new(
            AssociationId(500),
            f.doc.id,
            AssociationType::ChildOf,
            c.node_ref(),
            f.items[1].node_ref(),
        );
        extra.sequence_number = Some(1);
        f.store.persist(Change::PutAssociation(extra)).await.unwrap();

        let update = TreeItemUpdate {
            delete_child_of: Some(DeleteChildOf::All),
            ..Default::default()
        };
        let mut alloc = SequenceAllocator::new();
        let outcome = f
            .engine
            .update_tree_items(f.doc.id, &mut alloc, batch(vec![(c.id.to_string(), update)]))
            .await
            .unwrap();
        assert_eq!(outcome.changes.deleted.len(), 2);
        assert!(f
            .store
            .find_associations_from(c.id)
            .await
            .unwrap()
            .iter()
            .all(|a| !a.is_child_of()));
    }

    #[tokio::test]
    async fn unknown_delete_id_does_nothing() {
        let f = fixture(BatchPolicy::PerKey).await;
        let a = &f.items[0];
        let update = TreeItemUpdate {
            delete_child_of: Some(DeleteChildOf::Association(AssociationId(9999))),
            ..Default::default()
        };
        let mut alloc = SequenceAllocator::new();
        let before = f.store.association_count().await;
        let outcome = f
            .engine
            .update_tree_items(f.doc.id, &mut alloc, batch(vec![(a.id.to_string(), update)]))
            .await
            .unwrap();
        let result = outcome.results[&a.id.to_string()].as_ref().unwrap();
        assert!(result.deleted_child_of.is_none());
        assert_eq!(f.store.association_count().await, before);
    }

    #[tokio::test]
    async fn copy_gets_new_identifier_and_leaves_source_edges() {
        let f = fixture(BatchPolicy::PerKey).await;
        let (tx, mut rx) = ChannelSink::new();
        let engine = FrameworkEngine::new(f.store.clone()).with_events(Arc::new(tx));
        let a = &f.items[0];
        let update = TreeItemUpdate {
            original_key: Some("tmp-1".into()),
            copy_from_id: Some(a.id),
            add_copy_to_title: true,
            new_child_of: Some(NewChildOf {
                parent_kind: ParentKind::Document,
                parent_id: f.doc.id.0,
                sequence_number: None,
            }),
            ..Default::default()
        };
        let mut alloc = SequenceAllocator::new();
        let outcome = engine
            .update_tree_items(f.doc.id, &mut alloc, batch(vec![("tmp-1".into(), update)]))
            .await
            .unwrap();

        let result = outcome.results["tmp-1"].as_ref().unwrap();
        assert!(result.copied);
        assert_ne!(result.identifier, a.identifier);
        assert_eq!(result.full_statement, "Copy of A");
        assert_eq!(result.original_key.as_deref(), Some("tmp-1"));
        // Allocated after A (1) and B (2).
        assert_eq!(result.sequence_number, Some(3));

        // Source edges untouched; the copy has its own child.
        let under_a = f.engine.children_of(a.id).await.unwrap();
        assert_eq!(under_a.len(), 1);
        assert_eq!(under_a.iter().next().unwrap().association.id, f.edges[2].id);
        let under_copy = f.engine.children_of(result.item).await.unwrap();
        assert_eq!(under_copy.len(), 1);
        assert_ne!(under_copy.iter().next().unwrap().item.id, f.items[2].id);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.code, EventCode::I06);
        assert_eq!(event.payload[&ChangeKey::ItemAdded].len(), 1);
        assert_eq!(event.payload[&ChangeKey::AssocAdded].len(), 2);
    }

    #[tokio::test]
    async fn per_key_failures_are_isolated() {
        let f = fixture(BatchPolicy::PerKey).await;
        let b = &f.items[1];
        let good = TreeItemUpdate {
            update_child_of: Some(UpdateChildOf {
                assoc_id: f.edges[1].id,
                sequence_number: 9,
            }),
            ..Default::default()
        };
        let bad_parent = TreeItemUpdate {
            new_child_of: Some(NewChildOf {
                parent_kind: ParentKind::Item,
                parent_id: 4242,
                sequence_number: Some(1),
            }),
            ..Default::default()
        };
        let mut alloc = SequenceAllocator::new();
        let outcome = f
            .engine
            .update_tree_items(
                f.doc.id,
                &mut alloc,
                batch(vec![
                    (b.id.to_string(), good),
                    (f.items[0].id.to_string(), bad_parent),
                    ("not-a-number".into(), TreeItemUpdate::default()),
                    (
                        "copy".into(),
                        TreeItemUpdate {
                            copy_from_id: Some(ItemId(777)),
                            ..Default::default()
                        },
                    ),
                ]),
            )
            .await
            .unwrap();

        assert!(outcome.results[&b.id.to_string()].is_ok());
        assert!(matches!(
            outcome.results[&f.items[0].id.to_string()],
            Err(TrellisError::NotFound { kind: "Item", .. })
        ));
        assert!(matches!(
            outcome.results["not-a-number"],
            Err(TrellisError::InvalidArgument(_))
        ));
        assert!(matches!(outcome.results["copy"], Err(TrellisError::NotFound { .. })));
        assert_eq!(outcome.failures().count(), 3);

        let moved = f.store.find_association(f.edges[1].id).await.unwrap().unwrap();
        assert_eq!(moved.sequence_number, Some(9));
    }

    #[tokio::test]
    async fn all_or_nothing_rolls_back_on_first_error() {
        let f = fixture(BatchPolicy::AllOrNothing).await;
        let good = TreeItemUpdate {
            update_child_of: Some(UpdateChildOf {
                assoc_id: f.edges[1].id,
                sequence_number: 9,
            }),
            ..Default::default()
        };
        let mut alloc = SequenceAllocator::new();
        let err = f
            .engine
            .update_tree_items(
                f.doc.id,
                &mut alloc,
                batch(vec![
                    (f.items[1].id.to_string(), good),
                    ("zzz".into(), TreeItemUpdate::default()),
                ]),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TrellisError::InvalidArgument(_)));

        let untouched = f.store.find_association(f.edges[1].id).await.unwrap().unwrap();
        assert_eq!(untouched.sequence_number, Some(2));
    }

    #[test]
    fn updates_deserialize_from_json() {
        let json = r#"{
            "original_key": "k1",
            "delete_child_of": "all",
            "new_child_of": {"parent_kind": "document", "parent_id": 1, "sequence_number": 4}
        }"#;
        let update: TreeItemUpdate = serde_json::from_str(json).unwrap();
        assert_eq!(update.delete_child_of, Some(DeleteChildOf::All));
        assert_eq!(update.new_child_of.unwrap().parent_kind, ParentKind::Document);

        let by_id: TreeItemUpdate =
            serde_json::from_str(r#"{"delete_child_of": {"association": 12}}"#).unwrap();
        assert_eq!(by_id.delete_child_of, Some(DeleteChildOf::Association(AssociationId(12))));
    }

    #[tokio::test]
    async fn grouping_of_another_document_is_rejected() {
        let f = fixture(BatchPolicy::PerKey).await;
        let other = Document::new(DocumentId(f.store.next_id(EntityKind::Document).await.unwrap()), "Science");
        f.store.persist(Change::PutDocument(other.clone())).await.unwrap();
        let foreign = f.engine.create_grouping(other.id, "Links", None).await.unwrap();

        let b = &f.items[1];
        let update = TreeItemUpdate {
            assoc_group: Some(foreign.id),
            new_child_of: Some(NewChildOf {
                parent_kind: ParentKind::Document,
                parent_id: f.doc.id.0,
                sequence_number: None,
            }),
            ..Default::default()
        };
        let mut alloc = SequenceAllocator::new();
        let before = f.store.association_count().await;
        let outcome = f
            .engine
            .update_tree_items(f.doc.id, &mut alloc, batch(vec![(b.id.to_string(), update)]))
            .await
            .unwrap();
        assert!(matches!(
            outcome.results[&b.id.to_string()],
            Err(TrellisError::InvalidArgument(_))
        ));
        assert_eq!(f.store.association_count().await, before);

        // Nothing outside the other document refers to its grouping.
        f.engine.delete_document(other.id).await.unwrap();
    }

    #[tokio::test]
    async fn only_own_child_of_edges_are_edited() {
        let f = fixture(BatchPolicy::PerKey).await;
        let (a, b) = (&f.items[0], &f.items[1]);
        let related = Association::new(
            AssociationId(700),
            f.doc.id,
            AssociationType::IsRelatedTo,
            a.node_ref(),
            b.node_ref(),
        );
        let other = Document::new(DocumentId(f.store.next_id(EntityKind::Document).await.unwrap()), "Science");
        let mut foreign = Association::new(
            AssociationId(701),
            other.id,
            AssociationType::ChildOf,
            b.node_ref(),
            a.node_ref(),
        );
        foreign.sequence_number = Some(1);
        f.store
            .commit(
                ChangeSet::new()
                    .with(Change::PutDocument(other))
                    .with(Change::PutAssociation(related))
                    .with(Change::PutAssociation(foreign)),
            )
            .await
            .unwrap();

        let delete_related = TreeItemUpdate {
            delete_child_of: Some(DeleteChildOf::Association(AssociationId(700))),
            ..Default::default()
        };
        let resequence_foreign = TreeItemUpdate {
            update_child_of: Some(UpdateChildOf {
                assoc_id: AssociationId(701),
                sequence_number: 4,
            }),
            ..Default::default()
        };
        let mut alloc = SequenceAllocator::new();
        let outcome = f
            .engine
            .update_tree_items(
                f.doc.id,
                &mut alloc,
                batch(vec![
                    (a.id.to_string(), delete_related),
                    (b.id.to_string(), resequence_foreign),
                ]),
            )
            .await
            .unwrap();

        assert_eq!(outcome.failures().count(), 2);
        assert!(outcome.changes.is_empty());
        assert!(f.store.find_association(AssociationId(700)).await.unwrap().is_some());
        let foreign = f.store.find_association(AssociationId(701)).await.unwrap().unwrap();
        assert_eq!(foreign.sequence_number, Some(1));
    }
}
