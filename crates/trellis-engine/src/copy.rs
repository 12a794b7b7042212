//! Deep copies: an item with its subtree, or a whole document.
//!
//! Copies are staged into a [`ChangeSet`] in dependency order (containers
//! before contents, items before the edges that reference them) and
//! committed once. Sources are never modified.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::Utc;
use uuid::Uuid;

use trellis_core::events::{ChangeKey, DomainEvent, EntityRef, EventCode};
use trellis_core::{
    AdoptionStatus, Association, AssociationId, Document, DocumentId, EntityKind, GroupingId,
    Item, ItemId, NodeRef, Result,
};
use trellis_graph::{Change, ChangeSet};

use crate::FrameworkEngine;

/// A staged subtree copy.
#[derive(Debug, Clone)]
pub struct SubtreeCopy {
    /// Clone of the item the copy started from.
    pub root: Item,
    /// Every clone, root first, in breadth-first order.
    pub items: Vec<Item>,
    /// New edges touching the clones.
    pub associations: Vec<Association>,
    /// Source item id to clone id.
    pub mapping: HashMap<ItemId, ItemId>,
    pub changes: ChangeSet,
}

/// Rewrite an endpoint through the clone maps. Anything not cloned is kept.
fn remap_endpoint(
    node: &NodeRef,
    items: &HashMap<ItemId, Item>,
    document: Option<(DocumentId, &Document)>,
) -> NodeRef {
    match node {
        NodeRef::Item { id, .. } => items.get(id).map_or_else(|| node.clone(), Item::node_ref),
        NodeRef::Document { id, .. } => match document {
            Some((source, target)) if *id == source => target.node_ref(),
            _ => node.clone(),
        },
        NodeRef::External { .. } => node.clone(),
    }
}

impl FrameworkEngine {
    async fn clone_association(
        &self,
        source: &Association,
        document: DocumentId,
        origin: NodeRef,
        destination: NodeRef,
    ) -> Result<Association> {
        let now = Utc::now();
        Ok(Association {
            id: AssociationId(self.next_id(EntityKind::Association).await?),
            identifier: Uuid::new_v4(),
            document,
            origin,
            destination,
            created_at: now,
            updated_at: now,
            ..source.clone()
        })
    }

    /// Stage a copy of `source` and its `CHILD_OF` descendants into
    /// `target`. Nothing is written.
    ///
    /// `title_prefix` is prepended to the root clone's full and abbreviated
    /// statements. Edges inside the subtree keep their sequence numbers;
    /// other edges leaving a copied item are cloned with the copy as origin.
    /// Every new edge is owned by `target` and tagged with `group`.
    pub(crate) async fn stage_subtree_copy(
        &self,
        source: ItemId,
        target: DocumentId,
        group: Option<GroupingId>,
        title_prefix: Option<&str>,
    ) -> Result<SubtreeCopy> {
        let root = self.require_item(source).await?;

        // ── Collect the subtree ──────────────────────────────────
        let mut visited: HashSet<ItemId> = HashSet::from([root.id]);
        let mut order: Vec<Item> = Vec::new();
        let mut inner_edges: Vec<Association> = Vec::new();
        let mut queue = VecDeque::from([root]);

        while let Some(item) = queue.pop_front() {
            let edges = self
                .store()
                .find_child_associations(&item.identifier.to_string())
                .await?;
            for edge in edges {
                let Some(child_id) = edge.origin.item_id() else {
                    continue;
                };
                if !visited.insert(child_id) {
                    tracing::debug!(item = %child_id, "Already copied; edge not followed");
                    continue;
                }
                let Some(child) = self.store().find_item(child_id).await? else {
                    continue;
                };
                inner_edges.push(edge);
                queue.push_back(child);
            }
            order.push(item);
        }

        // ── Clone items ──────────────────────────────────────────
        let mut clones: HashMap<ItemId, Item> = HashMap::new();
        let mut items = Vec::with_capacity(order.len());
        for (i, item) in order.iter().enumerate() {
            let mut clone = item.copy_to(ItemId(self.next_id(EntityKind::Item).await?), target);
            if i == 0 {
                if let Some(prefix) = title_prefix {
                    clone.full_statement = format!("{prefix}{}", clone.full_statement);
                    clone.abbreviated_statement = clone
                        .abbreviated_statement
                        .map(|abbr| format!("{prefix}{abbr}"));
                }
            }
            clones.insert(item.id, clone.clone());
            items.push(clone);
        }

        // ── Clone edges ──────────────────────────────────────────
        let mut associations = Vec::new();
        for edge in &inner_edges {
            let origin = remap_endpoint(&edge.origin, &clones, None);
            let destination = remap_endpoint(&edge.destination, &clones, None);
            let mut assoc = self
                .clone_association(edge, target, origin, destination)
                .await?;
            assoc.group = group;
            associations.push(assoc);
        }
        for item in &order {
            for edge in self.store().find_associations_from(item.id).await? {
                if edge.is_child_of() {
                    continue;
                }
                let origin = remap_endpoint(&edge.origin, &clones, None);
                let destination = remap_endpoint(&edge.destination, &clones, None);
                let mut assoc = self
                    .clone_association(&edge, target, origin, destination)
                    .await?;
                assoc.group = group;
                associations.push(assoc);
            }
        }

        let mut changes = ChangeSet::new();
        for item in &items {
            changes.push(Change::PutItem(item.clone()));
        }
        for assoc in &associations {
            changes.push(Change::PutAssociation(assoc.clone()));
        }

        let root = items[0].clone();
        let mapping = clones.iter().map(|(src, c)| (*src, c.id)).collect();
        tracing::debug!(
            source = %source,
            target = %target,
            items = items.len(),
            associations = associations.len(),
            "Staged subtree copy"
        );
        Ok(SubtreeCopy {
            root,
            items,
            associations,
            mapping,
            changes,
        })
    }

    /// Copy an item and its subtree into `target` and commit.
    ///
    /// The root clone is not attached anywhere; callers add a `CHILD_OF`
    /// edge for it.
    pub async fn copy_subtree(
        &self,
        source: ItemId,
        target: DocumentId,
        group: Option<GroupingId>,
    ) -> Result<SubtreeCopy> {
        self.require_document(target).await?;
        if let Some(group) = group {
            self.require_grouping_of(group, target).await?;
        }
        let copy = self.stage_subtree_copy(source, target, group, None).await?;
        self.store().commit(copy.changes.clone()).await?;
        tracing::info!(
            source = %source,
            target = %target,
            root = %copy.root.id,
            items = copy.items.len(),
            "Copied subtree"
        );
        Ok(copy)
    }

    /// Clone a whole document into a new draft.
    ///
    /// Attributes, groupings, items and the associations owned by the
    /// source are cloned. Endpoints inside the source point at the clones;
    /// endpoints elsewhere are kept. One commit.
    pub async fn derive_document(&self, source: DocumentId, title: Option<&str>) -> Result<Document> {
        let src = self.require_document(source).await?;
        let now = Utc::now();

        let mut doc = src.clone();
        doc.id = DocumentId(self.next_id(EntityKind::Document).await?);
        doc.identifier = Uuid::new_v4();
        doc.adoption_status = Some(AdoptionStatus::Draft);
        if let Some(title) = title {
            doc.set_title(title);
        }
        doc.created_at = now;
        doc.updated_at = now;

        let mut changes = ChangeSet::new().with(Change::PutDocument(doc.clone()));

        let mut groups: HashMap<GroupingId, GroupingId> = HashMap::new();
        for grouping in self.store().find_groupings(source).await? {
            let mut clone = grouping.clone();
            clone.id = GroupingId(self.next_id(EntityKind::Grouping).await?);
            clone.identifier = Uuid::new_v4();
            clone.document = doc.id;
            groups.insert(grouping.id, clone.id);
            changes.push(Change::PutGrouping(clone));
        }

        let mut clones: HashMap<ItemId, Item> = HashMap::new();
        for item in self.store().find_items(source).await? {
            let clone = item.copy_to(ItemId(self.next_id(EntityKind::Item).await?), doc.id);
            changes.push(Change::PutItem(clone.clone()));
            clones.insert(item.id, clone);
        }

        let mut copied = 0usize;
        for edge in self
            .store()
            .find_associations_touching(source)
            .await?
            .into_iter()
            .filter(|a| a.document == source)
        {
            let origin = remap_endpoint(&edge.origin, &clones, Some((source, &doc)));
            let destination = remap_endpoint(&edge.destination, &clones, Some((source, &doc)));
            let mut assoc = self
                .clone_association(&edge, doc.id, origin, destination)
                .await?;
            assoc.group = edge.group.and_then(|g| groups.get(&g).copied());
            changes.push(Change::PutAssociation(assoc));
            copied += 1;
        }

        self.store().commit(changes).await?;
        tracing::info!(
            source = %source,
            document = %doc.id,
            items = clones.len(),
            associations = copied,
            groupings = groups.len(),
            "Derived document"
        );
        self.emit(
            DomainEvent::new(EventCode::D05, "Document derived")
                .with_subject(EntityRef::new(doc.id.0, doc.identifier))
                .with_change(ChangeKey::DocAdded, EntityRef::new(doc.id.0, doc.identifier)),
        );
        Ok(doc)
    }
}
