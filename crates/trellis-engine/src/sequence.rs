//! Sequence numbers for children of a parent.
//!
//! The first request for a parent scans its existing `CHILD_OF` edges and
//! continues after the highest sequence number; later requests count up from
//! a cache without touching the store. The cache belongs to one session and
//! is not coordinated across processes: two writers on the same parent can
//! hand out the same number. The document lock keeps that to one writer.

use std::collections::HashMap;

use trellis_core::Result;
use trellis_graph::GraphStore;

#[derive(Debug, Default)]
pub struct SequenceAllocator {
    last: HashMap<String, i64>,
}

impl SequenceAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next 1-based sequence number under the parent with this key.
    pub async fn next_sequence(&mut self, store: &dyn GraphStore, parent_key: &str) -> Result<i64> {
        if let Some(last) = self.last.get_mut(parent_key) {
            *last += 1;
            return Ok(*last);
        }

        let max = store
            .find_child_associations(parent_key)
            .await?
            .iter()
            .map(|a| a.sequence_number.unwrap_or(0))
            .max()
            .unwrap_or(0);
        let next = max + 1;
        self.last.insert(parent_key.to_string(), next);
        tracing::debug!(parent = parent_key, next, "Seeded sequence from store");
        Ok(next)
    }

    /// Drop every cached counter.
    pub fn reset(&mut self) {
        self.last.clear();
    }

    /// Drop the cached counter of one parent; the next request rescans.
    pub fn forget(&mut self, parent_key: &str) {
        self.last.remove(parent_key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::{Association, AssociationId, AssociationType, Document, DocumentId, Item, ItemId};
    use trellis_graph::{Change, ChangeSet, MemoryGraphStore};

    async fn store_with_children(seqs: &[Option<i64>]) -> (MemoryGraphStore, Document) {
        let store = MemoryGraphStore::new();
        let doc = Document::new(DocumentId(1), "Math");
        let mut changes = ChangeSet::new().with(Change::PutDocument(doc.clone()));
        for (i, seq) in seqs.iter().enumerate() {
            let item = Item::new(ItemId(i as i64 + 1), doc.id, "Statement");
            let mut assoc = Association::new(
                AssociationId(i as i64 + 1),
                doc.id,
                AssociationType::ChildOf,
                item.node_ref(),
                doc.node_ref(),
            );
            assoc.sequence_number = *seq;
            changes.push(Change::PutItem(item));
            changes.push(Change::PutAssociation(assoc));
        }
        store.commit(changes).await.unwrap();
        (store, doc)
    }

    #[tokio::test]
    async fn continues_after_existing_maximum() {
        let (store, doc) = store_with_children(&[Some(3), None, Some(7)]).await;
        let mut alloc = SequenceAllocator::new();
        let key = doc.identifier.to_string();
        assert_eq!(alloc.next_sequence(&store, &key).await.unwrap(), 8);
        assert_eq!(alloc.next_sequence(&store, &key).await.unwrap(), 9);
    }

    #[tokio::test]
    async fn fresh_parent_counts_from_one() {
        let store = MemoryGraphStore::new();
        let mut alloc = SequenceAllocator::new();
        let mut got = Vec::new();
        for _ in 0..4 {
            got.push(alloc.next_sequence(&store, "parent").await.unwrap());
        }
        assert_eq!(got, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn cache_is_not_rescanned_until_forgotten() {
        let (store, doc) = store_with_children(&[Some(2)]).await;
        let key = doc.identifier.to_string();
        let mut alloc = SequenceAllocator::new();
        assert_eq!(alloc.next_sequence(&store, &key).await.unwrap(), 3);

        // A child appears behind the allocator's back.
        let item = Item::new(ItemId(50), doc.id, "Late");
        let mut assoc = Association::new(
            AssociationId(50),
            doc.id,
            AssociationType::ChildOf,
            item.node_ref(),
            doc.node_ref(),
        );
        assoc.sequence_number = Some(10);
        store
            .commit(
                ChangeSet::new()
                    .with(Change::PutItem(item))
                    .with(Change::PutAssociation(assoc)),
            )
            .await
            .unwrap();

        assert_eq!(alloc.next_sequence(&store, &key).await.unwrap(), 4);
        alloc.forget(&key);
        assert_eq!(alloc.next_sequence(&store, &key).await.unwrap(), 11);
        alloc.reset();
        assert_eq!(alloc.next_sequence(&store, &key).await.unwrap(), 11);
    }
}
