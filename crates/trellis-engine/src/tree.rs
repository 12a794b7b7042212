//! Sibling ordering and tree assembly.
//!
//! Hierarchy lives only in `CHILD_OF` edges. Children of a parent are the
//! edges whose destination key is the parent's identifier, joined with their
//! origin items and sorted by [`SiblingKey`].

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use serde::Serialize;

use trellis_core::{Association, AssociationId, Document, DocumentId, Item, ItemId, Result};

use crate::FrameworkEngine;

/// Total order over siblings: sequence number, then list enumeration, then
/// human coding scheme (each ascending, missing values last), then
/// association id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiblingKey {
    pub sequence_number: Option<i64>,
    pub list_enum: Option<i64>,
    pub coding: Option<String>,
    pub association: AssociationId,
}

impl SiblingKey {
    pub fn of(association: &Association, item: &Item) -> Self {
        Self {
            sequence_number: association.sequence_number,
            list_enum: item.list_enum_in_source,
            coding: item.human_coding_scheme.clone(),
            association: association.id,
        }
    }
}

fn nulls_last<T: Ord>(a: &Option<T>, b: &Option<T>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

impl Ord for SiblingKey {
    fn cmp(&self, other: &Self) -> Ordering {
        nulls_last(&self.sequence_number, &other.sequence_number)
            .then_with(|| nulls_last(&self.list_enum, &other.list_enum))
            .then_with(|| nulls_last(&self.coding, &other.coding))
            .then_with(|| self.association.cmp(&other.association))
    }
}

impl PartialOrd for SiblingKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A child edge joined with its origin item.
#[derive(Debug, Clone, Serialize)]
pub struct Sibling {
    pub association: Association,
    pub item: Item,
}

impl Sibling {
    pub fn key(&self) -> SiblingKey {
        SiblingKey::of(&self.association, &self.item)
    }
}

/// Siblings in their total order. Iteration is restartable and always
/// yields the same sequence.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OrderedSiblings {
    siblings: Vec<Sibling>,
}

impl OrderedSiblings {
    pub fn new(mut siblings: Vec<Sibling>) -> Self {
        siblings.sort_by_cached_key(Sibling::key);
        Self { siblings }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Sibling> {
        self.siblings.iter()
    }

    pub fn items(&self) -> impl Iterator<Item = &Item> {
        self.siblings.iter().map(|s| &s.item)
    }

    pub fn len(&self) -> usize {
        self.siblings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.siblings.is_empty()
    }
}

impl<'a> IntoIterator for &'a OrderedSiblings {
    type Item = &'a Sibling;
    type IntoIter = std::slice::Iter<'a, Sibling>;

    fn into_iter(self) -> Self::IntoIter {
        self.siblings.iter()
    }
}

/// An item placed in a tree through one of its `CHILD_OF` edges.
#[derive(Debug, Clone, Serialize)]
pub struct TreeNode {
    pub item: Item,
    pub association: Association,
    pub children: Vec<TreeNode>,
}

/// A whole document tree.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentTree {
    pub document: Document,
    pub roots: Vec<TreeNode>,
}

impl DocumentTree {
    /// Depth-first listing of every placed node with its depth (roots are 0).
    pub fn walk(&self) -> Vec<(usize, &TreeNode)> {
        fn visit<'a>(nodes: &'a [TreeNode], depth: usize, out: &mut Vec<(usize, &'a TreeNode)>) {
            for node in nodes {
                out.push((depth, node));
                visit(&node.children, depth + 1, out);
            }
        }
        let mut out = Vec::new();
        visit(&self.roots, 0, &mut out);
        out
    }
}

/// Child edges indexed by parent key, plus the items they reference.
struct TreeIndex {
    items: HashMap<ItemId, Item>,
    children: HashMap<String, Vec<Association>>,
}

impl TreeIndex {
    fn new(items: HashMap<ItemId, Item>, edges: Vec<Association>) -> Self {
        let mut children: HashMap<String, Vec<Association>> = HashMap::new();
        for edge in edges.into_iter().filter(Association::is_child_of) {
            children.entry(edge.destination.key()).or_default().push(edge);
        }
        Self { items, children }
    }

    /// Ordered children of a parent. With `owner`, only edges recorded under
    /// that document count. Edges whose origin item is missing are skipped.
    fn siblings(&self, parent_key: &str, owner: Option<DocumentId>) -> OrderedSiblings {
        let siblings = self
            .children
            .get(parent_key)
            .into_iter()
            .flatten()
            .filter(|edge| owner.map_or(true, |doc| edge.document == doc))
            .filter_map(|edge| {
                let item = self.items.get(&edge.origin.item_id()?)?;
                Some(Sibling {
                    association: edge.clone(),
                    item: item.clone(),
                })
            })
            .collect();
        OrderedSiblings::new(siblings)
    }

    fn assemble(
        &self,
        parent_key: &str,
        owner: Option<DocumentId>,
        path: &mut HashSet<ItemId>,
    ) -> Vec<TreeNode> {
        let mut nodes = Vec::new();
        for sibling in self.siblings(parent_key, owner).iter() {
            let id = sibling.item.id;
            if !path.insert(id) {
                tracing::debug!(item = %id, "Cycle in CHILD_OF edges; not descending");
                continue;
            }
            let children = self.assemble(&sibling.item.identifier.to_string(), None, path);
            path.remove(&id);
            nodes.push(TreeNode {
                item: sibling.item.clone(),
                association: sibling.association.clone(),
                children,
            });
        }
        nodes
    }
}

impl FrameworkEngine {
    async fn tree_index(&self, edges: Vec<Association>, seed: Vec<Item>) -> Result<TreeIndex> {
        let mut items: HashMap<ItemId, Item> = seed.into_iter().map(|i| (i.id, i)).collect();
        for edge in &edges {
            if let Some(id) = edge.origin.item_id() {
                if !items.contains_key(&id) {
                    if let Some(item) = self.store().find_item(id).await? {
                        items.insert(id, item);
                    }
                }
            }
        }
        Ok(TreeIndex::new(items, edges))
    }

    /// Top-level items of a document in sibling order.
    pub async fn build_top_level_sequence(&self, document: DocumentId) -> Result<OrderedSiblings> {
        let doc = self.require_document(document).await?;
        let key = doc.identifier.to_string();
        let edges = self.store().find_child_associations(&key).await?;
        let items = self.store().find_items(document).await?;
        let index = self.tree_index(edges, items).await?;
        Ok(index.siblings(&key, Some(document)))
    }

    /// Direct children of an item in sibling order.
    pub async fn children_of(&self, item: ItemId) -> Result<OrderedSiblings> {
        let parent = self.require_item(item).await?;
        let key = parent.identifier.to_string();
        let edges = self.store().find_child_associations(&key).await?;
        let index = self.tree_index(edges, Vec::new()).await?;
        Ok(index.siblings(&key, None))
    }

    /// The full tree of a document. An item with several parents appears
    /// under each of them; cycles are cut where they close.
    pub async fn build_tree(&self, document: DocumentId) -> Result<DocumentTree> {
        let doc = self.require_document(document).await?;
        let edges = self.store().find_associations_touching(document).await?;
        let items = self.store().find_items(document).await?;
        let index = self.tree_index(edges, items).await?;

        let mut path = HashSet::new();
        let roots = index.assemble(&doc.identifier.to_string(), Some(document), &mut path);
        tracing::debug!(document = %document, roots = roots.len(), "Assembled document tree");
        Ok(DocumentTree {
            document: doc,
            roots,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::{AssociationType, DocumentId};

    fn item(id: i64, list_enum: Option<i64>, coding: Option<&str>) -> Item {
        let mut item = Item::new(ItemId(id), DocumentId(1), "Statement");
        item.list_enum_in_source = list_enum;
        item.human_coding_scheme = coding.map(str::to_string);
        item
    }

    fn edge(id: i64, child: &Item, parent: &Document, seq: Option<i64>) -> Association {
        let mut assoc = Association::new(
            AssociationId(id),
            parent.id,
            AssociationType::ChildOf,
            child.node_ref(),
            parent.node_ref(),
        );
        assoc.sequence_number = seq;
        assoc
    }

    #[test]
    fn sibling_key_orders_with_nulls_last() {
        let doc = Document::new(DocumentId(1), "Math");
        let a = item(1, None, None);
        let b = item(2, Some(1), None);
        let c = item(3, Some(1), Some("A"));
        let d = item(4, None, None);
        let e = item(5, None, Some("B"));

        let siblings = vec![
            Sibling { association: edge(10, &a, &doc, None), item: a },
            Sibling { association: edge(11, &b, &doc, Some(2)), item: b },
            Sibling { association: edge(12, &c, &doc, Some(2)), item: c },
            Sibling { association: edge(13, &d, &doc, Some(1)), item: d },
            Sibling { association: edge(9, &e, &doc, None), item: e },
        ];
        let ordered = OrderedSiblings::new(siblings);
        let ids: Vec<i64> = ordered.items().map(|i| i.id.0).collect();
        // seq 1; seq 2 with coding A beats seq 2 without; nulls: coding B, then assoc id.
        assert_eq!(ids, vec![4, 3, 2, 5, 1]);
    }

    #[test]
    fn association_id_breaks_full_ties() {
        let doc = Document::new(DocumentId(1), "Math");
        let a = item(1, Some(1), Some("X"));
        let b = item(2, Some(1), Some("X"));
        let siblings = vec![
            Sibling { association: edge(30, &a, &doc, Some(1)), item: a },
            Sibling { association: edge(20, &b, &doc, Some(1)), item: b },
        ];
        let ordered = OrderedSiblings::new(siblings);
        let first: Vec<i64> = ordered.items().map(|i| i.id.0).collect();
        let second: Vec<i64> = ordered.iter().map(|s| s.item.id.0).collect();
        assert_eq!(first, vec![2, 1]);
        assert_eq!(first, second);
    }

    #[test]
    fn assembly_cuts_cycles() {
        let doc = Document::new(DocumentId(1), "Math");
        let a = item(1, None, None);
        let b = item(2, None, None);
        let top = edge(1, &a, &doc, Some(1));
        let mut b_under_a = edge(2, &b, &doc, Some(1));
        b_under_a.destination = a.node_ref();
        let mut a_under_b = edge(3, &a, &doc, Some(1));
        a_under_b.destination = b.node_ref();

        let items = [a.clone(), b.clone()]
            .into_iter()
            .map(|i| (i.id, i))
            .collect();
        let index = TreeIndex::new(items, vec![top, b_under_a, a_under_b]);
        let mut path = HashSet::new();
        let roots = index.assemble(&doc.identifier.to_string(), Some(doc.id), &mut path);

        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].item.id, a.id);
        assert_eq!(roots[0].children.len(), 1);
        assert_eq!(roots[0].children[0].item.id, b.id);
        assert!(roots[0].children[0].children.is_empty());
    }
}
