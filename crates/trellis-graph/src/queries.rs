//! Read operations for the Neo4j store and its [`GraphStore`] implementation.
//!
//! Every entity is a labelled node carrying a handful of indexed scalar
//! properties plus its full JSON form in `data`. Reads select `data` and
//! decode it.

use async_trait::async_trait;
use neo4rs::{query, Query};
use serde::de::DeserializeOwned;

use trellis_core::{
    Association, AssociationGrouping, AssociationId, AssociationType, Document, DocumentId,
    EntityKind, GroupingId, Item, ItemId, ItemType, LockTarget, ObjectLock,
};

use crate::client::{GraphClient, GraphError};
use crate::store::{ChangeSet, CommitReceipt, GraphStore};

/// Decode the `data` column of a row.
pub(crate) fn decode_row<T: DeserializeOwned>(row: &neo4rs::Row) -> Result<T, GraphError> {
    let data: String = row
        .get("data")
        .map_err(|e| GraphError::Serialization(format!("Failed to read data column: {e}")))?;
    serde_json::from_str(&data).map_err(|e| GraphError::Serialization(e.to_string()))
}

impl GraphClient {
    async fn fetch_one<T: DeserializeOwned>(&self, q: Query) -> Result<Option<T>, GraphError> {
        match self.query_one(q).await? {
            Some(row) => Ok(Some(decode_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn fetch_all<T: DeserializeOwned>(&self, q: Query) -> Result<Vec<T>, GraphError> {
        self.query_rows(q).await?.iter().map(decode_row).collect()
    }

    // ── Id Allocation ────────────────────────────────────────────

    /// Increment and return the counter for an entity family.
    pub async fn allocate_id(&self, kind: EntityKind) -> Result<i64, GraphError> {
        let q = query(
            "MERGE (c:Sequence {kind: $kind})
             ON CREATE SET c.value = 0
             SET c.value = c.value + 1
             RETURN c.value AS value",
        )
        .param("kind", kind.label());

        match self.query_one(q).await? {
            Some(row) => row
                .get::<i64>("value")
                .map_err(|e| GraphError::Serialization(format!("Failed to read counter: {e}"))),
            None => Err(GraphError::not_found("Sequence", kind.label())),
        }
    }
}

#[async_trait]
impl GraphStore for GraphClient {
    async fn next_id(&self, kind: EntityKind) -> Result<i64, GraphError> {
        self.allocate_id(kind).await
    }

    async fn find_document(&self, id: DocumentId) -> Result<Option<Document>, GraphError> {
        let q = query("MATCH (n:Document {id: $id}) RETURN n.data AS data").param("id", id.0);
        self.fetch_one(q).await
    }

    async fn list_documents(&self) -> Result<Vec<Document>, GraphError> {
        self.fetch_all(query("MATCH (n:Document) RETURN n.data AS data ORDER BY n.id"))
            .await
    }

    async fn find_item(&self, id: ItemId) -> Result<Option<Item>, GraphError> {
        let q = query("MATCH (n:Item {id: $id}) RETURN n.data AS data").param("id", id.0);
        self.fetch_one(q).await
    }

    async fn find_items(&self, document: DocumentId) -> Result<Vec<Item>, GraphError> {
        let q = query(
            "MATCH (n:Item {document: $document})
             RETURN n.data AS data ORDER BY n.id",
        )
        .param("document", document.0);
        self.fetch_all(q).await
    }

    async fn find_association(
        &self,
        id: AssociationId,
    ) -> Result<Option<Association>, GraphError> {
        let q = query("MATCH (n:Association {id: $id}) RETURN n.data AS data").param("id", id.0);
        self.fetch_one(q).await
    }

    async fn find_associations_from(&self, item: ItemId) -> Result<Vec<Association>, GraphError> {
        let q = query(
            "MATCH (n:Association {origin_item: $item})
             RETURN n.data AS data ORDER BY n.id",
        )
        .param("item", item.0);
        self.fetch_all(q).await
    }

    async fn find_child_associations(
        &self,
        parent_key: &str,
    ) -> Result<Vec<Association>, GraphError> {
        let q = query(
            "MATCH (n:Association {destination_key: $key, type: $type})
             RETURN n.data AS data ORDER BY n.id",
        )
        .param("key", parent_key.to_string())
        .param("type", AssociationType::ChildOf.as_str());
        self.fetch_all(q).await
    }

    async fn find_associations_touching(
        &self,
        document: DocumentId,
    ) -> Result<Vec<Association>, GraphError> {
        let q = query(
            "OPTIONAL MATCH (i:Item {document: $document})
             WITH collect(i.id) AS items
             MATCH (n:Association)
             WHERE n.document = $document
                OR n.destination_document = $document
                OR n.origin_item IN items
                OR n.destination_item IN items
             RETURN n.data AS data ORDER BY n.id",
        )
        .param("document", document.0);
        self.fetch_all(q).await
    }

    async fn find_grouping(
        &self,
        id: GroupingId,
    ) -> Result<Option<AssociationGrouping>, GraphError> {
        let q = query("MATCH (n:Grouping {id: $id}) RETURN n.data AS data").param("id", id.0);
        self.fetch_one(q).await
    }

    async fn find_groupings(
        &self,
        document: DocumentId,
    ) -> Result<Vec<AssociationGrouping>, GraphError> {
        let q = query(
            "MATCH (n:Grouping {document: $document})
             RETURN n.data AS data ORDER BY n.id",
        )
        .param("document", document.0);
        self.fetch_all(q).await
    }

    async fn find_item_type_by_code(&self, code: &str) -> Result<Option<ItemType>, GraphError> {
        let q = query(
            "MATCH (n:ItemType {code: $code})
             RETURN n.data AS data ORDER BY n.id LIMIT 1",
        )
        .param("code", code.to_string());
        self.fetch_one(q).await
    }

    async fn find_lock(&self, target: LockTarget) -> Result<Option<ObjectLock>, GraphError> {
        let q = query("MATCH (n:ObjectLock {target: $target}) RETURN n.data AS data")
            .param("target", target.to_string());
        self.fetch_one(q).await
    }

    async fn commit(&self, changes: ChangeSet) -> Result<CommitReceipt, GraphError> {
        self.commit_changes(changes).await
    }
}
