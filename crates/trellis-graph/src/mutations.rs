//! Write operations for the Neo4j store.
//!
//! A [`ChangeSet`] is applied inside one Neo4j transaction. Puts use MERGE
//! (upsert) semantics keyed by the numeric id; removals of absent entities
//! are no-ops. Any failure rolls the whole transaction back.

use neo4rs::{query, Query, Row, Txn};
use serde::Serialize;

use trellis_core::{Association, AssociationGrouping, Document, Item, ItemType, NodeRef, ObjectLock};

use crate::client::{GraphClient, GraphError};
use crate::queries::decode_row;
use crate::store::{Change, ChangeSet, CommitReceipt};

/// Placeholder stored in integer properties that have no value.
const NONE: i64 = -1;

impl GraphClient {
    /// Apply every change in one transaction.
    pub async fn commit_changes(&self, changes: ChangeSet) -> Result<CommitReceipt, GraphError> {
        let mut txn = self.start_txn().await?;
        let mut receipt = CommitReceipt::default();

        for change in changes {
            let kind = change.kind();
            if let Err(e) = apply(&mut txn, change, &mut receipt).await {
                tracing::warn!(change = kind, error = %e, "Rolling back commit");
                if let Err(rollback) = txn.rollback().await {
                    tracing::warn!(error = %rollback, "Rollback failed");
                }
                return Err(e);
            }
            receipt.applied += 1;
        }

        txn.commit().await?;
        tracing::debug!(
            applied = receipt.applied,
            removed = receipt.removed_associations.len(),
            "Committed change set"
        );
        Ok(receipt)
    }
}

async fn apply(txn: &mut Txn, change: Change, receipt: &mut CommitReceipt) -> Result<(), GraphError> {
    match change {
        Change::PutDocument(doc) => put_document(txn, &doc).await,
        Change::PutItem(item) => put_item(txn, &item).await,
        Change::PutItemType(item_type) => put_item_type(txn, &item_type).await,
        Change::PutAssociation(assoc) => put_association(txn, &assoc).await,
        Change::PutGrouping(grouping) => put_grouping(txn, &grouping).await,
        Change::PutLock(lock) => put_lock(txn, &lock).await,
        Change::RemoveDocument(id) => {
            let q = query(
                "OPTIONAL MATCH (i:Item {document: $id})
                 WITH count(i) AS items
                 OPTIONAL MATCH (g:Grouping {document: $id})
                 WITH items, count(g) AS groupings
                 OPTIONAL MATCH (a:Association)
                 WHERE a.document = $id OR a.destination_document = $id
                 RETURN items + groupings + count(a) AS cnt",
            )
            .param("id", id.0);
            if count(txn, q).await? > 0 {
                return Err(GraphError::Integrity(format!(
                    "document {id} still has items, groupings or associations"
                )));
            }
            remove_by_id(txn, "Document", id.0).await
        }
        Change::RemoveItem(id) => {
            let q = query(
                "MATCH (a:Association)
                 WHERE a.origin_item = $id OR a.destination_item = $id
                 RETURN count(a) AS cnt",
            )
            .param("id", id.0);
            if count(txn, q).await? > 0 {
                return Err(GraphError::Integrity(format!(
                    "item {id} is still referenced by associations"
                )));
            }
            remove_by_id(txn, "Item", id.0).await
        }
        Change::RemoveAssociation(id) => remove_by_id(txn, "Association", id.0).await,
        Change::RemoveGrouping(id) => {
            let q = query("MATCH (a:Association {group: $id}) RETURN count(a) AS cnt")
                .param("id", id.0);
            if count(txn, q).await? > 0 {
                return Err(GraphError::Integrity(format!(
                    "grouping {id} is still referenced by associations"
                )));
            }
            remove_by_id(txn, "Grouping", id.0).await
        }
        Change::RemoveLock(target) => {
            let q = query("MATCH (n:ObjectLock {target: $target}) DELETE n")
                .param("target", target.to_string());
            txn.run(q).await?;
            Ok(())
        }
        Change::RemoveAssociationsOfType { origin, assoc_type } => {
            let q = query(
                "MATCH (n:Association {origin_item: $origin, type: $type})
                 WITH n, n.data AS data ORDER BY n.id
                 DETACH DELETE n
                 RETURN data",
            )
            .param("origin", origin.0)
            .param("type", assoc_type.as_str());
            for row in rows(txn, q).await? {
                receipt.removed_associations.push(decode_row::<Association>(&row)?);
            }
            Ok(())
        }
    }
}

// ── Node Upserts ─────────────────────────────────────────────────

async fn put_document(txn: &mut Txn, doc: &Document) -> Result<(), GraphError> {
    let q = query(
        "MERGE (n:Document {id: $id})
         SET n.identifier = $identifier, n.title = $title, n.data = $data",
    )
    .param("id", doc.id.0)
    .param("identifier", doc.identifier.to_string())
    .param("title", doc.title().to_string())
    .param("data", to_data(doc)?);
    txn.run(q).await?;
    Ok(())
}

async fn put_item(txn: &mut Txn, item: &Item) -> Result<(), GraphError> {
    require(txn, "Document", item.document.0).await?;
    let q = query(
        "MERGE (n:Item {id: $id})
         SET n.identifier = $identifier, n.document = $document, n.data = $data",
    )
    .param("id", item.id.0)
    .param("identifier", item.identifier.to_string())
    .param("document", item.document.0)
    .param("data", to_data(item)?);
    txn.run(q).await?;
    Ok(())
}

async fn put_item_type(txn: &mut Txn, item_type: &ItemType) -> Result<(), GraphError> {
    let q = query(
        "MERGE (n:ItemType {id: $id})
         SET n.code = $code, n.data = $data",
    )
    .param("id", item_type.id.0)
    .param("code", item_type.code.clone())
    .param("data", to_data(item_type)?);
    txn.run(q).await?;
    Ok(())
}

async fn put_grouping(txn: &mut Txn, grouping: &AssociationGrouping) -> Result<(), GraphError> {
    require(txn, "Document", grouping.document.0).await?;
    let q = query(
        "MERGE (n:Grouping {id: $id})
         SET n.document = $document, n.data = $data",
    )
    .param("id", grouping.id.0)
    .param("document", grouping.document.0)
    .param("data", to_data(grouping)?);
    txn.run(q).await?;
    Ok(())
}

async fn put_lock(txn: &mut Txn, lock: &ObjectLock) -> Result<(), GraphError> {
    let q = query(
        "MERGE (n:ObjectLock {target: $target})
         SET n.user = $user, n.expires_at = $expires_at, n.data = $data",
    )
    .param("target", lock.target.to_string())
    .param("user", lock.user.0)
    .param("expires_at", lock.expires_at.to_rfc3339())
    .param("data", to_data(lock)?);
    txn.run(q).await?;
    Ok(())
}

// ── Association Upserts ──────────────────────────────────────────

async fn put_association(txn: &mut Txn, assoc: &Association) -> Result<(), GraphError> {
    require(txn, "Document", assoc.document.0).await?;
    for endpoint in [&assoc.origin, &assoc.destination] {
        match endpoint {
            NodeRef::Item { id, .. } => require(txn, "Item", id.0).await?,
            NodeRef::Document { id, .. } => require(txn, "Document", id.0).await?,
            NodeRef::External { .. } => {}
        }
    }
    if let Some(group) = assoc.group {
        require(txn, "Grouping", group.0).await?;
    }

    let q = query(
        "MERGE (n:Association {id: $id})
         SET n.identifier = $identifier, n.document = $document, n.type = $type,
             n.origin_key = $origin_key, n.origin_item = $origin_item,
             n.destination_key = $destination_key,
             n.destination_item = $destination_item,
             n.destination_document = $destination_document,
             n.group = $group, n.data = $data",
    )
    .param("id", assoc.id.0)
    .param("identifier", assoc.identifier.to_string())
    .param("document", assoc.document.0)
    .param("type", assoc.assoc_type.as_str())
    .param("origin_key", assoc.origin.key())
    .param("origin_item", assoc.origin.item_id().map_or(NONE, |i| i.0))
    .param("destination_key", assoc.destination.key())
    .param("destination_item", assoc.destination.item_id().map_or(NONE, |i| i.0))
    .param(
        "destination_document",
        assoc.destination.document_id().map_or(NONE, |d| d.0),
    )
    .param("group", assoc.group.map_or(NONE, |g| g.0))
    .param("data", to_data(assoc)?);
    txn.run(q).await?;
    Ok(())
}

// ── Helpers ──────────────────────────────────────────────────────

async fn remove_by_id(txn: &mut Txn, label: &str, id: i64) -> Result<(), GraphError> {
    let cypher = format!("MATCH (n:{label} {{id: $id}}) DETACH DELETE n");
    txn.run(query(&cypher).param("id", id)).await?;
    Ok(())
}

async fn require(txn: &mut Txn, label: &str, id: i64) -> Result<(), GraphError> {
    let cypher = format!("MATCH (n:{label} {{id: $id}}) RETURN count(n) AS cnt");
    if count(txn, query(&cypher).param("id", id)).await? == 0 {
        return Err(GraphError::Integrity(format!(
            "referenced {label} {id} does not exist"
        )));
    }
    Ok(())
}

async fn rows(txn: &mut Txn, q: Query) -> Result<Vec<Row>, GraphError> {
    let mut stream = txn.execute(q).await?;
    let mut rows = Vec::new();
    while let Some(row) = stream.next(txn.handle()).await? {
        rows.push(row);
    }
    Ok(rows)
}

async fn count(txn: &mut Txn, q: Query) -> Result<i64, GraphError> {
    Ok(rows(txn, q)
        .await?
        .first()
        .and_then(|row| row.get::<i64>("cnt").ok())
        .unwrap_or(0))
}

fn to_data<T: Serialize>(val: &T) -> Result<String, GraphError> {
    serde_json::to_string(val).map_err(|e| GraphError::Serialization(e.to_string()))
}
