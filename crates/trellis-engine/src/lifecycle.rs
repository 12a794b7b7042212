//! Creating, updating and deleting documents.

use trellis_core::events::{ChangeKey, DomainEvent, EntityRef, EventCode};
use trellis_core::{
    Document, DocumentId, EntityKind, LockTarget, Owner, Ownership, Result, TrellisError,
};
use trellis_graph::{Change, ChangeSet};

use crate::FrameworkEngine;

fn doc_ref(doc: &Document) -> EntityRef {
    EntityRef::new(doc.id.0, doc.identifier)
}

impl FrameworkEngine {
    /// Store a new document under a freshly allocated id.
    ///
    /// Ownership: an organization owner already on the document is kept.
    /// Otherwise the creating user (an existing user owner, else the current
    /// user) decides. With the `user` hint the user owns it; otherwise the
    /// user's organization does. Without any user the document is ownerless.
    pub async fn add_document(&self, mut doc: Document) -> Result<Document> {
        if doc.title().trim().is_empty() {
            return Err(TrellisError::invalid("document title is empty"));
        }

        match doc.owner {
            Some(Owner::Organization(_)) => doc.owned_by = Some(Ownership::Organization),
            existing => {
                let creator = match existing {
                    Some(Owner::User(id)) => Some((id, None)),
                    _ => self
                        .identity()
                        .current_user()
                        .await
                        .map(|u| (u.id, u.organization)),
                };
                match creator {
                    None => {}
                    Some((user, _)) if doc.owned_by == Some(Ownership::User) => {
                        doc.owner = Some(Owner::User(user));
                    }
                    Some((user, known_org)) => {
                        let org = match known_org {
                            Some(org) => Some(org),
                            None => self.identity().organization_of(user).await,
                        };
                        let org = org.ok_or_else(|| {
                            TrellisError::invalid(format!(
                                "user {user} has no organization to own the document"
                            ))
                        })?;
                        doc.owner = Some(Owner::Organization(org));
                        doc.owned_by = Some(Ownership::Organization);
                    }
                }
            }
        }

        doc.id = DocumentId(self.next_id(EntityKind::Document).await?);
        doc.touch();
        self.store().persist(Change::PutDocument(doc.clone())).await?;

        tracing::info!(document = %doc.id, owner = ?doc.owner, "Added document");
        self.emit(
            DomainEvent::new(EventCode::D01, "Document added")
                .with_subject(doc_ref(&doc))
                .with_change(ChangeKey::DocAdded, doc_ref(&doc)),
        );
        Ok(doc)
    }

    /// Persist metadata changes of an existing document.
    pub async fn update_document(&self, mut doc: Document) -> Result<Document> {
        self.require_document(doc.id).await?;
        doc.touch();
        self.store().persist(Change::PutDocument(doc.clone())).await?;

        tracing::info!(document = %doc.id, "Updated document");
        self.emit(
            DomainEvent::new(EventCode::D02, "Document updated")
                .with_subject(doc_ref(&doc))
                .with_change(ChangeKey::DocUpdated, doc_ref(&doc)),
        );
        Ok(doc)
    }

    /// Set the adoption status from its wire name.
    pub async fn set_adoption_status(&self, document: DocumentId, status: &str) -> Result<Document> {
        let mut doc = self.require_document(document).await?;
        doc.set_adoption_status(status)?;
        self.update_document(doc).await
    }

    /// Delete a document and everything in it in one commit.
    ///
    /// Associations touching the document in either direction go first,
    /// then locks, groupings, items and the document itself.
    pub async fn delete_document(&self, document: DocumentId) -> Result<Document> {
        let doc = self.require_document(document).await?;
        let items = self.store().find_items(document).await?;
        let groupings = self.store().find_groupings(document).await?;
        let associations = self.store().find_associations_touching(document).await?;

        let mut changes = ChangeSet::new();
        for assoc in &associations {
            changes.push(Change::RemoveAssociation(assoc.id));
        }
        changes.push(Change::RemoveLock(LockTarget::Document(document)));
        for item in &items {
            changes.push(Change::RemoveLock(LockTarget::Item(item.id)));
        }
        for grouping in &groupings {
            changes.push(Change::RemoveGrouping(grouping.id));
        }
        for item in &items {
            changes.push(Change::RemoveItem(item.id));
        }
        changes.push(Change::RemoveDocument(document));
        self.store().commit(changes).await?;

        tracing::info!(
            document = %document,
            items = items.len(),
            associations = associations.len(),
            groupings = groupings.len(),
            "Deleted document"
        );
        self.emit(
            DomainEvent::new(EventCode::D04, "Document deleted")
                .with_subject(doc_ref(&doc))
                .with_change(ChangeKey::DocDeleted, doc_ref(&doc)),
        );
        Ok(doc)
    }
}
