//! Edit sessions: the single entry point for structural edits.
//!
//! Opening a session checks that the document exists and is editable, asks
//! the identity collaborator for permission, and takes the document lock.
//! The session owns its sequence allocator; ending it releases the lock.

use std::collections::BTreeMap;

use trellis_core::{
    Association, AssociationGrouping, AssociationId, AssociationType, Document, DocumentId,
    GroupingId, ItemId, LockTarget, ObjectLock, Result, TrellisError, User,
};

use crate::association::{EndpointSpec, Parent};
use crate::copy::SubtreeCopy;
use crate::sequence::SequenceAllocator;
use crate::tree_update::{TreeItemUpdate, TreeUpdateOutcome};
use crate::FrameworkEngine;

/// A locked, single-writer view of one document.
pub struct EditSession<'a> {
    engine: &'a FrameworkEngine,
    document: Document,
    user: User,
    lock: ObjectLock,
    allocator: SequenceAllocator,
}

impl FrameworkEngine {
    /// Open an edit session on `document` for `user`.
    pub async fn begin_edit(&self, document: DocumentId, user: &User) -> Result<EditSession<'_>> {
        let doc = self.require_document(document).await?;
        if !doc.can_edit() {
            let status = doc
                .adoption_status
                .map(|s| s.to_string())
                .unwrap_or_default();
            return Err(TrellisError::NotEditable { status });
        }
        if !self.identity().may_edit(user, &doc).await {
            return Err(TrellisError::PermissionDenied(format!(
                "{} may not edit document {}",
                user.username, doc.id
            )));
        }
        let lock = self
            .locks()
            .acquire(LockTarget::Document(document), user)
            .await?;

        tracing::info!(document = %document, user = %user.id, "Edit session started");
        Ok(EditSession {
            engine: self,
            document: doc,
            user: user.clone(),
            lock,
            allocator: SequenceAllocator::new(),
        })
    }
}

impl<'a> EditSession<'a> {
    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn lock(&self) -> &ObjectLock {
        &self.lock
    }

    /// Extend the lock for another ttl.
    pub async fn refresh(&mut self) -> Result<&ObjectLock> {
        self.lock = self
            .engine
            .locks()
            .acquire(LockTarget::Document(self.document.id), &self.user)
            .await?;
        Ok(&self.lock)
    }

    /// Re-read the document, e.g. after a metadata change.
    pub async fn reload(&mut self) -> Result<&Document> {
        self.document = self.engine.require_document(self.document.id).await?;
        Ok(&self.document)
    }

    pub async fn update_document(&mut self, doc: Document) -> Result<&Document> {
        if doc.id != self.document.id {
            return Err(TrellisError::invalid(format!(
                "session is for document {}, not {}",
                self.document.id, doc.id
            )));
        }
        self.document = self.engine.update_document(doc).await?;
        Ok(&self.document)
    }

    pub async fn create_child_association(
        &mut self,
        parent: Parent,
        child: ItemId,
        group: Option<GroupingId>,
        sequence: Option<i64>,
    ) -> Result<Association> {
        self.engine
            .create_child_association(&mut self.allocator, parent, child, group, sequence)
            .await
    }

    pub async fn update_tree_items(
        &mut self,
        updates: BTreeMap<String, TreeItemUpdate>,
    ) -> Result<TreeUpdateOutcome> {
        self.engine
            .update_tree_items(self.document.id, &mut self.allocator, updates)
            .await
    }

    pub async fn add_cross_doc_association(
        &mut self,
        assoc_type: AssociationType,
        origin: EndpointSpec,
        destination: EndpointSpec,
        group: Option<GroupingId>,
    ) -> Result<Association> {
        let assoc = self
            .engine
            .add_cross_doc_association(self.document.id, assoc_type, origin, destination, group)
            .await?;
        // The registry may have changed.
        self.reload().await?;
        Ok(assoc)
    }

    pub async fn add_exemplar(&self, item: ItemId, url: &str) -> Result<Association> {
        self.engine.add_exemplar(item, url).await
    }

    pub async fn copy_subtree(
        &self,
        source: ItemId,
        group: Option<GroupingId>,
    ) -> Result<SubtreeCopy> {
        self.engine
            .copy_subtree(source, self.document.id, group)
            .await
    }

    pub async fn delete_association(&self, id: AssociationId) -> Result<Association> {
        self.engine.delete_association(id).await
    }

    pub async fn create_grouping(
        &self,
        title: &str,
        description: Option<&str>,
    ) -> Result<AssociationGrouping> {
        self.engine
            .create_grouping(self.document.id, title, description)
            .await
    }

    pub async fn delete_grouping(&self, id: GroupingId) -> Result<AssociationGrouping> {
        self.engine.delete_grouping(id).await
    }

    /// Release the lock. Returns whether this session still held it.
    pub async fn end(self) -> Result<bool> {
        let released = self
            .engine
            .locks()
            .release(LockTarget::Document(self.document.id), Some(self.user.id))
            .await?;
        tracing::info!(
            document = %self.document.id,
            user = %self.user.id,
            released,
            "Edit session ended"
        );
        Ok(released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use trellis_core::{Item, UserId};
    use trellis_graph::{Change, GraphStore, MemoryGraphStore};

    use crate::identity::StaticIdentity;

    fn user(id: i64, name: &str) -> User {
        User {
            id: UserId(id),
            username: name.to_string(),
            organization: None,
        }
    }

    async fn setup(identity: StaticIdentity) -> (FrameworkEngine, Document) {
        let store = Arc::new(MemoryGraphStore::new());
        let doc = Document::new(DocumentId(1), "Math");
        store.persist(Change::PutDocument(doc.clone())).await.unwrap();
        let engine = FrameworkEngine::new(store).with_identity(Arc::new(identity));
        (engine, doc)
    }

    #[tokio::test]
    async fn second_editor_is_locked_out_until_end() {
        let (engine, doc) = setup(StaticIdentity::anonymous()).await;
        let ana = user(1, "ana");
        let ben = user(2, "ben");

        let session = engine.begin_edit(doc.id, &ana).await.unwrap();
        let err = engine.begin_edit(doc.id, &ben).await.err().unwrap();
        assert!(matches!(err, TrellisError::AlreadyLocked { holder: UserId(1), .. }));

        assert!(session.end().await.unwrap());
        let session = engine.begin_edit(doc.id, &ben).await.unwrap();
        assert_eq!(session.lock().user, UserId(2));
    }

    #[tokio::test]
    async fn adopted_documents_are_not_editable() {
        let (engine, doc) = setup(StaticIdentity::anonymous()).await;
        engine.set_adoption_status(doc.id, "Adopted").await.unwrap();
        let err = engine.begin_edit(doc.id, &user(1, "ana")).await.err().unwrap();
        match err {
            TrellisError::NotEditable { status } => assert_eq!(status, "Adopted"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn denied_users_get_permission_denied() {
        let (engine, doc) = setup(StaticIdentity::anonymous().deny(UserId(1))).await;
        let err = engine.begin_edit(doc.id, &user(1, "ana")).await.err().unwrap();
        assert!(matches!(err, TrellisError::PermissionDenied(_)));
        assert!(engine
            .locks()
            .holder(LockTarget::Document(doc.id))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn session_allocates_sequences_across_calls() {
        let (engine, doc) = setup(StaticIdentity::anonymous()).await;
        let mut items = Vec::new();
        for (id, stmt) in [(1, "A"), (2, "B")] {
            let item = Item::new(ItemId(id), doc.id, stmt);
            engine.store().persist(Change::PutItem(item.clone())).await.unwrap();
            items.push(item);
        }

        let mut session = engine.begin_edit(doc.id, &user(1, "ana")).await.unwrap();
        let first = session
            .create_child_association(Parent::Document(doc.id), items[0].id, None, None)
            .await
            .unwrap();
        let second = session
            .create_child_association(Parent::Document(doc.id), items[1].id, None, None)
            .await
            .unwrap();
        assert_eq!(first.sequence_number, Some(1));
        assert_eq!(second.sequence_number, Some(2));
        session.end().await.unwrap();
    }

    #[tokio::test]
    async fn missing_document_is_not_found() {
        let (engine, _) = setup(StaticIdentity::anonymous()).await;
        let err = engine.begin_edit(DocumentId(99), &user(1, "ana")).await.err().unwrap();
        assert!(matches!(err, TrellisError::NotFound { kind: "Document", .. }));
    }
}
