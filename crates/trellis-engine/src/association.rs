//! Creating and removing associations and groupings.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use trellis_core::events::{ChangeKey, DomainEvent, EntityRef, EventCode};
use trellis_core::{
    Association, AssociationGrouping, AssociationId, AssociationType, DocumentId, EntityKind,
    GroupingId, Item, ItemId, NodeRef, Result, TrellisError,
};
use trellis_graph::{Change, ChangeSet};

use crate::sequence::SequenceAllocator;
use crate::FrameworkEngine;

/// The parent a child is attached under.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Parent {
    Document(DocumentId),
    Item(ItemId),
}

/// One end of a new association, as supplied by a caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EndpointSpec {
    /// An item in this store, by id.
    Local(ItemId),
    /// A node on a remote peer. `external_doc` names the remote document it
    /// belongs to, if known.
    External {
        uri: String,
        identifier: String,
        #[serde(default)]
        external_doc: Option<String>,
    },
}

fn assoc_ref(assoc: &Association) -> EntityRef {
    EntityRef::new(assoc.id.0, assoc.identifier)
}

impl FrameworkEngine {
    /// Build a new association with a freshly allocated id. Nothing is stored.
    pub(crate) async fn new_association(
        &self,
        document: DocumentId,
        assoc_type: AssociationType,
        origin: NodeRef,
        destination: NodeRef,
    ) -> Result<Association> {
        let id = AssociationId(self.next_id(EntityKind::Association).await?);
        Ok(Association::new(id, document, assoc_type, origin, destination))
    }

    /// Resolve a parent into its endpoint and owning document.
    pub(crate) async fn resolve_parent(&self, parent: Parent) -> Result<(NodeRef, DocumentId)> {
        match parent {
            Parent::Document(id) => {
                let doc = self.require_document(id).await?;
                Ok((doc.node_ref(), doc.id))
            }
            Parent::Item(id) => {
                let item = self.require_item(id).await?;
                Ok((item.node_ref(), item.document))
            }
        }
    }

    pub(crate) async fn require_grouping(&self, id: GroupingId) -> Result<AssociationGrouping> {
        self.store()
            .find_grouping(id)
            .await?
            .ok_or_else(|| TrellisError::not_found("Grouping", id))
    }

    /// A grouping may only tag edges owned by the document it belongs to.
    pub(crate) async fn require_grouping_of(
        &self,
        id: GroupingId,
        document: DocumentId,
    ) -> Result<AssociationGrouping> {
        let grouping = self.require_grouping(id).await?;
        if grouping.document != document {
            return Err(TrellisError::invalid(format!(
                "grouping {id} belongs to document {}, not {document}",
                grouping.document
            )));
        }
        Ok(grouping)
    }

    /// Resolve a caller-supplied endpoint. Returns whether the owning
    /// document's registry was changed.
    async fn resolve_endpoint(
        &self,
        doc: &mut trellis_core::Document,
        spec: EndpointSpec,
    ) -> Result<(NodeRef, bool)> {
        match spec {
            EndpointSpec::Local(id) => Ok((self.require_item(id).await?.node_ref(), false)),
            EndpointSpec::External {
                uri,
                identifier,
                external_doc,
            } => {
                let mut marked = false;
                if let Some(remote) = external_doc.filter(|d| !d.is_empty()) {
                    doc.registry()
                        .with_scan_limit(self.config().registry.scan_limit)
                        .mark_auto_load(&remote, &uri, &remote)?;
                    marked = true;
                }
                Ok((NodeRef::External { uri, identifier }, marked))
            }
        }
    }

    // ── Hierarchy ────────────────────────────────────────────────

    /// Attach `child` under `parent` with a `CHILD_OF` edge. Without an
    /// explicit sequence number the allocator supplies the next one.
    pub async fn create_child_association(
        &self,
        allocator: &mut SequenceAllocator,
        parent: Parent,
        child: ItemId,
        group: Option<GroupingId>,
        sequence: Option<i64>,
    ) -> Result<Association> {
        let child = self.require_item(child).await?;
        let (destination, document) = self.resolve_parent(parent).await?;
        if let Some(group) = group {
            self.require_grouping_of(group, document).await?;
        }

        let sequence = match sequence {
            Some(seq) => seq,
            None => {
                allocator
                    .next_sequence(self.store(), &destination.key())
                    .await?
            }
        };

        let mut assoc = self
            .new_association(document, AssociationType::ChildOf, child.node_ref(), destination)
            .await?;
        assoc.sequence_number = Some(sequence);
        assoc.group = group;

        self.store()
            .persist(Change::PutAssociation(assoc.clone()))
            .await?;
        tracing::debug!(
            association = %assoc.id,
            child = %child.id,
            parent = %assoc.destination.key(),
            sequence,
            "Created CHILD_OF association"
        );
        self.emit(
            DomainEvent::new(EventCode::A01, "Association added")
                .with_change(ChangeKey::AssocAdded, assoc_ref(&assoc)),
        );
        Ok(assoc)
    }

    // ── Cross-document and exemplar associations ─────────────────

    /// Record an association under `document` between local items and/or
    /// remote nodes. A remote endpoint that names its document marks that
    /// document auto-load in the owning document's registry.
    pub async fn add_cross_doc_association(
        &self,
        document: DocumentId,
        assoc_type: AssociationType,
        origin: EndpointSpec,
        destination: EndpointSpec,
        group: Option<GroupingId>,
    ) -> Result<Association> {
        let mut doc = self.require_document(document).await?;
        let (origin, origin_marked) = self.resolve_endpoint(&mut doc, origin).await?;
        let (destination, destination_marked) =
            self.resolve_endpoint(&mut doc, destination).await?;
        let registry_changed = origin_marked || destination_marked;

        if let Some(group) = group {
            self.require_grouping_of(group, document).await?;
        }

        let mut assoc = self
            .new_association(document, assoc_type, origin, destination)
            .await?;
        assoc.group = group;

        let mut changes = ChangeSet::new();
        if registry_changed {
            doc.touch();
            changes.push(Change::PutDocument(doc.clone()));
        }
        changes.push(Change::PutAssociation(assoc.clone()));
        self.store().commit(changes).await?;

        tracing::info!(
            document = %document,
            association = %assoc.id,
            assoc_type = %assoc_type,
            registry_changed,
            "Added association"
        );
        let mut event = DomainEvent::new(EventCode::A01, "Association added")
            .with_subject(EntityRef::new(doc.id.0, doc.identifier))
            .with_change(ChangeKey::AssocAdded, assoc_ref(&assoc));
        if registry_changed {
            event = event.with_change(ChangeKey::DocUpdated, EntityRef::new(doc.id.0, doc.identifier));
        }
        self.emit(event);
        Ok(assoc)
    }

    /// Link an item to an external example by URL. The destination
    /// identifier is the UUIDv5 of the URL in the URL namespace.
    pub async fn add_exemplar(&self, item: ItemId, url: &str) -> Result<Association> {
        if url.trim().is_empty() {
            return Err(TrellisError::invalid("exemplar url is empty"));
        }
        let item: Item = self.require_item(item).await?;
        let destination = NodeRef::External {
            uri: url.to_string(),
            identifier: Uuid::new_v5(&Uuid::NAMESPACE_URL, url.as_bytes()).to_string(),
        };
        let assoc = self
            .new_association(item.document, AssociationType::Exemplar, item.node_ref(), destination)
            .await?;

        self.store()
            .persist(Change::PutAssociation(assoc.clone()))
            .await?;
        tracing::debug!(item = %item.id, association = %assoc.id, url, "Added exemplar");
        self.emit(
            DomainEvent::new(EventCode::A01, "Exemplar added")
                .with_change(ChangeKey::AssocAdded, assoc_ref(&assoc)),
        );
        Ok(assoc)
    }

    pub async fn delete_association(&self, id: AssociationId) -> Result<Association> {
        let assoc = self
            .store()
            .find_association(id)
            .await?
            .ok_or_else(|| TrellisError::not_found("Association", id))?;
        self.store().persist(Change::RemoveAssociation(id)).await?;

        tracing::debug!(association = %id, "Deleted association");
        self.emit(
            DomainEvent::new(EventCode::A04, "Association deleted")
                .with_change(ChangeKey::AssocDeleted, assoc_ref(&assoc)),
        );
        Ok(assoc)
    }

    // ── Groupings ────────────────────────────────────────────────

    pub async fn create_grouping(
        &self,
        document: DocumentId,
        title: &str,
        description: Option<&str>,
    ) -> Result<AssociationGrouping> {
        self.require_document(document).await?;
        if title.trim().is_empty() {
            return Err(TrellisError::invalid("grouping title is empty"));
        }
        let grouping = AssociationGrouping {
            id: GroupingId(self.next_id(EntityKind::Grouping).await?),
            identifier: Uuid::new_v4(),
            document,
            title: title.to_string(),
            description: description.map(str::to_string),
        };
        self.store()
            .persist(Change::PutGrouping(grouping.clone()))
            .await?;
        tracing::debug!(document = %document, grouping = %grouping.id, "Created grouping");
        Ok(grouping)
    }

    /// Delete a grouping. Associations tagged with it lose the tag in the
    /// same commit.
    pub async fn delete_grouping(&self, id: GroupingId) -> Result<AssociationGrouping> {
        let grouping = self.require_grouping(id).await?;
        let now = Utc::now();

        let mut changes = ChangeSet::new();
        let mut cleared = 0usize;
        for mut assoc in self
            .store()
            .find_associations_touching(grouping.document)
            .await?
            .into_iter()
            .filter(|a| a.group == Some(id))
        {
            assoc.group = None;
            assoc.updated_at = now;
            changes.push(Change::PutAssociation(assoc));
            cleared += 1;
        }
        changes.push(Change::RemoveGrouping(id));
        self.store().commit(changes).await?;

        tracing::debug!(grouping = %id, cleared, "Deleted grouping");
        Ok(grouping)
    }
}
