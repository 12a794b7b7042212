//! Build a framework document from import rows.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use trellis_core::config::ImportSettings;
use trellis_core::events::{ChangeKey, DomainEvent, EntityRef, EventCode, EventSink, NullSink};
use trellis_core::{
    Association, AssociationId, AssociationType, Document, DocumentId, EntityKind, Item, ItemId,
    ItemType, ItemTypeId, NodeRef, OrganizationId, Owner, Ownership,
};
use trellis_graph::{Change, ChangeSet, GraphStore};

use crate::error::{ImportError, Result};
use crate::grades::normalize_grades;
use crate::records::ImportRow;

/// Per-run overrides of the configured defaults.
#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    pub title: Option<String>,
    pub creator: Option<String>,
    pub organization: Option<OrganizationId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportSummary {
    pub document: DocumentId,
    pub identifier: String,
    pub title: String,
    pub items: usize,
    pub item_types_created: usize,
    pub associations: usize,
}

pub struct FrameworkImporter {
    store: Arc<dyn GraphStore>,
    events: Arc<dyn EventSink>,
    settings: ImportSettings,
}

impl FrameworkImporter {
    pub fn new(store: Arc<dyn GraphStore>, settings: ImportSettings) -> Self {
        Self {
            store,
            events: Arc::new(NullSink),
            settings,
        }
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Import the rows as a new document in one commit.
    pub async fn import(&self, rows: &[ImportRow], options: ImportOptions) -> Result<ImportSummary> {
        if rows.is_empty() {
            return Err(ImportError::Empty);
        }

        let title = options
            .title
            .unwrap_or_else(|| self.settings.default_title.clone());
        let mut doc = Document::new(DocumentId(self.store.next_id(EntityKind::Document).await?), &title);
        doc.creator = options
            .creator
            .unwrap_or_else(|| self.settings.default_creator.clone());
        if let Some(org) = options
            .organization
            .or(self.settings.organization.map(OrganizationId))
        {
            doc.owner = Some(Owner::Organization(org));
            doc.owned_by = Some(Ownership::Organization);
        }

        let mut changes = ChangeSet::new().with(Change::PutDocument(doc.clone()));
        let mut item_types: HashMap<String, ItemTypeId> = HashMap::new();
        let mut by_coding: HashMap<String, Item> = HashMap::new();
        let mut types_created = 0usize;
        let mut items = 0usize;
        let mut counter: i64 = 1;

        for row in rows {
            let item_type = match item_types.get(&row.item_type) {
                Some(id) => *id,
                None => {
                    let id = match self.store.find_item_type_by_code(&row.item_type).await? {
                        Some(existing) => existing.id,
                        None => {
                            let id = ItemTypeId(self.store.next_id(EntityKind::ItemType).await?);
                            changes.push(Change::PutItemType(ItemType::from_code(id, &row.item_type)));
                            types_created += 1;
                            tracing::debug!(code = %row.item_type, item_type = %id, "Created item type");
                            id
                        }
                    };
                    item_types.insert(row.item_type.clone(), id);
                    id
                }
            };

            let mut item = Item::new(
                ItemId(self.store.next_id(EntityKind::Item).await?),
                doc.id,
                &row.statement,
            );
            item.item_type = Some(item_type);
            item.human_coding_scheme = row.coding();
            item.list_enum_in_source = Some(counter);
            item.abbreviated_statement = row.abbreviated_statement();
            item.educational_alignment = normalize_grades(&row.grades);

            let parent: NodeRef = row
                .parent_coding()
                .and_then(|code| by_coding.get(code))
                .map_or_else(|| doc.node_ref(), Item::node_ref);
            let mut edge = Association::new(
                AssociationId(self.store.next_id(EntityKind::Association).await?),
                doc.id,
                AssociationType::ChildOf,
                item.node_ref(),
                parent,
            );
            edge.sequence_number = Some(counter);
            counter += 1;

            changes.push(Change::PutItem(item.clone()));
            changes.push(Change::PutAssociation(edge));
            by_coding.insert(row.coding.clone(), item);
            items += 1;
        }

        self.store.commit(changes).await?;

        tracing::info!(
            document = %doc.id,
            title = %doc.title(),
            items,
            item_types_created = types_created,
            "Imported framework"
        );
        let doc_ref = EntityRef::new(doc.id.0, doc.identifier);
        self.events.emit(
            DomainEvent::new(
                EventCode::D10,
                format!("Framework \"{}\" imported", doc.title()),
            )
            .with_subject(doc_ref.clone())
            .with_change(ChangeKey::DocAdded, doc_ref),
        );

        Ok(ImportSummary {
            document: doc.id,
            identifier: doc.identifier.to_string(),
            title: doc.title().to_string(),
            items,
            item_types_created: types_created,
            associations: items,
        })
    }
}
