//! Core domain types for the Trellis association graph.
//!
//! Documents own items, association groupings, and the associations recorded
//! under them. Hierarchy is never stored on an item: it is reconstructed from
//! `CHILD_OF` associations whose origin is the child.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TrellisError;

/// Maximum length of a document title, in characters.
pub const TITLE_MAX_CHARS: usize = 120;

// ── Identifiers ───────────────────────────────────────────────────

macro_rules! store_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
        )]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = TrellisError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim().parse::<i64>().map(Self).map_err(|_| {
                    TrellisError::invalid(format!("{s:?} is not a valid {}", stringify!($name)))
                })
            }
        }
    };
}

store_id!(
    /// Numeric store id of a document.
    DocumentId
);
store_id!(
    /// Numeric store id of an item.
    ItemId
);
store_id!(
    /// Numeric store id of an item type.
    ItemTypeId
);
store_id!(
    /// Numeric store id of an association.
    AssociationId
);
store_id!(
    /// Numeric store id of an association grouping.
    GroupingId
);
store_id!(UserId);
store_id!(OrganizationId);

/// Entity families that draw ids from the store's allocator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Document,
    Item,
    ItemType,
    Association,
    Grouping,
}

impl EntityKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Document => "Document",
            Self::Item => "Item",
            Self::ItemType => "ItemType",
            Self::Association => "Association",
            Self::Grouping => "Grouping",
        }
    }
}

// ── Users and ownership ───────────────────────────────────────────

/// A user as seen through the identity collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub organization: Option<OrganizationId>,
}

/// The owner of a document: an organization or a single user, never both.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Owner {
    Organization(OrganizationId),
    User(UserId),
}

/// Which kind of owner a document has, or is requested to have.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Ownership {
    Organization,
    User,
}

impl Ownership {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Organization => "organization",
            Self::User => "user",
        }
    }
}

impl FromStr for Ownership {
    type Err = TrellisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "organization" => Ok(Self::Organization),
            "user" => Ok(Self::User),
            other => Err(TrellisError::invalid(format!(
                "owner must be \"organization\" or \"user\", got {other:?}"
            ))),
        }
    }
}

// ── Documents ─────────────────────────────────────────────────────

/// Adoption status of a framework document.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AdoptionStatus {
    #[serde(rename = "Private Draft")]
    PrivateDraft,
    Draft,
    Adopted,
    Deprecated,
}

impl AdoptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PrivateDraft => "Private Draft",
            Self::Draft => "Draft",
            Self::Adopted => "Adopted",
            Self::Deprecated => "Deprecated",
        }
    }

    /// Statuses under which structural edits are allowed.
    pub fn is_editable(&self) -> bool {
        matches!(self, Self::PrivateDraft | Self::Draft)
    }
}

impl FromStr for AdoptionStatus {
    type Err = TrellisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Private Draft" => Ok(Self::PrivateDraft),
            "Draft" => Ok(Self::Draft),
            "Adopted" => Ok(Self::Adopted),
            "Deprecated" => Ok(Self::Deprecated),
            other => Err(TrellisError::invalid(format!(
                "invalid adoption status {other:?}"
            ))),
        }
    }
}

impl fmt::Display for AdoptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A competency framework.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub id: DocumentId,
    pub identifier: Uuid,
    title: String,
    pub creator: String,
    pub publisher: Option<String>,
    pub official_uri: Option<String>,
    pub version: Option<String>,
    pub description: Option<String>,
    pub language: Option<String>,
    pub adoption_status: Option<AdoptionStatus>,
    pub status_start: Option<NaiveDate>,
    pub status_end: Option<NaiveDate>,
    pub licence: Option<String>,
    pub note: Option<String>,
    pub owner: Option<Owner>,
    /// Explicit ownership hint; `ownership()` falls back to the owner.
    pub owned_by: Option<Ownership>,
    /// Extensible property bag. Also carries the external-document registry.
    pub attributes: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub fn new(id: DocumentId, title: &str) -> Self {
        let now = Utc::now();
        let mut doc = Self {
            id,
            identifier: Uuid::new_v4(),
            title: String::new(),
            creator: String::new(),
            publisher: None,
            official_uri: None,
            version: None,
            description: None,
            language: None,
            adoption_status: None,
            status_start: None,
            status_end: None,
            licence: None,
            note: None,
            owner: None,
            owned_by: None,
            attributes: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        };
        doc.set_title(title);
        doc
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// Set the title, truncated to [`TITLE_MAX_CHARS`] characters.
    pub fn set_title(&mut self, title: &str) {
        self.title = title.chars().take(TITLE_MAX_CHARS).collect();
    }

    /// The first 60 characters of the title.
    pub fn short_statement(&self) -> String {
        self.title.chars().take(60).collect()
    }

    /// Set the adoption status from its wire name.
    pub fn set_adoption_status(&mut self, status: &str) -> Result<(), TrellisError> {
        self.adoption_status = Some(status.parse()?);
        Ok(())
    }

    /// A document is editable while its status is unset, private draft, or draft.
    pub fn can_edit(&self) -> bool {
        self.adoption_status.map_or(true, |s| s.is_editable())
    }

    pub fn is_adopted(&self) -> bool {
        self.adoption_status == Some(AdoptionStatus::Adopted)
    }

    pub fn is_deprecated(&self) -> bool {
        self.adoption_status == Some(AdoptionStatus::Deprecated)
    }

    /// Set the ownership hint from its wire name (`None` clears it).
    pub fn set_owned_by(&mut self, hint: Option<&str>) -> Result<(), TrellisError> {
        self.owned_by = hint.map(str::parse).transpose()?;
        Ok(())
    }

    /// The explicit ownership hint, or the kind of the current owner.
    pub fn ownership(&self) -> Option<Ownership> {
        self.owned_by.or(match self.owner {
            Some(Owner::Organization(_)) => Some(Ownership::Organization),
            Some(Owner::User(_)) => Some(Ownership::User),
            None => None,
        })
    }

    pub fn organization(&self) -> Option<OrganizationId> {
        match self.owner {
            Some(Owner::Organization(org)) => Some(org),
            _ => None,
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn set_attribute(&mut self, name: &str, value: &str) {
        self.attributes.insert(name.to_string(), value.to_string());
    }

    pub fn remove_attribute(&mut self, name: &str) -> Option<String> {
        self.attributes.remove(name)
    }

    pub fn node_ref(&self) -> NodeRef {
        NodeRef::Document {
            id: self.id,
            identifier: self.identifier,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

// ── Items ─────────────────────────────────────────────────────────

/// A competency statement within a document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Item {
    pub id: ItemId,
    pub identifier: Uuid,
    pub document: DocumentId,
    pub full_statement: String,
    pub abbreviated_statement: Option<String>,
    pub human_coding_scheme: Option<String>,
    pub item_type: Option<ItemTypeId>,
    /// Position of the item in its original source list.
    pub list_enum_in_source: Option<i64>,
    /// Comma-joined normalized grade tokens.
    pub educational_alignment: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Item {
    pub fn new(id: ItemId, document: DocumentId, full_statement: &str) -> Self {
        let now = Utc::now();
        Self {
            id,
            identifier: Uuid::new_v4(),
            document,
            full_statement: full_statement.to_string(),
            abbreviated_statement: None,
            human_coding_scheme: None,
            item_type: None,
            list_enum_in_source: None,
            educational_alignment: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// A fresh copy of this item under a new id and identifier in `document`.
    pub fn copy_to(&self, id: ItemId, document: DocumentId) -> Self {
        let now = Utc::now();
        Self {
            id,
            identifier: Uuid::new_v4(),
            document,
            created_at: now,
            updated_at: now,
            ..self.clone()
        }
    }

    pub fn node_ref(&self) -> NodeRef {
        NodeRef::Item {
            id: self.id,
            identifier: self.identifier,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// The type of an item ("Standard", "Domain", "Cluster", ...).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ItemType {
    pub id: ItemTypeId,
    pub identifier: Uuid,
    pub code: String,
    pub title: String,
    pub hierarchy_code: String,
}

impl ItemType {
    /// An item type whose title and hierarchy code are its code.
    pub fn from_code(id: ItemTypeId, code: &str) -> Self {
        Self {
            id,
            identifier: Uuid::new_v4(),
            code: code.to_string(),
            title: code.to_string(),
            hierarchy_code: code.to_string(),
        }
    }
}

// ── Associations ──────────────────────────────────────────────────

/// The type of an association.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssociationType {
    ChildOf,
    Exemplar,
    IsPeerOf,
    IsRelatedTo,
    ExactMatchOf,
    IsPartOf,
    Precedes,
    ReplacedBy,
    HasSkillLevel,
}

impl AssociationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ChildOf => "CHILD_OF",
            Self::Exemplar => "EXEMPLAR",
            Self::IsPeerOf => "IS_PEER_OF",
            Self::IsRelatedTo => "IS_RELATED_TO",
            Self::ExactMatchOf => "EXACT_MATCH_OF",
            Self::IsPartOf => "IS_PART_OF",
            Self::Precedes => "PRECEDES",
            Self::ReplacedBy => "REPLACED_BY",
            Self::HasSkillLevel => "HAS_SKILL_LEVEL",
        }
    }

    /// Symmetric types read the same in both directions.
    pub fn is_symmetric(&self) -> bool {
        matches!(self, Self::IsPeerOf | Self::IsRelatedTo)
    }
}

impl FromStr for AssociationType {
    type Err = TrellisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ty = match s {
            "CHILD_OF" => Self::ChildOf,
            "EXEMPLAR" => Self::Exemplar,
            "IS_PEER_OF" => Self::IsPeerOf,
            "IS_RELATED_TO" => Self::IsRelatedTo,
            "EXACT_MATCH_OF" => Self::ExactMatchOf,
            "IS_PART_OF" => Self::IsPartOf,
            "PRECEDES" => Self::Precedes,
            "REPLACED_BY" => Self::ReplacedBy,
            "HAS_SKILL_LEVEL" => Self::HasSkillLevel,
            other => {
                return Err(TrellisError::invalid(format!(
                    "unknown association type {other:?}"
                )))
            }
        };
        Ok(ty)
    }
}

impl fmt::Display for AssociationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One end of an association.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeRef {
    /// An item in this store.
    Item { id: ItemId, identifier: Uuid },
    /// A document in this store (the root of its tree).
    Document { id: DocumentId, identifier: Uuid },
    /// A node on a remote peer, or an arbitrary URL for exemplars.
    External { uri: String, identifier: String },
}

impl NodeRef {
    /// The lookup key of this endpoint: its identifier as a string.
    pub fn key(&self) -> String {
        match self {
            Self::Item { identifier, .. } | Self::Document { identifier, .. } => {
                identifier.to_string()
            }
            Self::External { identifier, .. } => identifier.clone(),
        }
    }

    pub fn item_id(&self) -> Option<ItemId> {
        match self {
            Self::Item { id, .. } => Some(*id),
            _ => None,
        }
    }

    pub fn document_id(&self) -> Option<DocumentId> {
        match self {
            Self::Document { id, .. } => Some(*id),
            _ => None,
        }
    }

    pub fn is_external(&self) -> bool {
        matches!(self, Self::External { .. })
    }
}

/// A typed, directed edge recorded under an owning document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Association {
    pub id: AssociationId,
    pub identifier: Uuid,
    /// The document the edge is recorded under; may differ from the endpoints'.
    pub document: DocumentId,
    pub assoc_type: AssociationType,
    pub origin: NodeRef,
    pub destination: NodeRef,
    /// Orders siblings under the same destination and type.
    pub sequence_number: Option<i64>,
    pub group: Option<GroupingId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Association {
    pub fn new(
        id: AssociationId,
        document: DocumentId,
        assoc_type: AssociationType,
        origin: NodeRef,
        destination: NodeRef,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            identifier: Uuid::new_v4(),
            document,
            assoc_type,
            origin,
            destination,
            sequence_number: None,
            group: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_child_of(&self) -> bool {
        self.assoc_type == AssociationType::ChildOf
    }

    /// Whether either endpoint is the given item.
    pub fn touches_item(&self, item: ItemId) -> bool {
        self.origin.item_id() == Some(item) || self.destination.item_id() == Some(item)
    }
}

/// A named bucket tagging a subset of a document's associations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssociationGrouping {
    pub id: GroupingId,
    pub identifier: Uuid,
    pub document: DocumentId,
    pub title: String,
    pub description: Option<String>,
}

// ── Locks ─────────────────────────────────────────────────────────

/// Something that can be locked for structural editing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum LockTarget {
    Document(DocumentId),
    Item(ItemId),
}

impl fmt::Display for LockTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Document(id) => write!(f, "document:{id}"),
            Self::Item(id) => write!(f, "item:{id}"),
        }
    }
}

/// An advisory, expirable claim of one user on a lock target.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObjectLock {
    pub target: LockTarget,
    pub user: UserId,
    pub username: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl ObjectLock {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.acquired_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_is_truncated_by_characters() {
        let long = "é".repeat(200);
        let doc = Document::new(DocumentId(1), &long);
        assert_eq!(doc.title().chars().count(), TITLE_MAX_CHARS);
        assert_eq!(doc.short_statement().chars().count(), 60);
    }

    #[test]
    fn adoption_status_controls_editability() {
        let mut doc = Document::new(DocumentId(1), "Math");
        assert!(doc.can_edit());

        doc.set_adoption_status("Private Draft").unwrap();
        assert!(doc.can_edit());
        doc.set_adoption_status("Draft").unwrap();
        assert!(doc.can_edit());
        doc.set_adoption_status("Adopted").unwrap();
        assert!(!doc.can_edit());
        assert!(doc.is_adopted());
        doc.set_adoption_status("Deprecated").unwrap();
        assert!(!doc.can_edit());
        assert!(doc.is_deprecated());
    }

    #[test]
    fn unknown_adoption_status_is_rejected() {
        let mut doc = Document::new(DocumentId(1), "Math");
        let err = doc.set_adoption_status("Published").unwrap_err();
        assert!(matches!(err, TrellisError::InvalidArgument(_)));
        assert_eq!(doc.adoption_status, None);
    }

    #[test]
    fn ownership_is_derived_from_owner() {
        let mut doc = Document::new(DocumentId(1), "Math");
        assert_eq!(doc.ownership(), None);

        doc.owner = Some(Owner::User(UserId(7)));
        assert_eq!(doc.ownership(), Some(Ownership::User));

        doc.owner = Some(Owner::Organization(OrganizationId(3)));
        assert_eq!(doc.ownership(), Some(Ownership::Organization));
        assert_eq!(doc.organization(), Some(OrganizationId(3)));

        doc.set_owned_by(Some("user")).unwrap();
        assert_eq!(doc.ownership(), Some(Ownership::User));
        assert!(doc.set_owned_by(Some("team")).is_err());
    }

    #[test]
    fn association_type_serializes_screaming_snake() {
        let json = serde_json::to_string(&AssociationType::ChildOf).unwrap();
        assert_eq!(json, "\"CHILD_OF\"");
        let json = serde_json::to_string(&AssociationType::IsPeerOf).unwrap();
        assert_eq!(json, "\"IS_PEER_OF\"");
        assert_eq!(
            "EXACT_MATCH_OF".parse::<AssociationType>().unwrap(),
            AssociationType::ExactMatchOf
        );
        assert!(AssociationType::IsRelatedTo.is_symmetric());
        assert!(!AssociationType::ChildOf.is_symmetric());
    }

    #[test]
    fn node_ref_keys_use_identifiers() {
        let item = Item::new(ItemId(5), DocumentId(1), "Count to 10");
        assert_eq!(item.node_ref().key(), item.identifier.to_string());
        assert_eq!(item.node_ref().item_id(), Some(ItemId(5)));

        let ext = NodeRef::External {
            uri: "https://peer.example/uri/abc".to_string(),
            identifier: "abc".to_string(),
        };
        assert_eq!(ext.key(), "abc");
        assert!(ext.is_external());
    }

    #[test]
    fn item_copy_gets_fresh_identity() {
        let mut item = Item::new(ItemId(5), DocumentId(1), "Count to 10");
        item.human_coding_scheme = Some("K.CC.1".to_string());
        let copy = item.copy_to(ItemId(9), DocumentId(2));
        assert_ne!(copy.identifier, item.identifier);
        assert_eq!(copy.id, ItemId(9));
        assert_eq!(copy.document, DocumentId(2));
        assert_eq!(copy.human_coding_scheme.as_deref(), Some("K.CC.1"));
    }

    #[test]
    fn store_ids_parse_from_strings() {
        assert_eq!("42".parse::<ItemId>().unwrap(), ItemId(42));
        assert!("new-1".parse::<ItemId>().is_err());
    }

    #[test]
    fn document_serialization_roundtrip() {
        let mut doc = Document::new(DocumentId(11), "Science");
        doc.set_attribute("externalDoc0", "urn:x|true|http://x|X");
        let json = serde_json::to_string(&doc).unwrap();
        let back: Document = serde_json::from_str(&json).unwrap();
        assert_eq!(back, doc);
    }
}
