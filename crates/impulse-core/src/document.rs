use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Document kind, encoded both in the id prefix and the `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocKind {
    List,
    Item,
}

impl DocKind {
    pub fn id_prefix(&self) -> &'static str {
        match self {
            DocKind::List => "list:",
            DocKind::Item => "item:",
        }
    }
}

impl std::fmt::Display for DocKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DocKind::List => write!(f, "list"),
            DocKind::Item => write!(f, "item"),
        }
    }
}

/// Globally unique document identifier.
///
/// The prefix (`list:` / `item:`) encodes the kind; ids with any other
/// prefix belong to foreign applications sharing the replica and are
/// ignored by the sync layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocId(String);

impl DocId {
    pub fn new_list() -> Self {
        Self(format!("list:{}", Uuid::new_v4()))
    }

    pub fn new_item() -> Self {
        Self(format!("item:{}", Uuid::new_v4()))
    }

    /// Kind derived from the id prefix, or `None` for foreign ids.
    pub fn kind(&self) -> Option<DocKind> {
        if self.0.starts_with(DocKind::List.id_prefix()) {
            Some(DocKind::List)
        } else if self.0.starts_with(DocKind::Item.id_prefix()) {
            Some(DocKind::Item)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DocId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for DocId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for DocId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque revision token assigned by the store on every successful write.
///
/// The textual form is `{generation}-{suffix}`. Only the store (or the
/// remote replica, for pulled changes) mints these; callers carry them back
/// unchanged for optimistic-concurrency checks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Revision(String);

impl Revision {
    /// First revision of a brand-new lineage.
    pub fn first() -> Self {
        Self(format!("1-{}", Uuid::new_v4().simple()))
    }

    /// The revision following this one in the same lineage.
    pub fn next(&self) -> Self {
        Self(format!("{}-{}", self.generation() + 1, Uuid::new_v4().simple()))
    }

    /// Numeric prefix used to order two revisions of the same document.
    pub fn generation(&self) -> u64 {
        self.0
            .split('-')
            .next()
            .and_then(|g| g.parse().ok())
            .unwrap_or(0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Revision {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Revision {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for Revision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Raw geocoder address, kept as the key/value map the lookup returned.
pub type Address = BTreeMap<String, String>;

/// Where a shopping list's store is. All fields stay null until a geocode
/// lookup populates them; a failed lookup leaves them null.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Place {
    pub title: Option<String>,
    pub license: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    #[serde(default)]
    pub address: Address,
}

/// A shopping list or a list item.
///
/// One struct covers both kinds: `place` is only meaningful on lists,
/// `list_id` only on items. The serde names match the replicated JSON
/// format, so documents round-trip through the change feed unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(rename = "_id")]
    pub id: DocId,
    #[serde(rename = "type")]
    pub kind: DocKind,
    #[serde(rename = "version")]
    pub schema_version: u32,
    pub title: String,
    pub checked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub place: Option<Place>,
    #[serde(rename = "list", default, skip_serializing_if = "Option::is_none")]
    pub list_id: Option<DocId>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<Revision>,
}

/// Current schema version stamped on new documents.
pub const SCHEMA_VERSION: u32 = 1;

impl Document {
    /// A not-yet-persisted shopping list.
    pub fn new_list(title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: DocId::new_list(),
            kind: DocKind::List,
            schema_version: SCHEMA_VERSION,
            title: title.into(),
            checked: false,
            place: Some(Place::default()),
            list_id: None,
            created_at: now,
            updated_at: now,
            revision: None,
        }
    }

    /// A not-yet-persisted item belonging to `list_id`.
    pub fn new_item(title: impl Into<String>, list_id: DocId) -> Self {
        let now = Utc::now();
        Self {
            id: DocId::new_item(),
            kind: DocKind::Item,
            schema_version: SCHEMA_VERSION,
            title: title.into(),
            checked: false,
            place: None,
            list_id: Some(list_id),
            created_at: now,
            updated_at: now,
            revision: None,
        }
    }
}
