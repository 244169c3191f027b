use serde::{Deserialize, Serialize};
use std::sync::mpsc::Receiver;

use crate::document::{DocId, Document, Revision};
use crate::event::ChangeEvent;

/// A single row of a replication change feed, in either direction.
///
/// Pulled rows are applied through [`DocumentStore::apply_remote`]; pushed
/// rows are built from the store's own change log. `doc` carries the full
/// body for live changes and is absent on tombstones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteChange {
    pub id: DocId,
    #[serde(rename = "rev")]
    pub revision: Revision,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<Document>,
}

/// One entry of the local change feed, as returned by
/// [`DocumentStore::changes_since`].
#[derive(Debug, Clone, PartialEq)]
pub struct LoggedChange {
    pub seq: u64,
    pub id: DocId,
    pub revision: Revision,
    pub deleted: bool,
    /// Current body for live documents; `None` for tombstones.
    pub doc: Option<Document>,
}

impl LoggedChange {
    /// The outbound wire form of this change.
    pub fn to_remote(&self) -> RemoteChange {
        RemoteChange {
            id: self.id.clone(),
            revision: self.revision.clone(),
            deleted: self.deleted,
            doc: self.doc.clone(),
        }
    }
}

/// A page of the local change feed. `last_seq` is the feed position of the
/// last returned entry; resume from it to continue paging.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangePage {
    pub changes: Vec<LoggedChange>,
    pub last_seq: u64,
}

/// The trait that storage backends implement.
pub trait DocumentStore: Send + Sync {
    /// Get a document by id.
    fn get(&self, id: &DocId) -> Result<Document, StoreError>;

    /// Write a document, enforcing optimistic concurrency.
    ///
    /// A new id always succeeds and receives the first revision of its
    /// lineage. A known id must carry the currently stored revision or the
    /// write fails with [`StoreError::Conflict`], leaving stored state
    /// untouched; the caller re-reads and retries.
    fn put(&self, doc: Document) -> Result<Revision, StoreError>;

    /// Revision-checked hard delete. Publishes a tombstone event.
    fn remove(&self, id: &DocId, revision: &Revision) -> Result<(), StoreError>;

    /// Privileged entry point for the replication layer.
    ///
    /// Bypasses the revision check — the remote replica is authoritative
    /// for the lineage it assigns — and applies the last-writer-wins merge
    /// rules. Returns the published event, or `None` when the change was a
    /// no-op (tombstone for an unknown id, or a revision already stored).
    fn apply_remote(&self, change: RemoteChange) -> Result<Option<ChangeEvent>, StoreError>;

    /// Snapshot of every live document, for seeding indexes and mirrors.
    fn all_docs(&self) -> Result<Vec<Document>, StoreError>;

    /// Page the change feed from (exclusive) `since`, collapsed to the
    /// latest change per document id. With `local_only`, entries whose most
    /// recent change came from a remote replica are skipped — those never
    /// need pushing back.
    fn changes_since(
        &self,
        since: u64,
        limit: usize,
        local_only: bool,
    ) -> Result<ChangePage, StoreError>;

    /// Subscribe to change events. Each subscriber gets its own channel;
    /// events are published synchronously inside the mutating call, in
    /// commit order.
    fn subscribe(&self) -> Receiver<ChangeEvent>;

    /// Read a local (non-replicated) document, e.g. saved sync settings.
    fn get_local(&self, name: &str) -> Result<Option<serde_json::Value>, StoreError>;

    /// Write a local (non-replicated) document. Local documents never
    /// appear in queries, events, or the change feed.
    fn put_local(&self, name: &str, body: &serde_json::Value) -> Result<(), StoreError>;
}

/// Errors from the document store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The write carried a stale (or missing) revision. Recoverable:
    /// re-read and retry.
    #[error("revision conflict for {0}")]
    Conflict(DocId),

    /// Absent id on `get`/`remove`. A normal, non-fatal outcome.
    #[error("document not found: {0}")]
    NotFound(DocId),

    #[error("invalid document: {0}")]
    Validation(String),

    #[error("storage error: {0}")]
    Storage(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::DocKind;

    #[test]
    fn remote_change_wire_format() {
        let doc = Document::new_item("Apples", DocId::new_list());
        let change = RemoteChange {
            id: doc.id.clone(),
            revision: Revision::from("3-abc"),
            deleted: false,
            doc: Some(doc),
        };
        let json = serde_json::to_value(&change).unwrap();
        assert_eq!(json["rev"], "3-abc");
        assert_eq!(json["doc"]["type"], "item");

        let back: RemoteChange = serde_json::from_value(json).unwrap();
        assert_eq!(back, change);
    }

    #[test]
    fn tombstone_row_omits_doc() {
        let change = RemoteChange {
            id: DocId::new_list(),
            revision: Revision::from("2-dead"),
            deleted: true,
            doc: None,
        };
        let json = serde_json::to_value(&change).unwrap();
        assert!(json.get("doc").is_none());
        assert_eq!(json["deleted"], true);
    }

    #[test]
    fn deleted_defaults_to_false() {
        let doc = Document::new_list("Pharmacy");
        let json = serde_json::json!({
            "id": doc.id.as_str(),
            "rev": "1-abc",
            "doc": serde_json::to_value(&doc).unwrap(),
        });
        let change: RemoteChange = serde_json::from_value(json).unwrap();
        assert!(!change.deleted);
        assert_eq!(change.doc.unwrap().kind, DocKind::List);
    }

    #[test]
    fn store_error_display() {
        let err = StoreError::Conflict(DocId::from("list:1"));
        assert!(err.to_string().contains("conflict"));
        let err = StoreError::NotFound(DocId::from("item:9"));
        assert!(err.to_string().contains("not found"));
    }
}
