use std::sync::mpsc::Receiver;

use crate::document::{DocId, DocKind, Document};
use crate::event::ChangeEvent;
use crate::store::{DocumentStore, StoreError};

/// Observer-maintained projection of the store: the collections a caller
/// renders.
///
/// The mirror never originates a mutation. It applies change events in
/// published order — local edits and pulled remote changes look identical
/// to it — so the displayed collections cannot diverge from the store.
pub struct ViewMirror {
    events: Receiver<ChangeEvent>,
    lists: Vec<Document>,
    items: Vec<Document>,
}

impl ViewMirror {
    pub fn attach(store: &impl DocumentStore) -> Result<Self, StoreError> {
        let events = store.subscribe();
        let mut mirror = Self {
            events,
            lists: Vec::new(),
            items: Vec::new(),
        };
        let mut docs = store.all_docs()?;
        docs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        for doc in docs {
            mirror.upsert(doc);
        }
        Ok(mirror)
    }

    /// Shopping lists in display order (newest prepended first).
    pub fn lists(&mut self) -> &[Document] {
        self.drain();
        &self.lists
    }

    /// List items in display order.
    pub fn items(&mut self) -> &[Document] {
        self.drain();
        &self.items
    }

    fn drain(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            self.apply(event);
        }
    }

    fn apply(&mut self, event: ChangeEvent) {
        if event.deleted {
            self.remove(event.kind, &event.id);
        } else if let Some(doc) = event.doc {
            self.upsert(doc);
        }
    }

    fn upsert(&mut self, doc: Document) {
        let collection = self.collection_mut(doc.kind);
        match collection.iter().position(|d| d.id == doc.id) {
            // Known id: replace in place, never duplicate.
            Some(i) => collection[i] = doc,
            // New id: prepend.
            None => collection.insert(0, doc),
        }
    }

    fn remove(&mut self, kind: DocKind, id: &DocId) {
        let collection = self.collection_mut(kind);
        if let Some(i) = collection.iter().position(|d| d.id == *id) {
            collection.remove(i);
        }
    }

    fn collection_mut(&mut self, kind: DocKind) -> &mut Vec<Document> {
        match kind {
            DocKind::List => &mut self.lists,
            DocKind::Item => &mut self.items,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Revision;
    use crate::sqlite_store::SqliteDocumentStore;
    use crate::store::RemoteChange;

    fn setup() -> (SqliteDocumentStore, ViewMirror) {
        let store = SqliteDocumentStore::open_in_memory().unwrap();
        let mirror = ViewMirror::attach(&store).unwrap();
        (store, mirror)
    }

    #[test]
    fn local_edits_flow_into_collections() {
        let (store, mut mirror) = setup();

        let mut list = Document::new_list("Groceries");
        list.revision = Some(store.put(list.clone()).unwrap());
        let second = Document::new_list("Hardware");
        store.put(second.clone()).unwrap();

        // Newest prepended first.
        let lists = mirror.lists();
        assert_eq!(lists.len(), 2);
        assert_eq!(lists[0].id, second.id);

        // Update replaces in place, position preserved.
        list.title = "Groceries (weekend)".into();
        list.revision = Some(store.put(list.clone()).unwrap());
        let lists = mirror.lists();
        assert_eq!(lists.len(), 2);
        assert_eq!(lists[1].title, "Groceries (weekend)");

        store
            .remove(&list.id, list.revision.as_ref().unwrap())
            .unwrap();
        assert_eq!(mirror.lists().len(), 1);
    }

    #[test]
    fn remote_update_replaces_without_duplicating() {
        let (store, mut mirror) = setup();

        let mut list = Document::new_list("Groceries");
        store.put(list.clone()).unwrap();
        assert_eq!(mirror.lists().len(), 1);

        // Remote feed delivers a rename with a higher-order revision.
        list.title = "Groceries (synced)".into();
        store
            .apply_remote(RemoteChange {
                id: list.id.clone(),
                revision: Revision::from("8-remote"),
                deleted: false,
                doc: Some(list.clone()),
            })
            .unwrap();

        let lists = mirror.lists();
        assert_eq!(lists.len(), 1);
        assert_eq!(lists[0].title, "Groceries (synced)");
    }

    #[test]
    fn remote_tombstones_remove_in_place() {
        let (store, mut mirror) = setup();

        let list = Document::new_list("Groceries");
        store.put(list.clone()).unwrap();
        let item = Document::new_item("Mangos", list.id.clone());
        store.put(item.clone()).unwrap();

        // Unknown id: nothing happens.
        store
            .apply_remote(RemoteChange {
                id: DocId::new_item(),
                revision: Revision::from("1-x"),
                deleted: true,
                doc: None,
            })
            .unwrap();
        assert_eq!(mirror.items().len(), 1);

        store
            .apply_remote(RemoteChange {
                id: item.id.clone(),
                revision: Revision::from("2-remote"),
                deleted: true,
                doc: None,
            })
            .unwrap();
        assert!(mirror.items().is_empty());
        assert_eq!(mirror.lists().len(), 1);
    }

    #[test]
    fn attach_seeds_in_display_order() {
        let store = SqliteDocumentStore::open_in_memory().unwrap();
        let mut older = Document::new_list("Older");
        older.created_at = "2024-03-01T10:00:00Z".parse().unwrap();
        older.updated_at = older.created_at;
        let mut newer = Document::new_list("Newer");
        newer.created_at = "2024-03-02T10:00:00Z".parse().unwrap();
        newer.updated_at = newer.created_at;
        store.put(older.clone()).unwrap();
        store.put(newer.clone()).unwrap();

        let mut mirror = ViewMirror::attach(&store).unwrap();
        let lists = mirror.lists();
        assert_eq!(lists[0].id, newer.id);
        assert_eq!(lists[1].id, older.id);
    }
}
