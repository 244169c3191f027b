use std::collections::{HashMap, HashSet};
use std::sync::mpsc::Receiver;

use crate::document::{DocId, DocKind, Document};
use crate::event::ChangeEvent;
use crate::store::{DocumentStore, StoreError};

/// Derived per-list aggregate. Never persisted; always recomputable from
/// the live item set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ItemCounts {
    pub total: usize,
    pub checked: usize,
}

/// Secondary indexes over the store, maintained incrementally from change
/// events rather than by rescanning.
///
/// The index subscribes before seeding itself from `all_docs`, and drains
/// its receiver before answering any query, so reads always reflect every
/// event published before the call.
pub struct QueryIndex {
    events: Receiver<ChangeEvent>,
    docs: HashMap<DocId, Document>,
    by_kind: HashMap<DocKind, HashSet<DocId>>,
    by_list: HashMap<DocId, HashSet<DocId>>,
    counts: HashMap<DocId, ItemCounts>,
}

impl QueryIndex {
    pub fn attach(store: &impl DocumentStore) -> Result<Self, StoreError> {
        let events = store.subscribe();
        let mut index = Self {
            events,
            docs: HashMap::new(),
            by_kind: HashMap::new(),
            by_list: HashMap::new(),
            counts: HashMap::new(),
        };
        for doc in store.all_docs()? {
            index.upsert(doc);
        }
        Ok(index)
    }

    /// Documents of one kind, newest `created_at` first, ties broken by id.
    pub fn by_kind(&mut self, kind: DocKind) -> Vec<Document> {
        self.drain();
        let ids = self.by_kind.get(&kind);
        let mut docs: Vec<Document> = ids
            .into_iter()
            .flatten()
            .filter_map(|id| self.docs.get(id).cloned())
            .collect();
        sort_newest_first(&mut docs);
        docs
    }

    /// Items belonging to a list, newest first. A deleted list keeps its
    /// items here; deletion does not cascade.
    pub fn by_list_id(&mut self, list_id: &DocId) -> Vec<Document> {
        self.drain();
        let ids = self.by_list.get(list_id);
        let mut docs: Vec<Document> = ids
            .into_iter()
            .flatten()
            .filter_map(|id| self.docs.get(id).cloned())
            .collect();
        sort_newest_first(&mut docs);
        docs
    }

    /// `{total, checked}` for a list's items; zeros when absent.
    pub fn counts_for(&mut self, list_id: &DocId) -> ItemCounts {
        self.drain();
        self.counts.get(list_id).copied().unwrap_or_default()
    }

    fn drain(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            self.apply(event);
        }
    }

    fn apply(&mut self, event: ChangeEvent) {
        if event.deleted {
            self.remove(&event.id);
        } else if let Some(doc) = event.doc {
            self.upsert(doc);
        }
    }

    fn upsert(&mut self, doc: Document) {
        let previous = self.docs.insert(doc.id.clone(), doc.clone());
        self.by_kind.entry(doc.kind).or_default().insert(doc.id.clone());

        if doc.kind != DocKind::Item {
            return;
        }
        // Count deltas: insert adds, update adjusts the checked delta. A
        // re-seeded duplicate (same id) only contributes its delta.
        if let Some(prev) = &previous {
            if let Some(prev_list) = &prev.list_id {
                let counts = self.counts.entry(prev_list.clone()).or_default();
                counts.total -= 1;
                if prev.checked {
                    counts.checked -= 1;
                }
                if let Some(members) = self.by_list.get_mut(prev_list) {
                    members.remove(&doc.id);
                }
            }
        }
        if let Some(list_id) = &doc.list_id {
            self.by_list
                .entry(list_id.clone())
                .or_default()
                .insert(doc.id.clone());
            let counts = self.counts.entry(list_id.clone()).or_default();
            counts.total += 1;
            if doc.checked {
                counts.checked += 1;
            }
        }
    }

    fn remove(&mut self, id: &DocId) {
        let Some(doc) = self.docs.remove(id) else {
            return;
        };
        if let Some(ids) = self.by_kind.get_mut(&doc.kind) {
            ids.remove(id);
        }
        if doc.kind == DocKind::Item {
            if let Some(list_id) = &doc.list_id {
                if let Some(members) = self.by_list.get_mut(list_id) {
                    members.remove(id);
                }
                if let Some(counts) = self.counts.get_mut(list_id) {
                    counts.total -= 1;
                    if doc.checked {
                        counts.checked -= 1;
                    }
                }
            }
        }
        // Removing a list leaves by_list and counts alone: its items stay.
    }
}

fn sort_newest_first(docs: &mut [Document]) {
    docs.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.id.cmp(&a.id))
    });
}
