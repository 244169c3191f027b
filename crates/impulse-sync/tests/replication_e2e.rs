//! End-to-end replication over a scripted transport: a live session
//! pushes local edits, pulls remote batches, and the mirror and index
//! stay consistent with the store throughout.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use impulse_core::{
    DocKind, Document, QueryIndex, RemoteChange, Revision, SqliteDocumentStore, ViewMirror,
};
use impulse_core::store::DocumentStore;
use impulse_sync::{ChangeBatch, ReplicationTransport, Replicator, ReplicatorOptions, SyncError};

/// Feeds one scripted batch per pull and records every push.
#[derive(Clone, Default)]
struct ScriptedTransport {
    pulls: Arc<Mutex<VecDeque<ChangeBatch>>>,
    pushed: Arc<Mutex<Vec<RemoteChange>>>,
}

impl ReplicationTransport for ScriptedTransport {
    async fn handshake(&self) -> Result<(), SyncError> {
        Ok(())
    }

    async fn pull(&self, _since: Option<&str>, _limit: usize) -> Result<ChangeBatch, SyncError> {
        Ok(self.pulls.lock().unwrap().pop_front().unwrap_or_default())
    }

    async fn push(&self, changes: &[RemoteChange]) -> Result<(), SyncError> {
        self.pushed.lock().unwrap().extend(changes.to_vec());
        Ok(())
    }
}

async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = Duration::from_secs(5);
    tokio::time::timeout(deadline, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {}", what));
}

#[tokio::test]
async fn live_session_reconciles_both_directions() {
    let store = Arc::new(SqliteDocumentStore::open_in_memory().unwrap());
    let mut index = QueryIndex::attach(store.as_ref()).unwrap();
    let mut mirror = ViewMirror::attach(store.as_ref()).unwrap();

    // Local state before the session: one list with one item.
    let local_list = Document::new_list("Groceries");
    store.put(local_list.clone()).unwrap();
    let local_item = Document::new_item("Mangos", local_list.id.clone());
    store.put(local_item.clone()).unwrap();

    // The remote feed will deliver a new list and a rename of ours.
    let remote_list = Document::new_list("Hardware store");
    let mut renamed = local_list.clone();
    renamed.title = "Groceries (synced)".into();
    let transport = ScriptedTransport::default();
    transport.pulls.lock().unwrap().push_back(ChangeBatch {
        results: vec![
            RemoteChange {
                id: remote_list.id.clone(),
                revision: Revision::from("1-remote"),
                deleted: false,
                doc: Some(remote_list.clone()),
            },
            RemoteChange {
                id: local_list.id.clone(),
                revision: Revision::from("5-remote"),
                deleted: false,
                doc: Some(renamed),
            },
        ],
        last_seq: Some("2".into()),
    });

    let replicator = Replicator::with_options(
        Arc::clone(&store),
        ReplicatorOptions {
            poll_interval: Duration::from_millis(10),
            ..ReplicatorOptions::default()
        },
    );
    replicator.start(transport.clone()).unwrap();

    // Outward: both local documents get pushed.
    let pushed = Arc::clone(&transport.pushed);
    eventually("local changes to be pushed", move || {
        pushed.lock().unwrap().len() == 2
    })
    .await;
    {
        let pushed = transport.pushed.lock().unwrap();
        assert!(pushed.iter().any(|c| c.id == local_list.id));
        assert!(pushed.iter().any(|c| c.id == local_item.id));
        assert!(pushed.iter().all(|c| !c.deleted));
    }

    // Inward: the pulled batch lands in the store.
    {
        let store = Arc::clone(&store);
        let remote_id = remote_list.id.clone();
        eventually("remote changes to be applied", move || {
            store.get(&remote_id).is_ok()
        })
        .await;
    }
    assert_eq!(
        store.get(&local_list.id).unwrap().title,
        "Groceries (synced)"
    );

    // Projections caught up without duplicating the renamed list.
    let lists = mirror.lists();
    assert_eq!(lists.len(), 2);
    assert_eq!(
        lists
            .iter()
            .filter(|d| d.id == local_list.id)
            .map(|d| d.title.as_str())
            .collect::<Vec<_>>(),
        vec!["Groceries (synced)"]
    );
    assert_eq!(index.by_kind(DocKind::List).len(), 2);
    assert_eq!(index.counts_for(&local_list.id).total, 1);

    replicator.stop();
}

#[tokio::test]
async fn pushed_changes_pulled_back_cause_no_churn() {
    let store = Arc::new(SqliteDocumentStore::open_in_memory().unwrap());
    let list = Document::new_list("Groceries");
    let rev = store.put(list.clone()).unwrap();

    // The remote echoes our own push back through the feed.
    let mut echoed = list.clone();
    echoed.revision = Some(rev.clone());
    let transport = ScriptedTransport::default();
    transport.pulls.lock().unwrap().push_back(ChangeBatch {
        results: vec![RemoteChange {
            id: list.id.clone(),
            revision: rev.clone(),
            deleted: false,
            doc: Some(echoed),
        }],
        last_seq: Some("1".into()),
    });

    let mut mirror = ViewMirror::attach(store.as_ref()).unwrap();
    let replicator = Replicator::with_options(
        Arc::clone(&store),
        ReplicatorOptions {
            poll_interval: Duration::from_millis(10),
            ..ReplicatorOptions::default()
        },
    );
    replicator.start(transport.clone()).unwrap();

    let pushed = Arc::clone(&transport.pushed);
    eventually("the local list to be pushed", move || {
        !pushed.lock().unwrap().is_empty()
    })
    .await;
    // Give the echoed pull a chance to be (not) applied.
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(store.get(&list.id).unwrap().revision, Some(rev));
    assert_eq!(mirror.lists().len(), 1);
    replicator.stop();
}
