use std::path::Path;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::document::{DocId, DocKind, Document, Revision};
use crate::event::ChangeEvent;
use crate::store::{ChangePage, DocumentStore, LoggedChange, RemoteChange, StoreError};

/// SQLite-backed implementation of the DocumentStore trait.
///
/// All mutations run inside a transaction while holding the connection
/// lock, and publish their change event before releasing it, so
/// subscribers observe events in commit order.
pub struct SqliteDocumentStore {
    conn: Mutex<Connection>,
    subscribers: Mutex<Vec<Sender<ChangeEvent>>>,
}

impl SqliteDocumentStore {
    /// Open (or create) a database at the given path.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn =
            Connection::open(path).map_err(|e| StoreError::Storage(format!("open: {}", e)))?;
        Self::init_with_connection(conn)
    }

    /// Create an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StoreError::Storage(format!("open_in_memory: {}", e)))?;
        Self::init_with_connection(conn)
    }

    fn init_with_connection(conn: Connection) -> Result<Self, StoreError> {
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            subscribers: Mutex::new(Vec::new()),
        })
    }

    fn init_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;

            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                revision TEXT NOT NULL,
                body TEXT NOT NULL
            );

            -- Append-only change feed. AUTOINCREMENT so seq values are
            -- never reused, even after rows for an id are superseded.
            CREATE TABLE IF NOT EXISTS changes (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                doc_id TEXT NOT NULL,
                revision TEXT NOT NULL,
                deleted INTEGER NOT NULL DEFAULT 0,
                origin TEXT NOT NULL DEFAULT 'local'
            );

            -- _local/... documents: settings and checkpoints. Never
            -- replicated, never queried, never in the feed.
            CREATE TABLE IF NOT EXISTS local_docs (
                name TEXT PRIMARY KEY,
                body TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_changes_doc ON changes(doc_id);
            ",
        )
        .map_err(|e| StoreError::Storage(format!("init_schema: {}", e)))?;
        Ok(())
    }

    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Storage("connection lock poisoned".into()))
    }

    fn emit(&self, event: ChangeEvent) {
        let mut subs = match self.subscribers.lock() {
            Ok(s) => s,
            Err(_) => return,
        };
        // Drop subscribers whose receiver is gone.
        subs.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn read_doc(conn: &Connection, id: &DocId) -> Result<Option<Document>, StoreError> {
        let body: Option<String> = conn
            .query_row(
                "SELECT body FROM documents WHERE id = ?1",
                params![id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| StoreError::Storage(format!("read: {}", e)))?;
        match body {
            Some(json) => {
                let doc = serde_json::from_str(&json)
                    .map_err(|e| StoreError::Storage(format!("parse body: {}", e)))?;
                Ok(Some(doc))
            }
            None => Ok(None),
        }
    }

    fn write_doc(conn: &Connection, doc: &Document) -> Result<(), StoreError> {
        let revision = doc
            .revision
            .as_ref()
            .ok_or_else(|| StoreError::Storage("write without revision".into()))?;
        let body = serde_json::to_string(doc).map_err(|e| StoreError::Storage(e.to_string()))?;
        conn.execute(
            "INSERT OR REPLACE INTO documents (id, revision, body) VALUES (?1, ?2, ?3)",
            params![doc.id.as_str(), revision.as_str(), body],
        )
        .map_err(|e| StoreError::Storage(format!("write: {}", e)))?;
        Ok(())
    }

    fn log_change(
        conn: &Connection,
        id: &DocId,
        revision: &Revision,
        deleted: bool,
        origin: &str,
    ) -> Result<u64, StoreError> {
        conn.execute(
            "INSERT INTO changes (doc_id, revision, deleted, origin) VALUES (?1, ?2, ?3, ?4)",
            params![id.as_str(), revision.as_str(), deleted as i32, origin],
        )
        .map_err(|e| StoreError::Storage(format!("log change: {}", e)))?;
        Ok(conn.last_insert_rowid() as u64)
    }

    fn validate(doc: &Document) -> Result<(), StoreError> {
        if doc.id.kind() != Some(doc.kind) {
            return Err(StoreError::Validation(format!(
                "id '{}' does not match kind '{}'",
                doc.id, doc.kind
            )));
        }
        match doc.kind {
            DocKind::Item if doc.list_id.is_none() => Err(StoreError::Validation(format!(
                "item '{}' has no list",
                doc.id
            ))),
            DocKind::List if doc.list_id.is_some() => Err(StoreError::Validation(format!(
                "list '{}' carries a list reference",
                doc.id
            ))),
            _ => Ok(()),
        }
    }
}

impl DocumentStore for SqliteDocumentStore {
    fn get(&self, id: &DocId) -> Result<Document, StoreError> {
        let conn = self.lock_conn()?;
        Self::read_doc(&conn, id)?.ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    fn put(&self, mut doc: Document) -> Result<Revision, StoreError> {
        Self::validate(&doc)?;
        let mut conn = self.lock_conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| StoreError::Storage(format!("begin: {}", e)))?;

        let stored = Self::read_doc(&tx, &doc.id)?;
        let new_revision = match &stored {
            None => Revision::first(),
            Some(current) => {
                let current_rev = current
                    .revision
                    .as_ref()
                    .ok_or_else(|| StoreError::Storage("stored doc without revision".into()))?;
                if doc.revision.as_ref() != Some(current_rev) {
                    return Err(StoreError::Conflict(doc.id.clone()));
                }
                // The caller did not bump the timestamp; do it for them.
                if doc.updated_at == current.updated_at {
                    doc.updated_at = Utc::now();
                }
                current_rev.next()
            }
        };
        doc.revision = Some(new_revision.clone());

        Self::write_doc(&tx, &doc)?;
        let seq = Self::log_change(&tx, &doc.id, &new_revision, false, "local")?;
        tx.commit()
            .map_err(|e| StoreError::Storage(format!("commit: {}", e)))?;

        self.emit(ChangeEvent {
            seq,
            id: doc.id.clone(),
            kind: doc.kind,
            doc: Some(doc),
            revision: Some(new_revision.clone()),
            deleted: false,
        });
        Ok(new_revision)
    }

    fn remove(&self, id: &DocId, revision: &Revision) -> Result<(), StoreError> {
        let mut conn = self.lock_conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| StoreError::Storage(format!("begin: {}", e)))?;

        let stored = Self::read_doc(&tx, id)?.ok_or_else(|| StoreError::NotFound(id.clone()))?;
        let current_rev = stored
            .revision
            .as_ref()
            .ok_or_else(|| StoreError::Storage("stored doc without revision".into()))?;
        if revision != current_rev {
            return Err(StoreError::Conflict(id.clone()));
        }

        tx.execute("DELETE FROM documents WHERE id = ?1", params![id.as_str()])
            .map_err(|e| StoreError::Storage(format!("delete: {}", e)))?;
        let tombstone_rev = current_rev.next();
        let seq = Self::log_change(&tx, id, &tombstone_rev, true, "local")?;
        tx.commit()
            .map_err(|e| StoreError::Storage(format!("commit: {}", e)))?;

        self.emit(ChangeEvent {
            seq,
            id: id.clone(),
            kind: stored.kind,
            doc: None,
            revision: Some(tombstone_rev),
            deleted: true,
        });
        Ok(())
    }

    fn apply_remote(&self, change: RemoteChange) -> Result<Option<ChangeEvent>, StoreError> {
        let kind = change.id.kind().ok_or_else(|| {
            StoreError::Validation(format!("foreign id '{}' in remote change", change.id))
        })?;

        let mut conn = self.lock_conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| StoreError::Storage(format!("begin: {}", e)))?;

        let stored = Self::read_doc(&tx, &change.id)?;
        let event = match (stored, change.deleted) {
            // Unknown id, tombstone: nothing to remove.
            (None, true) => None,
            // Known id, tombstone: remove the local document.
            (Some(_), true) => {
                tx.execute(
                    "DELETE FROM documents WHERE id = ?1",
                    params![change.id.as_str()],
                )
                .map_err(|e| StoreError::Storage(format!("delete: {}", e)))?;
                let seq = Self::log_change(&tx, &change.id, &change.revision, true, "remote")?;
                Some(ChangeEvent {
                    seq,
                    id: change.id.clone(),
                    kind,
                    doc: None,
                    revision: Some(change.revision.clone()),
                    deleted: true,
                })
            }
            // Live change: insert when unknown, overwrite when known. The
            // remote is the source of truth for pulled changes; its version
            // wins unconditionally. A revision we already store is an echo
            // of our own push and is skipped.
            (stored, false) => {
                if stored.as_ref().and_then(|d| d.revision.as_ref()) == Some(&change.revision) {
                    return Ok(None);
                }
                let mut doc = change.doc.clone().ok_or_else(|| {
                    StoreError::Validation(format!("live change for '{}' without body", change.id))
                })?;
                doc.id = change.id.clone();
                doc.revision = Some(change.revision.clone());
                Self::validate(&doc)?;
                Self::write_doc(&tx, &doc)?;
                let seq = Self::log_change(&tx, &change.id, &change.revision, false, "remote")?;
                Some(ChangeEvent {
                    seq,
                    id: change.id.clone(),
                    kind,
                    doc: Some(doc),
                    revision: Some(change.revision.clone()),
                    deleted: false,
                })
            }
        };

        if let Some(event) = event {
            tx.commit()
                .map_err(|e| StoreError::Storage(format!("commit: {}", e)))?;
            self.emit(event.clone());
            Ok(Some(event))
        } else {
            Ok(None)
        }
    }

    fn all_docs(&self) -> Result<Vec<Document>, StoreError> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare("SELECT body FROM documents")
            .map_err(|e| StoreError::Storage(format!("all_docs: {}", e)))?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| StoreError::Storage(format!("all_docs: {}", e)))?;
        let mut docs = Vec::new();
        for body in rows {
            let body = body.map_err(|e| StoreError::Storage(format!("all_docs row: {}", e)))?;
            let doc = serde_json::from_str(&body)
                .map_err(|e| StoreError::Storage(format!("parse body: {}", e)))?;
            docs.push(doc);
        }
        Ok(docs)
    }

    fn changes_since(
        &self,
        since: u64,
        limit: usize,
        local_only: bool,
    ) -> Result<ChangePage, StoreError> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT c.seq, c.doc_id, c.revision, c.deleted
                 FROM changes c
                 JOIN (SELECT doc_id, MAX(seq) AS last FROM changes GROUP BY doc_id) latest
                   ON c.doc_id = latest.doc_id AND c.seq = latest.last
                 WHERE c.seq > ?1 AND (?2 = 0 OR c.origin = 'local')
                 ORDER BY c.seq ASC
                 LIMIT ?3",
            )
            .map_err(|e| StoreError::Storage(format!("changes: {}", e)))?;
        let rows = stmt
            .query_map(
                params![since as i64, local_only as i32, limit as i64],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, bool>(3)?,
                    ))
                },
            )
            .map_err(|e| StoreError::Storage(format!("changes: {}", e)))?;

        let mut page = ChangePage::default();
        page.last_seq = since;
        for row in rows {
            let (seq, doc_id, revision, deleted) =
                row.map_err(|e| StoreError::Storage(format!("changes row: {}", e)))?;
            let id = DocId::from(doc_id);
            let doc = if deleted {
                None
            } else {
                Some(Self::read_doc(&conn, &id)?.ok_or_else(|| {
                    StoreError::Storage(format!("live change without document: {}", id))
                })?)
            };
            page.last_seq = seq as u64;
            page.changes.push(LoggedChange {
                seq: seq as u64,
                id,
                revision: Revision::from(revision),
                deleted,
                doc,
            });
        }
        Ok(page)
    }

    fn subscribe(&self) -> Receiver<ChangeEvent> {
        let (tx, rx) = mpsc::channel();
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.push(tx);
        }
        rx
    }

    fn get_local(&self, name: &str) -> Result<Option<serde_json::Value>, StoreError> {
        let conn = self.lock_conn()?;
        let body: Option<String> = conn
            .query_row(
                "SELECT body FROM local_docs WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| StoreError::Storage(format!("get_local: {}", e)))?;
        match body {
            Some(json) => {
                let value = serde_json::from_str(&json)
                    .map_err(|e| StoreError::Storage(format!("parse local: {}", e)))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn put_local(&self, name: &str, body: &serde_json::Value) -> Result<(), StoreError> {
        let conn = self.lock_conn()?;
        let json = serde_json::to_string(body).map_err(|e| StoreError::Storage(e.to_string()))?;
        conn.execute(
            "INSERT OR REPLACE INTO local_docs (name, body) VALUES (?1, ?2)",
            params![name, json],
        )
        .map_err(|e| StoreError::Storage(format!("put_local: {}", e)))?;
        Ok(())
    }
}
