use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use impulse_core::{DocumentStore, LoggedChange};

use crate::error::SyncError;
use crate::transport::{HttpTransport, ReplicationTransport};

/// Name of the `_local` document holding saved sync settings.
pub const SETTINGS_DOC: &str = "user";

const CHECKPOINT_DOC: &str = "sync-checkpoint";

/// Reported sync health. Drives the caller's persistent status indicator;
/// errors surface here, never as failures of CRUD calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    NotSyncing,
    Syncing,
    Error,
}

/// Internal phase of a live session. A replicator without a session is
/// idle; a session starts in `Connecting` and never leaves this loop
/// except through auth denial or cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionPhase {
    /// Handshake against the endpoint.
    Connecting,
    /// Steady state: push pending local changes, pull remote batches.
    Streaming,
    /// Both directions drained; the connection stays configured and the
    /// session wakes on the poll interval. Not an error.
    Paused,
    /// Transport failure; back off, then reconnect.
    Erroring,
}

/// Tuning knobs for a replication session.
#[derive(Debug, Clone)]
pub struct ReplicatorOptions {
    /// Sleep between exchanges once both directions are drained.
    pub poll_interval: Duration,
    /// Maximum changes per push or pull batch.
    pub batch_limit: usize,
    /// Initial backoff after a transport failure; doubles up to
    /// `max_backoff`.
    pub retry_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for ReplicatorOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            batch_limit: 100,
            retry_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
        }
    }
}

/// Replication feed positions, persisted as a `_local` document so a
/// restarted session resumes instead of re-exchanging everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Checkpoints {
    #[serde(default)]
    push_seq: u64,
    #[serde(default)]
    pull_seq: Option<String>,
}

impl Checkpoints {
    fn load(store: &impl DocumentStore) -> Result<Self, SyncError> {
        match store.get_local(CHECKPOINT_DOC)? {
            Some(value) => serde_json::from_value(value)
                .map_err(|e| SyncError::Store(impulse_core::StoreError::Storage(e.to_string()))),
            None => Ok(Self::default()),
        }
    }

    fn save(&self, store: &impl DocumentStore) -> Result<(), SyncError> {
        let value = serde_json::to_value(self)
            .map_err(|e| SyncError::Store(impulse_core::StoreError::Storage(e.to_string())))?;
        store.put_local(CHECKPOINT_DOC, &value)?;
        Ok(())
    }
}

/// Persist the sync endpoint in the store's local settings document.
pub fn save_endpoint(store: &impl DocumentStore, endpoint: &str) -> Result<(), SyncError> {
    store.put_local(SETTINGS_DOC, &serde_json::json!({ "syncURL": endpoint }))?;
    Ok(())
}

/// The endpoint saved by [`save_endpoint`], if any.
pub fn saved_endpoint(store: &impl DocumentStore) -> Result<Option<String>, SyncError> {
    let url = store.get_local(SETTINGS_DOC)?.and_then(|settings| {
        settings
            .get("syncURL")
            .and_then(|u| u.as_str())
            .map(str::to_string)
    });
    Ok(url.filter(|u| !u.is_empty()))
}

/// Bidirectional replication driver: owns at most one live session per
/// store, reports health through a watch channel, and translates the
/// remote change feed into `apply_remote` calls.
pub struct Replicator<S: DocumentStore + 'static> {
    store: Arc<S>,
    options: ReplicatorOptions,
    status: Arc<watch::Sender<SyncStatus>>,
    status_rx: watch::Receiver<SyncStatus>,
    session: Mutex<Option<JoinHandle<()>>>,
}

impl<S: DocumentStore + 'static> Replicator<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self::with_options(store, ReplicatorOptions::default())
    }

    pub fn with_options(store: Arc<S>, options: ReplicatorOptions) -> Self {
        let (status, status_rx) = watch::channel(SyncStatus::NotSyncing);
        Self {
            store,
            options,
            status: Arc::new(status),
            status_rx,
            session: Mutex::new(None),
        }
    }

    pub fn status(&self) -> SyncStatus {
        *self.status_rx.borrow()
    }

    /// Watch status transitions (e.g. to drive a status indicator).
    pub fn watch_status(&self) -> watch::Receiver<SyncStatus> {
        self.status_rx.clone()
    }

    /// Start replicating against an HTTP endpoint, replacing any running
    /// session. Must be called from within a tokio runtime.
    pub fn start_url(&self, endpoint: &str) -> Result<(), SyncError> {
        let transport = HttpTransport::new(endpoint)?;
        self.start(transport)
    }

    /// Start a session over the given transport, replacing any running
    /// session. The previous session's in-flight network operation is
    /// cancelled before the new one begins; two sessions never run
    /// concurrently.
    pub fn start<T: ReplicationTransport>(&self, transport: T) -> Result<(), SyncError> {
        self.stop();
        let session = Session {
            store: Arc::clone(&self.store),
            transport,
            status: Arc::clone(&self.status),
            options: self.options.clone(),
            checkpoints: Checkpoints::load(self.store.as_ref())?,
        };
        let handle = tokio::spawn(session.run());
        if let Ok(mut slot) = self.session.lock() {
            *slot = Some(handle);
        }
        Ok(())
    }

    /// Cancel the running session, if any, and report `NotSyncing`.
    pub fn stop(&self) {
        if let Ok(mut slot) = self.session.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
        let _ = self.status.send(SyncStatus::NotSyncing);
    }

    /// Persist the endpoint and (re)start replication against it.
    pub fn configure(&self, endpoint: &str) -> Result<(), SyncError> {
        save_endpoint(self.store.as_ref(), endpoint)?;
        self.start_url(endpoint)
    }

    /// Read persisted settings once and auto-start when an endpoint was
    /// saved. Returns whether a session was started.
    pub fn resume_from_settings(&self) -> Result<bool, SyncError> {
        match saved_endpoint(self.store.as_ref())? {
            Some(endpoint) => {
                self.start_url(&endpoint)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl<S: DocumentStore + 'static> Drop for Replicator<S> {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.session.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
    }
}

struct Session<S, T> {
    store: Arc<S>,
    transport: T,
    status: Arc<watch::Sender<SyncStatus>>,
    options: ReplicatorOptions,
    checkpoints: Checkpoints,
}

impl<S: DocumentStore + 'static, T: ReplicationTransport> Session<S, T> {
    async fn run(mut self) {
        let mut phase = SessionPhase::Connecting;
        let mut backoff = self.options.retry_backoff;
        let _ = self.status.send(SyncStatus::Syncing);

        loop {
            match phase {
                SessionPhase::Connecting => match self.transport.handshake().await {
                    Ok(()) => {
                        tracing::info!("replication endpoint reachable");
                        let _ = self.status.send(SyncStatus::Syncing);
                        backoff = self.options.retry_backoff;
                        phase = SessionPhase::Streaming;
                    }
                    Err(SyncError::AuthDenied(reason)) => {
                        tracing::error!(%reason, "replication denied, stopping session");
                        let _ = self.status.send(SyncStatus::Error);
                        return;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "handshake failed");
                        let _ = self.status.send(SyncStatus::Error);
                        phase = SessionPhase::Erroring;
                    }
                },
                SessionPhase::Streaming => match self.exchange().await {
                    // More may be pending; exchange again right away.
                    Ok(true) => {}
                    Ok(false) => phase = SessionPhase::Paused,
                    Err(SyncError::AuthDenied(reason)) => {
                        tracing::error!(%reason, "replication denied, stopping session");
                        let _ = self.status.send(SyncStatus::Error);
                        return;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "exchange failed");
                        let _ = self.status.send(SyncStatus::Error);
                        phase = SessionPhase::Erroring;
                    }
                },
                SessionPhase::Paused => {
                    tokio::time::sleep(self.options.poll_interval).await;
                    phase = SessionPhase::Streaming;
                }
                SessionPhase::Erroring => {
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(self.options.max_backoff);
                    phase = SessionPhase::Connecting;
                }
            }
        }
    }

    /// One push + pull round. Returns whether anything moved.
    async fn exchange(&mut self) -> Result<bool, SyncError> {
        let pushed = self.push_pending().await?;
        let pulled = self.pull_once().await?;
        Ok(pushed + pulled > 0)
    }

    /// Push local-origin changes the remote has not seen yet.
    async fn push_pending(&mut self) -> Result<usize, SyncError> {
        let page = self.store.changes_since(
            self.checkpoints.push_seq,
            self.options.batch_limit,
            true,
        )?;
        if page.changes.is_empty() {
            return Ok(0);
        }
        let rows: Vec<_> = page.changes.iter().map(LoggedChange::to_remote).collect();
        self.transport.push(&rows).await?;
        self.checkpoints.push_seq = page.last_seq;
        self.checkpoints.save(self.store.as_ref())?;
        tracing::debug!(count = rows.len(), "pushed local changes");
        Ok(rows.len())
    }

    /// Pull one remote batch and apply it. Returns the number of changes
    /// that actually altered local state, so echoes of our own pushes do
    /// not keep the session hot.
    async fn pull_once(&mut self) -> Result<usize, SyncError> {
        let batch = self
            .transport
            .pull(self.checkpoints.pull_seq.as_deref(), self.options.batch_limit)
            .await?;
        let mut applied = 0;
        for change in batch.results {
            // Foreign applications share the replica; their documents are
            // not ours to store.
            if change.id.kind().is_none() {
                tracing::debug!(id = %change.id, "skipping foreign document");
                continue;
            }
            if self.store.apply_remote(change)?.is_some() {
                applied += 1;
            }
        }
        if let Some(last_seq) = batch.last_seq {
            if self.checkpoints.pull_seq.as_deref() != Some(last_seq.as_str()) {
                self.checkpoints.pull_seq = Some(last_seq);
                self.checkpoints.save(self.store.as_ref())?;
            }
        }
        if applied > 0 {
            tracing::debug!(count = applied, "applied remote changes");
        }
        Ok(applied)
    }
}
