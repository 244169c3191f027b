//! Bidirectional replication for the impulse document store.
//!
//! A [`Replicator`] owns at most one live session against a configured
//! remote endpoint: it pushes local changes outward from the store's
//! change feed, pulls remote batches and applies them through the store's
//! privileged `apply_remote` entry point, and reports health through a
//! watch channel instead of failing CRUD callers.

pub mod error;
pub mod protocol;
pub mod replicator;
pub mod transport;

pub use error::SyncError;
pub use protocol::{ChangeBatch, PushRequest};
pub use replicator::{
    save_endpoint, saved_endpoint, Replicator, ReplicatorOptions, SyncStatus, SETTINGS_DOC,
};
pub use transport::{HttpTransport, ReplicationTransport};
