use serde::{Deserialize, Serialize};

use crate::document::{DocId, DocKind, Document, Revision};

/// Event published by the store on every committed change.
///
/// Local writes, local removals, and applied remote changes all emit this
/// same shape, so subscribers never need to care about origin. `doc` is
/// `None` exactly when `deleted` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Position in the store's change feed. Strictly increasing across all
    /// committed changes, in commit order.
    pub seq: u64,
    pub id: DocId,
    pub kind: DocKind,
    pub doc: Option<Document>,
    pub revision: Option<Revision>,
    pub deleted: bool,
}
