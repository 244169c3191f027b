use serde::{Deserialize, Serialize};

use impulse_core::RemoteChange;

/// One page of the remote change feed, as returned by a pull.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeBatch {
    #[serde(default)]
    pub results: Vec<RemoteChange>,
    /// Feed position to resume from. `None` when the remote does not page.
    #[serde(default)]
    pub last_seq: Option<String>,
}

impl ChangeBatch {
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

/// Body of an outbound push. Rows have the same shape in both directions.
#[derive(Debug, Serialize)]
pub struct PushRequest<'a> {
    pub docs: &'a [RemoteChange],
    /// Revisions in the rows were already assigned locally; the remote
    /// stores them as-is instead of minting new ones.
    pub new_edits: bool,
}
