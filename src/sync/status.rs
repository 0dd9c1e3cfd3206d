use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::collections::CollectionKind;

/// Aggregate replication state shown next to the family code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum SyncStatus {
    #[default]
    Idle,
    Syncing,
    Synced,
    Error,
}

/// Where a state change came from. Only `Local` changes are written back
/// to the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum Origin {
    Local,
    Remote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ChangeEvent {
    pub collection: CollectionKind,
    pub origin: Origin,
}

/// What happened to the remote side of a local mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Not joined to a family or not signed in; the change stays on this device.
    LocalOnly,
    Written,
    /// The write failed and the status moved to `Error`. Local state stands.
    Failed,
    /// The last remote snapshot of this collection could not be read, so the
    /// family copy was left alone. Local state stands.
    Held,
}
