//! Adapts [`objsh_overseer::Overseer`] to the minimal
//! [`objsh_flow::RecordStore`] seam `objsh-flow` depends on.

use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};

use objsh_flow::{RecordStore, WorkRecord};
use objsh_overseer::Overseer;

/// Thin wrapper giving a shared [`Overseer`] the [`RecordStore`] shape
/// `objsh-flow` expects, so `objsh-flow` never links against `sled`
/// directly.
pub struct OverseerRecordStore {
    overseer: Arc<Overseer>,
}

impl OverseerRecordStore {
    /// Wraps an already-open, shared overseer.
    #[must_use]
    pub fn new(overseer: Arc<Overseer>) -> Self {
        Self { overseer }
    }
}

impl<W, R> RecordStore<W, R> for OverseerRecordStore
where
    W: Serialize + DeserializeOwned,
    R: Serialize + DeserializeOwned,
{
    fn get(&self, data: &str) -> Option<WorkRecord<W, R>> {
        self.overseer.get(data).ok().flatten()
    }

    fn put(&self, record: &WorkRecord<W, R>) {
        if let Err(err) = self.overseer.put(record) {
            tracing::error!(%err, data = %record.info.data, "failed to persist overseer record");
        }
    }
}
