#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `objsh_objects` is the single-object adapter layer plus everything
//! built directly on top of it: batch RPC packing/fan-out/demux, M3U8
//! playlist helpers, and marker-paginated bucket listing. Every adapter
//! validates arguments, builds a URI through the shared [`uri`] builder,
//! issues the call through an [`objsh_transport::Transport`], and maps
//! provider response codes into [`objsh_core::error::Kind`].
//!
//! # Design
//!
//! Single-object calls and batch sub-operations share one URI builder
//! ([`uri::build_subop`]) so the two paths are bit-identical: a caller
//! switching from `stat` to a 1-item batch of `Stat` sees the same wire
//! request. [`batchrpc`] packs up to [`batchrpc::BATCH_ALLOW_MAX`]
//! operations per call and demuxes the response by index.
//!
//! # Invariants
//!
//! - `uri::build_subop` is pure and deterministic: the same [`BatchOp`]
//!   always yields the same path.
//! - Batch sub-operation results are paired with their originating op by
//!   index, never by guessing from response order.

pub mod adapters;
pub mod batchrpc;
pub mod list;
pub mod m3u8;
pub mod uri;

use serde::{Deserialize, Serialize};

/// The operation kind a [`BatchOp`] performs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchOpKind {
    /// Fetch object metadata.
    Stat,
    /// Remove an object.
    Delete,
    /// Copy an object to a new bucket/key.
    Copy,
    /// Move (rename) an object to a new bucket/key.
    Move,
    /// Change storage class.
    ChType,
    /// Change MIME type.
    ChMime,
    /// Change enable/disable status.
    ChStatus,
    /// Schedule deletion after N days.
    DeleteAfterDays,
    /// Restore an archived object.
    RestoreAr,
}

/// One sub-operation accepted by the batch RPC or issued standalone.
/// Serialises to one URI sub-operation via [`uri::build_subop`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOp {
    /// Which operation this is.
    pub kind: BatchOpKind,
    /// Source bucket.
    pub bucket: String,
    /// Source key.
    pub key: String,
    /// Destination bucket, for Copy/Move.
    pub dest_bucket: Option<String>,
    /// Destination key, for Copy/Move.
    pub dest_key: Option<String>,
    /// Whether to overwrite an existing destination (Copy/Move).
    pub force: bool,
    /// New MIME type, for ChMime.
    pub mime: Option<String>,
    /// New storage class, for ChType.
    pub file_type: Option<u8>,
    /// New status, for ChStatus.
    pub status: Option<u8>,
    /// Day count, for DeleteAfterDays/RestoreAr.
    pub days: Option<u32>,
}

impl BatchOp {
    /// Builds a `Stat` op.
    #[must_use]
    pub fn stat(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self::new(BatchOpKind::Stat, bucket, key)
    }

    /// Builds a `Delete` op.
    #[must_use]
    pub fn delete(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self::new(BatchOpKind::Delete, bucket, key)
    }

    /// Builds a `Copy` op.
    #[must_use]
    pub fn copy(
        bucket: impl Into<String>,
        key: impl Into<String>,
        dest_bucket: impl Into<String>,
        dest_key: impl Into<String>,
        force: bool,
    ) -> Self {
        let mut op = Self::new(BatchOpKind::Copy, bucket, key);
        op.dest_bucket = Some(dest_bucket.into());
        op.dest_key = Some(dest_key.into());
        op.force = force;
        op
    }

    /// Builds a `Move` op.
    #[must_use]
    pub fn move_to(
        bucket: impl Into<String>,
        key: impl Into<String>,
        dest_bucket: impl Into<String>,
        dest_key: impl Into<String>,
        force: bool,
    ) -> Self {
        let mut op = Self::new(BatchOpKind::Move, bucket, key);
        op.dest_bucket = Some(dest_bucket.into());
        op.dest_key = Some(dest_key.into());
        op.force = force;
        op
    }

    fn new(kind: BatchOpKind, bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            kind,
            bucket: bucket.into(),
            key: key.into(),
            dest_bucket: None,
            dest_key: None,
            force: false,
            mime: None,
            file_type: None,
            status: None,
            days: None,
        }
    }
}

/// The successful payload of a single-object or batch sub-operation call.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiResult {
    /// Content hash, if returned.
    pub hash: Option<String>,
    /// Object size in bytes, if returned.
    pub size: Option<u64>,
    /// MIME type, if returned.
    pub mime: Option<String>,
    /// Object key, if returned.
    pub key: Option<String>,
    /// The call was a no-op (e.g. destination already matched).
    pub is_skip: bool,
    /// An existing destination was overwritten.
    pub is_overwrite: bool,
    /// An existing destination was left untouched.
    pub is_not_overwrite: bool,
    /// The destination already existed prior to this call.
    pub is_exist: bool,
    /// The call updated an existing object's metadata.
    pub is_update: bool,
    /// Server-reported hash, used by change detection.
    pub server_file_hash: Option<String>,
    /// Server-reported size, used by change detection.
    pub server_file_size: Option<u64>,
}
