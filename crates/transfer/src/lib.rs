#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `objsh_transfer` is the resumable transfer engine layered on top of
//! [`objsh_objects`]'s single-object adapters: chunked upload with a v1/v2
//! state machine and a durable sidecar, and sliced/resumable download with
//! a bitmap sidecar. Both share the [`hash`] module's content hash and talk
//! to the provider exclusively through [`objsh_transport::Transport`].
//!
//! # Design
//!
//! Upload and download each own a small, independently resumable durable
//! record next to the file they're transferring (`.upload.json` /
//! `.bitmap`), written with a write-then-rename so a crash never leaves a
//! corrupt sidecar. Neither module touches the overseer directly — the
//! per-file outcome is the caller's (`objsh-jobstore`) to record.
//!
//! # Invariants
//!
//! - A sidecar is only trusted when every identifying field
//!   (`src_path`/`mtime_ns`/`size`/`chunk_size`/`api_version`) matches the
//!   task being resumed; any mismatch restarts from scratch.
//! - Chunk/slice concurrency is configured per task, but
//!   [`effective_chunk_concurrency`] exposes the true product across the
//!   job-worker and chunk-worker pools so a caller can reason about and cap
//!   actual in-flight request counts.

pub mod download;
pub mod hash;
pub mod upload;

use tracing::warn;

/// A chunk/slice concurrency product above which a single job can open
/// enough concurrent connections to look like abuse to the provider or
/// exhaust local file descriptors.
pub const CONCURRENCY_WARN_CEILING: usize = 2000;

/// Returns the true number of concurrent chunk/slice transfers a job can
/// have in flight: `job_workers` files transferring at once, each driving
/// up to `resume_workers` concurrent chunks. Logs a warning when the
/// product exceeds [`CONCURRENCY_WARN_CEILING`] rather than silently
/// letting a job open thousands of connections.
#[must_use]
pub fn effective_chunk_concurrency(job_workers: usize, resume_workers: usize) -> usize {
    let product = job_workers.saturating_mul(resume_workers.max(1));
    if product > CONCURRENCY_WARN_CEILING {
        warn!(
            job_workers,
            resume_workers, product, "effective chunk concurrency exceeds the sane ceiling"
        );
    }
    product
}
