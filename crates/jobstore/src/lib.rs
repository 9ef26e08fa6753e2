#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `objsh_jobstore` is the per-job directory: a deterministic [`JobId`],
//! an exclusive [`lock::JobLock`], the directory-scan cache
//! ([`dircache`]), work-list parsing ([`worklist`]), job-wide counters
//! ([`metric::Metric`]) and the four append-only report streams
//! ([`exporter::FileExporter`]). [`Job`] wires these together with an
//! [`objsh_overseer::Overseer`] and a [`CancellationToken`] into the one
//! object a command needs to run a [`objsh_flow::run`] invocation.
//!
//! # Design
//!
//! A job directory is addressed by [`JobId`], a deterministic hash of
//! `(cmd_id, bucket, input_file_abs_path)` so repeated invocations of the
//! same command against the same input resolve to the same directory —
//! the idempotence guarantee the overseer depends on. `Job` owns its
//! lock, overseer, exporter and metric; workers only ever borrow them.
//!
//! # Invariants
//!
//! - The job directory exists, and its lock is held, before any other
//!   file in it is written.
//! - `Job::overseer_dir_name` differs between upload (`.ldb`) and
//!   download (`.recorder`) jobs so the two never contend on one sled
//!   store, even though both derive from the same [`JobId`] scheme.

pub mod dircache;
pub mod exporter;
pub mod lock;
pub mod metric;
pub mod worklist;

use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use objsh_core::cancel::CancellationToken;
use objsh_core::error::{Error, Kind};
use objsh_overseer::Overseer;
use rustc_hash::FxHasher;

pub use exporter::FileExporter;
pub use metric::{Metric, MetricSnapshot};

/// Deterministic identifier for a job: `hash(cmd_id ‖ bucket ‖
/// input_file_abs_path)`. Two invocations with identical inputs resolve
/// to the same working directory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct JobId(pub u64);

impl JobId {
    /// Computes the deterministic id for a command over a given input.
    #[must_use]
    pub fn compute(cmd_id: &str, bucket: &str, input_file_abs_path: &str) -> Self {
        let mut hasher = FxHasher::default();
        cmd_id.hash(&mut hasher);
        bucket.hash(&mut hasher);
        input_file_abs_path.hash(&mut hasher);
        Self(hasher.finish())
    }

    /// Renders the id as a directory-name-safe hex string.
    #[must_use]
    pub fn to_hex(self) -> String {
        format!("{:016x}", self.0)
    }
}

/// Which overseer subdirectory a job uses: upload and download jobs keep
/// separate sled stores even when they share a [`JobId`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OverseerRole {
    /// Upload jobs store records under `.ldb`.
    Upload,
    /// Download jobs store records under `.recorder`.
    Download,
}

impl OverseerRole {
    fn dir_name(self) -> &'static str {
        match self {
            Self::Upload => ".ldb",
            Self::Download => ".recorder",
        }
    }
}

/// The per-command persistent context: job directory, lock, overseer,
/// exporter, metric and cancellation signal.
pub struct Job {
    /// This job's deterministic id.
    pub id: JobId,
    /// The job's working directory (already created).
    pub dir: PathBuf,
    /// Durable per-item outcome store, shared so a caller can wrap it in
    /// an `objsh-flow` record-store adapter without taking it away from
    /// the job.
    pub overseer: Arc<Overseer>,
    /// Append-only success/failure/overwrite/skip report streams.
    pub exporter: FileExporter,
    /// Job-wide atomic counters.
    pub metric: Metric,
    /// Job-scoped cancellation signal; register SIGINT/SIGTERM against
    /// this from the CLI entry point.
    pub cancel: CancellationToken,
    _lock: lock::JobLock,
}

impl Job {
    /// Opens (creating if absent) the job directory for `id` under
    /// `record_root`, acquires its exclusive lock, and opens its overseer
    /// store. Fails with [`Kind::Fatal`] if the directory cannot be
    /// created, the lock is held elsewhere, or the overseer store cannot
    /// open.
    pub fn open(record_root: impl AsRef<Path>, id: JobId, role: OverseerRole) -> Result<Self, Error> {
        let dir = record_root.as_ref().join(id.to_hex());
        std::fs::create_dir_all(&dir)
            .map_err(|e| Error::new(Kind::Fatal, "failed to create job directory").with_cause(e))?;

        let job_lock = lock::JobLock::acquire(dir.join(".lock"))?;
        let overseer = Overseer::open(dir.join(role.dir_name()))
            .map_err(|e| Error::new(Kind::Fatal, "failed to open overseer store").with_cause(e))?;

        Ok(Self {
            id,
            dir: dir.clone(),
            overseer: Arc::new(overseer),
            exporter: FileExporter::new(&dir),
            metric: Metric::new(),
            cancel: CancellationToken::new(),
            _lock: job_lock,
        })
    }

    /// Path to this job's scanned-file cache (`.cache`).
    #[must_use]
    pub fn cache_path(&self) -> PathBuf {
        self.dir.join(".cache")
    }

    /// Path to this job's final metric snapshot (`.result`).
    #[must_use]
    pub fn result_path(&self) -> PathBuf {
        self.dir.join(".result")
    }

    /// Path to this job's chunk/slice sidecar directory.
    #[must_use]
    pub fn sidecar_dir(&self) -> PathBuf {
        self.dir.join("sidecars")
    }

    /// Writes the job's final metric snapshot to `.result` as JSON.
    pub fn write_result(&self) -> Result<(), Error> {
        let snapshot = self.metric.snapshot();
        let bytes = serde_json::to_vec_pretty(&snapshot)
            .map_err(|e| Error::new(Kind::Fatal, "failed to encode job result").with_cause(e))?;
        std::fs::write(self.result_path(), bytes)
            .map_err(|e| Error::new(Kind::Fatal, "failed to write job result").with_cause(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_id_is_deterministic() {
        let a = JobId::compute("upload", "bucket", "/abs/file.txt");
        let b = JobId::compute("upload", "bucket", "/abs/file.txt");
        assert_eq!(a, b);
    }

    #[test]
    fn job_id_varies_with_any_component() {
        let base = JobId::compute("upload", "bucket", "/abs/file.txt");
        assert_ne!(base, JobId::compute("download", "bucket", "/abs/file.txt"));
        assert_ne!(base, JobId::compute("upload", "other", "/abs/file.txt"));
        assert_ne!(base, JobId::compute("upload", "bucket", "/abs/other.txt"));
    }

    #[test]
    fn upload_and_download_jobs_for_the_same_id_use_separate_overseer_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let id = JobId::compute("x", "b", "/f");
        let upload = Job::open(dir.path(), id, OverseerRole::Upload).unwrap();
        assert!(upload.dir.join(".ldb").exists());
        drop(upload);
        let download = Job::open(dir.path(), id, OverseerRole::Download).unwrap();
        assert!(download.dir.join(".recorder").exists());
    }

    #[test]
    fn second_open_while_first_is_live_fails() {
        let dir = tempfile::tempdir().unwrap();
        let id = JobId::compute("x", "b", "/f");
        let _first = Job::open(dir.path(), id, OverseerRole::Upload).unwrap();
        let second = Job::open(dir.path(), id, OverseerRole::Upload);
        assert!(second.is_err());
    }

    #[test]
    fn write_result_persists_the_metric_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let id = JobId::compute("x", "b", "/f");
        let job = Job::open(dir.path(), id, OverseerRole::Upload).unwrap();
        job.metric.add_total(3);
        job.metric.add_success();
        job.write_result().unwrap();
        let contents = std::fs::read_to_string(job.result_path()).unwrap();
        let snap: MetricSnapshot = serde_json::from_str(&contents).unwrap();
        assert_eq!(snap.total, 3);
        assert_eq!(snap.success, 1);
    }
}
