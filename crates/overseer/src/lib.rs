#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `objsh_overseer` durably maps a work item's stable key (`Data`, the raw
//! input line) to a [`WorkRecord`] so a batch command can be re-run
//! idempotently.
//!
//! # Design
//!
//! The store is [`sled`](https://docs.rs/sled), an embedded, crash-safe,
//! pure-Rust KV store — chosen the way the teacher workspace reaches for
//! embedded stores for a similar durable-log role, and because it needs no
//! external service for a single-process, single-writer job. Records are
//! `serde_json`-encoded so the schema stays caller-owned rather than the
//! store dictating it.
//!
//! # Invariants
//!
//! - [`Overseer::put`] is a total replace: calling it twice for the same
//!   key leaves only the second record.
//! - A [`WorkRecord`] with `err.is_none()` and a `result` present marks the
//!   item done.
//! - Puts that return `Ok` survive process crash: `sled` fsyncs on flush,
//!   and [`Overseer::put`] flushes before returning.
//!
//! # Errors
//!
//! [`OverseerError::Open`] surfaces a failure to open the underlying store
//! before any work is consumed. Transient write failures are retried with
//! capped exponential backoff inside [`Overseer::put`] (≤5 attempts,
//! 100ms–1s).

use std::path::Path;
use std::thread;
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tracing::{instrument, warn};

/// Opaque unit of work emitted by a work-provider.
#[derive(Clone, Debug, Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct WorkInfo<W> {
    /// The raw input line; also the overseer key.
    pub data: String,
    /// The typed work descriptor (upload/download/batch-op).
    pub work: W,
}

impl<W> WorkInfo<W> {
    /// Builds a new work item.
    pub fn new(data: impl Into<String>, work: W) -> Self {
        Self {
            data: data.into(),
            work,
        }
    }
}

/// A human/machine description of a worker failure, persisted alongside a
/// [`WorkRecord`] so post-mortem replay does not need the original error
/// type.
#[derive(Clone, Debug, Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct ErrorRecord {
    /// Machine-readable kind name (`Debug` of `objsh_core::error::Kind`).
    pub kind: String,
    /// Provider error code, if any.
    pub code: Option<i32>,
    /// Human descriptor.
    pub descriptor: String,
}

/// Overseer entry: `{WorkInfo, Result, Err}`.
#[derive(Clone, Debug, Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct WorkRecord<W, R> {
    /// The work item this record describes.
    pub info: WorkInfo<W>,
    /// The successful result, if any.
    pub result: Option<R>,
    /// The failure, if any.
    pub err: Option<ErrorRecord>,
}

impl<W, R> WorkRecord<W, R> {
    /// A record is "done" when it carries a result and no error.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.err.is_none() && self.result.is_some()
    }
}

/// Errors raised by the overseer store.
#[derive(Debug, Error)]
pub enum OverseerError {
    /// The underlying store failed to open.
    #[error("failed to open overseer store at {path}: {source}")]
    Open {
        /// Path the store was opened at.
        path: String,
        /// Underlying sled error.
        #[source]
        source: sled::Error,
    },
    /// A write failed after exhausting the retry budget.
    #[error("overseer write failed after {attempts} attempts: {source}")]
    WriteExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// Last underlying error.
        #[source]
        source: sled::Error,
    },
    /// The stored record could not be deserialised.
    #[error("overseer record for {key:?} is corrupt: {source}")]
    Corrupt {
        /// The key whose record failed to decode.
        key: String,
        /// Underlying decode error.
        #[source]
        source: serde_json::Error,
    },
    /// The record could not be serialised for storage.
    #[error("failed to encode overseer record: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Result alias for overseer operations.
pub type Result<T> = std::result::Result<T, OverseerError>;

const MAX_PUT_ATTEMPTS: u32 = 5;
const BASE_BACKOFF: Duration = Duration::from_millis(100);
const MAX_BACKOFF: Duration = Duration::from_secs(1);

/// Durable `Data -> WorkRecord` store, single writer / many readers within
/// one job.
pub struct Overseer {
    db: sled::Db,
}

impl Overseer {
    /// Opens (creating if absent) the overseer store at `path`.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path_ref = path.as_ref();
        let db = sled::open(path_ref).map_err(|source| OverseerError::Open {
            path: path_ref.display().to_string(),
            source,
        })?;
        Ok(Self { db })
    }

    /// Looks up the record for `data`, returning `None` if absent.
    pub fn get<W, R>(&self, data: &str) -> Result<Option<WorkRecord<W, R>>>
    where
        W: DeserializeOwned,
        R: DeserializeOwned,
    {
        let Some(bytes) = self.db.get(data.as_bytes()).map_err(|source| {
            OverseerError::WriteExhausted {
                attempts: 1,
                source,
            }
        })?
        else {
            return Ok(None);
        };
        let record = serde_json::from_slice(&bytes).map_err(|source| OverseerError::Corrupt {
            key: data.to_owned(),
            source,
        })?;
        Ok(Some(record))
    }

    /// Idempotently replaces the record for `record.info.data`, retrying
    /// transient failures with capped exponential backoff.
    pub fn put<W, R>(&self, record: &WorkRecord<W, R>) -> Result<()>
    where
        W: Serialize,
        R: Serialize,
    {
        let bytes = serde_json::to_vec(record).map_err(OverseerError::Encode)?;
        let key = record.info.data.as_bytes();

        let mut attempt = 0u32;
        let mut backoff = BASE_BACKOFF;
        loop {
            attempt += 1;
            match self.db.insert(key, bytes.clone()) {
                Ok(_) => {
                    self.db.flush().map_err(|source| OverseerError::WriteExhausted {
                        attempts: attempt,
                        source,
                    })?;
                    return Ok(());
                }
                Err(source) if attempt < MAX_PUT_ATTEMPTS => {
                    warn!(attempt, %source, "overseer write failed, retrying");
                    thread::sleep(backoff);
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
                Err(source) => {
                    return Err(OverseerError::WriteExhausted {
                        attempts: attempt,
                        source,
                    })
                }
            }
        }
    }

    /// Flushes and releases the store.
    pub fn close(self) -> Result<()> {
        self.db
            .flush()
            .map_err(|source| OverseerError::WriteExhausted {
                attempts: 1,
                source,
            })?;
        Ok(())
    }
}
