#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `objsh_flow` is a generic pipeline: a `WorkProvider` emits work lazily,
//! a fixed-size worker pool executes it, and a single finaliser loop
//! serialises overseer writes and exporter callbacks. Every batch command
//! in the workspace (`upload`, `download`, `delete`, `stat`, ...) is an
//! instantiation of [`run`] over a different [`Worker`].
//!
//! # Design
//!
//! A [`Worker`] is a plain capability (`Fn(&WorkInfo<W>) ->
//! Result<R, objsh_core::error::Error>`), not an inheritance hierarchy.
//! [`RecordStore`] is the minimal seam the flow needs from an overseer —
//! `objsh-overseer`'s `Overseer` implements it via a thin adapter in the
//! CLI crate, keeping `objsh-flow` decoupled from the storage backend (the
//! tests below exercise it against an in-memory fake).
//!
//! The `should_skip`/overseer-idempotence check runs on a dedicated
//! producer thread, since it is a cheap local decision that need not
//! consume a worker slot; only the actual `Worker::work` call is bounded
//! by `worker_count` concurrent threads. The calling thread acts as the
//! finaliser: it drains results in completion order (not dispatch order),
//! stores the outcome to the overseer, then invokes the matching sink.
//!
//! # Invariants
//!
//! - Every emitted item produces exactly one terminal event.
//! - At no instant are more than `worker_count` worker invocations in
//!   flight; [`FlowSummary::max_concurrent_workers`] reports the observed
//!   peak so callers can assert the bound.
//! - `worker_count` is clamped to `1..=2000`; out-of-range values are
//!   coerced with a `tracing::warn!`.
//! - `stop_when_work_error` only stops **new** dispatches; in-flight
//!   workers always drain to completion.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use objsh_core::cancel::CancellationToken;
pub use objsh_overseer::{ErrorRecord, WorkInfo, WorkRecord};
use tracing::{instrument, warn};

const MIN_WORKERS: usize = 1;
const MAX_WORKERS: usize = 2000;

/// Clamps a requested worker count into the supported range, warning when
/// the caller's value was out of bounds.
#[must_use]
pub fn clamp_worker_count(requested: usize) -> usize {
    let clamped = requested.clamp(MIN_WORKERS, MAX_WORKERS);
    if clamped != requested {
        warn!(requested, clamped, "worker count out of range, coerced");
    }
    clamped
}

/// Why an item was skipped rather than dispatched to a worker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SkipCause {
    /// `should_skip` returned true (caller-supplied filter).
    Filtered(String),
    /// The overseer already holds a successful record and `should_redo`
    /// declined to re-execute it.
    AlreadyDone,
}

/// The terminal event for one work item, as seen by the finaliser loop.
enum Outcome<R> {
    Success(R),
    Failure(objsh_core::error::Error),
    Skip(SkipCause),
}

/// A stateless unit of execution: given a work item, produce a result or
/// fail. Implemented by the service-specific adapters in `objsh-transfer`
/// and `objsh-objects`.
pub trait Worker<W, R>: Send + Sync {
    /// Executes the work item.
    fn work(&self, item: &WorkInfo<W>) -> Result<R, objsh_core::error::Error>;
}

impl<W, R, F> Worker<W, R> for F
where
    F: Fn(&WorkInfo<W>) -> Result<R, objsh_core::error::Error> + Send + Sync,
{
    fn work(&self, item: &WorkInfo<W>) -> Result<R, objsh_core::error::Error> {
        self(item)
    }
}

/// The minimal capability the flow needs from a durable record store.
/// `objsh-overseer::Overseer` is adapted to this trait by the CLI; tests
/// use an in-memory fake.
pub trait RecordStore<W, R>: Send + Sync {
    /// Looks up the prior record for `data`, if any.
    fn get(&self, data: &str) -> Option<WorkRecord<W, R>>;
    /// Persists a record, replacing any prior record for the same key.
    fn put(&self, record: &WorkRecord<W, R>);
}

/// Lifecycle and dispatch callbacks a flow invokes around each item. All
/// callbacks are `Fn` (not `FnMut`) because they run concurrently from the
/// producer thread (`should_skip`/`should_redo`) and the finaliser thread
/// (`on_*`); callers needing mutable bookkeeping should use interior
/// mutability (an `AtomicU64`, a `Mutex`) inside the closure.
pub struct FlowSinks<W, R> {
    /// Called once per item before dispatch; returning `Some` skips it.
    pub should_skip: Box<dyn Fn(&WorkInfo<W>) -> Option<SkipCause> + Send + Sync>,
    /// Called when a prior overseer record exists; returning `true`
    /// re-executes the item despite the prior success.
    pub should_redo: Box<dyn Fn(&WorkInfo<W>, &WorkRecord<W, R>) -> bool + Send + Sync>,
    /// Invoked from the finaliser loop on success.
    pub on_success: Box<dyn Fn(&WorkInfo<W>, &R) + Send + Sync>,
    /// Invoked from the finaliser loop on failure.
    pub on_fail: Box<dyn Fn(&WorkInfo<W>, &objsh_core::error::Error) + Send + Sync>,
    /// Invoked from the finaliser loop on skip.
    pub on_skip: Box<dyn Fn(&WorkInfo<W>, &SkipCause) + Send + Sync>,
}

impl<W, R> Default for FlowSinks<W, R> {
    fn default() -> Self {
        Self {
            should_skip: Box::new(|_| None),
            should_redo: Box::new(|_, _| false),
            on_success: Box::new(|_, _| {}),
            on_fail: Box::new(|_, _| {}),
            on_skip: Box::new(|_, _| {}),
        }
    }
}

/// Summary counters for one flow run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FlowSummary {
    /// Total items emitted by the provider.
    pub total: u64,
    /// Items that produced a successful result.
    pub success: u64,
    /// Items that failed.
    pub failure: u64,
    /// Items skipped (filtered or already-done).
    pub skip: u64,
    /// Whether the run observed cancellation before completion.
    pub cancelled: bool,
    /// Largest number of worker invocations observed in flight at once.
    pub max_concurrent_workers: usize,
}

/// Configuration for one [`run`] invocation.
pub struct FlowConfig {
    /// Number of concurrent worker threads (clamped 1..=2000).
    pub worker_count: usize,
    /// When true, stop dispatching new work after the first worker
    /// failure, drain in-flight work, then exit.
    pub stop_when_work_error: bool,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            worker_count: 5,
            stop_when_work_error: false,
        }
    }
}

/// Drives `provider` through `worker`, using `store` (if any) for the
/// idempotence check, invoking `sinks` for every terminal event.
///
/// `provider` is consumed on a dedicated producer thread so the caller's
/// iterator may perform its own lazy I/O (directory scan, file read,
/// bucket listing) without blocking dispatch of already-available items.
#[instrument(skip_all, fields(worker_count = config.worker_count))]
pub fn run<W, R, P>(
    provider: P,
    worker: Arc<dyn Worker<W, R>>,
    store: Option<Arc<dyn RecordStore<W, R>>>,
    sinks: FlowSinks<W, R>,
    cancel: CancellationToken,
    config: FlowConfig,
) -> FlowSummary
where
    W: Send + 'static,
    R: Send + 'static,
    P: IntoIterator<Item = WorkInfo<W>> + Send + 'static,
    P::IntoIter: Send,
{
    let sinks = Arc::new(sinks);
    let worker_count = clamp_worker_count(config.worker_count);
    let (dispatch_tx, dispatch_rx) = crossbeam_channel::bounded::<WorkInfo<W>>(worker_count);
    let (result_tx, result_rx) =
        crossbeam_channel::bounded::<(WorkInfo<W>, Outcome<R>)>(worker_count.max(1));

    let stop_flag = Arc::new(AtomicBool::new(false));
    let in_flight = Arc::new(AtomicUsize::new(0));
    let max_in_flight = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::with_capacity(worker_count);
    for _ in 0..worker_count {
        let rx = dispatch_rx.clone();
        let tx = result_tx.clone();
        let worker = Arc::clone(&worker);
        let cancel = cancel.clone();
        let in_flight = Arc::clone(&in_flight);
        let max_in_flight = Arc::clone(&max_in_flight);
        handles.push(thread::spawn(move || {
            while let Ok(item) = rx.recv() {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                max_in_flight.fetch_max(now, Ordering::SeqCst);
                let outcome = if cancel.is_cancelled() {
                    Outcome::Failure(objsh_core::error::Error::new(
                        objsh_core::error::Kind::Cancelled,
                        "job cancelled",
                    ))
                } else {
                    match worker.work(&item) {
                        Ok(result) => Outcome::Success(result),
                        Err(err) => Outcome::Failure(err),
                    }
                };
                in_flight.fetch_sub(1, Ordering::SeqCst);
                if tx.send((item, outcome)).is_err() {
                    break;
                }
            }
        }));
    }
    drop(dispatch_rx);

    let producer_sinks = Arc::clone(&sinks);
    let producer_store = store.clone();
    let stop_for_producer = Arc::clone(&stop_flag);
    let cancel_for_producer = cancel.clone();
    let producer_result_tx = result_tx.clone();
    let producer = thread::spawn(move || {
        for item in provider {
            if cancel_for_producer.is_cancelled() || stop_for_producer.load(Ordering::SeqCst) {
                break;
            }
            if let Some(cause) = (producer_sinks.should_skip)(&item) {
                if producer_result_tx.send((item, Outcome::Skip(cause))).is_err() {
                    break;
                }
                continue;
            }
            let prior = producer_store.as_ref().and_then(|s| s.get(&item.data));
            if let Some(record) = prior {
                if record.is_done() && !(producer_sinks.should_redo)(&item, &record) {
                    if producer_result_tx
                        .send((item, Outcome::Skip(SkipCause::AlreadyDone)))
                        .is_err()
                    {
                        break;
                    }
                    continue;
                }
            }
            if dispatch_tx.send(item).is_err() {
                break;
            }
        }
    });
    drop(result_tx);

    let mut summary = FlowSummary::default();
    for (item, outcome) in result_rx.iter() {
        summary.total += 1;
        match outcome {
            Outcome::Success(result) => {
                let record = WorkRecord {
                    info: item,
                    result: Some(result),
                    err: None,
                };
                if let Some(store) = &store {
                    store.put(&record);
                }
                (sinks.on_success)(&record.info, record.result.as_ref().expect("just set"));
                summary.success += 1;
            }
            Outcome::Failure(err) => {
                if err.kind() == objsh_core::error::Kind::Cancelled {
                    summary.cancelled = true;
                }
                if config.stop_when_work_error {
                    stop_flag.store(true, Ordering::SeqCst);
                }
                let error_record = ErrorRecord {
                    kind: format!("{:?}", err.kind()),
                    code: err.code(),
                    descriptor: err.descriptor().to_owned(),
                };
                let record: WorkRecord<W, R> = WorkRecord {
                    info: item,
                    result: None,
                    err: Some(error_record),
                };
                if let Some(store) = &store {
                    store.put(&record);
                }
                (sinks.on_fail)(&record.info, &err);
                summary.failure += 1;
            }
            Outcome::Skip(cause) => {
                (sinks.on_skip)(&item, &cause);
                summary.skip += 1;
            }
        }
    }

    producer.join().expect("producer thread panicked");
    for handle in handles {
        handle.join().ok();
    }

    summary.max_concurrent_workers = max_in_flight.load(Ordering::SeqCst);
    summary
}
