#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `objsh_core` holds the pieces shared by every other crate in the
//! workspace: the error taxonomy and exit-code mapping, and a job-scoped
//! cancellation token used by [`flow`](../flow/index.html) and
//! [`transfer`](../transfer/index.html) to observe SIGINT/SIGTERM at their
//! suspension points.
//!
//! # Design
//!
//! - [`error`] defines [`error::Kind`] and [`error::Error`], the orthogonal
//!   error taxonomy every other crate's error type wraps or converts from.
//! - [`cancel`] defines [`cancel::CancellationToken`], a cheap `Arc`-backed
//!   flag checked at every suspension point (network call, disk I/O,
//!   overseer/exporter write).
//! - [`logging`] wires `tracing-subscriber` the way the CLI wires it: a
//!   verbosity count maps onto an `EnvFilter` level.
//!
//! # Invariants
//!
//! - [`error::Error`] always carries a [`error::Kind`]; nothing downstream
//!   constructs a bare `String` error for a path that crosses a worker
//!   boundary.
//! - [`cancel::CancellationToken::cancel`] is idempotent and safe to call
//!   from a signal handler.

/// Cancellation token shared across a job's worker threads.
pub mod cancel;
/// Error taxonomy and exit-code mapping.
pub mod error;
/// Logging/tracing initialisation shared by the CLI.
pub mod logging;
