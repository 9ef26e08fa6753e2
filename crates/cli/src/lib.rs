#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `objsh_cli` is the thin top layer: argument parsing ([`Cli`]), job
//! configuration ([`config`]), the account/workspace seam ([`workspace`]),
//! and the orchestration that wires [`objsh_jobstore::Job`],
//! [`objsh_flow::run`], [`objsh_transport`], [`objsh_token`],
//! [`objsh_objects`] and [`objsh_transfer`] together for the `upload` and
//! `download` commands.
//!
//! # Design
//!
//! Every command follows the same shape: load a job config, open a
//! [`objsh_jobstore::Job`] (acquiring its lock and overseer), build a
//! work provider (directory scan, file list, or bucket listing), and
//! drive it through [`objsh_flow::run`] with a worker closure that calls
//! into `objsh-transfer`/`objsh-objects`. The only process-wide state is
//! the `tracing` subscriber installed once by [`run`]; everything else is
//! an explicit value threaded through these functions, per the
//! no-singletons design commitment.
//!
//! # Invariants
//!
//! - The process exit code is `objsh_core::error::Kind::exit_code` of the
//!   worst-severity unrecoverable error observed, or `2` whenever any
//!   item failed without an outright fatal error, or `0` otherwise.

pub mod config;
pub mod record_store;
pub mod workspace;

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use objsh_core::cancel::CancellationToken;
use objsh_core::error::{Error, Kind};
use objsh_flow::{FlowConfig, FlowSinks, FlowSummary, RecordStore, SkipCause, WorkInfo, Worker};
use objsh_jobstore::{dircache, worklist, Job, JobId, OverseerRole};
use objsh_objects::ApiResult;
use objsh_token::{AccessKeyProvider, TokenProvider};
use objsh_transport::{HostProvider, HttpTransport, StaticHostProvider, Transport, TransportOptions};
use serde::{Deserialize, Serialize};

use config::{DownloadJobConfig, UploadJobConfig};
use record_store::OverseerRecordStore;
use workspace::Workspace;

/// Command-line entry point, parsed with `clap`.
#[derive(Parser, Debug)]
#[command(name = "objsh", about = "Batch transfer engine for a cloud object-storage service")]
pub struct Cli {
    /// Repeat to raise log verbosity (`-v`, `-vv`, `-vvv`).
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbosity: u8,
    /// Path to the JSON access-key/secret-key credentials file.
    #[arg(long, default_value = "access.json")]
    pub access_config: PathBuf,
    /// Root directory under which per-job state is kept.
    #[arg(long, default_value = ".objsh-jobs")]
    pub record_root: PathBuf,
    /// Command to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Runs a batch upload job from a JSON config document.
    Upload {
        /// Path to the upload job config JSON file.
        config: PathBuf,
    },
    /// Runs a batch download job from a JSON config document.
    Download {
        /// Path to the download job config JSON file.
        config: PathBuf,
    },
}

/// One scanned or listed upload item, the serialisable `Work` payload
/// stored alongside its overseer record.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadWorkItem {
    /// Path relative to the scanned source directory.
    pub rel_path: String,
    /// Snapshot file size in bytes.
    pub size: u64,
    /// Snapshot mtime in nanoseconds since epoch.
    pub mtime_ns: i64,
}

/// One work-listed download item.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DownloadWorkItem {
    /// Source bucket, defaulting to the job config's bucket when absent.
    pub bucket: Option<String>,
    /// Source key.
    pub key: String,
    /// Destination path, defaulting to `dest_dir/key` when absent.
    pub save_path: Option<String>,
}

fn job_dir_for(record_root: &std::path::Path, cmd_id: &str, bucket: &str, input_path: &str) -> (JobId, PathBuf) {
    let id = JobId::compute(cmd_id, bucket, input_path);
    (id, record_root.to_path_buf())
}

fn work_items_from_lines<T>(
    path: &std::path::Path,
    parse: impl Fn(&str) -> Result<T, Error> + 'static,
) -> Result<Vec<WorkInfo<T>>, Error>
where
    T: Send + 'static,
{
    let file = File::open(path)
        .map_err(|e| Error::new(Kind::InvalidArg, "failed to open work list").with_cause(e))?;
    let mut items = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|e| Error::new(Kind::InvalidArg, "failed to read work list line").with_cause(e))?;
        if line.is_empty() {
            continue;
        }
        let parsed = parse(&line)?;
        items.push(WorkInfo::new(line, parsed));
    }
    Ok(items)
}

/// Builds an upload work provider: the job's `FileList` if configured,
/// otherwise a fresh (or cached) directory scan.
fn build_upload_work_list(job: &Job, cfg: &UploadJobConfig) -> Result<Vec<WorkInfo<UploadWorkItem>>, Error> {
    let list_path = if let Some(file_list) = &cfg.file_list {
        PathBuf::from(file_list)
    } else {
        let src_dir = cfg
            .src_dir
            .as_ref()
            .ok_or_else(|| Error::new(Kind::InvalidArg, "upload config requires src_dir or file_list"))?;
        dircache::scan(src_dir, job.cache_path(), cfg.rescan_local)?;
        job.cache_path()
    };
    work_items_from_lines(&list_path, |line| {
        worklist::parse_upload_entry(line, worklist::DEFAULT_SEPARATOR).map(|e| UploadWorkItem {
            rel_path: e.rel_path,
            size: e.size,
            mtime_ns: e.mtime_ns,
        })
    })
}

fn build_download_work_list(path: &std::path::Path) -> Result<Vec<WorkInfo<DownloadWorkItem>>, Error> {
    work_items_from_lines(path, |line| {
        worklist::parse_download_entry(line, worklist::DEFAULT_SEPARATOR).map(|e| DownloadWorkItem {
            bucket: e.bucket,
            key: e.key,
            save_path: e.save_path,
        })
    })
}

/// Lets [`counting_sinks`] tell an overwritten destination from a plain
/// success without a bound on every `Worker` result type.
trait ReportOutcome {
    /// Whether this result represents an overwritten destination.
    fn is_overwrite(&self) -> bool {
        false
    }
}

impl ReportOutcome for ApiResult {
    fn is_overwrite(&self) -> bool {
        self.is_overwrite
    }
}

impl ReportOutcome for () {}

fn skip_cause_label(cause: &SkipCause) -> String {
    match cause {
        SkipCause::Filtered(reason) => reason.clone(),
        SkipCause::AlreadyDone => "AlreadyDone".to_owned(),
    }
}

fn counting_sinks<W, R>(job: Arc<Job>) -> FlowSinks<W, R>
where
    W: Send + Sync + 'static,
    R: ReportOutcome + Send + Sync + 'static,
{
    let job_success = Arc::clone(&job);
    let job_fail = Arc::clone(&job);
    let job_skip = job;
    FlowSinks {
        on_success: Box::new(move |item, result| {
            job_success.metric.add_success();
            if result.is_overwrite() {
                job_success.exporter.overwrite(&item.data);
            } else {
                job_success.exporter.success(&item.data);
            }
        }),
        on_fail: Box::new(move |item, err| {
            tracing::warn!(%err, "work item failed");
            job_fail.metric.add_failure();
            job_fail.exporter.failure(&item.data, err);
        }),
        on_skip: Box::new(move |item, cause: &SkipCause| {
            job_skip.metric.add_skip();
            job_skip.exporter.skip(&item.data, &skip_cause_label(cause));
        }),
        ..FlowSinks::default()
    }
}

/// Runs one upload job against `cfg`, returning the flow summary.
pub fn run_upload(
    workspace: &Workspace,
    record_root: &std::path::Path,
    cfg: &UploadJobConfig,
    upload_hosts: Arc<dyn HostProvider>,
) -> Result<FlowSummary, Error> {
    let input_path = cfg
        .file_list
        .clone()
        .or_else(|| cfg.src_dir.clone())
        .unwrap_or_default();
    let (id, root) = job_dir_for(record_root, "upload", &cfg.bucket, &input_path);
    let job = Arc::new(Job::open(root, id, OverseerRole::Upload)?);

    let items = build_upload_work_list(&job, cfg)?;
    job.metric.add_total(items.len() as u64);
    job.metric.start(0);

    let transport: Arc<dyn Transport> = Arc::new(
        HttpTransport::new(TransportOptions {
            bind_ip: None,
            use_https: true,
        })
        .map_err(|e| Error::new(Kind::Fatal, "failed to build upload transport").with_cause(e))?,
    );
    let token = AccessKeyProvider::new(workspace.access.access_key.clone(), workspace.access.secret_key.clone());

    let bucket = cfg.bucket.clone();
    let src_dir = cfg.src_dir.clone().unwrap_or_default();
    let put_threshold = cfg.put_threshold;
    let chunk_size = cfg.resumable_api_v2_part_size;
    let overwrite = cfg.overwrite;
    let check_exists = cfg.check_exists;
    let check_hash = cfg.check_hash;
    let api_version = if cfg.resumable_api_v2 {
        objsh_transfer::upload::ApiVersion::V2
    } else {
        objsh_transfer::upload::ApiVersion::V1
    };
    let sidecar_dir = job.sidecar_dir();
    std::fs::create_dir_all(&sidecar_dir)
        .map_err(|e| Error::new(Kind::Fatal, "failed to create sidecar directory").with_cause(e))?;
    let cfg_for_keys = cfg.clone();
    let resume_worker_count = cfg.resume_worker_count;
    objsh_transfer::effective_chunk_concurrency(cfg.worker_count, resume_worker_count);

    let worker: Arc<dyn Worker<UploadWorkItem, ApiResult>> = {
        let transport = Arc::clone(&transport);
        let hosts = Arc::clone(&upload_hosts);
        let upload_token = token.upload_token(&objsh_token::UploadPolicy::for_bucket(bucket.clone()));
        Arc::new(move |item: &WorkInfo<UploadWorkItem>| {
            let local_path = std::path::Path::new(&src_dir).join(&item.work.rel_path);
            let key = cfg_for_keys.destination_key(&item.work.rel_path);
            let task = objsh_transfer::upload::UploadTask {
                local_path,
                bucket: bucket.clone(),
                key,
                size: item.work.size,
                mtime_ns: item.work.mtime_ns,
                mime: None,
                overwrite,
                check_exists,
                check_hash,
                chunk_size,
                put_threshold,
                retry: objsh_transport::RetryPolicy::default(),
                disable_form: false,
                api_version,
                resume_worker_count,
            };
            objsh_transfer::upload::upload(
                transport.as_ref(),
                hosts.as_ref(),
                &upload_token,
                &sidecar_dir,
                &task,
                &CancellationToken::new(),
            )
        })
    };

    let store: Arc<dyn RecordStore<UploadWorkItem, ApiResult>> =
        Arc::new(OverseerRecordStore::new(Arc::clone(&job.overseer)));

    let sinks = counting_sinks::<UploadWorkItem, ApiResult>(Arc::clone(&job));
    let summary = objsh_flow::run(
        items,
        worker,
        Some(store),
        sinks,
        job.cancel.clone(),
        FlowConfig {
            worker_count: cfg.worker_count,
            stop_when_work_error: false,
        },
    );

    job.metric.end(0);
    job.write_result()?;
    Ok(summary)
}

/// Runs one download job against `cfg`.
pub fn run_download(
    record_root: &std::path::Path,
    cfg: &DownloadJobConfig,
) -> Result<FlowSummary, Error> {
    let file_list = cfg
        .file_list
        .clone()
        .ok_or_else(|| Error::new(Kind::InvalidArg, "download config requires file_list"))?;
    let (id, root) = job_dir_for(record_root, "download", &cfg.bucket, &file_list);
    let job = Arc::new(Job::open(root, id, OverseerRole::Download)?);

    let items = build_download_work_list(std::path::Path::new(&file_list))?;
    job.metric.add_total(items.len() as u64);
    job.metric.start(0);

    let transport: Arc<dyn Transport> = Arc::new(
        HttpTransport::new(TransportOptions {
            bind_ip: None,
            use_https: true,
        })
        .map_err(|e| Error::new(Kind::Fatal, "failed to build download transport").with_cause(e))?,
    );
    let hosts: Arc<dyn HostProvider> = Arc::new(StaticHostProvider(cfg.cdn_hosts.clone()));
    let dest_dir = cfg.dest_dir.clone();
    let bucket = cfg.bucket.clone();
    let enable_slice = cfg.enable_slice;
    let slice_size = cfg.slice_size;
    let slice_concurrency = cfg.slice_concurrent_count;
    let slice_threshold = cfg.slice_file_size_threshold;
    let remove_temp_while_error = cfg.remove_temp_while_error;
    let check_hash = cfg.check_hash;

    let worker: Arc<dyn Worker<DownloadWorkItem, ApiResult>> = {
        let transport = Arc::clone(&transport);
        let hosts = Arc::clone(&hosts);
        Arc::new(move |item: &WorkInfo<DownloadWorkItem>| {
            let bucket = item.work.bucket.clone().unwrap_or_else(|| bucket.clone());
            let dest_path = item
                .work
                .save_path
                .clone()
                .map(PathBuf::from)
                .unwrap_or_else(|| std::path::Path::new(&dest_dir).join(&item.work.key));
            let stat = objsh_objects::adapters::stat(
                transport.as_ref(),
                hosts.as_ref(),
                objsh_transport::RetryPolicy::default(),
                &bucket,
                &item.work.key,
            )?;
            let task = objsh_transfer::download::DownloadTask {
                dest_path,
                size: stat.size.unwrap_or(0),
                expected_hash: if check_hash { stat.hash.clone() } else { None },
                enable_slice,
                slice_size,
                slice_concurrency,
                slice_threshold,
                remove_temp_while_error,
                retry: objsh_transport::RetryPolicy::default(),
            };
            let entry = objsh_objects::uri::encode_entry(&bucket, &item.work.key);
            objsh_transfer::download::download(
                Arc::clone(&transport),
                Arc::clone(&hosts),
                &format!("/download/{entry}"),
                &task,
                &CancellationToken::new(),
            )
            .map(|()| ApiResult::default())
        })
    };

    let store: Arc<dyn RecordStore<DownloadWorkItem, ApiResult>> =
        Arc::new(OverseerRecordStore::new(Arc::clone(&job.overseer)));
    let sinks = counting_sinks::<DownloadWorkItem, ApiResult>(Arc::clone(&job));
    let summary = objsh_flow::run(
        items,
        worker,
        Some(store),
        sinks,
        job.cancel.clone(),
        FlowConfig {
            worker_count: cfg.worker_count,
            stop_when_work_error: false,
        },
    );

    job.metric.end(0);
    job.write_result()?;
    Ok(summary)
}

/// Maps a flow summary and any fatal error into the process exit code
/// contract of §6: `0` success, `1` user error, `2` partial failure, `3`
/// system error.
#[must_use]
pub fn exit_code(summary: Option<&FlowSummary>, fatal: Option<&Error>) -> i32 {
    if let Some(err) = fatal {
        return err.kind().exit_code();
    }
    match summary {
        Some(summary) if summary.failure > 0 || summary.cancelled => 2,
        _ => 0,
    }
}

/// Parses arguments, installs logging, loads the workspace, and runs the
/// requested command.
pub fn run(cli: Cli) -> i32 {
    objsh_core::logging::init(cli.verbosity);

    let workspace = match Workspace::open(std::env::current_dir().unwrap_or_default(), &cli.access_config) {
        Ok(w) => w,
        Err(err) => {
            tracing::error!(%err, "failed to load workspace");
            return exit_code(None, Some(&err));
        }
    };

    match cli.command {
        Command::Upload { config } => {
            let cfg = match UploadJobConfig::load(&config) {
                Ok(cfg) => cfg,
                Err(err) => return exit_code(None, Some(&err)),
            };
            let hosts: Arc<dyn HostProvider> = Arc::new(StaticHostProvider(
                cfg.up_host.clone().into_iter().collect(),
            ));
            match run_upload(&workspace, &cli.record_root, &cfg, hosts) {
                Ok(summary) => exit_code(Some(&summary), None),
                Err(err) => exit_code(None, Some(&err)),
            }
        }
        Command::Download { config } => {
            let cfg = match DownloadJobConfig::load(&config) {
                Ok(cfg) => cfg,
                Err(err) => return exit_code(None, Some(&err)),
            };
            match run_download(&cli.record_root, &cfg) {
                Ok(summary) => exit_code(Some(&summary), None),
                Err(err) => exit_code(None, Some(&err)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_is_zero_on_a_clean_run() {
        let summary = FlowSummary {
            total: 3,
            success: 3,
            failure: 0,
            skip: 0,
            cancelled: false,
            max_concurrent_workers: 1,
        };
        assert_eq!(exit_code(Some(&summary), None), 0);
    }

    #[test]
    fn exit_code_is_two_on_partial_failure() {
        let summary = FlowSummary {
            total: 3,
            success: 2,
            failure: 1,
            skip: 0,
            cancelled: false,
            max_concurrent_workers: 1,
        };
        assert_eq!(exit_code(Some(&summary), None), 2);
    }

    #[test]
    fn exit_code_follows_the_fatal_kind_when_present() {
        let err = Error::new(Kind::Fatal, "lock held");
        assert_eq!(exit_code(None, Some(&err)), 3);
    }

    #[test]
    fn upload_work_list_is_built_from_a_directory_scan() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hi").unwrap();
        let job_root = dir.path().join("jobs");
        let id = JobId::compute("upload", "b", dir.path().to_str().unwrap());
        let job = Job::open(&job_root, id, OverseerRole::Upload).unwrap();
        let mut cfg = UploadJobConfig {
            bucket: "b".into(),
            ..UploadJobConfig::default()
        };
        cfg.src_dir = Some(dir.path().to_string_lossy().into_owned());
        let items = build_upload_work_list(&job, &cfg).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].work.rel_path, "a.txt");
    }
}
