//! Resumable chunked upload: form fast-path, v1/v2 chunked state machine,
//! sidecar persistence, and `CheckHash` verification.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::thread;

use objsh_core::cancel::CancellationToken;
use objsh_core::error::{Error, Kind};
use base64::Engine;
use objsh_objects::ApiResult;
use objsh_transport::{HostProvider, Method, RetryPolicy, Transport, TransportRequest};
use serde::{Deserialize, Serialize};
use sha1::Digest;
use tracing::{instrument, warn};

use crate::hash::tree_hash;

/// Chunk size floor (1 MiB); chunk sizes must be a power of two at or
/// above this.
pub const MIN_CHUNK_SIZE: u64 = 1024 * 1024;
/// Default chunk size (4 MiB).
pub const DEFAULT_CHUNK_SIZE: u64 = 4 * 1024 * 1024;

/// Multipart API generation a chunked upload uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApiVersion {
    /// block/bput/mkfile.
    V1,
    /// initPart/uploadPart/completeMultipartUpload.
    V2,
}

/// A fully specified upload.
#[derive(Clone, Debug)]
pub struct UploadTask {
    /// Local source file.
    pub local_path: PathBuf,
    /// Destination bucket.
    pub bucket: String,
    /// Destination key.
    pub key: String,
    /// Snapshot of the source file's size, taken before the transfer
    /// starts so a racing writer cannot invalidate the sidecar silently.
    pub size: u64,
    /// Snapshot of the source file's mtime (nanoseconds since epoch).
    pub mtime_ns: i64,
    /// MIME type to set on the destination object.
    pub mime: Option<String>,
    /// Allow replacing an existing destination key.
    pub overwrite: bool,
    /// Check for an existing destination before uploading.
    pub check_exists: bool,
    /// Verify the server-reported hash against the local content hash.
    pub check_hash: bool,
    /// Chunk size for the chunked path; must be a power of two ≥ 1 MiB.
    pub chunk_size: u64,
    /// Size threshold below which the form fast-path is used.
    pub put_threshold: u64,
    /// Per-chunk retry policy.
    pub retry: RetryPolicy,
    /// Disables the form fast-path even for small files.
    pub disable_form: bool,
    /// Which chunked API generation to use when chunking is needed.
    pub api_version: ApiVersion,
    /// Maximum concurrent chunk uploads for this file.
    pub resume_worker_count: usize,
}

/// One chunk's persisted upload state.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkState {
    /// Byte offset within the source file.
    pub offset: u64,
    /// Chunk length in bytes.
    pub length: u64,
    /// Server-issued handle for the committed part, once acknowledged.
    pub etag: Option<String>,
    /// 1-based part number (v2) / block index (v1).
    pub part_number: u32,
}

/// The durable per-file sidecar record. Invalidated in full if
/// `(src_path, mtime_ns, size, chunk_size, api_version)` no longer match.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadSidecar {
    src_path: String,
    mtime_ns: i64,
    size: u64,
    chunk_size: u64,
    api_version: ApiVersion,
    /// Chunks acknowledged so far, in strictly increasing `part_number`.
    pub chunks: Vec<ChunkState>,
    /// Server-assigned multipart session handle, once initiated.
    pub upload_id: Option<String>,
}

impl UploadSidecar {
    fn matches(&self, task: &UploadTask) -> bool {
        self.src_path == task.local_path.to_string_lossy()
            && self.mtime_ns == task.mtime_ns
            && self.size == task.size
            && self.chunk_size == task.chunk_size
            && self.api_version == task.api_version
    }

    fn fresh(task: &UploadTask) -> Self {
        Self {
            src_path: task.local_path.to_string_lossy().into_owned(),
            mtime_ns: task.mtime_ns,
            size: task.size,
            chunk_size: task.chunk_size,
            api_version: task.api_version,
            chunks: Vec::new(),
            upload_id: None,
        }
    }

    fn acknowledged(&self, part_number: u32) -> Option<&ChunkState> {
        self.chunks.iter().find(|c| c.part_number == part_number)
    }

    fn record(&mut self, chunk: ChunkState) {
        self.chunks.retain(|c| c.part_number != chunk.part_number);
        self.chunks.push(chunk);
        self.chunks.sort_by_key(|c| c.part_number);
    }
}

fn sidecar_path(sidecar_dir: &Path, task: &UploadTask) -> PathBuf {
    let digest = sha1::Sha1::digest(task.local_path.to_string_lossy().as_bytes());
    let name = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest);
    sidecar_dir.join(format!("{name}.upload.json"))
}

fn load_sidecar(path: &Path, task: &UploadTask) -> UploadSidecar {
    let loaded = fs::read(path)
        .ok()
        .and_then(|bytes| serde_json::from_slice::<UploadSidecar>(&bytes).ok());
    match loaded {
        Some(sidecar) if sidecar.matches(task) => sidecar,
        _ => UploadSidecar::fresh(task),
    }
}

/// Atomically persists `sidecar` by writing a `.tmp` file and renaming it
/// over the target path.
fn save_sidecar(path: &Path, sidecar: &UploadSidecar) -> Result<(), Error> {
    let tmp_path = path.with_extension("tmp");
    let bytes = serde_json::to_vec(sidecar)
        .map_err(|e| Error::new(Kind::Fatal, "failed to encode upload sidecar").with_cause(e))?;
    fs::write(&tmp_path, bytes)
        .map_err(|e| Error::new(Kind::Transient, "failed to write upload sidecar").with_cause(e))?;
    fs::rename(&tmp_path, path)
        .map_err(|e| Error::new(Kind::Transient, "failed to install upload sidecar").with_cause(e))?;
    Ok(())
}

#[cfg(unix)]
fn read_chunk(file: &File, offset: u64, length: u64) -> Result<Vec<u8>, Error> {
    use std::os::unix::fs::FileExt;
    let mut buf = vec![0u8; length as usize];
    file.read_exact_at(&mut buf, offset)
        .map_err(|e| Error::new(Kind::Permanent, "failed to read source chunk").with_cause(e))?;
    Ok(buf)
}

#[cfg(not(unix))]
fn read_chunk(file: &File, offset: u64, length: u64) -> Result<Vec<u8>, Error> {
    use std::io::{Read, Seek, SeekFrom};
    let mut file = file;
    file.seek(SeekFrom::Start(offset))
        .map_err(|e| Error::new(Kind::Permanent, "failed to seek source file").with_cause(e))?;
    let mut buf = vec![0u8; length as usize];
    file.read_exact(&mut buf)
        .map_err(|e| Error::new(Kind::Permanent, "failed to read source chunk").with_cause(e))?;
    Ok(buf)
}

fn upload_one_chunk(
    transport: &dyn Transport,
    hosts: &dyn HostProvider,
    retry: RetryPolicy,
    task: &UploadTask,
    chunk: &[u8],
    part_number: u32,
) -> Result<String, Error> {
    let path = match task.api_version {
        ApiVersion::V1 => format!("/mkblk/{}", chunk.len()),
        ApiVersion::V2 => format!("/uploadPart/{}/{part_number}", task.key),
    };
    let request = TransportRequest {
        method: Method::Post,
        path,
        headers: Vec::new(),
        body: chunk.to_vec(),
        range: None,
        total_timeout: None,
    };
    let response = transport.call(hosts, &request, retry)?;
    #[derive(Deserialize)]
    struct Ack {
        ctx: Option<String>,
        etag: Option<String>,
    }
    let ack: Ack = serde_json::from_slice(&response.body)
        .map_err(|e| Error::new(Kind::Transient, "malformed chunk ack").with_cause(e))?;
    ack.ctx
        .or(ack.etag)
        .ok_or_else(|| Error::new(Kind::Transient, "chunk ack missing etag/ctx"))
}

fn finalize_upload(
    transport: &dyn Transport,
    hosts: &dyn HostProvider,
    retry: RetryPolicy,
    task: &UploadTask,
    sidecar: &UploadSidecar,
) -> Result<ApiResult, Error> {
    let path = match task.api_version {
        ApiVersion::V1 => format!("/mkfile/{}/key/{}", task.size, task.key),
        ApiVersion::V2 => format!("/completeMultipartUpload/{}", task.key),
    };
    let etags: Vec<&str> = sidecar
        .chunks
        .iter()
        .filter_map(|c| c.etag.as_deref())
        .collect();
    let request = TransportRequest {
        method: Method::Post,
        path,
        headers: Vec::new(),
        body: etags.join(",").into_bytes(),
        range: None,
        total_timeout: None,
    };
    let response = transport.call(hosts, &request, retry)?;
    serde_json::from_slice(&response.body)
        .map_err(|e| Error::new(Kind::Transient, "malformed completion response").with_cause(e))
}

fn form_upload(
    transport: &dyn Transport,
    hosts: &dyn HostProvider,
    task: &UploadTask,
    token: &str,
) -> Result<ApiResult, Error> {
    let bytes = fs::read(&task.local_path)
        .map_err(|e| Error::new(Kind::Permanent, "failed to read source file").with_cause(e))?;
    let request = TransportRequest {
        method: Method::Post,
        path: format!("/upload?key={}&token={token}", task.key),
        headers: vec![(
            "Content-Type".to_owned(),
            task.mime.clone().unwrap_or_else(|| "application/octet-stream".to_owned()),
        )],
        body: bytes,
        range: None,
        total_timeout: Some(std::time::Duration::from_secs(30 * 60)),
    };
    let response = transport.call(hosts, &request, task.retry)?;
    serde_json::from_slice(&response.body)
        .map_err(|e| Error::new(Kind::Transient, "malformed form-upload response").with_cause(e))
}

fn check_hash(local_path: &Path, server_hash: Option<&str>) -> Result<(), Error> {
    let Some(server_hash) = server_hash else {
        return Ok(());
    };
    let data = fs::read(local_path)
        .map_err(|e| Error::new(Kind::Permanent, "failed to re-read source for hash check").with_cause(e))?;
    if tree_hash(&data) != server_hash {
        return Err(Error::new(Kind::Permanent, "uploaded content hash mismatch"));
    }
    Ok(())
}

/// Runs one upload task to completion, choosing the form fast-path or the
/// chunked state machine per [`UploadTask::put_threshold`].
#[instrument(skip(transport, hosts, token, sidecar_dir, cancel), fields(key = %task.key))]
pub fn upload(
    transport: &dyn Transport,
    hosts: &dyn HostProvider,
    token: &str,
    sidecar_dir: &Path,
    task: &UploadTask,
    cancel: &CancellationToken,
) -> Result<ApiResult, Error> {
    if task.check_exists && !task.overwrite {
        if let Ok(existing) = objsh_objects::adapters::stat(transport, hosts, task.retry, &task.bucket, &task.key) {
            let mut result = existing;
            result.is_not_overwrite = true;
            return Ok(result);
        }
    }

    let result = if task.size < task.put_threshold && !task.disable_form {
        form_upload(transport, hosts, task, token)?
    } else {
        chunked_upload(transport, hosts, sidecar_dir, task, cancel)?
    };

    if task.check_hash {
        check_hash(&task.local_path, result.hash.as_deref())?;
    }
    Ok(result)
}

fn upload_chunk_at(
    transport: &dyn Transport,
    hosts: &dyn HostProvider,
    task: &UploadTask,
    file: &File,
    part_number: u32,
) -> Result<ChunkState, Error> {
    let offset = u64::from(part_number - 1) * task.chunk_size;
    let length = task.chunk_size.min(task.size - offset);
    let chunk = read_chunk(file, offset, length)?;
    let etag = upload_one_chunk(transport, hosts, task.retry, task, &chunk, part_number).map_err(|err| {
        warn!(part_number, %err, "chunk upload failed");
        err
    })?;
    Ok(ChunkState {
        offset,
        length,
        etag: Some(etag),
        part_number,
    })
}

/// Uploads every not-yet-acknowledged chunk through a pool of
/// `task.resume_worker_count` worker threads, mirroring
/// [`crate::download::sliced_download`]'s slice worker pool.
fn chunked_upload(
    transport: &dyn Transport,
    hosts: &dyn HostProvider,
    sidecar_dir: &Path,
    task: &UploadTask,
    cancel: &CancellationToken,
) -> Result<ApiResult, Error> {
    let sidecar_file = sidecar_path(sidecar_dir, task);
    let sidecar = Mutex::new(load_sidecar(&sidecar_file, task));

    let file = File::open(&task.local_path)
        .map_err(|e| Error::new(Kind::Permanent, "failed to open source file").with_cause(e))?;

    let total_chunks = task.size.div_ceil(task.chunk_size).max(1) as u32;
    let pending: Vec<u32> = {
        let guard = sidecar.lock().unwrap();
        (1..=total_chunks).filter(|&p| guard.acknowledged(p).is_none()).collect()
    };

    let (work_tx, work_rx) = crossbeam_channel::unbounded::<u32>();
    let (result_tx, result_rx) = crossbeam_channel::unbounded::<Result<(), Error>>();
    for part_number in pending {
        work_tx.send(part_number).expect("receiver outlives this send");
    }
    drop(work_tx);

    let workers = task.resume_worker_count.max(1);
    let first_err = thread::scope(|scope| {
        for _ in 0..workers {
            let rx = work_rx.clone();
            let tx = result_tx.clone();
            let file = &file;
            let sidecar = &sidecar;
            let sidecar_file = &sidecar_file;
            scope.spawn(move || {
                while let Ok(part_number) = rx.recv() {
                    if cancel.is_cancelled() {
                        tx.send(Err(Error::new(Kind::Cancelled, "job cancelled"))).ok();
                        continue;
                    }
                    let outcome = upload_chunk_at(transport, hosts, task, file, part_number).and_then(|chunk| {
                        let mut guard = sidecar.lock().unwrap();
                        guard.record(chunk);
                        save_sidecar(sidecar_file, &guard)
                    });
                    if tx.send(outcome).is_err() {
                        break;
                    }
                }
            });
        }
        drop(result_tx);

        let mut first_err = None;
        for outcome in result_rx.iter() {
            if let Err(err) = outcome {
                if first_err.is_none() {
                    first_err = Some(err);
                }
            }
        }
        first_err
    });
    if let Some(err) = first_err {
        return Err(err);
    }

    let sidecar = sidecar.into_inner().unwrap();
    let result = finalize_upload(transport, hosts, task.retry, task, &sidecar)?;
    fs::remove_file(&sidecar_file).ok();
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use objsh_transport::{StaticHostProvider, TransportResponse};
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    fn base_task(local_path: PathBuf, size: u64) -> UploadTask {
        UploadTask {
            local_path,
            bucket: "b".into(),
            key: "k".into(),
            size,
            mtime_ns: 1,
            mime: None,
            overwrite: true,
            check_exists: false,
            check_hash: false,
            chunk_size: 4,
            put_threshold: 0,
            retry: RetryPolicy::default(),
            disable_form: true,
            api_version: ApiVersion::V2,
            resume_worker_count: 1,
        }
    }

    struct ScriptedTransport {
        responses: Mutex<Vec<String>>,
        calls: Mutex<Vec<String>>,
    }

    impl Transport for ScriptedTransport {
        fn call(
            &self,
            _hosts: &dyn HostProvider,
            request: &TransportRequest,
            _retry: RetryPolicy,
        ) -> Result<TransportResponse, Error> {
            self.calls.lock().unwrap().push(request.path.clone());
            let body = self.responses.lock().unwrap().remove(0);
            Ok(TransportResponse {
                status: 200,
                headers: Vec::new(),
                body: body.into_bytes(),
            })
        }
    }

    #[test]
    fn sidecar_records_chunks_in_increasing_part_number_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut src = dir.path().join("a.bin");
        src.set_file_name("a.bin");
        let mut f = File::create(&src).unwrap();
        f.write_all(&vec![1u8; 10]).unwrap();
        drop(f);

        let task = base_task(src, 10);
        let responses: Vec<String> = vec![
            serde_json::json!({"ctx": "p1"}).to_string(),
            serde_json::json!({"ctx": "p2"}).to_string(),
            serde_json::json!({"ctx": "p3"}).to_string(),
            serde_json::json!({"hash": "h", "size": 10, "mime": null}).to_string(),
        ];
        let transport = ScriptedTransport {
            responses: Mutex::new(responses),
            calls: Mutex::new(Vec::new()),
        };
        let hosts = StaticHostProvider(vec!["up.example.com".into()]);
        let result = upload(
            &transport,
            &hosts,
            "tok",
            dir.path(),
            &task,
            &CancellationToken::new(),
        )
        .unwrap();
        assert_eq!(result.size, Some(10));
    }

    #[test]
    fn restart_skips_already_acknowledged_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.bin");
        fs::write(&src, vec![2u8; 10]).unwrap();
        let task = base_task(src, 10);

        let sidecar_file = sidecar_path(dir.path(), &task);
        let mut sidecar = UploadSidecar::fresh(&task);
        sidecar.record(ChunkState {
            offset: 0,
            length: 4,
            etag: Some("already".into()),
            part_number: 1,
        });
        sidecar.record(ChunkState {
            offset: 4,
            length: 4,
            etag: Some("already2".into()),
            part_number: 2,
        });
        save_sidecar(&sidecar_file, &sidecar).unwrap();

        let responses = vec![
            serde_json::json!({"ctx": "p3"}).to_string(),
            serde_json::json!({"hash": "h", "size": 10}).to_string(),
        ];
        let transport = ScriptedTransport {
            responses: Mutex::new(responses),
            calls: Mutex::new(Vec::new()),
        };
        let hosts = StaticHostProvider(vec!["up.example.com".into()]);
        upload(
            &transport,
            &hosts,
            "tok",
            dir.path(),
            &task,
            &CancellationToken::new(),
        )
        .unwrap();
        assert_eq!(transport.calls.lock().unwrap().len(), 2);
    }

    #[test]
    fn mismatched_sidecar_key_restarts_from_scratch() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.bin");
        fs::write(&src, vec![3u8; 10]).unwrap();
        let mut task = base_task(src, 10);

        let sidecar_file = sidecar_path(dir.path(), &task);
        let mut sidecar = UploadSidecar::fresh(&task);
        sidecar.record(ChunkState {
            offset: 0,
            length: 4,
            etag: Some("stale".into()),
            part_number: 1,
        });
        save_sidecar(&sidecar_file, &sidecar).unwrap();

        task.mtime_ns = 999;
        let loaded = load_sidecar(&sidecar_file, &task);
        assert!(loaded.chunks.is_empty());
    }

    #[test]
    fn cancellation_stops_before_the_next_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.bin");
        fs::write(&src, vec![4u8; 10]).unwrap();
        let task = base_task(src, 10);
        let transport = ScriptedTransport {
            responses: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
        };
        let hosts = StaticHostProvider(vec!["up.example.com".into()]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = upload(&transport, &hosts, "tok", dir.path(), &task, &cancel).unwrap_err();
        assert_eq!(err.kind(), Kind::Cancelled);
    }

    #[test]
    fn effective_chunk_concurrency_is_exposed() {
        let _ = Arc::new(());
        assert_eq!(crate::effective_chunk_concurrency(5, 4), 20);
    }
}
