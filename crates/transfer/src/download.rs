//! Resumable / sliced download: positional-write slicing with a bitmap
//! sidecar, single-stream `Range`-resume fallback, and `CheckHash`
//! verification before the final rename.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;

use objsh_core::cancel::CancellationToken;
use objsh_core::error::{Error, Kind};
use objsh_transport::{HostProvider, Method, RetryPolicy, Transport, TransportRequest};
use tracing::instrument;

use crate::hash::tree_hash;

/// A fully specified download.
#[derive(Clone, Debug)]
pub struct DownloadTask {
    /// Destination path for the final file.
    pub dest_path: PathBuf,
    /// Object size, known ahead of time (e.g. from a prior `stat`).
    pub size: u64,
    /// Expected content hash, checked before the final rename if set.
    pub expected_hash: Option<String>,
    /// Enables sliced (multi-range, concurrent) download.
    pub enable_slice: bool,
    /// Slice size in bytes.
    pub slice_size: u64,
    /// Maximum concurrent slice transfers.
    pub slice_concurrency: usize,
    /// Size threshold at or above which slicing is used.
    pub slice_threshold: u64,
    /// Delete the `.tmp` and bitmap sidecar on unrecoverable failure.
    pub remove_temp_while_error: bool,
    /// Per-request retry policy.
    pub retry: RetryPolicy,
}

fn tmp_path(task: &DownloadTask) -> PathBuf {
    task.dest_path.with_extension("tmp")
}

fn bitmap_path(task: &DownloadTask) -> PathBuf {
    task.dest_path.with_extension("bitmap")
}

fn pack_bitmap(bits: &[bool]) -> Vec<u8> {
    let mut bytes = vec![0u8; bits.len().div_ceil(8)];
    for (i, &set) in bits.iter().enumerate() {
        if set {
            bytes[i / 8] |= 1 << (i % 8);
        }
    }
    bytes
}

fn unpack_bitmap(bytes: &[u8], len: usize) -> Vec<bool> {
    (0..len).map(|i| bytes.get(i / 8).is_some_and(|b| b & (1 << (i % 8)) != 0)).collect()
}

fn load_bitmap(path: &Path, len: usize) -> Vec<bool> {
    fs::read(path)
        .map(|bytes| unpack_bitmap(&bytes, len))
        .unwrap_or_else(|_| vec![false; len])
}

fn save_bitmap(path: &Path, bits: &[bool]) -> Result<(), Error> {
    let tmp = path.with_extension("bitmap.tmp");
    fs::write(&tmp, pack_bitmap(bits))
        .map_err(|e| Error::new(Kind::Transient, "failed to write slice bitmap").with_cause(e))?;
    fs::rename(&tmp, path)
        .map_err(|e| Error::new(Kind::Transient, "failed to install slice bitmap").with_cause(e))
}

#[cfg(unix)]
fn write_at(file: &File, offset: u64, data: &[u8]) -> Result<(), Error> {
    use std::os::unix::fs::FileExt;
    file.write_at(data, offset)
        .map(|_| ())
        .map_err(|e| Error::new(Kind::Transient, "failed to write slice").with_cause(e))
}

#[cfg(not(unix))]
fn write_at(file: &File, offset: u64, data: &[u8]) -> Result<(), Error> {
    use std::io::{Seek, SeekFrom, Write};
    let mut file = file;
    file.seek(SeekFrom::Start(offset))
        .map_err(|e| Error::new(Kind::Transient, "failed to seek slice").with_cause(e))?;
    file.write_all(data)
        .map_err(|e| Error::new(Kind::Transient, "failed to write slice").with_cause(e))
}

fn fetch_range(
    transport: &dyn Transport,
    hosts: &dyn HostProvider,
    retry: RetryPolicy,
    path: &str,
    offset: u64,
    length: u64,
) -> Result<Vec<u8>, Error> {
    let request = TransportRequest {
        method: Method::Get,
        path: path.to_owned(),
        headers: Vec::new(),
        body: Vec::new(),
        range: Some((offset, length)),
        total_timeout: Some(std::time::Duration::from_secs(10 * 60)),
    };
    let response = transport.call(hosts, &request, retry)?;
    Ok(response.body)
}

fn cleanup(task: &DownloadTask) {
    if task.remove_temp_while_error {
        fs::remove_file(tmp_path(task)).ok();
        fs::remove_file(bitmap_path(task)).ok();
    }
}

fn sliced_download(
    transport: Arc<dyn Transport>,
    hosts: Arc<dyn HostProvider>,
    source_path: &str,
    task: &DownloadTask,
    cancel: &CancellationToken,
) -> Result<(), Error> {
    let slice_count = task.size.div_ceil(task.slice_size).max(1) as usize;
    let tmp = tmp_path(task);
    let bitmap_file = bitmap_path(task);
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(&tmp)
        .map_err(|e| Error::new(Kind::Permanent, "failed to create temp file").with_cause(e))?;
    file.set_len(task.size)
        .map_err(|e| Error::new(Kind::Permanent, "failed to preallocate temp file").with_cause(e))?;
    let file = Arc::new(file);

    let bits = Arc::new(Mutex::new(load_bitmap(&bitmap_file, slice_count)));
    let pending: Vec<usize> = {
        let guard = bits.lock().unwrap();
        (0..slice_count).filter(|&i| !guard[i]).collect()
    };

    let (work_tx, work_rx) = crossbeam_channel::unbounded::<usize>();
    let (result_tx, result_rx) = crossbeam_channel::unbounded::<Result<usize, Error>>();
    for index in pending {
        work_tx.send(index).expect("receiver outlives this send");
    }
    drop(work_tx);

    let workers = task.slice_concurrency.max(1);
    let mut handles = Vec::with_capacity(workers);
    for _ in 0..workers {
        let rx = work_rx.clone();
        let tx = result_tx.clone();
        let transport = Arc::clone(&transport);
        let hosts = Arc::clone(&hosts);
        let file = Arc::clone(&file);
        let source_path = source_path.to_owned();
        let cancel = cancel.clone();
        let slice_size = task.slice_size;
        let total_size = task.size;
        let retry = task.retry;
        handles.push(thread::spawn(move || {
            while let Ok(index) = rx.recv() {
                if cancel.is_cancelled() {
                    tx.send(Err(Error::new(Kind::Cancelled, "job cancelled"))).ok();
                    continue;
                }
                let offset = index as u64 * slice_size;
                let length = slice_size.min(total_size - offset);
                let outcome = fetch_range(transport.as_ref(), hosts.as_ref(), retry, &source_path, offset, length)
                    .and_then(|data| write_at(&file, offset, &data))
                    .map(|_| index);
                if tx.send(outcome).is_err() {
                    break;
                }
            }
        }));
    }
    drop(result_tx);

    let mut first_err = None;
    for outcome in result_rx.iter() {
        match outcome {
            Ok(index) => {
                let mut guard = bits.lock().unwrap();
                guard[index] = true;
                save_bitmap(&bitmap_file, &guard)?;
            }
            Err(err) if first_err.is_none() => first_err = Some(err),
            Err(_) => {}
        }
    }
    for handle in handles {
        handle.join().ok();
    }

    if let Some(err) = first_err {
        cleanup(task);
        return Err(err);
    }
    Ok(())
}

fn single_stream_download(
    transport: &dyn Transport,
    hosts: &dyn HostProvider,
    source_path: &str,
    task: &DownloadTask,
) -> Result<(), Error> {
    let tmp = tmp_path(task);
    let data = fetch_range(transport, hosts, task.retry, source_path, 0, task.size)?;
    fs::write(&tmp, data)
        .map_err(|e| Error::new(Kind::Transient, "failed to write downloaded file").with_cause(e))?;
    Ok(())
}

/// Downloads `source_path` (the URL path, already private-URL-signed by
/// the caller if the bucket is private) to `task.dest_path`, choosing
/// sliced or single-stream transfer per [`DownloadTask::slice_threshold`].
#[instrument(skip(transport, hosts, cancel), fields(dest = %task.dest_path.display()))]
pub fn download(
    transport: Arc<dyn Transport>,
    hosts: Arc<dyn HostProvider>,
    source_path: &str,
    task: &DownloadTask,
    cancel: &CancellationToken,
) -> Result<(), Error> {
    if task.enable_slice && task.size >= task.slice_threshold {
        sliced_download(Arc::clone(&transport), Arc::clone(&hosts), source_path, task, cancel)?;
    } else {
        single_stream_download(transport.as_ref(), hosts.as_ref(), source_path, task)?;
    }

    if let Some(expected) = &task.expected_hash {
        let data = fs::read(tmp_path(task))
            .map_err(|e| Error::new(Kind::Permanent, "failed to re-read downloaded temp file").with_cause(e))?;
        if &tree_hash(&data) != expected {
            cleanup(task);
            return Err(Error::new(Kind::Permanent, "downloaded content hash mismatch"));
        }
    }

    fs::rename(tmp_path(task), &task.dest_path)
        .map_err(|e| Error::new(Kind::Transient, "failed to install downloaded file").with_cause(e))?;
    fs::remove_file(bitmap_path(task)).ok();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use objsh_transport::{StaticHostProvider, TransportResponse};
    use std::sync::Mutex as StdMutex;

    struct FakeRangeTransport {
        content: Vec<u8>,
        fail_offset: Option<u64>,
    }

    impl Transport for FakeRangeTransport {
        fn call(
            &self,
            _hosts: &dyn HostProvider,
            request: &TransportRequest,
            _retry: RetryPolicy,
        ) -> Result<TransportResponse, Error> {
            let (offset, length) = request.range.expect("ranged request");
            if self.fail_offset == Some(offset) {
                return Err(Error::new(Kind::Transient, "simulated slice failure"));
            }
            let end = (offset + length).min(self.content.len() as u64);
            let body = self.content[offset as usize..end as usize].to_vec();
            Ok(TransportResponse {
                status: 206,
                headers: Vec::new(),
                body,
            })
        }
    }

    fn task(dest: PathBuf, size: u64) -> DownloadTask {
        DownloadTask {
            dest_path: dest,
            size,
            expected_hash: None,
            enable_slice: true,
            slice_size: 4,
            slice_concurrency: 2,
            slice_threshold: 1,
            remove_temp_while_error: true,
            retry: RetryPolicy::default(),
        }
    }

    #[test]
    fn sliced_download_reassembles_the_full_object() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.bin");
        let content: Vec<u8> = (0..12u8).collect();
        let transport: Arc<dyn Transport> = Arc::new(FakeRangeTransport {
            content: content.clone(),
            fail_offset: None,
        });
        let hosts: Arc<dyn HostProvider> = Arc::new(StaticHostProvider(vec!["cdn.example.com".into()]));
        download(transport, hosts, "/key", &task(dest.clone(), 12), &CancellationToken::new()).unwrap();
        assert_eq!(fs::read(&dest).unwrap(), content);
    }

    #[test]
    fn failure_removes_temp_and_bitmap_when_configured() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.bin");
        let transport: Arc<dyn Transport> = Arc::new(FakeRangeTransport {
            content: vec![0u8; 12],
            fail_offset: Some(4),
        });
        let hosts: Arc<dyn HostProvider> = Arc::new(StaticHostProvider(vec!["cdn.example.com".into()]));
        let t = task(dest.clone(), 12);
        let err = download(transport, hosts, "/key", &t, &CancellationToken::new()).unwrap_err();
        assert!(err.kind() != Kind::Cancelled);
        assert!(!tmp_path(&t).exists());
        assert!(!bitmap_path(&t).exists());
    }

    #[test]
    fn bitmap_round_trips_through_pack_and_unpack() {
        let bits = vec![true, false, true, true, false, false, false, false, true];
        let packed = pack_bitmap(&bits);
        let unpacked = unpack_bitmap(&packed, bits.len());
        assert_eq!(bits, unpacked);
    }

    #[test]
    fn restart_only_refetches_unset_slices() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.bin");
        let t = task(dest.clone(), 12);
        // slice 0 and 2 already complete, per the crate doc's restart example.
        save_bitmap(&bitmap_path(&t), &[true, false, true]).unwrap();
        let _lock = StdMutex::new(());
        let transport: Arc<dyn Transport> = Arc::new(FakeRangeTransport {
            content: (0..12u8).collect(),
            fail_offset: None,
        });
        let hosts: Arc<dyn HostProvider> = Arc::new(StaticHostProvider(vec!["cdn.example.com".into()]));
        download(transport, hosts, "/key", &t, &CancellationToken::new()).unwrap();
        assert!(dest.exists());
    }
}
