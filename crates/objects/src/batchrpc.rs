//! Multi-operation RPC: packs sub-operations into bounded-size calls, fans
//! out K parallel calls over disjoint slices, and demuxes results by index.

use std::sync::Arc;
use std::thread;

use objsh_core::error::{Error, Kind};
use objsh_transport::{HostProvider, Method, RetryPolicy, Transport, TransportRequest};
use serde::Deserialize;

use crate::{uri, ApiResult, BatchOp};

/// Maximum sub-operations accepted by one RPC call.
pub const BATCH_ALLOW_MAX: usize = 1000;

/// The outcome of one sub-operation, paired with its position in the
/// original op list so callers can zip it back against their own state.
#[derive(Clone, Debug)]
pub struct OperationResult {
    /// Index into the original `ops` slice passed to [`run_batch`].
    pub op_index: usize,
    /// Provider response code for this sub-operation (200 on success).
    pub code: i32,
    /// Decoded payload, present when `code == 200`.
    pub result: Option<ApiResult>,
    /// Error, present when `code != 200`.
    pub error: Option<Error>,
}

#[derive(Deserialize)]
struct SubOpResponse {
    code: i32,
    #[serde(default)]
    data: ApiResult,
}

fn issue_chunk(
    transport: &dyn Transport,
    hosts: &dyn HostProvider,
    retry: RetryPolicy,
    chunk: &[BatchOp],
) -> Result<Vec<SubOpResponse>, Error> {
    let body = chunk
        .iter()
        .map(|op| format!("op={}", uri::build_subop(op)))
        .collect::<Vec<_>>()
        .join("&");
    let request = TransportRequest {
        method: Method::Post,
        path: "/batch".to_owned(),
        headers: vec![(
            "Content-Type".to_owned(),
            "application/x-www-form-urlencoded".to_owned(),
        )],
        body: body.into_bytes(),
        range: None,
        total_timeout: None,
    };
    let response = transport.call(hosts, &request, retry)?;
    serde_json::from_slice(&response.body)
        .map_err(|e| Error::new(Kind::Transient, "malformed batch response").with_cause(e))
}

/// Packs `ops` into chunks of at most [`BATCH_ALLOW_MAX`], issues one RPC
/// per chunk sequentially, and demuxes results by original index.
pub fn run_batch(
    transport: &dyn Transport,
    hosts: &dyn HostProvider,
    retry: RetryPolicy,
    ops: &[BatchOp],
) -> Vec<OperationResult> {
    let mut results = Vec::with_capacity(ops.len());
    for (chunk_index, chunk) in ops.chunks(BATCH_ALLOW_MAX).enumerate() {
        let base = chunk_index * BATCH_ALLOW_MAX;
        match issue_chunk(transport, hosts, retry, chunk) {
            Ok(responses) => {
                for (offset, resp) in responses.into_iter().enumerate() {
                    results.push(decode(base + offset, resp));
                }
            }
            Err(err) => {
                for offset in 0..chunk.len() {
                    results.push(OperationResult {
                        op_index: base + offset,
                        code: err.code().unwrap_or(0),
                        result: None,
                        error: Some(Error::new(err.kind(), err.descriptor().to_owned())),
                    });
                }
            }
        }
    }
    results
}

fn decode(op_index: usize, resp: SubOpResponse) -> OperationResult {
    if resp.code == 200 {
        OperationResult {
            op_index,
            code: resp.code,
            result: Some(resp.data),
            error: None,
        }
    } else {
        let kind = objsh_core::error::kind_from_status(resp.code);
        OperationResult {
            op_index,
            code: resp.code,
            result: None,
            error: Some(Error::new(kind, format!("batch op failed with code {}", resp.code)).with_code(resp.code)),
        }
    }
}

/// Like [`run_batch`] but issues up to `concurrency` chunk RPCs in
/// parallel over disjoint slices. Ordering within one RPC is preserved;
/// ordering across RPCs is not (callers reassemble by `op_index`).
pub fn run_batch_concurrent(
    transport: Arc<dyn Transport>,
    hosts: Arc<dyn HostProvider>,
    retry: RetryPolicy,
    ops: Vec<BatchOp>,
    concurrency: usize,
) -> Vec<OperationResult> {
    let chunks: Vec<(usize, Vec<BatchOp>)> = ops
        .chunks(BATCH_ALLOW_MAX)
        .enumerate()
        .map(|(i, c)| (i * BATCH_ALLOW_MAX, c.to_vec()))
        .collect();
    let (work_tx, work_rx) = crossbeam_channel::unbounded::<(usize, Vec<BatchOp>)>();
    let (result_tx, result_rx) = crossbeam_channel::unbounded::<Vec<OperationResult>>();
    for chunk in chunks {
        work_tx.send(chunk).expect("channel has no disconnected receivers yet");
    }
    drop(work_tx);

    let workers = concurrency.max(1);
    let mut handles = Vec::with_capacity(workers);
    for _ in 0..workers {
        let rx = work_rx.clone();
        let tx = result_tx.clone();
        let transport = Arc::clone(&transport);
        let hosts = Arc::clone(&hosts);
        handles.push(thread::spawn(move || {
            while let Ok((base, chunk)) = rx.recv() {
                let out = match issue_chunk(transport.as_ref(), hosts.as_ref(), retry, &chunk) {
                    Ok(responses) => responses
                        .into_iter()
                        .enumerate()
                        .map(|(offset, resp)| decode(base + offset, resp))
                        .collect(),
                    Err(err) => (0..chunk.len())
                        .map(|offset| OperationResult {
                            op_index: base + offset,
                            code: err.code().unwrap_or(0),
                            result: None,
                            error: Some(Error::new(err.kind(), err.descriptor().to_owned())),
                        })
                        .collect(),
                };
                if tx.send(out).is_err() {
                    break;
                }
            }
        }));
    }
    drop(result_tx);

    let mut results: Vec<OperationResult> = result_rx.iter().flatten().collect();
    for handle in handles {
        handle.join().ok();
    }
    results.sort_by_key(|r| r.op_index);
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use objsh_transport::{StaticHostProvider, TransportResponse};
    use std::sync::Mutex;

    struct FakeTransport {
        script: Mutex<Vec<String>>,
    }

    impl Transport for FakeTransport {
        fn call(
            &self,
            _hosts: &dyn HostProvider,
            _request: &TransportRequest,
            _retry: RetryPolicy,
        ) -> Result<TransportResponse, Error> {
            let body = self.script.lock().unwrap().remove(0);
            Ok(TransportResponse {
                status: 200,
                headers: Vec::new(),
                body: body.into_bytes(),
            })
        }
    }

    #[test]
    fn packs_exactly_ceil_n_over_max_rpcs() {
        let ops: Vec<BatchOp> = (0..2500).map(|i| BatchOp::stat("b", format!("k{i}"))).collect();
        let script: Vec<String> = vec![
            serde_json::to_string(&vec![serde_json::json!({"code": 200, "data": {}}); 1000]).unwrap(),
            serde_json::to_string(&vec![serde_json::json!({"code": 200, "data": {}}); 1000]).unwrap(),
            serde_json::to_string(&vec![serde_json::json!({"code": 200, "data": {}}); 500]).unwrap(),
        ];
        let transport = FakeTransport {
            script: Mutex::new(script),
        };
        let hosts = StaticHostProvider(vec!["up.example.com".into()]);
        let results = run_batch(&transport, &hosts, RetryPolicy::default(), &ops);
        assert_eq!(results.len(), 2500);
        assert!(results.iter().all(|r| r.code == 200));
    }

    #[test]
    fn demuxes_a_single_failure_by_index() {
        let ops = vec![
            BatchOp::stat("b", "a"),
            BatchOp::stat("b", "missing"),
            BatchOp::stat("b", "c"),
        ];
        let script = vec![serde_json::json!([
            {"code": 200, "data": {}},
            {"code": 612, "data": {}},
            {"code": 200, "data": {}},
        ])
        .to_string()];
        let transport = FakeTransport {
            script: Mutex::new(script),
        };
        let hosts = StaticHostProvider(vec!["up.example.com".into()]);
        let results = run_batch(&transport, &hosts, RetryPolicy::default(), &ops);
        assert_eq!(results[1].op_index, 1);
        assert_eq!(results[1].code, 612);
        assert!(results[1].error.is_some());
        assert!(results[0].error.is_none());
    }
}
