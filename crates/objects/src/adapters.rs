//! Single-object request/response adapters. Each validates its
//! arguments, builds a [`BatchOp`]-shaped request through [`crate::uri`],
//! issues it as a standalone call, and maps the response the same way
//! [`crate::batchrpc`] does — so single and batch modes agree bit for
//! bit.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use objsh_core::error::{Error, Kind};
use objsh_token::TokenProvider;
use objsh_transport::{HostProvider, Method, RetryPolicy, Transport, TransportRequest};
use serde::Deserialize;

use crate::{uri, ApiResult, BatchOp, BatchOpKind};

#[derive(Deserialize)]
#[serde(default)]
struct SingleResponse {
    code: i32,
    data: ApiResult,
}

impl Default for SingleResponse {
    fn default() -> Self {
        Self {
            code: 200,
            data: ApiResult::default(),
        }
    }
}

fn call(
    transport: &dyn Transport,
    hosts: &dyn HostProvider,
    retry: RetryPolicy,
    op: &BatchOp,
) -> Result<ApiResult, Error> {
    let request = TransportRequest {
        method: Method::Post,
        path: uri::build_subop(op),
        headers: Vec::new(),
        body: Vec::new(),
        range: None,
        total_timeout: None,
    };
    let response = transport.call(hosts, &request, retry)?;
    let decoded: SingleResponse = serde_json::from_slice(&response.body)
        .map_err(|e| Error::new(Kind::Transient, "malformed adapter response").with_cause(e))?;
    if decoded.code == 200 {
        Ok(decoded.data)
    } else {
        let kind = objsh_core::error::kind_from_status(decoded.code);
        Err(Error::new(kind, format!("operation failed with code {}", decoded.code))
            .with_code(decoded.code))
    }
}

/// Fetches object metadata.
pub fn stat(
    transport: &dyn Transport,
    hosts: &dyn HostProvider,
    retry: RetryPolicy,
    bucket: &str,
    key: &str,
) -> Result<ApiResult, Error> {
    call(transport, hosts, retry, &BatchOp::stat(bucket, key))
}

/// Deletes an object. A `NotFound` kind is treated as success by the
/// caller per the spec's batch error semantics — this adapter surfaces
/// it unchanged and leaves that decision to the caller.
pub fn delete(
    transport: &dyn Transport,
    hosts: &dyn HostProvider,
    retry: RetryPolicy,
    bucket: &str,
    key: &str,
) -> Result<ApiResult, Error> {
    call(transport, hosts, retry, &BatchOp::delete(bucket, key))
}

/// Copies an object to a new bucket/key.
pub fn copy(
    transport: &dyn Transport,
    hosts: &dyn HostProvider,
    retry: RetryPolicy,
    bucket: &str,
    key: &str,
    dest_bucket: &str,
    dest_key: &str,
    force: bool,
) -> Result<ApiResult, Error> {
    call(
        transport,
        hosts,
        retry,
        &BatchOp::copy(bucket, key, dest_bucket, dest_key, force),
    )
}

/// Moves (renames) an object to a new bucket/key.
pub fn move_object(
    transport: &dyn Transport,
    hosts: &dyn HostProvider,
    retry: RetryPolicy,
    bucket: &str,
    key: &str,
    dest_bucket: &str,
    dest_key: &str,
    force: bool,
) -> Result<ApiResult, Error> {
    call(
        transport,
        hosts,
        retry,
        &BatchOp::move_to(bucket, key, dest_bucket, dest_key, force),
    )
}

/// Changes an object's storage class.
pub fn chtype(
    transport: &dyn Transport,
    hosts: &dyn HostProvider,
    retry: RetryPolicy,
    bucket: &str,
    key: &str,
    file_type: u8,
) -> Result<ApiResult, Error> {
    let mut op = BatchOp::stat(bucket, key);
    op.kind = BatchOpKind::ChType;
    op.file_type = Some(file_type);
    call(transport, hosts, retry, &op)
}

/// Changes an object's MIME type.
pub fn chmime(
    transport: &dyn Transport,
    hosts: &dyn HostProvider,
    retry: RetryPolicy,
    bucket: &str,
    key: &str,
    mime: &str,
) -> Result<ApiResult, Error> {
    let mut op = BatchOp::stat(bucket, key);
    op.kind = BatchOpKind::ChMime;
    op.mime = Some(mime.to_owned());
    call(transport, hosts, retry, &op)
}

/// Changes an object's enable/disable status.
pub fn chstatus(
    transport: &dyn Transport,
    hosts: &dyn HostProvider,
    retry: RetryPolicy,
    bucket: &str,
    key: &str,
    status: u8,
) -> Result<ApiResult, Error> {
    let mut op = BatchOp::stat(bucket, key);
    op.kind = BatchOpKind::ChStatus;
    op.status = Some(status);
    call(transport, hosts, retry, &op)
}

/// Fetches a remote URL into the bucket under `key`.
pub fn fetch(
    transport: &dyn Transport,
    hosts: &dyn HostProvider,
    retry: RetryPolicy,
    bucket: &str,
    key: &str,
    source_url: &str,
) -> Result<ApiResult, Error> {
    let entry = uri::encode_entry(bucket, key);
    let url = URL_SAFE_NO_PAD.encode(source_url);
    let request = TransportRequest {
        method: Method::Post,
        path: format!("/fetch/{url}/to/{entry}"),
        headers: Vec::new(),
        body: Vec::new(),
        range: None,
        total_timeout: None,
    };
    let response = transport.call(hosts, &request, retry)?;
    let decoded: SingleResponse = serde_json::from_slice(&response.body)
        .map_err(|e| Error::new(Kind::Transient, "malformed fetch response").with_cause(e))?;
    if decoded.code == 200 {
        Ok(decoded.data)
    } else {
        Err(Error::new(objsh_core::error::kind_from_status(decoded.code), "fetch failed")
            .with_code(decoded.code))
    }
}

/// Issues an asynchronous prefetch (mirrors `fetch` but against a CDN
/// cache-warm endpoint rather than a synchronous origin fetch).
pub fn prefetch(
    transport: &dyn Transport,
    hosts: &dyn HostProvider,
    retry: RetryPolicy,
    bucket: &str,
    key: &str,
) -> Result<ApiResult, Error> {
    let entry = uri::encode_entry(bucket, key);
    let request = TransportRequest {
        method: Method::Post,
        path: format!("/prefetch/{entry}"),
        headers: Vec::new(),
        body: Vec::new(),
        range: None,
        total_timeout: None,
    };
    let response = transport.call(hosts, &request, retry)?;
    let decoded: SingleResponse = serde_json::from_slice(&response.body)
        .map_err(|e| Error::new(Kind::Transient, "malformed prefetch response").with_cause(e))?;
    if decoded.code == 200 {
        Ok(decoded.data)
    } else {
        Err(Error::new(objsh_core::error::kind_from_status(decoded.code), "prefetch failed")
            .with_code(decoded.code))
    }
}

/// Signs a time-bounded private download URL for `raw_url`.
#[must_use]
pub fn private_url(token: &dyn TokenProvider, raw_url: &str, deadline: u64) -> String {
    token.sign_private_url(raw_url, deadline)
}

/// Downloads an object verbatim to `dest_path`, the single-stream
/// counterpart to `objsh-transfer`'s sliced download, used for save-as
/// when slicing is not warranted.
pub fn save_as(
    transport: &dyn Transport,
    hosts: &dyn HostProvider,
    retry: RetryPolicy,
    bucket: &str,
    key: &str,
) -> Result<Vec<u8>, Error> {
    let entry = uri::encode_entry(bucket, key);
    let request = TransportRequest {
        method: Method::Get,
        path: format!("/download/{entry}"),
        headers: Vec::new(),
        body: Vec::new(),
        range: None,
        total_timeout: None,
    };
    let response = transport.call(hosts, &request, retry)?;
    Ok(response.body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use objsh_token::AccessKeyProvider;
    use objsh_transport::{StaticHostProvider, TransportResponse};
    use std::sync::Mutex;

    struct FakeTransport {
        script: Mutex<Vec<(i32, String)>>,
    }

    impl Transport for FakeTransport {
        fn call(
            &self,
            _hosts: &dyn HostProvider,
            _request: &TransportRequest,
            _retry: RetryPolicy,
        ) -> Result<TransportResponse, Error> {
            let (code, body) = self.script.lock().unwrap().remove(0);
            Ok(TransportResponse {
                status: if code == 200 { 200 } else { 200 },
                headers: Vec::new(),
                body: format!("{{\"code\":{code},\"data\":{body}}}").into_bytes(),
            })
        }
    }

    #[test]
    fn stat_decodes_a_successful_response() {
        let transport = FakeTransport {
            script: Mutex::new(vec![(200, "{\"size\":42}".to_owned())]),
        };
        let hosts = StaticHostProvider(vec!["rs.example.com".into()]);
        let result = stat(&transport, &hosts, RetryPolicy::default(), "b", "k").unwrap();
        assert_eq!(result.size, Some(42));
    }

    #[test]
    fn delete_surfaces_not_found_as_an_error_kind() {
        let transport = FakeTransport {
            script: Mutex::new(vec![(612, "{}".to_owned())]),
        };
        let hosts = StaticHostProvider(vec!["rs.example.com".into()]);
        let err = delete(&transport, &hosts, RetryPolicy::default(), "b", "missing").unwrap_err();
        assert_eq!(err.kind(), Kind::NotFound);
    }

    #[test]
    fn private_url_delegates_to_the_token_provider() {
        let token = AccessKeyProvider::new("ak", "sk");
        let signed = private_url(&token, "https://cdn.example.com/a.png", 1_700_000_000);
        assert!(signed.contains("e=1700000000"));
    }
}
