#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `objsh_transport` is an HTTP client with retry, host fallback,
//! source-IP binding and an HTTPS toggle. Every single-object adapter
//! (`objsh-objects`) and resumable transfer engine (`objsh-transfer`)
//! talks to the provider through the [`Transport`] trait rather than
//! `reqwest` directly, so both crates can be unit tested against an
//! in-memory fake.
//!
//! # Design
//!
//! [`HostProvider`] yields an ordered list of candidate hosts; on a
//! host-level error the caller advances to the next entry, and exhaustion
//! fails the call. A single [`Transport::call`] invocation walks that
//! list, retrying each host up to [`RetryPolicy::max_attempts`] times with
//! linear backoff before advancing.
//!
//! # Invariants
//!
//! - Any 5xx or network error is retryable; 4xx (other than 401/419) is
//!   fatal without a retry.
//! - `connect` timeout is 30s, `read` timeout is 60s; the *total*
//!   per-request timeout (10 min sliced / 30 min form) is the caller's
//!   responsibility via [`TransportRequest::total_timeout`].

use std::net::IpAddr;
use std::time::Duration;

use objsh_core::error::{Error, Kind};
use thiserror::Error as ThisError;
use tracing::{instrument, warn};

/// HTTP verb for a [`TransportRequest`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    /// GET.
    Get,
    /// POST.
    Post,
    /// PUT.
    Put,
}

/// One HTTP request to issue against a provider host. `path` is appended
/// to whichever host [`HostProvider`] currently offers.
#[derive(Clone, Debug)]
pub struct TransportRequest {
    /// HTTP verb.
    pub method: Method,
    /// Path (and query) appended to the selected host, e.g. `/stat/...`.
    pub path: String,
    /// Extra headers, e.g. `Authorization`.
    pub headers: Vec<(String, String)>,
    /// Request body, if any.
    pub body: Vec<u8>,
    /// Optional byte range, used by sliced downloads.
    pub range: Option<(u64, u64)>,
    /// Per-request total timeout; defaults to 30 min (the form upload
    /// ceiling) when unset.
    pub total_timeout: Option<Duration>,
}

impl TransportRequest {
    /// Builds a minimal GET request.
    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            headers: Vec::new(),
            body: Vec::new(),
            range: None,
            total_timeout: None,
        }
    }

    /// Builds a POST request with a body.
    #[must_use]
    pub fn post(path: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            method: Method::Post,
            path: path.into(),
            headers: Vec::new(),
            body,
            range: None,
            total_timeout: None,
        }
    }

    /// Restricts the request to a byte range via the `Range` header.
    #[must_use]
    pub fn with_range(mut self, offset: u64, len: u64) -> Self {
        self.range = Some((offset, len));
        self
    }
}

/// The successful response of a [`Transport::call`].
#[derive(Clone, Debug)]
pub struct TransportResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: Vec<(String, String)>,
    /// Response body.
    pub body: Vec<u8>,
}

/// Ordered list of candidate hosts for a transfer. On a host-level error
/// the caller advances to the next entry; exhaustion fails the operation.
pub trait HostProvider: Send + Sync {
    /// Returns the ordered candidate hosts, most preferred first.
    fn hosts(&self) -> Vec<String>;
}

/// A fixed, statically ordered host list.
#[derive(Clone, Debug)]
pub struct StaticHostProvider(pub Vec<String>);

impl HostProvider for StaticHostProvider {
    fn hosts(&self) -> Vec<String> {
        self.0.clone()
    }
}

/// Retry policy applied per host before advancing to the next one.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// Maximum attempts per host (default 3).
    pub max_attempts: u32,
    /// Linear backoff step between attempts.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

/// Source-address and scheme configuration for a transport instance.
#[derive(Clone, Debug, Default)]
pub struct TransportOptions {
    /// Bind outgoing connections to this source IP, if set.
    pub bind_ip: Option<IpAddr>,
    /// Use HTTPS (true) or HTTP (false).
    pub use_https: bool,
}

/// Errors constructing a [`Transport`].
#[derive(Debug, ThisError)]
pub enum TransportBuildError {
    /// The underlying HTTP client failed to build.
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Capability for issuing an HTTP request with retry and host fallback.
/// Implemented by [`HttpTransport`]; tests implement it directly against
/// an in-memory fake.
pub trait Transport: Send + Sync {
    /// Issues `request` against `hosts`, retrying per [`RetryPolicy`] and
    /// advancing through hosts on host-level failure.
    fn call(
        &self,
        hosts: &dyn HostProvider,
        request: &TransportRequest,
        retry: RetryPolicy,
    ) -> Result<TransportResponse, Error>;
}

/// Blocking `reqwest`-backed [`Transport`].
pub struct HttpTransport {
    client: reqwest::blocking::Client,
    options: TransportOptions,
}

impl HttpTransport {
    /// Builds a transport with a 30s connect / 60s read timeout and
    /// optional source-IP binding.
    pub fn new(options: TransportOptions) -> Result<Self, TransportBuildError> {
        let mut builder = reqwest::blocking::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .timeout(Duration::from_secs(60));
        if let Some(ip) = options.bind_ip {
            builder = builder.local_address(ip);
        }
        let client = builder.build()?;
        Ok(Self { client, options })
    }

    fn scheme(&self) -> &'static str {
        if self.options.use_https {
            "https"
        } else {
            "http"
        }
    }
}

impl Transport for HttpTransport {
    #[instrument(skip_all, fields(path = %request.path))]
    fn call(
        &self,
        hosts: &dyn HostProvider,
        request: &TransportRequest,
        retry: RetryPolicy,
    ) -> Result<TransportResponse, Error> {
        let mut last_err: Option<Error> = None;
        for host in hosts.hosts() {
            for attempt in 1..=retry.max_attempts {
                let url = format!("{}://{host}{}", self.scheme(), request.path);
                let mut builder = match request.method {
                    Method::Get => self.client.get(&url),
                    Method::Post => self.client.post(&url).body(request.body.clone()),
                    Method::Put => self.client.put(&url).body(request.body.clone()),
                };
                for (name, value) in &request.headers {
                    builder = builder.header(name, value);
                }
                if let Some((offset, len)) = request.range {
                    builder = builder.header(
                        "Range",
                        format!("bytes={offset}-{}", offset + len.saturating_sub(1)),
                    );
                }
                if let Some(total) = request.total_timeout {
                    builder = builder.timeout(total);
                }

                match builder.send() {
                    Ok(resp) => {
                        let status = resp.status().as_u16();
                        if (200..300).contains(&status) {
                            let headers = resp
                                .headers()
                                .iter()
                                .map(|(k, v)| {
                                    (k.to_string(), v.to_str().unwrap_or_default().to_owned())
                                })
                                .collect();
                            let body = resp.bytes().map_err(|e| {
                                Error::new(Kind::Transient, "failed reading response body")
                                    .with_cause(e)
                            })?;
                            return Ok(TransportResponse {
                                status,
                                headers,
                                body: body.to_vec(),
                            });
                        }
                        let kind = objsh_core::error::kind_from_status(i32::from(status));
                        let err = Error::new(kind, format!("HTTP {status}")).with_code(i32::from(status));
                        if !kind.is_retryable() {
                            return Err(err);
                        }
                        last_err = Some(err);
                    }
                    Err(e) => {
                        last_err = Some(
                            Error::new(Kind::Transient, "transport error").with_cause(e),
                        );
                    }
                }

                if attempt < retry.max_attempts {
                    warn!(host, attempt, "transport call failed, retrying");
                    std::thread::sleep(retry.backoff * attempt);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| Error::new(Kind::Transient, "no hosts available")))
    }
}
