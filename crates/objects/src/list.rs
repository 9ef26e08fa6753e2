//! Marker-paginated bucket listing, supplemented from the source CLI's
//! own listing command: a plain GET with a `marker` cursor, transparently
//! chained by [`list_all`] until the provider stops returning one.

use objsh_core::error::{Error, Kind};
use objsh_transport::{HostProvider, Method, RetryPolicy, Transport, TransportRequest};
use serde::Deserialize;

/// One entry in a listing page.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct ListEntry {
    /// Object key.
    pub key: String,
    /// Size in bytes.
    pub size: u64,
    /// Content hash, if the provider includes one in listings.
    #[serde(default)]
    pub hash: Option<String>,
    /// Last-modified time, provider-defined units.
    #[serde(default)]
    pub mtime: Option<u64>,
}

/// Parameters for one listing request.
#[derive(Clone, Debug)]
pub struct ListRequest {
    /// Bucket to list.
    pub bucket: String,
    /// Key prefix filter.
    pub prefix: String,
    /// Pagination cursor from a prior page, if any.
    pub marker: Option<String>,
    /// Maximum entries per page.
    pub limit: u32,
    /// Optional delimiter for common-prefix grouping.
    pub delimiter: Option<String>,
    /// Comma-separated key-suffix filter (e.g. `.png,.jpg`), applied
    /// client-side since the provider's listing endpoint has no suffix
    /// parameter. `None`/empty keeps every key.
    pub suffix: Option<String>,
}

fn matches_suffix(key: &str, suffix: &str) -> bool {
    suffix
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .any(|s| key.ends_with(s))
}

#[derive(Deserialize)]
struct ListResponsePage {
    items: Vec<ListEntry>,
    #[serde(default)]
    marker: Option<String>,
}

/// One page of listing results.
#[derive(Clone, Debug)]
pub struct ListPage {
    /// Entries returned by this page.
    pub entries: Vec<ListEntry>,
    /// Cursor for the next page, `None` when the listing is exhausted.
    pub marker: Option<String>,
}

/// Issues one listing request.
pub fn list_page(
    transport: &dyn Transport,
    hosts: &dyn HostProvider,
    retry: RetryPolicy,
    request: &ListRequest,
) -> Result<ListPage, Error> {
    let mut path = format!(
        "/list?bucket={}&prefix={}&limit={}",
        request.bucket, request.prefix, request.limit
    );
    if let Some(marker) = &request.marker {
        path.push_str(&format!("&marker={marker}"));
    }
    if let Some(delimiter) = &request.delimiter {
        path.push_str(&format!("&delimiter={delimiter}"));
    }
    let transport_request = TransportRequest {
        method: Method::Get,
        path,
        headers: Vec::new(),
        body: Vec::new(),
        range: None,
        total_timeout: None,
    };
    let response = transport.call(hosts, &transport_request, retry)?;
    let page: ListResponsePage = serde_json::from_slice(&response.body)
        .map_err(|e| Error::new(Kind::Transient, "malformed listing response").with_cause(e))?;
    let entries = match &request.suffix {
        Some(suffix) if !suffix.is_empty() => page
            .items
            .into_iter()
            .filter(|entry| matches_suffix(&entry.key, suffix))
            .collect(),
        _ => page.items,
    };
    Ok(ListPage {
        entries,
        marker: page.marker,
    })
}

/// Chains [`list_page`] calls until the provider stops returning a
/// `marker`, collecting every entry. Transparent to callers — a caller
/// sees one flat `Vec<ListEntry>` regardless of how many pages the
/// provider needed.
pub fn list_all(
    transport: &dyn Transport,
    hosts: &dyn HostProvider,
    retry: RetryPolicy,
    mut request: ListRequest,
) -> Result<Vec<ListEntry>, Error> {
    let mut all = Vec::new();
    loop {
        let page = list_page(transport, hosts, retry, &request)?;
        all.extend(page.entries);
        match page.marker {
            Some(marker) => request.marker = Some(marker),
            None => break,
        }
    }
    Ok(all)
}

const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// Formats a byte count as a human-readable size, e.g. `1.27MB`.
#[must_use]
pub fn human_size(bytes: u64) -> String {
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes}{}", UNITS[0])
    } else {
        format!("{value:.2}{}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use objsh_transport::{StaticHostProvider, TransportResponse};
    use std::sync::Mutex;

    struct FakeTransport {
        pages: Mutex<Vec<String>>,
    }

    impl Transport for FakeTransport {
        fn call(
            &self,
            _hosts: &dyn HostProvider,
            _request: &TransportRequest,
            _retry: RetryPolicy,
        ) -> Result<TransportResponse, Error> {
            let body = self.pages.lock().unwrap().remove(0);
            Ok(TransportResponse {
                status: 200,
                headers: Vec::new(),
                body: body.into_bytes(),
            })
        }
    }

    #[test]
    fn list_all_chains_pages_until_marker_is_absent() {
        let transport = FakeTransport {
            pages: Mutex::new(vec![
                serde_json::json!({"items": [{"key": "img/a.png", "size": 10}], "marker": "m1"})
                    .to_string(),
                serde_json::json!({"items": [{"key": "img/b.png", "size": 20}]}).to_string(),
            ]),
        };
        let hosts = StaticHostProvider(vec!["rs.example.com".into()]);
        let request = ListRequest {
            bucket: "b".into(),
            prefix: "img/".into(),
            marker: None,
            limit: 1000,
            delimiter: None,
            suffix: None,
        };
        let entries = list_all(&transport, &hosts, RetryPolicy::default(), request).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].key, "img/a.png");
        assert_eq!(entries[1].key, "img/b.png");
    }

    #[test]
    fn suffix_filter_drops_non_matching_keys_client_side() {
        let transport = FakeTransport {
            pages: Mutex::new(vec![serde_json::json!({
                "items": [
                    {"key": "img/a.png", "size": 10},
                    {"key": "img/a.txt", "size": 5},
                    {"key": "img/b.jpg", "size": 20},
                ]
            })
            .to_string()]),
        };
        let hosts = StaticHostProvider(vec!["rs.example.com".into()]);
        let request = ListRequest {
            bucket: "b".into(),
            prefix: "img/".into(),
            marker: None,
            limit: 1000,
            delimiter: None,
            suffix: Some(".png,.jpg".into()),
        };
        let entries = list_all(&transport, &hosts, RetryPolicy::default(), request).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].key, "img/a.png");
        assert_eq!(entries[1].key, "img/b.jpg");
    }

    #[test]
    fn human_size_formats_megabytes() {
        assert_eq!(human_size(1_331_691), "1.27MB");
    }

    #[test]
    fn human_size_formats_bytes_without_decimals() {
        assert_eq!(human_size(512), "512B");
    }
}
