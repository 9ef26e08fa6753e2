#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `objsh_token` mints upload credentials bound to `(bucket, optional key,
//! policy)` and signs time-bounded private download URLs.
//!
//! # Design
//!
//! [`TokenProvider`] is the capability every higher layer depends on; a
//! concrete [`AccessKeyProvider`] implements it over an access-key/
//! secret-key pair the way the source CLI's account store does. The trait
//! is small and safe for concurrent invocation because [`AccessKeyProvider`]
//! holds no mutable state.
//!
//! # Invariants
//!
//! - `parse_deadline(sign_private_url(...))` equals the deadline passed in;
//!   resigning the same URL with the same deadline and key yields
//!   byte-identical tokens (HMAC-SHA1 is deterministic).
//! - The default deadline is `now + 3600s`.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

/// Default private-URL signature lifetime.
pub const DEFAULT_DEADLINE_SECS: u64 = 3600;

/// A policy scoping an upload token to a bucket and, optionally, a single
/// destination key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadPolicy {
    /// Destination bucket.
    pub bucket: String,
    /// Destination key, if the token should be scoped to one object.
    pub key: Option<String>,
    /// Token lifetime in seconds.
    pub expires_in_secs: u64,
}

impl UploadPolicy {
    /// Builds a bucket-scoped policy with the default lifetime.
    #[must_use]
    pub fn for_bucket(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: None,
            expires_in_secs: DEFAULT_DEADLINE_SECS,
        }
    }

    /// Scopes the policy to a single destination key.
    #[must_use]
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }
}

/// Capability that mints upload tokens and signs private URLs. Safe for
/// concurrent invocation; any caching is internal to the implementation.
pub trait TokenProvider: Send + Sync {
    /// Mints an upload token for the given policy.
    fn upload_token(&self, policy: &UploadPolicy) -> String;

    /// Signs `raw_url` for private-bucket download, valid until `deadline`
    /// (Unix seconds).
    fn sign_private_url(&self, raw_url: &str, deadline: u64) -> String;
}

/// An access-key/secret-key token provider, the common case for the
/// source CLI's account store.
#[derive(Clone, Debug)]
pub struct AccessKeyProvider {
    access_key: String,
    secret_key: String,
}

impl AccessKeyProvider {
    /// Builds a provider from an access-key/secret-key pair.
    #[must_use]
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
        }
    }

    fn hmac_sha1_b64url(&self, message: &str) -> String {
        let mut mac = HmacSha1::new_from_slice(self.secret_key.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(message.as_bytes());
        URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
    }
}

impl TokenProvider for AccessKeyProvider {
    fn upload_token(&self, policy: &UploadPolicy) -> String {
        let scope = match &policy.key {
            Some(key) => format!("{}:{key}", policy.bucket),
            None => policy.bucket.clone(),
        };
        let deadline = now_unix() + policy.expires_in_secs;
        let encoded_policy = URL_SAFE_NO_PAD.encode(format!("{scope}:{deadline}"));
        let sign = self.hmac_sha1_b64url(&encoded_policy);
        format!("{}:{sign}:{encoded_policy}", self.access_key)
    }

    fn sign_private_url(&self, raw_url: &str, deadline: u64) -> String {
        let sep = if raw_url.contains('?') { '&' } else { '?' };
        let prefix = format!("{raw_url}{sep}e={deadline}");
        let sign = self.hmac_sha1_b64url(&prefix);
        format!("{prefix}&token={}:{sign}", self.access_key)
    }
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}

/// Parses the `e=` deadline out of a signed URL's query string, used by
/// tests and by the download layer to check freshness before reuse.
#[must_use]
pub fn parse_deadline(signed_url: &str) -> Option<u64> {
    let query = signed_url.split_once('?')?.1;
    query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key == "e").then(|| value.parse().ok()).flatten()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn private_url_embeds_the_given_deadline() {
        let provider = AccessKeyProvider::new("ak", "sk");
        let signed = provider.sign_private_url("https://cdn.example.com/img.png", 1_700_000_000);
        assert_eq!(parse_deadline(&signed), Some(1_700_000_000));
    }

    #[test]
    fn resigning_same_url_and_deadline_is_deterministic() {
        let provider = AccessKeyProvider::new("ak", "sk");
        let a = provider.sign_private_url("https://cdn.example.com/img.png", 42);
        let b = provider.sign_private_url("https://cdn.example.com/img.png", 42);
        assert_eq!(a, b);
    }

    #[test]
    fn different_keys_produce_different_signatures() {
        let a = AccessKeyProvider::new("ak", "sk1").sign_private_url("https://cdn/x", 42);
        let b = AccessKeyProvider::new("ak", "sk2").sign_private_url("https://cdn/x", 42);
        assert_ne!(a, b);
    }

    #[test]
    fn separator_is_ampersand_when_query_already_present() {
        let provider = AccessKeyProvider::new("ak", "sk");
        let signed = provider.sign_private_url("https://cdn/x?v=2", 42);
        assert!(signed.contains("v=2&e=42"));
    }

    #[test]
    fn separator_is_question_mark_when_no_query_present() {
        let provider = AccessKeyProvider::new("ak", "sk");
        let signed = provider.sign_private_url("https://cdn/x", 42);
        assert!(signed.contains("x?e=42"));
    }

    #[test]
    fn upload_token_is_scoped_to_bucket_and_key() {
        let provider = AccessKeyProvider::new("ak", "sk");
        let policy = UploadPolicy::for_bucket("photos").with_key("a.jpg");
        let token = provider.upload_token(&policy);
        assert!(token.starts_with("ak:"));
    }
}
