//! Job-configuration documents: `serde_json` structs with one
//! `#[serde(default)]` field per optional key, loaded before a job is
//! constructed.

use serde::{Deserialize, Serialize};

fn default_put_threshold() -> u64 {
    4 * 1024 * 1024
}

fn default_chunk_size() -> u64 {
    objsh_transfer::upload::DEFAULT_CHUNK_SIZE
}

fn default_worker_count() -> usize {
    5
}

fn default_true() -> bool {
    true
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Storage class a destination object is assigned.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    /// Standard storage.
    #[default]
    Standard,
    /// Infrequent-access storage.
    Ia,
    /// Archive storage.
    Archive,
}

/// The persisted document consumed by a batch-upload job, mirroring every
/// recognised key.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadJobConfig {
    /// Root of the local scan; required unless `file_list` is set.
    pub src_dir: Option<String>,
    /// Precomputed work list, skipping the directory scan.
    pub file_list: Option<String>,
    /// Destination bucket.
    pub bucket: String,
    /// Prepended to each destination key.
    pub key_prefix: String,
    /// When true, the destination key is the file's basename only.
    pub ignore_dir: bool,
    /// Allow replacing an existing destination key.
    pub overwrite: bool,
    /// Check for an existing destination before uploading.
    pub check_exists: bool,
    /// Verify the server-reported hash against the local content hash.
    pub check_hash: bool,
    /// Verify the server-reported size against the local size.
    pub check_size: bool,
    /// Comma-separated local path prefixes to exclude.
    pub skip_file_prefixes: String,
    /// Comma-separated destination path prefixes to exclude.
    pub skip_path_prefixes: String,
    /// Comma-separated fixed substrings to exclude.
    pub skip_fixed_strings: String,
    /// Comma-separated suffixes to exclude.
    pub skip_suffixes: String,
    /// Override upload host.
    pub up_host: Option<String>,
    /// Source-address binding for the upload host.
    pub bind_up_ip: Option<String>,
    /// Source-address binding for the rs (metadata) host.
    pub bind_rs_ip: Option<String>,
    /// Source-address binding for a specific network interface.
    pub nic_ip: Option<String>,
    /// Force a re-scan even if a cache file exists.
    pub rescan_local: bool,
    /// Log file path (external to this crate's logging wiring).
    pub log_file: Option<String>,
    /// Log level.
    pub log_level: Option<String>,
    /// Log rotation policy (external collaborator).
    pub log_rotate: Option<String>,
    /// Destination storage class.
    pub file_type: FileType,
    /// Form vs. resume cutoff, in bytes.
    #[serde(default = "default_put_threshold")]
    pub put_threshold: u64,
    /// Use the v2 (initPart/uploadPart/completeMultipartUpload) API.
    pub resumable_api_v2: bool,
    /// Chunk size for the resumable path.
    #[serde(default = "default_chunk_size")]
    pub resumable_api_v2_part_size: u64,
    /// Provider callback URL.
    pub callback_url: Option<String>,
    /// Provider callback host.
    pub callback_host: Option<String>,
    /// Disable parallel local file reads.
    pub sequential_read_file: bool,
    /// Unlink the local file after a successful upload.
    pub delete_on_success: bool,
    /// Job-level concurrent worker count.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Per-file chunk/part concurrent worker count.
    #[serde(default = "default_worker_count")]
    pub resume_worker_count: usize,
}

impl Default for UploadJobConfig {
    fn default() -> Self {
        Self {
            src_dir: None,
            file_list: None,
            bucket: String::new(),
            key_prefix: String::new(),
            ignore_dir: false,
            overwrite: false,
            check_exists: false,
            check_hash: false,
            check_size: false,
            skip_file_prefixes: String::new(),
            skip_path_prefixes: String::new(),
            skip_fixed_strings: String::new(),
            skip_suffixes: String::new(),
            up_host: None,
            bind_up_ip: None,
            bind_rs_ip: None,
            nic_ip: None,
            rescan_local: false,
            log_file: None,
            log_level: None,
            log_rotate: None,
            file_type: FileType::default(),
            put_threshold: default_put_threshold(),
            resumable_api_v2: true,
            resumable_api_v2_part_size: default_chunk_size(),
            callback_url: None,
            callback_host: None,
            sequential_read_file: false,
            delete_on_success: false,
            worker_count: default_worker_count(),
            resume_worker_count: default_worker_count(),
        }
    }
}

impl UploadJobConfig {
    /// Loads a config document from a JSON file.
    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self, objsh_core::error::Error> {
        let file = std::fs::File::open(path).map_err(|e| {
            objsh_core::error::Error::new(objsh_core::error::Kind::InvalidArg, "failed to open upload job config")
                .with_cause(e)
        })?;
        serde_json::from_reader(file).map_err(|e| {
            objsh_core::error::Error::new(objsh_core::error::Kind::InvalidArg, "failed to parse upload job config")
                .with_cause(e)
        })
    }

    /// Returns whether `local_path` (already key-mapped to `key`) should be
    /// excluded per the skip filters.
    #[must_use]
    pub fn is_skipped(&self, local_path: &str, key: &str) -> bool {
        split_csv(&self.skip_file_prefixes).iter().any(|p| local_path.starts_with(p.as_str()))
            || split_csv(&self.skip_path_prefixes).iter().any(|p| key.starts_with(p.as_str()))
            || split_csv(&self.skip_fixed_strings).iter().any(|s| local_path.contains(s.as_str()))
            || split_csv(&self.skip_suffixes).iter().any(|s| local_path.ends_with(s.as_str()))
    }

    /// Maps a scanned relative path to its destination key, honouring
    /// `key_prefix` and `ignore_dir`.
    #[must_use]
    pub fn destination_key(&self, rel_path: &str) -> String {
        let base = if self.ignore_dir {
            rel_path.rsplit('/').next().unwrap_or(rel_path)
        } else {
            rel_path
        };
        format!("{}{base}", self.key_prefix)
    }
}

/// The persisted document consumed by a batch-download job.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadJobConfig {
    /// Source bucket.
    pub bucket: String,
    /// Precomputed work list.
    pub file_list: Option<String>,
    /// Destination directory.
    pub dest_dir: String,
    /// Verify the server-reported hash against the downloaded content hash.
    pub check_hash: bool,
    /// Verify the server-reported size against the downloaded size.
    pub check_size: bool,
    /// Delete the `.tmp`/bitmap sidecar on unrecoverable failure.
    #[serde(default = "default_true")]
    pub remove_temp_while_error: bool,
    /// Enable sliced concurrent download.
    pub enable_slice: bool,
    /// Slice size in bytes.
    pub slice_size: u64,
    /// Maximum concurrent slices per file.
    pub slice_concurrent_count: usize,
    /// Size threshold at or above which slicing is used.
    pub slice_file_size_threshold: u64,
    /// CDN hosts to try, in order.
    pub cdn_hosts: Vec<String>,
    /// Job-level concurrent worker count.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
}

impl Default for DownloadJobConfig {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            file_list: None,
            dest_dir: String::new(),
            check_hash: false,
            check_size: false,
            remove_temp_while_error: true,
            enable_slice: false,
            slice_size: 4 * 1024 * 1024,
            slice_concurrent_count: 4,
            slice_file_size_threshold: 16 * 1024 * 1024,
            cdn_hosts: Vec::new(),
            worker_count: default_worker_count(),
        }
    }
}

impl DownloadJobConfig {
    /// Loads a config document from a JSON file.
    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self, objsh_core::error::Error> {
        let file = std::fs::File::open(path).map_err(|e| {
            objsh_core::error::Error::new(objsh_core::error::Kind::InvalidArg, "failed to open download job config")
                .with_cause(e)
        })?;
        serde_json::from_reader(file).map_err(|e| {
            objsh_core::error::Error::new(objsh_core::error::Kind::InvalidArg, "failed to parse download job config")
                .with_cause(e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let cfg: UploadJobConfig = serde_json::from_str(r#"{"bucket":"photos"}"#).unwrap();
        assert_eq!(cfg.bucket, "photos");
        assert_eq!(cfg.put_threshold, default_put_threshold());
        assert!(cfg.resumable_api_v2);
    }

    #[test]
    fn ignore_dir_strips_to_basename() {
        let mut cfg = UploadJobConfig::default();
        cfg.ignore_dir = true;
        cfg.key_prefix = "imports/".into();
        assert_eq!(cfg.destination_key("a/b/c.txt"), "imports/c.txt");
    }

    #[test]
    fn skip_suffix_filter_matches() {
        let mut cfg = UploadJobConfig::default();
        cfg.skip_suffixes = ".tmp, .bak".into();
        assert!(cfg.is_skipped("a/file.tmp", "file.tmp"));
        assert!(!cfg.is_skipped("a/file.txt", "file.txt"));
    }

    #[test]
    fn download_config_defaults_keep_temp_removal_on() {
        let cfg: DownloadJobConfig = serde_json::from_str(r#"{"bucket":"photos","dest_dir":"/tmp/out"}"#).unwrap();
        assert!(cfg.remove_temp_while_error);
    }
}
