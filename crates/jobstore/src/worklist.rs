//! Work-list line parsing: tab-separated (or a caller-chosen separator)
//! records read from stdin or a `FileList` file.

use objsh_core::error::{Error, Kind};

/// Default field separator for work-list lines.
pub const DEFAULT_SEPARATOR: char = '\t';

/// One parsed line from an upload work list: `relPath\tsize\tmtimeNs`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadListEntry {
    /// Path relative to the scanned source directory.
    pub rel_path: String,
    /// Snapshot file size in bytes.
    pub size: u64,
    /// Snapshot mtime in nanoseconds since epoch.
    pub mtime_ns: i64,
}

/// One parsed line from a download work list: either `key` alone, or
/// `bucket\tkey\tsavePath`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownloadListEntry {
    /// Source bucket, if the line supplied one.
    pub bucket: Option<String>,
    /// Source key.
    pub key: String,
    /// Local destination path, if the line supplied one.
    pub save_path: Option<String>,
}

/// Parses one upload work-list line.
pub fn parse_upload_entry(line: &str, sep: char) -> Result<UploadListEntry, Error> {
    let fields: Vec<&str> = line.split(sep).collect();
    let [rel_path, size, mtime_ns] = fields[..] else {
        return Err(Error::new(
            Kind::InvalidArg,
            format!("expected relPath{sep}size{sep}mtimeNs, got {line:?}"),
        ));
    };
    let size: u64 = size
        .parse()
        .map_err(|_| Error::new(Kind::InvalidArg, format!("invalid size field in {line:?}")))?;
    let mtime_ns: i64 = mtime_ns
        .parse()
        .map_err(|_| Error::new(Kind::InvalidArg, format!("invalid mtimeNs field in {line:?}")))?;
    Ok(UploadListEntry {
        rel_path: rel_path.to_owned(),
        size,
        mtime_ns,
    })
}

/// Parses one download work-list line, accepting either a bare key or a
/// full `bucket\tkey\tsavePath` record.
pub fn parse_download_entry(line: &str, sep: char) -> Result<DownloadListEntry, Error> {
    let fields: Vec<&str> = line.split(sep).collect();
    match fields[..] {
        [key] if !key.is_empty() => Ok(DownloadListEntry {
            bucket: None,
            key: key.to_owned(),
            save_path: None,
        }),
        [bucket, key, save_path] => Ok(DownloadListEntry {
            bucket: Some(bucket.to_owned()),
            key: key.to_owned(),
            save_path: Some(save_path.to_owned()),
        }),
        _ => Err(Error::new(
            Kind::InvalidArg,
            format!("expected key or bucket{sep}key{sep}savePath, got {line:?}"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_entry_round_trips_the_three_fields() {
        let entry = parse_upload_entry("a/b.txt\t1024\t1700000000000000000", DEFAULT_SEPARATOR).unwrap();
        assert_eq!(entry.rel_path, "a/b.txt");
        assert_eq!(entry.size, 1024);
        assert_eq!(entry.mtime_ns, 1_700_000_000_000_000_000);
    }

    #[test]
    fn upload_entry_rejects_wrong_field_count() {
        assert!(parse_upload_entry("a/b.txt\t1024", DEFAULT_SEPARATOR).is_err());
    }

    #[test]
    fn download_entry_accepts_a_bare_key() {
        let entry = parse_download_entry("img/a.png", DEFAULT_SEPARATOR).unwrap();
        assert_eq!(entry.key, "img/a.png");
        assert!(entry.bucket.is_none());
    }

    #[test]
    fn download_entry_accepts_the_full_record() {
        let entry = parse_download_entry("b\tk\t/tmp/out", DEFAULT_SEPARATOR).unwrap();
        assert_eq!(entry.bucket.as_deref(), Some("b"));
        assert_eq!(entry.save_path.as_deref(), Some("/tmp/out"));
    }

    #[test]
    fn custom_separator_is_honoured() {
        let entry = parse_upload_entry("a.txt,5,9", ',').unwrap();
        assert_eq!(entry.size, 5);
    }
}
