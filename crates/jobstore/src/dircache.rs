//! Deterministic local-directory scan feeding upload work-providers.
//! Produces one line per regular file: `relPath\tsize\tmtimeNs`.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use filetime::FileTime;
use objsh_core::error::{Error, Kind};

#[cfg(unix)]
type InodeKey = (u64, u64);

#[cfg(unix)]
fn inode_key(metadata: &fs::Metadata) -> InodeKey {
    use std::os::unix::fs::MetadataExt;
    (metadata.dev(), metadata.ino())
}

#[cfg(not(unix))]
type InodeKey = PathBuf;

#[cfg(not(unix))]
fn inode_key(path: &Path) -> InodeKey {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

fn mtime_ns(metadata: &fs::Metadata) -> i64 {
    let ft = FileTime::from_last_modification_time(metadata);
    i64::from(ft.nanoseconds()) + ft.seconds() * 1_000_000_000
}

fn walk(
    dir: &Path,
    root: &Path,
    visited_dirs: &mut HashSet<InodeKey>,
    lines: &mut Vec<String>,
) -> Result<(), Error> {
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(|e| Error::new(Kind::Permanent, "failed to read directory").with_cause(e))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .collect();
    entries.sort();

    for path in entries {
        let metadata = fs::metadata(&path);
        let Ok(metadata) = metadata else { continue };

        if metadata.is_dir() {
            #[cfg(unix)]
            let key = inode_key(&metadata);
            #[cfg(not(unix))]
            let key = inode_key(&path);
            if !visited_dirs.insert(key) {
                continue;
            }
            walk(&path, root, visited_dirs, lines)?;
        } else if metadata.is_file() {
            let rel = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .to_string_lossy()
                .replace('\\', "/");
            lines.push(format!("{rel}\t{}\t{}", metadata.len(), mtime_ns(&metadata)));
        }
    }
    Ok(())
}

/// Walks `root` and writes one `relPath\tsize\tmtimeNs` line per regular
/// file to `cache_path`, in deterministic byte order. Symlinked
/// directories are followed unless they would re-enter an already-visited
/// directory (cycle, detected via the directory's device/inode pair).
///
/// When `rescan` is false and `cache_path` already exists, the scan is
/// skipped entirely and the existing file's line count is returned.
pub fn scan(root: impl AsRef<Path>, cache_path: impl AsRef<Path>, rescan: bool) -> Result<u64, Error> {
    let root = root.as_ref();
    let cache_path = cache_path.as_ref();

    if !rescan && cache_path.exists() {
        let file = File::open(cache_path)
            .map_err(|e| Error::new(Kind::Permanent, "failed to open existing directory cache").with_cause(e))?;
        return Ok(BufReader::new(file).lines().count() as u64);
    }

    let mut lines = Vec::new();
    let mut visited_dirs = HashSet::new();
    if let Ok(metadata) = fs::metadata(root) {
        #[cfg(unix)]
        visited_dirs.insert(inode_key(&metadata));
        #[cfg(not(unix))]
        visited_dirs.insert(inode_key(root));
    }
    walk(root, root, &mut visited_dirs, &mut lines)?;

    let tmp_path = cache_path.with_extension("tmp");
    let mut file = File::create(&tmp_path)
        .map_err(|e| Error::new(Kind::Permanent, "failed to create directory cache").with_cause(e))?;
    for line in &lines {
        writeln!(file, "{line}")
            .map_err(|e| Error::new(Kind::Permanent, "failed to write directory cache").with_cause(e))?;
    }
    drop(file);
    fs::rename(&tmp_path, cache_path)
        .map_err(|e| Error::new(Kind::Permanent, "failed to install directory cache").with_cause(e))?;

    Ok(lines.len() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_emits_one_line_per_regular_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/b.txt"), b"world!").unwrap();
        let cache = dir.path().join(".cache");
        let count = scan(dir.path(), &cache, true).unwrap();
        assert_eq!(count, 2);
        let contents = fs::read_to_string(&cache).unwrap();
        assert!(contents.contains("a.txt\t5\t"));
        assert!(contents.contains("sub/b.txt\t6\t"));
    }

    #[test]
    fn two_scans_of_an_unchanged_tree_agree_byte_for_byte() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        fs::write(dir.path().join("z.txt"), b"last").unwrap();
        fs::write(dir.path().join("m.txt"), b"mid").unwrap();
        let cache_a = dir.path().join(".cache_a");
        let cache_b = dir.path().join(".cache_b");
        scan(dir.path(), &cache_a, true).unwrap();
        scan(dir.path(), &cache_b, true).unwrap();
        assert_eq!(fs::read_to_string(&cache_a).unwrap(), fs::read_to_string(&cache_b).unwrap());
    }

    #[test]
    fn rescan_false_with_existing_cache_skips_the_walk() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        let cache = dir.path().join(".cache");
        scan(dir.path(), &cache, true).unwrap();
        fs::write(dir.path().join("b.txt"), b"new file").unwrap();
        let count = scan(dir.path(), &cache, false).unwrap();
        assert_eq!(count, 1, "unchanged cache should not observe the new file");
    }
}
