//! Append-only success/failure/overwrite/skip report streams. Each line
//! is the raw input `Data` the work item carried, so a failure file can
//! be fed back as the next run's `FileList`.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use objsh_core::error::Error;

/// A single lazily-opened, mutex-serialised append stream.
struct Stream {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl Stream {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            file: Mutex::new(None),
        }
    }

    fn write_line(&self, line: &str) -> std::io::Result<()> {
        let mut guard = self.file.lock().unwrap();
        if guard.is_none() {
            *guard = Some(
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&self.path)?,
            );
        }
        let file = guard.as_mut().expect("just opened");
        writeln!(file, "{line}")
    }
}

/// The four report streams a job writes to, one line per terminal event.
pub struct FileExporter {
    success: Stream,
    failure: Stream,
    overwrite: Stream,
    skip: Stream,
}

impl FileExporter {
    /// Builds an exporter writing `success.txt` / `fail.txt` /
    /// `overwrite.txt` / `skip.txt` under `job_dir`. Files are created on
    /// first write, not at construction time.
    #[must_use]
    pub fn new(job_dir: impl AsRef<Path>) -> Self {
        let job_dir = job_dir.as_ref();
        Self {
            success: Stream::new(job_dir.join("success.txt")),
            failure: Stream::new(job_dir.join("fail.txt")),
            overwrite: Stream::new(job_dir.join("overwrite.txt")),
            skip: Stream::new(job_dir.join("skip.txt")),
        }
    }

    /// Records a successful item.
    pub fn success(&self, data: &str) {
        self.success.write_line(data).ok();
    }

    /// Records a failed item, appending the error's machine-readable
    /// `\t<code>:<descriptor>` suffix so the line can be re-consumed as
    /// the next run's input.
    pub fn failure(&self, data: &str, err: &Error) {
        self.failure
            .write_line(&format!("{data}{}", err.exporter_suffix()))
            .ok();
    }

    /// Records an overwritten destination.
    pub fn overwrite(&self, data: &str) {
        self.overwrite.write_line(data).ok();
    }

    /// Records a skipped item, with a short human cause.
    pub fn skip(&self, data: &str, cause: &str) {
        self.skip.write_line(&format!("{data}\t{cause}")).ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use objsh_core::error::Kind;

    #[test]
    fn streams_are_created_lazily_and_append() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = FileExporter::new(dir.path());
        assert!(!dir.path().join("success.txt").exists());
        exporter.success("a.txt");
        exporter.success("b.txt");
        assert_eq!(
            std::fs::read_to_string(dir.path().join("success.txt")).unwrap(),
            "a.txt\nb.txt\n"
        );
    }

    #[test]
    fn failure_lines_carry_the_code_and_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = FileExporter::new(dir.path());
        let err = Error::new(Kind::NotFound, "missing key").with_code(612);
        exporter.failure("key1700", &err);
        let contents = std::fs::read_to_string(dir.path().join("fail.txt")).unwrap();
        assert_eq!(contents, "key1700\t612:missing key\n");
    }

    #[test]
    fn each_stream_is_independent() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = FileExporter::new(dir.path());
        exporter.skip("c.txt", "AlreadyDone");
        exporter.overwrite("d.txt");
        assert!(!dir.path().join("success.txt").exists());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("skip.txt")).unwrap(),
            "c.txt\tAlreadyDone\n"
        );
        assert_eq!(
            std::fs::read_to_string(dir.path().join("overwrite.txt")).unwrap(),
            "d.txt\n"
        );
    }
}
