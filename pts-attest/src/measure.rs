//! File-measurement subsystem (spec §4.2, component B).

use crate::adapters::{DirEnumerator, HashAlgorithm, Hasher};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::Path;

/// Fixed streaming buffer size used while hashing file contents.
const STREAM_BUFFER_LEN: usize = 4096;

/// Result of [`is_path_valid`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathStatus {
    /// The path exists and is reachable.
    Ok,
    /// The path does not exist.
    NotFound,
    /// The path string itself cannot be evaluated (e.g. contains a NUL byte).
    InvalidPath,
}

/// Check whether `path` is usable as a measurement target.
///
/// Any OS failure other than "not found" is surfaced to the caller as
/// [`Error::PathSystemError`]; per spec §4.2 that is non-fatal for the
/// caller, who may choose to skip the entry.
pub fn is_path_valid(path: &Path) -> Result<PathStatus> {
    if path.as_os_str().is_empty() {
        return Ok(PathStatus::InvalidPath);
    }
    match std::fs::symlink_metadata(path) {
        Ok(_) => Ok(PathStatus::Ok),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(PathStatus::NotFound),
        Err(e) => Err(Error::PathSystemError {
            path: path.display().to_string(),
            source: e,
        }),
    }
}

/// One `(logical_name, digest)` pair produced by [`measure`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Measurement {
    /// Stable logical name: the enumerator's relative name for directory
    /// members, or `basename(path)` for a single file.
    pub logical_name: String,
    /// Digest bytes under `meas_algo`.
    pub digest: Vec<u8>,
}

/// The measurements collected for one `measure()` call, keyed by the
/// caller-supplied request id (spec §4.2).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileMeasurements {
    /// Caller-supplied correlation id for this measurement request.
    pub request_id: String,
    /// Ordered `(logical_name, digest)` pairs.
    pub measurements: Vec<Measurement>,
}

/// File type classification recorded in [`FileMetadata`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileType {
    /// Regular file.
    Regular,
    /// Directory.
    Directory,
    /// Character special device.
    CharSpec,
    /// Block special device.
    BlockSpec,
    /// Named pipe (FIFO).
    Fifo,
    /// Symbolic link.
    SymLink,
    /// Unix domain socket.
    Socket,
    /// None of the above.
    Other,
}

#[cfg(unix)]
fn file_type_of(meta: &std::fs::Metadata) -> FileType {
    use std::os::unix::fs::FileTypeExt;
    let ft = meta.file_type();
    if ft.is_file() {
        FileType::Regular
    } else if ft.is_dir() {
        FileType::Directory
    } else if ft.is_symlink() {
        FileType::SymLink
    } else if ft.is_char_device() {
        FileType::CharSpec
    } else if ft.is_block_device() {
        FileType::BlockSpec
    } else if ft.is_fifo() {
        FileType::Fifo
    } else if ft.is_socket() {
        FileType::Socket
    } else {
        FileType::Other
    }
}

#[cfg(not(unix))]
fn file_type_of(meta: &std::fs::Metadata) -> FileType {
    let ft = meta.file_type();
    if ft.is_file() {
        FileType::Regular
    } else if ft.is_dir() {
        FileType::Directory
    } else if ft.is_symlink() {
        FileType::SymLink
    } else {
        FileType::Other
    }
}

/// Per-entry metadata produced by [`metadata`] (spec §4.2).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileMetadata {
    /// Logical filename, same rule as [`Measurement::logical_name`].
    pub logical_name: String,
    /// File type classification.
    pub file_type: FileType,
    /// Size in bytes.
    pub size: u64,
    /// Creation time, Unix epoch seconds (best-effort; 0 if unavailable).
    pub created: u64,
    /// Last-modified time, Unix epoch seconds.
    pub modified: u64,
    /// Last-accessed time, Unix epoch seconds.
    pub accessed: u64,
    /// Owning user id (0 on platforms without a uid concept).
    pub uid: u32,
    /// Owning group id (0 on platforms without a gid concept).
    pub gid: u32,
}

fn system_time_to_unix(t: std::io::Result<std::time::SystemTime>) -> u64 {
    t.ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(unix)]
fn owner_of(meta: &std::fs::Metadata) -> (u32, u32) {
    use std::os::unix::fs::MetadataExt;
    (meta.uid(), meta.gid())
}

#[cfg(not(unix))]
fn owner_of(_meta: &std::fs::Metadata) -> (u32, u32) {
    (0, 0)
}

fn basename(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn hash_file(path: &Path, algo: HashAlgorithm) -> Result<Vec<u8>> {
    let mut file = std::fs::File::open(path).map_err(|e| Error::FileReadError {
        path: path.display().to_string(),
        source: e,
    })?;
    let mut hasher = algo.hasher();
    let mut buf = [0u8; STREAM_BUFFER_LEN];
    loop {
        let n = file.read(&mut buf).map_err(|e| Error::FileReadError {
            path: path.display().to_string(),
            source: e,
        })?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize())
}

/// Hash `path` (a single file or, when `is_directory`, a directory's
/// immediate regular-file children) and return the keyed measurement set.
///
/// Hashing is atomic: any I/O error aborts the whole call with no partial
/// `FileMeasurements` returned, per spec §4.2.
pub fn measure(
    enumerator: &dyn DirEnumerator,
    algo: HashAlgorithm,
    request_id: &str,
    path: &Path,
    is_directory: bool,
) -> Result<FileMeasurements> {
    let mut measurements = Vec::new();
    if is_directory {
        for entry in enumerator.enumerate(path)? {
            if !entry.metadata.is_file() {
                continue;
            }
            let digest = hash_file(&entry.absolute_path, algo)?;
            measurements.push(Measurement {
                logical_name: entry.relative_name,
                digest,
            });
        }
    } else {
        let digest = hash_file(path, algo)?;
        measurements.push(Measurement {
            logical_name: basename(path),
            digest,
        });
    }
    Ok(FileMeasurements {
        request_id: request_id.to_string(),
        measurements,
    })
}

/// Collect [`FileMetadata`] for `path`, using the same iteration rule as
/// [`measure`] (spec §4.2).
pub fn metadata(
    enumerator: &dyn DirEnumerator,
    path: &Path,
    is_directory: bool,
) -> Result<Vec<FileMetadata>> {
    let mut out = Vec::new();
    if is_directory {
        for entry in enumerator.enumerate(path)? {
            let meta = &entry.metadata;
            let (uid, gid) = owner_of(meta);
            out.push(FileMetadata {
                logical_name: entry.relative_name,
                file_type: file_type_of(meta),
                size: meta.len(),
                created: system_time_to_unix(meta.created()),
                modified: system_time_to_unix(meta.modified()),
                accessed: system_time_to_unix(meta.accessed()),
                uid,
                gid,
            });
        }
    } else {
        let meta = std::fs::symlink_metadata(path).map_err(|e| Error::PathSystemError {
            path: path.display().to_string(),
            source: e,
        })?;
        let (uid, gid) = owner_of(&meta);
        out.push(FileMetadata {
            logical_name: basename(path),
            file_type: file_type_of(&meta),
            size: meta.len(),
            created: system_time_to_unix(meta.created()),
            modified: system_time_to_unix(meta.modified()),
            accessed: system_time_to_unix(meta.accessed()),
            uid,
            gid,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::WalkdirEnumerator;
    use std::io::Write;

    #[test]
    fn path_validity_matches_scenario_s5() {
        assert_eq!(
            is_path_valid(Path::new("/nonexistent/x")).unwrap(),
            PathStatus::NotFound
        );
        assert_eq!(is_path_valid(Path::new("/")).unwrap(), PathStatus::Ok);
    }

    #[test]
    fn single_file_measurement_uses_basename() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("payload.bin");
        std::fs::write(&file_path, b"hello world").unwrap();

        let result = measure(
            &WalkdirEnumerator,
            HashAlgorithm::Sha256,
            "req-1",
            &file_path,
            false,
        )
        .unwrap();

        assert_eq!(result.request_id, "req-1");
        assert_eq!(result.measurements.len(), 1);
        assert_eq!(result.measurements[0].logical_name, "payload.bin");
        assert_eq!(result.measurements[0].digest.len(), 32);
    }

    #[test]
    fn directory_measurement_is_deterministic_and_skips_dotfiles() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"aaa").unwrap();
        std::fs::write(dir.path().join("b.txt"), b"bbb").unwrap();
        std::fs::write(dir.path().join(".hidden"), b"ccc").unwrap();
        std::fs::create_dir(dir.path().join("subdir")).unwrap();

        let first = measure(
            &WalkdirEnumerator,
            HashAlgorithm::Sha256,
            "req-dir",
            dir.path(),
            true,
        )
        .unwrap();
        let second = measure(
            &WalkdirEnumerator,
            HashAlgorithm::Sha256,
            "req-dir",
            dir.path(),
            true,
        )
        .unwrap();

        let mut first_sorted = first.measurements.clone();
        first_sorted.sort_by(|a, b| a.logical_name.cmp(&b.logical_name));
        let mut second_sorted = second.measurements.clone();
        second_sorted.sort_by(|a, b| a.logical_name.cmp(&b.logical_name));
        assert_eq!(first_sorted, second_sorted);

        let names: Vec<_> = first_sorted.iter().map(|m| m.logical_name.as_str()).collect();
        assert!(names.contains(&"a.txt"));
        assert!(names.contains(&"b.txt"));
        assert!(!names.contains(&".hidden"));
        assert!(!names.contains(&"subdir"));
    }

    #[test]
    fn metadata_reports_regular_file() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("m.txt");
        let mut f = std::fs::File::create(&file_path).unwrap();
        f.write_all(b"0123456789").unwrap();
        drop(f);

        let md = metadata(&WalkdirEnumerator, &file_path, false).unwrap();
        assert_eq!(md.len(), 1);
        assert_eq!(md[0].file_type, FileType::Regular);
        assert_eq!(md[0].size, 10);
        assert_eq!(md[0].logical_name, "m.txt");
    }
}
