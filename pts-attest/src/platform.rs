//! Platform string derivation (spec §6 "Platform info").
//!
//! Tries a fixed priority list of distribution-release files, LSB first,
//! then Debian, then a list of distribution-specific files; the first
//! match supplies a description line, to which `uname.machine` is
//! appended, space-separated.

use crate::error::{Error, Result};
use std::path::Path;

/// Priority-ordered candidate release files, LSB first per spec §6.
const RELEASE_FILES: &[&str] = &[
    "/etc/lsb-release",
    "/etc/debian_version",
    "/etc/redhat-release",
    "/etc/SuSE-release",
    "/etc/fedora-release",
    "/etc/gentoo-release",
    "/etc/slackware-version",
    "/etc/os-release",
];

fn first_line(path: &Path) -> Option<String> {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|contents| contents.lines().next().map(|l| l.trim().to_string()))
        .filter(|l| !l.is_empty())
}

fn machine() -> Result<String> {
    uname::uname()
        .map(|info| info.machine)
        .map_err(|_| Error::PlatformInfoUnavailable)
}

/// Derive the human-readable `platform_info` string: the first matching
/// release file's first line, space-joined with the machine architecture.
///
/// Per spec §6, absent distribution data fails with
/// [`Error::PlatformInfoUnavailable`] — non-fatal for the session, which
/// continues with an empty `platform_info` (spec §7). The same error covers
/// a failed `uname(2)` call, which is equally fatal to platform detection.
///
/// The original's fixed-size `buf+pos` append with a length computed as
/// `sizeof(buf)-1 + (pos-buf)` is a latent overflow (Design Note §9,
/// "platform_info bound"); this implementation uses an owned growable
/// `String` instead, so there is no analogous bound to violate.
pub fn detect() -> Result<String> {
    detect_from_roots(RELEASE_FILES)
}

fn detect_from_roots(candidates: &[&str]) -> Result<String> {
    let machine = machine()?;
    for candidate in candidates {
        if let Some(line) = first_line(Path::new(candidate)) {
            return Ok(format!("{line} {machine}"));
        }
    }
    Err(Error::PlatformInfoUnavailable)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_candidate_files_yields_unavailable() {
        let err = detect_from_roots(&["/nonexistent/release-a", "/nonexistent/release-b"])
            .unwrap_err();
        assert!(matches!(err, Error::PlatformInfoUnavailable));
    }

    #[test]
    fn matching_file_appends_machine() {
        let dir = tempfile::tempdir().unwrap();
        let release = dir.path().join("custom-release");
        std::fs::write(&release, "Test Distro 1.0\nsecond line\n").unwrap();
        let path_str = release.to_string_lossy().into_owned();

        let result = detect_from_roots(&[path_str.as_str()]).unwrap();
        assert!(result.starts_with("Test Distro 1.0 "));
        let suffix = result.strip_prefix("Test Distro 1.0 ").unwrap();
        assert!(!suffix.is_empty());
    }
}
