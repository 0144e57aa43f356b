//! Safe extraction of zip artifacts into a staging directory.
//!
//! Every entry's target path is asserted to stay under the staging root
//! before anything is created. Symlinks are recreated and then containment-
//! checked through their resolved real path; an escaping link is deleted and
//! reported, never fatal for the install. A container that fails to parse
//! drops the cached file so the next run re-fetches it.

use std::collections::BTreeSet;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use log::debug;
use zip::ZipArchive;

use crate::error::SdkError;
use crate::reporter::Reporter;
use crate::runtime::Runtime;

const S_IFMT: u32 = 0o170000;
const S_IFLNK: u32 = 0o120000;
const S_IXUSR: u32 = 0o100;

/// What came out of an archive.
#[derive(Debug, Default)]
pub struct Extracted {
    /// Top-level entry names, used to collapse a redundant wrapper folder.
    pub toplevels: BTreeSet<String>,
    /// Entries dropped because their symlink escaped the staging root.
    pub dropped: Vec<String>,
}

/// Extract `archive_path` into `staging`.
///
/// Returns a recoverable [`SdkError::BadArchive`] (with the cached file
/// already removed) when the container is invalid; disk failures are fatal.
#[tracing::instrument(skip(runtime, reporter, archive_path, staging))]
pub fn extract_archive<R: Runtime>(
    runtime: &R,
    reporter: &dyn Reporter,
    archive_path: &Path,
    staging: &Path,
    url: &str,
) -> Result<Extracted> {
    let mut reader = runtime
        .open(archive_path)
        .with_context(|| format!("Failed to open archive at {:?}", archive_path))?;

    // zip requires Read + Seek, but Runtime::open returns a plain reader,
    // so buffer the whole file
    let mut buffer = Vec::new();
    reader
        .read_to_end(&mut buffer)
        .with_context(|| format!("Failed to read archive {:?}", archive_path))?;

    let mut archive = match ZipArchive::new(std::io::Cursor::new(buffer)) {
        Ok(archive) => archive,
        Err(err) => return Err(discard_bad_archive(runtime, archive_path, url, err)),
    };

    // tempdir paths may contain symlinks themselves; containment is checked
    // against the resolved staging root
    let staging_root = runtime.canonicalize(staging)?;

    let mut extracted = Extracted::default();
    for i in 0..archive.len() {
        let mut entry = match archive.by_index(i) {
            Ok(entry) => entry,
            Err(err) => return Err(discard_bad_archive(runtime, archive_path, url, err)),
        };
        let Some(relative) = entry.enclosed_name() else {
            reporter.warning(&format!("skipping entry with unsafe path: {}", entry.name()));
            continue;
        };
        if let Some(top) = relative.components().next() {
            extracted
                .toplevels
                .insert(top.as_os_str().to_string_lossy().into_owned());
        }

        let dest = staging.join(&relative);
        let mode = entry.unix_mode().unwrap_or(0);

        if mode & S_IFMT == S_IFLNK {
            let mut target = String::new();
            entry
                .read_to_string(&mut target)
                .with_context(|| format!("Failed to read symlink target for {:?}", relative))?;
            if let Some(parent) = dest.parent() {
                runtime.create_dir_all(parent)?;
            }
            runtime.symlink(Path::new(&target), &dest)?;

            // a dangling target fails canonicalize and is dropped as well
            let contained = runtime
                .canonicalize(&dest)
                .map(|resolved| resolved.starts_with(&staging_root))
                .unwrap_or(false);
            if !contained {
                runtime.remove_file(&dest)?;
                let escape = SdkError::SymlinkEscape {
                    entry: relative.display().to_string(),
                    target,
                };
                reporter.error(&escape.to_string());
                extracted.dropped.push(relative.display().to_string());
            }
        } else if entry.is_dir() {
            runtime.create_dir_all(&dest)?;
            runtime.set_permissions(&dest, 0o755)?;
        } else {
            if let Some(parent) = dest.parent() {
                runtime.create_dir_all(parent)?;
            }
            let mut out = runtime.create_file(&dest)?;
            std::io::copy(&mut entry, &mut out)
                .with_context(|| format!("Failed to extract {:?}", dest))?;
            drop(out);
            let bits = if mode & S_IXUSR != 0 { 0o755 } else { 0o644 };
            runtime.set_permissions(&dest, bits)?;
        }
    }

    debug!(
        "extracted {} top-level entries from {:?}",
        extracted.toplevels.len(),
        archive_path
    );
    Ok(extracted)
}

fn discard_bad_archive<R: Runtime>(
    runtime: &R,
    archive_path: &Path,
    url: &str,
    err: zip::result::ZipError,
) -> anyhow::Error {
    debug!("discarding invalid archive {:?}: {}", archive_path, err);
    if runtime.exists(archive_path) {
        let _ = runtime.remove_file(archive_path);
    }
    SdkError::BadArchive {
        url: url.to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::RealRuntime;
    use crate::test_utils::RecordingReporter;
    use std::fs::{self, File};
    use std::io::Write;
    use tempfile::tempdir;
    use zip::CompressionMethod;
    use zip::ZipWriter;
    use zip::write::FileOptions;

    fn write_test_archive(path: &Path, files: &[(&str, &str)]) -> Result<()> {
        let file = File::create(path)?;
        let mut zip = ZipWriter::new(file);
        let options: FileOptions<()> =
            FileOptions::default().compression_method(CompressionMethod::Deflated);
        for (name, content) in files {
            zip.start_file(*name, options)?;
            zip.write_all(content.as_bytes())?;
        }
        zip.finish()?;
        Ok(())
    }

    #[test_log::test]
    fn test_extract_records_toplevels() -> Result<()> {
        let dir = tempdir()?;
        let archive = dir.path().join("pkg.zip");
        let staging = dir.path().join("staging");
        fs::create_dir(&staging)?;
        write_test_archive(
            &archive,
            &[("pkg/bin/tool", "bin"), ("pkg/lib/libfoo.so", "lib"), ("NOTICE", "n")],
        )?;

        let reporter = RecordingReporter::default();
        let extracted =
            extract_archive(&RealRuntime, &reporter, &archive, &staging, "https://x/pkg.zip")?;

        let toplevels: Vec<&str> = extracted.toplevels.iter().map(String::as_str).collect();
        assert_eq!(toplevels, vec!["NOTICE", "pkg"]);
        assert!(staging.join("pkg/bin/tool").exists());
        assert!(extracted.dropped.is_empty());
        Ok(())
    }

    #[test]
    fn test_bad_archive_removes_cached_file() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("pkg.zip");
        let staging = dir.path().join("staging");
        fs::create_dir(&staging).unwrap();
        fs::write(&archive, "definitely not a zip").unwrap();

        let reporter = RecordingReporter::default();
        let err = extract_archive(&RealRuntime, &reporter, &archive, &staging, "https://x/pkg.zip")
            .unwrap_err();

        let sdk = err.downcast_ref::<SdkError>().expect("typed error");
        assert!(matches!(sdk, SdkError::BadArchive { .. }));
        assert!(sdk.is_recoverable());
        assert!(!archive.exists(), "cached file should be deleted");
    }

    #[test]
    #[cfg(unix)]
    fn test_symlink_escape_dropped_and_internal_kept() -> Result<()> {
        let dir = tempdir()?;
        let archive = dir.path().join("pkg.zip");
        let staging = dir.path().join("staging");
        fs::create_dir(&staging)?;

        {
            let file = File::create(&archive)?;
            let mut zip = ZipWriter::new(file);
            let options: FileOptions<()> =
                FileOptions::default().compression_method(CompressionMethod::Deflated);
            zip.start_file("pkg/data/real.txt", options)?;
            zip.write_all(b"data")?;
            zip.add_symlink("pkg/inside", "data/real.txt", options)?;
            zip.add_symlink("pkg/outside", "../../../../etc/passwd", options)?;
            zip.finish()?;
        }

        let reporter = RecordingReporter::default();
        let extracted =
            extract_archive(&RealRuntime, &reporter, &archive, &staging, "https://x/pkg.zip")?;

        assert!(staging.join("pkg/inside").symlink_metadata().is_ok());
        assert!(staging.join("pkg/outside").symlink_metadata().is_err());
        assert_eq!(extracted.dropped, vec!["pkg/outside".to_string()]);
        assert!(reporter.contains("unexpected symlink target"));
        Ok(())
    }

    #[test]
    #[cfg(unix)]
    fn test_dangling_symlink_dropped() -> Result<()> {
        let dir = tempdir()?;
        let archive = dir.path().join("pkg.zip");
        let staging = dir.path().join("staging");
        fs::create_dir(&staging)?;

        {
            let file = File::create(&archive)?;
            let mut zip = ZipWriter::new(file);
            let options: FileOptions<()> =
                FileOptions::default().compression_method(CompressionMethod::Deflated);
            zip.add_symlink("pkg/broken", "no/such/file", options)?;
            zip.finish()?;
        }

        let reporter = RecordingReporter::default();
        let extracted =
            extract_archive(&RealRuntime, &reporter, &archive, &staging, "https://x/pkg.zip")?;

        assert!(staging.join("pkg/broken").symlink_metadata().is_err());
        assert_eq!(extracted.dropped.len(), 1);
        Ok(())
    }

    #[test]
    #[cfg(unix)]
    fn test_permissions_applied() -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir()?;
        let archive = dir.path().join("pkg.zip");
        let staging = dir.path().join("staging");
        fs::create_dir(&staging)?;

        {
            let file = File::create(&archive)?;
            let mut zip = ZipWriter::new(file);
            let exec: FileOptions<()> = FileOptions::default()
                .compression_method(CompressionMethod::Deflated)
                .unix_permissions(0o755);
            zip.start_file("pkg/bin/adb", exec)?;
            zip.write_all(b"#!/bin/sh\n")?;
            let plain: FileOptions<()> = FileOptions::default()
                .compression_method(CompressionMethod::Deflated)
                .unix_permissions(0o600);
            zip.start_file("pkg/NOTICE.txt", plain)?;
            zip.write_all(b"notice")?;
            zip.finish()?;
        }

        let reporter = RecordingReporter::default();
        extract_archive(&RealRuntime, &reporter, &archive, &staging, "https://x/pkg.zip")?;

        let exec_mode = fs::metadata(staging.join("pkg/bin/adb"))?.permissions().mode();
        assert_eq!(exec_mode & 0o777, 0o755);
        // world-readable, owner-writable regardless of what the zip said
        let plain_mode = fs::metadata(staging.join("pkg/NOTICE.txt"))?.permissions().mode();
        assert_eq!(plain_mode & 0o777, 0o644);
        Ok(())
    }
}
