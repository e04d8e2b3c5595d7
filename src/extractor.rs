//! Container extraction
//!
//! Reverses the builder: unpacks a container beneath an extraction root,
//! optionally filtering by original source path, and recovers the
//! embedded [`Info`] manifest. Entry names are normalized by stripping
//! the leading run-prefix segment, so filters can be given as the same
//! paths the builder originally walked.
//!
//! Directory entries create no filesystem side effect on their own;
//! parent directories are created lazily when a matching file entry is
//! written. Entry types the engine does not produce (links, devices) are
//! skipped with a diagnostic rather than failing the whole extraction.

use crate::builder::ARCHIVE_INFO_NAME;
use crate::error::{ArchiveError, ArchiveErrorKind, Result};
use crate::info::Info;
use crate::utils;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Unpacks containers produced by the builder
#[derive(Debug, Clone)]
pub struct Extractor {
    root: PathBuf,
}

impl Extractor {
    /// Create an extractor that writes entries beneath `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Extractor { root: root.into() }
    }

    /// Unpack `archive_path`, returning the embedded manifest.
    ///
    /// When `filter` is given, only entries whose normalized name matches
    /// one of its paths are written; the manifest is recovered either
    /// way. Returns an empty manifest when the container carries none.
    pub fn extract(&self, archive_path: &Path, filter: Option<&[PathBuf]>) -> Result<Info> {
        debug!("extracting archive {:?} into {:?}", archive_path, self.root);

        let file = File::open(archive_path).map_err(|e| {
            ArchiveError::new(ArchiveErrorKind::OpeningFile)
                .with_filename(archive_path)
                .with_source(e)
        })?;
        let mut archive = tar::Archive::new(file);

        let read_error = |e: io::Error| {
            ArchiveError::new(ArchiveErrorKind::ReadArchive)
                .with_filename(archive_path)
                .with_source(e)
        };

        let mut archive_info = Info::new();
        let mut extracted = 0usize;

        for entry in archive.entries().map_err(read_error)? {
            let mut entry = entry.map_err(read_error)?;
            let entry_path = entry.path().map_err(read_error)?.into_owned();

            match entry.header().entry_type() {
                tar::EntryType::Directory => {
                    debug!("directory entry {:?}, nothing to do", entry_path);
                }
                tar::EntryType::Regular => {
                    let Some(name) = utils::strip_run_prefix(&entry_path) else {
                        debug!("entry {:?} has no name past the run prefix, skipping", entry_path);
                        continue;
                    };

                    if name.as_os_str() == ARCHIVE_INFO_NAME {
                        archive_info = decode_manifest(&mut entry, archive_path)?;
                        continue;
                    }
                    if let Some(filter) = filter {
                        if !filter.iter().any(|f| utils::relativize(f) == name) {
                            debug!("entry {:?} not in filter, skipping", name);
                            continue;
                        }
                    }
                    if utils::escapes_root(&name) {
                        warn!("entry {:?} would escape the extraction root, skipping", name);
                        continue;
                    }

                    self.write_entry(&mut entry, &name, archive_path)?;
                    extracted += 1;
                }
                other => {
                    warn!("unsupported entry type {:?} for {:?}, skipping", other, entry_path);
                }
            }
        }

        info!("extracted {} files from {:?}", extracted, archive_path);
        Ok(archive_info)
    }

    fn write_entry(
        &self,
        entry: &mut tar::Entry<'_, File>,
        name: &Path,
        archive_path: &Path,
    ) -> Result<()> {
        let destination = self.root.join(name);
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                ArchiveError::new(ArchiveErrorKind::CreateDirectories)
                    .with_filename(archive_path)
                    .with_source(e)
            })?;
        }

        let extract_error = |e: io::Error| {
            ArchiveError::new(ArchiveErrorKind::ExtractFile)
                .with_filename(archive_path)
                .with_source(e)
        };

        let mut out = File::create(&destination).map_err(extract_error)?;
        let written = io::copy(entry, &mut out).map_err(extract_error)?;

        let mode = entry.header().mode().map_err(extract_error)?;
        utils::set_mode(&destination, mode).map_err(extract_error)?;

        debug!("extracted {:?} ({} bytes)", destination, written);
        Ok(())
    }
}

fn decode_manifest(entry: &mut tar::Entry<'_, File>, archive_path: &Path) -> Result<Info> {
    let mut payload = Vec::new();
    entry.read_to_end(&mut payload).map_err(|e| {
        ArchiveError::new(ArchiveErrorKind::ReadArchive)
            .with_filename(archive_path)
            .with_source(e)
    })?;

    let archive_info = serde_json::from_slice(&payload).map_err(|e| {
        ArchiveError::new(ArchiveErrorKind::DecodeManifest)
            .with_filename(archive_path)
            .with_source(e)
    })?;
    debug!("recovered embedded manifest ({} bytes)", payload.len());
    Ok(archive_info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_missing_archive() {
        let dir = TempDir::new().unwrap();
        let absent = dir.path().join("idontexist.tar");
        let err = Extractor::new(dir.path())
            .extract(&absent, None)
            .unwrap_err();
        match err {
            Error::Archive(archive_err) => {
                assert_eq!(archive_err.kind, ArchiveErrorKind::OpeningFile);
                assert_eq!(archive_err.filename.as_deref(), Some(absent.as_path()));
            }
            other => panic!("expected archive error, got {other}"),
        }
    }

    #[test]
    fn test_not_a_tar() {
        let dir = TempDir::new().unwrap();
        let bogus = dir.path().join("bogus.tar");
        fs::write(&bogus, "I'm not a tar archive").unwrap();

        let err = Extractor::new(dir.path()).extract(&bogus, None).unwrap_err();
        match err {
            Error::Archive(archive_err) => {
                assert_eq!(archive_err.kind, ArchiveErrorKind::ReadArchive)
            }
            other => panic!("expected archive error, got {other}"),
        }
    }

    #[test]
    fn test_corrupted_manifest() {
        let dir = TempDir::new().unwrap();
        let archive_path = dir.path().join("broken.tar");

        let mut builder = tar::Builder::new(File::create(&archive_path).unwrap());
        let payload = b"{{{{";
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(payload.len() as u64);
        header.set_mode(0o600);
        builder
            .append_data(
                &mut header,
                format!("backup-20250101000000/{ARCHIVE_INFO_NAME}"),
                payload.as_slice(),
            )
            .unwrap();
        builder.finish().unwrap();

        let err = Extractor::new(dir.path())
            .extract(&archive_path, None)
            .unwrap_err();
        match err {
            Error::Archive(archive_err) => {
                assert_eq!(archive_err.kind, ArchiveErrorKind::DecodeManifest)
            }
            other => panic!("expected archive error, got {other}"),
        }
    }

    #[test]
    fn test_unsupported_entries_are_skipped() {
        let dir = TempDir::new().unwrap();
        let archive_path = dir.path().join("links.tar");

        let mut builder = tar::Builder::new(File::create(&archive_path).unwrap());
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Symlink);
        header.set_size(0);
        header.set_mode(0o777);
        builder
            .append_link(&mut header, "backup-20250101000000/data/link", "target")
            .unwrap();
        builder.finish().unwrap();

        let out = TempDir::new().unwrap();
        let archive_info = Extractor::new(out.path())
            .extract(&archive_path, None)
            .unwrap();
        assert!(archive_info.is_empty());
        assert!(!out.path().join("data/link").exists());
    }
}
