//! Incremental archive builder
//!
//! The builder walks a set of backup paths depth-first and serializes
//! *changed* content into a tar-compatible container. For every regular
//! file it computes a content checksum and consults the previous run's
//! [`Info`]: unmodified files are recorded in the returned manifest but
//! their bytes are omitted from the container. The final merged manifest
//! (including synthesized `Deleted` markers) is embedded as the
//! container's last entry under [`ARCHIVE_INFO_NAME`], so a container is
//! self-describing.
//!
//! ## Deferred directory headers
//!
//! Directory headers are not written when a directory is visited. They
//! are queued and only materialized immediately before the next file that
//! is actually written, so directories whose contents were all unmodified
//! never produce empty entries. The queue is shared across sibling
//! subtrees and across backup roots, and is only cleared when a file
//! flush succeeds; a directory header can therefore end up adjacent to a
//! file from a different subtree when the intervening siblings
//! contributed no changes. That ordering is part of the observed
//! contract, not an accident of implementation.
//!
//! ## No-change runs
//!
//! When every walked file is unmodified (or only deletions happened) no
//! container is produced at all: the temporary file is discarded and the
//! outcome carries `archive_path: None`. This is a successful outcome;
//! callers skip the upload but must still persist the returned `Info`,
//! which may carry fresh `Deleted` markers.

use crate::checksum;
use crate::error::{ArchiveError, ArchiveErrorKind, PathError, PathErrorKind, Result};
use crate::info::{Info, ItemInfo, ItemStatus};
use crate::utils;
use chrono::Local;
use std::fs::{File, Metadata};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tempfile::NamedTempFile;
use tracing::{debug, info};
use walkdir::WalkDir;

/// Name of the reserved container entry holding the JSON manifest
pub const ARCHIVE_INFO_NAME: &str = "coldpack-info.json";

/// Outcome of a [`ArchiveBuilder::build`] run
#[derive(Debug)]
pub struct BuildOutcome {
    /// Path of the produced container, or `None` when nothing changed
    pub archive_path: Option<PathBuf>,
    /// Manifest of this run, including `Deleted` markers
    pub info: Info,
}

/// Builds incremental tar containers from a set of backup paths
///
/// Stateless between invocations: the only memory of previous runs is the
/// `last_info` manifest the caller passes in.
#[derive(Debug, Default)]
pub struct ArchiveBuilder;

impl ArchiveBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        ArchiveBuilder
    }

    /// Walk `paths` and build a container holding every file that is new
    /// or modified relative to `last_info`.
    ///
    /// Empty path entries are ignored. Any filesystem error aborts the
    /// whole build; the partially written temporary container is removed
    /// on drop and no path is returned.
    pub fn build(&self, last_info: &Info, paths: &[PathBuf]) -> Result<BuildOutcome> {
        debug!("building archive for backup paths {:?}", paths);

        let tmp = NamedTempFile::with_prefix("coldpack-")
            .map_err(|e| ArchiveError::new(ArchiveErrorKind::TempFile).with_source(e))?;
        let file = tmp.reopen().map_err(|e| {
            ArchiveError::new(ArchiveErrorKind::CreateArchive)
                .with_filename(tmp.path())
                .with_source(e)
        })?;

        let prefix = format!("backup-{}", Local::now().format("%Y%m%d%H%M%S"));
        let mut writer = ContainerWriter::new(file, prefix);

        let mut archive_info = Info::new();
        for path in paths {
            if path.as_os_str().is_empty() {
                info!("empty backup path ignored");
                continue;
            }
            debug!("analyzing backup path {:?}", path);
            let partial = self.walk_path(last_info, &mut writer, path)?;
            archive_info.merge(partial);
        }
        archive_info.merge_last(last_info);

        if !writer.has_files {
            info!("no content changed since the last archive, nothing to pack");
            return Ok(BuildOutcome {
                archive_path: None,
                info: archive_info,
            });
        }

        writer.append_manifest(&archive_info)?;
        writer.finish(tmp.path())?;

        let (_, archive_path) = tmp
            .keep()
            .map_err(|e| ArchiveError::new(ArchiveErrorKind::TempFile).with_source(e))?;
        info!("archive {:?} created successfully", archive_path);

        Ok(BuildOutcome {
            archive_path: Some(archive_path),
            info: archive_info,
        })
    }

    fn walk_path(
        &self,
        last_info: &Info,
        writer: &mut ContainerWriter<File>,
        source: &Path,
    ) -> Result<Info> {
        let mut partial = Info::new();

        for entry in WalkDir::new(source).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                let path = e
                    .path()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| source.to_path_buf());
                PathError::new(path, PathErrorKind::Metadata).with_source(e)
            })?;
            let path = entry.path().to_path_buf();
            let file_type = entry.file_type();

            if file_type.is_dir() {
                let metadata = entry
                    .metadata()
                    .map_err(|e| PathError::new(&path, PathErrorKind::Metadata).with_source(e))?;
                writer.queue_dir(&path, &metadata);
                continue;
            }
            if !file_type.is_file() {
                debug!("path {:?} is not a regular file, skipping", path);
                continue;
            }

            let metadata = entry
                .metadata()
                .map_err(|e| PathError::new(&path, PathErrorKind::Metadata).with_source(e))?;
            let (item, include) = self.classify(&path, last_info)?;
            partial.insert(path.clone(), item);

            if include {
                writer.write_file(&path, &metadata)?;
            } else {
                debug!("path {:?} unmodified since the last archive, content omitted", path);
            }
        }

        Ok(partial)
    }

    /// Decide the lifecycle status of one file and whether its content
    /// belongs in the container.
    fn classify(&self, path: &Path, last_info: &Info) -> Result<(ItemInfo, bool)> {
        let encoded = checksum::file_checksum(path)?;

        let (item, include) = match last_info.get(path) {
            None => {
                debug!("path {:?} is new since the last archive", path);
                (
                    ItemInfo {
                        id: String::new(),
                        status: ItemStatus::New,
                        checksum: encoded,
                    },
                    true,
                )
            }
            // A deleted path that reappears starts a fresh lifecycle; its
            // old remote id no longer points at anything.
            Some(previous) if previous.status == ItemStatus::Deleted => {
                debug!("path {:?} reappeared since the last archive", path);
                (
                    ItemInfo {
                        id: String::new(),
                        status: ItemStatus::New,
                        checksum: encoded,
                    },
                    true,
                )
            }
            Some(previous) if previous.checksum == encoded => (
                ItemInfo {
                    id: previous.id.clone(),
                    status: ItemStatus::Unmodified,
                    checksum: encoded,
                },
                false,
            ),
            Some(_) => {
                debug!("path {:?} was modified since the last archive", path);
                (
                    ItemInfo {
                        id: String::new(),
                        status: ItemStatus::Modified,
                        checksum: encoded,
                    },
                    true,
                )
            }
        };

        Ok((item, include))
    }
}

/// A directory header waiting for the next written file
struct QueuedDir {
    source: PathBuf,
    name: PathBuf,
    mode: u32,
    mtime: u64,
}

/// Streaming tar writer with the deferred-directory queue
struct ContainerWriter<W: Write> {
    archive: tar::Builder<W>,
    prefix: String,
    pending_dirs: Vec<QueuedDir>,
    has_files: bool,
}

impl<W: Write> ContainerWriter<W> {
    fn new(writer: W, prefix: String) -> Self {
        ContainerWriter {
            archive: tar::Builder::new(writer),
            prefix,
            pending_dirs: Vec::new(),
            has_files: false,
        }
    }

    /// Container entry name for a source path: `<prefix>/<path>` with any
    /// leading separators stripped so tar names stay relative.
    fn entry_name(&self, path: &Path) -> PathBuf {
        Path::new(&self.prefix).join(utils::relativize(path))
    }

    fn queue_dir(&mut self, path: &Path, metadata: &Metadata) {
        // Directory names carry a trailing separator in the container.
        let mut name = self.entry_name(path).into_os_string();
        name.push("/");
        debug!("queueing directory header {:?}", name);

        self.pending_dirs.push(QueuedDir {
            source: path.to_path_buf(),
            name: name.into(),
            mode: utils::entry_mode(metadata),
            mtime: mtime_secs(metadata),
        });
    }

    /// Write all queued directory headers, then clear the queue.
    fn flush_pending_dirs(&mut self) -> Result<()> {
        for dir in self.pending_dirs.drain(..) {
            debug!("writing directory header {:?}", dir.name);

            let mut header = tar::Header::new_gnu();
            header.set_entry_type(tar::EntryType::Directory);
            header.set_size(0);
            header.set_mode(dir.mode);
            header.set_mtime(dir.mtime);

            self.archive
                .append_data(&mut header, &dir.name, io::empty())
                .map_err(|e| {
                    PathError::new(&dir.source, PathErrorKind::WritingHeader).with_source(e)
                })?;
        }
        Ok(())
    }

    fn write_file(&mut self, path: &Path, metadata: &Metadata) -> Result<()> {
        self.flush_pending_dirs()?;

        let name = self.entry_name(path);
        debug!("writing archive entry {:?} ({} bytes)", name, metadata.len());

        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(metadata.len());
        header.set_mode(utils::entry_mode(metadata));
        header.set_mtime(mtime_secs(metadata));

        let file = File::open(path)
            .map_err(|e| PathError::new(path, PathErrorKind::OpeningFile).with_source(e))?;
        self.archive
            .append_data(&mut header, &name, file)
            .map_err(|e| PathError::new(path, PathErrorKind::WritingFile).with_source(e))?;

        self.has_files = true;
        Ok(())
    }

    /// Append the JSON manifest as the container's final entry.
    ///
    /// Queued directories are deliberately not flushed here: a directory
    /// whose files were all unmodified must not surface just because the
    /// manifest is written.
    fn append_manifest(&mut self, info: &Info) -> Result<()> {
        let payload = serde_json::to_vec(info)
            .map_err(|e| ArchiveError::new(ArchiveErrorKind::EncodeManifest).with_source(e))?;
        debug!("embedding manifest ({} bytes, {} entries)", payload.len(), info.len());

        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(payload.len() as u64);
        header.set_mode(0o600);
        header.set_mtime(Local::now().timestamp().max(0) as u64);

        let name = Path::new(&self.prefix).join(ARCHIVE_INFO_NAME);
        self.archive
            .append_data(&mut header, &name, payload.as_slice())
            .map_err(|e| ArchiveError::new(ArchiveErrorKind::EncodeManifest).with_source(e))
            .map_err(Into::into)
    }

    fn finish(&mut self, archive_path: &Path) -> Result<()> {
        self.archive.finish().map_err(|e| {
            ArchiveError::new(ArchiveErrorKind::FinalizeArchive)
                .with_filename(archive_path)
                .with_source(e)
                .into()
        })
    }
}

fn mtime_secs(metadata: &Metadata) -> u64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn entry_names(archive_path: &Path) -> Vec<String> {
        let mut archive = tar::Archive::new(File::open(archive_path).unwrap());
        archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_manifest_is_last_entry() {
        let root = TempDir::new().unwrap();
        fs::write(root.path().join("a.txt"), "alpha").unwrap();
        fs::write(root.path().join("b.txt"), "bravo").unwrap();

        let outcome = ArchiveBuilder::new()
            .build(&Info::new(), &[root.path().to_path_buf()])
            .unwrap();
        let archive_path = outcome.archive_path.expect("new files must produce an archive");

        let names = entry_names(&archive_path);
        assert!(names.last().unwrap().ends_with(ARCHIVE_INFO_NAME));
        fs::remove_file(archive_path).unwrap();
    }

    #[test]
    fn test_empty_paths_are_ignored() {
        let root = TempDir::new().unwrap();
        fs::write(root.path().join("a.txt"), "alpha").unwrap();

        let outcome = ArchiveBuilder::new()
            .build(
                &Info::new(),
                &[PathBuf::new(), root.path().to_path_buf(), PathBuf::new()],
            )
            .unwrap();

        assert_eq!(outcome.info.len(), 1);
        fs::remove_file(outcome.archive_path.unwrap()).unwrap();
    }

    #[test]
    fn test_directories_without_changes_are_not_materialized() {
        let root = TempDir::new().unwrap();
        let quiet = root.path().join("quiet");
        fs::create_dir(&quiet).unwrap();
        fs::write(quiet.join("stable.txt"), "same").unwrap();

        // First run records everything.
        let first = ArchiveBuilder::new()
            .build(&Info::new(), &[root.path().to_path_buf()])
            .unwrap();
        fs::remove_file(first.archive_path.unwrap()).unwrap();

        // Second run adds a file outside `quiet`; the quiet directory
        // must not surface in the container.
        fs::write(root.path().join("fresh.txt"), "new content").unwrap();
        let second = ArchiveBuilder::new()
            .build(&first.info, &[root.path().to_path_buf()])
            .unwrap();
        let archive_path = second.archive_path.unwrap();

        let names = entry_names(&archive_path);
        assert!(
            !names.iter().any(|n| n.contains("quiet")),
            "unchanged directory leaked into the container: {names:?}"
        );
        assert!(names.iter().any(|n| n.ends_with("fresh.txt")));
        fs::remove_file(archive_path).unwrap();
    }

    #[test]
    fn test_walk_error_aborts_build() {
        let missing = PathBuf::from("/definitely/not/a/real/path");
        let err = ArchiveBuilder::new()
            .build(&Info::new(), &[missing.clone()])
            .unwrap_err();
        match err {
            crate::error::Error::Path(path_err) => {
                assert_eq!(path_err.kind, PathErrorKind::Metadata);
                assert_eq!(path_err.path, missing);
            }
            other => panic!("expected path error, got {other}"),
        }
    }

    #[test]
    fn test_single_file_backup_path() {
        let root = TempDir::new().unwrap();
        let file = root.path().join("standalone.txt");
        fs::write(&file, "by itself").unwrap();

        let outcome = ArchiveBuilder::new()
            .build(&Info::new(), &[file.clone()])
            .unwrap();

        assert_eq!(outcome.info.len(), 1);
        assert_eq!(
            outcome.info.get(&file).unwrap().status,
            ItemStatus::New
        );
        fs::remove_file(outcome.archive_path.unwrap()).unwrap();
    }
}
