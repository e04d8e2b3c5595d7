//! Small shared helpers: permission bits and entry-name handling
//!
//! Container entry names always use the run-prefix namespace
//! (`backup-<timestamp>/…`), and source paths may be absolute, so both
//! the builder and the extractor need the same normalization rules.

use std::fs;
use std::path::{Component, Path, PathBuf};

/// Strip root/prefix/current-dir components so a path can be joined under
/// another directory or compared against a normalized entry name.
pub(crate) fn relativize(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| {
            !matches!(
                c,
                Component::RootDir | Component::Prefix(_) | Component::CurDir
            )
        })
        .collect()
}

/// Drop the leading run-prefix segment of a container entry name.
///
/// Returns `None` when nothing remains after the prefix.
pub(crate) fn strip_run_prefix(name: &Path) -> Option<PathBuf> {
    let mut components = name.components();
    components.next()?;
    let rest = components.as_path();
    if rest.as_os_str().is_empty() {
        None
    } else {
        Some(rest.to_path_buf())
    }
}

/// True when a normalized entry name would escape the extraction root.
pub(crate) fn escapes_root(name: &Path) -> bool {
    name.components()
        .any(|c| matches!(c, Component::ParentDir))
}

/// Unix permission bits for a container header
#[cfg(unix)]
pub(crate) fn entry_mode(metadata: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

/// Permission bits for a container header (Windows approximation)
#[cfg(windows)]
pub(crate) fn entry_mode(metadata: &fs::Metadata) -> u32 {
    let mut mode = if metadata.permissions().readonly() {
        0o444
    } else {
        0o644
    };
    if metadata.is_dir() {
        mode |= 0o111;
    }
    mode
}

/// Restore permission bits on an extracted file
#[cfg(unix)]
pub(crate) fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

/// Restore permission bits on an extracted file (Windows approximation:
/// only the read-only attribute can be expressed)
#[cfg(windows)]
pub(crate) fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    let metadata = fs::metadata(path)?;
    let mut permissions = metadata.permissions();
    permissions.set_readonly(mode & 0o200 == 0);
    fs::set_permissions(path, permissions)
}
