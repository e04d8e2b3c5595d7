//! Error types for the coldpack library
//!
//! Failures come in two shapes, mirroring the two layers of the engine:
//!
//! - [`ArchiveError`]: container-level failures keyed by the archive file
//!   being created, finalized, encrypted, decrypted or extracted.
//! - [`PathError`]: per-path failures raised while walking, opening or
//!   reading a file during a build.
//!
//! Both carry a machine-readable kind plus an optional cause. Equality is
//! structural: two errors are equal when they have the same identifying
//! key, the same kind, and the same root-cause message after walking the
//! `source()` chain to its end. The same logical error may be rewrapped as
//! it propagates, so tests must not compare formatted strings.

use std::error::Error as StdError;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Type alias for Results in the coldpack library
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed cause attached to an [`ArchiveError`] or [`PathError`]
pub type BoxedCause = Box<dyn StdError + Send + Sync>;

/// Top-level error type for all coldpack operations
#[derive(Debug, Error, PartialEq)]
pub enum Error {
    /// Container-level failure (create/finalize/encrypt/decrypt/extract)
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    /// Per-path failure raised during a filesystem walk
    #[error(transparent)]
    Path(#[from] PathError),
}

impl Error {
    /// True when decryption failed because the authentication tag did not
    /// match the decrypted content.
    pub fn is_authentication_failure(&self) -> bool {
        matches!(
            self,
            Error::Archive(ArchiveError {
                kind: ArchiveErrorKind::AuthenticationFailed,
                ..
            })
        )
    }
}

/// What went wrong at the container level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ArchiveErrorKind {
    /// Error creating the container file
    CreateArchive,
    /// Error finalizing the container stream
    FinalizeArchive,
    /// Error creating a temporary file
    TempFile,
    /// Error opening a file to encrypt, decrypt or extract
    OpeningFile,
    /// Error computing the HMAC-SHA256 tag
    ComputeHmac,
    /// Error writing the `encrypted:` label
    WritingLabel,
    /// Error reading the `encrypted:` label
    ReadingLabel,
    /// Error writing the authentication tag
    WritingAuth,
    /// Error reading the authentication tag
    ReadingAuth,
    /// Error writing the initialization vector
    WritingIv,
    /// Error reading the initialization vector
    ReadingIv,
    /// Cipher initialization failed (invalid key size)
    InitCipher,
    /// Error while encrypting the stream
    Encrypt,
    /// Error while decrypting the stream
    Decrypt,
    /// Authentication tag mismatch on decrypt
    AuthenticationFailed,
    /// Error seeking back to the beginning of a file
    Rewind,
    /// Error encoding the embedded manifest
    EncodeManifest,
    /// Error decoding the embedded manifest
    DecodeManifest,
    /// Error iterating over the container entries
    ReadArchive,
    /// Error creating directories during extraction
    CreateDirectories,
    /// Error writing an extracted file
    ExtractFile,
}

impl fmt::Display for ArchiveErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::CreateArchive => "error creating the archive file",
            Self::FinalizeArchive => "error finalizing the archive",
            Self::TempFile => "error creating temporary file",
            Self::OpeningFile => "error opening file",
            Self::ComputeHmac => "error calculating hmac-sha256",
            Self::WritingLabel => "error writing label to encrypted file",
            Self::ReadingLabel => "error reading encrypted file label",
            Self::WritingAuth => "error writing authentication to encrypted file",
            Self::ReadingAuth => "error reading encrypted authentication",
            Self::WritingIv => "error writing iv to encrypted file",
            Self::ReadingIv => "error reading iv from encrypted file",
            Self::InitCipher => "error initializing cipher",
            Self::Encrypt => "error encrypting file",
            Self::Decrypt => "error decrypting file",
            Self::AuthenticationFailed => "encrypted content authentication failed",
            Self::Rewind => "error moving to the beginning of the file",
            Self::EncodeManifest => "error encoding the archive manifest",
            Self::DecodeManifest => "error decoding the archive manifest",
            Self::ReadArchive => "error reading archive",
            Self::CreateDirectories => "error while creating directories",
            Self::ExtractFile => "error extracting file",
        };
        f.write_str(msg)
    }
}

/// Container-level error: what happened, to which archive file, and why
#[derive(Debug)]
pub struct ArchiveError {
    /// Archive file the operation was working on, when known
    pub filename: Option<PathBuf>,
    /// Kind of failure
    pub kind: ArchiveErrorKind,
    /// Underlying cause, when one exists
    pub source: Option<BoxedCause>,
}

impl ArchiveError {
    /// Create a new error of the given kind with no context attached
    pub fn new(kind: ArchiveErrorKind) -> Self {
        ArchiveError {
            filename: None,
            kind,
            source: None,
        }
    }

    /// Attach the archive filename the operation was working on
    pub fn with_filename(mut self, filename: impl AsRef<Path>) -> Self {
        self.filename = Some(filename.as_ref().to_path_buf());
        self
    }

    /// Attach the underlying cause
    pub fn with_source(mut self, source: impl Into<BoxedCause>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl fmt::Display for ArchiveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "archive: ")?;
        if let Some(filename) = &self.filename {
            write!(f, "filename \u{201c}{}\u{201d}, ", filename.display())?;
        }
        write!(f, "{}", self.kind)?;
        if let Some(source) = &self.source {
            write!(f, ": {source}")?;
        }
        Ok(())
    }
}

impl StdError for ArchiveError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| &**e as &(dyn StdError + 'static))
    }
}

impl PartialEq for ArchiveError {
    fn eq(&self, other: &Self) -> bool {
        self.filename == other.filename
            && self.kind == other.kind
            && cause_eq(self.source.as_deref(), other.source.as_deref())
    }
}

/// What went wrong for a single walked path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum PathErrorKind {
    /// Error retrieving path information during the walk
    Metadata,
    /// Error opening the file
    OpeningFile,
    /// Error writing an entry header into the container
    WritingHeader,
    /// Error writing the file content into the container
    WritingFile,
    /// Error computing the SHA-256 checksum of the file
    Digest,
}

impl fmt::Display for PathErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::Metadata => "error retrieving information",
            Self::OpeningFile => "error opening file",
            Self::WritingHeader => "error writing header in archive",
            Self::WritingFile => "error writing content in archive",
            Self::Digest => "error calculating sha-256 from file",
        };
        f.write_str(msg)
    }
}

/// Per-path error raised while traversing a backup path
#[derive(Debug)]
pub struct PathError {
    /// Filesystem path the failure belongs to
    pub path: PathBuf,
    /// Kind of failure
    pub kind: PathErrorKind,
    /// Underlying cause, when one exists
    pub source: Option<BoxedCause>,
}

impl PathError {
    /// Create a new error for `path` of the given kind
    pub fn new(path: impl AsRef<Path>, kind: PathErrorKind) -> Self {
        PathError {
            path: path.as_ref().to_path_buf(),
            kind,
            source: None,
        }
    }

    /// Attach the underlying cause
    pub fn with_source(mut self, source: impl Into<BoxedCause>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl fmt::Display for PathError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "path: \u{201c}{}\u{201d}, {}",
            self.path.display(),
            self.kind
        )?;
        if let Some(source) = &self.source {
            write!(f, ": {source}")?;
        }
        Ok(())
    }
}

impl StdError for PathError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| &**e as &(dyn StdError + 'static))
    }
}

impl PartialEq for PathError {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
            && self.kind == other.kind
            && cause_eq(self.source.as_deref(), other.source.as_deref())
    }
}

/// Compare two optional cause chains by their root-cause message.
fn cause_eq(
    first: Option<&(dyn StdError + Send + Sync)>,
    second: Option<&(dyn StdError + Send + Sync)>,
) -> bool {
    match (first, second) {
        (None, None) => true,
        (Some(a), Some(b)) => root_cause_message(a) == root_cause_message(b),
        _ => false,
    }
}

fn root_cause_message(err: &(dyn StdError + Send + Sync)) -> String {
    let mut current: &dyn StdError = err;
    while let Some(next) = current.source() {
        current = next;
    }
    current.to_string()
}
