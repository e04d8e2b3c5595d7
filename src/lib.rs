//! # coldpack - incremental archives for cold-storage backups
//!
//! coldpack is the archive engine of a backup agent: it bundles directory
//! trees into tar-compatible containers, tracks which files changed since
//! the previous run, and protects containers with an authenticated
//! encryption envelope before they are handed to a remote cold-storage
//! uploader.
//!
//! ## Overview
//!
//! A backup run is one call to [`ArchiveBuilder::build`] with the
//! previous run's [`Info`] manifest. The builder walks every backup path,
//! fingerprints each regular file (streaming SHA-256, base64-encoded) and
//! includes only content that is new or modified. The merged manifest,
//! including `Deleted` markers for paths that vanished, is embedded as
//! the container's last entry, so every container describes itself.
//!
//! When nothing changed, no container is produced at all; that outcome is
//! a success, not an error, and the returned manifest must still be
//! persisted by the caller.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use coldpack::{ArchiveBuilder, Extractor, Info, OfbEnvelope};
//! use std::path::PathBuf;
//!
//! # fn main() -> coldpack::Result<()> {
//! // First run: everything is new.
//! let builder = ArchiveBuilder::new();
//! let outcome = builder.build(&Info::new(), &[PathBuf::from("/var/www")])?;
//!
//! if let Some(archive_path) = &outcome.archive_path {
//!     // Optionally wrap the container before shipping it.
//!     let mut envelope = OfbEnvelope::new();
//!     let encrypted = envelope.encrypt(archive_path, b"0123456789abcdef")?;
//!     println!("ready to upload: {:?}", encrypted);
//! }
//!
//! // Persist `outcome.info` externally and pass it back next run:
//! // unchanged files will be recorded but not re-packed.
//! let next = builder.build(&outcome.info, &[PathBuf::from("/var/www")])?;
//! assert!(next.archive_path.is_none() || !next.info.is_empty());
//!
//! // On the receiving end, after decryption:
//! let manifest = Extractor::new("/restore").extract(
//!     outcome.archive_path.as_deref().unwrap(),
//!     None,
//! )?;
//! println!("restored manifest has {} entries", manifest.len());
//! # Ok(())
//! # }
//! ```
//!
//! ## Key Concepts
//!
//! - **Container**: tar-compatible stream holding changed files plus the
//!   embedded manifest, namespaced under a per-run `backup-<timestamp>`
//!   prefix.
//! - **Manifest**: JSON snapshot of [`Info`], always the container's last
//!   entry, under the reserved name [`ARCHIVE_INFO_NAME`].
//! - **Envelope**: `encrypted:` label, HMAC-SHA256 tag over the
//!   plaintext, fresh IV, then the AES-OFB ciphertext. A missing label
//!   means the file was never encrypted and is passed through untouched.
//!
//! ## Concurrency
//!
//! Everything here is single-threaded, synchronous, blocking I/O. Builds,
//! encryptions and extractions keep no state between calls; serializing
//! runs (one backup at a time) is the caller's job, as is persisting the
//! manifest between runs.
//!
//! ## Error Handling
//!
//! Operations return `Result<T, `[`Error`]`>` where the error is either
//! archive-scoped ([`ArchiveError`]) or path-scoped ([`PathError`]), each
//! carrying a kind and a cause chain. Authentication failure on decrypt
//! is a distinguished kind: tampered content never yields plaintext.
//!
//! ## Module Organization
//!
//! - [`builder`]: incremental container construction
//! - [`envelope`]: authenticated encryption envelope
//! - [`extractor`]: container unpacking and manifest recovery
//! - [`info`]: change-tracking data model
//! - [`checksum`]: content fingerprinting
//! - [`error`]: error types and structural equality

pub mod builder;
pub mod checksum;
pub mod envelope;
pub mod error;
pub mod extractor;
pub mod info;

mod utils;

pub use builder::{ArchiveBuilder, BuildOutcome, ARCHIVE_INFO_NAME};
pub use envelope::{OfbEnvelope, ENCRYPTED_LABEL};
pub use error::{
    ArchiveError, ArchiveErrorKind, Error, PathError, PathErrorKind, Result,
};
pub use extractor::Extractor;
pub use info::{Info, InfoStatistics, ItemInfo, ItemStatus};
