//! Change-tracking data model
//!
//! An [`Info`] is the manifest of one backup run: a map from filesystem
//! path to [`ItemInfo`], recording what the builder observed and what it
//! decided to ship. The caller owns the `Info` a build returns, persists
//! it externally, and feeds it back as `last_info` on the next run; the
//! builder itself keeps no state between invocations.
//!
//! ## Item lifecycle
//!
//! ```text
//! (absent)               first sighting      =>  New
//! New/Modified/Unmod.    checksum equal      =>  Unmodified
//! New/Modified/Unmod.    checksum changed    =>  Modified (id cleared)
//! New/Modified/Unmod.    gone from the walk  =>  Deleted (checksum kept)
//! Deleted                path reappears      =>  New
//! Deleted                still absent        =>  entry dropped
//! ```
//!
//! A `Deleted` entry that reappears on a later walk is treated as `New`
//! again; there is no other transition out of `Deleted`. Whenever content
//! changes, the remote `id` is cleared, since a changed file invalidates
//! its remote identity.

use serde::{Deserialize, Serialize};
use std::collections::btree_map;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Lifecycle state of a tracked item
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    /// Seen for the first time in this run
    #[default]
    New,
    /// Content changed since the previous run
    Modified,
    /// Content unchanged since the previous run
    Unmodified,
    /// Present in the previous run, absent from this walk
    Deleted,
}

/// One entry of a run manifest
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemInfo {
    /// Opaque remote reference assigned by the upload collaborator after a
    /// successful transfer; cleared whenever content changes
    #[serde(rename = "ID", default)]
    pub id: String,
    /// Lifecycle state observed in this run
    #[serde(rename = "Status")]
    pub status: ItemStatus,
    /// Base64 SHA-256 of the last-observed content; a `Deleted` entry
    /// retains its last known value
    #[serde(rename = "Checksum", default)]
    pub checksum: String,
}

impl ItemInfo {
    /// True when this item is worth shipping (`New` or `Modified`)
    pub fn is_useful(&self) -> bool {
        matches!(self.status, ItemStatus::New | ItemStatus::Modified)
    }
}

/// Manifest of one backup run: path → [`ItemInfo`]
///
/// Backed by a `BTreeMap` so iteration order, and therefore the embedded
/// JSON manifest, is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Info(BTreeMap<PathBuf, ItemInfo>);

impl Info {
    /// Create an empty manifest
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the entry for `path`
    pub fn get(&self, path: impl AsRef<Path>) -> Option<&ItemInfo> {
        self.0.get(path.as_ref())
    }

    /// Insert or replace the entry for `path`
    pub fn insert(&mut self, path: impl Into<PathBuf>, item: ItemInfo) {
        self.0.insert(path.into(), item);
    }

    /// True when `path` has an entry
    pub fn contains(&self, path: impl AsRef<Path>) -> bool {
        self.0.contains_key(path.as_ref())
    }

    /// Number of tracked paths
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when no path is tracked
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over entries in path order
    pub fn iter(&self) -> impl Iterator<Item = (&Path, &ItemInfo)> {
        self.0.iter().map(|(path, item)| (path.as_path(), item))
    }

    /// Union with `other`, never overwriting an existing key.
    ///
    /// Used when several independent root paths are walked in one run, so
    /// one root's result cannot clobber another's.
    pub fn merge(&mut self, other: Info) {
        for (path, item) in other.0 {
            self.0.entry(path).or_insert(item);
        }
    }

    /// Synthesize `Deleted` markers from the previous run's manifest.
    ///
    /// Every key of `previous` that is absent from `self` and was not
    /// already `Deleted` is inserted as a copy marked `Deleted`, keeping
    /// its last checksum and remote id. Entries that were already
    /// `Deleted` in `previous` are dropped for good: a deletion is
    /// reported exactly once.
    pub fn merge_last(&mut self, previous: &Info) {
        for (path, item) in &previous.0 {
            if item.status == ItemStatus::Deleted || self.0.contains_key(path) {
                continue;
            }
            let mut item = item.clone();
            item.status = ItemStatus::Deleted;
            self.0.insert(path.clone(), item);
        }
    }

    /// Count entries per status
    pub fn statistics(&self) -> InfoStatistics {
        let mut stats = InfoStatistics::default();
        for item in self.0.values() {
            match item.status {
                ItemStatus::New => stats.new += 1,
                ItemStatus::Modified => stats.modified += 1,
                ItemStatus::Unmodified => stats.unmodified += 1,
                ItemStatus::Deleted => stats.deleted += 1,
            }
        }
        stats
    }

    /// Paths worth shipping: status `New` or `Modified`, in path order
    pub fn useful_paths(&self) -> Vec<&Path> {
        self.0
            .iter()
            .filter(|(_, item)| item.is_useful())
            .map(|(path, _)| path.as_path())
            .collect()
    }
}

impl FromIterator<(PathBuf, ItemInfo)> for Info {
    fn from_iter<T: IntoIterator<Item = (PathBuf, ItemInfo)>>(iter: T) -> Self {
        Info(iter.into_iter().collect())
    }
}

impl IntoIterator for Info {
    type Item = (PathBuf, ItemInfo);
    type IntoIter = btree_map::IntoIter<PathBuf, ItemInfo>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Per-status entry counts for one manifest
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InfoStatistics {
    /// Entries seen for the first time
    pub new: usize,
    /// Entries whose content changed
    pub modified: usize,
    /// Entries whose content is unchanged
    pub unmodified: usize,
    /// Entries that vanished since the previous run
    pub deleted: usize,
}

impl InfoStatistics {
    /// Total number of tracked entries
    pub fn total(&self) -> usize {
        self.new + self.modified + self.unmodified + self.deleted
    }

    /// Number of entries worth shipping
    pub fn useful(&self) -> usize {
        self.new + self.modified
    }
}
