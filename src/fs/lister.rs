//! Merged directory listings
//!
//! A synthetic directory lists the entries of its backing-store counterpart
//! followed by its own synthetic children. Any backing entry whose name is
//! taken by a synthetic child is hidden.

use fuser::{FileAttr, FileType};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::vec;
use tracing::warn;

use super::backing::BackingDirEntry;
use super::node::{OverlayNode, SyntheticDirectory};
use crate::error::Result;

/// One entry of a directory listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub ino: u64,
    pub kind: FileType,
    pub name: OsString,
}

impl From<BackingDirEntry> for DirEntry {
    fn from(entry: BackingDirEntry) -> Self {
        Self {
            ino: entry.ino,
            kind: entry.kind,
            name: entry.name,
        }
    }
}

/// Attribute lookup for synthetic children being listed
pub trait ChildAttributes {
    /// Attributes of `node`, the child found at `path`
    fn child_attributes(&self, path: PathBuf, node: &OverlayNode) -> Result<FileAttr>;
}

/// Single-pass listing of a synthetic directory
pub struct MergedListing<'a, A: ChildAttributes> {
    backing: Option<vec::IntoIter<BackingDirEntry>>,
    dir: Arc<SyntheticDirectory>,
    path: PathBuf,
    next_child: usize,
    attrs: &'a A,
}

impl<'a, A: ChildAttributes> MergedListing<'a, A> {
    /// `backing` is the real directory's listing (led by `.` and `..`), or
    /// `None` when the directory has no real counterpart. `dir_ino` and
    /// `parent_ino` number the synthesized dot entries in that case.
    pub fn new(
        backing: Option<Vec<BackingDirEntry>>,
        dir: Arc<SyntheticDirectory>,
        path: &Path,
        dir_ino: u64,
        parent_ino: u64,
        attrs: &'a A,
    ) -> Self {
        let backing = backing.unwrap_or_else(|| {
            vec![
                BackingDirEntry {
                    name: OsString::from("."),
                    kind: FileType::Directory,
                    ino: dir_ino,
                },
                BackingDirEntry {
                    name: OsString::from(".."),
                    kind: FileType::Directory,
                    ino: parent_ino,
                },
            ]
        });

        Self {
            backing: Some(backing.into_iter()),
            dir,
            path: path.to_path_buf(),
            next_child: 0,
            attrs,
        }
    }

    fn next_backing(&mut self) -> Option<DirEntry> {
        let backing = self.backing.as_mut()?;
        for entry in backing.by_ref() {
            let shadowed = entry
                .name
                .to_str()
                .map(|name| self.dir.contains(name))
                .unwrap_or(false);
            if !shadowed {
                return Some(entry.into());
            }
        }
        self.backing = None;
        None
    }

    fn next_synthetic(&mut self) -> Option<Result<DirEntry>> {
        let (name, node) = self.dir.child_at(self.next_child)?;
        self.next_child += 1;

        let result = self
            .attrs
            .child_attributes(self.path.join(name), node)
            .map(|attr| DirEntry {
                ino: attr.ino,
                kind: attr.kind,
                name: OsString::from(name),
            });
        if let Err(e) = &result {
            warn!("attributes of synthetic {:?} failed: {}", self.path.join(name), e);
        }
        Some(result)
    }
}

impl<A: ChildAttributes> Iterator for MergedListing<'_, A> {
    type Item = Result<DirEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(entry) = self.next_backing() {
            return Some(Ok(entry));
        }
        self.next_synthetic()
    }
}
