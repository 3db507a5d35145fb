//! Overlay inode management
//!
//! The kernel addresses nodes by inode number; the overlay addresses them by
//! path and node kind. This table maps one onto the other and tracks how many
//! references the kernel holds to each number.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use super::node::OverlayNode;

/// Inode number of the mount root
pub const ROOT_INO: u64 = 1;

/// Listing inode for entries without an overlay number, as libfuse reports
pub const UNKNOWN_INO: u64 = 0xffff_ffff;

/// One known node
#[derive(Debug, Clone)]
pub struct InodeEntry {
    pub ino: u64,
    /// Path relative to the mount root; empty for the root
    pub path: PathBuf,
    pub node: OverlayNode,
}

struct Slot {
    entry: InodeEntry,
    /// Entry replies not yet matched by a forget
    lookups: u64,
}

/// Manages virtual inode allocation and mapping
pub struct InodeTable {
    next_ino: AtomicU64,
    inodes: RwLock<HashMap<u64, Slot>>,
    path_to_ino: RwLock<HashMap<PathBuf, u64>>,
}

impl InodeTable {
    /// Table holding only the root inode
    pub fn new(root: OverlayNode) -> Self {
        let table = Self {
            next_ino: AtomicU64::new(ROOT_INO + 1),
            inodes: RwLock::new(HashMap::new()),
            path_to_ino: RwLock::new(HashMap::new()),
        };

        let entry = InodeEntry {
            ino: ROOT_INO,
            path: PathBuf::new(),
            node: root,
        };
        table.path_to_ino.write().insert(entry.path.clone(), ROOT_INO);
        table.inodes.write().insert(ROOT_INO, Slot { entry, lookups: 0 });

        table
    }

    pub fn get(&self, ino: u64) -> Option<InodeEntry> {
        self.inodes.read().get(&ino).map(|slot| slot.entry.clone())
    }

    pub fn get_by_path(&self, path: &Path) -> Option<InodeEntry> {
        let ino = self.path_to_ino.read().get(path).copied()?;
        self.get(ino)
    }

    /// Entry for `path`, allocating an inode on first sight.
    ///
    /// Node kinds are fixed per path, so an existing entry is returned as is.
    /// The kernel gains no reference; use [`InodeTable::lookup`] for entries
    /// handed back in an entry reply.
    pub fn intern(&self, path: PathBuf, node: OverlayNode) -> InodeEntry {
        self.acquire(path, node, 0)
    }

    /// Like [`InodeTable::intern`], counting one kernel reference
    pub fn lookup(&self, path: PathBuf, node: OverlayNode) -> InodeEntry {
        self.acquire(path, node, 1)
    }

    fn acquire(&self, path: PathBuf, node: OverlayNode, lookups: u64) -> InodeEntry {
        let mut path_to_ino = self.path_to_ino.write();
        let mut inodes = self.inodes.write();

        if let Some(slot) = path_to_ino.get(&path).and_then(|ino| inodes.get_mut(ino)) {
            slot.lookups += lookups;
            return slot.entry.clone();
        }

        let ino = self.next_ino.fetch_add(1, Ordering::SeqCst);
        let entry = InodeEntry { ino, path, node };
        path_to_ino.insert(entry.path.clone(), ino);
        inodes.insert(
            ino,
            Slot {
                entry: entry.clone(),
                lookups,
            },
        );
        entry
    }

    /// Drop `nlookup` kernel references to `ino`.
    ///
    /// Passthrough entries are evicted once no reference is left. The root
    /// and synthetic nodes stay so their numbers remain stable. Returns
    /// whether the entry was evicted.
    pub fn forget(&self, ino: u64, nlookup: u64) -> bool {
        if ino == ROOT_INO {
            return false;
        }

        let mut path_to_ino = self.path_to_ino.write();
        let mut inodes = self.inodes.write();

        let Some(slot) = inodes.get_mut(&ino) else {
            return false;
        };
        slot.lookups = slot.lookups.saturating_sub(nlookup);
        if slot.lookups > 0 || slot.entry.node.is_synthetic() {
            return false;
        }

        if let Some(slot) = inodes.remove(&ino) {
            if path_to_ino.get(&slot.entry.path) == Some(&ino) {
                path_to_ino.remove(&slot.entry.path);
            }
        }
        true
    }

    /// Drop the entry for a removed path
    pub fn invalidate_path(&self, path: &Path) {
        if let Some(ino) = self.path_to_ino.write().remove(path) {
            self.inodes.write().remove(&ino);
        }
    }

    /// Re-key `from` and everything below it under `to`.
    ///
    /// Whatever `to` used to name was replaced by the rename and is dropped.
    pub fn rename_path(&self, from: &Path, to: &Path) {
        let mut path_to_ino = self.path_to_ino.write();
        let mut inodes = self.inodes.write();

        let displaced: Vec<PathBuf> = path_to_ino
            .keys()
            .filter(|p| p.starts_with(to))
            .cloned()
            .collect();
        for path in displaced {
            if let Some(ino) = path_to_ino.remove(&path) {
                inodes.remove(&ino);
            }
        }

        let moved: Vec<(PathBuf, u64)> = path_to_ino
            .iter()
            .filter(|(p, _)| p.starts_with(from))
            .map(|(p, ino)| (p.clone(), *ino))
            .collect();
        for (old, ino) in moved {
            let Ok(rest) = old.strip_prefix(from) else {
                continue;
            };
            let new = if rest.as_os_str().is_empty() {
                to.to_path_buf()
            } else {
                to.join(rest)
            };
            path_to_ino.remove(&old);
            path_to_ino.insert(new.clone(), ino);
            if let Some(slot) = inodes.get_mut(&ino) {
                slot.entry.path = new;
            }
        }
    }

    pub fn exists(&self, ino: u64) -> bool {
        self.inodes.read().contains_key(&ino)
    }

    pub fn len(&self) -> usize {
        self.inodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inodes.read().is_empty()
    }
}
