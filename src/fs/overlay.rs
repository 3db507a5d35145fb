//! Overlay filesystem core
//!
//! Every operation resolves the inode to its node and dispatches on the node
//! kind: passthrough nodes go to the backing store, synthetic nodes are
//! answered from the tree and their handlers.

use bytes::Bytes;
use fuser::consts::{FOPEN_DIRECT_IO, FOPEN_NONSEEKABLE};
use fuser::FileAttr;
use std::ffi::OsStr;
use std::fs::Metadata;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use super::attr::{from_metadata, AttrTemplate};
use super::backing::{BackingDirEntry, BackingStore, SetAttr, StatFs};
use super::handle::{read_window, HandleTable, OpenFile};
use super::inode::{InodeEntry, InodeTable, ROOT_INO, UNKNOWN_INO};
use super::lister::{ChildAttributes, DirEntry, MergedListing};
use super::node::{Content, OverlayNode, SyntheticLeaf};
use super::tree::{OverlayTree, TreeBuilder};
use crate::config::Config;
use crate::error::{Error, Result};

/// Boxed directory listing handed to the FUSE adapter
pub type Listing<'a> = Box<dyn Iterator<Item = Result<DirEntry>> + 'a>;

/// An open handle and the FOPEN_* flags to reply with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Opened {
    pub fh: u64,
    pub flags: u32,
}

/// The overlay of synthetic nodes on top of a backing directory
pub struct OverlayFs {
    backing: BackingStore,
    tree: OverlayTree,
    inodes: InodeTable,
    handles: HandleTable,
    attrs: AttrTemplate,
}

impl OverlayFs {
    pub fn new(backing: BackingStore, tree: OverlayTree, attrs: AttrTemplate) -> Self {
        let inodes = InodeTable::new(tree.root_node());
        Self {
            backing,
            tree,
            inodes,
            handles: HandleTable::new(),
            attrs,
        }
    }

    /// Load every configured handler and build the overlay over `source`
    pub fn from_config(config: &Config, source: &Path) -> Result<Self> {
        let backing = BackingStore::new(source)?;

        let mut builder = TreeBuilder::new();
        for entry in config.flatten()? {
            let handler = entry.kind.load(&entry.config).map_err(|e| {
                Error::InvalidConfig(format!("{} handler at {:?}: {}", entry.kind, entry.path, e))
            })?;
            debug!(
                "synthetic {} ({}, cache={})",
                entry.path, entry.kind, entry.cache
            );
            builder.insert(&entry.path, SyntheticLeaf::new(handler, entry.cache))?;
        }
        let tree = builder.build();

        let mut attrs = AttrTemplate::current_user();
        if let Some(uid) = config.uid {
            attrs.uid = uid;
        }
        if let Some(gid) = config.gid {
            attrs.gid = gid;
        }

        info!(
            "overlaying {} synthetic files on {}",
            tree.leaf_count(),
            backing.root().display()
        );
        Ok(Self::new(backing, tree, attrs))
    }

    pub fn backing(&self) -> &BackingStore {
        &self.backing
    }

    pub fn tree(&self) -> &OverlayTree {
        &self.tree
    }

    /// Number of open file handles
    pub fn open_handles(&self) -> usize {
        self.handles.len()
    }

    fn entry(&self, ino: u64) -> Result<InodeEntry> {
        self.inodes.get(ino).ok_or(Error::InodeNotFound(ino))
    }

    fn handle(&self, fh: u64) -> Result<Arc<OpenFile>> {
        self.handles.get(fh).ok_or(Error::InvalidHandle(fh))
    }

    /// Attributes of a known node
    fn attributes(&self, entry: &InodeEntry) -> Result<FileAttr> {
        match &entry.node {
            OverlayNode::Passthrough => {
                let meta = self.backing.metadata(&entry.path)?;
                Ok(from_metadata(entry.ino, &meta))
            }
            OverlayNode::Leaf(leaf) => Ok(self.leaf_attributes(entry.ino, leaf, &leaf.snapshot())),
            OverlayNode::Directory(_) => {
                self.directory_attributes(entry.ino, self.backing.metadata(&entry.path))
            }
        }
    }

    fn leaf_attributes(&self, ino: u64, leaf: &SyntheticLeaf, content: &Content) -> FileAttr {
        self.attrs.leaf(ino, content.len(), leaf.modified())
    }

    /// A synthetic directory reports its backing counterpart when one exists
    fn directory_attributes(&self, ino: u64, backing: Result<Metadata>) -> Result<FileAttr> {
        match backing {
            Ok(meta) if meta.is_dir() => Ok(from_metadata(ino, &meta)),
            Ok(_) => Ok(self.attrs.directory(ino)),
            Err(e) if e.is_not_found() || e.to_errno() == libc::ENOTDIR => {
                Ok(self.attrs.directory(ino))
            }
            Err(e) => Err(e),
        }
    }

    fn lookup_backing(&self, parent: &InodeEntry, name: &OsStr) -> Result<FileAttr> {
        let path = parent.path.join(name);
        let meta = self.backing.metadata(&path)?;
        Ok(self.register(path, &meta))
    }

    /// Count a kernel reference to a passthrough node that now exists on the
    /// backing store
    fn register(&self, path: PathBuf, meta: &Metadata) -> FileAttr {
        let entry = self.inodes.lookup(path, OverlayNode::Passthrough);
        from_metadata(entry.ino, meta)
    }

    /// Inode of the directory containing `entry`
    fn parent_ino(&self, entry: &InodeEntry) -> u64 {
        entry
            .path
            .parent()
            .and_then(|parent| self.inodes.get_by_path(parent))
            .map(|parent| parent.ino)
            .unwrap_or(ROOT_INO)
    }

    pub fn lookup(&self, parent: u64, name: &OsStr) -> Result<FileAttr> {
        let parent = self.entry(parent)?;
        match &parent.node {
            OverlayNode::Passthrough => self.lookup_backing(&parent, name),
            OverlayNode::Leaf(_) => Err(Error::NotADirectory),
            OverlayNode::Directory(dir) => match name.to_str().and_then(|n| dir.child(n)) {
                Some(child) => {
                    let entry = self.inodes.lookup(parent.path.join(name), child.clone());
                    self.attributes(&entry)
                }
                None => self.lookup_backing(&parent, name),
            },
        }
    }

    /// The kernel dropped `nlookup` references to `ino`
    pub fn forget(&self, ino: u64, nlookup: u64) {
        if self.inodes.forget(ino, nlookup) {
            debug!("evicted inode {}", ino);
        }
    }

    /// Replace on-disk inode numbers in a backing listing of `dir` with the
    /// overlay's own; names the kernel has not looked up get `UNKNOWN_INO`
    fn renumber(&self, dir: &InodeEntry, mut entries: Vec<BackingDirEntry>) -> Vec<BackingDirEntry> {
        let parent_ino = self.parent_ino(dir);
        for entry in &mut entries {
            entry.ino = if entry.name == "." {
                dir.ino
            } else if entry.name == ".." {
                parent_ino
            } else {
                self.inodes
                    .get_by_path(&dir.path.join(&entry.name))
                    .map(|known| known.ino)
                    .unwrap_or(UNKNOWN_INO)
            };
        }
        entries
    }

    pub fn getattr(&self, ino: u64) -> Result<FileAttr> {
        let entry = self.entry(ino)?;
        self.attributes(&entry)
    }

    pub fn setattr(&self, ino: u64, changes: &SetAttr, fh: Option<u64>) -> Result<FileAttr> {
        let entry = self.entry(ino)?;
        match &entry.node {
            OverlayNode::Passthrough => {
                let handle = fh.and_then(|fh| self.handles.get(fh));
                let file = match handle.as_deref() {
                    Some(OpenFile::Backing(file)) => Some(file),
                    _ => None,
                };
                let meta = self.backing.setattr(&entry.path, changes, file)?;
                Ok(from_metadata(entry.ino, &meta))
            }
            OverlayNode::Leaf(leaf) => Ok(self.leaf_attributes(entry.ino, leaf, &leaf.snapshot())),
            OverlayNode::Directory(_) => match self.backing.metadata(&entry.path) {
                Ok(meta) if meta.is_dir() => {
                    let meta = self.backing.setattr(&entry.path, changes, None)?;
                    Ok(from_metadata(entry.ino, &meta))
                }
                other => self.directory_attributes(entry.ino, other),
            },
        }
    }

    pub fn open(&self, ino: u64, flags: i32) -> Result<Opened> {
        let entry = self.entry(ino)?;
        match &entry.node {
            OverlayNode::Passthrough => {
                let file = self.backing.open(&entry.path, flags)?;
                Ok(Opened {
                    fh: self.handles.open(OpenFile::Backing(file)),
                    flags: FOPEN_DIRECT_IO,
                })
            }
            OverlayNode::Leaf(leaf) => Ok(Opened {
                fh: self.handles.open(OpenFile::synthetic(leaf.clone())),
                flags: FOPEN_DIRECT_IO | FOPEN_NONSEEKABLE,
            }),
            OverlayNode::Directory(_) => Err(Error::IsADirectory),
        }
    }

    pub fn read(&self, fh: u64, offset: i64, size: u32) -> Result<Bytes> {
        let handle = self.handle(fh)?;
        let offset = u64::try_from(offset)
            .map_err(|_| Error::InvalidArgument(format!("negative read offset {}", offset)))?;

        match handle.as_ref() {
            OpenFile::Backing(file) => Ok(Bytes::from(self.backing.read(file, offset, size)?)),
            OpenFile::Synthetic { content, .. } => match content {
                Content::Data(data) => Ok(read_window(data, offset, size)),
                Content::Failed(errno) => Err(Error::Io(io::Error::from_raw_os_error(*errno))),
            },
        }
    }

    /// Write `data` at `offset`; synthetic files only take whole writes at 0
    pub fn write(&self, fh: u64, offset: i64, data: &[u8]) -> Result<u32> {
        let handle = self.handle(fh)?;
        match handle.as_ref() {
            OpenFile::Backing(file) => {
                let offset = u64::try_from(offset).map_err(|_| {
                    Error::InvalidArgument(format!("negative write offset {}", offset))
                })?;
                let written = self.backing.write(file, offset, data)?;
                Ok(written as u32)
            }
            OpenFile::Synthetic { leaf, .. } => {
                if offset != 0 {
                    return Err(Error::InvalidArgument(format!(
                        "synthetic files only accept writes at offset 0, got {}",
                        offset
                    )));
                }
                leaf.store(data)?;
                Ok(data.len() as u32)
            }
        }
    }

    pub fn flush(&self, fh: u64) -> Result<()> {
        self.handle(fh).map(|_| ())
    }

    pub fn fsync(&self, fh: u64, datasync: bool) -> Result<()> {
        match self.handle(fh)?.as_ref() {
            OpenFile::Backing(file) if datasync => Ok(file.sync_data()?),
            OpenFile::Backing(file) => Ok(file.sync_all()?),
            OpenFile::Synthetic { .. } => Ok(()),
        }
    }

    pub fn release(&self, fh: u64) -> Result<()> {
        self.handles
            .close(fh)
            .map(|_| ())
            .ok_or(Error::InvalidHandle(fh))
    }

    pub fn opendir(&self, ino: u64) -> Result<()> {
        let entry = self.entry(ino)?;
        match &entry.node {
            OverlayNode::Passthrough => {
                if self.backing.metadata(&entry.path)?.is_dir() {
                    Ok(())
                } else {
                    Err(Error::NotADirectory)
                }
            }
            OverlayNode::Leaf(_) => Err(Error::NotADirectory),
            OverlayNode::Directory(_) => Ok(()),
        }
    }

    /// A fresh listing of the directory at `ino`
    pub fn readdir(&self, ino: u64) -> Result<Listing<'_>> {
        let entry = self.entry(ino)?;
        match &entry.node {
            OverlayNode::Passthrough => {
                let entries = self.renumber(&entry, self.backing.readdir(&entry.path)?);
                Ok(Box::new(
                    entries
                        .into_iter()
                        .map(|e| -> Result<DirEntry> { Ok(e.into()) }),
                ))
            }
            OverlayNode::Leaf(_) => Err(Error::NotADirectory),
            OverlayNode::Directory(dir) => {
                let backing = match self.backing.readdir(&entry.path) {
                    Ok(entries) => Some(self.renumber(&entry, entries)),
                    Err(e) => {
                        debug!("no backing listing for {:?}: {}", entry.path, e);
                        None
                    }
                };
                Ok(Box::new(MergedListing::new(
                    backing,
                    dir.clone(),
                    &entry.path,
                    entry.ino,
                    self.parent_ino(&entry),
                    self,
                )))
            }
        }
    }

    pub fn getxattr(&self, ino: u64, name: &OsStr) -> Result<Vec<u8>> {
        let entry = self.entry(ino)?;
        match &entry.node {
            OverlayNode::Passthrough => self.backing.getxattr(&entry.path, name),
            _ => Err(Error::NoData),
        }
    }

    pub fn listxattr(&self, ino: u64) -> Result<Vec<u8>> {
        let entry = self.entry(ino)?;
        match &entry.node {
            OverlayNode::Passthrough => self.backing.listxattr(&entry.path),
            _ => Err(Error::NoData),
        }
    }

    pub fn setxattr(&self, ino: u64, name: &OsStr, value: &[u8], flags: i32) -> Result<()> {
        let entry = self.passthrough(ino, "setxattr")?;
        self.backing.setxattr(&entry.path, name, value, flags)
    }

    pub fn removexattr(&self, ino: u64, name: &OsStr) -> Result<()> {
        let entry = self.passthrough(ino, "removexattr")?;
        self.backing.removexattr(&entry.path, name)
    }

    pub fn readlink(&self, ino: u64) -> Result<PathBuf> {
        let entry = self.entry(ino)?;
        match &entry.node {
            OverlayNode::Passthrough => self.backing.readlink(&entry.path),
            OverlayNode::Leaf(_) => Err(Error::NotALink),
            OverlayNode::Directory(_) => Err(Error::InvalidArgument(format!(
                "{:?} is a synthetic directory",
                entry.path
            ))),
        }
    }

    /// The entry for `ino`, which must not be synthetic
    fn passthrough(&self, ino: u64, op: &str) -> Result<InodeEntry> {
        let entry = self.entry(ino)?;
        if entry.node.is_synthetic() {
            return Err(Error::PermissionDenied(format!(
                "{} on synthetic {} {:?}",
                op,
                entry.node.kind_name(),
                entry.path
            )));
        }
        Ok(entry)
    }

    pub fn mkdir(&self, parent: u64, name: &OsStr, mode: u32, umask: u32) -> Result<FileAttr> {
        let parent = self.passthrough(parent, "mkdir")?;
        let path = parent.path.join(name);
        let meta = self.backing.mkdir(&path, mode & !umask)?;
        Ok(self.register(path, &meta))
    }

    pub fn mknod(&self, parent: u64, name: &OsStr, mode: u32, umask: u32, rdev: u32) -> Result<FileAttr> {
        let parent = self.passthrough(parent, "mknod")?;
        let path = parent.path.join(name);
        let meta = self.backing.mknod(&path, mode & !umask, rdev)?;
        Ok(self.register(path, &meta))
    }

    pub fn create(
        &self,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        flags: i32,
    ) -> Result<(FileAttr, Opened)> {
        let parent = self.passthrough(parent, "create")?;
        let path = parent.path.join(name);
        let file = self.backing.create(&path, mode & !umask, flags)?;
        let meta = file.metadata()?;
        let attr = self.register(path, &meta);
        let opened = Opened {
            fh: self.handles.open(OpenFile::Backing(file)),
            flags: FOPEN_DIRECT_IO,
        };
        Ok((attr, opened))
    }

    pub fn symlink(&self, parent: u64, name: &OsStr, target: &Path) -> Result<FileAttr> {
        let parent = self.passthrough(parent, "symlink")?;
        let path = parent.path.join(name);
        let meta = self.backing.symlink(&path, target)?;
        Ok(self.register(path, &meta))
    }

    pub fn link(&self, ino: u64, newparent: u64, newname: &OsStr) -> Result<FileAttr> {
        let source = self.passthrough(ino, "link")?;
        let parent = self.passthrough(newparent, "link")?;
        let path = parent.path.join(newname);
        let meta = self.backing.link(&source.path, &path)?;
        Ok(self.register(path, &meta))
    }

    pub fn unlink(&self, parent: u64, name: &OsStr) -> Result<()> {
        let parent = self.passthrough(parent, "unlink")?;
        let path = parent.path.join(name);
        self.backing.unlink(&path)?;
        self.inodes.invalidate_path(&path);
        Ok(())
    }

    pub fn rmdir(&self, parent: u64, name: &OsStr) -> Result<()> {
        let parent = self.passthrough(parent, "rmdir")?;
        let path = parent.path.join(name);
        self.backing.rmdir(&path)?;
        self.inodes.invalidate_path(&path);
        Ok(())
    }

    pub fn rename(
        &self,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        flags: u32,
    ) -> Result<()> {
        let from_parent = self.passthrough(parent, "rename")?;
        let to_parent = self.passthrough(newparent, "rename")?;
        if flags != 0 {
            return Err(Error::InvalidArgument(format!(
                "unsupported rename flags {:#x}",
                flags
            )));
        }

        let from = from_parent.path.join(name);
        let to = to_parent.path.join(newname);
        self.backing.rename(&from, &to)?;
        self.inodes.rename_path(&from, &to);
        Ok(())
    }

    /// Permission bits are checked by the kernel (`default_permissions`)
    pub fn access(&self, ino: u64) -> Result<()> {
        if self.inodes.exists(ino) {
            Ok(())
        } else {
            Err(Error::InodeNotFound(ino))
        }
    }

    pub fn statfs(&self) -> Result<StatFs> {
        self.backing.statfs()
    }
}

impl ChildAttributes for OverlayFs {
    fn child_attributes(&self, path: PathBuf, node: &OverlayNode) -> Result<FileAttr> {
        let entry = self.inodes.intern(path, node.clone());
        self.attributes(&entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fuser::FileType;
    use std::fs;
    use tempfile::TempDir;

    const CONFIG: &str = r#"
files:
  - path: net/iface0/mtu
    type: integer
    config: { min: 0, max: 9000, current: 1500 }
  - path: power/state
    type: choice
    config: { choices: [a, b, c], selected: b }
  - path: mtu
    type: integer
    config: { current: 42 }
  - path: virtual/only/here
    type: fixed
    config: { value: "hello\n" }
  - path: cached
    type: choice
    cache: true
    config: { choices: [fast, slow] }
"#;

    fn setup() -> (TempDir, OverlayFs) {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("log.txt"), b"real log\n").unwrap();
        fs::create_dir_all(dir.path().join("net/iface0")).unwrap();
        fs::write(dir.path().join("net/iface0/address"), b"00:11:22\n").unwrap();
        fs::create_dir(dir.path().join("data")).unwrap();

        let config = Config::parse(CONFIG).unwrap();
        let overlay = OverlayFs::from_config(&config, dir.path()).unwrap();
        (dir, overlay)
    }

    fn resolve(fs: &OverlayFs, path: &str) -> Result<FileAttr> {
        let mut attr = fs.getattr(ROOT_INO)?;
        for name in path.split('/') {
            attr = fs.lookup(attr.ino, OsStr::new(name))?;
        }
        Ok(attr)
    }

    fn read_all(fs: &OverlayFs, path: &str) -> Result<Vec<u8>> {
        let attr = resolve(fs, path)?;
        let opened = fs.open(attr.ino, libc::O_RDONLY)?;
        let data = fs.read(opened.fh, 0, 4096);
        fs.release(opened.fh)?;
        Ok(data?.to_vec())
    }

    fn write_all(fs: &OverlayFs, path: &str, data: &[u8]) -> Result<u32> {
        let attr = resolve(fs, path)?;
        let opened = fs.open(attr.ino, libc::O_WRONLY)?;
        let written = fs.write(opened.fh, 0, data);
        fs.release(opened.fh)?;
        written
    }

    fn list(fs: &OverlayFs, path: &str) -> Vec<DirEntry> {
        let ino = if path.is_empty() {
            ROOT_INO
        } else {
            resolve(fs, path).unwrap().ino
        };
        fs.opendir(ino).unwrap();
        fs.readdir(ino).unwrap().collect::<Result<_>>().unwrap()
    }

    fn names(entries: &[DirEntry]) -> Vec<String> {
        let mut names: Vec<String> = entries
            .iter()
            .map(|e| e.name.to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_integer_scenario() {
        let (_dir, fs) = setup();
        assert_eq!(read_all(&fs, "net/iface0/mtu").unwrap(), b"1500\n");

        assert_eq!(write_all(&fs, "net/iface0/mtu", b"2000").unwrap(), 4);
        assert_eq!(read_all(&fs, "net/iface0/mtu").unwrap(), b"2000\n");

        let err = write_all(&fs, "net/iface0/mtu", b"9999").unwrap_err();
        assert_eq!(err.to_errno(), libc::EINVAL);
        assert_eq!(read_all(&fs, "net/iface0/mtu").unwrap(), b"2000\n");

        let err = write_all(&fs, "net/iface0/mtu", b"abc").unwrap_err();
        assert_eq!(err.to_errno(), libc::EINVAL);
    }

    #[test]
    fn test_choice_scenario() {
        let (_dir, fs) = setup();
        assert_eq!(read_all(&fs, "power/state").unwrap(), b"a [b] c\n");

        write_all(&fs, "power/state", b"c\n").unwrap();
        assert_eq!(read_all(&fs, "power/state").unwrap(), b"a b [c]\n");

        assert!(write_all(&fs, "power/state", b"z").is_err());
        assert_eq!(read_all(&fs, "power/state").unwrap(), b"a b [c]\n");
    }

    #[test]
    fn test_nonzero_offset_write_rejected() {
        let (_dir, fs) = setup();
        let attr = resolve(&fs, "net/iface0/mtu").unwrap();
        let opened = fs.open(attr.ino, libc::O_WRONLY).unwrap();

        let err = fs.write(opened.fh, 1, b"2000").unwrap_err();
        assert_eq!(err.to_errno(), libc::EINVAL);
        fs.release(opened.fh).unwrap();

        assert_eq!(read_all(&fs, "net/iface0/mtu").unwrap(), b"1500\n");
    }

    #[test]
    fn test_read_window_and_snapshot() {
        let (_dir, fs) = setup();
        let attr = resolve(&fs, "net/iface0/mtu").unwrap();
        let opened = fs.open(attr.ino, libc::O_RDWR).unwrap();
        assert_eq!(opened.flags, FOPEN_DIRECT_IO | FOPEN_NONSEEKABLE);

        assert_eq!(&fs.read(opened.fh, 2, 10).unwrap()[..], b"00\n");
        assert!(fs.read(opened.fh, 5, 10).unwrap().is_empty());
        assert!(fs.read(opened.fh, 100, 10).unwrap().is_empty());

        // Writes through another handle do not disturb this snapshot
        write_all(&fs, "net/iface0/mtu", b"1400").unwrap();
        assert_eq!(&fs.read(opened.fh, 0, 10).unwrap()[..], b"1500\n");
        fs.release(opened.fh).unwrap();
    }

    #[test]
    fn test_cached_leaf_refreshes_on_write() {
        let (_dir, fs) = setup();
        assert_eq!(read_all(&fs, "cached").unwrap(), b"[fast] slow\n");
        write_all(&fs, "cached", b"slow").unwrap();
        assert_eq!(read_all(&fs, "cached").unwrap(), b"fast [slow]\n");
    }

    #[test]
    fn test_leaf_attributes() {
        let (_dir, fs) = setup();
        let attr = resolve(&fs, "net/iface0/mtu").unwrap();
        assert_eq!(attr.kind, FileType::RegularFile);
        assert_eq!(attr.perm, 0o644);
        assert_eq!(attr.size, 5);

        write_all(&fs, "net/iface0/mtu", b"900").unwrap();
        let attr = fs.getattr(attr.ino).unwrap();
        assert_eq!(attr.size, 4);
        assert!(attr.mtime >= fs.attrs.start_time - std::time::Duration::from_secs(1));

        let echoed = fs.setattr(attr.ino, &SetAttr::default(), None).unwrap();
        assert_eq!(echoed.size, 4);
    }

    #[test]
    fn test_merged_listing() {
        let (_dir, fs) = setup();
        let entries = list(&fs, "");
        assert_eq!(
            names(&entries),
            vec![".", "..", "cached", "data", "log.txt", "mtu", "net", "power", "virtual"]
        );

        let log = entries.iter().find(|e| e.name == "log.txt").unwrap();
        let mtu = entries.iter().find(|e| e.name == "mtu").unwrap();
        assert_eq!(log.kind, FileType::RegularFile);
        assert_eq!(mtu.kind, FileType::RegularFile);

        let iface = list(&fs, "net/iface0");
        assert_eq!(names(&iface), vec![".", "..", "address", "mtu"]);
    }

    #[test]
    fn test_synthetic_shadows_backing() {
        let (dir, fs) = setup();
        fs::write(dir.path().join("net/iface0/mtu"), b"real\n").unwrap();

        let entries = list(&fs, "net/iface0");
        assert_eq!(names(&entries), vec![".", "..", "address", "mtu"]);
        assert_eq!(read_all(&fs, "net/iface0/mtu").unwrap(), b"1500\n");
    }

    #[test]
    fn test_virtual_directory() {
        let (_dir, fs) = setup();
        let attr = resolve(&fs, "virtual/only").unwrap();
        assert_eq!(attr.kind, FileType::Directory);
        assert_eq!(attr.perm, 0o755);

        let entries = list(&fs, "virtual/only");
        assert_eq!(names(&entries), vec![".", "..", "here"]);
        assert_eq!(entries[0].ino, attr.ino);
        assert_eq!(read_all(&fs, "virtual/only/here").unwrap(), b"hello\n");
    }

    #[test]
    fn test_passthrough_read_write() {
        let (dir, fs) = setup();
        assert_eq!(read_all(&fs, "log.txt").unwrap(), b"real log\n");
        assert_eq!(read_all(&fs, "net/iface0/address").unwrap(), b"00:11:22\n");

        let attr = resolve(&fs, "log.txt").unwrap();
        let opened = fs.open(attr.ino, libc::O_RDWR).unwrap();
        assert_eq!(opened.flags, FOPEN_DIRECT_IO);
        fs.write(opened.fh, 5, b"LOG").unwrap();
        fs.fsync(opened.fh, false).unwrap();
        fs.release(opened.fh).unwrap();

        assert_eq!(fs::read(dir.path().join("log.txt")).unwrap(), b"real LOG\n");
    }

    #[test]
    fn test_passthrough_mutations() {
        let (dir, fs) = setup();
        let data = resolve(&fs, "data").unwrap();

        let sub = fs.mkdir(data.ino, OsStr::new("sub"), 0o755, 0o022).unwrap();
        assert_eq!(sub.kind, FileType::Directory);

        let (file, opened) = fs
            .create(sub.ino, OsStr::new("f"), 0o644, 0o022, libc::O_WRONLY)
            .unwrap();
        fs.write(opened.fh, 0, b"xyz").unwrap();
        fs.release(opened.fh).unwrap();
        assert_eq!(fs::read(dir.path().join("data/sub/f")).unwrap(), b"xyz");

        fs.rename(sub.ino, OsStr::new("f"), data.ino, OsStr::new("g"), 0)
            .unwrap();
        assert_eq!(fs.getattr(file.ino).unwrap().size, 3);
        assert!(dir.path().join("data/g").exists());

        fs.unlink(data.ino, OsStr::new("g")).unwrap();
        assert!(fs.getattr(file.ino).is_err());
        fs.rmdir(data.ino, OsStr::new("sub")).unwrap();
        assert!(!dir.path().join("data/sub").exists());
    }

    #[test]
    fn test_structural_mutation_on_synthetic_denied() {
        let (dir, fs) = setup();
        let root = ROOT_INO;
        let iface = resolve(&fs, "net/iface0").unwrap().ino;
        let mtu = resolve(&fs, "net/iface0/mtu").unwrap().ino;
        let data = resolve(&fs, "data").unwrap().ino;
        let eperm = |r: Result<FileAttr>| r.unwrap_err().to_errno();

        assert_eq!(eperm(fs.mkdir(iface, OsStr::new("x"), 0o755, 0)), libc::EPERM);
        assert_eq!(eperm(fs.mkdir(root, OsStr::new("x"), 0o755, 0)), libc::EPERM);
        assert_eq!(eperm(fs.mknod(mtu, OsStr::new("x"), 0o644, 0, 0)), libc::EPERM);
        assert_eq!(
            eperm(fs.symlink(iface, OsStr::new("x"), Path::new("mtu"))),
            libc::EPERM
        );
        assert_eq!(eperm(fs.link(mtu, data, OsStr::new("x"))), libc::EPERM);
        assert_eq!(
            fs.create(iface, OsStr::new("x"), 0o644, 0, libc::O_WRONLY)
                .unwrap_err()
                .to_errno(),
            libc::EPERM
        );
        assert_eq!(fs.unlink(iface, OsStr::new("mtu")).unwrap_err().to_errno(), libc::EPERM);
        assert_eq!(fs.unlink(iface, OsStr::new("address")).unwrap_err().to_errno(), libc::EPERM);
        assert_eq!(fs.rmdir(root, OsStr::new("net")).unwrap_err().to_errno(), libc::EPERM);
        assert_eq!(
            fs.rename(iface, OsStr::new("mtu"), data, OsStr::new("m"), 0)
                .unwrap_err()
                .to_errno(),
            libc::EPERM
        );

        assert!(dir.path().join("net/iface0/address").exists());
        assert!(!dir.path().join("net/iface0/x").exists());
        assert_eq!(read_all(&fs, "net/iface0/mtu").unwrap(), b"1500\n");
    }

    #[test]
    fn test_wrong_kind_errors() {
        let (_dir, fs) = setup();
        let mtu = resolve(&fs, "net/iface0/mtu").unwrap().ino;
        let iface = resolve(&fs, "net/iface0").unwrap().ino;

        assert_eq!(fs.lookup(mtu, OsStr::new("x")).unwrap_err().to_errno(), libc::ENOTDIR);
        assert_eq!(fs.opendir(mtu).unwrap_err().to_errno(), libc::ENOTDIR);
        assert!(fs.readdir(mtu).is_err());
        assert_eq!(fs.open(iface, libc::O_RDONLY).unwrap_err().to_errno(), libc::EISDIR);
        assert_eq!(fs.readlink(mtu).unwrap_err().to_errno(), libc::ENOLINK);
        assert_eq!(fs.readlink(iface).unwrap_err().to_errno(), libc::EINVAL);
        assert_eq!(fs.lookup(iface, OsStr::new("nope")).unwrap_err().to_errno(), libc::ENOENT);
        assert_eq!(fs.getattr(9999).unwrap_err().to_errno(), libc::ENOENT);
        assert_eq!(fs.read(9999, 0, 1).unwrap_err().to_errno(), libc::EBADF);
    }

    #[test]
    fn test_xattrs_on_synthetic_nodes() {
        let (_dir, fs) = setup();
        let mtu = resolve(&fs, "net/iface0/mtu").unwrap().ino;
        let name = OsStr::new("user.test");

        assert_eq!(fs.getxattr(mtu, name).unwrap_err().to_errno(), libc::ENODATA);
        assert_eq!(fs.listxattr(ROOT_INO).unwrap_err().to_errno(), libc::ENODATA);
        assert_eq!(fs.setxattr(mtu, name, b"v", 0).unwrap_err().to_errno(), libc::EPERM);
        assert_eq!(fs.removexattr(ROOT_INO, name).unwrap_err().to_errno(), libc::EPERM);
    }

    #[test]
    fn test_xattrs_on_backing_files() {
        let (_dir, fs) = setup();
        let log = resolve(&fs, "log.txt").unwrap().ino;
        let name = OsStr::new("user.origin");

        match fs.setxattr(log, name, b"disk", 0) {
            Ok(()) => {}
            Err(e) if e.to_errno() == libc::ENOTSUP => return,
            Err(e) => panic!("setxattr failed: {}", e),
        }
        assert_eq!(fs.getxattr(log, name).unwrap(), b"disk");
        let listed = fs.listxattr(log).unwrap();
        assert!(listed.split(|b| *b == 0).any(|entry| entry == b"user.origin"));
        fs.removexattr(log, name).unwrap();
        assert_eq!(fs.getxattr(log, name).unwrap_err().to_errno(), libc::ENODATA);
    }

    #[test]
    fn test_inode_numbers_stable() {
        let (_dir, fs) = setup();
        let first = resolve(&fs, "net/iface0/mtu").unwrap().ino;
        let listed = list(&fs, "net/iface0");
        let mtu = listed.iter().find(|e| e.name == "mtu").unwrap();
        assert_eq!(mtu.ino, first);
        assert_eq!(resolve(&fs, "net/iface0/mtu").unwrap().ino, first);
    }

    #[test]
    fn test_forget_evicts_passthrough_only() {
        let (_dir, fs) = setup();
        let log = resolve(&fs, "log.txt").unwrap().ino;
        assert_eq!(resolve(&fs, "log.txt").unwrap().ino, log);

        fs.forget(log, 1);
        assert!(fs.getattr(log).is_ok());
        fs.forget(log, 1);
        assert_eq!(fs.getattr(log).unwrap_err().to_errno(), libc::ENOENT);
        assert_ne!(resolve(&fs, "log.txt").unwrap().ino, log);

        let mtu = resolve(&fs, "mtu").unwrap().ino;
        fs.forget(mtu, 1);
        fs.forget(ROOT_INO, 1);
        assert!(fs.getattr(mtu).is_ok());
        assert!(fs.getattr(ROOT_INO).is_ok());
        assert_eq!(resolve(&fs, "mtu").unwrap().ino, mtu);
    }

    #[test]
    fn test_listing_uses_overlay_inodes() {
        let (_dir, fs) = setup();
        let log = resolve(&fs, "log.txt").unwrap().ino;
        let root = list(&fs, "");
        let find = |entries: &[DirEntry], name: &str| {
            entries.iter().find(|e| e.name == name).unwrap().ino
        };
        assert_eq!(find(&root, "."), ROOT_INO);
        assert_eq!(find(&root, ".."), ROOT_INO);
        assert_eq!(find(&root, "log.txt"), log);
        assert_eq!(find(&root, "data"), UNKNOWN_INO);

        let data = resolve(&fs, "data").unwrap().ino;
        fs::write(fs.backing().resolve(Path::new("data/new")), b"x").unwrap();
        let inner = list(&fs, "data");
        assert_eq!(find(&inner, "."), data);
        assert_eq!(find(&inner, ".."), ROOT_INO);
        assert_eq!(find(&inner, "new"), UNKNOWN_INO);
    }

    #[test]
    fn test_handles_released() {
        let (_dir, fs) = setup();
        read_all(&fs, "power/state").unwrap();
        read_all(&fs, "log.txt").unwrap();
        assert_eq!(fs.open_handles(), 0);
        assert!(fs.release(12345).is_err());
    }

    #[test]
    fn test_access_and_statfs() {
        let (_dir, fs) = setup();
        fs.access(ROOT_INO).unwrap();
        assert!(fs.access(9999).is_err());
        assert!(fs.statfs().unwrap().bsize > 0);
    }

    #[test]
    fn test_colliding_config_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::parse(
            "files:\n  - {path: a/b, type: integer}\n  - {path: a/b/c, type: integer}\n",
        )
        .unwrap();
        assert!(matches!(
            OverlayFs::from_config(&config, dir.path()),
            Err(Error::PathCollision(_))
        ));

        let bad = Config::parse("files:\n  - {path: a, type: choice, config: {choices: []}}\n").unwrap();
        assert!(matches!(
            OverlayFs::from_config(&bad, dir.path()),
            Err(Error::InvalidConfig(_))
        ));
    }
}
