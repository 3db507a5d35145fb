//! Attribute conversion and synthesis

use fuser::{FileAttr, FileType};
use std::fs::Metadata;
use std::time::{Duration, SystemTime};

/// Block size reported for synthetic nodes
pub const BLOCK_SIZE: u32 = 4096;

/// Permission bits of synthetic leaves
pub const LEAF_PERM: u16 = 0o644;

/// Permission bits of synthetic directories
pub const DIR_PERM: u16 = 0o755;

/// Owner and timestamps shared by every synthesized attribute.
///
/// Captured once at startup and handed to the overlay, so that all synthetic
/// nodes report the same creation time for the mount's lifetime.
#[derive(Debug, Clone, Copy)]
pub struct AttrTemplate {
    pub start_time: SystemTime,
    pub uid: u32,
    pub gid: u32,
}

impl AttrTemplate {
    /// Template owned by `uid:gid`, stamped with the current time
    pub fn new(uid: u32, gid: u32) -> Self {
        Self {
            start_time: SystemTime::now(),
            uid,
            gid,
        }
    }

    /// Template owned by the running process
    pub fn current_user() -> Self {
        Self::new(nix::unistd::getuid().as_raw(), nix::unistd::getgid().as_raw())
    }

    fn base(&self, ino: u64, kind: FileType, perm: u16) -> FileAttr {
        FileAttr {
            ino,
            size: 0,
            blocks: 1,
            atime: self.start_time,
            mtime: self.start_time,
            ctime: self.start_time,
            crtime: self.start_time,
            kind,
            perm,
            nlink: 1,
            uid: self.uid,
            gid: self.gid,
            rdev: 0,
            blksize: BLOCK_SIZE,
            flags: 0,
        }
    }

    /// Attributes of a synthetic directory
    pub fn directory(&self, ino: u64) -> FileAttr {
        let mut attr = self.base(ino, FileType::Directory, DIR_PERM);
        attr.nlink = 2;
        attr
    }

    /// Attributes of a synthetic leaf.
    ///
    /// `size` is `None` when the handler failed to produce content.
    /// `modified` replaces atime and mtime once the leaf has been written.
    pub fn leaf(&self, ino: u64, size: Option<u64>, modified: Option<SystemTime>) -> FileAttr {
        let mut attr = self.base(ino, FileType::RegularFile, LEAF_PERM);
        if let Some(modified) = modified {
            attr.atime = modified;
            attr.mtime = modified;
        }
        if let Some(size) = size {
            attr.size = size;
            attr.blocks = size / u64::from(BLOCK_SIZE) + 1;
        }
        attr
    }
}

/// Map a backing-store file type to the kernel's file type
pub fn file_kind(ft: std::fs::FileType) -> FileType {
    use std::os::unix::fs::FileTypeExt;

    if ft.is_dir() {
        FileType::Directory
    } else if ft.is_symlink() {
        FileType::Symlink
    } else if ft.is_block_device() {
        FileType::BlockDevice
    } else if ft.is_char_device() {
        FileType::CharDevice
    } else if ft.is_fifo() {
        FileType::NamedPipe
    } else if ft.is_socket() {
        FileType::Socket
    } else {
        FileType::RegularFile
    }
}

/// Real attributes of a backing-store entry, renumbered to the overlay inode
pub fn from_metadata(ino: u64, meta: &Metadata) -> FileAttr {
    use std::os::unix::fs::MetadataExt;

    FileAttr {
        ino,
        size: meta.len(),
        blocks: meta.blocks(),
        atime: timestamp(meta.atime(), meta.atime_nsec()),
        mtime: timestamp(meta.mtime(), meta.mtime_nsec()),
        ctime: timestamp(meta.ctime(), meta.ctime_nsec()),
        crtime: meta.created().unwrap_or(SystemTime::UNIX_EPOCH),
        kind: file_kind(meta.file_type()),
        perm: (meta.mode() & 0o7777) as u16,
        nlink: meta.nlink() as u32,
        uid: meta.uid(),
        gid: meta.gid(),
        rdev: meta.rdev() as u32,
        blksize: meta.blksize() as u32,
        flags: 0,
    }
}

fn timestamp(secs: i64, nsecs: i64) -> SystemTime {
    if secs >= 0 {
        SystemTime::UNIX_EPOCH + Duration::new(secs as u64, nsecs as u32)
    } else {
        SystemTime::UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs())
    }
}
