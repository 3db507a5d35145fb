//! Backing store pass-through
//!
//! Every operation on a path without a synthetic override lands here and is
//! applied to the real directory the overlay is mounted over. Paths are
//! relative to the mount root. Symbolic links are never followed.

use crate::error::{Error, Result};
use filetime::FileTime;
use fuser::{FileType, TimeOrNow};
use libc::{XATTR_CREATE, XATTR_REPLACE};
use std::ffi::{OsStr, OsString};
use std::fs::{self, File, Metadata, OpenOptions, Permissions};
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{
    DirBuilderExt, DirEntryExt, FileExt, MetadataExt, OpenOptionsExt, PermissionsExt,
};
use std::path::{Path, PathBuf};

use super::attr::file_kind;

/// Directory entry read from the backing store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackingDirEntry {
    pub name: OsString,
    pub kind: FileType,
    pub ino: u64,
}

/// Attribute changes requested by a setattr call
#[derive(Debug, Clone, Default)]
pub struct SetAttr {
    pub mode: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub size: Option<u64>,
    pub atime: Option<TimeOrNow>,
    pub mtime: Option<TimeOrNow>,
}

/// Filesystem-wide statistics of the backing store
#[derive(Debug, Clone, Copy)]
pub struct StatFs {
    pub blocks: u64,
    pub bfree: u64,
    pub bavail: u64,
    pub files: u64,
    pub ffree: u64,
    pub bsize: u32,
    pub namelen: u32,
    pub frsize: u32,
}

/// Pass-through interface to the real directory under the mount
pub struct BackingStore {
    root: PathBuf,
}

impl BackingStore {
    /// Open the backing store rooted at `root`, which must be a directory
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let root = fs::canonicalize(root)
            .map_err(|_| Error::PathNotFound(root.to_string_lossy().to_string()))?;
        if !root.is_dir() {
            return Err(Error::InvalidConfig(format!(
                "source {} is not a directory",
                root.display()
            )));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve an overlay path to its backing-store location
    pub fn resolve(&self, path: &Path) -> PathBuf {
        let relative = path.strip_prefix("/").unwrap_or(path);
        if relative.as_os_str().is_empty() {
            self.root.clone()
        } else {
            self.root.join(relative)
        }
    }

    /// lstat
    pub fn metadata(&self, path: &Path) -> Result<Metadata> {
        Ok(fs::symlink_metadata(self.resolve(path))?)
    }

    /// Directory listing, led by `.` and `..`
    pub fn readdir(&self, path: &Path) -> Result<Vec<BackingDirEntry>> {
        let resolved = self.resolve(path);
        let meta = fs::metadata(&resolved)?;
        let parent_ino = resolved
            .parent()
            .and_then(|parent| fs::metadata(parent).ok())
            .map(|m| m.ino())
            .unwrap_or_else(|| meta.ino());

        let mut entries = vec![
            BackingDirEntry {
                name: OsString::from("."),
                kind: FileType::Directory,
                ino: meta.ino(),
            },
            BackingDirEntry {
                name: OsString::from(".."),
                kind: FileType::Directory,
                ino: parent_ino,
            },
        ];

        for entry in fs::read_dir(&resolved)? {
            let entry = entry?;
            entries.push(BackingDirEntry {
                name: entry.file_name(),
                kind: file_kind(entry.file_type()?),
                ino: entry.ino(),
            });
        }

        Ok(entries)
    }

    /// Open an existing file with the kernel's open flags
    pub fn open(&self, path: &Path, flags: i32) -> Result<File> {
        let accmode = flags & libc::O_ACCMODE;
        let mut options = OpenOptions::new();
        options
            .read(accmode == libc::O_RDONLY || accmode == libc::O_RDWR)
            .write(accmode == libc::O_WRONLY || accmode == libc::O_RDWR)
            .custom_flags(flags & !(libc::O_ACCMODE | libc::O_CREAT | libc::O_EXCL | libc::O_NOCTTY));
        Ok(options.open(self.resolve(path))?)
    }

    /// Create and open a new regular file
    pub fn create(&self, path: &Path, mode: u32, flags: i32) -> Result<File> {
        // O_CREAT travels in the custom flags so read-only creates keep working
        let accmode = flags & libc::O_ACCMODE;
        let mut options = OpenOptions::new();
        options
            .read(accmode == libc::O_RDONLY || accmode == libc::O_RDWR)
            .write(accmode == libc::O_WRONLY || accmode == libc::O_RDWR)
            .mode(mode)
            .custom_flags((flags | libc::O_CREAT) & !(libc::O_ACCMODE | libc::O_NOCTTY));
        Ok(options.open(self.resolve(path))?)
    }

    /// Read up to `size` bytes at `offset`; short only at end of file
    pub fn read(&self, file: &File, offset: u64, size: u32) -> Result<Vec<u8>> {
        let mut buffer = vec![0u8; size as usize];
        let mut filled = 0;
        while filled < buffer.len() {
            let n = file.read_at(&mut buffer[filled..], offset + filled as u64)?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buffer.truncate(filled);
        Ok(buffer)
    }

    pub fn write(&self, file: &File, offset: u64, data: &[u8]) -> Result<usize> {
        file.write_all_at(data, offset)?;
        Ok(data.len())
    }

    /// Apply attribute changes, returning the resulting metadata
    pub fn setattr(&self, path: &Path, changes: &SetAttr, file: Option<&File>) -> Result<Metadata> {
        let resolved = self.resolve(path);

        if let Some(mode) = changes.mode {
            fs::set_permissions(&resolved, Permissions::from_mode(mode & 0o7777))?;
        }

        if changes.uid.is_some() || changes.gid.is_some() {
            std::os::unix::fs::lchown(&resolved, changes.uid, changes.gid)?;
        }

        if let Some(size) = changes.size {
            match file {
                Some(file) => file.set_len(size)?,
                None => OpenOptions::new().write(true).open(&resolved)?.set_len(size)?,
            }
        }

        if changes.atime.is_some() || changes.mtime.is_some() {
            let current = fs::symlink_metadata(&resolved)?;
            let atime = changes
                .atime
                .as_ref()
                .map(to_file_time)
                .unwrap_or_else(|| FileTime::from_last_access_time(&current));
            let mtime = changes
                .mtime
                .as_ref()
                .map(to_file_time)
                .unwrap_or_else(|| FileTime::from_last_modification_time(&current));
            filetime::set_symlink_file_times(&resolved, atime, mtime)?;
        }

        Ok(fs::symlink_metadata(&resolved)?)
    }

    pub fn mkdir(&self, path: &Path, mode: u32) -> Result<Metadata> {
        let resolved = self.resolve(path);
        fs::DirBuilder::new().mode(mode).create(&resolved)?;
        Ok(fs::symlink_metadata(&resolved)?)
    }

    pub fn mknod(&self, path: &Path, mode: u32, rdev: u32) -> Result<Metadata> {
        use nix::sys::stat::{Mode, SFlag};

        let resolved = self.resolve(path);
        nix::sys::stat::mknod(
            &resolved,
            SFlag::from_bits_truncate((mode & libc::S_IFMT as u32) as libc::mode_t),
            Mode::from_bits_truncate((mode & 0o7777) as libc::mode_t),
            rdev as libc::dev_t,
        )?;
        Ok(fs::symlink_metadata(&resolved)?)
    }

    pub fn unlink(&self, path: &Path) -> Result<()> {
        Ok(fs::remove_file(self.resolve(path))?)
    }

    pub fn rmdir(&self, path: &Path) -> Result<()> {
        Ok(fs::remove_dir(self.resolve(path))?)
    }

    pub fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        Ok(fs::rename(self.resolve(from), self.resolve(to))?)
    }

    pub fn symlink(&self, path: &Path, target: &Path) -> Result<Metadata> {
        let resolved = self.resolve(path);
        std::os::unix::fs::symlink(target, &resolved)?;
        Ok(fs::symlink_metadata(&resolved)?)
    }

    pub fn link(&self, existing: &Path, new: &Path) -> Result<Metadata> {
        let resolved = self.resolve(new);
        fs::hard_link(self.resolve(existing), &resolved)?;
        Ok(fs::symlink_metadata(&resolved)?)
    }

    pub fn readlink(&self, path: &Path) -> Result<PathBuf> {
        Ok(fs::read_link(self.resolve(path))?)
    }

    pub fn statfs(&self) -> Result<StatFs> {
        let stat = nix::sys::statvfs::statvfs(&self.root)?;
        Ok(StatFs {
            blocks: stat.blocks() as u64,
            bfree: stat.blocks_free() as u64,
            bavail: stat.blocks_available() as u64,
            files: stat.files() as u64,
            ffree: stat.files_free() as u64,
            bsize: stat.block_size() as u32,
            namelen: stat.name_max() as u32,
            frsize: stat.fragment_size() as u32,
        })
    }

    /// Value of attribute `name`; symlinks are not followed
    pub fn getxattr(&self, path: &Path, name: &OsStr) -> Result<Vec<u8>> {
        xattr::get(self.resolve(path), name)?.ok_or(Error::NoData)
    }

    /// Attribute names, each terminated by NUL as listxattr(2) returns them
    pub fn listxattr(&self, path: &Path) -> Result<Vec<u8>> {
        let mut names = Vec::new();
        for name in xattr::list(self.resolve(path))? {
            names.extend_from_slice(name.as_bytes());
            names.push(0);
        }
        Ok(names)
    }

    /// Set attribute `name`, honoring `XATTR_CREATE` and `XATTR_REPLACE`
    pub fn setxattr(&self, path: &Path, name: &OsStr, value: &[u8], flags: i32) -> Result<()> {
        let resolved = self.resolve(path);
        if flags & (XATTR_CREATE | XATTR_REPLACE) != 0 {
            let exists = xattr::get(&resolved, name)?.is_some();
            if flags & XATTR_CREATE != 0 && exists {
                return Err(io::Error::from_raw_os_error(libc::EEXIST).into());
            }
            if flags & XATTR_REPLACE != 0 && !exists {
                return Err(Error::NoData);
            }
        }
        Ok(xattr::set(resolved, name, value)?)
    }

    pub fn removexattr(&self, path: &Path, name: &OsStr) -> Result<()> {
        Ok(xattr::remove(self.resolve(path), name)?)
    }
}

fn to_file_time(time: &TimeOrNow) -> FileTime {
    match time {
        TimeOrNow::SpecificTime(t) => FileTime::from_system_time(*t),
        TimeOrNow::Now => FileTime::now(),
    }
}
