//! FUSE adapter for the overlay
//!
//! Translates kernel requests into `OverlayFs` calls and their results into
//! replies. All filesystem semantics live in `OverlayFs`.

use fuser::{
    Filesystem, MountOption, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory, ReplyEmpty,
    ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, ReplyXattr, Request, TimeOrNow,
};
use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, info};

use super::backing::SetAttr;
use super::overlay::OverlayFs;
use crate::error::{Error, Result};

const TTL: Duration = Duration::from_secs(1);

/// Name reported in the mount table
pub const FS_NAME: &str = "fakerfs";

/// Options passed to the kernel at mount time
#[derive(Debug, Clone, Default)]
pub struct MountConfig {
    /// Let users other than the mounter access the filesystem
    pub allow_other: bool,
}

impl MountConfig {
    pub fn options(&self) -> Vec<MountOption> {
        let mut options = vec![
            MountOption::FSName(FS_NAME.to_string()),
            MountOption::Subtype(FS_NAME.to_string()),
            MountOption::DefaultPermissions,
        ];
        if self.allow_other {
            options.push(MountOption::AllowOther);
        }
        options
    }
}

/// `fuser::Filesystem` implementation over a shared `OverlayFs`
pub struct FuseOverlay {
    fs: Arc<OverlayFs>,
}

impl FuseOverlay {
    pub fn new(fs: Arc<OverlayFs>) -> Self {
        Self { fs }
    }

    /// Mount at `target`, call `ready` once the kernel accepted the mount,
    /// then serve requests until unmounted
    pub fn mount(self, target: &Path, config: &MountConfig, ready: impl FnOnce()) -> Result<()> {
        info!("mounting {} at {}", FS_NAME, target.display());
        let mut session = fuser::Session::new(self, target, &config.options())
            .map_err(|e| Error::Internal(format!("mount at {} failed: {}", target.display(), e)))?;
        ready();
        session
            .run()
            .map_err(|e| Error::Internal(format!("serving {} failed: {}", target.display(), e)))?;
        info!("unmounted {}", target.display());
        Ok(())
    }
}

fn reply_entry(reply: ReplyEntry, result: Result<fuser::FileAttr>) {
    match result {
        Ok(attr) => reply.entry(&TTL, &attr, 0),
        Err(e) => {
            debug!("entry reply failed: {}", e);
            reply.error(e.to_errno());
        }
    }
}

fn reply_empty(reply: ReplyEmpty, result: Result<()>) {
    match result {
        Ok(()) => reply.ok(),
        Err(e) => {
            debug!("reply failed: {}", e);
            reply.error(e.to_errno());
        }
    }
}

/// Size query when `size` is 0, else the value if it fits
fn reply_xattr(reply: ReplyXattr, size: u32, result: Result<Vec<u8>>) {
    match result {
        Ok(value) if size == 0 => reply.size(value.len() as u32),
        Ok(value) if value.len() > size as usize => reply.error(libc::ERANGE),
        Ok(value) => reply.data(&value),
        Err(e) => reply.error(e.to_errno()),
    }
}

impl Filesystem for FuseOverlay {
    fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        debug!("lookup(parent={}, name={:?})", parent, name);
        reply_entry(reply, self.fs.lookup(parent, name));
    }

    fn forget(&mut self, _req: &Request<'_>, ino: u64, nlookup: u64) {
        debug!("forget(ino={}, nlookup={})", ino, nlookup);
        self.fs.forget(ino, nlookup);
    }

    fn batch_forget(&mut self, _req: &Request<'_>, nodes: &[fuser::fuse_forget_one]) {
        debug!("batch_forget(count={})", nodes.len());
        for node in nodes {
            self.fs.forget(node.nodeid, node.nlookup);
        }
    }

    fn getattr(&mut self, _req: &Request, ino: u64, reply: ReplyAttr) {
        debug!("getattr(ino={})", ino);
        match self.fs.getattr(ino) {
            Ok(attr) => reply.attr(&TTL, &attr),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        debug!(
            "setattr(ino={}, mode={:?}, uid={:?}, gid={:?}, size={:?}, fh={:?})",
            ino, mode, uid, gid, size, fh
        );
        let changes = SetAttr {
            mode,
            uid,
            gid,
            size,
            atime,
            mtime,
        };
        match self.fs.setattr(ino, &changes, fh) {
            Ok(attr) => reply.attr(&TTL, &attr),
            Err(e) => {
                debug!("setattr(ino={}) failed: {}", ino, e);
                reply.error(e.to_errno());
            }
        }
    }

    fn readlink(&mut self, _req: &Request, ino: u64, reply: ReplyData) {
        debug!("readlink(ino={})", ino);
        match self.fs.readlink(ino) {
            Ok(target) => reply.data(target.as_os_str().as_bytes()),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn mknod(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        rdev: u32,
        reply: ReplyEntry,
    ) {
        debug!("mknod(parent={}, name={:?}, mode={:o})", parent, name, mode);
        reply_entry(reply, self.fs.mknod(parent, name, mode, umask, rdev));
    }

    fn mkdir(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        reply: ReplyEntry,
    ) {
        debug!("mkdir(parent={}, name={:?}, mode={:o})", parent, name, mode);
        reply_entry(reply, self.fs.mkdir(parent, name, mode, umask));
    }

    fn unlink(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        debug!("unlink(parent={}, name={:?})", parent, name);
        reply_empty(reply, self.fs.unlink(parent, name));
    }

    fn rmdir(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        debug!("rmdir(parent={}, name={:?})", parent, name);
        reply_empty(reply, self.fs.rmdir(parent, name));
    }

    fn symlink(
        &mut self,
        _req: &Request,
        parent: u64,
        link_name: &OsStr,
        target: &Path,
        reply: ReplyEntry,
    ) {
        debug!(
            "symlink(parent={}, name={:?}, target={:?})",
            parent, link_name, target
        );
        reply_entry(reply, self.fs.symlink(parent, link_name, target));
    }

    fn rename(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        flags: u32,
        reply: ReplyEmpty,
    ) {
        debug!(
            "rename(parent={}, name={:?}, newparent={}, newname={:?})",
            parent, name, newparent, newname
        );
        reply_empty(reply, self.fs.rename(parent, name, newparent, newname, flags));
    }

    fn link(
        &mut self,
        _req: &Request,
        ino: u64,
        newparent: u64,
        newname: &OsStr,
        reply: ReplyEntry,
    ) {
        debug!("link(ino={}, newparent={}, newname={:?})", ino, newparent, newname);
        reply_entry(reply, self.fs.link(ino, newparent, newname));
    }

    fn open(&mut self, _req: &Request, ino: u64, flags: i32, reply: ReplyOpen) {
        debug!("open(ino={}, flags={:#x})", ino, flags);
        match self.fs.open(ino, flags) {
            Ok(opened) => reply.opened(opened.fh, opened.flags),
            Err(e) => {
                debug!("open(ino={}) failed: {}", ino, e);
                reply.error(e.to_errno());
            }
        }
    }

    fn read(
        &mut self,
        _req: &Request,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        debug!("read(ino={}, fh={}, offset={}, size={})", ino, fh, offset, size);
        match self.fs.read(fh, offset, size) {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn write(
        &mut self,
        _req: &Request,
        ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        debug!(
            "write(ino={}, fh={}, offset={}, len={})",
            ino,
            fh,
            offset,
            data.len()
        );
        match self.fs.write(fh, offset, data) {
            Ok(written) => reply.written(written),
            Err(e) => {
                debug!("write(ino={}) failed: {}", ino, e);
                reply.error(e.to_errno());
            }
        }
    }

    fn flush(&mut self, _req: &Request, ino: u64, fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        debug!("flush(ino={}, fh={})", ino, fh);
        reply_empty(reply, self.fs.flush(fh));
    }

    fn release(
        &mut self,
        _req: &Request,
        ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        debug!("release(ino={}, fh={})", ino, fh);
        reply_empty(reply, self.fs.release(fh));
    }

    fn fsync(&mut self, _req: &Request, ino: u64, fh: u64, datasync: bool, reply: ReplyEmpty) {
        debug!("fsync(ino={}, fh={}, datasync={})", ino, fh, datasync);
        reply_empty(reply, self.fs.fsync(fh, datasync));
    }

    fn opendir(&mut self, _req: &Request, ino: u64, flags: i32, reply: ReplyOpen) {
        debug!("opendir(ino={}, flags={:#x})", ino, flags);
        match self.fs.opendir(ino) {
            Ok(()) => reply.opened(0, 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        debug!("readdir(ino={}, offset={})", ino, offset);

        let listing = match self.fs.readdir(ino) {
            Ok(listing) => listing,
            Err(e) => {
                reply.error(e.to_errno());
                return;
            }
        };

        // Offsets are positions in the listing; each call replays up to them
        let skip = usize::try_from(offset).unwrap_or(0);
        for (i, entry) in listing.enumerate().skip(skip) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    reply.error(e.to_errno());
                    return;
                }
            };
            if reply.add(entry.ino, (i + 1) as i64, entry.kind, &entry.name) {
                break;
            }
        }
        reply.ok();
    }

    fn releasedir(&mut self, _req: &Request, ino: u64, _fh: u64, _flags: i32, reply: ReplyEmpty) {
        debug!("releasedir(ino={})", ino);
        reply.ok();
    }

    fn statfs(&mut self, _req: &Request, _ino: u64, reply: ReplyStatfs) {
        match self.fs.statfs() {
            Ok(st) => reply.statfs(
                st.blocks, st.bfree, st.bavail, st.files, st.ffree, st.bsize, st.namelen,
                st.frsize,
            ),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn setxattr(
        &mut self,
        _req: &Request,
        ino: u64,
        name: &OsStr,
        value: &[u8],
        flags: i32,
        _position: u32,
        reply: ReplyEmpty,
    ) {
        debug!("setxattr(ino={}, name={:?})", ino, name);
        reply_empty(reply, self.fs.setxattr(ino, name, value, flags));
    }

    fn getxattr(&mut self, _req: &Request, ino: u64, name: &OsStr, size: u32, reply: ReplyXattr) {
        debug!("getxattr(ino={}, name={:?}, size={})", ino, name, size);
        reply_xattr(reply, size, self.fs.getxattr(ino, name));
    }

    fn listxattr(&mut self, _req: &Request, ino: u64, size: u32, reply: ReplyXattr) {
        debug!("listxattr(ino={}, size={})", ino, size);
        reply_xattr(reply, size, self.fs.listxattr(ino));
    }

    fn removexattr(&mut self, _req: &Request, ino: u64, name: &OsStr, reply: ReplyEmpty) {
        debug!("removexattr(ino={}, name={:?})", ino, name);
        reply_empty(reply, self.fs.removexattr(ino, name));
    }

    fn access(&mut self, _req: &Request, ino: u64, mask: i32, reply: ReplyEmpty) {
        debug!("access(ino={}, mask={})", ino, mask);
        reply_empty(reply, self.fs.access(ino));
    }

    fn create(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        debug!("create(parent={}, name={:?}, mode={:o})", parent, name, mode);
        match self.fs.create(parent, name, mode, umask, flags) {
            Ok((attr, opened)) => reply.created(&TTL, &attr, 0, opened.fh, opened.flags),
            Err(e) => {
                debug!("create(parent={}, name={:?}) failed: {}", parent, name, e);
                reply.error(e.to_errno());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mount_options() {
        let options = MountConfig::default().options();
        assert_eq!(options.len(), 3);
        assert!(!options.contains(&MountOption::AllowOther));

        let options = MountConfig { allow_other: true }.options();
        assert!(options.contains(&MountOption::AllowOther));
        assert!(options.contains(&MountOption::FSName(FS_NAME.to_string())));
    }
}
