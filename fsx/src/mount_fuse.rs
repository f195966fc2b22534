//! FUSE adapter: serves a mounted image to the kernel through `fuser`.
//!
//! The core is addressed by path while the kernel addresses files by inode
//! number. Kernel inode numbers are the fsx inode numbers themselves (the root
//! is 1 in both), and a map from inode number to path is filled as the kernel
//! looks names up.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory,
    ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, Request, TimeOrNow,
};
use log::{debug, warn};

use crate::device::BlockDevice;
use crate::error::FsError;
use crate::fs_layout::ROOT_INODE;
use crate::mount::{FileStat, FilesystemMount};

// Attribute cache lifetime handed to the kernel.
const TTL: Duration = Duration::from_secs(1);

fn to_time(secs: u32) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(u64::from(secs))
}

fn attr_of(st: &FileStat) -> FileAttr {
    FileAttr {
        ino: u64::from(st.inum),
        size: st.size,
        blocks: st.blocks,
        atime: to_time(st.atime),
        mtime: to_time(st.mtime),
        ctime: to_time(st.ctime),
        crtime: to_time(st.ctime),
        kind: if st.is_dir() {
            FileType::Directory
        } else {
            FileType::RegularFile
        },
        perm: (st.mode & 0o7777) as u16,
        nlink: st.nlink,
        uid: u32::from(st.uid),
        gid: u32::from(st.gid),
        rdev: 0,
        blksize: st.blksize,
        flags: 0,
    }
}

fn child_path(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", parent, name)
    }
}

fn parent_path(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(i) => &path[..i],
    }
}

/// A `fuser::Filesystem` over a mounted fsx image.
pub struct FsxFuse<D: BlockDevice> {
    fs: FilesystemMount<D>,
    paths: HashMap<u64, String>,
}

impl<D: BlockDevice> FsxFuse<D> {
    pub fn new(fs: FilesystemMount<D>) -> Self {
        let mut paths = HashMap::new();
        paths.insert(u64::from(ROOT_INODE), "/".to_string());
        Self { fs, paths }
    }

    fn path_of(&self, ino: u64) -> Result<String, FsError> {
        self.paths.get(&ino).cloned().ok_or(FsError::NotFound)
    }

    fn child_of(&self, parent: u64, name: &OsStr) -> Result<String, FsError> {
        let name = name.to_str().ok_or(FsError::InvalidArgument)?;
        Ok(child_path(&self.path_of(parent)?, name))
    }

    /// Stats `path` and remembers its inode number.
    fn remember(&mut self, path: String) -> Result<FileAttr, FsError> {
        let st = self.fs.stat(&path)?;
        self.paths.insert(u64::from(st.inum), path);
        Ok(attr_of(&st))
    }

    fn create_node(
        &mut self,
        parent: u64,
        name: &OsStr,
        mode: u32,
        is_dir: bool,
    ) -> Result<FileAttr, FsError> {
        let path = self.child_of(parent, name)?;
        self.fs.create(&path, mode, is_dir)?;
        self.remember(path)
    }

    fn remove_node(&mut self, parent: u64, name: &OsStr, is_dir: bool) -> Result<(), FsError> {
        let path = self.child_of(parent, name)?;
        let inum = self.fs.stat(&path)?.inum;
        if is_dir {
            self.fs.rmdir(&path)?;
        } else {
            self.fs.unlink(&path)?;
        }
        self.paths.remove(&u64::from(inum));
        Ok(())
    }

    fn do_setattr(
        &mut self,
        ino: u64,
        mode: Option<u32>,
        size: Option<u64>,
        mtime: Option<TimeOrNow>,
    ) -> Result<FileAttr, FsError> {
        let path = self.path_of(ino)?;
        if let Some(mode) = mode {
            self.fs.change_mode(&path, mode)?;
        }
        if let Some(size) = size {
            self.fs.truncate(&path, size)?;
        }
        if let Some(t) = mtime {
            let t = match t {
                TimeOrNow::SpecificTime(t) => t,
                TimeOrNow::Now => SystemTime::now(),
            };
            let secs = t.duration_since(UNIX_EPOCH).map_or(0, |d| d.as_secs() as u32);
            self.fs.change_time(&path, secs)?;
        }
        Ok(attr_of(&self.fs.stat(&path)?))
    }

    fn do_rename(
        &mut self,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
    ) -> Result<(), FsError> {
        let from = self.child_of(parent, name)?;
        let to = self.child_of(newparent, newname)?;
        self.fs.rename(&from, &to)?;

        // Re-key the renamed entry and everything below it.
        let prefix = format!("{}/", from);
        for path in self.paths.values_mut() {
            if *path == from {
                *path = to.clone();
            } else if let Some(rest) = path.strip_prefix(&prefix) {
                *path = format!("{}/{}", to, rest);
            }
        }
        Ok(())
    }

    fn do_readdir(&mut self, ino: u64, offset: i64, reply: &mut ReplyDirectory) -> Result<(), FsError> {
        let path = self.path_of(ino)?;
        let listing = self.fs.list_directory(&path)?;
        let up = self.fs.stat(parent_path(&path))?.inum;

        let mut entries = vec![
            (ino, FileType::Directory, ".".to_string()),
            (u64::from(up), FileType::Directory, "..".to_string()),
        ];
        for entry in listing {
            let kind = if entry.stat.is_dir() {
                FileType::Directory
            } else {
                FileType::RegularFile
            };
            let child = u64::from(entry.stat.inum);
            self.paths.insert(child, child_path(&path, &entry.name));
            entries.push((child, kind, entry.name));
        }

        for (i, (child, kind, name)) in entries.into_iter().enumerate().skip(offset.max(0) as usize) {
            if reply.add(child, (i + 1) as i64, kind, &name) {
                break;
            }
        }
        Ok(())
    }
}

impl<D: BlockDevice> Filesystem for FsxFuse<D> {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        debug!("lookup(parent = {}, name = {:?})", parent, name);
        match self.child_of(parent, name).and_then(|p| self.remember(p)) {
            Ok(attr) => reply.entry(&TTL, &attr, 0),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyAttr) {
        match self.path_of(ino).and_then(|p| self.fs.stat(&p)) {
            Ok(st) => reply.attr(&TTL, &attr_of(&st)),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        match self.do_setattr(ino, mode, size, mtime) {
            Ok(attr) => reply.attr(&TTL, &attr),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn mknod(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        _rdev: u32,
        reply: ReplyEntry,
    ) {
        match self.create_node(parent, name, mode & !umask, false) {
            Ok(attr) => reply.entry(&TTL, &attr, 0),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        reply: ReplyEntry,
    ) {
        match self.create_node(parent, name, mode & !umask, true) {
            Ok(attr) => reply.entry(&TTL, &attr, 0),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        match self.create_node(parent, name, mode & !umask, false) {
            Ok(attr) => reply.created(&TTL, &attr, 0, attr.ino, 0),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        match self.remove_node(parent, name, false) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        match self.remove_node(parent, name, true) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        match self.do_rename(parent, name, newparent, newname) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        match self.path_of(ino).and_then(|p| self.fs.open(&p)) {
            Ok(fh) => reply.opened(u64::from(fh), 0),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        if offset < 0 {
            return reply.error(libc::EINVAL);
        }
        let mut buf = vec![0u8; size as usize];
        match self
            .path_of(ino)
            .and_then(|p| self.fs.read(&p, offset as u64, &mut buf))
        {
            Ok(n) => reply.data(&buf[..n]),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        if offset < 0 {
            return reply.error(libc::EINVAL);
        }
        match self
            .path_of(ino)
            .and_then(|p| self.fs.write(&p, offset as u64, data))
        {
            Ok(n) => reply.written(n as u32),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        match self.path_of(ino).and_then(|p| self.fs.release(&p)) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn opendir(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        match self.path_of(ino).and_then(|p| self.fs.opendir(&p)) {
            Ok(fh) => reply.opened(u64::from(fh), 0),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        match self.do_readdir(ino, offset, &mut reply) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn releasedir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        _flags: i32,
        reply: ReplyEmpty,
    ) {
        match self.path_of(ino).and_then(|p| self.fs.releasedir(&p)) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
        let st = self.fs.statfs();
        reply.statfs(
            st.total_blocks,
            st.free_blocks,
            st.available_blocks,
            st.total_inodes,
            st.free_inodes,
            st.block_size,
            st.max_name_len,
            st.block_size,
        );
    }

    fn destroy(&mut self) {
        let n_blocks = self.fs.geometry().n_blocks;
        if let Err(e) = self.fs.device_mut().flush(0, n_blocks) {
            warn!("flush on unmount failed: {}", e);
        }
    }
}
