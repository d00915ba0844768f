//! FUSE adapter around the path-addressed core.
//!
//! The kernel speaks inode numbers, the core speaks absolute paths, so the
//! adapter keeps an ino-to-path table fed by `lookup`. Core inode numbers
//! start at 0 and FUSE reserves ino 1 for the root, so every number is
//! shifted up by one at the boundary.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry,
    ReplyStatfs, ReplyWrite, Request,
};
use libc::{c_int, EEXIST, EINVAL, EIO, EISDIR, ENOENT, ENOSPC, ENOTDIR};
use log::warn;
use raid_fs::{Error, RaidFileSystem, Stat, StatKind, BLOCK_SIZE};

const TTL: Duration = Duration::new(1, 0);
const FUSE_ROOT: u64 = 1;

pub struct RaidFuse {
    fs: RaidFileSystem,
    /// ino -> absolute path, seeded with the root.
    paths: HashMap<u64, String>,
}

impl RaidFuse {
    pub fn new(fs: RaidFileSystem) -> Self {
        Self {
            fs,
            paths: HashMap::from([(FUSE_ROOT, "/".to_owned())]),
        }
    }

    fn path(&self, ino: u64) -> Option<&str> {
        self.paths.get(&ino).map(String::as_str)
    }

    /// Child path under a known parent ino.
    fn child_path(&self, parent: u64, name: &OsStr) -> Option<String> {
        let name = name.to_str()?;
        let parent = self.path(parent)?;
        Some(if parent == "/" {
            format!("/{name}")
        } else {
            format!("{parent}/{name}")
        })
    }

    /// Drops cached paths at and below a removed name.
    fn forget_path(&mut self, path: &str) {
        let prefix = format!("{path}/");
        self.paths
            .retain(|_, p| p != path && !p.starts_with(&prefix));
    }
}

fn errno(e: &Error) -> c_int {
    match e {
        Error::NotFound => ENOENT,
        Error::AlreadyExists => EEXIST,
        Error::NoSpace => ENOSPC,
        Error::NotADirectory => ENOTDIR,
        Error::IsADirectory => EISDIR,
        Error::InvalidArgument => EINVAL,
        Error::Corrupted | Error::Io(_) => EIO,
    }
}

fn timestamp(secs: i64) -> SystemTime {
    if secs <= 0 {
        UNIX_EPOCH
    } else {
        UNIX_EPOCH + Duration::from_secs(secs as u64)
    }
}

fn attr_of(stat: &Stat) -> FileAttr {
    FileAttr {
        ino: u64::from(stat.ino) + 1,
        size: stat.size,
        blocks: stat.size.div_ceil(BLOCK_SIZE as u64),
        atime: timestamp(stat.atime),
        mtime: timestamp(stat.mtime),
        ctime: timestamp(stat.ctime),
        crtime: timestamp(stat.ctime),
        kind: match stat.kind {
            StatKind::DIR => FileType::Directory,
            StatKind::FILE => FileType::RegularFile,
        },
        perm: stat.perm as u16,
        nlink: stat.links,
        uid: stat.uid,
        gid: stat.gid,
        rdev: 0,
        flags: 0,
        blksize: BLOCK_SIZE as u32,
    }
}

impl Filesystem for RaidFuse {
    fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(path) = self.child_path(parent, name) else {
            reply.error(ENOENT);
            return;
        };
        match self.fs.getattr(&path) {
            Ok(stat) => {
                let attr = attr_of(&stat);
                self.paths.insert(attr.ino, path);
                reply.entry(&TTL, &attr, 0);
            }
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn getattr(&mut self, _req: &Request, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        let Some(path) = self.path(ino) else {
            reply.error(ENOENT);
            return;
        };
        match self.fs.getattr(path) {
            Ok(stat) => reply.attr(&TTL, &attr_of(&stat)),
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn mknod(
        &mut self,
        req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        _rdev: u32,
        reply: ReplyEntry,
    ) {
        let Some(path) = self.child_path(parent, name) else {
            reply.error(ENOENT);
            return;
        };
        let made = self
            .fs
            .mknod(&path, mode, req.uid(), req.gid())
            .and_then(|_| self.fs.getattr(&path));
        match made {
            Ok(stat) => {
                let attr = attr_of(&stat);
                self.paths.insert(attr.ino, path);
                reply.entry(&TTL, &attr, 0);
            }
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn mkdir(
        &mut self,
        req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let Some(path) = self.child_path(parent, name) else {
            reply.error(ENOENT);
            return;
        };
        let made = self
            .fs
            .mkdir(&path, mode, req.uid(), req.gid())
            .and_then(|_| self.fs.getattr(&path));
        match made {
            Ok(stat) => {
                let attr = attr_of(&stat);
                self.paths.insert(attr.ino, path);
                reply.entry(&TTL, &attr, 0);
            }
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn unlink(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(path) = self.child_path(parent, name) else {
            reply.error(ENOENT);
            return;
        };
        match self.fs.unlink(&path) {
            Ok(()) => {
                self.forget_path(&path);
                reply.ok();
            }
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn rmdir(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(path) = self.child_path(parent, name) else {
            reply.error(ENOENT);
            return;
        };
        match self.fs.rmdir(&path) {
            Ok(()) => {
                self.forget_path(&path);
                reply.ok();
            }
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn read(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let Some(path) = self.path(ino) else {
            reply.error(ENOENT);
            return;
        };
        if offset < 0 {
            reply.error(EINVAL);
            return;
        }
        let mut buf = vec![0; size as usize];
        match self.fs.read(path, offset as u64, &mut buf) {
            Ok(n) => reply.data(&buf[..n]),
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn write(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let Some(path) = self.path(ino).map(str::to_owned) else {
            reply.error(ENOENT);
            return;
        };
        if offset < 0 {
            reply.error(EINVAL);
            return;
        }
        match self.fs.write(&path, offset as u64, data) {
            Ok(n) => reply.written(n as u32),
            Err(e) => reply.error(errno(&e)),
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
        let Some(path) = self.path(ino) else {
            reply.error(ENOENT);
            return;
        };
        let entries = match self.fs.readdir(path) {
            Ok(entries) => entries,
            Err(e) => {
                reply.error(errno(&e));
                return;
            }
        };
        for (i, entry) in entries.iter().enumerate().skip(offset as usize) {
            let kind = match entry.kind {
                StatKind::DIR => FileType::Directory,
                StatKind::FILE => FileType::RegularFile,
            };
            if reply.add(u64::from(entry.ino) + 1, (i + 1) as i64, kind, &entry.name) {
                break;
            }
        }
        reply.ok();
    }

    fn statfs(&mut self, _req: &Request, _ino: u64, reply: ReplyStatfs) {
        let counters = self
            .fs
            .free_data_blocks()
            .and_then(|bfree| Ok((bfree, self.fs.free_inodes()?)));
        match counters {
            Ok((bfree, ffree)) => reply.statfs(
                self.fs.data_block_count(),
                bfree,
                bfree,
                self.fs.inode_count(),
                ffree,
                BLOCK_SIZE as u32,
                raid_fs::layout::NAME_MAX as u32,
                BLOCK_SIZE as u32,
            ),
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn fsync(&mut self, _req: &Request, _ino: u64, _fh: u64, _datasync: bool, reply: ReplyEmpty) {
        match self.fs.sync() {
            Ok(()) => reply.ok(),
            Err(e) => {
                warn!("fsync failed: {e}");
                reply.error(errno(&e));
            }
        }
    }
}
