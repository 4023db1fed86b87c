//! Passthrough FUSE filesystem
//!
//! Forwards every operation to the underlying volume and feeds the
//! protection filter from the callbacks that open, write to, and release
//! files. Truncation is applied by the host itself, after the filter has
//! observed the session, so a snapshot is taken before content is destroyed.

use fuser::{
    Filesystem, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry,
    ReplyOpen, ReplyStatfs, ReplyWrite, Request, TimeOrNow,
};
use libc::{c_int, EBADF, EINVAL, EISDIR, ENOENT, ENOTDIR};
use std::ffi::OsStr;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};
use tracing::{debug, error, warn};

use crate::classify::PathClassifier;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::filter::{
    BackupEngine, CleanupEvent, Interceptor, OpenDisposition, OpenEvent, RequestOrigin, WriteEvent,
};
use crate::fs::handle::HandleManager;
use crate::fs::inode::{InodeTable, Node, NodeAttributes, NodeKind};
use crate::fs::volume::Volume;

const TTL: Duration = Duration::from_secs(1);

fn errno(err: &Error) -> c_int {
    match err {
        Error::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
        Error::PathNotFound(_) => ENOENT,
        Error::NotADirectory(_) => ENOTDIR,
        _ => libc::EIO,
    }
}

/// Passthrough filesystem with pre-write protection
pub struct SentinelFs {
    /// The filtered directory tree
    volume: Volume,
    /// Virtual inode table
    inodes: InodeTable,
    /// Open file handles
    handles: HandleManager,
    /// Protection filter
    filter: Interceptor,
}

impl SentinelFs {
    /// Attach to the configured volume
    pub fn new(config: &Config) -> Result<Self> {
        let volume = Volume::new(config.mount.lower_dir.clone())?;
        let filter = Interceptor::new(
            PathClassifier::new(&config.protect),
            BackupEngine::new(&config.backup),
        );

        Ok(Self {
            volume,
            inodes: InodeTable::new(),
            handles: HandleManager::new(),
            filter,
        })
    }

    /// Protection filter access (used by tests and diagnostics)
    pub fn filter(&self) -> &Interceptor {
        &self.filter
    }

    /// Virtual path of a directory entry
    fn child_path(&self, parent: u64, name: &OsStr) -> Option<PathBuf> {
        let parent_node = self.inodes.get(parent)?;
        Some(parent_node.path.join(name))
    }

    /// Find or register the node for a path, refreshing its attributes
    fn lookup_node(&self, parent: u64, name: &OsStr) -> Option<Node> {
        let path = self.child_path(parent, name)?;
        let meta = self.volume.metadata(&path).ok()?;

        if let Some(node) = self.inodes.get_by_path(&path) {
            self.inodes
                .update_attrs(node.ino, NodeAttributes::from_metadata(&meta));
            return self.inodes.get(node.ino);
        }

        let ino = self.inodes.alloc_ino();
        let node = Node::from_metadata(
            ino,
            parent,
            name.to_string_lossy().to_string(),
            path,
            &meta,
        );
        self.inodes.register(node.clone());
        Some(node)
    }

    /// Current attributes for a node, falling back to the cache when the
    /// name is gone from the volume (e.g. unlinked by a backup while the
    /// session is still open)
    fn current_attrs(&self, node: &Node) -> fuser::FileAttr {
        match self.volume.metadata(&node.path) {
            Ok(meta) => {
                let attrs = NodeAttributes::from_metadata(&meta);
                self.inodes.update_attrs(node.ino, attrs);
                self.inodes
                    .get(node.ino)
                    .map(|n| n.to_fuser_attr())
                    .unwrap_or_else(|| node.to_fuser_attr())
            }
            Err(_) => node.to_fuser_attr(),
        }
    }

    /// Announce a completed open to the filter and apply deferred
    /// truncation once the session has been observed
    fn announce_open(&self, fh: u64, path: &PathBuf, flags: i32, disposition: OpenDisposition) {
        let event = OpenEvent {
            file_id: fh,
            path: self.volume.resolve(path),
            stream: None,
            flags,
            disposition,
            origin: RequestOrigin::Untrusted,
            draining: false,
            delete_pending: false,
        };
        self.filter.on_open_completed(&event);

        if flags & libc::O_TRUNC != 0 {
            self.filter.on_pre_write(&WriteEvent {
                file_id: fh,
                offset: 0,
                len: 0,
            });
            if let Some(handle) = self.handles.get(fh) {
                if let Err(e) = handle.set_len(0) {
                    warn!(fh, error = %e, "deferred truncation failed");
                }
            }
        }
    }
}

impl Filesystem for SentinelFs {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        debug!("lookup(parent={}, name={:?})", parent, name);

        match self.lookup_node(parent, name) {
            Some(node) => {
                let attr = node.to_fuser_attr();
                reply.entry(&TTL, &attr, 0);
            }
            None => {
                reply.error(ENOENT);
            }
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyAttr) {
        debug!("getattr(ino={})", ino);

        match self.inodes.get(ino) {
            Some(node) => {
                let attr = self.current_attrs(&node);
                reply.attr(&TTL, &attr);
            }
            None => {
                reply.error(ENOENT);
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        debug!("setattr(ino={}, size={:?}, fh={:?})", ino, size, fh);

        let Some(node) = self.inodes.get(ino) else {
            reply.error(ENOENT);
            return;
        };

        if let Some(size) = size {
            // Truncation destroys data, so the session (if any) must take
            // its snapshot first
            match fh.and_then(|fh| self.handles.get(fh)) {
                Some(handle) => {
                    self.filter.on_pre_write(&WriteEvent {
                        file_id: handle.fh,
                        offset: size as i64,
                        len: 0,
                    });
                    if let Err(e) = handle.set_len(size) {
                        error!(ino, error = %e, "truncate through handle failed");
                        reply.error(e.raw_os_error().unwrap_or(libc::EIO));
                        return;
                    }
                }
                None => {
                    if let Err(e) = self.volume.truncate(&node.path, size) {
                        error!(ino, error = %e, "truncate failed");
                        reply.error(errno(&e));
                        return;
                    }
                }
            }
        }

        if let Some(mode) = mode {
            if let Err(e) = self.volume.set_mode(&node.path, mode) {
                error!(ino, error = %e, "chmod failed");
                reply.error(errno(&e));
                return;
            }
        }

        let mut attr = self.current_attrs(&node);
        if let Some(size) = size {
            attr.size = size;
        }
        reply.attr(&TTL, &attr);
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        debug!("readdir(ino={}, offset={})", ino, offset);

        let Some(node) = self.inodes.get(ino) else {
            reply.error(ENOENT);
            return;
        };

        if node.kind != NodeKind::Directory {
            reply.error(ENOTDIR);
            return;
        }

        let mut entries: Vec<(u64, NodeKind, String)> = vec![
            (ino, NodeKind::Directory, ".".to_string()),
            (node.parent, NodeKind::Directory, "..".to_string()),
        ];

        if let Ok(listing) = self.volume.readdir(&node.path) {
            for entry in listing {
                let name = entry.name.to_string_lossy().to_string();
                let child_ino = match self.lookup_node(ino, &entry.name) {
                    Some(child) => child.ino,
                    None => continue,
                };
                entries.push((child_ino, NodeKind::from(entry.file_type), name));
            }
        }

        for (i, (child_ino, kind, name)) in entries.iter().enumerate().skip(offset as usize) {
            let buffer_full = reply.add(*child_ino, (i + 1) as i64, kind.to_fuser_type(), name);
            if buffer_full {
                break;
            }
        }

        reply.ok();
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
        debug!("mkdir(parent={}, name={:?})", parent, name);

        let Some(path) = self.child_path(parent, name) else {
            reply.error(ENOENT);
            return;
        };

        if let Err(e) = self.volume.create_dir(&path) {
            reply.error(errno(&e));
            return;
        }

        let _ = self.volume.set_mode(&path, mode & !umask);

        match self.lookup_node(parent, name) {
            Some(node) => reply.entry(&TTL, &node.to_fuser_attr(), 0),
            None => reply.error(ENOENT),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        debug!("unlink(parent={}, name={:?})", parent, name);

        let Some(path) = self.child_path(parent, name) else {
            reply.error(ENOENT);
            return;
        };

        match self.volume.remove_file(&path) {
            Ok(()) => {
                self.inodes.invalidate_path(&path);
                reply.ok();
            }
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        debug!("rmdir(parent={}, name={:?})", parent, name);

        let Some(path) = self.child_path(parent, name) else {
            reply.error(ENOENT);
            return;
        };

        match self.volume.remove_dir(&path) {
            Ok(()) => {
                self.inodes.invalidate_subtree(&path);
                reply.ok();
            }
            Err(e) => reply.error(errno(&e)),
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
        debug!(
            "rename(parent={}, name={:?}, newparent={}, newname={:?})",
            parent, name, newparent, newname
        );

        let (Some(from), Some(to)) = (
            self.child_path(parent, name),
            self.child_path(newparent, newname),
        ) else {
            reply.error(ENOENT);
            return;
        };

        match self.volume.rename(&from, &to) {
            Ok(()) => {
                self.inodes.invalidate_subtree(&from);
                self.inodes.invalidate_subtree(&to);
                reply.ok();
            }
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        debug!("open(ino={}, flags={:#o})", ino, flags);

        let Some(node) = self.inodes.get(ino) else {
            reply.error(ENOENT);
            return;
        };

        if node.kind == NodeKind::Directory {
            reply.error(EISDIR);
            return;
        }

        let file = match self.volume.open_file(&node.path, flags) {
            Ok(file) => file,
            Err(e) => {
                reply.error(errno(&e));
                return;
            }
        };

        let fh = self.handles.open(ino, node.path.clone(), flags, file);
        self.announce_open(fh, &node.path, flags, OpenDisposition::Opened);

        reply.opened(fh, 0);
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        debug!("create(parent={}, name={:?}, flags={:#o})", parent, name, flags);

        let Some(path) = self.child_path(parent, name) else {
            reply.error(ENOENT);
            return;
        };

        let existed = self.volume.exists(&path);
        let file = match self.volume.create_file(&path, flags, mode & !umask) {
            Ok(file) => file,
            Err(e) => {
                reply.error(errno(&e));
                return;
            }
        };

        let Some(node) = self.lookup_node(parent, name) else {
            reply.error(ENOENT);
            return;
        };

        let fh = self.handles.open(node.ino, path.clone(), flags, file);
        let disposition = if existed {
            OpenDisposition::Opened
        } else {
            OpenDisposition::Created
        };
        self.announce_open(fh, &path, flags, disposition);

        let attr = self.current_attrs(&node);
        reply.created(&TTL, &attr, 0, fh, 0);
    }

    #[allow(clippy::too_many_arguments)]
    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        debug!("read(ino={}, fh={}, offset={}, size={})", ino, fh, offset, size);

        let Some(handle) = self.handles.get(fh) else {
            reply.error(EBADF);
            return;
        };

        let mut buffer = vec![0u8; size as usize];
        match handle.read_at(&mut buffer, offset as u64) {
            Ok(n) => {
                buffer.truncate(n);
                reply.data(&buffer);
            }
            Err(e) => {
                error!(ino, fh, error = %e, "read failed");
                reply.error(e.raw_os_error().unwrap_or(libc::EIO));
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        debug!("write(ino={}, fh={}, offset={}, len={})", ino, fh, offset, data.len());

        let Some(handle) = self.handles.get(fh) else {
            reply.error(EBADF);
            return;
        };

        self.filter.on_pre_write(&WriteEvent {
            file_id: fh,
            offset,
            len: data.len(),
        });

        match handle.write_at(data, offset as u64) {
            Ok(()) => reply.written(data.len() as u32),
            Err(e) => {
                error!(ino, fh, error = %e, "write failed");
                reply.error(e.raw_os_error().unwrap_or(libc::EIO));
            }
        }
    }

    fn flush(&mut self, _req: &Request<'_>, ino: u64, fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        debug!("flush(ino={}, fh={})", ino, fh);
        reply.ok();
    }

    fn fsync(&mut self, _req: &Request<'_>, ino: u64, fh: u64, _datasync: bool, reply: ReplyEmpty) {
        debug!("fsync(ino={}, fh={})", ino, fh);

        match self.handles.get(fh) {
            Some(handle) => match handle.sync() {
                Ok(()) => reply.ok(),
                Err(e) => reply.error(e.raw_os_error().unwrap_or(libc::EIO)),
            },
            None => reply.error(EBADF),
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        debug!("release(ino={}, fh={})", ino, fh);

        self.filter.on_cleanup(&CleanupEvent { file_id: fh });
        self.handles.close(fh);
        reply.ok();
    }

    fn readlink(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyData) {
        debug!("readlink(ino={})", ino);

        let Some(node) = self.inodes.get(ino) else {
            reply.error(ENOENT);
            return;
        };

        if node.kind != NodeKind::Symlink {
            reply.error(EINVAL);
            return;
        }

        match self.volume.read_link(&node.path) {
            Ok(target) => reply.data(target.as_os_str().as_encoded_bytes()),
            Err(e) => {
                error!(ino, error = %e, "readlink failed");
                reply.error(errno(&e));
            }
        }
    }

    fn access(&mut self, _req: &Request<'_>, ino: u64, _mask: i32, reply: ReplyEmpty) {
        debug!("access(ino={})", ino);

        if self.inodes.exists(ino) {
            reply.ok();
        } else {
            reply.error(ENOENT);
        }
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
        reply.statfs(
            1000000, // blocks
            500000,  // bfree
            500000,  // bavail
            1000000, // files
            500000,  // ffree
            4096,    // bsize
            255,     // namelen
            4096,    // frsize
        );
    }

    fn destroy(&mut self) {
        debug!("destroy()");
        self.filter.shutdown();
    }
}
