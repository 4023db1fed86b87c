//! File handle management

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Represents an open file on the volume
pub struct FileHandle {
    /// Handle ID, also the protection session identity
    pub fh: u64,
    /// Virtual inode
    pub ino: u64,
    /// Virtual path at open time
    pub path: PathBuf,
    /// Open flags
    pub flags: i32,
    /// Underlying volume file
    file: File,
}

impl FileHandle {
    pub fn new(fh: u64, ino: u64, path: PathBuf, flags: i32, file: File) -> Self {
        FileHandle {
            fh,
            ino,
            path,
            flags,
            file,
        }
    }

    /// Check if opened for reading
    pub fn is_readable(&self) -> bool {
        let mode = self.flags & libc::O_ACCMODE;
        mode == libc::O_RDONLY || mode == libc::O_RDWR
    }

    /// Check if opened for writing
    pub fn is_writable(&self) -> bool {
        let mode = self.flags & libc::O_ACCMODE;
        mode == libc::O_WRONLY || mode == libc::O_RDWR
    }

    /// Read at an absolute offset
    #[cfg(unix)]
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        use std::os::unix::fs::FileExt;
        self.file.read_at(buf, offset)
    }

    /// Write all bytes at an absolute offset
    #[cfg(unix)]
    pub fn write_at(&self, data: &[u8], offset: u64) -> io::Result<()> {
        use std::os::unix::fs::FileExt;
        self.file.write_all_at(data, offset)
    }

    /// Set the file's length through this handle.
    ///
    /// Works even after the name was unlinked by a backup.
    pub fn set_len(&self, size: u64) -> io::Result<()> {
        self.file.set_len(size)
    }

    /// Metadata through this handle
    pub fn metadata(&self) -> io::Result<std::fs::Metadata> {
        self.file.metadata()
    }

    /// Flush file data to disk
    pub fn sync(&self) -> io::Result<()> {
        self.file.sync_all()
    }
}

/// Manages open file handles
pub struct HandleManager {
    /// Next handle ID
    next_fh: AtomicU64,
    /// Open handles
    handles: RwLock<HashMap<u64, Arc<FileHandle>>>,
}

impl HandleManager {
    pub fn new() -> Self {
        HandleManager {
            next_fh: AtomicU64::new(1),
            handles: RwLock::new(HashMap::new()),
        }
    }

    /// Register an open file and return its handle ID
    pub fn open(&self, ino: u64, path: PathBuf, flags: i32, file: File) -> u64 {
        let fh = self.next_fh.fetch_add(1, Ordering::SeqCst);
        let handle = Arc::new(FileHandle::new(fh, ino, path, flags, file));
        self.handles.write().insert(fh, handle);
        fh
    }

    /// Get a handle by ID
    pub fn get(&self, fh: u64) -> Option<Arc<FileHandle>> {
        self.handles.read().get(&fh).map(Arc::clone)
    }

    /// Close a handle, dropping the underlying file
    pub fn close(&self, fh: u64) -> Option<Arc<FileHandle>> {
        self.handles.write().remove(&fh)
    }

    /// Check if a handle is valid
    pub fn is_valid(&self, fh: u64) -> bool {
        self.handles.read().contains_key(&fh)
    }
}

impl Default for HandleManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn open_handle(manager: &HandleManager, flags: i32) -> (tempfile::TempDir, u64) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("file.txt");
        fs::write(&path, b"twelve bytes").unwrap();
        let file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .unwrap();
        let fh = manager.open(1, PathBuf::from("/file.txt"), flags, file);
        (dir, fh)
    }

    #[test]
    fn test_access_mode_helpers() {
        let manager = HandleManager::new();
        let (_dir, fh) = open_handle(&manager, libc::O_RDWR);
        let handle = manager.get(fh).unwrap();
        assert!(handle.is_readable());
        assert!(handle.is_writable());

        let (_dir, fh) = open_handle(&manager, libc::O_RDONLY);
        let handle = manager.get(fh).unwrap();
        assert!(handle.is_readable());
        assert!(!handle.is_writable());
    }

    #[test]
    fn test_open_get_close() {
        let manager = HandleManager::new();
        let (_dir, fh) = open_handle(&manager, libc::O_RDWR);

        assert!(manager.is_valid(fh));
        manager.close(fh);
        assert!(!manager.is_valid(fh));
        assert!(manager.get(fh).is_none());
    }

    #[test]
    fn test_positional_io() {
        let manager = HandleManager::new();
        let (_dir, fh) = open_handle(&manager, libc::O_RDWR);
        let handle = manager.get(fh).unwrap();

        handle.write_at(b"BYTES", 7).unwrap();

        let mut buf = [0u8; 5];
        let n = handle.read_at(&mut buf, 7).unwrap();
        assert_eq!(&buf[..n], b"BYTES");
    }
}
