//! Volume access
//!
//! Read-write pass-through to the directory tree being filtered. Virtual
//! paths are rooted at "/" and resolved against the volume root.

use crate::error::{Error, Result};
use std::ffi::OsString;
use std::fs::{self, File, Metadata, OpenOptions};
use std::path::{Path, PathBuf};

/// Directory entry from the volume
#[derive(Debug, Clone)]
pub struct VolumeDirEntry {
    pub name: OsString,
    pub file_type: fs::FileType,
    pub ino: u64,
}

/// Pass-through interface to the filtered directory tree
pub struct Volume {
    /// Canonical root of the volume
    root: PathBuf,
}

impl Volume {
    /// Attach to a volume root.
    ///
    /// Refuses to attach unless the root exists and is a directory.
    pub fn new(root: PathBuf) -> Result<Self> {
        if !root.exists() {
            return Err(Error::PathNotFound(root.to_string_lossy().to_string()));
        }
        if !root.is_dir() {
            return Err(Error::NotADirectory(root.to_string_lossy().to_string()));
        }
        let root = root.canonicalize()?;
        Ok(Self { root })
    }

    /// Get the root path
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a virtual path to an absolute path on the volume
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            let relative = path.strip_prefix("/").unwrap_or(path);
            self.root.join(relative)
        } else {
            self.root.join(path)
        }
    }

    /// Check if a virtual path exists on the volume
    pub fn exists(&self, path: &Path) -> bool {
        self.resolve(path).exists()
    }

    /// Get metadata for a virtual path (symlinks are not followed)
    pub fn metadata(&self, path: &Path) -> Result<Metadata> {
        fs::symlink_metadata(self.resolve(path)).map_err(Error::Io)
    }

    /// Open an existing file with the caller's access mode.
    ///
    /// `O_TRUNC` is never honored here; the host applies truncation itself
    /// after the protection filter has seen the session.
    pub fn open_file(&self, path: &Path, flags: i32) -> Result<File> {
        let resolved = self.resolve(path);
        let mut options = OpenOptions::new();
        match flags & libc::O_ACCMODE {
            libc::O_WRONLY => {
                options.write(true);
            }
            libc::O_RDWR => {
                options.read(true).write(true);
            }
            _ => {
                options.read(true);
            }
        }
        options.open(resolved).map_err(Error::Io)
    }

    /// Create (or open, if it already exists) a file for writing
    pub fn create_file(&self, path: &Path, flags: i32, mode: u32) -> Result<File> {
        let resolved = self.resolve(path);
        let mut options = OpenOptions::new();
        options.write(true).create(true);
        if flags & libc::O_ACCMODE == libc::O_RDWR {
            options.read(true);
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(mode);
        }
        #[cfg(not(unix))]
        let _ = mode;
        options.open(resolved).map_err(Error::Io)
    }

    /// Set a file's length through a fresh write handle
    pub fn truncate(&self, path: &Path, size: u64) -> Result<()> {
        let file = OpenOptions::new()
            .write(true)
            .open(self.resolve(path))
            .map_err(Error::Io)?;
        file.set_len(size).map_err(Error::Io)
    }

    /// Change a file's permission bits
    #[cfg(unix)]
    pub fn set_mode(&self, path: &Path, mode: u32) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(self.resolve(path), fs::Permissions::from_mode(mode))
            .map_err(Error::Io)
    }

    #[cfg(not(unix))]
    pub fn set_mode(&self, _path: &Path, _mode: u32) -> Result<()> {
        Ok(())
    }

    /// Read directory entries
    pub fn readdir(&self, path: &Path) -> Result<Vec<VolumeDirEntry>> {
        let resolved = self.resolve(path);
        let mut entries = Vec::new();

        for entry in fs::read_dir(&resolved).map_err(Error::Io)? {
            let entry = entry.map_err(Error::Io)?;
            let file_type = entry.file_type().map_err(Error::Io)?;

            #[cfg(unix)]
            let ino = {
                use std::os::unix::fs::MetadataExt;
                entry.metadata().map_err(Error::Io)?.ino()
            };
            #[cfg(not(unix))]
            let ino = 0;

            entries.push(VolumeDirEntry {
                name: entry.file_name(),
                file_type,
                ino,
            });
        }

        Ok(entries)
    }

    /// Read a symlink target
    pub fn read_link(&self, path: &Path) -> Result<PathBuf> {
        fs::read_link(self.resolve(path)).map_err(Error::Io)
    }

    /// Create a directory
    pub fn create_dir(&self, path: &Path) -> Result<()> {
        fs::create_dir(self.resolve(path)).map_err(Error::Io)
    }

    /// Remove a file
    pub fn remove_file(&self, path: &Path) -> Result<()> {
        fs::remove_file(self.resolve(path)).map_err(Error::Io)
    }

    /// Remove an empty directory
    pub fn remove_dir(&self, path: &Path) -> Result<()> {
        fs::remove_dir(self.resolve(path)).map_err(Error::Io)
    }

    /// Rename within the volume
    pub fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        fs::rename(self.resolve(from), self.resolve(to)).map_err(Error::Io)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_attach_requires_directory() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("plain.txt");
        fs::write(&file, b"x").unwrap();

        assert!(Volume::new(dir.path().to_path_buf()).is_ok());
        assert!(Volume::new(file).is_err());
        assert!(Volume::new(dir.path().join("missing")).is_err());
    }

    #[test]
    fn test_resolve_and_exists() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("test.txt"), b"hello world").unwrap();

        let volume = Volume::new(dir.path().to_path_buf()).unwrap();
        assert!(volume.exists(Path::new("/test.txt")));
        assert!(volume.exists(Path::new("test.txt")));
        assert!(!volume.exists(Path::new("/nonexistent.txt")));
    }

    #[test]
    fn test_readdir() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("file1.txt"), b"1").unwrap();
        fs::write(dir.path().join("file2.txt"), b"2").unwrap();
        fs::create_dir(dir.path().join("subdir")).unwrap();

        let volume = Volume::new(dir.path().to_path_buf()).unwrap();
        let entries = volume.readdir(Path::new("/")).unwrap();
        assert_eq!(entries.len(), 3);
    }

    #[test]
    fn test_open_never_truncates() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("keep.txt"), b"content").unwrap();

        let volume = Volume::new(dir.path().to_path_buf()).unwrap();
        let file = volume
            .open_file(Path::new("/keep.txt"), libc::O_WRONLY | libc::O_TRUNC)
            .unwrap();
        drop(file);

        assert_eq!(fs::read(dir.path().join("keep.txt")).unwrap(), b"content");
    }

    #[test]
    fn test_create_and_remove() {
        let dir = tempdir().unwrap();
        let volume = Volume::new(dir.path().to_path_buf()).unwrap();

        let file = volume
            .create_file(Path::new("/new.txt"), libc::O_WRONLY, 0o644)
            .unwrap();
        drop(file);
        assert!(volume.exists(Path::new("/new.txt")));

        volume.remove_file(Path::new("/new.txt")).unwrap();
        assert!(!volume.exists(Path::new("/new.txt")));
    }
}
