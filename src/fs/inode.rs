//! Virtual inode management
//!
//! Maps FUSE inode numbers to virtual paths on the volume and caches the
//! attributes last observed for each node.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

/// File type of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    RegularFile,
    Directory,
    Symlink,
}

impl From<std::fs::FileType> for NodeKind {
    fn from(ft: std::fs::FileType) -> Self {
        if ft.is_dir() {
            NodeKind::Directory
        } else if ft.is_symlink() {
            NodeKind::Symlink
        } else {
            NodeKind::RegularFile
        }
    }
}

impl NodeKind {
    pub fn to_fuser_type(self) -> fuser::FileType {
        match self {
            NodeKind::RegularFile => fuser::FileType::RegularFile,
            NodeKind::Directory => fuser::FileType::Directory,
            NodeKind::Symlink => fuser::FileType::Symlink,
        }
    }
}

/// Attributes cached for a node
#[derive(Debug, Clone)]
pub struct NodeAttributes {
    pub size: u64,
    pub blocks: u64,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
    pub crtime: SystemTime,
    pub perm: u16,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u32,
    pub blksize: u32,
}

impl Default for NodeAttributes {
    fn default() -> Self {
        let now = SystemTime::now();
        Self {
            size: 0,
            blocks: 0,
            atime: now,
            mtime: now,
            ctime: now,
            crtime: now,
            perm: 0o644,
            nlink: 1,
            uid: unsafe { libc::getuid() },
            gid: unsafe { libc::getgid() },
            rdev: 0,
            blksize: 4096,
        }
    }
}

impl NodeAttributes {
    #[cfg(unix)]
    pub fn from_metadata(meta: &std::fs::Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;
        Self {
            size: meta.len(),
            blocks: meta.blocks(),
            atime: meta.accessed().unwrap_or(SystemTime::UNIX_EPOCH),
            mtime: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            ctime: SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(meta.ctime() as u64),
            crtime: meta.created().unwrap_or(SystemTime::UNIX_EPOCH),
            perm: (meta.mode() & 0o7777) as u16,
            nlink: meta.nlink() as u32,
            uid: meta.uid(),
            gid: meta.gid(),
            rdev: meta.rdev() as u32,
            blksize: meta.blksize() as u32,
        }
    }

    #[cfg(not(unix))]
    pub fn from_metadata(meta: &std::fs::Metadata) -> Self {
        Self {
            size: meta.len(),
            blocks: (meta.len() + 511) / 512,
            atime: meta.accessed().unwrap_or(SystemTime::UNIX_EPOCH),
            mtime: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            ctime: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            crtime: meta.created().unwrap_or(SystemTime::UNIX_EPOCH),
            perm: if meta.is_dir() { 0o755 } else { 0o644 },
            nlink: 1,
            uid: 0,
            gid: 0,
            rdev: 0,
            blksize: 4096,
        }
    }
}

/// A node in the virtual tree
#[derive(Debug, Clone)]
pub struct Node {
    /// Virtual inode number
    pub ino: u64,
    /// Parent virtual inode
    pub parent: u64,
    /// File/directory name
    pub name: String,
    /// Virtual path (rooted at "/")
    pub path: PathBuf,
    /// File type
    pub kind: NodeKind,
    /// Last observed attributes
    pub attrs: NodeAttributes,
}

impl Node {
    /// Root node
    pub fn root() -> Self {
        Self {
            ino: 1,
            parent: 1,
            name: String::new(),
            path: PathBuf::from("/"),
            kind: NodeKind::Directory,
            attrs: NodeAttributes {
                perm: 0o755,
                nlink: 2,
                ..Default::default()
            },
        }
    }

    /// Build a node from volume metadata
    pub fn from_metadata(
        ino: u64,
        parent: u64,
        name: String,
        path: PathBuf,
        meta: &std::fs::Metadata,
    ) -> Self {
        Self {
            ino,
            parent,
            name,
            path,
            kind: NodeKind::from(meta.file_type()),
            attrs: NodeAttributes::from_metadata(meta),
        }
    }

    /// Convert to fuser FileAttr
    pub fn to_fuser_attr(&self) -> fuser::FileAttr {
        fuser::FileAttr {
            ino: self.ino,
            size: self.attrs.size,
            blocks: self.attrs.blocks,
            atime: self.attrs.atime,
            mtime: self.attrs.mtime,
            ctime: self.attrs.ctime,
            crtime: self.attrs.crtime,
            kind: self.kind.to_fuser_type(),
            perm: self.attrs.perm,
            nlink: self.attrs.nlink,
            uid: self.attrs.uid,
            gid: self.attrs.gid,
            rdev: self.attrs.rdev,
            blksize: self.attrs.blksize,
            flags: 0,
        }
    }
}

/// Manages virtual inode allocation and path mapping
pub struct InodeTable {
    /// Next virtual inode number
    next_ino: AtomicU64,
    /// Virtual ino -> node
    nodes: RwLock<HashMap<u64, Node>>,
    /// Virtual path -> ino
    path_to_ino: RwLock<HashMap<PathBuf, u64>>,
}

impl InodeTable {
    pub fn new() -> Self {
        let table = Self {
            next_ino: AtomicU64::new(2), // 1 is reserved for root
            nodes: RwLock::new(HashMap::new()),
            path_to_ino: RwLock::new(HashMap::new()),
        };

        table.register(Node::root());
        table
    }

    /// Allocate a new virtual inode number
    pub fn alloc_ino(&self) -> u64 {
        self.next_ino.fetch_add(1, Ordering::SeqCst)
    }

    /// Register a node
    pub fn register(&self, node: Node) -> u64 {
        let ino = node.ino;
        let path = node.path.clone();

        self.nodes.write().insert(ino, node);
        self.path_to_ino.write().insert(path, ino);

        ino
    }

    /// Get a node by virtual ino
    pub fn get(&self, ino: u64) -> Option<Node> {
        self.nodes.read().get(&ino).cloned()
    }

    /// Get a node by virtual path
    pub fn get_by_path(&self, path: &Path) -> Option<Node> {
        let ino = self.path_to_ino.read().get(path).copied()?;
        self.get(ino)
    }

    /// Replace a node's cached attributes
    pub fn update_attrs(&self, ino: u64, attrs: NodeAttributes) {
        if let Some(node) = self.nodes.write().get_mut(&ino) {
            node.attrs = attrs;
        }
    }

    /// Drop the node mapped at a path
    pub fn invalidate_path(&self, path: &Path) {
        if let Some(ino) = self.path_to_ino.write().remove(path) {
            self.nodes.write().remove(&ino);
        }
    }

    /// Drop every node at or below a path (for renames and removals of
    /// directories)
    pub fn invalidate_subtree(&self, prefix: &Path) {
        let stale: Vec<PathBuf> = self
            .path_to_ino
            .read()
            .keys()
            .filter(|p| p.starts_with(prefix))
            .cloned()
            .collect();

        for path in stale {
            self.invalidate_path(&path);
        }
    }

    /// Check if an ino is known
    pub fn exists(&self, ino: u64) -> bool {
        self.nodes.read().contains_key(&ino)
    }
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}
