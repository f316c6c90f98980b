//! Contract consumed from the inode-tree collaborator.
//!
//! The dispatcher never owns storage: it resolves inodes through these
//! traits and forwards mutations to them. All operations return deferred
//! results and are safe to call concurrently; the tree enforces its own
//! locking discipline.

use crate::error::FsResult;
use crate::path::{PathComponent, RelativePath};
use async_trait::async_trait;
use fuser::{FileAttr, FileType};
use std::fmt;
use std::num::NonZeroU64;
use std::sync::Arc;
use std::time::SystemTime;

/// Process-lifetime-stable numeric handle for an inode.
///
/// Zero is reserved by the protocol layer for negative lookup replies and
/// can never name a live inode, which the `NonZeroU64` representation
/// enforces at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InodeId(NonZeroU64);

impl InodeId {
    pub const ROOT: InodeId = InodeId(NonZeroU64::MIN);

    pub fn new(raw: u64) -> Option<InodeId> {
        NonZeroU64::new(raw).map(InodeId)
    }

    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for InodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

pub type InodeRef = Arc<dyn InodeNode>;
pub type DirRef = Arc<dyn DirectoryNode>;
pub type FileRef = Arc<dyn FileNode>;

/// One child entry returned by [`DirectoryNode::list_children`].
#[derive(Debug, Clone)]
pub struct DirectoryEntry {
    pub id: InodeId,
    pub name: PathComponent,
    pub kind: FileType,
    pub size: u64,
}

/// Which fields a setattr request carries; unset fields are left untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct SetAttrRequest {
    pub mode: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub size: Option<u64>,
    pub atime: Option<SystemTime>,
    pub mtime: Option<SystemTime>,
}

/// Space numbers reported by the backing store.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpaceAccounting {
    pub block_count: u64,
    pub blocks_free: u64,
    pub blocks_available: u64,
    pub inode_count: u64,
    pub inodes_free: u64,
}

/// Operations common to every inode.
#[async_trait]
pub trait InodeNode: Send + Sync {
    fn id(&self) -> InodeId;

    fn is_directory(&self) -> bool;

    /// Raw stat of the inode. Fails when the backing overlay data for a
    /// materialized inode is missing or corrupt.
    async fn stat(&self) -> FsResult<FileAttr>;

    async fn set_attributes(&self, request: SetAttrRequest) -> FsResult<FileAttr>;

    async fn get_xattr(&self, name: &str) -> FsResult<Vec<u8>>;

    async fn list_xattrs(&self) -> FsResult<Vec<String>>;

    /// Bump the count of references the protocol layer holds on this inode.
    fn inc_external_refcount(&self);

    fn dec_external_refcount(&self, count: u64);
}

/// Operations on directory inodes.
#[async_trait]
pub trait DirectoryNode: InodeNode {
    /// Resolve a child by name, loading it if necessary.
    async fn open_child(&self, name: &PathComponent) -> FsResult<InodeRef>;

    /// Resolve a child known to be a directory.
    async fn open_child_directory(&self, name: &PathComponent) -> FsResult<DirRef>;

    async fn create_child_file(&self, name: &PathComponent, mode: u32) -> FsResult<FileRef>;

    async fn create_child_directory(&self, name: &PathComponent, mode: u32) -> FsResult<DirRef>;

    async fn create_symlink(&self, name: &PathComponent, target: &str) -> FsResult<FileRef>;

    async fn remove_child_file(&self, name: &PathComponent) -> FsResult<()>;

    async fn remove_child_directory(&self, name: &PathComponent) -> FsResult<()>;

    async fn rename_child(
        &self,
        name: &PathComponent,
        dest: DirRef,
        dest_name: &PathComponent,
    ) -> FsResult<()>;

    async fn list_children(&self) -> FsResult<Vec<DirectoryEntry>>;
}

/// Operations on file (and symlink) inodes.
#[async_trait]
pub trait FileNode: InodeNode {
    async fn read_bytes(&self, length: u32, offset: u64) -> FsResult<Vec<u8>>;

    async fn read_all(&self) -> FsResult<Vec<u8>>;

    /// Returns the number of bytes written.
    async fn write_bytes(&self, data: &[u8], offset: u64) -> FsResult<u64>;

    async fn read_symlink_target(&self) -> FsResult<String>;

    /// Record that the file now carries local modifications.
    async fn mark_materialized(&self) -> FsResult<()>;

    async fn fsync(&self, data_only: bool) -> FsResult<()>;
}

/// Mount-level entry points into the tree.
#[async_trait]
pub trait InodeTree: Send + Sync {
    async fn resolve(&self, id: InodeId) -> FsResult<InodeRef>;

    async fn resolve_directory(&self, id: InodeId) -> FsResult<DirRef>;

    async fn resolve_file(&self, id: InodeId) -> FsResult<FileRef>;

    async fn resolve_path(&self, path: &RelativePath) -> FsResult<InodeRef>;

    async fn resolve_directory_path(&self, path: &RelativePath) -> FsResult<DirRef>;

    async fn resolve_file_path(&self, path: &RelativePath) -> FsResult<FileRef>;

    fn root(&self) -> DirRef;

    async fn space_accounting(&self) -> FsResult<SpaceAccounting>;
}
