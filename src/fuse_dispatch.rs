//! Identifier-addressed operation handlers for the kernel filesystem
//! channel.
//!
//! Every handler resolves its target inode(s) through the tree collaborator
//! and shapes the result into a protocol-legal reply. Handlers never block
//! the calling thread; suspension points are exactly the awaited tree
//! operations.

use crate::attr::{self, AttrOut, EntryOut};
use crate::error::{FsError, FsResult};
use crate::path::{PathComponent, NAME_MAX};
use crate::stats::DispatchStats;
use crate::tree::{DirectoryEntry, InodeId, InodeTree, SetAttrRequest};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

// The fragment size most filesystem types report.
const FRAGMENT_SIZE: u32 = 4096;

// suid, sgid and sticky
const EXTRA_MODE_BITS: u32 = 0o7000;
const REGULAR_FILE_MODE: u32 = 0o100000;

/// Capabilities negotiated with the kernel channel at mount time.
#[derive(Debug, Clone, Copy)]
pub struct ChannelCapabilities {
    /// The kernel accepts "not supported" for open/release and will stop
    /// sending them.
    pub no_open_support: bool,
    /// Same for opendir/releasedir.
    pub no_opendir_support: bool,
    /// Advertised read-ahead size, reported back as the statfs block size.
    pub max_readahead: u32,
}

impl Default for ChannelCapabilities {
    fn default() -> Self {
        ChannelCapabilities {
            no_open_support: false,
            no_opendir_support: false,
            max_readahead: 128 * 1024,
        }
    }
}

/// Filesystem statistics reply.
#[derive(Debug, Clone, Copy)]
pub struct StatFs {
    pub blocks: u64,
    pub bfree: u64,
    pub bavail: u64,
    pub files: u64,
    pub ffree: u64,
    pub bsize: u32,
    pub frsize: u32,
    pub namelen: u32,
}

/// The identifier-addressed dispatcher surface consumed by the kernel
/// channel. One of the two capability sets a mount serves; the host
/// environment picks it at construction time.
#[async_trait]
pub trait FuseHandler: Send + Sync {
    async fn lookup(&self, parent: InodeId, name: &PathComponent) -> FsResult<EntryOut>;

    async fn forget(&self, id: InodeId, nlookup: u64);

    async fn getattr(&self, id: InodeId) -> FsResult<AttrOut>;

    async fn setattr(&self, id: InodeId, request: SetAttrRequest) -> FsResult<AttrOut>;

    async fn readlink(&self, id: InodeId) -> FsResult<String>;

    async fn mknod(
        &self,
        parent: InodeId,
        name: &PathComponent,
        mode: u32,
        rdev: u32,
    ) -> FsResult<EntryOut>;

    async fn mkdir(&self, parent: InodeId, name: &PathComponent, mode: u32) -> FsResult<EntryOut>;

    async fn unlink(&self, parent: InodeId, name: &PathComponent) -> FsResult<()>;

    async fn rmdir(&self, parent: InodeId, name: &PathComponent) -> FsResult<()>;

    async fn symlink(
        &self,
        parent: InodeId,
        name: &PathComponent,
        target: &str,
    ) -> FsResult<EntryOut>;

    async fn rename(
        &self,
        parent: InodeId,
        name: &PathComponent,
        new_parent: InodeId,
        new_name: &PathComponent,
    ) -> FsResult<()>;

    async fn link(
        &self,
        id: InodeId,
        new_parent: InodeId,
        new_name: &PathComponent,
    ) -> FsResult<EntryOut>;

    async fn open(&self, id: InodeId, flags: i32) -> FsResult<u64>;

    async fn create(
        &self,
        parent: InodeId,
        name: &PathComponent,
        mode: u32,
        flags: i32,
    ) -> FsResult<EntryOut>;

    async fn read(&self, id: InodeId, size: u32, offset: u64) -> FsResult<Vec<u8>>;

    async fn write(&self, id: InodeId, data: &[u8], offset: u64) -> FsResult<u64>;

    async fn flush(&self, id: InodeId, lock_owner: u64) -> FsResult<()>;

    async fn release(&self, id: InodeId, fh: u64) -> FsResult<()>;

    async fn fsync(&self, id: InodeId, data_only: bool) -> FsResult<()>;

    async fn opendir(&self, id: InodeId, flags: i32) -> FsResult<u64>;

    async fn readdir(&self, id: InodeId, offset: u64) -> FsResult<Vec<DirectoryEntry>>;

    async fn releasedir(&self, id: InodeId, fh: u64) -> FsResult<()>;

    async fn fsyncdir(&self, id: InodeId, data_only: bool) -> FsResult<()>;

    async fn getxattr(&self, id: InodeId, name: &str) -> FsResult<Vec<u8>>;

    async fn listxattr(&self, id: InodeId) -> FsResult<Vec<String>>;

    async fn statfs(&self, id: InodeId) -> FsResult<StatFs>;
}

/// Concrete identifier-addressed dispatcher over an inode tree.
pub struct FuseDispatcher {
    tree: Arc<dyn InodeTree>,
    caps: ChannelCapabilities,
    stats: Arc<DispatchStats>,
}

impl FuseDispatcher {
    pub fn new(
        tree: Arc<dyn InodeTree>,
        caps: ChannelCapabilities,
        stats: Arc<DispatchStats>,
    ) -> Self {
        FuseDispatcher { tree, caps, stats }
    }

    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }
}

#[async_trait]
impl FuseHandler for FuseDispatcher {
    async fn lookup(&self, parent: InodeId, name: &PathComponent) -> FsResult<EntryOut> {
        debug!(%parent, %name, "lookup");
        let resolved = async {
            let dir = self.tree.resolve_directory(parent).await?;
            dir.open_child(name).await
        }
        .await;

        let child = match resolved {
            Ok(child) => child,
            // Translate "not found" into a successful reply with inode 0
            // and the maximum validity window, so the kernel caches the
            // negative result instead of re-querying.
            Err(FsError::NotFound) => return Ok(attr::negative_entry()),
            Err(err) => return Err(err),
        };

        match child.stat().await {
            Ok(st) => {
                child.inc_external_refcount();
                Ok(attr::entry_out(st))
            }
            Err(err) => {
                // The most common cause is a materialized file whose overlay
                // data is missing or corrupt, e.g. after a hard reboot.
                // Returning a degraded record instead of failing keeps the
                // inode referenceable so clients can still unlink it.
                warn!(
                    id = %child.id(),
                    error = %err,
                    "stat failed for resolved inode, returning degraded attributes"
                );
                child.inc_external_refcount();
                Ok(attr::corrupt_overlay_entry(child.id()))
            }
        }
    }

    async fn forget(&self, id: InodeId, nlookup: u64) {
        debug!(%id, nlookup, "forget");
        if let Ok(inode) = self.tree.resolve(id).await {
            inode.dec_external_refcount(nlookup);
        }
    }

    async fn getattr(&self, id: InodeId) -> FsResult<AttrOut> {
        debug!(%id, "getattr");
        let inode = self.tree.resolve(id).await?;
        let st = inode.stat().await?;
        Ok(attr::attr_out(st))
    }

    async fn setattr(&self, id: InodeId, request: SetAttrRequest) -> FsResult<AttrOut> {
        debug!(%id, "setattr");
        // Mounts never allow the suid, sgid or sticky bits; rejecting them
        // here means writes don't have to clear them.
        if let Some(mode) = request.mode {
            if mode & EXTRA_MODE_BITS != 0 {
                return Err(FsError::NotPermitted("extra mode bits are disallowed"));
            }
        }
        let inode = self.tree.resolve(id).await?;
        let st = inode.set_attributes(request).await?;
        Ok(attr::attr_out(st))
    }

    async fn readlink(&self, id: InodeId) -> FsResult<String> {
        debug!(%id, "readlink");
        let file = self.tree.resolve_file(id).await?;
        file.read_symlink_target().await
    }

    async fn mknod(
        &self,
        parent: InodeId,
        name: &PathComponent,
        mode: u32,
        rdev: u32,
    ) -> FsResult<EntryOut> {
        debug!(%parent, %name, mode, rdev, "mknod");
        name.check_length()?;
        let dir = self.tree.resolve_directory(parent).await?;
        let child = dir.create_child_file(name, mode).await?;
        let st = child.stat().await?;
        child.inc_external_refcount();
        Ok(attr::entry_out(st))
    }

    async fn mkdir(&self, parent: InodeId, name: &PathComponent, mode: u32) -> FsResult<EntryOut> {
        debug!(%parent, %name, mode, "mkdir");
        name.check_length()?;
        let dir = self.tree.resolve_directory(parent).await?;
        let child = dir.create_child_directory(name, mode).await?;
        let st = child.stat().await?;
        child.inc_external_refcount();
        Ok(attr::entry_out(st))
    }

    async fn unlink(&self, parent: InodeId, name: &PathComponent) -> FsResult<()> {
        debug!(%parent, %name, "unlink");
        let dir = self.tree.resolve_directory(parent).await?;
        dir.remove_child_file(name).await
    }

    async fn rmdir(&self, parent: InodeId, name: &PathComponent) -> FsResult<()> {
        debug!(%parent, %name, "rmdir");
        let dir = self.tree.resolve_directory(parent).await?;
        dir.remove_child_directory(name).await
    }

    async fn symlink(
        &self,
        parent: InodeId,
        name: &PathComponent,
        target: &str,
    ) -> FsResult<EntryOut> {
        debug!(%parent, %name, target, "symlink");
        name.check_length()?;
        let dir = self.tree.resolve_directory(parent).await?;
        let child = dir.create_symlink(name, target).await?;
        let st = child.stat().await?;
        child.inc_external_refcount();
        Ok(attr::entry_out(st))
    }

    async fn rename(
        &self,
        parent: InodeId,
        name: &PathComponent,
        new_parent: InodeId,
        new_name: &PathComponent,
    ) -> FsResult<()> {
        debug!(%parent, %name, %new_parent, %new_name, "rename");
        new_name.check_length()?;
        // Both parents are looked up concurrently; the rename runs once
        // both have resolved.
        let (dir, new_dir) = tokio::try_join!(
            self.tree.resolve_directory(parent),
            self.tree.resolve_directory(new_parent),
        )?;
        dir.rename_child(name, new_dir, new_name).await
    }

    async fn link(
        &self,
        _id: InodeId,
        _new_parent: InodeId,
        new_name: &PathComponent,
    ) -> FsResult<EntryOut> {
        new_name.check_length()?;
        // Hard links cannot be tracked in source control and are not
        // portable across target platforms.
        Err(FsError::NotPermitted(
            "hard links are not supported in repofs mount points",
        ))
    }

    async fn open(&self, id: InodeId, flags: i32) -> FsResult<u64> {
        debug!(%id, flags, "open");
        if self.caps.no_open_support {
            // The kernel understands this reply and stops sending
            // open/release entirely.
            return Err(FsError::NotSupported(
                "open calls are stateless and not required",
            ));
        }
        Ok(0)
    }

    async fn create(
        &self,
        parent: InodeId,
        name: &PathComponent,
        mode: u32,
        flags: i32,
    ) -> FsResult<EntryOut> {
        debug!(%parent, %name, mode, flags, "create");
        name.check_length()?;
        // Force a regular file; the device argument is meaningless for those.
        let mode = REGULAR_FILE_MODE | (mode & 0o7777);
        let dir = self.tree.resolve_directory(parent).await?;
        let child = dir.create_child_file(name, mode).await?;
        let st = child.stat().await?;
        child.inc_external_refcount();
        Ok(attr::entry_out(st))
    }

    async fn read(&self, id: InodeId, size: u32, offset: u64) -> FsResult<Vec<u8>> {
        debug!(%id, size, offset, "read");
        let file = self.tree.resolve_file(id).await?;
        file.read_bytes(size, offset).await
    }

    async fn write(&self, id: InodeId, data: &[u8], offset: u64) -> FsResult<u64> {
        debug!(%id, len = data.len(), offset, "write");
        let file = self.tree.resolve_file(id).await?;
        file.write_bytes(data, offset).await
    }

    async fn flush(&self, _id: InodeId, _lock_owner: u64) -> FsResult<()> {
        // Not meaningful for this backing store; the kernel stops sending
        // flush once it sees this reply.
        Err(FsError::NotSupported("flush"))
    }

    async fn release(&self, _id: InodeId, _fh: u64) -> FsResult<()> {
        Ok(())
    }

    async fn fsync(&self, id: InodeId, data_only: bool) -> FsResult<()> {
        debug!(%id, data_only, "fsync");
        let file = self.tree.resolve_file(id).await?;
        file.fsync(data_only).await
    }

    async fn opendir(&self, id: InodeId, flags: i32) -> FsResult<u64> {
        debug!(%id, flags, "opendir");
        if self.caps.no_opendir_support {
            return Err(FsError::NotSupported(
                "opendir calls are stateless and not required",
            ));
        }
        Ok(0)
    }

    async fn readdir(&self, id: InodeId, offset: u64) -> FsResult<Vec<DirectoryEntry>> {
        debug!(%id, offset, "readdir");
        let dir = self.tree.resolve_directory(id).await?;
        let children = dir.list_children().await?;
        Ok(children.into_iter().skip(offset as usize).collect())
    }

    async fn releasedir(&self, id: InodeId, fh: u64) -> FsResult<()> {
        debug!(%id, fh, "releasedir");
        Ok(())
    }

    async fn fsyncdir(&self, _id: InodeId, _data_only: bool) -> FsResult<()> {
        // The tree structure has nothing to sync; the kernel stops sending
        // these once it sees the reply.
        Err(FsError::NotSupported("fsyncdir"))
    }

    async fn getxattr(&self, id: InodeId, name: &str) -> FsResult<Vec<u8>> {
        debug!(%id, name, "getxattr");
        let inode = self.tree.resolve(id).await?;
        inode.get_xattr(name).await
    }

    async fn listxattr(&self, id: InodeId) -> FsResult<Vec<String>> {
        debug!(%id, "listxattr");
        let inode = self.tree.resolve(id).await?;
        inode.list_xattrs().await
    }

    async fn statfs(&self, _id: InodeId) -> FsResult<StatFs> {
        // Pass through the backing store's space numbers; zeroes would make
        // copy tools refuse to start. Block size, fragment size and name
        // length are reporting conventions, not measured values.
        let space = self.tree.space_accounting().await?;
        Ok(StatFs {
            blocks: space.block_count,
            bfree: space.blocks_free,
            bavail: space.blocks_available,
            files: space.inode_count,
            ffree: space.inodes_free,
            bsize: self.caps.max_readahead,
            frsize: FRAGMENT_SIZE,
            namelen: NAME_MAX as u32,
        })
    }
}
