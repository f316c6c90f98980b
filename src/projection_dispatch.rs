//! Path-addressed operation handlers for the on-demand projection channel.
//!
//! The projection host addresses everything by relative path and reports
//! changes as after-the-fact notifications, so the handlers here resolve
//! structure lazily through the reconciler and keep per-directory
//! enumeration state in the session table.

use crate::config_file::{MountInfo, VirtualConfigFile};
use crate::enumeration::{EnumerationTable, FileMetadataEntry, SessionId};
use crate::error::{FsError, FsResult};
use crate::path::RelativePath;
use crate::reconcile;
use crate::stats::DispatchStats;
use crate::tree::InodeTree;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Metadata returned for a path-addressed lookup.
#[derive(Debug, Clone)]
pub struct FileMetadata {
    /// Canonical relative path, so the host records the canonical casing
    /// rather than whatever the query used.
    pub path: RelativePath,
    pub size: u64,
    pub is_directory: bool,
}

/// The path-addressed dispatcher surface consumed by the projection
/// channel. The counterpart of [`crate::fuse_dispatch::FuseHandler`]; a
/// mount serves exactly one of the two.
#[async_trait]
pub trait ProjectionHandler: Send + Sync {
    /// Open an enumeration session over a directory's children.
    async fn open_enumeration(&self, path: &RelativePath, session: SessionId) -> FsResult<()>;

    fn close_enumeration(&self, session: SessionId) -> FsResult<()>;

    /// Offer directory entries to `fill`, resuming where the previous batch
    /// stopped. See [`EnumerationTable::read_batch`].
    fn read_enumeration(
        &self,
        session: SessionId,
        search_expression: Option<&str>,
        restart: bool,
        fill: &mut dyn FnMut(&FileMetadataEntry) -> bool,
    ) -> FsResult<()>;

    /// Look a path up; `Ok(None)` means definitively absent.
    async fn lookup(&self, path: &RelativePath) -> FsResult<Option<FileMetadata>>;

    /// Whether a file exists at `path`.
    async fn access(&self, path: &RelativePath) -> FsResult<bool>;

    /// Read the file at `path`. Returns the entire content; partial reads
    /// are not implemented on this channel.
    async fn read(&self, path: &RelativePath, offset: u64, length: u32) -> FsResult<Vec<u8>>;

    /// Notification: a file or directory was created.
    async fn file_created(&self, path: &RelativePath, is_directory: bool) -> FsResult<()>;

    /// Notification: an existing file's content was replaced.
    async fn file_overwritten(&self, path: &RelativePath) -> FsResult<()>;

    /// Notification: a handle closed after modifying the file.
    async fn file_modified(&self, path: &RelativePath) -> FsResult<()>;

    /// Notification: a file was renamed. An empty source means the file
    /// moved into the mount, an empty destination means it moved out.
    async fn file_renamed(
        &self,
        old_path: &RelativePath,
        new_path: &RelativePath,
        is_directory: bool,
    ) -> FsResult<()>;

    /// Gating notification sent before a rename; failing it vetoes the
    /// rename.
    async fn pre_rename(&self, old_path: &RelativePath, new_path: &RelativePath) -> FsResult<()>;

    /// Notification: a handle closed after the file was deleted.
    async fn file_deleted(&self, path: &RelativePath, is_directory: bool) -> FsResult<()>;

    /// Gating notification sent before a hardlink is created.
    async fn pre_hardlink(&self, path: &RelativePath) -> FsResult<()>;
}

/// Concrete path-addressed dispatcher over an inode tree.
pub struct ProjectionDispatcher {
    tree: Arc<dyn InodeTree>,
    stats: Arc<DispatchStats>,
    sessions: EnumerationTable,
    config: VirtualConfigFile,
}

impl ProjectionDispatcher {
    pub fn new(tree: Arc<dyn InodeTree>, mount: &MountInfo, stats: Arc<DispatchStats>) -> Self {
        ProjectionDispatcher {
            tree,
            stats,
            sessions: EnumerationTable::new(),
            config: VirtualConfigFile::new(mount),
        }
    }

    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }
}

#[async_trait]
impl ProjectionHandler for ProjectionDispatcher {
    async fn open_enumeration(&self, path: &RelativePath, session: SessionId) -> FsResult<()> {
        debug!(%path, %session, "opendir");
        let dir = self.tree.resolve_directory_path(path).await?;
        let children = dir.list_children().await?;
        let entries = children.iter().map(FileMetadataEntry::from).collect();
        self.sessions.open(session, entries)
    }

    fn close_enumeration(&self, session: SessionId) -> FsResult<()> {
        debug!(%session, "closedir");
        self.sessions.close(session)
    }

    fn read_enumeration(
        &self,
        session: SessionId,
        search_expression: Option<&str>,
        restart: bool,
        fill: &mut dyn FnMut(&FileMetadataEntry) -> bool,
    ) -> FsResult<()> {
        debug!(%session, search_expression, restart, "readdir");
        self.sessions
            .read_batch(session, search_expression, restart, fill)
    }

    async fn lookup(&self, path: &RelativePath) -> FsResult<Option<FileMetadata>> {
        debug!(%path, "lookup");
        match self.tree.resolve_path(path).await {
            Ok(inode) => {
                let st = inode.stat().await?;
                Ok(Some(FileMetadata {
                    path: path.clone(),
                    size: st.size,
                    is_directory: inode.is_directory(),
                }))
            }
            Err(FsError::NotFound) => {
                if self.config.matches(path) {
                    Ok(Some(FileMetadata {
                        path: path.clone(),
                        size: self.config.len() as u64,
                        is_directory: false,
                    }))
                } else {
                    debug!(%path, "file not found");
                    Ok(None)
                }
            }
            Err(err) => Err(err),
        }
    }

    async fn access(&self, path: &RelativePath) -> FsResult<bool> {
        debug!(%path, "access");
        match self.tree.resolve_path(path).await {
            Ok(_) => Ok(true),
            Err(FsError::NotFound) => Ok(self.config.matches(path)),
            Err(err) => Err(err),
        }
    }

    async fn read(&self, path: &RelativePath, offset: u64, length: u32) -> FsResult<Vec<u8>> {
        debug!(%path, offset, length, "read");
        match self.tree.resolve_file_path(path).await {
            Ok(file) => file.read_all().await,
            // The virtual config file has full-content semantics only; the
            // requested window is ignored.
            Err(FsError::NotFound) if self.config.matches(path) => {
                Ok(self.config.content().to_vec())
            }
            Err(err) => Err(err),
        }
    }

    async fn file_created(&self, path: &RelativePath, is_directory: bool) -> FsResult<()> {
        debug!(%path, is_directory, "file created");
        reconcile::create_node(self.tree.as_ref(), &self.stats, path, is_directory).await
    }

    async fn file_overwritten(&self, path: &RelativePath) -> FsResult<()> {
        debug!(%path, "file overwritten");
        reconcile::materialize_node(self.tree.as_ref(), path).await
    }

    async fn file_modified(&self, path: &RelativePath) -> FsResult<()> {
        debug!(%path, "file modified");
        reconcile::materialize_node(self.tree.as_ref(), path).await
    }

    async fn file_renamed(
        &self,
        old_path: &RelativePath,
        new_path: &RelativePath,
        is_directory: bool,
    ) -> FsResult<()> {
        debug!(%old_path, %new_path, is_directory, "file renamed");
        // Moves in and out of the mount arrive with one side empty; treat
        // them as plain creations and removals.
        if old_path.is_empty() {
            reconcile::create_node(self.tree.as_ref(), &self.stats, new_path, is_directory).await
        } else if new_path.is_empty() {
            reconcile::remove_node(self.tree.as_ref(), old_path, is_directory).await
        } else {
            reconcile::rename_node(self.tree.as_ref(), &self.stats, old_path, new_path).await
        }
    }

    async fn pre_rename(&self, old_path: &RelativePath, new_path: &RelativePath) -> FsResult<()> {
        debug!(%old_path, %new_path, "pre rename");
        Ok(())
    }

    async fn file_deleted(&self, path: &RelativePath, is_directory: bool) -> FsResult<()> {
        debug!(%path, is_directory, "file deleted");
        reconcile::remove_node(self.tree.as_ref(), path, is_directory).await
    }

    async fn pre_hardlink(&self, path: &RelativePath) -> FsResult<()> {
        debug!(%path, "pre hardlink");
        Err(FsError::NotPermitted("hard links are not supported"))
    }
}
