//! Reconciliation of out-of-order change notifications.
//!
//! The projection host delivers notifications asynchronously and after the
//! fact, with no hierarchical ordering guarantee: a notification for a
//! child can arrive before the one announcing its parent directory. The
//! helpers here resolve a notification's parent chain and, when resolution
//! fails with "not found", pessimistically create every missing ancestor
//! before applying the requested mutation.

use crate::error::{FsError, FsResult};
use crate::path::RelativePath;
use crate::stats::DispatchStats;
use crate::tree::{DirRef, InodeTree};
use tracing::debug;

const RECONCILE_DIR_MODE: u32 = 0o755;
const RECONCILE_FILE_MODE: u32 = 0o644;

/// Resolve `path` as a directory, creating any missing ancestors.
///
/// Each segment is an idempotent "create or confirm exists" step: a
/// concurrent reconciliation for a sibling path may have created the
/// directory already, which counts as success.
pub async fn resolve_dir_or_create(
    tree: &dyn InodeTree,
    stats: &DispatchStats,
    path: &RelativePath,
) -> FsResult<DirRef> {
    match tree.resolve_directory_path(path).await {
        Ok(dir) => Ok(dir),
        Err(FsError::NotFound) => {
            stats.record_out_of_order_create();
            debug!(%path, "out of order directory creation notification");

            let mut dir = tree.root();
            for name in path.components() {
                dir = match dir.create_child_directory(&name, RECONCILE_DIR_MODE).await {
                    Ok(created) => created,
                    Err(FsError::AlreadyExists) => dir.open_child_directory(&name).await?,
                    Err(err) => return Err(err),
                };
            }
            Ok(dir)
        }
        Err(err) => Err(err),
    }
}

/// Apply a creation notification for `path`.
pub async fn create_node(
    tree: &dyn InodeTree,
    stats: &DispatchStats,
    path: &RelativePath,
    is_directory: bool,
) -> FsResult<()> {
    let Some((dirname, basename)) = path.split() else {
        return Err(FsError::InvalidArgument(
            "cannot create the mount root".to_string(),
        ));
    };
    let parent = resolve_dir_or_create(tree, stats, &dirname).await?;
    if is_directory {
        match parent
            .create_child_directory(&basename, RECONCILE_DIR_MODE)
            .await
        {
            // A concurrent notification for a child of this directory may
            // have created it first.
            Ok(_) | Err(FsError::AlreadyExists) => Ok(()),
            Err(err) => Err(err),
        }
    } else {
        parent
            .create_child_file(&basename, RECONCILE_FILE_MODE)
            .await
            .map(|_| ())
    }
}

/// Mark the file at `path` as carrying local modifications.
pub async fn materialize_node(tree: &dyn InodeTree, path: &RelativePath) -> FsResult<()> {
    let file = tree.resolve_file_path(path).await?;
    file.mark_materialized().await
}

/// Apply a removal notification for `path`.
pub async fn remove_node(
    tree: &dyn InodeTree,
    path: &RelativePath,
    is_directory: bool,
) -> FsResult<()> {
    let Some((dirname, basename)) = path.split() else {
        return Err(FsError::InvalidArgument(
            "cannot remove the mount root".to_string(),
        ));
    };
    let parent = tree.resolve_directory_path(&dirname).await?;
    if is_directory {
        parent.remove_child_directory(&basename).await
    } else {
        parent.remove_child_file(&basename).await
    }
}

/// Apply a rename notification. Both parent chains are reconciled before
/// the rename itself.
///
/// A source that is itself still missing because its creation notification
/// has not arrived yet fails the rename; it is not retried here.
pub async fn rename_node(
    tree: &dyn InodeTree,
    stats: &DispatchStats,
    old_path: &RelativePath,
    new_path: &RelativePath,
) -> FsResult<()> {
    let Some((old_dirname, old_name)) = old_path.split() else {
        return Err(FsError::InvalidArgument(
            "cannot rename the mount root".to_string(),
        ));
    };
    let Some((new_dirname, new_name)) = new_path.split() else {
        return Err(FsError::InvalidArgument(
            "cannot rename over the mount root".to_string(),
        ));
    };

    let (old_parent, new_parent) = tokio::try_join!(
        resolve_dir_or_create(tree, stats, &old_dirname),
        resolve_dir_or_create(tree, stats, &new_dirname),
    )?;
    old_parent
        .rename_child(&old_name, new_parent, &new_name)
        .await
}
