//! In-memory inode tree used by the dispatcher tests.
//!
//! Implements the collaborator contract over a single locked node table,
//! with per-node fault injection for the corrupt-overlay paths.

use crate::error::{FsError, FsResult};
use crate::path::{PathComponent, RelativePath};
use crate::tree::{
    DirRef, DirectoryEntry, DirectoryNode, FileNode, FileRef, InodeId, InodeNode, InodeRef,
    InodeTree, SetAttrRequest, SpaceAccounting,
};
use async_trait::async_trait;
use fuser::{FileAttr, FileType};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

const ROOT_ID: u64 = 1;

#[derive(Debug)]
struct Node {
    kind: FileType,
    mode: u32,
    content: Vec<u8>,
    symlink_target: Option<String>,
    children: BTreeMap<String, u64>,
    refcount: u64,
    materialized: bool,
    corrupt: bool,
    xattrs: BTreeMap<String, Vec<u8>>,
    fsync_count: u64,
}

impl Node {
    fn new(kind: FileType, mode: u32) -> Self {
        Node {
            kind,
            mode,
            content: Vec::new(),
            symlink_target: None,
            children: BTreeMap::new(),
            refcount: 0,
            materialized: false,
            corrupt: false,
            xattrs: BTreeMap::new(),
            fsync_count: 0,
        }
    }
}

#[derive(Debug)]
struct TreeState {
    nodes: Mutex<HashMap<u64, Node>>,
    next_id: AtomicU64,
}

impl TreeState {
    fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn walk(&self, path: &RelativePath) -> Option<u64> {
        let nodes = self.nodes.lock();
        let mut current = ROOT_ID;
        for name in path.components() {
            let node = nodes.get(&current)?;
            current = *node.children.get(name.as_str())?;
        }
        Some(current)
    }
}

/// Shared in-memory tree; clones hand out handles over the same state.
#[derive(Clone)]
pub struct MemoryTree {
    state: Arc<TreeState>,
}

impl MemoryTree {
    pub fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(ROOT_ID, Node::new(FileType::Directory, 0o755));
        MemoryTree {
            state: Arc::new(TreeState {
                nodes: Mutex::new(nodes),
                next_id: AtomicU64::new(ROOT_ID + 1),
            }),
        }
    }

    fn handle(&self, id: u64) -> MemoryNode {
        MemoryNode {
            state: self.state.clone(),
            id,
        }
    }

    fn insert_at(&self, path: &str, node: Node) -> InodeId {
        let path = RelativePath::new(path).unwrap();
        let (dirname, basename) = path.split().expect("cannot insert the root");
        let mut nodes = self.state.nodes.lock();
        let mut parent = ROOT_ID;
        for name in dirname.components() {
            let next = nodes
                .get(&parent)
                .unwrap()
                .children
                .get(name.as_str())
                .copied();
            parent = match next {
                Some(id) => id,
                None => {
                    let id = self.state.allocate_id();
                    nodes.insert(id, Node::new(FileType::Directory, 0o755));
                    nodes
                        .get_mut(&parent)
                        .unwrap()
                        .children
                        .insert(name.as_str().to_string(), id);
                    id
                }
            };
        }
        let id = self.state.allocate_id();
        nodes.insert(id, node);
        nodes
            .get_mut(&parent)
            .unwrap()
            .children
            .insert(basename.as_str().to_string(), id);
        InodeId::new(id).unwrap()
    }

    pub fn add_dir(&self, path: &str) -> InodeId {
        self.insert_at(path, Node::new(FileType::Directory, 0o755))
    }

    pub fn add_file(&self, path: &str, content: &[u8]) -> InodeId {
        let mut node = Node::new(FileType::RegularFile, 0o644);
        node.content = content.to_vec();
        self.insert_at(path, node)
    }

    pub fn add_symlink(&self, path: &str, target: &str) -> InodeId {
        let mut node = Node::new(FileType::Symlink, 0o777);
        node.symlink_target = Some(target.to_string());
        self.insert_at(path, node)
    }

    pub fn set_xattr(&self, path: &str, name: &str, value: &[u8]) {
        let id = self.id_of(path).unwrap().get();
        self.state
            .nodes
            .lock()
            .get_mut(&id)
            .unwrap()
            .xattrs
            .insert(name.to_string(), value.to_vec());
    }

    /// Make stat fail for the node at `path`.
    pub fn set_corrupt(&self, path: &str) {
        let id = self.id_of(path).unwrap().get();
        self.state.nodes.lock().get_mut(&id).unwrap().corrupt = true;
    }

    pub fn id_of(&self, path: &str) -> Option<InodeId> {
        let path = RelativePath::new(path).unwrap();
        self.state.walk(&path).and_then(InodeId::new)
    }

    pub fn has_node(&self, path: &str) -> bool {
        self.id_of(path).is_some()
    }

    pub fn refcount(&self, path: &str) -> u64 {
        let id = self.id_of(path).unwrap().get();
        self.state.nodes.lock().get(&id).unwrap().refcount
    }

    pub fn is_materialized(&self, path: &str) -> bool {
        let id = self.id_of(path).unwrap().get();
        self.state.nodes.lock().get(&id).unwrap().materialized
    }

    pub fn mode_of(&self, path: &str) -> u32 {
        let id = self.id_of(path).unwrap().get();
        self.state.nodes.lock().get(&id).unwrap().mode
    }

    pub fn content_of(&self, path: &str) -> Vec<u8> {
        let id = self.id_of(path).unwrap().get();
        self.state.nodes.lock().get(&id).unwrap().content.clone()
    }

    pub fn fsync_count(&self, path: &str) -> u64 {
        let id = self.id_of(path).unwrap().get();
        self.state.nodes.lock().get(&id).unwrap().fsync_count
    }
}

struct MemoryNode {
    state: Arc<TreeState>,
    id: u64,
}

impl MemoryNode {
    fn with_node<T>(&self, f: impl FnOnce(&Node) -> T) -> FsResult<T> {
        let nodes = self.state.nodes.lock();
        nodes.get(&self.id).map(f).ok_or(FsError::NotFound)
    }

    fn with_node_mut<T>(&self, f: impl FnOnce(&mut Node) -> T) -> FsResult<T> {
        let mut nodes = self.state.nodes.lock();
        nodes.get_mut(&self.id).map(f).ok_or(FsError::NotFound)
    }

    fn child_handle(&self, id: u64) -> MemoryNode {
        MemoryNode {
            state: self.state.clone(),
            id,
        }
    }

    fn attr(&self, node: &Node) -> FileAttr {
        FileAttr {
            ino: self.id,
            size: node.content.len() as u64,
            blocks: (node.content.len() as u64 + 511) / 512,
            atime: UNIX_EPOCH,
            mtime: UNIX_EPOCH,
            ctime: UNIX_EPOCH,
            crtime: UNIX_EPOCH,
            kind: node.kind,
            perm: (node.mode & 0o7777) as u16,
            nlink: if node.kind == FileType::Directory { 2 } else { 1 },
            uid: 1000,
            gid: 1000,
            rdev: 0,
            flags: 0,
            blksize: 512,
        }
    }
}

#[async_trait]
impl InodeNode for MemoryNode {
    fn id(&self) -> InodeId {
        InodeId::new(self.id).unwrap()
    }

    fn is_directory(&self) -> bool {
        self.with_node(|n| n.kind == FileType::Directory)
            .unwrap_or(false)
    }

    async fn stat(&self) -> FsResult<FileAttr> {
        let nodes = self.state.nodes.lock();
        let node = nodes.get(&self.id).ok_or(FsError::NotFound)?;
        if node.corrupt {
            return Err(FsError::CorruptOverlay(self.id));
        }
        Ok(self.attr(node))
    }

    async fn set_attributes(&self, request: SetAttrRequest) -> FsResult<FileAttr> {
        let mut nodes = self.state.nodes.lock();
        let node = nodes.get_mut(&self.id).ok_or(FsError::NotFound)?;
        if let Some(mode) = request.mode {
            node.mode = mode;
        }
        if let Some(size) = request.size {
            node.content.resize(size as usize, 0);
        }
        let attr = self.attr(node);
        Ok(attr)
    }

    async fn get_xattr(&self, name: &str) -> FsResult<Vec<u8>> {
        self.with_node(|n| n.xattrs.get(name).cloned())?
            .ok_or(FsError::NotFound)
    }

    async fn list_xattrs(&self) -> FsResult<Vec<String>> {
        self.with_node(|n| n.xattrs.keys().cloned().collect())
    }

    fn inc_external_refcount(&self) {
        let _ = self.with_node_mut(|n| n.refcount += 1);
    }

    fn dec_external_refcount(&self, count: u64) {
        let _ = self.with_node_mut(|n| n.refcount = n.refcount.saturating_sub(count));
    }
}

#[async_trait]
impl DirectoryNode for MemoryNode {
    async fn open_child(&self, name: &PathComponent) -> FsResult<InodeRef> {
        let id = self
            .with_node(|n| n.children.get(name.as_str()).copied())?
            .ok_or(FsError::NotFound)?;
        Ok(Arc::new(self.child_handle(id)))
    }

    async fn open_child_directory(&self, name: &PathComponent) -> FsResult<DirRef> {
        let id = self
            .with_node(|n| n.children.get(name.as_str()).copied())?
            .ok_or(FsError::NotFound)?;
        let child = self.child_handle(id);
        if !child.is_directory() {
            return Err(FsError::NotADirectory);
        }
        Ok(Arc::new(child))
    }

    async fn create_child_file(&self, name: &PathComponent, mode: u32) -> FsResult<FileRef> {
        let mut nodes = self.state.nodes.lock();
        let parent = nodes.get(&self.id).ok_or(FsError::NotFound)?;
        if parent.children.contains_key(name.as_str()) {
            return Err(FsError::AlreadyExists);
        }
        let id = self.state.allocate_id();
        nodes.insert(id, Node::new(FileType::RegularFile, mode));
        nodes
            .get_mut(&self.id)
            .unwrap()
            .children
            .insert(name.as_str().to_string(), id);
        Ok(Arc::new(self.child_handle(id)))
    }

    async fn create_child_directory(&self, name: &PathComponent, mode: u32) -> FsResult<DirRef> {
        let mut nodes = self.state.nodes.lock();
        let parent = nodes.get(&self.id).ok_or(FsError::NotFound)?;
        if parent.children.contains_key(name.as_str()) {
            return Err(FsError::AlreadyExists);
        }
        let id = self.state.allocate_id();
        nodes.insert(id, Node::new(FileType::Directory, mode));
        nodes
            .get_mut(&self.id)
            .unwrap()
            .children
            .insert(name.as_str().to_string(), id);
        Ok(Arc::new(self.child_handle(id)))
    }

    async fn create_symlink(&self, name: &PathComponent, target: &str) -> FsResult<FileRef> {
        let mut nodes = self.state.nodes.lock();
        let parent = nodes.get(&self.id).ok_or(FsError::NotFound)?;
        if parent.children.contains_key(name.as_str()) {
            return Err(FsError::AlreadyExists);
        }
        let id = self.state.allocate_id();
        let mut node = Node::new(FileType::Symlink, 0o777);
        node.symlink_target = Some(target.to_string());
        nodes.insert(id, node);
        nodes
            .get_mut(&self.id)
            .unwrap()
            .children
            .insert(name.as_str().to_string(), id);
        Ok(Arc::new(self.child_handle(id)))
    }

    async fn remove_child_file(&self, name: &PathComponent) -> FsResult<()> {
        let mut nodes = self.state.nodes.lock();
        let parent = nodes.get(&self.id).ok_or(FsError::NotFound)?;
        let child_id = *parent
            .children
            .get(name.as_str())
            .ok_or(FsError::NotFound)?;
        if nodes.get(&child_id).unwrap().kind == FileType::Directory {
            return Err(FsError::NotAFile);
        }
        nodes.remove(&child_id);
        nodes
            .get_mut(&self.id)
            .unwrap()
            .children
            .remove(name.as_str());
        Ok(())
    }

    async fn remove_child_directory(&self, name: &PathComponent) -> FsResult<()> {
        let mut nodes = self.state.nodes.lock();
        let parent = nodes.get(&self.id).ok_or(FsError::NotFound)?;
        let child_id = *parent
            .children
            .get(name.as_str())
            .ok_or(FsError::NotFound)?;
        if nodes.get(&child_id).unwrap().kind != FileType::Directory {
            return Err(FsError::NotADirectory);
        }
        nodes.remove(&child_id);
        nodes
            .get_mut(&self.id)
            .unwrap()
            .children
            .remove(name.as_str());
        Ok(())
    }

    async fn rename_child(
        &self,
        name: &PathComponent,
        dest: DirRef,
        dest_name: &PathComponent,
    ) -> FsResult<()> {
        let dest_id = dest.id().get();
        let mut nodes = self.state.nodes.lock();
        let parent = nodes.get(&self.id).ok_or(FsError::NotFound)?;
        let child_id = *parent
            .children
            .get(name.as_str())
            .ok_or(FsError::NotFound)?;
        nodes
            .get_mut(&self.id)
            .unwrap()
            .children
            .remove(name.as_str());
        nodes
            .get_mut(&dest_id)
            .ok_or(FsError::NotFound)?
            .children
            .insert(dest_name.as_str().to_string(), child_id);
        Ok(())
    }

    async fn list_children(&self) -> FsResult<Vec<DirectoryEntry>> {
        let nodes = self.state.nodes.lock();
        let parent = nodes.get(&self.id).ok_or(FsError::NotFound)?;
        let mut entries = Vec::new();
        for (name, child_id) in &parent.children {
            let child = nodes.get(child_id).unwrap();
            entries.push(DirectoryEntry {
                id: InodeId::new(*child_id).unwrap(),
                name: PathComponent::new(name.clone()).unwrap(),
                kind: child.kind,
                size: child.content.len() as u64,
            });
        }
        Ok(entries)
    }
}

#[async_trait]
impl FileNode for MemoryNode {
    async fn read_bytes(&self, length: u32, offset: u64) -> FsResult<Vec<u8>> {
        self.with_node(|n| {
            let start = (offset as usize).min(n.content.len());
            let end = (start + length as usize).min(n.content.len());
            n.content[start..end].to_vec()
        })
    }

    async fn read_all(&self) -> FsResult<Vec<u8>> {
        self.with_node(|n| n.content.clone())
    }

    async fn write_bytes(&self, data: &[u8], offset: u64) -> FsResult<u64> {
        self.with_node_mut(|n| {
            let end = offset as usize + data.len();
            if n.content.len() < end {
                n.content.resize(end, 0);
            }
            n.content[offset as usize..end].copy_from_slice(data);
            n.materialized = true;
            data.len() as u64
        })
    }

    async fn read_symlink_target(&self) -> FsResult<String> {
        self.with_node(|n| n.symlink_target.clone())?
            .ok_or(FsError::NotAFile)
    }

    async fn mark_materialized(&self) -> FsResult<()> {
        self.with_node_mut(|n| n.materialized = true)
    }

    async fn fsync(&self, _data_only: bool) -> FsResult<()> {
        self.with_node_mut(|n| n.fsync_count += 1)
    }
}

#[async_trait]
impl InodeTree for MemoryTree {
    async fn resolve(&self, id: InodeId) -> FsResult<InodeRef> {
        if !self.state.nodes.lock().contains_key(&id.get()) {
            return Err(FsError::NotFound);
        }
        Ok(Arc::new(self.handle(id.get())))
    }

    async fn resolve_directory(&self, id: InodeId) -> FsResult<DirRef> {
        match self.state.nodes.lock().get(&id.get()) {
            None => Err(FsError::NotFound),
            Some(node) if node.kind != FileType::Directory => Err(FsError::NotADirectory),
            Some(_) => Ok(Arc::new(self.handle(id.get()))),
        }
    }

    async fn resolve_file(&self, id: InodeId) -> FsResult<FileRef> {
        match self.state.nodes.lock().get(&id.get()) {
            None => Err(FsError::NotFound),
            Some(node) if node.kind == FileType::Directory => Err(FsError::NotAFile),
            Some(_) => Ok(Arc::new(self.handle(id.get()))),
        }
    }

    async fn resolve_path(&self, path: &RelativePath) -> FsResult<InodeRef> {
        let id = self.state.walk(path).ok_or(FsError::NotFound)?;
        Ok(Arc::new(self.handle(id)))
    }

    async fn resolve_directory_path(&self, path: &RelativePath) -> FsResult<DirRef> {
        let id = self.state.walk(path).ok_or(FsError::NotFound)?;
        self.resolve_directory(InodeId::new(id).unwrap()).await
    }

    async fn resolve_file_path(&self, path: &RelativePath) -> FsResult<FileRef> {
        let id = self.state.walk(path).ok_or(FsError::NotFound)?;
        self.resolve_file(InodeId::new(id).unwrap()).await
    }

    fn root(&self) -> DirRef {
        Arc::new(self.handle(ROOT_ID))
    }

    async fn space_accounting(&self) -> FsResult<SpaceAccounting> {
        Ok(SpaceAccounting {
            block_count: 1000,
            blocks_free: 600,
            blocks_available: 500,
            inode_count: 100,
            inodes_free: 90,
        })
    }
}
