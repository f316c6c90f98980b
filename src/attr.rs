//! Translation from raw stat results into protocol-facing attribute and
//! entry records, including the negative-cache and corrupt-overlay policies.

use crate::tree::InodeId;
use fuser::{FileAttr, FileType};
use std::time::{Duration, UNIX_EPOCH};

/// Cache validity for ordinary attribute replies.
pub const ATTR_TTL: Duration = Duration::from_secs(1);

/// Validity window for records backed by corrupt overlay data. Short, so the
/// kernel re-checks the inode soon.
pub const CORRUPT_OVERLAY_TTL: Duration = Duration::from_secs(5);

/// Validity window for negative lookups; the kernel may cache the absence
/// for as long as it likes.
pub const NEGATIVE_TTL: Duration = Duration::MAX;

/// An attribute reply: the raw stat record plus its cache validity window.
#[derive(Debug, Clone, Copy)]
pub struct AttrOut {
    pub attr: FileAttr,
    pub ttl: Duration,
}

/// An entry reply for lookup-style operations.
#[derive(Debug, Clone, Copy)]
pub struct EntryOut {
    /// Inode identifier; zero only in negative entries.
    pub nodeid: u64,
    pub generation: u64,
    pub attr: FileAttr,
    pub attr_ttl: Duration,
    pub entry_ttl: Duration,
}

pub fn attr_out(attr: FileAttr) -> AttrOut {
    AttrOut {
        attr,
        ttl: ATTR_TTL,
    }
}

pub fn entry_out(attr: FileAttr) -> EntryOut {
    debug_assert!(attr.ino != 0, "inode 0 must never reach the protocol layer");
    EntryOut {
        nodeid: attr.ino,
        generation: 0,
        attr,
        attr_ttl: ATTR_TTL,
        entry_ttl: ATTR_TTL,
    }
}

/// Negative entry: identifier zero with the maximum validity window, so the
/// kernel caches the absence instead of re-querying.
pub fn negative_entry() -> EntryOut {
    EntryOut {
        nodeid: 0,
        generation: 0,
        attr: synthesized_attr(0),
        attr_ttl: NEGATIVE_TTL,
        entry_ttl: NEGATIVE_TTL,
    }
}

/// Degraded entry for an inode whose overlay data fails to stat.
///
/// A regular-file record with the short validity window keeps the inode
/// referenceable, so callers can still remove the corrupt entry.
pub fn corrupt_overlay_entry(id: InodeId) -> EntryOut {
    EntryOut {
        nodeid: id.get(),
        generation: 0,
        attr: synthesized_attr(id.get()),
        attr_ttl: CORRUPT_OVERLAY_TTL,
        entry_ttl: CORRUPT_OVERLAY_TTL,
    }
}

fn synthesized_attr(ino: u64) -> FileAttr {
    FileAttr {
        ino,
        size: 0,
        blocks: 0,
        atime: UNIX_EPOCH,
        mtime: UNIX_EPOCH,
        ctime: UNIX_EPOCH,
        crtime: UNIX_EPOCH,
        kind: FileType::RegularFile,
        perm: 0,
        nlink: 1,
        uid: 0,
        gid: 0,
        rdev: 0,
        flags: 0,
        blksize: 512,
    }
}
