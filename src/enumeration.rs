//! Directory enumeration sessions for the projection channel.
//!
//! A session is opened with a snapshot of a directory's children, read in
//! batches through a caller-supplied buffer-fill callback, optionally
//! restarted, and closed. Session ids are supplied by the host and never
//! reused across open/close pairs.

use crate::error::{FsError, FsResult};
use crate::tree::DirectoryEntry;
use fuser::FileType;
use parking_lot::{Mutex, RwLock};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

/// Externally supplied enumeration session key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub u128);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// Immutable snapshot element captured when a session opens.
#[derive(Debug, Clone)]
pub struct FileMetadataEntry {
    pub name: String,
    pub is_directory: bool,
    pub size: u64,
}

impl From<&DirectoryEntry> for FileMetadataEntry {
    fn from(entry: &DirectoryEntry) -> Self {
        FileMetadataEntry {
            name: entry.name.as_str().to_string(),
            is_directory: entry.kind == FileType::Directory,
            size: entry.size,
        }
    }
}

/// Cursor over a directory snapshot.
///
/// The host guarantees at most one in-flight read per session, so the
/// cursor needs no internal synchronization; the table wraps each session
/// in a mutex purely to satisfy shared ownership.
#[derive(Debug)]
pub struct Enumerator {
    entries: Vec<FileMetadataEntry>,
    cursor: usize,
    search_expression: Option<String>,
}

impl Enumerator {
    pub fn new(mut entries: Vec<FileMetadataEntry>) -> Self {
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Enumerator {
            entries,
            cursor: 0,
            search_expression: None,
        }
    }

    pub fn is_search_expression_empty(&self) -> bool {
        self.search_expression.is_none()
    }

    pub fn save_expression(&mut self, expression: &str) {
        self.search_expression = Some(expression.to_string());
    }

    pub fn restart(&mut self) {
        self.cursor = 0;
    }

    /// The next entry matching the stored expression, without consuming it.
    pub fn current(&mut self) -> Option<&FileMetadataEntry> {
        while let Some(entry) = self.entries.get(self.cursor) {
            let matched = match &self.search_expression {
                Some(expression) => wildcard_match(expression, &entry.name),
                None => true,
            };
            if matched {
                break;
            }
            self.cursor += 1;
        }
        self.entries.get(self.cursor)
    }

    pub fn advance(&mut self) {
        self.cursor += 1;
    }
}

/// Case-insensitive `*`/`?` wildcard match, the projection host's name
/// comparison rules.
fn wildcard_match(pattern: &str, name: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().flat_map(|c| c.to_lowercase()).collect();
    let name: Vec<char> = name.chars().flat_map(|c| c.to_lowercase()).collect();

    let (mut p, mut n) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;
    while n < name.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == name[n]) {
            p += 1;
            n += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some((p, n));
            p += 1;
        } else if let Some((star_p, star_n)) = star {
            // Let the last star absorb one more character and retry.
            p = star_p + 1;
            n = star_n + 1;
            star = Some((star_p, star_n + 1));
        } else {
            return false;
        }
    }
    while p < pattern.len() && pattern[p] == '*' {
        p += 1;
    }
    p == pattern.len()
}

/// Concurrent map from session id to enumeration state.
///
/// Locked at table granularity: read-batch takes the read lock, open and
/// close take the write lock, so sessions for different directories never
/// interfere.
#[derive(Debug, Default)]
pub struct EnumerationTable {
    sessions: RwLock<HashMap<SessionId, Mutex<Enumerator>>>,
}

impl EnumerationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a freshly captured snapshot. The id being present already is a
    /// host contract violation and must not overwrite the live session.
    pub fn open(&self, id: SessionId, entries: Vec<FileMetadataEntry>) -> FsResult<()> {
        match self.sessions.write().entry(id) {
            Entry::Occupied(_) => Err(FsError::InvalidArgument(format!(
                "enumeration session {} is already open",
                id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(Mutex::new(Enumerator::new(entries)));
                Ok(())
            }
        }
    }

    /// Drop a session. Closing an id that was never opened is a host
    /// contract violation.
    pub fn close(&self, id: SessionId) -> FsResult<()> {
        match self.sessions.write().remove(&id) {
            Some(_) => Ok(()),
            None => Err(FsError::InvalidArgument(format!(
                "enumeration session {} is not open",
                id
            ))),
        }
    }

    /// Offer entries to `fill` starting at the session cursor.
    ///
    /// The cursor advances past each accepted entry and stays on the first
    /// rejected one, so the next call resumes exactly there. A missing id is
    /// reported as an invalid parameter rather than a hard failure.
    pub fn read_batch(
        &self,
        id: SessionId,
        search_expression: Option<&str>,
        restart: bool,
        fill: &mut dyn FnMut(&FileMetadataEntry) -> bool,
    ) -> FsResult<()> {
        let sessions = self.sessions.read();
        let Some(cell) = sessions.get(&id) else {
            debug!(session = %id, "enumeration session not found");
            return Err(FsError::InvalidArgument(format!(
                "enumeration session {} is not open",
                id
            )));
        };
        let mut session = cell.lock();

        if session.is_search_expression_empty() || restart {
            session.save_expression(search_expression.unwrap_or("*"));
        }
        if restart {
            session.restart();
        }

        while let Some(entry) = session.current() {
            if !fill(entry) {
                // Out of buffer space; this entry didn't make it. Resume
                // here on the next call.
                return Ok(());
            }
            session.advance();
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}
