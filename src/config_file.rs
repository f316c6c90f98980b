//! The synthesized configuration file.
//!
//! A single well-known path inside the mount whose content is computed once
//! at construction from the mount identity. It is never represented in the
//! inode tree; the path-addressed handlers special-case it wherever a real
//! lookup would report "not found".

use crate::path::RelativePath;
use serde::Serialize;
use std::path::PathBuf;

/// Well-known path of the configuration file, relative to the mount root.
pub const CONFIG_FILE_PATH: &str = ".repofs/config";

/// Identity of a mount, captured when the dispatcher is constructed.
#[derive(Debug, Clone)]
pub struct MountInfo {
    /// Where the checkout is mounted.
    pub root_path: PathBuf,
    /// The daemon's communication socket.
    pub socket_path: PathBuf,
    /// Per-client storage directory.
    pub client_path: PathBuf,
}

#[derive(Serialize)]
struct ConfigDocument<'a> {
    #[serde(rename = "Config")]
    config: ConfigTable<'a>,
}

#[derive(Serialize)]
struct ConfigTable<'a> {
    root: &'a str,
    socket: &'a str,
    client: &'a str,
}

/// Read-only virtual file holding the serialized mount configuration.
#[derive(Debug, Clone)]
pub struct VirtualConfigFile {
    content: Vec<u8>,
}

impl VirtualConfigFile {
    pub fn new(mount: &MountInfo) -> Self {
        let root = mount.root_path.to_string_lossy();
        let socket = mount.socket_path.to_string_lossy();
        let client = mount.client_path.to_string_lossy();
        let document = ConfigDocument {
            config: ConfigTable {
                root: &root,
                socket: &socket,
                client: &client,
            },
        };
        let content = toml::to_string(&document)
            .expect("a table of strings always serializes")
            .into_bytes();
        VirtualConfigFile { content }
    }

    /// Whether `path` names the configuration file. Exact match only.
    pub fn matches(&self, path: &RelativePath) -> bool {
        path.as_str() == CONFIG_FILE_PATH
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn len(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}
