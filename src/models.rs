use std::collections::HashMap;
use std::fmt;
use std::fs::Metadata;
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::path::PathBuf;

use crate::constants::WORLD_READABLE_BIT;

/// Kind of filesystem node an archive entry describes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Regular,
    Directory,
    Symlink,
    /// Device nodes, FIFOs and anything else without archivable content
    Other,
}

impl EntryKind {
    pub fn from_metadata(metadata: &Metadata) -> Self {
        let file_type = metadata.file_type();
        if file_type.is_symlink() {
            EntryKind::Symlink
        } else if file_type.is_dir() {
            EntryKind::Directory
        } else if file_type.is_file() {
            EntryKind::Regular
        } else {
            EntryKind::Other
        }
    }
}

/// One record of the output archive.
///
/// Built from a node's `lstat` metadata at visit time, written to the archive
/// stream straight away and then dropped.
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    /// Path relative to the walk root, `/`-separated
    pub rel_path: PathBuf,
    pub kind: EntryKind,
    pub mode: u32,
    pub mtime: u64,
    /// Declared content length. Zero whenever no content follows the header.
    pub size: u64,
    pub link_target: Option<PathBuf>,
}

impl ArchiveEntry {
    /// Build an entry from node metadata, applying the content policy to `size`.
    pub fn from_metadata(rel_path: PathBuf, metadata: &Metadata, link_target: Option<PathBuf>) -> Self {
        let kind = EntryKind::from_metadata(metadata);
        let mode = metadata.permissions().mode();
        let mut entry = ArchiveEntry {
            rel_path,
            kind,
            mode,
            mtime: metadata.mtime().max(0) as u64,
            size: 0,
            link_target,
        };
        if entry.has_content() {
            entry.size = metadata.len();
        }
        entry
    }

    /// Whether file bytes follow the header for this entry
    pub fn has_content(&self) -> bool {
        self.kind == EntryKind::Regular && self.mode & WORLD_READABLE_BIT != 0
    }
}

/// Returns true for socket special files, which are never archived
pub fn is_socket(metadata: &Metadata) -> bool {
    metadata.file_type().is_socket()
}

/// Key/value credential payload fetched from the secret store.
///
/// Scoped to a single request. `Debug` only prints key names.
#[derive(Clone, Default)]
pub struct CredentialBundle {
    entries: HashMap<String, String>,
}

impl CredentialBundle {
    pub fn new(entries: HashMap<String, String>) -> Self {
        Self { entries }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for CredentialBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&String> = self.entries.keys().collect();
        keys.sort();
        f.debug_struct("CredentialBundle").field("keys", &keys).finish()
    }
}

/// Secret store response: the bundle plus the version it was read from
#[derive(Debug, Clone)]
pub struct SecretPayload {
    pub version_id: String,
    pub credentials: CredentialBundle,
}

/// Stored-object metadata returned once the upload completes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadResult {
    pub bucket: String,
    pub key: String,
    pub e_tag: Option<String>,
    pub version_id: Option<String>,
}
