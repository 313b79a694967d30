use std::fs::Metadata;
use std::io::{self, Read};

use tar::{EntryType, Header, HeaderMode};

use crate::models::{ArchiveEntry, EntryKind};

/// Build the tar header for an entry.
///
/// Type, ownership and device numbers come from the node metadata; mode,
/// mtime and size are taken from the entry so the content policy wins over
/// whatever the metadata says. The stored name is set later by the builder.
pub fn build_header(entry: &ArchiveEntry, metadata: &Metadata) -> Header {
    let mut header = Header::new_gnu();
    header.set_metadata_in_mode(metadata, HeaderMode::Complete);

    let entry_type = match entry.kind {
        EntryKind::Regular => EntryType::Regular,
        EntryKind::Directory => EntryType::Directory,
        EntryKind::Symlink => EntryType::Symlink,
        EntryKind::Other => header.entry_type(),
    };
    header.set_entry_type(entry_type);
    header.set_mode(entry.mode & 0o7777);
    header.set_mtime(entry.mtime);
    header.set_size(entry.size);
    header
}

/// Reader that yields exactly `len` bytes from `inner`.
///
/// Files on a live system can change between `lstat` and read. Extra bytes
/// are cut off and a short file is padded with zeros, so the bytes written
/// always match the size declared in the header.
pub struct ExactLenReader<R> {
    inner: R,
    remaining: u64,
    inner_done: bool,
    padded: u64,
}

impl<R: Read> ExactLenReader<R> {
    pub fn new(inner: R, len: u64) -> Self {
        Self {
            inner,
            remaining: len,
            inner_done: false,
            padded: 0,
        }
    }

    /// Number of zero bytes emitted in place of missing content
    pub fn padded(&self) -> u64 {
        self.padded
    }
}

impl<R: Read> Read for ExactLenReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let limit = buf.len().min(self.remaining.min(usize::MAX as u64) as usize);
        let buf = &mut buf[..limit];

        let n = if self.inner_done {
            0
        } else {
            self.inner.read(buf)?
        };

        if n > 0 {
            self.remaining -= n as u64;
            return Ok(n);
        }

        self.inner_done = true;
        buf.fill(0);
        self.remaining -= limit as u64;
        self.padded += limit as u64;
        Ok(limit)
    }
}
