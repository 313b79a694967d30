use std::fs::{self, File, Metadata};
use std::io::Write;
use std::mem::ManuallyDrop;
use std::path::Path;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use log::{debug, info, warn};
use tar::Builder;
use walkdir::WalkDir;

use crate::archive::entry::{build_header, ExactLenReader};
use crate::archive::walker::{
    link_target, relative_path, tolerate_walk_error, visit_decision, Visit,
};
use crate::models::{is_socket, ArchiveEntry, EntryKind};

/// Counters reported at the end of a successful walk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProduceStats {
    /// Archive entries written
    pub entries: u64,
    /// File content bytes written, excluding headers and padding
    pub bytes: u64,
    /// Nodes left out by policy (virtual trees, sockets, vanished or denied nodes)
    pub skipped: u64,
}

/// Walk `root` and write a tar stream of everything under it into `sink`.
///
/// Entries are emitted depth-first with children sorted by file name, so the
/// same tree always yields the same entry sequence. Per-node permission
/// problems, vanished nodes and sockets are logged and skipped; any other
/// failure aborts the walk.
///
/// The tar trailer is only written when the walk succeeds. On error nothing
/// more is written to `sink` and the caller is expected to fail whatever sits
/// downstream of it.
///
/// # Arguments
///
/// * `sink` - Destination of the uncompressed tar stream
/// * `root` - Directory to archive; it must exist and must not be a symlink
///
/// # Returns
///
/// Walk statistics, or the error that made the archive unreliable
pub fn produce<W: Write>(mut sink: W, root: &Path) -> Result<ProduceStats> {
    let root_metadata = fs::symlink_metadata(root)
        .with_context(|| format!("Failed to stat archive root {}", root.display()))?;
    if !root_metadata.is_dir() {
        bail!("Archive root {} is not a directory", root.display());
    }

    info!("Archiving {}", root.display());
    let start = Instant::now();
    let mut stats = ProduceStats::default();

    // Dropping a builder writes the trailer. An aborted walk must not end up
    // looking like a complete archive, so the builder is only dropped on success.
    let mut builder = ManuallyDrop::new(Builder::new(&mut sink));
    builder.follow_symlinks(false);

    let mut walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter();

    while let Some(next) = walker.next() {
        let dir_entry = match next {
            Ok(dir_entry) => dir_entry,
            Err(err) => {
                tolerate_walk_error(root, "read", err)?;
                stats.skipped += 1;
                continue;
            }
        };

        let path = dir_entry.path();
        let rel_path = relative_path(root, path)?;

        match visit_decision(&rel_path) {
            Visit::Emit => {}
            Visit::Skip => continue,
            Visit::SkipSubtree => {
                debug!("Skipping virtual tree {}", path.display());
                if dir_entry.file_type().is_dir() {
                    walker.skip_current_dir();
                }
                stats.skipped += 1;
                continue;
            }
        }

        let metadata = match dir_entry.metadata() {
            Ok(metadata) => metadata,
            Err(err) => {
                tolerate_walk_error(root, "stat", err)?;
                stats.skipped += 1;
                continue;
            }
        };

        if is_socket(&metadata) {
            info!("{}: skipping socket", path.display());
            stats.skipped += 1;
            continue;
        }

        let link = if metadata.file_type().is_symlink() {
            Some(link_target(path, fs::read_link(path))?)
        } else {
            None
        };

        let entry = ArchiveEntry::from_metadata(rel_path, &metadata, link);
        append_entry(&mut *builder, path, &entry, &metadata)?;
        stats.entries += 1;
        stats.bytes += entry.size;
    }

    let mut builder = ManuallyDrop::into_inner(builder);
    builder.finish().context("Failed to write archive trailer")?;
    drop(builder);
    sink.flush().context("Failed to flush archive stream")?;

    info!(
        "Archived {} entries ({} bytes of content, {} skipped) in {:?}",
        stats.entries,
        stats.bytes,
        stats.skipped,
        start.elapsed()
    );

    Ok(stats)
}

/// Write one entry's header and, when the content policy allows it, its bytes.
///
/// A readable file that cannot be opened is an error: the permission bits
/// said it should be.
fn append_entry<W: Write>(
    builder: &mut Builder<W>,
    path: &Path,
    entry: &ArchiveEntry,
    metadata: &Metadata,
) -> Result<()> {
    let mut header = build_header(entry, metadata);

    match entry.kind {
        EntryKind::Symlink => {
            let target = entry.link_target.as_deref().unwrap_or_else(|| Path::new(""));
            builder
                .append_link(&mut header, &entry.rel_path, target)
                .with_context(|| format!("Failed to write header for {}", path.display()))?;
        }
        _ if entry.has_content() => {
            let file = File::open(path)
                .with_context(|| format!("Failed to open {} for archiving", path.display()))?;
            let mut reader = ExactLenReader::new(file, entry.size);
            builder
                .append_data(&mut header, &entry.rel_path, &mut reader)
                .with_context(|| format!("Failed to copy {} into archive", path.display()))?;
            if reader.padded() > 0 {
                warn!(
                    "{}: file shrank while archiving, padded {} bytes",
                    path.display(),
                    reader.padded()
                );
            }
        }
        _ => {
            builder
                .append_data(&mut header, &entry.rel_path, std::io::empty())
                .with_context(|| format!("Failed to write header for {}", path.display()))?;
        }
    }

    Ok(())
}

/// Archive into memory. Handy for small trees, benchmarks and tests.
pub fn produce_to_vec(root: &Path) -> Result<(Vec<u8>, ProduceStats)> {
    let mut buffer = Vec::new();
    let stats = produce(&mut buffer, root)?;
    Ok((buffer, stats))
}
