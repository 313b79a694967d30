use std::ffi::OsStr;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use log::{debug, warn};

use crate::constants::{PERMISSION_DENIED_LINK_TARGET, SKIPPED_TOP_LEVEL_DIRS};

/// Closed set of filesystem error kinds the walk distinguishes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsErrorKind {
    /// The node disappeared between discovery and stat
    NotFound,
    PermissionDenied,
    Other,
}

impl FsErrorKind {
    pub fn of(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => FsErrorKind::NotFound,
            io::ErrorKind::PermissionDenied => FsErrorKind::PermissionDenied,
            _ => FsErrorKind::Other,
        }
    }
}

/// What the walk does with a node before looking at its metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    Emit,
    /// Produce nothing for this node
    Skip,
    /// Produce nothing for this node or anything below it
    SkipSubtree,
}

/// Decide how to treat a node from its path relative to the walk root
pub fn visit_decision(rel_path: &Path) -> Visit {
    let mut components = rel_path.components();
    let first = match components.next() {
        Some(first) => first.as_os_str(),
        // the root itself has no standalone entry
        None => return Visit::Skip,
    };

    if SKIPPED_TOP_LEVEL_DIRS.iter().any(|dir| OsStr::new(dir) == first) {
        Visit::SkipSubtree
    } else {
        Visit::Emit
    }
}

/// Path of `path` relative to `root`.
///
/// On Unix the result is already `/`-separated, which is what tar expects.
pub fn relative_path(root: &Path, path: &Path) -> Result<PathBuf> {
    path.strip_prefix(root)
        .map(Path::to_path_buf)
        .map_err(|_| anyhow!("{} is outside of the archive root {}", path.display(), root.display()))
}

/// Apply the per-node error policy.
///
/// Permission problems and vanished nodes are logged and the walk goes on;
/// everything else aborts it.
pub fn tolerate_node_error(path: &Path, operation: &str, err: &io::Error) -> Result<()> {
    match FsErrorKind::of(err) {
        FsErrorKind::PermissionDenied => {
            warn!("{}: permission denied while trying to {}", path.display(), operation);
            Ok(())
        }
        FsErrorKind::NotFound => {
            debug!("{}: not exists", path.display());
            Ok(())
        }
        FsErrorKind::Other => Err(anyhow!("Failed to {} {}: {}", operation, path.display(), err)),
    }
}

/// Same policy as [`tolerate_node_error`] for errors raised through `walkdir`
pub fn tolerate_walk_error(root: &Path, operation: &str, err: walkdir::Error) -> Result<()> {
    let path = err.path().unwrap_or(root).to_path_buf();
    match err.into_io_error() {
        Some(io_err) => tolerate_node_error(&path, operation, &io_err),
        None => Err(anyhow!("Failed to walk {}: filesystem loop", path.display())),
    }
}

/// Resolve the target stored for a symlink.
///
/// A denied readlink stores a placeholder instead of failing the walk.
pub fn link_target(path: &Path, read_result: io::Result<PathBuf>) -> Result<PathBuf> {
    match read_result {
        Ok(target) => Ok(target),
        Err(err) if FsErrorKind::of(&err) == FsErrorKind::PermissionDenied => {
            warn!("{}: permission denied reading link target", path.display());
            Ok(PathBuf::from(PERMISSION_DENIED_LINK_TARGET))
        }
        Err(err) => Err(anyhow!("Failed to read link {}: {}", path.display(), err)),
    }
}
