//! Filesystem tree to tar stream.
//!
//! The producer walks a directory tree in a fixed order and writes one tar
//! entry per node into any `std::io::Write` sink. It is synchronous and is
//! meant to run on a blocking thread, feeding the compressor and upload pipe.
//!
//! ## Walk policy
//!
//! - `dev/`, `proc/` and `sys/` at the top of the tree are never entered
//! - permission problems and nodes that vanish mid-walk are logged and skipped
//! - sockets are skipped
//! - symlinks are stored as links, never followed
//! - file content is only stored for regular files with the world-read bit;
//!   every other entry declares a size of zero
//!
//! ```no_run
//! use rust_dumper::archive::produce;
//! use std::path::Path;
//!
//! # fn example() -> anyhow::Result<()> {
//! let file = std::fs::File::create("/tmp/etc.tar")?;
//! let stats = produce(file, Path::new("/etc"))?;
//! println!("{} entries", stats.entries);
//! # Ok(())
//! # }
//! ```

/// Tar header construction
pub mod entry;

/// Tree walk driver
pub mod producer;

/// Per-node walk policy and error classification
pub mod walker;

pub use producer::{produce, produce_to_vec, ProduceStats};
pub use walker::{FsErrorKind, Visit};
