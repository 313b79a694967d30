//! # rs-dumper
//!
//! An HTTP-triggered filesystem dump service: every request walks a directory
//! tree, streams it as a gzip-compressed tar archive into S3-compatible object
//! storage and answers with a time-limited download link.
//!
//! ## Overview
//!
//! The archive is never staged on disk. A blocking producer thread writes tar
//! entries through a gzip encoder into a bounded in-memory pipe, while an
//! async task drains the pipe into a multipart upload. The two halves share a
//! cancellation scope: whichever fails first stops the other.
//!
//! Storage credentials are not configured on the process. They are fetched
//! per request from a secret store using the ambient cloud identity.
//!
//! ## Usage
//!
//! ### Dumping a tree into memory
//!
//! ```no_run
//! use rust_dumper::archive::produce_to_vec;
//! use std::path::Path;
//!
//! # fn main() -> anyhow::Result<()> {
//! let (tar_bytes, stats) = produce_to_vec(Path::new("/etc"))?;
//! println!("{} entries, {} bytes", stats.entries, tar_bytes.len());
//! # Ok(())
//! # }
//! ```
//!
//! ### Streaming a dump to object storage
//!
//! ```no_run
//! use rust_dumper::cloud::{PutRequest, S3Storage};
//! use rust_dumper::pipeline::run_pipeline;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let store = Arc::new(S3Storage::new("KEY", "SECRET", "ru-central1", "storage.yandexcloud.net")?);
//! let request = PutRequest::archive("backups", "go/2024-01-01T00:00:00Z/dump.tar.gz");
//! let uploaded = run_pipeline(store, request, "/srv".into(), &CancellationToken::new()).await?;
//! println!("stored {}", uploaded.key);
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Organization
//!
//! - [`archive`]: Directory walk and tar stream production
//! - [`pipeline`]: Compression, upload pipe and task supervision
//! - [`cloud`]: Secret store and object storage clients
//! - [`handler`]: Request flow from credentials to download link
//! - [`server`]: HTTP front end
//! - [`config`]: Environment configuration
//! - [`models`]: Core data models
//! - [`constants`]: Application-wide constants

/// Command-line interface definitions and argument parsing
pub mod cli;

/// Core data models and structures used throughout the application
pub mod models;

/// Directory walk and tar stream production
pub mod archive;

/// Concurrent compression and upload
pub mod pipeline;

/// Cloud integration (secret store, S3-compatible storage)
pub mod cloud;

/// Environment configuration
pub mod config;

/// Per-request backup flow
pub mod handler;

/// HTTP front end
pub mod server;

/// Application constants and configuration values
pub mod constants;

/// Test utilities and helpers
#[cfg(test)]
pub mod test_utils;
