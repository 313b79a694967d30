//! Global constants for the rs-dumper application.
//!
//! This module centralizes all hardcoded values to improve maintainability
//! and make configuration changes easier.

use std::time::Duration;

// Archive walk policy
/// Top-level directories that are never walked. These are kernel-exposed
/// virtual trees whose contents are meaningless or unbounded in a snapshot.
pub const SKIPPED_TOP_LEVEL_DIRS: &[&str] = &["dev", "proc", "sys"];

/// Link target stored for symlinks whose target cannot be read
pub const PERMISSION_DENIED_LINK_TARGET: &str = "permission denied";

/// "Other" read permission bit; only files carrying it have their content archived
pub const WORLD_READABLE_BIT: u32 = 0o004;

// Pipe constants
/// Number of in-flight chunks the upload pipe holds before the producer blocks
pub const PIPE_CAPACITY: usize = 16;

// Cloud storage constants
/// Multipart upload part size (5MB, the S3 minimum)
pub const S3_PART_SIZE: usize = 5 * 1024 * 1024;

/// Content type recorded on the uploaded archive
pub const ARCHIVE_CONTENT_TYPE: &str = "application/x-tar";

/// Content encoding recorded on the uploaded archive
pub const ARCHIVE_CONTENT_ENCODING: &str = "gzip";

/// How long an upload may keep running after cancellation before it is dropped
pub const UPLOAD_CANCEL_GRACE: Duration = Duration::from_secs(5);

/// Upper bound on the `AbortMultipartUpload` call made after a failed upload
pub const ABORT_TIMEOUT: Duration = Duration::from_secs(3);

/// Lifetime of the download link handed back to the caller
pub const PRESIGNED_URL_TTL: Duration = Duration::from_secs(15 * 60);

/// Default S3-compatible endpoint
pub const DEFAULT_S3_ENDPOINT: &str = "storage.yandexcloud.net";

/// Object key prefix and file name for uploaded dumps
pub const OBJECT_KEY_PREFIX: &str = "go";
pub const OBJECT_FILE_NAME: &str = "dump.tar.gz";

// Credential bundle keys
pub const ACCESS_KEY_NAME: &str = "AWS_ACCESS_KEY";
pub const SECRET_KEY_NAME: &str = "AWS_SECRET_KEY";

// HTTP
/// Default listen address for the HTTP front end
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";

/// How long shutdown waits for in-flight dumps before cancelling them
pub const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Response header carrying the request's wall-clock duration (`Server-Timing`)
pub const SERVER_TIMING_HEADER: &str = "server-timing";

// Error messages
pub const ERROR_SDK_INIT: &str = "can't initialize sdk";
pub const ERROR_SECRETS: &str = "can't get secrets";
pub const ERROR_S3_UNAVAILABLE: &str = "s3 unavailable";
pub const ERROR_PRESIGN: &str = "error generating presigned url";
