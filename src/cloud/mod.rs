//! Cloud integration for dump uploads.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐  ambient creds   ┌─────────────────┐
//! │ CloudConnector  │─────────────────▶│   SecretStore   │
//! └────────┬────────┘                  └────────┬────────┘
//!          │        credential bundle           │
//!          │◀───────────────────────────────────┘
//!          │
//!    ┌─────▼──────┐   multipart    ┌────────────┐
//!    │ObjectStore │───────────────▶│ S3 bucket  │
//!    └────────────┘                └────────────┘
//! ```
//!
//! Everything the request handler touches sits behind a trait so tests can
//! swap in fakes.

/// Per-request client construction
pub mod client;

/// Object storage abstraction
pub mod object_store;

/// S3-compatible object storage (multipart upload, presigned URLs)
pub mod s3;

/// Secret store access
pub mod secrets;

pub use client::{AwsConnector, CloudConnector};
pub use object_store::{ObjectStore, PutRequest};
pub use s3::S3Storage;
pub use secrets::{SecretStore, SecretsManagerStore};
