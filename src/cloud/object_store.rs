use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;

use crate::constants::{ARCHIVE_CONTENT_ENCODING, ARCHIVE_CONTENT_TYPE, S3_PART_SIZE};
use crate::models::UploadResult;

/// Where and how a stream of unknown length gets stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutRequest {
    pub bucket: String,
    pub key: String,
    pub content_type: String,
    pub content_encoding: String,
    pub part_size: usize,
}

impl PutRequest {
    /// Request for a gzip-compressed tar archive with the default part size
    pub fn archive(bucket: &str, key: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            key: key.to_string(),
            content_type: ARCHIVE_CONTENT_TYPE.to_string(),
            content_encoding: ARCHIVE_CONTENT_ENCODING.to_string(),
            part_size: S3_PART_SIZE,
        }
    }
}

/// Object storage as seen by the upload pipeline.
///
/// Implementations consume `body` until EOF. A read error from `body` must
/// fail the upload rather than store a truncated object. Once `cancel` fires,
/// in-flight storage calls are abandoned, any partial upload is cleaned up
/// and an error is returned.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store everything read from `body` under `request.key`
    async fn put_stream(
        &self,
        request: &PutRequest,
        body: &mut (dyn AsyncRead + Send + Unpin),
        cancel: &CancellationToken,
    ) -> Result<UploadResult>;

    /// Mint a public-read URL for a stored object, valid for `ttl`
    async fn presign_get(&self, bucket: &str, key: &str, ttl: Duration) -> Result<String>;
}
