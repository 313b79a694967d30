use std::future::Future;
use std::io;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::{debug, info, warn};
use rusoto_core::{ByteStream, HttpClient, Region};
use rusoto_credential::{AwsCredentials, StaticProvider};
use rusoto_s3::util::{PreSignedRequest, PreSignedRequestOption};
use rusoto_s3::{
    AbortMultipartUploadRequest, CompleteMultipartUploadOutput, CompleteMultipartUploadRequest,
    CompletedMultipartUpload, CompletedPart, CreateMultipartUploadRequest, GetObjectRequest, S3Client, UploadPartRequest, S3,
};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::cloud::object_store::{ObjectStore, PutRequest};
use crate::constants::ABORT_TIMEOUT;
use crate::models::UploadResult;

/// S3-compatible object store backed by static credentials.
///
/// Uploads always go through a multipart upload so the archive never has to
/// be held in memory beyond one part.
pub struct S3Storage {
    client: S3Client,
    region: Region,
    credentials: AwsCredentials,
}

impl S3Storage {
    /// Create a client for `endpoint` in `region_name`.
    ///
    /// # Arguments
    ///
    /// * `access_key_id` - Static access key
    /// * `secret_access_key` - Static secret key
    /// * `region_name` - Region name used for request signing
    /// * `endpoint` - Host or URL of the S3-compatible service
    pub fn new(
        access_key_id: &str,
        secret_access_key: &str,
        region_name: &str,
        endpoint: &str,
    ) -> Result<Self> {
        if access_key_id.is_empty() || secret_access_key.is_empty() {
            return Err(anyhow!("S3 access key and secret key must not be empty"));
        }

        let http_client =
            HttpClient::new().map_err(|e| anyhow!("Failed to create HTTP client: {}", e))?;
        let region = custom_region(region_name, endpoint);
        let provider =
            StaticProvider::new_minimal(access_key_id.to_string(), secret_access_key.to_string());
        let client = S3Client::new_with(http_client, provider, region.clone());

        Ok(Self {
            client,
            region,
            credentials: AwsCredentials::new(access_key_id, secret_access_key, None, None),
        })
    }

    /// Upload every part read from `body`, returning the completed part list
    async fn upload_parts(
        &self,
        request: &PutRequest,
        upload_id: &str,
        body: &mut (dyn AsyncRead + Send + Unpin),
        cancel: &CancellationToken,
    ) -> Result<Vec<CompletedPart>> {
        let mut parts = Vec::new();
        let mut part_number: i64 = 1;

        loop {
            let data = unless_cancelled(cancel, async {
                read_part(&mut *body, request.part_size)
                    .await
                    .context("Failed to read upload stream")
            })
            .await?;
            let last = data.len() < request.part_size;

            // S3 wants at least one part, even an empty one
            if data.is_empty() && !parts.is_empty() {
                break;
            }

            let part_len = data.len();
            let part_request = UploadPartRequest {
                bucket: request.bucket.clone(),
                key: request.key.clone(),
                upload_id: upload_id.to_string(),
                part_number,
                content_length: Some(part_len as i64),
                body: Some(ByteStream::from(data)),
                ..Default::default()
            };
            let output = unless_cancelled(cancel, async {
                self.client
                    .upload_part(part_request)
                    .await
                    .with_context(|| format!("Failed to upload part {}", part_number))
            })
            .await?;

            let e_tag = output
                .e_tag
                .ok_or_else(|| anyhow!("No ETag in upload part {} response", part_number))?;
            debug!("Uploaded part {} ({} bytes) of {}", part_number, part_len, request.key);

            parts.push(CompletedPart {
                e_tag: Some(e_tag),
                part_number: Some(part_number),
            });
            part_number += 1;

            if last {
                break;
            }
        }

        Ok(parts)
    }

    /// Upload the parts and complete the upload
    async fn upload_and_complete(
        &self,
        request: &PutRequest,
        upload_id: &str,
        body: &mut (dyn AsyncRead + Send + Unpin),
        cancel: &CancellationToken,
    ) -> Result<(usize, CompleteMultipartUploadOutput)> {
        let parts = self.upload_parts(request, upload_id, body, cancel).await?;
        let part_count = parts.len();

        let complete_request = CompleteMultipartUploadRequest {
            bucket: request.bucket.clone(),
            key: request.key.clone(),
            upload_id: upload_id.to_string(),
            multipart_upload: Some(CompletedMultipartUpload { parts: Some(parts) }),
            ..Default::default()
        };
        let completed = unless_cancelled(cancel, async {
            self.client
                .complete_multipart_upload(complete_request)
                .await
                .context("Failed to complete multipart upload")
        })
        .await?;

        Ok((part_count, completed))
    }

    async fn abort(&self, request: &PutRequest, upload_id: &str) {
        let abort_request = AbortMultipartUploadRequest {
            bucket: request.bucket.clone(),
            key: request.key.clone(),
            upload_id: upload_id.to_string(),
            ..Default::default()
        };

        match timeout(ABORT_TIMEOUT, self.client.abort_multipart_upload(abort_request)).await {
            Ok(Ok(_)) => warn!("Aborted multipart upload for {}", request.key),
            Ok(Err(e)) => warn!("Failed to abort multipart upload for {}: {}", request.key, e),
            Err(_) => warn!(
                "Gave up aborting multipart upload for {} after {:?}",
                request.key, ABORT_TIMEOUT
            ),
        }
    }
}

#[async_trait]
impl ObjectStore for S3Storage {
    async fn put_stream(
        &self,
        request: &PutRequest,
        body: &mut (dyn AsyncRead + Send + Unpin),
        cancel: &CancellationToken,
    ) -> Result<UploadResult> {
        let start = Instant::now();
        let create_request = CreateMultipartUploadRequest {
            bucket: request.bucket.clone(),
            key: request.key.clone(),
            content_type: Some(request.content_type.clone()),
            content_encoding: Some(request.content_encoding.clone()),
            ..Default::default()
        };
        let created = unless_cancelled(cancel, async {
            self.client
                .create_multipart_upload(create_request)
                .await
                .context("Failed to create multipart upload")
        })
        .await?;

        let upload_id = created
            .upload_id
            .ok_or_else(|| anyhow!("No upload ID returned from S3"))?;
        debug!("Started multipart upload with ID: {} for {}", upload_id, request.key);

        let (part_count, completed) =
            match self.upload_and_complete(request, &upload_id, body, cancel).await {
                Ok(done) => done,
                Err(e) => {
                    self.abort(request, &upload_id).await;
                    return Err(e);
                }
            };

        info!(
            "Uploaded s3://{}/{} in {} parts ({:?})",
            request.bucket,
            request.key,
            part_count,
            start.elapsed()
        );

        Ok(UploadResult {
            bucket: request.bucket.clone(),
            key: request.key.clone(),
            e_tag: completed.e_tag,
            version_id: completed.version_id,
        })
    }

    async fn presign_get(&self, bucket: &str, key: &str, ttl: Duration) -> Result<String> {
        let request = GetObjectRequest {
            bucket: bucket.to_string(),
            key: key.to_string(),
            ..Default::default()
        };
        let options = PreSignedRequestOption { expires_in: ttl };
        Ok(request.get_presigned_url(&self.region, &self.credentials, &options))
    }
}

/// Run a storage call unless `cancel` fires first
async fn unless_cancelled<T, F>(cancel: &CancellationToken, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(anyhow!("upload cancelled")),
        result = call => result,
    }
}

/// Region pointing at an S3-compatible endpoint. A bare host gets `https://`.
pub fn custom_region(region_name: &str, endpoint: &str) -> Region {
    let endpoint = if endpoint.contains("://") {
        endpoint.to_string()
    } else {
        format!("https://{}", endpoint)
    };
    Region::Custom {
        name: region_name.to_string(),
        endpoint,
    }
}

/// Read up to `part_size` bytes, stopping early only at end of stream
pub async fn read_part<R>(reader: &mut R, part_size: usize) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buffer = Vec::with_capacity(part_size);
    (&mut *reader)
        .take(part_size as u64)
        .read_to_end(&mut buffer)
        .await?;
    Ok(buffer)
}
