use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, SecondsFormat, Utc};
use http::StatusCode;
use log::{error, info};
use tokio_util::sync::CancellationToken;

use crate::cloud::client::CloudConnector;
use crate::cloud::object_store::PutRequest;
use crate::config::BackupConfig;
use crate::constants::{
    ERROR_PRESIGN, ERROR_S3_UNAVAILABLE, ERROR_SDK_INIT, ERROR_SECRETS, OBJECT_FILE_NAME,
    OBJECT_KEY_PREFIX, PRESIGNED_URL_TTL,
};
use crate::pipeline::run_pipeline;

/// Transport-independent outcome of one backup request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupResponse {
    pub status: StatusCode,
    /// Value for the `Server-Timing` header
    pub server_timing: String,
    pub body: String,
}

impl BackupResponse {
    fn failure(start: Instant, message: &str) -> Self {
        BackupResponse {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            server_timing: server_timing(start.elapsed()),
            body: format!("{}\n", message),
        }
    }
}

/// Runs one full dump per request
pub struct BackupHandler {
    config: Arc<BackupConfig>,
    connector: Arc<dyn CloudConnector>,
}

impl BackupHandler {
    pub fn new(config: Arc<BackupConfig>, connector: Arc<dyn CloudConnector>) -> Self {
        Self { config, connector }
    }

    /// Dump the configured tree to object storage and answer with a download link.
    ///
    /// Steps run strictly in order: session, secret fetch, storage client,
    /// pipeline, presign. Any failure before the upload completes is a 500;
    /// a presign failure after a successful upload is still a 200.
    pub async fn handle(&self, cancel: &CancellationToken) -> BackupResponse {
        let start = Instant::now();

        let secrets = match self.connector.connect().await {
            Ok(secrets) => secrets,
            Err(e) => {
                error!("{}: {:#}", ERROR_SDK_INIT, e);
                return BackupResponse::failure(start, ERROR_SDK_INIT);
            }
        };

        let payload = match secrets.fetch(&self.config.secret_id).await {
            Ok(payload) => payload,
            Err(e) => {
                error!("{}: {:#}", ERROR_SECRETS, e);
                return BackupResponse::failure(start, ERROR_SECRETS);
            }
        };
        info!(
            "Using secret {} version {}",
            self.config.secret_id, payload.version_id
        );

        let store = match self.connector.object_store(&payload.credentials) {
            Ok(store) => store,
            Err(e) => {
                error!("{}: {:#}", ERROR_S3_UNAVAILABLE, e);
                return BackupResponse::failure(start, ERROR_S3_UNAVAILABLE);
            }
        };
        drop(payload);

        let key = object_key(Utc::now());
        info!(
            "Dumping {} to s3://{}/{}",
            self.config.root_path.display(),
            self.config.bucket,
            key
        );
        let result = run_pipeline(
            Arc::clone(&store),
            PutRequest::archive(&self.config.bucket, &key),
            self.config.root_path.clone(),
            cancel,
        )
        .await;
        let timing = server_timing(start.elapsed());

        let uploaded = match result {
            Ok(uploaded) => uploaded,
            Err(e) => {
                error!("Dump failed: {:#}", e);
                return BackupResponse {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    server_timing: timing,
                    body: format!("{:#}\n", e),
                };
            }
        };
        info!(
            "Dump uploaded to s3://{}/{} (etag {:?}, version {:?}) in {:?}",
            uploaded.bucket,
            uploaded.key,
            uploaded.e_tag,
            uploaded.version_id,
            start.elapsed()
        );

        let body = match store
            .presign_get(&uploaded.bucket, &uploaded.key, PRESIGNED_URL_TTL)
            .await
        {
            Ok(url) => format!("{}\n", url),
            Err(e) => {
                error!("{}: {:#}", ERROR_PRESIGN, e);
                format!("{}: {:#}", ERROR_PRESIGN, e)
            }
        };

        BackupResponse {
            status: StatusCode::OK,
            server_timing: timing,
            body,
        }
    }
}

/// Object key for a dump started at `at`: `go/<RFC3339 UTC>/dump.tar.gz`
pub fn object_key(at: DateTime<Utc>) -> String {
    format!(
        "{}/{}/{}",
        OBJECT_KEY_PREFIX,
        at.to_rfc3339_opts(SecondsFormat::Secs, true),
        OBJECT_FILE_NAME
    )
}

/// `Server-Timing` value with the duration in seconds
pub fn server_timing(elapsed: Duration) -> String {
    format!("total;dur={:.3}", elapsed.as_secs_f64())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use tokio::io::{AsyncRead, AsyncReadExt};

    use crate::cloud::client::MockCloudConnector;
    use crate::cloud::object_store::ObjectStore;
    use crate::cloud::secrets::{MockSecretStore, SecretStore};
    use crate::models::{CredentialBundle, SecretPayload, UploadResult};
    use crate::test_utils::{create_temp_dir, create_test_file_structure};

    /// In-memory store that keeps whatever gets uploaded
    struct MemoryStore {
        uploads: Mutex<Vec<(String, Vec<u8>)>>,
        presign_error: Option<String>,
    }

    impl MemoryStore {
        fn new(presign_error: Option<&str>) -> Self {
            Self {
                uploads: Mutex::new(Vec::new()),
                presign_error: presign_error.map(str::to_string),
            }
        }
    }

    #[async_trait]
    impl ObjectStore for MemoryStore {
        async fn put_stream(
            &self,
            request: &PutRequest,
            body: &mut (dyn AsyncRead + Send + Unpin),
            _cancel: &CancellationToken,
        ) -> Result<UploadResult> {
            let mut data = Vec::new();
            body.read_to_end(&mut data).await?;
            self.uploads.lock().unwrap().push((request.key.clone(), data));
            Ok(UploadResult {
                bucket: request.bucket.clone(),
                key: request.key.clone(),
                e_tag: Some("\"etag\"".to_string()),
                version_id: None,
            })
        }

        async fn presign_get(&self, bucket: &str, key: &str, _ttl: Duration) -> Result<String> {
            match &self.presign_error {
                Some(message) => Err(anyhow!(message.clone())),
                None => Ok(format!("https://storage.test/{}/{}?X-Amz-Signature=abc", bucket, key)),
            }
        }
    }

    fn config(root: &std::path::Path) -> Arc<BackupConfig> {
        Arc::new(BackupConfig {
            secret_id: "backup-secret".to_string(),
            region: "ru-central1".to_string(),
            bucket: "backups".to_string(),
            s3_endpoint: "storage.test".to_string(),
            secrets_endpoint: None,
            root_path: root.to_path_buf(),
        })
    }

    fn secret_store() -> MockSecretStore {
        let mut secrets = MockSecretStore::new();
        secrets.expect_fetch().times(1).returning(|_| {
            let mut entries = HashMap::new();
            entries.insert("AWS_ACCESS_KEY".to_string(), "AKID".to_string());
            entries.insert("AWS_SECRET_KEY".to_string(), "secret".to_string());
            Ok(SecretPayload {
                version_id: "v1".to_string(),
                credentials: CredentialBundle::new(entries),
            })
        });
        secrets
    }

    fn connector_with(store: Arc<MemoryStore>) -> MockCloudConnector {
        let secrets = secret_store();
        let mut connector = MockCloudConnector::new();
        connector
            .expect_connect()
            .times(1)
            .return_once(move || Ok(Arc::new(secrets) as Arc<dyn SecretStore>));
        connector
            .expect_object_store()
            .times(1)
            .return_once(move |_| Ok(store as Arc<dyn ObjectStore>));
        connector
    }

    #[test]
    fn test_object_key_format() {
        let at = Utc.with_ymd_and_hms(2024, 3, 5, 7, 8, 9).unwrap();
        assert_eq!(object_key(at), "go/2024-03-05T07:08:09Z/dump.tar.gz");
    }

    #[test]
    fn test_server_timing_format() {
        assert_eq!(server_timing(Duration::from_millis(1500)), "total;dur=1.500");
        assert_eq!(server_timing(Duration::from_micros(1234)), "total;dur=0.001");
    }

    #[tokio::test]
    async fn test_session_failure() {
        let temp_dir = create_temp_dir().unwrap();
        let mut connector = MockCloudConnector::new();
        connector
            .expect_connect()
            .times(1)
            .returning(|| Err(anyhow!("no credentials in chain")));
        connector.expect_object_store().never();

        let handler = BackupHandler::new(config(temp_dir.path()), Arc::new(connector));
        let response = handler.handle(&CancellationToken::new()).await;

        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.body, "can't initialize sdk\n");
        assert!(response.server_timing.starts_with("total;dur="));
    }

    #[tokio::test]
    async fn test_secret_failure_never_builds_storage_client() {
        let temp_dir = create_temp_dir().unwrap();
        let mut secrets = MockSecretStore::new();
        secrets
            .expect_fetch()
            .withf(|id| id == "backup-secret")
            .times(1)
            .returning(|_| Err(anyhow!("AccessDenied")));

        let mut connector = MockCloudConnector::new();
        connector
            .expect_connect()
            .times(1)
            .return_once(move || Ok(Arc::new(secrets) as Arc<dyn SecretStore>));
        connector.expect_object_store().never();

        let handler = BackupHandler::new(config(temp_dir.path()), Arc::new(connector));
        let response = handler.handle(&CancellationToken::new()).await;

        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.body, "can't get secrets\n");
    }

    #[tokio::test]
    async fn test_storage_client_failure() {
        let temp_dir = create_temp_dir().unwrap();
        let secrets = secret_store();
        let mut connector = MockCloudConnector::new();
        connector
            .expect_connect()
            .return_once(move || Ok(Arc::new(secrets) as Arc<dyn SecretStore>));
        connector
            .expect_object_store()
            .times(1)
            .returning(|_| Err(anyhow!("Credential bundle has no AWS_SECRET_KEY")));

        let handler = BackupHandler::new(config(temp_dir.path()), Arc::new(connector));
        let response = handler.handle(&CancellationToken::new()).await;

        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.body, "s3 unavailable\n");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_successful_dump_returns_presigned_url() {
        let temp_dir = create_test_file_structure().unwrap();
        let store = Arc::new(MemoryStore::new(None));

        let handler = BackupHandler::new(
            config(temp_dir.path()),
            Arc::new(connector_with(Arc::clone(&store))),
        );
        let response = handler.handle(&CancellationToken::new()).await;

        assert_eq!(response.status, StatusCode::OK);
        assert!(response.body.starts_with("https://storage.test/backups/go/"));
        assert!(response.body.ends_with("/dump.tar.gz?X-Amz-Signature=abc\n"));

        let uploads = store.uploads.lock().unwrap();
        assert_eq!(uploads.len(), 1);
        let (key, data) = &uploads[0];
        assert!(key.starts_with("go/") && key.ends_with("/dump.tar.gz"));
        // gzip magic
        assert_eq!(&data[..2], &[0x1f, 0x8b]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_object_key_uses_upload_start_time() {
        let temp_dir = create_test_file_structure().unwrap();
        let store = Arc::new(MemoryStore::new(None));
        let secrets = secret_store();
        let mut connector = MockCloudConnector::new();
        connector.expect_connect().times(1).return_once(move || {
            // slow session setup must not move the key's timestamp back
            std::thread::sleep(Duration::from_millis(1100));
            Ok(Arc::new(secrets) as Arc<dyn SecretStore>)
        });
        let uploads = Arc::clone(&store);
        connector
            .expect_object_store()
            .times(1)
            .return_once(move |_| Ok(uploads as Arc<dyn ObjectStore>));

        let handler = BackupHandler::new(config(temp_dir.path()), Arc::new(connector));
        let requested_at = Utc::now();
        let response = handler.handle(&CancellationToken::new()).await;
        assert_eq!(response.status, StatusCode::OK);

        let uploads = store.uploads.lock().unwrap();
        let stamp = uploads[0].0.split('/').nth(1).unwrap().to_string();
        let keyed_at = DateTime::parse_from_rfc3339(&stamp).unwrap();
        assert!(keyed_at.timestamp() > requested_at.timestamp());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_presign_failure_is_still_ok() {
        let temp_dir = create_test_file_structure().unwrap();
        let store = Arc::new(MemoryStore::new(Some("signing key unavailable")));

        let handler = BackupHandler::new(
            config(temp_dir.path()),
            Arc::new(connector_with(Arc::clone(&store))),
        );
        let response = handler.handle(&CancellationToken::new()).await;

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(
            response.body,
            "error generating presigned url: signing key unavailable"
        );
        assert_eq!(store.uploads.lock().unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_missing_root_fails_pipeline() {
        let temp_dir = create_temp_dir().unwrap();
        let store = Arc::new(MemoryStore::new(None));

        let handler = BackupHandler::new(
            config(&temp_dir.path().join("missing")),
            Arc::new(connector_with(Arc::clone(&store))),
        );
        let response = handler.handle(&CancellationToken::new()).await;

        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.body.contains("missing"));
        assert!(store.uploads.lock().unwrap().is_empty());
    }
}
