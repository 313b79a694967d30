use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use http::{Request, Response};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as HttpConnBuilder;
use log::{error, info, warn};
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::constants::SERVER_TIMING_HEADER;
use crate::handler::{BackupHandler, BackupResponse};

/// Accept connections and run a dump for every request until `shutdown` resolves.
///
/// Any method and any path trigger a dump. In-flight requests are drained
/// before returning; dumps still running `drain_timeout` after shutdown are
/// cancelled and answered with their error. A client that disconnects
/// mid-request drops its handler future, which cancels that request's pipeline.
pub async fn serve<S>(
    listener: TcpListener,
    handler: Arc<BackupHandler>,
    shutdown: S,
    drain_timeout: Duration,
) -> Result<()>
where
    S: Future<Output = ()>,
{
    let graceful = hyper_util::server::graceful::GracefulShutdown::new();
    let http = HttpConnBuilder::new(TokioExecutor::new());
    let requests = CancellationToken::new();

    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (stream, peer_addr) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!("Failed to accept connection: {}", e);
                        continue;
                    }
                };

                let handler = Arc::clone(&handler);
                let requests = requests.clone();
                let svc = service_fn(move |req: Request<Incoming>| {
                    let handler = Arc::clone(&handler);
                    let cancel = requests.child_token();
                    async move {
                        info!("{} {} from {}", req.method(), req.uri().path(), peer_addr);
                        let response = handler.handle(&cancel).await;
                        Ok::<_, Infallible>(into_http(response))
                    }
                });

                let conn = http.serve_connection(TokioIo::new(stream), svc);
                let conn = graceful.watch(conn.into_owned());

                tokio::spawn(async move {
                    if let Err(e) = conn.await {
                        error!("Connection error from {}: {}", peer_addr, e);
                    }
                });
            }

            () = &mut shutdown => {
                info!("Shutting down, draining in-flight dumps");
                break;
            }
        }
    }

    let drain = graceful.shutdown();
    tokio::pin!(drain);
    if timeout(drain_timeout, &mut drain).await.is_err() {
        warn!(
            "Dumps still running {:?} after shutdown, cancelling them",
            drain_timeout
        );
        requests.cancel();
        drain.await;
    }
    info!("All connections drained");

    Ok(())
}

/// Turn a handler response into an HTTP response
pub fn into_http(response: BackupResponse) -> Response<Full<Bytes>> {
    let mut http_response = Response::new(Full::new(Bytes::from(response.body)));
    *http_response.status_mut() = response.status;

    let headers = http_response.headers_mut();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    match HeaderValue::from_str(&response.server_timing) {
        Ok(value) => {
            headers.insert(HeaderName::from_static(SERVER_TIMING_HEADER), value);
        }
        Err(e) => warn!("Invalid Server-Timing value {:?}: {}", response.server_timing, e),
    }

    http_response
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use http::StatusCode;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use crate::cloud::client::MockCloudConnector;
    use crate::cloud::object_store::{ObjectStore, PutRequest};
    use crate::cloud::secrets::{MockSecretStore, SecretStore};
    use crate::config::BackupConfig;
    use crate::models::{CredentialBundle, SecretPayload, UploadResult};
    use crate::test_utils::create_test_file_structure;

    /// Store whose upload never finishes on its own
    #[derive(Default)]
    struct StalledStore {
        started: Notify,
        cancelled: AtomicBool,
    }

    #[async_trait]
    impl ObjectStore for StalledStore {
        async fn put_stream(
            &self,
            _request: &PutRequest,
            _body: &mut (dyn tokio::io::AsyncRead + Send + Unpin),
            cancel: &CancellationToken,
        ) -> Result<UploadResult> {
            self.started.notify_one();
            cancel.cancelled().await;
            self.cancelled.store(true, Ordering::SeqCst);
            Err(anyhow!("upload cancelled"))
        }

        async fn presign_get(&self, _bucket: &str, _key: &str, _ttl: Duration) -> Result<String> {
            Err(anyhow!("nothing was uploaded"))
        }
    }

    fn test_config(root: &std::path::Path) -> Arc<BackupConfig> {
        Arc::new(BackupConfig {
            secret_id: "secret".to_string(),
            region: "ru-central1".to_string(),
            bucket: "backups".to_string(),
            s3_endpoint: "storage.test".to_string(),
            secrets_endpoint: None,
            root_path: root.to_path_buf(),
        })
    }

    #[test]
    fn test_into_http_sets_headers() {
        let response = into_http(BackupResponse {
            status: StatusCode::OK,
            server_timing: "total;dur=1.234".to_string(),
            body: "https://example.com/dump\n".to_string(),
        });

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["server-timing"], "total;dur=1.234");
        assert_eq!(response.headers()["content-type"], "text/plain; charset=utf-8");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_serve_answers_any_path_and_shuts_down() {
        let mut connector = MockCloudConnector::new();
        connector
            .expect_connect()
            .returning(|| Err(anyhow!("no ambient credentials")));
        connector.expect_object_store().never();

        let handler = Arc::new(BackupHandler::new(
            test_config(std::path::Path::new("/")),
            Arc::new(connector),
        ));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let stop = CancellationToken::new();
        let server = tokio::spawn(serve(
            listener,
            handler,
            stop.clone().cancelled_owned(),
            Duration::from_secs(30),
        ));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"POST /anything HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\nContent-Length: 0\r\n\r\n")
            .await
            .unwrap();
        let mut raw = String::new();
        stream.read_to_string(&mut raw).await.unwrap();

        assert!(raw.starts_with("HTTP/1.1 500"));
        assert!(raw.contains("server-timing: total;dur="));
        assert!(raw.ends_with("can't initialize sdk\n"));

        stop.cancel();
        server.await.unwrap().unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shutdown_cancels_dumps_after_drain_timeout() {
        let temp_dir = create_test_file_structure().unwrap();
        let store = Arc::new(StalledStore::default());

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
        let mut connector = MockCloudConnector::new();
        connector
            .expect_connect()
            .times(1)
            .return_once(move || Ok(Arc::new(secrets) as Arc<dyn SecretStore>));
        let object_store = Arc::clone(&store);
        connector
            .expect_object_store()
            .times(1)
            .return_once(move |_| Ok(object_store as Arc<dyn ObjectStore>));

        let handler = Arc::new(BackupHandler::new(
            test_config(temp_dir.path()),
            Arc::new(connector),
        ));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let stop = CancellationToken::new();
        let server = tokio::spawn(serve(
            listener,
            handler,
            stop.clone().cancelled_owned(),
            Duration::from_millis(100),
        ));

        let client = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream
                .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
                .await
                .unwrap();
            let mut raw = String::new();
            stream.read_to_string(&mut raw).await.unwrap();
            raw
        });

        store.started.notified().await;
        stop.cancel();
        server.await.unwrap().unwrap();

        assert!(store.cancelled.load(Ordering::SeqCst));
        let raw = client.await.unwrap();
        assert!(raw.starts_with("HTTP/1.1 500"));
    }
}
