//! Concurrent archive + upload.
//!
//! ```text
//!  blocking thread                          async task
//! ┌──────────┐   ┌──────────┐   ┌──────┐   ┌───────────────┐
//! │ producer │──▶│   gzip   │──▶│ pipe │──▶│  put_stream   │
//! └──────────┘   └──────────┘   └──────┘   └───────────────┘
//! ```
//!
//! Both halves run in one [`TaskGroup`]. A producer failure closes the pipe
//! with its error so the upload fails instead of storing a truncated object;
//! an upload failure drops the pipe reader so the producer's next write fails.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_compression::tokio::write::GzipEncoder;
use async_compression::Level;
use tokio::runtime::Handle;
use log::warn;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tokio_util::io::SyncIoBridge;
use tokio_util::sync::CancellationToken;

use crate::archive::produce;
use crate::cloud::object_store::{ObjectStore, PutRequest};
use crate::constants::{PIPE_CAPACITY, UPLOAD_CANCEL_GRACE};
use crate::models::UploadResult;

/// Supervised task set with shared cancellation
pub mod group;

/// Bounded in-memory byte pipe
pub mod pipe;

pub use group::TaskGroup;
pub use pipe::{pipe, PipeReader, PipeWriter};

/// Archive `root`, compress it and upload it as `request.key`.
///
/// Returns the first error either half hit, or the store's result once the
/// whole stream has been uploaded. Cancelling `parent` stops the producer at
/// its next write and hands the cancellation to the store. A store that has
/// not stopped [`UPLOAD_CANCEL_GRACE`] after cancellation is dropped.
pub async fn run_pipeline(
    store: Arc<dyn ObjectStore>,
    request: PutRequest,
    root: PathBuf,
    parent: &CancellationToken,
) -> Result<UploadResult> {
    let (writer, mut reader) = pipe(PIPE_CAPACITY);
    let mut group = TaskGroup::new(parent);
    let handle = Handle::current();
    let token = group.token();

    group.spawn_blocking("producer", move || {
        produce_compressed(writer, &root, handle, token)
    });

    let (result_tx, result_rx) = oneshot::channel();
    let token = group.token();
    group.spawn("uploader", async move {
        let result = upload(store.as_ref(), &request, &mut reader, &token).await?;
        // receiver only goes away together with the whole pipeline
        let _ = result_tx.send(result);
        Ok(())
    });

    group.wait().await?;
    result_rx
        .await
        .context("Uploader finished without reporting a result")
}

/// Uploader half: the store's upload, bounded once `token` is cancelled
async fn upload(
    store: &dyn ObjectStore,
    request: &PutRequest,
    reader: &mut PipeReader,
    token: &CancellationToken,
) -> Result<UploadResult> {
    let put = store.put_stream(request, reader, token);
    tokio::pin!(put);

    tokio::select! {
        biased;
        result = &mut put => result,
        _ = token.cancelled() => match timeout(UPLOAD_CANCEL_GRACE, &mut put).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    "Upload of {} still running {:?} after cancellation, dropping it",
                    request.key, UPLOAD_CANCEL_GRACE
                );
                Err(anyhow!("upload cancelled"))
            }
        },
    }
}

/// Producer half: tar into gzip into the pipe, on the current (blocking) thread
fn produce_compressed(
    writer: PipeWriter,
    root: &Path,
    handle: Handle,
    token: CancellationToken,
) -> Result<()> {
    let encoder = GzipEncoder::with_quality(writer, Level::Fastest);
    let bridge = SyncIoBridge::new_with_handle(encoder, handle.clone());
    let mut sink = CancelOnWrite::new(bridge, token);

    match produce(&mut sink, root) {
        Ok(_) => {
            let mut bridge = sink.into_inner();
            bridge
                .shutdown()
                .context("Failed to finish compressed stream")?;
            Ok(())
        }
        Err(err) => {
            let writer = sink.into_inner().into_inner().into_inner();
            let pipe_err = io::Error::new(io::ErrorKind::Other, format!("{:#}", err));
            handle.block_on(writer.close_with_error(pipe_err));
            Err(err)
        }
    }
}

/// Write adapter that starts failing once its token is cancelled
pub struct CancelOnWrite<W> {
    inner: W,
    token: CancellationToken,
}

impl<W> CancelOnWrite<W> {
    pub fn new(inner: W, token: CancellationToken) -> Self {
        Self { inner, token }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    fn check(&self) -> io::Result<()> {
        if self.token.is_cancelled() {
            return Err(io::Error::new(io::ErrorKind::Other, "pipeline cancelled"));
        }
        Ok(())
    }
}

impl<W: Write> Write for CancelOnWrite<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.check()?;
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.check()?;
        self.inner.flush()
    }
}
