use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc;
use tokio_util::sync::PollSender;

/// Messages travelling through the pipe
enum Frame {
    Data(Bytes),
    /// Clean end of stream
    End,
    Failed(io::Error),
}

/// Create a bounded in-memory byte pipe.
///
/// At most `capacity` written chunks are buffered; once full, writes wait for
/// the reader to catch up. Bytes come out in exactly the order they went in.
pub fn pipe(capacity: usize) -> (PipeWriter, PipeReader) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (
        PipeWriter {
            sender: PollSender::new(sender),
            closed: false,
        },
        PipeReader {
            receiver,
            pending: Bytes::new(),
            state: ReadState::Open,
        },
    )
}

/// Writing half of [`pipe`].
///
/// `shutdown` ends the stream cleanly; [`PipeWriter::close_with_error`] makes
/// the reader fail. Dropping the writer without either also fails the reader,
/// so a half-written stream can never pass for a complete one.
pub struct PipeWriter {
    sender: PollSender<Frame>,
    closed: bool,
}

impl PipeWriter {
    /// Close the pipe so that the reader's next read returns `err`.
    pub async fn close_with_error(mut self, err: io::Error) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(sender) = self.sender.get_ref() {
            // a gone reader has nothing left to tell
            let _ = sender.send(Frame::Failed(err)).await;
        }
        self.sender.close();
    }

    fn poll_send(&mut self, cx: &mut Context<'_>, frame: Frame) -> Poll<io::Result<()>> {
        if ready!(self.sender.poll_reserve(cx)).is_err() {
            return Poll::Ready(Err(broken_pipe()));
        }
        self.sender.send_item(frame).map_err(|_| broken_pipe())?;
        Poll::Ready(Ok(()))
    }
}

fn broken_pipe() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "upload pipe reader is gone")
}

impl AsyncWrite for PipeWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.closed {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "write to a closed upload pipe",
            )));
        }
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }
        ready!(self.poll_send(cx, Frame::Data(Bytes::copy_from_slice(buf))))?;
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        // Every write is handed to the reader straight away
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if self.closed {
            return Poll::Ready(Ok(()));
        }
        ready!(self.poll_send(cx, Frame::End))?;
        self.closed = true;
        self.sender.close();
        Poll::Ready(Ok(()))
    }
}

enum ReadState {
    Open,
    Finished,
    Failed(io::ErrorKind, String),
}

/// Reading half of [`pipe`]
pub struct PipeReader {
    receiver: mpsc::Receiver<Frame>,
    pending: Bytes,
    state: ReadState,
}

impl AsyncRead for PipeReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        loop {
            if !self.pending.is_empty() {
                let n = self.pending.len().min(buf.remaining());
                let chunk = self.pending.split_to(n);
                buf.put_slice(&chunk);
                return Poll::Ready(Ok(()));
            }

            match &self.state {
                ReadState::Open => {}
                ReadState::Finished => return Poll::Ready(Ok(())),
                ReadState::Failed(kind, message) => {
                    return Poll::Ready(Err(io::Error::new(*kind, message.clone())));
                }
            }

            match ready!(self.receiver.poll_recv(cx)) {
                Some(Frame::Data(data)) => self.pending = data,
                Some(Frame::End) => self.state = ReadState::Finished,
                Some(Frame::Failed(err)) => {
                    self.state = ReadState::Failed(err.kind(), err.to_string());
                    return Poll::Ready(Err(err));
                }
                None => {
                    self.state = ReadState::Failed(
                        io::ErrorKind::UnexpectedEof,
                        "upload pipe writer went away before finishing the stream".to_string(),
                    );
                }
            }
        }
    }
}
