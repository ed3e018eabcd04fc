//! Streaming payload transfer for `PUT` and `GET`.
//!
//! Both directions use [`copy_with_progress`]: read at most [`CHUNK_SIZE`]
//! bytes, write them to the sink, report cumulative progress, repeat. At most
//! one chunk plus [`UPLOAD_CHANNEL_DEPTH`] queued chunks are held in memory.
//!
//! Progress callbacks run inline on the task driving the I/O. A slow callback
//! throttles the transfer; there is no queue in between.

use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll, ready};

use bytes::Bytes;
use futures::future::BoxFuture;
use hyper::body::{Body, Frame, SizeHint};
use hyper::{HeaderMap, StatusCode, header};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::PollSender;

use crate::common::compression::BodyReader;
use crate::common::error::{DavError, Result};
use crate::webdav::types::TransferProgress;

pub const CHUNK_SIZE: usize = 8 * 1024;

/// Chunks that may be queued between the upload loop and the transport.
pub const UPLOAD_CHANNEL_DEPTH: usize = 4;

pub type ProgressListener = Box<dyn FnMut(TransferProgress) + Send>;

/// Caller-supplied body producer for [`PutSource::Writer`].
pub type BodyWriterFn = Box<dyn FnOnce(BodyWriter) -> BoxFuture<'static, anyhow::Result<()>> + Send>;

/// Reborrow a stored listener for one copy loop.
pub(crate) fn borrow_listener(
    progress: &mut Option<ProgressListener>,
) -> Option<&mut (dyn FnMut(TransferProgress) + Send)> {
    progress
        .as_deref_mut()
        .map(|listener| listener as &mut (dyn FnMut(TransferProgress) + Send))
}

/// Copy from `reader` to `writer` in [`CHUNK_SIZE`] pieces until end of input or until
/// `limit` bytes have been copied, reporting cumulative progress after every write.
pub async fn copy_with_progress<R, W>(
    reader: &mut R,
    writer: &mut W,
    limit: Option<u64>,
    total: Option<u64>,
    mut progress: Option<&mut (dyn FnMut(TransferProgress) + Send)>,
) -> io::Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut copied = 0u64;

    loop {
        let want = match limit {
            Some(limit) => {
                let remaining = limit.saturating_sub(copied);
                if remaining == 0 {
                    break;
                }
                remaining.min(CHUNK_SIZE as u64) as usize
            }
            None => CHUNK_SIZE,
        };

        let n = reader.read(&mut buf[..want]).await?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n]).await?;
        copied += n as u64;

        if let Some(listener) = progress.as_deref_mut() {
            listener(TransferProgress {
                transferred: copied,
                total,
            });
        }
    }

    writer.flush().await?;
    Ok(copied)
}

/// Request body fed by a [`BodyWriter`]. Ends cleanly when every writer is gone,
/// or with an error when the upload is aborted.
pub struct UploadBody {
    rx: mpsc::Receiver<io::Result<Bytes>>,
}

impl Body for UploadBody {
    type Data = Bytes;
    type Error = io::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<std::result::Result<Frame<Bytes>, io::Error>>> {
        match ready!(self.rx.poll_recv(cx)) {
            Some(Ok(chunk)) => Poll::Ready(Some(Ok(Frame::data(chunk)))),
            Some(Err(err)) => Poll::Ready(Some(Err(err))),
            None => Poll::Ready(None),
        }
    }

    fn size_hint(&self) -> SizeHint {
        SizeHint::default()
    }
}

/// Write half of an upload. Bytes written here become the request body.
pub struct BodyWriter {
    sender: PollSender<io::Result<Bytes>>,
    written: Arc<AtomicU64>,
}

impl BodyWriter {
    /// Bytes accepted so far.
    pub fn written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }
}

impl AsyncWrite for BodyWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }
        ready!(self.sender.poll_reserve(cx)).map_err(|_| closed())?;
        self.sender
            .send_item(Ok(Bytes::copy_from_slice(buf)))
            .map_err(|_| closed())?;
        self.written.fetch_add(buf.len() as u64, Ordering::Relaxed);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.sender.close();
        Poll::Ready(Ok(()))
    }
}

/// The transport dropped the request body, usually because the request itself failed.
#[derive(Debug, thiserror::Error)]
#[error("request body closed by transport")]
pub struct BodyClosed;

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, BodyClosed)
}

/// Whether an upload stopped only because the transport stopped reading the body.
/// The transport's own outcome then explains the failure better.
pub(crate) fn is_body_closed(err: &DavError) -> bool {
    let io = match err {
        DavError::Io(io) => io,
        DavError::Callback(err) => match err.downcast_ref::<io::Error>() {
            Some(io) => io,
            None => return false,
        },
        _ => return false,
    };
    io.get_ref().is_some_and(|inner| inner.is::<BodyClosed>())
}

/// Lets the uploader fail the request body instead of ending it cleanly.
pub struct UploadAbort {
    tx: mpsc::Sender<io::Result<Bytes>>,
}

impl UploadAbort {
    pub async fn abort(self, err: io::Error) {
        // A closed channel means the transport already gave up on the body.
        let _ = self.tx.send(Err(err)).await;
    }
}

/// Create the writer/body pair for one upload, plus the abort handle.
pub fn upload_channel() -> (BodyWriter, UploadBody, UploadAbort) {
    let (tx, rx) = mpsc::channel(UPLOAD_CHANNEL_DEPTH);
    let writer = BodyWriter {
        sender: PollSender::new(tx.clone()),
        written: Arc::new(AtomicU64::new(0)),
    };
    (writer, UploadBody { rx }, UploadAbort { tx })
}

/// Where a `PUT` body comes from.
pub enum PutSource {
    /// In-memory buffer. Repeatable.
    Bytes(Bytes),
    /// Local file, opened when the upload starts. Repeatable.
    File(PathBuf),
    /// Any async reader. Consumed once.
    Reader(Box<dyn AsyncRead + Send + Unpin>),
    /// Caller-driven writer callback. Consumed once.
    Writer(BodyWriterFn),
}

impl PutSource {
    pub fn bytes(data: impl Into<Bytes>) -> Self {
        PutSource::Bytes(data.into())
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        PutSource::File(path.into())
    }

    pub fn reader(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        PutSource::Reader(Box::new(reader))
    }

    /// Body produced by `f`, which receives the request's [`BodyWriter`].
    pub fn writer<F, Fut>(f: F) -> Self
    where
        F: FnOnce(BodyWriter) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        PutSource::Writer(Box::new(move |writer| Box::pin(f(writer))))
    }

    /// Whether the same source could be sent again from the start, e.g. after an
    /// authentication challenge. Readers and writer callbacks cannot.
    pub fn is_repeatable(&self) -> bool {
        matches!(self, PutSource::Bytes(_) | PutSource::File(_))
    }

    /// Size known without reading the payload.
    pub async fn known_len(&self) -> Option<u64> {
        match self {
            PutSource::Bytes(data) => Some(data.len() as u64),
            PutSource::File(path) => tokio::fs::metadata(path).await.ok().map(|m| m.len()),
            _ => None,
        }
    }

    /// Stream the payload into `sink`, then close it.
    pub async fn write_to(
        self,
        mut sink: BodyWriter,
        limit: Option<u64>,
        progress: Option<&mut (dyn FnMut(TransferProgress) + Send)>,
    ) -> Result<u64> {
        let copied = match self {
            PutSource::Bytes(data) => {
                let mut reader: &[u8] = &data;
                copy_with_progress(&mut reader, &mut sink, limit, limit, progress).await?
            }
            PutSource::File(path) => {
                let mut file = tokio::fs::File::open(&path).await?;
                copy_with_progress(&mut file, &mut sink, limit, limit, progress).await?
            }
            PutSource::Reader(mut reader) => {
                copy_with_progress(&mut reader, &mut sink, limit, limit, progress).await?
            }
            PutSource::Writer(write) => {
                let written = sink.written.clone();
                write(sink).await.map_err(DavError::Callback)?;
                return Ok(written.load(Ordering::Relaxed));
            }
        };
        sink.shutdown().await?;
        Ok(copied)
    }
}

impl std::fmt::Debug for PutSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PutSource::Bytes(data) => write!(f, "PutSource::Bytes({} bytes)", data.len()),
            PutSource::File(path) => write!(f, "PutSource::File({})", path.display()),
            PutSource::Reader(_) => f.write_str("PutSource::Reader"),
            PutSource::Writer(_) => f.write_str("PutSource::Writer"),
        }
    }
}

/// Streaming `GET` response handed to the caller's continuation.
pub struct Download {
    status: StatusCode,
    headers: HeaderMap,
    content_length: Option<u64>,
    reader: BodyReader,
    progress: Option<ProgressListener>,
}

impl Download {
    pub(crate) fn new(
        status: StatusCode,
        headers: HeaderMap,
        content_length: Option<u64>,
        reader: BodyReader,
        progress: Option<ProgressListener>,
    ) -> Self {
        Self {
            status,
            headers,
            content_length,
            reader,
            progress,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Payload length as announced by the server, when it is not chunked or re-encoded.
    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }

    pub fn etag(&self) -> Option<&str> {
        self.headers.get(header::ETAG).and_then(|v| v.to_str().ok())
    }

    /// Stream the body into `writer`, reporting progress. Returns the byte count.
    pub async fn copy_to<W>(&mut self, writer: &mut W) -> io::Result<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        copy_with_progress(
            &mut self.reader,
            writer,
            None,
            self.content_length,
            borrow_listener(&mut self.progress),
        )
        .await
    }

    /// Collect the whole body in memory. Only sensible for small payloads.
    pub async fn bytes(mut self) -> io::Result<Bytes> {
        let mut out = Vec::with_capacity(self.content_length.unwrap_or(0).min(1 << 20) as usize);
        self.copy_to(&mut out).await?;
        Ok(Bytes::from(out))
    }

    /// Raw body reader. Progress is no longer reported once the reader is taken.
    pub fn into_reader(self) -> BodyReader {
        self.reader
    }
}
