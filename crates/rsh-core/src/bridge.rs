//! Unidirectional byte bridges between streams
//!
//! A bridge copies from a source to a sink until the source reports
//! end-of-stream or either side fails. The sink is flushed after every chunk
//! so interactive output reaches the peer without waiting for the buffer to
//! fill. Sinks are never shut down by the bridge; ownership of the close
//! stays with the caller.

use std::io;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

/// Size of the per-bridge copy buffer
pub const BRIDGE_BUFFER_SIZE: usize = 8192;

/// Result of one bridge run
#[derive(Debug)]
pub struct BridgeResult {
    /// Bytes written to the sink
    pub bytes_copied: u64,
    /// Terminal error; `None` means the source reached end-of-stream
    pub error: Option<io::Error>,
}

impl BridgeResult {
    /// The source ended cleanly
    pub fn is_clean(&self) -> bool {
        self.error.is_none()
    }

    /// Convert into a `Result` carrying the byte count
    pub fn into_result(self) -> io::Result<u64> {
        match self.error {
            None => Ok(self.bytes_copied),
            Some(e) => Err(e),
        }
    }
}

/// Copy `source` into `sink` until end-of-stream or error
///
/// A sink that accepts zero bytes (closed underneath us) is reported as a
/// `WriteZero` error.
pub async fn copy<R, W>(mut source: R, mut sink: W) -> BridgeResult
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; BRIDGE_BUFFER_SIZE];
    let mut bytes_copied = 0u64;

    loop {
        let n = match source.read(&mut buf).await {
            Ok(0) => {
                return BridgeResult {
                    bytes_copied,
                    error: None,
                }
            }
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                return BridgeResult {
                    bytes_copied,
                    error: Some(e),
                }
            }
        };

        if let Err(e) = write_chunk(&mut sink, &buf[..n]).await {
            return BridgeResult {
                bytes_copied,
                error: Some(e),
            };
        }

        bytes_copied += n as u64;
        tracing::trace!("Bridged {} bytes ({} total)", n, bytes_copied);
    }
}

/// Copy `source` into a writer shared with other bridges
///
/// Each chunk is written and flushed under the writer's lock.
pub async fn copy_shared<R, W>(mut source: R, sink: &SharedWriter<W>) -> BridgeResult
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; BRIDGE_BUFFER_SIZE];
    let mut bytes_copied = 0u64;

    loop {
        let n = match source.read(&mut buf).await {
            Ok(0) => {
                return BridgeResult {
                    bytes_copied,
                    error: None,
                }
            }
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                return BridgeResult {
                    bytes_copied,
                    error: Some(e),
                }
            }
        };

        if let Err(e) = sink.write_chunk(&buf[..n]).await {
            return BridgeResult {
                bytes_copied,
                error: Some(e),
            };
        }

        bytes_copied += n as u64;
        tracing::trace!("Bridged {} shared bytes ({} total)", n, bytes_copied);
    }
}

async fn write_chunk<W: AsyncWrite + Unpin>(sink: &mut W, chunk: &[u8]) -> io::Result<()> {
    sink.write_all(chunk).await?;
    sink.flush().await
}

/// A writer that several bridges can feed concurrently
///
/// The lock is held for a whole chunk, including every poll of a pending
/// send, so a sink that keeps in-flight bytes between polls only ever sees
/// the bytes of the writer holding the lock.
pub struct SharedWriter<W> {
    inner: Arc<Mutex<W>>,
}

impl<W> SharedWriter<W> {
    /// Wrap a writer for shared use
    pub fn new(inner: W) -> Self {
        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }
}

impl<W> Clone for SharedWriter<W> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<W: AsyncWrite + Unpin> SharedWriter<W> {
    /// Write and flush `chunk` without interleaving other writers
    pub async fn write_chunk(&self, chunk: &[u8]) -> io::Result<()> {
        let mut sink = self.inner.lock().await;
        write_chunk(&mut *sink, chunk).await
    }

    /// Shut down the underlying writer
    pub async fn shutdown(&self) -> io::Result<()> {
        let mut sink = self.inner.lock().await;
        sink.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_copy_until_eof() {
        let source: &[u8] = b"hello bridge";
        let mut sink = Vec::new();

        let result = copy(source, &mut sink).await;
        assert!(result.is_clean());
        assert_eq!(result.bytes_copied, 12);
        assert_eq!(sink, b"hello bridge");
    }

    #[tokio::test]
    async fn test_copy_reports_closed_sink() {
        let (sink, reader) = duplex(64);
        drop(reader);

        let result = copy(&b"data"[..], sink).await;
        assert!(!result.is_clean());
        assert_eq!(result.bytes_copied, 0);
        assert_eq!(result.into_result().unwrap_err().kind(), io::ErrorKind::BrokenPipe);
    }

    #[tokio::test]
    async fn test_copy_large_input() {
        let input = vec![7u8; BRIDGE_BUFFER_SIZE * 3 + 17];
        let mut sink = Vec::new();

        let result = copy(&input[..], &mut sink).await;
        assert_eq!(result.into_result().unwrap(), input.len() as u64);
        assert_eq!(sink, input);
    }

    #[tokio::test]
    async fn test_shared_writer_concurrent_bridges() {
        let (writer, mut reader) = duplex(1024);
        let shared = SharedWriter::new(writer);

        let (a, b) = tokio::join!(
            copy_shared(&b"aaaa"[..], &shared),
            copy_shared(&b"bbbb"[..], &shared),
        );
        assert!(a.is_clean() && b.is_clean());
        drop(shared);

        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        out.sort_unstable();
        assert_eq!(out, b"aaaabbbb");
    }

    /// Takes at most five bytes per send and finishes the send on the next
    /// poll, whatever buffer that poll carries
    struct DeferredSink {
        in_flight: Option<Vec<u8>>,
        written: Arc<std::sync::Mutex<Vec<u8>>>,
    }

    impl AsyncWrite for DeferredSink {
        fn poll_write(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            if let Some(sent) = self.in_flight.take() {
                self.written.lock().unwrap().extend_from_slice(&sent);
                return Poll::Ready(Ok(sent.len()));
            }
            self.in_flight = Some(buf[..buf.len().min(5)].to_vec());
            cx.waker().wake_by_ref();
            Poll::Pending
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_shared_writer_keeps_pending_sends_apart() {
        let written = Arc::new(std::sync::Mutex::new(Vec::new()));
        let shared = SharedWriter::new(DeferredSink {
            in_flight: None,
            written: Arc::clone(&written),
        });

        let long = vec![b'a'; 1000];
        let (a, b) = tokio::join!(
            copy_shared(&long[..], &shared),
            copy_shared(&b"bbb"[..], &shared),
        );
        assert_eq!(a.into_result().unwrap(), 1000);
        assert_eq!(b.into_result().unwrap(), 3);

        let out = written.lock().unwrap().clone();
        assert_eq!(out.len(), 1003);
        assert_eq!(out.iter().filter(|&&byte| byte == b'a').count(), 1000);
        assert_eq!(out.iter().filter(|&&byte| byte == b'b').count(), 3);
    }
}
