//! Response capture via a tee body.
//!
//! Every frame streamed to the client is also observed by a bounded
//! capture buffer. Up to the watermark the full payload is retained;
//! past it the capture switches to streaming mode, keeps counting, and
//! the stored body becomes the `<streaming-response-size:N>` sentinel so
//! large downloads never pile up in memory or stall the client.

use super::ProxyBody;
use bytes::{Bytes, BytesMut};
use http_body_util::combinators::BoxBody;
use hyper::body::{Body, Frame, SizeHint};
use hyper::Response;
use parking_lot::Mutex;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tracing::debug;

/// Capture buffers above this size are discarded instead of pooled.
const POOL_RETURN_CAP: usize = 2 * 1024 * 1024;
const POOL_MAX_ENTRIES: usize = 32;

static BUFFER_POOL: Mutex<Vec<BytesMut>> = Mutex::new(Vec::new());

fn acquire_buffer() -> BytesMut {
    BUFFER_POOL
        .lock()
        .pop()
        .unwrap_or_else(|| BytesMut::with_capacity(8 * 1024))
}

fn release_buffer(mut buf: BytesMut) {
    buf.clear();
    if buf.capacity() > POOL_RETURN_CAP {
        return;
    }
    let mut pool = BUFFER_POOL.lock();
    if pool.len() < POOL_MAX_ENTRIES {
        pool.push(buf);
    }
}

/// What the recorder saw of a response body once it finished.
#[derive(Debug, Clone)]
pub enum CapturedBody {
    /// The body fit under the watermark; these are the bytes the client
    /// observed.
    Complete(Bytes),
    /// The body exceeded the watermark and streamed through; only the
    /// total size was kept.
    Streaming { total: u64 },
}

impl CapturedBody {
    /// Bytes to persist as `response_body`: the payload itself, or the
    /// size sentinel for streamed responses.
    pub fn stored_bytes(&self) -> Vec<u8> {
        match self {
            CapturedBody::Complete(bytes) => bytes.to_vec(),
            CapturedBody::Streaming { total } => {
                format!("<streaming-response-size:{total}>").into_bytes()
            }
        }
    }

    /// The validatable payload, when one was retained.
    pub fn complete_bytes(&self) -> Option<&[u8]> {
        match self {
            CapturedBody::Complete(bytes) => Some(bytes.as_ref()),
            CapturedBody::Streaming { .. } => None,
        }
    }

    pub fn len(&self) -> u64 {
        match self {
            CapturedBody::Complete(bytes) => bytes.len() as u64,
            CapturedBody::Streaming { total } => *total,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Body wrapper that forwards frames unchanged while teeing data frames
/// into the capture buffer. The capture is delivered exactly once, when
/// the body ends, errors, or is dropped mid-stream.
struct TeeBody {
    inner: ProxyBody,
    buf: BytesMut,
    total: u64,
    watermark: usize,
    done: Option<oneshot::Sender<CapturedBody>>,
}

impl TeeBody {
    fn observe(&mut self, data: &Bytes) {
        self.total += data.len() as u64;
        if self.total <= self.watermark as u64 {
            self.buf.extend_from_slice(data);
        } else if self.buf.len() < self.watermark {
            // Keep the first watermark bytes for inspection and logging.
            let room = self.watermark - self.buf.len();
            self.buf.extend_from_slice(&data[..room.min(data.len())]);
        }
    }

    fn finish(&mut self) {
        let Some(tx) = self.done.take() else { return };
        let captured = if self.total > self.watermark as u64 {
            debug!(
                total = self.total,
                retained = self.buf.len(),
                "response exceeded buffer watermark, storing size sentinel"
            );
            release_buffer(std::mem::take(&mut self.buf));
            CapturedBody::Streaming { total: self.total }
        } else {
            CapturedBody::Complete(std::mem::take(&mut self.buf).freeze())
        };
        let _ = tx.send(captured);
    }
}

impl Body for TeeBody {
    type Data = Bytes;
    type Error = hyper::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_frame(cx) {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(data) = frame.data_ref() {
                    this.observe(data);
                }
                Poll::Ready(Some(Ok(frame)))
            }
            Poll::Ready(Some(Err(e))) => {
                this.finish();
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.finish();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for TeeBody {
    fn drop(&mut self) {
        // Client went away mid-stream: deliver what was captured so far.
        self.finish();
    }
}

/// Interpose the recorder on a response. Returns the wrapped response
/// and a receiver resolving to the capture when the body completes.
pub fn capture_response(
    response: Response<ProxyBody>,
    watermark: usize,
) -> (Response<ProxyBody>, oneshot::Receiver<CapturedBody>) {
    let (tx, rx) = oneshot::channel();
    let (parts, body) = response.into_parts();
    let tee = TeeBody {
        inner: body,
        buf: acquire_buffer(),
        total: 0,
        watermark,
        done: Some(tx),
    };
    (Response::from_parts(parts, BoxBody::new(tee)), rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::full_body;
    use http_body_util::BodyExt;

    async fn run_capture(payload: &[u8], watermark: usize) -> (Bytes, CapturedBody) {
        let response = Response::new(full_body(payload.to_vec()));
        let (response, rx) = capture_response(response, watermark);
        let delivered = response.into_body().collect().await.unwrap().to_bytes();
        let captured = rx.await.unwrap();
        (delivered, captured)
    }

    #[tokio::test]
    async fn test_small_body_captured_completely() {
        let (delivered, captured) = run_capture(b"hello world", 1024).await;
        assert_eq!(delivered.as_ref(), b"hello world");
        match captured {
            CapturedBody::Complete(bytes) => assert_eq!(bytes.as_ref(), b"hello world"),
            CapturedBody::Streaming { .. } => panic!("unexpected streaming capture"),
        }
    }

    #[tokio::test]
    async fn test_body_at_watermark_is_complete() {
        let payload = vec![7u8; 64];
        let (delivered, captured) = run_capture(&payload, 64).await;
        assert_eq!(delivered.len(), 64);
        assert!(matches!(captured, CapturedBody::Complete(_)));
    }

    #[tokio::test]
    async fn test_large_body_streams_with_sentinel() {
        let payload = vec![1u8; 4096];
        let (delivered, captured) = run_capture(&payload, 64).await;

        // The client still receives every byte.
        assert_eq!(delivered.len(), 4096);

        match &captured {
            CapturedBody::Streaming { total } => assert_eq!(*total, 4096),
            CapturedBody::Complete(_) => panic!("expected streaming capture"),
        }
        assert_eq!(
            captured.stored_bytes(),
            b"<streaming-response-size:4096>".to_vec()
        );
        assert!(captured.complete_bytes().is_none());
    }

    #[tokio::test]
    async fn test_sentinel_format() {
        let (_, captured) = run_capture(&vec![0u8; 100], 10).await;
        let stored = String::from_utf8(captured.stored_bytes()).unwrap();
        let digits = stored
            .strip_prefix("<streaming-response-size:")
            .and_then(|s| s.strip_suffix('>'))
            .unwrap();
        assert!(!digits.is_empty());
        assert!(digits.bytes().all(|b| b.is_ascii_digit()));
    }

    #[tokio::test]
    async fn test_empty_body() {
        let (delivered, captured) = run_capture(b"", 64).await;
        assert!(delivered.is_empty());
        assert!(captured.is_empty());
        assert!(matches!(captured, CapturedBody::Complete(_)));
    }

    #[tokio::test]
    async fn test_capture_delivered_on_drop() {
        let response = Response::new(full_body("partial"));
        let (response, rx) = capture_response(response, 1024);
        drop(response);
        // Nothing was polled, so the capture is empty but still arrives.
        let captured = rx.await.unwrap();
        assert_eq!(captured.len(), 0);
    }

    #[test]
    fn test_buffer_pool_discards_oversized() {
        release_buffer(BytesMut::with_capacity(POOL_RETURN_CAP * 2));
        // Oversized buffers are never pooled, so whatever comes back is
        // within the return cap.
        let reused = acquire_buffer();
        assert!(reused.capacity() <= POOL_RETURN_CAP);
    }
}
