use bytes::Bytes;
use futures_util::stream::Stream;
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

/// The upstream of a [`Multipart`](crate::Multipart), polled one chunk at a
/// time so that nothing is read ahead of the consumer.
pub(crate) struct StreamBuffer<'r> {
    pub(crate) eof: bool,
    pub(crate) stream: Pin<Box<dyn Stream<Item = crate::Result<Bytes>> + Send + 'r>>,
    pub(crate) bytes_read: u64,
}

impl<'r> StreamBuffer<'r> {
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = crate::Result<Bytes>> + Send + 'r,
    {
        StreamBuffer {
            eof: false,
            stream: Box::pin(stream),
            bytes_read: 0,
        }
    }

    /// Polls the next chunk. Once the upstream is exhausted or has failed,
    /// this keeps returning `None`.
    pub fn poll_chunk(&mut self, cx: &mut Context<'_>) -> Poll<Option<crate::Result<Bytes>>> {
        if self.eof {
            return Poll::Ready(None);
        }

        match self.stream.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(data))) => {
                self.bytes_read += data.len() as u64;
                Poll::Ready(Some(Ok(data)))
            }
            Poll::Ready(Some(Err(err))) => {
                self.eof = true;
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                self.eof = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl fmt::Debug for StreamBuffer<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamBuffer")
            .field("eof", &self.eof)
            .field("bytes_read", &self.bytes_read)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::future::poll_fn;
    use futures_util::stream;

    #[tokio::test]
    async fn test_poll_chunk() {
        let chunks: Vec<crate::Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"abc")),
            Err(crate::Error::parse("boom")),
            Ok(Bytes::from_static(b"never read")),
        ];
        let mut buffer = StreamBuffer::new(stream::iter(chunks));

        let first = poll_fn(|cx| buffer.poll_chunk(cx)).await;
        assert_eq!(first, Some(Ok(Bytes::from_static(b"abc"))));

        let second = poll_fn(|cx| buffer.poll_chunk(cx)).await;
        assert!(matches!(second, Some(Err(_))));
        assert!(buffer.eof);

        assert_eq!(poll_fn(|cx| buffer.poll_chunk(cx)).await, None);
        assert_eq!(buffer.bytes_read, 3);
    }
}
