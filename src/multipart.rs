use crate::assembler::{Event, PartAssembler};
use crate::buffer::StreamBuffer;
use crate::constraints::Constraints;
use crate::helpers;
use crate::part::Part;
use crate::state::{MultipartState, StreamingStage};
use bytes::Bytes;
use futures_util::stream::{Stream, TryStreamExt};
use spin::mutex::spin::SpinMutex as Mutex;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
#[cfg(feature = "tokio-io")]
use {tokio::io::AsyncRead, tokio_util::io::ReaderStream};

/// Represents the implementation of the multipart MIME format.
///
/// This will parse the source stream into [`Part`] instances via its
/// [`Stream`] implementation.
///
/// To maintain consistency in the underlying stream, this will not yield more
/// than one streamed [`Part`] at a time. A [`Drop`] implementation on
/// [`Part`] is used to signal when it's time to move forward, so do avoid
/// leaking that type or anything which contains it.
///
/// `Field` and `Object` parts are buffered and come out with their decoded
/// [`Value`](crate::Value), `Stream` parts expose their body as it arrives.
/// See [`Constraints::dispatch`] to change that.
///
/// The parts can be accessed via the [`Stream`] API or the methods defined in
/// this type.
///
/// # Examples
///
/// ```
/// use partstream::Multipart;
/// use bytes::Bytes;
/// use std::convert::Infallible;
/// use futures_util::stream::once;
///
/// # async fn run() {
/// let data = "--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"my_text_field\"\r\n\r\nabcd\r\n--X-BOUNDARY--\r\n";
/// let stream = once(async move { Result::<Bytes, Infallible>::Ok(Bytes::from(data)) });
/// let mut multipart = Multipart::new(stream, "X-BOUNDARY");
///
/// while let Some(part) = multipart.next_part().await.unwrap() {
///     println!("Part: {:?}", part.text().await)
/// }
/// # }
/// # tokio::runtime::Runtime::new().unwrap().block_on(run());
/// ```
#[derive(Debug)]
pub struct Multipart<'r> {
    state: Arc<Mutex<MultipartState<'r>>>,
}

impl<'r> Multipart<'r> {
    /// Construct a new `Multipart` instance with the given [`Bytes`] stream
    /// and the boundary.
    ///
    /// An empty boundary is reported as [`Error::BadContentType`] by the first
    /// poll.
    ///
    /// [`Error::BadContentType`]: crate::Error::BadContentType
    pub fn new<S, O, E, B>(stream: S, boundary: B) -> Self
    where
        S: Stream<Item = Result<O, E>> + Send + 'r,
        O: Into<Bytes> + 'r,
        E: Into<Box<dyn std::error::Error + Send + Sync>> + 'r,
        B: Into<String>,
    {
        Multipart::with_constraints(stream, boundary, Constraints::default())
    }

    /// Construct a new `Multipart` instance with the given [`Bytes`] stream
    /// and the boundary, applying the given [`Constraints`].
    pub fn with_constraints<S, O, E, B>(stream: S, boundary: B, constraints: Constraints) -> Self
    where
        S: Stream<Item = Result<O, E>> + Send + 'r,
        O: Into<Bytes> + 'r,
        E: Into<Box<dyn std::error::Error + Send + Sync>> + 'r,
        B: Into<String>,
    {
        let stream = stream
            .map_ok(|b| b.into())
            .map_err(|err| crate::Error::Unexpected(err.into()));

        let (assembler, pending_error) = match PartAssembler::new(boundary.into(), constraints) {
            Ok(assembler) => (Some(assembler), None),
            Err(err) => (None, Some(err)),
        };

        let state = MultipartState {
            buffer: StreamBuffer::new(stream),
            assembler,
            pending_error,
            stage: StreamingStage::ReadingParts,
            is_prev_part_consumed: true,
            next_part_waker: None,
        };

        Multipart {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Construct a new `Multipart` instance, taking the boundary from a
    /// `Content-Type` value.
    ///
    /// Fails with [`Error::BadContentType`](crate::Error::BadContentType)
    /// when it carries no boundary.
    pub fn from_content_type<S, O, E>(stream: S, content_type: &str) -> crate::Result<Self>
    where
        S: Stream<Item = Result<O, E>> + Send + 'r,
        O: Into<Bytes> + 'r,
        E: Into<Box<dyn std::error::Error + Send + Sync>> + 'r,
    {
        let boundary = helpers::extract_boundary(content_type).ok_or(crate::Error::BadContentType)?;
        Ok(Multipart::new(stream, boundary))
    }

    /// Construct a new `Multipart` instance with the given [`AsyncRead`]
    /// reader and the boundary.
    ///
    /// # Optional
    ///
    /// This requires the optional `tokio-io` feature to be enabled.
    ///
    /// # Examples
    ///
    /// ```
    /// use partstream::Multipart;
    ///
    /// # async fn run() {
    /// let data = "--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"upload\"; filename=\"a.txt\"\r\n\r\nabcd\r\n--X-BOUNDARY--\r\n";
    /// let reader = data.as_bytes();
    /// let mut multipart = Multipart::with_reader(reader, "X-BOUNDARY");
    ///
    /// while let Some(mut part) = multipart.next_part().await.unwrap() {
    ///     while let Some(chunk) = part.chunk().await.unwrap() {
    ///         println!("Chunk: {:?}", chunk);
    ///     }
    /// }
    /// # }
    /// # tokio::runtime::Runtime::new().unwrap().block_on(run());
    /// ```
    #[cfg(feature = "tokio-io")]
    #[cfg_attr(nightly, doc(cfg(feature = "tokio-io")))]
    pub fn with_reader<R, B>(reader: R, boundary: B) -> Self
    where
        R: AsyncRead + Unpin + Send + 'r,
        B: Into<String>,
    {
        let stream = ReaderStream::new(reader);
        Multipart::new(stream, boundary)
    }

    /// Construct a new `Multipart` instance with the given [`AsyncRead`]
    /// reader, the boundary and the given [`Constraints`].
    ///
    /// # Optional
    ///
    /// This requires the optional `tokio-io` feature to be enabled.
    #[cfg(feature = "tokio-io")]
    #[cfg_attr(nightly, doc(cfg(feature = "tokio-io")))]
    pub fn with_reader_with_constraints<R, B>(reader: R, boundary: B, constraints: Constraints) -> Self
    where
        R: AsyncRead + Unpin + Send + 'r,
        B: Into<String>,
    {
        let stream = ReaderStream::new(reader);
        Multipart::with_constraints(stream, boundary, constraints)
    }

    /// Yields the next [`Part`] if available.
    ///
    /// Any error is terminal: later calls return `Ok(None)`.
    ///
    /// For more info, go to [`Part`](Part#warning-about-leaks).
    pub async fn next_part(&mut self) -> crate::Result<Option<Part<'r>>> {
        self.try_next().await
    }

    /// Yields the next [`Part`] with its positioning index as a tuple
    /// `(usize, Part)`.
    ///
    /// # Examples
    ///
    /// ```
    /// use partstream::Multipart;
    /// use bytes::Bytes;
    /// use std::convert::Infallible;
    /// use futures_util::stream::once;
    ///
    /// # async fn run() {
    /// let data = "--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"my_text_field\"\r\n\r\nabcd\r\n--X-BOUNDARY--\r\n";
    /// let stream = once(async move { Result::<Bytes, Infallible>::Ok(Bytes::from(data)) });
    /// let mut multipart = Multipart::new(stream, "X-BOUNDARY");
    ///
    /// while let Some((idx, part)) = multipart.next_part_with_idx().await.unwrap() {
    ///     println!("Index: {:?}, Content: {:?}", idx, part.text().await)
    /// }
    /// # }
    /// # tokio::runtime::Runtime::new().unwrap().block_on(run());
    /// ```
    pub async fn next_part_with_idx(&mut self) -> crate::Result<Option<(usize, Part<'r>)>> {
        self.try_next().await.map(|p| p.map(|part| (part.index(), part)))
    }
}

impl<'r> Stream for Multipart<'r> {
    type Item = crate::Result<Part<'r>>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut state = self.state.lock();

        if !state.is_prev_part_consumed {
            state.next_part_waker = Some(cx.waker().clone());
            return Poll::Pending;
        }

        loop {
            let event = match state.poll_event(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Ready(Some(Err(err))) => return Poll::Ready(Some(Err(err))),
                Poll::Ready(Some(Ok(event))) => event,
            };

            match event {
                Event::PartStart(info) => {
                    state.is_prev_part_consumed = false;
                    drop(state);

                    return Poll::Ready(Some(Ok(Part::streaming(Arc::clone(&self.state), info))));
                }
                Event::Part(info, value) => return Poll::Ready(Some(Ok(Part::buffered(info, value)))),
                // Leftovers of a streamed part dropped before its end.
                Event::PartData(_) | Event::PartEnd => continue,
                Event::Finish => return Poll::Ready(None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use std::convert::Infallible;

    fn chunked(data: &'static str, size: usize) -> impl Stream<Item = Result<Bytes, Infallible>> {
        let chunks: Vec<Result<Bytes, Infallible>> = data
            .as_bytes()
            .chunks(size)
            .map(|chunk| Ok(Bytes::from_static(chunk)))
            .collect();
        stream::iter(chunks)
    }

    const DATA: &str = "--X-BOUNDARY\r\n\
        Content-Disposition: form-data; name=\"upload\"; filename=\"a.txt\"\r\n\
        Content-Type: text/plain\r\n\r\n\
        first file body\r\n\
        --X-BOUNDARY\r\n\
        Content-Disposition: form-data; name=\"skipped\"; filename=\"b.bin\"\r\n\r\n\
        second file body\r\n\
        --X-BOUNDARY\r\n\
        Content-Disposition: form-data; name=\"answer\"\r\n\r\n\
        42\r\n\
        --X-BOUNDARY--\r\n";

    #[tokio::test]
    async fn test_multipart_basic() {
        let mut m = Multipart::new(chunked(DATA, 7), "X-BOUNDARY");

        let (idx, part) = m.next_part_with_idx().await.unwrap().unwrap();
        assert_eq!(idx, 0);
        assert!(part.is_streaming());
        assert_eq!(part.file_name(), Some("a.txt"));
        assert_eq!(part.bytes().await.unwrap(), Bytes::from_static(b"first file body"));

        // Dropped without reading.
        let part = m.next_part().await.unwrap().unwrap();
        assert_eq!(part.name(), Some("skipped"));
        drop(part);

        let part = m.next_part().await.unwrap().unwrap();
        assert_eq!(part.index(), 2);
        assert!(!part.is_streaming());
        assert_eq!(part.value().and_then(|value| value.as_text()), Some("42"));
        assert_eq!(part.text().await.unwrap(), "42");

        assert!(m.next_part().await.unwrap().is_none());
        assert!(m.next_part().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_multipart_empty_boundary() {
        let mut m = Multipart::new(chunked(DATA, 7), "");

        assert_eq!(m.next_part().await.unwrap_err(), crate::Error::BadContentType);
        assert!(m.next_part().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_multipart_upstream_error() {
        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(b"--X-BOUNDARY\r\n")),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
        ];
        let mut m = Multipart::new(stream::iter(chunks), "X-BOUNDARY");

        let err = m.next_part().await.unwrap_err();
        assert!(matches!(err, crate::Error::Unexpected(_)));
        assert!(m.next_part().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upstream_polled_on_demand() {
        use std::collections::VecDeque;
        use std::sync::atomic::{AtomicUsize, Ordering};

        let polls = Arc::new(AtomicUsize::new(0));
        let counter = polls.clone();
        let mut chunks = VecDeque::from(vec![
            Bytes::from_static(
                b"--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"f\"; filename=\"a.bin\"\r\n\r\n",
            ),
            Bytes::from_static(b"abc"),
            Bytes::from_static(b"\r\n--X-BOUNDARY--\r\n"),
        ]);
        let upstream = stream::poll_fn(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Poll::Ready(chunks.pop_front().map(Ok::<_, Infallible>))
        });

        let mut m = Multipart::new(upstream, "X-BOUNDARY");

        let mut part = m.next_part().await.unwrap().unwrap();
        assert!(part.is_streaming());
        assert_eq!(polls.load(Ordering::SeqCst), 1);

        assert_eq!(part.chunk().await.unwrap(), Some(Bytes::from_static(b"abc")));
        assert_eq!(polls.load(Ordering::SeqCst), 2);

        assert_eq!(part.chunk().await.unwrap(), None);
        drop(part);
        assert!(m.next_part().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_from_content_type() {
        let m = Multipart::from_content_type(chunked(DATA, 64), "multipart/form-data; boundary=X-BOUNDARY");
        let mut m = m.unwrap();
        assert!(m.next_part().await.unwrap().is_some());

        let m = Multipart::from_content_type(chunked(DATA, 64), "multipart/form-data");
        assert_eq!(m.unwrap_err(), crate::Error::BadContentType);
    }
}
