use crate::constants;
use crate::part::PartInfo;
use crate::size_limit::SizeLimit;
use std::fmt;
use std::sync::Arc;

/// Decides how the body of a part reaches the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// The part is handed out as soon as its headers are parsed and the body
    /// is delivered chunk by chunk.
    Stream,
    /// The body is collected in memory and the part is handed out with its
    /// decoded [`Value`](crate::Value) once it is complete.
    Buffer,
}

type DispatchFn = dyn Fn(&PartInfo) -> Dispatch + Send + Sync;

/// Represents some rules to be applied on the stream to prevent DoS attacks.
///
/// # Examples
///
/// ```
/// use partstream::{Constraints, Dispatch, Multipart, PartKind, SizeLimit};
/// # use bytes::Bytes;
/// # use std::convert::Infallible;
/// # use futures_util::stream::once;
///
/// # async fn run() {
/// # let data = "--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"my_text_field\"\r\n\r\nabcd\r\n--X-BOUNDARY--\r\n";
/// # let some_stream = once(async move { Result::<Bytes, Infallible>::Ok(Bytes::from(data)) });
/// let constraints = Constraints::new()
///     .max_parts(20)
///     .size_limit(
///         SizeLimit::new()
///             .whole_stream(15 * 1024 * 1024)
///             .per_part(10 * 1024 * 1024)
///             .for_part("my_text_field", 30 * 1024),
///     )
///     // Keep small uploads in memory.
///     .dispatch(|info| match info.kind() {
///         PartKind::Stream if info.content_type() == Some("text/plain") => Dispatch::Buffer,
///         PartKind::Stream => Dispatch::Stream,
///         _ => Dispatch::Buffer,
///     });
///
/// let mut multipart = Multipart::with_constraints(some_stream, "X-BOUNDARY", constraints);
///
/// while let Some(part) = multipart.next_part().await.unwrap() {
///     println!("Part: {:?}", part.value())
/// }
/// # }
/// # tokio::runtime::Runtime::new().unwrap().block_on(run());
/// ```
#[derive(Clone)]
pub struct Constraints {
    pub(crate) size_limit: SizeLimit,
    pub(crate) max_parts: usize,
    pub(crate) dispatch: Option<Arc<DispatchFn>>,
}

impl Constraints {
    /// Creates a set of rules with default behaviors.
    pub fn new() -> Constraints {
        Constraints::default()
    }

    /// Applies rules on the size of the parts and the whole stream.
    pub fn size_limit(self, size_limit: SizeLimit) -> Constraints {
        Constraints { size_limit, ..self }
    }

    /// Limits the number of parts in a stream.
    ///
    /// The count is checked each time a new part starts: the session fails
    /// with [`Error::TooManyParts`](crate::Error::TooManyParts) when the
    /// parts seen so far plus the one starting would reach `max_parts`. As a
    /// result at most `max_parts - 1` parts are accepted, which is the
    /// threshold long-standing clients of this format rely on.
    pub fn max_parts(self, max_parts: usize) -> Constraints {
        Constraints { max_parts, ..self }
    }

    /// Overrides how parts are handed to the consumer.
    ///
    /// By default `Stream` parts are streamed while `Field` and `Object`
    /// parts are buffered.
    pub fn dispatch<F>(self, f: F) -> Constraints
    where
        F: Fn(&PartInfo) -> Dispatch + Send + Sync + 'static,
    {
        Constraints {
            dispatch: Some(Arc::new(f)),
            ..self
        }
    }

    pub(crate) fn dispatch_for(&self, info: &PartInfo) -> Dispatch {
        match self.dispatch {
            Some(ref dispatch) => dispatch(info),
            None => info.kind().default_dispatch(),
        }
    }
}

impl Default for Constraints {
    fn default() -> Self {
        Constraints {
            size_limit: SizeLimit::default(),
            max_parts: constants::DEFAULT_MAX_PARTS,
            dispatch: None,
        }
    }
}

impl fmt::Debug for Constraints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Constraints")
            .field("size_limit", &self.size_limit)
            .field("max_parts", &self.max_parts)
            .field("dispatch", &self.dispatch.as_ref().map(|_| "<fn>"))
            .finish()
    }
}
