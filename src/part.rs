use crate::assembler::Event;
use crate::constants;
use crate::constraints::Dispatch;
use crate::headers::Headers;
use crate::state::MultipartState;
use bytes::{Bytes, BytesMut};
use encoding_rs::{Encoding, UTF_8};
use futures_util::stream::{Stream, TryStreamExt};
#[cfg(feature = "json")]
use serde::de::DeserializeOwned;
use spin::mutex::spin::SpinMutex as Mutex;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

/// The kind of a part, inferred from its headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartKind {
    /// A named text value without a file name.
    Field,
    /// A JSON document, recognized by a `Content-Type` containing `/json`.
    Object,
    /// Any other body, typically a file upload.
    Stream,
}

impl PartKind {
    pub(crate) fn infer(content_type: Option<&str>, name: Option<&str>, file_name: Option<&str>) -> PartKind {
        if content_type.map(|ct| ct.contains("/json")).unwrap_or(false) {
            PartKind::Object
        } else if name.is_some() && file_name.is_none() {
            PartKind::Field
        } else {
            PartKind::Stream
        }
    }

    pub(crate) fn default_dispatch(self) -> Dispatch {
        match self {
            PartKind::Stream => Dispatch::Stream,
            PartKind::Field | PartKind::Object => Dispatch::Buffer,
        }
    }
}

/// The metadata of a part, known once its header block is parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartInfo {
    pub(crate) index: usize,
    pub(crate) kind: PartKind,
    pub(crate) name: Option<String>,
    pub(crate) file_name: Option<String>,
    pub(crate) content_id: Option<String>,
    pub(crate) content_type: Option<String>,
    pub(crate) transfer_encoding: String,
    pub(crate) headers: Headers,
}

impl PartInfo {
    pub(crate) fn new(index: usize) -> PartInfo {
        PartInfo {
            index,
            kind: PartKind::Stream,
            name: None,
            file_name: None,
            content_id: None,
            content_type: None,
            transfer_encoding: constants::DEFAULT_TRANSFER_ENCODING.to_owned(),
            headers: Headers::new(),
        }
    }

    /// The position of the part in the stream, starting at zero.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn kind(&self) -> PartKind {
        self.kind
    }

    /// The `name` parameter of the `Content-Disposition` header.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The `filename` parameter of the `Content-Disposition` header, reduced
    /// to its last path segment.
    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }

    /// The `Content-ID` header without its angle brackets.
    pub fn content_id(&self) -> Option<&str> {
        self.content_id.as_deref()
    }

    /// The lower-cased `Content-Type` header.
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// The `Content-Type` header parsed as a [`mime::Mime`], if it is valid.
    pub fn mime_type(&self) -> Option<mime::Mime> {
        self.content_type.as_deref().and_then(|ct| ct.parse::<mime::Mime>().ok())
    }

    /// The lower-cased `Content-Transfer-Encoding`, `binary` when absent.
    pub fn transfer_encoding(&self) -> &str {
        &self.transfer_encoding
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }
}

/// The decoded body of a buffered part.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// The body of a `Field` part decoded to text.
    Text(String),
    /// The body of an `Object` part. A body that is not valid JSON yields an
    /// empty object.
    Json(serde_json::Value),
    /// The body of a buffered `Stream` part.
    Binary(Bytes),
}

impl Value {
    pub(crate) fn decode(info: &PartInfo, body: Bytes) -> Value {
        match info.kind {
            PartKind::Field => Value::Text(decode_text(&body, info.content_type(), "utf-8")),
            PartKind::Object => {
                let text = decode_text(&body, info.content_type(), "utf-8");
                let json = serde_json::from_str(&text)
                    .unwrap_or_else(|_| serde_json::Value::Object(serde_json::Map::new()));
                Value::Json(json)
            }
            PartKind::Stream => Value::Binary(body),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Value::Json(json) => Some(json),
            _ => None,
        }
    }

    /// The serialized form of the value.
    pub fn to_bytes(&self) -> Bytes {
        match self {
            Value::Text(text) => Bytes::copy_from_slice(text.as_bytes()),
            Value::Json(json) => Bytes::from(json.to_string()),
            Value::Binary(bytes) => bytes.clone(),
        }
    }
}

pub(crate) fn decode_text(bytes: &[u8], content_type: Option<&str>, default_encoding: &str) -> String {
    let mime = content_type.and_then(|ct| ct.parse::<mime::Mime>().ok());
    let encoding_name = mime
        .as_ref()
        .and_then(|mime| mime.get_param(mime::CHARSET))
        .map(|charset| charset.as_str())
        .unwrap_or(default_encoding);

    let encoding = Encoding::for_label(encoding_name.as_bytes()).unwrap_or(UTF_8);
    let (text, _, _) = encoding.decode(bytes);

    text.into_owned()
}

/// A single part of a multipart stream.
///
/// A part is either buffered, with its [`Value`] already decoded, or
/// streamed, in which case its body is read from the underlying stream on
/// demand through [`chunk`](Part::chunk) or the [`Stream`] implementation.
///
/// # Warning About Leaks
///
/// While a streamed part is alive, [`Multipart`](crate::Multipart) won't
/// yield the next one. Dropping the part discards the rest of its body and
/// lets the parser move forward, so do not leak it.
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
/// let data = "--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"upload\"; filename=\"a.txt\"\r\n\r\nabcd\r\n--X-BOUNDARY--\r\n";
/// let stream = once(async move { Result::<Bytes, Infallible>::Ok(Bytes::from(data)) });
/// let mut multipart = Multipart::new(stream, "X-BOUNDARY");
///
/// while let Some(mut part) = multipart.next_part().await.unwrap() {
///     while let Some(chunk) = part.chunk().await.unwrap() {
///         println!("Chunk: {:?}", chunk);
///     }
/// }
/// # }
/// # tokio::runtime::Runtime::new().unwrap().block_on(run());
/// ```
pub struct Part<'r> {
    info: PartInfo,
    body: Body<'r>,
}

enum Body<'r> {
    Buffered(Option<Value>),
    Streaming {
        state: Arc<Mutex<MultipartState<'r>>>,
        done: bool,
    },
}

impl<'r> Part<'r> {
    pub(crate) fn buffered(info: PartInfo, value: Value) -> Part<'r> {
        Part {
            info,
            body: Body::Buffered(Some(value)),
        }
    }

    pub(crate) fn streaming(state: Arc<Mutex<MultipartState<'r>>>, info: PartInfo) -> Part<'r> {
        Part {
            info,
            body: Body::Streaming { state, done: false },
        }
    }

    pub fn info(&self) -> &PartInfo {
        &self.info
    }

    pub fn kind(&self) -> PartKind {
        self.info.kind()
    }

    pub fn name(&self) -> Option<&str> {
        self.info.name()
    }

    pub fn file_name(&self) -> Option<&str> {
        self.info.file_name()
    }

    pub fn content_id(&self) -> Option<&str> {
        self.info.content_id()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.info.content_type()
    }

    pub fn mime_type(&self) -> Option<mime::Mime> {
        self.info.mime_type()
    }

    pub fn transfer_encoding(&self) -> &str {
        self.info.transfer_encoding()
    }

    pub fn headers(&self) -> &Headers {
        self.info.headers()
    }

    pub fn index(&self) -> usize {
        self.info.index()
    }

    /// Whether the body is read from the stream on demand.
    pub fn is_streaming(&self) -> bool {
        matches!(self.body, Body::Streaming { .. })
    }

    /// The decoded value of a buffered part. Returns `None` for streamed
    /// parts and once the body has been read.
    pub fn value(&self) -> Option<&Value> {
        match self.body {
            Body::Buffered(ref value) => value.as_ref(),
            Body::Streaming { .. } => None,
        }
    }

    /// Takes the decoded value of a buffered part.
    pub fn into_value(mut self) -> Option<Value> {
        self.take_value()
    }

    fn take_value(&mut self) -> Option<Value> {
        match self.body {
            Body::Buffered(ref mut value) => value.take(),
            Body::Streaming { .. } => None,
        }
    }

    /// Get the full data of the part as [`Bytes`].
    pub async fn bytes(mut self) -> crate::Result<Bytes> {
        let mut buf = BytesMut::new();

        while let Some(bytes) = self.chunk().await? {
            buf.extend_from_slice(&bytes);
        }

        Ok(buf.freeze())
    }

    /// Stream a chunk of the part data.
    ///
    /// When the part data has been exhausted, this will return `None`.
    pub async fn chunk(&mut self) -> crate::Result<Option<Bytes>> {
        self.try_next().await
    }

    /// Try to deserialize the part data as JSON.
    ///
    /// # Optional
    ///
    /// This requires the optional `json` feature to be enabled.
    #[cfg(feature = "json")]
    #[cfg_attr(nightly, doc(cfg(feature = "json")))]
    pub async fn json<T: DeserializeOwned>(mut self) -> crate::Result<T> {
        match self.take_value() {
            Some(Value::Json(json)) => serde_json::from_value(json).map_err(crate::Error::DecodeJson),
            Some(value) => serde_json::from_slice(&value.to_bytes()).map_err(crate::Error::DecodeJson),
            None => self
                .bytes()
                .await
                .and_then(|bytes| serde_json::from_slice(&bytes).map_err(crate::Error::DecodeJson)),
        }
    }

    /// Get the full part data as text.
    ///
    /// The `charset` parameter of the `Content-Type` header picks the text
    /// encoding, UTF-8 is used when it is absent.
    pub async fn text(self) -> crate::Result<String> {
        self.text_with_charset("utf-8").await
    }

    /// Get the full part data as text given a specific encoding.
    ///
    /// The `charset` parameter of the `Content-Type` header still takes
    /// precedence over `default_encoding`. Buffered `Field` parts are already
    /// decoded and returned as is.
    pub async fn text_with_charset(mut self, default_encoding: &str) -> crate::Result<String> {
        let bytes = match self.take_value() {
            Some(Value::Text(text)) => return Ok(text),
            Some(value) => value.to_bytes(),
            None => {
                let mut buf = BytesMut::new();
                while let Some(bytes) = self.chunk().await? {
                    buf.extend_from_slice(&bytes);
                }
                buf.freeze()
            }
        };

        Ok(decode_text(&bytes, self.content_type(), default_encoding))
    }
}

impl Stream for Part<'_> {
    type Item = crate::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.body {
            Body::Buffered(ref mut value) => Poll::Ready(value.take().map(|value| Ok(value.to_bytes()))),
            Body::Streaming { ref state, ref mut done } => {
                if *done {
                    return Poll::Ready(None);
                }

                let mut state = state.lock();

                match state.poll_event(cx) {
                    Poll::Pending => Poll::Pending,
                    Poll::Ready(Some(Ok(Event::PartData(bytes)))) => Poll::Ready(Some(Ok(bytes))),
                    Poll::Ready(Some(Ok(_))) | Poll::Ready(None) => {
                        *done = true;
                        Poll::Ready(None)
                    }
                    Poll::Ready(Some(Err(err))) => {
                        *done = true;
                        Poll::Ready(Some(Err(err)))
                    }
                }
            }
        }
    }
}

impl Drop for Part<'_> {
    fn drop(&mut self) {
        if let Body::Streaming { ref state, .. } = self.body {
            let mut state = state.lock();
            state.is_prev_part_consumed = true;

            if let Some(waker) = state.next_part_waker.take() {
                waker.wake();
            }
        }
    }
}

impl fmt::Debug for Part<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Part")
            .field("info", &self.info)
            .field("streaming", &self.is_streaming())
            .finish()
    }
}
