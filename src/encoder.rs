//! Serialization of parts into the multipart wire format.

use crate::constants;
use crate::headers::Headers;
use crate::helpers;
use bytes::{BufMut, Bytes, BytesMut};
use futures_util::stream::{Stream, TryStreamExt};
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use std::collections::VecDeque;
use std::fmt;
use std::iter;
use std::pin::Pin;
use std::task::{Context, Poll};
#[cfg(feature = "tokio-io")]
use {
    futures_util::stream::StreamExt,
    std::path::Path,
    tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    tokio_util::io::{ReaderStream, StreamReader},
};

type BodyStream<'r> = Pin<Box<dyn Stream<Item = crate::Result<Bytes>> + Send + 'r>>;

enum OutgoingBody<'r> {
    Bytes(Bytes),
    Stream(BodyStream<'r>),
}

/// Describes one part to be written by a [`MultipartEncoder`].
///
/// `field` and `object` parts carry their body in memory, `stream` and
/// `file` parts pull it from a byte source while the message is written.
///
/// # Examples
///
/// ```
/// use partstream::OutgoingPart;
///
/// # fn run() -> partstream::Result<()> {
/// let part = OutgoingPart::field("title", "Hello")?
///     .content_id("title@example.com")
///     .header("X-Trace", "abc");
/// # Ok(())
/// # }
/// # run().unwrap();
/// ```
pub struct OutgoingPart<'r> {
    name: Option<String>,
    file_name: Option<String>,
    content_id: Option<String>,
    content_type: Option<String>,
    transfer_encoding: Option<String>,
    headers: Headers,
    body: OutgoingBody<'r>,
}

impl<'r> OutgoingPart<'r> {
    fn with_body(body: OutgoingBody<'r>) -> OutgoingPart<'r> {
        OutgoingPart {
            name: None,
            file_name: None,
            content_id: None,
            content_type: None,
            transfer_encoding: None,
            headers: Headers::new(),
            body,
        }
    }

    /// A named text value. The name must not be empty.
    pub fn field<N: Into<String>, V: Into<String>>(name: N, value: V) -> crate::Result<OutgoingPart<'r>> {
        let name = name.into();
        if name.is_empty() {
            return Err(crate::Error::InvalidPart {
                reason: "a field part requires a name",
            });
        }

        let value: String = value.into();
        let mut part = OutgoingPart::with_body(OutgoingBody::Bytes(Bytes::from(value)));
        part.name = Some(name);
        Ok(part)
    }

    /// A JSON document, which must be a non-empty object. The content type is
    /// always `application/json; charset=UTF-8`.
    pub fn object(value: serde_json::Value) -> crate::Result<OutgoingPart<'r>> {
        match value {
            serde_json::Value::Object(ref map) if !map.is_empty() => {}
            _ => {
                return Err(crate::Error::InvalidPart {
                    reason: "an object part requires a non-empty JSON object",
                })
            }
        }

        let mut part = OutgoingPart::with_body(OutgoingBody::Bytes(Bytes::from(value.to_string())));
        part.content_type = Some(constants::JSON_CONTENT_TYPE.to_owned());
        Ok(part)
    }

    /// A body pulled from `source` while the message is written.
    ///
    /// The source is only polled when the consumer of the encoder asks for
    /// more output. Its errors end the message with
    /// [`Error::Unexpected`](crate::Error::Unexpected).
    pub fn stream<S, O, E, C>(source: S, content_type: C) -> crate::Result<OutgoingPart<'r>>
    where
        S: Stream<Item = Result<O, E>> + Send + 'r,
        O: Into<Bytes> + 'r,
        E: Into<Box<dyn std::error::Error + Send + Sync>> + 'r,
        C: Into<String>,
    {
        let content_type = content_type.into();
        if content_type.is_empty() {
            return Err(crate::Error::InvalidPart {
                reason: "a stream part requires a content type",
            });
        }

        let source = source
            .map_ok(|b| b.into())
            .map_err(|err| crate::Error::Unexpected(err.into()));

        let mut part = OutgoingPart::with_body(OutgoingBody::Stream(Box::pin(source)));
        part.content_type = Some(content_type);
        Ok(part)
    }

    /// A part read from the file at `path`.
    ///
    /// The file name defaults to the base name of the path and the content
    /// type to `application/octet-stream`.
    ///
    /// # Optional
    ///
    /// This requires the optional `tokio-io` feature to be enabled.
    #[cfg(feature = "tokio-io")]
    #[cfg_attr(nightly, doc(cfg(feature = "tokio-io")))]
    pub async fn file<P: AsRef<Path>>(path: P) -> crate::Result<OutgoingPart<'static>> {
        let path = path.as_ref();
        let file_name = match path.file_name() {
            Some(file_name) => file_name.to_string_lossy().into_owned(),
            None => {
                return Err(crate::Error::InvalidPart {
                    reason: "a file part requires a path to a file",
                })
            }
        };

        let file = tokio::fs::File::open(path)
            .await
            .map_err(|err| crate::Error::Unexpected(err.into()))?;

        let mut part = OutgoingPart::stream(ReaderStream::new(file), "application/octet-stream")?;
        part.file_name = Some(file_name);
        Ok(part)
    }

    /// Sets the `name` parameter of the `Content-Disposition` header.
    ///
    /// A `"` is written as `%22`, CR as `%0D` and LF as `%0A`. Decoders only
    /// undo the `%22` escape in `filename`, so [`Part::name`](crate::Part::name)
    /// returns a quoted name in its escaped form.
    pub fn name<N: Into<String>>(mut self, name: N) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the `filename` parameter of the `Content-Disposition` header,
    /// escaped like [`name`](OutgoingPart::name).
    pub fn file_name<N: Into<String>>(mut self, file_name: N) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    /// Sets the `Content-ID` header. Angle brackets are added when missing.
    pub fn content_id<I: Into<String>>(mut self, content_id: I) -> Self {
        self.content_id = Some(content_id.into());
        self
    }

    pub fn content_type<C: Into<String>>(mut self, content_type: C) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Sets the `Content-Transfer-Encoding` header.
    ///
    /// The body is still written as is, so it must already be in that
    /// encoding.
    pub fn transfer_encoding<T: Into<String>>(mut self, transfer_encoding: T) -> Self {
        self.transfer_encoding = Some(transfer_encoding.into());
        self
    }

    /// Adds a header, replacing a generated header of the same name.
    pub fn header<N: Into<String>, V: Into<String>>(mut self, name: N, value: V) -> Self {
        self.headers.insert(name, value);
        self
    }

    fn validate(&self) -> crate::Result<()> {
        for (name, value) in self.headers.iter() {
            if name.is_empty() || !name.bytes().all(|b| b == constants::HYPHEN || b.is_ascii_alphabetic()) {
                return Err(crate::Error::InvalidPart {
                    reason: "header names may only contain ASCII letters and hyphens",
                });
            }
            if value.bytes().any(|b| b == constants::CR || b == constants::LF) {
                return Err(crate::Error::InvalidPart {
                    reason: "header values must not contain line breaks",
                });
            }
        }

        Ok(())
    }

    fn header_lines(&self) -> Vec<(String, String)> {
        let mut disposition = String::from("form-data");
        if let Some(ref name) = self.name {
            disposition.push_str(&format!("; name=\"{}\"", escape_quoted(name)));
        }
        if let Some(ref file_name) = self.file_name {
            disposition.push_str(&format!("; filename=\"{}\"", escape_quoted(file_name)));
        }

        let mut lines = vec![("Content-Disposition".to_owned(), disposition)];

        if let Some(ref content_id) = self.content_id {
            lines.push((
                "Content-ID".to_owned(),
                format!("<{}>", helpers::unwrap_content_id(content_id)),
            ));
        }
        if let Some(ref content_type) = self.content_type {
            lines.push(("Content-Type".to_owned(), content_type.clone()));
        }
        if let Some(ref transfer_encoding) = self.transfer_encoding {
            lines.push(("Content-Transfer-Encoding".to_owned(), transfer_encoding.clone()));
        }

        for (name, value) in self.headers.iter() {
            match lines.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(name)) {
                Some(line) => line.1 = value.to_owned(),
                None => lines.push((name.to_owned(), value.to_owned())),
            }
        }

        lines
    }

    fn head(&self, boundary: &str) -> Bytes {
        let mut head = BytesMut::new();

        head.put_slice(constants::BOUNDARY_EXT.as_bytes());
        head.put_slice(boundary.as_bytes());
        head.put_slice(constants::CRLF.as_bytes());

        for (name, value) in self.header_lines() {
            head.put_slice(name.as_bytes());
            head.put_slice(b": ");
            head.put_slice(value.as_bytes());
            head.put_slice(constants::CRLF.as_bytes());
        }

        head.put_slice(constants::CRLF.as_bytes());
        head.freeze()
    }
}

impl fmt::Debug for OutgoingPart<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutgoingPart")
            .field("name", &self.name)
            .field("file_name", &self.file_name)
            .field("content_id", &self.content_id)
            .field("content_type", &self.content_type)
            .field("transfer_encoding", &self.transfer_encoding)
            .field("headers", &self.headers)
            .finish()
    }
}

fn escape_quoted(value: &str) -> String {
    value
        .replace('"', "%22")
        .replace('\r', "%0D")
        .replace('\n', "%0A")
}

fn generate_boundary() -> String {
    iter::repeat(())
        .map(|()| thread_rng().sample(Alphanumeric))
        .map(char::from)
        .take(constants::GENERATED_BOUNDARY_LEN)
        .collect()
}

enum EncodeStage<'r> {
    NextPart,
    Body(OutgoingBody<'r>),
    PartEnd,
    Done,
}

/// Writes parts in the multipart format.
///
/// Parts are written strictly in the order they were added, one after the
/// other. The output is produced through the [`Stream`] implementation, so a
/// stream part's source is only polled when the consumer is ready for more
/// bytes.
///
/// # Examples
///
/// ```
/// use partstream::{MultipartEncoder, OutgoingPart};
/// use futures_util::stream::TryStreamExt;
///
/// # async fn run() -> partstream::Result<()> {
/// let mut encoder = MultipartEncoder::with_boundary("X-BOUNDARY")?;
/// encoder.add_field("name", "value")?;
/// encoder.add(OutgoingPart::object(serde_json::json!({"foo": "bar"}))?.name("meta"))?;
///
/// let content_type = encoder.content_type();
/// let body: Vec<bytes::Bytes> = encoder.try_collect().await?;
/// # let _ = content_type;
/// # Ok(())
/// # }
/// # tokio::runtime::Runtime::new().unwrap().block_on(run()).unwrap();
/// ```
pub struct MultipartEncoder<'r> {
    boundary: String,
    parts: VecDeque<OutgoingPart<'r>>,
    stage: EncodeStage<'r>,
}

impl<'r> MultipartEncoder<'r> {
    /// Creates an encoder with a random 16 character alphanumeric boundary.
    pub fn new() -> MultipartEncoder<'r> {
        MultipartEncoder {
            boundary: generate_boundary(),
            parts: VecDeque::new(),
            stage: EncodeStage::NextPart,
        }
    }

    /// Creates an encoder with the given boundary.
    ///
    /// Fails with [`Error::BadContentType`](crate::Error::BadContentType) if
    /// the boundary is empty or contains a line break.
    pub fn with_boundary<B: Into<String>>(boundary: B) -> crate::Result<MultipartEncoder<'r>> {
        let boundary = boundary.into();
        if boundary.is_empty() || boundary.bytes().any(|b| b == constants::CR || b == constants::LF) {
            return Err(crate::Error::BadContentType);
        }

        Ok(MultipartEncoder {
            boundary,
            parts: VecDeque::new(),
            stage: EncodeStage::NextPart,
        })
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// The `Content-Type` value announcing this message.
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    /// Appends a part to the message.
    pub fn add(&mut self, part: OutgoingPart<'r>) -> crate::Result<()> {
        part.validate()?;
        self.parts.push_back(part);
        Ok(())
    }

    pub fn add_field<N: Into<String>, V: Into<String>>(&mut self, name: N, value: V) -> crate::Result<()> {
        self.add(OutgoingPart::field(name, value)?)
    }

    pub fn add_object(&mut self, value: serde_json::Value) -> crate::Result<()> {
        self.add(OutgoingPart::object(value)?)
    }

    pub fn add_stream<S, O, E, C>(&mut self, source: S, content_type: C) -> crate::Result<()>
    where
        S: Stream<Item = Result<O, E>> + Send + 'r,
        O: Into<Bytes> + 'r,
        E: Into<Box<dyn std::error::Error + Send + Sync>> + 'r,
        C: Into<String>,
    {
        self.add(OutgoingPart::stream(source, content_type)?)
    }

    /// Opens the file at `path` and appends it as a part.
    ///
    /// # Optional
    ///
    /// This requires the optional `tokio-io` feature to be enabled.
    #[cfg(feature = "tokio-io")]
    #[cfg_attr(nightly, doc(cfg(feature = "tokio-io")))]
    pub async fn add_file<P: AsRef<Path>>(&mut self, path: P) -> crate::Result<()> {
        let part = OutgoingPart::file(path).await?;
        self.add(part)
    }

    /// Writes the whole message to `writer` and flushes it, returning the
    /// number of bytes written.
    ///
    /// # Optional
    ///
    /// This requires the optional `tokio-io` feature to be enabled.
    #[cfg(feature = "tokio-io")]
    #[cfg_attr(nightly, doc(cfg(feature = "tokio-io")))]
    pub async fn write_to<W>(mut self, writer: &mut W) -> crate::Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let mut written = 0;

        while let Some(chunk) = self.next().await {
            let chunk = chunk?;
            writer
                .write_all(&chunk)
                .await
                .map_err(|err| crate::Error::Unexpected(err.into()))?;
            written += chunk.len() as u64;
        }

        writer
            .flush()
            .await
            .map_err(|err| crate::Error::Unexpected(err.into()))?;

        Ok(written)
    }

    /// Exposes the message as an [`AsyncRead`].
    ///
    /// # Optional
    ///
    /// This requires the optional `tokio-io` feature to be enabled.
    #[cfg(feature = "tokio-io")]
    #[cfg_attr(nightly, doc(cfg(feature = "tokio-io")))]
    pub fn into_reader(self) -> impl AsyncRead + Send + Unpin + 'r {
        StreamReader::new(self.map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err)))
    }

    fn closing_delimiter(&self) -> Bytes {
        let mut tail = BytesMut::with_capacity(self.boundary.len() + 6);
        tail.put_slice(constants::BOUNDARY_EXT.as_bytes());
        tail.put_slice(self.boundary.as_bytes());
        tail.put_slice(constants::BOUNDARY_EXT.as_bytes());
        tail.put_slice(constants::CRLF.as_bytes());
        tail.freeze()
    }
}

impl Default for MultipartEncoder<'_> {
    fn default() -> Self {
        MultipartEncoder::new()
    }
}

impl Stream for MultipartEncoder<'_> {
    type Item = crate::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            match this.stage {
                EncodeStage::NextPart => match this.parts.pop_front() {
                    Some(part) => {
                        trace!("writing part {:?}", part.name);
                        let head = part.head(&this.boundary);
                        this.stage = EncodeStage::Body(part.body);
                        return Poll::Ready(Some(Ok(head)));
                    }
                    None => {
                        this.stage = EncodeStage::Done;
                        return Poll::Ready(Some(Ok(this.closing_delimiter())));
                    }
                },
                EncodeStage::Body(OutgoingBody::Bytes(ref mut bytes)) => {
                    let bytes = std::mem::take(bytes);
                    this.stage = EncodeStage::PartEnd;
                    if !bytes.is_empty() {
                        return Poll::Ready(Some(Ok(bytes)));
                    }
                }
                EncodeStage::Body(OutgoingBody::Stream(ref mut source)) => match source.as_mut().poll_next(cx) {
                    Poll::Pending => return Poll::Pending,
                    Poll::Ready(Some(Ok(chunk))) => {
                        if !chunk.is_empty() {
                            return Poll::Ready(Some(Ok(chunk)));
                        }
                    }
                    Poll::Ready(Some(Err(err))) => {
                        debug!("part source failed: {}", err);
                        this.stage = EncodeStage::Done;
                        this.parts.clear();
                        return Poll::Ready(Some(Err(err)));
                    }
                    Poll::Ready(None) => this.stage = EncodeStage::PartEnd,
                },
                EncodeStage::PartEnd => {
                    this.stage = EncodeStage::NextPart;
                    return Poll::Ready(Some(Ok(Bytes::from_static(constants::CRLF.as_bytes()))));
                }
                EncodeStage::Done => return Poll::Ready(None),
            }
        }
    }
}

impl fmt::Debug for MultipartEncoder<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultipartEncoder")
            .field("boundary", &self.boundary)
            .field("parts", &self.parts)
            .finish()
    }
}
