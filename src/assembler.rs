//! Sans-IO assembly of parts from raw multipart bytes.

use crate::constraints::{Constraints, Dispatch};
use crate::content_disposition::ContentDisposition;
use crate::helpers;
use crate::part::{PartInfo, PartKind, Value};
use crate::scanner::{BoundaryScanner, ScanEvent, ScanHandler, ScannerState};
use crate::transfer_encoding::TransferDecoder;
use crate::Error;
use bytes::{Bytes, BytesMut};
use encoding_rs::UTF_8;
use std::collections::VecDeque;

/// A high-level decoding event.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A streamed part has started. Its body follows as [`Event::PartData`]
    /// events closed by [`Event::PartEnd`].
    PartStart(PartInfo),
    /// A decoded fragment of the body of the current streamed part.
    PartData(Bytes),
    /// The current streamed part is complete.
    PartEnd,
    /// A buffered part, complete with its decoded value.
    Part(PartInfo, Value),
    /// The final delimiter was reached.
    Finish,
}

/// Turns chunks of a multipart stream into [`Event`]s.
///
/// The assembler owns no I/O. Feed it with [`write`](PartAssembler::write),
/// call [`end`](PartAssembler::end) once the input is exhausted and drain the
/// produced events with [`next_event`](PartAssembler::next_event).
///
/// The first error closes the session: queued events are dropped, and later
/// calls to `write` and `end` discard their input and return `Ok(())`.
///
/// # Examples
///
/// ```
/// use partstream::{Constraints, Event, PartAssembler};
///
/// # fn run() -> partstream::Result<()> {
/// let mut assembler = PartAssembler::new("X-BOUNDARY", Constraints::new())?;
/// assembler.write(b"--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\n")?;
/// assembler.write(b"42\r\n--X-BOUNDARY--\r\n")?;
/// assembler.end()?;
///
/// while let Some(event) = assembler.next_event() {
///     if let Event::Part(info, value) = event {
///         println!("{:?} = {:?}", info.name(), value);
///     }
/// }
/// # Ok(())
/// # }
/// # run().unwrap();
/// ```
#[derive(Debug)]
pub struct PartAssembler {
    scanner: BoundaryScanner,
    state: ScannerState,
    builder: PartBuilder,
}

impl PartAssembler {
    /// Creates a session for the given boundary, without the leading `--`.
    ///
    /// An empty boundary fails with [`Error::BadContentType`].
    pub fn new<B: AsRef<str>>(boundary: B, constraints: Constraints) -> crate::Result<PartAssembler> {
        let scanner = BoundaryScanner::new(boundary.as_ref())?;
        let state = scanner.new_state();

        Ok(PartAssembler {
            scanner,
            state,
            builder: PartBuilder::new(constraints),
        })
    }

    /// Processes one chunk of input.
    pub fn write(&mut self, chunk: &[u8]) -> crate::Result<()> {
        if self.builder.closed {
            return Ok(());
        }

        match self.scanner.write(&mut self.state, chunk, &mut self.builder) {
            Ok(_) => Ok(()),
            Err(err) => {
                debug!("multipart session failed: {}", err);
                self.builder.close();
                Err(err)
            }
        }
    }

    /// Signals the end of the input.
    ///
    /// Fails if the final delimiter has not been seen.
    pub fn end(&mut self) -> crate::Result<()> {
        if self.builder.closed || self.builder.finished {
            return Ok(());
        }

        match self.scanner.end(&self.state) {
            Ok(()) => Ok(()),
            Err(err) => {
                debug!("multipart session failed: {}", err);
                self.builder.close();
                Err(err)
            }
        }
    }

    /// Pops the oldest pending event.
    pub fn next_event(&mut self) -> Option<Event> {
        self.builder.events.pop_front()
    }

    /// Whether the session was terminated by an error.
    pub fn is_closed(&self) -> bool {
        self.builder.closed
    }

    /// Whether the final delimiter was reached.
    pub fn is_finished(&self) -> bool {
        self.builder.finished
    }

    pub fn scanner_state(&self) -> &ScannerState {
        &self.state
    }
}

#[derive(Debug)]
struct PartInProgress {
    info: PartInfo,
    delivery: Dispatch,
    size: u64,
    size_limit: u64,
    decoder: TransferDecoder,
    buffer: BytesMut,
}

impl PartInProgress {
    fn deliver(&mut self, data: Bytes, events: &mut VecDeque<Event>) {
        if data.is_empty() {
            return;
        }

        match self.delivery {
            Dispatch::Stream => events.push_back(Event::PartData(data)),
            Dispatch::Buffer => self.buffer.extend_from_slice(&data),
        }
    }
}

#[derive(Debug)]
struct PartBuilder {
    constraints: Constraints,
    parts: usize,
    total_size: u64,
    header_name: Vec<u8>,
    header_value: Vec<u8>,
    current: Option<PartInProgress>,
    events: VecDeque<Event>,
    finished: bool,
    closed: bool,
}

impl PartBuilder {
    fn new(constraints: Constraints) -> PartBuilder {
        PartBuilder {
            constraints,
            parts: 0,
            total_size: 0,
            header_name: Vec::new(),
            header_value: Vec::new(),
            current: None,
            events: VecDeque::new(),
            finished: false,
            closed: false,
        }
    }

    fn close(&mut self) {
        self.closed = true;
        self.current = None;
        self.events.clear();
    }

    fn begin_part(&mut self) -> crate::Result<()> {
        let limit = self.constraints.max_parts;
        if self.parts + 1 >= limit {
            debug!("part {} rejected, limit is {}", self.parts, limit);
            return Err(Error::TooManyParts { limit });
        }

        self.header_name.clear();
        self.header_value.clear();
        self.current = Some(PartInProgress {
            info: PartInfo::new(self.parts),
            delivery: Dispatch::Stream,
            size: 0,
            size_limit: self.constraints.size_limit.per_part,
            decoder: TransferDecoder::Identity,
            buffer: BytesMut::new(),
        });

        Ok(())
    }

    fn commit_header(&mut self) -> crate::Result<()> {
        let part = current_part(&mut self.current)?;

        let (name, _) = UTF_8.decode_without_bom_handling(&self.header_name);
        let (value, _) = UTF_8.decode_without_bom_handling(&self.header_value);
        let (name, value) = (name.into_owned(), value.into_owned());

        self.header_name.clear();
        self.header_value.clear();

        let info = &mut part.info;
        match name.to_ascii_lowercase().as_str() {
            "content-disposition" => {
                let cd = ContentDisposition::parse(&value);
                info.name = cd.name;
                info.file_name = cd.file_name;
            }
            "content-id" => info.content_id = Some(helpers::unwrap_content_id(&value)),
            "content-type" => info.content_type = Some(value.to_ascii_lowercase()),
            "content-transfer-encoding" => info.transfer_encoding = value.trim().to_ascii_lowercase(),
            _ => {}
        }

        info.headers.insert(name, value);

        Ok(())
    }

    fn start_body(&mut self) -> crate::Result<()> {
        let part = current_part(&mut self.current)?;
        let info = &mut part.info;

        info.kind = PartKind::infer(info.content_type(), info.name(), info.file_name());

        part.size_limit = self.constraints.size_limit.extract_size_limit_for(part.info.name());
        part.decoder = TransferDecoder::for_encoding(part.info.transfer_encoding());
        part.delivery = self.constraints.dispatch_for(&part.info);
        self.parts += 1;

        trace!(
            "part {} started: kind {:?}, name {:?}, dispatch {:?}",
            part.info.index(),
            part.info.kind(),
            part.info.name(),
            part.delivery
        );

        if part.delivery == Dispatch::Stream {
            self.events.push_back(Event::PartStart(part.info.clone()));
        }

        Ok(())
    }

    fn part_data(&mut self, data: &[u8]) -> crate::Result<()> {
        let part = current_part(&mut self.current)?;
        let len = data.len() as u64;

        part.size += len;
        if part.size > part.size_limit {
            debug!("part {:?} exceeded the size limit of {} bytes", part.info.name(), part.size_limit);
            return Err(Error::PartTooLarge {
                limit: part.size_limit,
                part_name: part.info.name.clone(),
            });
        }

        self.total_size += len;
        let whole_stream = self.constraints.size_limit.whole_stream;
        if self.total_size > whole_stream {
            debug!("message exceeded the size limit of {} bytes", whole_stream);
            return Err(Error::MessageTooLarge { limit: whole_stream });
        }

        let decoded = part.decoder.decode(data)?;
        part.deliver(decoded, &mut self.events);

        Ok(())
    }

    fn end_part(&mut self) -> crate::Result<()> {
        let mut part = match self.current.take() {
            Some(part) => part,
            None => return Err(Error::parse("part ended before it started")),
        };

        let tail = part.decoder.finish()?;
        part.deliver(tail, &mut self.events);

        trace!("part {} ended after {} bytes", part.info.index(), part.size);

        match part.delivery {
            Dispatch::Stream => self.events.push_back(Event::PartEnd),
            Dispatch::Buffer => {
                let value = Value::decode(&part.info, part.buffer.freeze());
                self.events.push_back(Event::Part(part.info, value));
            }
        }

        Ok(())
    }
}

fn current_part(current: &mut Option<PartInProgress>) -> crate::Result<&mut PartInProgress> {
    current
        .as_mut()
        .ok_or_else(|| Error::parse("part content outside of a part"))
}

impl ScanHandler for PartBuilder {
    fn on_event(&mut self, event: ScanEvent<'_>) -> crate::Result<()> {
        match event {
            ScanEvent::PartBegin => self.begin_part(),
            ScanEvent::HeaderName(bytes) => {
                self.header_name.extend_from_slice(bytes);
                Ok(())
            }
            ScanEvent::HeaderValue(bytes) => {
                self.header_value.extend_from_slice(bytes);
                Ok(())
            }
            ScanEvent::HeaderEnd => self.commit_header(),
            ScanEvent::HeadersEnd => self.start_body(),
            ScanEvent::PartData(bytes) => self.part_data(bytes),
            ScanEvent::PartEnd => self.end_part(),
            ScanEvent::End => {
                trace!("multipart session finished after {} parts", self.parts);
                self.finished = true;
                self.events.push_back(Event::Finish);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SizeLimit;

    const BOUNDARY: &str = "X-BOUNDARY";

    fn part(headers: &str, body: &str) -> String {
        format!("--{}\r\n{}\r\n\r\n{}\r\n", BOUNDARY, headers, body)
    }

    fn message(parts: &[String]) -> String {
        format!("{}--{}--\r\n", parts.concat(), BOUNDARY)
    }

    fn drain(assembler: &mut PartAssembler) -> Vec<Event> {
        std::iter::from_fn(|| assembler.next_event()).collect()
    }

    fn decode(data: &[u8], constraints: Constraints) -> crate::Result<Vec<Event>> {
        let mut assembler = PartAssembler::new(BOUNDARY, constraints)?;
        assembler.write(data)?;
        assembler.end()?;
        Ok(drain(&mut assembler))
    }

    /// Merges consecutive data fragments so results don't depend on chunking.
    fn merge_data(events: Vec<Event>) -> Vec<Event> {
        let mut out: Vec<Event> = Vec::new();
        for event in events {
            if let (Some(Event::PartData(acc)), Event::PartData(more)) = (out.last_mut(), &event) {
                let mut joined = BytesMut::from(&acc[..]);
                joined.extend_from_slice(more);
                *acc = joined.freeze();
                continue;
            }
            out.push(event);
        }
        out
    }

    fn fixture() -> String {
        message(&[
            part(
                "Content-Disposition: form-data; name=\"upload\"; filename=\"hello.txt\"\r\nContent-Type: text/plain",
                "hello\r\nworld",
            ),
            part(
                "Content-Disposition: form-data; name=\"ofLifeTheUniverseAndEverything\"",
                "42",
            ),
            part(
                "Content-Disposition: form-data; name=\"object\"\r\nContent-Type: application/json",
                r#"{"foo":"bar"}"#,
            ),
        ])
    }

    #[test]
    fn test_three_parts() {
        let events = merge_data(decode(fixture().as_bytes(), Constraints::new()).unwrap());
        assert_eq!(events.len(), 6);

        match &events[0] {
            Event::PartStart(info) => {
                assert_eq!(info.index(), 0);
                assert_eq!(info.kind(), PartKind::Stream);
                assert_eq!(info.name(), Some("upload"));
                assert_eq!(info.file_name(), Some("hello.txt"));
                assert_eq!(info.content_type(), Some("text/plain"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(events[1], Event::PartData(Bytes::from_static(b"hello\r\nworld")));
        assert_eq!(events[2], Event::PartEnd);

        match &events[3] {
            Event::Part(info, value) => {
                assert_eq!(info.index(), 1);
                assert_eq!(info.kind(), PartKind::Field);
                assert_eq!(info.name(), Some("ofLifeTheUniverseAndEverything"));
                assert_eq!(value, &Value::Text("42".to_owned()));
            }
            other => panic!("unexpected event: {:?}", other),
        }

        match &events[4] {
            Event::Part(info, value) => {
                assert_eq!(info.kind(), PartKind::Object);
                assert_eq!(info.content_type(), Some("application/json"));
                assert_eq!(value, &Value::Json(serde_json::json!({"foo": "bar"})));
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(events[5], Event::Finish);
    }

    #[test]
    fn test_chunking_invariance() {
        let data = fixture();
        let data = data.as_bytes();
        let expected = merge_data(decode(data, Constraints::new()).unwrap());

        for split in 0..=data.len() {
            let mut assembler = PartAssembler::new(BOUNDARY, Constraints::new()).unwrap();
            assembler.write(&data[..split]).unwrap();
            assembler.write(&data[split..]).unwrap();
            assembler.end().unwrap();

            assert_eq!(merge_data(drain(&mut assembler)), expected, "split at {}", split);
        }
    }

    #[test]
    fn test_max_parts_threshold() {
        let parts: Vec<String> = (0..2)
            .map(|idx| part(&format!("Content-Disposition: form-data; name=\"f{}\"", idx), "v"))
            .collect();

        let events = decode(message(&parts).as_bytes(), Constraints::new().max_parts(3)).unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events.last(), Some(&Event::Finish));

        let parts: Vec<String> = (0..3)
            .map(|idx| part(&format!("Content-Disposition: form-data; name=\"f{}\"", idx), "v"))
            .collect();

        let err = decode(message(&parts).as_bytes(), Constraints::new().max_parts(3)).unwrap_err();
        assert_eq!(err, Error::TooManyParts { limit: 3 });
    }

    #[test]
    fn test_part_too_large_during_data() {
        let constraints = Constraints::new().size_limit(SizeLimit::new().per_part(2));
        let mut assembler = PartAssembler::new(BOUNDARY, constraints).unwrap();

        assembler
            .write(b"--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"small\"\r\n\r\n")
            .unwrap();

        let err = assembler.write(b"abc").unwrap_err();
        assert_eq!(
            err,
            Error::PartTooLarge {
                limit: 2,
                part_name: Some("small".to_owned())
            }
        );
        assert!(assembler.is_closed());
    }

    #[test]
    fn test_size_limit_for_part() {
        let constraints = Constraints::new().size_limit(SizeLimit::new().per_part(2).for_part("big", 10));
        let data = message(&[part("Content-Disposition: form-data; name=\"big\"", "abcdef")]);

        let events = decode(data.as_bytes(), constraints).unwrap();
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn test_message_too_large() {
        let constraints = Constraints::new().size_limit(SizeLimit::new().whole_stream(4));
        let data = message(&[
            part("Content-Disposition: form-data; name=\"a\"", "abc"),
            part("Content-Disposition: form-data; name=\"b\"", "def"),
        ]);

        assert_eq!(
            decode(data.as_bytes(), constraints).unwrap_err(),
            Error::MessageTooLarge { limit: 4 }
        );
    }

    #[test]
    fn test_input_discarded_after_error() {
        let constraints = Constraints::new().size_limit(SizeLimit::new().per_part(2));
        let data = fixture();
        let mut assembler = PartAssembler::new(BOUNDARY, constraints).unwrap();

        assert!(assembler.write(data.as_bytes()).is_err());
        assert!(assembler.is_closed());
        assert!(assembler.next_event().is_none());

        assert_eq!(assembler.write(data.as_bytes()), Ok(()));
        assert_eq!(assembler.end(), Ok(()));
        assert!(assembler.next_event().is_none());
        assert!(!assembler.is_finished());
    }

    #[test]
    fn test_truncated_input() {
        let mut assembler = PartAssembler::new(BOUNDARY, Constraints::new()).unwrap();
        assembler.write(b"--X-BOUNDARY").unwrap();

        assert_eq!(
            assembler.end(),
            Err(Error::parse("unexpected end of multipart message"))
        );
        assert!(assembler.is_closed());
        assert!(drain(&mut assembler).iter().all(|event| *event != Event::Finish));
    }

    #[test]
    fn test_base64_part() {
        let data = message(&[part(
            "Content-Disposition: form-data; name=\"answer\"\r\nContent-Transfer-Encoding: BASE64",
            "NDI=",
        )]);

        let events = decode(data.as_bytes(), Constraints::new()).unwrap();
        match &events[0] {
            Event::Part(info, value) => {
                assert_eq!(info.transfer_encoding(), "base64");
                assert_eq!(value.as_text(), Some("42"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_unsupported_encoding() {
        let data = message(&[part(
            "Content-Disposition: form-data; name=\"q\"\r\nContent-Transfer-Encoding: quoted-printable",
            "a=3Db",
        )]);

        assert_eq!(
            decode(data.as_bytes(), Constraints::new()).unwrap_err(),
            Error::UnsupportedEncoding {
                encoding: "quoted-printable".to_owned()
            }
        );
    }

    #[test]
    fn test_invalid_json_object() {
        let data = message(&[part(
            "Content-Disposition: form-data; name=\"obj\"\r\nContent-Type: application/json",
            "{not json",
        )]);

        let events = decode(data.as_bytes(), Constraints::new()).unwrap();
        match &events[0] {
            Event::Part(_, value) => assert_eq!(value, &Value::Json(serde_json::json!({}))),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_dispatch_override() {
        let buffer_all = Constraints::new().dispatch(|_| Dispatch::Buffer);
        let events = decode(fixture().as_bytes(), buffer_all).unwrap();

        assert_eq!(events.len(), 4);
        match &events[0] {
            Event::Part(info, value) => {
                assert_eq!(info.kind(), PartKind::Stream);
                assert_eq!(value, &Value::Binary(Bytes::from_static(b"hello\r\nworld")));
            }
            other => panic!("unexpected event: {:?}", other),
        }

        let stream_all = Constraints::new().dispatch(|_| Dispatch::Stream);
        let events = merge_data(decode(fixture().as_bytes(), stream_all).unwrap());

        assert_eq!(events.len(), 10);
        assert_eq!(events[4], Event::PartData(Bytes::from_static(b"42")));
    }

    #[test]
    fn test_headers() {
        let data = message(&[part(
            "Content-Disposition: form-data; name=\"doc\"; filename=\"a.bin\"\r\n\
             Content-ID: <doc@example.com>\r\n\
             X-Custom: 1\r\n\
             x-custom: 2\r\n\
             X-Empty:",
            "",
        )]);

        let events = decode(data.as_bytes(), Constraints::new()).unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[1], Event::PartEnd);
        assert_eq!(events[2], Event::Finish);

        let info = match &events[0] {
            Event::PartStart(info) => info,
            other => panic!("unexpected event: {:?}", other),
        };

        assert_eq!(info.content_id(), Some("doc@example.com"));
        assert_eq!(info.headers().len(), 5);
        assert_eq!(info.headers().get("X-CUSTOM"), Some("2"));
        assert_eq!(info.headers().get("X-Empty"), Some(""));
        assert_eq!(info.headers().get("Content-ID"), Some("<doc@example.com>"));
    }

    #[test]
    fn test_empty_boundary() {
        assert_eq!(
            PartAssembler::new("", Constraints::new()).unwrap_err(),
            Error::BadContentType
        );
    }
}
