//! Byte-level scanning of a multipart stream.
//!
//! [`BoundaryScanner`] walks each incoming chunk once and reports the
//! structure it finds as [`ScanEvent`]s. Spans are borrowed from the chunk
//! being scanned, or from the lookbehind buffer when bytes that looked like a
//! delimiter turn out to be part data.

pub use state::{Flags, Marker, ScanState, ScannerState};

use crate::constants::{self, COLON, CR, HYPHEN, LF, SPACE};
use crate::Error;

mod state;

/// A structural event produced by the [`BoundaryScanner`].
///
/// A single logical header name, header value or body may be reported as
/// several successive fragments when it spans chunk edges. Consumers must
/// concatenate fragments of the same kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanEvent<'a> {
    PartBegin,
    HeaderName(&'a [u8]),
    HeaderValue(&'a [u8]),
    /// The current header line is complete.
    HeaderEnd,
    /// The header block of the current part is complete.
    HeadersEnd,
    PartData(&'a [u8]),
    PartEnd,
    End,
}

/// Receives the events of a [`BoundaryScanner`].
///
/// Returning an error aborts the scan and puts the session into the failed
/// state.
pub trait ScanHandler {
    fn on_event(&mut self, event: ScanEvent<'_>) -> crate::Result<()>;
}

/// The multipart boundary state machine.
///
/// The scanner itself is immutable. All progress is kept in a
/// [`ScannerState`] so that a single scanner can be inspected and tested
/// independently of the session driving it.
#[derive(Debug, Clone)]
pub struct BoundaryScanner {
    boundary: Box<[u8]>,
    boundary_chars: [bool; 256],
}

impl BoundaryScanner {
    /// Creates a scanner for the given delimiter, without the leading `--`.
    pub fn new(boundary: &str) -> crate::Result<BoundaryScanner> {
        if boundary.is_empty() {
            return Err(Error::BadContentType);
        }

        let mut bytes = Vec::with_capacity(constants::CRLF.len() + constants::BOUNDARY_EXT.len() + boundary.len());
        bytes.extend_from_slice(constants::CRLF.as_bytes());
        bytes.extend_from_slice(constants::BOUNDARY_EXT.as_bytes());
        bytes.extend_from_slice(boundary.as_bytes());

        let mut boundary_chars = [false; 256];
        for &b in bytes.iter() {
            boundary_chars[b as usize] = true;
        }

        Ok(BoundaryScanner {
            boundary: bytes.into_boxed_slice(),
            boundary_chars,
        })
    }

    /// The interior delimiter: CRLF, `--` and the boundary.
    pub fn boundary(&self) -> &[u8] {
        &self.boundary
    }

    /// Creates a fresh state sized for this scanner.
    pub fn new_state(&self) -> ScannerState {
        ScannerState::new(self.boundary.len())
    }

    /// Scans one chunk, returning the number of bytes consumed.
    ///
    /// On error the state is moved to [`ScanState::Failed`] and every later
    /// call fails as well.
    pub fn write<H: ScanHandler>(
        &self,
        state: &mut ScannerState,
        chunk: &[u8],
        handler: &mut H,
    ) -> crate::Result<usize> {
        let result = self.scan(state, chunk, handler);
        if result.is_err() {
            state.fail();
        }
        result
    }

    /// Checks that the input ended after the final delimiter.
    pub fn end(&self, state: &ScannerState) -> crate::Result<()> {
        match state.state() {
            ScanState::End => Ok(()),
            _ => Err(Error::parse("unexpected end of multipart message")),
        }
    }

    fn scan<H: ScanHandler>(&self, st: &mut ScannerState, chunk: &[u8], handler: &mut H) -> crate::Result<usize> {
        let boundary = &self.boundary[..];
        let boundary_len = boundary.len();
        let boundary_end = boundary_len - 1;
        let len = chunk.len();

        let mut state = st.state();
        let mut flags = st.flags();
        let mut index = st.index();
        let mut i = 0;

        while i < len {
            let mut c = chunk[i];

            match state {
                ScanState::Initialized => {
                    // The first delimiter may start without the leading CRLF.
                    index = constants::CRLF.len();
                    state = ScanState::Boundary;
                    continue;
                }
                ScanState::Boundary => {
                    if index == boundary_len {
                        if c == HYPHEN {
                            flags.insert(Flags::FINAL_BOUNDARY);
                        } else if c != CR {
                            return Err(Error::parse(format!(
                                "delimiter not followed by `--` or CRLF at offset {}",
                                i
                            )));
                        }
                        index += 1;
                    } else if index == boundary_len + 1 {
                        if flags.contains(Flags::FINAL_BOUNDARY) && c == HYPHEN {
                            index = 0;
                            flags = Flags::empty();
                            handler.on_event(ScanEvent::End)?;
                            state = ScanState::End;
                        } else if !flags.contains(Flags::FINAL_BOUNDARY) && c == LF {
                            index = 0;
                            handler.on_event(ScanEvent::PartBegin)?;
                            state = ScanState::HeaderNameStart;
                        } else {
                            return Err(Error::parse(format!(
                                "delimiter not followed by `--` or CRLF at offset {}",
                                i
                            )));
                        }
                    } else if c == boundary[index] {
                        index += 1;
                    } else if c == boundary[0] {
                        index = 1;
                    } else {
                        index = 0;
                    }
                }
                ScanState::HeaderNameStart => {
                    st.mark(Marker::HeaderName, i);
                    index = 0;
                    state = ScanState::HeaderName;
                    continue;
                }
                ScanState::HeaderName => {
                    if c == CR {
                        if index > 0 {
                            return Err(Error::parse(format!("header name not terminated by `:` at offset {}", i)));
                        }
                        st.clear(Marker::HeaderName);
                        state = ScanState::HeadersEnd;
                    } else if c == COLON {
                        if index == 0 {
                            return Err(Error::parse(format!("empty header name at offset {}", i)));
                        }
                        emit_span(st, Marker::HeaderName, chunk, i, true, handler)?;
                        state = ScanState::HeaderValueStart;
                    } else if c == HYPHEN || c.is_ascii_alphabetic() {
                        index = 1;
                    } else {
                        return Err(Error::parse(format!(
                            "invalid byte {:#04x} in header name at offset {}",
                            c, i
                        )));
                    }
                }
                ScanState::HeaderValueStart => {
                    if c != SPACE {
                        st.mark(Marker::HeaderValue, i);
                        state = ScanState::HeaderValue;
                        continue;
                    }
                }
                ScanState::HeaderValue => {
                    if c == CR {
                        emit_span(st, Marker::HeaderValue, chunk, i, true, handler)?;
                        handler.on_event(ScanEvent::HeaderEnd)?;
                        state = ScanState::HeaderValueEnd;
                    }
                }
                ScanState::HeaderValueEnd => {
                    if c != LF {
                        return Err(Error::parse(format!(
                            "header value not terminated by CRLF at offset {}",
                            i
                        )));
                    }
                    state = ScanState::HeaderNameStart;
                }
                ScanState::HeadersEnd => {
                    if c != LF {
                        return Err(Error::parse(format!(
                            "header block not terminated by CRLF at offset {}",
                            i
                        )));
                    }
                    handler.on_event(ScanEvent::HeadersEnd)?;
                    state = ScanState::PartDataStart;
                }
                ScanState::PartDataStart => {
                    st.mark(Marker::PartData, i);
                    state = ScanState::PartData;
                    continue;
                }
                ScanState::PartData => {
                    let prev_index = index;

                    if index == 0 {
                        // Skip ahead a delimiter length at a time while the
                        // last byte of the window can't belong to a delimiter.
                        i += boundary_end;
                        while i < len && !self.boundary_chars[chunk[i] as usize] {
                            i += boundary_len;
                        }
                        i -= boundary_end;

                        if i >= len {
                            break;
                        }
                        c = chunk[i];
                    }

                    if index < boundary_len {
                        if boundary[index] == c {
                            if index == 0 {
                                emit_span(st, Marker::PartData, chunk, i, true, handler)?;
                            }
                            index += 1;
                        } else {
                            index = 0;
                        }
                    } else if index == boundary_len {
                        index += 1;
                        if c == CR {
                            flags.insert(Flags::PART_BOUNDARY);
                        } else if c == HYPHEN {
                            flags.insert(Flags::FINAL_BOUNDARY);
                        } else {
                            index = 0;
                        }
                    } else if flags.contains(Flags::PART_BOUNDARY) && c == LF {
                        index = 0;
                        flags = Flags::empty();
                        handler.on_event(ScanEvent::PartEnd)?;
                        handler.on_event(ScanEvent::PartBegin)?;
                        state = ScanState::HeaderNameStart;
                        i += 1;
                        continue;
                    } else if flags.contains(Flags::FINAL_BOUNDARY) && c == HYPHEN {
                        index = 0;
                        flags = Flags::empty();
                        handler.on_event(ScanEvent::PartEnd)?;
                        handler.on_event(ScanEvent::End)?;
                        state = ScanState::End;
                        i += 1;
                        continue;
                    } else {
                        index = 0;
                    }

                    if index > 0 {
                        st.remember(index - 1, c);
                    } else if prev_index > 0 {
                        // A false lead: the withheld bytes were part data
                        // after all. The current byte may start a new
                        // candidate, so it is examined again.
                        flags = Flags::empty();
                        handler.on_event(ScanEvent::PartData(st.lookbehind_prefix(prev_index)))?;
                        st.mark(Marker::PartData, i);
                        continue;
                    }
                }
                ScanState::End => break,
                ScanState::Failed => {
                    return Err(Error::parse("scanner already failed"));
                }
            }

            i += 1;
        }

        emit_span(st, Marker::HeaderName, chunk, len, false, handler)?;
        emit_span(st, Marker::HeaderValue, chunk, len, false, handler)?;
        emit_span(st, Marker::PartData, chunk, len, false, handler)?;

        st.save(state, flags, index);

        Ok(len)
    }
}

/// Reports the span from `marker` up to `end`.
///
/// With `clear` the marker is dropped. Otherwise the span is cut at the end
/// of the chunk and the marker restarts at offset 0 of the next one.
fn emit_span<H: ScanHandler>(
    st: &mut ScannerState,
    marker: Marker,
    chunk: &[u8],
    end: usize,
    clear: bool,
    handler: &mut H,
) -> crate::Result<()> {
    let start = if clear { st.clear(marker) } else { st.marker(marker) };

    let start = match start {
        Some(start) => start,
        None => return Ok(()),
    };

    if !clear {
        st.mark(marker, 0);
    }

    if start >= end {
        return Ok(());
    }

    let span = &chunk[start..end];
    let event = match marker {
        Marker::HeaderName => ScanEvent::HeaderName(span),
        Marker::HeaderValue => ScanEvent::HeaderValue(span),
        Marker::PartData => ScanEvent::PartData(span),
    };

    handler.on_event(event)
}
