use crate::constants;

/// The states of the boundary scanning machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    /// Nothing scanned yet.
    Initialized,
    /// Looking for the first delimiter line.
    Boundary,
    HeaderNameStart,
    HeaderName,
    HeaderValueStart,
    HeaderValue,
    /// Expecting the LF closing a header line.
    HeaderValueEnd,
    /// Expecting the LF closing the header block.
    HeadersEnd,
    PartDataStart,
    PartData,
    /// The final delimiter was seen. Any further bytes are epilogue.
    End,
    /// A fatal error was raised. The scanner refuses further input.
    Failed,
}

/// Bit flags recording which kind of delimiter is being matched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Flags(u8);

impl Flags {
    /// The candidate delimiter was followed by CR.
    pub const PART_BOUNDARY: Flags = Flags(0b01);
    /// The candidate delimiter was followed by a hyphen.
    pub const FINAL_BOUNDARY: Flags = Flags(0b10);

    pub const fn empty() -> Flags {
        Flags(0)
    }

    pub fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Flags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Flags) {
        self.0 &= !other.0;
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// Named positions into the chunk currently being scanned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    HeaderName = 0,
    HeaderValue = 1,
    PartData = 2,
}

const MARKER_COUNT: usize = 3;

/// Mutable state of a [`BoundaryScanner`](super::BoundaryScanner) session.
///
/// A single instance lives for the whole decode session and carries
/// everything the scanner needs to resume at the next chunk.
#[derive(Debug, Clone)]
pub struct ScannerState {
    state: ScanState,
    flags: Flags,
    index: usize,
    lookbehind: Box<[u8]>,
    markers: [Option<usize>; MARKER_COUNT],
}

impl ScannerState {
    /// Creates the state for an interior boundary (`CRLF--` plus the
    /// delimiter) of `boundary_len` bytes.
    pub fn new(boundary_len: usize) -> ScannerState {
        ScannerState {
            state: ScanState::Initialized,
            flags: Flags::empty(),
            index: 0,
            lookbehind: vec![0; boundary_len + constants::LOOKBEHIND_PADDING].into_boxed_slice(),
            markers: [None; MARKER_COUNT],
        }
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    pub fn flags(&self) -> Flags {
        self.flags
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// The bytes tentatively matched against the boundary so far.
    pub fn lookbehind(&self) -> &[u8] {
        &self.lookbehind[..self.index.min(self.lookbehind.len())]
    }

    pub fn marker(&self, marker: Marker) -> Option<usize> {
        self.markers[marker as usize]
    }

    pub(crate) fn save(&mut self, state: ScanState, flags: Flags, index: usize) {
        self.state = state;
        self.flags = flags;
        self.index = index;
    }

    pub(crate) fn remember(&mut self, pos: usize, byte: u8) {
        self.lookbehind[pos] = byte;
    }

    pub(crate) fn lookbehind_prefix(&self, len: usize) -> &[u8] {
        &self.lookbehind[..len]
    }

    pub(crate) fn mark(&mut self, marker: Marker, offset: usize) {
        self.markers[marker as usize] = Some(offset);
    }

    pub(crate) fn clear(&mut self, marker: Marker) -> Option<usize> {
        self.markers[marker as usize].take()
    }

    pub(crate) fn fail(&mut self) {
        self.state = ScanState::Failed;
        self.flags = Flags::empty();
        self.index = 0;
        self.markers = [None; MARKER_COUNT];
    }
}
