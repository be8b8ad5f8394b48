pub(crate) const DEFAULT_MAX_PARTS: usize = 10;
pub(crate) const DEFAULT_PER_PART_SIZE_LIMIT: u64 = 10 * 1024 * 1024;
pub(crate) const DEFAULT_WHOLE_STREAM_SIZE_LIMIT: u64 = 100 * 1024 * 1024;

pub(crate) const DEFAULT_TRANSFER_ENCODING: &str = "binary";
pub(crate) const JSON_CONTENT_TYPE: &str = "application/json; charset=UTF-8";

pub(crate) const BOUNDARY_EXT: &str = "--";
pub(crate) const CRLF: &str = "\r\n";

pub(crate) const CR: u8 = b'\r';
pub(crate) const LF: u8 = b'\n';
pub(crate) const HYPHEN: u8 = b'-';
pub(crate) const COLON: u8 = b':';
pub(crate) const SPACE: u8 = b' ';

/// Extra room in the lookbehind buffer past the interior boundary, which
/// holds the CR or hyphen that follows a candidate delimiter.
pub(crate) const LOOKBEHIND_PADDING: usize = 8;

pub(crate) const GENERATED_BOUNDARY_LEN: usize = 16;
