use std::fmt::{self, Debug, Display, Formatter};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A set of errors that can occur while decoding or encoding a multipart
/// stream.
///
/// Every error raised while streaming is terminal for its session: the
/// decoder stops producing parts and the encoder stops producing bytes.
#[non_exhaustive]
pub enum Error {
    /// No boundary could be derived from the configured boundary or
    /// `Content-Type` value.
    BadContentType,

    /// The input is not a well-formed multipart byte sequence.
    Parse { reason: String },

    /// A part declared a `Content-Transfer-Encoding` this crate can't decode.
    UnsupportedEncoding { encoding: String },

    /// The stream carries more parts than allowed by
    /// [`Constraints::max_parts`](crate::Constraints::max_parts).
    TooManyParts { limit: usize },

    /// A part body exceeded its size limit.
    PartTooLarge { limit: u64, part_name: Option<String> },

    /// The cumulative size of all part bodies exceeded the limit.
    MessageTooLarge { limit: u64 },

    /// A lower-level failure, such as an I/O error from a part source while
    /// encoding or from the upstream while decoding.
    Unexpected(BoxError),

    /// An outgoing part was described with invalid or missing arguments.
    InvalidPart { reason: &'static str },

    /// Failed to decode the part data as `JSON` in
    /// [`part.json()`](crate::Part::json) method.
    #[cfg(feature = "json")]
    #[cfg_attr(nightly, doc(cfg(feature = "json")))]
    DecodeJson(serde_json::Error),
}

impl Error {
    pub(crate) fn parse<R: Into<String>>(reason: R) -> Error {
        Error::Parse { reason: reason.into() }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Error::BadContentType => write!(f, "multipart boundary not found in Content-Type"),
            Error::Parse { reason } => write!(f, "failed to parse multipart stream: {}", reason),
            Error::UnsupportedEncoding { encoding } => {
                write!(f, "unsupported Content-Transfer-Encoding: {:?}", encoding)
            }
            Error::TooManyParts { limit } => write!(f, "number of parts exceeded the maximum limit: {}", limit),
            Error::PartTooLarge { limit, part_name } => write!(
                f,
                "part '{}' exceeded the maximum size limit: {} bytes",
                part_name.as_deref().unwrap_or("<unknown>"),
                limit
            ),
            Error::MessageTooLarge { limit } => {
                write!(f, "message size exceeded the maximum limit: {} bytes", limit)
            }
            Error::Unexpected(err) => write!(f, "unexpected failure: {}", err),
            Error::InvalidPart { reason } => write!(f, "invalid part: {}", reason),
            #[cfg(feature = "json")]
            Error::DecodeJson(err) => write!(f, "failed to decode part data as JSON: {}", err),
        }
    }
}

impl Debug for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Unexpected(err) => Some(err.as_ref()),
            #[cfg(feature = "json")]
            Error::DecodeJson(err) => Some(err),
            _ => None,
        }
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        self.to_string().eq(&other.to_string())
    }
}

impl Eq for Error {}
