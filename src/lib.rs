//! An async encoder and decoder for the multipart MIME format in Rust.
//!
//! The decoder turns a [`Stream`](futures_util::stream::Stream) of byte
//! chunks into [`Part`]s. It keeps a small fixed amount of state between
//! chunks, so a message is never buffered as a whole, and it produces the
//! same parts however the input happens to be split. `Field` and `Object`
//! parts are handed out with their decoded [`Value`], file-like `Stream`
//! parts expose their body as it arrives.
//!
//! The [`MultipartEncoder`] does the reverse, writing [`OutgoingPart`]s one
//! after the other.
//!
//! [`PartAssembler`] is the I/O-free core of the decoder, for callers that
//! push chunks themselves.
//!
//! # Examples
//!
//! ```
//! use partstream::{Multipart, MultipartEncoder};
//!
//! # async fn run() -> partstream::Result<()> {
//! let mut encoder = MultipartEncoder::new();
//! encoder.add_field("my_text_field", "abcd")?;
//! let boundary = encoder.boundary().to_owned();
//!
//! let mut multipart = Multipart::new(encoder, boundary);
//!
//! while let Some(part) = multipart.next_part().await? {
//!     let name = part.name().map(|name| name.to_owned());
//!     let text = part.text().await?;
//!     println!("Name: {:?}, Text: {}", name, text);
//! }
//! # Ok(())
//! # }
//! # tokio::runtime::Runtime::new().unwrap().block_on(run()).unwrap();
//! ```
//!
//! ## Optional features
//!
//! * `tokio-io` (default): read from an [`AsyncRead`](tokio::io::AsyncRead),
//!   write to an [`AsyncWrite`](tokio::io::AsyncWrite) and encode files.
//! * `json`: deserialize part data with [`Part::json`].
//! * `log`: log part transitions and failures with the `log` crate.

#![forbid(unsafe_code)]
#![warn(missing_debug_implementations, rust_2018_idioms)]
#![cfg_attr(nightly, feature(doc_cfg))]

#[macro_use]
mod macros;

pub use bytes;

pub use assembler::{Event, PartAssembler};
pub use constraints::{Constraints, Dispatch};
pub use encoder::{MultipartEncoder, OutgoingPart};
pub use error::Error;
pub use headers::Headers;
pub use multipart::Multipart;
pub use part::{Part, PartInfo, PartKind, Value};
pub use size_limit::SizeLimit;

mod assembler;
mod buffer;
mod constants;
mod constraints;
mod content_disposition;
mod encoder;
mod error;
mod headers;
mod helpers;
mod multipart;
mod part;
pub mod scanner;
mod size_limit;
mod state;
mod transfer_encoding;

/// A Result type often returned from methods that can have `partstream`
/// errors.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Parses the `Content-Type` header to extract the boundary value.
///
/// The boundary may be a quoted string or a token running up to the next
/// `;`. Any media type is accepted.
///
/// # Examples
///
/// ```
/// # fn run() {
/// let content_type = "multipart/form-data; boundary=ABCDEFG";
///
/// assert_eq!(partstream::parse_boundary(content_type), Ok("ABCDEFG".to_owned()));
/// # }
/// # run();
/// ```
pub fn parse_boundary<T: AsRef<str>>(content_type: T) -> Result<String> {
    helpers::extract_boundary(content_type.as_ref()).ok_or(Error::BadContentType)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_boundary() {
        let content_type = "multipart/form-data; boundary=ABCDEFG";
        assert_eq!(parse_boundary(content_type), Ok("ABCDEFG".to_owned()));

        let content_type = "multipart/form-data; boundary=------ABCDEFG";
        assert_eq!(parse_boundary(content_type), Ok("------ABCDEFG".to_owned()));

        let content_type = "multipart/related; type=\"text/xml\"; boundary=\"MIME_boundary\"";
        assert_eq!(parse_boundary(content_type), Ok("MIME_boundary".to_owned()));

        let content_type = "text/plain";
        assert_eq!(parse_boundary(content_type), Err(Error::BadContentType));

        let content_type = "multipart/form-data; boundary=";
        assert!(parse_boundary(content_type).is_err());
    }
}
