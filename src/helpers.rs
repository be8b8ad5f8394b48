use http::header::{HeaderMap, HeaderName, HeaderValue};
use std::convert::TryFrom;

pub(crate) fn convert_headers_to_header_map<'a, I>(headers: I) -> crate::Result<HeaderMap>
where
    I: Iterator<Item = (&'a str, &'a str)>,
{
    let mut map = HeaderMap::new();

    for (name, value) in headers {
        let name = HeaderName::try_from(name).map_err(|err| crate::Error::Unexpected(err.into()))?;
        let value = HeaderValue::try_from(value).map_err(|err| crate::Error::Unexpected(err.into()))?;

        map.insert(name, value);
    }

    Ok(map)
}

/// Strips the angle brackets around a `Content-ID` value.
pub(crate) fn unwrap_content_id(value: &str) -> String {
    let value = value.trim();
    let value = value.strip_prefix('<').unwrap_or(value);
    let value = value.strip_suffix('>').unwrap_or(value);
    value.to_owned()
}

/// Extracts the boundary parameter from a `Content-Type` value.
///
/// Accepts a quoted string or a token running up to the next `;`.
pub(crate) fn extract_boundary(content_type: &str) -> Option<String> {
    let lowered = content_type.to_ascii_lowercase();
    let pos = memchr::memmem::find(lowered.as_bytes(), b"boundary=")?;
    let rest = &content_type[pos + "boundary=".len()..];

    if let Some(quoted) = rest.strip_prefix('"') {
        if let Some(end) = memchr::memchr(b'"', quoted.as_bytes()) {
            if end > 0 {
                return Some(quoted[..end].to_owned());
            }
        }
    }

    let end = memchr::memchr(b';', rest.as_bytes()).unwrap_or(rest.len());
    let token = rest[..end].trim();

    if token.is_empty() {
        None
    } else {
        Some(token.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unwrap_content_id() {
        assert_eq!(unwrap_content_id("<part1@example.com>"), "part1@example.com");
        assert_eq!(unwrap_content_id(" <abc> "), "abc");
        assert_eq!(unwrap_content_id("abc"), "abc");
        assert_eq!(unwrap_content_id("<abc"), "abc");
    }

    #[test]
    fn test_extract_boundary() {
        assert_eq!(
            extract_boundary("multipart/form-data; boundary=ABCDEFG").as_deref(),
            Some("ABCDEFG")
        );
        assert_eq!(
            extract_boundary("multipart/form-data; BOUNDARY=\"quoted; value\"; charset=utf-8").as_deref(),
            Some("quoted; value")
        );
        assert_eq!(
            extract_boundary("multipart/mixed; boundary=abc ; charset=utf-8").as_deref(),
            Some("abc")
        );
        assert_eq!(extract_boundary("multipart/form-data"), None);
        assert_eq!(extract_boundary("multipart/form-data; boundary="), None);
    }
}
