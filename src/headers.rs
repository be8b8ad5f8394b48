use crate::helpers;
use http::header::HeaderMap;

/// The headers of a part, in the order they first appeared.
///
/// Names keep their original case. Setting a name that is already present
/// replaces its value in place, so a repeated header keeps only its last value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Headers {
        Headers::default()
    }

    /// Sets a header, overwriting the value of an entry with the exact same name.
    pub fn insert<N: Into<String>, V: Into<String>>(&mut self, name: N, value: V) {
        let name = name.into();
        let value = value.into();

        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    /// Looks up a header by name, ignoring ASCII case. When several entries
    /// match, the most recently added one wins.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Converts the headers to an [`http::HeaderMap`], lower-casing names.
    pub fn to_header_map(&self) -> crate::Result<HeaderMap> {
        helpers::convert_headers_to_header_map(self.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_write_wins() {
        let mut headers = Headers::new();
        headers.insert("Content-Type", "text/plain");
        headers.insert("X-Trace", "1");
        headers.insert("Content-Type", "text/html");

        let entries: Vec<_> = headers.iter().collect();
        assert_eq!(entries, vec![("Content-Type", "text/html"), ("X-Trace", "1")]);
    }

    #[test]
    fn test_case_preserved() {
        let mut headers = Headers::new();
        headers.insert("content-type", "a");
        headers.insert("Content-Type", "b");

        assert_eq!(headers.len(), 2);
        assert_eq!(headers.get("CONTENT-TYPE"), Some("b"));
        assert!(headers.contains("content-type"));
        assert!(!headers.contains("content-id"));
    }

    #[test]
    fn test_to_header_map() {
        let mut headers = Headers::new();
        headers.insert("Content-Disposition", "form-data; name=\"a\"");
        headers.insert("Content-Type", "text/plain");

        let map = headers.to_header_map().unwrap();
        assert_eq!(map.get(http::header::CONTENT_TYPE).unwrap(), "text/plain");
        assert_eq!(map.len(), 2);
    }
}
