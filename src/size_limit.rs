use crate::constants;
use std::collections::HashMap;

/// Represents size limits of the stream to prevent DoS attacks.
///
/// Sizes count the raw body bytes as they appear on the wire, before any
/// transfer decoding. Please refer [`Constraints`](crate::Constraints) for
/// more info.
#[derive(Debug, Clone)]
pub struct SizeLimit {
    pub(crate) whole_stream: u64,
    pub(crate) per_part: u64,
    pub(crate) part_map: HashMap<String, u64>,
}

impl SizeLimit {
    /// Creates the default size limits: 100 MiB for all part bodies together
    /// and 10 MiB for each part.
    pub fn new() -> SizeLimit {
        SizeLimit::default()
    }

    /// Sets the limit for the cumulative size of all part bodies.
    pub fn whole_stream(mut self, limit: u64) -> SizeLimit {
        self.whole_stream = limit;
        self
    }

    /// Sets the size limit for each part body.
    pub fn per_part(mut self, limit: u64) -> SizeLimit {
        self.per_part = limit;
        self
    }

    /// Sets the size limit for a specific part, it overrides the `per_part`
    /// value for this part.
    ///
    /// It is useful to keep textual fields, which are buffered in memory,
    /// much smaller than file uploads.
    pub fn for_part<N: Into<String>>(mut self, part_name: N, limit: u64) -> SizeLimit {
        self.part_map.insert(part_name.into(), limit);
        self
    }

    pub(crate) fn extract_size_limit_for(&self, part: Option<&str>) -> u64 {
        part.and_then(|part| self.part_map.get(part))
            .copied()
            .unwrap_or(self.per_part)
    }
}

impl Default for SizeLimit {
    fn default() -> Self {
        SizeLimit {
            whole_stream: constants::DEFAULT_WHOLE_STREAM_SIZE_LIMIT,
            per_part: constants::DEFAULT_PER_PART_SIZE_LIMIT,
            part_map: HashMap::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_size_limit() {
        let limit = SizeLimit::new().per_part(30).for_part("avatar", 1000);

        assert_eq!(limit.extract_size_limit_for(Some("avatar")), 1000);
        assert_eq!(limit.extract_size_limit_for(Some("comment")), 30);
        assert_eq!(limit.extract_size_limit_for(None), 30);
        assert_eq!(limit.whole_stream, 100 * 1024 * 1024);
    }
}
