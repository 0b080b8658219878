//! HTTP Range request handling for file streaming
//!
//! Implements the single-range subset of RFC 7233: `bytes=start-end`,
//! `bytes=start-` and `bytes=-suffix`. Headers that cannot be parsed, or
//! that ask for several ranges, are ignored and the full file is served.

use axum::http::{HeaderMap, header};

/// Inclusive byte range inside a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

#[allow(clippy::len_without_is_empty)]
impl ByteRange {
    /// Number of bytes covered.
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// `Content-Range` value for a file of `total_size` bytes.
    pub fn content_range(&self, total_size: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, total_size)
    }
}

/// Outcome of interpreting a request's `Range` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeRequest {
    /// No usable range, serve everything with 200
    Full,
    /// Serve this slice with 206
    Partial(ByteRange),
    /// Range lies outside the file, answer 416
    Unsatisfiable,
}

/// Parse a `Range` header value against a file of `total_size` bytes.
///
/// The end of a range is clamped to the last byte; a suffix longer than the
/// file selects the whole file.
///
/// # Examples
/// ```
/// use shoal_web::handlers::range::{ByteRange, RangeRequest, parse_range_header};
/// assert_eq!(
///     parse_range_header(Some("bytes=100-199"), 1000),
///     RangeRequest::Partial(ByteRange { start: 100, end: 199 })
/// );
/// ```
pub fn parse_range_header(range: Option<&str>, total_size: u64) -> RangeRequest {
    let Some(spec) = range.and_then(|value| value.trim().strip_prefix("bytes=")) else {
        return RangeRequest::Full;
    };
    if spec.contains(',') {
        return RangeRequest::Full;
    }
    let Some((start_str, end_str)) = spec.trim().split_once('-') else {
        return RangeRequest::Full;
    };
    let (start_str, end_str) = (start_str.trim(), end_str.trim());

    if start_str.is_empty() {
        let Ok(suffix) = end_str.parse::<u64>() else {
            return RangeRequest::Full;
        };
        if suffix == 0 || total_size == 0 {
            return RangeRequest::Unsatisfiable;
        }
        return RangeRequest::Partial(ByteRange {
            start: total_size.saturating_sub(suffix),
            end: total_size - 1,
        });
    }

    let Ok(start) = start_str.parse::<u64>() else {
        return RangeRequest::Full;
    };
    let end = if end_str.is_empty() {
        None
    } else {
        match end_str.parse::<u64>() {
            Ok(end) if end >= start => Some(end),
            _ => return RangeRequest::Full,
        }
    };

    if start >= total_size {
        return RangeRequest::Unsatisfiable;
    }
    let last = total_size - 1;
    RangeRequest::Partial(ByteRange {
        start,
        end: end.map_or(last, |end| end.min(last)),
    })
}

/// Extract the Range header value, if present and valid UTF-8.
pub fn extract_range_header(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::RANGE)
        .and_then(|range| range.to_str().ok())
}
