//! Range-capable streaming of a single transfer file.
//!
//! The response body pulls from a [`StreamReader`] chunk by chunk, so bytes
//! are sent as soon as the engine has fetched them. A read failure ends the
//! body with an error, which aborts the connection instead of truncating it
//! silently. Dropping the body closes the reader.

use std::io::SeekFrom;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::stream::{self, Stream};
use shoal_core::{StreamReader, TransferError};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::error::ApiError;
use crate::handlers::range::{RangeRequest, extract_range_header, parse_range_header};
use crate::server::AppState;

const CHUNK_SIZE: usize = 64 * 1024;

pub const DLNA_TRANSFER_MODE_HEADER: HeaderName = HeaderName::from_static("transfermode.dlna.org");
pub const DLNA_CONTENT_FEATURES_HEADER: HeaderName =
    HeaderName::from_static("contentfeatures.dlna.org");

pub const DLNA_TRANSFER_MODE: &str = "Streaming";
pub const DLNA_CONTENT_FEATURES: &str =
    "DLNA.ORG_OP=01;DLNA.ORG_CI=0;DLNA.ORG_FLAGS=01700000000000000000000000000000";

/// Streams file `index` of transfer `hash`, honouring a single `Range`.
///
/// # Errors
/// - `404` - Unknown transfer or file index
/// - `416` - Range starts past the end of the file
/// - `503` - Engine not configured
pub async fn stream_file(
    State(state): State<AppState>,
    Path((hash, index)): Path<(String, usize)>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let mut reader = state.registry.open_stream(&hash, index).await?;
    let total_size = reader.len();

    let range = parse_range_header(extract_range_header(&headers), total_size);
    let (status, start, length) = match range {
        RangeRequest::Full => (StatusCode::OK, 0, total_size),
        RangeRequest::Partial(range) => (StatusCode::PARTIAL_CONTENT, range.start, range.len()),
        RangeRequest::Unsatisfiable => {
            tracing::debug!(
                "Unsatisfiable range {:?} for {} ({} bytes)",
                extract_range_header(&headers),
                reader.path(),
                total_size
            );
            return Ok((
                StatusCode::RANGE_NOT_SATISFIABLE,
                [(header::CONTENT_RANGE, format!("bytes */{total_size}"))],
            )
                .into_response());
        }
    };

    if start > 0 {
        reader
            .seek(SeekFrom::Start(start))
            .await
            .map_err(TransferError::from)?;
    }

    tracing::debug!(
        "Streaming {} bytes from offset {} of {} in {}",
        length,
        start,
        reader.path(),
        reader.info_hash()
    );

    let mut response_headers = file_headers(reader.path());
    response_headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    if let RangeRequest::Partial(range) = range
        && let Ok(value) = HeaderValue::from_str(&range.content_range(total_size))
    {
        response_headers.insert(header::CONTENT_RANGE, value);
    }

    let body = Body::from_stream(body_stream(reader, length));
    Ok((status, response_headers, body).into_response())
}

/// Headers shared by every successful stream response.
fn file_headers(path: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));

    let mime = mime_guess::from_path(path).first_or_octet_stream();
    if let Ok(value) = HeaderValue::from_str(mime.as_ref()) {
        headers.insert(header::CONTENT_TYPE, value);
    }

    let last_modified = chrono::Utc::now()
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string();
    if let Ok(value) = HeaderValue::from_str(&last_modified) {
        headers.insert(header::LAST_MODIFIED, value);
    }

    if let Ok(value) = HeaderValue::from_str(&content_disposition(path)) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }

    headers.insert(
        DLNA_TRANSFER_MODE_HEADER,
        HeaderValue::from_static(DLNA_TRANSFER_MODE),
    );
    headers.insert(
        DLNA_CONTENT_FEATURES_HEADER,
        HeaderValue::from_static(DLNA_CONTENT_FEATURES),
    );
    headers
}

/// `inline` disposition naming the last path component, with an ASCII
/// fallback and a percent-encoded UTF-8 form.
fn content_disposition(path: &str) -> String {
    let file_name = path.rsplit('/').next().unwrap_or(path);
    let fallback: String = file_name
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!(
        "inline; filename=\"{}\"; filename*=UTF-8''{}",
        fallback,
        urlencoding::encode(file_name)
    )
}

fn body_stream(
    reader: StreamReader,
    length: u64,
) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static {
    stream::unfold((reader, length), |(mut reader, remaining)| async move {
        if remaining == 0 {
            return None;
        }

        let chunk_size = remaining.min(CHUNK_SIZE as u64) as usize;
        let mut buf = vec![0u8; chunk_size];
        match reader.read(&mut buf).await {
            Ok(0) => {
                tracing::warn!(
                    "Stream of {} ended {} bytes early",
                    reader.path(),
                    remaining
                );
                Some((
                    Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof)),
                    (reader, 0),
                ))
            }
            Ok(read) => {
                buf.truncate(read);
                Some((Ok(Bytes::from(buf)), (reader, remaining - read as u64)))
            }
            Err(e) => {
                tracing::warn!("Stream of {} failed: {}", reader.path(), e);
                Some((Err(e), (reader, 0)))
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_disposition() {
        assert_eq!(
            content_disposition("show/Season 1/episode.mkv"),
            "inline; filename=\"episode.mkv\"; filename*=UTF-8''episode.mkv"
        );
        assert_eq!(
            content_disposition("plain \"quoted\".mp4"),
            "inline; filename=\"plain _quoted_.mp4\"; filename*=UTF-8''plain%20%22quoted%22.mp4"
        );
    }

    #[test]
    fn test_file_headers() {
        let headers = file_headers("show/video.mp4");
        assert_eq!(headers[header::CONTENT_TYPE], "video/mp4");
        assert_eq!(headers[header::ACCEPT_RANGES], "bytes");
        assert_eq!(headers[DLNA_TRANSFER_MODE_HEADER], DLNA_TRANSFER_MODE);
        assert_eq!(headers[DLNA_CONTENT_FEATURES_HEADER], DLNA_CONTENT_FEATURES);
        assert!(headers.contains_key(header::LAST_MODIFIED));

        let unknown = file_headers("show/blob.zzz-unknown");
        assert_eq!(unknown[header::CONTENT_TYPE], "application/octet-stream");
    }
}
