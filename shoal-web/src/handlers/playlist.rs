//! M3U playlist of every file in a transfer.

use std::fmt::Write as _;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, header};
use axum::response::IntoResponse;
use shoal_core::TransferSnapshot;

use crate::error::ApiError;
use crate::server::AppState;

pub const PLAYLIST_CONTENT_TYPE: &str = "application/x-mpegurl; charset=utf-8";

pub async fn playlist(
    State(state): State<AppState>,
    Path(hash): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let snapshot = state.registry.get(&hash).await?;
    let host = headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .map_or_else(|| format!("localhost:{}", state.http_port), str::to_string);

    Ok((
        [(header::CONTENT_TYPE, PLAYLIST_CONTENT_TYPE)],
        render_playlist(&snapshot, &host),
    ))
}

/// Renders one `#EXTINF` entry and stream URL per file, in file order.
pub fn render_playlist(snapshot: &TransferSnapshot, host: &str) -> String {
    let mut body = String::from("#EXTM3U\n");
    for (index, file) in snapshot.files.iter().enumerate() {
        // Writing to a String cannot fail.
        let _ = write!(
            body,
            "#EXTINF:-1,{}\nhttp://{}/api/v1/torrents/{}/stream/{}\n",
            file.path, host, snapshot.info_hash, index
        );
    }
    body
}
