//! Shoal Web - JSON API and stream server
//!
//! Thin axum layer over the shoal-core registry: transfer management
//! endpoints, M3U playlists and HTTP range streaming of individual files.

pub mod error;
pub mod handlers;
pub mod server;

pub use error::{ApiError, WebError};
pub use server::{AppState, router, run_server};
