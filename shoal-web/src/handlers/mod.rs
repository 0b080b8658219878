//! HTTP request handlers organized by functionality

pub mod api;
pub mod playlist;
pub mod range;
pub mod streaming;

pub use api::{
    FileForm, MagnetForm, add_magnet, delete_transfer, get_transfer, list_transfers, start_file,
    start_transfer, stop_file, stop_transfer,
};
pub use playlist::playlist;
pub use range::{ByteRange, RangeRequest, extract_range_header, parse_range_header};
pub use streaming::stream_file;
