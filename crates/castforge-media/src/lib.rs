//! castforge-media: HLS playlist model for castforge.
//!
//! The transcoder is treated as a black box that emits playlists and
//! segments. This crate only understands the M3U8 text format well enough
//! to parse a live window, rewrite it and render it back.

pub mod error;
pub mod hls;

pub use error::{Error, Result};
pub use hls::{MasterPlaylist, MediaPlaylist, SegmentEntry};
