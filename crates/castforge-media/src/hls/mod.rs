//! HLS playlist parsing and generation.
//!
//! The transcoder writes its own media playlists; these types let the
//! segment pipeline read them, rewrite segment URIs and render the copy
//! players actually see.

mod playlist;

pub use playlist::{MasterPlaylist, MediaPlaylist, PlaylistType, SegmentEntry, StreamInfo};
