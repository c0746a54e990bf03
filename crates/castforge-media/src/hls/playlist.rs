//! HLS playlist structures.

use crate::error::{Error, Result};
use std::fmt::Write;

/// Media playlist for a single rendition.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaPlaylist {
    /// Protocol version.
    pub version: u8,
    /// Target duration in seconds.
    pub target_duration: u32,
    /// Media sequence number of the first segment.
    pub media_sequence: u64,
    /// Playlist type (VOD, EVENT or sliding live window).
    pub playlist_type: PlaylistType,
    /// Init segment URI.
    pub init_uri: Option<String>,
    /// Segment entries.
    pub segments: Vec<SegmentEntry>,
    /// Whether this is an ended playlist.
    pub ended: bool,
}

impl MediaPlaylist {
    /// Create a new VOD playlist.
    pub fn vod() -> Self {
        Self {
            version: 7,
            target_duration: 6,
            media_sequence: 0,
            playlist_type: PlaylistType::Vod,
            init_uri: None,
            segments: Vec::new(),
            ended: true,
        }
    }

    /// Create an empty sliding-window live playlist.
    pub fn live() -> Self {
        Self {
            version: 3,
            target_duration: 4,
            media_sequence: 0,
            playlist_type: PlaylistType::Live,
            init_uri: None,
            segments: Vec::new(),
            ended: false,
        }
    }

    /// Parse an M3U8 media playlist.
    ///
    /// Unknown tags are skipped. Only the tags needed to republish a live
    /// window are interpreted.
    pub fn parse(text: &str) -> Result<Self> {
        let mut lines = text
            .lines()
            .enumerate()
            .map(|(i, l)| (i + 1, l.trim()))
            .filter(|(_, l)| !l.is_empty());

        match lines.next() {
            Some((_, "#EXTM3U")) => {}
            _ => return Err(Error::MissingHeader),
        }

        let mut playlist = Self::live();
        let mut pending: Option<PendingSegment> = None;
        let mut discontinuity = false;
        let mut byte_range = None;

        for (line_no, line) in lines {
            if let Some(value) = line.strip_prefix("#EXT-X-VERSION:") {
                playlist.version = value
                    .parse()
                    .map_err(|_| Error::invalid_tag("EXT-X-VERSION", line_no, value))?;
            } else if let Some(value) = line.strip_prefix("#EXT-X-TARGETDURATION:") {
                playlist.target_duration = value
                    .parse()
                    .map_err(|_| Error::invalid_tag("EXT-X-TARGETDURATION", line_no, value))?;
            } else if let Some(value) = line.strip_prefix("#EXT-X-MEDIA-SEQUENCE:") {
                playlist.media_sequence = value
                    .parse()
                    .map_err(|_| Error::invalid_tag("EXT-X-MEDIA-SEQUENCE", line_no, value))?;
            } else if let Some(value) = line.strip_prefix("#EXT-X-PLAYLIST-TYPE:") {
                playlist.playlist_type = match value {
                    "VOD" => PlaylistType::Vod,
                    "EVENT" => PlaylistType::Event,
                    _ => return Err(Error::invalid_tag("EXT-X-PLAYLIST-TYPE", line_no, value)),
                };
            } else if let Some(value) = line.strip_prefix("#EXT-X-MAP:") {
                playlist.init_uri = attribute(value, "URI");
            } else if let Some(value) = line.strip_prefix("#EXT-X-BYTERANGE:") {
                byte_range = Some(parse_byte_range(value, line_no)?);
            } else if line == "#EXT-X-DISCONTINUITY" {
                discontinuity = true;
            } else if line == "#EXT-X-ENDLIST" {
                playlist.ended = true;
            } else if let Some(value) = line.strip_prefix("#EXTINF:") {
                if pending.is_some() {
                    return Err(Error::DanglingSegment(line_no));
                }
                let (duration, title) = match value.split_once(',') {
                    Some((d, t)) => (d, (!t.is_empty()).then(|| t.to_string())),
                    None => (value, None),
                };
                let duration = duration
                    .parse()
                    .map_err(|_| Error::invalid_tag("EXTINF", line_no, value))?;
                pending = Some(PendingSegment {
                    line: line_no,
                    duration,
                    title,
                });
            } else if line.starts_with('#') {
                continue;
            } else {
                let Some(info) = pending.take() else {
                    // A URI without EXTINF is malformed; skip rather than guess a duration.
                    continue;
                };
                playlist.segments.push(SegmentEntry {
                    duration: info.duration,
                    uri: line.to_string(),
                    title: info.title,
                    discontinuity: std::mem::take(&mut discontinuity),
                    byte_range: byte_range.take(),
                });
            }
        }

        if let Some(info) = pending {
            return Err(Error::DanglingSegment(info.line));
        }

        Ok(playlist)
    }

    /// Render to M3U8 string.
    pub fn render(&self) -> String {
        let mut out = String::new();

        writeln!(out, "#EXTM3U").unwrap();
        writeln!(out, "#EXT-X-VERSION:{}", self.version).unwrap();
        writeln!(out, "#EXT-X-TARGETDURATION:{}", self.target_duration).unwrap();
        writeln!(out, "#EXT-X-MEDIA-SEQUENCE:{}", self.media_sequence).unwrap();

        match self.playlist_type {
            PlaylistType::Vod => writeln!(out, "#EXT-X-PLAYLIST-TYPE:VOD").unwrap(),
            PlaylistType::Event => writeln!(out, "#EXT-X-PLAYLIST-TYPE:EVENT").unwrap(),
            PlaylistType::Live => {}
        }

        if let Some(ref init_uri) = self.init_uri {
            writeln!(out, "#EXT-X-MAP:URI=\"{}\"", init_uri).unwrap();
        }

        for segment in &self.segments {
            if segment.discontinuity {
                writeln!(out, "#EXT-X-DISCONTINUITY").unwrap();
            }
            if let Some((offset, length)) = segment.byte_range {
                writeln!(out, "#EXT-X-BYTERANGE:{}@{}", length, offset).unwrap();
            }
            if let Some(ref title) = segment.title {
                writeln!(out, "#EXTINF:{:.6},{}", segment.duration, title).unwrap();
            } else {
                writeln!(out, "#EXTINF:{:.6},", segment.duration).unwrap();
            }
            writeln!(out, "{}", segment.uri).unwrap();
        }

        if self.ended {
            writeln!(out, "#EXT-X-ENDLIST").unwrap();
        }

        out
    }

    /// URIs of every segment, in playlist order.
    pub fn segment_uris(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().map(|s| s.uri.as_str())
    }
}

struct PendingSegment {
    line: usize,
    duration: f64,
    title: Option<String>,
}

/// Extract a quoted or bare attribute from an attribute list.
fn attribute(list: &str, name: &str) -> Option<String> {
    list.split(',').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key.trim() == name).then(|| value.trim().trim_matches('"').to_string())
    })
}

/// Parse `length[@offset]`, returned as `(offset, length)`.
fn parse_byte_range(value: &str, line: usize) -> Result<(u64, u64)> {
    let bad = || Error::invalid_tag("EXT-X-BYTERANGE", line, value);
    let (length, offset) = match value.split_once('@') {
        Some((l, o)) => (l, o.parse().map_err(|_| bad())?),
        None => (value, 0),
    };
    Ok((offset, length.parse().map_err(|_| bad())?))
}

/// Playlist type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaylistType {
    Vod,
    Event,
    Live,
}

/// A segment entry in the playlist.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentEntry {
    /// Duration in seconds.
    pub duration: f64,
    /// Segment URI.
    pub uri: String,
    /// Optional title.
    pub title: Option<String>,
    /// Discontinuity before this segment.
    pub discontinuity: bool,
    /// Byte range (offset, length).
    pub byte_range: Option<(u64, u64)>,
}

impl SegmentEntry {
    /// A plain entry with no title, discontinuity or byte range.
    pub fn new(duration: f64, uri: impl Into<String>) -> Self {
        Self {
            duration,
            uri: uri.into(),
            title: None,
            discontinuity: false,
            byte_range: None,
        }
    }
}

/// Master playlist with multiple renditions.
#[derive(Debug, Clone)]
pub struct MasterPlaylist {
    /// Stream variants.
    pub streams: Vec<StreamInfo>,
}

impl MasterPlaylist {
    /// Create a new master playlist.
    pub fn new() -> Self {
        Self {
            streams: Vec::new(),
        }
    }

    /// Add a stream variant.
    pub fn add_stream(mut self, stream: StreamInfo) -> Self {
        self.streams.push(stream);
        self
    }

    /// Render to M3U8 string.
    pub fn render(&self) -> String {
        let mut out = String::new();

        writeln!(out, "#EXTM3U").unwrap();
        writeln!(out, "#EXT-X-VERSION:6").unwrap();

        for stream in &self.streams {
            write!(out, "#EXT-X-STREAM-INF:BANDWIDTH={}", stream.bandwidth).unwrap();

            if let Some((width, height)) = stream.resolution {
                write!(out, ",RESOLUTION={}x{}", width, height).unwrap();
            }

            if !stream.codecs.is_empty() {
                write!(out, ",CODECS=\"{}\"", stream.codecs).unwrap();
            }

            if let Some(ref frame_rate) = stream.frame_rate {
                write!(out, ",FRAME-RATE={:.3}", frame_rate).unwrap();
            }

            writeln!(out).unwrap();
            writeln!(out, "{}", stream.uri).unwrap();
        }

        out
    }
}

impl Default for MasterPlaylist {
    fn default() -> Self {
        Self::new()
    }
}

/// Stream variant information.
#[derive(Debug, Clone)]
pub struct StreamInfo {
    /// Playlist URI, relative to the master playlist.
    pub uri: String,
    /// Bandwidth in bits per second.
    pub bandwidth: u32,
    /// Video width and height, when scaled.
    pub resolution: Option<(u32, u32)>,
    /// Codec string (e.g., "avc1.64001f,mp4a.40.2").
    pub codecs: String,
    /// Frame rate.
    pub frame_rate: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const FFMPEG_LIVE: &str = "#EXTM3U
#EXT-X-VERSION:3
#EXT-X-TARGETDURATION:4
#EXT-X-MEDIA-SEQUENCE:12
#EXT-X-PROGRAM-DATE-TIME:2024-01-01T00:00:00.000+0000
#EXTINF:4.000000,
live-ab12cd34-00012.ts
#EXT-X-DISCONTINUITY
#EXTINF:3.966667,
live-ab12cd34-00013.ts
";

    #[test]
    fn test_parse_ffmpeg_live_window() {
        let playlist = MediaPlaylist::parse(FFMPEG_LIVE).unwrap();

        assert_eq!(playlist.version, 3);
        assert_eq!(playlist.target_duration, 4);
        assert_eq!(playlist.media_sequence, 12);
        assert_eq!(playlist.playlist_type, PlaylistType::Live);
        assert!(!playlist.ended);
        assert_eq!(playlist.segments.len(), 2);
        assert_eq!(playlist.segments[0].uri, "live-ab12cd34-00012.ts");
        assert!(!playlist.segments[0].discontinuity);
        assert!(playlist.segments[1].discontinuity);
        assert!((playlist.segments[1].duration - 3.966667).abs() < 1e-9);
    }

    #[test]
    fn test_parse_rejects_missing_header() {
        let err = MediaPlaylist::parse("#EXTINF:4.0,\na.ts\n").unwrap_err();
        assert!(matches!(err, Error::MissingHeader));
    }

    #[test]
    fn test_parse_rejects_dangling_extinf() {
        let err = MediaPlaylist::parse("#EXTM3U\n#EXTINF:4.0,\n").unwrap_err();
        assert!(matches!(err, Error::DanglingSegment(2)));
    }

    #[test]
    fn test_parse_rejects_bad_sequence() {
        let err = MediaPlaylist::parse("#EXTM3U\n#EXT-X-MEDIA-SEQUENCE:abc\n").unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidTag {
                tag: "EXT-X-MEDIA-SEQUENCE",
                ..
            }
        ));
    }

    #[test]
    fn test_parse_map_and_byterange() {
        let text = "#EXTM3U\n#EXT-X-MAP:URI=\"init.mp4\"\n#EXT-X-BYTERANGE:1000@200\n#EXTINF:6.0,intro\nseg.m4s\n#EXT-X-ENDLIST\n";
        let playlist = MediaPlaylist::parse(text).unwrap();

        assert_eq!(playlist.init_uri.as_deref(), Some("init.mp4"));
        assert_eq!(playlist.segments[0].byte_range, Some((200, 1000)));
        assert_eq!(playlist.segments[0].title.as_deref(), Some("intro"));
        assert!(playlist.ended);
    }

    #[test]
    fn test_live_render_has_no_type_or_endlist() {
        let mut playlist = MediaPlaylist::live();
        playlist.media_sequence = 7;
        playlist.segments.push(SegmentEntry::new(4.0, "a.ts"));

        let m3u8 = playlist.render();

        assert!(m3u8.contains("#EXT-X-MEDIA-SEQUENCE:7"));
        assert!(!m3u8.contains("#EXT-X-PLAYLIST-TYPE"));
        assert!(!m3u8.contains("#EXT-X-ENDLIST"));
        assert!(m3u8.contains("#EXTINF:4.000000,\na.ts\n"));
    }

    #[test]
    fn test_render_then_parse_keeps_window() {
        let parsed = MediaPlaylist::parse(FFMPEG_LIVE).unwrap();
        let reparsed = MediaPlaylist::parse(&parsed.render()).unwrap();
        assert_eq!(parsed, reparsed);
    }

    #[test]
    fn test_media_playlist_render_vod() {
        let mut playlist = MediaPlaylist::vod();
        playlist.init_uri = Some("/init.mp4".to_string());
        playlist.segments.push(SegmentEntry::new(5.5, "/seg0.m4s"));

        let m3u8 = playlist.render();

        assert!(m3u8.contains("#EXT-X-VERSION:7"));
        assert!(m3u8.contains("#EXT-X-PLAYLIST-TYPE:VOD"));
        assert!(m3u8.contains("#EXT-X-MAP:URI=\"/init.mp4\""));
        assert!(m3u8.contains("#EXTINF:5.500000,"));
        assert!(m3u8.contains("#EXT-X-ENDLIST"));
    }

    #[test]
    fn test_master_playlist_render() {
        let master = MasterPlaylist::new()
            .add_stream(StreamInfo {
                uri: "0/stream.m3u8".to_string(),
                bandwidth: 1_200_000,
                resolution: Some((1280, 720)),
                codecs: String::new(),
                frame_rate: Some(30.0),
            })
            .add_stream(StreamInfo {
                uri: "1/stream.m3u8".to_string(),
                bandwidth: 600_000,
                resolution: None,
                codecs: "avc1.64001f,mp4a.40.2".to_string(),
                frame_rate: None,
            });

        let m3u8 = master.render();

        assert!(m3u8.contains("#EXT-X-STREAM-INF:BANDWIDTH=1200000,RESOLUTION=1280x720,FRAME-RATE=30.000\n0/stream.m3u8"));
        assert!(m3u8.contains("BANDWIDTH=600000,CODECS=\"avc1.64001f,mp4a.40.2\"\n1/stream.m3u8"));
    }
}
