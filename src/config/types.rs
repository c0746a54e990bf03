use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub ingest: IngestConfig,

    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub transcoder: TranscoderConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub viewers: ViewerConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory of web UI assets served as a fallback.
    #[serde(default)]
    pub static_dir: Option<PathBuf>,

    /// Bearer token for `/api/admin` routes. Admin calls are refused
    /// while this is unset.
    #[serde(default)]
    pub admin_token: Option<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            static_dir: None,
            admin_token: None,
        }
    }
}

/// Inbound broadcast listener.
///
/// Broadcasters push an MPEG-TS feed over plain TCP, e.g.
/// `ffmpeg -re -i input.mp4 -c copy -f mpegts tcp://host:9710`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IngestConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_ingest_port")]
    pub port: u16,

    /// Read buffer size for the inbound socket, in bytes.
    #[serde(default = "default_read_buffer")]
    pub read_buffer_bytes: usize,
}

fn default_ingest_port() -> u16 {
    9710
}

fn default_read_buffer() -> usize {
    64 * 1024
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_ingest_port(),
            read_buffer_bytes: default_read_buffer(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PathsConfig {
    /// Root for transcoder working directories and runtime artifacts.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Public HLS directory read by the HTTP delivery layer.
    #[serde(default = "default_hls_dir")]
    pub hls_dir: PathBuf,

    /// Looping filler played while offline. A generated slate is used when
    /// the file is missing.
    #[serde(default = "default_offline_asset")]
    pub offline_asset: PathBuf,

    /// Logo copied to `thumbnail.jpg` at startup.
    #[serde(default)]
    pub logo: Option<PathBuf>,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_hls_dir() -> PathBuf {
    PathBuf::from("./data/hls")
}

fn default_offline_asset() -> PathBuf {
    PathBuf::from("./data/offline.ts")
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            hls_dir: default_hls_dir(),
            offline_asset: default_offline_asset(),
            logo: None,
        }
    }
}

impl PathsConfig {
    /// Private directory where a job's transcoder writes raw output.
    pub fn work_dir(&self) -> PathBuf {
        self.data_dir.join("transcode")
    }

    pub fn thumbnail(&self) -> PathBuf {
        self.data_dir.join("thumbnail.jpg")
    }

    pub fn preview(&self) -> PathBuf {
        self.data_dir.join("preview.gif")
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TranscoderConfig {
    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,

    /// Target segment duration in seconds.
    #[serde(default = "default_segment_length")]
    pub segment_length_secs: u32,

    /// Number of segments kept in each live playlist window.
    #[serde(default = "default_playlist_size")]
    pub playlist_size: u32,

    /// How long a stopped transcoder may take to exit before it is killed.
    #[serde(default = "default_stop_grace")]
    pub stop_grace_secs: u64,

    #[serde(default = "default_variants")]
    pub variants: Vec<VariantConfig>,
}

fn default_segment_length() -> u32 {
    4
}

fn default_playlist_size() -> u32 {
    5
}

fn default_stop_grace() -> u64 {
    5
}

fn default_variants() -> Vec<VariantConfig> {
    vec![VariantConfig::default()]
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: None,
            segment_length_secs: default_segment_length(),
            playlist_size: default_playlist_size(),
            stop_grace_secs: default_stop_grace(),
            variants: default_variants(),
        }
    }
}

/// One adaptive-bitrate rendition.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct VariantConfig {
    /// Video bitrate in kbps.
    #[serde(default = "default_video_bitrate")]
    pub video_bitrate_kbps: u32,

    /// Audio bitrate in kbps.
    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate_kbps: u32,

    #[serde(default)]
    pub scaled_width: Option<u32>,

    #[serde(default)]
    pub scaled_height: Option<u32>,

    #[serde(default = "default_framerate")]
    pub framerate: u32,

    /// x264 preset (default: "veryfast").
    #[serde(default = "default_preset")]
    pub encoder_preset: String,
}

fn default_video_bitrate() -> u32 {
    1200
}

fn default_audio_bitrate() -> u32 {
    128
}

fn default_framerate() -> u32 {
    30
}

fn default_preset() -> String {
    "veryfast".to_string()
}

impl Default for VariantConfig {
    fn default() -> Self {
        Self {
            video_bitrate_kbps: default_video_bitrate(),
            audio_bitrate_kbps: default_audio_bitrate(),
            scaled_width: None,
            scaled_height: None,
            framerate: default_framerate(),
            encoder_preset: default_preset(),
        }
    }
}

impl VariantConfig {
    /// Total advertised bandwidth in bits per second.
    pub fn bandwidth(&self) -> u32 {
        (self.video_bitrate_kbps + self.audio_bitrate_kbps) * 1000
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub provider: StorageProviderConfig,

    /// Keep a local copy of segments that are pushed to the remote store.
    #[serde(default = "default_keep_local")]
    pub keep_local_copy: bool,

    /// Public URL prefix players use to fetch remote-only segments.
    #[serde(default)]
    pub public_url: Option<String>,

    #[serde(default = "default_local_retention")]
    pub local_retention: RetentionConfig,

    #[serde(default = "default_remote_retention")]
    pub remote_retention: RetentionConfig,

    #[serde(default = "default_prune_interval")]
    pub prune_interval_secs: u64,

    /// Upper bound on a single remote segment or playlist write.
    #[serde(default = "default_remote_write_timeout")]
    pub remote_write_timeout_secs: u64,
}

fn default_keep_local() -> bool {
    true
}

fn default_local_retention() -> RetentionConfig {
    RetentionConfig {
        max_segments: 15,
        max_age_secs: 120,
    }
}

fn default_remote_retention() -> RetentionConfig {
    RetentionConfig {
        max_segments: 60,
        max_age_secs: 600,
    }
}

fn default_prune_interval() -> u64 {
    10
}

fn default_remote_write_timeout() -> u64 {
    10
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            provider: StorageProviderConfig::default(),
            keep_local_copy: default_keep_local(),
            public_url: None,
            local_retention: default_local_retention(),
            remote_retention: default_remote_retention(),
            prune_interval_secs: default_prune_interval(),
            remote_write_timeout_secs: default_remote_write_timeout(),
        }
    }
}

/// Which storage provider segments are routed to.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageProviderConfig {
    /// Everything stays in the local HLS directory.
    #[default]
    Local,
    /// S3-compatible object store.
    S3 {
        bucket: String,
        /// Root path within the bucket.
        #[serde(default = "default_s3_root")]
        root: String,
        #[serde(default)]
        region: Option<String>,
        /// Custom endpoint for S3-compatible services.
        #[serde(default)]
        endpoint: Option<String>,
        #[serde(default)]
        access_key_id: Option<String>,
        #[serde(default)]
        secret_access_key: Option<String>,
        #[serde(default)]
        enable_virtual_host_style: bool,
    },
}

fn default_s3_root() -> String {
    "/".to_string()
}

impl StorageProviderConfig {
    pub fn is_remote(&self) -> bool {
        !matches!(self, StorageProviderConfig::Local)
    }
}

/// Retention window for one storage tier.
///
/// A segment expires when it falls more than `max_segments` behind the
/// newest segment, or is older than `max_age_secs`.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub struct RetentionConfig {
    pub max_segments: u64,
    pub max_age_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ViewerConfig {
    /// A viewer counts as active for this long after its last ping.
    #[serde(default = "default_viewer_expiry")]
    pub expiry_secs: u64,

    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

fn default_viewer_expiry() -> u64 {
    60
}

fn default_sweep_interval() -> u64 {
    30
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            expiry_secs: default_viewer_expiry(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}
