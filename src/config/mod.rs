mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    let default_paths = [
        "./castforge.toml",
        "./config.toml",
        "~/.config/castforge/config.toml",
        "/etc/castforge/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            return load_config(path);
        }
    }

    Ok(Config::default())
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    if config.server.port == 0 {
        anyhow::bail!("Server port cannot be 0");
    }

    if config.ingest.port == 0 {
        anyhow::bail!("Ingest port cannot be 0");
    }

    if config.server.port == config.ingest.port && config.server.host == config.ingest.host {
        anyhow::bail!(
            "Server and ingest cannot share {}:{}",
            config.server.host,
            config.server.port
        );
    }

    if config.ingest.read_buffer_bytes == 0 {
        anyhow::bail!("Ingest read buffer cannot be 0 bytes");
    }

    if matches!(config.server.admin_token.as_deref(), Some("")) {
        anyhow::bail!("Admin token cannot be empty");
    }

    if config.transcoder.segment_length_secs == 0 {
        anyhow::bail!("Segment length must be at least 1 second");
    }

    if config.transcoder.variants.is_empty() {
        anyhow::bail!("At least one transcoder variant is required");
    }

    for (i, variant) in config.transcoder.variants.iter().enumerate() {
        if variant.video_bitrate_kbps == 0 {
            anyhow::bail!("Variant {} has no video bitrate", i);
        }
        if variant.scaled_width.is_some() != variant.scaled_height.is_some() {
            anyhow::bail!("Variant {} must set both scaled_width and scaled_height", i);
        }
    }

    if let StorageProviderConfig::S3 { bucket, .. } = &config.storage.provider {
        if bucket.is_empty() {
            anyhow::bail!("S3 storage requires a bucket name");
        }
        if config.storage.public_url.is_none() {
            anyhow::bail!("S3 storage requires storage.public_url for remote segment URIs");
        }
    }

    for (tier, retention) in [
        ("local", &config.storage.local_retention),
        ("remote", &config.storage.remote_retention),
    ] {
        if retention.max_segments == 0 || retention.max_age_secs == 0 {
            anyhow::bail!("{} retention window must be positive", tier);
        }
        if retention.max_segments < config.transcoder.playlist_size as u64 {
            anyhow::bail!(
                "{} retention ({} segments) is shorter than the playlist window ({})",
                tier,
                retention.max_segments,
                config.transcoder.playlist_size
            );
        }
    }

    if config.storage.prune_interval_secs == 0 {
        anyhow::bail!("Prune interval cannot be 0");
    }

    if config.storage.remote_write_timeout_secs == 0 {
        anyhow::bail!("Remote write timeout cannot be 0");
    }

    if config.viewers.expiry_secs == 0 {
        anyhow::bail!("Viewer expiry cannot be 0");
    }

    if config.viewers.sweep_interval_secs == 0 {
        anyhow::bail!("Viewer sweep interval cannot be 0");
    }

    if config.server.admin_token.is_none() {
        tracing::warn!("No server.admin_token set; admin routes are disabled");
    }

    if !config.paths.offline_asset.exists() {
        tracing::warn!(
            "Offline asset does not exist, a generated slate will be used: {:?}",
            config.paths.offline_asset
        );
    }

    Ok(())
}
