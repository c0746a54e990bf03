//! Filesystem watcher for a job's output directory.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};
use bytes::Bytes;
use castforge_common::JobId;
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{ArtifactEvent, ArtifactKind, ReceiverInput};
use crate::transcoder::{JobInfo, VARIANT_PLAYLIST};

/// Work out what a path under `output_dir` is.
///
/// Only `<variant>/<prefix>-*.ts` segments and `<variant>/stream.m3u8`
/// playlists count; temporary files and anything else are ignored.
pub fn classify(output_dir: &Path, prefix: &str, path: &Path) -> Option<(usize, String, ArtifactKind)> {
    let relative = path.strip_prefix(output_dir).ok()?;
    let mut parts = relative.components();
    let variant = parts.next()?.as_os_str().to_str()?.parse::<usize>().ok()?;
    let name = parts.next()?.as_os_str().to_str()?.to_string();
    if parts.next().is_some() {
        return None;
    }

    if name == VARIANT_PLAYLIST {
        return Some((variant, name, ArtifactKind::Playlist));
    }
    if name.ends_with(".ts") && name.starts_with(prefix) {
        return Some((variant, name, ArtifactKind::Segment));
    }
    None
}

/// Watches one job's output directory and forwards finished artifacts.
///
/// Dropping the watcher stops it.
pub struct ArtifactWatcher {
    _watcher: RecommendedWatcher,
    cancel: CancellationToken,
}

impl ArtifactWatcher {
    pub fn spawn(job: &JobInfo, inputs: mpsc::Sender<ReceiverInput>) -> Result<Self> {
        let output_dir = job.output_dir.clone();
        std::fs::create_dir_all(&output_dir)
            .with_context(|| format!("Failed to create output directory {:?}", output_dir))?;
        // Notification paths come back resolved.
        let output_dir = std::fs::canonicalize(&output_dir).unwrap_or(output_dir);

        let (path_tx, mut path_rx) = mpsc::channel::<PathBuf>(256);
        let mut watcher = RecommendedWatcher::new(
            move |res: std::result::Result<Event, notify::Error>| match res {
                Ok(event) => {
                    if event.kind.is_create() || event.kind.is_modify() {
                        for path in event.paths {
                            let _ = path_tx.blocking_send(path);
                        }
                    }
                }
                Err(e) => tracing::warn!("Output watcher error: {}", e),
            },
            Config::default(),
        )
        .context("Failed to create output watcher")?;

        watcher
            .watch(&output_dir, RecursiveMode::Recursive)
            .with_context(|| format!("Failed to watch {:?}", output_dir))?;
        tracing::debug!(job_id = %job.id, "Watching {:?}", output_dir);

        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let job_id = job.id;
        let prefix = job.segment_prefix();

        tokio::spawn(async move {
            for path in initial_scan(&output_dir).await {
                if !forward(job_id, &output_dir, &prefix, &path, &inputs).await {
                    return;
                }
            }

            loop {
                let path = tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    path = path_rx.recv() => match path {
                        Some(path) => path,
                        None => break,
                    },
                };
                if !forward(job_id, &output_dir, &prefix, &path, &inputs).await {
                    break;
                }
            }
            tracing::debug!(job_id = %job_id, "Output watcher stopped");
        });

        Ok(Self {
            _watcher: watcher,
            cancel,
        })
    }
}

impl Drop for ArtifactWatcher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Files already present when watching began, segments before playlists.
async fn initial_scan(output_dir: &Path) -> Vec<PathBuf> {
    let mut segments = Vec::new();
    let mut playlists = Vec::new();

    let Ok(mut variants) = tokio::fs::read_dir(output_dir).await else {
        return Vec::new();
    };
    while let Ok(Some(variant)) = variants.next_entry().await {
        let Ok(mut files) = tokio::fs::read_dir(variant.path()).await else {
            continue;
        };
        while let Ok(Some(file)) = files.next_entry().await {
            let path = file.path();
            if path.file_name().is_some_and(|n| n == VARIANT_PLAYLIST) {
                playlists.push(path);
            } else {
                segments.push(path);
            }
        }
    }

    segments.sort();
    segments.extend(playlists);
    segments
}

/// Read and forward one path. Returns `false` once the receiver is gone.
async fn forward(
    job: JobId,
    output_dir: &Path,
    prefix: &str,
    path: &Path,
    inputs: &mpsc::Sender<ReceiverInput>,
) -> bool {
    let Some((variant, name, kind)) = classify(output_dir, prefix, path) else {
        return true;
    };

    let data = match tokio::fs::read(path).await {
        Ok(data) => data,
        Err(e) if e.kind() == ErrorKind::NotFound => return true,
        Err(e) => {
            tracing::warn!("Failed to read {:?}: {}", path, e);
            return true;
        }
    };
    if data.is_empty() {
        // Created but not yet written.
        return true;
    }
    let written_at = tokio::fs::metadata(path)
        .await
        .and_then(|m| m.modified())
        .unwrap_or_else(|_| SystemTime::now());

    let event = ArtifactEvent {
        job,
        variant,
        name,
        kind,
        data: Bytes::from(data),
        written_at,
    };
    inputs.send(ReceiverInput::Artifact(event)).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use castforge_common::StreamIdentifier;
    use chrono::Utc;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn classify_paths() {
        let out = Path::new("/work/live");
        let prefix = "live-1a2b3c4d";

        assert_eq!(
            classify(out, prefix, &out.join("0/live-1a2b3c4d-00001.ts")),
            Some((0, "live-1a2b3c4d-00001.ts".to_string(), ArtifactKind::Segment))
        );
        assert_eq!(
            classify(out, prefix, &out.join("1/stream.m3u8")),
            Some((1, "stream.m3u8".to_string(), ArtifactKind::Playlist))
        );
        assert_eq!(classify(out, prefix, &out.join("0/stream.m3u8.tmp")), None);
        assert_eq!(classify(out, prefix, &out.join("0/live-1a2b3c4d-00001.ts.tmp")), None);
        assert_eq!(classify(out, prefix, &out.join("0/live-ffffffff-00001.ts")), None);
        assert_eq!(classify(out, prefix, &out.join("stream.m3u8")), None);
        assert_eq!(classify(out, prefix, Path::new("/elsewhere/0/stream.m3u8")), None);
    }

    #[tokio::test]
    async fn forwards_existing_and_new_files() {
        let dir = TempDir::new().unwrap();
        let job = JobInfo {
            id: JobId::new(),
            identifier: StreamIdentifier::Offline,
            input: "generated".to_string(),
            output_dir: dir.path().to_path_buf(),
            started_at: Utc::now(),
        };
        let prefix = job.segment_prefix();
        std::fs::create_dir_all(dir.path().join("0")).unwrap();
        std::fs::write(dir.path().join("0").join(format!("{}-00000.ts", prefix)), b"a").unwrap();

        let (tx, mut rx) = mpsc::channel(16);
        let _watcher = ArtifactWatcher::spawn(&job, tx).unwrap();

        let first = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match first {
            ReceiverInput::Artifact(event) => {
                assert_eq!(event.kind, ArtifactKind::Segment);
                assert_eq!(event.variant, 0);
                assert_eq!(&event.data[..], b"a");
            }
            other => panic!("unexpected input: {:?}", other),
        }

        std::fs::write(dir.path().join("0").join("stream.m3u8"), b"#EXTM3U\n").unwrap();
        loop {
            let input = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .unwrap()
                .unwrap();
            if let ReceiverInput::Artifact(event) = input {
                if event.kind == ArtifactKind::Playlist {
                    break;
                }
            }
        }
    }
}
