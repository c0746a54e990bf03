//! Routes transcoder artifacts to storage and publishes playlists.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use castforge_common::{Error, JobId, Placement, Result, StorageTier};
use castforge_media::hls::StreamInfo;
use castforge_media::{MasterPlaylist, MediaPlaylist};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::catalog::{entry_name, Revision, Segment, SegmentStore};
use super::{ArtifactEvent, ArtifactKind, ReceiverInput, RoutingPolicy};
use crate::config::VariantConfig;
use crate::state::{EventBus, EventPayload};
use crate::storage::StorageTiers;
use crate::transcoder::{JobInfo, VARIANT_PLAYLIST};

/// Name of the master playlist at the root of the local tier.
pub const MASTER_PLAYLIST: &str = "stream.m3u8";

const CODECS: &str = "avc1.64001f,mp4a.40.2";

/// Bound on one remote write unless configured otherwise.
pub const DEFAULT_REMOTE_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Master playlist pointing at each variant's media playlist.
pub fn master_playlist(variants: &[VariantConfig]) -> MasterPlaylist {
    variants
        .iter()
        .enumerate()
        .fold(MasterPlaylist::new(), |master, (i, variant)| {
            master.add_stream(StreamInfo {
                uri: format!("{}/{}", i, VARIANT_PLAYLIST),
                bandwidth: variant.bandwidth(),
                resolution: variant.scaled_width.zip(variant.scaled_height),
                codecs: CODECS.to_string(),
                frame_rate: Some(f64::from(variant.framerate)),
            })
        })
}

/// Owns the segment pipeline of every running job.
///
/// Fed one [`ReceiverInput`] at a time, either by [`SegmentReceiver::spawn`]
/// or directly through [`SegmentReceiver::handle`].
pub struct SegmentReceiver {
    tiers: StorageTiers,
    policy: RoutingPolicy,
    store: Arc<SegmentStore>,
    events: Arc<EventBus>,
    public_url: Option<String>,
    variants: Vec<VariantConfig>,
    remote_timeout: Duration,
    active: HashSet<JobId>,
    /// Newest playlist per job and variant still waiting for its segments.
    pending: HashMap<(JobId, usize), MediaPlaylist>,
}

impl SegmentReceiver {
    pub fn new(
        tiers: StorageTiers,
        policy: RoutingPolicy,
        store: Arc<SegmentStore>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            tiers,
            policy,
            store,
            events,
            public_url: None,
            variants: vec![VariantConfig::default()],
            remote_timeout: DEFAULT_REMOTE_WRITE_TIMEOUT,
            active: HashSet::new(),
            pending: HashMap::new(),
        }
    }

    /// Base URL remote-only segments are served from.
    pub fn with_public_url(mut self, public_url: Option<String>) -> Self {
        self.public_url = public_url.map(|url| url.trim_end_matches('/').to_string());
        self
    }

    pub fn with_variants(mut self, variants: Vec<VariantConfig>) -> Self {
        self.variants = variants;
        self
    }

    /// Give up on a remote write after `timeout`; the segment then stays local.
    pub fn with_remote_timeout(mut self, timeout: Duration) -> Self {
        self.remote_timeout = timeout;
        self
    }

    pub fn store(&self) -> &Arc<SegmentStore> {
        &self.store
    }

    /// Process inputs until the channel closes or `cancel` fires.
    pub fn spawn(
        mut self,
        mut inputs: mpsc::Receiver<ReceiverInput>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let input = tokio::select! {
                    _ = cancel.cancelled() => break,
                    input = inputs.recv() => match input {
                        Some(input) => input,
                        None => break,
                    },
                };

                if let Err(e) = self.handle(input).await {
                    tracing::error!("Segment pipeline error: {}", e);
                }
            }
            tracing::debug!("Segment receiver stopped");
        })
    }

    pub async fn handle(&mut self, input: ReceiverInput) -> Result<()> {
        match input {
            ReceiverInput::JobStarted(job) => self.job_started(job).await,
            ReceiverInput::JobEnded(job) => {
                self.active.remove(&job);
                self.pending.retain(|(pending_job, _), _| *pending_job != job);
                self.store.end_job(job);
                Ok(())
            }
            ReceiverInput::Artifact(artifact) => {
                if !self.active.contains(&artifact.job) {
                    tracing::trace!(job_id = %artifact.job, name = %artifact.name, "Artifact for inactive job ignored");
                    return Ok(());
                }
                if artifact.variant >= self.variants.len() {
                    tracing::warn!(variant = artifact.variant, name = %artifact.name, "Artifact for unknown variant ignored");
                    return Ok(());
                }
                match artifact.kind {
                    ArtifactKind::Segment => self.on_segment(artifact).await,
                    ArtifactKind::Playlist => self.on_playlist(artifact).await,
                }
            }
        }
    }

    async fn job_started(&mut self, job: JobInfo) -> Result<()> {
        tracing::debug!(job_id = %job.id, identifier = %job.identifier, "Receiving segments");
        self.active.insert(job.id);

        let master = master_playlist(&self.variants).render();
        self.write_local(job.id, MASTER_PLAYLIST, Bytes::from(master))
            .await
    }

    async fn on_segment(&mut self, artifact: ArtifactEvent) -> Result<()> {
        let ArtifactEvent {
            job,
            variant,
            name,
            data,
            written_at,
            ..
        } = artifact;

        let Some(segment) = self.store.append(job, variant, &name, written_at) else {
            tracing::trace!(name = %name, "Segment already cataloged");
            return Ok(());
        };

        let placement = match self.route(&segment, data).await {
            Ok(placement) => placement,
            Err(e) => {
                self.store.mark_routed(job, variant, segment.sequence, None);
                return Err(e);
            }
        };
        self.store
            .mark_routed(job, variant, segment.sequence, Some(placement));
        tracing::trace!(name = %name, sequence = segment.sequence, placement = ?placement, "Segment routed");

        self.try_publish(job, variant).await
    }

    /// Write `segment` to its tiers and report where it actually landed.
    async fn route(&mut self, segment: &Segment, data: Bytes) -> Result<Placement> {
        let wanted = self.policy.place(segment.age(SystemTime::now()));
        let key = segment.key();

        let mut local = false;
        if wanted.includes(StorageTier::Local) {
            self.write_local(segment.job, &key, data.clone()).await?;
            local = true;
        }

        let mut remote = false;
        if wanted.includes(StorageTier::Remote) {
            remote = self.write_remote(segment.job, &key, data.clone()).await;
            if !remote && !local {
                tracing::info!(path = %key, "Keeping segment on local tier instead");
                self.write_local(segment.job, &key, data).await?;
                local = true;
            }
        }

        Ok(Placement::from_tiers(local, remote).unwrap_or(Placement::Local))
    }

    async fn on_playlist(&mut self, artifact: ArtifactEvent) -> Result<()> {
        let job = artifact.job;
        let variant = artifact.variant;

        let text = match std::str::from_utf8(&artifact.data) {
            Ok(text) => text,
            Err(_) => {
                tracing::warn!(job_id = %job, variant, "Playlist is not UTF-8; skipped");
                return Ok(());
            }
        };
        let playlist = match MediaPlaylist::parse(text) {
            Ok(playlist) => playlist,
            Err(e) => {
                tracing::warn!(job_id = %job, variant, "Unreadable playlist skipped: {}", e);
                return Ok(());
            }
        };

        let revision = revision_of(&playlist);
        if self
            .store
            .published_revision(job, variant)
            .is_some_and(|published| revision <= published)
        {
            tracing::trace!(job_id = %job, variant, "Stale playlist revision ignored");
            return Ok(());
        }
        if self
            .pending
            .get(&(job, variant))
            .is_some_and(|pending| revision < revision_of(pending))
        {
            return Ok(());
        }

        self.pending.insert((job, variant), playlist);
        self.try_publish(job, variant).await
    }

    /// Publish the pending playlist of a track once all its segments are
    /// routed.
    async fn try_publish(&mut self, job: JobId, variant: usize) -> Result<()> {
        let Some(playlist) = self.pending.get(&(job, variant)) else {
            return Ok(());
        };

        let mut placements = Vec::with_capacity(playlist.segments.len());
        for entry in &playlist.segments {
            match self.store.routed(job, variant, entry_name(entry)) {
                Some(placement) => placements.push(placement),
                None => return Ok(()),
            }
        }

        let Some(playlist) = self.pending.remove(&(job, variant)) else {
            return Ok(());
        };
        let revision = revision_of(&playlist);
        let names: Vec<String> = playlist
            .segments
            .iter()
            .map(|entry| entry_name(entry).to_string())
            .collect();

        let mut visible = playlist.clone();
        for ((entry, name), placement) in visible.segments.iter_mut().zip(&names).zip(&placements) {
            entry.uri = self.public_uri(variant, name, *placement);
        }

        self.store.pin(variant, &names);
        let key = format!("{}/{}", variant, VARIANT_PLAYLIST);
        self.write_local(job, &key, Bytes::from(visible.render()))
            .await?;
        self.store
            .set_published(job, variant, revision, &playlist.segments);

        tracing::debug!(
            job_id = %job,
            variant,
            media_sequence = revision.media_sequence,
            segments = revision.segments,
            "Playlist published"
        );
        self.events.broadcast(EventPayload::PlaylistPublished {
            job_id: job,
            variant,
            media_sequence: revision.media_sequence,
            segments: revision.segments,
        });
        Ok(())
    }

    fn public_uri(&self, variant: usize, name: &str, placement: Placement) -> String {
        match (&self.public_url, placement) {
            (Some(base), Placement::Remote) => format!("{}/{}/{}", base, variant, name),
            _ => name.to_string(),
        }
    }

    /// Local writes have no fallback: a failure ends the job's pipeline.
    async fn write_local(&mut self, job: JobId, path: &str, data: Bytes) -> Result<()> {
        match self.tiers.local.write(path, data).await {
            Ok(()) => {
                self.tiers.stats.record_write(StorageTier::Local);
                Ok(())
            }
            Err(e) => {
                self.tiers.stats.record_write_failure(StorageTier::Local);
                let e = match e {
                    e @ Error::StorageWriteFailed { .. } => e,
                    other => Error::storage_write(StorageTier::Local, path, other),
                };
                tracing::error!(job_id = %job, path = %path, "Local write failed; stopping segment pipeline: {}", e);
                self.active.remove(&job);
                self.pending.retain(|(pending_job, _), _| *pending_job != job);
                self.events.broadcast(EventPayload::PipelineFailed {
                    job_id: job,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Remote writes are best effort. Returns whether the copy landed.
    async fn write_remote(&self, job: JobId, path: &str, data: Bytes) -> bool {
        let Some(remote) = &self.tiers.remote else {
            return false;
        };

        let written = match tokio::time::timeout(self.remote_timeout, remote.write(path, data)).await {
            Ok(result) => result,
            Err(_) => Err(Error::storage_write(
                StorageTier::Remote,
                path,
                format!("timed out after {:?}", self.remote_timeout),
            )),
        };

        match written {
            Ok(()) => {
                self.tiers.stats.record_write(StorageTier::Remote);
                true
            }
            Err(e) => {
                self.tiers.stats.record_write_failure(StorageTier::Remote);
                tracing::warn!(job_id = %job, path = %path, "Remote write failed: {}", e);
                self.events.broadcast(EventPayload::SegmentRemoteWriteFailed {
                    job_id: job,
                    path: path.to_string(),
                    error: e.to_string(),
                });
                false
            }
        }
    }
}

fn revision_of(playlist: &MediaPlaylist) -> Revision {
    Revision {
        media_sequence: playlist.media_sequence,
        segments: playlist.segments.len(),
    }
}
