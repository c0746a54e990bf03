//! Segment pipeline: from transcoder output to published HLS.
//!
//! The [`ArtifactWatcher`] turns filesystem notifications in a job's private
//! output directory into [`ReceiverInput`] messages. The [`SegmentReceiver`]
//! catalogs segments, routes each one to the storage tiers picked by the
//! [`RoutingPolicy`], and publishes a media playlist only once every segment
//! it lists has been written. The [`Pruner`] trims each tier independently.

mod catalog;
mod policy;
mod pruner;
mod receiver;
mod watcher;

pub use catalog::{entry_name, segment_key, Expired, Revision, Segment, SegmentStore};
pub use policy::RoutingPolicy;
pub use pruner::Pruner;
pub use receiver::{master_playlist, SegmentReceiver, MASTER_PLAYLIST};
pub use watcher::{classify, ArtifactWatcher};

use std::time::SystemTime;

use bytes::Bytes;
use castforge_common::JobId;

use crate::transcoder::JobInfo;

/// What kind of file the transcoder produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Segment,
    Playlist,
}

/// A file the transcoder finished writing.
#[derive(Debug, Clone)]
pub struct ArtifactEvent {
    pub job: JobId,
    pub variant: usize,
    /// File name within the variant directory.
    pub name: String,
    pub kind: ArtifactKind,
    pub data: Bytes,
    pub written_at: SystemTime,
}

impl ArtifactEvent {
    pub fn segment(job: JobId, variant: usize, name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            job,
            variant,
            name: name.into(),
            kind: ArtifactKind::Segment,
            data: data.into(),
            written_at: SystemTime::now(),
        }
    }

    pub fn playlist(job: JobId, variant: usize, text: impl Into<String>) -> Self {
        Self {
            job,
            variant,
            name: crate::transcoder::VARIANT_PLAYLIST.to_string(),
            kind: ArtifactKind::Playlist,
            data: Bytes::from(text.into()),
            written_at: SystemTime::now(),
        }
    }

    pub fn written_at(mut self, written_at: SystemTime) -> Self {
        self.written_at = written_at;
        self
    }
}

/// Messages consumed by the [`SegmentReceiver`].
#[derive(Debug)]
pub enum ReceiverInput {
    JobStarted(JobInfo),
    Artifact(ArtifactEvent),
    JobEnded(JobId),
}
