//! Segment catalog shared by the receiver and the pruner.
//!
//! One [`Track`] per job and variant holds segments in arrival order. The
//! store also remembers which segments the currently published playlist of
//! each variant references; those are pinned and never pruned.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::{Duration, SystemTime};

use castforge_common::{JobId, Placement, StorageTier};
use castforge_media::SegmentEntry;
use parking_lot::Mutex;

use super::RoutingPolicy;

/// One media chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub job: JobId,
    pub variant: usize,
    /// Arrival order within the track, starting at 0.
    pub sequence: u64,
    pub name: String,
    pub written_at: SystemTime,
    /// Seconds, known once a published playlist lists the segment.
    pub duration: Option<f64>,
    /// Tiers holding a copy; `None` until routing finishes.
    pub placement: Option<Placement>,
}

impl Segment {
    /// Storage path, relative to a tier's root.
    pub fn key(&self) -> String {
        segment_key(self.variant, &self.name)
    }

    pub fn age(&self, now: SystemTime) -> Duration {
        now.duration_since(self.written_at).unwrap_or_default()
    }
}

pub fn segment_key(variant: usize, name: &str) -> String {
    format!("{}/{}", variant, name)
}

/// File name a playlist entry points at.
pub fn entry_name(entry: &SegmentEntry) -> &str {
    entry.uri.rsplit('/').next().unwrap_or(&entry.uri)
}

/// Segments of one job and variant.
#[derive(Debug, Default)]
pub struct Track {
    next_sequence: u64,
    segments: BTreeMap<u64, Segment>,
    by_name: HashMap<String, u64>,
    ended: bool,
}

impl Track {
    pub fn newest_sequence(&self) -> Option<u64> {
        self.next_sequence.checked_sub(1)
    }

    pub fn get(&self, name: &str) -> Option<&Segment> {
        self.by_name.get(name).and_then(|seq| self.segments.get(seq))
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

/// A published media playlist revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Revision {
    pub media_sequence: u64,
    pub segments: usize,
}

#[derive(Debug, Clone)]
struct Published {
    job: JobId,
    revision: Revision,
}

#[derive(Default)]
struct Inner {
    tracks: HashMap<(JobId, usize), Track>,
    pinned: HashMap<usize, HashSet<String>>,
    published: HashMap<usize, Published>,
}

/// A tier copy the pruner removed from the catalog and must now delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expired {
    pub tier: StorageTier,
    pub key: String,
}

#[derive(Default)]
pub struct SegmentStore {
    inner: Mutex<Inner>,
}

impl SegmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a newly observed segment. Returns `None` for a name the track
    /// already holds.
    pub fn append(
        &self,
        job: JobId,
        variant: usize,
        name: &str,
        written_at: SystemTime,
    ) -> Option<Segment> {
        let mut inner = self.inner.lock();
        let track = inner.tracks.entry((job, variant)).or_default();
        if track.by_name.contains_key(name) {
            return None;
        }

        let sequence = track.next_sequence;
        track.next_sequence += 1;
        let segment = Segment {
            job,
            variant,
            sequence,
            name: name.to_string(),
            written_at,
            duration: None,
            placement: None,
        };
        track.by_name.insert(segment.name.clone(), sequence);
        track.segments.insert(sequence, segment.clone());
        Some(segment)
    }

    /// Record where a segment ended up. `None` drops the record.
    pub fn mark_routed(&self, job: JobId, variant: usize, sequence: u64, placement: Option<Placement>) {
        let mut inner = self.inner.lock();
        let Some(track) = inner.tracks.get_mut(&(job, variant)) else {
            return;
        };
        match placement {
            Some(placement) => {
                if let Some(segment) = track.segments.get_mut(&sequence) {
                    segment.placement = Some(placement);
                }
            }
            None => {
                if let Some(segment) = track.segments.remove(&sequence) {
                    track.by_name.remove(&segment.name);
                }
            }
        }
    }

    /// Placement of a routed segment.
    pub fn routed(&self, job: JobId, variant: usize, name: &str) -> Option<Placement> {
        let inner = self.inner.lock();
        inner
            .tracks
            .get(&(job, variant))
            .and_then(|track| track.get(name))
            .and_then(|segment| segment.placement)
    }

    pub fn segment(&self, job: JobId, variant: usize, name: &str) -> Option<Segment> {
        let inner = self.inner.lock();
        inner
            .tracks
            .get(&(job, variant))
            .and_then(|track| track.get(name))
            .cloned()
    }

    /// Segments of a track in sequence order.
    pub fn segments(&self, job: JobId, variant: usize) -> Vec<Segment> {
        let inner = self.inner.lock();
        inner
            .tracks
            .get(&(job, variant))
            .map(|track| track.segments.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Current published revision for `variant`, if it belongs to `job`.
    pub fn published_revision(&self, job: JobId, variant: usize) -> Option<Revision> {
        let inner = self.inner.lock();
        inner
            .published
            .get(&variant)
            .filter(|published| published.job == job)
            .map(|published| published.revision)
    }

    /// Pin `names` ahead of publishing, on top of what is already pinned.
    pub fn pin(&self, variant: usize, names: &[String]) {
        let mut inner = self.inner.lock();
        inner
            .pinned
            .entry(variant)
            .or_default()
            .extend(names.iter().cloned());
    }

    /// The playlist listing exactly `entries` is now visible.
    pub fn set_published(
        &self,
        job: JobId,
        variant: usize,
        revision: Revision,
        entries: &[SegmentEntry],
    ) {
        let mut inner = self.inner.lock();
        if let Some(track) = inner.tracks.get_mut(&(job, variant)) {
            for entry in entries {
                let seq = track.by_name.get(entry_name(entry)).copied();
                if let Some(segment) = seq.and_then(|seq| track.segments.get_mut(&seq)) {
                    segment.duration = Some(entry.duration);
                }
            }
        }
        let names = entries.iter().map(|e| entry_name(e).to_string()).collect();
        inner.pinned.insert(variant, names);
        inner.published.insert(variant, Published { job, revision });
    }

    pub fn is_pinned(&self, variant: usize, name: &str) -> bool {
        let inner = self.inner.lock();
        inner
            .pinned
            .get(&variant)
            .is_some_and(|names| names.contains(name))
    }

    /// No more segments will arrive for `job`.
    pub fn end_job(&self, job: JobId) {
        let mut inner = self.inner.lock();
        for ((track_job, _), track) in inner.tracks.iter_mut() {
            if *track_job == job {
                track.ended = true;
            }
        }
    }

    /// Strip every expired, unpinned tier copy from the catalog and return
    /// what to delete. Records left on no tier are dropped, as are ended
    /// tracks that are empty.
    pub fn take_expired(&self, policy: &RoutingPolicy, now: SystemTime) -> Vec<Expired> {
        let mut inner = self.inner.lock();
        let Inner { tracks, pinned, .. } = &mut *inner;
        let mut expired = Vec::new();

        for ((_, variant), track) in tracks.iter_mut() {
            let Some(newest) = track.newest_sequence() else {
                continue;
            };
            let pins = pinned.get(variant);
            let mut emptied = Vec::new();

            for (sequence, segment) in track.segments.iter_mut() {
                let Some(placement) = segment.placement else {
                    continue;
                };
                if pins.is_some_and(|names| names.contains(&segment.name)) {
                    continue;
                }

                let age = segment.age(now);
                let mut local = placement.includes(StorageTier::Local);
                let mut remote = placement.includes(StorageTier::Remote);

                for tier in [StorageTier::Local, StorageTier::Remote] {
                    let held = match tier {
                        StorageTier::Local => &mut local,
                        StorageTier::Remote => &mut remote,
                    };
                    if *held && policy.expired(tier, *sequence, newest, age) {
                        *held = false;
                        expired.push(Expired {
                            tier,
                            key: segment.key(),
                        });
                    }
                }

                match Placement::from_tiers(local, remote) {
                    Some(remaining) => segment.placement = Some(remaining),
                    None => emptied.push(*sequence),
                }
            }

            for sequence in emptied {
                if let Some(segment) = track.segments.remove(&sequence) {
                    track.by_name.remove(&segment.name);
                }
            }
        }

        tracks.retain(|_, track| !(track.ended && track.is_empty()));
        expired
    }

    /// Number of tracks held, ended or not.
    pub fn track_count(&self) -> usize {
        self.inner.lock().tracks.len()
    }
}
