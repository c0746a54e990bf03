//! Core enums shared between the transcoder, the segment pipeline and
//! storage.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Namespace tag for a transcode job.
///
/// At most one job per identifier runs at a time, and every artifact a job
/// produces carries the identifier in its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamIdentifier {
    /// Content from the connected broadcaster.
    Live,
    /// Looping filler shown while nobody is broadcasting.
    Offline,
}

impl StreamIdentifier {
    /// Lowercase tag used in file names and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamIdentifier::Live => "live",
            StreamIdentifier::Offline => "offline",
        }
    }
}

impl fmt::Display for StreamIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StreamIdentifier {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "live" => Ok(Self::Live),
            "offline" => Ok(Self::Offline),
            _ => Err(format!("Unknown stream identifier: {}", s)),
        }
    }
}

/// One physical storage tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageTier {
    /// Local disk, read directly by the HTTP delivery layer.
    Local,
    /// Remote object store.
    Remote,
}

impl fmt::Display for StorageTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageTier::Local => f.write_str("local"),
            StorageTier::Remote => f.write_str("remote"),
        }
    }
}

/// Where a segment should live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Placement {
    /// Local disk only.
    Local,
    /// Remote object store only.
    Remote,
    /// Both tiers.
    Both,
}

impl Placement {
    /// Whether this placement writes to `tier`.
    pub fn includes(&self, tier: StorageTier) -> bool {
        matches!(
            (self, tier),
            (Placement::Local, StorageTier::Local)
                | (Placement::Remote, StorageTier::Remote)
                | (Placement::Both, _)
        )
    }

    /// Build a placement from the set of tiers holding a copy.
    pub fn from_tiers(local: bool, remote: bool) -> Option<Self> {
        match (local, remote) {
            (true, true) => Some(Placement::Both),
            (true, false) => Some(Placement::Local),
            (false, true) => Some(Placement::Remote),
            (false, false) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_display_and_parse() {
        assert_eq!(StreamIdentifier::Live.to_string(), "live");
        assert_eq!(StreamIdentifier::Offline.to_string(), "offline");
        assert_eq!(
            "OFFLINE".parse::<StreamIdentifier>().unwrap(),
            StreamIdentifier::Offline
        );
        assert!("replay".parse::<StreamIdentifier>().is_err());
    }

    #[test]
    fn placement_includes() {
        assert!(Placement::Both.includes(StorageTier::Local));
        assert!(Placement::Both.includes(StorageTier::Remote));
        assert!(Placement::Local.includes(StorageTier::Local));
        assert!(!Placement::Local.includes(StorageTier::Remote));
        assert!(!Placement::Remote.includes(StorageTier::Local));
    }

    #[test]
    fn placement_from_tiers() {
        assert_eq!(Placement::from_tiers(true, true), Some(Placement::Both));
        assert_eq!(Placement::from_tiers(false, true), Some(Placement::Remote));
        assert_eq!(Placement::from_tiers(false, false), None);
    }
}
