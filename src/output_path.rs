//! Output path resolution
//!
//! An engine mentions several paths while it works: the file it is
//! downloading into (often a per-stream temporary like `video.f137.mp4`), the
//! path in its final metadata, and the destination of each postprocessing
//! step (merge, audio extraction, remux). Only the last kind reliably names
//! the file that ends up on disk after transcoding.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Where a path hint came from, ordered by how much it can be trusted
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HintOrigin {
    /// Filename from a progress callback during the transfer
    IntermediateDownload,
    /// Path from the engine's completion metadata
    FinalMetadata,
    /// Destination reported by a postprocessing step
    Postprocessing,
}

/// A candidate output path
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathHint {
    /// Candidate path
    pub path: PathBuf,
    /// Source of the candidate
    pub origin: HintOrigin,
}

impl PathHint {
    /// Create a hint
    pub fn new(path: impl Into<PathBuf>, origin: HintOrigin) -> Self {
        Self {
            path: path.into(),
            origin,
        }
    }
}

/// Result of [`resolve`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolved {
    /// Chosen path
    pub path: PathBuf,
    /// Origin of the chosen hint
    pub origin: HintOrigin,
}

impl Resolved {
    /// True when the path comes from final metadata or postprocessing
    pub fn is_authoritative(&self) -> bool {
        self.origin >= HintOrigin::FinalMetadata
    }
}

/// Pick the most trustworthy hint
///
/// The highest-precedence origin wins; among hints of the same origin the
/// later one wins. Returns `None` for an empty slice.
pub fn resolve(hints: &[PathHint]) -> Option<Resolved> {
    let mut best: Option<&PathHint> = None;
    for hint in hints {
        if best.is_none_or(|b| hint.origin >= b.origin) {
            best = Some(hint);
        }
    }
    best.map(|h| Resolved {
        path: h.path.clone(),
        origin: h.origin,
    })
}

/// Incremental form of [`resolve`], fed one hint at a time during a session
#[derive(Clone, Debug, Default)]
pub struct PathTracker {
    best: Option<Resolved>,
    last_intermediate: Option<PathBuf>,
}

impl PathTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a hint. Empty paths are ignored.
    pub fn record(&mut self, path: impl Into<PathBuf>, origin: HintOrigin) {
        let path = path.into();
        if path.as_os_str().is_empty() {
            return;
        }
        if origin == HintOrigin::IntermediateDownload {
            self.last_intermediate = Some(path.clone());
        }
        if self.best.as_ref().is_none_or(|b| origin >= b.origin) {
            self.best = Some(Resolved { path, origin });
        }
    }

    /// Current best hint of any origin
    pub fn resolved(&self) -> Option<&Resolved> {
        self.best.as_ref()
    }

    /// Current best hint if it is authoritative, i.e. usable as the final path
    pub fn authoritative(&self) -> Option<&Resolved> {
        self.best.as_ref().filter(|r| r.is_authoritative())
    }

    /// Most recent intermediate download path
    pub fn last_intermediate(&self) -> Option<&PathBuf> {
        self.last_intermediate.as_ref()
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn hint(path: &str, origin: HintOrigin) -> PathHint {
        PathHint::new(path, origin)
    }

    #[test]
    fn empty_is_unresolved() {
        assert_eq!(resolve(&[]), None);
    }

    #[test]
    fn postprocessing_beats_intermediate_in_any_order() {
        let a = hint("/d/v.f137.mp4", HintOrigin::IntermediateDownload);
        let b = hint("/d/v.mp4", HintOrigin::Postprocessing);

        let forward = resolve(&[a.clone(), b.clone()]).unwrap();
        let backward = resolve(&[b, a]).unwrap();
        assert_eq!(forward, backward);
        assert_eq!(forward.path, PathBuf::from("/d/v.mp4"));
        assert_eq!(forward.origin, HintOrigin::Postprocessing);
    }

    #[test]
    fn transcoded_file_replaces_partial_download() {
        let part = hint("/tmp/part.webm.part", HintOrigin::IntermediateDownload);
        let fin = hint("/tmp/final.mp4", HintOrigin::Postprocessing);
        assert_eq!(
            resolve(&[part.clone(), fin.clone()]).unwrap().path,
            PathBuf::from("/tmp/final.mp4")
        );
        assert_eq!(
            resolve(&[part.clone(), fin.clone()]),
            resolve(&[fin, part])
        );
    }

    #[test]
    fn later_hint_wins_within_a_tier() {
        let resolved = resolve(&[
            hint("/d/v.temp.mp4", HintOrigin::Postprocessing),
            hint("/d/v.f1.mp4", HintOrigin::IntermediateDownload),
            hint("/d/v.mp3", HintOrigin::Postprocessing),
        ])
        .unwrap();
        assert_eq!(resolved.path, PathBuf::from("/d/v.mp3"));
    }

    #[test]
    fn metadata_beats_intermediate_but_not_postprocessing() {
        let resolved = resolve(&[
            hint("/d/v.mkv", HintOrigin::FinalMetadata),
            hint("/d/v.f1.webm", HintOrigin::IntermediateDownload),
        ])
        .unwrap();
        assert_eq!(resolved.origin, HintOrigin::FinalMetadata);

        let resolved = resolve(&[
            hint("/d/v.mp3", HintOrigin::Postprocessing),
            hint("/d/v.webm", HintOrigin::FinalMetadata),
        ])
        .unwrap();
        assert_eq!(resolved.path, PathBuf::from("/d/v.mp3"));
    }

    #[test]
    fn tracker_matches_resolve() {
        let hints = [
            hint("/d/a.f1.mp4", HintOrigin::IntermediateDownload),
            hint("/d/a.mp4", HintOrigin::Postprocessing),
            hint("/d/a.f2.m4a", HintOrigin::IntermediateDownload),
        ];
        let mut tracker = PathTracker::new();
        for h in &hints {
            tracker.record(h.path.clone(), h.origin);
        }
        assert_eq!(tracker.resolved(), resolve(&hints).as_ref());
        assert_eq!(
            tracker.last_intermediate(),
            Some(&PathBuf::from("/d/a.f2.m4a"))
        );
    }

    #[test]
    fn intermediate_only_is_not_authoritative() {
        let mut tracker = PathTracker::new();
        tracker.record("/d/a.f1.mp4", HintOrigin::IntermediateDownload);
        assert!(tracker.resolved().is_some());
        assert!(tracker.authoritative().is_none());

        tracker.record("", HintOrigin::FinalMetadata);
        assert!(tracker.authoritative().is_none());

        tracker.record("/d/a.mp4", HintOrigin::FinalMetadata);
        assert_eq!(
            tracker.authoritative().map(|r| r.path.clone()),
            Some(PathBuf::from("/d/a.mp4"))
        );
    }
}
