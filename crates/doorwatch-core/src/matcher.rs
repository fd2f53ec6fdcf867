//! Nearest-neighbor classification of a probe encoding against the gallery.
//!
//! Linear scan, O(N) per probe. Fine for tens to low hundreds of identities;
//! an indexed nearest-neighbor structure would slot in behind [`Matcher`].

use crate::types::{Embedding, Identity, MatchResult};

/// Default maximum accepted distance. Lower is stricter.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;

/// Strategy for comparing a probe embedding against a gallery of known identities.
pub trait Matcher {
    fn compare(&self, probe: &Embedding, gallery: &[Identity], threshold: f32) -> MatchResult;
}

/// Euclidean-distance matcher.
///
/// The identity at minimum distance wins. Entries at exactly the same minimum
/// distance resolve to the lowest identity id, independent of gallery order.
/// A match is accepted iff `distance <= threshold`.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn compare(&self, probe: &Embedding, gallery: &[Identity], threshold: f32) -> MatchResult {
        let mut best_dist = f32::INFINITY;
        let mut best: Option<&Identity> = None;

        for identity in gallery {
            let dist = probe.euclidean_distance(&identity.encoding);
            // NaN never compares, so a poisoned entry can't win.
            let better = match best {
                None => dist <= best_dist,
                Some(prev) => dist < best_dist || (dist == best_dist && identity.id < prev.id),
            };
            if better {
                best_dist = dist;
                best = Some(identity);
            }
        }

        let identity = best
            .filter(|_| best_dist <= threshold)
            .map(|i| (i.id, i.name.clone()));

        MatchResult {
            identity,
            distance: best_dist,
            confidence: 1.0 - best_dist,
        }
    }
}
