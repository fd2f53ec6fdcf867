//! Per-identity duplicate suppression.
//!
//! State is process-local and lives for one detection session. A restart
//! forgets every timestamp, so the first sighting after a restart is always
//! emitted. Detection processes sharing a gallery do not share cooldowns.

use crate::types::IdentityId;
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashMap;

/// Default minimum spacing between two emissions for the same identity.
pub const DEFAULT_COOLDOWN_SECS: i64 = 300;

/// Last-emitted timestamp per identity.
#[derive(Debug, Clone)]
pub struct CooldownTracker {
    window: TimeDelta,
    last_emit: HashMap<IdentityId, DateTime<Utc>>,
}

impl CooldownTracker {
    pub fn new(window: TimeDelta) -> Self {
        Self {
            window,
            last_emit: HashMap::new(),
        }
    }

    pub fn window(&self) -> TimeDelta {
        self.window
    }

    /// True iff `identity` was never emitted or `now - last_emit >= window`.
    ///
    /// A `now` earlier than the recorded emission (clock stepped back) keeps
    /// the identity suppressed.
    pub fn should_emit(&self, identity: IdentityId, now: DateTime<Utc>) -> bool {
        match self.last_emit.get(&identity) {
            None => true,
            Some(last) => now.signed_duration_since(*last) >= self.window,
        }
    }

    /// Record a successful emission. Call only after the event log accepted it.
    pub fn record_emit(&mut self, identity: IdentityId, now: DateTime<Utc>) {
        self.last_emit.insert(identity, now);
    }

    /// Number of identities with a recorded emission.
    pub fn tracked(&self) -> usize {
        self.last_emit.len()
    }
}

impl Default for CooldownTracker {
    fn default() -> Self {
        Self::new(TimeDelta::seconds(DEFAULT_COOLDOWN_SECS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap() + TimeDelta::seconds(secs)
    }

    #[test]
    fn test_first_sighting_emits() {
        let tracker = CooldownTracker::default();
        assert!(tracker.should_emit(IdentityId(7), t(0)));
    }

    #[test]
    fn test_suppressed_inside_window() {
        let mut tracker = CooldownTracker::default();
        tracker.record_emit(IdentityId(7), t(0));

        for secs in [1, 100, 150, 299] {
            assert!(!tracker.should_emit(IdentityId(7), t(secs)), "t={secs}");
        }
        let just_before = t(300) - TimeDelta::milliseconds(1);
        assert!(!tracker.should_emit(IdentityId(7), just_before));
    }

    #[test]
    fn test_allowed_at_window_boundary() {
        let mut tracker = CooldownTracker::default();
        tracker.record_emit(IdentityId(7), t(0));
        assert!(tracker.should_emit(IdentityId(7), t(300)));
        assert!(tracker.should_emit(IdentityId(7), t(301)));
    }

    #[test]
    fn test_identities_are_independent() {
        let mut tracker = CooldownTracker::default();
        tracker.record_emit(IdentityId(7), t(0));
        assert!(tracker.should_emit(IdentityId(8), t(1)));
        assert_eq!(tracker.tracked(), 1);
    }

    #[test]
    fn test_clock_step_back_stays_suppressed() {
        let mut tracker = CooldownTracker::new(TimeDelta::seconds(60));
        tracker.record_emit(IdentityId(1), t(100));
        assert!(!tracker.should_emit(IdentityId(1), t(50)));
    }

    #[test]
    fn test_record_restarts_window() {
        let mut tracker = CooldownTracker::new(TimeDelta::seconds(60));
        tracker.record_emit(IdentityId(1), t(0));
        tracker.record_emit(IdentityId(1), t(60));
        assert!(!tracker.should_emit(IdentityId(1), t(100)));
        assert!(tracker.should_emit(IdentityId(1), t(120)));
    }
}
