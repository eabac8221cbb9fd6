//! Zone occupancy state machine.
//!
//! Two states, `UNOCCUPIED` and `OCCUPIED`, driven once per processed frame by
//! the number of target-class detections inside the zone:
//!
//! | from         | count | to           | effect                                 |
//! |--------------|-------|--------------|----------------------------------------|
//! | UNOCCUPIED   | > 0   | OCCUPIED     | episode starts at `now`                |
//! | OCCUPIED     | == 0  | UNOCCUPIED   | episode ends, alert guard cleared      |
//! | OCCUPIED     | > 0   | OCCUPIED     | none (dwell keeps accumulating)        |
//! | UNOCCUPIED   | == 0  | UNOCCUPIED   | none                                   |
//!
//! Frames that could not be analysed never reach the tracker: an unknown
//! frame neither extends nor ends an episode.

use std::time::{Duration, Instant};

/// Persistent occupancy value, owned by the single processing step.
///
/// Invariants hold by construction: the episode start exists iff the zone is
/// occupied, and the alert guard lives inside the episode so it is dropped
/// exactly when occupancy ends.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OccupancyState {
    episode: Option<Episode>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct Episode {
    started_at: Instant,
    last_alert_at: Option<Instant>,
    alerts_fired: u32,
}

impl OccupancyState {
    pub fn is_occupied(&self) -> bool {
        self.episode.is_some()
    }

    pub fn episode_start_time(&self) -> Option<Instant> {
        self.episode.as_ref().map(|e| e.started_at)
    }

    pub fn alert_fired_for_episode(&self) -> bool {
        self.episode.as_ref().is_some_and(|e| e.alerts_fired > 0)
    }

    /// Alerts fired so far in the current episode.
    pub fn alerts_fired(&self) -> u32 {
        self.episode.as_ref().map_or(0, |e| e.alerts_fired)
    }

    pub fn last_alert_at(&self) -> Option<Instant> {
        self.episode.as_ref().and_then(|e| e.last_alert_at)
    }

    /// Dwell of the current episode, `None` when the zone is unoccupied.
    pub fn current_dwell(&self, now: Instant) -> Option<Duration> {
        self.episode_start_time()
            .map(|start| now.saturating_duration_since(start))
    }

    /// Record a fired alert. No-op while unoccupied.
    pub(crate) fn mark_alert_fired(&mut self, now: Instant) {
        if let Some(episode) = self.episode.as_mut() {
            episode.last_alert_at = Some(now);
            episode.alerts_fired = episode.alerts_fired.saturating_add(1);
        }
    }
}

/// Summary of a completed occupancy episode.
///
/// Emitted for logging only; nothing downstream makes control decisions on it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EpisodeSummary {
    pub started_at: Instant,
    pub ended_at: Instant,
    pub elapsed: Duration,
    pub alerts_fired: u32,
}

/// State change observed while feeding a frame's count.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Transition {
    Started { at: Instant },
    Ended(EpisodeSummary),
}

#[derive(Debug, Default)]
pub struct OccupancyTracker {
    state: OccupancyState,
    episodes_completed: u64,
}

impl OccupancyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &OccupancyState {
        &self.state
    }

    pub(crate) fn state_mut(&mut self) -> &mut OccupancyState {
        &mut self.state
    }

    pub fn is_occupied(&self) -> bool {
        self.state.is_occupied()
    }

    pub fn episodes_completed(&self) -> u64 {
        self.episodes_completed
    }

    /// Dwell of the current episode; `None` is the "not occupied" sentinel.
    pub fn current_dwell(&self, now: Instant) -> Option<Duration> {
        self.state.current_dwell(now)
    }

    /// Feed one frame's in-zone count observed at `now`.
    pub fn update(&mut self, count: usize, now: Instant) -> Option<Transition> {
        match (self.state.episode.is_some(), count > 0) {
            (false, true) => {
                self.state.episode = Some(Episode {
                    started_at: now,
                    last_alert_at: None,
                    alerts_fired: 0,
                });
                Some(Transition::Started { at: now })
            }
            (true, false) => {
                let episode = self.state.episode.take()?;
                self.episodes_completed += 1;
                Some(Transition::Ended(EpisodeSummary {
                    started_at: episode.started_at,
                    ended_at: now,
                    elapsed: now.saturating_duration_since(episode.started_at),
                    alerts_fired: episode.alerts_fired,
                }))
            }
            _ => None,
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn at(base: Instant, ms: u64) -> Instant {
        base + Duration::from_millis(ms)
    }

    #[test]
    fn starts_unoccupied() {
        let tracker = OccupancyTracker::new();
        let state = tracker.state();
        assert!(!state.is_occupied());
        assert_eq!(state.episode_start_time(), None);
        assert!(!state.alert_fired_for_episode());
        assert_eq!(tracker.current_dwell(Instant::now()), None);
    }

    #[test]
    fn transitions_follow_the_table() {
        let t0 = Instant::now();
        let mut tracker = OccupancyTracker::new();

        assert_eq!(tracker.update(0, t0), None);
        assert_eq!(
            tracker.update(2, at(t0, 100)),
            Some(Transition::Started { at: at(t0, 100) })
        );
        assert_eq!(tracker.update(1, at(t0, 200)), None);
        assert_eq!(tracker.state().episode_start_time(), Some(at(t0, 100)));

        match tracker.update(0, at(t0, 1100)) {
            Some(Transition::Ended(summary)) => {
                assert_eq!(summary.elapsed, Duration::from_millis(1000));
                assert_eq!(summary.started_at, at(t0, 100));
                assert_eq!(summary.ended_at, at(t0, 1100));
            }
            other => panic!("expected episode end, got {:?}", other),
        }
        assert_eq!(tracker.update(0, at(t0, 1200)), None);
        assert_eq!(tracker.episodes_completed(), 1);
    }

    #[test]
    fn occupied_iff_last_count_nonzero() {
        let t0 = Instant::now();
        let counts = [0usize, 3, 0, 0, 1, 1, 2, 0, 5, 0, 0, 1];
        let mut tracker = OccupancyTracker::new();
        for (i, &count) in counts.iter().enumerate() {
            tracker.update(count, at(t0, i as u64 * 100));
            assert_eq!(tracker.is_occupied(), count > 0, "frame {}", i);
            assert_eq!(
                tracker.state().episode_start_time().is_some(),
                tracker.is_occupied()
            );
        }
    }

    #[test]
    fn one_end_per_maximal_run_with_run_span() {
        let t0 = Instant::now();
        // Runs of nonzero counts: frames 1..=3 and 6..=6, then 8..=9 (ends at 10).
        let counts = [0usize, 1, 1, 1, 0, 0, 4, 0, 2, 2, 0];
        let mut tracker = OccupancyTracker::new();
        let mut ended = Vec::new();
        for (i, &count) in counts.iter().enumerate() {
            if let Some(Transition::Ended(summary)) =
                tracker.update(count, at(t0, i as u64 * 250))
            {
                ended.push(summary.elapsed);
            }
        }
        assert_eq!(
            ended,
            vec![
                Duration::from_millis(750),
                Duration::from_millis(250),
                Duration::from_millis(500),
            ]
        );
    }

    #[test]
    fn current_dwell_measures_from_episode_start() {
        let t0 = Instant::now();
        let mut tracker = OccupancyTracker::new();
        tracker.update(1, t0);
        assert_eq!(
            tracker.current_dwell(at(t0, 4900)),
            Some(Duration::from_millis(4900))
        );
        tracker.update(0, at(t0, 5000));
        assert_eq!(tracker.current_dwell(at(t0, 6000)), None);
    }

    #[test]
    fn alert_guard_cleared_when_episode_ends() {
        let t0 = Instant::now();
        let mut tracker = OccupancyTracker::new();
        tracker.update(1, t0);
        tracker.state_mut().mark_alert_fired(at(t0, 6000));
        assert!(tracker.state().alert_fired_for_episode());

        match tracker.update(0, at(t0, 7000)) {
            Some(Transition::Ended(summary)) => assert_eq!(summary.alerts_fired, 1),
            other => panic!("expected episode end, got {:?}", other),
        }
        assert!(!tracker.state().alert_fired_for_episode());

        tracker.update(1, at(t0, 8000));
        assert!(!tracker.state().alert_fired_for_episode());
    }

    #[test]
    fn marking_alert_while_unoccupied_is_ignored() {
        let mut state = OccupancyState::default();
        state.mark_alert_fired(Instant::now());
        assert!(!state.alert_fired_for_episode());
        assert!(!state.is_occupied());
    }
}
