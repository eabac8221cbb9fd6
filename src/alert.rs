//! Dwell alert debouncing.
//!
//! An alert fires when the current episode's dwell strictly exceeds the
//! threshold and the episode has not fired yet. The guard lives in
//! `OccupancyState` and is only cleared when the episode ends, so flickering
//! occupancy restarts the timer from zero and never carries dwell over.
//!
//! `repeat_after` optionally re-arms within one long episode: a further alert
//! fires once that much time has passed since the previous one.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::occupancy::OccupancyState;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AlertPolicy {
    pub threshold: Duration,
    pub repeat_after: Option<Duration>,
}

impl AlertPolicy {
    pub fn once_after(threshold: Duration) -> Self {
        Self {
            threshold,
            repeat_after: None,
        }
    }

    pub fn with_repeat(mut self, every: Duration) -> Self {
        self.repeat_after = Some(every);
        self
    }
}

#[derive(Clone, Debug)]
pub struct AlertDebouncer {
    policy: AlertPolicy,
}

impl AlertDebouncer {
    pub fn new(policy: AlertPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> AlertPolicy {
        self.policy
    }

    /// Decide whether to fire for this frame. Marks the episode when it does.
    ///
    /// Pure decision plus state update; delivering the alert is the caller's job.
    pub fn should_fire(&self, state: &mut OccupancyState, now: Instant) -> bool {
        let Some(dwell) = state.current_dwell(now) else {
            return false;
        };
        if dwell <= self.policy.threshold {
            return false;
        }
        let fire = match (state.last_alert_at(), self.policy.repeat_after) {
            (None, _) => true,
            (Some(last), Some(every)) => now.saturating_duration_since(last) >= every,
            (Some(_), None) => false,
        };
        if fire {
            state.mark_alert_fired(now);
        }
        fire
    }
}

/// Alert handed to the notification transport.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Alert {
    /// Identifier of the monitored stream (defaults to the source address).
    pub context: String,
    /// Human label of the tracked class.
    pub label: String,
    /// Objects inside the zone on the firing frame.
    pub occupancy: usize,
    pub dwell_ms: u64,
    /// 1 for the first alert of an episode, then 2, 3, ... when re-arming is on.
    pub ordinal: u32,
    pub raised_at_epoch_s: u64,
}

impl Alert {
    pub fn new(context: &str, label: &str, occupancy: usize, dwell: Duration, ordinal: u32) -> Self {
        let raised_at_epoch_s = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self {
            context: context.to_string(),
            label: label.to_string(),
            occupancy,
            dwell_ms: dwell.as_millis().min(u64::MAX as u128) as u64,
            ordinal,
            raised_at_epoch_s,
        }
    }

    pub fn dwell(&self) -> Duration {
        Duration::from_millis(self.dwell_ms)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
