//! Liveness monitoring.
//!
//! [`LivenessMonitor`] drives the Host's heartbeat: on every tick it counts
//! an unanswered beat as missed, then the channel sends a fresh one. Enough
//! consecutive misses mark the channel DEGRADED; staying degraded past the
//! grace period closes it.
//!
//! [`PassiveLiveness`] is the Client's mirror: it sends nothing and only
//! watches for inbound traffic within the window implied by the Host's
//! heartbeat interval.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::identifiers::MessageId;

// ============================================================================
// Constants
// ============================================================================

/// Default heartbeat interval.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Default consecutive misses before DEGRADED.
pub const DEFAULT_MISSED_THRESHOLD: u32 = 3;

/// Default time allowed in DEGRADED before CLOSED.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(60);

/// Stand-in for "never" when a wait does not fit in an [`Instant`].
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

// ============================================================================
// Deadlines
// ============================================================================

/// `start + wait`, clamped to roughly 30 years ahead instead of overflowing.
///
/// Timeouts and intervals come from callers and from the peer's handshake,
/// so any `Duration` must be accepted.
pub(crate) fn deadline_after(start: Instant, wait: Duration) -> Instant {
    start
        .checked_add(wait.min(FAR_FUTURE))
        .unwrap_or(start)
}

// ============================================================================
// HeartbeatConfig
// ============================================================================

/// Heartbeat timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Time between heartbeats.
    pub interval: Duration,
    /// Consecutive unanswered heartbeats before DEGRADED.
    pub missed_threshold: u32,
    /// Time allowed in DEGRADED before CLOSED.
    pub grace_period: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_HEARTBEAT_INTERVAL,
            missed_threshold: DEFAULT_MISSED_THRESHOLD,
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }
}

impl HeartbeatConfig {
    /// Creates a config with `interval` and default threshold and grace.
    #[inline]
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            ..Self::default()
        }
    }

    /// Sets the missed-beat threshold.
    #[inline]
    #[must_use]
    pub fn with_missed_threshold(mut self, threshold: u32) -> Self {
        self.missed_threshold = threshold;
        self
    }

    /// Sets the grace period.
    #[inline]
    #[must_use]
    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    /// Checks that all values are usable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a zero interval or threshold.
    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(Error::config("Heartbeat interval must be greater than zero"));
        }
        if self.missed_threshold == 0 {
            return Err(Error::config("Missed heartbeat threshold must be at least 1"));
        }
        Ok(())
    }

    /// Silence window after which the peer counts as lost.
    #[inline]
    #[must_use]
    pub fn silence_window(&self) -> Duration {
        self.interval.saturating_mul(self.missed_threshold)
    }
}

// ============================================================================
// LivenessVerdict
// ============================================================================

/// Outcome of a heartbeat tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessVerdict {
    /// Keep going.
    Healthy,
    /// Threshold reached on this tick: CONNECTED → DEGRADED.
    Lost {
        /// Consecutive misses.
        missed: u32,
    },
    /// Still degraded, within grace.
    Degraded,
    /// Grace exhausted: DEGRADED → CLOSED.
    Expired,
}

// ============================================================================
// LivenessMonitor
// ============================================================================

/// Active heartbeat bookkeeping for the Host.
#[derive(Debug)]
pub struct LivenessMonitor {
    config: HeartbeatConfig,
    outstanding: Option<MessageId>,
    missed: u32,
    degraded_since: Option<Instant>,
    last_ack_at: Option<Instant>,
    next_beat_at: Instant,
}

impl LivenessMonitor {
    /// Starts monitoring; the first beat is due one interval after `now`.
    #[must_use]
    pub fn new(config: HeartbeatConfig, now: Instant) -> Self {
        Self {
            config,
            outstanding: None,
            missed: 0,
            degraded_since: None,
            last_ack_at: None,
            next_beat_at: deadline_after(now, config.interval),
        }
    }

    /// When the next beat is due.
    #[inline]
    #[must_use]
    pub fn next_beat_at(&self) -> Instant {
        self.next_beat_at
    }

    /// Consecutive unanswered beats.
    #[inline]
    #[must_use]
    pub fn missed(&self) -> u32 {
        self.missed
    }

    /// Time of the last acknowledgment.
    #[inline]
    #[must_use]
    pub fn last_ack_at(&self) -> Option<Instant> {
        self.last_ack_at
    }

    /// Returns `true` while degraded.
    #[inline]
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.degraded_since.is_some()
    }

    /// Evaluates a due tick. The caller sends a beat afterwards unless the
    /// verdict is [`LivenessVerdict::Expired`].
    pub fn on_tick(&mut self, now: Instant) -> LivenessVerdict {
        if self.outstanding.take().is_some() {
            self.missed += 1;
        }
        self.next_beat_at = deadline_after(now, self.config.interval);

        if let Some(since) = self.degraded_since {
            if now.duration_since(since) >= self.config.grace_period {
                return LivenessVerdict::Expired;
            }
            return LivenessVerdict::Degraded;
        }

        if self.missed >= self.config.missed_threshold {
            self.degraded_since = Some(now);
            return LivenessVerdict::Lost {
                missed: self.missed,
            };
        }

        LivenessVerdict::Healthy
    }

    /// Records the beat just sent.
    pub fn beat_sent(&mut self, id: MessageId) {
        self.outstanding = Some(id);
    }

    /// Records an acknowledgment. Late acks for earlier beats count too.
    ///
    /// Returns `true` if this ack ended a degraded period.
    pub fn on_ack(&mut self, now: Instant) -> bool {
        self.outstanding = None;
        self.missed = 0;
        self.last_ack_at = Some(now);
        self.degraded_since.take().is_some()
    }
}

// ============================================================================
// PassiveLiveness
// ============================================================================

/// Change reported by [`PassiveLiveness`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassiveChange {
    /// Silence exceeded the window.
    Lost,
    /// Traffic resumed after silence.
    Restored,
}

/// Client-side liveness mirror.
#[derive(Debug)]
pub struct PassiveLiveness {
    interval: Duration,
    window: Duration,
    last_seen: Instant,
    lost: bool,
}

impl PassiveLiveness {
    /// Watches for traffic at least every `window`, checking each `interval`.
    #[must_use]
    pub fn new(interval: Duration, window: Duration, now: Instant) -> Self {
        Self {
            interval,
            window,
            last_seen: now,
            lost: false,
        }
    }

    /// When the next silence check is due.
    #[inline]
    #[must_use]
    pub fn next_check_at(&self, now: Instant) -> Instant {
        let deadline = deadline_after(self.last_seen, self.window);
        if self.lost || deadline <= now {
            deadline_after(now, self.interval)
        } else {
            deadline
        }
    }

    /// Records inbound traffic.
    pub fn on_inbound(&mut self, now: Instant) -> Option<PassiveChange> {
        self.last_seen = now;
        if self.lost {
            self.lost = false;
            return Some(PassiveChange::Restored);
        }
        None
    }

    /// Checks for silence.
    pub fn check(&mut self, now: Instant) -> Option<PassiveChange> {
        if !self.lost && now.duration_since(self.last_seen) >= self.window {
            self.lost = true;
            return Some(PassiveChange::Lost);
        }
        None
    }
}

// ============================================================================
// Tests
// ============================================================================
