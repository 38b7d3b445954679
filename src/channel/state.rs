//! Channel state machine.
//!
//! ```text
//!                 ┌──────────────┐
//!                 │UNINITIALIZED │
//!                 └──────┬───────┘
//!                        ▼
//!   ┌───────────────►HANDSHAKING──────────────┐
//!   │                    │                    │ rejected / timeout
//!   │                    ▼                    ▼
//!   │   ack ┌───────►CONNECTED──────────►CLOSED
//!   │       │            │ missed beats       ▲
//!   │       │            ▼                    │ grace expired
//!   │       └────────DEGRADED─────────────────┘
//!   │                                         │
//!   └──────────── establish again ────────────┘
//! ```
//!
//! Every state may move to CLOSED on teardown.

use std::fmt;

// ============================================================================
// ChannelState
// ============================================================================

/// Lifecycle state of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelState {
    /// Created, no handshake attempted yet.
    Uninitialized,
    /// Handshake in flight.
    Handshaking,
    /// Handshake accepted, peer responsive.
    Connected,
    /// Heartbeats unanswered, within grace period.
    Degraded,
    /// Torn down, rejected, timed out or peer lost.
    Closed,
}

impl ChannelState {
    /// Returns the canonical upper-case name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Uninitialized => "UNINITIALIZED",
            Self::Handshaking => "HANDSHAKING",
            Self::Connected => "CONNECTED",
            Self::Degraded => "DEGRADED",
            Self::Closed => "CLOSED",
        }
    }

    /// Returns `true` if `self → next` is a legal transition.
    #[must_use]
    pub const fn can_transition(self, next: Self) -> bool {
        use ChannelState::*;
        matches!(
            (self, next),
            (Uninitialized, Handshaking)
                | (Handshaking, Connected)
                | (Connected, Degraded)
                | (Degraded, Connected)
                | (Closed, Handshaking)
                | (Uninitialized | Handshaking | Connected | Degraded, Closed)
        )
    }

    /// Returns `true` if application traffic may flow.
    #[inline]
    #[must_use]
    pub const fn accepts_traffic(self) -> bool {
        matches!(self, Self::Connected | Self::Degraded)
    }

    /// Returns `true` if the channel is closed.
    #[inline]
    #[must_use]
    pub const fn is_closed(self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// CloseReason
// ============================================================================

/// Why a channel reached CLOSED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseReason {
    /// Explicit teardown by the owner.
    Destroyed,
    /// Handshake refused by the peer or capabilities mismatched.
    HandshakeRejected,
    /// Handshake did not complete in time.
    HandshakeTimeout,
    /// Degraded longer than the grace period.
    PeerLost,
    /// The transport ended.
    TransportClosed,
}

impl CloseReason {
    /// Returns `true` if the owner may run the handshake again on the same
    /// transport.
    #[inline]
    #[must_use]
    pub const fn allows_reestablish(self) -> bool {
        matches!(
            self,
            Self::HandshakeRejected | Self::HandshakeTimeout | Self::PeerLost
        )
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Destroyed => "destroyed",
            Self::HandshakeRejected => "handshake rejected",
            Self::HandshakeTimeout => "handshake timeout",
            Self::PeerLost => "peer lost",
            Self::TransportClosed => "transport closed",
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
