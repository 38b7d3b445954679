//! Channel internals.
//!
//! A channel is one authenticated session between a Host and a Client over
//! a [`Transport`](crate::transport::Transport). It is driven by a single
//! task (see `core`) that composes the pieces below.
//!
//! # State Machine
//!
//! ```text
//! UNINITIALIZED ──► HANDSHAKING ──► CONNECTED ◄──► DEGRADED
//!       │                │              │              │
//!       └────────────────┴──────────────┴──────────────┴──► CLOSED
//!                                                             │
//!                        HANDSHAKING ◄── establish() ─────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `state` | [`ChannelState`] and [`CloseReason`] |
//! | `origin` | Exact [`Origin`] parsing and matching |
//! | `validator` | Origin, envelope, signature and replay checks |
//! | `correlator` | Pending requests with deadlines |
//! | `monitor` | Heartbeat and passive liveness |
//! | `dispatcher` | Topic-based handler routing |
//! | `diagnostics` | Counters for dropped frames |
//! | `config` | Host and Client configuration builders |
//! | `core` | The channel task and [`ChannelHandle`] |

// ============================================================================
// Submodules
// ============================================================================

/// Host and Client configuration.
pub mod config;

/// Channel task and handle.
pub mod core;

/// Request/response correlation.
pub mod correlator;

/// Drop counters.
pub mod diagnostics;

/// Topic-based handler registry.
pub mod dispatcher;

/// Heartbeat and liveness.
pub mod monitor;

/// Exact origins.
pub mod origin;

/// Channel lifecycle states.
pub mod state;

/// Inbound frame validation.
pub mod validator;

// ============================================================================
// Re-exports
// ============================================================================

pub use config::{
    ClientConfig, ClientConfigBuilder, CredentialVerifier, DEFAULT_CREDENTIAL_PATTERN,
    DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_MAX_PENDING_REQUESTS, DEFAULT_REQUEST_TIMEOUT,
    HostConfig, HostConfigBuilder, RequestClass,
};
pub use core::ChannelHandle;
pub use correlator::Correlator;
pub use diagnostics::{Diagnostics, DiagnosticsSnapshot};
pub use dispatcher::{Dispatcher, EventHandler, RouteOutcome};
pub use monitor::{
    DEFAULT_GRACE_PERIOD, DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_MISSED_THRESHOLD, HeartbeatConfig,
    LivenessMonitor, LivenessVerdict, PassiveChange, PassiveLiveness,
};
pub use origin::Origin;
pub use state::{ChannelState, CloseReason};
pub use validator::{InboundValidator, Rejection};
