//! Shutdown state machine.
//!
//! ```text
//! Running ──PrepareShutdown──► PrepareShutdown ──Shutdown──► Shutdown ──┬─WorkersReleased─► Terminated
//!    │                                                          ▲       └─TimedOut────────► Terminated
//!    └──────────────────────────Shutdown───────────────────────┘
//! ```
//!
//! `PrepareShutdown` announces "going offline" while every worker is still
//! running; only then is `Shutdown` broadcast.  Once in `Shutdown` the
//! workers get [`ShutdownTimings::exit_timeout`] to release their
//! [`WorkerGroup`] guards before the process exits regardless.

use std::fmt;
use std::time::Duration;

use rigbridge_types::RigError;
use tracing::{info, warn};

use crate::worker_group::WorkerGroup;

/// Lifecycle phase of the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    Running,
    PrepareShutdown,
    Shutdown,
    Terminated,
}

/// Inputs that drive [`ShutdownPhase::advance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    PrepareShutdown,
    Shutdown,
    WorkersReleased,
    TimedOut,
}

impl fmt::Display for ShutdownPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl ShutdownPhase {
    /// Apply `signal`, returning the next phase.
    ///
    /// # Errors
    ///
    /// Returns [`RigError::InvalidTransition`] for any pair not in the
    /// diagram above (e.g. a second `PrepareShutdown`, or anything once
    /// `Terminated`).
    pub fn advance(self, signal: ShutdownSignal) -> Result<Self, RigError> {
        use ShutdownPhase as P;
        use ShutdownSignal as S;
        match (self, signal) {
            (P::Running, S::PrepareShutdown) => Ok(P::PrepareShutdown),
            (P::Running | P::PrepareShutdown, S::Shutdown) => Ok(P::Shutdown),
            (P::Shutdown, S::WorkersReleased | S::TimedOut) => Ok(P::Terminated),
            (from, signal) => Err(RigError::InvalidTransition {
                from: from.to_string(),
                signal: signal.to_string(),
            }),
        }
    }

    pub fn is_terminal(self) -> bool {
        self == ShutdownPhase::Terminated
    }
}

/// Grace intervals around the offline announcement and the hard exit
/// bound.  The grace intervals are empirically tuned buffers for in-flight
/// I/O, not derived bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownTimings {
    /// Lets final state / capability messages drain before going offline.
    pub pre_announce_grace: Duration,
    /// Lets the offline status reach the transport before `Shutdown`.
    pub post_announce_grace: Duration,
    /// Hard upper bound for workers to release after `Shutdown`.
    pub exit_timeout: Duration,
}

impl Default for ShutdownTimings {
    fn default() -> Self {
        Self {
            pre_announce_grace: Duration::from_micros(200),
            post_announce_grace: Duration::from_millis(100),
            exit_timeout: Duration::from_secs(1),
        }
    }
}

/// How the process is leaving.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Every worker released in time.
    Clean,
    /// The exit timeout elapsed first; `outstanding` names the stuck
    /// workers whose in-flight work is abandoned.
    Forced { outstanding: Vec<String> },
}

impl ExitOutcome {
    pub fn signal(&self) -> ShutdownSignal {
        match self {
            ExitOutcome::Clean => ShutdownSignal::WorkersReleased,
            ExitOutcome::Forced { .. } => ShutdownSignal::TimedOut,
        }
    }
}

/// Wait for `group` to drain, but never longer than `timeout`.
///
/// The deadline is cancelled together with the wait, so the clean path
/// leaves no timer behind.
pub async fn await_workers(group: &WorkerGroup, timeout: Duration) -> ExitOutcome {
    match tokio::time::timeout(timeout, group.wait()).await {
        Ok(()) => {
            info!("all workers released");
            ExitOutcome::Clean
        }
        Err(_) => {
            let outstanding = group.outstanding();
            warn!(?outstanding, timeout_ms = timeout.as_millis() as u64, "quitting forcefully");
            ExitOutcome::Forced { outstanding }
        }
    }
}
