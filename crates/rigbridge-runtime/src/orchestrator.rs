//! [`Orchestrator`] – the single-threaded dispatch loop.
//!
//! Multiplexes four kinds of bus traffic:
//!
//! | Bus topic | Handling |
//! |---|---|
//! | `ConnStatus` | Track `online`; announce it on connect. |
//! | `PrepareShutdown` / `Shutdown` | Drive the [`ShutdownPhase`] machine. |
//! | `AppLog` | Mirror locally. |
//! | `RadioLog` | Forward to the network through [`ServerStatus::send_log_msg`]. |
//!
//! Handlers never overlap, so [`ServerStatus`] needs no lock.  A handler
//! that sleeps (the shutdown grace intervals) holds the loop for that long;
//! log topics are subscribed drop-oldest so they cannot stall publishers in
//! the meantime.

use rigbridge_kernel::{
    ExitOutcome, ShutdownPhase, ShutdownSignal, ShutdownTimings, WorkerGroup, await_workers,
};
use rigbridge_middleware::{BusReceiver, BusTopic, EventBus, OverflowPolicy};
use rigbridge_types::{ConnectionState, Event, EventPayload};
use tracing::{debug, error, info, warn};

use crate::status::ServerStatus;

const SOURCE: &str = "orchestrator";

pub struct Orchestrator {
    bus: EventBus,
    status: ServerStatus,
    workers: WorkerGroup,
    timings: ShutdownTimings,
    phase: ShutdownPhase,
    conn_status: BusReceiver,
    prepare_shutdown: BusReceiver,
    shutdown: BusReceiver,
    app_log: BusReceiver,
    radio_log: BusReceiver,
}

impl Orchestrator {
    /// Subscribe to every topic the loop dispatches on.
    ///
    /// Must be called before any worker starts publishing.
    pub fn new(
        bus: &EventBus,
        status: ServerStatus,
        workers: WorkerGroup,
        timings: ShutdownTimings,
    ) -> Self {
        Self {
            bus: bus.clone(),
            status,
            workers,
            timings,
            phase: ShutdownPhase::Running,
            conn_status: bus.subscribe(BusTopic::ConnStatus),
            prepare_shutdown: bus.subscribe(BusTopic::PrepareShutdown),
            shutdown: bus.subscribe(BusTopic::Shutdown),
            app_log: bus.subscribe_with(BusTopic::AppLog, OverflowPolicy::DropOldest),
            radio_log: bus.subscribe_with(BusTopic::RadioLog, OverflowPolicy::DropOldest),
        }
    }

    pub fn phase(&self) -> ShutdownPhase {
        self.phase
    }

    pub fn status(&self) -> &ServerStatus {
        &self.status
    }

    /// Dispatch until the bridge reaches [`ShutdownPhase::Terminated`].
    pub async fn run(mut self) -> ExitOutcome {
        info!("orchestrator running");
        loop {
            tokio::select! {
                Some(event) = self.conn_status.recv() => self.on_conn_status(event).await,
                Some(_) = self.prepare_shutdown.recv() => self.on_prepare_shutdown().await,
                Some(_) = self.shutdown.recv() => {
                    if let Some(outcome) = self.on_shutdown().await {
                        return outcome;
                    }
                }
                Some(event) = self.app_log.recv() => on_app_log(event),
                Some(event) = self.radio_log.recv() => self.on_radio_log(event).await,
                else => {
                    // Every subscription closed: the bus itself is gone.
                    warn!("event bus closed; exiting dispatch loop");
                    return ExitOutcome::Clean;
                }
            }
        }
    }

    async fn on_conn_status(&mut self, event: Event) {
        let EventPayload::ConnStatus(state) = event.payload else {
            return;
        };
        info!(?state, source = %event.source, "connstatus");
        match state {
            ConnectionState::Connected => {
                self.status.set_online(true);
                if let Err(e) = self.status.send_update().await {
                    error!(error = %e, "status update failed");
                }
            }
            ConnectionState::Disconnected => self.status.set_online(false),
        }
    }

    async fn on_prepare_shutdown(&mut self) {
        match self.phase.advance(ShutdownSignal::PrepareShutdown) {
            Ok(next) => self.phase = next,
            Err(e) => {
                debug!(error = %e, "ignoring PrepareShutdown");
                return;
            }
        }
        info!("preparing shutdown");

        tokio::time::sleep(self.timings.pre_announce_grace).await;
        self.status.set_online(false);
        if let Err(e) = self.status.send_update().await {
            error!(error = %e, "offline status not announced");
        }
        tokio::time::sleep(self.timings.post_announce_grace).await;

        if let Err(e) = self.bus.emit(SOURCE, EventPayload::Shutdown).await {
            error!(error = %e, "could not broadcast Shutdown");
        }
    }

    /// Returns the exit outcome once the phase is terminal.
    async fn on_shutdown(&mut self) -> Option<ExitOutcome> {
        match self.phase.advance(ShutdownSignal::Shutdown) {
            Ok(next) => self.phase = next,
            Err(e) => {
                debug!(error = %e, "ignoring Shutdown");
                return None;
            }
        }
        info!(
            outstanding = self.workers.len(),
            timeout_ms = self.timings.exit_timeout.as_millis() as u64,
            "shutting down, waiting for workers"
        );

        let outcome = await_workers(&self.workers, self.timings.exit_timeout).await;
        match self.phase.advance(outcome.signal()) {
            Ok(next) => self.phase = next,
            Err(e) => error!(error = %e, "unexpected shutdown transition"),
        }
        Some(outcome)
    }

    async fn on_radio_log(&mut self, event: Event) {
        let EventPayload::RadioLog(line) = event.payload else {
            return;
        };
        if let Err(e) = self.status.send_log_msg(&line).await {
            info!(error = %e, line = %line, "radio log not forwarded");
        }
    }
}

fn on_app_log(event: Event) {
    if let EventPayload::AppLog(line) = event.payload {
        info!(source = %event.source, "{line}");
    }
}
