//! System-event watcher.
//!
//! Turns an external stop request (Ctrl-C in the binary) into a
//! `PrepareShutdown` bus event, then stays alive until the orchestrator
//! broadcasts `Shutdown`.

use std::future::Future;

use rigbridge_middleware::{BusReceiver, EventBus};
use rigbridge_types::EventPayload;
use tracing::{error, info};

const SOURCE: &str = "events";

/// Run until `shutdown` fires.
///
/// When `trigger` completes first, `PrepareShutdown` is published exactly
/// once and the watcher keeps waiting for `Shutdown`.  A `Shutdown` that
/// arrives before the trigger ends the watcher without publishing anything.
pub async fn watch_system_events<F>(bus: EventBus, mut shutdown: BusReceiver, trigger: F)
where
    F: Future<Output = ()>,
{
    tokio::pin!(trigger);
    tokio::select! {
        _ = shutdown.recv() => {
            info!("shutdown observed before any stop request");
            return;
        }
        () = &mut trigger => {
            info!("stop requested, preparing shutdown");
            if let Err(e) = bus.emit(SOURCE, EventPayload::PrepareShutdown).await {
                error!(error = %e, "could not publish PrepareShutdown");
            }
        }
    }
    shutdown.recv().await;
    info!("system-event watcher stopped");
}
