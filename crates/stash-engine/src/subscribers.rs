//! Event subscribers.  Each one owns a broadcast receiver and reacts to the
//! events it cares about; none of them write the job record.

use std::sync::Arc;

use stash_proto::job::JobRecord;
use stash_proto::protocol::JobStatus;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::core::Engine;
use crate::error::EngineError;
use crate::events::EngineEvent;
use crate::host::Severity;

/// Receive loop shared by the subscribers.  Lagging drops events but keeps
/// the subscriber alive.
async fn next_event(rx: &mut broadcast::Receiver<EngineEvent>, name: &str) -> Option<EngineEvent> {
    loop {
        match rx.recv().await {
            Ok(event) => return Some(event),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("{} subscriber lagged by {} events", name, n);
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

/// Toast for a job that just ended.
pub fn terminal_notice(record: &JobRecord) -> (String, Severity) {
    match record.status {
        JobStatus::Failed => {
            let reason = record.error.clone().unwrap_or_else(|| "unknown error".to_string());
            (EngineError::JobFailed(reason).to_string(), Severity::Error)
        }
        _ if !record.failed_items.is_empty() => (
            format!(
                "Download finished, but {} of {} tracks failed.",
                record.failed_items.len(),
                record.total
            ),
            Severity::Warning,
        ),
        _ => (
            format!(
                "Download complete! {} tracks saved to {}",
                record.done, record.destination_path
            ),
            Severity::Success,
        ),
    }
}

/// Terminal jobs → user notifications.
pub fn spawn_notifications(engine: Arc<Engine>) -> JoinHandle<()> {
    let mut rx = engine.subscribe();
    tokio::spawn(async move {
        while let Some(event) = next_event(&mut rx, "notification").await {
            match event {
                EngineEvent::JobStarted { id, total, .. } => {
                    debug!("notification: job {} started with {} items", id, total);
                }
                EngineEvent::JobTerminal(record) => {
                    let (message, severity) = terminal_notice(&record);
                    engine.host().notify(&message, severity);
                }
                EngineEvent::ProgressUpdated(_) | EngineEvent::NowPlayingChanged(_) => {}
            }
        }
    })
}

/// Playback changes → capture manager; partial failures → capture offer.
pub fn spawn_capture(engine: Arc<Engine>) -> JoinHandle<()> {
    let mut rx = engine.subscribe();
    tokio::spawn(async move {
        while let Some(event) = next_event(&mut rx, "capture").await {
            match event {
                EngineEvent::NowPlayingChanged(now_playing) => {
                    engine.capture_now_playing(now_playing.as_ref()).await;
                }
                EngineEvent::JobTerminal(record)
                    if record.status == JobStatus::Completed && !record.failed_items.is_empty() =>
                {
                    let engine = Arc::clone(&engine);
                    let delay = engine.config().timing.capture_offer_delay();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        if engine.capture_active().await {
                            debug!("capture: already recording, skipping offer");
                            return;
                        }
                        engine.offer_capture(&record);
                    });
                }
                _ => {}
            }
        }
    })
}
