//! Progress poller: one task per job, bound to that job's identity.
//!
//! Polls `/progress/{id}` immediately and then at a fixed cadence until the
//! job turns terminal, its record is discarded, or the cancellation token is
//! fired by a newer submission.  Transport failures skip a round and nothing
//! else.

use stash_proto::config::TimingConfig;
use stash_proto::job::{JobRecord, JobStore, JobTicket, ProgressOutcome};
use stash_proto::protocol::{JobId, JobStatus};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::BackendClient;
use crate::events::{EngineEvent, EventSender};

/// Pick the log line most likely to explain a failure: the last line that
/// mentions an error, otherwise the last non-empty line.
pub fn pertinent_line(lines: &[String]) -> Option<&str> {
    let non_empty = || lines.iter().map(|l| l.trim()).filter(|l| !l.is_empty());
    non_empty()
        .filter(|l| {
            let lower = l.to_lowercase();
            lower.contains("error") || lower.contains("failed") || lower.contains("exception")
        })
        .last()
        .or_else(|| non_empty().last())
}

#[derive(Clone)]
pub struct Poller {
    pub jobs: JobStore,
    pub backend: BackendClient,
    pub events: EventSender,
    pub timing: TimingConfig,
}

impl Poller {
    /// Spawn the poll task for `id`.  Cancelling `token` ends it at the next
    /// suspension point.
    pub fn spawn(&self, ticket: JobTicket, id: JobId, token: CancellationToken) {
        let poller = self.clone();
        tokio::spawn(async move {
            poller.run(ticket, id, token).await;
        });
    }

    pub async fn run(&self, ticket: JobTicket, id: JobId, token: CancellationToken) {
        let mut interval = tokio::time::interval(self.timing.poll_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!("poller: watching job {}", id);

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("poller: job {} cancelled", id);
                    return;
                }
                _ = interval.tick() => {}
            }

            if !self.jobs.is_live(ticket).await {
                debug!("poller: job {} no longer live", id);
                return;
            }

            let progress = match self.backend.progress(&id).await {
                Ok(p) => p,
                Err(e) => {
                    debug!("poller: poll of job {} failed, retrying: {}", id, e);
                    continue;
                }
            };
            if token.is_cancelled() {
                return;
            }

            match self.jobs.apply_progress(&id, &progress).await {
                ProgressOutcome::Stale => {
                    debug!("poller: dropping stale response for job {}", id);
                    return;
                }
                ProgressOutcome::Updated(record) => {
                    let _ = self.events.send(EngineEvent::ProgressUpdated(record));
                }
                ProgressOutcome::Terminal(record) => {
                    self.finish(ticket, record).await;
                    return;
                }
            }
        }
    }

    async fn finish(&self, ticket: JobTicket, mut record: JobRecord) {
        let grace = match record.status {
            JobStatus::Failed => {
                let message = self.failure_message(&record).await;
                warn!("poller: job {:?} failed: {}", record.id, message);
                self.jobs.set_error(ticket, message.clone()).await;
                record.error = Some(message);
                self.timing.failed_grace()
            }
            _ => {
                info!(
                    "poller: job {:?} completed, {}/{} items, {} failed",
                    record.id,
                    record.done,
                    record.total,
                    record.failed_items.len()
                );
                self.timing.completed_grace()
            }
        };

        let _ = self.events.send(EngineEvent::JobTerminal(record));

        let jobs = self.jobs.clone();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if jobs.discard(ticket).await {
                debug!("poller: terminal record discarded");
            }
        });
    }

    /// Backend error folded together with the last telling log line.
    async fn failure_message(&self, record: &JobRecord) -> String {
        let base = record
            .error
            .clone()
            .unwrap_or_else(|| "unknown error".to_string());
        let Some(id) = record.id.as_ref() else {
            return base;
        };
        let lines = match self.backend.logs(id).await {
            Ok(logs) => logs.lines,
            Err(e) => {
                debug!("poller: could not fetch logs for job {}: {}", id, e);
                return base;
            }
        };
        match pertinent_line(&lines) {
            Some(line) if line != base => format!("{} ({})", base, line),
            _ => base,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_pertinent_line_prefers_errors() {
        let log = lines(&[
            "Fetching track 1",
            "ERROR: rate limited",
            "Fetching track 2",
            "",
        ]);
        assert_eq!(pertinent_line(&log), Some("ERROR: rate limited"));
    }

    #[test]
    fn test_pertinent_line_falls_back_to_last() {
        let log = lines(&["Fetching track 1", "  Fetching track 2  ", "   "]);
        assert_eq!(pertinent_line(&log), Some("Fetching track 2"));
        assert_eq!(pertinent_line(&[]), None);
    }

    #[test]
    fn test_pertinent_line_takes_latest_error() {
        let log = lines(&["Download failed for A", "Traceback", "ValueError: bad"]);
        assert_eq!(pertinent_line(&log), Some("ValueError: bad"));
    }
}
