//! The single live job record and the store that guards it.
//!
//! `JobStore` holds at most one `JobRecord`.  Every mutation names the job it
//! is meant for (a local `JobTicket` before the backend assigns an id, the
//! backend `JobId` afterwards) and is dropped when that job is no longer the
//! live one.  This is what keeps late poll and submission responses from
//! touching a record that was discarded or replaced in the meantime.

use crate::protocol::{CollectionType, JobId, JobStatus, ProgressResponse};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Which collection a job (or the on-screen list) refers to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobContext {
    pub collection_type: CollectionType,
    pub collection_id: String,
}

impl JobContext {
    pub fn new(collection_type: CollectionType, collection_id: impl Into<String>) -> Self {
        Self {
            collection_type,
            collection_id: collection_id.into(),
        }
    }
}

/// Local identity of a job, valid from `begin` until discard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobTicket(u64);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub ticket: JobTicket,
    /// Unknown until the backend acknowledges the submission.
    pub id: Option<JobId>,
    pub context: JobContext,
    pub status: JobStatus,
    pub done: u32,
    /// 0 means not yet known.
    pub total: u32,
    pub percent: f64,
    pub failed_items: Vec<String>,
    pub destination_path: String,
    pub error: Option<String>,
    pub started_at: DateTime<Local>,
}

impl JobRecord {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Result of applying one poll response.
#[derive(Debug, Clone)]
pub enum ProgressOutcome {
    /// Response was for a job that is no longer live; nothing changed.
    Stale,
    /// Record updated, still running.
    Updated(JobRecord),
    /// Record just entered a terminal state.
    Terminal(JobRecord),
}

#[derive(Default)]
struct Slot {
    record: Option<JobRecord>,
    next_ticket: u64,
}

#[derive(Clone, Default)]
pub struct JobStore {
    slot: Arc<RwLock<Slot>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a fresh record in `starting` state.
    ///
    /// Fails with the live record when a non-terminal job already exists.  A
    /// terminal record still in its grace period is superseded.
    pub async fn begin(
        &self,
        context: JobContext,
        seeded_total: u32,
        destination_path: String,
    ) -> Result<JobTicket, JobRecord> {
        let mut slot = self.slot.write().await;
        if let Some(live) = slot.record.as_ref() {
            if !live.is_terminal() {
                return Err(live.clone());
            }
            debug!("JobStore: superseding terminal job {:?}", live.id);
        }
        slot.next_ticket += 1;
        let ticket = JobTicket(slot.next_ticket);
        slot.record = Some(JobRecord {
            ticket,
            id: None,
            context,
            status: JobStatus::Starting,
            done: 0,
            total: seeded_total,
            percent: 0.0,
            failed_items: Vec::new(),
            destination_path,
            error: None,
            started_at: Local::now(),
        });
        Ok(ticket)
    }

    /// Record the backend id for the job started under `ticket`.
    /// Returns false when that job has been discarded meanwhile.
    pub async fn attach(&self, ticket: JobTicket, id: JobId, total: Option<u32>) -> bool {
        let mut slot = self.slot.write().await;
        let Some(record) = slot.record.as_mut().filter(|r| r.ticket == ticket) else {
            return false;
        };
        record.id = Some(id);
        if let Some(total) = total.filter(|t| *t > 0) {
            record.total = total;
            record.done = record.done.min(total);
        }
        true
    }

    /// Apply a `/progress` response for job `id`.
    pub async fn apply_progress(&self, id: &JobId, progress: &ProgressResponse) -> ProgressOutcome {
        let mut slot = self.slot.write().await;
        let Some(record) = slot.record.as_mut() else {
            return ProgressOutcome::Stale;
        };
        if record.id.as_ref() != Some(id) || record.is_terminal() {
            return ProgressOutcome::Stale;
        }

        let mut done = progress.done;
        if !progress.status.is_terminal() {
            done = done.max(record.done);
        }
        if progress.total > 0 {
            done = done.min(progress.total);
        }

        record.status = progress.status;
        record.total = progress.total;
        record.done = done;
        record.percent = progress.percent.clamp(0.0, 100.0);

        let outcome = if progress.status.is_terminal() {
            record.failed_items = progress.failed_tracks.clone();
            record.error = progress.error.clone();
            ProgressOutcome::Terminal(record.clone())
        } else {
            ProgressOutcome::Updated(record.clone())
        };
        outcome
    }

    /// Attach a diagnostic message to a terminal record.
    pub async fn set_error(&self, ticket: JobTicket, message: String) {
        let mut slot = self.slot.write().await;
        if let Some(record) = slot.record.as_mut().filter(|r| r.ticket == ticket) {
            record.error = Some(message);
        }
    }

    /// Drop the record if it still belongs to `ticket`.
    pub async fn discard(&self, ticket: JobTicket) -> bool {
        let mut slot = self.slot.write().await;
        if slot.record.as_ref().map(|r| r.ticket) == Some(ticket) {
            slot.record = None;
            true
        } else {
            false
        }
    }

    pub async fn is_live(&self, ticket: JobTicket) -> bool {
        self.slot.read().await.record.as_ref().map(|r| r.ticket) == Some(ticket)
    }

    pub async fn snapshot(&self) -> Option<JobRecord> {
        self.slot.read().await.record.clone()
    }

    /// True while a job is starting or downloading.
    pub async fn is_busy(&self) -> bool {
        self.slot
            .read()
            .await
            .record
            .as_ref()
            .is_some_and(|r| !r.is_terminal())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn album() -> JobContext {
        JobContext::new(CollectionType::Album, "abc")
    }

    fn progress(status: JobStatus, done: u32, total: u32) -> ProgressResponse {
        ProgressResponse {
            status,
            done,
            total,
            percent: if total > 0 { done as f64 * 100.0 / total as f64 } else { 0.0 },
            error: None,
            failed_tracks: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_begin_is_single_flight() {
        let store = JobStore::new();
        let first = store.begin(album(), 10, String::new()).await.unwrap();
        let second = store.begin(album(), 10, String::new()).await;
        assert_eq!(second.unwrap_err().ticket, first);
    }

    #[tokio::test]
    async fn test_terminal_record_is_superseded() {
        let store = JobStore::new();
        let first = store.begin(album(), 2, String::new()).await.unwrap();
        assert!(store.attach(first, JobId::new("1"), None).await);
        store
            .apply_progress(&JobId::new("1"), &progress(JobStatus::Completed, 2, 2))
            .await;

        let second = store.begin(album(), 0, String::new()).await.unwrap();
        assert_ne!(first, second);
        assert!(!store.discard(first).await);
        assert!(store.is_live(second).await);
    }

    #[tokio::test]
    async fn test_done_never_decreases_while_downloading() {
        let store = JobStore::new();
        let ticket = store.begin(album(), 10, String::new()).await.unwrap();
        let id = JobId::new("7");
        store.attach(ticket, id.clone(), Some(10)).await;

        let mut seen = Vec::new();
        for done in [0, 3, 2, 7, 5, 10] {
            store
                .apply_progress(&id, &progress(JobStatus::Downloading, done, 10))
                .await;
            seen.push(store.snapshot().await.unwrap().done);
        }
        assert_eq!(seen, vec![0, 3, 3, 7, 7, 10]);
    }

    #[tokio::test]
    async fn test_done_clamped_to_total() {
        let store = JobStore::new();
        let ticket = store.begin(album(), 0, String::new()).await.unwrap();
        let id = JobId::new("1");
        store.attach(ticket, id.clone(), None).await;
        store
            .apply_progress(&id, &progress(JobStatus::Downloading, 12, 10))
            .await;
        let record = store.snapshot().await.unwrap();
        assert_eq!(record.done, 10);
        assert_eq!(record.total, 10);
    }

    #[tokio::test]
    async fn test_stale_response_is_ignored() {
        let store = JobStore::new();
        let ticket = store.begin(album(), 0, String::new()).await.unwrap();
        store.attach(ticket, JobId::new("A"), None).await;
        store.discard(ticket).await;

        let outcome = store
            .apply_progress(&JobId::new("A"), &progress(JobStatus::Downloading, 1, 4))
            .await;
        assert!(matches!(outcome, ProgressOutcome::Stale));
        assert!(store.snapshot().await.is_none());

        let next = store.begin(album(), 0, String::new()).await.unwrap();
        store.attach(next, JobId::new("B"), None).await;
        let outcome = store
            .apply_progress(&JobId::new("A"), &progress(JobStatus::Downloading, 1, 4))
            .await;
        assert!(matches!(outcome, ProgressOutcome::Stale));
        assert_eq!(store.snapshot().await.unwrap().done, 0);
    }

    #[tokio::test]
    async fn test_terminal_reported_once() {
        let store = JobStore::new();
        let ticket = store.begin(album(), 0, String::new()).await.unwrap();
        let id = JobId::new("1");
        store.attach(ticket, id.clone(), None).await;

        let mut done = progress(JobStatus::Completed, 2, 2);
        done.failed_tracks = vec!["X".into()];
        assert!(matches!(
            store.apply_progress(&id, &done).await,
            ProgressOutcome::Terminal(ref r) if r.failed_items == vec!["X".to_string()]
        ));
        assert!(matches!(
            store.apply_progress(&id, &done).await,
            ProgressOutcome::Stale
        ));
    }

    #[tokio::test]
    async fn test_attach_after_discard_is_rejected() {
        let store = JobStore::new();
        let ticket = store.begin(album(), 0, String::new()).await.unwrap();
        store.discard(ticket).await;
        assert!(!store.attach(ticket, JobId::new("1"), Some(3)).await);
    }
}
