use stash_proto::job::{JobContext, JobRecord};
use stash_proto::protocol::JobId;
use tokio::sync::broadcast;

use crate::host::NowPlaying;

/// Everything the engine announces to its subscribers.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// Backend acknowledged a submission.
    JobStarted {
        id: JobId,
        context: JobContext,
        total: u32,
    },
    /// A poll response was applied to the live record.
    ProgressUpdated(JobRecord),
    /// The live record reached `completed` or `failed`.
    JobTerminal(JobRecord),
    /// The host switched to another item (None = playback stopped).
    NowPlayingChanged(Option<NowPlaying>),
}

pub type EventSender = broadcast::Sender<EngineEvent>;

pub fn channel() -> EventSender {
    broadcast::channel(256).0
}
