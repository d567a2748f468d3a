//! Capture session manager.
//!
//! Records whatever the host is playing, one item at a time, and uploads each
//! finished recording to the backend under the item's name.
//!
//! ```text
//!  idle ──start──▶ recording(A) ──now playing B──▶ flush A ─▶ recording(B)
//!   ▲                                                             │
//!   └──────────────────────────── stop (flush B) ◀────────────────┘
//! ```
//!
//! The manager itself only switches recorders.  Slices of each item are
//! gathered by a collector task, and packaging plus upload run on their own
//! task, so whoever holds the manager never waits on the network.
//!
//! Nothing in here touches the job record: a failed recorder or upload is
//! logged and the session carries on.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use serde::Serialize;
use stash_proto::config::CaptureConfig;
use stash_proto::protocol::CaptureUpload;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::BackendClient;
use crate::error::Result;
use crate::host::{AudioSource, NowPlaying, Recorder};

#[derive(Debug, Clone, Default, Serialize)]
pub struct CaptureSession {
    pub active: bool,
    pub current_item: Option<String>,
    pub destination_path: String,
    pub captured_count: u32,
}

/// The item being recorded right now.
struct Recording {
    name: String,
    recorder: Box<dyn Recorder>,
    stopped: CancellationToken,
    collector: JoinHandle<Vec<u8>>,
}

/// A session that was just stopped; its last uploads may still be running.
pub struct StoppedSession {
    uploads: Vec<JoinHandle<()>>,
    saved: Arc<AtomicU32>,
}

impl StoppedSession {
    /// Wait for the outstanding uploads and return how many items were saved.
    pub async fn finish(self) -> u32 {
        for upload in self.uploads {
            if let Err(e) = upload.await {
                warn!("capture: upload task failed: {}", e);
            }
        }
        self.saved.load(Ordering::SeqCst)
    }
}

pub struct CaptureManager {
    session: CaptureSession,
    audio: Arc<dyn AudioSource>,
    backend: BackendClient,
    config: CaptureConfig,
    current: Option<Recording>,
    uploads: Vec<JoinHandle<()>>,
    /// Saved-item counter of the running session.
    saved: Arc<AtomicU32>,
}

impl CaptureManager {
    pub fn new(audio: Arc<dyn AudioSource>, backend: BackendClient, config: CaptureConfig) -> Self {
        Self {
            session: CaptureSession::default(),
            audio,
            backend,
            config,
            current: None,
            uploads: Vec::new(),
            saved: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn snapshot(&self) -> CaptureSession {
        CaptureSession {
            captured_count: self.saved.load(Ordering::SeqCst),
            ..self.session.clone()
        }
    }

    pub fn is_active(&self) -> bool {
        self.session.active
    }

    /// Arm the session and record the current item, if any.
    ///
    /// With nothing playing, or when the audio source refuses to record, the
    /// session stays armed and the next now-playing change tries again.
    pub fn start(&mut self, destination_path: String, now_playing: Option<&NowPlaying>) {
        if self.session.active {
            debug!("capture: already active");
            return;
        }
        self.session = CaptureSession {
            active: true,
            destination_path,
            ..Default::default()
        };
        self.saved = Arc::new(AtomicU32::new(0));

        match now_playing.filter(|np| !np.name.trim().is_empty()) {
            Some(item) => self.begin_or_skip(item.name.trim()),
            None => info!("capture: armed, waiting for playback"),
        }
        info!("capture: started into '{}'", self.session.destination_path);
    }

    /// React to the host switching items.  The previous item is handed to an
    /// upload task before the new recording starts.
    pub fn on_now_playing(&mut self, now_playing: Option<&NowPlaying>) {
        if !self.session.active {
            return;
        }
        let next = now_playing
            .map(|np| np.name.trim())
            .filter(|name| !name.is_empty());
        if next.is_some() && next == self.session.current_item.as_deref() {
            return;
        }

        self.uploads.retain(|upload| !upload.is_finished());
        if let Some(upload) = self.finish_item() {
            self.uploads.push(upload);
        }
        if let Some(name) = next {
            self.begin_or_skip(name);
        }
    }

    /// Flush the current item and go idle.  The returned handle resolves to
    /// the number of items saved during the session.
    pub fn stop(&mut self) -> Option<StoppedSession> {
        if !self.session.active {
            return None;
        }
        let mut uploads = std::mem::take(&mut self.uploads);
        uploads.extend(self.finish_item());
        let saved = std::mem::replace(&mut self.saved, Arc::new(AtomicU32::new(0)));
        self.session = CaptureSession::default();
        info!("capture: stopped, {} uploads outstanding", uploads.len());
        Some(StoppedSession { uploads, saved })
    }

    fn begin_or_skip(&mut self, name: &str) {
        if let Err(e) = self.begin(name) {
            warn!("capture: could not record '{}': {}", name, e);
        }
    }

    fn begin(&mut self, name: &str) -> Result<()> {
        let (tx, rx) = mpsc::unbounded_channel();
        let recorder = self.audio.start(self.config.slice(), tx)?;
        let stopped = CancellationToken::new();
        let collector = tokio::spawn(collect(rx, stopped.clone(), self.config.tail_drain()));
        self.current = Some(Recording {
            name: name.to_string(),
            recorder,
            stopped,
            collector,
        });
        self.session.current_item = Some(name.to_string());
        debug!("capture: recording '{}'", name);
        Ok(())
    }

    fn finish_item(&mut self) -> Option<JoinHandle<()>> {
        self.session.current_item = None;
        let recording = self.current.take()?;
        recording.recorder.stop();
        recording.stopped.cancel();

        let upload = Upload {
            name: recording.name,
            path: self.session.destination_path.clone(),
            audio: Arc::clone(&self.audio),
            backend: self.backend.clone(),
            fallback_mime: self.config.mime_type.clone(),
            min_bytes: self.config.min_upload_bytes,
            saved: Arc::clone(&self.saved),
        };
        Some(tokio::spawn(upload.run(recording.collector)))
    }
}

/// Gather the slices of one item.  After the recorder is stopped the sink
/// may still deliver a tail; it is accepted until the sink closes or
/// `tail_drain` runs out.
async fn collect(
    mut rx: mpsc::UnboundedReceiver<Vec<u8>>,
    stopped: CancellationToken,
    tail_drain: Duration,
) -> Vec<u8> {
    let mut data = Vec::new();
    loop {
        tokio::select! {
            chunk = rx.recv() => match chunk {
                Some(chunk) => data.extend_from_slice(&chunk),
                None => return data,
            },
            _ = stopped.cancelled() => break,
        }
    }

    let deadline = tokio::time::sleep(tail_drain);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            chunk = rx.recv() => match chunk {
                Some(chunk) => data.extend_from_slice(&chunk),
                None => break,
            },
            _ = &mut deadline => {
                debug!("capture: recorder tail not closed after {:?}", tail_drain);
                break;
            }
        }
    }
    data
}

/// A finished item on its way to the backend.
struct Upload {
    name: String,
    path: String,
    audio: Arc<dyn AudioSource>,
    backend: BackendClient,
    fallback_mime: String,
    min_bytes: usize,
    saved: Arc<AtomicU32>,
}

impl Upload {
    async fn run(self, collector: JoinHandle<Vec<u8>>) {
        let data = match collector.await {
            Ok(data) => data,
            Err(e) => {
                warn!("capture: collector for '{}' failed: {}", self.name, e);
                return;
            }
        };
        if data.len() < self.min_bytes {
            debug!(
                "capture: dropping '{}' ({} bytes below threshold)",
                self.name,
                data.len()
            );
            return;
        }

        let upload = CaptureUpload {
            name: self.name,
            data: base64::engine::general_purpose::STANDARD.encode(&data),
            mime_type: self.audio.mime_type().unwrap_or(self.fallback_mime),
            path: self.path,
        };
        match self.backend.upload_capture(&upload).await {
            Ok(true) => {
                self.saved.fetch_add(1, Ordering::SeqCst);
                info!("capture: saved '{}' ({} bytes)", upload.name, data.len());
            }
            Ok(false) => {}
            Err(e) => warn!("capture: upload of '{}' failed: {}", upload.name, e),
        }
    }
}
