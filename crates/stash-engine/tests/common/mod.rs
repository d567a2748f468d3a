#![allow(dead_code)]

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use stash_engine::error::Result;
use stash_engine::host::{AudioSource, Host, Modal, NowPlaying, Recorder, RowSurface, Severity};
use stash_engine::overlay::RowState;
use stash_proto::config::Config;
use stash_proto::job::JobContext;
use tokio::sync::mpsc;
use wiremock::{Request, Respond, ResponseTemplate};

// ── Fake host ────────────────────────────────────────────────────────────────

/// Player stand-in that records everything the engine asks of it.
#[derive(Default)]
pub struct FakeHost {
    pub location: Mutex<Option<JobContext>>,
    pub playing: Mutex<Option<NowPlaying>>,
    pub notices: Mutex<Vec<(String, Severity)>>,
    pub modals: Mutex<Vec<Modal>>,
    pub rows: Mutex<Vec<usize>>,
    pub overlays: Mutex<BTreeMap<usize, RowState>>,
}

impl FakeHost {
    pub fn showing(context: JobContext, rows: usize) -> Arc<Self> {
        let host = Self::default();
        *host.location.lock().unwrap() = Some(context);
        *host.rows.lock().unwrap() = (0..rows).collect();
        Arc::new(host)
    }

    pub fn notices(&self) -> Vec<(String, Severity)> {
        self.notices.lock().unwrap().clone()
    }

    pub fn has_notice(&self, needle: &str) -> bool {
        self.notices
            .lock()
            .unwrap()
            .iter()
            .any(|(message, _)| message.contains(needle))
    }

    pub fn last_modal(&self) -> Option<Modal> {
        self.modals.lock().unwrap().last().cloned()
    }

    /// Overlay per rendered row, in row order.
    pub fn row_states(&self) -> Vec<Option<RowState>> {
        let overlays = self.overlays.lock().unwrap();
        self.rows
            .lock()
            .unwrap()
            .iter()
            .map(|i| overlays.get(i).copied())
            .collect()
    }
}

impl Host for FakeHost {
    fn location(&self) -> Option<JobContext> {
        self.location.lock().unwrap().clone()
    }

    fn now_playing(&self) -> Option<NowPlaying> {
        self.playing.lock().unwrap().clone()
    }

    fn notify(&self, message: &str, severity: Severity) {
        self.notices
            .lock()
            .unwrap()
            .push((message.to_string(), severity));
    }

    fn show_modal(&self, modal: Modal) {
        self.modals.lock().unwrap().push(modal);
    }

    fn hide_modal(&self) {}
}

impl RowSurface for FakeHost {
    fn visible_rows(&self) -> Vec<usize> {
        self.rows.lock().unwrap().clone()
    }

    fn paint(&self, ordinal: usize, state: RowState) {
        self.overlays.lock().unwrap().insert(ordinal, state);
    }

    fn clear(&self, ordinal: usize) {
        self.overlays.lock().unwrap().remove(&ordinal);
    }
}

// ── Fake audio ───────────────────────────────────────────────────────────────

/// Audio source whose "recording" is whatever the test feeds it.
#[derive(Default)]
pub struct FakeAudio {
    sink: Arc<Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>>,
    pub starts: AtomicUsize,
}

impl FakeAudio {
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    /// Push bytes into the running recorder.  False when none is running.
    pub fn feed(&self, bytes: &[u8]) -> bool {
        match self.sink.lock().unwrap().as_ref() {
            Some(sink) => sink.send(bytes.to_vec()).is_ok(),
            None => false,
        }
    }
}

struct FakeRecorder {
    sink: Arc<Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>>,
}

impl Recorder for FakeRecorder {
    fn stop(self: Box<Self>) {
        self.sink.lock().unwrap().take();
    }
}

impl AudioSource for FakeAudio {
    fn mime_type(&self) -> Option<String> {
        Some("audio/webm;codecs=opus".to_string())
    }

    fn start(&self, _slice: Duration, sink: mpsc::UnboundedSender<Vec<u8>>) -> Result<Box<dyn Recorder>> {
        *self.sink.lock().unwrap() = Some(sink);
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeRecorder {
            sink: Arc::clone(&self.sink),
        }))
    }
}

// ── Config ───────────────────────────────────────────────────────────────────

/// Defaults with every timer shortened so flows finish in well under a second.
pub fn test_config(backend_url: &str, catalog_url: &str) -> Config {
    let mut config = Config::default();
    config.backend.url = backend_url.to_string();
    config.backend.health_interval_secs = 60;
    config.catalog.base_url = catalog_url.to_string();
    config.timing.poll_interval_ms = 40;
    config.timing.render_tick_ms = 15;
    config.timing.completed_grace_ms = 400;
    config.timing.failed_grace_ms = 400;
    config.timing.capture_offer_delay_ms = 60;
    config.capture.slice_ms = 10;
    config.capture.min_upload_bytes = 4;
    config.capture.tail_drain_ms = 200;
    config.http.enabled = false;
    config
}

// ── Mock responders ──────────────────────────────────────────────────────────

/// Replies with each JSON body in turn, then keeps repeating the last one.
pub struct Sequence {
    bodies: Vec<serde_json::Value>,
    next: AtomicUsize,
}

impl Sequence {
    pub fn new(bodies: Vec<serde_json::Value>) -> Self {
        Self {
            bodies,
            next: AtomicUsize::new(0),
        }
    }
}

impl Respond for Sequence {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let i = self.next.fetch_add(1, Ordering::SeqCst);
        let body = &self.bodies[i.min(self.bodies.len() - 1)];
        ResponseTemplate::new(200).set_body_json(body)
    }
}

/// Catalog page endpoint over a collection of `size` tracks named
/// `Track 0..size`, honouring `offset` and `limit`.
pub struct Catalog {
    pub size: usize,
    /// Entries at these positions come back without a name.
    pub nameless: Vec<usize>,
    /// Playlist pages wrap each track in `{"track": ...}`.
    pub wrapped: bool,
}

impl Respond for Catalog {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let query = |key: &str| {
            request
                .url
                .query_pairs()
                .find(|(k, _)| k == key)
                .and_then(|(_, v)| v.parse::<usize>().ok())
        };
        let offset = query("offset").unwrap_or(0);
        let limit = query("limit").unwrap_or(50);
        let end = (offset + limit).min(self.size);

        let items: Vec<serde_json::Value> = (offset.min(end)..end)
            .map(|i| {
                let name = if self.nameless.contains(&i) {
                    serde_json::Value::Null
                } else {
                    serde_json::Value::String(format!("Track {}", i))
                };
                let track = serde_json::json!({ "name": name, "id": format!("id{}", i) });
                if self.wrapped {
                    serde_json::json!({ "track": track })
                } else {
                    track
                }
            })
            .collect();
        let next = if end < self.size {
            serde_json::Value::String(format!("{}?offset={}", request.url.path(), end))
        } else {
            serde_json::Value::Null
        };
        ResponseTemplate::new(200).set_body_json(serde_json::json!({ "items": items, "next": next }))
    }
}

// ── Waiting ──────────────────────────────────────────────────────────────────

/// Re-check `condition` until it holds or a few seconds pass.
pub async fn eventually<F, Fut>(mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}
