//! Bridge host: the engine's view of the in-player adapter.
//!
//! The adapter script runs inside the player and speaks to us over the HTTP
//! API.  It pushes what it sees (location, rendered rows, now playing,
//! recorded audio slices) and pulls what it should show (row overlays,
//! toasts, dialogs, recorder on/off).  `BridgeHost` holds that exchanged
//! state and implements the host traits on top of it.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use stash_proto::job::JobContext;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::host::{AudioSource, Host, Modal, NowPlaying, Recorder, RowSurface, Severity};
use crate::link;
use crate::overlay::RowState;

/// One rendered list row as the adapter found it in the markup.
///
/// Older player builds expose `aria-rowindex` (1-based, header row first);
/// newer ones carry an explicit 0-based `index`.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct RowMarker {
    #[serde(default)]
    pub index: Option<usize>,
    #[serde(default, alias = "aria-rowindex")]
    pub aria_rowindex: Option<usize>,
}

impl RowMarker {
    pub fn ordinal(&self) -> Option<usize> {
        self.index
            .or_else(|| self.aria_rowindex.and_then(|i| i.checked_sub(2)))
    }
}

/// `POST /api/view`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ViewUpdate {
    /// Player location path, e.g. `/album/<id>`.
    #[serde(default)]
    pub path: Option<String>,
    /// Alternative to `path`: a `spotify:` URI or web URL of the page.
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub rows: Vec<RowMarker>,
    /// Whether the adapter found a media element it can record from.
    #[serde(default)]
    pub can_record: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutboxItem {
    Toast { message: String, severity: Severity },
    ShowModal { modal: Modal },
    HideModal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverlayRow {
    pub index: usize,
    #[serde(flatten)]
    pub state: RowState,
}

/// What the adapter's media recorder should be doing.
///
/// When `recording` turns false or `generation` moves on, the adapter stops
/// its recorder and posts the final slice under the old generation with
/// `last` set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecorderControl {
    pub recording: bool,
    /// Slices must be tagged with this; anything older is dropped.
    pub generation: u64,
    pub slice_ms: u64,
}

#[derive(Default)]
struct RecorderSlot {
    generation: u64,
    sink: Option<mpsc::UnboundedSender<Vec<u8>>>,
    slice_ms: u64,
    /// Stopped recorders still owed their last slice, by generation.
    draining: BTreeMap<u64, mpsc::UnboundedSender<Vec<u8>>>,
}

#[derive(Default)]
struct BridgeState {
    location: Option<JobContext>,
    rows: Vec<usize>,
    can_record: bool,
    mime_type: Option<String>,
    now_playing: Option<NowPlaying>,
    overlays: BTreeMap<usize, RowState>,
    outbox: Vec<OutboxItem>,
    modal: Option<Modal>,
    recorder: RecorderSlot,
}

#[derive(Clone, Default)]
pub struct BridgeHost {
    state: Arc<Mutex<BridgeState>>,
}

impl BridgeHost {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BridgeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn apply_view(&self, update: ViewUpdate) {
        let location = update
            .path
            .as_deref()
            .and_then(link::parse_path)
            .or_else(|| update.uri.as_deref().and_then(link::parse_any));
        let mut rows: Vec<usize> = update.rows.iter().filter_map(RowMarker::ordinal).collect();
        rows.sort_unstable();
        rows.dedup();

        let mut state = self.lock();
        if state.location != location {
            debug!("bridge: location {:?} -> {:?}", state.location, location);
        }
        state.location = location;
        state.rows = rows;
        state.can_record = update.can_record;
    }

    pub fn set_now_playing(&self, now_playing: Option<NowPlaying>) {
        self.lock().now_playing = now_playing;
    }

    pub fn overlay(&self) -> Vec<OverlayRow> {
        self.lock()
            .overlays
            .iter()
            .map(|(&index, &state)| OverlayRow { index, state })
            .collect()
    }

    pub fn drain_outbox(&self) -> Vec<OutboxItem> {
        std::mem::take(&mut self.lock().outbox)
    }

    /// Dialog currently meant to be open, if any.
    pub fn modal(&self) -> Option<Modal> {
        self.lock().modal.clone()
    }

    pub fn recorder_control(&self) -> RecorderControl {
        let state = self.lock();
        RecorderControl {
            recording: state.recorder.sink.is_some(),
            generation: state.recorder.generation,
            slice_ms: state.recorder.slice_ms,
        }
    }

    /// Deliver one recorded slice.  `last` marks the final slice of a stopped
    /// recorder and closes its sink.  Returns false when no recorder with
    /// that generation is running or draining.
    pub fn push_slice(
        &self,
        generation: u64,
        data: Vec<u8>,
        mime_type: Option<String>,
        last: bool,
    ) -> bool {
        let mut state = self.lock();
        if let Some(mime) = mime_type.filter(|m| !m.is_empty()) {
            state.mime_type = Some(mime);
        }
        let slot = &mut state.recorder;
        slot.draining.retain(|_, sink| !sink.is_closed());
        if slot.generation == generation {
            if let Some(sink) = slot.sink.as_ref() {
                return sink.send(data).is_ok();
            }
        }
        if last {
            slot.draining
                .remove(&generation)
                .is_some_and(|sink| sink.send(data).is_ok())
        } else {
            slot.draining
                .get(&generation)
                .is_some_and(|sink| sink.send(data).is_ok())
        }
    }
}

impl Host for BridgeHost {
    fn location(&self) -> Option<JobContext> {
        self.lock().location.clone()
    }

    fn now_playing(&self) -> Option<NowPlaying> {
        self.lock().now_playing.clone()
    }

    fn notify(&self, message: &str, severity: Severity) {
        self.lock().outbox.push(OutboxItem::Toast {
            message: message.to_string(),
            severity,
        });
    }

    fn show_modal(&self, modal: Modal) {
        let mut state = self.lock();
        state.modal = Some(modal.clone());
        state.outbox.push(OutboxItem::ShowModal { modal });
    }

    fn hide_modal(&self) {
        let mut state = self.lock();
        if state.modal.take().is_some() {
            state.outbox.push(OutboxItem::HideModal);
        }
    }
}

impl RowSurface for BridgeHost {
    fn visible_rows(&self) -> Vec<usize> {
        self.lock().rows.clone()
    }

    fn paint(&self, ordinal: usize, state: RowState) {
        self.lock().overlays.insert(ordinal, state);
    }

    fn clear(&self, ordinal: usize) {
        self.lock().overlays.remove(&ordinal);
    }
}

struct BridgeRecorder {
    state: Arc<Mutex<BridgeState>>,
    generation: u64,
}

impl Recorder for BridgeRecorder {
    fn stop(self: Box<Self>) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let slot = &mut state.recorder;
        if slot.generation == self.generation {
            if let Some(sink) = slot.sink.take() {
                slot.draining.insert(self.generation, sink);
            }
        }
    }
}

impl AudioSource for BridgeHost {
    fn mime_type(&self) -> Option<String> {
        self.lock().mime_type.clone()
    }

    fn start(&self, slice: Duration, sink: mpsc::UnboundedSender<Vec<u8>>) -> Result<Box<dyn Recorder>> {
        let mut state = self.lock();
        if !state.can_record {
            return Err(EngineError::CaptureUnavailable(
                "the player has no recordable audio element".into(),
            ));
        }
        let slot = &mut state.recorder;
        if let Some(previous) = slot.sink.take() {
            slot.draining.insert(slot.generation, previous);
        }
        slot.draining.retain(|_, tail| !tail.is_closed());
        slot.generation += 1;
        slot.sink = Some(sink);
        slot.slice_ms = slice.as_millis() as u64;
        Ok(Box::new(BridgeRecorder {
            state: Arc::clone(&self.state),
            generation: slot.generation,
        }))
    }
}
