//! Seams to the media player hosting us.
//!
//! The engine never touches the player's UI directly.  Everything it needs
//! from the host (where the user is, what is playing, how to show a toast or
//! a dialog, which list rows exist, where audio comes from) goes through the
//! traits below.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use stash_proto::job::JobContext;
use tokio::sync::mpsc;

use crate::action::Action;
use crate::error::{EngineError, Result};
use crate::overlay::RowState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

/// Descriptor of the item the host is currently playing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NowPlaying {
    pub name: String,
    #[serde(default)]
    pub uri: Option<String>,
    /// Collection the item is being played from, if any.
    #[serde(default)]
    pub context_uri: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModalChoice {
    pub label: String,
    pub action: Action,
    /// Choice the dialog focuses when it opens.
    #[serde(default)]
    pub preselected: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Modal {
    pub title: String,
    #[serde(default)]
    pub lines: Vec<String>,
    pub choices: Vec<ModalChoice>,
}

pub trait Host: Send + Sync {
    /// Collection currently shown in the main view.
    fn location(&self) -> Option<JobContext>;
    fn now_playing(&self) -> Option<NowPlaying>;
    fn notify(&self, message: &str, severity: Severity);
    fn show_modal(&self, modal: Modal);
    fn hide_modal(&self);
}

/// The host's rendered list, addressed by ordinal position in the collection.
///
/// `paint` must upsert: painting a row twice leaves a single overlay.
pub trait RowSurface: Send + Sync {
    fn visible_rows(&self) -> Vec<usize>;
    fn paint(&self, ordinal: usize, state: RowState);
    fn clear(&self, ordinal: usize);
}

/// Something that can record what the host is playing.
pub trait AudioSource: Send + Sync {
    /// Container type of the produced bytes, when the source knows it.
    fn mime_type(&self) -> Option<String>;

    /// Start recording; one chunk per `slice` is sent on `sink` until stopped.
    fn start(&self, slice: Duration, sink: mpsc::UnboundedSender<Vec<u8>>)
        -> Result<Box<dyn Recorder>>;
}

pub trait Recorder: Send {
    /// Stop recording.  A trailing partial slice may still arrive on the sink
    /// afterwards; the source drops the sink once nothing more will come.
    fn stop(self: Box<Self>);
}

/// Audio source for hosts without a recordable media element.
pub struct NoAudio;

impl AudioSource for NoAudio {
    fn mime_type(&self) -> Option<String> {
        None
    }

    fn start(&self, _slice: Duration, _sink: mpsc::UnboundedSender<Vec<u8>>) -> Result<Box<dyn Recorder>> {
        Err(EngineError::CaptureUnavailable("no audio source".into()))
    }
}
