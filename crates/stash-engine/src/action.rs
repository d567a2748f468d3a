//! Action enum: everything the host adapter can ask the engine to do.

use serde::{Deserialize, Serialize};

/// Bitrates offered in the quality dialog, in kbps.
pub const QUALITY_OPTIONS: [&str; 3] = ["128", "160", "320"];

/// Labels of the player's own download button across the locales we know.
const DOWNLOAD_LABELS: &[&str] = &[
    "download",
    "descargar",
    "télécharger",
    "herunterladen",
    "scarica",
    "baixar",
    "transferir",
    "downloaden",
    "pobierz",
    "ladda ned",
    "last ned",
    "hent",
    "lataa",
    "indir",
    "скачать",
    "завантажити",
    "ダウンロード",
    "다운로드",
    "下载",
    "下載",
    "unduh",
    "muat turun",
    "tải xuống",
    "ดาวน์โหลด",
];

/// True when `label` is the host's native download button in some locale.
pub fn is_download_label(label: &str) -> bool {
    let label = label.trim().to_lowercase();
    !label.is_empty() && DOWNLOAD_LABELS.iter().any(|l| l.to_lowercase() == label)
}

pub fn is_known_quality(quality: &str) -> bool {
    QUALITY_OPTIONS.contains(&quality)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    // ── Acquisition ──────────────────────────────────────────────────────────
    /// Start a download of `url` right away.
    Download { url: String, quality: String },
    /// Ask for a quality, then download what is on screen.
    RequestDownload,
    /// Collection context-menu entry was picked for `uri`.
    ContextMenu { uri: String },
    /// A click on a host button the adapter intercepted.
    NativeButton { label: String },
    /// Global keyboard shortcut.
    Shortcut,

    // ── Capture ──────────────────────────────────────────────────────────────
    /// Start recording; `path` defaults to the backend download folder.
    StartCapture {
        #[serde(default)]
        path: Option<String>,
    },
    StopCapture,

    // ── Modal ────────────────────────────────────────────────────────────────
    DismissModal,
}
