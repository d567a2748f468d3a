//! Engine: the one orchestrator per process.
//!
//! Owns the job store, the backend and catalog clients, the overlay renderer
//! and the capture manager, and is shared by `Arc` with every task that needs
//! them (poller, render loop, health loop, event subscribers, HTTP bridge).
//!
//! The job record is written only here and by the poller.  Each submission
//! gets its own `CancellationToken`; starting a newer job cancels the poller
//! of the previous one.

use std::sync::Arc;
use std::time::Duration;

use stash_proto::config::Config;
use stash_proto::job::{JobContext, JobRecord, JobStore};
use stash_proto::platform;
use stash_proto::protocol::{
    BackendSettings, DownloadRequest, JobId, SaveSettingsRequest,
};
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::action::{is_download_label, is_known_quality, Action, QUALITY_OPTIONS};
use crate::backend::BackendClient;
use crate::capture::{CaptureManager, CaptureSession};
use crate::error::{EngineError, Result};
use crate::events::{self, EngineEvent, EventSender};
use crate::host::{AudioSource, Host, Modal, ModalChoice, NowPlaying, RowSurface, Severity};
use crate::link;
use crate::overlay::OverlayRenderer;
use crate::poller::Poller;
use crate::resolver::{ResolvedCollection, Resolver};
use crate::subscribers;

pub const BUSY_NOTICE: &str = "A download is already in progress!";
pub const UNREACHABLE_NOTICE: &str =
    "Cannot reach the download server. Make sure it is running.";

pub struct Engine {
    config: Config,
    jobs: JobStore,
    backend: BackendClient,
    resolver: Resolver,
    poller: Poller,
    host: Arc<dyn Host>,
    surface: Arc<dyn RowSurface>,
    events: EventSender,
    /// Token of the poller watching the newest job.
    poll_token: Mutex<Option<CancellationToken>>,
    renderer: Mutex<OverlayRenderer>,
    capture: Mutex<CaptureManager>,
    /// None until the first health check has run.
    server_online: RwLock<Option<bool>>,
    /// Folder the backend saves into; refreshed from its settings.
    destination: RwLock<String>,
    last_now_playing: Mutex<Option<NowPlaying>>,
}

impl Engine {
    pub fn new(
        config: Config,
        host: Arc<dyn Host>,
        surface: Arc<dyn RowSurface>,
        audio: Arc<dyn AudioSource>,
    ) -> Arc<Self> {
        let jobs = JobStore::new();
        let backend = BackendClient::new(config.backend.url.clone());
        let events = events::channel();
        let poller = Poller {
            jobs: jobs.clone(),
            backend: backend.clone(),
            events: events.clone(),
            timing: config.timing.clone(),
        };
        let capture = CaptureManager::new(audio, backend.clone(), config.capture.clone());
        let destination = platform::music_dir().to_string_lossy().into_owned();

        Arc::new(Self {
            resolver: Resolver::new(config.catalog.clone()),
            config,
            jobs,
            backend,
            poller,
            host,
            surface,
            events,
            poll_token: Mutex::new(None),
            renderer: Mutex::new(OverlayRenderer::new()),
            capture: Mutex::new(capture),
            server_online: RwLock::new(None),
            destination: RwLock::new(destination),
            last_now_playing: Mutex::new(None),
        })
    }

    // ── Accessors ────────────────────────────────────────────────────────────

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn jobs(&self) -> &JobStore {
        &self.jobs
    }

    pub fn host(&self) -> &Arc<dyn Host> {
        &self.host
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub async fn server_online(&self) -> Option<bool> {
        *self.server_online.read().await
    }

    pub async fn destination(&self) -> String {
        self.destination.read().await.clone()
    }

    pub async fn capture_session(&self) -> CaptureSession {
        self.capture.lock().await.snapshot()
    }

    pub async fn capture_active(&self) -> bool {
        self.capture.lock().await.is_active()
    }

    // ── Actions ──────────────────────────────────────────────────────────────

    /// Route one host action.  Failures have already been reported to the
    /// user by the time this returns.
    pub async fn dispatch(self: &Arc<Self>, action: Action) {
        debug!("engine: dispatch {:?}", action);
        match action {
            Action::Download { url, quality } => {
                let _ = self.download(&url, &quality).await;
            }
            Action::RequestDownload => self.request_download(),
            Action::ContextMenu { uri } => match link::parse_any(&uri) {
                Some(context) => self.show_quality_modal(&context),
                None => self.host.notify("This item cannot be downloaded.", Severity::Warning),
            },
            Action::NativeButton { label } => {
                if is_download_label(&label) {
                    self.request_download();
                } else {
                    debug!("engine: ignoring button '{}'", label);
                }
            }
            Action::Shortcut => {
                if self.capture_active().await {
                    self.stop_capture().await;
                } else {
                    self.request_download();
                }
            }
            Action::StartCapture { path } => self.start_capture(path).await,
            Action::StopCapture => {
                self.stop_capture().await;
            }
            Action::DismissModal => self.host.hide_modal(),
        }
    }

    /// Collection the user is looking at, else the one being played from.
    pub fn current_context(&self) -> Option<JobContext> {
        self.host.location().or_else(|| {
            self.host
                .now_playing()
                .and_then(|np| np.context_uri)
                .and_then(|uri| link::parse_any(&uri))
        })
    }

    fn request_download(&self) {
        match self.current_context() {
            Some(context) => self.show_quality_modal(&context),
            None => self.host.notify(
                "Open an album, playlist or track to download it.",
                Severity::Warning,
            ),
        }
    }

    /// Configured bitrate, or the highest one when the config names none we
    /// offer.
    pub fn default_quality(&self) -> &str {
        let configured = self.config.backend.default_quality.as_str();
        if is_known_quality(configured) {
            configured
        } else {
            QUALITY_OPTIONS[QUALITY_OPTIONS.len() - 1]
        }
    }

    fn show_quality_modal(&self, context: &JobContext) {
        let url = link::web_url(context);
        let preselected = self.default_quality();
        let mut choices: Vec<ModalChoice> = QUALITY_OPTIONS
            .iter()
            .rev()
            .map(|q| ModalChoice {
                label: format!("{} kbps", q),
                action: Action::Download {
                    url: url.clone(),
                    quality: q.to_string(),
                },
                preselected: *q == preselected,
            })
            .collect();
        choices.push(ModalChoice {
            label: "Cancel".to_string(),
            action: Action::DismissModal,
            preselected: false,
        });
        self.host.show_modal(Modal {
            title: format!("Download {}", context.collection_type),
            lines: vec![url],
            choices,
        });
    }

    /// Resolve `url` and start a job for it.
    pub async fn download(self: &Arc<Self>, url: &str, quality: &str) -> Result<JobId> {
        self.host.hide_modal();
        let Some(context) = link::parse_any(url) else {
            self.host.notify("This link cannot be downloaded.", Severity::Warning);
            return Err(EngineError::UnsupportedLink(url.to_string()));
        };
        let quality = if is_known_quality(quality) {
            quality
        } else {
            warn!(
                "engine: unknown quality '{}', using {}",
                quality,
                self.default_quality()
            );
            self.default_quality()
        };

        // Checked before resolving so a rejected start costs no requests.
        if self.jobs.is_busy().await {
            self.host.notify(BUSY_NOTICE, Severity::Warning);
            return Err(EngineError::Busy);
        }

        let resolved = self
            .resolver
            .resolve(context.collection_type, &context.collection_id)
            .await;
        if resolved.is_empty() {
            warn!(
                "engine: could not resolve {} {}, backend will enumerate it",
                context.collection_type, context.collection_id
            );
        }
        let url = link::web_url(&context);
        self.start(context, &url, quality, Some(resolved)).await
    }

    /// Submit a job.  Single flight: refused while another job is starting
    /// or downloading.
    pub async fn start(
        self: &Arc<Self>,
        context: JobContext,
        url: &str,
        quality: &str,
        resolved: Option<ResolvedCollection>,
    ) -> Result<JobId> {
        let resolved = resolved.unwrap_or_default();
        let destination = self.destination().await;
        let ticket = match self
            .jobs
            .begin(context.clone(), resolved.len() as u32, destination)
            .await
        {
            Ok(ticket) => ticket,
            Err(live) => {
                debug!("engine: start refused, job {:?} is live", live.id);
                self.host.notify(BUSY_NOTICE, Severity::Warning);
                return Err(EngineError::Busy);
            }
        };
        if let Some(previous) = self.poll_token.lock().await.take() {
            previous.cancel();
        }
        self.render_now().await;

        self.host.notify(
            &format!("Starting download at {} kbps…", quality),
            Severity::Info,
        );
        info!(
            "engine: submitting {} ({} items resolved) at {} kbps",
            url,
            resolved.len(),
            quality
        );

        let request = DownloadRequest {
            url: url.to_string(),
            quality: quality.to_string(),
            tracks: (!resolved.is_empty()).then(|| resolved.track_refs()),
            collection_name: resolved.collection_display_name.clone(),
        };

        let submitted = match self.backend.submit(&request).await {
            Ok(submitted) => submitted,
            Err(e) => {
                warn!("engine: submission of {} failed: {}", url, e);
                self.jobs.discard(ticket).await;
                self.render_now().await;
                let notice = match &e {
                    EngineError::SubmissionRejected(reason) => format!("Download failed: {}", reason),
                    _ => UNREACHABLE_NOTICE.to_string(),
                };
                self.host.notify(&notice, Severity::Error);
                return Err(e);
            }
        };

        if !self
            .jobs
            .attach(ticket, submitted.id.clone(), submitted.total)
            .await
        {
            warn!("engine: job {} acknowledged after it was dropped", submitted.id);
            return Ok(submitted.id);
        }
        let total = self
            .jobs
            .snapshot()
            .await
            .map(|r| r.total)
            .unwrap_or_default();
        info!("engine: job {} started, {} items", submitted.id, total);
        let _ = self.events.send(EngineEvent::JobStarted {
            id: submitted.id.clone(),
            context,
            total,
        });

        let token = CancellationToken::new();
        *self.poll_token.lock().await = Some(token.clone());
        self.poller.spawn(ticket, submitted.id.clone(), token);
        Ok(submitted.id)
    }

    /// Repaint the on-screen list from the live record.
    pub async fn render_now(&self) -> usize {
        let record = self.jobs.snapshot().await;
        let on_screen = self.host.location();
        self.renderer
            .lock()
            .await
            .tick(record.as_ref(), on_screen.as_ref(), self.surface.as_ref())
    }

    // ── Playback & capture ───────────────────────────────────────────────────

    /// Entry point for now-playing notifications.  Repeats are dropped.
    pub async fn now_playing_changed(&self, now_playing: Option<NowPlaying>) {
        let mut last = self.last_now_playing.lock().await;
        if *last == now_playing {
            return;
        }
        *last = now_playing.clone();
        drop(last);
        let _ = self.events.send(EngineEvent::NowPlayingChanged(now_playing));
    }

    /// Arm capture mode.  A recorder that cannot start only costs the current
    /// item; the session stays armed for the next one.
    pub async fn start_capture(&self, path: Option<String>) {
        self.host.hide_modal();
        let path = match path.filter(|p| !p.trim().is_empty()) {
            Some(path) => path,
            None => self.destination().await,
        };
        let now_playing = self.host.now_playing();
        self.capture
            .lock()
            .await
            .start(path.clone(), now_playing.as_ref());
        self.host.notify(
            &format!("Capture mode on. Recording what plays into {}", path),
            Severity::Success,
        );
    }

    pub async fn stop_capture(&self) -> u32 {
        let Some(stopped) = self.capture.lock().await.stop() else {
            return 0;
        };
        let captured = stopped.finish().await;
        self.host.notify(
            &format!("Capture stopped. {} tracks saved.", captured),
            Severity::Info,
        );
        captured
    }

    pub(crate) async fn capture_now_playing(&self, now_playing: Option<&NowPlaying>) {
        self.capture.lock().await.on_now_playing(now_playing);
    }

    /// Offer to record the items a finished job could not fetch.
    pub fn offer_capture(&self, record: &JobRecord) {
        let mut lines = vec![format!(
            "{} tracks could not be downloaded:",
            record.failed_items.len()
        )];
        lines.extend(record.failed_items.iter().cloned());
        lines.push("Play them with capture mode on to record them instead.".to_string());
        self.host.show_modal(Modal {
            title: "Some tracks failed".to_string(),
            lines,
            choices: vec![
                ModalChoice {
                    label: "Record while playing".to_string(),
                    action: Action::StartCapture {
                        path: Some(record.destination_path.clone()),
                    },
                    preselected: true,
                },
                ModalChoice {
                    label: "Dismiss".to_string(),
                    action: Action::DismissModal,
                    preselected: false,
                },
            ],
        });
    }

    // ── Backend settings & health ────────────────────────────────────────────

    pub async fn check_health(&self) -> bool {
        let online = self.backend.health().await;
        let previous = self.server_online.write().await.replace(online);
        if previous != Some(online) {
            info!("engine: backend is {}", if online { "online" } else { "offline" });
            if previous.is_some() {
                if online {
                    self.host.notify("Download server is back online.", Severity::Success);
                } else {
                    self.host.notify("Download server went offline.", Severity::Warning);
                }
            }
        }
        if online {
            match self.backend.settings().await {
                Ok(settings) if !settings.download_path.trim().is_empty() => {
                    *self.destination.write().await = settings.download_path;
                }
                Ok(_) => {}
                Err(e) => debug!("engine: could not read backend settings: {}", e),
            }
        }
        online
    }

    pub async fn settings(&self) -> Result<BackendSettings> {
        self.backend.settings().await
    }

    pub async fn save_settings(&self, request: SaveSettingsRequest) -> Result<()> {
        self.backend.save_settings(&request).await?;
        if !request.path.trim().is_empty() {
            *self.destination.write().await = request.path;
        }
        Ok(())
    }

    // ── Background tasks ─────────────────────────────────────────────────────

    /// Start the render loop, the health loop and the event subscribers.
    pub fn spawn_background(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let render = {
            let engine = Arc::clone(self);
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(engine.config.timing.render_tick());
                tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    tick.tick().await;
                    engine.render_now().await;
                }
            })
        };

        let health = {
            let engine = Arc::clone(self);
            tokio::spawn(async move {
                let period = Duration::from_secs(engine.config.backend.health_interval_secs.max(1));
                let mut tick = tokio::time::interval(period);
                tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tick.tick().await;
                    engine.check_health().await;
                }
            })
        };

        vec![
            render,
            health,
            subscribers::spawn_notifications(Arc::clone(self)),
            subscribers::spawn_capture(Arc::clone(self)),
        ]
    }
}
