use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use capture_agent::AgentMessage;
use cdp_adapter::{Cdp, PageId, RawEvent};
use chrono::Utc;
use goldpath_core_types::{new_id, Fingerprint, GoldenSession, SessionMetadata, Viewport};
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::{broadcast, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dedup::ErrorDeduper;
use crate::log::ActionLog;
use crate::{RecorderConfig, RecorderError};

const PAGE_INFO_SCRIPT: &str =
    "({ width: window.innerWidth, height: window.innerHeight, userAgent: navigator.userAgent })";

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    width: u32,
    height: u32,
    user_agent: String,
}

/// Records one Golden Session from a live browser.
///
/// Owns the action log and the error map for the lifetime of the session. Browser events are
/// consumed by a single pump task; [`SessionRecorder::stop`] freezes and exports the session once.
pub struct SessionRecorder {
    cdp: Arc<dyn Cdp>,
    config: RecorderConfig,
    metadata: Mutex<SessionMetadata>,
    log: ActionLog,
    errors: ErrorDeduper,
    recording: AtomicBool,
    shutdown: CancellationToken,
    pump: Mutex<Option<JoinHandle<()>>>,
    stopped: AsyncMutex<Option<PathBuf>>,
    closed: watch::Sender<bool>,
}

impl SessionRecorder {
    /// Build a recorder without touching the browser. Events are fed through
    /// [`SessionRecorder::handle_event`].
    pub fn new(cdp: Arc<dyn Cdp>, config: RecorderConfig, start_url: Option<String>) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            cdp,
            config,
            metadata: Mutex::new(SessionMetadata::begin(new_id(), start_url)),
            log: ActionLog::new(),
            errors: ErrorDeduper::new(),
            recording: AtomicBool::new(true),
            shutdown: CancellationToken::new(),
            pump: Mutex::new(None),
            stopped: AsyncMutex::new(None),
            closed,
        }
    }

    /// Install the agent, open the start URL and begin consuming browser events.
    pub async fn start(
        cdp: Arc<dyn Cdp>,
        config: RecorderConfig,
        start_url: Option<String>,
    ) -> Result<Arc<Self>, RecorderError> {
        let recorder = Arc::new(Self::new(cdp, config, start_url.clone()));
        // Subscribe before the first navigation so no early event is missed.
        let events = recorder.cdp.subscribe();

        let install = recorder.config.agent.page_install()?;
        recorder.cdp.install(install).await?;
        let page = recorder.cdp.primary_page().await?;

        if let Some(viewport) = recorder.config.viewport {
            if let Err(err) = recorder
                .cdp
                .set_device_metrics(page, viewport.width, viewport.height, 1.0, false)
                .await
            {
                warn!(target: "recorder", ?err, "failed to apply viewport");
            }
        }
        if let Some(url) = start_url.as_deref() {
            let deadline = Duration::from_millis(recorder.config.navigation_timeout_ms);
            recorder.cdp.navigate(page, url, deadline).await?;
        }
        recorder.capture_page_info(page).await;

        let pump = tokio::spawn(Arc::clone(&recorder).pump(events));
        *recorder.pump.lock() = Some(pump);

        let session_id = recorder.metadata.lock().session_id.clone();
        info!(target: "recorder", %session_id, start_url = ?start_url, "recording started");
        Ok(recorder)
    }

    async fn capture_page_info(&self, page: PageId) {
        let info = match self.cdp.evaluate_script(page, PAGE_INFO_SCRIPT).await {
            Ok(value) => serde_json::from_value::<PageInfo>(value),
            Err(err) => {
                warn!(target: "recorder", ?err, "failed to read viewport and user agent");
                return;
            }
        };
        match info {
            Ok(info) => {
                let mut metadata = self.metadata.lock();
                metadata.viewport = Some(Viewport {
                    width: info.width,
                    height: info.height,
                });
                metadata.user_agent = Some(info.user_agent);
            }
            Err(err) => warn!(target: "recorder", ?err, "unexpected page info payload"),
        }
    }

    async fn pump(self: Arc<Self>, mut events: broadcast::Receiver<RawEvent>) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    self.drain(&mut events).await;
                    break;
                }
                received = events.recv() => match received {
                    Ok(event) => self.handle_event(event).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(target: "recorder", skipped, "event bus lagged; events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        self.closed.send_replace(true);
                        break;
                    }
                },
            }
        }
    }

    /// Handle whatever was queued before the stop without waiting for more.
    async fn drain(&self, events: &mut broadcast::Receiver<RawEvent>) {
        loop {
            match events.try_recv() {
                Ok(event) => self.handle_event(event).await,
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(target: "recorder", skipped, "event bus lagged while draining");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
    }

    /// Route one browser event into the session.
    pub async fn handle_event(&self, event: RawEvent) {
        match event {
            RawEvent::BindingCalled {
                page,
                name,
                payload,
                ..
            } if name == self.config.agent.binding => self.on_agent_message(page, &payload).await,
            RawEvent::Console { level, text, .. } => {
                if matches!(level.as_str(), "error" | "warning") {
                    let count = self
                        .errors
                        .record(Fingerprint::console(&level, &text), &text, Utc::now());
                    debug!(target: "recorder", %level, count, "console problem");
                }
            }
            RawEvent::NetworkFailed {
                url,
                method,
                error_text,
                canceled,
                ..
            } => {
                if !canceled {
                    self.errors.record(
                        Fingerprint::network(&method, error_text.as_str(), &url),
                        &format!("{method} {url} failed: {error_text}"),
                        Utc::now(),
                    );
                }
            }
            RawEvent::NetworkResponse {
                url,
                method,
                status,
                status_text,
                ..
            } if status >= 400 => {
                self.errors.record(
                    Fingerprint::network(&method, status.to_string(), &url),
                    &format!("{method} {url} -> {status} {status_text}"),
                    Utc::now(),
                );
            }
            RawEvent::PageNavigated {
                page,
                same_document: false,
                ..
            } => self.log.forget_page(page),
            RawEvent::DocumentLoaded { page, url, .. } => self.on_document_loaded(page, url).await,
            RawEvent::Disconnected { reason } => {
                info!(target: "recorder", %reason, "browser disconnected");
                self.closed.send_replace(true);
            }
            _ => {}
        }
    }

    async fn on_agent_message(&self, page: PageId, payload: &str) {
        let message = match AgentMessage::decode(payload) {
            Ok(message) => message,
            Err(err) => {
                warn!(target: "recorder", %err, "dropping agent payload");
                return;
            }
        };
        match message {
            AgentMessage::Action(captured) => {
                if !self.recording.load(Ordering::SeqCst) {
                    return;
                }
                if captured.since_load_ms < self.config.load_grace_ms {
                    let inflight = self.cdp.inflight(page).await;
                    if inflight > 0 {
                        debug!(
                            target: "recorder",
                            since_load_ms = captured.since_load_ms,
                            inflight,
                            "dropping action during initial load"
                        );
                        return;
                    }
                }
                match self.log.accept(page, captured) {
                    Ok(action) => info!(target: "recorder", "{}", action.summary()),
                    Err(err) => warn!(target: "recorder", %err, "dropping captured action"),
                }
            }
            AgentMessage::Settled {
                token,
                wait_condition,
            } => {
                if let Some(step) = self.log.settle(page, token, wait_condition) {
                    debug!(target: "recorder", step, "wait condition attached");
                }
            }
        }
    }

    async fn on_document_loaded(&self, page: PageId, url: Option<String>) {
        if self.log.is_empty() {
            return;
        }
        let url = match url {
            Some(url) => url,
            None => match self.cdp.current_url(page).await {
                Ok(url) => url,
                Err(err) => {
                    debug!(target: "recorder", ?err, "no url for loaded document");
                    return;
                }
            },
        };
        let window = Duration::from_millis(self.config.backfill_window_ms);
        if let Some(step) = self.log.backfill_navigation(&url, window) {
            debug!(target: "recorder", step, %url, "backfilled navigation wait condition");
        }
    }

    pub fn session_id(&self) -> String {
        self.metadata.lock().session_id.clone()
    }

    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::SeqCst)
    }

    pub fn action_count(&self) -> usize {
        self.log.len()
    }

    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// The session as it would be exported right now.
    pub fn snapshot(&self) -> GoldenSession {
        GoldenSession::freeze(
            self.metadata.lock().clone(),
            self.log.actions(),
            self.errors.entries(),
            Utc::now(),
        )
    }

    /// Resolves once the browser connection is gone.
    pub async fn wait_closed(&self) {
        let mut closed = self.closed.subscribe();
        // The sender lives in `self`, so `wait_for` only fails if the recorder is gone.
        let _ = closed.wait_for(|closed| *closed).await;
    }

    /// Stop recording, write the session and close the browser. Later calls return the same path
    /// without doing anything.
    pub async fn stop(&self) -> Result<PathBuf, RecorderError> {
        let mut stopped = self.stopped.lock().await;
        if let Some(path) = stopped.as_ref() {
            return Ok(path.clone());
        }
        self.shutdown.cancel();
        let pump = self.pump.lock().take();
        if let Some(pump) = pump {
            if let Err(err) = pump.await {
                warn!(target: "recorder", ?err, "event pump ended abnormally");
            }
        }
        self.recording.store(false, Ordering::SeqCst);

        let session = self.snapshot();
        let written = write_session(&self.config.output_dir, &session).await;

        if let Err(err) = self.cdp.close().await {
            warn!(target: "recorder", ?err, "browser close failed; continuing");
        }

        let path = written?;
        info!(
            target: "recorder",
            path = %path.display(),
            actions = session.metadata.action_count,
            errors = session.metadata.error_count,
            "session saved"
        );
        *stopped = Some(path.clone());
        Ok(path)
    }
}

async fn write_session(dir: &Path, session: &GoldenSession) -> Result<PathBuf, RecorderError> {
    tokio::fs::create_dir_all(dir).await?;
    let started = session.metadata.start_time.format("%Y%m%d-%H%M%S");
    let short_id: String = session.metadata.session_id.chars().take(8).collect();
    let path = dir.join(format!("golden-session-{started}-{short_id}.json"));
    tokio::fs::write(&path, session.to_json_pretty()?).await?;
    Ok(path)
}
