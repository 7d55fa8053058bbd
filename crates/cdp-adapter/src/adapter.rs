//! Page-level operations over a [`CdpTransport`] and the event loop that feeds the bus.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use dashmap::{DashMap, DashSet};
use network_tap_light::{NetworkTapLight, PageId as TapPageId, TapError, TapEvent};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tokio::{select, spawn};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::commands::{ScreenshotFormat, ScreenshotOptions, SelectSpec, WaitGate};
use crate::config::CdpConfig;
use crate::error::{AdapterError, AdapterErrorKind};
use crate::events::RawEvent;
use crate::ids::PageId;
use crate::metrics;
use crate::registry::Registry;
use crate::transport::{CdpTransport, ChromiumTransport, CommandTarget, TransportEvent};
use crate::util::{headers_from_value, js_literal, remote_object_text, timestamp_now};

pub type EventBus = broadcast::Sender<RawEvent>;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Instrumentation applied to every page before its documents run.
#[derive(Clone, Debug, Default)]
pub struct PageInstall {
    /// Names exposed to page scripts as `window.<name>(payload)`.
    pub bindings: Vec<String>,
    /// Sources evaluated at document start in every frame of the page.
    pub scripts: Vec<String>,
}

impl PageInstall {
    fn extend(&mut self, other: PageInstall) {
        for binding in other.bindings {
            if !self.bindings.contains(&binding) {
                self.bindings.push(binding);
            }
        }
        self.scripts.extend(other.scripts);
    }
}

/// Browser capability surface used by the recorder and the replay engine.
#[async_trait]
pub trait Cdp: Send + Sync {
    fn subscribe(&self) -> broadcast::Receiver<RawEvent>;

    /// The oldest prepared page, opening a blank one if the browser has none.
    async fn primary_page(&self) -> Result<PageId, AdapterError>;

    async fn navigate(&self, page: PageId, url: &str, deadline: Duration)
        -> Result<(), AdapterError>;
    async fn click(&self, page: PageId, selector: &str, deadline: Duration)
        -> Result<(), AdapterError>;
    /// Replace the value of a text control with `value`.
    async fn fill(
        &self,
        page: PageId,
        selector: &str,
        value: &str,
        deadline: Duration,
    ) -> Result<(), AdapterError>;
    async fn select_option(
        &self,
        page: PageId,
        spec: SelectSpec,
        deadline: Duration,
    ) -> Result<(), AdapterError>;
    /// Submit the form at `selector` by clicking its submit control.
    async fn submit(&self, page: PageId, selector: &str, deadline: Duration)
        -> Result<(), AdapterError>;
    async fn evaluate_script(&self, page: PageId, expression: &str)
        -> Result<Value, AdapterError>;
    async fn wait_basic(
        &self,
        page: PageId,
        gate: WaitGate,
        timeout: Duration,
    ) -> Result<(), AdapterError>;
    async fn screenshot(
        &self,
        page: PageId,
        options: ScreenshotOptions,
    ) -> Result<Vec<u8>, AdapterError>;
    /// Serialized markup of the main document.
    async fn html_snapshot(&self, page: PageId) -> Result<String, AdapterError>;
    async fn set_device_metrics(
        &self,
        page: PageId,
        width: u32,
        height: u32,
        device_scale_factor: f64,
        mobile: bool,
    ) -> Result<(), AdapterError>;
    /// Apply `install` to every current page and to pages opened later.
    async fn install(&self, install: PageInstall) -> Result<(), AdapterError>;
    async fn current_url(&self, page: PageId) -> Result<String, AdapterError>;
    /// Requests the page currently has in flight.
    async fn inflight(&self, page: PageId) -> u64;
    async fn close(&self) -> Result<(), AdapterError>;
}

/// Adapter implementation with pluggable transport.
pub struct CdpAdapter {
    pub cfg: CdpConfig,
    pub bus: EventBus,
    pub registry: Arc<Registry>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    transport: Arc<dyn CdpTransport>,
    targets: DashMap<String, PageId>,
    sessions: DashMap<String, PageId>,
    main_frames: DashMap<PageId, String>,
    requests: DashMap<String, RequestEntry>,
    ready: DashSet<PageId>,
    installed: RwLock<PageInstall>,
    network_tap: NetworkTapLight,
}

#[derive(Clone, Debug)]
struct RequestEntry {
    url: String,
    method: String,
    resource_type: String,
}

impl CdpAdapter {
    /// Launch (or attach to) a browser and start the event loop.
    pub async fn launch(mut cfg: CdpConfig, bus: EventBus) -> Result<Arc<Self>, AdapterError> {
        if cfg.websocket_url.is_none() {
            cfg.executable = crate::discover::resolve(&cfg)?;
        }

        info!(
            target: "cdp-adapter",
            executable = %cfg.executable.display(),
            headless = cfg.headless,
            "starting chromium transport"
        );
        let transport: Arc<dyn CdpTransport> = Arc::new(ChromiumTransport::new(cfg.clone()));
        let adapter = Arc::new(Self::with_transport(cfg, bus, transport));
        Arc::clone(&adapter).start().await?;
        Ok(adapter)
    }

    pub fn with_transport(
        cfg: CdpConfig,
        bus: EventBus,
        transport: Arc<dyn CdpTransport>,
    ) -> Self {
        Self {
            cfg,
            bus,
            registry: Arc::new(Registry::new()),
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            transport,
            targets: DashMap::new(),
            sessions: DashMap::new(),
            main_frames: DashMap::new(),
            requests: DashMap::new(),
            ready: DashSet::new(),
            installed: RwLock::new(PageInstall::default()),
            network_tap: NetworkTapLight::new(),
        }
    }

    pub async fn start(self: Arc<Self>) -> Result<(), AdapterError> {
        {
            let guard = self.tasks.lock().await;
            if !guard.is_empty() {
                return Ok(());
            }
        }

        self.transport.start().await?;
        let loop_task = spawn(Self::event_loop(Arc::clone(&self)));
        self.tasks.lock().await.push(loop_task);
        debug!(target: "cdp-adapter", "event loop started");
        Ok(())
    }

    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let mut handles = self.tasks.lock().await;
        while let Some(handle) = handles.pop() {
            let _ = handle.await;
        }
    }

    /// Track a page whose protocol session is already prepared.
    pub fn register_page(&self, page: PageId, cdp_session: String) {
        self.registry
            .insert_page(page, None, Some(cdp_session.clone()));
        self.sessions.insert(cdp_session, page);
        self.network_tap.enable(Self::tap_page_id(page));
        self.ready.insert(page);
    }

    fn tap_page_id(page: PageId) -> TapPageId {
        TapPageId(page.0)
    }

    async fn tap_ingest(&self, page: PageId, event: TapEvent) {
        let tap_page = Self::tap_page_id(page);
        if let Err(err) = self.network_tap.ingest(tap_page, event.clone()).await {
            match err {
                TapError::PageNotEnabled => {
                    self.network_tap.enable(tap_page);
                    let _ = self.network_tap.ingest(tap_page, event).await;
                }
            }
        }
    }

    async fn event_loop(self: Arc<Self>) {
        debug!(target: "cdp-adapter", "event loop entered");
        loop {
            select! {
                _ = self.shutdown.cancelled() => break,
                event = self.transport.next_event() => {
                    match event {
                        Some(ev) => self.handle_event(ev).await,
                        None => {
                            if !self.shutdown.is_cancelled() {
                                self.handle_transport_disconnect();
                            }
                            break;
                        }
                    }
                }
            }
        }
        debug!(target: "cdp-adapter", "event loop exiting");
    }

    fn handle_transport_disconnect(&self) {
        warn!(target: "cdp-adapter", "browser connection closed");
        for (page, _) in self.registry.iter() {
            self.emit_page_event(page, None, "closed");
            let _ = self.network_tap.disable(Self::tap_page_id(page));
            self.registry.remove_page(&page);
        }
        self.targets.clear();
        self.sessions.clear();
        self.main_frames.clear();
        self.requests.clear();
        self.ready.clear();

        let _ = self.bus.send(RawEvent::Disconnected {
            reason: "browser connection closed".to_string(),
        });
    }

    async fn handle_event(self: &Arc<Self>, event: TransportEvent) {
        let page = self.page_from_session(event.session_id.as_ref());
        if let Err(err) = self.process_event(event).await {
            let _ = self.bus.send(RawEvent::Error {
                page,
                message: format!("cdp event handling error: {err}"),
            });
        }
    }

    async fn process_event(self: &Arc<Self>, event: TransportEvent) -> Result<(), AdapterError> {
        metrics::record_event(&event.method);
        match event.method.as_str() {
            "Target.targetCreated" => self.on_target_created(event.params)?,
            "Target.targetDestroyed" => self.on_target_destroyed(event.params)?,
            "Target.attachedToTarget" => self.on_target_attached(event.params).await?,
            "Target.detachedFromTarget" => self.on_target_detached(event.params)?,
            "Target.targetInfoChanged" => self.on_target_info_changed(event.params)?,
            "Page.frameNavigated" => self.on_frame_navigated(event)?,
            "Page.navigatedWithinDocument" => self.on_navigated_within_document(event)?,
            "Page.loadEventFired" => self.on_load_event(event),
            "Runtime.bindingCalled" => self.on_binding_called(event)?,
            "Runtime.consoleAPICalled" => self.on_console_api(event)?,
            "Runtime.exceptionThrown" => self.on_exception_thrown(event)?,
            "Log.entryAdded" => self.on_log_entry(event)?,
            "Network.requestWillBeSent" => self.on_network_request(event).await?,
            "Network.responseReceived" => self.on_network_response(event).await?,
            "Network.loadingFinished" => self.on_network_finished(event).await?,
            "Network.loadingFailed" => self.on_network_failed(event).await?,
            _ => {
                debug!(target: "cdp-adapter", method = %event.method, "unhandled cdp event");
            }
        }
        Ok(())
    }

    fn on_target_created(&self, params: Value) -> Result<(), AdapterError> {
        let payload: TargetCreatedParams = serde_json::from_value(params)?;
        if payload.target_info.target_type != "page" {
            return Ok(());
        }
        if self.targets.contains_key(&payload.target_info.target_id) {
            return Ok(());
        }

        let page = self.track_target(&payload.target_info);
        let opener = payload
            .target_info
            .opener_id
            .and_then(|opener_id| self.targets.get(&opener_id).map(|entry| *entry.value()));
        self.emit_page_event(page, opener, "opened");
        Ok(())
    }

    fn track_target(&self, info: &TargetInfoPayload) -> PageId {
        let page = PageId::new();
        self.targets.insert(info.target_id.clone(), page);
        self.registry
            .insert_page(page, Some(info.target_id.clone()), None);
        if let Some(url) = info.url.as_ref().filter(|u| !u.is_empty()) {
            self.registry.set_recent_url(&page, url.clone());
        }
        self.network_tap.enable(Self::tap_page_id(page));
        page
    }

    fn on_target_destroyed(&self, params: Value) -> Result<(), AdapterError> {
        let payload: TargetDestroyedParams = serde_json::from_value(params)?;
        if let Some((_, page)) = self.targets.remove(&payload.target_id) {
            self.sessions.retain(|_, v| *v != page);
            self.main_frames.remove(&page);
            self.ready.remove(&page);
            self.registry.remove_page(&page);
            let _ = self.network_tap.disable(Self::tap_page_id(page));
            self.emit_page_event(page, None, "closed");
        }
        Ok(())
    }

    async fn on_target_attached(self: &Arc<Self>, params: Value) -> Result<(), AdapterError> {
        let payload: AttachedToTargetParams = serde_json::from_value(params)?;
        let session = payload.session_id;

        if payload.target_info.target_type != "page" {
            // Workers and out-of-process frames are not instrumented but must not stay paused.
            if payload.waiting_for_debugger {
                let _ = self
                    .send_session_command(&session, "Runtime.runIfWaitingForDebugger", json!({}))
                    .await;
            }
            return Ok(());
        }

        let page = match self
            .targets
            .get(&payload.target_info.target_id)
            .map(|entry| *entry.value())
        {
            Some(page) => page,
            None => {
                let page = self.track_target(&payload.target_info);
                self.emit_page_event(page, None, "opened");
                page
            }
        };
        self.sessions.insert(session.clone(), page);
        self.registry.set_cdp_session(&page, session.clone());

        let adapter = Arc::clone(self);
        let waiting = payload.waiting_for_debugger;
        spawn(async move {
            match adapter.prepare_page(page, &session, waiting).await {
                Ok(()) => {
                    adapter.ready.insert(page);
                    adapter.emit_page_event(page, None, "ready");
                }
                Err(err) => {
                    warn!(target: "cdp-adapter", ?err, "page preparation failed");
                    let _ = adapter.bus.send(RawEvent::Error {
                        page: Some(page),
                        message: format!("page preparation failed: {err}"),
                    });
                }
            }
        });
        Ok(())
    }

    async fn prepare_page(
        &self,
        page: PageId,
        session: &str,
        waiting_for_debugger: bool,
    ) -> Result<(), AdapterError> {
        for domain in ["Page.enable", "Runtime.enable", "Network.enable", "Log.enable"] {
            self.send_session_command(session, domain, json!({})).await?;
        }

        let install = self.installed.read().await.clone();
        for name in &install.bindings {
            self.send_session_command(session, "Runtime.addBinding", json!({ "name": name }))
                .await?;
        }
        for source in &install.scripts {
            self.send_session_command(
                session,
                "Page.addScriptToEvaluateOnNewDocument",
                json!({ "source": source }),
            )
            .await?;
        }

        if waiting_for_debugger {
            self.send_session_command(session, "Runtime.runIfWaitingForDebugger", json!({}))
                .await?;
        }
        debug!(target: "cdp-adapter", ?page, "page prepared");
        Ok(())
    }

    fn on_target_detached(&self, params: Value) -> Result<(), AdapterError> {
        let payload: DetachedFromTargetParams = serde_json::from_value(params)?;
        self.sessions.remove(&payload.session_id);
        Ok(())
    }

    fn on_target_info_changed(&self, params: Value) -> Result<(), AdapterError> {
        let payload: TargetInfoChangedParams = serde_json::from_value(params)?;
        if payload.target_info.target_type != "page" {
            return Ok(());
        }
        if let Some(page) = self
            .targets
            .get(&payload.target_info.target_id)
            .map(|entry| *entry.value())
        {
            if let Some(url) = payload.target_info.url.filter(|u| !u.is_empty()) {
                self.registry.set_recent_url(&page, url);
            }
        }
        Ok(())
    }

    fn on_frame_navigated(&self, event: TransportEvent) -> Result<(), AdapterError> {
        let payload: FrameNavigatedParams = serde_json::from_value(event.params)?;
        let Some(page) = self.page_from_session(event.session_id.as_ref()) else {
            return Ok(());
        };
        if payload.frame.parent_id.is_some() {
            return Ok(());
        }

        let url = match payload.frame.url_fragment {
            Some(fragment) => format!("{}{}", payload.frame.url, fragment),
            None => payload.frame.url,
        };
        self.main_frames.insert(page, payload.frame.id);
        self.registry.set_recent_url(&page, url.clone());
        let _ = self.bus.send(RawEvent::PageNavigated {
            page,
            url,
            same_document: false,
            ts: timestamp_now(),
        });
        Ok(())
    }

    fn on_navigated_within_document(&self, event: TransportEvent) -> Result<(), AdapterError> {
        let payload: NavigatedWithinDocumentParams = serde_json::from_value(event.params)?;
        let Some(page) = self.page_from_session(event.session_id.as_ref()) else {
            return Ok(());
        };
        let is_main = self
            .main_frames
            .get(&page)
            .map(|frame| *frame.value() == payload.frame_id)
            .unwrap_or(true);
        if !is_main {
            return Ok(());
        }

        self.registry.set_recent_url(&page, payload.url.clone());
        let _ = self.bus.send(RawEvent::PageNavigated {
            page,
            url: payload.url,
            same_document: true,
            ts: timestamp_now(),
        });
        Ok(())
    }

    fn on_load_event(&self, event: TransportEvent) {
        if let Some(page) = self.page_from_session(event.session_id.as_ref()) {
            let _ = self.bus.send(RawEvent::DocumentLoaded {
                page,
                url: self.registry.recent_url(&page),
                ts: timestamp_now(),
            });
        }
    }

    fn on_binding_called(&self, event: TransportEvent) -> Result<(), AdapterError> {
        let payload: BindingCalledParams = serde_json::from_value(event.params)?;
        if let Some(page) = self.page_from_session(event.session_id.as_ref()) {
            metrics::record_binding_call(&payload.name);
            let _ = self.bus.send(RawEvent::BindingCalled {
                page,
                name: payload.name,
                payload: payload.payload,
                ts: timestamp_now(),
            });
        }
        Ok(())
    }

    fn on_console_api(&self, event: TransportEvent) -> Result<(), AdapterError> {
        let payload: ConsoleApiParams = serde_json::from_value(event.params)?;
        if let Some(page) = self.page_from_session(event.session_id.as_ref()) {
            let level = match payload.kind.as_str() {
                "warning" => "warning",
                "error" | "assert" => "error",
                other => other,
            };
            let text = payload
                .args
                .iter()
                .map(remote_object_text)
                .collect::<Vec<_>>()
                .join(" ");
            self.emit_console(page, level, text);
        }
        Ok(())
    }

    fn on_exception_thrown(&self, event: TransportEvent) -> Result<(), AdapterError> {
        let payload: ExceptionThrownParams = serde_json::from_value(event.params)?;
        if let Some(page) = self.page_from_session(event.session_id.as_ref()) {
            let message = payload
                .exception_details
                .exception
                .and_then(|ex| ex.description)
                .or(payload.exception_details.text)
                .unwrap_or_else(|| "runtime exception".to_string());
            self.emit_console(page, "error", message);
        }
        Ok(())
    }

    fn on_log_entry(&self, event: TransportEvent) -> Result<(), AdapterError> {
        let payload: LogEntryParams = serde_json::from_value(event.params)?;
        if let Some(page) = self.page_from_session(event.session_id.as_ref()) {
            self.emit_console(page, &payload.entry.level, payload.entry.text);
        }
        Ok(())
    }

    async fn on_network_request(&self, event: TransportEvent) -> Result<(), AdapterError> {
        let payload: RequestWillBeSentParams = serde_json::from_value(event.params)?;
        let Some(page) = self.page_from_session(event.session_id.as_ref()) else {
            return Ok(());
        };
        let resource_type = payload
            .resource_type
            .unwrap_or_else(|| "other".to_string())
            .to_ascii_lowercase();
        self.requests.insert(
            payload.request_id.clone(),
            RequestEntry {
                url: payload.request.url.clone(),
                method: payload.request.method.clone(),
                resource_type: resource_type.clone(),
            },
        );
        self.tap_ingest(
            page,
            TapEvent::RequestWillBeSent {
                request_id: payload.request_id.clone(),
            },
        )
        .await;
        let _ = self.bus.send(RawEvent::NetworkRequest {
            page,
            request_id: payload.request_id,
            url: payload.request.url,
            method: payload.request.method,
            resource_type,
            headers: headers_from_value(payload.request.headers.as_ref()),
            post_data: payload.request.post_data,
            ts: timestamp_now(),
        });
        Ok(())
    }

    async fn on_network_response(&self, event: TransportEvent) -> Result<(), AdapterError> {
        let payload: ResponseReceivedParams = serde_json::from_value(event.params)?;
        let Some(page) = self.page_from_session(event.session_id.as_ref()) else {
            return Ok(());
        };
        let entry = self.request_entry(&payload.request_id);
        let resource_type = payload
            .resource_type
            .map(|t| t.to_ascii_lowercase())
            .or_else(|| entry.as_ref().map(|e| e.resource_type.clone()))
            .unwrap_or_else(|| "other".to_string());
        let _ = self.bus.send(RawEvent::NetworkResponse {
            page,
            request_id: payload.request_id,
            url: payload.response.url,
            method: entry
                .map(|e| e.method)
                .unwrap_or_else(|| "GET".to_string()),
            status: payload.response.status,
            status_text: payload.response.status_text.unwrap_or_default(),
            mime_type: payload.response.mime_type.unwrap_or_default(),
            resource_type,
            protocol: payload.response.protocol,
            headers: headers_from_value(payload.response.headers.as_ref()),
            ts: timestamp_now(),
        });
        Ok(())
    }

    async fn on_network_finished(&self, event: TransportEvent) -> Result<(), AdapterError> {
        let payload: LoadingFinishedParams = serde_json::from_value(event.params)?;
        let Some(page) = self.page_from_session(event.session_id.as_ref()) else {
            return Ok(());
        };
        self.requests.remove(&payload.request_id);
        self.tap_ingest(
            page,
            TapEvent::LoadingFinished {
                request_id: payload.request_id.clone(),
            },
        )
        .await;
        let _ = self.bus.send(RawEvent::NetworkFinished {
            page,
            request_id: payload.request_id,
            encoded_data_length: payload.encoded_data_length.unwrap_or_default(),
            ts: timestamp_now(),
        });
        Ok(())
    }

    async fn on_network_failed(&self, event: TransportEvent) -> Result<(), AdapterError> {
        let payload: LoadingFailedParams = serde_json::from_value(event.params)?;
        let Some(page) = self.page_from_session(event.session_id.as_ref()) else {
            return Ok(());
        };
        let entry = self
            .requests
            .remove(&payload.request_id)
            .map(|(_, entry)| entry);
        self.tap_ingest(
            page,
            TapEvent::LoadingFailed {
                request_id: payload.request_id.clone(),
            },
        )
        .await;
        let (url, method) = entry
            .map(|e| (e.url, e.method))
            .unwrap_or_else(|| (String::new(), "GET".to_string()));
        let _ = self.bus.send(RawEvent::NetworkFailed {
            page,
            request_id: payload.request_id,
            url,
            method,
            error_text: payload.error_text,
            canceled: payload.canceled.unwrap_or(false),
            ts: timestamp_now(),
        });
        Ok(())
    }

    fn request_entry(&self, request_id: &str) -> Option<RequestEntry> {
        self.requests.get(request_id).map(|entry| entry.clone())
    }

    fn page_from_session(&self, session: Option<&String>) -> Option<PageId> {
        session.and_then(|sid| self.sessions.get(sid).map(|entry| *entry.value()))
    }

    fn emit_page_event(&self, page: PageId, opener: Option<PageId>, phase: &str) {
        let _ = self.bus.send(RawEvent::PageLifecycle {
            page,
            opener,
            phase: phase.to_string(),
            ts: timestamp_now(),
        });
    }

    fn emit_console(&self, page: PageId, level: &str, text: String) {
        let _ = self.bus.send(RawEvent::Console {
            page,
            level: level.to_string(),
            text,
            ts: timestamp_now(),
        });
    }

    fn first_ready_page(&self) -> Option<PageId> {
        self.registry.oldest(|page, _| self.ready.contains(page))
    }

    async fn send_command(&self, method: &str, params: Value) -> Result<Value, AdapterError> {
        self.dispatch(CommandTarget::Browser, method, params).await
    }

    async fn send_session_command(
        &self,
        session: &str,
        method: &str,
        params: Value,
    ) -> Result<Value, AdapterError> {
        self.dispatch(CommandTarget::Session(session.to_string()), method, params)
            .await
    }

    async fn send_page_command(
        &self,
        page: PageId,
        method: &str,
        params: Value,
    ) -> Result<Value, AdapterError> {
        match self.registry.get_cdp_session(&page) {
            Some(session) => self.send_session_command(&session, method, params).await,
            None => Err(AdapterError::internal(format!(
                "missing cdp session for page {page:?}"
            ))),
        }
    }

    async fn dispatch(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, AdapterError> {
        let timer = metrics::CommandTimer::start(method);
        let result = self.transport.send_command(target, method, params).await;
        timer.finish(result.is_ok());
        result
    }

    /// Evaluate `expression` by value; page exceptions become errors.
    async fn evaluate_value(&self, page: PageId, expression: &str) -> Result<Value, AdapterError> {
        let response = self
            .send_page_command(
                page,
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "awaitPromise": true,
                    "returnByValue": true,
                    "userGesture": true,
                }),
            )
            .await?;

        if let Some(details) = response.get("exceptionDetails") {
            let text = details
                .get("exception")
                .and_then(|ex| ex.get("description"))
                .and_then(Value::as_str)
                .or_else(|| details.get("text").and_then(Value::as_str))
                .unwrap_or("script raised exception")
                .to_string();
            return Err(AdapterError::internal(text).with_data(details.clone()));
        }

        Ok(response
            .get("result")
            .and_then(|res| res.get("value"))
            .cloned()
            .unwrap_or(Value::Null))
    }

    /// Poll a locator script until it reports `ok` (or another terminal status) or time runs out.
    ///
    /// The script returns `{status, ...}`; `not-found` and `hidden` are retried.
    async fn poll_target(
        &self,
        page: PageId,
        expression: &str,
        selector: &str,
        deadline: Duration,
    ) -> Result<Value, AdapterError> {
        let deadline_at = Instant::now() + deadline;
        let mut last_status = String::from("not-found");
        loop {
            match self.evaluate_value(page, expression).await {
                Ok(value) => {
                    let status = value
                        .get("status")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown")
                        .to_string();
                    match status.as_str() {
                        "not-found" | "hidden" => last_status = status,
                        "invalid" => {
                            return Err(AdapterError::new(AdapterErrorKind::TargetNotFound)
                                .with_hint(format!("invalid selector '{selector}'")))
                        }
                        "not-editable" => {
                            return Err(AdapterError::new(AdapterErrorKind::NotInteractable)
                                .with_hint(format!("element '{selector}' is not editable")))
                        }
                        _ => return Ok(value),
                    }
                }
                // Navigations tear down the execution context mid-poll.
                Err(err) if err.kind == AdapterErrorKind::Internal => {
                    debug!(target: "cdp-adapter", ?err, "locator evaluation failed; retrying");
                }
                Err(err) => return Err(err),
            }

            if Instant::now() >= deadline_at {
                return Err(if last_status == "hidden" {
                    AdapterError::new(AdapterErrorKind::NotInteractable)
                        .with_hint(format!("element '{selector}' is not visible"))
                } else {
                    AdapterError::new(AdapterErrorKind::TargetNotFound)
                        .with_hint(format!("selector '{selector}' not found before deadline"))
                });
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    async fn mouse_click(&self, page: PageId, x: f64, y: f64) -> Result<(), AdapterError> {
        self.send_page_command(
            page,
            "Input.dispatchMouseEvent",
            json!({ "type": "mouseMoved", "x": x, "y": y }),
        )
        .await?;
        for kind in ["mousePressed", "mouseReleased"] {
            self.send_page_command(
                page,
                "Input.dispatchMouseEvent",
                json!({
                    "type": kind,
                    "x": x,
                    "y": y,
                    "button": "left",
                    "buttons": 1,
                    "clickCount": 1,
                    "pointerType": "mouse",
                }),
            )
            .await?;
        }
        Ok(())
    }

    async fn wait_for_dom_ready(&self, page: PageId, deadline: Instant) -> Result<(), AdapterError> {
        loop {
            let ready = self
                .evaluate_value(page, "document.readyState")
                .await
                .ok()
                .and_then(|value| value.as_str().map(str::to_string))
                .map(|state| matches!(state.as_str(), "interactive" | "complete"))
                .unwrap_or(false);
            if ready {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(AdapterError::new(AdapterErrorKind::Timeout)
                    .with_hint("wait_basic DomReady timed out"));
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    async fn wait_for_selector_visible(
        &self,
        page: PageId,
        selector: &str,
        deadline: Instant,
    ) -> Result<(), AdapterError> {
        let expression = format!(
            "(() => {{\n    let el;\n    try {{ el = document.querySelector({sel}); }} catch (err) {{ return false; }}\n    if (!el) {{ return false; }}\n    const rect = el.getBoundingClientRect();\n    const style = window.getComputedStyle(el);\n    return rect.width > 0 && rect.height > 0 && style.visibility !== 'hidden' && style.display !== 'none';\n}})()",
            sel = js_literal(selector)?
        );
        loop {
            let visible = self
                .evaluate_value(page, &expression)
                .await
                .ok()
                .and_then(|value| value.as_bool())
                .unwrap_or(false);
            if visible {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(AdapterError::new(AdapterErrorKind::Timeout)
                    .with_hint(format!("selector '{selector}' not visible before deadline")));
            }
            sleep(POLL_INTERVAL).await;
        }
    }
}

const LOCATE_FOR_CLICK: &str = r#"(() => {
    let el;
    try { el = document.querySelector(__SELECTOR__); } catch (err) { return { status: 'invalid' }; }
    if (!el) { return { status: 'not-found' }; }
    if (typeof el.scrollIntoView === 'function') { el.scrollIntoView({ block: 'center', inline: 'center' }); }
    const rect = el.getBoundingClientRect();
    const style = window.getComputedStyle(el);
    if (rect.width === 0 || rect.height === 0 || style.visibility === 'hidden' || style.display === 'none') {
        return { status: 'hidden' };
    }
    return { status: 'ok', x: rect.left + rect.width / 2, y: rect.top + rect.height / 2 };
})()"#;

const PREPARE_FILL: &str = r#"(() => {
    let el;
    try { el = document.querySelector(__SELECTOR__); } catch (err) { return { status: 'invalid' }; }
    if (!el) { return { status: 'not-found' }; }
    const value = __VALUE__;
    const direct = ['date', 'time', 'datetime-local', 'month', 'week', 'color', 'range'];
    const isInput = el instanceof HTMLInputElement || el instanceof HTMLTextAreaElement;
    if (!isInput && !el.isContentEditable) { return { status: 'not-editable' }; }
    if (typeof el.scrollIntoView === 'function') { el.scrollIntoView({ block: 'center' }); }
    el.focus();
    if (el instanceof HTMLInputElement && direct.includes(el.type)) {
        el.value = value;
        el.dispatchEvent(new Event('input', { bubbles: true }));
        el.dispatchEvent(new Event('change', { bubbles: true }));
        return { status: 'filled' };
    }
    if (isInput) {
        el.value = '';
    } else {
        el.textContent = '';
    }
    el.dispatchEvent(new Event('input', { bubbles: true }));
    return { status: 'focused' };
})()"#;

const COMMIT_FILL: &str = r#"(() => {
    const el = document.activeElement;
    if (el) { el.dispatchEvent(new Event('change', { bubbles: true })); }
    return true;
})()"#;

const LOCATE_SUBMIT: &str = r#"(() => {
    let form;
    try { form = document.querySelector(__SELECTOR__); } catch (err) { return { status: 'invalid' }; }
    if (!form) { return { status: 'not-found' }; }
    if (!(form instanceof HTMLFormElement)) { form = form.closest('form') || form; }
    const control = form.querySelector('button[type=submit], input[type=submit], input[type=image], button:not([type])');
    if (control) {
        if (typeof control.scrollIntoView === 'function') { control.scrollIntoView({ block: 'center', inline: 'center' }); }
        const rect = control.getBoundingClientRect();
        const style = window.getComputedStyle(control);
        if (rect.width > 0 && rect.height > 0 && style.visibility !== 'hidden' && style.display !== 'none') {
            return { status: 'ok', x: rect.left + rect.width / 2, y: rect.top + rect.height / 2 };
        }
    }
    if (form instanceof HTMLFormElement) {
        if (typeof form.requestSubmit === 'function') { form.requestSubmit(); } else { form.submit(); }
        return { status: 'submitted' };
    }
    return { status: 'not-editable' };
})()"#;

const SELECT_FN: &str = r#"
function(targetValue, matchLabel) {
    if (!this) { return { status: 'not-found' }; }
    const options = Array.from(this.options || []);
    let option = options.find(opt => opt.value === targetValue);
    if (!option && matchLabel) {
        option = options.find(opt => opt.text.trim() === targetValue);
    }
    if (!option) { return { status: 'option-missing' }; }
    this.value = option.value;
    this.dispatchEvent(new Event('input', { bubbles: true }));
    this.dispatchEvent(new Event('change', { bubbles: true }));
    return { status: 'selected', value: this.value };
}
"#;

fn locator_script(template: &str, selector: &str) -> Result<String, AdapterError> {
    Ok(template.replace("__SELECTOR__", &js_literal(selector)?))
}

#[async_trait]
impl Cdp for CdpAdapter {
    fn subscribe(&self) -> broadcast::Receiver<RawEvent> {
        self.bus.subscribe()
    }

    async fn primary_page(&self) -> Result<PageId, AdapterError> {
        let started = Instant::now();
        let deadline = started + Duration::from_millis(self.cfg.default_deadline_ms);
        let mut requested = false;
        loop {
            if let Some(page) = self.first_ready_page() {
                return Ok(page);
            }
            if !requested && started.elapsed() >= Duration::from_secs(1) {
                debug!(target: "cdp-adapter", "no page attached yet; opening about:blank");
                self.send_command("Target.createTarget", json!({ "url": "about:blank" }))
                    .await?;
                requested = true;
            }
            if Instant::now() >= deadline {
                return Err(AdapterError::internal("no page target became available"));
            }
            sleep(Duration::from_millis(50)).await;
        }
    }

    async fn navigate(
        &self,
        page: PageId,
        url: &str,
        deadline: Duration,
    ) -> Result<(), AdapterError> {
        let deadline_at = Instant::now() + deadline;
        let response = self
            .send_page_command(page, "Page.navigate", json!({ "url": url }))
            .await?;
        if let Some(error_text) = response
            .get("errorText")
            .and_then(Value::as_str)
            .filter(|text| !text.is_empty())
        {
            return Err(AdapterError::new(AdapterErrorKind::Protocol)
                .with_hint(format!("navigation to {url} failed: {error_text}")));
        }
        self.registry.set_recent_url(&page, url.to_string());
        self.wait_for_dom_ready(page, deadline_at).await
    }

    async fn click(
        &self,
        page: PageId,
        selector: &str,
        deadline: Duration,
    ) -> Result<(), AdapterError> {
        let expression = locator_script(LOCATE_FOR_CLICK, selector)?;
        let located = self.poll_target(page, &expression, selector, deadline).await?;
        let x = located.get("x").and_then(Value::as_f64).unwrap_or_default();
        let y = located.get("y").and_then(Value::as_f64).unwrap_or_default();
        self.mouse_click(page, x, y).await
    }

    async fn fill(
        &self,
        page: PageId,
        selector: &str,
        value: &str,
        deadline: Duration,
    ) -> Result<(), AdapterError> {
        let expression =
            locator_script(PREPARE_FILL, selector)?.replace("__VALUE__", &js_literal(value)?);
        let prepared = self.poll_target(page, &expression, selector, deadline).await?;
        if prepared.get("status").and_then(Value::as_str) == Some("filled") {
            return Ok(());
        }

        if !value.is_empty() {
            self.send_page_command(page, "Input.insertText", json!({ "text": value }))
                .await?;
        }
        self.evaluate_value(page, COMMIT_FILL).await?;
        Ok(())
    }

    async fn select_option(
        &self,
        page: PageId,
        spec: SelectSpec,
        deadline: Duration,
    ) -> Result<(), AdapterError> {
        let SelectSpec {
            selector,
            value,
            match_label,
        } = spec;
        let selector_expression = format!("document.querySelector({})", js_literal(&selector)?);

        let deadline_at = Instant::now() + deadline;
        let object_id = loop {
            let response = self
                .send_page_command(
                    page,
                    "Runtime.evaluate",
                    json!({
                        "expression": selector_expression,
                        "objectGroup": "goldpath-select",
                        "returnByValue": false,
                    }),
                )
                .await?;

            if let Some(object_id) = response
                .get("result")
                .and_then(|res| res.get("objectId"))
                .and_then(Value::as_str)
            {
                break object_id.to_string();
            }
            if Instant::now() >= deadline_at {
                return Err(AdapterError::new(AdapterErrorKind::TargetNotFound)
                    .with_hint(format!("select target '{selector}' not found")));
            }
            sleep(POLL_INTERVAL).await;
        };

        let call_response = self
            .send_page_command(
                page,
                "Runtime.callFunctionOn",
                json!({
                    "objectId": object_id,
                    "functionDeclaration": SELECT_FN.trim(),
                    "arguments": [
                        { "value": value },
                        { "value": match_label },
                    ],
                    "awaitPromise": true,
                    "returnByValue": true,
                }),
            )
            .await;

        let _ = self
            .send_page_command(
                page,
                "Runtime.releaseObject",
                json!({ "objectId": object_id }),
            )
            .await;

        let status = call_response?
            .get("result")
            .and_then(|res| res.get("value"))
            .and_then(|val| val.get("status"))
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();

        match status.as_str() {
            "selected" => Ok(()),
            "not-found" => Err(AdapterError::new(AdapterErrorKind::TargetNotFound)
                .with_hint(format!("select target '{selector}' not found"))),
            "option-missing" => Err(AdapterError::new(AdapterErrorKind::OptionNotFound)
                .with_hint(format!("option '{value}' not found in '{selector}'"))),
            other => Err(AdapterError::internal(format!("selectOption failed: {other}"))),
        }
    }

    async fn submit(
        &self,
        page: PageId,
        selector: &str,
        deadline: Duration,
    ) -> Result<(), AdapterError> {
        let expression = locator_script(LOCATE_SUBMIT, selector)?;
        let located = self.poll_target(page, &expression, selector, deadline).await?;
        match located.get("status").and_then(Value::as_str) {
            Some("submitted") => Ok(()),
            _ => {
                let x = located.get("x").and_then(Value::as_f64).unwrap_or_default();
                let y = located.get("y").and_then(Value::as_f64).unwrap_or_default();
                self.mouse_click(page, x, y).await
            }
        }
    }

    async fn evaluate_script(
        &self,
        page: PageId,
        expression: &str,
    ) -> Result<Value, AdapterError> {
        self.evaluate_value(page, expression).await
    }

    async fn wait_basic(
        &self,
        page: PageId,
        gate: WaitGate,
        timeout: Duration,
    ) -> Result<(), AdapterError> {
        let deadline = Instant::now() + timeout;
        match gate {
            WaitGate::DomReady => self.wait_for_dom_ready(page, deadline).await,
            WaitGate::SelectorVisible { selector } => {
                self.wait_for_selector_visible(page, &selector, deadline)
                    .await
            }
        }
    }

    async fn screenshot(
        &self,
        page: PageId,
        options: ScreenshotOptions,
    ) -> Result<Vec<u8>, AdapterError> {
        let mut params = match options.format {
            ScreenshotFormat::Png => json!({ "format": "png" }),
            ScreenshotFormat::Jpeg { quality } => {
                json!({ "format": "jpeg", "quality": quality.unwrap_or(80) })
            }
        };

        if options.full_page {
            let metrics = self
                .send_page_command(page, "Page.getLayoutMetrics", json!({}))
                .await?;
            let size = metrics
                .get("cssContentSize")
                .or_else(|| metrics.get("contentSize"));
            let width = size
                .and_then(|s| s.get("width"))
                .and_then(Value::as_f64)
                .unwrap_or(0.0);
            let height = size
                .and_then(|s| s.get("height"))
                .and_then(Value::as_f64)
                .unwrap_or(0.0);
            if width > 0.0 && height > 0.0 {
                params["captureBeyondViewport"] = json!(true);
                params["clip"] = json!({
                    "x": 0,
                    "y": 0,
                    "width": width.ceil(),
                    "height": height.ceil(),
                    "scale": 1,
                });
            }
        }

        let response = self
            .send_page_command(page, "Page.captureScreenshot", params)
            .await?;
        let data = response
            .get("data")
            .and_then(Value::as_str)
            .ok_or_else(|| AdapterError::internal("missing screenshot data"))?;
        STANDARD
            .decode(data)
            .map_err(|err| AdapterError::internal(err.to_string()))
    }

    async fn html_snapshot(&self, page: PageId) -> Result<String, AdapterError> {
        let value = self
            .evaluate_value(
                page,
                "document.documentElement ? '<!DOCTYPE html>\\n' + document.documentElement.outerHTML : ''",
            )
            .await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn set_device_metrics(
        &self,
        page: PageId,
        width: u32,
        height: u32,
        device_scale_factor: f64,
        mobile: bool,
    ) -> Result<(), AdapterError> {
        self.send_page_command(
            page,
            "Emulation.setDeviceMetricsOverride",
            json!({
                "width": width,
                "height": height,
                "deviceScaleFactor": device_scale_factor,
                "mobile": mobile,
            }),
        )
        .await?;
        Ok(())
    }

    async fn install(&self, install: PageInstall) -> Result<(), AdapterError> {
        // Stored first so pages attaching concurrently pick it up during preparation.
        self.installed.write().await.extend(install.clone());

        for (page, ctx) in self.registry.iter() {
            let Some(session) = ctx.cdp_session else {
                continue;
            };
            for name in &install.bindings {
                self.send_session_command(&session, "Runtime.addBinding", json!({ "name": name }))
                    .await?;
            }
            for source in &install.scripts {
                self.send_session_command(
                    &session,
                    "Page.addScriptToEvaluateOnNewDocument",
                    json!({ "source": source, "runImmediately": true }),
                )
                .await?;
            }
            debug!(target: "cdp-adapter", ?page, "instrumentation installed on live page");
        }
        Ok(())
    }

    async fn current_url(&self, page: PageId) -> Result<String, AdapterError> {
        match self.evaluate_value(page, "window.location.href").await {
            Ok(Value::String(url)) => Ok(url),
            _ => self
                .registry
                .recent_url(&page)
                .ok_or_else(|| AdapterError::internal("page url unavailable")),
        }
    }

    async fn inflight(&self, page: PageId) -> u64 {
        self.network_tap.inflight(Self::tap_page_id(page)).await
    }

    async fn close(&self) -> Result<(), AdapterError> {
        if !self.shutdown.is_cancelled() {
            if let Err(err) = self.send_command("Browser.close", json!({})).await {
                debug!(target: "cdp-adapter", ?err, "Browser.close did not complete cleanly");
            }
        }
        self.shutdown().await;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetCreatedParams {
    target_info: TargetInfoPayload,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetDestroyedParams {
    target_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AttachedToTargetParams {
    session_id: String,
    target_info: TargetInfoPayload,
    #[serde(default)]
    waiting_for_debugger: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DetachedFromTargetParams {
    session_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetInfoChangedParams {
    target_info: TargetInfoPayload,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetInfoPayload {
    target_id: String,
    #[serde(rename = "type")]
    target_type: String,
    url: Option<String>,
    opener_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FrameNavigatedParams {
    frame: FramePayload,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FramePayload {
    id: String,
    parent_id: Option<String>,
    url: String,
    url_fragment: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NavigatedWithinDocumentParams {
    frame_id: String,
    url: String,
}

#[derive(Debug, Deserialize)]
struct BindingCalledParams {
    name: String,
    payload: String,
}

#[derive(Debug, Deserialize)]
struct ConsoleApiParams {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    args: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExceptionThrownParams {
    exception_details: ExceptionDetails,
}

#[derive(Debug, Deserialize)]
struct ExceptionDetails {
    text: Option<String>,
    exception: Option<ExceptionObject>,
}

#[derive(Debug, Deserialize)]
struct ExceptionObject {
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LogEntryParams {
    entry: LogEntry,
}

#[derive(Debug, Deserialize)]
struct LogEntry {
    level: String,
    text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequestWillBeSentParams {
    request_id: String,
    request: RequestPayload,
    #[serde(rename = "type")]
    resource_type: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequestPayload {
    url: String,
    method: String,
    headers: Option<Value>,
    post_data: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponseReceivedParams {
    request_id: String,
    #[serde(rename = "type")]
    resource_type: Option<String>,
    response: ResponsePayload,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponsePayload {
    url: String,
    status: i64,
    status_text: Option<String>,
    mime_type: Option<String>,
    protocol: Option<String>,
    headers: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoadingFinishedParams {
    request_id: String,
    encoded_data_length: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoadingFailedParams {
    request_id: String,
    error_text: String,
    canceled: Option<bool>,
}
