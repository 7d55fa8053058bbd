//! Websocket link to a Chrome process.
//!
//! [`ChromiumTransport`] launches Chrome with its own profile, or attaches to a DevTools
//! websocket given in the config. One pump task owns the connection: calls reach it over a
//! channel, events leave it over another, and it probes the browser periodically. Once the pump
//! exits the link is dead and never reopened, since a fresh browser would not hold the pages a
//! recording or replay was driving.

use std::collections::HashMap;
use std::convert::TryInto;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chromiumoxide::async_process::Child;
use chromiumoxide::browser::BrowserConfig;
use chromiumoxide::cdp::browser_protocol::target::SessionId as CdpSessionId;
use chromiumoxide::cdp::events::CdpEventMessage;
use chromiumoxide::conn::Connection;
use chromiumoxide::error::CdpError;
use chromiumoxide_types::{CallId, CdpJsonEventMessage, Message, MethodId, Response};
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, Mutex, OnceCell};
use tokio::task::JoinHandle;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::CdpConfig;
use crate::error::{AdapterError, AdapterErrorKind};
use crate::util::extract_ws_url;

const LAUNCH_TIMEOUT: Duration = Duration::from_secs(20);
const PROBE_METHOD: &str = "Browser.getVersion";

/// Flags every launched browser gets. Recording and replay want a quiet, reproducible profile.
const QUIET_FLAGS: &[&str] = &[
    "--disable-background-networking",
    "--disable-background-timer-throttling",
    "--disable-breakpad",
    "--disable-client-side-phishing-detection",
    "--disable-component-update",
    "--disable-default-apps",
    "--disable-dev-shm-usage",
    "--disable-extensions",
    "--disable-hang-monitor",
    "--disable-popup-blocking",
    "--disable-prompt-on-repost",
    "--disable-sync",
    "--metrics-recording-only",
    "--no-first-run",
    "--no-default-browser-check",
    "--password-store=basic",
    "--remote-allow-origins=*",
    "--use-mock-keychain",
];

const HEADLESS_FLAGS: &[&str] = &["--headless=new", "--hide-scrollbars", "--mute-audio"];

/// A protocol event as it came off the wire.
#[derive(Clone, Debug)]
pub struct TransportEvent {
    pub method: String,
    pub params: Value,
    pub session_id: Option<String>,
}

/// Where a command is delivered: the browser endpoint or one flattened target session.
#[derive(Clone, Debug)]
pub enum CommandTarget {
    Browser,
    Session(String),
}

#[async_trait]
pub trait CdpTransport: Send + Sync {
    /// Open the link and turn on target discovery with paused auto-attach.
    async fn start(&self) -> Result<(), AdapterError>;
    /// Next protocol event; `None` before `start` and once the link is gone.
    async fn next_event(&self) -> Option<TransportEvent>;
    async fn send_command(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, AdapterError>;
}

pub struct ChromiumTransport {
    cfg: CdpConfig,
    link: OnceCell<Link>,
}

impl ChromiumTransport {
    pub fn new(cfg: CdpConfig) -> Self {
        Self {
            cfg,
            link: OnceCell::new(),
        }
    }

    fn deadline(&self) -> Duration {
        Duration::from_millis(self.cfg.default_deadline_ms)
    }

    fn live_link(&self) -> Result<&Link, AdapterError> {
        match self.link.get() {
            Some(link) if link.is_alive() => Ok(link),
            Some(_) => Err(AdapterError::new(AdapterErrorKind::Protocol)
                .with_hint("browser connection closed")),
            None => Err(AdapterError::new(AdapterErrorKind::Protocol)
                .with_hint("transport used before start")),
        }
    }
}

#[async_trait]
impl CdpTransport for ChromiumTransport {
    async fn start(&self) -> Result<(), AdapterError> {
        let link = self
            .link
            .get_or_try_init(|| Link::open(&self.cfg))
            .await?;

        link.call(
            CommandTarget::Browser,
            "Target.setDiscoverTargets",
            json!({ "discover": true }),
            self.deadline(),
        )
        .await?;
        // New pages stay paused until the adapter has installed its bindings and scripts.
        link.call(
            CommandTarget::Browser,
            "Target.setAutoAttach",
            json!({ "autoAttach": true, "waitForDebuggerOnStart": true, "flatten": true }),
            self.deadline(),
        )
        .await?;
        Ok(())
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        self.link.get()?.recv().await
    }

    async fn send_command(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, AdapterError> {
        self.live_link()?
            .call(target, method, params, self.deadline())
            .await
    }
}

type Responder = oneshot::Sender<Result<Value, AdapterError>>;

struct Call {
    target: CommandTarget,
    method: String,
    params: Value,
    reply: Responder,
}

/// An open connection plus the browser process behind it, when this process launched one.
struct Link {
    calls: mpsc::Sender<Call>,
    events: Mutex<mpsc::Receiver<TransportEvent>>,
    alive: Arc<AtomicBool>,
    pump: JoinHandle<()>,
    browser: std::sync::Mutex<Option<BrowserProcess>>,
}

impl Link {
    async fn open(cfg: &CdpConfig) -> Result<Self, AdapterError> {
        let (browser, ws_url) = match &cfg.websocket_url {
            Some(url) => {
                info!(target: "cdp-transport", url = %url, "attaching to running browser");
                (None, url.clone())
            }
            None => {
                let plan = LaunchPlan::from_config(cfg)?;
                let (process, url) = plan.launch().await?;
                (Some(process), url)
            }
        };

        let conn = match Connection::<CdpEventMessage>::connect(&ws_url).await {
            Ok(conn) => conn,
            Err(err) => {
                if let Some(browser) = browser {
                    browser.terminate().await;
                }
                return Err(AdapterError::new(AdapterErrorKind::LaunchFailed)
                    .with_hint(format!("devtools connect to {ws_url} failed: {err}")));
            }
        };

        let (calls_tx, calls_rx) = mpsc::channel(128);
        let (events_tx, events_rx) = mpsc::channel(1024);
        let alive = Arc::new(AtomicBool::new(true));

        let pump = Pump {
            conn,
            pending: HashMap::new(),
            events: events_tx,
            probe: None,
            probe_deadline: Duration::from_millis(cfg.default_deadline_ms.min(5_000)),
        };
        let every = (cfg.liveness_probe_ms > 0).then(|| Duration::from_millis(cfg.liveness_probe_ms));
        let flag = alive.clone();
        let pump = tokio::spawn(async move {
            match pump.run(calls_rx, every).await {
                Ok(()) => debug!(target: "cdp-transport", "devtools connection closed"),
                Err(err) => warn!(target: "cdp-transport", ?err, "devtools connection lost"),
            }
            flag.store(false, Ordering::Release);
        });

        info!(target: "cdp-transport", url = %ws_url, "devtools connection established");
        Ok(Self {
            calls: calls_tx,
            events: Mutex::new(events_rx),
            alive,
            pump,
            browser: std::sync::Mutex::new(browser),
        })
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    async fn recv(&self) -> Option<TransportEvent> {
        self.events.lock().await.recv().await
    }

    async fn call(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
        deadline: Duration,
    ) -> Result<Value, AdapterError> {
        let (reply, response) = oneshot::channel();
        self.calls
            .send(Call {
                target,
                method: method.to_string(),
                params,
                reply,
            })
            .await
            .map_err(|_| {
                AdapterError::new(AdapterErrorKind::Protocol).with_hint("browser connection closed")
            })?;

        match tokio::time::timeout(deadline, response).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(AdapterError::new(AdapterErrorKind::Protocol)
                .with_hint(format!("{method} dropped by closing connection"))),
            Err(_) => Err(AdapterError::new(AdapterErrorKind::Timeout)
                .with_hint(format!("{method} got no reply within {}ms", deadline.as_millis()))),
        }
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::Release);
        self.pump.abort();

        let browser = match self.browser.get_mut() {
            Ok(slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(browser) = browser {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(browser.terminate());
                }
                Err(_) => debug!(target: "cdp-transport", "no runtime left to stop chrome"),
            }
        }
    }
}

/// A Chrome child process and the scratch profile it owns, if any.
struct BrowserProcess {
    child: Child,
    scratch_profile: Option<PathBuf>,
}

impl BrowserProcess {
    async fn terminate(mut self) {
        if let Err(err) = self.child.kill().await {
            warn!(target: "cdp-transport", ?err, "failed to stop chrome");
        }
        if let Some(dir) = self.scratch_profile.take() {
            if let Err(err) = fs::remove_dir_all(&dir) {
                debug!(target: "cdp-transport", ?err, dir = %dir.display(), "scratch profile left behind");
            }
        }
    }
}

/// Everything needed to start Chrome, resolved from [`CdpConfig`] before any process exists.
#[derive(Debug)]
struct LaunchPlan {
    executable: Option<PathBuf>,
    profile: PathBuf,
    scratch: bool,
    headless: bool,
    no_sandbox: bool,
    window: Option<(u32, u32)>,
    deadline: Duration,
    args: Vec<String>,
}

impl LaunchPlan {
    fn from_config(cfg: &CdpConfig) -> Result<Self, AdapterError> {
        let executable = if cfg.executable.as_os_str().is_empty() {
            None
        } else if cfg.executable.exists() {
            Some(cfg.executable.clone())
        } else {
            return Err(AdapterError::new(AdapterErrorKind::LaunchFailed)
                .with_hint(format!("chrome executable not found at {}", cfg.executable.display()))
                .with_data(json!({
                    "expected": cfg.executable,
                    "hint": "Set GOLDPATH_CHROME to the full path of chrome/chromium."
                })));
        };

        let (profile, scratch) = match &cfg.user_data_dir {
            Some(dir) if dir.is_absolute() => (dir.clone(), false),
            Some(dir) => {
                let cwd = std::env::current_dir().map_err(|err| {
                    AdapterError::new(AdapterErrorKind::LaunchFailed)
                        .with_hint(format!("cannot resolve user-data-dir {}: {err}", dir.display()))
                })?;
                (cwd.join(dir), false)
            }
            None => (
                std::env::temp_dir().join(format!("goldpath-profile-{}", uuid::Uuid::new_v4())),
                true,
            ),
        };

        let mut args: Vec<String> = QUIET_FLAGS.iter().map(|flag| flag.to_string()).collect();
        if cfg.headless {
            args.extend(HEADLESS_FLAGS.iter().map(|flag| flag.to_string()));
        }
        args.extend(cfg.extra_args.iter().cloned());

        Ok(Self {
            executable,
            profile,
            scratch,
            headless: cfg.headless,
            no_sandbox: sandbox_disabled(),
            window: cfg.window_size,
            deadline: Duration::from_millis(cfg.default_deadline_ms),
            args,
        })
    }

    fn browser_config(&self) -> Result<BrowserConfig, AdapterError> {
        let mut builder = BrowserConfig::builder()
            .request_timeout(self.deadline)
            .launch_timeout(LAUNCH_TIMEOUT)
            .user_data_dir(self.profile.clone())
            .args(self.args.clone());
        if !self.headless {
            builder = builder.with_head();
        }
        if self.no_sandbox {
            builder = builder.no_sandbox();
        }
        if let Some((width, height)) = self.window {
            builder = builder.window_size(width, height);
        }
        if let Some(executable) = &self.executable {
            builder = builder.chrome_executable(executable.clone());
        }
        builder.build().map_err(|err| {
            AdapterError::new(AdapterErrorKind::LaunchFailed)
                .with_hint(format!("browser config error: {err}"))
        })
    }

    async fn launch(self) -> Result<(BrowserProcess, String), AdapterError> {
        fs::create_dir_all(&self.profile).map_err(|err| {
            AdapterError::new(AdapterErrorKind::LaunchFailed).with_hint(format!(
                "cannot create profile {}: {err}",
                self.profile.display()
            ))
        })?;
        let config = self.browser_config()?;
        info!(
            target: "cdp-transport",
            profile = %self.profile.display(),
            headless = self.headless,
            "launching chrome"
        );

        let mut child = config.launch().map_err(|err| {
            AdapterError::new(AdapterErrorKind::LaunchFailed)
                .with_hint(format!("failed to launch chrome: {err}"))
        })?;
        let scratch_profile = self.scratch.then_some(self.profile);

        match extract_ws_url(&mut child).await {
            Ok(url) => Ok((
                BrowserProcess {
                    child,
                    scratch_profile,
                },
                url,
            )),
            Err(err) => {
                BrowserProcess {
                    child,
                    scratch_profile,
                }
                .terminate()
                .await;
                Err(AdapterError::new(AdapterErrorKind::LaunchFailed).with_hint(err.to_string()))
            }
        }
    }
}

fn sandbox_disabled() -> bool {
    std::env::var("GOLDPATH_DISABLE_SANDBOX")
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Owns the connection. Runs until the socket closes, a probe goes unanswered, or every caller
/// handle is gone.
struct Pump {
    conn: Connection<CdpEventMessage>,
    pending: HashMap<CallId, Responder>,
    events: mpsc::Sender<TransportEvent>,
    probe: Option<(CallId, Instant)>,
    probe_deadline: Duration,
}

impl Pump {
    async fn run(
        mut self,
        mut calls: mpsc::Receiver<Call>,
        probe_every: Option<Duration>,
    ) -> Result<(), AdapterError> {
        let mut ticker = probe_every.map(|every| {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker
        });

        loop {
            tokio::select! {
                call = calls.recv() => match call {
                    Some(call) => self.submit(call),
                    None => return Ok(()),
                },
                message = self.conn.next() => match message {
                    Some(Ok(Message::Response(resp))) => self.settle(resp),
                    Some(Ok(Message::Event(event))) => self.forward(event).await,
                    Some(Err(err)) => {
                        let err = classify(err);
                        self.fail_all(&err);
                        return Err(err);
                    }
                    None => {
                        self.fail_all(
                            &AdapterError::new(AdapterErrorKind::Protocol)
                                .with_hint("devtools socket closed"),
                        );
                        return Ok(());
                    }
                },
                _ = next_tick(&mut ticker) => self.probe()?,
            }
        }
    }

    fn submit(&mut self, call: Call) {
        let session = match call.target {
            CommandTarget::Browser => None,
            CommandTarget::Session(id) => Some(CdpSessionId::from(id)),
        };
        let method: MethodId = call.method.clone().into();
        match self.conn.submit_command(method, session, call.params) {
            Ok(id) => {
                self.pending.insert(id, call.reply);
            }
            Err(err) => {
                let _ = call.reply.send(Err(AdapterError::internal(format!(
                    "cannot encode {}: {err}",
                    call.method
                ))));
            }
        }
    }

    fn settle(&mut self, resp: Response) {
        if matches!(self.probe, Some((id, _)) if id == resp.id) {
            self.probe = None;
            return;
        }
        let id = resp.id;
        match self.pending.remove(&id) {
            Some(reply) => {
                let _ = reply.send(response_payload(resp));
            }
            None => debug!(target: "cdp-transport", ?id, "reply for unknown call"),
        }
    }

    async fn forward(&mut self, event: CdpEventMessage) {
        let raw: CdpJsonEventMessage = match event.try_into() {
            Ok(raw) => raw,
            Err(err) => {
                warn!(target: "cdp-transport", ?err, "undecodable protocol event");
                return;
            }
        };
        let event = TransportEvent {
            method: raw.method.into_owned(),
            params: raw.params,
            session_id: raw.session_id,
        };
        if self.events.send(event).await.is_err() {
            debug!(target: "cdp-transport", "event consumer gone");
        }
    }

    /// Issue a liveness probe, or give up on the browser if the previous one went unanswered.
    fn probe(&mut self) -> Result<(), AdapterError> {
        if let Some((_, sent)) = self.probe {
            if sent.elapsed() >= self.probe_deadline {
                let err = AdapterError::new(AdapterErrorKind::Protocol)
                    .with_hint("browser stopped answering liveness probes");
                self.fail_all(&err);
                return Err(err);
            }
            return Ok(());
        }
        let id = self
            .conn
            .submit_command(PROBE_METHOD.into(), None, json!({}))
            .map_err(|err| AdapterError::internal(format!("cannot encode probe: {err}")))?;
        self.probe = Some((id, Instant::now()));
        Ok(())
    }

    fn fail_all(&mut self, err: &AdapterError) {
        for (_, reply) in self.pending.drain() {
            let _ = reply.send(Err(err.clone()));
        }
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => futures::future::pending::<()>().await,
    }
}

fn response_payload(resp: Response) -> Result<Value, AdapterError> {
    match (resp.result, resp.error) {
        (Some(result), _) => Ok(result),
        (None, Some(error)) => Err(AdapterError::new(AdapterErrorKind::Protocol)
            .with_hint(format!("cdp error {}: {}", error.code, error.message))
            .retriable(error.code >= 500)),
        (None, None) => Err(AdapterError::internal("empty cdp response")),
    }
}

fn classify(err: CdpError) -> AdapterError {
    let hint = err.to_string();
    match err {
        CdpError::Timeout => AdapterError::new(AdapterErrorKind::Timeout)
            .with_hint(hint)
            .retriable(true),
        CdpError::FrameNotFound(_) | CdpError::JavascriptException(_) | CdpError::Serde(_) => {
            AdapterError::internal(hint)
        }
        _ => AdapterError::new(AdapterErrorKind::Protocol)
            .with_hint(hint)
            .retriable(true),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn config() -> CdpConfig {
        CdpConfig {
            executable: PathBuf::new(),
            user_data_dir: None,
            headless: true,
            window_size: Some((1280, 720)),
            default_deadline_ms: 2_000,
            websocket_url: None,
            liveness_probe_ms: 0,
            extra_args: vec!["--lang=en-US".into()],
        }
    }

    fn response(value: Value) -> Response {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    #[serial]
    fn headless_plan_uses_scratch_profile_and_appends_extra_args() {
        std::env::remove_var("GOLDPATH_DISABLE_SANDBOX");
        let plan = LaunchPlan::from_config(&config()).unwrap();

        assert!(plan.scratch);
        assert!(plan.profile.starts_with(std::env::temp_dir()));
        assert!(plan.executable.is_none());
        assert!(!plan.no_sandbox);
        assert!(plan.args.iter().any(|arg| arg == "--headless=new"));
        assert_eq!(plan.args.last().map(String::as_str), Some("--lang=en-US"));
    }

    #[test]
    #[serial]
    fn headful_plan_keeps_configured_profile() {
        std::env::set_var("GOLDPATH_DISABLE_SANDBOX", "true");
        let mut cfg = config();
        cfg.headless = false;
        cfg.user_data_dir = Some(PathBuf::from("/var/tmp/goldpath-profile"));

        let plan = LaunchPlan::from_config(&cfg).unwrap();
        std::env::remove_var("GOLDPATH_DISABLE_SANDBOX");

        assert!(!plan.scratch);
        assert!(plan.no_sandbox);
        assert_eq!(plan.profile, PathBuf::from("/var/tmp/goldpath-profile"));
        assert!(!plan.args.iter().any(|arg| arg.starts_with("--headless")));
    }

    #[test]
    #[serial]
    fn relative_profile_resolves_against_cwd() {
        let mut cfg = config();
        cfg.user_data_dir = Some(PathBuf::from("profiles/golden"));
        let plan = LaunchPlan::from_config(&cfg).unwrap();
        assert!(plan.profile.is_absolute());
        assert!(plan.profile.ends_with("profiles/golden"));
    }

    #[test]
    #[serial]
    fn missing_executable_fails_before_launch() {
        let mut cfg = config();
        cfg.executable = PathBuf::from("/definitely/not/here/chrome");
        let err = LaunchPlan::from_config(&cfg).unwrap_err();
        assert_eq!(err.kind, AdapterErrorKind::LaunchFailed);
        assert!(err.data.is_some());
    }

    #[test]
    fn protocol_errors_map_to_cdp_io() {
        let ok = response_payload(response(json!({"id": 1, "result": {"frameId": "F"}}))).unwrap();
        assert_eq!(ok["frameId"], "F");

        let err = response_payload(response(
            json!({"id": 2, "error": {"code": -32000, "message": "No node"}}),
        ))
        .unwrap_err();
        assert_eq!(err.kind, AdapterErrorKind::Protocol);
        assert!(!err.retriable);
        assert!(err.hint.unwrap_or_default().contains("No node"));

        let empty = response_payload(response(json!({"id": 3}))).unwrap_err();
        assert_eq!(empty.kind, AdapterErrorKind::Internal);
    }

    #[tokio::test]
    async fn unstarted_transport_has_no_events_and_refuses_commands() {
        let transport = ChromiumTransport::new(config());
        assert!(transport.next_event().await.is_none());

        let err = transport
            .send_command(CommandTarget::Browser, "Browser.getVersion", json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.kind, AdapterErrorKind::Protocol);
    }
}
