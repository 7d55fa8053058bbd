use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cdp_adapter::{
    AdapterError, AdapterErrorKind, Cdp, PageId, PageInstall, RawEvent,
    ScreenshotOptions, SelectSpec, WaitGate,
};
use goldpath_core_types::{CrashReport, FailureKind, GoldenSession, StepFlag, StepStatus};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use replay_engine::{parse_session, ReplayConfig, ReplayEngine, ReplayError};
use serde_json::{json, Value};
use tokio::sync::broadcast;

#[derive(Default)]
struct Script {
    missing: HashSet<String>,
    slow: HashMap<String, Duration>,
    never_visible: HashSet<String>,
    checked: HashMap<String, bool>,
    snapshot: Option<Value>,
    console_on_failure: usize,
}

struct ScriptedCdp {
    page: PageId,
    events: broadcast::Sender<RawEvent>,
    script: Script,
    calls: Mutex<Vec<String>>,
    fail_launch: AtomicBool,
}

impl ScriptedCdp {
    fn new(script: Script) -> Arc<Self> {
        let (events, _) = broadcast::channel(1024);
        Arc::new(Self {
            page: PageId::new(),
            events,
            script,
            calls: Mutex::new(Vec::new()),
            fail_launch: AtomicBool::new(false),
        })
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn emit(&self, event: RawEvent) {
        let _ = self.events.send(event);
    }

    async fn target(&self, verb: &str, selector: &str) -> Result<(), AdapterError> {
        self.calls.lock().push(format!("{verb}:{selector}"));
        if let Some(delay) = self.script.slow.get(selector) {
            tokio::time::sleep(*delay).await;
        }
        if self.script.missing.contains(selector) {
            for n in 0..self.script.console_on_failure {
                self.emit(RawEvent::Console {
                    page: self.page,
                    level: "error".into(),
                    text: format!("{selector} handler missing #{n}"),
                    ts: 1_700_000_000_000 + n as u64,
                });
            }
            return Err(AdapterError::new(AdapterErrorKind::TargetNotFound)
                .with_hint(format!("selector '{selector}' not found before deadline")));
        }
        Ok(())
    }
}

#[async_trait]
impl Cdp for ScriptedCdp {
    fn subscribe(&self) -> broadcast::Receiver<RawEvent> {
        self.events.subscribe()
    }

    async fn primary_page(&self) -> Result<PageId, AdapterError> {
        if self.fail_launch.load(Ordering::SeqCst) {
            return Err(AdapterError::new(AdapterErrorKind::LaunchFailed));
        }
        Ok(self.page)
    }

    async fn navigate(&self, page: PageId, url: &str, _deadline: Duration) -> Result<(), AdapterError> {
        self.calls.lock().push(format!("navigate:{url}"));
        self.emit(RawEvent::NetworkRequest {
            page,
            request_id: "doc".into(),
            url: url.to_string(),
            method: "GET".into(),
            resource_type: "Document".into(),
            headers: BTreeMap::new(),
            post_data: None,
            ts: 1_700_000_000_000,
        });
        self.emit(RawEvent::NetworkResponse {
            page,
            request_id: "doc".into(),
            url: url.to_string(),
            method: "GET".into(),
            status: 200,
            status_text: "OK".into(),
            mime_type: "text/html".into(),
            resource_type: "Document".into(),
            protocol: Some("h2".into()),
            headers: BTreeMap::new(),
            ts: 1_700_000_000_040,
        });
        self.emit(RawEvent::NetworkResponse {
            page,
            request_id: "pixel".into(),
            url: "https://metrics.shop.test/pixel.gif?t=1".into(),
            method: "GET".into(),
            status: 503,
            status_text: "Service Unavailable".into(),
            mime_type: "image/gif".into(),
            resource_type: "Image".into(),
            protocol: None,
            headers: BTreeMap::new(),
            ts: 1_700_000_000_050,
        });
        Ok(())
    }

    async fn click(&self, _page: PageId, selector: &str, _deadline: Duration) -> Result<(), AdapterError> {
        self.target("click", selector).await
    }

    async fn fill(
        &self,
        _page: PageId,
        selector: &str,
        value: &str,
        _deadline: Duration,
    ) -> Result<(), AdapterError> {
        self.target("fill", &format!("{selector}={value}")).await
    }

    async fn select_option(
        &self,
        _page: PageId,
        spec: SelectSpec,
        _deadline: Duration,
    ) -> Result<(), AdapterError> {
        self.target("select", &format!("{}={}", spec.selector, spec.value)).await
    }

    async fn submit(&self, _page: PageId, selector: &str, _deadline: Duration) -> Result<(), AdapterError> {
        self.target("submit", selector).await
    }

    async fn evaluate_script(&self, _page: PageId, expression: &str) -> Result<Value, AdapterError> {
        if expression.contains(".checked") {
            let state = self
                .script
                .checked
                .iter()
                .find(|(selector, _)| expression.contains(selector.as_str()))
                .map(|(_, checked)| Value::Bool(*checked))
                .unwrap_or(Value::Null);
            return Ok(state);
        }
        self.script
            .snapshot
            .clone()
            .ok_or_else(|| AdapterError::internal("no snapshot scripted"))
    }

    async fn wait_basic(&self, _page: PageId, gate: WaitGate, _timeout: Duration) -> Result<(), AdapterError> {
        self.calls.lock().push(format!("wait:{gate:?}"));
        match gate {
            WaitGate::SelectorVisible { selector } if self.script.never_visible.contains(&selector) => {
                Err(AdapterError::new(AdapterErrorKind::Timeout))
            }
            _ => Ok(()),
        }
    }

    async fn screenshot(&self, _page: PageId, _options: ScreenshotOptions) -> Result<Vec<u8>, AdapterError> {
        Ok(vec![0x89, 0x50, 0x4e, 0x47])
    }

    async fn html_snapshot(&self, _page: PageId) -> Result<String, AdapterError> {
        Ok("<html><body></body></html>".into())
    }

    async fn set_device_metrics(
        &self,
        _page: PageId,
        _width: u32,
        _height: u32,
        _device_scale_factor: f64,
        _mobile: bool,
    ) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn install(&self, _install: PageInstall) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn current_url(&self, _page: PageId) -> Result<String, AdapterError> {
        Ok("https://shop.test/checkout".into())
    }

    async fn inflight(&self, _page: PageId) -> u64 {
        0
    }

    async fn close(&self) -> Result<(), AdapterError> {
        self.calls.lock().push("close".into());
        Err(AdapterError::internal("target already closed"))
    }
}

fn action(step: u64, kind: &str, selector: Option<&str>, baseline: u64, context: Value) -> Value {
    json!({
        "step": step,
        "type": kind,
        "selector": selector,
        "url": "https://shop.test/",
        "timestamp": "2026-03-02T09:00:00Z",
        "performance": { "timeSinceLastAction": baseline },
        "context": context
    })
}

fn session(actions: Vec<Value>) -> GoldenSession {
    let raw = json!({
        "metadata": {
            "sessionId": "golden-1",
            "startTime": "2026-03-02T09:00:00Z",
            "startUrl": "https://shop.test/",
            "viewport": { "width": 1280, "height": 800 }
        },
        "actions": actions,
        "errors": []
    });
    parse_session(&raw.to_string()).unwrap()
}

fn button() -> Value {
    json!({ "tagName": "button" })
}

fn checkout_journey() -> GoldenSession {
    session(vec![
        action(1, "click", Some("#add-to-cart"), 0, button()),
        action(
            2,
            "input",
            Some("input[name=\"email\"]"),
            800,
            json!({ "tagName": "input", "attributes": { "name": "email" }, "value": "ada@example.test" }),
        ),
        action(3, "click", Some("#pay-3f9a1c7e"), 1_200, button()),
        action(4, "click", Some("#confirm"), 900, button()),
        action(5, "submit", Some("form.checkout"), 400, json!({ "tagName": "form" })),
    ])
}

fn config(dir: &Path) -> ReplayConfig {
    ReplayConfig {
        artifacts_dir: dir.to_path_buf(),
        navigation_settle_ms: 10,
        stabilization_pause_ms: 0,
        wait_timeout_ms: 50,
        action_timeout_ms: 1_000,
        ..ReplayConfig::default()
    }
}

fn read_crash_report(dir: &Path) -> CrashReport {
    serde_json::from_str(&std::fs::read_to_string(dir.join("crash-report.json")).unwrap()).unwrap()
}

#[tokio::test]
async fn failing_step_does_not_stop_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let cdp = ScriptedCdp::new(Script {
        missing: HashSet::from(["#pay-3f9a1c7e".to_string()]),
        ..Script::default()
    });
    let engine = ReplayEngine::new(cdp.clone(), config(dir.path()));

    let report = engine.run(&checkout_journey()).await.unwrap();
    let summary = &report.summary;

    assert_eq!(summary.status, StepStatus::Fail);
    assert_eq!(summary.failed_step, Some(3));
    assert_eq!(summary.steps.len(), 5);
    let statuses: Vec<StepStatus> = summary.steps.iter().map(|step| step.status).collect();
    assert_eq!(
        statuses,
        vec![
            StepStatus::Pass,
            StepStatus::Pass,
            StepStatus::Fail,
            StepStatus::Pass,
            StepStatus::Pass
        ]
    );
    assert_eq!(summary.steps[2].error_kind, Some(FailureKind::SelectorNotFound));
    assert!(summary.steps[2].flags.contains(&StepFlag::StepFailure));

    let calls = cdp.calls();
    assert_eq!(calls.first().map(String::as_str), Some("navigate:https://shop.test/"));
    assert!(calls.contains(&"fill:input[name=\"email\"]=ada@example.test".to_string()));
    assert!(calls.contains(&"click:#confirm".to_string()));
    assert!(calls.contains(&"submit:form.checkout".to_string()));
    assert_eq!(calls.last().map(String::as_str), Some("close"));

    assert!(dir.path().join("run-summary.json").exists());
    assert!(dir.path().join("screenshots/step-3-click.png").exists());
    assert!(dir.path().join("trace-failure.zip").exists());
    assert!(!dir.path().join("trace-success.zip").exists());
    assert!(dir.path().join("network.har").exists());
    assert_eq!(read_crash_report(dir.path()).failed_step, 3);

    let anomalies: Vec<Value> =
        serde_json::from_str(&std::fs::read_to_string(dir.path().join("anomalies.json")).unwrap()).unwrap();
    assert_eq!(anomalies.len(), 1);
    assert_eq!(anomalies[0]["status"], 503);
    assert_eq!(anomalies[0]["resourceType"], "Image");

    let persisted: Value =
        serde_json::from_str(&std::fs::read_to_string(dir.path().join("run-summary.json")).unwrap()).unwrap();
    assert_eq!(persisted["status"], "FAIL");
    assert_eq!(persisted["failedStep"], 3);
    assert_eq!(persisted["goldenSessionId"], "golden-1");
}

#[tokio::test]
async fn crash_report_keeps_only_the_last_failure() {
    let dir = tempfile::tempdir().unwrap();
    let cdp = ScriptedCdp::new(Script {
        missing: HashSet::from([
            "#pay-3f9a1c7e".to_string(),
            "#confirm".to_string(),
        ]),
        console_on_failure: 7,
        ..Script::default()
    });
    let engine = ReplayEngine::new(cdp.clone(), config(dir.path()));

    let report = engine.run(&checkout_journey()).await.unwrap();
    assert_eq!(report.summary.failed_step, Some(3));
    assert_eq!(report.trace.as_deref(), Some(dir.path().join("trace-failure.zip").as_path()));

    let crash = read_crash_report(dir.path());
    assert_eq!(crash.failed_step, 4);
    assert_eq!(crash.selector.as_deref(), Some("#confirm"));
    assert_eq!(crash.url, "https://shop.test/checkout");
    let console: Vec<&str> = crash.console.iter().map(|line| line.text.as_str()).collect();
    assert_eq!(
        console,
        vec![
            "#confirm handler missing #2",
            "#confirm handler missing #3",
            "#confirm handler missing #4",
            "#confirm handler missing #5",
            "#confirm handler missing #6",
        ]
    );
    assert!(dir.path().join("screenshots/step-3-click.png").exists());
    assert!(dir.path().join("screenshots/step-4-click.png").exists());
}

#[tokio::test]
async fn passing_run_writes_a_success_trace() {
    let dir = tempfile::tempdir().unwrap();
    let cdp = ScriptedCdp::new(Script::default());
    let engine = ReplayEngine::new(cdp.clone(), config(dir.path()));

    let report = engine.run(&checkout_journey()).await.unwrap();
    assert!(report.passed());
    assert_eq!(report.summary.failed_step, None);
    assert!(report.crash_report.is_none());
    assert!(!dir.path().join("crash-report.json").exists());
    assert!(dir.path().join("trace-success.zip").exists());
    assert!(report.one_line().starts_with("goldpath replay PASS: steps=5"));
}

#[tokio::test]
async fn passing_run_clears_artifacts_of_an_earlier_failure() {
    let dir = tempfile::tempdir().unwrap();
    let failing = ScriptedCdp::new(Script {
        missing: HashSet::from(["#pay-3f9a1c7e".to_string()]),
        ..Script::default()
    });
    let report = ReplayEngine::new(failing, config(dir.path()))
        .run(&checkout_journey())
        .await
        .unwrap();
    assert_eq!(report.summary.failed_step, Some(3));
    assert!(dir.path().join("crash-report.json").exists());

    let passing = ScriptedCdp::new(Script::default());
    let report = ReplayEngine::new(passing, config(dir.path()))
        .run(&checkout_journey())
        .await
        .unwrap();
    assert!(report.passed());
    assert!(!dir.path().join("crash-report.json").exists());
    assert!(!dir.path().join("trace-failure.zip").exists());
    assert!(!dir.path().join("screenshots/step-3-click.png").exists());
    assert!(dir.path().join("trace-success.zip").exists());
    assert!(dir.path().join("run-summary.json").exists());
}

#[tokio::test]
async fn slow_steps_are_flagged_but_pass() {
    let dir = tempfile::tempdir().unwrap();
    let cdp = ScriptedCdp::new(Script {
        slow: HashMap::from([("#slow".to_string(), Duration::from_millis(200))]),
        ..Script::default()
    });
    let engine = ReplayEngine::new(cdp.clone(), config(dir.path()));
    let journey = session(vec![
        action(1, "click", Some("#slow"), 100, button()),
        action(2, "click", Some("#fast"), 10_000, button()),
        action(3, "click", Some("#slow"), 0, button()),
    ]);

    let report = engine.run(&journey).await.unwrap();
    let steps = &report.summary.steps;
    assert!(report.passed());
    assert!(steps[0].degradation);
    assert!(steps[0].flags.contains(&StepFlag::PerformanceDegradation));
    assert!(!steps[1].degradation);
    // No baseline, no degradation.
    assert!(!steps[2].degradation);
    assert_eq!(report.summary.performance_summary.degradation_count, 1);
}

#[tokio::test]
async fn wait_timeouts_do_not_fail_steps() {
    let dir = tempfile::tempdir().unwrap();
    let cdp = ScriptedCdp::new(Script {
        never_visible: HashSet::from(["#toast".to_string()]),
        ..Script::default()
    });
    let engine = ReplayEngine::new(cdp.clone(), config(dir.path()));
    let mut journey = session(vec![
        action(1, "click", Some("#save"), 0, button()),
        action(2, "click", Some("a.next"), 0, button()),
    ]);
    journey.actions[0].wait_condition =
        Some(goldpath_core_types::WaitCondition::Selector("#toast".into()));
    journey.actions[1].wait_condition = Some(goldpath_core_types::WaitCondition::Navigation(
        "https://shop.test/next".into(),
    ));

    let report = engine.run(&journey).await.unwrap();
    assert!(report.passed());
    let calls = cdp.calls();
    assert!(calls.iter().any(|call| call.contains("SelectorVisible")));
    assert!(calls.iter().any(|call| call == "wait:DomReady"));
}

#[tokio::test]
async fn selects_and_toggles_dispatch_by_control() {
    let dir = tempfile::tempdir().unwrap();
    let cdp = ScriptedCdp::new(Script {
        checked: HashMap::from([("#newsletter".to_string(), true)]),
        ..Script::default()
    });
    let engine = ReplayEngine::new(cdp.clone(), config(dir.path()));
    let journey = session(vec![
        action(
            1,
            "select",
            Some("#country"),
            0,
            json!({ "tagName": "select", "value": "DE" }),
        ),
        action(
            2,
            "select",
            Some("#newsletter"),
            0,
            json!({ "tagName": "input", "attributes": { "type": "checkbox" }, "checked": true }),
        ),
        action(
            3,
            "select",
            Some("#plan-monthly"),
            0,
            json!({ "tagName": "input", "attributes": { "type": "radio" }, "checked": true }),
        ),
        action(
            4,
            "navigation",
            None,
            0,
            json!({ "navigationMethod": "pushState", "from": "https://shop.test/", "to": "https://shop.test/done" }),
        ),
    ]);

    let report = engine.run(&journey).await.unwrap();
    assert!(report.passed());
    let calls = cdp.calls();
    assert!(calls.contains(&"select:#country=DE".to_string()));
    assert!(!calls.iter().any(|call| call == "click:#newsletter"));
    assert!(calls.contains(&"click:#plan-monthly".to_string()));
}

#[tokio::test]
async fn missing_selector_is_unsupported() {
    let dir = tempfile::tempdir().unwrap();
    let cdp = ScriptedCdp::new(Script::default());
    let engine = ReplayEngine::new(cdp.clone(), config(dir.path()));
    let journey = session(vec![action(1, "click", None, 0, button())]);

    let report = engine.run(&journey).await.unwrap();
    assert_eq!(report.summary.steps[0].error_kind, Some(FailureKind::Unsupported));
    assert_eq!(report.summary.failed_step, Some(1));
}

#[tokio::test]
async fn failures_carry_a_repair_suggestion() {
    let dir = tempfile::tempdir().unwrap();
    let cdp = ScriptedCdp::new(Script {
        missing: HashSet::from(["#pay-3f9a1c7e".to_string()]),
        snapshot: Some(json!({
            "url": "https://shop.test/checkout",
            "nodes": [
                { "tag": "html", "parent": null },
                { "tag": "body", "parent": 0 },
                { "tag": "button", "attrs": { "class": "btn" }, "text": "Cancel", "parent": 1 },
                {
                    "tag": "button",
                    "attrs": { "class": "btn primary", "data-testid": "pay-now" },
                    "text": "Pay now",
                    "parent": 1
                }
            ]
        })),
        ..Script::default()
    });
    let engine = ReplayEngine::new(cdp.clone(), config(dir.path()));
    let journey = session(vec![action(
        1,
        "click",
        Some("#pay-3f9a1c7e"),
        0,
        json!({
            "tagName": "button",
            "id": "pay-3f9a1c7e",
            "classList": ["btn", "primary"],
            "attributes": { "data-testid": "pay-now" },
            "text": "Pay now"
        }),
    )]);

    let report = engine.run(&journey).await.unwrap();
    let expected = Some("[data-testid=\"pay-now\"]".to_string());
    assert_eq!(report.summary.steps[0].suggested_selector, expected);
    assert_eq!(read_crash_report(dir.path()).suggested_selector, expected);
    // Replay itself never retries with the suggestion.
    assert!(!cdp.calls().iter().any(|call| call.contains("pay-now")));
}

#[tokio::test]
async fn unreachable_browser_aborts_without_summary() {
    let dir = tempfile::tempdir().unwrap();
    let cdp = ScriptedCdp::new(Script::default());
    cdp.fail_launch.store(true, Ordering::SeqCst);
    let engine = ReplayEngine::new(cdp.clone(), config(dir.path()));

    let err = engine.run(&checkout_journey()).await.unwrap_err();
    assert!(matches!(err, ReplayError::FatalLaunch(_)));
    assert!(err.is_fatal());
    assert!(!dir.path().join("run-summary.json").exists());
}

#[tokio::test]
async fn round_tripped_session_replays_identically() {
    let journey = checkout_journey();
    let reparsed = parse_session(&journey.to_json_pretty().unwrap()).unwrap();
    assert_eq!(reparsed.actions, journey.actions);

    let mut orders = Vec::new();
    for session in [&journey, &reparsed] {
        let dir = tempfile::tempdir().unwrap();
        let cdp = ScriptedCdp::new(Script::default());
        let engine = ReplayEngine::new(cdp.clone(), config(dir.path()));
        engine.run(session).await.unwrap();
        orders.push(cdp.calls());
    }
    assert_eq!(orders[0], orders[1]);
}
